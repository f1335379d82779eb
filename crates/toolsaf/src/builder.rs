//! Programmatic construction of the system statement: hosts, services,
//! connections, components and ignore rules.

use std::collections::HashSet;

use toolsaf_core::strng;

use crate::errors::ConfigurationError;
use crate::ignore::IgnoreRules;
use crate::model::{
	ComponentId, ComponentKind, ConnectionId, CookieData, Cookies, EntityRef, IoTSystem, NodeId,
	OnlineResource, Software,
};
use crate::services;
use crate::types::{
	Address, ConnectionType, EndpointAddress, EntityTag, ExternalActivity, HostType, Network,
	Protocol, Status,
};

/// Builds an [`IoTSystem`] statement. Declared entities are expected and
/// marked original so they survive resets.
pub struct SystemBuilder {
	system: IoTSystem,
	ignore_rules: IgnoreRules,
}

impl SystemBuilder {
	pub fn new(name: &str) -> SystemBuilder {
		SystemBuilder {
			system: IoTSystem::new(name),
			ignore_rules: IgnoreRules::new(),
		}
	}

	pub fn system(&self) -> &IoTSystem {
		&self.system
	}

	pub fn system_mut(&mut self) -> &mut IoTSystem {
		&mut self.system
	}

	pub fn ignore_rules_mut(&mut self) -> &mut IgnoreRules {
		&mut self.ignore_rules
	}

	/// Declare the networks of the system.
	pub fn networks(&mut self, networks: Vec<Network>) -> &mut Self {
		self.system.set_networks(networks);
		self
	}

	fn declare_host(&mut self, name: &str, host_type: HostType) -> NodeId {
		let tag = EntityTag::new(name);
		let host = self.system.add_host(name, Some(tag));
		let node = self.system.node_mut(host);
		node.status = Status::Expected;
		node.host_type = host_type;
		self.system.originals.insert(EntityRef::Node(host));
		host
	}

	/// Declare an IoT device.
	pub fn device(&mut self, name: &str) -> NodeId {
		self.declare_host(name, HostType::Device)
	}

	/// Declare a backend server, reachable over the Internet.
	pub fn backend(&mut self, name: &str) -> NodeId {
		let h = self.declare_host(name, HostType::Remote);
		self.system.node_mut(h).external_activity = ExternalActivity::Open;
		h
	}

	/// Declare a mobile application host.
	pub fn mobile(&mut self, name: &str) -> NodeId {
		self.declare_host(name, HostType::Mobile)
	}

	/// Declare a browser.
	pub fn browser(&mut self, name: &str) -> NodeId {
		self.declare_host(name, HostType::Browser)
	}

	/// Declare a host standing for any host of its kind.
	pub fn any(&mut self, name: &str) -> NodeId {
		let h = self.declare_host(name, HostType::Generic);
		self.system.node_mut(h).any_host = true;
		h
	}

	/// Add an IP address to a host.
	pub fn ip(&mut self, host: NodeId, address: &str) -> &mut Self {
		let addr = Address::parse(address).expect("literal IP address");
		self.system.node_mut(host).addresses.insert(addr);
		self
	}

	/// Add a HW address to a host.
	pub fn hw(&mut self, host: NodeId, address: &str) -> &mut Self {
		let addr = Address::parse(&format!("{address}|hw")).expect("literal HW address");
		self.system.node_mut(host).addresses.insert(addr);
		self
	}

	/// Add a DNS name to a host.
	pub fn dns(&mut self, host: NodeId, name: &str) -> &mut Self {
		let addr = Address::parse(&format!("{name}|name")).expect("literal DNS name");
		self.system.node_mut(host).addresses.insert(addr);
		self
	}

	/// Set the external activity policy of a host and its services.
	pub fn external_activity(&mut self, host: NodeId, value: ExternalActivity) -> &mut Self {
		self.system.node_mut(host).external_activity = value;
		for c in self.system.node(host).children.clone() {
			self.system.node_mut(c).external_activity = value;
		}
		self
	}

	/// Declare a service on a host. The transport and connection type
	/// follow the application protocol.
	pub fn service(&mut self, host: NodeId, protocol: Protocol, port: u16) -> NodeId {
		let transport = transport_of(protocol);
		let ep = EndpointAddress::any(transport, port);
		let service = self.system.create_service(host, &ep);
		{
			let node = self.system.node_mut(service);
			node.status = Status::Expected;
			if protocol != transport {
				node.name = strng::new(&IoTSystem::make_service_name(
					&protocol.as_str().to_uppercase(),
					Some(port),
				));
			}
			let data = node.service_data_mut().expect("created a service");
			data.protocol = Some(protocol);
			data.con_type = con_type_of(protocol);
		}
		self.system.originals.insert(EntityRef::Node(service));
		service
	}

	/// Declare an expected connection from a source host or client service
	/// to a target service.
	pub fn connect(&mut self, source: NodeId, target: NodeId) -> ConnectionId {
		let source_host = self.system.parent_host(source);
		if let Some(c) = self.system.find_connection(source_host, target) {
			return c; // referring to the existing connection
		}
		let source_addr = node_address(&self.system, source);
		let target_addr = node_address(&self.system, target);
		self.system.node_mut(source).status = Status::Expected;
		self.system.node_mut(target).status = Status::Expected;
		let c = self
			.system
			.new_connection((source, &source_addr), (target, &target_addr), true);
		self.system.originals.insert(EntityRef::Connection(c));
		c
	}

	/// Declare a DHCP server on the host.
	pub fn dhcp_server(&mut self, host: NodeId) -> NodeId {
		services::install_dhcp_server(&mut self.system, host)
	}

	/// Declare a DNS server on the host.
	pub fn dns_server(&mut self, host: NodeId, captive_portal: bool) -> NodeId {
		services::install_dns_server(&mut self.system, host, captive_portal)
	}

	/// Declare ARP for the host, creating the logical broadcast node.
	pub fn arp(&mut self, host: NodeId) -> ConnectionId {
		services::install_arp(&mut self.system, host)
	}

	/// Declare the host broadcasting to the given address.
	pub fn broadcast(
		&mut self,
		host: NodeId,
		address: &str,
		protocol: Protocol,
		port: u16,
	) -> NodeId {
		let addr = Address::parse(address).expect("literal broadcast address");
		services::multicast_source(&mut self.system, host, &addr, protocol, Some(port))
	}

	/// Declare the receiver listening to a broadcast sender service.
	pub fn listen_broadcast(&mut self, receiver: NodeId, sender_service: NodeId) -> ConnectionId {
		services::multicast_listener(&mut self.system, receiver, sender_service)
	}

	/// Attach a software component to a host.
	pub fn software(&mut self, host: NodeId, name: &str) -> ComponentId {
		let id = self.system.add_component(
			host,
			name,
			ComponentKind::Software(Software::default()),
		);
		self.system.originals.insert(EntityRef::Component(id));
		id
	}

	/// Attach a cookies component listing `(name, domain, path, explanation)`.
	pub fn cookies(&mut self, host: NodeId, cookies: &[(&str, &str, &str, &str)]) -> ComponentId {
		let mut component = Cookies::default();
		for (name, domain, path, explanation) in cookies {
			component.cookies.insert(
				strng::new(name),
				CookieData {
					domain: strng::new(domain),
					path: strng::new(path),
					explanation: strng::new(explanation),
				},
			);
		}
		let id = self
			.system
			.add_component(host, "Cookies", ComponentKind::Cookies(component));
		self.system.originals.insert(EntityRef::Component(id));
		id
	}

	/// Declare an online resource of the system, e.g. a privacy policy.
	pub fn online_resource(&mut self, name: &str, url: &str, keywords: &[&str]) -> &mut Self {
		self.system
			.online_resources
			.push(OnlineResource::new(name, url, keywords));
		self
	}

	/// A name the host may resolve without consequences for the peers.
	pub fn ignore_name_requests(&mut self, host: NodeId, name: &str) -> &mut Self {
		let name = crate::types::DnsName::new(name).expect("literal DNS name");
		if let Some(h) = self.system.node_mut(host).host_data_mut() {
			h.ignore_name_requests.insert(name);
		}
		self
	}

	/// Validate and finish the statement.
	pub fn finish(mut self) -> Result<(IoTSystem, IgnoreRules), ConfigurationError> {
		let hosts = self.system.hosts();
		let mut names: HashSet<String> = HashSet::new();
		for h in hosts {
			let needs_software = {
				let node = self.system.node(h);
				let name = node.name.to_string();
				if !names.insert(name.clone()) {
					return Err(ConfigurationError::DuplicateName(
						name,
						self.system.name().to_string(),
					));
				}
				if node.host_type == HostType::Browser && !node.children.is_empty() {
					return Err(ConfigurationError::BrowserWithServices(name));
				}
				let sw_count = node
					.components
					.iter()
					.filter(|c| self.system.component(**c).software().is_some())
					.count();
				if sw_count > 1 {
					return Err(ConfigurationError::DuplicateSoftware(name));
				}
				let mut service_names: HashSet<String> = HashSet::new();
				for c in &node.children {
					let sn = self.system.node(*c).name.to_string();
					if !service_names.insert(sn.clone()) {
						return Err(ConfigurationError::DuplicateName(sn, name.clone()));
					}
				}
				// declared concrete IP addresses must be inside some network
				for a in &node.addresses {
					if matches!(a, Address::Ip(_))
						&& !a.is_multicast() && self.system.is_external(a)
						&& node.host_type != HostType::Remote
					{
						return Err(ConfigurationError::AddressOutsideNetworks(a.to_string()));
					}
				}
				sw_count == 0
					&& !node.any_host
					&& node.host_type != HostType::Browser
					&& node.host_type != HostType::Administrative
			};
			// each real host has exactly one software component
			if needs_software {
				let name = format!("{} SW", self.system.node(h).name);
				let id = self.system.add_component(
					h,
					&name,
					ComponentKind::Software(Software::default()),
				);
				self.system.originals.insert(EntityRef::Component(id));
			}
		}
		Ok((self.system, self.ignore_rules))
	}
}

/// The address a connection end is referred to by, preferring the tag.
fn node_address(system: &IoTSystem, node: NodeId) -> Address {
	let n = system.node(node);
	if n.is_service() {
		let host = system.parent_host(node);
		if let Some(tag) = system.node(host).get_tag() {
			for a in &n.addresses {
				if let Some((protocol, port)) = a.protocol_port() {
					return Address::Endpoint(EndpointAddress::new(
						Address::Tag(tag.clone()),
						protocol,
						port,
					));
				}
			}
		}
	}
	if let Some(tag) = n.get_tag() {
		return Address::Tag(tag.clone());
	}
	Address::get_prioritized(&n.addresses, true, true, true)
}

/// Transport protocol an application protocol runs on.
fn transport_of(protocol: Protocol) -> Protocol {
	match protocol {
		Protocol::Tls
		| Protocol::Http
		| Protocol::Ssh
		| Protocol::Mqtt
		| Protocol::Ftp
		| Protocol::Tcp => Protocol::Tcp,
		Protocol::Dns | Protocol::Dhcp | Protocol::Ntp | Protocol::Udp => Protocol::Udp,
		p => p,
	}
}

fn con_type_of(protocol: Protocol) -> ConnectionType {
	match protocol {
		Protocol::Tls | Protocol::Ssh => ConnectionType::Encrypted,
		Protocol::Arp
		| Protocol::Dhcp
		| Protocol::Dns
		| Protocol::Ntp
		| Protocol::Icmp
		| Protocol::Eapol => ConnectionType::Administrative,
		_ => ConnectionType::Unknown,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn build_simple_statement() {
		let mut sb = SystemBuilder::new("Test system");
		let dev = sb.device("Device");
		sb.hw(dev, "1:0:0:0:0:1");
		let backend = sb.backend("Backend");
		sb.dns(backend, "backend.example.com");
		let service = sb.service(backend, Protocol::Tls, 443);
		sb.connect(dev, service);
		let (system, _) = sb.finish().unwrap();

		assert_eq!(system.hosts().len(), 2);
		assert_eq!(system.get_connections().len(), 1);
		let c = system.get_connections()[0];
		assert_eq!(system.connection(c).status, Status::Expected);
		assert_eq!(system.connection(c).con_type, ConnectionType::Encrypted);
		// both ends know the connection
		let dev_conns = system.node(dev).host_data().unwrap().connections.clone();
		assert!(dev_conns.contains(&c));
		let be_conns = system
			.node(backend)
			.host_data()
			.unwrap()
			.connections
			.clone();
		assert!(be_conns.contains(&c));
	}

	#[test]
	fn duplicate_host_name_rejected() {
		let mut sb = SystemBuilder::new("Test system");
		sb.device("Device");
		sb.device("Device");
		assert!(matches!(
			sb.finish(),
			Err(ConfigurationError::DuplicateName(_, _))
		));
	}

	#[test]
	fn browser_with_services_rejected() {
		let mut sb = SystemBuilder::new("Test system");
		let b = sb.browser("Browser");
		sb.service(b, Protocol::Http, 8080);
		assert!(matches!(
			sb.finish(),
			Err(ConfigurationError::BrowserWithServices(_))
		));
	}

	#[test]
	fn default_software_is_added() {
		let mut sb = SystemBuilder::new("Test system");
		let dev = sb.device("Device");
		let (system, _) = sb.finish().unwrap();
		let components = &system.node(dev).components;
		assert_eq!(components.len(), 1);
		assert!(system.component(components[0]).software().is_some());
	}

	#[test]
	fn cookies_and_online_resources() {
		let mut sb = SystemBuilder::new("Test system");
		let b = sb.browser("Browser");
		let c = sb.cookies(b, &[("session", ".example.com", "/", "login session")]);
		sb.online_resource("privacy-policy", "https://example.com/privacy", &["privacy"]);
		let (system, _) = sb.finish().unwrap();
		match &system.component(c).kind {
			ComponentKind::Cookies(ck) => {
				assert_eq!(ck.cookies.len(), 1);
				assert_eq!(ck.cookies["session"].domain, ".example.com");
			},
			other => panic!("not a cookies component: {other:?}"),
		}
		assert_eq!(system.online_resources.len(), 1);
		// browsers do not get a default software component
		assert_eq!(system.node(b).components.len(), 1);
	}

	#[test]
	fn connecting_twice_reuses_the_connection() {
		let mut sb = SystemBuilder::new("Test system");
		let dev = sb.device("Device");
		let backend = sb.backend("Backend");
		let service = sb.service(backend, Protocol::Tls, 443);
		let c1 = sb.connect(dev, service);
		let c2 = sb.connect(dev, service);
		assert_eq!(c1, c2);
	}
}
