//! Services with dedicated logic: DHCP, DNS and broadcast/multicast
//! listeners.

use toolsaf_core::strng;

use crate::events::Flow;
use crate::model::{
	ConnectionId, IoTSystem, NodeId, ServiceBehavior,
};
use crate::ranges::MulticastTarget;
use crate::types::{
	Address, ConnectionType, EndpointAddress, HWAddress, HostType, Protocol, Status,
};

/// Install a DHCP server service on the host. It matches any UDP/67
/// traffic and learns client addresses from its replies, which come from
/// another address than the broadcast the request went to.
pub fn install_dhcp_server(system: &mut IoTSystem, host: NodeId) -> NodeId {
	let service = system.create_service(host, &EndpointAddress::any(Protocol::Udp, 67));
	{
		let node = system.node_mut(service);
		node.name = strng::literal!("DHCP");
		node.description = strng::literal!("DHCP service");
		node.status = Status::Expected;
		node.host_type = HostType::Administrative;
		// requests go to broadcast, thus the reply looks like a request
		node.external_activity = crate::types::ExternalActivity::Unlimited;
		let data = node.service_data_mut().expect("created a service");
		data.protocol = Some(Protocol::Dhcp);
		data.con_type = ConnectionType::Administrative;
		data.reply_from_other_address = true;
		data.behavior = ServiceBehavior::Dhcp;
	}
	system.originals.insert(service.into());
	service
}

/// The client side of DHCP: a client-only service at UDP/68.
pub fn install_dhcp_client(system: &mut IoTSystem, host: NodeId) -> NodeId {
	let service = system.create_service(host, &EndpointAddress::any(Protocol::Udp, 68));
	{
		let node = system.node_mut(service);
		node.name = strng::literal!("DHCP");
		node.status = Status::Expected;
		node.host_type = HostType::Administrative;
		let data = node.service_data_mut().expect("created a service");
		data.protocol = Some(Protocol::Dhcp);
		data.con_type = ConnectionType::Administrative;
		data.client_side = true;
	}
	system.originals.insert(service.into());
	service
}

/// Install a DNS server service on the host. Adapters that parse DNS
/// traffic emit name events referencing this service.
pub fn install_dns_server(system: &mut IoTSystem, host: NodeId, captive_portal: bool) -> NodeId {
	let service = system.create_service(host, &EndpointAddress::any(Protocol::Udp, 53));
	{
		let node = system.node_mut(service);
		node.name = strng::literal!("DNS");
		node.status = Status::Expected;
		node.host_type = HostType::Administrative;
		let data = node.service_data_mut().expect("created a service");
		data.protocol = Some(Protocol::Dns);
		data.con_type = ConnectionType::Administrative;
		data.behavior = ServiceBehavior::Dns { captive_portal };
	}
	system.message_listeners.insert(service, Protocol::Dns);
	system.originals.insert(service.into());
	service
}

/// Declare a broadcast or multicast sender service: the host sends
/// `protocol` traffic to the given multicast target.
pub fn multicast_source(
	system: &mut IoTSystem,
	host: NodeId,
	address: &Address,
	protocol: Protocol,
	port: Option<u16>,
) -> NodeId {
	let ep = EndpointAddress::new(Address::any(), protocol, port);
	let service = system.create_service(host, &ep);
	{
		let node = system.node_mut(service);
		let name = strng::format!("{} multicast", node.name);
		node.name = name;
		node.status = Status::Expected;
		let data = node.service_data_mut().expect("created a service");
		data.multicast_source = Some(MulticastTarget::Fixed(address.clone()));
	}
	system.originals.insert(service.into());
	service
}

/// Declare a listener for a multicast sender service: creates a service
/// on the receiving host at the broadcast address and the connection from
/// the sender.
pub fn multicast_listener(
	system: &mut IoTSystem,
	receiver: NodeId,
	sender_service: NodeId,
) -> ConnectionId {
	let target = system
		.node(sender_service)
		.service_data()
		.and_then(|d| d.multicast_source.clone())
		.expect("can only receive multicast");
	let mc_address = target
		.fixed_address()
		.cloned()
		.unwrap_or(Address::BROADCAST_IP);
	let endpoints: Vec<EndpointAddress> = system
		.node(sender_service)
		.addresses
		.iter()
		.filter_map(|a| match a {
			Address::Endpoint(ep) => Some(ep.clone()),
			_ => None,
		})
		.collect();
	let protocol = endpoints
		.first()
		.map(|ep| ep.protocol)
		.unwrap_or(Protocol::Udp);
	let port = endpoints.first().and_then(|ep| ep.port);
	let ep = EndpointAddress::new(mc_address.clone(), protocol, port);
	let listener = system.create_service(receiver, &ep);
	{
		let node = system.node_mut(listener);
		node.status = Status::Expected;
		// the listener binds the multicast address itself, not a wildcard
		node.addresses.clear();
		node.addresses.insert(Address::Endpoint(ep.clone()));
		let data = node.service_data_mut().expect("created a service");
		data.multicast_source = Some(target);
	}
	system.originals.insert(listener.into());
	// broadcast is not by any means from the multicast port
	let sender_host = system.parent_host(sender_service);
	let source_addr = system
		.node(sender_host)
		.get_tag()
		.map(|t| Address::Tag(t.clone()))
		.unwrap_or_else(|| {
			Address::get_prioritized(&system.node(sender_host).addresses, true, true, true)
		});
	let target_addr = Address::Endpoint(ep);
	let c = system.new_connection((sender_host, &source_addr), (listener, &target_addr), true);
	system.originals.insert(c.into());
	c
}

/// Declare ARP for a host: an ARP service on the host plus the logical
/// broadcast node `ff:ff:ff:ff:ff:ff` with its own ARP service, and the
/// connection from the host to the broadcast.
pub fn install_arp(system: &mut IoTSystem, host: NodeId) -> ConnectionId {
	let host_s = system.create_service(host, &EndpointAddress::any_protocol(Protocol::Arp));
	{
		let node = system.node_mut(host_s);
		node.name = strng::literal!("ARP");
		node.status = Status::Expected;
		node.host_type = HostType::Administrative;
		// ARP makes requests and replies
		node.external_activity = crate::types::ExternalActivity::Unlimited;
		let data = node.service_data_mut().expect("created a service");
		data.protocol = Some(Protocol::Arp);
		data.con_type = ConnectionType::Administrative;
	}
	system.originals.insert(host_s.into());

	// get or create the broadcast node and its ARP service
	let bc_address = Address::Hardware(HWAddress::BROADCAST);
	let bc_node = match system.find_endpoint(&bc_address, None) {
		Some(n) => system.parent_host(n),
		None => {
			let n = system.add_host(&HWAddress::BROADCAST.to_string(), None);
			let node = system.node_mut(n);
			node.status = Status::Expected;
			node.description = strng::literal!("Broadcast");
			node.addresses.insert(bc_address.clone());
			// anyone can make broadcasts, it does not reply
			node.external_activity = crate::types::ExternalActivity::Open;
			node.host_type = HostType::Administrative;
			system.originals.insert(n.into());
			n
		},
	};
	let bc_s = match system.find_child_endpoint(
		bc_node,
		&Address::Endpoint(EndpointAddress::new(bc_address.clone(), Protocol::Arp, None)),
	) {
		Some(s) => s,
		None => {
			let s = system.create_service(bc_node, &EndpointAddress::any_protocol(Protocol::Arp));
			let node = system.node_mut(s);
			node.name = strng::literal!("ARP");
			node.status = Status::Expected;
			node.host_type = HostType::Administrative;
			node.external_activity = crate::types::ExternalActivity::Open;
			let data = node.service_data_mut().expect("created a service");
			data.protocol = Some(Protocol::Arp);
			data.con_type = ConnectionType::Administrative;
			system.originals.insert(s.into());
			s
		},
	};
	match system.find_connection(host, bc_s) {
		Some(c) => c,
		None => {
			let source_addr = system
				.node(host)
				.get_tag()
				.map(|t| Address::Tag(t.clone()))
				.unwrap_or(Address::NULL_IP);
			let target_addr =
				Address::Endpoint(EndpointAddress::new(bc_address, Protocol::Arp, None));
			let c = system.new_connection((host_s, &source_addr), (bc_s, &target_addr), true);
			system.originals.insert(c.into());
			c
		},
	}
}

/// DHCP address learning: a server reply from port 67 to port 68 tells
/// the client its new IP address.
pub fn dhcp_learn_from_flow(
	system: &mut IoTSystem,
	connection: ConnectionId,
	flow: &Flow,
	service_is_flow_source: bool,
) {
	if !service_is_flow_source {
		return;
	}
	let Flow::Ip(f) = flow else {
		return; // bad DHCP flow
	};
	if f.source.2 == 67 && f.target.2 == 68 {
		let client = system.parent_host(system.connection(connection).source);
		system.learn_ip_address(client, Address::Ip(f.target.1));
	}
}
