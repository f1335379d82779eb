//! The system model: an arena of network nodes, connections and components
//! owned by a single [`IoTSystem`]. All cross-references are stable ids;
//! identity, equality and hashing are by id.

mod component;

pub use component::{
	Component, ComponentKind, CookieData, Cookies, DataReference, OperatingSystem, Software,
	SoftwareComponent, StoredData,
};

use indexmap::{IndexMap, IndexSet};
use toolsaf_core::prelude::*;

use crate::errors::ParseError;
use crate::property::{properties, PropertyKey, PropertyMap, PropertyValue};
use crate::ranges::MulticastTarget;
use crate::types::{
	Address, ConnectionType, DnsName, EndpointAddress, EntityTag, ExternalActivity, HostType,
	Network, Protocol, Status, SystemAddress, Verdict,
};

/// Identifier of a network node (system root, host or service).
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct NodeId(u32);

impl NodeId {
	pub fn index(&self) -> usize {
		self.0 as usize
	}
}

impl std::fmt::Display for NodeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "n{}", self.0)
	}
}

/// Identifier of a connection.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct ConnectionId(u32);

impl ConnectionId {
	pub fn index(&self) -> usize {
		self.0 as usize
	}
}

/// Identifier of a node component.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct ComponentId(u32);

impl ComponentId {
	pub fn index(&self) -> usize {
		self.0 as usize
	}
}

/// Reference to any entity of the model.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub enum EntityRef {
	Node(NodeId),
	Connection(ConnectionId),
	Component(ComponentId),
}

impl From<NodeId> for EntityRef {
	fn from(id: NodeId) -> Self {
		EntityRef::Node(id)
	}
}

impl From<ConnectionId> for EntityRef {
	fn from(id: ConnectionId) -> Self {
		EntityRef::Connection(id)
	}
}

impl From<ComponentId> for EntityRef {
	fn from(id: ComponentId) -> Self {
		EntityRef::Component(id)
	}
}

/// Dedicated logic a service implements beyond plain traffic matching.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceBehavior {
	#[default]
	Plain,
	/// DHCP server: learns client IP addresses from its replies.
	Dhcp,
	/// DNS server: name events reference this service. A captive portal
	/// answers with its own address, which must not bind the queried name.
	Dns { captive_portal: bool },
}

/// Host-specific state.
#[derive(Debug, Clone, Default)]
pub struct HostData {
	/// Connections terminating here as either endpoint.
	pub connections: Vec<ConnectionId>,
	/// Names this host may request without raising suspicion on the peer.
	pub ignore_name_requests: HashSet<DnsName>,
}

/// Service-specific state.
#[derive(Debug, Clone, Default)]
pub struct ServiceData {
	pub protocol: Option<Protocol>,
	pub con_type: ConnectionType,
	pub authentication: bool,
	/// Client-side "service", e.g. the DHCP client port.
	pub client_side: bool,
	/// Set when this service listens for broadcast or multicast traffic.
	pub multicast_source: Option<MulticastTarget>,
	/// Reply comes from another address than the request went to (DHCP).
	pub reply_from_other_address: bool,
	pub behavior: ServiceBehavior,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
	System,
	Host(HostData),
	Service(ServiceData),
}

/// A network node: the system root, a host, or a service.
#[derive(Debug, Clone)]
pub struct Node {
	pub id: NodeId,
	pub parent: Option<NodeId>,
	pub name: Strng,
	pub description: Strng,
	pub status: Status,
	pub host_type: HostType,
	pub external_activity: ExternalActivity,
	pub match_priority: i32,
	pub addresses: IndexSet<Address>,
	/// Matches any address in its networks.
	pub any_host: bool,
	/// Networks this node is in; empty means same as parent.
	pub networks: Vec<Network>,
	pub children: Vec<NodeId>,
	pub components: Vec<ComponentId>,
	pub properties: PropertyMap,
	pub kind: NodeKind,
}

impl Node {
	pub fn is_host(&self) -> bool {
		matches!(self.kind, NodeKind::Host(_))
	}

	pub fn is_service(&self) -> bool {
		matches!(self.kind, NodeKind::Service(_))
	}

	pub fn host_data(&self) -> Option<&HostData> {
		match &self.kind {
			NodeKind::Host(h) => Some(h),
			_ => None,
		}
	}

	pub fn host_data_mut(&mut self) -> Option<&mut HostData> {
		match &mut self.kind {
			NodeKind::Host(h) => Some(h),
			_ => None,
		}
	}

	pub fn service_data(&self) -> Option<&ServiceData> {
		match &self.kind {
			NodeKind::Service(s) => Some(s),
			_ => None,
		}
	}

	pub fn service_data_mut(&mut self) -> Option<&mut ServiceData> {
		match &mut self.kind {
			NodeKind::Service(s) => Some(s),
			_ => None,
		}
	}

	pub fn is_admin(&self) -> bool {
		self.host_type == HostType::Administrative
	}

	/// Relevant entities are part of the analysis; placeholders and
	/// externals are not.
	pub fn is_relevant(&self) -> bool {
		matches!(self.status, Status::Expected | Status::Unexpected)
	}

	pub fn get_tag(&self) -> Option<&EntityTag> {
		Address::get_tag(&self.addresses)
	}

	/// Is a TCP server service?
	pub fn is_tcp_service(&self) -> bool {
		self.addresses
			.iter()
			.any(|a| matches!(a.protocol_port(), Some((Protocol::Tcp, _))))
	}

	/// Resolved port of a service, if any.
	pub fn get_port(&self) -> Option<u16> {
		self.addresses.iter().find_map(|a| match a.protocol_port() {
			Some((_, p)) => p,
			None => None,
		})
	}

	pub fn is_encrypted(&self) -> bool {
		matches!(
			self.service_data().and_then(|s| s.protocol),
			Some(Protocol::Tls) | Some(Protocol::Ssh)
		)
	}
}

/// A connection between two addressable entities.
#[derive(Debug, Clone)]
pub struct Connection {
	pub id: ConnectionId,
	pub source: NodeId,
	pub target: NodeId,
	pub status: Status,
	pub con_type: ConnectionType,
	pub properties: PropertyMap,
}

impl Connection {
	pub fn is_expected(&self) -> bool {
		self.status == Status::Expected
	}

	pub fn is_end(&self, entity: NodeId) -> bool {
		self.source == entity || self.target == entity
	}
}

/// A change record emitted while the model mutates. Changes queue up in the
/// system and are drained by the consumer after each event; consumers never
/// run inside a mutating call.
#[derive(Debug, Clone)]
pub enum ModelChange {
	ConnectionChange(ConnectionId),
	HostChange(NodeId),
	AddressChange(NodeId),
	ServiceChange(NodeId),
	PropertyChange {
		entity: EntityRef,
		key: PropertyKey,
		value: PropertyValue,
	},
}

/// An online resource related to the system, e.g. a privacy policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineResource {
	pub name: Strng,
	pub url: Strng,
	pub keywords: Vec<Strng>,
}

impl OnlineResource {
	pub fn new(name: &str, url: &str, keywords: &[&str]) -> OnlineResource {
		OnlineResource {
			name: strng::new(name),
			url: strng::new(url),
			keywords: keywords.iter().map(strng::new).collect(),
		}
	}
}

/// The IoT system model: single owner of all entities.
#[derive(Debug)]
pub struct IoTSystem {
	nodes: Vec<Node>,
	connections: Vec<Connection>,
	components: Vec<Component>,
	/// Entities declared in the statement; they survive reset.
	pub originals: HashSet<EntityRef>,
	/// Services consuming specific message types, e.g. DNS.
	pub message_listeners: IndexMap<NodeId, Protocol>,
	/// Observed connections by their end addresses.
	observed_connections: IndexMap<(Address, Address), ConnectionId>,
	changes: Vec<ModelChange>,
	pub online_resources: Vec<OnlineResource>,
	pub upload_tag: Option<Strng>,
}

impl Default for IoTSystem {
	fn default() -> Self {
		IoTSystem::new("IoT system")
	}
}

impl IoTSystem {
	pub fn new(name: &str) -> IoTSystem {
		let root = Node {
			id: NodeId(0),
			parent: None,
			name: strng::new(name),
			description: strng::EMPTY,
			status: Status::Expected,
			host_type: HostType::Generic,
			external_activity: ExternalActivity::Banned,
			match_priority: 0,
			addresses: IndexSet::new(),
			any_host: false,
			// reasonable default mask
			networks: vec![Network::with_mask(
				"local",
				"192.168.0.0/16".parse().expect("static mask"),
			)],
			children: Vec::new(),
			components: Vec::new(),
			properties: PropertyMap::new(),
			kind: NodeKind::System,
		};
		let mut originals = HashSet::new();
		originals.insert(EntityRef::Node(NodeId(0)));
		IoTSystem {
			nodes: vec![root],
			connections: Vec::new(),
			components: Vec::new(),
			originals,
			message_listeners: IndexMap::new(),
			observed_connections: IndexMap::new(),
			changes: Vec::new(),
			online_resources: Vec::new(),
			upload_tag: None,
		}
	}

	pub fn root(&self) -> NodeId {
		NodeId(0)
	}

	pub fn name(&self) -> &Strng {
		&self.nodes[0].name
	}

	pub fn node(&self, id: NodeId) -> &Node {
		&self.nodes[id.index()]
	}

	pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
		&mut self.nodes[id.index()]
	}

	pub fn connection(&self, id: ConnectionId) -> &Connection {
		&self.connections[id.index()]
	}

	pub fn connection_mut(&mut self, id: ConnectionId) -> &mut Connection {
		&mut self.connections[id.index()]
	}

	pub fn component(&self, id: ComponentId) -> &Component {
		&self.components[id.index()]
	}

	pub fn component_mut(&mut self, id: ComponentId) -> &mut Component {
		&mut self.components[id.index()]
	}

	/// Hosts of the system, in declaration order.
	pub fn hosts(&self) -> Vec<NodeId> {
		self.nodes[0]
			.children
			.iter()
			.copied()
			.filter(|c| self.node(*c).is_host())
			.collect()
	}

	pub fn networks(&self) -> &[Network] {
		&self.nodes[0].networks
	}

	pub fn set_networks(&mut self, networks: Vec<Network>) {
		self.nodes[0].networks = networks;
	}

	pub fn default_network(&self) -> Network {
		self.nodes[0].networks[0].clone()
	}

	pub fn get_network_by_name(&self, name: &str) -> Result<Network, ParseError> {
		for nw in self.networks() {
			if nw.name == name {
				return Ok(nw.clone());
			}
		}
		for n in &self.nodes {
			for nw in &n.networks {
				if nw.name == name {
					return Ok(nw.clone());
				}
			}
		}
		Err(ParseError::Serialized(format!("network {name} not found")))
	}

	/// Is an address outside all declared networks?
	pub fn is_external(&self, address: &Address) -> bool {
		!self.networks().iter().any(|nw| nw.is_local(address))
	}

	/// Networks effective for the node, following parents when unset.
	pub fn effective_networks(&self, node: NodeId) -> &[Network] {
		let mut at = node;
		loop {
			let n = self.node(at);
			if !n.networks.is_empty() {
				return &n.networks;
			}
			match n.parent {
				Some(p) => at = p,
				None => return &n.networks,
			}
		}
	}

	/// Resolve the networks an address belongs to, from the view of a node.
	pub fn networks_for(&self, node: NodeId, address: &Address) -> Vec<Network> {
		let mut at = node;
		loop {
			let n = self.node(at);
			if !n.networks.is_empty() || n.parent.is_none() {
				break;
			}
			at = n.parent.expect("checked above");
		}
		if address.ip_address().is_none() {
			return vec![self.default_network()];
		}
		let resolved = self.node(at);
		let ns: Vec<Network> = resolved
			.networks
			.iter()
			.filter(|nw| nw.is_local(address))
			.cloned()
			.collect();
		if ns.is_empty() && resolved.parent.is_none() {
			return vec![self.default_network()];
		}
		ns
	}

	/// The host a node belongs to; hosts are their own parent host.
	pub fn parent_host(&self, node: NodeId) -> NodeId {
		let mut at = node;
		loop {
			let n = self.node(at);
			if n.is_host() {
				return at;
			}
			match n.parent {
				Some(p) => at = p,
				None => return at,
			}
		}
	}

	pub fn is_original(&self, entity: EntityRef) -> bool {
		self.originals.contains(&entity)
	}

	/// Is this entity a multicast source or target?
	pub fn is_multicast(&self, node: NodeId) -> bool {
		let n = self.node(node);
		if n.addresses.iter().any(|a| a.is_multicast()) {
			return true;
		}
		match &n.kind {
			NodeKind::Service(s) => {
				s.multicast_source.is_some()
					|| n.parent.is_some_and(|p| self.is_multicast(p))
			},
			_ => false,
		}
	}

	/// A concrete host, not wildcard, multicast or a client-side entity.
	pub fn is_concrete(&self, host: NodeId) -> bool {
		let n = self.node(host);
		!matches!(n.host_type, HostType::Mobile | HostType::Browser)
			&& !n.any_host
			&& !self.is_multicast(host)
	}

	// --- entity creation ----------------------------------------------------

	fn next_node_id(&self) -> NodeId {
		NodeId(self.nodes.len() as u32)
	}

	/// Add a host under the system root. Used by the builder and by
	/// endpoint synthesis.
	pub fn add_host(&mut self, name: &str, tag: Option<EntityTag>) -> NodeId {
		let id = self.next_node_id();
		let mut addresses = IndexSet::new();
		if let Some(tag) = tag {
			addresses.insert(Address::Tag(tag));
		}
		self.nodes.push(Node {
			id,
			parent: Some(self.root()),
			name: strng::new(name),
			description: strng::EMPTY,
			status: Status::Unexpected,
			host_type: HostType::Generic,
			external_activity: ExternalActivity::Banned,
			match_priority: 0,
			addresses,
			any_host: false,
			networks: Vec::new(),
			children: Vec::new(),
			components: Vec::new(),
			properties: PropertyMap::new(),
			kind: NodeKind::Host(HostData::default()),
		});
		self.nodes[0].children.push(id);
		id
	}

	/// Base name for a service, `NAME:port` when the port is known.
	pub fn make_service_name(service_name: &str, port: Option<u16>) -> String {
		match (service_name.is_empty(), port) {
			(true, Some(p)) => format!("{p}"),
			(true, None) => "???".to_string(),
			(false, Some(p)) => format!("{service_name}:{p}"),
			(false, None) => service_name.to_string(),
		}
	}

	/// Create a child service for the endpoint address. The service address
	/// is stored with a wildcard host; wildcards resolve per network.
	pub fn create_service(&mut self, parent: NodeId, address: &EndpointAddress) -> NodeId {
		let mut s_name =
			IoTSystem::make_service_name(&address.protocol.as_str().to_uppercase(), address.port);
		let mut networks: Vec<Network> = Vec::new();
		if let Some(ip) = address.host.ip_address() {
			networks = self.networks_for(parent, &Address::Ip(ip));
			if networks.len() == 1 && networks[0] == self.default_network() {
				networks.clear();
			}
			if networks.len() == 1 {
				s_name = format!("{s_name}@{}", networks[0].name);
			}
		}
		let p = self.node(parent);
		let status = if p.status == Status::External {
			// only external propagates, otherwise unexpected
			Status::External
		} else {
			Status::Unexpected
		};
		let external_activity = p.external_activity;
		let host_type = p.host_type;
		let id = self.next_node_id();
		let mut addresses = IndexSet::new();
		addresses.insert(Address::Endpoint(address.change_host(Address::any())));
		self.nodes.push(Node {
			id,
			parent: Some(parent),
			name: strng::new(&s_name),
			description: strng::EMPTY,
			status,
			host_type,
			external_activity,
			match_priority: 0,
			addresses,
			any_host: false,
			networks,
			children: Vec::new(),
			components: Vec::new(),
			properties: PropertyMap::new(),
			kind: NodeKind::Service(ServiceData {
				protocol: Some(address.protocol),
				..ServiceData::default()
			}),
		});
		self.node_mut(parent).children.push(id);
		id
	}

	/// Attach a component to a node.
	pub fn add_component(&mut self, entity: NodeId, name: &str, kind: ComponentKind) -> ComponentId {
		let id = ComponentId(self.components.len() as u32);
		self.components.push(Component::new(id, entity, name, kind));
		self.node_mut(entity).components.push(id);
		id
	}

	pub fn add_sub_component(
		&mut self,
		parent: ComponentId,
		name: &str,
		kind: ComponentKind,
	) -> ComponentId {
		let entity = self.component(parent).entity;
		let id = ComponentId(self.components.len() as u32);
		self.components.push(Component::new(id, entity, name, kind));
		self.component_mut(parent).sub_components.push(id);
		id
	}

	// --- endpoint lookup ----------------------------------------------------

	/// Find an existing endpoint, service or host, by address.
	pub fn find_endpoint(&self, address: &Address, at_network: Option<&Network>) -> Option<NodeId> {
		let h_add = address.host();
		let default = self.default_network();
		let network = at_network.unwrap_or(&default);
		for c in &self.nodes[0].children {
			let child = self.node(*c);
			if !child.networks.is_empty() && !child.networks.contains(network) {
				continue;
			}
			if child.addresses.contains(h_add) {
				if matches!(address, Address::Endpoint(_)) {
					return Some(self.find_child_endpoint(*c, address).unwrap_or(*c));
				}
				return Some(*c);
			}
		}
		None
	}

	/// Find a child of the node matching the (endpoint) address, honoring
	/// wildcard addresses and their networks.
	pub fn find_child_endpoint(&self, node: NodeId, address: &Address) -> Option<NodeId> {
		for c in &self.node(node).children {
			let child = self.node(*c);
			if child.addresses.contains(address) {
				return Some(*c);
			}
			for a in &child.addresses {
				if !a.is_wildcard() {
					continue;
				}
				if !child.networks.is_empty()
					&& !child.networks.iter().all(|n| n.is_local(address))
				{
					continue;
				}
				if &a.change_host(address.host()) == address {
					return Some(*c);
				}
			}
		}
		None
	}

	/// Get or create the endpoint for the address. New hosts are unexpected
	/// with unlimited external activity; remote for external addresses,
	/// administrative for multicast.
	pub fn get_endpoint(&mut self, address: &Address, at_network: Option<&Network>) -> NodeId {
		if let Some(found) = self.find_endpoint(address, at_network) {
			if let Address::Endpoint(ep) = address {
				let found_node = self.node(found);
				if found_node.is_host() {
					if let Some(s) = self.find_child_endpoint(found, address) {
						return s;
					}
					return self.create_service(found, ep);
				}
			}
			return found;
		}
		let h_add = address.host().clone();
		debug!(address = %h_add, "creating unexpected host");
		let id = self.add_host(&h_add.to_string(), None);
		{
			let host = self.node_mut(id);
			host.host_type = if h_add.is_multicast() {
				HostType::Administrative
			} else if h_add.is_global() {
				HostType::Remote
			} else {
				HostType::Generic
			};
			host.description = strng::literal!("Unexpected host");
			host.addresses.insert(h_add.clone());
			// we know nothing about its behavior
			host.external_activity = ExternalActivity::Unlimited;
		}
		let external = self.is_external(&h_add);
		if external && !h_add.is_multicast() {
			self.node_mut(id).host_type = HostType::Remote;
		}
		if let Address::Endpoint(ep) = address {
			return self.create_service(id, ep);
		}
		id
	}

	// --- connections --------------------------------------------------------

	/// Create a connection; declared connections are registered in both
	/// hosts, observed ones only in the source until a reply is seen.
	pub fn new_connection(
		&mut self,
		source: (NodeId, &Address),
		target: (NodeId, &Address),
		declared: bool,
	) -> ConnectionId {
		let id = ConnectionId(self.connections.len() as u32);
		let con_type = self
			.node(target.0)
			.service_data()
			.map(|s| s.con_type)
			.unwrap_or_default();
		self.connections.push(Connection {
			id,
			source: source.0,
			target: target.0,
			status: if declared {
				Status::Expected
			} else {
				Status::Unexpected
			},
			con_type,
			properties: PropertyMap::new(),
		});
		let source_host = self.parent_host(source.0);
		if let Some(h) = self.node_mut(source_host).host_data_mut() {
			h.connections.push(id);
		}
		if declared {
			let target_host = self.parent_host(target.0);
			if let Some(h) = self.node_mut(target_host).host_data_mut() {
				h.connections.push(id);
			}
		} else {
			self.observed_connections
				.insert((source.1.clone(), target.1.clone()), id);
		}
		id
	}

	/// Register the connection at the target host, done when a reply has
	/// been observed.
	pub fn connect_target_host(&mut self, connection: ConnectionId) {
		let target = self.connection(connection).target;
		let target_host = self.parent_host(target);
		if let Some(h) = self.node_mut(target_host).host_data_mut() {
			if !h.connections.contains(&connection) {
				h.connections.push(connection);
			}
		}
	}

	pub fn find_connection(&self, source_host: NodeId, target: NodeId) -> Option<ConnectionId> {
		let h = self.node(source_host).host_data()?;
		h.connections
			.iter()
			.copied()
			.find(|c| self.connection(*c).target == target)
	}

	/// Is the connection relevant for analysis?
	pub fn connection_is_relevant(&self, id: ConnectionId, ignore_ends: bool) -> bool {
		let c = self.connection(id);
		match c.status {
			Status::Placeholder => false,
			Status::Expected | Status::Unexpected => true,
			_ => {
				if self.expected_verdict(EntityRef::Connection(id)) == Some(Verdict::Fail) {
					return true; // the dirt must be seen
				}
				if ignore_ends {
					return false;
				}
				self.node(c.source).is_relevant() || self.node(c.target).is_relevant()
			},
		}
	}

	/// Relevant connections of the system, in observation/declaration order
	/// and with duplicates removed.
	pub fn get_connections(&self) -> Vec<ConnectionId> {
		let mut seen = IndexSet::new();
		for host in self.hosts() {
			if let Some(h) = self.node(host).host_data() {
				for c in &h.connections {
					if self.connection_is_relevant(*c, true) {
						seen.insert(*c);
					}
				}
			}
		}
		seen.into_iter().collect()
	}

	pub fn all_connections(&self) -> impl Iterator<Item = &Connection> {
		self.connections.iter()
	}

	pub fn observed_connection(&self, ends: &(Address, Address)) -> Option<ConnectionId> {
		self.observed_connections.get(ends).copied()
	}

	// --- status, properties, verdicts --------------------------------------

	pub fn status(&self, entity: EntityRef) -> Status {
		match entity {
			EntityRef::Node(n) => self.node(n).status,
			EntityRef::Connection(c) => self.connection(c).status,
			EntityRef::Component(c) => self.component(c).status,
		}
	}

	pub fn set_status(&mut self, entity: EntityRef, status: Status) {
		match entity {
			EntityRef::Node(n) => self.node_mut(n).status = status,
			EntityRef::Connection(c) => self.connection_mut(c).status = status,
			EntityRef::Component(c) => self.component_mut(c).status = status,
		}
	}

	pub fn properties(&self, entity: EntityRef) -> &PropertyMap {
		match entity {
			EntityRef::Node(n) => &self.node(n).properties,
			EntityRef::Connection(c) => &self.connection(c).properties,
			EntityRef::Component(c) => &self.component(c).properties,
		}
	}

	pub fn properties_mut(&mut self, entity: EntityRef) -> &mut PropertyMap {
		match entity {
			EntityRef::Node(n) => &mut self.node_mut(n).properties,
			EntityRef::Connection(c) => &mut self.connection_mut(c).properties,
			EntityRef::Component(c) => &mut self.component_mut(c).properties,
		}
	}

	/// Set a property and queue the change record.
	pub fn update_property(&mut self, entity: EntityRef, key: PropertyKey, value: PropertyValue) {
		key.update(self.properties_mut(entity), value.clone());
		self.push_change(ModelChange::PropertyChange { entity, key, value });
	}

	/// The `check:expected` verdict, inconclusive when not yet set.
	pub fn expected_verdict(&self, entity: EntityRef) -> Option<Verdict> {
		properties::EXPECTED
			.get_verdict(self.properties(entity))
			.or(Some(Verdict::Incon))
	}

	/// The `check:expected` verdict with no default.
	pub fn expected_verdict_set(&self, entity: EntityRef) -> Option<Verdict> {
		properties::EXPECTED.get_verdict(self.properties(entity))
	}

	/// Mark the entity as seen now: expected entities pass, unexpected
	/// fail, others are unaffected. Addressable changes propagate to the
	/// parent chain. Changed entities are appended to `changed`.
	pub fn set_seen_now(&mut self, entity: EntityRef, changed: &mut Vec<EntityRef>) -> bool {
		let status = self.status(entity);
		let v = properties::EXPECTED.get_verdict(self.properties(entity));
		let new_v = match status {
			Status::Expected => {
				if v == Some(Verdict::Pass) {
					return false; // already ok
				}
				Verdict::Pass
			},
			Status::Unexpected => {
				if v == Some(Verdict::Fail) {
					return false; // already not ok
				}
				Verdict::Fail
			},
			_ => return false, // does not matter if seen or not
		};
		properties::EXPECTED.put_verdict(self.properties_mut(entity), new_v);
		changed.push(entity);
		if let EntityRef::Node(n) = entity {
			if let Some(parent) = self.node(n).parent {
				if self.node(parent).parent.is_some() {
					// parent is not the system root, it is also seen now
					self.set_seen_now(EntityRef::Node(parent), changed);
				}
			}
		}
		true
	}

	/// Direct children for verdict aggregation.
	pub fn entity_children(&self, entity: EntityRef) -> Vec<EntityRef> {
		match entity {
			EntityRef::Node(n) => {
				let node = self.node(n);
				let mut r: Vec<EntityRef> =
					node.children.iter().map(|c| EntityRef::Node(*c)).collect();
				r.extend(node.components.iter().map(|c| EntityRef::Component(*c)));
				if node.parent.is_none() {
					r.extend(self.get_connections().iter().map(|c| EntityRef::Connection(*c)));
				}
				r
			},
			EntityRef::Connection(_) => Vec::new(),
			EntityRef::Component(c) => self
				.component(c)
				.sub_components
				.iter()
				.map(|s| EntityRef::Component(*s))
				.collect(),
		}
	}

	/// Aggregate verdict over children and verdict-bearing properties; a
	/// failing `check:expected` vetoes an otherwise passing entity.
	pub fn get_verdict(
		&self,
		entity: EntityRef,
		cache: &mut HashMap<EntityRef, Verdict>,
	) -> Verdict {
		if let Some(v) = cache.get(&entity) {
			return *v;
		}
		let mut v: Option<Verdict> = None;
		for c in self.entity_children(entity) {
			v = Verdict::aggregate(v, Some(self.get_verdict(c, cache)));
		}
		for value in self.properties(entity).values() {
			if let PropertyValue::Verdict(pv) = value {
				v = Verdict::aggregate(v, Some(pv.verdict));
			}
		}
		// hosts also aggregate their relevant connections
		if let EntityRef::Node(n) = entity {
			if let Some(h) = self.node(n).host_data() {
				for c in h.connections.clone() {
					if self.connection_is_relevant(c, false) {
						v = Verdict::aggregate(v, Some(self.get_verdict(EntityRef::Connection(c), cache)));
					}
				}
			}
		}
		if v == Some(Verdict::Pass) {
			v = self.expected_verdict(entity); // expected has veto
		}
		let v = v.unwrap_or(Verdict::Incon);
		cache.insert(entity, v);
		v
	}

	pub fn status_verdict(&self, entity: EntityRef) -> (Status, Option<Verdict>) {
		(self.status(entity), self.expected_verdict(entity))
	}

	// --- naming -------------------------------------------------------------

	pub fn long_name(&self, entity: EntityRef) -> String {
		match entity {
			EntityRef::Node(n) => {
				let node = self.node(n);
				match node.parent {
					Some(p) if node.is_service() && self.node(p).name != node.name => {
						format!("{} {}", self.node(p).name, node.name)
					},
					_ => node.name.to_string(),
				}
			},
			EntityRef::Connection(c) => {
				let conn = self.connection(c);
				format!(
					"{} => {}",
					self.long_name(EntityRef::Node(conn.source)),
					self.long_name(EntityRef::Node(conn.target))
				)
			},
			EntityRef::Component(c) => self.component(c).name.to_string(),
		}
	}

	/// Free name for a new system child, renaming an existing clashing
	/// child to `base 1` and counting up as needed.
	pub fn free_child_name(&mut self, name_base: &str) -> String {
		let mut names: HashMap<String, NodeId> = self.nodes[0]
			.children
			.iter()
			.map(|c| (self.node(*c).name.to_string(), *c))
			.collect();
		let mut c = 1;
		let mut n = format!("{name_base} {c}");
		if let Some(old) = names.get(name_base).copied() {
			// reusing the base, add numbers to all of them
			self.node_mut(old).name = strng::new(&n);
			names.insert(n.clone(), old);
		} else if !names.contains_key(&n) {
			return name_base.to_string();
		}
		while names.contains_key(&n) {
			c += 1;
			n = format!("{name_base} {c}");
		}
		n
	}

	/// Learn a name or tag with an optional address; returns the named host
	/// and whether anything changed.
	pub fn learn_named_address(
		&mut self,
		name: &Address,
		address: Option<&Address>,
	) -> (Option<NodeId>, bool) {
		debug_assert!(matches!(name, Address::Name(_) | Address::Tag(_)));
		let mut address = address.cloned();
		if let Address::Name(n) = name {
			if n.name().ends_with(".arpa") {
				// reverse DNS from IP address to name
				match n.decode_reverse() {
					Some(ip) => {
						let endpoint = self.get_endpoint(&Address::Ip(ip), None);
						return (Some(endpoint), false); // no name attached
					},
					None => address = None, // e.g. _dns.resolver.arpa, stays a name
				}
			}
		}

		// find the relevant hosts
		let mut named: Option<NodeId> = None;
		let mut add: Option<NodeId> = None;
		for h in self.hosts() {
			let node = self.node(h);
			if node.addresses.contains(name) {
				named = Some(h);
			} else if let Some(a) = &address {
				if node.addresses.contains(a) {
					assert!(add.is_none(), "multiple hosts with address {a}");
					add = Some(h);
				}
			}
		}

		if let Some(named) = named {
			if address.is_none() {
				return (Some(named), false); // we know the host by name
			}
		}

		if named.is_none() {
			if let Some(add) = add {
				// just use the addressed host
				self.node_mut(add).addresses.insert(name.clone());
				// named after its address so far? rename to match the name
				let pri =
					Address::get_prioritized(&self.node(add).addresses, true, true, false);
				if self.node(add).name.as_str() == pri.to_string() {
					let nn = name.to_string();
					if nn != self.node(add).name.as_str() {
						let free = self.free_child_name(&nn);
						self.node_mut(add).name = strng::new(&free);
					}
				}
				return (Some(add), true);
			}
		}

		let named = match named {
			Some(n) => n,
			None => {
				if matches!(name, Address::Tag(_)) {
					return (None, false); // do not create hosts for unknown tags
				}
				self.get_endpoint(name, None)
			},
		};

		let Some(add) = add else {
			// just use the named host
			if let Some(a) = &address {
				if self.node(named).addresses.contains(a) {
					return (Some(named), false); // known address
				}
				self.node_mut(named).addresses.insert(a.clone());
			}
			return (Some(named), true); // new address
		};

		if self.node(named).addresses.len() == 1 {
			// named host has no other addresses, remove it and use the other
			self.nodes[0].children.retain(|c| *c != named);
			self.node_mut(add).addresses.insert(name.clone());
			return (Some(add), true);
		}

		// IP address churn between hosts, the latest observation wins
		if let Some(a) = &address {
			self.node_mut(add).addresses.shift_remove(a);
			self.node_mut(named).addresses.insert(a.clone());
		}
		(Some(named), true)
	}

	/// Learn an IP address of a host, detaching it from any other host.
	pub fn learn_ip_address(&mut self, host: NodeId, ip_address: Address) {
		let pri = Address::get_prioritized(&self.node(host).addresses, true, true, true);
		self.node_mut(host).addresses.insert(ip_address.clone());
		if self.node(host).name.as_str() == pri.to_string() {
			// host named after address, update
			let nn =
				Address::get_prioritized(&self.node(host).addresses, true, true, true).to_string();
			if nn != self.node(host).name.as_str() {
				let free = self.free_child_name(&nn);
				self.node_mut(host).name = strng::new(&free);
			}
		}
		self.push_change(ModelChange::AddressChange(host));

		for h in self.hosts() {
			if h != host && self.node(h).addresses.contains(&ip_address) {
				self.node_mut(h).addresses.shift_remove(&ip_address);
				self.push_change(ModelChange::AddressChange(h));
			}
		}
	}

	// --- addresses ----------------------------------------------------------

	/// All addresses of a node and its children, with wildcard endpoints
	/// expanded over the parent addresses.
	pub fn node_addresses(&self, node: NodeId, into: &mut IndexSet<Address>) {
		let n = self.node(node);
		for a in &n.addresses {
			if a.is_wildcard() {
				if let Some(p) = n.parent {
					for pa in &self.node(p).addresses {
						into.insert(a.change_host(pa.host()));
					}
					continue;
				}
			}
			into.insert(a.clone());
		}
		for c in &n.children {
			self.node_addresses(*c, into);
		}
	}

	pub fn get_addresses(&self) -> IndexSet<Address> {
		let mut ads = IndexSet::new();
		for c in self.nodes[0].children.clone() {
			self.node_addresses(c, &mut ads);
		}
		ads
	}

	/// System address uniquely locating the entity for serialization.
	pub fn system_address(&self, entity: EntityRef) -> SystemAddress {
		match entity {
			EntityRef::Node(n) => {
				let node = self.node(n);
				match &node.kind {
					NodeKind::System => SystemAddress::default(),
					NodeKind::Host(_) => {
						if let Some(tag) = node.get_tag() {
							return SystemAddress::new([Address::Tag(tag.clone())]);
						}
						SystemAddress::new([Address::get_prioritized(
							&node.addresses,
							true,
							true,
							true,
						)])
					},
					NodeKind::Service(_) => {
						let parent = node.parent.expect("service has a parent");
						let first = node
							.addresses
							.first()
							.cloned()
							.unwrap_or(Address::NULL_IP);
						SystemAddress::service(&self.system_address(EntityRef::Node(parent)), first)
					},
				}
			},
			EntityRef::Connection(c) => {
				let conn = self.connection(c);
				SystemAddress::connection(
					&self.system_address(EntityRef::Node(conn.source)),
					&self.system_address(EntityRef::Node(conn.target)),
				)
			},
			EntityRef::Component(c) => {
				let comp = self.component(c);
				SystemAddress::component(
					&self.system_address(EntityRef::Node(comp.entity)),
					&comp.tag,
					comp.kind.segment_type(),
				)
			},
		}
	}

	/// Find an entity by its system address.
	pub fn find_entity(&self, address: &SystemAddress) -> Option<EntityRef> {
		let Some(first) = address.segments.first() else {
			return Some(EntityRef::Node(self.root()));
		};
		if first.segment_type.as_deref() == Some("source") {
			let source = self.find_endpoint(&first.address, None)?;
			let target_seq = address.tail();
			let target_node = self.find_endpoint(&target_seq.segments.first()?.address, None)?;
			// the target may be a service below the resolved node
			let target = match self.find_entity_at(target_node, &target_seq.tail())? {
				EntityRef::Node(n) => n,
				_ => return None,
			};
			let source_host = self.parent_host(source);
			let h = self.node(source_host).host_data()?;
			return h
				.connections
				.iter()
				.copied()
				.find(|c| self.connection(*c).target == target)
				.map(EntityRef::Connection);
		}
		let node = self.find_endpoint(&first.address, None)?;
		self.find_entity_at(node, &address.tail())
	}

	fn find_entity_at(&self, node: NodeId, address: &SystemAddress) -> Option<EntityRef> {
		let Some(segment) = address.segments.first() else {
			return Some(EntityRef::Node(node));
		};
		match segment.segment_type.as_deref() {
			Some(t) => {
				let Address::Tag(tag) = &segment.address else {
					return None;
				};
				for c in &self.node(node).components {
					let comp = self.component(*c);
					if comp.kind.segment_type() == t && &comp.tag == tag {
						if address.segments.len() == 1 {
							return Some(EntityRef::Component(*c));
						}
						return None;
					}
				}
				None
			},
			None => {
				let child = self.find_child_endpoint(node, &segment.address)?;
				self.find_entity_at(child, &address.tail())
			},
		}
	}

	/// Parse a URL into the service it addresses and the remaining path.
	pub fn parse_url(&mut self, url: &str) -> Result<(NodeId, String), ParseError> {
		let u = url::Url::parse(url).map_err(|e| ParseError::Serialized(e.to_string()))?;
		let proto = if u.scheme() == "https" {
			Protocol::Tls
		} else {
			Protocol::get(u.scheme())
				.ok_or_else(|| ParseError::Protocol(u.scheme().to_string()))?
		};
		let port = u
			.port()
			.unwrap_or(if proto == Protocol::Http { 80 } else { 443 });
		let hostname = u
			.host_str()
			.ok_or_else(|| ParseError::Serialized(format!("{url} has no host")))?;
		let host = DnsName::name_or_ip(hostname)?;
		let sadd = Address::Endpoint(EndpointAddress::new(host, Protocol::Tcp, Some(port)));
		let se = self.get_endpoint(&sadd, None);
		let path = u.path().trim_matches('/').to_string();
		Ok((se, path))
	}

	// --- iteration ----------------------------------------------------------

	/// All entities of the system, placeholders excluded.
	pub fn iterate_all(&self) -> Vec<EntityRef> {
		let mut r = vec![EntityRef::Node(self.root())];
		for c in &self.nodes[0].children {
			self.iterate_node(*c, &mut r);
		}
		for comp in &self.nodes[0].components {
			if self.component(*comp).status != Status::Placeholder {
				r.push(EntityRef::Component(*comp));
			}
		}
		for c in self.get_connections() {
			if self.connection(c).status != Status::Placeholder {
				r.push(EntityRef::Connection(c));
			}
		}
		r
	}

	fn iterate_node(&self, node: NodeId, into: &mut Vec<EntityRef>) {
		if self.node(node).status == Status::Placeholder {
			return;
		}
		into.push(EntityRef::Node(node));
		for c in &self.node(node).children {
			self.iterate_node(*c, into);
		}
		for comp in &self.node(node).components {
			if self.component(*comp).status != Status::Placeholder {
				into.push(EntityRef::Component(*comp));
			}
		}
	}

	// --- reset --------------------------------------------------------------

	/// Return the model to its declared state while keeping all entity
	/// identities. Entities not in the original statement become
	/// placeholders; learned addresses remain so entities are reused.
	pub fn reset(&mut self) {
		for i in 0..self.nodes.len() {
			let id = NodeId(i as u32);
			reset_properties(&mut self.nodes[i].properties);
			if i > 0 && !self.originals.contains(&EntityRef::Node(id)) {
				self.nodes[i].status = Status::Placeholder;
			}
		}
		for i in 0..self.components.len() {
			let id = ComponentId(i as u32);
			reset_properties(&mut self.components[i].properties);
			if !self.originals.contains(&EntityRef::Component(id)) {
				self.components[i].status = Status::Placeholder;
			}
		}
		for i in 0..self.connections.len() {
			let id = ConnectionId(i as u32);
			reset_properties(&mut self.connections[i].properties);
			if !self.originals.contains(&EntityRef::Connection(id)) {
				self.connections[i].status = Status::Placeholder;
			}
		}
		self.observed_connections.clear();
		self.changes.clear();
	}

	// --- change queue -------------------------------------------------------

	pub fn push_change(&mut self, change: ModelChange) {
		self.changes.push(change);
	}

	/// Watermark for reading changes made after this point.
	pub fn change_mark(&self) -> usize {
		self.changes.len()
	}

	pub fn changes_since(&self, mark: usize) -> &[ModelChange] {
		self.changes.get(mark..).unwrap_or_default()
	}

	/// Drain all queued change records.
	pub fn take_changes(&mut self) -> Vec<ModelChange> {
		std::mem::take(&mut self.changes)
	}
}

fn reset_properties(properties: &mut PropertyMap) {
	let mut kept = PropertyMap::new();
	for (k, v) in properties.iter() {
		if let Some(nv) = k.reset(v) {
			kept.insert(k.clone(), nv);
		}
	}
	*properties = kept;
}

impl std::fmt::Display for IoTSystem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		writeln!(f, "{}", self.name())?;
		for h in self.hosts() {
			let node = self.node(h);
			let mut addresses: Vec<String> =
				node.addresses.iter().map(|a| a.to_string()).collect();
			addresses.sort();
			writeln!(f, "{} {} {:?}", node.status, node.name, addresses)?;
		}
		for c in &self.connections {
			writeln!(
				f,
				"{} {}",
				c.status,
				self.long_name(EntityRef::Connection(c.id))
			)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn system_with_host(addr: &str) -> (IoTSystem, NodeId) {
		let mut system = IoTSystem::new("Test system");
		let host = system.add_host("Device", Some(EntityTag::new("Device")));
		system.node_mut(host).status = Status::Expected;
		system
			.node_mut(host)
			.addresses
			.insert(Address::parse(addr).unwrap());
		system.originals.insert(EntityRef::Node(host));
		(system, host)
	}

	#[test]
	fn endpoint_creation_and_lookup() {
		let (mut system, host) = system_with_host("192.168.0.2");
		let addr = Address::parse_endpoint("192.168.0.2/udp:1234").unwrap();
		let service = system.get_endpoint(&addr, None);
		assert_ne!(service, host);
		assert_eq!(system.parent_host(service), host);
		assert_eq!(system.node(service).name.as_str(), "UDP:1234");
		// second resolve finds the same service
		assert_eq!(system.get_endpoint(&addr, None), service);
	}

	#[test]
	fn unknown_address_creates_unexpected_host() {
		let (mut system, host) = system_with_host("192.168.0.2");
		let addr = Address::parse("1.0.0.3").unwrap();
		let new_host = system.get_endpoint(&addr, None);
		assert_ne!(new_host, host);
		let n = system.node(new_host);
		assert_eq!(n.status, Status::Unexpected);
		assert_eq!(n.host_type, HostType::Remote);
		assert_eq!(n.external_activity, ExternalActivity::Unlimited);
		assert_eq!(n.name.as_str(), "1.0.0.3");

		let mc = system.get_endpoint(&Address::BROADCAST_IP, None);
		assert_eq!(system.node(mc).host_type, HostType::Administrative);
	}

	#[test]
	fn seen_now_propagates_to_parent() {
		let (mut system, host) = system_with_host("192.168.0.2");
		let addr = Address::parse_endpoint("192.168.0.2/udp:1234").unwrap();
		let service = system.get_endpoint(&addr, None);
		system.node_mut(service).status = Status::Expected;
		let mut changed = Vec::new();
		assert!(system.set_seen_now(EntityRef::Node(service), &mut changed));
		assert_eq!(changed.len(), 2);
		assert_eq!(
			system.expected_verdict(EntityRef::Node(host)),
			Some(Verdict::Pass)
		);
		// idempotent
		let mut changed = Vec::new();
		assert!(!system.set_seen_now(EntityRef::Node(service), &mut changed));
		assert!(changed.is_empty());
	}

	#[test]
	fn verdict_aggregation_with_veto() {
		let (mut system, host) = system_with_host("192.168.0.2");
		let mut cache = HashMap::new();
		assert_eq!(
			system.get_verdict(EntityRef::Node(host), &mut cache),
			Verdict::Incon
		);
		let mut changed = Vec::new();
		system.set_seen_now(EntityRef::Node(host), &mut changed);
		let mut cache = HashMap::new();
		assert_eq!(
			system.get_verdict(EntityRef::Node(host), &mut cache),
			Verdict::Pass
		);
		// a failing property fails the host
		properties::MITM.put_verdict(system.properties_mut(EntityRef::Node(host)), Verdict::Fail);
		let mut cache = HashMap::new();
		assert_eq!(
			system.get_verdict(EntityRef::Node(host), &mut cache),
			Verdict::Fail
		);
	}

	#[test]
	fn memoized_verdict_is_stable() {
		let (system, host) = system_with_host("192.168.0.2");
		let mut cache = HashMap::new();
		let v1 = system.get_verdict(EntityRef::Node(host), &mut cache);
		let v2 = system.get_verdict(EntityRef::Node(host), &mut cache);
		let mut fresh = HashMap::new();
		let v3 = system.get_verdict(EntityRef::Node(host), &mut fresh);
		assert_eq!(v1, v2);
		assert_eq!(v1, v3);
	}

	#[test]
	fn learn_name_for_addressed_host() {
		let mut system = IoTSystem::new("Test system");
		let host = system.add_host("1.0.0.2", None);
		system
			.node_mut(host)
			.addresses
			.insert(Address::parse("1.0.0.2").unwrap());

		let name = Address::parse("target.org|name").unwrap();
		let (h, changed) =
			system.learn_named_address(&name, Some(&Address::parse("1.0.0.2").unwrap()));
		assert_eq!(h, Some(host));
		assert!(changed);
		assert_eq!(system.node(host).name.as_str(), "target.org");
		assert!(system.node(host).addresses.contains(&name));
		assert!(system
			.node(host)
			.addresses
			.contains(&Address::parse("1.0.0.2").unwrap()));
		// no new host was created
		assert_eq!(system.hosts().len(), 1);

		// repeat learns nothing
		let (h2, changed) =
			system.learn_named_address(&name, Some(&Address::parse("1.0.0.2").unwrap()));
		assert_eq!(h2, Some(host));
		assert!(!changed);
	}

	#[test]
	fn learn_name_reverse_dns() {
		let mut system = IoTSystem::new("Test system");
		let name = Address::parse("4.3.2.1.in-addr.arpa|name").unwrap();
		let (h, changed) = system.learn_named_address(&name, None);
		let h = h.unwrap();
		assert!(!changed);
		// host is for the IP, the reverse name is not attached
		assert!(system
			.node(h)
			.addresses
			.contains(&Address::parse("4.3.2.1").unwrap()));
		assert!(!system.node(h).addresses.contains(&name));
	}

	#[test]
	fn learn_name_no_hosts_for_tags() {
		let mut system = IoTSystem::new("Test system");
		let tag = Address::parse("NoSuch").unwrap();
		let (h, changed) = system.learn_named_address(&tag, None);
		assert_eq!(h, None);
		assert!(!changed);
		assert!(system.hosts().is_empty());
	}

	#[test]
	fn learn_name_ip_churn() {
		let mut system = IoTSystem::new("Test system");
		let named = system.add_host("server.example.com", None);
		system
			.node_mut(named)
			.addresses
			.insert(Address::parse("server.example.com|name").unwrap());
		system
			.node_mut(named)
			.addresses
			.insert(Address::parse("10.0.0.1").unwrap());
		let other = system.add_host("10.0.0.2", None);
		system
			.node_mut(other)
			.addresses
			.insert(Address::parse("10.0.0.2").unwrap());

		// the name moves to the address of the other host
		let (h, changed) = system.learn_named_address(
			&Address::parse("server.example.com|name").unwrap(),
			Some(&Address::parse("10.0.0.2").unwrap()),
		);
		assert_eq!(h, Some(named));
		assert!(changed);
		assert!(!system
			.node(other)
			.addresses
			.contains(&Address::parse("10.0.0.2").unwrap()));
		assert!(system
			.node(named)
			.addresses
			.contains(&Address::parse("10.0.0.2").unwrap()));
	}

	#[test]
	fn learn_ip_address_detaches_from_others() {
		let mut system = IoTSystem::new("Test system");
		let a = system.add_host("A", Some(EntityTag::new("A")));
		let b = system.add_host("B", Some(EntityTag::new("B")));
		let ip = Address::parse("192.168.0.10").unwrap();
		system.node_mut(b).addresses.insert(ip.clone());

		system.learn_ip_address(a, ip.clone());
		assert!(system.node(a).addresses.contains(&ip));
		assert!(!system.node(b).addresses.contains(&ip));
	}

	#[test]
	fn free_child_name_renames_clashes() {
		let mut system = IoTSystem::new("Test system");
		let first = system.add_host("Device", None);
		let n = system.free_child_name("Device");
		assert_eq!(n, "Device 2");
		assert_eq!(system.node(first).name.as_str(), "Device 1");
		assert_eq!(system.free_child_name("Other"), "Other");
	}

	#[test]
	fn reset_keeps_originals() {
		let (mut system, host) = system_with_host("192.168.0.2");
		let stray = system.get_endpoint(&Address::parse("1.0.0.3").unwrap(), None);
		let mut changed = Vec::new();
		system.set_seen_now(EntityRef::Node(host), &mut changed);

		system.reset();
		assert_eq!(system.node(host).status, Status::Expected);
		assert_eq!(system.node(stray).status, Status::Placeholder);
		assert!(system.properties(EntityRef::Node(host)).is_empty());
		// placeholders are excluded from iteration
		let all = system.iterate_all();
		assert!(!all.contains(&EntityRef::Node(stray)));
		assert!(all.contains(&EntityRef::Node(host)));
	}

	#[test]
	fn system_addresses() {
		let (mut system, host) = system_with_host("192.168.0.2");
		let service =
			system.get_endpoint(&Address::parse_endpoint("192.168.0.2/udp:1234").unwrap(), None);
		assert_eq!(
			system.system_address(EntityRef::Node(host)).to_string(),
			"Device"
		);
		assert_eq!(
			system.system_address(EntityRef::Node(service)).to_string(),
			"Device&udp:1234"
		);
		let found = system.find_entity(&SystemAddress::parse("Device&udp:1234").unwrap());
		assert_eq!(found, Some(EntityRef::Node(service)));
		let found = system.find_entity(&SystemAddress::parse("Device").unwrap());
		assert_eq!(found, Some(EntityRef::Node(host)));
	}

	#[test]
	fn connection_system_address_resolution() {
		let (mut system, host) = system_with_host("192.168.0.2");
		let other = system.add_host("Backend", Some(EntityTag::new("Backend")));
		system.node_mut(other).status = Status::Expected;
		let sa = Address::Tag(EntityTag::new("Device"));
		let ta = Address::Tag(EntityTag::new("Backend"));
		let conn = system.new_connection((host, &sa), (other, &ta), true);
		let found =
			system.find_entity(&SystemAddress::parse("source=Device&target=Backend").unwrap());
		assert_eq!(found, Some(EntityRef::Connection(conn)));
	}

	#[test]
	fn connection_to_service_resolves_by_system_address() {
		let (mut system, host) = system_with_host("192.168.0.2");
		let backend = system.add_host("Backend", Some(EntityTag::new("Backend")));
		system.node_mut(backend).status = Status::Expected;
		let service = system.create_service(
			backend,
			&EndpointAddress::new(Address::any(), Protocol::Tcp, Some(443)),
		);
		system.node_mut(service).status = Status::Expected;
		let sa = Address::Tag(EntityTag::new("Device"));
		let ta = Address::Tag(EntityTag::new("Backend"));
		let conn = system.new_connection((host, &sa), (service, &ta), true);

		let addr = system.system_address(EntityRef::Connection(conn));
		assert_eq!(addr.to_string(), "source=Device&target=Backend&tcp:443");
		let found = system.find_entity(&SystemAddress::parse(&addr.to_string()).unwrap());
		assert_eq!(found, Some(EntityRef::Connection(conn)));
	}

	#[test]
	fn parse_url_to_service() {
		let mut system = IoTSystem::new("Test system");
		let (service, path) = system.parse_url("https://api.example.com/v1/data/").unwrap();
		assert_eq!(path, "v1/data");
		let node = system.node(service);
		assert!(node.is_service());
		assert_eq!(node.get_port(), Some(443));
	}
}
