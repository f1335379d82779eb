//! Clue indices and weighted flow deduction.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};

use crate::events::Flow;
use crate::model::{ConnectionId, IoTSystem, NodeId};
use crate::ranges::MulticastTarget;
use crate::types::{Address, AddressAtNetwork, Network, Protocol, Status};

/// Identifier of an address clue within one engine.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub struct ClueId(u32);

/// Endpoint key: protocol and optional port.
pub type EndpointKey = (Protocol, Option<u16>);

/// Everything the matcher knows about one addressable entity.
#[derive(Debug)]
pub struct AddressClue {
	pub entity: NodeId,
	/// Services of a host by protocol and port.
	services: HashMap<EndpointKey, ClueId>,
	/// Effective addresses.
	addresses: IndexSet<AddressAtNetwork>,
	/// Addresses added or removed as observations accumulate.
	soft_addresses: HashSet<AddressAtNetwork>,
	/// Endpoint keys, only for services.
	endpoints: HashSet<EndpointKey>,
	source_for: Vec<ConnectionId>,
	target_for: Vec<ConnectionId>,
	/// Per network, the multicast target this service listens on.
	multicast_source: HashMap<Network, MulticastTarget>,
}

impl AddressClue {
	fn new(entity: NodeId) -> AddressClue {
		AddressClue {
			entity,
			services: HashMap::new(),
			addresses: IndexSet::new(),
			soft_addresses: HashSet::new(),
			endpoints: HashSet::new(),
			source_for: Vec::new(),
			target_for: Vec::new(),
			multicast_source: HashMap::new(),
		}
	}
}

/// Items weights accumulate on during deduction.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum MatchItem {
	Entity(NodeId),
	/// One direction of a connection; `true` is the target end.
	End(ConnectionId, bool),
	Conn(ConnectionId),
}

#[derive(Debug, Default, Clone)]
pub struct StateValue {
	pub weight: i32,
	pub reference: Option<AddressAtNetwork>,
}

/// Deduction state of one side of a flow.
#[derive(Debug, Default)]
pub struct MatchingState {
	values: IndexMap<MatchItem, StateValue>,
}

impl MatchingState {
	fn get_mut(&mut self, item: MatchItem) -> &mut StateValue {
		self.values.entry(item).or_default()
	}

	fn weight(&self, item: MatchItem) -> i32 {
		self.values.get(&item).map(|v| v.weight).unwrap_or(0)
	}

	fn value(&self, item: MatchItem) -> StateValue {
		self.values.get(&item).cloned().unwrap_or_default()
	}

	/// All items with stable order, heaviest first.
	fn sorted(&self) -> Vec<(MatchItem, StateValue)> {
		let mut items: Vec<(MatchItem, StateValue)> = self
			.values
			.iter()
			.map(|(k, v)| (*k, v.clone()))
			.collect();
		items.sort_by_key(|(_, v)| -v.weight);
		items
	}
}

/// Index from addresses and endpoints to candidate entities and their
/// connections, rebuilt per matching context.
#[derive(Debug, Default)]
pub struct MatcherEngine {
	clues: Vec<AddressClue>,
	endpoints: HashMap<NodeId, ClueId>,
	addresses: HashMap<AddressAtNetwork, Vec<ClueId>>,
	wildcard_hosts: Vec<ClueId>,
	connections: HashSet<ConnectionId>,
}

impl MatcherEngine {
	pub fn new() -> MatcherEngine {
		MatcherEngine::default()
	}

	fn clue(&self, id: ClueId) -> &AddressClue {
		&self.clues[id.0 as usize]
	}

	fn clue_mut(&mut self, id: ClueId) -> &mut AddressClue {
		&mut self.clues[id.0 as usize]
	}

	/// Find a host by one of its addresses.
	pub fn find_host(&self, system: &IoTSystem, address: &Address) -> Option<NodeId> {
		let host = address.host();
		for net in system.networks_for(system.root(), host) {
			let key = AddressAtNetwork::new(host.clone(), net);
			for clue_id in self.addresses.get(&key).into_iter().flatten() {
				let entity = self.clue(*clue_id).entity;
				if system.node(entity).is_host() {
					return Some(entity);
				}
			}
		}
		None
	}

	/// Add a host and its services.
	pub fn add_host(&mut self, system: &IoTSystem, host: NodeId) {
		self.add_addressable(system, system.parent_host(host));
	}

	/// Add an address mapping for an entity beyond its own addresses.
	pub fn add_address_mapping(&mut self, system: &IoTSystem, address: &Address, entity: NodeId) {
		let mut nets = system.networks_for(entity, address);
		if nets.is_empty() {
			nets.push(system.default_network());
		}
		for net in nets {
			let addr_net = AddressAtNetwork::new(address.clone(), net);
			let clue = self.add_addressable(system, entity);
			self.clue_mut(clue).addresses.insert(addr_net.clone());
			// clear old mappings for the address
			self.addresses.insert(addr_net, vec![clue]);
		}
		if !system.node(entity).any_host {
			// remove from wildcard hosts, if there
			let clues = &self.clues;
			self.wildcard_hosts
				.retain(|wc| {
					let c = &clues[wc.0 as usize];
					c.entity != entity || !c.multicast_source.is_empty()
				});
		}
	}

	/// Apply an address update of a host.
	pub fn update_host(&mut self, system: &IoTSystem, host: NodeId) {
		let Some(clue_id) = self.endpoints.get(&host).copied() else {
			self.add_addressable(system, host);
			return;
		};
		let mut new_set: HashSet<AddressAtNetwork> = HashSet::new();
		let mut additions = false;
		let addresses: Vec<Address> = system.node(host).addresses.iter().cloned().collect();
		for address in addresses {
			if matches!(address, Address::Tag(_)) {
				continue; // skip tags
			}
			for net in system.networks_for(host, &address) {
				let addr_net = AddressAtNetwork::new(address.clone(), net);
				if !self.clue(clue_id).addresses.contains(&addr_net) {
					// new address, override old mappings
					let clue = self.clue_mut(clue_id);
					clue.addresses.insert(addr_net.clone());
					clue.soft_addresses.insert(addr_net.clone());
					let old_clues: Vec<ClueId> =
						self.addresses.get(&addr_net).cloned().unwrap_or_default();
					for old in old_clues {
						if old != clue_id {
							self.clue_mut(old).addresses.shift_remove(&addr_net);
						}
					}
					self.addresses.insert(addr_net.clone(), vec![clue_id]);
					additions = true;
				}
				new_set.insert(addr_net);
			}
		}
		// drop soft addresses that are gone
		let stale: Vec<AddressAtNetwork> = self
			.clue(clue_id)
			.addresses
			.iter()
			.filter(|a| !new_set.contains(*a) && self.clue(clue_id).soft_addresses.contains(*a))
			.cloned()
			.collect();
		for addr_net in stale {
			self.clue_mut(clue_id).addresses.shift_remove(&addr_net);
			if let Some(clues) = self.addresses.get_mut(&addr_net) {
				clues.retain(|c| *c != clue_id);
				if clues.is_empty() {
					self.addresses.remove(&addr_net);
				}
			}
		}
		if additions
			&& !system.node(host).any_host
			&& !self.clue(clue_id).addresses.is_empty()
		{
			// host has real addresses now, no longer a wildcard candidate
			let clues = &self.clues;
			self.wildcard_hosts.retain(|wc| {
				let c = &clues[wc.0 as usize];
				c.entity != host || !c.multicast_source.is_empty()
			});
		}
	}

	/// Add a connection and both of its ends.
	pub fn add_connection(&mut self, system: &IoTSystem, connection: ConnectionId) {
		if !self.connections.insert(connection) {
			return; // already added
		}
		let conn = system.connection(connection);
		let (source, target) = (conn.source, conn.target);
		let source_end = self.add_addressable(system, source);
		self.clue_mut(source_end).source_for.push(connection);
		let target_end = self.add_addressable(system, target);
		self.clue_mut(target_end).target_for.push(connection);
	}

	/// Add an addressable host or service and index its addresses.
	pub fn add_addressable(&mut self, system: &IoTSystem, entity: NodeId) -> ClueId {
		if let Some(id) = self.endpoints.get(&entity) {
			return *id;
		}
		let clue_id = ClueId(self.clues.len() as u32);
		self.clues.push(AddressClue::new(entity));
		self.endpoints.insert(entity, clue_id);

		let parent = system.parent_host(entity);
		if parent != entity {
			// ensure the parent host is also added
			self.add_addressable(system, parent);
		}

		let mut any_addresses = false;
		let addresses: Vec<Address> = system.node(entity).addresses.iter().cloned().collect();
		for add in addresses {
			for net in system.networks_for(entity, &add) {
				match &add {
					Address::Tag(_) => continue, // no clues for tags
					Address::Endpoint(ep) => {
						let ep_key = ep.protocol_port();
						self.clue_mut(clue_id).endpoints.insert(ep_key);
						let h_addr = ep.host.as_ref();
						if h_addr == &Address::any() && parent != entity {
							// endpoint key goes to the parent host
							let host_clue = self.add_addressable(system, parent);
							self.clue_mut(host_clue).services.insert(ep_key, clue_id);
						} else {
							let add_net = AddressAtNetwork::new(h_addr.clone(), net);
							self.addresses.entry(add_net).or_default().push(clue_id);
						}
					},
					a => {
						let add_net = AddressAtNetwork::new(a.clone(), net);
						self.addresses
							.entry(add_net.clone())
							.or_default()
							.push(clue_id);
						self.clue_mut(clue_id).addresses.insert(add_net);
					},
				}
				any_addresses = true;
			}
		}

		if let Some(target) = system
			.node(entity)
			.service_data()
			.and_then(|s| s.multicast_source.clone())
		{
			// service listening on a multicast or broadcast address
			let mut nets = system.effective_networks(entity).to_vec();
			if nets.is_empty() {
				nets.push(system.default_network());
			}
			for net in nets {
				self.clue_mut(clue_id)
					.multicast_source
					.insert(net, target.clone());
			}
		}

		if system.node(entity).any_host
			|| !any_addresses
			|| !self.clue(clue_id).multicast_source.is_empty()
		{
			// no addresses defined, match as a wildcard
			self.wildcard_hosts.push(clue_id);
		}

		// ensure services are also added
		for c in system.node(entity).children.clone() {
			if system.node(c).is_service() {
				self.add_addressable(system, c);
			}
		}

		clue_id
	}

	/// Score this clue for an observed address. The weight expresses how
	/// specific and how trusted the match is.
	fn update_clue(
		&self,
		system: &IoTSystem,
		clue_id: ClueId,
		state: &mut MatchingState,
		address: &AddressAtNetwork,
		protocol: Protocol,
		port: Option<u16>,
		wildcard: bool,
	) {
		let clue = self.clue(clue_id);
		let entity = system.node(clue.entity);
		let is_service = entity.is_service();
		let ep_key = (protocol, port);
		if !clue.endpoints.is_empty() && !clue.endpoints.contains(&ep_key) {
			return; // this entity does not have this endpoint
		}

		let mut multicast_match = false;
		if let Some(source) = clue.multicast_source.get(&address.network) {
			assert!(is_service, "multicast source only for services");
			if !source.is_match(&address.address) {
				return; // multicast address does not match
			}
			multicast_match = true;
		}

		let w = match entity.status {
			Status::Expected if is_service && !wildcard => 128,
			Status::Expected if is_service && multicast_match => 128,
			Status::Expected if !wildcard => 64,
			Status::Expected if is_service => 32,
			Status::External if is_service => 16,
			Status::Expected => 8,
			Status::External => 4,
			Status::Unexpected if is_service => 2,
			_ => 1,
		};
		if is_service || !wildcard {
			// connections from or to a wildcard host only with port/protocol
			let value = state.get_mut(MatchItem::Entity(clue.entity));
			if w > value.weight {
				value.weight = w;
				value.reference = Some(address.clone());
			}
		}
		for conn in &clue.source_for {
			update_connection(state, *conn, false, w, address);
		}
		for conn in &clue.target_for {
			update_connection(state, *conn, true, w, address);
		}
		// check services under this host
		if let Some(service_clue) = clue.services.get(&ep_key) {
			self.update_clue(system, *service_clue, state, address, protocol, port, wildcard);
		}
	}

	fn map_address(
		&self,
		system: &IoTSystem,
		state: &mut MatchingState,
		address: &AddressAtNetwork,
		protocol: Protocol,
		port: Option<u16>,
	) {
		if let Some(clues) = self.addresses.get(address) {
			for clue in clues {
				self.update_clue(system, *clue, state, address, protocol, port, false);
			}
		}
		for clue in &self.wildcard_hosts {
			self.update_clue(system, *clue, state, address, protocol, port, true);
		}
	}

	pub fn contains_address(&self, address: &AddressAtNetwork) -> bool {
		self.addresses.contains_key(address)
	}
}

fn update_connection(
	state: &mut MatchingState,
	connection: ConnectionId,
	is_target: bool,
	weight: i32,
	address: &AddressAtNetwork,
) {
	let value = state.get_mut(MatchItem::End(connection, is_target));
	if weight > value.weight {
		value.weight = weight;
		value.reference = Some(address.clone());
	}
	let sum = state.weight(MatchItem::End(connection, true))
		+ state.weight(MatchItem::End(connection, false));
	state.get_mut(MatchItem::Conn(connection)).weight = sum;
}

/// Result of deducing a flow: the connection to attribute it to, or the
/// endpoint pair a new connection should be made of.
#[derive(Debug)]
pub enum Deduction {
	Connection {
		connection: ConnectionId,
		reverse: bool,
		source: Address,
		target: Address,
	},
	Endpoints {
		source: Option<(NodeId, Address)>,
		target: Option<(NodeId, Address)>,
	},
}

/// Weighted deduction of one flow against the engine's indices.
pub struct FlowMatcher {
	sources: MatchingState,
	targets: MatchingState,
}

impl FlowMatcher {
	pub fn new(engine: &MatcherEngine, system: &IoTSystem, flow: &Flow) -> FlowMatcher {
		let mut sources = MatchingState::default();
		let mut targets = MatchingState::default();
		let net = flow
			.network()
			.cloned()
			.unwrap_or_else(|| system.default_network());
		match flow {
			Flow::Ip(f) => {
				// With an external IP the HW address is the local router;
				// with a known local HW the IP may be stale. Choose per side.
				for (state, (hw, ip, port)) in
					[(&mut sources, f.source), (&mut targets, f.target)]
				{
					let hw_addr = Address::Hardware(hw);
					let ip_addr = Address::Ip(ip);
					let is_multicast = hw_addr.is_multicast();
					let ip_at = AddressAtNetwork::new(ip_addr.clone(), net.clone());
					let use_ip = engine.contains_address(&ip_at)
						|| system.is_external(&ip_addr)
						|| is_multicast;
					if use_ip {
						engine.map_address(system, state, &ip_at, f.protocol, Some(port));
					} else {
						let hw_at = AddressAtNetwork::new(hw_addr, net.clone());
						engine.map_address(system, state, &hw_at, f.protocol, Some(port));
					}
				}
			},
			_ => {
				for addr in flow.stack(false) {
					let at = AddressAtNetwork::new(addr, net.clone());
					engine.map_address(system, &mut sources, &at, flow.protocol(), flow.port(false));
				}
				for addr in flow.stack(true) {
					let at = AddressAtNetwork::new(addr, net.clone());
					engine.map_address(system, &mut targets, &at, flow.protocol(), flow.port(true));
				}
			},
		}
		FlowMatcher { sources, targets }
	}

	/// Deduce the connection for the flow, or the best endpoints when no
	/// connection matches.
	pub fn get_connection(&self, system: &IoTSystem, flow: &Flow) -> Deduction {
		let source_items = self.sources.sorted();
		let target_items = self.targets.sorted();

		// maximum weight of any non-connection item
		let mut max_endpoint_weight = 0;
		for (key, value) in &source_items {
			if !matches!(key, MatchItem::Conn(_)) {
				max_endpoint_weight = value.weight;
				break;
			}
		}
		for (key, value) in &target_items {
			if !matches!(key, MatchItem::Conn(_)) {
				if value.weight > max_endpoint_weight {
					max_endpoint_weight = value.weight;
				}
				break;
			}
		}

		// find the connection with the largest combined weight; iterating
		// the target items prefers target matches on equal weights
		let mut conn: Option<ConnectionId> = None;
		let mut seen: HashSet<ConnectionId> = HashSet::new();
		let mut ends: Option<(AddressAtNetwork, AddressAtNetwork)> = None;
		let mut best_weight = 0;
		let mut reverse = false;
		for (key, _) in &target_items {
			let MatchItem::Conn(c) = key else { continue };
			if !seen.insert(*c) {
				continue;
			}
			// request direction
			let sv = self.sources.value(MatchItem::End(*c, false));
			let tv = self.targets.value(MatchItem::End(*c, true));
			let weight = if sv.weight > 0 && tv.weight > 0 {
				sv.weight + tv.weight
			} else {
				0
			};
			// reverse direction
			let r_sv = self.sources.value(MatchItem::End(*c, true));
			let r_tv = self.targets.value(MatchItem::End(*c, false));
			let r_weight = if r_sv.weight > 0 && r_tv.weight > 0 {
				r_sv.weight + r_tv.weight
			} else {
				0
			};
			let b_weight = weight.max(r_weight);
			if system.connection(*c).status != Status::Expected && b_weight < max_endpoint_weight {
				// a matching expected endpoint pair beats an accidental
				// unexpected connection
				continue;
			}
			if b_weight <= best_weight {
				continue; // not better than the current best
			}
			best_weight = b_weight;
			reverse = weight < r_weight;
			ends = if reverse {
				match (r_tv.reference, r_sv.reference) {
					(Some(a), Some(b)) => Some((a, b)),
					_ => None,
				}
			} else {
				match (sv.reference, tv.reference) {
					(Some(a), Some(b)) => Some((a, b)),
					_ => None,
				}
			};
			conn = Some(*c);
		}

		if let Some(connection) = conn {
			let (source, target) = ends.expect("winning connection has end references");
			return Deduction::Connection {
				connection,
				reverse,
				source: source.address,
				target: target.address,
			};
		}

		// no connection, find the endpoints with the largest weights
		let mut first_end: Option<NodeId> = None;
		let mut first_addr: Option<AddressAtNetwork> = None;
		let mut best_weight = 0;
		for (key, value) in source_items.iter().chain(target_items.iter()) {
			let MatchItem::Entity(e) = key else { continue };
			if value.weight <= best_weight {
				continue;
			}
			first_end = Some(*e);
			first_addr = value.reference.clone();
			best_weight = value.weight;
		}

		let (Some(first_end), Some(first_addr)) = (first_end, first_addr) else {
			return Deduction::Endpoints {
				source: None,
				target: None,
			};
		};

		let source_set: HashSet<Address> = flow.stack(false).into_iter().collect();
		let is_first_source = source_set.contains(&first_addr.address);

		// the second endpoint must be on the opposite side of the flow and
		// on a different host
		let mut second_end: Option<NodeId> = None;
		let mut second_addr: Option<AddressAtNetwork> = None;
		let mut best_weight = 0;
		for (key, value) in source_items.iter().chain(target_items.iter()) {
			let MatchItem::Entity(e) = key else { continue };
			if value.weight <= best_weight {
				continue;
			}
			let Some(net_addr) = &value.reference else {
				continue;
			};
			if source_set.contains(net_addr.address.host()) == is_first_source {
				continue; // same side as the first end
			}
			if system.parent_host(*e) == system.parent_host(first_end) {
				continue; // cannot connect to self
			}
			second_end = Some(*e);
			second_addr = Some(net_addr.clone());
			best_weight = value.weight;
		}

		let first = Some((first_end, first_addr.address));
		let second = match (second_end, second_addr) {
			(Some(e), Some(a)) => Some((e, a.address)),
			_ => None,
		};
		if is_first_source {
			Deduction::Endpoints {
				source: first,
				target: second,
			}
		} else {
			Deduction::Endpoints {
				source: second,
				target: first,
			}
		}
	}
}
