//! The inspector: consumes events, mutates the model under its invariants
//! and queues change notifications.

use toolsaf_core::prelude::*;

use crate::events::{
	EventInterface, EvidenceSource, Flow, FlowKey, HostScan, NameEvent, PropertyAddressEvent,
	PropertyEvent, ServiceScan,
};
use crate::ignore::IgnoreRules;
use crate::matcher::SystemMatcher;
use crate::model::{
	ConnectionId, EntityRef, IoTSystem, ModelChange, NodeId, ServiceBehavior,
};
use crate::property::properties;
use crate::services::dhcp_learn_from_flow;
use crate::types::{Address, ExternalActivity, Status, Verdict};

/// Consumes events against the system model.
pub struct Inspector {
	system: IoTSystem,
	matcher: SystemMatcher,
	ignore_rules: IgnoreRules,
	/// Observation counts per connection; the first is special.
	connection_count: HashMap<ConnectionId, u64>,
	/// Direction per flow: false is request, true is reply.
	direction: HashMap<FlowKey, bool>,
	known_entities: HashSet<EntityRef>,
}

impl Inspector {
	pub fn new(system: IoTSystem) -> Inspector {
		Inspector::with_rules(system, IgnoreRules::new())
	}

	pub fn with_rules(system: IoTSystem, ignore_rules: IgnoreRules) -> Inspector {
		let mut inspector = Inspector {
			system,
			matcher: SystemMatcher::new(),
			ignore_rules,
			connection_count: HashMap::new(),
			direction: HashMap::new(),
			known_entities: HashSet::new(),
		};
		inspector.list_entities();
		inspector
	}

	pub fn system_mut(&mut self) -> &mut IoTSystem {
		&mut self.system
	}

	pub fn into_system(self) -> IoTSystem {
		self.system
	}

	/// Reset the system, clearing all evidence.
	pub fn reset(&mut self) {
		self.matcher.reset(&mut self.system);
		self.connection_count.clear();
		self.direction.clear();
		self.list_entities();
	}

	fn list_entities(&mut self) {
		self.known_entities.clear();
		self.known_entities.extend(self.system.iterate_all());
	}

	/// Record a new entity and queue its creation notification.
	fn check_entity(&mut self, entity: EntityRef) -> bool {
		if !self.known_entities.insert(entity) {
			return false;
		}
		match entity {
			EntityRef::Connection(c) => {
				self.system.push_change(ModelChange::ConnectionChange(c));
			},
			EntityRef::Node(n) => {
				if self.system.node(n).is_host() {
					self.system.push_change(ModelChange::HostChange(n));
				} else if self.system.node(n).is_service() {
					self.system.push_change(ModelChange::ServiceChange(n));
				}
			},
			EntityRef::Component(_) => {},
		}
		true
	}

	/// Forward queued address changes to the matcher indices.
	fn sync_matcher(&mut self, mark: usize) {
		let hosts: Vec<NodeId> = self
			.system
			.changes_since(mark)
			.iter()
			.filter_map(|c| match c {
				ModelChange::AddressChange(h) => Some(*h),
				_ => None,
			})
			.collect();
		for h in hosts {
			self.matcher.address_change(&self.system, h);
		}
	}

	fn update_seen_status(&mut self, entity: EntityRef, updated: &mut Vec<EntityRef>) -> bool {
		let mut changed = Vec::new();
		let change = self.system.set_seen_now(entity, &mut changed);
		for c in changed {
			if !updated.contains(&c) {
				updated.push(c);
			}
		}
		change
	}

	/// The matcher only finds one broadcast listener; propagate the
	/// observation to all services listening on the same target.
	fn update_all_broadcast_listeners(
		&mut self,
		target: NodeId,
		updated: &mut Vec<EntityRef>,
	) -> bool {
		if !self.update_seen_status(EntityRef::Node(target), updated) {
			return false;
		}
		let Some(mc) = Address::get_multicast(&self.system.node(target).addresses).cloned() else {
			return true;
		};
		for c in self.system.get_connections() {
			let conn_target = self.system.connection(c).target;
			let has_mc = self
				.system
				.node(conn_target)
				.addresses
				.iter()
				.any(|a| a == &mc || a.host() == &mc);
			if !has_mc {
				continue; // different target, different broadcast
			}
			let mut changed = Vec::new();
			if self.system.set_seen_now(EntityRef::Connection(c), &mut changed) {
				self.check_entity(EntityRef::Connection(c));
				if !updated.contains(&EntityRef::Connection(c)) {
					updated.push(EntityRef::Connection(c));
				}
			}
			let mut changed = Vec::new();
			if self
				.system
				.set_seen_now(EntityRef::Node(conn_target), &mut changed)
			{
				self.check_entity(EntityRef::Node(conn_target));
				if !updated.contains(&EntityRef::Node(conn_target)) {
					updated.push(EntityRef::Node(conn_target));
				}
			}
		}
		true
	}

}

impl EventInterface for Inspector {
	fn system(&self) -> &IoTSystem {
		&self.system
	}

	fn connection(&mut self, flow: Flow) -> Option<ConnectionId> {
		debug!(%flow, "inspect flow");
		let mark = self.system.change_mark();
		let m = self.matcher.connection_w_ends(&mut self.system, &flow);
		let conn = m.connection;
		assert_ne!(
			self.system.connection(conn).status,
			Status::Placeholder,
			"matcher returned a placeholder connection"
		);

		let count = self.connection_count.entry(conn).or_insert(0);
		*count += 1;
		let new_conn = *count == 1;

		// detect new sessions
		let key = flow.key();
		let new_direction = !self.direction.contains_key(&key);
		if new_direction {
			self.direction.insert(key, !m.reply);
		}

		if !(new_conn || new_direction) {
			self.sync_matcher(mark);
			return None; // old connection, old direction
		}

		// entities whose status updated
		let mut updated: Vec<EntityRef> = Vec::new();

		// endpoints of a live connection cannot be placeholders
		let (source, target) = {
			let c = self.system.connection(conn);
			(c.source, c.target)
		};
		let conn_status = self.system.connection(conn).status;
		if self.system.node(source).status == Status::Placeholder {
			self.system.node_mut(source).status = conn_status;
		}
		if self.system.node(target).status == Status::Placeholder {
			self.system.node_mut(target).status = conn_status;
		}

		if new_conn {
			// the connection is observed now
			let mut changed = Vec::new();
			self.system
				.set_seen_now(EntityRef::Connection(conn), &mut changed);
			if !updated.contains(&EntityRef::Connection(conn)) {
				updated.push(EntityRef::Connection(conn));
			}
		}

		if new_direction {
			if !m.reply {
				self.update_seen_status(EntityRef::Node(source), &mut updated);
				if self.system.node(target).status == Status::Unexpected {
					// an unexpected target fails instantly
					self.update_seen_status(EntityRef::Node(target), &mut updated);
				} else if self.system.node(target).is_relevant()
					&& self.system.is_multicast(target)
				{
					// multicast is received when sent to
					self.update_all_broadcast_listeners(target, &mut updated);
				} else if self.system.node(target).status == Status::External {
					// record the event although the verdict stays open
					if self
						.system
						.expected_verdict_set(EntityRef::Node(target))
						.is_none()
					{
						self.system.update_property(
							EntityRef::Node(target),
							properties::EXPECTED.clone(),
							properties::EXPECTED.verdict(Verdict::Incon).1,
						);
					}
				} else if self.system.connection(conn).status == Status::Expected {
					// the expected target of an expected connection is
					// reached by the request
					self.update_seen_status(EntityRef::Node(target), &mut updated);
				}
			} else {
				// a reply; the connection now terminates at the target too
				self.update_seen_status(EntityRef::Node(target), &mut updated);
				self.system.connect_target_host(conn);
			}
		}

		// service-specific logic
		let flow_source_end = if m.reply { target } else { source };
		if self
			.system
			.node(flow_source_end)
			.service_data()
			.is_some_and(|d| d.behavior == ServiceBehavior::Dhcp)
		{
			dhcp_learn_from_flow(&mut self.system, conn, &flow, true);
		}

		// creation and change notifications, in this order
		let source_host = self.system.parent_host(source);
		let target_host = self.system.parent_host(target);
		let entities = [
			EntityRef::Connection(conn),
			EntityRef::Node(source),
			EntityRef::Node(source_host),
			EntityRef::Node(target),
			EntityRef::Node(target_host),
		];
		for ent in entities {
			if self.check_entity(ent) {
				updated.retain(|u| *u != ent); // no separate update needed
			}
		}

		// a flow can carry properties for an expected connection
		if self.system.connection(conn).status == Status::Expected {
			for (p, v) in flow.properties().clone() {
				self.system
					.update_property(EntityRef::Connection(conn), p, v);
			}
		}

		for ent in entities {
			if !updated.contains(&ent) {
				continue;
			}
			let exp = self
				.system
				.expected_verdict(ent)
				.expect("updated entity has a verdict");
			let (key, value) = properties::EXPECTED.verdict(exp);
			self.system.push_change(ModelChange::PropertyChange {
				entity: ent,
				key,
				value,
			});
			updated.retain(|u| *u != ent);
		}
		self.sync_matcher(mark);
		Some(conn)
	}

	fn name(&mut self, event: NameEvent) -> Option<NodeId> {
		let mark = self.system.change_mark();
		let mut address = event.address.clone();
		if let (Some(service), Some(addr)) = (event.service, &event.address) {
			let captive = matches!(
				self.system.node(service).service_data().map(|d| &d.behavior),
				Some(ServiceBehavior::Dns { captive_portal: true })
			);
			let service_host = self.system.parent_host(service);
			if captive && self.system.node(service_host).addresses.contains(addr) {
				address = None; // it is just redirecting to itself
			}
		}
		let name = event.name_address().expect("name event without tag or name");
		let (h, changes) = self.system.learn_named_address(&name, address.as_ref());
		let h = match h {
			Some(h) if !self.known_entities.contains(&EntityRef::Node(h)) => {
				if self.system.node(h).status == Status::Unexpected {
					// unexpected host, check if it can be external
					let mut failed = false;
					for pe in &event.peers {
						let peer_host = self.system.parent_host(*pe);
						let ignored = match &name {
							Address::Name(n) => self
								.system
								.node(peer_host)
								.host_data()
								.is_some_and(|d| d.ignore_name_requests.contains(n)),
							_ => false,
						};
						if ignored {
							continue; // this name is explicitly ok
						}
						if self.system.node(*pe).external_activity < ExternalActivity::Open {
							// should not ask or reply with unknown names
							let mut changed = Vec::new();
							self.system.set_seen_now(EntityRef::Node(h), &mut changed);
							failed = true;
							break;
						}
					}
					if !failed {
						// unknown requester, or the peers are externally active
						self.system.node_mut(h).status = Status::External;
					}
				}
				self.known_entities.insert(EntityRef::Node(h));
				h
			},
			Some(h) => {
				if !changes {
					// old host and nothing learned
					self.sync_matcher(mark);
					return None;
				}
				h
			},
			None => {
				self.sync_matcher(mark);
				return None;
			},
		};
		self.system.push_change(ModelChange::AddressChange(h));
		self.sync_matcher(mark);
		Some(h)
	}

	fn property_update(&mut self, update: PropertyEvent) -> Option<EntityRef> {
		let entity = update.entity;
		if matches!(
			self.system.status(entity),
			Status::Placeholder | Status::Unexpected
		) {
			// no properties for placeholders or unexpected entities
			return Some(entity);
		}
		let (key, value) = update.key_value;
		if key.is_model() && !self.system.properties(entity).contains_key(&key) {
			debug!(%key, "value for model property ignored, not in model");
			return None;
		}
		let at_address = self.system.system_address(entity).parseable_value();
		let value = self.ignore_rules.apply(
			&update.evidence.source.label,
			&key,
			value,
			&at_address,
		);
		self.system.update_property(entity, key, value);
		Some(entity)
	}

	fn property_address_update(&mut self, update: PropertyAddressEvent) -> Option<EntityRef> {
		let mark = self.system.change_mark();
		let node = self.get_seen_endpoint(&update.address, &update.evidence.source.clone());
		let entity = EntityRef::Node(node);
		if matches!(
			self.system.status(entity),
			Status::Placeholder | Status::Unexpected
		) {
			self.sync_matcher(mark);
			return Some(entity);
		}
		let (key, value) = update.key_value;
		if key.is_model() && !self.system.properties(entity).contains_key(&key) {
			debug!(%key, "value for model property ignored, not in model");
			self.sync_matcher(mark);
			return Some(entity);
		}
		let at_address = self.system.system_address(entity).parseable_value();
		let value = self.ignore_rules.apply(
			&update.evidence.source.label,
			&key,
			value,
			&at_address,
		);
		self.system.update_property(entity, key, value);
		self.sync_matcher(mark);
		Some(entity)
	}

	fn service_scan(&mut self, scan: ServiceScan) -> Option<NodeId> {
		let mark = self.system.change_mark();
		let address = Address::Endpoint(scan.endpoint.clone());
		let s = self.get_seen_endpoint(&address, &scan.evidence.source.clone());
		if !self.system.node(s).is_service() {
			warn!(endpoint = %scan.endpoint, "service scan did not resolve to a service");
			self.sync_matcher(mark);
			return None;
		}
		let host = self.system.parent_host(s);
		let new_host = self.check_entity(EntityRef::Node(host));
		if !new_host {
			// known host, but maybe a new service
			self.check_entity(EntityRef::Node(s));
		}
		self.sync_matcher(mark);
		Some(s)
	}

	fn host_scan(&mut self, scan: HostScan) -> Option<NodeId> {
		let mark = self.system.change_mark();
		let host = self.get_seen_endpoint(&scan.host, &scan.evidence.source.clone());
		if !self.system.node(host).is_host() {
			warn!(address = %scan.host, "host scan address is not a host");
			self.sync_matcher(mark);
			return None;
		}
		let scanned: HashSet<Address> = scan
			.endpoints
			.iter()
			.map(|e| Address::Endpoint(e.clone()))
			.collect();
		for c in self.system.node(host).children.clone() {
			let child = self.system.node(c);
			if child.is_service() {
				let data = child.service_data().expect("child is a service");
				if data.client_side || !child.is_tcp_service() {
					continue; // only server TCP services are scannable
				}
			}
			if !child.is_relevant() {
				continue; // verdict needs no checking
			}
			let mut found = false;
			for a in &child.addresses {
				if scanned.contains(a) || scanned.contains(&a.change_host(&scan.host)) {
					found = true;
					break;
				}
			}
			if !found {
				// service not in the scan results
				properties::EXPECTED.put_verdict(
					&mut self.system.node_mut(c).properties,
					Verdict::Fail,
				);
			}
		}
		self.known_entities.insert(EntityRef::Node(host));
		self.system.push_change(ModelChange::HostChange(host));
		self.sync_matcher(mark);
		Some(host)
	}
}

impl Inspector {
	/// Get the entity by address and mark it seen.
	fn get_seen_endpoint(&mut self, address: &Address, source: &Arc<EvidenceSource>) -> NodeId {
		let ent = self.matcher.endpoint(&mut self.system, address, source);
		let mut changed = Vec::new();
		let change = self.system.set_seen_now(EntityRef::Node(ent), &mut changed);
		if change && self.system.node(ent).status == Status::Expected {
			let value = properties::EXPECTED
				.get(self.system.properties(EntityRef::Node(ent)))
				.cloned()
				.unwrap_or_else(|| properties::EXPECTED.verdict(Verdict::Pass).1);
			self.system.push_change(ModelChange::PropertyChange {
				entity: EntityRef::Node(ent),
				key: properties::EXPECTED.clone(),
				value,
			});
		}
		ent
	}
}
