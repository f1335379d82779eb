//! Matching observed flows and addresses onto the system model.

mod engine;

pub use engine::{Deduction, FlowMatcher, MatcherEngine};

use indexmap::IndexMap;
use toolsaf_core::prelude::*;

use crate::events::{EvidenceSource, Flow, FlowKey, SourceId};
use crate::model::{ConnectionId, EntityRef, IoTSystem, NodeId};
use crate::types::{Address, EndpointAddress, ExternalActivity, Status, Verdict};

/// The connection a flow was attributed to, with the concrete endpoint
/// addresses of both ends and the flow direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMatch {
	pub connection: ConnectionId,
	pub source: Address,
	pub target: Address,
	pub reply: bool,
}

/// Matches flows and addresses for the whole system, keeping one matching
/// context per evidence source.
#[derive(Debug, Default)]
pub struct SystemMatcher {
	contexts: IndexMap<SourceId, MatchingContext>,
}

impl SystemMatcher {
	pub fn new() -> SystemMatcher {
		SystemMatcher::default()
	}

	/// Reset all contexts and the model itself.
	pub fn reset(&mut self, system: &mut IoTSystem) {
		self.contexts.clear();
		system.reset();
	}

	/// Host addresses changed; refresh all context indices.
	pub fn address_change(&mut self, system: &IoTSystem, host: NodeId) {
		for ctx in self.contexts.values_mut() {
			ctx.engine.update_host(system, host);
		}
	}

	/// Find the connection matching the flow, with end addresses and
	/// direction. Synthesizes missing endpoints and connections.
	pub fn connection_w_ends(
		&mut self,
		system: &mut IoTSystem,
		flow: &Flow,
	) -> ConnectionMatch {
		let source = flow.evidence().source.clone();
		self.context(system, &source).get_connection(system, flow)
	}

	/// Find or create the endpoint for an address.
	pub fn endpoint(
		&mut self,
		system: &mut IoTSystem,
		address: &Address,
		source: &Arc<EvidenceSource>,
	) -> NodeId {
		self.context(system, source).get_endpoint(system, address)
	}

	fn context(
		&mut self,
		system: &IoTSystem,
		source: &Arc<EvidenceSource>,
	) -> &mut MatchingContext {
		self.contexts
			.entry(source.id)
			.or_insert_with(|| MatchingContext::new(system, source))
	}
}

/// Per evidence-source matching state: the clue indices, the memoized
/// flow matches and the external-activity overrides of the source.
#[derive(Debug)]
struct MatchingContext {
	engine: MatcherEngine,
	observed: HashMap<FlowKey, ConnectionMatch>,
	activity: IndexMap<NodeId, ExternalActivity>,
}

impl MatchingContext {
	fn new(system: &IoTSystem, source: &EvidenceSource) -> MatchingContext {
		let mut engine = MatcherEngine::new();
		// load the system model into the engine
		for c in system.get_connections() {
			engine.add_connection(system, c);
		}
		for h in system.hosts() {
			engine.add_host(system, h);
		}
		// evidence source specific address mappings
		for (address, entity) in &source.address_map {
			engine.add_address_mapping(system, address, *entity);
		}
		MatchingContext {
			engine,
			observed: HashMap::new(),
			activity: source.activity_map.clone(),
		}
	}

	/// Get the connection matching the flow, creating endpoints and the
	/// connection itself when nothing matches.
	fn get_connection(&mut self, system: &mut IoTSystem, flow: &Flow) -> ConnectionMatch {
		let key = flow.key();
		if let Some(m) = self.observed.get(&key) {
			return m.clone();
		}

		let matcher = FlowMatcher::new(&self.engine, system, flow);
		let deduction = matcher.get_connection(system, flow);
		trace!(%flow, ?deduction, "flow deduced");
		match deduction {
			Deduction::Connection {
				connection,
				reverse,
				source,
				target,
			} => {
				let m = ConnectionMatch {
					connection,
					source: endpoint_of(flow, source, reverse),
					target: endpoint_of(flow, target, !reverse),
					reply: reverse,
				};
				self.observed.insert(key, m.clone());
				m
			},
			Deduction::Endpoints { source, target } => {
				let (source, source_addr) = match source {
					Some((e, a)) => (e, endpoint_of(flow, a, false)),
					None => self.new_endpoint(system, flow, false),
				};
				let (target, target_addr) = match target {
					Some((e, a)) => (e, endpoint_of(flow, a, true)),
					None => self.new_endpoint(system, flow, true),
				};
				let m = self.new_connection(
					system,
					(source, source_addr),
					(target, target_addr),
				);
				self.observed.insert(key, m.clone());
				m
			},
		}
	}

	/// Get an entity by address, creating host and service as needed.
	fn get_endpoint(&mut self, system: &mut IoTSystem, address: &Address) -> NodeId {
		if let Some(host) = self.engine.find_host(system, address) {
			if address.protocol_port().is_none() {
				return host;
			}
			let e = system.get_endpoint(address, None);
			self.engine.add_host(system, e); // indexed if created
			return e;
		}
		let e = system.get_endpoint(address, None);
		self.engine.add_host(system, e);
		e
	}

	/// Create a host for the side of the flow that matched nothing. The
	/// anchoring address prefers an external or multicast IP, then any
	/// non-null address of the stack.
	fn new_endpoint(
		&mut self,
		system: &mut IoTSystem,
		flow: &Flow,
		target: bool,
	) -> (NodeId, Address) {
		let stack = flow.stack(target);
		let mut use_ad = stack[0].clone();
		for ad in &stack[1..] {
			if matches!(ad, Address::Ip(_)) && (system.is_external(ad) || ad.is_multicast()) {
				use_ad = ad.clone(); // must use the IP address
				break;
			}
			if use_ad.is_null() && !ad.is_null() {
				use_ad = ad.clone(); // prefer a non-null address
			}
		}
		let host = system.get_endpoint(&use_ad, flow.network());
		self.engine.add_host(system, host);
		let match_address = Address::Endpoint(EndpointAddress::new(
			use_ad,
			flow.protocol(),
			flow.port(target),
		));
		(host, match_address)
	}

	/// Create a new unexpected connection and decide its status from the
	/// external-activity policies of both ends.
	fn new_connection(
		&mut self,
		system: &mut IoTSystem,
		source: (NodeId, Address),
		target: (NodeId, Address),
	) -> ConnectionMatch {
		let c = system.new_connection((source.0, &source.1), (target.0, &target.1), false);
		set_connection_status(system, &self.activity, c, source.0, target.0);
		self.engine.add_connection(system, c);
		ConnectionMatch {
			connection: c,
			source: source.1,
			target: target.1,
			reply: false,
		}
	}
}

/// Wrap a host-level address into the endpoint address the flow used.
fn endpoint_of(flow: &Flow, host: Address, target: bool) -> Address {
	Address::Endpoint(EndpointAddress::new(
		host,
		flow.protocol(),
		flow.port(target),
	))
}

/// A fresh unexpected entity becomes external when policy allows the
/// activity; the change cascades up the parent chain.
fn set_external(system: &mut IoTSystem, entity: NodeId) {
	let node = system.node(entity);
	if node.status == Status::Unexpected
		&& system.expected_verdict(EntityRef::Node(entity)) == Some(Verdict::Incon)
	{
		system.node_mut(entity).status = Status::External;
		if let Some(parent) = system.node(entity).parent {
			if system.node(parent).parent.is_some() {
				set_external(system, parent);
			}
		}
	}
}

/// Status for a new unexpected connection per external-activity policy,
/// with possible per-source overrides.
fn set_connection_status(
	system: &mut IoTSystem,
	activity: &IndexMap<NodeId, ExternalActivity>,
	connection: ConnectionId,
	source: NodeId,
	target: NodeId,
) {
	system.connection_mut(connection).status = Status::Unexpected;
	let source_act = activity
		.get(&source)
		.copied()
		.unwrap_or(system.node(source).external_activity);
	let target_act = activity
		.get(&target)
		.copied()
		.unwrap_or(system.node(target).external_activity);
	if source_act > ExternalActivity::Banned && target_act > ExternalActivity::Banned {
		// unexpected connections may be allowed
		let reply = system.connection(connection).source == target;
		if source_act >= ExternalActivity::Unlimited {
			// source is free to make connections
			system.connection_mut(connection).status = Status::External;
			let s = system.connection(connection).source;
			set_external(system, s);
		} else if reply && source_act >= ExternalActivity::Open {
			// source can make replies
			system.connection_mut(connection).status = Status::External;
			let s = system.connection(connection).source;
			set_external(system, s);
		}
		if system.connection(connection).status == Status::External
			&& target_act >= ExternalActivity::Passive
		{
			// target is free to receive connections
			let t = system.connection(connection).target;
			set_external(system, t);
		}
	}
}
