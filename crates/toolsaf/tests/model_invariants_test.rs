//! Structural invariants of the model under event processing.

use std::collections::HashMap;
use std::sync::Arc;

use toolsaf::builder::SystemBuilder;
use toolsaf::events::{Evidence, EventInterface, EvidenceSource, IPFlow};
use toolsaf::inspector::Inspector;
use toolsaf::model::{EntityRef, IoTSystem};
use toolsaf::types::{Address, Protocol, Status};

fn evidence() -> Evidence {
	Evidence::new(Arc::new(EvidenceSource::new("Test capture")))
}

fn busy_inspector() -> Inspector {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.hw(dev1, "1:0:0:0:0:1");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2");
	let service = sb.service(dev2, Protocol::Udp, 1234);
	sb.connect(dev1, service);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);
	for flow in [
		IPFlow::udp(
			evidence(),
			("1:0:0:0:0:1", "192.168.0.1", 1100),
			("1:0:0:0:0:2", "192.168.0.2", 1234),
		),
		IPFlow::udp(
			evidence(),
			("1:0:0:0:0:1", "192.168.0.1", 1101),
			("1:0:0:0:0:3", "1.0.0.3", 443),
		),
		IPFlow::udp(
			evidence(),
			("1:0:0:0:0:5", "192.168.0.5", 5000),
			("1:0:0:0:0:2", "192.168.0.2", 9999),
		),
	] {
		inspector.connection(flow);
	}
	inspector
}

/// Every non-system node is reachable through exactly one parent chain
/// ending at the system root.
#[test]
fn nodes_have_one_parent_chain() {
	let inspector = busy_inspector();
	let system = inspector.system();
	let mut seen_children: HashMap<String, usize> = HashMap::new();
	for entity in system.iterate_all() {
		let EntityRef::Node(n) = entity else { continue };
		if n == system.root() {
			continue;
		}
		// walks up to the root without cycles
		let mut at = n;
		let mut steps = 0;
		while let Some(parent) = system.node(at).parent {
			at = parent;
			steps += 1;
			assert!(steps < 10, "parent chain too deep for {n}");
		}
		assert_eq!(at, system.root());
		*seen_children.entry(format!("{n}")).or_default() += 1;
	}
	// iteration yields each node once
	assert!(seen_children.values().all(|c| *c == 1));
}

/// At most one addressable owns an address within a network, wildcard
/// services excepted.
#[test]
fn addresses_are_unique_per_network() {
	let inspector = busy_inspector();
	let system = inspector.system();
	assert_unique_addresses(system);
}

fn assert_unique_addresses(system: &IoTSystem) {
	let mut owners: HashMap<String, Vec<String>> = HashMap::new();
	for entity in system.iterate_all() {
		let EntityRef::Node(n) = entity else { continue };
		for a in &system.node(n).addresses {
			if a.is_wildcard() || matches!(a, Address::Tag(_)) {
				continue;
			}
			owners
				.entry(a.to_string())
				.or_default()
				.push(system.long_name(entity));
		}
	}
	for (address, hosts) in owners {
		assert_eq!(hosts.len(), 1, "address {address} owned by {hosts:?}");
	}
}

/// The invariants also hold after reset and renewed processing.
#[test]
fn invariants_survive_reset_and_replay() {
	let mut inspector = busy_inspector();
	inspector.reset();
	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");
	let system = inspector.system();
	assert_eq!(system.connection(conn).status, Status::Expected);
	assert_unique_addresses(system);
}
