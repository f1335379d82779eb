//! Flow inspection scenarios: expected and unexpected traffic, external
//! promotion, replies, and the idempotence and reset invariants.

use std::collections::HashMap;
use std::sync::Arc;

use toolsaf::builder::SystemBuilder;
use toolsaf::events::{Evidence, EventInterface, EvidenceSource, IPFlow};
use toolsaf::inspector::Inspector;
use toolsaf::model::{EntityRef, NodeId};
use toolsaf::property::properties;
use toolsaf::types::{Address, ExternalActivity, Protocol, Status, Verdict};

fn evidence() -> Evidence {
	Evidence::new(Arc::new(EvidenceSource::new("Test capture")))
}

/// Device 1 by HW address, Device 2 by IP with a UDP service, connected.
fn two_device_model() -> (Inspector, NodeId, NodeId, NodeId) {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.hw(dev1, "1:0:0:0:0:1");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2");
	let service = sb.service(dev2, Protocol::Udp, 1234);
	sb.connect(dev1, service);
	let (system, rules) = sb.finish().unwrap();
	(Inspector::with_rules(system, rules), dev1, dev2, service)
}

#[test]
fn expected_udp_flow_passes() {
	let (mut inspector, dev1, dev2, service) = two_device_model();
	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");

	let system = inspector.system();
	assert_eq!(system.connection(conn).status, Status::Expected);
	assert_eq!(
		system.expected_verdict(EntityRef::Connection(conn)),
		Some(Verdict::Pass)
	);
	for e in [dev1, dev2, service] {
		assert_eq!(
			system.expected_verdict(EntityRef::Node(e)),
			Some(Verdict::Pass),
			"{}",
			system.long_name(EntityRef::Node(e))
		);
	}
}

#[test]
fn unexpected_target_fails() {
	let (mut inspector, dev1, _, _) = two_device_model();
	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:3", "1.0.0.3", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");

	let system = inspector.system();
	assert_eq!(system.connection(conn).status, Status::Unexpected);
	assert_eq!(
		system.expected_verdict(EntityRef::Connection(conn)),
		Some(Verdict::Fail)
	);
	// a new unexpected host was synthesized for the external address
	let target = system.connection(conn).target;
	let target_host = system.parent_host(target);
	assert_eq!(system.node(target_host).name.as_str(), "1.0.0.3");
	assert_eq!(system.node(target_host).status, Status::Unexpected);
	assert_eq!(
		system.expected_verdict(EntityRef::Node(target_host)),
		Some(Verdict::Fail)
	);
	// the source is a declared device and passes
	assert_eq!(system.connection(conn).source, dev1);
}

#[test]
fn external_promotion_keeps_verdicts_open() {
	let mut sb = SystemBuilder::new("Test system");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2");
	let service = sb.service(dev2, Protocol::Udp, 1234);
	sb.external_activity(dev2, ExternalActivity::Unlimited);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:9", "192.168.10.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");

	let system = inspector.system();
	assert_eq!(system.connection(conn).status, Status::External);
	let source_host = system.parent_host(system.connection(conn).source);
	assert_eq!(system.node(source_host).status, Status::External);
	// verdicts stay inconclusive until a property event fails them
	assert_eq!(
		system.expected_verdict(EntityRef::Connection(conn)),
		Some(Verdict::Incon)
	);
	assert_eq!(
		system.expected_verdict(EntityRef::Node(service)),
		Some(Verdict::Incon)
	);
	let mut cache = HashMap::new();
	assert_eq!(
		system.get_verdict(EntityRef::Connection(conn), &mut cache),
		Verdict::Incon
	);
}

#[test]
fn reply_first_matches_without_fail() {
	let (mut inspector, dev1, dev2, service) = two_device_model();
	// the reply direction is seen first
	let reply = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
	);
	let conn = inspector.connection(reply).expect("flow is interesting");

	let system = inspector.system();
	// the declared connection matched in reverse
	assert_eq!(system.connection(conn).status, Status::Expected);
	assert_eq!(system.connection(conn).source, dev1);
	assert_eq!(system.connection(conn).target, service);
	// a reply alone cannot mark the source seen
	assert_eq!(
		system.expected_verdict(EntityRef::Node(dev1)),
		Some(Verdict::Incon)
	);
	assert_eq!(
		system.expected_verdict(EntityRef::Node(service)),
		Some(Verdict::Pass)
	);
	// the reply registers the connection at the target host
	let target_conns = &system.node(dev2).host_data().unwrap().connections;
	assert!(target_conns.contains(&conn));
}

#[test]
fn repeat_flows_are_idempotent() {
	let (mut inspector, _, _, _) = two_device_model();
	let flow = || {
		IPFlow::udp(
			evidence(),
			("1:0:0:0:0:1", "192.168.0.1", 1100),
			("1:0:0:0:0:2", "192.168.0.2", 1234),
		)
	};
	let conn = inspector.connection(flow()).expect("first is interesting");
	let before = format!("{}", inspector.system());

	// the same flow again changes nothing
	assert_eq!(inspector.connection(flow()), None);
	assert_eq!(format!("{}", inspector.system()), before);

	// the reply is a new direction of the same connection
	let reply = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
	);
	assert_eq!(inspector.connection(reply.clone()), Some(conn));
	assert_eq!(inspector.connection(reply), None);
}

#[test]
fn reset_restores_the_declared_model() {
	let (mut inspector, dev1, _, _) = two_device_model();
	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:3", "1.0.0.3", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");
	let target = inspector.system().connection(conn).target;

	inspector.reset();
	let system = inspector.system();
	// declared entities survive, synthesized ones become placeholders
	assert_eq!(system.node(dev1).status, Status::Expected);
	assert_eq!(system.node(target).status, Status::Placeholder);
	assert_eq!(
		system.status(EntityRef::Connection(conn)),
		Status::Placeholder
	);
	assert!(system.properties(EntityRef::Node(dev1)).is_empty());
	// every declared entity is still iterated
	assert!(system.iterate_all().contains(&EntityRef::Node(dev1)));
}

#[test]
fn flow_properties_attach_to_expected_connections() {
	let (mut inspector, _, _, _) = two_device_model();
	let mut flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	properties::MITM.put_verdict(flow.properties_mut(), Verdict::Pass);
	let conn = inspector.connection(flow).expect("flow is interesting");
	let system = inspector.system();
	assert_eq!(
		properties::MITM.get_verdict(system.properties(EntityRef::Connection(conn))),
		Some(Verdict::Pass)
	);
}

#[test]
fn order_of_flows_does_not_change_the_model() {
	let flows = || {
		vec![
			IPFlow::udp(
				evidence(),
				("1:0:0:0:0:1", "192.168.0.1", 1100),
				("1:0:0:0:0:2", "192.168.0.2", 1234),
			),
			IPFlow::udp(
				evidence(),
				("1:0:0:0:0:1", "192.168.0.1", 1101),
				("1:0:0:0:0:3", "1.0.0.3", 1234),
			),
			IPFlow::udp(
				evidence(),
				("1:0:0:0:0:2", "192.168.0.2", 1234),
				("1:0:0:0:0:1", "192.168.0.1", 1100),
			),
		]
	};
	let run = |order: Vec<usize>| {
		let (mut inspector, _, _, _) = two_device_model();
		let fs = flows();
		for i in order {
			inspector.connection(fs[i].clone());
		}
		let mut hosts: Vec<String> = inspector
			.system()
			.hosts()
			.iter()
			.map(|h| {
				let n = inspector.system().node(*h);
				format!("{} {} {:?}", n.name, n.status, n.addresses)
			})
			.collect();
		hosts.sort();
		hosts
	};
	// same entity identity set and statuses for any source order
	assert_eq!(run(vec![0, 1, 2]), run(vec![1, 0, 2]));
	assert_eq!(run(vec![0, 1, 2]), run(vec![2, 1, 0]));
}

#[test]
fn address_map_overlay_resolves_ambiguity() {
	let mut sb = SystemBuilder::new("Test system");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2");
	let service = sb.service(dev2, Protocol::Udp, 1234);
	let dev1 = sb.device("Device 1");
	sb.connect(dev1, service);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	// the source carries a mapping from the observed HW address to Device 1
	let mut source = EvidenceSource::new("mapped capture");
	source
		.address_map
		.insert(Address::parse("2:0:0:0:0:9|hw").unwrap(), dev1);
	let ev = Evidence::new(Arc::new(source));
	let flow = IPFlow::udp(
		ev,
		("2:0:0:0:0:9", "192.168.0.7", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");
	let system = inspector.system();
	assert_eq!(system.connection(conn).source, dev1);
	assert_eq!(system.connection(conn).status, Status::Expected);
}
