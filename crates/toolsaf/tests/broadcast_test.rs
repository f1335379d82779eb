//! Broadcast and multicast matching: ARP to the broadcast node, declared
//! multicast listeners, and the listener fan-out.

use std::sync::Arc;

use toolsaf::builder::SystemBuilder;
use toolsaf::events::{EthernetFlow, Evidence, EventInterface, EvidenceSource, Flow, IPFlow};
use toolsaf::inspector::Inspector;
use toolsaf::model::EntityRef;
use toolsaf::property::PropertyMap;
use toolsaf::types::{ExternalActivity, HWAddress, Protocol, Status, Verdict};

fn evidence() -> Evidence {
	Evidence::new(Arc::new(EvidenceSource::new("Test capture")))
}

fn arp_flow(source: &str) -> Flow {
	Flow::Ethernet(EthernetFlow {
		evidence: evidence(),
		protocol: Protocol::Arp,
		source: HWAddress::new(source).unwrap(),
		target: HWAddress::BROADCAST,
		payload: -1,
		timestamp: None,
		properties: PropertyMap::new(),
	})
}

#[test]
fn declared_arp_broadcast_matches() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.hw(dev1, "1:0:0:0:0:1");
	sb.arp(dev1);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let conn = inspector
		.connection(arp_flow("1:0:0:0:0:1"))
		.expect("flow is interesting");
	let system = inspector.system();
	assert_eq!(system.connection(conn).status, Status::Expected);
	assert_eq!(
		system.expected_verdict(EntityRef::Connection(conn)),
		Some(Verdict::Pass)
	);
	// the broadcast listener is seen too
	let target = system.connection(conn).target;
	assert_eq!(
		system.expected_verdict(EntityRef::Node(target)),
		Some(Verdict::Pass)
	);
}

#[test]
fn unknown_sender_with_unlimited_activity_is_external() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.hw(dev1, "1:0:0:0:0:1");
	sb.arp(dev1);
	// Device 3 may do whatever it wants, but has no declared ARP
	let dev3 = sb.device("Device 3");
	sb.hw(dev3, "1:0:0:0:0:3");
	sb.external_activity(dev3, ExternalActivity::Unlimited);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let conn = inspector
		.connection(arp_flow("1:0:0:0:0:3"))
		.expect("flow is interesting");
	let system = inspector.system();
	// external-activity policy applies, the connection is not unexpected
	assert_eq!(system.connection(conn).status, Status::External);
	let source_host = system.parent_host(system.connection(conn).source);
	assert_eq!(source_host, dev3);
	assert_eq!(system.node(dev3).status, Status::Expected);
}

#[test]
fn multicast_fan_out_marks_all_listeners() {
	let mut sb = SystemBuilder::new("Test system");
	let sender = sb.device("Sender");
	sb.hw(sender, "1:0:0:0:0:1").ip(sender, "192.168.0.1");
	let mc = sb.broadcast(sender, "224.0.0.251", Protocol::Udp, 5353);
	let listener1 = sb.device("Listener 1");
	sb.ip(listener1, "192.168.0.2");
	let l1 = sb.listen_broadcast(listener1, mc);
	let listener2 = sb.device("Listener 2");
	sb.ip(listener2, "192.168.0.3");
	let l2 = sb.listen_broadcast(listener2, mc);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 5353),
		("1:0:0:0:5:e7", "224.0.0.251", 5353),
	);
	inspector.connection(flow).expect("flow is interesting");
	let system = inspector.system();
	// both declared listener connections are seen by the one broadcast
	for c in [l1, l2] {
		assert_eq!(
			system.expected_verdict(EntityRef::Connection(c)),
			Some(Verdict::Pass),
			"{}",
			system.long_name(EntityRef::Connection(c))
		);
	}
}

#[test]
fn ble_advertisement_creates_endpoints() {
	let sb = SystemBuilder::new("Test system");
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let flow = Flow::Ble(toolsaf::events::BleAdvertisementFlow {
		evidence: evidence(),
		source: HWAddress::new("f0:0:0:0:0:1").unwrap(),
		event_type: 3,
		timestamp: None,
		properties: PropertyMap::new(),
	});
	let conn = inspector.connection(flow).expect("flow is interesting");
	let system = inspector.system();
	let target_host = system.parent_host(system.connection(conn).target);
	// the advertisement target is the administrative pseudo-host
	assert_eq!(
		system.node(target_host).host_type,
		toolsaf::types::HostType::Administrative
	);
}
