//! Matching preferences: weight ordering, the refusal of accidental
//! connections, direction bias and wildcard hosts.

use std::sync::Arc;

use toolsaf::builder::SystemBuilder;
use toolsaf::events::{Evidence, EventInterface, EvidenceSource, IPFlow};
use toolsaf::inspector::Inspector;
use toolsaf::types::{Protocol, Status};

fn evidence() -> Evidence {
	Evidence::new(Arc::new(EvidenceSource::new("Test capture")))
}

#[test]
fn expected_endpoints_beat_accidental_connections() {
	let mut sb = SystemBuilder::new("Test system");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2").hw(dev2, "1:0:0:0:0:2");
	let service = sb.service(dev2, Protocol::Udp, 1234);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	// a stray flow to another port makes an unexpected connection
	let stray = IPFlow::udp(
		evidence(),
		("9:0:0:0:0:9", "192.168.0.9", 40000),
		("1:0:0:0:0:2", "192.168.0.2", 9999),
	);
	let conn1 = inspector.connection(stray).expect("flow is interesting");
	assert_eq!(
		inspector.system().connection(conn1).status,
		Status::Unexpected
	);

	// the same source then hits the declared service; the expected
	// endpoint wins over the accidental connection
	let hit = IPFlow::udp(
		evidence(),
		("9:0:0:0:0:9", "192.168.0.9", 40001),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn2 = inspector.connection(hit).expect("flow is interesting");
	assert_ne!(conn1, conn2);
	assert_eq!(inspector.system().connection(conn2).target, service);
}

#[test]
fn request_direction_wins_symmetric_ties() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.ip(dev1, "192.168.0.1");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2");
	let svc1 = sb.service(dev1, Protocol::Udp, 1234);
	let svc2 = sb.service(dev2, Protocol::Udp, 1234);
	let a = sb.connect(dev1, svc2);
	let b = sb.connect(dev2, svc1);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	// the same ports on both sides, only direction disambiguates
	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 1234),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");
	assert_eq!(conn, a);
	assert_ne!(conn, b);
	// seen as a request, so the source was marked
	assert_eq!(
		inspector
			.system()
			.expected_verdict(toolsaf::model::EntityRef::Node(dev1)),
		Some(toolsaf::types::Verdict::Pass)
	);
}

#[test]
fn wildcard_host_matches_only_its_service_ports() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.ip(dev1, "192.168.0.1");
	let cloud = sb.any("Cloud");
	let svc = sb.service(cloud, Protocol::Udp, 1234);
	sb.connect(dev1, svc);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	// an unknown external target on the declared port is the cloud
	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 40000),
		("8:0:0:0:0:8", "8.8.8.8", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");
	let system = inspector.system();
	assert_eq!(system.connection(conn).target, svc);
	assert_eq!(system.connection(conn).status, Status::Expected);

	// a different port does not match the wildcard service
	let other = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 40001),
		("9:0:0:0:0:9", "9.9.9.9", 9999),
	);
	let conn2 = inspector.connection(other).expect("flow is interesting");
	let system = inspector.system();
	assert_ne!(system.connection(conn2).target, svc);
	assert_eq!(system.connection(conn2).status, Status::Unexpected);
}

#[test]
fn loopback_flows_match_as_requests() {
	let mut sb = SystemBuilder::new("Test system");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2").hw(dev2, "1:0:0:0:0:2");
	let service = sb.service(dev2, Protocol::Udp, 1234);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	// both ends resolve to the same host
	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:2", "192.168.0.2", 5555),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn = inspector.connection(flow).expect("flow is interesting");
	let system = inspector.system();
	let c = system.connection(conn);
	assert_eq!(system.parent_host(c.source), system.parent_host(c.target));
	// first end matched the declared service
	assert_eq!(c.source, service);
}

#[test]
fn repeated_observation_is_memoized_per_source() {
	let mut sb = SystemBuilder::new("Test system");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2");
	sb.service(dev2, Protocol::Udp, 1234);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let source_a = Arc::new(EvidenceSource::new("capture A"));
	let source_b = Arc::new(EvidenceSource::new("capture B"));
	let flow = |source: &Arc<EvidenceSource>| {
		IPFlow::udp(
			Evidence::new(source.clone()),
			("9:0:0:0:0:9", "192.168.0.9", 40000),
			("1:0:0:0:0:2", "192.168.0.2", 1234),
		)
	};

	let conn = inspector.connection(flow(&source_a)).expect("interesting");
	// the same flow from another source resolves to the same connection
	assert_eq!(inspector.connection(flow(&source_b)), None);
	let hosts = inspector.system().hosts().len();
	assert_eq!(inspector.connection(flow(&source_a)), None);
	assert_eq!(inspector.system().hosts().len(), hosts);
	let _ = conn;
}
