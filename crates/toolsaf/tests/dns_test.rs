//! DNS name learning through the inspector.

use std::sync::Arc;

use toolsaf::builder::SystemBuilder;
use toolsaf::events::{Evidence, EventInterface, EvidenceSource, IPFlow, NameEvent};
use toolsaf::inspector::Inspector;
use toolsaf::model::EntityRef;
use toolsaf::types::{Address, DnsName, ExternalActivity, Protocol, Status, Verdict};

fn evidence() -> Evidence {
	Evidence::new(Arc::new(EvidenceSource::new("DNS capture")))
}

#[test]
fn name_binds_to_existing_host() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.ip(dev1, "192.168.0.1").hw(dev1, "1:0:0:0:0:1");
	let dns_host = sb.backend("Name server");
	sb.ip(dns_host, "192.168.0.5");
	let dns = sb.dns_server(dns_host, false);
	sb.connect(dev1, dns);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	// an unexpected host appears from traffic
	let flow = IPFlow::udp(
		evidence(),
		("1:0:0:0:0:1", "192.168.0.1", 4321),
		("2:0:0:0:0:2", "1.0.0.2", 443),
	);
	inspector.connection(flow).expect("flow is interesting");
	let system = inspector.system();
	let host = system
		.find_endpoint(&Address::parse("1.0.0.2").unwrap(), None)
		.map(|n| system.parent_host(n))
		.expect("host created");
	assert_eq!(system.node(host).name.as_str(), "1.0.0.2");

	// the DNS answer binds the name to the same host
	let event = NameEvent {
		evidence: evidence(),
		service: Some(dns),
		name: Some(DnsName::new("target.org").unwrap()),
		tag: None,
		address: Some(Address::parse("1.0.0.2").unwrap()),
		peers: Vec::new(),
	};
	let named = inspector.name(event).expect("name learned");
	assert_eq!(named, host);
	let system = inspector.system();
	assert_eq!(system.node(host).name.as_str(), "target.org");
	assert!(system
		.node(host)
		.addresses
		.contains(&Address::parse("1.0.0.2").unwrap()));
	assert!(system
		.node(host)
		.addresses
		.contains(&Address::parse("target.org|name").unwrap()));
	// no new host was created for the name
	let named_again = system.find_endpoint(&Address::parse("target.org|name").unwrap(), None);
	assert_eq!(named_again, Some(host));
}

#[test]
fn new_name_with_strict_peer_fails() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.ip(dev1, "192.168.0.1");
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	// Device 1 is banned from external activity and asks an unknown name
	let event = NameEvent {
		evidence: evidence(),
		service: None,
		name: Some(DnsName::new("rogue.example.com").unwrap()),
		tag: None,
		address: None,
		peers: vec![dev1],
	};
	let host = inspector.name(event).expect("host created");
	let system = inspector.system();
	assert_eq!(system.node(host).status, Status::Unexpected);
	assert_eq!(
		system.expected_verdict(EntityRef::Node(host)),
		Some(Verdict::Fail)
	);
}

#[test]
fn new_name_with_open_peers_is_external() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.ip(dev1, "192.168.0.1");
	sb.external_activity(dev1, ExternalActivity::Open);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let event = NameEvent {
		evidence: evidence(),
		service: None,
		name: Some(DnsName::new("cdn.example.com").unwrap()),
		tag: None,
		address: None,
		peers: vec![dev1],
	};
	let host = inspector.name(event).expect("host created");
	let system = inspector.system();
	assert_eq!(system.node(host).status, Status::External);
	assert_eq!(
		system.expected_verdict(EntityRef::Node(host)),
		Some(Verdict::Incon)
	);
}

#[test]
fn explicitly_ignored_names_do_not_fail() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.ip(dev1, "192.168.0.1");
	sb.ignore_name_requests(dev1, "telemetry.example.com");
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let event = NameEvent {
		evidence: evidence(),
		service: None,
		name: Some(DnsName::new("telemetry.example.com").unwrap()),
		tag: None,
		address: None,
		peers: vec![dev1],
	};
	let host = inspector.name(event).expect("host created");
	let system = inspector.system();
	// the strict peer does not count, the host goes external
	assert_eq!(system.node(host).status, Status::External);
}

#[test]
fn captive_portal_answer_is_not_bound() {
	let mut sb = SystemBuilder::new("Test system");
	let gw = sb.device("Gateway");
	sb.ip(gw, "192.168.0.1");
	let dns = sb.dns_server(gw, true);
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	// the portal answers with its own address; the name must not bind it
	let event = NameEvent {
		evidence: evidence(),
		service: Some(dns),
		name: Some(DnsName::new("portal.example.com").unwrap()),
		tag: None,
		address: Some(Address::parse("192.168.0.1").unwrap()),
		peers: Vec::new(),
	};
	let host = inspector.name(event).expect("host created");
	let system = inspector.system();
	assert_ne!(host, gw);
	assert!(!system
		.node(gw)
		.addresses
		.contains(&Address::parse("portal.example.com|name").unwrap()));
}

#[test]
fn reverse_dns_resolves_to_ip_host() {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.ip(dev1, "192.168.0.4");
	let (system, _) = sb.finish().unwrap();
	let mut inspector = Inspector::new(system);

	let event = NameEvent {
		evidence: evidence(),
		service: None,
		name: Some(DnsName::new("4.0.168.192.in-addr.arpa").unwrap()),
		tag: None,
		address: None,
		peers: Vec::new(),
	};
	// nothing was learned, the event resolves to the existing host
	assert_eq!(inspector.name(event), None);
	let system = inspector.system();
	assert!(!system
		.node(dev1)
		.addresses
		.iter()
		.any(|a| matches!(a, Address::Name(_))));
}

#[test]
fn tags_never_invent_hosts() {
	let (system, _) = SystemBuilder::new("Test system").finish().unwrap();
	let mut inspector = Inspector::new(system);
	let event = NameEvent {
		evidence: evidence(),
		service: None,
		name: None,
		tag: Some(toolsaf::types::EntityTag::new("NoSuchDevice")),
		address: None,
		peers: Vec::new(),
	};
	assert_eq!(inspector.name(event), None);
	assert!(inspector.system().hosts().is_empty());
}
