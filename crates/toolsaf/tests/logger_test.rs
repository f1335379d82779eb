//! The event log: pairing events with entities and verdicts, flow
//! collection and property sources.

use std::sync::Arc;

use toolsaf::builder::SystemBuilder;
use toolsaf::events::{
	Evidence, EventInterface, EvidenceSource, IPFlow, PropertyEvent,
};
use toolsaf::inspector::Inspector;
use toolsaf::logger::EventLogger;
use toolsaf::model::{EntityRef, NodeId};
use toolsaf::property::properties;
use toolsaf::types::{Protocol, Verdict};

use indexmap::IndexSet;

fn evidence(source: &Arc<EvidenceSource>) -> Evidence {
	Evidence::new(source.clone())
}

fn logger_with_model() -> (EventLogger, NodeId, NodeId) {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.hw(dev1, "1:0:0:0:0:1");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2");
	let service = sb.service(dev2, Protocol::Udp, 1234);
	sb.connect(dev1, service);
	let (system, rules) = sb.finish().unwrap();
	(
		EventLogger::new(Inspector::with_rules(system, rules)),
		dev1,
		service,
	)
}

#[test]
fn flows_are_logged_with_their_connection() {
	let (mut logger, _, _) = logger_with_model();
	let source = Arc::new(EvidenceSource::new("capture"));
	let flow = IPFlow::udp(
		evidence(&source),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn = logger.connection(flow).expect("flow is interesting");

	assert_eq!(logger.logs().len(), 1);
	let log = &logger.logs()[0];
	assert_eq!(log.entity, Some(EntityRef::Connection(conn)));
	assert_eq!(
		log.resolve_verdict(logger.inspector().system()),
		Verdict::Pass
	);

	// a repeated flow is logged but resolves to nothing
	let again = IPFlow::udp(
		evidence(&source),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	assert_eq!(logger.connection(again), None);
	assert_eq!(logger.logs().len(), 2);
	assert_eq!(logger.logs()[1].entity, None);
}

#[test]
fn collect_flows_includes_expected_connections() {
	let (mut logger, _, _) = logger_with_model();
	let source = Arc::new(EvidenceSource::new("capture"));

	// before any flows, the declared connection is listed empty
	let collected = logger.collect_flows();
	assert_eq!(collected.len(), 1);
	assert!(collected.values().next().unwrap().is_empty());

	let flow = IPFlow::udp(
		evidence(&source),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	let conn = logger.connection(flow).expect("flow is interesting");
	let collected = logger.collect_flows();
	let flows = collected.get(&conn).expect("connection listed");
	assert_eq!(flows.len(), 1);
	assert_eq!(
		flows[0].0,
		toolsaf::types::Address::parse("192.168.0.1").unwrap()
	);
	assert_eq!(
		flows[0].1,
		toolsaf::types::Address::parse("192.168.0.2").unwrap()
	);
}

#[test]
fn property_events_resolve_their_verdict() {
	let (mut logger, dev1, _) = logger_with_model();
	let source = Arc::new(EvidenceSource::new("tool"));
	let update = PropertyEvent {
		evidence: evidence(&source),
		entity: EntityRef::Node(dev1),
		key_value: properties::MITM.verdict_explained(Verdict::Fail, "intercepted"),
	};
	logger.property_update(update).expect("entity updated");

	let log = &logger.logs()[0];
	assert_eq!(log.entity, Some(EntityRef::Node(dev1)));
	assert_eq!(
		log.resolve_verdict(logger.inspector().system()),
		Verdict::Fail
	);
	let props = log.get_properties();
	assert!(props.contains(&*properties::MITM));
}

#[test]
fn log_filters_by_entity_and_key() {
	let (mut logger, dev1, service) = logger_with_model();
	let source = Arc::new(EvidenceSource::new("tool"));
	logger.property_update(PropertyEvent {
		evidence: evidence(&source),
		entity: EntityRef::Node(dev1),
		key_value: properties::MITM.verdict(Verdict::Pass),
	});
	logger.property_update(PropertyEvent {
		evidence: evidence(&source),
		entity: EntityRef::Node(service),
		key_value: properties::ENCRYPTION.verdict(Verdict::Pass),
	});

	assert_eq!(logger.get_log(None, None).len(), 2);
	assert_eq!(logger.get_log(Some(EntityRef::Node(dev1)), None).len(), 1);
	assert_eq!(
		logger
			.get_log(None, Some(&properties::ENCRYPTION))
			.len(),
		1
	);
	assert_eq!(logger.get_log(None, Some(&properties::MITM)).len(), 1);
	// filtering by a host includes its services
	let host = logger.inspector().system().parent_host(service);
	assert_eq!(logger.get_log(Some(EntityRef::Node(host)), None).len(), 1);
}

#[test]
fn property_sources_track_the_last_writer() {
	let (mut logger, dev1, _) = logger_with_model();
	let first = Arc::new(EvidenceSource::new("tool A"));
	let second = Arc::new(EvidenceSource::new("tool B"));
	logger.property_update(PropertyEvent {
		evidence: evidence(&first),
		entity: EntityRef::Node(dev1),
		key_value: properties::MITM.verdict(Verdict::Pass),
	});
	logger.property_update(PropertyEvent {
		evidence: evidence(&second),
		entity: EntityRef::Node(dev1),
		key_value: properties::MITM.verdict(Verdict::Fail),
	});

	let mut keys = IndexSet::new();
	keys.insert(properties::MITM.clone());
	let sources = logger.get_property_sources(EntityRef::Node(dev1), &keys);
	assert_eq!(sources.get(&*properties::MITM).unwrap().name, "tool B");
}

#[test]
fn evidence_log_data_groups_by_source() {
	let (mut logger, dev1, _) = logger_with_model();
	let source = Arc::new(EvidenceSource::new("tool"));
	logger.property_update(PropertyEvent {
		evidence: Evidence::with_ref(source.clone(), "line 4"),
		entity: EntityRef::Node(dev1),
		key_value: properties::MITM.verdict_explained(Verdict::Fail, "found it"),
	});

	let by_evidence = logger.collect_evidence_log_data(source.id);
	let data = by_evidence.get("line 4").expect("grouped by reference");
	assert_eq!(data.len(), 1);
	assert_eq!(data[0].verdict, Verdict::Fail);
	assert_eq!(data[0].info, "found it");

	let by_entity = logger.collect_entity_log_data(source.id);
	assert!(by_entity.contains_key(&EntityRef::Node(dev1)));

	// other sources see nothing
	let other = Arc::new(EvidenceSource::new("other"));
	assert!(logger.collect_evidence_log_data(other.id).is_empty());
}

#[test]
fn reset_clears_the_log() {
	let (mut logger, _, _) = logger_with_model();
	let source = Arc::new(EvidenceSource::new("capture"));
	let flow = IPFlow::udp(
		evidence(&source),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	);
	logger.connection(flow);
	assert_eq!(logger.logs().len(), 1);
	logger.reset();
	assert!(logger.logs().is_empty());
}
