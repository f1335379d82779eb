//! Batch import: directory walking, 00meta.json handling and the
//! serialized-events adapter.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use toolsaf::batch::{BatchImporter, LabelFilter};
use toolsaf::builder::SystemBuilder;
use toolsaf::events::{Event, EventInterface, Evidence, EvidenceSource, IPFlow};
use toolsaf::inspector::Inspector;
use toolsaf::logger::EventLogger;
use toolsaf::model::{EntityRef, IoTSystem, NodeId};
use toolsaf::serializer::EventSerializer;
use toolsaf::types::{Protocol, Status, Verdict};

fn model() -> (IoTSystem, NodeId, NodeId) {
	let mut sb = SystemBuilder::new("Test system");
	let dev1 = sb.device("Device 1");
	sb.hw(dev1, "1:0:0:0:0:1");
	let dev2 = sb.device("Device 2");
	sb.ip(dev2, "192.168.0.2");
	let service = sb.service(dev2, Protocol::Udp, 1234);
	sb.connect(dev1, service);
	let (system, _) = sb.finish().unwrap();
	(system, dev1, service)
}

/// Serialize one flow into an events file under the directory.
fn write_events_dir(dir: &std::path::Path, label: &str) {
	let (system, _, _) = model();
	let source = Arc::new(EvidenceSource::new("capture"));
	let flow = Event::Flow(IPFlow::udp(
		Evidence::new(source),
		("1:0:0:0:0:1", "192.168.0.1", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	));
	let mut ser = EventSerializer::new(&system);
	let rows: Vec<String> = ser
		.write_event(&flow)
		.into_iter()
		.map(|r| r.to_string())
		.collect();
	fs::write(dir.join("capture.json"), rows.join("\n")).unwrap();
	fs::write(
		dir.join("00meta.json"),
		format!(r#"{{"label": "{label}", "file_type": "events-json"}}"#),
	)
	.unwrap();
}

#[test]
fn batch_import_feeds_the_pipeline() {
	let tmp = TempDir::new().unwrap();
	write_events_dir(tmp.path(), "pcap");

	let (system, _, service) = model();
	let inspector = Inspector::new(system);
	let mut logger = EventLogger::new(inspector);
	let mut importer = BatchImporter::new(&mut logger, LabelFilter::new("").unwrap());
	importer.import_batch(tmp.path()).unwrap();

	// the evidence was recorded under its label
	assert_eq!(importer.evidence.len(), 1);
	let sources = importer.evidence.get("pcap").unwrap();
	assert_eq!(sources.len(), 1);
	assert_eq!(sources[0].name, "Event capture");

	// and the flow went through inspection
	let system = logger.inspector().system();
	assert_eq!(
		system.expected_verdict(EntityRef::Node(service)),
		Some(Verdict::Pass)
	);
	assert_eq!(logger.logs().len(), 1);
}

#[test]
fn label_filter_skips_processing_but_keeps_evidence() {
	let tmp = TempDir::new().unwrap();
	write_events_dir(tmp.path(), "slow");

	let (system, _, service) = model();
	let inspector = Inspector::new(system);
	let mut logger = EventLogger::new(inspector);
	let mut importer = BatchImporter::new(&mut logger, LabelFilter::new("^slow").unwrap());
	importer.import_batch(tmp.path()).unwrap();

	// the source is known but produced no events
	assert_eq!(importer.evidence.get("slow").unwrap().len(), 1);
	assert!(logger.logs().is_empty());
	let system = logger.inspector().system();
	assert_eq!(
		system.expected_verdict(EntityRef::Node(service)),
		Some(Verdict::Incon)
	);
}

#[test]
fn meta_overlays_apply_to_matching() {
	let tmp = TempDir::new().unwrap();
	// the capture observed the device under a different HW address
	let (system, _, _) = model();
	let source = Arc::new(EvidenceSource::new("capture"));
	let flow = Event::Flow(IPFlow::udp(
		Evidence::new(source),
		("2:0:0:0:0:9", "192.168.0.7", 1100),
		("1:0:0:0:0:2", "192.168.0.2", 1234),
	));
	let mut ser = EventSerializer::new(&system);
	let rows: Vec<String> = ser
		.write_event(&flow)
		.into_iter()
		.map(|r| r.to_string())
		.collect();
	fs::write(tmp.path().join("capture.json"), rows.join("\n")).unwrap();
	fs::write(
		tmp.path().join("00meta.json"),
		r#"{"label": "pcap", "file_type": "events-json",
		    "addresses": {"2:0:0:0:0:9|hw": "Device_1"}}"#,
	)
	.unwrap();

	let (system, dev1, _) = model();
	let inspector = Inspector::new(system);
	let mut logger = EventLogger::new(inspector);
	let mut importer = BatchImporter::new(&mut logger, LabelFilter::new("").unwrap());
	importer.import_batch(tmp.path()).unwrap();

	let system = logger.inspector().system();
	// the overlay made the unknown address match the declared device
	assert_eq!(
		system.expected_verdict(EntityRef::Node(dev1)),
		Some(Verdict::Pass)
	);
	// no unexpected host appeared
	assert!(system
		.hosts()
		.iter()
		.all(|h| system.node(*h).status != Status::Unexpected));
}

#[test]
fn nested_directories_are_walked() {
	let tmp = TempDir::new().unwrap();
	let sub = tmp.path().join("captures");
	fs::create_dir(&sub).unwrap();
	write_events_dir(&sub, "pcap");
	// hidden and backup files are skipped
	fs::write(tmp.path().join(".hidden"), "x").unwrap();
	fs::write(tmp.path().join("notes~"), "x").unwrap();

	let (system, _, _) = model();
	let inspector = Inspector::new(system);
	let mut logger = EventLogger::new(inspector);
	let mut importer = BatchImporter::new(&mut logger, LabelFilter::new("").unwrap());
	importer.import_batch(tmp.path()).unwrap();
	assert_eq!(logger.logs().len(), 1);
}
