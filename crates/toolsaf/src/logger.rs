//! Intercepts events and keeps a log pairing each event with the entity
//! it affected and the resolved verdict.

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use toolsaf_core::prelude::*;

use crate::events::{
	Event, EventInterface, EvidenceSource, Flow, HostScan, NameEvent, PropertyAddressEvent,
	PropertyEvent, ServiceScan, SourceId,
};
use crate::inspector::Inspector;
use crate::model::{ConnectionId, EntityRef, IoTSystem, ModelChange, NodeId};
use crate::property::{properties, PropertyKey, PropertyValue};
use crate::types::{Address, Verdict};

/// One stored event with its inspection outcome.
#[derive(Debug)]
pub struct LoggingEvent {
	pub event: Event,
	pub entity: Option<EntityRef>,
	/// The final property value set during inspection; the last one wins.
	pub property_value: Option<(PropertyKey, PropertyValue)>,
	verdict: Verdict,
}

impl LoggingEvent {
	fn new(event: Event) -> LoggingEvent {
		LoggingEvent {
			event,
			entity: None,
			property_value: None,
			verdict: Verdict::Incon,
		}
	}

	fn pick_status_verdict(&mut self, system: &IoTSystem, entity: EntityRef) {
		self.entity = Some(entity);
		self.verdict = properties::EXPECTED
			.get_verdict(system.properties(entity))
			.unwrap_or(Verdict::Incon);
	}

	/// Verdict of this log entry: the entity status verdict when
	/// conclusive, otherwise the verdict of the property value set.
	pub fn resolve_verdict(&self, system: &IoTSystem) -> Verdict {
		if self.verdict != Verdict::Incon {
			return self.verdict;
		}
		if let Some((_, value)) = &self.property_value {
			match value {
				PropertyValue::Verdict(v) => return v.verdict,
				PropertyValue::Set(s) => {
					if let Some(entity) = self.entity {
						return s.get_overall_verdict(system.properties(entity));
					}
				},
				PropertyValue::Release(_) => {},
			}
		}
		Verdict::Incon
	}

	/// Implicit and explicit properties of the entry.
	pub fn get_properties(&self) -> IndexSet<PropertyKey> {
		let mut r = IndexSet::new();
		if let Some((key, _)) = &self.property_value {
			r.insert(key.clone());
		}
		if let Some(key) = self.event.property_key() {
			r.insert(key.clone());
		}
		if r.is_empty() {
			r.insert(properties::EXPECTED.clone()); // the default property
		}
		r
	}
}

/// Data collected from log events for reporting.
#[derive(Debug)]
pub struct LoggedData {
	pub verdict: Verdict,
	pub info: String,
	pub properties: Vec<PropertyKey>,
}

/// Event logger wrapping the inspector.
pub struct EventLogger {
	inspector: Inspector,
	logs: Vec<LoggingEvent>,
}

impl EventLogger {
	pub fn new(inspector: Inspector) -> EventLogger {
		EventLogger {
			inspector,
			logs: Vec::new(),
		}
	}

	/// Reset the log and the inspected system.
	pub fn reset(&mut self) {
		self.logs.clear();
		self.inspector.reset();
	}

	pub fn logs(&self) -> &[LoggingEvent] {
		&self.logs
	}

	pub fn inspector(&self) -> &Inspector {
		&self.inspector
	}

	/// Capture the model changes of the last call: the final property
	/// value set during inspection goes to the log entry.
	fn capture_changes(&mut self, log_index: usize) {
		let changes = self.inspector.system_mut().take_changes();
		let last_property = changes.into_iter().rev().find_map(|c| match c {
			ModelChange::PropertyChange { key, value, .. } => Some((key, value)),
			_ => None,
		});
		if let Some(kv) = last_property {
			self.logs[log_index].property_value = Some(kv);
		}
	}

	/// Log, possibly filtered by entity (with children) and property key.
	pub fn get_log(
		&self,
		entity: Option<EntityRef>,
		key: Option<&PropertyKey>,
	) -> Vec<&LoggingEvent> {
		let mut ent_set: IndexSet<EntityRef> = IndexSet::new();
		if let Some(e) = entity {
			let mut queue = vec![e];
			while let Some(n) = queue.pop() {
				if ent_set.insert(n) {
					queue.extend(self.inspector.system().entity_children(n));
				}
			}
		}
		self.logs
			.iter()
			.filter(|lo| {
				if entity.is_some() {
					match lo.entity {
						Some(e) if ent_set.contains(&e) => {},
						_ => return false,
					}
				}
				if let Some(k) = key {
					if !lo.get_properties().contains(k) {
						return false;
					}
				}
				true
			})
			.collect()
	}

	/// Flows per connection; expected connections with no flows are
	/// included with an empty list.
	pub fn collect_flows(&self) -> IndexMap<ConnectionId, Vec<(Address, Address, &Flow)>> {
		let mut r: IndexMap<ConnectionId, Vec<(Address, Address, &Flow)>> = IndexMap::new();
		for c in self.inspector.system().get_connections() {
			r.entry(c).or_default(); // expected connections without flows
		}
		for lo in &self.logs {
			let Event::Flow(flow) = &lo.event else {
				continue;
			};
			if lo.property_value.is_some() {
				continue; // only pure flows, not property updates
			}
			let Some(EntityRef::Connection(c)) = lo.entity else {
				continue;
			};
			r.entry(c).or_default().push((
				flow.side_address(false),
				flow.side_address(true),
				flow,
			));
		}
		r
	}

	/// The evidence source that last wrote each of the given properties of
	/// an entity.
	pub fn get_property_sources(
		&self,
		entity: EntityRef,
		keys: &IndexSet<PropertyKey>,
	) -> IndexMap<PropertyKey, Arc<EvidenceSource>> {
		let mut r = IndexMap::new();
		for lo in &self.logs {
			if lo.entity != Some(entity) {
				continue;
			}
			for p in lo.get_properties() {
				if keys.contains(&p) {
					r.insert(p, lo.event.evidence().source.clone());
				}
			}
		}
		r
	}

	/// All property sources with the entities they wrote.
	pub fn get_all_property_sources(
		&self,
	) -> IndexMap<PropertyKey, IndexMap<SourceId, Vec<EntityRef>>> {
		let mut r: IndexMap<PropertyKey, IndexMap<SourceId, Vec<EntityRef>>> = IndexMap::new();
		for lo in &self.logs {
			let Some(entity) = lo.entity else { continue };
			for p in lo.get_properties() {
				r.entry(p)
					.or_default()
					.entry(lo.event.evidence().source.id)
					.or_default()
					.push(entity);
			}
		}
		r
	}

	/// Log data of one evidence source grouped per evidence reference.
	pub fn collect_evidence_log_data(
		&self,
		source: SourceId,
	) -> IndexMap<String, Vec<LoggedData>> {
		let mut r: IndexMap<String, Vec<LoggedData>> = IndexMap::new();
		for lo in &self.logs {
			let evidence = lo.event.evidence();
			if evidence.source.id != source {
				continue;
			}
			let properties: Vec<PropertyKey> = lo.get_properties().into_iter().sorted().collect();
			r.entry(evidence.tail_ref.to_string())
				.or_default()
				.push(LoggedData {
					verdict: lo.resolve_verdict(self.inspector.system()),
					info: lo.event.info(),
					properties,
				});
		}
		r
	}

	/// Log data of one evidence source grouped per entity.
	pub fn collect_entity_log_data(
		&self,
		source: SourceId,
	) -> IndexMap<EntityRef, Vec<LoggedData>> {
		let mut r: IndexMap<EntityRef, Vec<LoggedData>> = IndexMap::new();
		for lo in &self.logs {
			if lo.event.evidence().source.id != source {
				continue;
			}
			let Some(entity) = lo.entity else { continue };
			let properties: Vec<PropertyKey> = lo.get_properties().into_iter().sorted().collect();
			r.entry(entity).or_default().push(LoggedData {
				verdict: lo.resolve_verdict(self.inspector.system()),
				info: lo.event.info(),
				properties,
			});
		}
		r
	}
}

impl EventInterface for EventLogger {
	fn system(&self) -> &IoTSystem {
		self.inspector.system()
	}

	fn connection(&mut self, flow: Flow) -> Option<ConnectionId> {
		let i = self.logs.len();
		self.logs.push(LoggingEvent::new(Event::Flow(flow.clone())));
		let e = self.inspector.connection(flow);
		self.capture_changes(i);
		let e = e?;
		let system = self.inspector.system();
		self.logs[i].pick_status_verdict(system, EntityRef::Connection(e));
		Some(e)
	}

	fn name(&mut self, event: NameEvent) -> Option<NodeId> {
		let i = self.logs.len();
		self.logs.push(LoggingEvent::new(Event::Name(event.clone())));
		let e = self.inspector.name(event);
		self.capture_changes(i);
		let e = e?;
		let system = self.inspector.system();
		self.logs[i].pick_status_verdict(system, EntityRef::Node(e));
		Some(e)
	}

	fn property_update(&mut self, update: PropertyEvent) -> Option<EntityRef> {
		let i = self.logs.len();
		self.logs
			.push(LoggingEvent::new(Event::Property(update.clone())));
		let e = self.inspector.property_update(update);
		self.capture_changes(i);
		self.logs[i].entity = e;
		e
	}

	fn property_address_update(&mut self, update: PropertyAddressEvent) -> Option<EntityRef> {
		let i = self.logs.len();
		self.logs
			.push(LoggingEvent::new(Event::PropertyAddress(update.clone())));
		let e = self.inspector.property_address_update(update);
		self.capture_changes(i);
		self.logs[i].entity = e;
		e
	}

	fn service_scan(&mut self, scan: ServiceScan) -> Option<NodeId> {
		let i = self.logs.len();
		self.logs
			.push(LoggingEvent::new(Event::ServiceScan(scan.clone())));
		let e = self.inspector.service_scan(scan);
		self.capture_changes(i);
		let e = e?;
		let system = self.inspector.system();
		self.logs[i].pick_status_verdict(system, EntityRef::Node(e));
		Some(e)
	}

	fn host_scan(&mut self, scan: HostScan) -> Option<NodeId> {
		let i = self.logs.len();
		self.logs
			.push(LoggingEvent::new(Event::HostScan(scan.clone())));
		let e = self.inspector.host_scan(scan);
		self.capture_changes(i);
		let e = e?;
		let system = self.inspector.system();
		self.logs[i].pick_status_verdict(system, EntityRef::Node(e));
		Some(e)
	}
}
