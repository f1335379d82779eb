//! Event serialization: evidence sources and events as a stream of JSON
//! rows, sources written before the events that reference them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::warn;

use super::{get_str, make_id};
use crate::errors::ParseError;
use crate::events::{
	BleAdvertisementFlow, EthernetFlow, Event, Evidence, EvidenceSource, Flow, HostScan, IPFlow,
	NameEvent, PropertyAddressEvent, PropertyEvent, ServiceScan, SourceId,
};
use crate::model::{EntityRef, IoTSystem};
use crate::property::{PropertyKey, PropertyMap, PropertyValue};
use crate::types::{Address, DnsName, EntityTag, HWAddress, SystemAddress};
use toolsaf_core::strng;

/// Writes events into JSON rows, prefixing each new evidence source.
pub struct EventSerializer<'a> {
	system: &'a IoTSystem,
	counter: usize,
	source_ids: HashMap<SourceId, String>,
}

impl<'a> EventSerializer<'a> {
	pub fn new(system: &'a IoTSystem) -> EventSerializer<'a> {
		EventSerializer {
			system,
			counter: 0,
			source_ids: HashMap::new(),
		}
	}

	/// Write one event, prefixed by its source when not yet written.
	pub fn write_event(&mut self, event: &Event) -> Vec<Value> {
		let mut rows = Vec::new();
		let source = &event.evidence().source;
		if !self.source_ids.contains_key(&source.id) {
			rows.push(self.write_source(source));
		}
		rows.push(self.event_row(event));
		rows
	}

	fn write_source(&mut self, source: &Arc<EvidenceSource>) -> Value {
		let id = make_id(&mut self.counter);
		self.source_ids.insert(source.id, id.clone());
		let mut row = Map::new();
		row.insert("id".into(), json!(id));
		row.insert("type".into(), json!("source"));
		row.insert("name".into(), json!(source.name.as_str()));
		row.insert("label".into(), json!(source.label.as_str()));
		row.insert("target".into(), json!(source.target.as_str()));
		row.insert("base_ref".into(), json!(source.base_ref.as_str()));
		if let Some(ts) = &source.timestamp {
			row.insert("timestamp".into(), json!(ts.to_rfc3339()));
		}
		let mut add_map = Vec::new();
		for (address, entity) in &source.address_map {
			let tag = self.system.system_address(EntityRef::Node(*entity));
			if tag.parseable_value() == address.parseable_value() {
				continue; // pointless to store
			}
			add_map.push(json!({
				"address": address.parseable_value(),
				"entity": tag.parseable_value(),
			}));
		}
		if !add_map.is_empty() {
			row.insert("address_map".into(), json!(add_map));
		}
		Value::Object(row)
	}

	fn evidence_fields(&self, evidence: &Evidence, row: &mut Map<String, Value>) {
		if let Some(id) = self.source_ids.get(&evidence.source.id) {
			row.insert("source-id".into(), json!(id));
		}
		if !evidence.tail_ref.is_empty() {
			row.insert("ref".into(), json!(evidence.tail_ref.as_str()));
		}
	}

	fn properties_fields(properties: &PropertyMap, row: &mut Map<String, Value>) {
		if properties.is_empty() {
			return;
		}
		let mut map = Map::new();
		for (k, v) in properties {
			map.insert(k.get_name().to_string(), v.to_json());
		}
		row.insert("properties".into(), Value::Object(map));
	}

	fn timestamp_field(timestamp: Option<DateTime<Utc>>, row: &mut Map<String, Value>) {
		if let Some(ts) = timestamp {
			row.insert("timestamp".into(), json!(ts.to_rfc3339()));
		}
	}

	fn event_row(&mut self, event: &Event) -> Value {
		let mut row = Map::new();
		self.evidence_fields(event.evidence(), &mut row);
		match event {
			Event::Flow(Flow::Ethernet(f)) => {
				row.insert("type".into(), json!("ethernet-flow"));
				row.insert("protocol".into(), json!(f.protocol.as_str()));
				row.insert("source".into(), json!(f.source.to_string()));
				row.insert("target".into(), json!(f.target.to_string()));
				if f.payload >= 0 {
					row.insert("payload".into(), json!(f.payload));
				}
				Self::timestamp_field(f.timestamp, &mut row);
				Self::properties_fields(&f.properties, &mut row);
			},
			Event::Flow(Flow::Ip(f)) => {
				row.insert("type".into(), json!("ip-flow"));
				row.insert("protocol".into(), json!(f.protocol.as_str()));
				row.insert(
					"source".into(),
					json!([f.source.0.to_string(), f.source.1.to_string(), f.source.2]),
				);
				row.insert(
					"target".into(),
					json!([f.target.0.to_string(), f.target.1.to_string(), f.target.2]),
				);
				Self::timestamp_field(f.timestamp, &mut row);
				Self::properties_fields(&f.properties, &mut row);
			},
			Event::Flow(Flow::Ble(f)) => {
				row.insert("type".into(), json!("ble-advertisement-flow"));
				row.insert("source".into(), json!(f.source.to_string()));
				row.insert("event_type".into(), json!(f.event_type));
				Self::timestamp_field(f.timestamp, &mut row);
				Self::properties_fields(&f.properties, &mut row);
			},
			Event::ServiceScan(s) => {
				row.insert("type".into(), json!("service-scan"));
				row.insert(
					"address".into(),
					json!(Address::Endpoint(s.endpoint.clone()).parseable_value()),
				);
				row.insert("service_name".into(), json!(s.service_name.as_str()));
			},
			Event::HostScan(s) => {
				row.insert("type".into(), json!("host-scan"));
				row.insert("host".into(), json!(s.host.parseable_value()));
				let endpoints: Vec<String> = s
					.endpoints
					.iter()
					.map(|e| Address::Endpoint(e.clone()).parseable_value())
					.collect();
				row.insert("endpoints".into(), json!(endpoints));
			},
			Event::Property(p) => {
				row.insert("type".into(), json!("property-event"));
				let address = self.system.system_address(p.entity).parseable_value();
				row.insert("address".into(), json!(address));
				Self::key_value_fields(&p.key_value, &mut row);
			},
			Event::PropertyAddress(p) => {
				row.insert("type".into(), json!("property-address-event"));
				row.insert("address".into(), json!(p.address.parseable_value()));
				Self::key_value_fields(&p.key_value, &mut row);
			},
			Event::Name(n) => {
				row.insert("type".into(), json!("name-event"));
				if let Some(name) = &n.name {
					row.insert("name".into(), json!(name.to_string()));
				}
				if let Some(tag) = &n.tag {
					row.insert("tag".into(), json!(tag.to_string()));
				}
				if let Some(service) = n.service {
					let address = self
						.system
						.system_address(EntityRef::Node(service))
						.parseable_value();
					row.insert("service".into(), json!(address));
				}
				if let Some(address) = &n.address {
					row.insert("address".into(), json!(address.parseable_value()));
				}
				let peers: Vec<String> = n
					.peers
					.iter()
					.map(|p| {
						self.system
							.system_address(EntityRef::Node(*p))
							.parseable_value()
					})
					.collect();
				if !peers.is_empty() {
					row.insert("peers".into(), json!(peers));
				}
			},
		}
		Value::Object(row)
	}

	fn key_value_fields(key_value: &(PropertyKey, PropertyValue), row: &mut Map<String, Value>) {
		row.insert("key".into(), json!(key_value.0.get_name().as_str()));
		let mut value_fields = Map::new();
		key_value.1.write_json(&mut value_fields);
		row.extend(value_fields);
	}
}

/// Reads events back from JSON rows against a system model.
pub struct EventReader<'a> {
	system: &'a IoTSystem,
	sources: HashMap<String, Arc<EvidenceSource>>,
}

impl<'a> EventReader<'a> {
	pub fn new(system: &'a IoTSystem) -> EventReader<'a> {
		EventReader {
			system,
			sources: HashMap::new(),
		}
	}

	/// Read one row; source rows return `None` after registering the
	/// source. Unknown event types are skipped with a warning.
	pub fn read_row(&mut self, row: &Value) -> Result<Option<Event>, ParseError> {
		let type_name = get_str(row, "type").unwrap_or("");
		if type_name == "source" {
			self.read_source(row)?;
			return Ok(None);
		}
		let evidence = self.read_evidence(row)?;
		let event = match type_name {
			"ethernet-flow" => Some(self.read_ethernet_flow(row, evidence)?),
			"ip-flow" => Some(self.read_ip_flow(row, evidence)?),
			"ble-advertisement-flow" => Some(self.read_ble_flow(row, evidence)?),
			"service-scan" => Some(self.read_service_scan(row, evidence)?),
			"host-scan" => Some(self.read_host_scan(row, evidence)?),
			"property-event" => self.read_property_event(row, evidence)?,
			"property-address-event" => Some(self.read_property_address_event(row, evidence)?),
			"name-event" => Some(self.read_name_event(row, evidence)?),
			other => {
				warn!(type_name = other, "skipping unknown event type");
				None
			},
		};
		Ok(event)
	}

	fn read_source(&mut self, row: &Value) -> Result<(), ParseError> {
		let mut source = EvidenceSource::new(get_str(row, "name").unwrap_or("?"));
		source.label = strng::new(get_str(row, "label").unwrap_or(""));
		source.target = strng::new(get_str(row, "target").unwrap_or(""));
		source.base_ref = strng::new(get_str(row, "base_ref").unwrap_or(""));
		if let Some(ts) = get_str(row, "timestamp") {
			source.timestamp = DateTime::parse_from_rfc3339(ts)
				.map(|t| Some(t.with_timezone(&Utc)))
				.map_err(|_| ParseError::Serialized(format!("bad timestamp '{ts}'")))?;
		}
		if let Some(map) = row.get("address_map").and_then(Value::as_array) {
			for entry in map {
				let address = Address::parse_endpoint(get_str(entry, "address").unwrap_or(""))?;
				let system_address =
					SystemAddress::parse(get_str(entry, "entity").unwrap_or(""))?;
				match self.system.find_entity(&system_address) {
					Some(EntityRef::Node(n)) => {
						source.address_map.insert(address, n);
					},
					_ => {
						return Err(ParseError::Serialized(format!(
							"cannot resolve entity by {system_address}"
						)))
					},
				}
			}
		}
		if let Some(id) = get_str(row, "id") {
			self.sources.insert(id.to_string(), Arc::new(source));
		}
		Ok(())
	}

	fn read_evidence(&self, row: &Value) -> Result<Evidence, ParseError> {
		let source_id = get_str(row, "source-id")
			.ok_or_else(|| ParseError::Serialized("event without source-id".to_string()))?;
		let source = self
			.sources
			.get(source_id)
			.ok_or_else(|| ParseError::Serialized(format!("unknown source '{source_id}'")))?;
		Ok(Evidence::with_ref(
			source.clone(),
			get_str(row, "ref").unwrap_or(""),
		))
	}

	fn read_timestamp(row: &Value) -> Result<Option<DateTime<Utc>>, ParseError> {
		match get_str(row, "timestamp") {
			None => Ok(None),
			Some(ts) => DateTime::parse_from_rfc3339(ts)
				.map(|t| Some(t.with_timezone(&Utc)))
				.map_err(|_| ParseError::Serialized(format!("bad timestamp '{ts}'"))),
		}
	}

	fn read_properties(row: &Value) -> Result<PropertyMap, ParseError> {
		let mut properties = PropertyMap::new();
		if let Some(obj) = row.get("properties").and_then(Value::as_object) {
			for (name, value) in obj {
				properties.insert(PropertyKey::parse(name), PropertyValue::read_json(value)?);
			}
		}
		Ok(properties)
	}

	fn read_ethernet_flow(&self, row: &Value, evidence: Evidence) -> Result<Event, ParseError> {
		let protocol = crate::types::Protocol::get(get_str(row, "protocol").unwrap_or(""))
			.ok_or_else(|| ParseError::Protocol(format!("{row}")))?;
		Ok(Event::Flow(Flow::Ethernet(EthernetFlow {
			evidence,
			protocol,
			source: HWAddress::new(get_str(row, "source").unwrap_or(""))?,
			target: HWAddress::new(get_str(row, "target").unwrap_or(""))?,
			payload: row.get("payload").and_then(Value::as_i64).unwrap_or(-1),
			timestamp: Self::read_timestamp(row)?,
			properties: Self::read_properties(row)?,
		})))
	}

	fn read_ip_flow(&self, row: &Value, evidence: Evidence) -> Result<Event, ParseError> {
		let protocol = crate::types::Protocol::get(get_str(row, "protocol").unwrap_or(""))
			.ok_or_else(|| ParseError::Protocol(format!("{row}")))?;
		let side = |field: &str| -> Result<(HWAddress, std::net::IpAddr, u16), ParseError> {
			let arr = row
				.get(field)
				.and_then(Value::as_array)
				.ok_or_else(|| ParseError::Serialized(format!("bad flow side {row}")))?;
			let hw = HWAddress::new(arr.first().and_then(Value::as_str).unwrap_or(""))?;
			let ip_s = arr.get(1).and_then(Value::as_str).unwrap_or("");
			let ip = ip_s
				.parse()
				.map_err(|_| ParseError::IpAddress(ip_s.to_string()))?;
			let port = arr.get(2).and_then(Value::as_u64).unwrap_or(0) as u16;
			Ok((hw, ip, port))
		};
		Ok(Event::Flow(Flow::Ip(IPFlow {
			evidence,
			protocol,
			source: side("source")?,
			target: side("target")?,
			network: None,
			timestamp: Self::read_timestamp(row)?,
			properties: Self::read_properties(row)?,
		})))
	}

	fn read_ble_flow(&self, row: &Value, evidence: Evidence) -> Result<Event, ParseError> {
		Ok(Event::Flow(Flow::Ble(BleAdvertisementFlow {
			evidence,
			source: HWAddress::new(get_str(row, "source").unwrap_or(""))?,
			event_type: row.get("event_type").and_then(Value::as_i64).unwrap_or(0),
			timestamp: Self::read_timestamp(row)?,
			properties: Self::read_properties(row)?,
		})))
	}

	fn read_service_scan(&self, row: &Value, evidence: Evidence) -> Result<Event, ParseError> {
		let address = Address::parse_endpoint(get_str(row, "address").unwrap_or(""))?;
		let Address::Endpoint(endpoint) = address else {
			return Err(ParseError::Serialized(format!(
				"service scan needs an endpoint: {row}"
			)));
		};
		let mut scan = ServiceScan::new(evidence, endpoint);
		scan.service_name = strng::new(get_str(row, "service_name").unwrap_or(""));
		Ok(Event::ServiceScan(scan))
	}

	fn read_host_scan(&self, row: &Value, evidence: Evidence) -> Result<Event, ParseError> {
		let host = Address::parse_endpoint(get_str(row, "host").unwrap_or(""))?;
		let mut endpoints = Vec::new();
		for e in row
			.get("endpoints")
			.and_then(Value::as_array)
			.into_iter()
			.flatten()
			.filter_map(Value::as_str)
		{
			match Address::parse_endpoint(e)? {
				Address::Endpoint(ep) => endpoints.push(ep),
				other => {
					return Err(ParseError::Serialized(format!(
						"host scan endpoint '{other}' is not an endpoint"
					)))
				},
			}
		}
		Ok(Event::HostScan(HostScan {
			evidence,
			host,
			endpoints,
		}))
	}

	fn read_key_value(row: &Value) -> Result<(PropertyKey, PropertyValue), ParseError> {
		let key = PropertyKey::parse(get_str(row, "key").unwrap_or(""));
		let value = PropertyValue::read_json(row)?;
		Ok((key, value))
	}

	fn read_property_event(
		&self,
		row: &Value,
		evidence: Evidence,
	) -> Result<Option<Event>, ParseError> {
		let address = SystemAddress::parse(get_str(row, "address").unwrap_or(""))?;
		let Some(entity) = self.system.find_entity(&address) else {
			warn!(%address, "property event entity not found");
			return Ok(None);
		};
		Ok(Some(Event::Property(PropertyEvent {
			evidence,
			entity,
			key_value: Self::read_key_value(row)?,
		})))
	}

	fn read_property_address_event(
		&self,
		row: &Value,
		evidence: Evidence,
	) -> Result<Event, ParseError> {
		Ok(Event::PropertyAddress(PropertyAddressEvent {
			evidence,
			address: Address::parse_endpoint(get_str(row, "address").unwrap_or(""))?,
			key_value: Self::read_key_value(row)?,
		}))
	}

	fn read_name_event(&self, row: &Value, evidence: Evidence) -> Result<Event, ParseError> {
		let name = match get_str(row, "name") {
			Some(n) => Some(DnsName::new(n)?),
			None => None,
		};
		let tag = get_str(row, "tag").map(EntityTag::new);
		let address = match get_str(row, "address") {
			Some(a) => Some(Address::parse(a)?),
			None => None,
		};
		let service = match get_str(row, "service") {
			Some(s) => match self.system.find_entity(&SystemAddress::parse(s)?) {
				Some(EntityRef::Node(n)) => Some(n),
				_ => None,
			},
			None => None,
		};
		let mut peers = Vec::new();
		for p in row
			.get("peers")
			.and_then(Value::as_array)
			.into_iter()
			.flatten()
			.filter_map(Value::as_str)
		{
			if let Some(EntityRef::Node(n)) = self.system.find_entity(&SystemAddress::parse(p)?) {
				peers.push(n);
			}
		}
		Ok(Event::Name(NameEvent {
			evidence,
			service,
			name,
			tag,
			address,
			peers,
		}))
	}
}
