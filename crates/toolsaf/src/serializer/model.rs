//! Model serialization: the system, its nodes, components, networks,
//! connections and ignore rules as a stream of JSON rows.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::warn;

use super::{get_str, make_id};
use crate::errors::ParseError;
use crate::ignore::IgnoreRules;
use crate::model::{
	ComponentKind, Cookies, CookieData, EntityRef, IoTSystem, NodeId, OnlineResource, Software,
	SoftwareComponent,
};
use crate::property::{PropertyMap, PropertyKey, PropertyValue};
use crate::types::{
	Address, EntityTag, ExternalActivity, HostType, Network, Status, SystemAddress,
};
use toolsaf_core::strng;

/// Writes the model as a stream of JSON rows.
pub struct ModelSerializer<'a> {
	system: &'a IoTSystem,
	ignore_rules: Option<&'a IgnoreRules>,
	counter: usize,
	ids: HashMap<EntityRef, String>,
}

impl<'a> ModelSerializer<'a> {
	pub fn new(system: &'a IoTSystem) -> ModelSerializer<'a> {
		ModelSerializer {
			system,
			ignore_rules: None,
			counter: 0,
			ids: HashMap::new(),
		}
	}

	pub fn with_ignore_rules(mut self, rules: &'a IgnoreRules) -> ModelSerializer<'a> {
		self.ignore_rules = Some(rules);
		self
	}

	fn id_for(&mut self, entity: EntityRef) -> String {
		if let Some(id) = self.ids.get(&entity) {
			return id.clone();
		}
		let id = make_id(&mut self.counter);
		self.ids.insert(entity, id.clone());
		id
	}

	/// The id map built while writing, for appending event streams.
	pub fn ids(&self) -> &HashMap<EntityRef, String> {
		&self.ids
	}

	fn properties_json(properties: &PropertyMap) -> Option<Value> {
		if properties.is_empty() {
			return None;
		}
		let mut map = Map::new();
		for (k, v) in properties {
			map.insert(k.get_name().to_string(), v.to_json());
		}
		Some(Value::Object(map))
	}

	fn node_row(&mut self, node: NodeId, type_name: &str, at: &str) -> Value {
		let n = self.system.node(node);
		let id = self.id_for(EntityRef::Node(node));
		let mut row = Map::new();
		row.insert("id".into(), json!(id));
		row.insert("type".into(), json!(type_name));
		row.insert("at".into(), json!(at));
		row.insert("name".into(), json!(n.name.as_str()));
		row.insert("status".into(), json!(n.status.as_str()));
		row.insert("host_type".into(), json!(n.host_type.as_str()));
		row.insert(
			"external_activity".into(),
			json!(n.external_activity.as_str()),
		);
		let addresses: Vec<String> = n.addresses.iter().map(|a| a.parseable_value()).collect();
		if !addresses.is_empty() {
			row.insert("addresses".into(), json!(addresses));
		}
		if n.any_host {
			row.insert("any_host".into(), json!(true));
		}
		if let Some(tag) = n.get_tag() {
			row.insert("tag".into(), json!(tag.to_string()));
		}
		if let Some(data) = n.service_data() {
			if let Some(p) = data.protocol {
				row.insert("protocol".into(), json!(p.as_str()));
			}
			row.insert("con_type".into(), json!(data.con_type.as_str()));
			if data.authentication {
				row.insert("authentication".into(), json!(true));
			}
			if data.client_side {
				row.insert("client_side".into(), json!(true));
			}
			if let Some(ms) = &data.multicast_source {
				row.insert("multicast_source".into(), json!(ms.to_string()));
			}
			if data.reply_from_other_address {
				row.insert("reply_from_other_address".into(), json!(true));
			}
		}
		if let Some(props) = Self::properties_json(&n.properties) {
			row.insert("properties".into(), props);
		}
		Value::Object(row)
	}

	/// Write the whole model.
	pub fn write(&mut self) -> Vec<Value> {
		let mut rows = Vec::new();
		let system_id = self.id_for(EntityRef::Node(self.system.root()));
		rows.push(json!({
			"id": system_id,
			"type": "system",
			"name": self.system.name().as_str(),
		}));
		for nw in self.system.networks() {
			let id = make_id(&mut self.counter);
			let mut row = Map::new();
			row.insert("id".into(), json!(id));
			row.insert("type".into(), json!("network"));
			row.insert("at".into(), json!(system_id));
			row.insert("name".into(), json!(nw.name.as_str()));
			if let Some(mask) = &nw.ip_network {
				row.insert("address".into(), json!(mask.to_string()));
			}
			rows.push(Value::Object(row));
		}
		for r in &self.system.online_resources {
			let id = make_id(&mut self.counter);
			rows.push(json!({
				"id": id,
				"type": "online-resource",
				"at": system_id,
				"name": r.name.as_str(),
				"url": r.url.as_str(),
				"keywords": r.keywords.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
			}));
		}
		for host in self.system.hosts() {
			let host_id_at = system_id.clone();
			rows.push(self.node_row(host, "host", &host_id_at));
			let host_id = self.id_for(EntityRef::Node(host));
			for service in self.system.node(host).children.clone() {
				rows.push(self.node_row(service, "service", &host_id));
			}
			for component in self.system.node(host).components.clone() {
				rows.push(self.component_row(component, &host_id));
			}
		}
		for c in self.system.get_connections() {
			let conn = self.system.connection(c);
			let id = self.id_for(EntityRef::Connection(c));
			let source = self
				.system
				.system_address(EntityRef::Node(conn.source))
				.parseable_value();
			let target = self
				.system
				.system_address(EntityRef::Node(conn.target))
				.parseable_value();
			let mut row = Map::new();
			row.insert("id".into(), json!(id));
			row.insert("type".into(), json!("connection"));
			row.insert("source".into(), json!(source));
			row.insert("target".into(), json!(target));
			row.insert("status".into(), json!(conn.status.as_str()));
			row.insert("con_type".into(), json!(conn.con_type.as_str()));
			if let Some(props) = Self::properties_json(&conn.properties) {
				row.insert("properties".into(), props);
			}
			rows.push(Value::Object(row));
		}
		if let Some(rules) = self.ignore_rules {
			let id = make_id(&mut self.counter);
			let rule_rows: Vec<Value> = rules
				.iter()
				.map(|r| {
					json!({
						"file_type": r.file_type.as_str(),
						"properties": r.properties.iter()
							.map(|p| p.get_name().to_string()).collect::<Vec<_>>(),
						"at": r.at.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
						"explanation": r.explanation.as_str(),
					})
				})
				.collect();
			rows.push(json!({
				"id": id,
				"type": "ignore-rules",
				"rules": rule_rows,
			}));
		}
		rows
	}

	fn component_row(&mut self, component: crate::model::ComponentId, at: &str) -> Value {
		let c = self.system.component(component);
		let id = self.id_for(EntityRef::Component(component));
		let mut row = Map::new();
		row.insert("id".into(), json!(id));
		row.insert("type".into(), json!(c.kind.type_name()));
		row.insert("at".into(), json!(at));
		row.insert("name".into(), json!(c.name.as_str()));
		row.insert("status".into(), json!(c.status.as_str()));
		match &c.kind {
			ComponentKind::Software(sw) => {
				if !sw.components.is_empty() {
					let comps: Vec<Value> = sw
						.components
						.values()
						.map(|s| json!({"name": s.name.as_str(), "version": s.version.as_str()}))
						.collect();
					row.insert("components".into(), json!(comps));
				}
				if !sw.permissions.is_empty() {
					let perms: Vec<&str> = sw.permissions.iter().map(|p| p.as_str()).collect();
					row.insert("permissions".into(), json!(perms));
				}
			},
			ComponentKind::Cookies(cookies) => {
				let mut map = Map::new();
				for (name, data) in &cookies.cookies {
					map.insert(
						name.to_string(),
						json!({
							"domain": data.domain.as_str(),
							"path": data.path.as_str(),
							"explanation": data.explanation.as_str(),
						}),
					);
				}
				row.insert("cookies".into(), Value::Object(map));
			},
			ComponentKind::OperatingSystem(os) => {
				let mut map = Map::new();
				for (owner, processes) in &os.process_map {
					let ps: Vec<&str> = processes.iter().map(|p| p.as_str()).collect();
					map.insert(owner.to_string(), json!(ps));
				}
				row.insert("process_map".into(), Value::Object(map));
			},
			ComponentKind::StoredData(data) => {
				let refs: Vec<Value> = data
					.references
					.iter()
					.map(|r| {
						json!({
							"name": r.name.as_str(),
							"personal": r.personal,
							"password": r.password,
						})
					})
					.collect();
				row.insert("data".into(), json!(refs));
			},
		}
		if let Some(props) = Self::properties_json(&c.properties) {
			row.insert("properties".into(), props);
		}
		Value::Object(row)
	}
}

/// Recreates a model from serialized rows. Unknown row types and fields
/// are tolerated and skipped.
pub struct ModelReader {
	system: IoTSystem,
	/// Stream ids to created nodes.
	node_ids: HashMap<String, NodeId>,
}

impl ModelReader {
	pub fn read(rows: &[Value]) -> Result<IoTSystem, ParseError> {
		let mut reader = ModelReader {
			system: IoTSystem::new("IoT system"),
			node_ids: HashMap::new(),
		};
		let mut networks: Vec<Network> = Vec::new();
		for row in rows {
			let type_name = get_str(row, "type").unwrap_or("");
			match type_name {
				"system" => {
					let name = get_str(row, "name").unwrap_or("IoT system");
					reader.system = IoTSystem::new(name);
					if let Some(id) = get_str(row, "id") {
						reader
							.node_ids
							.insert(id.to_string(), reader.system.root());
					}
				},
				"network" => {
					let name = get_str(row, "name").unwrap_or("local");
					let network = match get_str(row, "address") {
						Some(mask) => Network::with_mask(
							name,
							mask.parse()
								.map_err(|_| ParseError::Serialized(mask.to_string()))?,
						),
						None => Network::new(name),
					};
					networks.push(network);
				},
				"online-resource" => {
					let keywords: Vec<&str> = row
						.get("keywords")
						.and_then(Value::as_array)
						.map(|a| a.iter().filter_map(Value::as_str).collect())
						.unwrap_or_default();
					reader.system.online_resources.push(OnlineResource::new(
						get_str(row, "name").unwrap_or(""),
						get_str(row, "url").unwrap_or(""),
						&keywords,
					));
				},
				"host" => reader.read_host(row)?,
				"service" => reader.read_service(row)?,
				"connection" => reader.read_connection(row)?,
				"sw" | "cookies" | "os" | "component" => reader.read_component(row, type_name)?,
				"ignore-rules" => {}, // rebuilt statement-side
				other => {
					warn!(type_name = other, "skipping unknown row type");
				},
			}
		}
		if !networks.is_empty() {
			reader.system.set_networks(networks);
		}
		Ok(reader.system)
	}

	fn read_status(row: &Value) -> Status {
		match get_str(row, "status") {
			Some("Expected") => Status::Expected,
			Some("External") => Status::External,
			Some("Placeholder") => Status::Placeholder,
			_ => Status::Unexpected,
		}
	}

	fn read_properties(row: &Value, properties: &mut PropertyMap) -> Result<(), ParseError> {
		let Some(obj) = row.get("properties").and_then(Value::as_object) else {
			return Ok(());
		};
		for (name, value) in obj {
			let key = PropertyKey::parse(name);
			let value = PropertyValue::read_json(value)?;
			properties.insert(key, value);
		}
		Ok(())
	}

	fn read_host(&mut self, row: &Value) -> Result<(), ParseError> {
		let name = get_str(row, "name").unwrap_or("?");
		let tag = get_str(row, "tag").map(EntityTag::new);
		let host = self.system.add_host(name, tag);
		if let Some(id) = get_str(row, "id") {
			self.node_ids.insert(id.to_string(), host);
		}
		let node = self.system.node_mut(host);
		node.status = Self::read_status(row);
		node.host_type = read_host_type(row);
		node.external_activity = read_external_activity(row);
		node.any_host = row
			.get("any_host")
			.and_then(Value::as_bool)
			.unwrap_or(false);
		if let Some(addresses) = row.get("addresses").and_then(Value::as_array) {
			for a in addresses.iter().filter_map(Value::as_str) {
				let address = Address::parse_endpoint(a)?;
				node.addresses.insert(address);
			}
		}
		Self::read_properties(row, &mut node.properties)?;
		self.system.originals.insert(EntityRef::Node(host));
		Ok(())
	}

	fn read_service(&mut self, row: &Value) -> Result<(), ParseError> {
		let at = get_str(row, "at").unwrap_or("");
		let Some(host) = self.node_ids.get(at).copied() else {
			warn!(at, "service row without a known host");
			return Ok(());
		};
		let mut endpoint = None;
		if let Some(addresses) = row.get("addresses").and_then(Value::as_array) {
			for a in addresses.iter().filter_map(Value::as_str) {
				if let Address::Endpoint(ep) = Address::parse_endpoint(a)? {
					endpoint = Some(ep);
					break;
				}
			}
		}
		let Some(endpoint) = endpoint else {
			warn!("service row without an endpoint address");
			return Ok(());
		};
		let service = self.system.create_service(host, &endpoint);
		if let Some(id) = get_str(row, "id") {
			self.node_ids.insert(id.to_string(), service);
		}
		let node = self.system.node_mut(service);
		if let Some(name) = get_str(row, "name") {
			node.name = strng::new(name);
		}
		node.status = Self::read_status(row);
		node.host_type = read_host_type(row);
		node.external_activity = read_external_activity(row);
		{
			let data = node.service_data_mut().expect("created a service");
			if let Some(p) = get_str(row, "protocol").and_then(crate::types::Protocol::get) {
				data.protocol = Some(p);
			}
			data.authentication = row
				.get("authentication")
				.and_then(Value::as_bool)
				.unwrap_or(false);
			data.client_side = row
				.get("client_side")
				.and_then(Value::as_bool)
				.unwrap_or(false);
			data.reply_from_other_address = row
				.get("reply_from_other_address")
				.and_then(Value::as_bool)
				.unwrap_or(false);
			data.con_type = match get_str(row, "con_type") {
				Some("Encrypted") => crate::types::ConnectionType::Encrypted,
				Some("Administrative") => crate::types::ConnectionType::Administrative,
				Some("Logical") => crate::types::ConnectionType::Logical,
				_ => crate::types::ConnectionType::Unknown,
			};
		}
		Self::read_properties(row, &mut self.system.node_mut(service).properties)?;
		self.system.originals.insert(EntityRef::Node(service));
		Ok(())
	}

	fn read_connection(&mut self, row: &Value) -> Result<(), ParseError> {
		let source = SystemAddress::parse(get_str(row, "source").unwrap_or(""))?;
		let target = SystemAddress::parse(get_str(row, "target").unwrap_or(""))?;
		let (Some(EntityRef::Node(s)), Some(EntityRef::Node(t))) = (
			self.system.find_entity(&source),
			self.system.find_entity(&target),
		) else {
			warn!(%source, %target, "cannot resolve connection ends");
			return Ok(());
		};
		let source_addr = source
			.segments
			.first()
			.map(|seg| seg.address.clone())
			.unwrap_or(Address::NULL_IP);
		let target_addr = target
			.segments
			.last()
			.map(|seg| seg.address.clone())
			.unwrap_or(Address::NULL_IP);
		let c = self
			.system
			.new_connection((s, &source_addr), (t, &target_addr), true);
		self.system.connection_mut(c).status = Self::read_status(row);
		Self::read_properties(row, &mut self.system.connection_mut(c).properties)?;
		self.system.originals.insert(EntityRef::Connection(c));
		Ok(())
	}

	fn read_component(&mut self, row: &Value, type_name: &str) -> Result<(), ParseError> {
		let at = get_str(row, "at").unwrap_or("");
		let Some(entity) = self.node_ids.get(at).copied() else {
			warn!(at, "component row without a known entity");
			return Ok(());
		};
		let name = get_str(row, "name").unwrap_or("?");
		let kind = match type_name {
			"sw" => {
				let mut sw = Software::default();
				if let Some(comps) = row.get("components").and_then(Value::as_array) {
					for c in comps {
						let cn = get_str(c, "name").unwrap_or("?");
						let version = get_str(c, "version").unwrap_or("");
						sw.components
							.insert(strng::new(cn), SoftwareComponent::new(cn, version));
					}
				}
				if let Some(perms) = row.get("permissions").and_then(Value::as_array) {
					sw.permissions
						.extend(perms.iter().filter_map(Value::as_str).map(strng::new));
				}
				ComponentKind::Software(sw)
			},
			"cookies" => {
				let mut cookies = Cookies::default();
				if let Some(obj) = row.get("cookies").and_then(Value::as_object) {
					for (cname, data) in obj {
						cookies.cookies.insert(
							strng::new(cname),
							CookieData {
								domain: strng::new(get_str(data, "domain").unwrap_or("")),
								path: strng::new(get_str(data, "path").unwrap_or("")),
								explanation: strng::new(
									get_str(data, "explanation").unwrap_or(""),
								),
							},
						);
					}
				}
				ComponentKind::Cookies(cookies)
			},
			"os" => {
				let mut os = crate::model::OperatingSystem::default();
				if let Some(obj) = row.get("process_map").and_then(Value::as_object) {
					for (owner, ps) in obj {
						let processes = ps
							.as_array()
							.map(|a| {
								a.iter().filter_map(Value::as_str).map(strng::new).collect()
							})
							.unwrap_or_default();
						os.process_map.insert(strng::new(owner), processes);
					}
				}
				ComponentKind::OperatingSystem(os)
			},
			_ => ComponentKind::StoredData(crate::model::StoredData::default()),
		};
		let id = self.system.add_component(entity, name, kind);
		self.system.component_mut(id).status = Self::read_status(row);
		Self::read_properties(row, &mut self.system.component_mut(id).properties)?;
		self.system.originals.insert(EntityRef::Component(id));
		Ok(())
	}
}

fn read_host_type(row: &Value) -> HostType {
	match get_str(row, "host_type") {
		Some("Device") => HostType::Device,
		Some("Mobile") => HostType::Mobile,
		Some("Browser") => HostType::Browser,
		Some("Remote") => HostType::Remote,
		Some("Administrative") => HostType::Administrative,
		_ => HostType::Generic,
	}
}

fn read_external_activity(row: &Value) -> ExternalActivity {
	get_str(row, "external_activity")
		.and_then(|v| ExternalActivity::parse(v).ok())
		.unwrap_or_default()
}
