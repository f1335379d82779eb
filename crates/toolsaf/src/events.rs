//! Normalized events produced by tool adapters and consumed by the
//! inspection pipeline.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use toolsaf_core::prelude::*;

use crate::model::{ConnectionId, EntityRef, IoTSystem, NodeId};
use crate::property::{PropertyKey, PropertyMap, PropertyValue};
use crate::types::{
	Address, DnsName, EndpointAddress, EntityTag, ExternalActivity, HWAddress, Network, Protocol,
};

/// Identity of an evidence source. Renaming a source produces a new
/// identity, so each processed file gets its own matching context.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct SourceId(u64);

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Where evidence comes from: a tool and the artifact it read. Carries the
/// per-source address and external-activity overlays from batch metadata.
#[derive(Debug, Clone)]
pub struct EvidenceSource {
	pub id: SourceId,
	pub name: Strng,
	pub label: Strng,
	pub target: Strng,
	pub base_ref: Strng,
	pub timestamp: Option<DateTime<Utc>>,
	pub model_override: bool,
	/// Address to entity mappings valid for this source only.
	pub address_map: IndexMap<Address, NodeId>,
	/// External-activity overrides valid for this source only.
	pub activity_map: IndexMap<NodeId, ExternalActivity>,
}

impl EvidenceSource {
	pub fn new(name: &str) -> EvidenceSource {
		EvidenceSource {
			id: SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)),
			name: strng::new(name),
			label: strng::EMPTY,
			target: strng::EMPTY,
			base_ref: strng::EMPTY,
			timestamp: None,
			model_override: false,
			address_map: IndexMap::new(),
			activity_map: IndexMap::new(),
		}
	}

	/// New source with the given fields replaced; overlays carry over.
	pub fn rename(
		&self,
		name: Option<&str>,
		base_ref: Option<&str>,
		label: Option<&str>,
	) -> EvidenceSource {
		EvidenceSource {
			id: SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)),
			name: name.map(strng::new).unwrap_or_else(|| self.name.clone()),
			label: label.map(strng::new).unwrap_or_else(|| self.label.clone()),
			target: self.target.clone(),
			base_ref: base_ref
				.map(strng::new)
				.unwrap_or_else(|| self.base_ref.clone()),
			timestamp: self.timestamp,
			model_override: self.model_override,
			address_map: self.address_map.clone(),
			activity_map: self.activity_map.clone(),
		}
	}
}

impl PartialEq for EvidenceSource {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for EvidenceSource {}

impl std::hash::Hash for EvidenceSource {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl std::fmt::Display for EvidenceSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.name)
	}
}

/// Origin of one event: the source plus an optional reference into it,
/// e.g. a line number.
#[derive(Debug, Clone)]
pub struct Evidence {
	pub source: Arc<EvidenceSource>,
	pub tail_ref: Strng,
}

impl Evidence {
	pub fn new(source: Arc<EvidenceSource>) -> Evidence {
		Evidence {
			source,
			tail_ref: strng::EMPTY,
		}
	}

	pub fn with_ref(source: Arc<EvidenceSource>, tail_ref: &str) -> Evidence {
		Evidence {
			source,
			tail_ref: strng::new(tail_ref),
		}
	}
}

/// An Ethernet-level flow without IP addressing, e.g. ARP or EAPOL.
#[derive(Debug, Clone)]
pub struct EthernetFlow {
	pub evidence: Evidence,
	pub protocol: Protocol,
	pub source: HWAddress,
	pub target: HWAddress,
	/// Ethernet payload type, when relevant.
	pub payload: i64,
	pub timestamp: Option<DateTime<Utc>>,
	pub properties: PropertyMap,
}

/// One observed IP packet: HW and IP address plus port on both sides.
#[derive(Debug, Clone)]
pub struct IPFlow {
	pub evidence: Evidence,
	pub protocol: Protocol,
	pub source: (HWAddress, IpAddr, u16),
	pub target: (HWAddress, IpAddr, u16),
	pub network: Option<Network>,
	pub timestamp: Option<DateTime<Utc>>,
	pub properties: PropertyMap,
}

impl IPFlow {
	pub fn new(
		evidence: Evidence,
		protocol: Protocol,
		source: (HWAddress, IpAddr, u16),
		target: (HWAddress, IpAddr, u16),
	) -> Flow {
		Flow::Ip(IPFlow {
			evidence,
			protocol,
			source,
			target,
			network: None,
			timestamp: None,
			properties: PropertyMap::new(),
		})
	}

	/// Flow from string literals. Panics on malformed input; intended for
	/// fabricating flows in tests and hand-written scenarios.
	pub fn literal(
		evidence: Evidence,
		protocol: Protocol,
		source: (&str, &str, u16),
		target: (&str, &str, u16),
	) -> Flow {
		let ends = |(hw, ip, port): (&str, &str, u16)| {
			(
				HWAddress::new(hw).expect("literal HW address"),
				ip.parse::<IpAddr>().expect("literal IP address"),
				port,
			)
		};
		IPFlow::new(evidence, protocol, ends(source), ends(target))
	}

	pub fn udp(
		evidence: Evidence,
		source: (&str, &str, u16),
		target: (&str, &str, u16),
	) -> Flow {
		IPFlow::literal(evidence, Protocol::Udp, source, target)
	}

	pub fn tcp(
		evidence: Evidence,
		source: (&str, &str, u16),
		target: (&str, &str, u16),
	) -> Flow {
		IPFlow::literal(evidence, Protocol::Tcp, source, target)
	}
}

/// One BLE advertisement.
#[derive(Debug, Clone)]
pub struct BleAdvertisementFlow {
	pub evidence: Evidence,
	pub source: HWAddress,
	pub event_type: i64,
	pub timestamp: Option<DateTime<Utc>>,
	pub properties: PropertyMap,
}

/// A normalized observation of one packet or advertisement.
#[derive(Debug, Clone)]
pub enum Flow {
	Ethernet(EthernetFlow),
	Ip(IPFlow),
	Ble(BleAdvertisementFlow),
}

/// Identity of a flow for caching and direction tracking: protocol plus
/// the address stacks, evidence excluded.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct FlowKey {
	pub protocol: Protocol,
	pub source: Vec<Address>,
	pub source_port: Option<u16>,
	pub target: Vec<Address>,
	pub target_port: Option<u16>,
}

impl Flow {
	pub fn evidence(&self) -> &Evidence {
		match self {
			Flow::Ethernet(f) => &f.evidence,
			Flow::Ip(f) => &f.evidence,
			Flow::Ble(f) => &f.evidence,
		}
	}

	pub fn protocol(&self) -> Protocol {
		match self {
			Flow::Ethernet(f) => f.protocol,
			Flow::Ip(f) => f.protocol,
			Flow::Ble(_) => Protocol::Ble,
		}
	}

	/// Address stack of one side, most specific last.
	pub fn stack(&self, target: bool) -> Vec<Address> {
		match self {
			Flow::Ethernet(f) => {
				vec![Address::Hardware(if target { f.target } else { f.source })]
			},
			Flow::Ip(f) => {
				let (hw, ip, _) = if target { f.target } else { f.source };
				vec![Address::Hardware(hw), Address::Ip(ip)]
			},
			Flow::Ble(f) => {
				if target {
					vec![Address::ble_ad()]
				} else {
					vec![Address::Hardware(f.source)]
				}
			},
		}
	}

	pub fn port(&self, target: bool) -> Option<u16> {
		match self {
			Flow::Ip(f) => Some(if target { f.target.2 } else { f.source.2 }),
			_ => None,
		}
	}

	pub fn network(&self) -> Option<&Network> {
		match self {
			Flow::Ip(f) => f.network.as_ref(),
			_ => None,
		}
	}

	pub fn properties(&self) -> &PropertyMap {
		match self {
			Flow::Ethernet(f) => &f.properties,
			Flow::Ip(f) => &f.properties,
			Flow::Ble(f) => &f.properties,
		}
	}

	pub fn properties_mut(&mut self) -> &mut PropertyMap {
		match self {
			Flow::Ethernet(f) => &mut f.properties,
			Flow::Ip(f) => &mut f.properties,
			Flow::Ble(f) => &mut f.properties,
		}
	}

	pub fn timestamp(&self) -> Option<DateTime<Utc>> {
		match self {
			Flow::Ethernet(f) => f.timestamp,
			Flow::Ip(f) => f.timestamp,
			Flow::Ble(f) => f.timestamp,
		}
	}

	/// The representative address of one side, IP preferred over HW.
	pub fn side_address(&self, target: bool) -> Address {
		match self {
			Flow::Ip(f) => Address::Ip(if target { f.target.1 } else { f.source.1 }),
			_ => self
				.stack(target)
				.into_iter()
				.next()
				.unwrap_or(Address::NULL_IP),
		}
	}

	pub fn key(&self) -> FlowKey {
		FlowKey {
			protocol: self.protocol(),
			source: self.stack(false),
			source_port: self.port(false),
			target: self.stack(true),
			target_port: self.port(true),
		}
	}
}

impl std::fmt::Display for Flow {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Flow::Ethernet(e) => {
				write!(f, "{} {} > {}", e.protocol, e.source, e.target)
			},
			Flow::Ip(i) => write!(
				f,
				"{} {}:{} > {}:{}",
				i.protocol, i.source.1, i.source.2, i.target.1, i.target.2
			),
			Flow::Ble(b) => write!(f, "ble {} type {}", b.source, b.event_type),
		}
	}
}

/// A specific (host, protocol, port) exists.
#[derive(Debug, Clone)]
pub struct ServiceScan {
	pub evidence: Evidence,
	pub endpoint: EndpointAddress,
	pub service_name: Strng,
}

impl ServiceScan {
	pub fn new(evidence: Evidence, endpoint: EndpointAddress) -> ServiceScan {
		ServiceScan {
			evidence,
			endpoint,
			service_name: strng::EMPTY,
		}
	}
}

/// The given host has exactly these endpoints open.
#[derive(Debug, Clone)]
pub struct HostScan {
	pub evidence: Evidence,
	pub host: Address,
	pub endpoints: Vec<EndpointAddress>,
}

/// A learned name, tag or address binding, e.g. from a DNS answer.
#[derive(Debug, Clone)]
pub struct NameEvent {
	pub evidence: Evidence,
	/// The DNS service that resolved the name, if any.
	pub service: Option<NodeId>,
	pub name: Option<DnsName>,
	pub tag: Option<EntityTag>,
	pub address: Option<Address>,
	/// The communicating peers.
	pub peers: Vec<NodeId>,
}

impl NameEvent {
	pub fn new(evidence: Evidence, name: DnsName, address: Option<Address>) -> NameEvent {
		NameEvent {
			evidence,
			service: None,
			name: Some(name),
			tag: None,
			address,
			peers: Vec::new(),
		}
	}

	/// Name or tag as an address.
	pub fn name_address(&self) -> Option<Address> {
		if let Some(tag) = &self.tag {
			return Some(Address::Tag(tag.clone()));
		}
		self.name.as_ref().map(|n| Address::Name(n.clone()))
	}
}

/// Property value for a directly referenced entity.
#[derive(Debug, Clone)]
pub struct PropertyEvent {
	pub evidence: Evidence,
	pub entity: EntityRef,
	pub key_value: (PropertyKey, PropertyValue),
}

/// Property value for an entity located by address.
#[derive(Debug, Clone)]
pub struct PropertyAddressEvent {
	pub evidence: Evidence,
	pub address: Address,
	pub key_value: (PropertyKey, PropertyValue),
}

/// Any event an adapter can emit.
#[derive(Debug, Clone)]
pub enum Event {
	Flow(Flow),
	Name(NameEvent),
	Property(PropertyEvent),
	PropertyAddress(PropertyAddressEvent),
	ServiceScan(ServiceScan),
	HostScan(HostScan),
}

impl Event {
	pub fn evidence(&self) -> &Evidence {
		match self {
			Event::Flow(f) => f.evidence(),
			Event::Name(e) => &e.evidence,
			Event::Property(e) => &e.evidence,
			Event::PropertyAddress(e) => &e.evidence,
			Event::ServiceScan(e) => &e.evidence,
			Event::HostScan(e) => &e.evidence,
		}
	}

	pub fn evidence_mut(&mut self) -> &mut Evidence {
		match self {
			Event::Flow(Flow::Ethernet(f)) => &mut f.evidence,
			Event::Flow(Flow::Ip(f)) => &mut f.evidence,
			Event::Flow(Flow::Ble(f)) => &mut f.evidence,
			Event::Name(e) => &mut e.evidence,
			Event::Property(e) => &mut e.evidence,
			Event::PropertyAddress(e) => &mut e.evidence,
			Event::ServiceScan(e) => &mut e.evidence,
			Event::HostScan(e) => &mut e.evidence,
		}
	}

	/// Short value string for logs and reports.
	pub fn value_string(&self) -> String {
		match self {
			Event::Flow(f) => f.to_string(),
			Event::Name(e) => {
				let name = e
					.name
					.as_ref()
					.map(|n| n.to_string())
					.or_else(|| e.tag.as_ref().map(|t| t.to_string()))
					.unwrap_or_default();
				match &e.address {
					Some(a) => format!("{name}={a}"),
					None => name,
				}
			},
			Event::Property(e) => {
				format!("{}: {}", e.key_value.0, e.key_value.1.explanation())
			},
			Event::PropertyAddress(e) => {
				format!("{}: {}", e.key_value.0, e.key_value.1.explanation())
			},
			Event::ServiceScan(e) => e.endpoint.to_string(),
			Event::HostScan(e) => e.host.to_string(),
		}
	}

	/// Explanation or informational text of the event.
	pub fn info(&self) -> String {
		match self {
			Event::Property(e) => e.key_value.1.explanation().to_string(),
			Event::PropertyAddress(e) => e.key_value.1.explanation().to_string(),
			other => other.value_string(),
		}
	}

	/// The explicit property key of the event, if any.
	pub fn property_key(&self) -> Option<&PropertyKey> {
		match self {
			Event::Property(e) => Some(&e.key_value.0),
			Event::PropertyAddress(e) => Some(&e.key_value.0),
			_ => None,
		}
	}
}

/// The interface all tool adapters feed events into.
pub trait EventInterface {
	fn system(&self) -> &IoTSystem;

	/// Inspect the given flow.
	fn connection(&mut self, flow: Flow) -> Option<ConnectionId>;

	/// Learn a name.
	fn name(&mut self, event: NameEvent) -> Option<NodeId>;

	/// Update a property value on a referenced entity.
	fn property_update(&mut self, update: PropertyEvent) -> Option<EntityRef>;

	/// Update a property value on an entity found by address.
	fn property_address_update(&mut self, update: PropertyAddressEvent) -> Option<EntityRef>;

	/// The given address has a service.
	fn service_scan(&mut self, scan: ServiceScan) -> Option<NodeId>;

	/// The given host has these services and no others.
	fn host_scan(&mut self, scan: HostScan) -> Option<NodeId>;

	/// Consume an event, dispatching to the proper method.
	fn consume(&mut self, event: Event) {
		match event {
			Event::Flow(f) => {
				self.connection(f);
			},
			Event::Name(e) => {
				self.name(e);
			},
			Event::Property(e) => {
				self.property_update(e);
			},
			Event::PropertyAddress(e) => {
				self.property_address_update(e);
			},
			Event::ServiceScan(e) => {
				self.service_scan(e);
			},
			Event::HostScan(e) => {
				self.host_scan(e);
			},
		}
	}
}
