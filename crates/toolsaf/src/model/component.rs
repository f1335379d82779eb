//! Node-internal components: software, cookies, operating system and
//! stored data.

use indexmap::IndexMap;
use toolsaf_core::strng;
use toolsaf_core::Strng;

use crate::model::{ComponentId, ConnectionId, NodeId};
use crate::property::{PropertyMap, ReleaseInfo};
use crate::types::{EntityTag, Status};

/// A software component of a node.
#[derive(Debug, Clone, Default)]
pub struct Software {
	/// Contained SBOM components by name.
	pub components: IndexMap<Strng, SoftwareComponent>,
	/// Connections used to deliver updates.
	pub update_connections: Vec<ConnectionId>,
	pub info: Option<ReleaseInfo>,
	/// Granted permissions, e.g. from a mobile application manifest.
	pub permissions: Vec<Strng>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareComponent {
	pub name: Strng,
	pub version: Strng,
}

impl SoftwareComponent {
	pub fn new(name: &str, version: &str) -> SoftwareComponent {
		SoftwareComponent {
			name: strng::new(name),
			version: strng::new(version),
		}
	}
}

/// Browser cookies of a node.
#[derive(Debug, Clone, Default)]
pub struct Cookies {
	pub cookies: IndexMap<Strng, CookieData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CookieData {
	pub domain: Strng,
	pub path: Strng,
	pub explanation: Strng,
}

/// Operating system account and process inventory.
#[derive(Debug, Clone, Default)]
pub struct OperatingSystem {
	/// Processes by owning account.
	pub process_map: IndexMap<Strng, Vec<Strng>>,
}

/// Sensitive data stored or processed by a node.
#[derive(Debug, Clone, Default)]
pub struct StoredData {
	pub references: Vec<DataReference>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReference {
	pub name: Strng,
	pub personal: bool,
	pub password: bool,
}

impl DataReference {
	pub fn new(name: &str, personal: bool, password: bool) -> DataReference {
		DataReference {
			name: strng::new(name),
			personal,
			password,
		}
	}
}

#[derive(Debug, Clone)]
pub enum ComponentKind {
	Software(Software),
	Cookies(Cookies),
	OperatingSystem(OperatingSystem),
	StoredData(StoredData),
}

impl ComponentKind {
	/// Segment type used in system addresses for this component kind.
	pub fn segment_type(&self) -> &'static str {
		match self {
			ComponentKind::Software(_) => "software",
			ComponentKind::Cookies(_) => "cookies",
			ComponentKind::OperatingSystem(_) => "os",
			ComponentKind::StoredData(_) => "data",
		}
	}

	/// Type label in the serialized statement.
	pub fn type_name(&self) -> &'static str {
		match self {
			ComponentKind::Software(_) => "sw",
			ComponentKind::Cookies(_) => "cookies",
			ComponentKind::OperatingSystem(_) => "os",
			ComponentKind::StoredData(_) => "component",
		}
	}
}

/// A component attached to a network node.
#[derive(Debug, Clone)]
pub struct Component {
	pub id: ComponentId,
	pub entity: NodeId,
	pub name: Strng,
	pub tag: EntityTag,
	pub status: Status,
	pub properties: PropertyMap,
	pub sub_components: Vec<ComponentId>,
	pub kind: ComponentKind,
}

impl Component {
	pub fn new(id: ComponentId, entity: NodeId, name: &str, kind: ComponentKind) -> Component {
		Component {
			id,
			entity,
			name: strng::new(name),
			tag: EntityTag::new(name),
			status: Status::Expected,
			properties: PropertyMap::new(),
			sub_components: Vec::new(),
			kind,
		}
	}

	pub fn software(&self) -> Option<&Software> {
		match &self.kind {
			ComponentKind::Software(sw) => Some(sw),
			_ => None,
		}
	}

	pub fn software_mut(&mut self) -> Option<&mut Software> {
		match &mut self.kind {
			ComponentKind::Software(sw) => Some(sw),
			_ => None,
		}
	}

	pub fn cookies_mut(&mut self) -> Option<&mut Cookies> {
		match &mut self.kind {
			ComponentKind::Cookies(c) => Some(c),
			_ => None,
		}
	}
}
