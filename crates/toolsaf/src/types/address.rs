//! Typed addresses: hardware, IP, DNS name, entity tag, pseudo, endpoint
//! and the hierarchical system-address sequences.

use std::cmp::Ordering;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;
use serde::{Serialize, Serializer};
use toolsaf_core::strng;
use toolsaf_core::Strng;

use crate::errors::ParseError;

/// Protocol identifiers.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub enum Protocol {
	Any,
	Arp,
	Dns,
	Dhcp,
	Eapol,
	Ethernet,
	Ftp,
	Http,
	Icmp,
	Tcp,
	Ip,
	Ssh,
	Tls,
	Udp,
	Ntp,
	Mqtt,
	Ble,
	Other,
}

impl Protocol {
	const ALL: [Protocol; 18] = [
		Protocol::Any,
		Protocol::Arp,
		Protocol::Dns,
		Protocol::Dhcp,
		Protocol::Eapol,
		Protocol::Ethernet,
		Protocol::Ftp,
		Protocol::Http,
		Protocol::Icmp,
		Protocol::Tcp,
		Protocol::Ip,
		Protocol::Ssh,
		Protocol::Tls,
		Protocol::Udp,
		Protocol::Ntp,
		Protocol::Mqtt,
		Protocol::Ble,
		Protocol::Other,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Protocol::Any => "",
			Protocol::Arp => "arp",
			Protocol::Dns => "dns",
			Protocol::Dhcp => "dhcp",
			Protocol::Eapol => "eapol",
			Protocol::Ethernet => "eth",
			Protocol::Ftp => "ftp",
			Protocol::Http => "http",
			Protocol::Icmp => "icmp",
			Protocol::Tcp => "tcp",
			Protocol::Ip => "ip",
			Protocol::Ssh => "ssh",
			Protocol::Tls => "tls",
			Protocol::Udp => "udp",
			Protocol::Ntp => "ntp",
			Protocol::Mqtt => "mqtt",
			Protocol::Ble => "ble",
			Protocol::Other => "other",
		}
	}

	/// Look up a protocol by name.
	pub fn get(value: &str) -> Option<Protocol> {
		let lower = value.to_ascii_lowercase();
		Protocol::ALL.iter().copied().find(|p| p.as_str() == lower)
	}

	/// Look up a protocol by name, falling back to the given default.
	pub fn get_or(value: &str, default: Protocol) -> Protocol {
		Protocol::get(value).unwrap_or(default)
	}
}

impl std::fmt::Display for Protocol {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Hardware address, e.g. Ethernet MAC.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct HWAddress {
	octets: [u8; 6],
}

impl HWAddress {
	pub const NULL: HWAddress = HWAddress { octets: [0; 6] };
	pub const BROADCAST: HWAddress = HWAddress { octets: [0xff; 6] };

	pub const fn from_octets(octets: [u8; 6]) -> HWAddress {
		HWAddress { octets }
	}

	/// Parse `aa:bb:cc:dd:ee:ff`, zero-padding single-digit octets.
	pub fn new(data: &str) -> Result<HWAddress, ParseError> {
		let parts: Vec<&str> = data.split(':').collect();
		if parts.len() != 6 {
			return Err(ParseError::HwAddress(data.to_string()));
		}
		let mut octets = [0u8; 6];
		for (i, p) in parts.iter().enumerate() {
			if p.is_empty() || p.len() > 2 {
				return Err(ParseError::HwAddress(data.to_string()));
			}
			octets[i] =
				u8::from_str_radix(p, 16).map_err(|_| ParseError::HwAddress(data.to_string()))?;
		}
		Ok(HWAddress { octets })
	}

	/// Fabricate a HW address from an IP address, `40:00:` followed by the
	/// last four address bytes. Test fabrication only.
	pub fn from_ip(address: IpAddr) -> HWAddress {
		let bytes: Vec<u8> = match address {
			IpAddr::V4(v4) => v4.octets().to_vec(),
			IpAddr::V6(v6) => v6.octets()[12..].to_vec(),
		};
		let mut octets = [0x40, 0x00, 0, 0, 0, 0];
		octets[2..].copy_from_slice(&bytes[bytes.len() - 4..]);
		HWAddress { octets }
	}

	pub fn is_null(&self) -> bool {
		*self == HWAddress::NULL
	}

	pub fn is_multicast(&self) -> bool {
		*self == HWAddress::BROADCAST
	}
}

impl std::fmt::Display for HWAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let o = &self.octets;
		write!(
			f,
			"{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
			o[0], o[1], o[2], o[3], o[4], o[5]
		)
	}
}

/// DNS name. Always treated as globally reachable.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone)]
pub struct DnsName(pub Strng);

impl DnsName {
	pub fn new(name: &str) -> Result<DnsName, ParseError> {
		if name.is_empty() {
			return Err(ParseError::EmptyDnsName);
		}
		Ok(DnsName(strng::new(name)))
	}

	pub fn name(&self) -> &Strng {
		&self.0
	}

	/// Interpret the value as an IP address when it parses as one, a DNS
	/// name otherwise.
	pub fn name_or_ip(value: &str) -> Result<Address, ParseError> {
		if let Ok(ip) = value.parse::<IpAddr>() {
			return Ok(Address::Ip(ip));
		}
		Ok(Address::Name(DnsName::new(value)?))
	}

	/// Does the given string look like a DNS domain name rather than a
	/// numeric address?
	pub fn looks_like(name: &str) -> bool {
		if !name.contains('.') {
			return false;
		}
		name.chars()
			.any(|c| c != '.' && c != ':' && !c.is_ascii_digit())
	}

	/// Decode a reverse-DNS name (`*.in-addr.arpa`, `*.ip6.arpa`) into the
	/// IP address it encodes. Names under `.arpa` that are not address
	/// encodings return `None`.
	pub fn decode_reverse(&self) -> Option<IpAddr> {
		let name = self.0.as_str();
		let nn = name.strip_suffix(".arpa")?;
		if let Some(v4) = nn.strip_suffix(".in-addr") {
			return v4.parse::<IpAddr>().ok();
		}
		if let Some(v6) = nn.strip_suffix(".ip6") {
			let nibbles: String = v6.chars().filter(|c| *c != '.').rev().collect();
			let groups: Vec<&str> = nibbles
				.as_bytes()
				.chunks(4)
				.map(|c| std::str::from_utf8(c).unwrap_or(""))
				.collect();
			return groups.join(":").parse::<IpAddr>().ok();
		}
		None
	}
}

impl std::fmt::Display for DnsName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// A unique tag for an entity. A tag does not make its node globally
/// addressable.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone)]
pub struct EntityTag(pub Strng);

impl EntityTag {
	/// Strict construction: non-empty and not starting with a digit.
	pub fn parse(tag: &str) -> Result<EntityTag, ParseError> {
		match tag.chars().next() {
			Some(c) if !c.is_ascii_digit() => Ok(EntityTag(strng::new(tag))),
			_ => Err(ParseError::EntityTag(tag.to_string())),
		}
	}

	/// Build a tag from a free-form name: disallowed characters become
	/// underscores, runs collapse, and a leading underscore is added when
	/// the name does not start with a letter.
	pub fn new(tag: &str) -> EntityTag {
		let mut t = String::with_capacity(tag.len());
		for c in tag.chars() {
			if c.is_alphanumeric() || c == '-' || c == '_' {
				t.push(c);
			} else {
				t.push('_');
			}
		}
		while t.contains("__") {
			t = t.replace("__", "_");
		}
		if !t.chars().next().is_some_and(|c| c.is_alphabetic()) {
			t.insert(0, '_');
		}
		EntityTag(strng::new(&t))
	}

	pub fn tag(&self) -> &Strng {
		&self.0
	}
}

impl std::fmt::Display for EntityTag {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Pseudo-address, equality by name only.
#[derive(Debug, Clone)]
pub struct PseudoAddress {
	pub name: Strng,
	pub wildcard: bool,
	pub multicast: bool,
	pub hardware: bool,
}

impl PseudoAddress {
	/// Wildcard matching any address.
	pub fn any() -> PseudoAddress {
		PseudoAddress {
			name: strng::literal!("*"),
			wildcard: true,
			multicast: false,
			hardware: false,
		}
	}

	/// Pseudo-address for BLE advertisements.
	pub fn ble_ad() -> PseudoAddress {
		PseudoAddress {
			name: strng::literal!("BLE_Ad"),
			wildcard: false,
			multicast: true,
			hardware: true,
		}
	}
}

impl PartialEq for PseudoAddress {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
	}
}

impl Eq for PseudoAddress {}

impl std::hash::Hash for PseudoAddress {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.name.hash(state);
	}
}

impl std::fmt::Display for PseudoAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.name)
	}
}

/// Endpoint address made up of host, protocol and optional port.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct EndpointAddress {
	pub host: Box<Address>,
	pub protocol: Protocol,
	pub port: Option<u16>,
}

impl EndpointAddress {
	pub fn new(host: Address, protocol: Protocol, port: Option<u16>) -> EndpointAddress {
		EndpointAddress {
			host: Box::new(host),
			protocol,
			port,
		}
	}

	/// Wildcard-host endpoint.
	pub fn any(protocol: Protocol, port: u16) -> EndpointAddress {
		EndpointAddress::new(Address::any(), protocol, Some(port))
	}

	/// Protocol-only wildcard endpoint, no port.
	pub fn any_protocol(protocol: Protocol) -> EndpointAddress {
		EndpointAddress::new(Address::any(), protocol, None)
	}

	pub fn protocol_port(&self) -> (Protocol, Option<u16>) {
		(self.protocol, self.port)
	}

	pub fn change_host(&self, host: Address) -> EndpointAddress {
		EndpointAddress::new(host, self.protocol, self.port)
	}

	fn write(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.host)?;
		if self.protocol != Protocol::Any {
			write!(f, "/{}", self.protocol)?;
		}
		if let Some(port) = self.port {
			write!(f, ":{port}")?;
		}
		Ok(())
	}
}

impl std::fmt::Display for EndpointAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.write(f)
	}
}

/// Any address of a network entity.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub enum Address {
	Hardware(HWAddress),
	Ip(IpAddr),
	Name(DnsName),
	Tag(EntityTag),
	Pseudo(PseudoAddress),
	Endpoint(EndpointAddress),
}

impl Address {
	pub const NULL_IP: Address = Address::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
	pub const BROADCAST_IP: Address = Address::Ip(IpAddr::V4(Ipv4Addr::BROADCAST));

	/// The wildcard address.
	pub fn any() -> Address {
		Address::Pseudo(PseudoAddress::any())
	}

	pub fn ble_ad() -> Address {
		Address::Pseudo(PseudoAddress::ble_ad())
	}

	/// Host part of the address; endpoints peel down to their host, other
	/// addresses are their own host.
	pub fn host(&self) -> &Address {
		match self {
			Address::Endpoint(ep) => &ep.host,
			a => a,
		}
	}

	pub fn ip_address(&self) -> Option<IpAddr> {
		match self.host() {
			Address::Ip(ip) => Some(*ip),
			_ => None,
		}
	}

	pub fn hw_address(&self) -> Option<&HWAddress> {
		match self.host() {
			Address::Hardware(hw) => Some(hw),
			_ => None,
		}
	}

	pub fn protocol_port(&self) -> Option<(Protocol, Option<u16>)> {
		match self {
			Address::Endpoint(ep) => Some(ep.protocol_port()),
			_ => None,
		}
	}

	pub fn is_null(&self) -> bool {
		match self {
			Address::Hardware(hw) => hw.is_null(),
			Address::Ip(ip) => match ip {
				IpAddr::V4(v4) => v4.is_unspecified(),
				IpAddr::V6(v6) => v6.is_unspecified(),
			},
			Address::Endpoint(ep) => ep.host.is_null(),
			_ => false,
		}
	}

	pub fn is_wildcard(&self) -> bool {
		match self {
			Address::Pseudo(p) => p.wildcard,
			Address::Endpoint(ep) => ep.host.is_wildcard(),
			_ => false,
		}
	}

	pub fn is_multicast(&self) -> bool {
		match self {
			Address::Hardware(hw) => hw.is_multicast(),
			Address::Ip(ip) => ip.is_multicast() || *self == Address::BROADCAST_IP,
			Address::Pseudo(p) => p.multicast,
			Address::Endpoint(ep) => ep.host.is_multicast(),
			_ => false,
		}
	}

	pub fn is_loopback(&self) -> bool {
		match self {
			Address::Ip(ip) => ip.is_loopback(),
			Address::Endpoint(ep) => ep.host.is_loopback(),
			_ => false,
		}
	}

	pub fn is_hardware(&self) -> bool {
		match self {
			Address::Hardware(_) => true,
			Address::Pseudo(p) => p.hardware,
			Address::Endpoint(ep) => ep.host.is_hardware(),
			_ => false,
		}
	}

	pub fn is_global(&self) -> bool {
		match self {
			Address::Ip(ip) => ip_is_global(*ip),
			Address::Name(_) => true,
			Address::Endpoint(ep) => ep.host.is_global(),
			_ => false,
		}
	}

	pub fn is_tag(&self) -> bool {
		match self {
			Address::Tag(_) => true,
			Address::Endpoint(ep) => ep.host.is_tag(),
			_ => false,
		}
	}

	/// Priority when choosing one address to represent an entity.
	pub fn priority(&self) -> i32 {
		match self {
			Address::Hardware(hw) => {
				if hw.is_multicast() {
					11
				} else {
					1
				}
			},
			Address::Ip(_) => 2,
			Address::Name(_) => 3,
			Address::Tag(_) => 3,
			Address::Pseudo(_) => 3,
			Address::Endpoint(ep) => ep.host.priority() + 1,
		}
	}

	/// Replace the host of an endpoint address; other addresses are
	/// returned unchanged.
	pub fn change_host(&self, host: &Address) -> Address {
		match self {
			Address::Endpoint(ep) => Address::Endpoint(ep.change_host(host.clone())),
			a => a.clone(),
		}
	}

	/// A string form that parses back unambiguously.
	pub fn parseable_value(&self) -> String {
		match self {
			Address::Hardware(hw) => format!("{hw}|hw"),
			Address::Ip(ip) => ip.to_string(),
			Address::Name(n) => format!("{n}|name"),
			Address::Tag(t) => t.to_string(),
			Address::Pseudo(p) => p.to_string(),
			Address::Endpoint(ep) => {
				let mut s = ep.host.parseable_value();
				if ep.protocol != Protocol::Any {
					s.push('/');
					s.push_str(ep.protocol.as_str());
				}
				if let Some(port) = ep.port {
					s.push(':');
					s.push_str(&port.to_string());
				}
				s
			},
		}
	}

	/// The highest-priority address, skipping tags and the filtered kinds.
	/// Ties go to the earliest address. Falls back to the null IP.
	pub fn get_prioritized<'a, I>(addresses: I, ip: bool, hw: bool, dns: bool) -> Address
	where
		I: IntoIterator<Item = &'a Address>,
	{
		let mut found: Option<&Address> = None;
		for a in addresses {
			if a.is_tag() {
				continue;
			}
			match a.host() {
				Address::Ip(_) if !ip => continue,
				Address::Hardware(_) if !hw => continue,
				Address::Name(_) if !dns => continue,
				_ => {},
			}
			if found.is_none_or(|f| f.priority() < a.priority()) {
				found = Some(a);
			}
		}
		found.cloned().unwrap_or(Address::NULL_IP)
	}

	pub fn get_multicast<'a, I>(addresses: I) -> Option<&'a Address>
	where
		I: IntoIterator<Item = &'a Address>,
	{
		addresses.into_iter().find(|a| a.is_multicast())
	}

	pub fn get_tag<'a, I>(addresses: I) -> Option<&'a EntityTag>
	where
		I: IntoIterator<Item = &'a Address>,
	{
		addresses.into_iter().find_map(|a| match a {
			Address::Tag(t) => Some(t),
			_ => None,
		})
	}

	/// Parse any address type from a string, with type given as
	/// `value|type`. Bare values parse as IP when possible, wildcard as
	/// the any-address, and tags otherwise.
	pub fn parse(address: &str) -> Result<Address, ParseError> {
		if let Some((v, t)) = address.rsplit_once('|') {
			return match t {
				"tag" => Ok(Address::Tag(EntityTag::parse(v)?)),
				"ip" => v
					.parse::<IpAddr>()
					.map(Address::Ip)
					.map_err(|_| ParseError::IpAddress(v.to_string())),
				"hw" => Ok(Address::Hardware(HWAddress::new(v)?)),
				"name" => Ok(Address::Name(DnsName::new(v)?)),
				_ => Err(ParseError::AddressType(t.to_string())),
			};
		}
		if address == "*" {
			return Ok(Address::any());
		}
		if let Ok(ip) = parse_ip(address) {
			return Ok(Address::Ip(ip));
		}
		if address.chars().next().is_some_and(|c| c.is_ascii_digit()) {
			return Err(ParseError::IpAddress(address.to_string()));
		}
		Ok(Address::Tag(EntityTag::parse(address)?))
	}

	/// Parse an address or an endpoint `addr/proto[:port]`.
	pub fn parse_endpoint(value: &str) -> Result<Address, ParseError> {
		let Some((a, p)) = value.split_once('/') else {
			return Address::parse(value);
		};
		let addr = Address::parse(a)?;
		let (prot, port) = match p.split_once(':') {
			Some((prot, port)) => {
				let port: u16 = port
					.parse()
					.map_err(|_| ParseError::Port(value.to_string()))?;
				(prot, Some(port))
			},
			None => (p, None),
		};
		let protocol = Protocol::get(prot).ok_or_else(|| ParseError::Protocol(prot.to_string()))?;
		Ok(Address::Endpoint(EndpointAddress::new(addr, protocol, port)))
	}
}

impl std::fmt::Display for Address {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Address::Hardware(hw) => hw.fmt(f),
			Address::Ip(ip) => ip.fmt(f),
			Address::Name(n) => n.fmt(f),
			Address::Tag(t) => t.fmt(f),
			Address::Pseudo(p) => p.fmt(f),
			Address::Endpoint(ep) => ep.fmt(f),
		}
	}
}

impl PartialOrd for Address {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Address {
	fn cmp(&self, other: &Self) -> Ordering {
		// total order by display form, like the sets these live in are shown
		self.to_string().cmp(&other.to_string())
	}
}

impl Serialize for Address {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_str(&self.parseable_value())
	}
}

/// Parse an IP address, accepting IPv6 in brackets.
fn parse_ip(address: &str) -> Result<IpAddr, ParseError> {
	let trimmed = address
		.strip_prefix('[')
		.and_then(|a| a.strip_suffix(']'))
		.unwrap_or(address);
	trimmed
		.parse::<IpAddr>()
		.map_err(|_| ParseError::IpAddress(address.to_string()))
}

/// Parse an IPv4/IPv6 address with an optional `:port` suffix.
pub fn parse_ip_with_port(address: &str, default_port: u16) -> Result<(IpAddr, u16), ParseError> {
	match address.split_once(':') {
		Some((ad, p)) if !ad.contains(':') => {
			let port: u16 = p
				.parse()
				.map_err(|_| ParseError::Port(address.to_string()))?;
			Ok((parse_ip(ad)?, port))
		},
		_ => Ok((parse_ip(address)?, default_port)),
	}
}

// Stable classification, not the unstable std `IpAddr::is_global`.
fn ip_is_global(ip: IpAddr) -> bool {
	match ip {
		IpAddr::V4(v4) => {
			!(v4.is_private()
				|| v4.is_loopback()
				|| v4.is_link_local()
				|| v4.is_broadcast()
				|| v4.is_documentation()
				|| v4.is_unspecified()
				|| v4.octets()[0] >= 224)
		},
		IpAddr::V6(v6) => {
			!(v6.is_loopback()
				|| v6.is_unspecified()
				|| v6.is_multicast()
				|| (v6.segments()[0] & 0xffc0) == 0xfe80
				|| (v6.segments()[0] & 0xfe00) == 0xfc00)
		},
	}
}

/// A named network, possibly with an IP mask. Equality is by name only.
#[derive(Debug, Clone)]
pub struct Network {
	pub name: Strng,
	pub ip_network: Option<IpNet>,
}

impl Network {
	pub fn new(name: &str) -> Network {
		Network {
			name: strng::new(name),
			ip_network: None,
		}
	}

	pub fn with_mask(name: &str, mask: IpNet) -> Network {
		Network {
			name: strng::new(name),
			ip_network: Some(mask),
		}
	}

	/// Is the address local to this network? Multicast, null and non-IP
	/// addresses always are; IP addresses iff the mask contains them.
	pub fn is_local(&self, address: &Address) -> bool {
		let h = address.host();
		if h.is_multicast() || h.is_null() {
			return true;
		}
		let Address::Ip(ip) = h else {
			return true;
		};
		self.ip_network.is_some_and(|net| net.contains(ip))
	}
}

impl PartialEq for Network {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
	}
}

impl Eq for Network {}

impl std::hash::Hash for Network {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.name.hash(state);
	}
}

impl PartialOrd for Network {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Network {
	fn cmp(&self, other: &Self) -> Ordering {
		self.name.cmp(&other.name)
	}
}

impl std::fmt::Display for Network {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.name)
	}
}

/// An address within a specific network, the matching index key.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct AddressAtNetwork {
	pub address: Address,
	pub network: Network,
}

impl AddressAtNetwork {
	pub fn new(address: Address, network: Network) -> AddressAtNetwork {
		AddressAtNetwork { address, network }
	}
}

impl std::fmt::Display for AddressAtNetwork {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}@{}", self.address, self.network)
	}
}

/// Segment of a [`SystemAddress`], optionally typed.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct AddressSegment {
	pub segment_type: Option<Strng>,
	pub address: Address,
}

impl AddressSegment {
	pub fn new(address: Address) -> AddressSegment {
		AddressSegment {
			segment_type: None,
			address,
		}
	}

	pub fn typed(segment_type: &str, address: Address) -> AddressSegment {
		AddressSegment {
			segment_type: Some(strng::new(segment_type)),
			address,
		}
	}

	fn parseable_value(&self) -> String {
		let v = self.address.parseable_value().replace("*/", "");
		match &self.segment_type {
			Some(t) => format!("{t}={v}"),
			None => v,
		}
	}
}

/// Hierarchical address locating an entity within the system, used for
/// serialization and cross-references.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Default)]
pub struct SystemAddress {
	pub segments: Vec<AddressSegment>,
}

impl SystemAddress {
	pub fn new<I: IntoIterator<Item = Address>>(addresses: I) -> SystemAddress {
		SystemAddress {
			segments: addresses.into_iter().map(AddressSegment::new).collect(),
		}
	}

	/// Service under its parent.
	pub fn service(parent: &SystemAddress, service: Address) -> SystemAddress {
		let mut segments = parent.segments.clone();
		segments.push(AddressSegment::new(service));
		SystemAddress { segments }
	}

	/// Component under its parent, with a type prefix.
	pub fn component(parent: &SystemAddress, tag: &EntityTag, segment_type: &str) -> SystemAddress {
		let mut segments = parent.segments.clone();
		segments.push(AddressSegment::typed(
			segment_type,
			Address::Tag(tag.clone()),
		));
		SystemAddress { segments }
	}

	/// Connection as `source=...&target=...`.
	pub fn connection(source: &SystemAddress, target: &SystemAddress) -> SystemAddress {
		let mut segments: Vec<AddressSegment> = source
			.segments
			.iter()
			.map(|s| AddressSegment::new(s.address.clone()))
			.collect();
		let mut target_segments: Vec<AddressSegment> = target
			.segments
			.iter()
			.map(|s| AddressSegment::new(s.address.clone()))
			.collect();
		if let Some(first) = segments.first_mut() {
			first.segment_type = Some(strng::literal!("source"));
		}
		if let Some(first) = target_segments.first_mut() {
			first.segment_type = Some(strng::literal!("target"));
		}
		segments.extend(target_segments);
		SystemAddress { segments }
	}

	/// The sequence with its first segment removed.
	pub fn tail(&self) -> SystemAddress {
		SystemAddress {
			segments: self.segments.get(1..).unwrap_or_default().to_vec(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.segments.is_empty()
	}

	pub fn parseable_value(&self) -> String {
		self.segments
			.iter()
			.map(|s| s.parseable_value())
			.collect::<Vec<_>>()
			.join("&")
	}

	/// Parse `&`-joined segments with optional `type=` prefixes.
	pub fn parse(value: &str) -> Result<SystemAddress, ParseError> {
		let mut segments = Vec::new();
		for segment in value.split('&') {
			match segment.split_once('=') {
				// typed segments carry host addresses or component tags
				Some((t, v)) => {
					segments.push(AddressSegment::typed(t, Address::parse_endpoint(v)?));
				},
				None => segments.push(AddressSegment::new(Self::parse_segment(segment)?)),
			}
		}
		Ok(SystemAddress { segments })
	}

	/// Segment values are endpoints, but wildcard-host endpoints serialize
	/// without the host: `udp:67` or a bare protocol name.
	fn parse_segment(value: &str) -> Result<Address, ParseError> {
		if !value.contains('/') {
			if let Some((prot, port)) = value.split_once(':') {
				if let (Some(protocol), Ok(port)) = (Protocol::get(prot), port.parse::<u16>()) {
					return Ok(Address::Endpoint(EndpointAddress::any(protocol, port)));
				}
			} else if let Some(protocol) = Protocol::get(value) {
				if protocol != Protocol::Any {
					return Ok(Address::Endpoint(EndpointAddress::any_protocol(protocol)));
				}
			}
		}
		Address::parse_endpoint(value)
	}
}

impl std::fmt::Display for SystemAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.parseable_value())
	}
}
