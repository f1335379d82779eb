//! Address range matching for broadcast and multicast targets.

use std::net::IpAddr;

use crate::errors::ParseError;
use crate::types::Address;

/// IPv4 range with per-octet bounds, `*` matching any octet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
	parts: [(u8, u8); 4],
}

impl AddressRange {
	/// Parse a range like `*.*.255.255`.
	pub fn parse_range(specification: &str) -> Result<AddressRange, ParseError> {
		let parts: Vec<&str> = specification.split('.').collect();
		if parts.len() != 4 {
			return Err(ParseError::AddressRange(specification.to_string()));
		}
		let mut range_parts = [(0u8, 0u8); 4];
		for (i, part) in parts.iter().enumerate() {
			if *part == "*" {
				range_parts[i] = (0, 255);
			} else {
				let octet: u8 = part
					.parse()
					.map_err(|_| ParseError::AddressRange(specification.to_string()))?;
				range_parts[i] = (octet, octet);
			}
		}
		Ok(AddressRange { parts: range_parts })
	}

	pub fn is_match(&self, address: &Address) -> bool {
		let Some(IpAddr::V4(v4)) = address.ip_address() else {
			return false;
		};
		self.parts
			.iter()
			.zip(v4.octets())
			.all(|((lo, hi), octet)| *lo <= octet && octet <= *hi)
	}
}

impl std::fmt::Display for AddressRange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let parts: Vec<String> = self
			.parts
			.iter()
			.map(|(lo, hi)| match (lo, hi) {
				(0, 255) => "*".to_string(),
				(lo, hi) if lo == hi => lo.to_string(),
				(lo, hi) => format!("{lo}-{hi}"),
			})
			.collect();
		f.write_str(&parts.join("."))
	}
}

/// Target of a multicast or broadcast service: either one fixed address or
/// a range of addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MulticastTarget {
	Fixed(Address),
	Range(AddressRange),
}

impl MulticastTarget {
	pub fn is_match(&self, address: &Address) -> bool {
		match self {
			MulticastTarget::Fixed(a) => a == address.host(),
			MulticastTarget::Range(r) => r.is_match(address),
		}
	}

	/// The address used when declaring the sending side, when fixed.
	pub fn fixed_address(&self) -> Option<&Address> {
		match self {
			MulticastTarget::Fixed(a) => Some(a),
			MulticastTarget::Range(_) => None,
		}
	}
}

impl std::fmt::Display for MulticastTarget {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			MulticastTarget::Fixed(a) => write!(f, "Multicast: {a}"),
			MulticastTarget::Range(r) => write!(f, "Multicast: {r}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn range_parse_and_match() {
		let r = AddressRange::parse_range("*.*.255.255").unwrap();
		assert!(r.is_match(&Address::parse("10.20.255.255").unwrap()));
		assert!(!r.is_match(&Address::parse("10.20.255.254").unwrap()));
		assert!(!r.is_match(&Address::parse("aa:bb:cc:dd:ee:ff|hw").unwrap()));
		assert_eq!(r.to_string(), "*.*.255.255");

		assert!(AddressRange::parse_range("1.2.3").is_err());
		assert!(AddressRange::parse_range("1.2.3.256").is_err());
	}

	#[test]
	fn multicast_target_match() {
		let fixed = MulticastTarget::Fixed(Address::BROADCAST_IP);
		assert!(fixed.is_match(&Address::BROADCAST_IP));
		assert!(!fixed.is_match(&Address::parse("1.2.3.4").unwrap()));

		let range = MulticastTarget::Range(AddressRange::parse_range("224.0.0.*").unwrap());
		assert!(range.is_match(&Address::parse("224.0.0.251").unwrap()));
		assert!(!range.is_match(&Address::parse("224.0.1.1").unwrap()));
	}
}
