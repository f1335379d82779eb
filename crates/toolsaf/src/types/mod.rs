pub mod address;
pub mod base;

pub use address::{
	Address, AddressAtNetwork, AddressSegment, DnsName, EndpointAddress, EntityTag, HWAddress,
	Network, Protocol, PseudoAddress, SystemAddress,
};
pub use base::{ConnectionType, ExternalActivity, HostType, Status, Verdict};
