use thiserror::Error;

/// The user-supplied statement is inconsistent. Raised at build time and
/// aborts the run.
#[derive(Debug, Error)]
pub enum ConfigurationError {
	#[error("duplicate name '{0}' under '{1}'")]
	DuplicateName(String, String),
	#[error("address {0} is outside all declared networks")]
	AddressOutsideNetworks(String),
	#[error("network {0} not found")]
	UnknownNetwork(String),
	#[error("'{0}' is used by no hosts")]
	UsedByNoHosts(String),
	#[error("browser '{0}' cannot host services")]
	BrowserWithServices(String),
	#[error("host '{0}' has more than one software component")]
	DuplicateSoftware(String),
	#[error("{0}")]
	Invalid(String),
}

/// Malformed address, endpoint or serialized node.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("bad HW address '{0}'")]
	HwAddress(String),
	#[error("bad IP address '{0}'")]
	IpAddress(String),
	#[error("DNS name cannot be empty")]
	EmptyDnsName,
	#[error("bad entity tag '{0}'")]
	EntityTag(String),
	#[error("unknown address type '{0}', allowed are 'tag', 'ip', 'hw', and 'name'")]
	AddressType(String),
	#[error("unknown protocol '{0}'")]
	Protocol(String),
	#[error("endpoint '{0}' has port but no protocol")]
	PortWithoutProtocol(String),
	#[error("bad port in '{0}'")]
	Port(String),
	#[error("invalid address range '{0}'")]
	AddressRange(String),
	#[error("bad serialized value: {0}")]
	Serialized(String),
}

/// Tool artifact unreadable or schema-violating. The offending file is
/// skipped with a warning and the batch continues.
#[derive(Debug, Error)]
pub enum AdapterError {
	#[error("unsupported file type '{0}'")]
	UnsupportedFileType(String),
	#[error("cannot read {0}: {1}")]
	Io(String, #[source] std::io::Error),
	#[error("bad content in {0}: {1}")]
	Content(String, String),
	#[error(transparent)]
	Parse(#[from] ParseError),
}
