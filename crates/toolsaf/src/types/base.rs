//! Entity statuses, verdicts and classification enums.

use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

/// Lifecycle label of a modeled entity.
///
/// Declared entities start as `Expected`; entities synthesized from
/// observations are `Unexpected` and may be promoted to `External` by
/// external-activity policy. `Placeholder` marks entities cloned during
/// reset that are not part of the original statement; they are excluded
/// from iteration but never deleted.
#[derive(Default, Debug, Hash, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum Status {
	Expected,
	#[default]
	Unexpected,
	External,
	Placeholder,
}

impl Status {
	pub fn as_str(&self) -> &'static str {
		match self {
			Status::Expected => "Expected",
			Status::Unexpected => "Unexpected",
			Status::External => "External",
			Status::Placeholder => "Placeholder",
		}
	}
}

impl std::fmt::Display for Status {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outcome attached to entities and properties.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Serialize, Deserialize)]
pub enum Verdict {
	Pass,
	Fail,
	Incon,
	Ignore,
}

impl Verdict {
	/// Aggregate two optional verdicts bottom-up. `Fail` dominates, `Incon`
	/// taints `Pass`, `Ignore` is neutral unless both operands ignore.
	pub fn aggregate(a: Option<Verdict>, b: Option<Verdict>) -> Option<Verdict> {
		use Verdict::*;
		match (a, b) {
			(None, v) => v,
			(v, None) => v,
			(Some(Fail), _) | (_, Some(Fail)) => Some(Fail),
			(Some(Ignore), Some(Ignore)) => Some(Ignore),
			(Some(Ignore), Some(v)) | (Some(v), Some(Ignore)) => Some(v),
			(Some(Pass), Some(Pass)) => Some(Pass),
			(Some(Incon), _) | (_, Some(Incon)) => Some(Incon),
		}
	}

	/// Aggregate over a sequence of verdicts.
	pub fn aggregate_all<I: IntoIterator<Item = Option<Verdict>>>(verdicts: I) -> Option<Verdict> {
		verdicts
			.into_iter()
			.fold(None, |acc, v| Verdict::aggregate(acc, v))
	}

	/// Update rule for alternatives: the first non-inconclusive verdict wins.
	pub fn update(a: Verdict, b: Verdict) -> Verdict {
		if a != Verdict::Incon {
			a
		} else {
			b
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Verdict::Pass => "Pass",
			Verdict::Fail => "Fail",
			Verdict::Incon => "Incon",
			Verdict::Ignore => "Ignore",
		}
	}

	pub fn parse(value: &str) -> Result<Verdict, ParseError> {
		match value.to_ascii_lowercase().as_str() {
			"pass" => Ok(Verdict::Pass),
			"fail" => Ok(Verdict::Fail),
			"incon" => Ok(Verdict::Incon),
			"ignore" => Ok(Verdict::Ignore),
			_ => Err(ParseError::Serialized(format!("unknown verdict '{value}'"))),
		}
	}
}

impl std::fmt::Display for Verdict {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Coarse classification of a network node.
#[derive(Default, Debug, Hash, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum HostType {
	#[default]
	Generic,
	Device,
	Mobile,
	Browser,
	Remote,
	Administrative,
}

impl HostType {
	pub fn as_str(&self) -> &'static str {
		match self {
			HostType::Generic => "Generic",
			HostType::Device => "Device",
			HostType::Mobile => "Mobile",
			HostType::Browser => "Browser",
			HostType::Remote => "Remote",
			HostType::Administrative => "Administrative",
		}
	}
}

impl std::fmt::Display for HostType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Connection classification.
#[derive(Default, Debug, Hash, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum ConnectionType {
	#[default]
	Unknown,
	Encrypted,
	Administrative,
	Logical,
}

impl ConnectionType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ConnectionType::Unknown => "Unknown",
			ConnectionType::Encrypted => "Encrypted",
			ConnectionType::Administrative => "Administrative",
			ConnectionType::Logical => "Logical",
		}
	}
}

/// Policy level for undeclared connections an entity may participate in.
/// The levels are monotonically ordered from most to least restrictive.
#[derive(
	Default, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Serialize, Deserialize,
)]
pub enum ExternalActivity {
	#[default]
	Banned,
	Passive,
	Open,
	Unlimited,
}

impl ExternalActivity {
	pub fn parse(value: &str) -> Result<ExternalActivity, ParseError> {
		match value {
			"Banned" => Ok(ExternalActivity::Banned),
			"Passive" => Ok(ExternalActivity::Passive),
			"Open" => Ok(ExternalActivity::Open),
			"Unlimited" => Ok(ExternalActivity::Unlimited),
			_ => Err(ParseError::Serialized(format!(
				"unknown external activity '{value}'"
			))),
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ExternalActivity::Banned => "Banned",
			ExternalActivity::Passive => "Passive",
			ExternalActivity::Open => "Open",
			ExternalActivity::Unlimited => "Unlimited",
		}
	}
}
