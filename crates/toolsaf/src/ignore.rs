//! Rules for ignoring tool findings by file type, property and location.

use indexmap::IndexMap;
use indexmap::IndexSet;
use toolsaf_core::strng;
use toolsaf_core::Strng;

use crate::property::{PropertyKey, PropertyValue, PropertyVerdictValue};
use crate::types::Verdict;

/// One ignore rule: applies to a file type, optionally restricted to
/// specific properties and locations.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
	pub file_type: Strng,
	/// Properties the rule applies to; empty applies to all.
	pub properties: IndexSet<PropertyKey>,
	/// System addresses the rule applies at; empty applies everywhere.
	pub at: IndexSet<Strng>,
	pub explanation: Strng,
}

impl IgnoreRule {
	fn matches(&self, key: &PropertyKey, at_address: &str) -> bool {
		(self.properties.is_empty() || self.properties.contains(key))
			&& (self.at.is_empty() || self.at.contains(at_address))
	}
}

/// The ignore-rules overlay, built statement-side and read-only during
/// inspection.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
	rules: IndexMap<Strng, Vec<IgnoreRule>>,
	current: Option<(Strng, usize)>,
}

impl IgnoreRules {
	pub fn new() -> IgnoreRules {
		IgnoreRules::default()
	}

	/// Start a new rule for the given file type.
	pub fn new_rule(&mut self, file_type: &str) -> &mut Self {
		let key = strng::new(file_type);
		let rules = self.rules.entry(key.clone()).or_default();
		rules.push(IgnoreRule {
			file_type: key.clone(),
			properties: IndexSet::new(),
			at: IndexSet::new(),
			explanation: strng::EMPTY,
		});
		self.current = Some((key, rules.len() - 1));
		self
	}

	fn current_rule(&mut self) -> &mut IgnoreRule {
		let (key, i) = self.current.clone().expect("call new_rule() first");
		&mut self.rules.get_mut(&key).expect("rule file type exists")[i]
	}

	/// Restrict the current rule to the given properties.
	pub fn properties(&mut self, properties: &[&str]) -> &mut Self {
		for p in properties {
			let key = PropertyKey::parse(p);
			self.current_rule().properties.insert(key);
		}
		self
	}

	/// Restrict the current rule to a location, given as the entity's
	/// system address.
	pub fn at(&mut self, system_address: &str) -> &mut Self {
		self.current_rule().at.insert(strng::new(system_address));
		self
	}

	/// Explain why the rule exists.
	pub fn because(&mut self, explanation: &str) -> &mut Self {
		self.current_rule().explanation = strng::new(explanation);
		self
	}

	/// All rules, in declaration order.
	pub fn iter(&self) -> impl Iterator<Item = &IgnoreRule> {
		self.rules.values().flatten()
	}

	/// Rewrite a property value to ignored when a rule matches. The rule's
	/// explanation, if any, replaces the value's explanation.
	pub fn apply(
		&self,
		file_type: &str,
		key: &PropertyKey,
		value: PropertyValue,
		at_address: &str,
	) -> PropertyValue {
		let Some(rules) = self.rules.get(file_type) else {
			return value;
		};
		for rule in rules {
			if rule.matches(key, at_address) {
				let explanation = if rule.explanation.is_empty() {
					strng::new(value.explanation())
				} else {
					rule.explanation.clone()
				};
				return PropertyValue::Verdict(PropertyVerdictValue {
					verdict: Verdict::Ignore,
					explanation,
				});
			}
		}
		value
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::property::properties;

	#[test]
	fn rule_rewrites_to_ignore() {
		let mut rules = IgnoreRules::new();
		rules.new_rule("nmap").because("known scanner artifact");

		let (key, value) = properties::MITM.verdict_explained(Verdict::Fail, "mitm detected");
		let out = rules.apply("nmap", &key, value.clone(), "Device");
		assert_eq!(out.get_verdict(), Some(Verdict::Ignore));
		assert_eq!(out.explanation(), "known scanner artifact");

		// other file types unaffected
		let out = rules.apply("pcap", &key, value, "Device");
		assert_eq!(out.get_verdict(), Some(Verdict::Fail));
	}

	#[test]
	fn rule_filters_by_property_and_location() {
		let mut rules = IgnoreRules::new();
		rules
			.new_rule("zed")
			.properties(&["check:web"])
			.at("Backend&tcp:443");

		let (key, value) = properties::WEB.verdict(Verdict::Fail);
		let out = rules.apply("zed", &key, value.clone(), "Backend&tcp:443");
		assert_eq!(out.get_verdict(), Some(Verdict::Ignore));
		// keeps the original explanation when the rule has none
		assert_eq!(out.explanation(), "");

		// location mismatch
		let out = rules.apply("zed", &key, value.clone(), "Device&tcp:443");
		assert_eq!(out.get_verdict(), Some(Verdict::Fail));

		// property mismatch
		let (key, value) = properties::MITM.verdict(Verdict::Fail);
		let out = rules.apply("zed", &key, value, "Backend&tcp:443");
		assert_eq!(out.get_verdict(), Some(Verdict::Fail));
	}
}
