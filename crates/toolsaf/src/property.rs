//! Typed property keys and verdict-carrying values attached to entities.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use toolsaf_core::strng;
use toolsaf_core::Strng;

use crate::errors::ParseError;
use crate::types::Verdict;

/// Properties of an entity, in insertion order.
pub type PropertyMap = IndexMap<PropertyKey, PropertyValue>;

/// A property key: a `:`-joined namespace path such as `check:encryption`.
/// The `model` flag marks keys declared in the statement; values for model
/// keys are only accepted on entities that already declare them.
#[derive(Debug, Clone)]
pub struct PropertyKey {
	name: Strng,
	model: bool,
}

impl PropertyKey {
	pub fn new(segments: &[&str]) -> PropertyKey {
		PropertyKey {
			name: strng::new(&segments.join(":")),
			model: false,
		}
	}

	pub fn parse(name: &str) -> PropertyKey {
		PropertyKey {
			name: strng::new(name),
			model: false,
		}
	}

	/// Mark as a model-declared key.
	pub fn model(mut self) -> PropertyKey {
		self.model = true;
		self
	}

	pub fn is_model(&self) -> bool {
		self.model
	}

	pub fn get_name(&self) -> &Strng {
		&self.name
	}

	/// Key-value pair with a verdict value, no explanation.
	pub fn verdict(&self, verdict: Verdict) -> (PropertyKey, PropertyValue) {
		(
			self.clone(),
			PropertyValue::Verdict(PropertyVerdictValue {
				verdict,
				explanation: strng::EMPTY,
			}),
		)
	}

	/// Key-value pair with a verdict value and explanation.
	pub fn verdict_explained(
		&self,
		verdict: Verdict,
		explanation: &str,
	) -> (PropertyKey, PropertyValue) {
		(
			self.clone(),
			PropertyValue::Verdict(PropertyVerdictValue {
				verdict,
				explanation: strng::new(explanation),
			}),
		)
	}

	/// Key-value pair aggregating the given sub-keys.
	pub fn value_set<I: IntoIterator<Item = PropertyKey>>(
		&self,
		sub_keys: I,
	) -> (PropertyKey, PropertyValue) {
		(
			self.clone(),
			PropertyValue::Set(PropertySetValue {
				sub_keys: sub_keys.into_iter().collect(),
				explanation: strng::EMPTY,
			}),
		)
	}

	pub fn get<'a>(&self, properties: &'a PropertyMap) -> Option<&'a PropertyValue> {
		properties.get(self)
	}

	/// Resolve the verdict this key carries in the given properties.
	pub fn get_verdict(&self, properties: &PropertyMap) -> Option<Verdict> {
		match properties.get(self)? {
			PropertyValue::Verdict(v) => Some(v.verdict),
			PropertyValue::Set(s) => Some(s.get_overall_verdict(properties)),
			PropertyValue::Release(_) => None,
		}
	}

	pub fn put_verdict(&self, properties: &mut PropertyMap, verdict: Verdict) {
		let (k, v) = self.verdict(verdict);
		properties.insert(k, v);
	}

	/// Merge a new value into the properties. Set values union their
	/// sub-keys into an existing set; other values replace.
	pub fn update(&self, properties: &mut PropertyMap, value: PropertyValue) {
		if let (Some(PropertyValue::Set(old)), PropertyValue::Set(new)) =
			(properties.get_mut(self), &value)
		{
			old.sub_keys.extend(new.sub_keys.iter().cloned());
			if !new.explanation.is_empty() {
				old.explanation = new.explanation.clone();
			}
			return;
		}
		properties.insert(self.clone(), value);
	}

	/// Value to keep over a model reset, if any. Model-declared keys and
	/// release information survive; evidence-derived values do not.
	pub fn reset(&self, value: &PropertyValue) -> Option<PropertyValue> {
		if matches!(value, PropertyValue::Release(_)) {
			return Some(value.clone());
		}
		if self.model {
			return Some(value.clone());
		}
		None
	}
}

impl PartialEq for PropertyKey {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
	}
}

impl Eq for PropertyKey {}

impl std::hash::Hash for PropertyKey {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.name.hash(state);
	}
}

impl PartialOrd for PropertyKey {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for PropertyKey {
	fn cmp(&self, other: &Self) -> Ordering {
		self.name.cmp(&other.name)
	}
}

impl std::fmt::Display for PropertyKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.name)
	}
}

/// A verdict with an optional explanation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyVerdictValue {
	pub verdict: Verdict,
	pub explanation: Strng,
}

/// An aggregate over other property keys. The overall verdict passes only
/// when every sub-key resolves to a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySetValue {
	pub sub_keys: IndexSet<PropertyKey>,
	pub explanation: Strng,
}

impl PropertySetValue {
	pub fn get_overall_verdict(&self, properties: &PropertyMap) -> Verdict {
		let mut acc = None;
		for key in &self.sub_keys {
			let v = key.get_verdict(properties).unwrap_or(Verdict::Incon);
			acc = Verdict::aggregate(acc, Some(v));
		}
		acc.unwrap_or(Verdict::Incon)
	}
}

/// Software release information, an opaque property value with its own
/// JSON form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
	pub sw_name: Strng,
	pub first_release: Option<DateTime<Utc>>,
	pub latest_release: Option<DateTime<Utc>>,
	pub latest_release_name: Strng,
	pub interval_days: Option<i64>,
}

impl ReleaseInfo {
	pub fn new(sw_name: &str) -> ReleaseInfo {
		ReleaseInfo {
			sw_name: strng::new(sw_name),
			first_release: None,
			latest_release: None,
			latest_release_name: strng::literal!("?"),
			interval_days: None,
		}
	}
}

/// Value of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
	Verdict(PropertyVerdictValue),
	Set(PropertySetValue),
	Release(ReleaseInfo),
}

impl PropertyValue {
	/// Direct verdict of the value, without entity context. Set values
	/// resolve only against a property map, see
	/// [`PropertySetValue::get_overall_verdict`].
	pub fn get_verdict(&self) -> Option<Verdict> {
		match self {
			PropertyValue::Verdict(v) => Some(v.verdict),
			_ => None,
		}
	}

	pub fn explanation(&self) -> &str {
		match self {
			PropertyValue::Verdict(v) => &v.explanation,
			PropertyValue::Set(s) => &s.explanation,
			PropertyValue::Release(_) => "",
		}
	}

	/// Encode the value into the given JSON object.
	pub fn write_json(&self, data: &mut serde_json::Map<String, Value>) {
		match self {
			PropertyValue::Verdict(v) => {
				data.insert("verdict".into(), json!(v.verdict.as_str()));
				if !v.explanation.is_empty() {
					data.insert("explanation".into(), json!(v.explanation.as_str()));
				}
			},
			PropertyValue::Set(s) => {
				let keys: Vec<&str> = s.sub_keys.iter().map(|k| k.get_name().as_str()).collect();
				data.insert("sub-keys".into(), json!(keys));
				if !s.explanation.is_empty() {
					data.insert("explanation".into(), json!(s.explanation.as_str()));
				}
			},
			PropertyValue::Release(r) => {
				data.insert("sw-name".into(), json!(r.sw_name.as_str()));
				if let Some(fr) = &r.first_release {
					data.insert("first-release".into(), json!(fr.to_rfc3339()));
				}
				if let Some(lr) = &r.latest_release {
					data.insert("latest-release".into(), json!(lr.to_rfc3339()));
				}
				data.insert(
					"latest-release-name".into(),
					json!(r.latest_release_name.as_str()),
				);
				if let Some(days) = r.interval_days {
					data.insert("interval-days".into(), json!(days));
				}
			},
		}
	}

	pub fn to_json(&self) -> Value {
		let mut data = serde_json::Map::new();
		self.write_json(&mut data);
		Value::Object(data)
	}

	/// Decode a value from its JSON object form.
	pub fn read_json(data: &Value) -> Result<PropertyValue, ParseError> {
		let explanation = data
			.get("explanation")
			.and_then(Value::as_str)
			.unwrap_or("");
		if let Some(name) = data.get("sw-name").and_then(Value::as_str) {
			let mut info = ReleaseInfo::new(name);
			info.first_release = read_timestamp(data, "first-release")?;
			info.latest_release = read_timestamp(data, "latest-release")?;
			if let Some(n) = data.get("latest-release-name").and_then(Value::as_str) {
				info.latest_release_name = strng::new(n);
			}
			info.interval_days = data.get("interval-days").and_then(Value::as_i64);
			return Ok(PropertyValue::Release(info));
		}
		if let Some(verdict) = data.get("verdict").and_then(Value::as_str) {
			return Ok(PropertyValue::Verdict(PropertyVerdictValue {
				verdict: Verdict::parse(verdict)?,
				explanation: strng::new(explanation),
			}));
		}
		if let Some(keys) = data.get("sub-keys").and_then(Value::as_array) {
			let sub_keys = keys
				.iter()
				.filter_map(Value::as_str)
				.map(PropertyKey::parse)
				.collect();
			return Ok(PropertyValue::Set(PropertySetValue {
				sub_keys,
				explanation: strng::new(explanation),
			}));
		}
		Err(ParseError::Serialized(format!("bad property value {data}")))
	}
}

fn read_timestamp(data: &Value, field: &str) -> Result<Option<DateTime<Utc>>, ParseError> {
	match data.get(field).and_then(Value::as_str) {
		None => Ok(None),
		Some(s) => DateTime::parse_from_rfc3339(s)
			.map(|dt| Some(dt.with_timezone(&Utc)))
			.map_err(|_| ParseError::Serialized(format!("bad timestamp '{s}'"))),
	}
}

/// Well-known property keys.
pub mod properties {
	use super::*;

	/// Entity or connection seen as expected; pass/fail verdict of presence.
	pub static EXPECTED: Lazy<PropertyKey> = Lazy::new(|| PropertyKey::new(&["check", "expected"]));
	/// Connection resisted a man-in-the-middle attempt.
	pub static MITM: Lazy<PropertyKey> = Lazy::new(|| PropertyKey::new(&["check", "mitm"]));
	pub static ENCRYPTION: Lazy<PropertyKey> =
		Lazy::new(|| PropertyKey::new(&["check", "encryption"]));
	pub static AUTHENTICATION: Lazy<PropertyKey> =
		Lazy::new(|| PropertyKey::new(&["check", "auth"]));
	pub static PROTOCOL: Lazy<PropertyKey> = Lazy::new(|| PropertyKey::new(&["check", "protocol"]));
	pub static WEB: Lazy<PropertyKey> = Lazy::new(|| PropertyKey::new(&["check", "web"]));
	pub static COOKIES: Lazy<PropertyKey> = Lazy::new(|| PropertyKey::new(&["check", "cookies"]));
	pub static FUZZ: Lazy<PropertyKey> = Lazy::new(|| PropertyKey::new(&["check", "fuzz"]));
	pub static VULNERABILITIES: Lazy<PropertyKey> =
		Lazy::new(|| PropertyKey::new(&["check", "vulnerabilities"]));

	/// Key for one software component, `component:<name>`.
	pub fn component(name: &str) -> PropertyKey {
		PropertyKey::new(&["component", name])
	}

	/// Key for one permission, `permission:<name>`.
	pub fn permission(name: &str) -> PropertyKey {
		PropertyKey::new(&["permission", name])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key_equality_ignores_model_flag() {
		let a = PropertyKey::parse("check:expected");
		assert_eq!(a, *properties::EXPECTED);
		assert_eq!(PropertyKey::parse("x:y").model(), PropertyKey::parse("x:y"));
	}

	#[test]
	fn verdict_round_trip_json() {
		let (_, v) = properties::MITM.verdict_explained(Verdict::Pass, "checked");
		let js = v.to_json();
		assert_eq!(js["verdict"], "Pass");
		assert_eq!(js["explanation"], "checked");
		assert_eq!(PropertyValue::read_json(&js).unwrap(), v);
	}

	#[test]
	fn set_value_overall_verdict() {
		let mut props = PropertyMap::new();
		let a = PropertyKey::parse("check:a");
		let b = PropertyKey::parse("check:b");
		let (k, v) = PropertyKey::parse("check:all").value_set([a.clone(), b.clone()]);
		k.update(&mut props, v);

		let overall = |props: &PropertyMap| {
			PropertyKey::parse("check:all")
				.get_verdict(props)
				.unwrap()
		};
		assert_eq!(overall(&props), Verdict::Incon);
		a.put_verdict(&mut props, Verdict::Pass);
		assert_eq!(overall(&props), Verdict::Incon);
		b.put_verdict(&mut props, Verdict::Pass);
		assert_eq!(overall(&props), Verdict::Pass);
		b.put_verdict(&mut props, Verdict::Fail);
		assert_eq!(overall(&props), Verdict::Fail);
	}

	#[test]
	fn set_value_update_unions_sub_keys() {
		let mut props = PropertyMap::new();
		let key = PropertyKey::parse("check:all");
		let (k, v) = key.value_set([PropertyKey::parse("check:a")]);
		k.update(&mut props, v);
		let (k, v) = key.value_set([PropertyKey::parse("check:b")]);
		k.update(&mut props, v);
		match key.get(&props).unwrap() {
			PropertyValue::Set(s) => assert_eq!(s.sub_keys.len(), 2),
			v => panic!("unexpected value {v:?}"),
		}
	}

	#[test]
	fn reset_keeps_model_and_release_values() {
		let key = PropertyKey::parse("custom:claim").model();
		let (_, value) = key.verdict(Verdict::Pass);
		assert!(key.reset(&value).is_some());

		let plain = PropertyKey::parse("check:mitm");
		let (_, value) = plain.verdict(Verdict::Pass);
		assert!(plain.reset(&value).is_none());

		let release = PropertyValue::Release(ReleaseInfo::new("fw"));
		assert!(plain.reset(&release).is_some());
	}
}
