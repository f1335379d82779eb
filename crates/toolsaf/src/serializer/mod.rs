//! Streaming JSON serialization of the model and events.
//!
//! Each serialized object is one JSON object with an `id`, a `type`, and
//! `at` referencing its parent by id within the stream. Addresses are
//! stored in their parseable string form and cross-references as system
//! address sequences. Reading is tolerant of unknown fields and types.

mod events;
mod model;

pub use events::{EventReader, EventSerializer};
pub use model::{ModelReader, ModelSerializer};

use serde_json::Value;

/// Sequential object id within one stream, `id1`, `id2`, ...
pub(crate) fn make_id(counter: &mut usize) -> String {
	*counter += 1;
	format!("id{counter}")
}

pub(crate) fn get_str<'a>(row: &'a Value, field: &str) -> Option<&'a str> {
	row.get(field).and_then(Value::as_str)
}
