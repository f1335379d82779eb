//! Security statement model, traffic matching and inspection for IoT systems.
//!
//! The crate builds a declarative model of a networked system (hosts,
//! services, connections, components), matches observed traffic and scan
//! results against it, and attaches pass/fail verdicts to the entities the
//! evidence touches. Tool output is fed in as normalized events through
//! [`events::EventInterface`]; the [`inspector::Inspector`] mutates the model
//! and the [`logger::EventLogger`] keeps the evidence trail.

pub mod batch;
pub mod builder;
pub mod errors;
pub mod events;
pub mod ignore;
pub mod inspector;
pub mod logger;
pub mod matcher;
pub mod model;
pub mod property;
pub mod ranges;
pub mod serializer;
pub mod services;
pub mod types;

pub use errors::{AdapterError, ConfigurationError, ParseError};
pub use toolsaf_core::strng;
pub use toolsaf_core::strng::Strng;
