//! Data models for rosterwatch.

mod entity;
mod instance;
mod source;

pub use entity::{DetailScope, EntityKind, EntityRecord, EntityRef, ListTarget};
pub use instance::{InstanceRecord, InstanceStatus};
pub use source::{OpClass, Source};
