//! # Events
//!
//! In-process broadcast of flow lifecycle events, consumed by hooks such as
//! export or shadow-table follow-ups.

pub mod publisher;

pub use publisher::{EventPublisher, FlowEvent, PublishedEvent};
