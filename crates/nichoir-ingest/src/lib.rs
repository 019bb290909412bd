//! Nichoir Ingest crate - MQTT receive loop, topic routing, image persistence.
//!
//! `BrokerLink` owns the MQTT connection and feeds every inbound publish,
//! in arrival order, to a `TopicRouter`. The router correlates images with
//! the latest cached telemetry reading, writes image bytes through the
//! `ImagePersister`, and records them in a `RecordStore`.

pub mod backoff;
pub mod broker;
pub mod client;
pub mod persist;
pub mod router;
pub mod telemetry;

pub use backoff::{Backoff, BackoffError};
pub use broker::{BrokerLink, LinkState};
pub use client::ClientBuilder;
pub use persist::ImagePersister;
pub use router::{DispatchOutcome, TopicRouter};
pub use telemetry::TelemetryCache;
