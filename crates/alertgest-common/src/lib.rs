//! Domain types shared by every alertgest crate.
//!
//! Rows mirror the three persisted tables (capture windows, alerts, digests),
//! [`interval`] holds the pure capture-interval arithmetic, and [`webhook`]
//! models the Alertmanager notifier payload accepted by the server.

pub mod interval;
pub mod stats;
pub mod types;
pub mod webhook;

pub use interval::{CaptureInterval, IntervalError, Occurrence};
pub use stats::DigestStats;
pub use types::{
    AlertRecord, AlertStatus, CaptureWindowRow, DeliveryStatus, DigestRow, NewAlert, NewDigest,
    WindowStatus,
};
pub use webhook::{PayloadError, WebhookAck, WebhookAlert, WebhookPayload};
