//! Optional NATS export
//!
//! When `nats.url` is configured, final segments are published on
//! `<prefix>.<key>.segments` and statistics snapshots on
//! `<prefix>.<key>.stats`.

pub mod client;
pub mod messages;

pub use client::NatsClient;
pub use messages::{segments_subject, stats_subject, SegmentMessage, StatsMessage};
