use anyhow::{Context, Result};
use async_nats::Client;
use tracing::{debug, info};

use super::messages::{segments_subject, stats_subject, SegmentMessage, StatsMessage};
use crate::broadcast::SegmentEvent;
use crate::session::SessionStats;

/// Exports final segments and session statistics to NATS
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    subject_prefix: String,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject_prefix: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            subject_prefix: subject_prefix.trim_end_matches('.').to_string(),
        })
    }

    /// Publish a final transcript or translation segment
    pub async fn publish_segment(&self, event: &SegmentEvent) -> Result<()> {
        let subject = segments_subject(&self.subject_prefix, &event.session_key);

        let message = SegmentMessage {
            event: event.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish segment")?;

        debug!(
            "Published segment to {} (index={}, lang={})",
            subject, event.index, event.lang
        );

        Ok(())
    }

    /// Publish a statistics snapshot
    pub async fn publish_stats(&self, stats: &SessionStats) -> Result<()> {
        let subject = stats_subject(&self.subject_prefix, &stats.session_key);

        let message = StatsMessage {
            stats: stats.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish session stats")?;

        debug!("Published stats to {} (state={})", subject, stats.state);

        Ok(())
    }
}
