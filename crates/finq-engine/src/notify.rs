//! Fire-and-forget price alerts

use crate::enrichment::{DataKind, DataPoint, EnrichmentResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A quote that moved past the alert threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Ticker symbol
    pub symbol: String,
    /// Last price
    pub price: f64,
    /// Daily move in percent
    pub change_percent: f64,
    /// Threshold that was crossed
    pub threshold: f64,
    /// Provider that supplied the quote
    pub provider: String,
    /// When the alert was raised
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Human-readable one-liner
    pub fn message(&self) -> String {
        let direction = if self.change_percent >= 0.0 { "up" } else { "down" };
        format!(
            "{} is {direction} {:.2}% at ${:.2}",
            self.symbol,
            self.change_percent.abs(),
            self.price
        )
    }
}

/// Outcome of one delivery
pub type SinkResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Destination for alerts
///
/// Delivery is best effort: the engine never waits on a sink and ignores
/// its errors beyond logging them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one alert
    async fn notify(&self, alert: &Alert) -> SinkResult;
}

/// Sink that writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, alert: &Alert) -> SinkResult {
        info!(
            symbol = %alert.symbol,
            change_percent = alert.change_percent,
            threshold = alert.threshold,
            "{}",
            alert.message()
        );
        Ok(())
    }
}

/// Alerts for every fetched quote whose move reaches `threshold` percent
pub fn alerts_for(facts: &EnrichmentResult, threshold: f64) -> Vec<Alert> {
    facts
        .facts_of(DataKind::Quote)
        .filter_map(|(_, fact)| match &fact.value {
            DataPoint::Quote(q) => q
                .change_percent
                .filter(|pct| pct.abs() >= threshold)
                .map(|change_percent| Alert {
                    symbol: q.symbol.clone(),
                    price: q.price,
                    change_percent,
                    threshold,
                    provider: fact.provider.clone(),
                    raised_at: Utc::now(),
                }),
            _ => None,
        })
        .collect()
}

/// Hand alerts to the sink on a detached task
pub fn dispatch(sink: &Arc<dyn NotificationSink>, alerts: Vec<Alert>) {
    if alerts.is_empty() {
        return;
    }
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        for alert in alerts {
            if let Err(e) = sink.notify(&alert).await {
                warn!(symbol = %alert.symbol, error = %e, "Alert delivery failed");
            }
        }
    });
}
