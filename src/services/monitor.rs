//! Monitor client: forwards structured pipeline events to chat webhooks.
//!
//! Emit-only. Delivery failures are logged and swallowed; the caller is
//! never blocked on the outbound HTTP call and never observes a reply.

use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Closed set of event kinds the pipeline emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SyncStart,
    SyncSuccess,
    SyncPartial,
    SyncFailure,
    IndicatorStart,
    IndicatorSuccess,
    IndicatorFailure,
    Health,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SyncStart => "sync_start",
            EventKind::SyncSuccess => "sync_success",
            EventKind::SyncPartial => "sync_partial",
            EventKind::SyncFailure => "sync_failure",
            EventKind::IndicatorStart => "indicator_start",
            EventKind::IndicatorSuccess => "indicator_success",
            EventKind::IndicatorFailure => "indicator_failure",
            EventKind::Health => "health",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
    Critical,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
            EventLevel::Critical => "critical",
        }
    }
}

/// Wire shape of one outbound event.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub service: String,
    pub kind: String,
    pub level: String,
    pub message: String,
    pub ts: i64,
    pub details: Map<String, Value>,
    pub metrics: Map<String, Value>,
}

impl MonitorEvent {
    pub fn new(kind: EventKind, level: EventLevel, message: impl Into<String>, ts: i64) -> Self {
        Self {
            service: String::new(),
            kind: kind.as_str().to_string(),
            level: level.as_str().to_string(),
            message: message.into(),
            ts,
            details: Map::new(),
            metrics: Map::new(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn metric(mut self, key: &str, value: impl Into<serde_json::Number>) -> Self {
        self.metrics
            .insert(key.to_string(), Value::Number(value.into()));
        self
    }
}

#[derive(Clone)]
pub struct MonitorClient {
    client: Client,
    service: String,
    webhook_urls: Vec<String>,
}

impl MonitorClient {
    /// Shares the process-wide HTTP client built in `main`.
    pub fn new(http: Client, service: impl Into<String>, webhook_urls: Vec<String>) -> Self {
        Self {
            client: http,
            service: service.into(),
            webhook_urls,
        }
    }

    /// Emit one event: a local log line plus one POST per configured channel.
    /// Returns immediately; the fan-out runs on a spawned task.
    pub fn emit(&self, mut event: MonitorEvent) {
        event.service = self.service.clone();

        match event.level.as_str() {
            "error" | "critical" => {
                tracing::error!(kind = %event.kind, ts = event.ts, "{}", event.message)
            }
            "warn" => tracing::warn!(kind = %event.kind, ts = event.ts, "{}", event.message),
            _ => tracing::info!(kind = %event.kind, ts = event.ts, "{}", event.message),
        }

        if self.webhook_urls.is_empty() {
            return;
        }

        let client = self.client.clone();
        let urls = self.webhook_urls.clone();
        tokio::spawn(async move {
            for url in urls {
                let result = client
                    .post(&url)
                    .timeout(Duration::from_secs(5))
                    .json(&event)
                    .send()
                    .await;

                // At-most-once per channel: failures are logged, never retried
                if let Err(e) = result {
                    tracing::warn!(url = %url, kind = %event.kind, "webhook delivery failed: {}", e);
                }
            }
        });
    }
}
