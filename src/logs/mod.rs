// src/logs/mod.rs

//! Service log entries and the line/JSON aggregator that produces them.
//!
//! - [`aggregator`] turns raw output chunks into [`LogEntry`] values,
//!   reassembling JSON objects that span several lines.

pub mod aggregator;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub use aggregator::LogAggregator;

/// One log record as pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    /// Text of a plain line. Absent for JSON entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_payload: Option<Value>,
    pub is_json: bool,
    /// Synthetic lines written by the engine rather than the process.
    pub info: bool,
}

impl LogEntry {
    pub fn plain(service: &str, line: impl Into<String>) -> Self {
        Self::new(service, Some(line.into()), None, false)
    }

    pub fn info(service: &str, line: impl Into<String>) -> Self {
        Self::new(service, Some(line.into()), None, true)
    }

    pub fn json(service: &str, payload: Value) -> Self {
        Self::new(service, None, Some(payload), false)
    }

    fn new(service: &str, line: Option<String>, parsed_payload: Option<Value>, info: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            service: service.to_string(),
            is_json: parsed_payload.is_some(),
            line,
            parsed_payload,
            info,
        }
    }
}
