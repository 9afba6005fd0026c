use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Closed calendar interval, both endpoints inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub impression: u64,
    pub engagement: u64,
    pub reach: u64,
    pub follow: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedPoint {
    pub date: NaiveDate,
    pub engagement: u64,
    pub follows: u64,
}

// Analytics result as delivered by the upstream API. Field names are the
// wire contract; `daily_metrics` keeps upstream order and is never reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightsPayload {
    pub impression_count: u64,
    pub engagement_count: u64,
    pub reach: u64,
    pub follow_count: u64,
    pub impressions_over_time: Vec<SeriesPoint>,
    pub reach_over_time: Vec<SeriesPoint>,
    pub follows_over_time: Vec<SeriesPoint>,
    pub engagement_and_follows_over_time: Vec<PairedPoint>,
    pub daily_metrics: Vec<DailyMetric>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightsErrorKind {
    Transport,
    Rejected,
}

// Typed fetch failure. Transport covers network-level faults, Rejected a
// response whose success flag is false. Raw transport panics never escape
// the client seam.
#[derive(Debug, Clone)]
pub struct InsightsError {
    pub kind: InsightsErrorKind,
    pub message: String,
}

impl InsightsError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: InsightsErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: InsightsErrorKind::Rejected,
            message: message.into(),
        }
    }
}

impl fmt::Display for InsightsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            InsightsErrorKind::Transport => write!(f, "transport error: {}", self.message),
            InsightsErrorKind::Rejected => write!(f, "request rejected: {}", self.message),
        }
    }
}

impl std::error::Error for InsightsError {}

pub trait InsightsClient: Send + Sync {
    fn fetch(
        &self,
        page_id: &str,
        range: Option<&DateRange>,
    ) -> Result<InsightsPayload, InsightsError>;
}
