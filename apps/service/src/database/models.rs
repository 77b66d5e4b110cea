use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stores::Platform;

/// Store model - display metadata for a tracked store id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub platform: Platform,
}

/// StatusCheck model - one probe result for one tracked store
///
/// Rows are append-only: nothing in the service updates or deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub id: Option<i64>,
    pub store_id: String,
    pub checked_at: DateTime<Utc>,
    pub is_online: bool,
}

impl StatusCheck {
    /// Create a not-yet-persisted check
    pub fn new(store_id: impl Into<String>, is_online: bool, checked_at: DateTime<Utc>) -> Self {
        Self { id: None, store_id: store_id.into(), checked_at, is_online }
    }
}

/// SummaryReport model - the aggregate of one monitoring cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub id: Option<i64>,
    pub report_time: DateTime<Utc>,
    pub total_stores: u32,
    pub online_count: u32,
    pub offline_count: u32,
    pub uptime_percent: f64,
}

impl SummaryReport {
    /// Uptime as a percentage rounded to one decimal place, `0` for an empty cycle.
    pub fn uptime_for(total: u32, online: u32) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let raw = f64::from(online) / f64::from(total) * 100.0;
        (raw * 10.0).round() / 10.0
    }

    /// `online_count + offline_count == total_stores`
    pub fn is_consistent(&self) -> bool {
        u64::from(self.online_count) + u64::from(self.offline_count)
            == u64::from(self.total_stores)
    }
}

/// Convert a stored Unix timestamp back to a UTC instant
pub(crate) fn i64_to_timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

/// Whole-table statistics shown by `storewatch stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_checks: u64,
    pub stores_seen: u64,
    pub checks_today: u64,
    pub summary_reports: u64,
    pub last_check: Option<DateTime<Utc>>,
}

/// Uptime of a single store over one local day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreUptime {
    pub store_id: String,
    /// `None` for ids that never had a `stores` row
    pub name: Option<String>,
    pub checks: u64,
    pub online_checks: u64,
    pub uptime_percent: f64,
}

/// Most recent check of one store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub store_id: String,
    pub name: Option<String>,
    pub platform: Option<Platform>,
    pub is_online: bool,
    pub checked_at: DateTime<Utc>,
}

impl StoreStatus {
    /// Display name, falling back to the id
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.store_id)
    }
}

/// Number of known stores on one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCount {
    pub platform: Platform,
    pub stores: u64,
}

/// Average uptime of the summary reports that fell into one local hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyUptime {
    pub hour: u32,
    pub reports: u64,
    pub online_percent: f64,
}
