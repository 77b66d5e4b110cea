use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

use crate::database::{
    Database, DatabaseStats, HourlyUptime, PersistenceError, PlatformCount, StoreStatus, StoreUptime,
    SummaryReport,
};

/// Read-only views over a restored database
pub struct Reporter<'a> {
    database: &'a dyn Database,
    offset: FixedOffset,
}

/// Latest summary, the number of checks in the last hour and each store's latest state
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub latest: Option<SummaryReport>,
    pub recent_checks: u64,
    pub stores: Vec<StoreStatus>,
    offset: FixedOffset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub date: NaiveDate,
    pub stats: DatabaseStats,
    pub stores: Vec<StoreUptime>,
    pub hourly: Vec<HourlyUptime>,
    pub platforms: Vec<PlatformCount>,
    offset: FixedOffset,
}

impl<'a> Reporter<'a> {
    pub fn new(database: &'a dyn Database, offset: FixedOffset) -> Self {
        Self { database, offset }
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<StatusReport, PersistenceError> {
        Ok(StatusReport {
            latest: self.database.latest_summary().await?,
            recent_checks: self.database.recent_check_count(Duration::hours(1), now).await?,
            stores: self.database.latest_status_per_store().await?,
            offset: self.offset,
        })
    }

    /// Totals plus per-store and hourly uptime for the local date of `now`
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<StatsReport, PersistenceError> {
        let date = now.with_timezone(&self.offset).date_naive();
        Ok(StatsReport {
            date,
            stats: self.database.database_stats(self.offset, now).await?,
            stores: self.database.store_uptime_on(self.offset, date).await?,
            hourly: self.database.hourly_uptime_on(self.offset, date).await?,
            platforms: self.database.platform_counts().await?,
            offset: self.offset,
        })
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.latest {
            Some(summary) => writeln!(
                f,
                "Latest summary ({}): {} stores, {} online, {} offline, {:.1}% uptime",
                summary.report_time.with_timezone(&self.offset).format("%Y-%m-%d %H:%M %:z"),
                summary.total_stores,
                summary.online_count,
                summary.offline_count,
                summary.uptime_percent
            )?,
            None => writeln!(f, "Latest summary: no data")?,
        }
        write!(f, "Checks in the last hour: {}", self.recent_checks)?;
        if self.stores.is_empty() {
            return Ok(());
        }

        let (online, offline): (Vec<&StoreStatus>, Vec<&StoreStatus>) =
            self.stores.iter().partition(|status| status.is_online);
        for (heading, group) in [("Online", online), ("Offline", offline)] {
            write!(f, "\n{heading} stores ({}):", group.len())?;
            for status in group {
                write!(
                    f,
                    "\n  {} (checked {})",
                    status.label(),
                    status.checked_at.with_timezone(&self.offset).format("%H:%M")
                )?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last_check = self.stats.last_check.map_or_else(
            || "never".to_string(),
            |at| at.with_timezone(&self.offset).format("%Y-%m-%d %H:%M:%S %:z").to_string(),
        );

        writeln!(f, "Database statistics")?;
        writeln!(f, "  Total checks:    {}", self.stats.total_checks)?;
        writeln!(f, "  Stores seen:     {}", self.stats.stores_seen)?;
        writeln!(f, "  Checks today:    {}", self.stats.checks_today)?;
        writeln!(f, "  Summary reports: {}", self.stats.summary_reports)?;
        writeln!(f, "  Last check:      {last_check}")?;

        writeln!(f, "Store uptime on {}", self.date)?;
        if self.stores.is_empty() {
            writeln!(f, "  no data")?;
        }
        for store in &self.stores {
            writeln!(
                f,
                "  {:<32} {:>5.1}% ({}/{})",
                store.name.as_deref().unwrap_or(&store.store_id),
                store.uptime_percent,
                store.online_checks,
                store.checks
            )?;
        }

        writeln!(f, "Stores by platform")?;
        if self.platforms.is_empty() {
            writeln!(f, "  no data")?;
        }
        for count in &self.platforms {
            writeln!(f, "  {:<10} {}", count.platform.as_str(), count.stores)?;
        }

        write!(f, "Hourly uptime on {}", self.date)?;
        if self.hourly.is_empty() {
            write!(f, "\n  no data")?;
        }
        for hour in &self.hourly {
            write!(f, "\n  {:02}:00 {:>5.1}% ({} reports)", hour.hour, hour.online_percent, hour.reports)?;
        }
        Ok(())
    }
}
