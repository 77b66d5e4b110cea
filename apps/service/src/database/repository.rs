use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, SubsecRound, Utc};
use libsql::{Connection, Row, params};

use super::PersistenceError;
use super::models::{
    DatabaseStats, HourlyUptime, PlatformCount, StatusCheck, StoreRecord, StoreStatus, StoreUptime,
    SummaryReport, i64_to_timestamp,
};
use super::schema::{SCHEMA_VERSION, create_schema};
use crate::snapshot::Snapshot;
use crate::stores::Platform;

/// Database trait for abstracting the monitoring tables
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert or refresh the display metadata of a tracked store
    async fn upsert_store(&self, store: &StoreRecord) -> Result<(), PersistenceError>;

    /// Append one status check. Duplicate `(store_id, checked_at)` pairs are accepted.
    ///
    /// Timestamps are stored with whole-second precision; the returned row is truncated to match.
    async fn record_check(
        &self,
        store_id: &str,
        is_online: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<StatusCheck, PersistenceError>;

    /// Append one summary report; `uptime_percent` is derived here
    async fn record_summary(
        &self,
        total: u32,
        online: u32,
        offline: u32,
        report_time: DateTime<Utc>,
    ) -> Result<SummaryReport, PersistenceError>;

    /// Summary with the greatest `report_time`, the last inserted one on ties
    async fn latest_summary(&self) -> Result<Option<SummaryReport>, PersistenceError>;

    /// Latest check of every store id, ordered by id; ties go to the last inserted row
    async fn latest_status_per_store(&self) -> Result<Vec<StoreStatus>, PersistenceError>;

    /// Known stores per platform, ordered by platform name
    async fn platform_counts(&self) -> Result<Vec<PlatformCount>, PersistenceError>;

    /// Number of checks taken at or after `now - window`
    async fn recent_check_count(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, PersistenceError>;

    /// Whole-table counters; "today" is the local date of `now` in `offset`
    async fn database_stats(
        &self,
        offset: FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<DatabaseStats, PersistenceError>;

    /// Per-store uptime for one local date, best first
    async fn store_uptime_on(
        &self,
        offset: FixedOffset,
        date: NaiveDate,
    ) -> Result<Vec<StoreUptime>, PersistenceError>;

    /// Average summary uptime per local hour of one local date
    async fn hourly_uptime_on(
        &self,
        offset: FixedOffset,
        date: NaiveDate,
    ) -> Result<Vec<HourlyUptime>, PersistenceError>;

    /// Export both tables, in insertion order, as a transferable snapshot
    async fn serialize(&self) -> Result<Snapshot, PersistenceError>;
}

/// LibSQL database implementation backed by an in-memory instance
pub struct DatabaseImpl {
    // Keeps the in-memory database alive for as long as the connection is used
    _database: libsql::Database,
    conn: Connection,
    revision: u64,
}

impl DatabaseImpl {
    /// Create an empty database, as on the very first run
    pub async fn open_empty() -> Result<Self, PersistenceError> {
        let database = libsql::Builder::new_local(":memory:").build().await?;
        let conn = database.connect()?;
        create_schema(&conn).await?;

        Ok(Self { _database: database, conn, revision: 0 })
    }

    /// Rebuild the database from a previously published snapshot
    ///
    /// Row ids are restored verbatim so that a later [`Database::serialize`]
    /// reproduces the snapshot exactly.
    pub async fn restore(snapshot: &Snapshot) -> Result<Self, PersistenceError> {
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(PersistenceError::UnsupportedSchema {
                found: snapshot.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        let mut db = Self::open_empty().await?;
        db.revision = snapshot.revision;

        let tx = db.conn.transaction().await?;
        for store in &snapshot.stores {
            tx.execute(
                "INSERT INTO stores (id, name, url, platform) VALUES (?, ?, ?, ?)",
                params![store.id.clone(), store.name.clone(), store.url.clone(), store.platform.as_str()],
            )
            .await?;
        }
        for check in &snapshot.status_checks {
            tx.execute(
                "INSERT INTO status_checks (id, store_id, checked_at, is_online) VALUES (?, ?, ?, ?)",
                params![
                    check.id,
                    check.store_id.clone(),
                    check.checked_at.timestamp(),
                    if check.is_online { 1 } else { 0 }
                ],
            )
            .await?;
        }
        for report in &snapshot.summary_reports {
            tx.execute(
                "INSERT INTO summary_reports (id, report_time, total_stores, online_count, offline_count, uptime_percent) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    report.id,
                    report.report_time.timestamp(),
                    i64::from(report.total_stores),
                    i64::from(report.online_count),
                    i64::from(report.offline_count),
                    report.uptime_percent
                ],
            )
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(
            revision = snapshot.revision,
            stores = snapshot.stores.len(),
            checks = snapshot.status_checks.len(),
            reports = snapshot.summary_reports.len(),
            "Restored database from snapshot"
        );
        Ok(db)
    }

    /// Revision of the snapshot this database was restored from (0 when fresh)
    pub fn revision(&self) -> u64 {
        self.revision
    }

    async fn count(&self, sql: &str, values: impl libsql::params::IntoParams) -> Result<u64, PersistenceError> {
        let mut rows = self.conn.query(sql, values).await?;
        match rows.next().await? {
            Some(row) => count_from(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }
}

fn count_from(value: i64) -> Result<u64, PersistenceError> {
    u64::try_from(value).map_err(|_| PersistenceError::InvalidCount(value))
}

fn u32_from(value: i64) -> Result<u32, PersistenceError> {
    u32::try_from(value).map_err(|_| PersistenceError::InvalidCount(value))
}

fn timestamp_from(value: i64) -> Result<DateTime<Utc>, PersistenceError> {
    i64_to_timestamp(value).ok_or(PersistenceError::InvalidTimestamp(value))
}

fn check_from_row(row: &Row) -> Result<StatusCheck, PersistenceError> {
    Ok(StatusCheck {
        id: Some(row.get(0)?),
        store_id: row.get(1)?,
        checked_at: timestamp_from(row.get(2)?)?,
        is_online: row.get::<i64>(3)? != 0,
    })
}

fn platform_from(raw: String) -> Result<Platform, PersistenceError> {
    raw.parse().map_err(PersistenceError::InvalidPlatform)
}

fn store_from_row(row: &Row) -> Result<StoreRecord, PersistenceError> {
    Ok(StoreRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        platform: platform_from(row.get(3)?)?,
    })
}

fn summary_from_row(row: &Row) -> Result<SummaryReport, PersistenceError> {
    Ok(SummaryReport {
        id: Some(row.get(0)?),
        report_time: timestamp_from(row.get(1)?)?,
        total_stores: u32_from(row.get(2)?)?,
        online_count: u32_from(row.get(3)?)?,
        offline_count: u32_from(row.get(4)?)?,
        uptime_percent: row.get(5)?,
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn upsert_store(&self, store: &StoreRecord) -> Result<(), PersistenceError> {
        self.conn
            .execute(
                "INSERT INTO stores (id, name, url, platform) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, url = excluded.url, platform = excluded.platform",
                params![store.id.clone(), store.name.clone(), store.url.clone(), store.platform.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn record_check(
        &self,
        store_id: &str,
        is_online: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<StatusCheck, PersistenceError> {
        let checked_at = checked_at.trunc_subsecs(0);
        let mut check = StatusCheck::new(store_id, is_online, checked_at);

        self.conn
            .execute(
                "INSERT INTO status_checks (store_id, checked_at, is_online) VALUES (?, ?, ?)",
                params![check.store_id.clone(), checked_at.timestamp(), if is_online { 1 } else { 0 }],
            )
            .await?;

        check.id = Some(self.conn.last_insert_rowid());
        Ok(check)
    }

    async fn record_summary(
        &self,
        total: u32,
        online: u32,
        offline: u32,
        report_time: DateTime<Utc>,
    ) -> Result<SummaryReport, PersistenceError> {
        let report_time = report_time.trunc_subsecs(0);
        let mut report = SummaryReport {
            id: None,
            report_time,
            total_stores: total,
            online_count: online,
            offline_count: offline,
            uptime_percent: SummaryReport::uptime_for(total, online),
        };
        if !report.is_consistent() {
            return Err(PersistenceError::InconsistentSummary { total, online, offline });
        }

        self.conn
            .execute(
                "INSERT INTO summary_reports (report_time, total_stores, online_count, offline_count, uptime_percent) VALUES (?, ?, ?, ?, ?)",
                params![
                    report_time.timestamp(),
                    i64::from(total),
                    i64::from(online),
                    i64::from(offline),
                    report.uptime_percent
                ],
            )
            .await?;

        report.id = Some(self.conn.last_insert_rowid());
        Ok(report)
    }

    async fn latest_summary(&self) -> Result<Option<SummaryReport>, PersistenceError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, report_time, total_stores, online_count, offline_count, uptime_percent FROM summary_reports ORDER BY report_time DESC, id DESC LIMIT 1",
                (),
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(summary_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn latest_status_per_store(&self) -> Result<Vec<StoreStatus>, PersistenceError> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.store_id, s.name, s.platform, c.is_online, c.checked_at
                 FROM status_checks c
                 LEFT JOIN stores s ON s.id = c.store_id
                 WHERE c.id = (
                     SELECT l.id FROM status_checks l
                     WHERE l.store_id = c.store_id
                     ORDER BY l.checked_at DESC, l.id DESC
                     LIMIT 1
                 )
                 ORDER BY c.store_id",
                (),
            )
            .await?;

        let mut statuses = Vec::new();
        while let Some(row) = rows.next().await? {
            statuses.push(StoreStatus {
                store_id: row.get(0)?,
                name: row.get(1)?,
                platform: row.get::<Option<String>>(2)?.map(platform_from).transpose()?,
                is_online: row.get::<i64>(3)? != 0,
                checked_at: timestamp_from(row.get(4)?)?,
            });
        }
        Ok(statuses)
    }

    async fn platform_counts(&self) -> Result<Vec<PlatformCount>, PersistenceError> {
        let mut rows = self
            .conn
            .query("SELECT platform, COUNT(*) FROM stores GROUP BY platform ORDER BY platform", ())
            .await?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            counts.push(PlatformCount { platform: platform_from(row.get(0)?)?, stores: count_from(row.get(1)?)? });
        }
        Ok(counts)
    }

    async fn recent_check_count(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        let cutoff = (now - window).timestamp();
        self.count("SELECT COUNT(*) FROM status_checks WHERE checked_at >= ?", params![cutoff])
            .await
    }

    async fn database_stats(
        &self,
        offset: FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<DatabaseStats, PersistenceError> {
        let offset_secs = i64::from(offset.local_minus_utc());
        let today = now.with_timezone(&offset).date_naive().format("%Y-%m-%d").to_string();

        let total_checks = self.count("SELECT COUNT(*) FROM status_checks", ()).await?;
        let stores_seen = self.count("SELECT COUNT(DISTINCT store_id) FROM status_checks", ()).await?;
        let summary_reports = self.count("SELECT COUNT(*) FROM summary_reports", ()).await?;
        let checks_today = self
            .count(
                "SELECT COUNT(*) FROM status_checks WHERE date(checked_at + ?, 'unixepoch') = ?",
                params![offset_secs, today],
            )
            .await?;

        let mut rows = self.conn.query("SELECT MAX(checked_at) FROM status_checks", ()).await?;
        let last_check = match rows.next().await? {
            Some(row) => row.get::<Option<i64>>(0)?.map(timestamp_from).transpose()?,
            None => None,
        };

        Ok(DatabaseStats { total_checks, stores_seen, checks_today, summary_reports, last_check })
    }

    async fn store_uptime_on(
        &self,
        offset: FixedOffset,
        date: NaiveDate,
    ) -> Result<Vec<StoreUptime>, PersistenceError> {
        let offset_secs = i64::from(offset.local_minus_utc());
        let day = date.format("%Y-%m-%d").to_string();

        let mut rows = self
            .conn
            .query(
                "SELECT c.store_id, COUNT(*), SUM(c.is_online), s.name
                 FROM status_checks c
                 LEFT JOIN stores s ON s.id = c.store_id
                 WHERE date(c.checked_at + ?, 'unixepoch') = ?
                 GROUP BY c.store_id",
                params![offset_secs, day],
            )
            .await?;

        let mut uptimes = Vec::new();
        while let Some(row) = rows.next().await? {
            let checks = count_from(row.get(1)?)?;
            let online_checks = count_from(row.get(2)?)?;
            let uptime_percent = if checks == 0 {
                0.0
            } else {
                ((online_checks as f64 / checks as f64) * 1000.0).round() / 10.0
            };
            uptimes.push(StoreUptime {
                store_id: row.get(0)?,
                name: row.get(3)?,
                checks,
                online_checks,
                uptime_percent,
            });
        }

        uptimes.sort_by(|a, b| {
            b.uptime_percent.total_cmp(&a.uptime_percent).then_with(|| a.store_id.cmp(&b.store_id))
        });
        Ok(uptimes)
    }

    async fn hourly_uptime_on(
        &self,
        offset: FixedOffset,
        date: NaiveDate,
    ) -> Result<Vec<HourlyUptime>, PersistenceError> {
        let offset_secs = i64::from(offset.local_minus_utc());
        let day = date.format("%Y-%m-%d").to_string();

        let mut rows = self
            .conn
            .query(
                "SELECT CAST(strftime('%H', report_time + ?1, 'unixepoch') AS INTEGER) AS hour,
                        COUNT(*),
                        AVG(uptime_percent)
                 FROM summary_reports
                 WHERE date(report_time + ?1, 'unixepoch') = ?2
                 GROUP BY hour
                 ORDER BY hour",
                params![offset_secs, day],
            )
            .await?;

        let mut hours = Vec::new();
        while let Some(row) = rows.next().await? {
            let online_percent: f64 = row.get(2)?;
            hours.push(HourlyUptime {
                hour: u32_from(row.get(0)?)?,
                reports: count_from(row.get(1)?)?,
                online_percent: (online_percent * 10.0).round() / 10.0,
            });
        }
        Ok(hours)
    }

    async fn serialize(&self) -> Result<Snapshot, PersistenceError> {
        let mut stores = Vec::new();
        let mut rows = self
            .conn
            .query("SELECT id, name, url, platform FROM stores ORDER BY rowid", ())
            .await?;
        while let Some(row) = rows.next().await? {
            stores.push(store_from_row(&row)?);
        }

        let mut status_checks = Vec::new();
        let mut rows = self
            .conn
            .query("SELECT id, store_id, checked_at, is_online FROM status_checks ORDER BY id", ())
            .await?;
        while let Some(row) = rows.next().await? {
            status_checks.push(check_from_row(&row)?);
        }

        let mut summary_reports = Vec::new();
        let mut rows = self
            .conn
            .query(
                "SELECT id, report_time, total_stores, online_count, offline_count, uptime_percent FROM summary_reports ORDER BY id",
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            summary_reports.push(summary_from_row(&row)?);
        }

        Ok(Snapshot {
            schema_version: SCHEMA_VERSION,
            revision: self.revision,
            stores,
            status_checks,
            summary_reports,
        })
    }
}
