use std::sync::RwLock;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use futures::future::{BoxFuture, FutureExt};
use sqlx::{FromRow, MySqlPool};
use tracing::debug;

use crate::model::attendance::{AttendanceDay, AttendanceStatus};
use crate::utils::geofence::Coordinate;

/// Receives attendance records and keeps the per-day history.
///
/// `save` is an upsert keyed by record id: a check-in arrives as a partial
/// record and the matching check-out completes it. A save never moves a
/// record backwards, so a late partial copy cannot undo a check-out.
pub trait AttendanceStore: Send + Sync {
    fn save<'a>(&'a self, day: &'a AttendanceDay) -> BoxFuture<'a, Result<()>>;

    fn find_by_date(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> BoxFuture<'_, Result<Option<AttendanceDay>>>;

    fn find_by_id<'a>(
        &'a self,
        employee_id: u64,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<AttendanceDay>>>;

    /// Newest first. `page` is 1-based.
    fn history(
        &self,
        employee_id: u64,
        page: u32,
        per_page: u32,
    ) -> BoxFuture<'_, Result<(Vec<AttendanceDay>, i64)>>;
}

/* =========================
MySQL
========================= */

pub struct MySqlAttendanceStore {
    pool: MySqlPool,
}

impl MySqlAttendanceStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, employee_id, date, check_in_time, check_out_time,
           check_in_lat, check_in_lng, check_in_accuracy, check_in_ts,
           check_out_lat, check_out_lng, check_out_accuracy, check_out_ts,
           status, working_minutes, synthetic_location, clock_skew
    FROM attendance_records
"#;

#[derive(FromRow)]
struct AttendanceRow {
    id: String,
    employee_id: u64,
    date: NaiveDate,
    check_in_time: Option<NaiveDateTime>,
    check_out_time: Option<NaiveDateTime>,
    check_in_lat: Option<f64>,
    check_in_lng: Option<f64>,
    check_in_accuracy: Option<f64>,
    check_in_ts: Option<i64>,
    check_out_lat: Option<f64>,
    check_out_lng: Option<f64>,
    check_out_accuracy: Option<f64>,
    check_out_ts: Option<i64>,
    status: String,
    working_minutes: Option<i64>,
    synthetic_location: bool,
    clock_skew: bool,
}

fn coordinate(
    lat: Option<f64>,
    lng: Option<f64>,
    accuracy: Option<f64>,
    ts: Option<i64>,
) -> Option<Coordinate> {
    Some(Coordinate {
        latitude: lat?,
        longitude: lng?,
        accuracy,
        timestamp: ts.unwrap_or_default(),
    })
}

impl TryFrom<AttendanceRow> for AttendanceDay {
    type Error = anyhow::Error;

    fn try_from(row: AttendanceRow) -> Result<Self> {
        let status = row
            .status
            .parse::<AttendanceStatus>()
            .map_err(|_| anyhow!("unknown attendance status '{}'", row.status))?;

        Ok(AttendanceDay {
            id: row.id,
            employee_id: row.employee_id,
            date: row.date,
            check_in_time: row.check_in_time,
            check_out_time: row.check_out_time,
            check_in_location: coordinate(
                row.check_in_lat,
                row.check_in_lng,
                row.check_in_accuracy,
                row.check_in_ts,
            ),
            check_out_location: coordinate(
                row.check_out_lat,
                row.check_out_lng,
                row.check_out_accuracy,
                row.check_out_ts,
            ),
            status,
            working_minutes: row.working_minutes,
            synthetic_location: row.synthetic_location,
            clock_skew: row.clock_skew,
        })
    }
}

/// Columns rewritten on upsert. `check_out_time` is last because MySQL applies
/// the assignments in order and the guard reads its stored value.
const UPSERT_COLUMNS: [&str; 14] = [
    "check_in_time",
    "check_in_lat",
    "check_in_lng",
    "check_in_accuracy",
    "check_in_ts",
    "check_out_lat",
    "check_out_lng",
    "check_out_accuracy",
    "check_out_ts",
    "status",
    "working_minutes",
    "synthetic_location",
    "clock_skew",
    "check_out_time",
];

/// A checked-in copy arriving after the check-out was stored keeps the stored row.
const STALE_WRITE: &str = "check_out_time IS NOT NULL AND VALUES(check_out_time) IS NULL";

fn upsert_assignments() -> String {
    UPSERT_COLUMNS
        .iter()
        .map(|col| format!("{col} = IF({STALE_WRITE}, {col}, VALUES({col}))"))
        .collect::<Vec<_>>()
        .join(",\n")
}

impl AttendanceStore for MySqlAttendanceStore {
    fn save<'a>(&'a self, day: &'a AttendanceDay) -> BoxFuture<'a, Result<()>> {
        async move {
            let check_in = day.check_in_location.as_ref();
            let check_out = day.check_out_location.as_ref();

            let sql = format!(
                r#"
                INSERT INTO attendance_records
                    (id, employee_id, date, check_in_time, check_out_time,
                     check_in_lat, check_in_lng, check_in_accuracy, check_in_ts,
                     check_out_lat, check_out_lng, check_out_accuracy, check_out_ts,
                     status, working_minutes, synthetic_location, clock_skew)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                {}
                "#,
                upsert_assignments()
            );

            sqlx::query(&sql)
                .bind(&day.id)
                .bind(day.employee_id)
                .bind(day.date)
                .bind(day.check_in_time)
                .bind(day.check_out_time)
                .bind(check_in.map(|c| c.latitude))
                .bind(check_in.map(|c| c.longitude))
                .bind(check_in.and_then(|c| c.accuracy))
                .bind(check_in.map(|c| c.timestamp))
                .bind(check_out.map(|c| c.latitude))
                .bind(check_out.map(|c| c.longitude))
                .bind(check_out.and_then(|c| c.accuracy))
                .bind(check_out.map(|c| c.timestamp))
                .bind(day.status.to_string())
                .bind(day.working_minutes)
                .bind(day.synthetic_location)
                .bind(day.clock_skew)
                .execute(&self.pool)
                .await
                .with_context(|| format!("saving attendance record {}", day.id))?;

            Ok(())
        }
        .boxed()
    }

    fn find_by_date(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> BoxFuture<'_, Result<Option<AttendanceDay>>> {
        async move {
            let sql = format!("{SELECT_COLUMNS} WHERE employee_id = ? AND date = ?");
            let row = sqlx::query_as::<_, AttendanceRow>(&sql)
                .bind(employee_id)
                .bind(date)
                .fetch_optional(&self.pool)
                .await
                .context("loading attendance day")?;

            row.map(AttendanceDay::try_from).transpose()
        }
        .boxed()
    }

    fn find_by_id<'a>(
        &'a self,
        employee_id: u64,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<AttendanceDay>>> {
        async move {
            let sql = format!("{SELECT_COLUMNS} WHERE employee_id = ? AND id = ?");
            let row = sqlx::query_as::<_, AttendanceRow>(&sql)
                .bind(employee_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("loading attendance record")?;

            row.map(AttendanceDay::try_from).transpose()
        }
        .boxed()
    }

    fn history(
        &self,
        employee_id: u64,
        page: u32,
        per_page: u32,
    ) -> BoxFuture<'_, Result<(Vec<AttendanceDay>, i64)>> {
        async move {
            let offset = (page.max(1) - 1) as i64 * per_page as i64;

            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM attendance_records WHERE employee_id = ?",
            )
            .bind(employee_id)
            .fetch_one(&self.pool)
            .await
            .context("counting attendance history")?;

            let sql = format!(
                "{SELECT_COLUMNS} WHERE employee_id = ? ORDER BY date DESC LIMIT ? OFFSET ?"
            );
            let rows = sqlx::query_as::<_, AttendanceRow>(&sql)
                .bind(employee_id)
                .bind(per_page as i64)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .context("loading attendance history")?;

            let records = rows
                .into_iter()
                .map(AttendanceDay::try_from)
                .collect::<Result<Vec<_>>>()?;

            Ok((records, total))
        }
        .boxed()
    }
}

/* =========================
In-memory (mock backend)
========================= */

#[derive(Default)]
pub struct InMemoryAttendanceStore {
    records: RwLock<Vec<AttendanceDay>>,
}

impl InMemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_records(records: Vec<AttendanceDay>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<AttendanceDay>>> {
        self.records
            .read()
            .map_err(|_| anyhow!("attendance store lock poisoned"))
    }
}

impl AttendanceStore for InMemoryAttendanceStore {
    fn save<'a>(&'a self, day: &'a AttendanceDay) -> BoxFuture<'a, Result<()>> {
        let result = self
            .records
            .write()
            .map_err(|_| anyhow!("attendance store lock poisoned"))
            .map(|mut records| match records.iter_mut().find(|r| r.id == day.id) {
                Some(existing) if existing.state() > day.state() => {
                    debug!(record_id = %day.id, "Ignoring stale attendance write");
                }
                Some(existing) => *existing = day.clone(),
                None => records.push(day.clone()),
            });
        futures::future::ready(result).boxed()
    }

    fn find_by_date(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> BoxFuture<'_, Result<Option<AttendanceDay>>> {
        let result = self.read().map(|records| {
            records
                .iter()
                .find(|r| r.employee_id == employee_id && r.date == date)
                .cloned()
        });
        futures::future::ready(result).boxed()
    }

    fn find_by_id<'a>(
        &'a self,
        employee_id: u64,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<AttendanceDay>>> {
        let result = self.read().map(|records| {
            records
                .iter()
                .find(|r| r.employee_id == employee_id && r.id == id)
                .cloned()
        });
        futures::future::ready(result).boxed()
    }

    fn history(
        &self,
        employee_id: u64,
        page: u32,
        per_page: u32,
    ) -> BoxFuture<'_, Result<(Vec<AttendanceDay>, i64)>> {
        let result = self.read().map(|records| {
            let mut mine: Vec<AttendanceDay> = records
                .iter()
                .filter(|r| r.employee_id == employee_id)
                .cloned()
                .collect();
            mine.sort_by(|a, b| b.date.cmp(&a.date));

            let total = mine.len() as i64;
            let start = (page.max(1) as usize - 1) * per_page as usize;
            let data = mine.into_iter().skip(start).take(per_page as usize).collect();
            (data, total)
        });
        futures::future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::SessionState;

    fn record(employee_id: u64, d: u32) -> AttendanceDay {
        AttendanceDay::new(employee_id, NaiveDate::from_ymd_opt(2026, 1, d).unwrap())
    }

    #[actix_web::test]
    async fn test_save_is_upsert_by_id() {
        let store = InMemoryAttendanceStore::new();
        let mut day = record(1, 5);
        store.save(&day).await.unwrap();

        day.status = AttendanceStatus::Present;
        store.save(&day).await.unwrap();

        let (all, total) = store.history(1, 1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(all[0].status, AttendanceStatus::Present);
    }

    #[actix_web::test]
    async fn test_stale_check_in_copy_does_not_undo_check_out() {
        let mut checked_in = record(1, 5);
        checked_in.check_in_time = checked_in.date.and_hms_opt(9, 0, 0);
        checked_in.status = AttendanceStatus::Present;
        let mut checked_out = checked_in.clone();
        checked_out.check_out_time = checked_out.date.and_hms_opt(17, 30, 0);
        checked_out.working_minutes = Some(510);

        let store = InMemoryAttendanceStore::new();
        store.save(&checked_out).await.unwrap();
        store.save(&checked_in).await.unwrap();

        let stored = store.find_by_id(1, &checked_in.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), SessionState::CheckedOut);
        assert_eq!(stored.working_minutes, Some(510));
    }

    #[test]
    fn test_upsert_guards_every_column_and_sets_check_out_last() {
        let sql = upsert_assignments();
        assert_eq!(sql.matches(STALE_WRITE).count(), UPSERT_COLUMNS.len());
        let last = sql.lines().last().unwrap();
        assert!(last.starts_with("check_out_time = IF("), "got {last}");
    }

    #[actix_web::test]
    async fn test_history_is_newest_first_and_paged() {
        let store = InMemoryAttendanceStore::with_records(vec![
            record(1, 2),
            record(1, 4),
            record(2, 5),
            record(1, 3),
        ]);

        let (page1, total) = store.history(1, 1, 2).await.unwrap();
        assert_eq!(total, 3);
        let days: Vec<u32> = page1.iter().map(|r| chrono::Datelike::day(&r.date)).collect();
        assert_eq!(days, vec![4, 3]);

        let (page2, _) = store.history(1, 2, 2).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(chrono::Datelike::day(&page2[0].date), 2);
    }

    #[actix_web::test]
    async fn test_lookups_are_scoped_to_employee() {
        let day = record(1, 5);
        let id = day.id.clone();
        let store = InMemoryAttendanceStore::with_records(vec![day]);

        assert!(store.find_by_id(1, &id).await.unwrap().is_some());
        assert!(store.find_by_id(2, &id).await.unwrap().is_none());
        assert!(
            store
                .find_by_date(1, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_row_conversion_rejects_unknown_status() {
        let row = AttendanceRow {
            id: "att-1".into(),
            employee_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            check_in_time: None,
            check_out_time: None,
            check_in_lat: None,
            check_in_lng: None,
            check_in_accuracy: None,
            check_in_ts: None,
            check_out_lat: None,
            check_out_lng: None,
            check_out_accuracy: None,
            check_out_ts: None,
            status: "on_vacation".into(),
            working_minutes: None,
            synthetic_location: false,
            clock_skew: false,
        };
        assert!(AttendanceDay::try_from(row).is_err());
    }

    #[test]
    fn test_row_conversion_rebuilds_locations() {
        let row = AttendanceRow {
            id: "att-2".into(),
            employee_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            check_in_time: NaiveDate::from_ymd_opt(2026, 1, 5)
                .unwrap()
                .and_hms_opt(9, 0, 0),
            check_out_time: None,
            check_in_lat: Some(28.6139),
            check_in_lng: Some(77.209),
            check_in_accuracy: Some(12.0),
            check_in_ts: Some(1_000),
            check_out_lat: None,
            check_out_lng: None,
            check_out_accuracy: None,
            check_out_ts: None,
            status: "late".into(),
            working_minutes: None,
            synthetic_location: false,
            clock_skew: false,
        };
        let day = AttendanceDay::try_from(row).unwrap();
        assert_eq!(day.status, AttendanceStatus::Late);
        assert_eq!(day.check_in_location.unwrap().accuracy, Some(12.0));
        assert!(day.check_out_location.is_none());
    }
}
