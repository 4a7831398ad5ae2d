use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use futures::lock::Mutex as SessionLock;
use moka::future::Cache;
use tracing::{debug, warn};

use crate::attendance::session::AttendanceSession;
use crate::attendance::store::AttendanceStore;

/// Held across the store write, so transitions on one day persist in order.
pub type SessionHandle = Arc<SessionLock<AttendanceSession>>;

type SessionKey = (u64, NaiveDate);

/// Live attendance sessions, one per employee per calendar day.
///
/// A cold entry is rebuilt from the store, so a restart never lets someone
/// check in twice on the same day. Sessions whose last transition the store
/// refused are pinned outside the cache until a later save succeeds.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Cache<SessionKey, SessionHandle>,
    unsaved: Arc<Mutex<HashMap<SessionKey, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_idle(Duration::from_secs(36 * 60 * 60)) // outlives a working day
                .build(),
            unsaved: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn session_for(
        &self,
        employee_id: u64,
        date: NaiveDate,
        store: &dyn AttendanceStore,
    ) -> Result<SessionHandle> {
        if let Some(handle) = self.pinned(&(employee_id, date)) {
            return Ok(handle);
        }

        self.sessions
            .try_get_with((employee_id, date), async {
                let session = match store.find_by_date(employee_id, date).await? {
                    Some(day) => {
                        debug!(employee_id, %date, "Resuming recorded attendance day");
                        AttendanceSession::resume(day)
                    }
                    None => AttendanceSession::new(employee_id, date),
                };
                Ok::<_, anyhow::Error>(Arc::new(SessionLock::new(session)))
            })
            .await
            .map_err(|e| anyhow!("loading attendance session: {e}"))
    }

    /// Today's session if one is live or recorded, without creating it.
    pub async fn peek(
        &self,
        employee_id: u64,
        date: NaiveDate,
        store: &dyn AttendanceStore,
    ) -> Result<Option<AttendanceSession>> {
        let key = (employee_id, date);
        let live = match self.pinned(&key) {
            Some(handle) => Some(handle),
            None => self.sessions.get(&key).await,
        };
        if let Some(handle) = live {
            return Ok(Some(handle.lock().await.clone()));
        }

        Ok(store
            .find_by_date(employee_id, date)
            .await?
            .map(AttendanceSession::resume))
    }

    /// Keep `handle` alive regardless of cache eviction; its state is not in the store.
    pub fn pin(&self, employee_id: u64, date: NaiveDate, handle: &SessionHandle) {
        warn!(employee_id, %date, "Pinning unsaved attendance session");
        self.unsaved_map().insert((employee_id, date), Arc::clone(handle));
    }

    /// The store caught up with the session; let the cache own it again.
    pub fn unpin(&self, employee_id: u64, date: NaiveDate) {
        if self.unsaved_map().remove(&(employee_id, date)).is_some() {
            debug!(employee_id, %date, "Unsaved attendance session persisted");
        }
    }

    #[cfg(test)]
    pub async fn evict(&self, employee_id: u64, date: NaiveDate) {
        self.sessions.invalidate(&(employee_id, date)).await;
    }

    fn pinned(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.unsaved_map().get(key).cloned()
    }

    // Every critical section is a single map call, so a poisoned map is still consistent.
    fn unsaved_map(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, SessionHandle>> {
        self.unsaved.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::session::AttendancePolicy;
    use crate::attendance::store::InMemoryAttendanceStore;
    use crate::model::attendance::{AttendanceDay, SessionState};
    use crate::utils::geofence::OfficeAnchor;
    use crate::utils::location::LocationReading;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
    }

    #[actix_web::test]
    async fn test_same_key_yields_same_session() {
        let registry = SessionRegistry::new(100);
        let store = InMemoryAttendanceStore::new();

        let a = registry.session_for(1, day(), &store).await.unwrap();
        let b = registry.session_for(1, day(), &store).await.unwrap();
        let other = registry.session_for(2, day(), &store).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[actix_web::test]
    async fn test_cold_session_resumes_from_store() {
        let anchor = OfficeAnchor::default();
        let mut recorded = AttendanceSession::new(1, day());
        recorded
            .attempt_check_in(
                Some(&LocationReading::device(anchor.as_coordinate(Some(5.0), 0))),
                &anchor,
                &AttendancePolicy::default(),
                day().and_hms_opt(9, 0, 0).unwrap(),
            )
            .unwrap();
        let store = InMemoryAttendanceStore::with_records(vec![recorded.day().clone()]);

        let registry = SessionRegistry::new(100);
        let handle = registry.session_for(1, day(), &store).await.unwrap();
        assert_eq!(handle.lock().await.state(), SessionState::CheckedIn);
    }

    #[actix_web::test]
    async fn test_peek_does_not_create() {
        let registry = SessionRegistry::new(100);
        let store = InMemoryAttendanceStore::new();
        assert!(registry.peek(1, day(), &store).await.unwrap().is_none());

        let store = InMemoryAttendanceStore::with_records(vec![AttendanceDay::new(1, day())]);
        assert!(registry.peek(1, day(), &store).await.unwrap().is_some());
    }

    #[actix_web::test]
    async fn test_pinned_session_survives_eviction() {
        let registry = SessionRegistry::new(100);
        let store = InMemoryAttendanceStore::new();

        let handle = registry.session_for(1, day(), &store).await.unwrap();
        registry.pin(1, day(), &handle);
        registry.evict(1, day()).await;

        let again = registry.session_for(1, day(), &store).await.unwrap();
        assert!(Arc::ptr_eq(&handle, &again));

        registry.unpin(1, day());
        registry.evict(1, day()).await;
        let fresh = registry.session_for(1, day(), &store).await.unwrap();
        assert!(!Arc::ptr_eq(&handle, &fresh));
    }
}
