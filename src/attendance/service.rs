use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{error, info, warn};

use crate::attendance::registry::SessionRegistry;
use crate::attendance::session::{AttendancePolicy, AttendanceSession, GateError};
use crate::attendance::store::AttendanceStore;
use crate::model::attendance::AttendanceDay;
use crate::utils::geofence::OfficeAnchor;
use crate::utils::location::{self, LocationPolicy, LocationProvider, LocationReading};

#[derive(Debug, derive_more::Display)]
pub enum AttendanceError {
    #[display(fmt = "{}", _0)]
    Gate(GateError),
    #[display(fmt = "Internal Server Error")]
    Internal(anyhow::Error),
}

impl std::error::Error for AttendanceError {}

impl From<GateError> for AttendanceError {
    fn from(e: GateError) -> Self {
        AttendanceError::Gate(e)
    }
}

impl From<anyhow::Error> for AttendanceError {
    fn from(e: anyhow::Error) -> Self {
        AttendanceError::Internal(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CheckIn,
    CheckOut,
}

/// A committed transition plus whether the store confirmed it.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub record: AttendanceDay,
    pub synthetic_location: bool,
    /// Set when the store rejected the write; the transition still stands.
    pub persist_error: Option<String>,
}

/// Wires location acquisition, the geofence gate, live sessions and the store together.
pub struct AttendanceService {
    pub anchor: OfficeAnchor,
    pub policy: AttendancePolicy,
    pub location: LocationPolicy,
    registry: SessionRegistry,
    store: Arc<dyn AttendanceStore>,
}

impl AttendanceService {
    pub fn new(
        anchor: OfficeAnchor,
        policy: AttendancePolicy,
        location: LocationPolicy,
        registry: SessionRegistry,
        store: Arc<dyn AttendanceStore>,
    ) -> Self {
        Self {
            anchor,
            policy,
            location,
            registry,
            store,
        }
    }

    pub fn store(&self) -> &dyn AttendanceStore {
        self.store.as_ref()
    }

    pub async fn check_in<P>(
        &self,
        employee_id: u64,
        provider: &P,
        now: NaiveDateTime,
        now_ms: i64,
    ) -> Result<Outcome, AttendanceError>
    where
        P: LocationProvider + ?Sized,
    {
        self.attempt(Action::CheckIn, employee_id, provider, now, now_ms)
            .await
    }

    pub async fn check_out<P>(
        &self,
        employee_id: u64,
        provider: &P,
        now: NaiveDateTime,
        now_ms: i64,
    ) -> Result<Outcome, AttendanceError>
    where
        P: LocationProvider + ?Sized,
    {
        self.attempt(Action::CheckOut, employee_id, provider, now, now_ms)
            .await
    }

    /// Today's record, or an unstarted one when nothing was recorded yet.
    pub async fn today(
        &self,
        employee_id: u64,
        now: NaiveDateTime,
    ) -> Result<AttendanceDay, AttendanceError> {
        let date = now.date();
        let session = self
            .registry
            .peek(employee_id, date, self.store.as_ref())
            .await?
            .unwrap_or_else(|| AttendanceSession::new(employee_id, date));
        Ok(session.day().clone())
    }

    async fn attempt<P>(
        &self,
        action: Action,
        employee_id: u64,
        provider: &P,
        now: NaiveDateTime,
        now_ms: i64,
    ) -> Result<Outcome, AttendanceError>
    where
        P: LocationProvider + ?Sized,
    {
        let reading: Option<LocationReading> =
            match location::acquire(provider, &self.location, &self.anchor, now_ms).await {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(error = %e, employee_id, ?action, "No location for attendance");
                    None
                }
            };

        let date = now.date();
        let handle = self
            .registry
            .session_for(employee_id, date, self.store.as_ref())
            .await?;

        // Held until the store answers, so a later transition cannot be saved first.
        let mut session = handle.lock().await;
        let record = match action {
            Action::CheckIn => {
                session.attempt_check_in(reading.as_ref(), &self.anchor, &self.policy, now)
            }
            Action::CheckOut => {
                session.attempt_check_out(reading.as_ref(), &self.anchor, &self.policy, now)
            }
        };

        let record = match record {
            Ok(r) => r,
            Err(e) => {
                info!(employee_id, ?action, reason = e.kind(), "Attendance gate refused");
                return Err(e.into());
            }
        };

        info!(
            employee_id,
            ?action,
            date = %record.date,
            status = %record.status,
            "Attendance recorded"
        );

        let persist_error = match self.store.save(&record).await {
            Ok(()) => {
                self.registry.unpin(employee_id, date);
                None
            }
            Err(e) => {
                error!(error = %e, employee_id, record_id = %record.id, "Failed to persist attendance");
                self.registry.pin(employee_id, date, &handle);
                Some(e.to_string())
            }
        };
        drop(session);

        Ok(Outcome {
            synthetic_location: reading.is_some_and(|r| r.is_synthetic()),
            record,
            persist_error,
        })
    }
}
