//! Attendance session state machine
//!
//! Per account there is either no open session (closed) or exactly one (open):
//!
//! | event        | closed                 | open                         |
//! |--------------|------------------------|------------------------------|
//! | `CHECK_IN`   | insert open session    | reject, session already open |
//! | `CHECK_OUT`  | reject, nothing to close | finish the open session    |
//! | `RESTRICTED` | insert restricted row  | insert restricted row        |
//!
//! Restricted rows never have a check out time, but they are terminal. The open session lookup
//! goes by state, so a restricted row can neither block a check in nor be closed by a check out.
use log::info;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    AccountLookup, AttendanceEventType, AttendanceSession, NewAttendanceSession, SessionState,
};

use super::{lock_existing_account, LedgerService, NO_OPEN_SESSION, OPEN_SESSION_EXISTS};

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRequest {
    pub employee_id: String,
    pub event: AttendanceEventType,
    pub description: String,
}

/// What an attendance event does to the sessions of one account
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Transition {
    Open,
    Close { session_id: i64 },
    RecordRestricted,
    Reject(&'static str),
}

/// Decide the transition for `event` given the open sessions of the account.
///
/// Should there ever be more than one open session, the one checked in last is closed.
pub fn decide(event: AttendanceEventType, open_sessions: &[AttendanceSession]) -> Transition {
    let latest_open = open_sessions
        .iter()
        .filter(|s| s.is_open())
        .max_by_key(|s| (s.check_in, s.id));

    match (event, latest_open) {
        (AttendanceEventType::Restricted, _) => Transition::RecordRestricted,
        (AttendanceEventType::CheckIn, None) => Transition::Open,
        (AttendanceEventType::CheckIn, Some(_)) => Transition::Reject(OPEN_SESSION_EXISTS),
        (AttendanceEventType::CheckOut, Some(session)) => Transition::Close {
            session_id: session.id,
        },
        (AttendanceEventType::CheckOut, None) => Transition::Reject(NO_OPEN_SESSION),
    }
}

impl LedgerService {
    /// Apply an attendance event and return the session it created or closed.
    pub async fn log_attendance_event(
        &self,
        request: AttendanceRequest,
    ) -> ServiceResult<AttendanceSession> {
        let clock = self.clock.clone();
        let lookup = AccountLookup::EmployeeId(request.employee_id.clone());
        let event = request.event;
        let description = request.description;

        let result = self
            .atomically("log attendance", move |unit| {
                let lookup = lookup.clone();
                let description = description.clone();
                let clock = clock.clone();
                Box::pin(async move {
                    let account = lock_existing_account(unit, &lookup).await?;
                    let now = clock.now();
                    let work_date = clock.work_date(now);
                    let open_sessions = unit.get_open_sessions(account.id).await?;

                    match decide(event, &open_sessions) {
                        Transition::Open => {
                            unit.insert_session(NewAttendanceSession {
                                account_id: account.id,
                                work_date,
                                check_in: now,
                                state: SessionState::Open,
                                note: Some(description),
                            })
                            .await
                        }
                        Transition::RecordRestricted => {
                            unit.insert_session(NewAttendanceSession {
                                account_id: account.id,
                                work_date,
                                check_in: now,
                                state: SessionState::Restricted,
                                note: Some(description),
                            })
                            .await
                        }
                        Transition::Close { session_id } => {
                            let mut session = open_sessions
                                .into_iter()
                                .find(|s| s.id == session_id)
                                .ok_or_else(|| {
                                    ServiceError::NotFound(NO_OPEN_SESSION.to_owned())
                                })?;
                            let note = Some(format!("{description} (Out)"));

                            unit.close_session(session_id, now, note.clone()).await?;

                            session.state = SessionState::Finished { check_out: now };
                            session.note = note;
                            Ok(session)
                        }
                        Transition::Reject(reason) => {
                            Err(ServiceError::Conflict(reason.to_owned()))
                        }
                    }
                })
            })
            .await;

        match &result {
            Ok(session) => info!(
                "{} recorded for {} ({})",
                session.state.status(),
                request.employee_id,
                session.id
            ),
            Err(ServiceError::Conflict(reason)) | Err(ServiceError::NotFound(reason)) => {
                info!("Attendance of {} rejected: {}", request.employee_id, reason)
            }
            Err(_) => {}
        }
        result
    }
}
