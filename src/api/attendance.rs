use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Local, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::models::{self, AttendanceEventType};
use crate::service::AttendanceRequest;

use super::AppState;

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/access-log", post_with(log_access, log_access_docs))
        .api_route("/history", get_with(get_history, get_history_docs))
        .with_state(app_state)
}

/// Local time without offset, e.g. `2025-12-14T12:42:01.199489`
fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp
        .map(|t| {
            t.with_timezone(&Local)
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string()
        })
        .unwrap_or_default()
}

fn default_event_type() -> String {
    "CHECK_IN".to_owned()
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogDto {
    pub employee_id: String,
    /// `CHECK_IN`, `CHECK_OUT`, anything else is recorded as restricted access
    #[serde(rename = "type", default = "default_event_type")]
    pub event_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSessionDto {
    pub id: i64,
    pub status: String,
    pub work_date: String,
    pub check_in: String,
    pub check_out: Option<String>,
    pub note: Option<String>,
}

impl From<&models::AttendanceSession> for AttendanceSessionDto {
    fn from(value: &models::AttendanceSession) -> Self {
        Self {
            id: value.id,
            status: value.state.status().to_owned(),
            work_date: value.work_date.to_string(),
            check_in: format_timestamp(value.check_in),
            check_out: value.state.check_out().map(|t| format_timestamp(Some(t))),
            note: value.note.to_owned(),
        }
    }
}

async fn log_access(
    State(state): State<AppState>,
    form: Json<AccessLogDto>,
) -> ServiceResult<Json<AttendanceSessionDto>> {
    let form = form.0;

    let session = state
        .service
        .log_attendance_event(AttendanceRequest {
            employee_id: form.employee_id.trim().to_owned(),
            event: AttendanceEventType::parse(&form.event_type),
            description: form.description,
        })
        .await?;

    Ok(Json(AttendanceSessionDto::from(&session)))
}

fn log_access_docs(op: TransformOperation) -> TransformOperation {
    op.description(
        "Record a check in, a check out or a restricted access attempt. A check in needs a \
        closed session, a check out closes the open one.",
    )
    .tag("attendance")
    .response::<200, Json<AttendanceSessionDto>>()
    .response_with::<404, (), _>(|res| res.description("The requested employee does not exist!"))
    .response_with::<409, (), _>(|res| {
        res.description("A session is already open, or there is no open session to close!")
    })
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub employee_id: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryDto {
    #[serde(rename = "type")]
    pub kind: String,
    pub time: String,
    pub name: String,
    pub desc: Option<String>,
    pub amount: String,
    pub balance_after: String,
}

impl From<&models::HistoryEntry> for HistoryEntryDto {
    fn from(value: &models::HistoryEntry) -> Self {
        Self {
            kind: value.kind.as_str().to_owned(),
            time: format_timestamp(value.timestamp),
            name: value.name.to_owned(),
            desc: value.description.to_owned(),
            amount: format!("{:.2}", value.amount),
            balance_after: format!("{:.2}", value.balance_after),
        }
    }
}

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ServiceResult<Json<Vec<HistoryEntryDto>>> {
    let history = state
        .service
        .get_history(query.employee_id.as_deref())
        .await?;
    Ok(Json(history.iter().map(|e| e.into()).collect()))
}

fn get_history_docs(op: TransformOperation) -> TransformOperation {
    op.description(
        "List attendance events and transactions, newest first. Without an employee id the \
        history of all employees is listed.",
    )
    .tag("attendance")
    .response::<200, Json<Vec<HistoryEntryDto>>>()
}
