use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::ServiceResult;
use crate::models;

use super::accounts::{MessageDto, UpdateInfoDto};
use super::AppState;

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/admin/updateProfile",
            post_with(update_profile, update_profile_docs),
        )
        .api_route(
            "/admin/set-default-pin",
            post_with(set_default_pin, set_default_pin_docs),
        )
        .api_route("/admin/login", post_with(login, login_docs))
        .api_route("/admin/change-pin", post_with(change_pin, change_pin_docs))
        .api_route("/admin/delete-user", post_with(delete_user, delete_user_docs))
        .api_route("/admin/audit", get_with(audit, audit_docs))
        .api_route(
            "/admin/audit/:id/rebuild",
            post_with(rebuild_balance, rebuild_balance_docs),
        )
        .with_state(app_state)
}

/// The configured administrator is used if the request names none.
fn admin_id_or_default(id: &str) -> String {
    if id.trim().is_empty() {
        env::ADMIN_EMPLOYEE_ID.as_str().to_owned()
    } else {
        id.trim().to_owned()
    }
}

async fn update_profile(
    State(state): State<AppState>,
    form: Json<UpdateInfoDto>,
) -> ServiceResult<Json<MessageDto>> {
    state.service.update_profile(form.0.into()).await?;
    Ok(MessageDto::new("Profile Updated"))
}

fn update_profile_docs(op: TransformOperation) -> TransformOperation {
    op.description(
        "Edit the profile of an employee, found by employee id or by card id. Unknown \
        departments, positions and malformed dates are left unchanged.",
    )
    .tag("admin")
    .response::<200, Json<MessageDto>>()
    .response_with::<400, (), _>(|res| res.description("Employee id and card id are missing!"))
    .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetDefaultPinDto {
    #[serde(default)]
    pub card_uuid: String,
    pub is_default_pin: bool,
}

async fn set_default_pin(
    State(state): State<AppState>,
    form: Json<SetDefaultPinDto>,
) -> ServiceResult<Json<MessageDto>> {
    let account = state
        .service
        .set_default_pin(&form.card_uuid, form.is_default_pin)
        .await?;
    Ok(MessageDto::new(&format!(
        "PIN status updated to Default: {}",
        account.default_pin
    )))
}

fn set_default_pin_docs(op: TransformOperation) -> TransformOperation {
    op.description("Mark the PIN of a card as default or as changed.")
        .tag("admin")
        .response::<200, Json<MessageDto>>()
        .response_with::<400, (), _>(|res| res.description("The card id is missing!"))
        .response_with::<404, (), _>(|res| res.description("The requested card does not exist!"))
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct LoginDto {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pin: String,
}

async fn login(
    State(state): State<AppState>,
    form: Json<LoginDto>,
) -> ServiceResult<Json<MessageDto>> {
    state
        .service
        .verify_admin_pin(&admin_id_or_default(&form.id), &form.pin)
        .await?;
    Ok(MessageDto::new("Login Success"))
}

fn login_docs(op: TransformOperation) -> TransformOperation {
    op.description("Check the PIN of an administrator.")
        .tag("admin")
        .response::<200, Json<MessageDto>>()
        .response_with::<400, (), _>(|res| res.description("The PIN is missing!"))
        .response_with::<401, (), _>(|res| res.description("Wrong PIN!"))
        .response_with::<404, (), _>(|res| res.description("The administrator does not exist!"))
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePinDto {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub new_pin: String,
}

async fn change_pin(
    State(state): State<AppState>,
    form: Json<ChangePinDto>,
) -> ServiceResult<Json<MessageDto>> {
    state
        .service
        .change_admin_pin(&admin_id_or_default(&form.id), &form.new_pin)
        .await?;
    Ok(MessageDto::new("PIN changed"))
}

fn change_pin_docs(op: TransformOperation) -> TransformOperation {
    op.description("Replace the PIN of an administrator.")
        .tag("admin")
        .response::<200, Json<MessageDto>>()
        .response_with::<400, (), _>(|res| res.description("The new PIN is missing!"))
        .response_with::<404, (), _>(|res| res.description("The administrator does not exist!"))
        .response_with::<409, (), _>(|res| {
            res.description("The new PIN is the same as the current one!")
        })
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserDto {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub target_uuid: String,
}

async fn delete_user(
    State(state): State<AppState>,
    form: Json<DeleteUserDto>,
) -> ServiceResult<Json<MessageDto>> {
    state
        .service
        .delete_account(&admin_id_or_default(&form.id), &form.pin, &form.target_uuid)
        .await?;
    Ok(MessageDto::new("Deleted"))
}

fn delete_user_docs(op: TransformOperation) -> TransformOperation {
    op.description(
        "Delete a card holder with their transactions and attendance sessions. Requires the \
        administrator PIN.",
    )
    .tag("admin")
    .response::<200, Json<MessageDto>>()
    .response_with::<400, (), _>(|res| res.description("PIN or card id are missing!"))
    .response_with::<401, (), _>(|res| res.description("Wrong PIN!"))
    .response_with::<404, (), _>(|res| res.description("The requested card does not exist!"))
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAuditDto {
    pub employee_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub stored_balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub replayed_balance: Decimal,
    pub broken_entries: Vec<i64>,
}

impl From<&models::BalanceAudit> for BalanceAuditDto {
    fn from(value: &models::BalanceAudit) -> Self {
        Self {
            employee_id: value.employee_id.to_owned(),
            stored_balance: value.stored_balance,
            replayed_balance: value.replayed_balance,
            broken_entries: value.broken_entries.to_owned(),
        }
    }
}

async fn audit(State(state): State<AppState>) -> ServiceResult<Json<Vec<BalanceAuditDto>>> {
    let audits = state.service.audit_balances().await?;
    Ok(Json(audits.iter().map(|a| a.into()).collect()))
}

fn audit_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the accounts whose balance does not match their transaction journal.")
        .tag("admin")
        .response::<200, Json<Vec<BalanceAuditDto>>>()
}

async fn rebuild_balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<Json<BalanceAuditDto>> {
    let audit = state.service.rebuild_balance(&id).await?;
    Ok(Json(BalanceAuditDto::from(&audit)))
}

fn rebuild_balance_docs(op: TransformOperation) -> TransformOperation {
    op.description("Reset the balance of the given employee to the result of their journal.")
        .tag("admin")
        .response::<200, Json<BalanceAuditDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
}
