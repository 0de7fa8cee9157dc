use std::collections::BTreeMap;

use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::models;
use crate::service::format_date_of_birth;

use super::AppState;

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/account/:key", get_with(get_account, get_account_docs))
        .api_route("/all-users", get_with(list_accounts, list_accounts_docs))
        .api_route("/update", post_with(update_card_holder, update_card_holder_docs))
        .api_route("/change-status", post_with(change_status, change_status_docs))
        .api_route("/pin-changed", post_with(pin_changed, pin_changed_docs))
        .api_route("/next-id", get_with(next_id, next_id_docs))
        .api_route("/departments", get_with(list_departments, list_departments_docs))
        .api_route("/positions", get_with(list_positions, list_positions_docs))
        .api_route("/products", get_with(list_products, list_products_docs))
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountDto {
    pub card_uuid: String,
    pub employee_id: String,
    pub name: String,
    pub department: Option<String>,
    pub position: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub dob: Option<String>,
    pub is_default_pin: bool,
    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub balance: Decimal,
}

impl From<&models::AccountProfile> for AccountDto {
    fn from(value: &models::AccountProfile) -> Self {
        let account = &value.account;
        Self {
            card_uuid: account.card_id.to_owned(),
            employee_id: account.employee_id.to_owned(),
            name: account.name.to_owned(),
            department: value.department.to_owned(),
            position: value.position.to_owned(),
            role: account.role.as_str().to_owned(),
            is_active: account.active,
            dob: account.date_of_birth.as_ref().map(format_date_of_birth),
            is_default_pin: account.default_pin,
            balance: account.balance,
        }
    }
}

async fn get_account(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ServiceResult<Json<AccountDto>> {
    let profile = state.service.get_account(&key).await?;
    Ok(Json(AccountDto::from(&profile)))
}

fn get_account_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get the account with the given card id or employee id.")
        .tag("accounts")
        .response::<200, Json<AccountDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
}

async fn list_accounts(State(state): State<AppState>) -> ServiceResult<Json<Vec<AccountDto>>> {
    let profiles = state.service.list_accounts().await?;
    Ok(Json(profiles.iter().map(|p| p.into()).collect()))
}

fn list_accounts_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all accounts.")
        .tag("accounts")
        .response::<200, Json<Vec<AccountDto>>>()
}

/// Body of the card holder and the admin profile editor
#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfoDto {
    #[serde(default)]
    pub card_uuid: String,
    #[serde(default)]
    pub employee_id: String,
    #[serde(default)]
    pub name: String,
    /// `dd/MM/yyyy`, ignored if it does not parse
    #[serde(default)]
    pub dob: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub position: String,
    #[serde(default = "default_true")]
    pub is_default_pin: bool,
}

fn default_true() -> bool {
    true
}

impl From<UpdateInfoDto> for models::ProfileUpdate {
    fn from(value: UpdateInfoDto) -> Self {
        models::ProfileUpdate {
            card_id: value.card_uuid,
            employee_id: value.employee_id,
            name: value.name,
            date_of_birth: value.dob,
            department: value.department,
            position: value.position,
            default_pin: value.is_default_pin,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct MessageDto {
    pub message: String,
}

impl MessageDto {
    pub fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_owned(),
        })
    }
}

async fn update_card_holder(
    State(state): State<AppState>,
    form: Json<UpdateInfoDto>,
) -> ServiceResult<Json<MessageDto>> {
    let form = form.0;
    state
        .service
        .update_card_holder(&form.card_uuid, &form.name, &form.dob)
        .await?;
    Ok(MessageDto::new("Updated"))
}

fn update_card_holder_docs(op: TransformOperation) -> TransformOperation {
    op.description("Update name and date of birth of a card holder.")
        .tag("accounts")
        .response::<200, Json<MessageDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested card does not exist!"))
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusDto {
    pub target_uuid: String,
    pub is_active: bool,
}

async fn change_status(
    State(state): State<AppState>,
    form: Json<ChangeStatusDto>,
) -> ServiceResult<Json<MessageDto>> {
    state
        .service
        .change_status(&form.target_uuid, form.is_active)
        .await?;
    Ok(MessageDto::new("Status updated"))
}

fn change_status_docs(op: TransformOperation) -> TransformOperation {
    op.description("Activate or deactivate a card.")
        .tag("accounts")
        .response::<200, Json<MessageDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested card does not exist!"))
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardDto {
    #[serde(default)]
    pub card_uuid: String,
}

async fn pin_changed(
    State(state): State<AppState>,
    form: Json<CardDto>,
) -> ServiceResult<Json<MessageDto>> {
    state.service.mark_pin_changed(&form.card_uuid).await?;
    Ok(MessageDto::new("PIN status updated"))
}

fn pin_changed_docs(op: TransformOperation) -> TransformOperation {
    op.description("Record that the card holder replaced the default PIN.")
        .tag("accounts")
        .response::<200, Json<MessageDto>>()
        .response_with::<400, (), _>(|res| res.description("The card id is missing!"))
        .response_with::<404, (), _>(|res| res.description("The requested card does not exist!"))
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct NextIdQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct NextIdDto {
    pub id: String,
}

async fn next_id(
    State(state): State<AppState>,
    Query(query): Query<NextIdQuery>,
) -> ServiceResult<Json<NextIdDto>> {
    let id = state
        .service
        .next_employee_id(query.prefix.as_deref())
        .await?;
    Ok(Json(NextIdDto { id }))
}

fn next_id_docs(op: TransformOperation) -> TransformOperation {
    op.description("Suggest the next employee id for a prefix, `NV` by default.")
        .tag("accounts")
        .response::<200, Json<NextIdDto>>()
}

async fn list_departments(
    State(state): State<AppState>,
) -> ServiceResult<Json<BTreeMap<i64, String>>> {
    Ok(Json(state.service.list_departments().await?))
}

fn list_departments_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all departments by id.")
        .tag("accounts")
        .response::<200, Json<BTreeMap<i64, String>>>()
}

async fn list_positions(
    State(state): State<AppState>,
) -> ServiceResult<Json<BTreeMap<i64, String>>> {
    Ok(Json(state.service.list_positions().await?))
}

fn list_positions_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all positions by id.")
        .tag("accounts")
        .response::<200, Json<BTreeMap<i64, String>>>()
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductDto {
    pub id: i64,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub price: Decimal,
    pub category: String,
    pub is_available: bool,
}

impl From<&models::Product> for ProductDto {
    fn from(value: &models::Product) -> Self {
        Self {
            id: value.id,
            name: value.name.to_owned(),
            price: value.price,
            category: value.category.to_owned(),
            is_available: value.available,
        }
    }
}

async fn list_products(State(state): State<AppState>) -> ServiceResult<Json<Vec<ProductDto>>> {
    let products = state.service.list_products().await?;
    Ok(Json(products.iter().map(|p| p.into()).collect()))
}

fn list_products_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all products that can currently be bought.")
        .tag("accounts")
        .response::<200, Json<Vec<ProductDto>>>()
}
