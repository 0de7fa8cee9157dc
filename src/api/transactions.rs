use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::models::AccountLookup;
use crate::service::{RegisterRequest, TransactionRequest};

use super::AppState;

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/register", post_with(register, register_docs))
        .api_route(
            "/transaction",
            post_with(post_transaction, post_transaction_docs),
        )
        .api_route("/balance/:id", get_with(get_balance, get_balance_docs))
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDto {
    pub card_uuid: String,
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub public_key_hex: String,
}

async fn register(
    State(state): State<AppState>,
    form: Json<RegisterDto>,
) -> ServiceResult<StatusCode> {
    let form = form.0;

    state
        .service
        .register(RegisterRequest {
            card_id: form.card_uuid,
            employee_id: form.employee_id,
            name: form.name,
            public_key_hex: form.public_key_hex,
        })
        .await?;

    Ok(StatusCode::CREATED)
}

fn register_docs(op: TransformOperation) -> TransformOperation {
    op.description("Register a newly issued card with an empty balance.")
        .tag("transactions")
        .response_with::<201, (), _>(|res| res.description("The card was registered!"))
        .response_with::<409, (), _>(|res| {
            res.description("The card id or the employee id is already registered!")
        })
}

/// Terminals also send the balance they read from the card as `currentBalance`, it is ignored.
#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequestDto {
    pub card_uuid: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub signature_hex: String,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewBalanceDto {
    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub new_balance: Decimal,
}

async fn post_transaction(
    State(state): State<AppState>,
    form: Json<TransactionRequestDto>,
) -> ServiceResult<Json<NewBalanceDto>> {
    let form = form.0;

    let entry = state
        .service
        .post_transaction(TransactionRequest {
            lookup: AccountLookup::from_terminal_key(form.card_uuid.trim()),
            amount: form.amount,
            description: form.description,
            signature_hex: form.signature_hex,
        })
        .await?;

    Ok(Json(NewBalanceDto {
        new_balance: entry.balance_after,
    }))
}

fn post_transaction_docs(op: TransformOperation) -> TransformOperation {
    op.description(
        "Book a signed amount on a card. Positive amounts top up, all others are payments. \
        The card is looked up by card id first and by employee id second.",
    )
    .tag("transactions")
    .response::<200, Json<NewBalanceDto>>()
    .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct BalanceDto {
    #[serde(with = "rust_decimal::serde::float")]
    #[schemars(with = "f64")]
    pub balance: Decimal,
}

async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<Json<BalanceDto>> {
    let balance = state.service.get_balance(&id).await?;
    Ok(Json(BalanceDto { balance }))
}

fn get_balance_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get the balance of the given employee.")
        .tag("transactions")
        .response::<200, Json<BalanceDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested account does not exist!"))
}
