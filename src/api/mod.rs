use std::sync::Arc;

use aide::axum::ApiRouter;

use crate::service::LedgerService;

mod accounts;
mod admin;
mod attendance;
mod transactions;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LedgerService>,
}

/// Setup routes of the card terminals and the admin client
pub fn init(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .merge(transactions::router(app_state.clone()))
        .merge(attendance::router(app_state.clone()))
        .merge(accounts::router(app_state.clone()))
        .merge(admin::router(app_state))
}
