use std::sync::Arc;

use aide::axum::ApiRouter;
use aide::openapi::OpenApi;
use axum::Extension;
use log::{error, info};
use tower_http::cors::CorsLayer;

mod api;
mod clock;
mod database;
mod docs;
mod env;
mod error;
mod models;
mod pin;
mod service;

use crate::api::AppState;
use crate::clock::SystemClock;
use crate::database::PgStore;
use crate::error::ServiceResult;
use crate::service::LedgerService;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("smartcard_server=info"),
    )
    .init();

    let result = init().await;

    let exit_code = match result {
        Ok(_) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn init() -> ServiceResult<()> {
    pin::check_salt(env::PIN_SALT.as_str())?;

    let store = PgStore::connect(env::DATABASE_URL.as_str(), *env::DATABASE_MAX_CONNECTIONS).await?;
    let service = Arc::new(LedgerService::new(Arc::new(store), Arc::new(SystemClock)));

    // Check if admin exists, create otherwise
    if let Some(pin) = env::ADMIN_PIN.as_deref() {
        service
            .create_admin(
                env::ADMIN_CARD_ID.as_str(),
                env::ADMIN_EMPLOYEE_ID.as_str(),
                env::ADMIN_NAME.as_str(),
                pin,
            )
            .await?;
    }

    let app_state = AppState { service };
    let mut open_api = OpenApi::default();

    let app = ApiRouter::new()
        .nest_api_service("/api/card", api::init(app_state))
        .nest_api_service("/docs", docs::docs_routes())
        .finish_api_with(&mut open_api, docs::api_docs)
        .layer(Extension(Arc::new(open_api)))
        .layer(CorsLayer::permissive());

    let address = format!("{}:{}", env::API_HOST.as_str(), env::API_PORT.as_str());
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, app).await?;
    Ok(())
}
