use std::sync::Arc;

use aide::{
    axum::{
        routing::{get, get_with},
        ApiRouter, IntoApiResponse,
    },
    openapi::{OpenApi, Tag},
    redoc::Redoc,
    transform::TransformOpenApi,
};
use axum::{response::IntoResponse, Extension, Json};

fn tag(name: &str, description: &str) -> Tag {
    Tag {
        name: name.into(),
        description: Some(description.into()),
        ..Default::default()
    }
}

pub fn api_docs(api: TransformOpenApi) -> TransformOpenApi {
    api.title("smartcard-server")
        .summary("Card balances and attendance of employees")
        .description(
            "Card terminals book signed transactions and attendance events, the admin client \
            manages card holders. All routes live under `/api/card`.",
        )
        .tag(tag("transactions", "Card registration and balance changes"))
        .tag(tag("attendance", "Check in, check out and history"))
        .tag(tag("accounts", "Card holders and lookup lists"))
        .tag(tag("admin", "Administrator operations"))
}

pub fn docs_routes() -> ApiRouter {
    // The redoc page is the only route whose response may be inferred
    aide::gen::infer_responses(true);

    let router = ApiRouter::new()
        .api_route(
            "/",
            get_with(
                Redoc::new("/docs/api.json")
                    .with_title("smartcard-server")
                    .axum_handler(),
                |op| op.description("This documentation page."),
            ),
        )
        .route("/api.json", get(serve_docs));

    aide::gen::infer_responses(false);

    router
}

async fn serve_docs(Extension(api): Extension<Arc<OpenApi>>) -> impl IntoApiResponse {
    Json(api.as_ref()).into_response()
}
