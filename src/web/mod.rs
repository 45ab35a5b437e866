//! HTTP surface for the bridge.
//!
//! One page route drives a full bridge flow per request and answers with a
//! redirect to the partner callback or a rendered error screen; a liveness
//! probe rounds out the router. Everything else about the flow lives in
//! [`crate::bridge`].

pub mod templates;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use minijinja::{context, Environment};
use serde_json::json;

use crate::bridge::{BridgeParams, FlowOutcome};
use crate::AppState;

// ---------------------------------------------------------------------------
// Template engine
// ---------------------------------------------------------------------------

/// Build a minijinja environment with all embedded templates registered.
fn template_env() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_template("error", templates::ERROR)
        .expect("error template");
    env
}

/// Render a template by name with the given minijinja context.
fn render(template_name: &str, ctx: minijinja::Value) -> Response {
    let env = template_env();
    match env.get_template(template_name).and_then(|t| t.render(ctx)) {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            tracing::error!(template = template_name, error = %err, "Template render error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<h1>Template Error</h1>".to_string()),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the bridge router.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/bridge", get(bridge_handler))
        .route("/healthz", get(healthz))
}

async fn healthz() -> impl IntoResponse {
    axum::Json(json!({ "status": "ok" }))
}

/// Drive one bridge flow for an inbound partner navigation.
async fn bridge_handler(
    State(state): State<AppState>,
    Query(params): Query<BridgeParams>,
) -> Response {
    let retry_url = retry_url(&params);
    let mut flow = state.bridge.begin(params);

    match flow.run().await {
        FlowOutcome::Redirected(url) => Redirect::to(url.as_str()).into_response(),
        FlowOutcome::Failed(message) => render(
            "error",
            context! {
                message,
                retry_url,
                home_url => state.config.bridge.home_url.clone(),
            },
        ),
        // The caller abandoned the navigation; nobody is waiting for a body.
        FlowOutcome::Cancelled => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Rebuild the bridge URL for the error screen's "Try Again" action.
fn retry_url(params: &BridgeParams) -> String {
    match params.candidate() {
        Some(callback) => format!("/bridge?callback={}", urlencoding::encode(callback)),
        None => "/bridge".to_string(),
    }
}
