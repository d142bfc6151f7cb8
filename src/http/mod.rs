//! HTTP adapter
//!
//! Mounts every served resource under its kind:
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET    | `/{kind}/{namespace}/` | JSON array |
//! | GET    | `/{kind}/{namespace}/{id}` | record or `null` |
//! | POST   | `/{kind}/{namespace}` | created record |
//! | PUT    | `/{kind}/{namespace}/{id}` | updated record |
//! | DELETE | `/{kind}/{namespace}/{id}` | `null` |
//!
//! Anything else under a resource gets that resource's unmatched answer.
//! Every response carries permissive CORS headers.

pub mod response;
pub mod state;

pub use response::{json_response, reply, JSON_CONTENT_TYPE};
pub use state::{ServiceState, SharedState};

use crate::config::ServiceConfig;
use crate::handler::{schema_for, HandlerError, ResourceSchema, RESOURCES};
use crate::keys::CollectionKind;
use crate::store::build_store;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderValue, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const CORS_ALLOW_METHODS: &str = "GET,POST,PUT,DELETE,HEAD,OPTIONS";
const CORS_ALLOW_HEADERS: &str = "content-type";
const CORS_MAX_AGE: &str = "86400";

fn parse_body(body: &Bytes) -> Result<Value, HandlerError> {
    serde_json::from_slice(body).map_err(|e| HandlerError::InvalidBody(e.to_string()))
}

fn resource_router(schema: &'static ResourceSchema) -> Router<SharedState> {
    let collection_path = format!("/{}/:namespace", schema.kind);
    let collection_slash_path = format!("{}/", collection_path);
    let record_path = format!("{}/:id", collection_path);

    let list = move |State(state): State<SharedState>, Path(namespace): Path<String>| async move {
        reply(state.session(schema, namespace).list().await)
    };

    let create = move |State(state): State<SharedState>,
                       Path(namespace): Path<String>,
                       body: Bytes| async move {
        let result = match parse_body(&body) {
            Ok(body) => state.session(schema, namespace).create(body).await,
            Err(e) => Err(e),
        };
        reply(result)
    };

    let fetch = move |State(state): State<SharedState>,
                      Path((namespace, id)): Path<(String, String)>| async move {
        reply(state.session(schema, namespace).get(&id).await)
    };

    let update = move |State(state): State<SharedState>,
                       Path((namespace, id)): Path<(String, String)>,
                       body: Bytes| async move {
        let result = match parse_body(&body) {
            Ok(body) => state.session(schema, namespace).update(&id, body).await,
            Err(e) => Err(e),
        };
        reply(result)
    };

    let delete = move |State(state): State<SharedState>,
                       Path((namespace, id)): Path<(String, String)>| async move {
        reply(state.session(schema, namespace).delete(&id).await)
    };

    let unmatched = move |State(state): State<SharedState>| async move {
        response::unmatched(schema, &state.fallback_url)
    };

    Router::new()
        .route(
            &collection_path,
            get(list.clone())
                .post(create.clone())
                .fallback(unmatched.clone()),
        )
        .route(
            &collection_slash_path,
            get(list).post(create).fallback(unmatched.clone()),
        )
        .route(
            &record_path,
            get(fetch).put(update).delete(delete).fallback(unmatched),
        )
}

/// Requests that matched no route: the owning resource answers if there is one
async fn unmatched_path(State(state): State<SharedState>, uri: Uri) -> Response {
    let owner = uri
        .path()
        .trim_start_matches('/')
        .split('/')
        .next()
        .and_then(|segment| segment.parse::<CollectionKind>().ok())
        .and_then(schema_for);

    match owner {
        Some(schema) => response::unmatched(schema, &state.fallback_url),
        None => response::not_found(),
    }
}

/// Build the application router over `state`
pub fn router(state: SharedState) -> Router {
    RESOURCES
        .iter()
        .copied()
        .fold(Router::<SharedState>::new(), |app, schema| {
            app.merge(resource_router(schema))
        })
        .fallback(unmatched_path)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(CORS_MAX_AGE),
        ))
}

/// Open the configured store and serve until Ctrl+C or SIGTERM
pub async fn run_server(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = build_store(&config.store)?;
    let state = ServiceState::new(store, &config);
    info!(
        "Write mode {:?}, merge {:?}, corrupt payloads {:?}",
        config.sync.write_mode, config.merge, config.sync.corrupt_payload
    );

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
