use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::bundle::Bundle;
use crate::errors::BundlerError;
use crate::policy::{intent, Service};
use crate::repository::BundleRepository;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn BundleRepository>,
    /// Shared bundle pointer; mutating handlers hold the write lock across
    /// compile + persist + publish, read handlers take the read lock.
    pub bundle: Arc<RwLock<Bundle>>,
    /// Object key of the live bundle.
    pub key: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bundle/describe", get(describe))
        .route("/service/add", post(add_service))
        .route("/service", delete(remove_service))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Load the live bundle (or start empty when none exists) and serve the
/// HTTP surface until the process is stopped.
pub async fn serve(
    settings: Settings,
    repo: Arc<dyn BundleRepository>,
) -> Result<(), BundlerError> {
    let key = settings.latest_object();
    let bundle = match repo.get(&key).await {
        Ok(bundle) => {
            tracing::info!(services = bundle.services().len(), "loaded existing bundle");
            bundle
        }
        Err(BundlerError::NotFound(_)) => {
            tracing::info!("no bundle in the store yet, starting empty");
            Bundle::new()
        }
        Err(e) => return Err(e),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let state = AppState {
        repo,
        bundle: Arc::new(RwLock::new(bundle)),
        key,
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn describe(State(state): State<AppState>) -> impl IntoResponse {
    let bundle = state.bundle.read().await;
    Json(bundle.services().to_vec())
}

async fn add_service(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, BundlerError> {
    let mut name: Option<String> = None;
    let mut spec: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BundlerError::ParseFailed(format!("invalid multipart body: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("serviceName") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| BundlerError::ParseFailed(e.to_string()))?;
                name = Some(text);
            }
            Some("openAPISpec") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| BundlerError::ParseFailed(e.to_string()))?;
                spec = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let name =
        name.ok_or_else(|| BundlerError::ParseFailed("missing field `serviceName`".to_string()))?;
    let spec =
        spec.ok_or_else(|| BundlerError::ParseFailed("missing field `openAPISpec`".to_string()))?;

    let (policies, idp_url) = intent::parse_document(&spec)?;
    let service = Service::new(name, idp_url, policies);

    let mut guard = state.bundle.write().await;
    let next = guard.with_service(&service)?;
    state.repo.save(&state.key, &next).await?;
    *guard = next;

    Ok((StatusCode::CREATED, Json(guard.services().to_vec())))
}

#[derive(Debug, Deserialize)]
struct RemoveParams {
    #[serde(rename = "serviceName")]
    service_name: Option<String>,
}

async fn remove_service(
    State(state): State<AppState>,
    Query(query): Query<RemoveParams>,
    body: String,
) -> Result<impl IntoResponse, BundlerError> {
    let name = query
        .service_name
        .or_else(|| {
            serde_urlencoded::from_str::<RemoveParams>(&body)
                .ok()
                .and_then(|p| p.service_name)
        })
        .ok_or_else(|| BundlerError::ParseFailed("missing field `serviceName`".to_string()))?;

    let mut guard = state.bundle.write().await;
    let next = guard.without_service(&name)?;
    state.repo.save(&state.key, &next).await?;
    *guard = next;

    Ok((StatusCode::OK, Json(guard.services().to_vec())))
}
