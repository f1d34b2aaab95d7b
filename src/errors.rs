use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BundlerError {
    #[error("Failed to parse API description: {0}")]
    #[diagnostic(
        code(bundler::parse),
        help("The document must be a valid OpenAPI v3 description")
    )]
    ParseFailed(String),

    #[error("Malformed policy clause: {0}")]
    #[diagnostic(
        code(bundler::malformed_clause),
        help("A clause maps policy kinds (`user`, `role`, `storage-location`, `call`, `timeliness`) to an object with `operator` and `values` or `intervals`")
    )]
    MalformedClause(String),

    #[error("API description does not declare an identity provider")]
    #[diagnostic(
        code(bundler::missing_idp),
        help("Declare a `bearerAuth` security scheme under components carrying the `x-teadal-IAM-provider` extension")
    )]
    MissingIdentityProvider,

    #[error("Invalid or reserved service name `{0}`")]
    #[diagnostic(
        code(bundler::name_conflict),
        help("Service names must match [A-Za-z_][A-Za-z0-9_]* and must not be `main` or `envoy`")
    )]
    NameConflict(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(bundler::not_found))]
    NotFound(String),

    #[error("Policy modules failed to compile: {0}")]
    #[diagnostic(code(bundler::compile))]
    CompileFailed(String),

    #[error("Repository unavailable: {0}")]
    #[diagnostic(
        code(bundler::repository),
        help("Check the MINIO_* environment variables and that the object store is reachable")
    )]
    RepositoryUnavailable(String),

    #[error("Corrupt bundle manifest: {0}")]
    #[diagnostic(code(bundler::manifest))]
    CorruptManifest(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(bundler::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(bundler::config))]
    Config(#[from] config::ConfigError),
}

impl IntoResponse for BundlerError {
    fn into_response(self) -> Response {
        let status = match &self {
            BundlerError::ParseFailed(_)
            | BundlerError::MalformedClause(_)
            | BundlerError::MissingIdentityProvider
            | BundlerError::NameConflict(_) => StatusCode::BAD_REQUEST,
            BundlerError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
