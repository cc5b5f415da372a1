//! RFC 7807 problem+json error responses.
//!
//! Domain errors are mapped onto HTTP exactly once, here. Internal
//! errors keep their detail in the logs and return a generic body.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use engram_core::Error;
use serde_json::{json, Map, Value};
use tracing::error;

const PROBLEM_TYPE_BASE: &str = "https://engram.dev/problems";

/// An error ready to be rendered as `application/problem+json`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    slug: &'static str,
    title: &'static str,
    detail: String,
    instance: String,
    /// Optional `errors` array for validation failures
    errors: Option<Value>,
    /// Extra top-level members (e.g. schema versions)
    extensions: Map<String, Value>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(
        status: StatusCode,
        slug: &'static str,
        title: &'static str,
        detail: impl Into<String>,
        instance: &str,
    ) -> Self {
        Self {
            status,
            slug,
            title,
            detail: detail.into(),
            instance: instance.to_string(),
            errors: None,
            extensions: Map::new(),
            retry_after_secs: None,
        }
    }

    /// Map a domain error onto its HTTP representation.
    pub fn from_core(err: Error, instance: &str) -> Self {
        match err {
            Error::NotFound { kind, id } => Self::new(
                StatusCode::NOT_FOUND,
                "not-found",
                "Not Found",
                format!("{kind} not found: {id}"),
                instance,
            ),
            Error::StoreExists(id) => Self::new(
                StatusCode::CONFLICT,
                "store-exists",
                "Store Already Exists",
                format!("store already exists: {id}"),
                instance,
            ),
            Error::DuplicateLore(detail) => Self::new(
                StatusCode::CONFLICT,
                "duplicate-lore",
                "Duplicate Lore Entry",
                detail,
                instance,
            ),
            Error::SchemaMismatch {
                client_version,
                server_version,
            } => {
                let mut problem = Self::new(
                    StatusCode::CONFLICT,
                    "schema-mismatch",
                    "Schema Version Mismatch",
                    format!(
                        "client schema version {client_version} is ahead of server version {server_version}"
                    ),
                    instance,
                );
                problem
                    .extensions
                    .insert("client_version".to_string(), json!(client_version));
                problem
                    .extensions
                    .insert("server_version".to_string(), json!(server_version));
                problem
            }
            Error::CompactedLog { requested, horizon } => {
                let mut problem = Self::new(
                    StatusCode::GONE,
                    "log-compacted",
                    "Change Log Compacted",
                    format!(
                        "entries after {requested} were compacted away; bootstrap from a snapshot and resume from its sequence"
                    ),
                    instance,
                );
                problem
                    .extensions
                    .insert("compaction_horizon".to_string(), json!(horizon));
                problem
            }
            Error::InvalidInput(detail) => Self::new(
                StatusCode::BAD_REQUEST,
                "invalid-request",
                "Invalid Request",
                detail,
                instance,
            ),
            Error::Validation(fields) => {
                let mut problem = Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "validation-failed",
                    "Validation Failed",
                    format!("{} field(s) failed validation", fields.len()),
                    instance,
                );
                problem.errors = serde_json::to_value(fields).ok();
                problem
            }
            Error::PushValidation(entries) => {
                let mut problem = Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "push-validation-failed",
                    "Push Validation Failed",
                    format!("{} entries failed validation; nothing was applied", entries.len()),
                    instance,
                );
                problem.errors = serde_json::to_value(entries).ok();
                problem
            }
            Error::SnapshotNotAvailable => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "snapshot-not-available",
                "Snapshot Not Available",
                "no snapshot has been generated for this store yet",
                instance,
            )
            .with_retry_after(60),
            Error::SnapshotInProgress => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "snapshot-in-progress",
                "Snapshot Generation In Progress",
                "another snapshot generation is running for this store",
                instance,
            )
            .with_retry_after(30),
            Error::EmbeddingUnavailable(detail) => {
                error!("embedding provider unavailable: {detail}");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "embedding-unavailable",
                    "Embedding Provider Unavailable",
                    "the embedding provider is currently unavailable",
                    instance,
                )
                .with_retry_after(60)
            }
            other => {
                error!("internal error serving {instance}: {other}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal Server Error",
                    "an internal error occurred",
                    instance,
                )
            }
        }
    }

    pub fn unauthorized(instance: &str) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Unauthorized",
            "missing or invalid bearer token",
            instance,
        )
    }

    pub fn forbidden(detail: impl Into<String>, instance: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            "Forbidden",
            detail,
            instance,
        )
    }

    pub fn bad_request(detail: impl Into<String>, instance: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid-request",
            "Invalid Request",
            detail,
            instance,
        )
    }

    pub fn rate_limited(retry_after_secs: u64, instance: &str) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate-limited",
            "Rate Limited",
            "too many requests; retry later",
            instance,
        )
        .with_retry_after(retry_after_secs)
    }

    pub fn internal(instance: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "Internal Server Error",
            "an internal error occurred",
            instance,
        )
    }

    fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "type": format!("{PROBLEM_TYPE_BASE}/{}", self.slug),
            "title": self.title,
            "status": self.status.as_u16(),
            "detail": self.detail,
            "instance": self.instance,
        });
        if let Some(object) = body.as_object_mut() {
            if let Some(errors) = self.errors {
                object.insert("errors".to_string(), errors);
            }
            for (key, value) in self.extensions {
                object.insert(key, value);
            }
        }

        let mut response = Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, "application/problem+json");
        if let Some(secs) = self.retry_after_secs {
            response = response.header(header::RETRY_AFTER, secs.to_string());
        }
        response
            .body(axum::body::Body::from(body.to_string()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Shorthand for mapping domain results inside handlers.
pub trait OrProblem<T> {
    fn or_problem(self, instance: &str) -> Result<T, ApiError>;
}

impl<T> OrProblem<T> for engram_core::Result<T> {
    fn or_problem(self, instance: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::from_core(e, instance))
    }
}
