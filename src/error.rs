use axum::{Json, http::StatusCode, response::IntoResponse};
use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;
use tracing::error;

#[derive(Debug, ThisError)]
pub enum CrmError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{provider} error: {message}")]
    ServiceProvider {
        provider: &'static str,
        message: String,
        transient: bool,
    },

    #[error("job queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("OAuth2 token request error: {0}")]
    Oauth2Token(String),

    #[error("OAuth2 server error: {error}")]
    Oauth2Server { error: String },

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML decode error: {0}")]
    XmlDecode(#[from] quick_xml::de::DeError),

    #[error("XML encode error: {0}")]
    XmlEncode(#[from] quick_xml::se::SeError),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrmError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        CrmError::ServiceProvider {
            provider,
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(provider: &'static str, message: impl Into<String>) -> Self {
        CrmError::ServiceProvider {
            provider,
            message: message.into(),
            transient: true,
        }
    }

    /// Errors worth another attempt: network failures, upstream 5xx/429.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrmError::Reqwest(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            CrmError::ServiceProvider { transient, .. } => *transient,
            CrmError::Oauth2Token(_) => true,
            _ => false,
        }
    }

    fn is_unique_violation(&self) -> bool {
        match self {
            CrmError::Database(e) => e
                .as_database_error()
                .is_some_and(|d| d.is_unique_violation()),
            _ => false,
        }
    }
}

impl
    From<
        RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    > for CrmError
{
    fn from(
        e: RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    ) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => CrmError::Oauth2Server {
                error: err.error().to_string(),
            },
            RequestTokenError::Request(req_e) => {
                CrmError::Oauth2Token(format!("request failed: {}", req_e))
            }
            RequestTokenError::Parse(parse_err, _body) => CrmError::Json(parse_err.into_inner()),
            RequestTokenError::Other(s) => CrmError::Oauth2Token(s),
        }
    }
}

impl IntoResponse for CrmError {
    fn into_response(self) -> axum::response::Response {
        if self.is_unique_violation() {
            let body = ApiErrorBody::new("CONFLICT", "Resource already exists.");
            return (StatusCode::CONFLICT, Json(ApiErrorResponse { error: body })).into_response();
        }

        let (status, error_body) = match self {
            CrmError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiErrorBody::new("BAD_REQUEST", msg)),
            CrmError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiErrorBody::new("NOT_FOUND", msg)),
            CrmError::Database(SqlxError::RowNotFound) => (
                StatusCode::NOT_FOUND,
                ApiErrorBody::new("NOT_FOUND", "Resource not found."),
            ),
            CrmError::Forbidden(msg) => (StatusCode::FORBIDDEN, ApiErrorBody::new("FORBIDDEN", msg)),
            CrmError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody::new("UNAUTHORIZED", "Missing or invalid credentials."),
            ),
            CrmError::Conflict(msg) => (StatusCode::CONFLICT, ApiErrorBody::new("CONFLICT", msg)),
            e @ CrmError::InvalidTransition { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorBody::new("INVALID_TRANSITION", e.to_string()),
            ),
            CrmError::Csv(e) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody::new("BAD_REQUEST", format!("invalid CSV: {e}")),
            ),
            CrmError::Base64(_) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody::new("BAD_REQUEST", "content is not valid base64"),
            ),
            e @ (CrmError::ServiceProvider { .. }
            | CrmError::Reqwest(_)
            | CrmError::UrlParse(_)
            | CrmError::XmlDecode(_)
            | CrmError::Oauth2Token(_)
            | CrmError::Oauth2Server { .. }) => {
                error!(error = %e, "upstream provider failure");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiErrorBody::new("SERVICE_PROVIDER", "Upstream service provider failed."),
                )
            }
            e @ (CrmError::Database(_)
            | CrmError::Queue(_)
            | CrmError::Config(_)
            | CrmError::Json(_)
            | CrmError::XmlEncode(_)
            | CrmError::Io(_)) => {
                error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorBody::new("INTERNAL_ERROR", "An internal server error occurred."),
                )
            }
        };
        (status, Json(ApiErrorResponse { error: error_body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiErrorBody {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_provider_errors_are_retryable() {
        assert!(CrmError::transient("bandwidth", "503").is_retryable());
        assert!(!CrmError::provider("datax", "bad license").is_retryable());
        assert!(!CrmError::BadRequest("x".into()).is_retryable());
    }

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (CrmError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (CrmError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CrmError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (CrmError::Unauthorized, StatusCode::UNAUTHORIZED),
            (CrmError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                CrmError::InvalidTransition {
                    from: "client".into(),
                    to: "lead".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (CrmError::provider("docusign", "down"), StatusCode::BAD_GATEWAY),
            (CrmError::Database(SqlxError::RowNotFound), StatusCode::NOT_FOUND),
            (CrmError::Queue("closed".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
