use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

/// Errors raised while talking to a vendor API.
#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vendor responded {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("unexpected vendor response: {0}")]
    Decode(String),

    #[error("vendor response is missing the {0} header")]
    MissingHeader(&'static str),

    /// The vendor answered normally but refused the request.
    #[error("vendor rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("timed out waiting for {waited_for}")]
    Timeout {
        code: &'static str,
        waited_for: &'static str,
    },
}

impl VendorError {
    pub fn status(&self) -> Option<u16> {
        match self {
            VendorError::Status { status, .. } => Some(*status),
            VendorError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Vendor error code, when the vendor sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            VendorError::Status { code, .. } => code.as_deref(),
            VendorError::Rejected { code, .. } => Some(code.as_str()),
            VendorError::Timeout { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Upstream {
        message: String,
        details: Option<Value>,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn missing_fields(fields: &[&str]) -> Self {
        AppError::Validation {
            message: format!("Missing required fields: {}", fields.join(", ")),
            details: Some(json!({ "missing": fields })),
        }
    }

    pub fn unauthorized() -> Self {
        AppError::Authentication("Missing or invalid bearer token".into())
    }

    pub fn session_expired() -> Self {
        AppError::Authentication("Session not found or expired, please log in again".into())
    }

    /// Wraps a vendor failure, logging it with the operation that hit it.
    pub fn upstream(context: &str, err: VendorError) -> Self {
        tracing::error!(error = %err, status = ?err.status(), "{} failed", context);

        let mut details = serde_json::Map::new();
        if let Some(code) = err.code() {
            details.insert("code".into(), json!(code));
        }
        if let Some(status) = err.status() {
            details.insert("status".into(), json!(status));
        }
        details.insert("reason".into(), json!(err.to_string()));

        AppError::Upstream {
            message: format!("Failed to {context}"),
            details: Some(Value::Object(details)),
        }
    }

    /// A 500 for failures inside the gateway itself.
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Upstream {
            message: message.into(),
            details: None,
        }
    }

    /// Adds a key to `details`. Only 400 and 500 responses carry details.
    pub fn with_detail(self, key: &str, value: impl Serialize) -> Self {
        let insert = |details: Option<Value>| {
            let mut map = match details {
                Some(Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            map.insert(key.to_string(), json!(value));
            Some(Value::Object(map))
        };
        match self {
            AppError::Validation { message, details } => AppError::Validation {
                message,
                details: insert(details),
            },
            AppError::Upstream { message, details } => AppError::Upstream {
                message,
                details: insert(details),
            },
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation {
            message: "Invalid request body".into(),
            details: Some(json!({ "reason": rejection.body_text() })),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        let details = match self {
            AppError::Validation { details, .. } | AppError::Upstream { details, .. } => details,
            AppError::Authentication(_) | AppError::NotFound(_) => None,
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            details,
        });

        (status, body).into_response()
    }
}
