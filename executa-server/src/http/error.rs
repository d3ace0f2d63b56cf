use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use executa_core::{ErrorKind, ExecutaError, ExecutaResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

/// Error body returned by every route: `{ "error": ..., "code": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "E9004")
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", "E9007")
    }

    /// Client errors keep their own message. Anything else is logged and
    /// replaced by `fallback`.
    pub fn from_core(err: ExecutaError, fallback: &str) -> Self {
        let status = match err.kind() {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => {
                error!(error_code = %err.error_code(), error = %err, "{}", fallback);
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, fallback, err.error_code());
            }
        };
        debug!(error_code = %err.error_code(), status = %status, "Request rejected: {}", err);
        Self::new(status, err.public_message(), err.error_code())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

pub trait ApiResultExt<T> {
    /// Maps a core error, using `fallback` as the message for server faults.
    fn or_api(self, fallback: &str) -> Result<T, ApiError>;
}

impl<T> ApiResultExt<T> for ExecutaResult<T> {
    fn or_api(self, fallback: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::from_core(e, fallback))
    }
}

/// Serializes `body` and marks it `success: true`. Non-object bodies are
/// wrapped under `data`.
pub fn success<T: Serialize>(body: T) -> Result<Json<Value>, ApiError> {
    let value = serde_json::to_value(body)
        .map_err(|e| ApiError::from_core(ExecutaError::from(e), "Failed to encode response"))?;
    let body = match value {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        other => json!({ "success": true, "data": other }),
    };
    Ok(Json(body))
}

/// `Json` extractor whose rejections use the API error body.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}
