use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// A generic error response.
#[derive(Debug)]
pub(crate) struct ErrorResponse {
    /// The HTTP status code.
    code: StatusCode,
    /// The description of the error.
    message: String,
}

impl ErrorResponse {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request")
    }
}

impl From<unmasker::Error> for ErrorResponse {
    fn from(e: unmasker::Error) -> Self {
        let code = if e.is_invalid_input() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else if e.is_execution_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!("Inference failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(code, e.to_string())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code.as_u16(),
                "message": self.message,
            }
        }));

        (self.code, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unmasker::Error;

    #[test]
    fn test_error_status_codes() {
        let status = |e: Error| ErrorResponse::from(e).into_response().status();
        assert_eq!(
            status(Error::invalid_input("empty targets")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(Error::execution("no mask token")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(Error::ModelWeightsNotFound),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = ErrorResponse::from(Error::invalid_input("`top_k` must be greater than 0"))
            .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"]["code"], 422);
        assert_eq!(
            body["error"]["message"],
            "Invalid pipeline input: `top_k` must be greater than 0"
        );
    }
}
