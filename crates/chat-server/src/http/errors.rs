use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use shared::chat::ChatError;
use shared::models::{ErrorBody, ErrorResponse};
use tracing::error;

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
            retry_after: None,
        }),
    )
        .into_response()
}

pub(super) fn bad_request_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, code, message)
}

pub(super) fn not_found_response(message: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub(super) fn service_unavailable_response() -> Response {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "SERVICE_UNAVAILABLE",
        "Chat is temporarily unavailable",
    )
}

pub(super) fn too_many_requests_response(
    code: &str,
    message: &str,
    retry_after_seconds: u64,
) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
            retry_after: Some(retry_after_seconds),
        }),
    )
        .into_response();

    if let Ok(retry_after_value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, retry_after_value);
    }

    response
}

pub(super) fn chat_error_response(err: ChatError) -> Response {
    match err {
        ChatError::MessageTooLong { max } => bad_request_response(
            "MESSAGE_TOO_LONG",
            &format!("Message must be at most {max} characters"),
        ),
        ChatError::InvalidRequest(message) => bad_request_response("INVALID_REQUEST", &message),
        ChatError::ItemNotFound(_) => {
            bad_request_response("ITEM_NOT_FOUND", "The selected book does not exist")
        }
        ChatError::RateLimited {
            retry_after_seconds,
            ..
        } => too_many_requests_response(
            "RATE_LIMITED",
            "Too many requests; retry later",
            retry_after_seconds,
        ),
        ChatError::UpstreamThrottled {
            retry_after_seconds,
        } => too_many_requests_response(
            "UPSTREAM_THROTTLED",
            "The model provider is busy; retry later",
            retry_after_seconds,
        ),
        ChatError::Timeout => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "TIMEOUT",
            "The model took too long to respond",
        ),
        ChatError::Unavailable(_) | ChatError::Cancelled => service_unavailable_response(),
        ChatError::Internal(detail) => {
            error!(error = %detail, "chat request failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Unexpected server error",
            )
        }
    }
}
