use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{Extensions, HeaderMap, header};
use axum::response::{IntoResponse, Response};
use shared::chat::ChatTurn;
use shared::models::{ChatRequest, Language};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::AppState;
use super::client_ip::request_source;
use super::errors::{bad_request_response, chat_error_response, service_unavailable_response};
use super::observability::RequestContext;

pub(super) async fn chat(
    State(state): State<AppState>,
    extensions: Extensions,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request_id = extensions
        .get::<RequestContext>()
        .map(|context| context.request_id.clone())
        .unwrap_or_default();

    let Some(chat) = state.chat.as_ref() else {
        warn!(request_id = %request_id, "chat requested while gateway is unavailable");
        return service_unavailable_response();
    };

    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(request_id = %request_id, error = %rejection, "rejected malformed chat request");
            return bad_request_response("INVALID_REQUEST", "Request body must include a message");
        }
    };

    let language = determine_language(request.language.as_deref(), &headers);
    let turn = ChatTurn {
        message: request.message,
        item_id: request.item_id,
        session_id: request.session_id,
        language,
        source: request_source(&extensions, &headers, &state.trusted_proxy_ips),
    };

    // Dropping the handler (client disconnect) cancels in-flight model work.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    match chat.respond(turn, cancel).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "chat request rejected");
            chat_error_response(err)
        }
    }
}

/// Body language first, then the first supported `Accept-Language` entry, then English.
pub(super) fn determine_language(requested: Option<&str>, headers: &HeaderMap) -> Language {
    requested
        .and_then(Language::from_tag)
        .or_else(|| {
            headers
                .get(header::ACCEPT_LANGUAGE)
                .and_then(|value| value.to_str().ok())
                .and_then(Language::from_accept_language)
        })
        .unwrap_or_default()
}
