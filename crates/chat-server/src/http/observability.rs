use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone, Debug)]
pub(super) struct RequestContext {
    pub(super) request_id: String,
}

/// Which part of the bookshelf API a request hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Surface {
    Chat,
    Catalog,
    Probe,
    Other,
}

impl Surface {
    fn for_route(route: &str) -> Self {
        match route {
            "/api/chat" => Self::Chat,
            "/health" | "/ready" => Self::Probe,
            _ if route == "/api/owner" || route.starts_with("/api/books") => Self::Catalog,
            _ => Self::Other,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Catalog => "catalog",
            Self::Probe => "probe",
            Self::Other => "other",
        }
    }
}

pub(super) async fn request_observability_middleware(mut req: Request, next: Next) -> Response {
    let request_id = resolve_request_id(&req);
    req.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let surface = Surface::for_route(&route);
    let started_at = Instant::now();

    let mut response = next.run(req).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static(REQUEST_ID_HEADER),
            header_value,
        );
    }

    let status = response.status();
    let latency_ms = started_at.elapsed().as_millis() as u64;
    if status.is_server_error() {
        warn!(
            request_id = %request_id,
            method = %method,
            route = %route,
            surface = surface.as_str(),
            status = status.as_u16(),
            latency_ms,
            "bookshelf request failed"
        );
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(
            request_id = %request_id,
            route = %route,
            surface = surface.as_str(),
            retry_after_seconds = retry_after_seconds(response.headers()).unwrap_or(0),
            latency_ms,
            "bookshelf request throttled"
        );
    } else if surface == Surface::Probe {
        debug!(route = %route, status = status.as_u16(), "probe answered");
    } else {
        info!(
            request_id = %request_id,
            method = %method,
            route = %route,
            surface = surface.as_str(),
            status = status.as_u16(),
            latency_ms,
            "bookshelf request completed"
        );
    }

    response
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn resolve_request_id(req: &Request) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(normalize_request_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn normalize_request_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_REQUEST_ID_LEN {
        return None;
    }

    let valid = trimmed
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.'));
    valid.then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header};

    use super::{Surface, normalize_request_id, retry_after_seconds};

    #[test]
    fn keeps_safe_request_ids() {
        assert_eq!(
            normalize_request_id(" chat-42._x "),
            Some("chat-42._x".to_string())
        );
    }

    #[test]
    fn rejects_unsafe_request_ids() {
        assert!(normalize_request_id("").is_none());
        assert!(normalize_request_id("id with spaces").is_none());
        assert!(normalize_request_id(&"r".repeat(129)).is_none());
    }

    #[test]
    fn routes_map_to_bookshelf_surfaces() {
        assert_eq!(Surface::for_route("/api/chat"), Surface::Chat);
        assert_eq!(Surface::for_route("/api/books"), Surface::Catalog);
        assert_eq!(Surface::for_route("/api/books/{book_id}"), Surface::Catalog);
        assert_eq!(Surface::for_route("/api/owner"), Surface::Catalog);
        assert_eq!(Surface::for_route("/ready"), Surface::Probe);
        assert_eq!(Surface::for_route("/favicon.ico"), Surface::Other);
    }

    #[test]
    fn retry_after_is_read_from_throttled_responses() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_seconds(&headers), None);

        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
        assert_eq!(retry_after_seconds(&headers), Some(60));
    }
}
