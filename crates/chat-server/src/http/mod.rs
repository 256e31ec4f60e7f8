use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Router, middleware};
use shared::catalog::Catalog;
use shared::chat::ChatService;
use shared::portfolio::Portfolio;

mod books;
mod chat;
mod client_ip;
mod cors;
mod errors;
mod health;
mod observability;


#[derive(Clone)]
pub struct AppState {
    /// `None` when the model gateway could not be initialized.
    pub chat: Option<Arc<ChatService>>,
    pub catalog: Arc<Catalog>,
    pub portfolio: Arc<Portfolio>,
    pub trusted_proxy_ips: Arc<HashSet<IpAddr>>,
}

pub fn build_router(app_state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/api/chat", post(chat::chat))
        .route("/api/books", get(books::list_books))
        .route("/api/books/{book_id}", get(books::get_book))
        .route("/api/owner", get(books::owner))
        .layer(middleware::from_fn(
            observability::request_observability_middleware,
        ))
        .layer(cors::build_cors_layer(allowed_origins))
        .with_state(app_state)
}
