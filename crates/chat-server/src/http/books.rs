use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use shared::portfolio::OwnerInfo;

use super::AppState;
use super::errors::not_found_response;

#[derive(Debug, Deserialize)]
pub(super) struct ListBooksQuery {
    lang: Option<String>,
}

pub(super) async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<ListBooksQuery>,
) -> Response {
    let language = query.lang.as_deref().map(str::trim);
    Json(state.catalog.listing(language)).into_response()
}

pub(super) async fn get_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Response {
    match state.catalog.get(&book_id) {
        Some(book) => Json(book.to_response()).into_response(),
        None => not_found_response("Book not found"),
    }
}

pub(super) async fn owner(State(state): State<AppState>) -> Json<OwnerInfo> {
    Json(state.portfolio.owner_info())
}
