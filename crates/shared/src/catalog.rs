use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::BookResponse;

static ITEM_REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[item::([^\]]+?)::([^\]]+)\]").expect("item reference pattern should compile")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub finished_at: String,
    #[serde(default)]
    pub private_notes: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub language: String,
}

impl Book {
    pub fn to_response(&self) -> BookResponse {
        BookResponse {
            id: self.id.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            isbn: self.isbn.clone(),
            cover: self.cover.clone(),
            finished_at: self.finished_at.clone(),
            language: self.language.clone(),
        }
    }

    /// The reference tag the model is expected to emit for this book.
    pub fn reference_tag(&self) -> String {
        format!("[item::{}::{}]", self.title, self.id)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {message}")]
    Read { path: String, message: String },
    #[error("catalog file {path} is not valid json: {message}")]
    Parse { path: String, message: String },
    #[error("catalog contains duplicate book id {0}")]
    DuplicateId(String),
}

/// Immutable book collection indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    books: Vec<Book>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(books: Vec<Book>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(books.len());
        for (position, book) in books.iter().enumerate() {
            if index.insert(book.id.clone(), position).is_some() {
                return Err(CatalogError::DuplicateId(book.id.clone()));
            }
        }
        Ok(Self { books, index })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|err| CatalogError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let books = serde_json::from_str::<Vec<Book>>(&raw).map_err(|err| CatalogError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::new(books)
    }

    pub fn get(&self, id: &str) -> Option<&Book> {
        self.index.get(id).map(|position| &self.books[*position])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn all(&self) -> &[Book] {
        &self.books
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn search(&self, query: &str) -> Vec<&Book> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        self.books
            .iter()
            .filter(|book| {
                book.title.to_lowercase().contains(&needle)
                    || book.author.to_lowercase().contains(&needle)
                    || book.private_notes.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Public listing with books in `language` first, otherwise in catalog order.
    pub fn listing(&self, language: Option<&str>) -> Vec<BookResponse> {
        let mut books = self.books.iter().collect::<Vec<_>>();
        if let Some(language) = language.filter(|value| !value.is_empty()) {
            books.sort_by_key(|book| book.language != language);
        }
        books.into_iter().map(Book::to_response).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReference {
    pub title: String,
    pub id: String,
}

pub fn extract_references(text: &str) -> Vec<ItemReference> {
    ITEM_REFERENCE_PATTERN
        .captures_iter(text)
        .map(|captures| ItemReference {
            title: captures[1].to_string(),
            id: captures[2].to_string(),
        })
        .collect()
}

/// Distinct referenced ids in first-occurrence order.
pub fn referenced_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for reference in extract_references(text) {
        if !ids.contains(&reference.id) {
            ids.push(reference.id);
        }
    }
    ids
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{Book, Catalog};

    pub(crate) fn book(id: &str, title: &str, author: &str, language: &str) -> Book {
        Book {
            id: id.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            isbn: String::new(),
            cover: String::new(),
            finished_at: "2025-03-01".to_string(),
            private_notes: format!("Notes about {title}."),
            link: format!("[item::{title}::{id}]"),
            language: language.to_string(),
        }
    }

    pub(crate) fn sample_catalog() -> Catalog {
        Catalog::new(vec![
            book("book-001", "リーダブルコード", "Dustin Boswell", "ja"),
            book("book-002", "Designing Data-Intensive Applications", "Martin Kleppmann", "en"),
            book("book-003", "The Pragmatic Programmer", "David Thomas", "en"),
        ])
        .expect("sample catalog should build")
    }
}
