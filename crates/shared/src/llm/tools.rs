use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use jsonschema::JSONSchema;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use super::safety::Sanitizer;
use crate::catalog::{Book, Catalog};
use crate::portfolio::Portfolio;

pub const MAX_TOOL_ROUNDS: usize = 4;
const NOTES_EXCERPT_CHARS: usize = 200;
const TOP_AUTHORS: usize = 5;
const TOP_SOCIAL_LINKS: usize = 3;

/// Function declaration advertised to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool {0}")]
    UnknownTool(String),
    #[error("tool {tool} schema failed to compile: {message}")]
    SchemaCompile { tool: &'static str, message: String },
    #[error("invalid arguments for tool {tool}: {errors:?}")]
    InvalidArguments {
        tool: &'static str,
        errors: Vec<String>,
    },
}

pub trait ToolHandler: Send + Sync {
    fn declarations(&self) -> Vec<ToolDeclaration>;
    fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError>;
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchBooksArgs {
    /// Free-text query matched against title, author and notes.
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BookDetailsArgs {
    /// Catalog id of the book, e.g. `book-001`.
    pub book_id: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NoArgs {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogTool {
    SearchBooks,
    GetBookDetails,
    GetReadingStats,
    GetOwnerInfo,
}

impl CatalogTool {
    pub const ALL: [Self; 4] = [
        Self::SearchBooks,
        Self::GetBookDetails,
        Self::GetReadingStats,
        Self::GetOwnerInfo,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::SearchBooks => "search_books",
            Self::GetBookDetails => "get_book_details",
            Self::GetReadingStats => "get_reading_stats",
            Self::GetOwnerInfo => "get_owner_info",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    const fn description(self) -> &'static str {
        match self {
            Self::SearchBooks => {
                "Search the bookshelf by title, author or keyword. Returns matching books with a short notes excerpt."
            }
            Self::GetBookDetails => {
                "Get the full record of one book, including the owner's private reading notes."
            }
            Self::GetReadingStats => {
                "Get reading statistics: total books, books finished per year and most-read authors."
            }
            Self::GetOwnerInfo => {
                "Get information about the bookshelf owner: profile, projects, skills and social links."
            }
        }
    }

    pub fn parameters_schema(self) -> Value {
        match self {
            Self::SearchBooks => serde_json::to_value(schema_for!(SearchBooksArgs))
                .expect("search_books schema should be serializable"),
            Self::GetBookDetails => serde_json::to_value(schema_for!(BookDetailsArgs))
                .expect("get_book_details schema should be serializable"),
            Self::GetReadingStats | Self::GetOwnerInfo => {
                serde_json::to_value(schema_for!(NoArgs))
                    .expect("empty argument schema should be serializable")
            }
        }
    }

    pub fn declaration(self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name(),
            description: self.description(),
            parameters: self.parameters_schema(),
        }
    }
}

static ARGUMENT_VALIDATORS: LazyLock<HashMap<&'static str, Result<JSONSchema, String>>> =
    LazyLock::new(|| {
        CatalogTool::ALL
            .into_iter()
            .map(|tool| {
                let compiled = JSONSchema::compile(&tool.parameters_schema())
                    .map_err(|err| err.to_string());
                (tool.name(), compiled)
            })
            .collect()
    });

fn validate_arguments(tool: CatalogTool, arguments: &Value) -> Result<(), ToolError> {
    let validator = match ARGUMENT_VALIDATORS.get(tool.name()) {
        Some(Ok(validator)) => validator,
        Some(Err(message)) => {
            return Err(ToolError::SchemaCompile {
                tool: tool.name(),
                message: message.clone(),
            });
        }
        None => return Err(ToolError::UnknownTool(tool.name().to_string())),
    };

    if let Err(validation_errors) = validator.validate(arguments) {
        let errors = validation_errors
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(ToolError::InvalidArguments {
            tool: tool.name(),
            errors,
        });
    }
    Ok(())
}

fn parse_arguments<T>(tool: CatalogTool, arguments: Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidArguments {
        tool: tool.name(),
        errors: vec![err.to_string()],
    })
}

/// Read-only catalog and portfolio lookups exposed to the generate tier.
pub struct CatalogTools {
    catalog: Arc<Catalog>,
    portfolio: Arc<Portfolio>,
    sanitizer: Sanitizer,
}

impl CatalogTools {
    pub fn new(catalog: Arc<Catalog>, portfolio: Arc<Portfolio>, sanitizer: Sanitizer) -> Self {
        Self {
            catalog,
            portfolio,
            sanitizer,
        }
    }

    fn search_books(&self, args: SearchBooksArgs) -> Value {
        let results = self
            .catalog
            .search(&args.query)
            .into_iter()
            .map(|book| {
                json!({
                    "id": book.id,
                    "title": book.title,
                    "author": book.author,
                    "link": book.reference_tag(),
                    "notes_excerpt": self.sanitizer.private_notes(&excerpt(&book.private_notes)),
                })
            })
            .collect::<Vec<_>>();

        json!({ "count": results.len(), "results": results })
    }

    fn book_details(&self, args: BookDetailsArgs) -> Value {
        let Some(book) = self.catalog.get(args.book_id.trim()) else {
            return json!({ "error": format!("book not found: {}", args.book_id) });
        };

        json!({
            "book": {
                "id": book.id,
                "title": book.title,
                "author": book.author,
                "isbn": book.isbn,
                "finished_at": book.finished_at,
                "language": book.language,
                "link": book.reference_tag(),
                "private_notes": self.sanitizer.private_notes(&book.private_notes),
            }
        })
    }

    fn reading_stats(&self) -> Value {
        let books = self.catalog.all();
        let mut per_year = BTreeMap::<String, usize>::new();
        let mut per_author = HashMap::<&str, usize>::new();
        for book in books {
            if let Some(year) = finished_year(book) {
                *per_year.entry(year).or_default() += 1;
            }
            *per_author.entry(book.author.as_str()).or_default() += 1;
        }

        let mut authors = per_author.into_iter().collect::<Vec<_>>();
        authors.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
        let top_authors = authors
            .into_iter()
            .take(TOP_AUTHORS)
            .map(|(author, count)| json!({ "author": author, "count": count }))
            .collect::<Vec<_>>();

        json!({
            "total_books": books.len(),
            "books_per_year": per_year,
            "top_authors": top_authors,
        })
    }

    fn owner_info(&self) -> Value {
        let portfolio = &self.portfolio;
        let projects = portfolio
            .projects
            .iter()
            .map(|project| {
                json!({
                    "name": self.sanitizer.sanitize(&project.name),
                    "description": self.sanitizer.sanitize(&project.description),
                    "link": project.link,
                })
            })
            .collect::<Vec<_>>();
        let social = portfolio
            .social
            .iter()
            .take(TOP_SOCIAL_LINKS)
            .map(|link| json!({ "name": self.sanitizer.sanitize(&link.name), "url": link.url }))
            .collect::<Vec<_>>();

        json!({
            "name": self.sanitizer.sanitize(&portfolio.about.name),
            "title": self.sanitizer.sanitize(&portfolio.about.title),
            "tagline": self.sanitizer.sanitize(&portfolio.about.tagline),
            "projects": projects,
            "skills": {
                "backend": portfolio.skills.backend,
                "frontend": portfolio.skills.frontend,
            },
            "social": social,
        })
    }
}

impl ToolHandler for CatalogTools {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        CatalogTool::ALL
            .into_iter()
            .map(CatalogTool::declaration)
            .collect()
    }

    fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let tool = CatalogTool::parse(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other.clone(),
        };
        validate_arguments(tool, &arguments)?;

        let result = match tool {
            CatalogTool::SearchBooks => self.search_books(parse_arguments(tool, arguments)?),
            CatalogTool::GetBookDetails => self.book_details(parse_arguments(tool, arguments)?),
            CatalogTool::GetReadingStats => self.reading_stats(),
            CatalogTool::GetOwnerInfo => self.owner_info(),
        };
        Ok(result)
    }
}

fn excerpt(notes: &str) -> String {
    let mut chars = notes.chars();
    let head = chars.by_ref().take(NOTES_EXCERPT_CHARS).collect::<String>();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn finished_year(book: &Book) -> Option<String> {
    let year = book.finished_at.get(..4)?;
    year.chars()
        .all(|ch| ch.is_ascii_digit())
        .then(|| year.to_string())
}
