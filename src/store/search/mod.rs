//! Note-search query language (spec.md §4.4): a small two-stage pipeline (spec.md §9) —
//! [`lexer`] tokenizes, [`normalize`] resolves dates and AND/OR grouping into a language-neutral
//! [`ast::Query`], and [`compiler`] is the only stage that emits SQL.

pub mod ast;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod normalize;

pub use ast::Query;
pub use compiler::CompiledQuery;
pub use error::SearchError;

use chrono::Utc;

/// Runs the full pipeline against the current time. Callers needing a fixed "now" (tests) should
/// call [`lexer::lex`] / [`normalize::normalize`] / [`compiler::compile`] directly.
pub fn compile(raw_query: &str) -> Result<CompiledQuery, crate::error::Error> {
    let tokens = lexer::lex(raw_query)?;
    let query = normalize::normalize(tokens, Utc::now())?;
    Ok(compiler::compile(&query))
}
