use pest_derive::Parser;

pub mod query;

pub use query::{Keyword, KeywordKind, SearchQuery, Term};

#[derive(Parser)]
#[grammar = "search/search.pest"]
pub struct SearchParser;
