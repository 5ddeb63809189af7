use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReliteError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into ReliteError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors

    #[error("DDL parsing error: {0}")]
    DdlParsingError(#[from] Box<pest::error::Error<crate::ddl::Rule>>),

    #[error("Search parsing error: {0}")]
    SearchParsingError(#[from] Box<pest::error::Error<crate::search::Rule>>),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
