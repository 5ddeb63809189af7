use pest_derive::Parser;

pub mod ast;
pub mod generator;
pub mod parser;
pub mod rewrite;

pub use ast::{ObjectCategory, ObjectDef};
pub use generator::{generate, quote, unquote};
pub use parser::parse_statement;
pub use rewrite::{transform, Renames};

#[derive(Parser)]
#[grammar = "ddl/ddl.pest"]
pub struct DdlParser;
