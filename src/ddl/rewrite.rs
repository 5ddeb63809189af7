//! Rename engine: applies table/column renames across typed definitions and
//! token streams, then regenerates SQL.
//!
//! Structured parts (names, column lists, foreign keys) are renamed exactly.
//! Unparsed fragments are renamed token-wise: qualified references
//! (`tbl.col`, `NEW.col`, `OLD.col`) are precise; unqualified column
//! references are renamed only when the fragment's subject table is known.
//! String literals and reserved words are never touched.

use std::collections::HashMap;

use crate::ddl::ast::*;
use crate::ddl::generator::{generate, is_keyword};
use crate::ddl::parser::parse_statement;
use crate::error::ReliteError;
use crate::utils::Utils;

/// Rename maps, keyed case-insensitively by the OLD names. The `tables` map
/// covers any named relation (tables and views).
#[derive(Debug, Clone, Default)]
pub struct Renames {
    tables: HashMap<String, String>,
    columns: HashMap<String, HashMap<String, String>>,
}

impl Renames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, old: &str, new: &str) {
        self.tables
            .insert(old.to_ascii_lowercase(), new.to_string());
    }

    pub fn add_column(&mut self, table: &str, old: &str, new: &str) {
        self.columns
            .entry(table.to_ascii_lowercase())
            .or_default()
            .insert(old.to_ascii_lowercase(), new.to_string());
    }

    pub fn table(&self, name: &str) -> Option<&str> {
        self.tables
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&str> {
        self.columns
            .get(&table.to_ascii_lowercase())?
            .get(&column.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has_columns_for(&self, table: &str) -> bool {
        self.columns.contains_key(&table.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }
}

/// Parses `sql`, applies `renames`, and regenerates. Returns the input
/// unchanged semantics when nothing matches.
pub fn transform(sql: &str, renames: &Renames) -> Result<String, ReliteError> {
    let mut def = parse_statement(sql)?;
    rewrite_def(&mut def, renames);
    Ok(generate(&def))
}

pub fn rewrite_def(def: &mut ObjectDef, renames: &Renames) {
    match def {
        ObjectDef::Table(t) => rewrite_table(t, renames),
        ObjectDef::Index(i) => rewrite_index(i, renames),
        ObjectDef::Trigger(t) => rewrite_trigger(t, renames),
        ObjectDef::View(v) => rewrite_view(v, renames),
    }
}

fn rewrite_table(def: &mut TableDef, renames: &Renames) {
    let own_table = def.name.clone();

    for col in &mut def.columns {
        if let Some(new_name) = renames.column(&own_table, &col.name) {
            col.name = new_name.to_string();
        }
        for constraint in &mut col.constraints {
            match constraint {
                ColumnConstraint::Check { expr, .. }
                | ColumnConstraint::Generated { expr, .. } => {
                    rewrite_stream(expr, renames, Some(&own_table));
                }
                ColumnConstraint::Default { value, .. } => {
                    if let DefaultValue::Expr(expr) = value {
                        rewrite_stream(expr, renames, Some(&own_table));
                    }
                }
                ColumnConstraint::ForeignKey { clause, .. } => {
                    rewrite_fk_clause(clause, renames);
                }
                _ => {}
            }
        }
    }

    for constraint in &mut def.constraints {
        match constraint {
            TableConstraint::PrimaryKey { columns, .. }
            | TableConstraint::Unique { columns, .. } => {
                for col in columns {
                    rewrite_stream(&mut col.expr, renames, Some(&own_table));
                }
            }
            TableConstraint::Check { expr, .. } => {
                rewrite_stream(expr, renames, Some(&own_table));
            }
            TableConstraint::ForeignKey {
                columns, clause, ..
            } => {
                for col in columns {
                    if let Some(new_name) = renames.column(&own_table, col) {
                        *col = new_name.to_string();
                    }
                }
                rewrite_fk_clause(clause, renames);
            }
        }
    }

    if let Some(new_name) = renames.table(&own_table) {
        def.name = new_name.to_string();
    }
}

fn rewrite_fk_clause(clause: &mut ForeignKeyClause, renames: &Renames) {
    for col in &mut clause.columns {
        if let Some(new_name) = renames.column(&clause.table, col) {
            *col = new_name.to_string();
        }
    }
    if let Some(new_table) = renames.table(&clause.table) {
        clause.table = new_table.to_string();
    }
}

fn rewrite_index(def: &mut IndexDef, renames: &Renames) {
    let table = def.table.clone();
    for col in &mut def.columns {
        rewrite_stream(&mut col.expr, renames, Some(&table));
    }
    if let Some(where_expr) = &mut def.where_expr {
        rewrite_stream(where_expr, renames, Some(&table));
    }
    if let Some(new_table) = renames.table(&table) {
        def.table = new_table.to_string();
    }
}

fn rewrite_trigger(def: &mut TriggerDef, renames: &Renames) {
    let subject = def.table.clone();
    if let TriggerEvent::Update { columns } = &mut def.event {
        for col in columns {
            if let Some(new_name) = renames.column(&subject, col) {
                *col = new_name.to_string();
            }
        }
    }
    if let Some(when) = &mut def.when {
        rewrite_stream(when, renames, Some(&subject));
    }
    for stmt in &mut def.body {
        rewrite_stream(stmt, renames, Some(&subject));
    }
    if let Some(new_table) = renames.table(&subject) {
        def.table = new_table.to_string();
    }
}

fn rewrite_view(def: &mut ViewDef, renames: &Renames) {
    // Unqualified columns in a view body are resolvable only when the body
    // references a single renamed-column table.
    let candidates = def.select.ident_candidates();
    let subjects: Vec<&str> = candidates
        .iter()
        .map(String::as_str)
        .filter(|name| renames.has_columns_for(name))
        .collect();
    let subject = match subjects.as_slice() {
        [single] => Some((*single).to_string()),
        _ => None,
    };
    rewrite_stream(&mut def.select, renames, subject.as_deref());
    if let Some(new_name) = renames.table(&def.name) {
        def.name = new_name.to_string();
    }
}

/// Token-wise rename. Two passes over a snapshot of the original tokens so
/// qualifier renames cannot shadow column lookups.
pub fn rewrite_stream(stream: &mut TokenStream, renames: &Renames, subject: Option<&str>) {
    if renames.is_empty() || stream.is_empty() {
        return;
    }
    let original = stream.0.clone();
    let len = original.len();

    // Pass 1: column positions.
    for i in 0..len {
        let Some(word) = original[i].ident() else {
            continue;
        };
        let after_dot = i >= 1 && original[i - 1] == Token::Dot;
        if after_dot {
            let qualifier = if i >= 2 { original[i - 2].ident() } else { None };
            let Some(qualifier) = qualifier else { continue };
            let table = if Utils::lceq(qualifier, "new") || Utils::lceq(qualifier, "old") {
                subject
            } else {
                Some(qualifier)
            };
            if let Some(table) = table {
                if let Some(new_name) = renames.column(table, word) {
                    stream.0[i] = original[i].with_ident(new_name);
                }
            }
        } else if let Some(subject) = subject {
            let before_dot = i + 1 < len && original[i + 1] == Token::Dot;
            let call_head = i + 1 < len && original[i + 1] == Token::LParen;
            let bare_keyword = matches!(original[i], Token::Word(_)) && is_keyword(word);
            if !before_dot && !call_head && !bare_keyword {
                if let Some(new_name) = renames.column(subject, word) {
                    stream.0[i] = original[i].with_ident(new_name);
                }
            }
        }
    }

    // Pass 2: table positions. Skips tokens already renamed as columns.
    for i in 0..len {
        let Some(word) = original[i].ident() else {
            continue;
        };
        if stream.0[i] != original[i] {
            continue;
        }
        let after_dot = i >= 1 && original[i - 1] == Token::Dot;
        let call_head = i + 1 < len && original[i + 1] == Token::LParen;
        let bare_keyword = matches!(original[i], Token::Word(_)) && is_keyword(word);
        if after_dot || call_head || bare_keyword {
            continue;
        }
        if let Some(new_name) = renames.table(word) {
            stream.0[i] = original[i].with_ident(new_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn renames_table(old: &str, new: &str) -> Renames {
        let mut renames = Renames::new();
        renames.add_table(old, new);
        renames
    }

    #[test]
    fn test_transform_renames_fk_target() {
        let mut renames = renames_table("customers", "clients");
        renames.add_column("customers", "id", "client_id");
        let sql = "CREATE TABLE invoices (c INTEGER REFERENCES customers(id))";
        let out = transform(sql, &renames).unwrap();
        assert!(out.contains("REFERENCES clients (client_id)"), "{}", out);
    }

    #[test]
    fn test_transform_renames_view_body() {
        let renames = renames_table("users", "people");
        let sql = "CREATE VIEW v AS SELECT users.name FROM users WHERE users.active = 1";
        let out = transform(sql, &renames).unwrap();
        assert!(out.contains("FROM people"), "{}", out);
        assert!(out.contains("people.name"), "{}", out);
        assert!(!out.to_lowercase().contains("users"), "{}", out);
    }

    #[test]
    fn test_transform_leaves_string_literals() {
        let renames = renames_table("users", "people");
        let sql = "CREATE VIEW v AS SELECT 'users' AS label, id FROM users";
        let out = transform(sql, &renames).unwrap();
        assert!(out.contains("'users'"), "{}", out);
        assert!(out.contains("FROM people"), "{}", out);
    }

    #[test]
    fn test_transform_renames_trigger_new_old_columns() {
        let mut renames = Renames::new();
        renames.add_column("users", "name", "full_name");
        let sql = "CREATE TRIGGER trg AFTER UPDATE OF name ON users
            FOR EACH ROW WHEN old.name != new.name
            BEGIN
              INSERT INTO audit (note) VALUES (new.name);
            END";
        let out = transform(sql, &renames).unwrap();
        assert!(out.contains("UPDATE OF full_name"), "{}", out);
        assert!(out.contains("old.full_name != new.full_name"), "{}", out);
        assert!(out.contains("new.full_name"), "{}", out);
    }

    #[test]
    fn test_transform_renames_unqualified_columns_in_index() {
        let mut renames = Renames::new();
        renames.add_column("users", "email", "mail");
        let sql = "CREATE UNIQUE INDEX idx ON users (email) WHERE email IS NOT NULL";
        let out = transform(sql, &renames).unwrap();
        assert!(out.contains("(mail)"), "{}", out);
        assert!(out.contains("WHERE mail IS NOT NULL"), "{}", out);
    }

    #[test]
    fn test_transform_does_not_rename_function_calls() {
        let renames = renames_table("max", "maximum");
        let sql = "CREATE VIEW v AS SELECT max(id) FROM t";
        let out = transform(sql, &renames).unwrap();
        assert!(out.contains("max(id)"), "{}", out);
    }

    #[test]
    fn test_transform_keeps_unrelated_sql() {
        let renames = renames_table("users", "people");
        let sql = "CREATE TABLE orders (id INTEGER PRIMARY KEY)";
        let out = transform(sql, &renames).unwrap();
        assert!(out.contains("CREATE TABLE orders"), "{}", out);
    }

    #[test]
    fn test_rewrite_table_own_constraints() {
        let mut renames = Renames::new();
        renames.add_column("t", "a", "b");
        let sql = "CREATE TABLE t (a INTEGER, x INTEGER, PRIMARY KEY (a), CHECK (a > x))";
        let out = transform(sql, &renames).unwrap();
        assert!(out.contains("PRIMARY KEY (b)"), "{}", out);
        assert!(out.contains("CHECK (b > x)"), "{}", out);
        assert!(out.contains("b INTEGER"), "{}", out);
    }
}
