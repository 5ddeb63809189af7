//! Typed definitions for the DDL subset this tool understands.
//!
//! Shapes follow what `sqlite_master` can hold: tables with column and table
//! constraints, indexes with expression columns and partial WHERE clauses,
//! triggers with token-stream bodies, and views with token-stream SELECTs.

use std::collections::BTreeSet;

use strum::{Display, EnumString};

use crate::utils::Utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ObjectCategory {
    Table,
    Index,
    Trigger,
    View,
}

impl ObjectCategory {
    /// Category iteration order used throughout: tables first, then the
    /// objects that hang off them.
    pub const ALL: [ObjectCategory; 4] = [
        ObjectCategory::Table,
        ObjectCategory::Index,
        ObjectCategory::Trigger,
        ObjectCategory::View,
    ];
}

/// One lexical token of an unparsed SQL fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare identifier or keyword.
    Word(String),
    /// Quoted identifier, stored unquoted.
    Quoted(String),
    /// String literal, stored unescaped.
    Str(String),
    /// Blob literal, stored as the hex digits.
    Blob(String),
    Num(String),
    Param(String),
    Op(String),
    Dot,
    Comma,
    LParen,
    RParen,
}

impl Token {
    pub fn ident(&self) -> Option<&str> {
        match self {
            Token::Word(w) | Token::Quoted(w) => Some(w),
            _ => None,
        }
    }

    /// Replacement preserving the token kind (bare stays bare unless the new
    /// name needs quoting; the generator decides that at render time).
    pub fn with_ident(&self, new_name: &str) -> Token {
        match self {
            Token::Quoted(_) => Token::Quoted(new_name.to_string()),
            _ => Token::Word(new_name.to_string()),
        }
    }

    pub fn sql(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::Quoted(q) => format!("\"{}\"", q.replace('"', "\"\"")),
            Token::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Token::Blob(b) => format!("X'{}'", b),
            Token::Num(n) => n.clone(),
            Token::Param(p) => p.clone(),
            Token::Op(o) => o.clone(),
            Token::Dot => ".".to_string(),
            Token::Comma => ",".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
        }
    }
}

/// A lexed-but-unparsed SQL fragment, rewritable by the rename engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenStream(pub Vec<Token>);

impl TokenStream {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the fragment back to SQL. Spacing is regenerated, which is
    /// lexically equivalent to the input even when not byte-identical.
    pub fn sql(&self) -> String {
        let mut out = String::new();
        let mut prev: Option<&Token> = None;
        for token in &self.0 {
            let glue = match (prev, token) {
                (None, _) => true,
                (Some(Token::Dot), _) => true,
                (_, Token::Dot) => true,
                (_, Token::Comma) => true,
                (Some(Token::LParen), _) => true,
                (_, Token::RParen) => true,
                // Function-call style: ident immediately followed by "(".
                (Some(Token::Word(_)), Token::LParen) => true,
                (Some(Token::Quoted(_)), Token::LParen) => true,
                _ => false,
            };
            if !glue && !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&token.sql());
            prev = Some(token);
        }
        out
    }

    /// Collects identifier tokens that could be relation names: every bare or
    /// quoted identifier not in column position (immediately after a dot).
    /// Callers filter the candidates against known relation names.
    pub fn ident_candidates(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for (i, token) in self.0.iter().enumerate() {
            if let Some(word) = token.ident() {
                let after_dot = i > 0 && self.0[i - 1] == Token::Dot;
                if !after_dot {
                    out.insert(word.to_ascii_lowercase());
                }
            }
        }
        out
    }

    /// Whether any identifier token equals `name` (case-insensitively),
    /// qualified or not. Used to detect dropped-column references.
    pub fn mentions_ident(&self, name: &str) -> bool {
        self.0
            .iter()
            .filter_map(Token::ident)
            .any(|w| Utils::lceq(w, name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConflictAction {
    Rollback,
    Abort,
    Fail,
    Ignore,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkAction {
    SetNull,
    SetDefault,
    Cascade,
    Restrict,
    NoAction,
}

impl FkAction {
    pub fn sql(&self) -> &'static str {
        match self {
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
            FkAction::Cascade => "CASCADE",
            FkAction::Restrict => "RESTRICT",
            FkAction::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum InitiallyWhen {
    Deferred,
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferrable {
    pub not: bool,
    pub initially: Option<InitiallyWhen>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyClause {
    pub table: String,
    pub columns: Vec<String>,
    pub on_delete: Option<FkAction>,
    pub on_update: Option<FkAction>,
    pub match_name: Option<String>,
    pub deferrable: Option<Deferrable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultValue {
    /// Number, NULL, CURRENT_TIMESTAMP and friends, rendered verbatim.
    Literal(String),
    Str(String),
    Blob(String),
    Expr(TokenStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum GeneratedStorage {
    Stored,
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnConstraint {
    PrimaryKey {
        name: Option<String>,
        order: Option<SortOrder>,
        conflict: Option<ConflictAction>,
        autoincrement: bool,
    },
    NotNull {
        name: Option<String>,
        conflict: Option<ConflictAction>,
    },
    Null {
        name: Option<String>,
    },
    Unique {
        name: Option<String>,
        conflict: Option<ConflictAction>,
    },
    Check {
        name: Option<String>,
        expr: TokenStream,
    },
    Default {
        name: Option<String>,
        value: DefaultValue,
    },
    Collate {
        name: Option<String>,
        collation: String,
    },
    ForeignKey {
        name: Option<String>,
        clause: ForeignKeyClause,
    },
    Generated {
        name: Option<String>,
        expr: TokenStream,
        storage: Option<GeneratedStorage>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: Option<String>,
    pub constraints: Vec<ColumnConstraint>,
}

impl ColumnDef {
    pub fn is_primary_key(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, ColumnConstraint::PrimaryKey { .. }))
    }

    pub fn is_unique(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, ColumnConstraint::Unique { .. }))
    }

    pub fn is_not_null(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, ColumnConstraint::NotNull { .. }))
    }

    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.constraints.iter().find_map(|c| match c {
            ColumnConstraint::Default { value, .. } => Some(value),
            _ => None,
        })
    }

    pub fn generated(&self) -> Option<(&TokenStream, Option<GeneratedStorage>)> {
        self.constraints.iter().find_map(|c| match c {
            ColumnConstraint::Generated { expr, storage, .. } => Some((expr, *storage)),
            _ => None,
        })
    }

    pub fn foreign_key(&self) -> Option<&ForeignKeyClause> {
        self.constraints.iter().find_map(|c| match c {
            ColumnConstraint::ForeignKey { clause, .. } => Some(clause),
            _ => None,
        })
    }
}

/// Column reference in a PRIMARY KEY/UNIQUE constraint or index: an
/// expression (usually a single column name) with optional collation and
/// direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedColumn {
    pub expr: TokenStream,
    pub collate: Option<String>,
    pub order: Option<SortOrder>,
}

impl IndexedColumn {
    /// The plain column name, when the expression is a single identifier.
    pub fn column_name(&self) -> Option<&str> {
        match self.expr.0.as_slice() {
            [token] => token.ident(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableConstraint {
    PrimaryKey {
        name: Option<String>,
        columns: Vec<IndexedColumn>,
        conflict: Option<ConflictAction>,
    },
    Unique {
        name: Option<String>,
        columns: Vec<IndexedColumn>,
        conflict: Option<ConflictAction>,
    },
    Check {
        name: Option<String>,
        expr: TokenStream,
    },
    ForeignKey {
        name: Option<String>,
        columns: Vec<String>,
        clause: ForeignKeyClause,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableDef {
    pub name: String,
    pub temporary: bool,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
    pub without_rowid: bool,
    pub strict: bool,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| Utils::lceq(&c.name, name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Tables this table references through foreign keys, lowercased.
    pub fn fk_targets(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for col in &self.columns {
            if let Some(fk) = col.foreign_key() {
                out.insert(fk.table.to_ascii_lowercase());
            }
        }
        for constraint in &self.constraints {
            if let TableConstraint::ForeignKey { clause, .. } = constraint {
                out.insert(clause.table.to_ascii_lowercase());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexDef {
    pub name: String,
    pub unique: bool,
    pub if_not_exists: bool,
    pub table: String,
    pub columns: Vec<IndexedColumn>,
    pub where_expr: Option<TokenStream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTime {
    Before,
    After,
    InsteadOf,
}

impl TriggerTime {
    pub fn sql(&self) -> &'static str {
        match self {
            TriggerTime::Before => "BEFORE",
            TriggerTime::After => "AFTER",
            TriggerTime::InsteadOf => "INSTEAD OF",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    Delete,
    Insert,
    Update { columns: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDef {
    pub name: String,
    pub temporary: bool,
    pub if_not_exists: bool,
    pub timing: Option<TriggerTime>,
    pub event: TriggerEvent,
    pub table: String,
    pub for_each_row: bool,
    pub when: Option<TokenStream>,
    pub body: Vec<TokenStream>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewDef {
    pub name: String,
    pub temporary: bool,
    pub if_not_exists: bool,
    pub columns: Vec<String>,
    pub select: TokenStream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectDef {
    Table(TableDef),
    Index(IndexDef),
    Trigger(TriggerDef),
    View(ViewDef),
}

impl ObjectDef {
    pub fn category(&self) -> ObjectCategory {
        match self {
            ObjectDef::Table(_) => ObjectCategory::Table,
            ObjectDef::Index(_) => ObjectCategory::Index,
            ObjectDef::Trigger(_) => ObjectCategory::Trigger,
            ObjectDef::View(_) => ObjectCategory::View,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ObjectDef::Table(t) => &t.name,
            ObjectDef::Index(i) => &i.name,
            ObjectDef::Trigger(t) => &t.name,
            ObjectDef::View(v) => &v.name,
        }
    }

    /// The table or view the object hangs off: an index's table, a trigger's
    /// subject. Tables and views have no subject.
    pub fn subject_table(&self) -> Option<&str> {
        match self {
            ObjectDef::Index(i) => Some(&i.table),
            ObjectDef::Trigger(t) => Some(&t.table),
            _ => None,
        }
    }

    /// Relation names the object is known to reference, lowercased: foreign
    /// key targets and subject tables. Token-stream candidates are collected
    /// separately and filtered against the catalog.
    pub fn direct_table_refs(&self) -> BTreeSet<String> {
        match self {
            ObjectDef::Table(t) => t.fk_targets(),
            ObjectDef::Index(i) => BTreeSet::from([i.table.to_ascii_lowercase()]),
            ObjectDef::Trigger(t) => BTreeSet::from([t.table.to_ascii_lowercase()]),
            ObjectDef::View(_) => BTreeSet::new(),
        }
    }

    /// Identifier candidates from unparsed fragments; the catalog intersects
    /// these with known relation names.
    pub fn ident_candidates(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        match self {
            ObjectDef::Table(t) => {
                for col in &t.columns {
                    for c in &col.constraints {
                        if let ColumnConstraint::Check { expr, .. } = c {
                            out.extend(expr.ident_candidates());
                        }
                    }
                }
                for constraint in &t.constraints {
                    if let TableConstraint::Check { expr, .. } = constraint {
                        out.extend(expr.ident_candidates());
                    }
                }
            }
            ObjectDef::Index(i) => {
                if let Some(where_expr) = &i.where_expr {
                    out.extend(where_expr.ident_candidates());
                }
            }
            ObjectDef::Trigger(t) => {
                if let Some(when) = &t.when {
                    out.extend(when.ident_candidates());
                }
                for stmt in &t.body {
                    out.extend(stmt.ident_candidates());
                }
            }
            ObjectDef::View(v) => {
                out.extend(v.select.ident_candidates());
            }
        }
        out
    }
}
