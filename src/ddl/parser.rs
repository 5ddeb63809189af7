//! Builds typed definitions from the pest parse tree.

use pest::iterators::Pair;
use pest::Parser;

use crate::ddl::ast::*;
use crate::ddl::generator::unquote;
use crate::ddl::{DdlParser, Rule};
use crate::error::ReliteError;

/// Parses a single CREATE statement into its typed definition.
pub fn parse_statement(sql: &str) -> Result<ObjectDef, ReliteError> {
    let mut pairs = DdlParser::parse(Rule::ddl, sql).map_err(Box::new)?;
    let ddl = pairs
        .next()
        .ok_or_else(|| ReliteError::Error("empty DDL statement".into()))?;

    for pair in ddl.into_inner() {
        match pair.as_rule() {
            Rule::create_table => return Ok(ObjectDef::Table(build_create_table(pair))),
            Rule::create_index => return Ok(ObjectDef::Index(build_create_index(pair))),
            Rule::create_trigger => return Ok(ObjectDef::Trigger(build_create_trigger(pair))),
            Rule::create_view => return Ok(ObjectDef::View(build_create_view(pair))),
            _ => {}
        }
    }
    Err(ReliteError::Error("unsupported DDL statement".into()))
}

fn name_of(pair: Pair<Rule>) -> String {
    // name = { quoted_ident | ident }
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::ident => inner.as_str().to_string(),
        Rule::quoted_ident => unquote(inner.as_str()),
        _ => inner.as_str().to_string(),
    }
}

fn qual_name_of(pair: Pair<Rule>) -> String {
    // Schema prefixes are accepted but dropped; sqlite_master never keeps them.
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::name)
        .last()
        .map(name_of)
        .unwrap_or_default()
}

fn unescape_string(text: &str) -> String {
    text[1..text.len() - 1].replace("''", "'")
}

fn blob_digits(text: &str) -> String {
    let start = text.find('\'').map(|i| i + 1).unwrap_or(0);
    text[start..text.len() - 1].to_string()
}

fn collect_tokens(pair: Pair<Rule>, out: &mut Vec<Token>) {
    match pair.as_rule() {
        Rule::any_token
        | Rule::expr_item
        | Rule::group_item
        | Rule::icol_item
        | Rule::expr_stream
        | Rule::icol_expr
        | Rule::when_expr
        | Rule::select_body
        | Rule::trigger_stmt => {
            for inner in pair.into_inner() {
                collect_tokens(inner, out);
            }
        }
        // paren_group children include the lparen/rparen pairs themselves.
        Rule::paren_group => {
            for inner in pair.into_inner() {
                collect_tokens(inner, out);
            }
        }
        Rule::string_lit => out.push(Token::Str(unescape_string(pair.as_str()))),
        Rule::blob_lit => out.push(Token::Blob(blob_digits(pair.as_str()))),
        Rule::number => out.push(Token::Num(pair.as_str().to_string())),
        Rule::quoted_ident => out.push(Token::Quoted(unquote(pair.as_str()))),
        Rule::ident => out.push(Token::Word(pair.as_str().to_string())),
        Rule::param => out.push(Token::Param(pair.as_str().to_string())),
        Rule::operator => out.push(Token::Op(pair.as_str().to_string())),
        Rule::dot => out.push(Token::Dot),
        Rule::comma => out.push(Token::Comma),
        // lparen/rparen of paren_group are emitted above; any bare ones in
        // token streams arrive here.
        Rule::lparen => out.push(Token::LParen),
        Rule::rparen => out.push(Token::RParen),
        Rule::semicolon => {}
        _ => {}
    }
}

fn stream_of(pair: Pair<Rule>) -> TokenStream {
    let mut tokens = Vec::new();
    collect_tokens(pair, &mut tokens);
    TokenStream(tokens)
}

/// Token stream of a paren_group without the outer parentheses; the
/// generator re-adds them for CHECK (..), DEFAULT (..), and GENERATED (..).
fn paren_inner_of(pair: Pair<Rule>) -> TokenStream {
    let mut tokens = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::lparen | Rule::rparen => {}
            _ => collect_tokens(inner, &mut tokens),
        }
    }
    TokenStream(tokens)
}

fn build_conflict(pair: Pair<Rule>) -> Option<ConflictAction> {
    // conflict_clause = { kw_on ~ kw_conflict ~ conflict_action }
    let action = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::conflict_action)?;
    let kw = action.into_inner().next()?;
    Some(match kw.as_rule() {
        Rule::kw_rollback => ConflictAction::Rollback,
        Rule::kw_abort => ConflictAction::Abort,
        Rule::kw_fail => ConflictAction::Fail,
        Rule::kw_ignore => ConflictAction::Ignore,
        _ => ConflictAction::Replace,
    })
}

fn build_sort_order(pair: Pair<Rule>) -> SortOrder {
    match pair.into_inner().next().map(|p| p.as_rule()) {
        Some(Rule::kw_desc) => SortOrder::Desc,
        _ => SortOrder::Asc,
    }
}

fn build_references(pair: Pair<Rule>) -> ForeignKeyClause {
    let mut clause = ForeignKeyClause {
        table: String::new(),
        columns: Vec::new(),
        on_delete: None,
        on_update: None,
        match_name: None,
        deferrable: None,
    };
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::qual_name => clause.table = qual_name_of(p),
            Rule::name => clause.columns.push(name_of(p)),
            Rule::ref_rule => {
                let mut is_delete = false;
                let mut is_update = false;
                for r in p.into_inner() {
                    match r.as_rule() {
                        Rule::kw_delete => is_delete = true,
                        Rule::kw_update => is_update = true,
                        Rule::ref_action => {
                            let action = build_fk_action(r);
                            if is_delete {
                                clause.on_delete = Some(action);
                            } else if is_update {
                                clause.on_update = Some(action);
                            }
                        }
                        Rule::name => clause.match_name = Some(name_of(r)),
                        _ => {}
                    }
                }
            }
            Rule::deferrable_clause => {
                let mut deferrable = Deferrable {
                    not: false,
                    initially: None,
                };
                for d in p.into_inner() {
                    match d.as_rule() {
                        Rule::kw_not => deferrable.not = true,
                        Rule::kw_deferred => deferrable.initially = Some(InitiallyWhen::Deferred),
                        Rule::kw_immediate => {
                            deferrable.initially = Some(InitiallyWhen::Immediate)
                        }
                        _ => {}
                    }
                }
                clause.deferrable = Some(deferrable);
            }
            _ => {}
        }
    }
    clause
}

fn build_fk_action(pair: Pair<Rule>) -> FkAction {
    let mut is_set = false;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::kw_set => is_set = true,
            Rule::kw_null if is_set => return FkAction::SetNull,
            Rule::kw_default if is_set => return FkAction::SetDefault,
            Rule::kw_cascade => return FkAction::Cascade,
            Rule::kw_restrict => return FkAction::Restrict,
            Rule::kw_no => return FkAction::NoAction,
            _ => {}
        }
    }
    FkAction::NoAction
}

fn build_indexed_column(pair: Pair<Rule>) -> IndexedColumn {
    let mut column = IndexedColumn {
        expr: TokenStream::default(),
        collate: None,
        order: None,
    };
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::icol_expr => column.expr = stream_of(p),
            Rule::name => column.collate = Some(name_of(p)),
            Rule::sort_order => column.order = Some(build_sort_order(p)),
            _ => {}
        }
    }
    column
}

fn build_column_constraint(pair: Pair<Rule>) -> ColumnConstraint {
    let mut name: Option<String> = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => name = Some(name_of(p)),
            Rule::col_pk => {
                let mut order = None;
                let mut conflict = None;
                let mut autoincrement = false;
                for c in p.into_inner() {
                    match c.as_rule() {
                        Rule::sort_order => order = Some(build_sort_order(c)),
                        Rule::conflict_clause => conflict = build_conflict(c),
                        Rule::kw_autoincrement => autoincrement = true,
                        _ => {}
                    }
                }
                return ColumnConstraint::PrimaryKey {
                    name,
                    order,
                    conflict,
                    autoincrement,
                };
            }
            Rule::col_notnull => {
                let conflict = p
                    .into_inner()
                    .find(|c| c.as_rule() == Rule::conflict_clause)
                    .and_then(build_conflict);
                return ColumnConstraint::NotNull { name, conflict };
            }
            Rule::col_null => return ColumnConstraint::Null { name },
            Rule::col_unique => {
                let conflict = p
                    .into_inner()
                    .find(|c| c.as_rule() == Rule::conflict_clause)
                    .and_then(build_conflict);
                return ColumnConstraint::Unique { name, conflict };
            }
            Rule::col_check => {
                let group = p.into_inner().find(|c| c.as_rule() == Rule::paren_group);
                return ColumnConstraint::Check {
                    name,
                    expr: group.map(paren_inner_of).unwrap_or_default(),
                };
            }
            Rule::col_default => {
                let value_pair = p
                    .into_inner()
                    .find(|c| c.as_rule() == Rule::default_value)
                    .and_then(|v| v.into_inner().next());
                let value = match value_pair {
                    Some(v) => match v.as_rule() {
                        Rule::paren_group => DefaultValue::Expr(paren_inner_of(v)),
                        Rule::string_lit => DefaultValue::Str(unescape_string(v.as_str())),
                        Rule::blob_lit => DefaultValue::Blob(blob_digits(v.as_str())),
                        Rule::signed_number => DefaultValue::Literal(
                            v.as_str().split_whitespace().collect::<String>(),
                        ),
                        _ => DefaultValue::Literal(v.as_str().to_string()),
                    },
                    None => DefaultValue::Literal("NULL".to_string()),
                };
                return ColumnConstraint::Default { name, value };
            }
            Rule::col_collate => {
                let collation = p
                    .into_inner()
                    .find(|c| c.as_rule() == Rule::name)
                    .map(name_of)
                    .unwrap_or_default();
                return ColumnConstraint::Collate { name, collation };
            }
            Rule::references_clause => {
                return ColumnConstraint::ForeignKey {
                    name,
                    clause: build_references(p),
                };
            }
            Rule::col_generated => {
                let mut expr = TokenStream::default();
                let mut storage = None;
                for c in p.into_inner() {
                    match c.as_rule() {
                        Rule::paren_group => expr = paren_inner_of(c),
                        Rule::kw_stored => storage = Some(GeneratedStorage::Stored),
                        Rule::kw_virtual => storage = Some(GeneratedStorage::Virtual),
                        _ => {}
                    }
                }
                return ColumnConstraint::Generated {
                    name,
                    expr,
                    storage,
                };
            }
            _ => {}
        }
    }
    ColumnConstraint::Null { name }
}

fn build_column_def(pair: Pair<Rule>) -> ColumnDef {
    let mut def = ColumnDef::default();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => def.name = name_of(p),
            Rule::type_name => def.col_type = Some(build_type_name(p)),
            Rule::column_constraint => def.constraints.push(build_column_constraint(p)),
            _ => {}
        }
    }
    def
}

fn build_type_name(pair: Pair<Rule>) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::type_word => words.push(p.as_str().to_string()),
            Rule::signed_number => args.push(p.as_str().split_whitespace().collect::<String>()),
            _ => {}
        }
    }
    let mut out = words.join(" ");
    if !args.is_empty() {
        out.push('(');
        out.push_str(&args.join(","));
        out.push(')');
    }
    out
}

fn build_table_constraint(pair: Pair<Rule>) -> TableConstraint {
    let mut name: Option<String> = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => name = Some(name_of(p)),
            Rule::tc_pk | Rule::tc_unique => {
                let is_pk = p.as_rule() == Rule::tc_pk;
                let mut columns = Vec::new();
                let mut conflict = None;
                for c in p.into_inner() {
                    match c.as_rule() {
                        Rule::indexed_col => columns.push(build_indexed_column(c)),
                        Rule::conflict_clause => conflict = build_conflict(c),
                        _ => {}
                    }
                }
                return if is_pk {
                    TableConstraint::PrimaryKey {
                        name,
                        columns,
                        conflict,
                    }
                } else {
                    TableConstraint::Unique {
                        name,
                        columns,
                        conflict,
                    }
                };
            }
            Rule::tc_check => {
                let group = p.into_inner().find(|c| c.as_rule() == Rule::paren_group);
                return TableConstraint::Check {
                    name,
                    expr: group.map(paren_inner_of).unwrap_or_default(),
                };
            }
            Rule::tc_fk => {
                let mut columns = Vec::new();
                let mut clause = None;
                for c in p.into_inner() {
                    match c.as_rule() {
                        Rule::name => columns.push(name_of(c)),
                        Rule::references_clause => clause = Some(build_references(c)),
                        _ => {}
                    }
                }
                return TableConstraint::ForeignKey {
                    name,
                    columns,
                    clause: clause.unwrap_or(ForeignKeyClause {
                        table: String::new(),
                        columns: Vec::new(),
                        on_delete: None,
                        on_update: None,
                        match_name: None,
                        deferrable: None,
                    }),
                };
            }
            _ => {}
        }
    }
    TableConstraint::Check {
        name,
        expr: TokenStream::default(),
    }
}

fn build_create_table(pair: Pair<Rule>) -> TableDef {
    let mut def = TableDef::default();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::temp_kw => def.temporary = true,
            Rule::if_not_exists => def.if_not_exists = true,
            Rule::qual_name => def.name = qual_name_of(p),
            Rule::table_item => {
                let inner = p.into_inner().next().unwrap();
                match inner.as_rule() {
                    Rule::table_constraint => def.constraints.push(build_table_constraint(inner)),
                    Rule::column_def => def.columns.push(build_column_def(inner)),
                    _ => {}
                }
            }
            Rule::table_options => {
                for opt in p.into_inner() {
                    if opt.as_rule() == Rule::table_option {
                        match opt.into_inner().next().map(|k| k.as_rule()) {
                            Some(Rule::kw_strict) => def.strict = true,
                            Some(Rule::kw_without) => def.without_rowid = true,
                            _ => {}
                        }
                    }
                }
            }
            _ => {}
        }
    }
    def
}

fn build_create_index(pair: Pair<Rule>) -> IndexDef {
    let mut def = IndexDef::default();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::kw_unique => def.unique = true,
            Rule::if_not_exists => def.if_not_exists = true,
            Rule::qual_name => def.name = qual_name_of(p),
            Rule::name => def.table = name_of(p),
            Rule::indexed_col => def.columns.push(build_indexed_column(p)),
            Rule::index_where => {
                def.where_expr = p
                    .into_inner()
                    .find(|c| c.as_rule() == Rule::expr_stream)
                    .map(stream_of);
            }
            _ => {}
        }
    }
    def
}

fn build_create_trigger(pair: Pair<Rule>) -> TriggerDef {
    let mut def = TriggerDef {
        name: String::new(),
        temporary: false,
        if_not_exists: false,
        timing: None,
        event: TriggerEvent::Delete,
        table: String::new(),
        for_each_row: false,
        when: None,
        body: Vec::new(),
    };
    let mut seen_name = false;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::temp_kw => def.temporary = true,
            Rule::if_not_exists => def.if_not_exists = true,
            Rule::qual_name => {
                if !seen_name {
                    def.name = qual_name_of(p);
                    seen_name = true;
                } else {
                    def.table = qual_name_of(p);
                }
            }
            Rule::trigger_time => {
                def.timing = p.into_inner().next().map(|k| match k.as_rule() {
                    Rule::kw_before => TriggerTime::Before,
                    Rule::kw_after => TriggerTime::After,
                    _ => TriggerTime::InsteadOf,
                });
            }
            Rule::trigger_event => {
                let inner = p.into_inner().next().unwrap();
                def.event = match inner.as_rule() {
                    Rule::kw_delete => TriggerEvent::Delete,
                    Rule::kw_insert => TriggerEvent::Insert,
                    _ => TriggerEvent::Update {
                        columns: inner
                            .into_inner()
                            .filter(|c| c.as_rule() == Rule::name)
                            .map(name_of)
                            .collect(),
                    },
                };
            }
            Rule::for_each_row => def.for_each_row = true,
            Rule::when_clause => {
                def.when = p
                    .into_inner()
                    .find(|c| c.as_rule() == Rule::when_expr)
                    .map(stream_of);
            }
            Rule::trigger_stmt => def.body.push(stream_of(p)),
            _ => {}
        }
    }
    def
}

fn build_create_view(pair: Pair<Rule>) -> ViewDef {
    let mut def = ViewDef::default();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::temp_kw => def.temporary = true,
            Rule::if_not_exists => def.if_not_exists = true,
            Rule::qual_name => def.name = qual_name_of(p),
            Rule::view_cols => {
                def.columns = p
                    .into_inner()
                    .filter(|c| c.as_rule() == Rule::name)
                    .map(name_of)
                    .collect();
            }
            Rule::select_body => def.select = stream_of(p),
            _ => {}
        }
    }
    def
}
