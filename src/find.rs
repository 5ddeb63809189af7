//! The `parse` and `search` commands: schema definitions and data rows
//! matched against the search query grammar.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Local;
use log::debug;
use rusqlite::types::Value;
use rusqlite::ToSql;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::database::Database;
use crate::ddl::ast::{ObjectCategory, ObjectDef};
use crate::ddl::quote;
use crate::error::ReliteError;
use crate::export::{csv_field, insert_statement, value_to_csv, value_to_json, ExportFormat};
use crate::schema::SchemaObject;
use crate::search::{KeywordKind, SearchQuery};
use crate::utils::Utils;

fn keyword_kind(category: ObjectCategory) -> KeywordKind {
    match category {
        ObjectCategory::Table => KeywordKind::Table,
        ObjectCategory::Index => KeywordKind::Index,
        ObjectCategory::Trigger => KeywordKind::Trigger,
        ObjectCategory::View => KeywordKind::View,
    }
}

fn column_names(object: &SchemaObject) -> Vec<String> {
    match &object.def {
        Some(ObjectDef::Table(t)) => t
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        Some(ObjectDef::View(v)) => v.columns.clone(),
        Some(ObjectDef::Index(i)) => i
            .columns
            .iter()
            .filter_map(|c| c.column_name().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

pub struct Find {}

impl Find {
    /// Searches schema definitions; matching CREATE statements go to stdout
    /// or OUTFILE as SQL text.
    #[allow(clippy::too_many_arguments)]
    pub fn schema(
        db_path: &Path,
        filter: Option<&str>,
        outfile: Option<&Path>,
        case: bool,
        limit: Option<u64>,
        offset: Option<u64>,
        reverse: bool,
        overwrite: bool,
    ) -> Result<(), ReliteError> {
        let query = SearchQuery::parse(filter.unwrap_or_default())?;
        let db = Database::open(db_path)?;
        let catalog = db.catalog()?;

        // Entity-kind keywords narrow the searched categories.
        let kinds_with_positives: Vec<KeywordKind> = ObjectCategory::ALL
            .iter()
            .map(|&c| keyword_kind(c))
            .filter(|&kind| {
                query
                    .keywords_of(kind)
                    .iter()
                    .any(|k| !k.negated)
            })
            .collect();

        let imin = offset.unwrap_or(0) as usize;
        let imax = match limit {
            Some(limit) => imin.saturating_add(limit as usize),
            None => usize::MAX,
        };

        let mut matches: Vec<String> = Vec::new();
        let mut counts: Vec<(ObjectCategory, usize)> = Vec::new();
        let mut index = 0usize;

        let mut categories = ObjectCategory::ALL.to_vec();
        if reverse {
            categories.reverse();
        }
        for category in categories {
            let kind = keyword_kind(category);
            if !kinds_with_positives.is_empty() && !kinds_with_positives.contains(&kind) {
                continue;
            }
            let mut objects: Vec<&SchemaObject> = catalog.objects(category).collect();
            if reverse {
                objects.reverse();
            }
            let mut category_count = 0usize;
            for object in objects {
                if query.match_keywords(kind, &[object.name.as_str()], case) == Some(false) {
                    continue;
                }
                let columns = column_names(object);
                let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                if query.match_keywords(KeywordKind::Column, &column_refs, case) == Some(false) {
                    continue;
                }
                if !query.match_text(&object.sql, case) {
                    continue;
                }
                if index >= imin && index < imax {
                    matches.push(object.sql.trim_end().trim_end_matches(';').to_string());
                    category_count += 1;
                }
                index += 1;
            }
            if category_count > 0 {
                counts.push((category, category_count));
            }
        }

        let countstr = counts
            .iter()
            .map(|(c, n)| Utils::plural(&c.to_string(), *n))
            .collect::<Vec<_>>()
            .join(", ");

        if matches.is_empty() {
            println!(
                "Found nothing in {}{}.",
                db_path.display(),
                filter
                    .filter(|f| !f.trim().is_empty())
                    .map(|f| format!(" matching '{}'", f))
                    .unwrap_or_default()
            );
            return Ok(());
        }

        let body = format!("{};", matches.join(";\n\n"));
        match resolve_target(outfile, overwrite)? {
            Some((path, mut writer)) => {
                writeln!(writer, "-- Source: {}", db_path.display())?;
                writeln!(writer, "-- Exported: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
                writeln!(writer)?;
                writeln!(writer, "{}", body)?;
                writer.flush()?;
                println!(
                    "Found {}: {}.",
                    Utils::plural("entity", matches.len()),
                    countstr
                );
                println!("Wrote {}.", path.display());
            }
            None => {
                println!("-- Source: {}", db_path.display());
                println!();
                println!("{}", body);
                println!();
                println!(
                    "-- Found {}: {}.",
                    Utils::plural("entity", matches.len()),
                    countstr
                );
            }
        }
        Ok(())
    }

    /// Searches data rows across tables (and views named by `view:`
    /// keywords); matches are emitted as SQL INSERTs, JSON, or CSV.
    #[allow(clippy::too_many_arguments)]
    pub fn data(
        db_path: &Path,
        filter: &str,
        outfile: Option<&Path>,
        format: Option<ExportFormat>,
        case: bool,
        limit: Option<u64>,
        overwrite: bool,
    ) -> Result<(), ReliteError> {
        let query = SearchQuery::parse(filter)?;
        let db = Database::open(db_path)?;
        let catalog = db.catalog()?;
        let format = format
            .or_else(|| outfile.and_then(ExportFormat::from_path))
            .unwrap_or(ExportFormat::Sql);

        let mut relations: Vec<&SchemaObject> = Vec::new();
        for object in catalog.objects(ObjectCategory::Table) {
            if query.match_keywords(KeywordKind::Table, &[object.name.as_str()], case) != Some(false) {
                relations.push(object);
            }
        }
        // Views join the search only when explicitly requested.
        if !query.keywords_of(KeywordKind::View).is_empty() {
            for object in catalog.objects(ObjectCategory::View) {
                if query.match_keywords(KeywordKind::View, &[object.name.as_str()], case) == Some(true) {
                    relations.push(object);
                }
            }
        }

        let date_ranges = query.date_ranges()?;
        let mut remaining = limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let mut total = 0usize;
        let mut searched = 0usize;

        let mut out = SearchOutput::new(format, outfile, overwrite)?;
        for object in relations {
            if remaining == 0 {
                break;
            }
            let columns = relation_columns(&db, &object.name)?;
            if columns.is_empty() {
                continue;
            }

            let (clause, params) = query.like_predicate(&columns);
            let mut sql = format!(
                "SELECT * FROM {} WHERE {}",
                quote(&object.name),
                clause
            );
            let mut all_params: Vec<String> = params;
            if !date_ranges.is_empty() {
                let date_columns = date_typed_columns(object);
                if date_columns.is_empty() {
                    continue;
                }
                for (negated, start, end) in &date_ranges {
                    let per_column: Vec<String> = date_columns
                        .iter()
                        .map(|c| {
                            all_params.push(start.format("%Y-%m-%d").to_string());
                            all_params.push(end.format("%Y-%m-%d").to_string());
                            format!("({0} >= ? AND {0} < ?)", quote(c))
                        })
                        .collect();
                    let joined = format!("({})", per_column.join(" OR "));
                    if *negated {
                        sql.push_str(&format!(" AND NOT {}", joined));
                    } else {
                        sql.push_str(&format!(" AND {}", joined));
                    }
                }
            }
            debug!("Search SQL: {}", sql);
            searched += 1;

            let mut stmt = db.conn().prepare(&sql)?;
            let width = stmt.column_count();
            let names: Vec<String> =
                stmt.column_names().iter().map(|c| c.to_string()).collect();
            let param_refs: Vec<&dyn ToSql> =
                all_params.iter().map(|p| p as &dyn ToSql).collect();
            let mut rows = stmt.query(&param_refs[..])?;
            while let Some(row) = rows.next()? {
                if remaining == 0 {
                    break;
                }
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(row.get::<_, Value>(i)?);
                }
                out.row(&object.name, &names, &values)?;
                remaining -= 1;
                total += 1;
            }
        }

        let written = out.finish()?;
        println!(
            "Found {} in {} searched.",
            Utils::plural("row", total),
            Utils::plural("relation", searched)
        );
        if let Some(path) = written {
            println!("Wrote {}.", path.display());
        }
        Ok(())
    }
}

fn resolve_target(
    outfile: Option<&Path>,
    overwrite: bool,
) -> Result<Option<(std::path::PathBuf, Box<dyn Write>)>, ReliteError> {
    let Some(path) = outfile else {
        return Ok(None);
    };
    let path = if overwrite {
        path.to_path_buf()
    } else {
        Utils::unique_path(path)
    };
    let writer: Box<dyn Write> = Box::new(BufWriter::new(File::create(&path)?));
    Ok(Some((path, writer)))
}

/// Column names as the database reports them, covering views without
/// explicit column lists.
fn relation_columns(db: &Database, name: &str) -> Result<Vec<String>, ReliteError> {
    let mut stmt = db
        .conn()
        .prepare(&format!("SELECT * FROM {} LIMIT 0", quote(name)))?;
    Ok(stmt.column_names().iter().map(|c| c.to_string()).collect())
}

fn date_typed_columns(object: &SchemaObject) -> Vec<String> {
    let Some(ObjectDef::Table(def)) = &object.def else {
        return Vec::new();
    };
    def.columns
        .iter()
        .filter(|c| {
            c.col_type
                .as_deref()
                .map(|t| {
                    let t = t.to_ascii_lowercase();
                    t.contains("date") || t.contains("time")
                })
                .unwrap_or(false)
        })
        .map(|c| c.name.clone())
        .collect()
}

/// Streams matched rows in the chosen format to stdout or a file.
struct SearchOutput {
    format: ExportFormat,
    target: Option<(std::path::PathBuf, Box<dyn Write>)>,
    json_root: JsonMap<String, JsonValue>,
    csv_header_for: Option<String>,
}

impl SearchOutput {
    fn new(
        format: ExportFormat,
        outfile: Option<&Path>,
        overwrite: bool,
    ) -> Result<SearchOutput, ReliteError> {
        Ok(SearchOutput {
            format,
            target: resolve_target(outfile, overwrite)?,
            json_root: JsonMap::new(),
            csv_header_for: None,
        })
    }

    fn row(
        &mut self,
        table: &str,
        columns: &[String],
        values: &[Value],
    ) -> Result<(), ReliteError> {
        match self.format {
            ExportFormat::Sql => {
                let line = insert_statement(table, values);
                match &mut self.target {
                    Some((_, w)) => writeln!(w, "{}", line)?,
                    None => println!("{}", line),
                }
            }
            ExportFormat::Json => {
                let mut row = JsonMap::new();
                for (column, value) in columns.iter().zip(values) {
                    row.insert(column.clone(), value_to_json(value));
                }
                let rows = self
                    .json_root
                    .entry(table.to_string())
                    .or_insert_with(|| JsonValue::Array(Vec::new()));
                if let Some(rows) = rows.as_array_mut() {
                    rows.push(JsonValue::Object(row));
                }
            }
            ExportFormat::Csv => {
                match &self.csv_header_for {
                    Some(previous) if !Utils::lceq(previous, table) => {
                        return Err(ReliteError::Error(
                            "CSV search output covers a single table; narrow the query with table:"
                                .to_string(),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        let header: Vec<String> =
                            columns.iter().map(|c| csv_field(c)).collect();
                        let line = header.join(",");
                        match &mut self.target {
                            Some((_, w)) => writeln!(w, "{}", line)?,
                            None => println!("{}", line),
                        }
                        self.csv_header_for = Some(table.to_string());
                    }
                }
                let fields: Vec<String> = values.iter().map(value_to_csv).collect();
                let line = fields.join(",");
                match &mut self.target {
                    Some((_, w)) => writeln!(w, "{}", line)?,
                    None => println!("{}", line),
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Option<std::path::PathBuf>, ReliteError> {
        if self.format == ExportFormat::Json {
            let rendered = serde_json::to_string_pretty(&JsonValue::Object(std::mem::take(
                &mut self.json_root,
            )))?;
            match &mut self.target {
                Some((_, w)) => writeln!(w, "{}", rendered)?,
                None => println!("{}", rendered),
            }
        }
        if let Some((path, mut w)) = self.target {
            w.flush()?;
            return Ok(Some(path));
        }
        Ok(None)
    }
}
