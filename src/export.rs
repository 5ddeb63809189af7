use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use log::info;
use rusqlite::types::Value;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::database::Database;
use crate::ddl::ast::ObjectCategory;
use crate::ddl::quote;
use crate::error::ReliteError;
use crate::schema::{Catalog, SchemaObject};
use crate::utils::Utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Sql,
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = ReliteError;
    fn from_str(s: &str) -> Result<Self, ReliteError> {
        match s.to_lowercase().as_str() {
            "sql" => Ok(ExportFormat::Sql),
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ReliteError::Error("Invalid format specified.".to_string())),
        }
    }
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Option<ExportFormat> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

pub struct Export {}

impl Export {
    pub fn run(
        db_path: &Path,
        outfile: Option<&Path>,
        format: Option<ExportFormat>,
        table: Option<&str>,
        overwrite: bool,
    ) -> Result<(), ReliteError> {
        let db = Database::open(db_path)?;
        let catalog = db.catalog()?;

        let format = format
            .or_else(|| outfile.and_then(ExportFormat::from_path))
            .unwrap_or(ExportFormat::Sql);
        if format == ExportFormat::Csv && table.is_none() {
            return Err(ReliteError::Error(
                "CSV export requires --table".to_string(),
            ));
        }
        if let Some(table) = table {
            if !catalog.contains(ObjectCategory::Table, table) {
                return Err(ReliteError::Error(format!("No such table: {}", table)));
            }
        }

        let target = resolve_outfile(outfile, overwrite);
        let mut rows_written = 0usize;
        {
            let mut writer: Box<dyn Write> = match &target {
                Some(path) => Box::new(BufWriter::new(File::create(path)?)),
                None => Box::new(io::stdout()),
            };
            match format {
                ExportFormat::Sql => {
                    rows_written = write_sql(&db, &catalog, table, &mut writer)?
                }
                ExportFormat::Json => {
                    rows_written = write_json(&db, &catalog, table, &mut writer)?
                }
                ExportFormat::Csv => {
                    // Checked above.
                    let table = table.unwrap_or_default();
                    rows_written = write_csv(&db, &catalog, table, &mut writer)?;
                }
            }
            writer.flush()?;
        }

        if let Some(path) = &target {
            let size = path.metadata().map(|m| m.len()).unwrap_or(0);
            info!(
                "Exported {} to {} ({})",
                Utils::plural("row", rows_written),
                path.display(),
                Utils::format_bytes(size)
            );
            println!(
                "Wrote {} ({}, {}).",
                path.display(),
                Utils::format_bytes(size),
                Utils::plural("row", rows_written)
            );
        }
        Ok(())
    }
}

fn resolve_outfile(outfile: Option<&Path>, overwrite: bool) -> Option<PathBuf> {
    let path = outfile?;
    if overwrite {
        Some(path.to_path_buf())
    } else {
        Some(Utils::unique_path(path))
    }
}

fn exported_tables<'a>(catalog: &'a Catalog, table: Option<&str>) -> Vec<&'a SchemaObject> {
    catalog
        .objects(ObjectCategory::Table)
        .filter(|o| table.map(|t| Utils::lceq(&o.name, t)).unwrap_or(true))
        .collect()
}

/// Reads all rows of a table, passing column names and values to `emit`.
fn scan_rows<F>(db: &Database, table: &str, mut emit: F) -> Result<usize, ReliteError>
where
    F: FnMut(&[String], &[Value]) -> Result<(), ReliteError>,
{
    let mut stmt = db
        .conn()
        .prepare(&format!("SELECT * FROM {}", quote(table)))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([])?;
    let mut count = 0usize;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(row.get::<_, Value>(i)?);
        }
        emit(&columns, &values)?;
        count += 1;
    }
    Ok(count)
}

pub(crate) fn insert_statement(table: &str, values: &[Value]) -> String {
    let literals: Vec<String> = values.iter().map(Utils::sql_literal).collect();
    format!(
        "INSERT INTO {} VALUES ({});",
        quote(table),
        literals.join(", ")
    )
}

fn write_sql(
    db: &Database,
    catalog: &Catalog,
    table: Option<&str>,
    w: &mut dyn Write,
) -> Result<usize, ReliteError> {
    let path = db
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string());
    writeln!(w, "-- Source: {}", path)?;
    writeln!(w, "-- Exported: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(w, "PRAGMA foreign_keys = off;")?;
    writeln!(w, "BEGIN TRANSACTION;")?;
    writeln!(w)?;

    let mut rows_written = 0usize;
    for object in exported_tables(catalog, table) {
        writeln!(w, "{};", object.sql.trim_end().trim_end_matches(';'))?;
        rows_written += scan_rows(db, &object.name, |_, values| {
            writeln!(w, "{}", insert_statement(&object.name, values))?;
            Ok(())
        })?;
        writeln!(w)?;
    }

    for category in [
        ObjectCategory::Index,
        ObjectCategory::View,
        ObjectCategory::Trigger,
    ] {
        for object in catalog.objects(category) {
            if let Some(table) = table {
                if !Utils::lceq(&object.tbl_name, table) {
                    continue;
                }
            }
            writeln!(w, "{};", object.sql.trim_end().trim_end_matches(';'))?;
        }
    }

    writeln!(w)?;
    writeln!(w, "COMMIT;")?;
    writeln!(w, "PRAGMA foreign_keys = on;")?;
    Ok(rows_written)
}

pub(crate) fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Integer(i) => JsonValue::from(*i),
        Value::Real(r) => JsonValue::from(*r),
        Value::Text(t) => JsonValue::from(t.clone()),
        Value::Blob(b) => {
            let mut blob = JsonMap::new();
            blob.insert("$blob".to_string(), JsonValue::from(BASE64.encode(b)));
            JsonValue::Object(blob)
        }
    }
}

fn write_json(
    db: &Database,
    catalog: &Catalog,
    table: Option<&str>,
    w: &mut dyn Write,
) -> Result<usize, ReliteError> {
    let mut root = JsonMap::new();
    let mut rows_written = 0usize;
    for object in exported_tables(catalog, table) {
        let mut rows = Vec::new();
        rows_written += scan_rows(db, &object.name, |columns, values| {
            let mut row = JsonMap::new();
            for (column, value) in columns.iter().zip(values) {
                row.insert(column.clone(), value_to_json(value));
            }
            rows.push(JsonValue::Object(row));
            Ok(())
        })?;
        root.insert(object.name.clone(), JsonValue::Array(rows));
    }
    serde_json::to_writer_pretty(&mut *w, &JsonValue::Object(root))?;
    writeln!(w)?;
    Ok(rows_written)
}

/// Quotes a CSV field when it holds the delimiter, quotes, or line breaks.
pub(crate) fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub(crate) fn value_to_csv(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => csv_field(t),
        Value::Blob(b) => csv_field(&BASE64.encode(b)),
    }
}

fn write_csv(
    db: &Database,
    catalog: &Catalog,
    table: &str,
    w: &mut dyn Write,
) -> Result<usize, ReliteError> {
    let object = catalog
        .get(ObjectCategory::Table, table)
        .ok_or_else(|| ReliteError::Error(format!("No such table: {}", table)))?;
    let mut header_written = false;
    let rows_written = scan_rows(db, &object.name, |columns, values| {
        if !header_written {
            let header: Vec<String> = columns.iter().map(|c| csv_field(c)).collect();
            writeln!(w, "{}", header.join(","))?;
            header_written = true;
        }
        let fields: Vec<String> = values.iter().map(value_to_csv).collect();
        writeln!(w, "{}", fields.join(","))?;
        Ok(())
    })?;
    if !header_written {
        // Empty table: still emit the header row.
        let def = object
            .table_def()
            .ok_or_else(|| ReliteError::Error(format!("No such table: {}", table)))?;
        let header: Vec<String> = def.columns.iter().map(|c| csv_field(&c.name)).collect();
        writeln!(w, "{}", header.join(","))?;
    }
    Ok(rows_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "CREATE TABLE t (a INTEGER, b TEXT);
                 CREATE INDEX idx_t_a ON t (a);
                 INSERT INTO t VALUES (1, 'x');
                 INSERT INTO t VALUES (2, 'has, comma');",
            )
            .unwrap();
        db
    }

    #[test]
    fn test_write_sql_dump() {
        let db = seeded_db();
        let catalog = db.catalog().unwrap();
        let mut out = Vec::new();
        let rows = write_sql(&db, &catalog, None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(rows, 2);
        assert!(text.contains("CREATE TABLE t"));
        assert!(text.contains("INSERT INTO t VALUES (1, 'x');"));
        assert!(text.contains("CREATE INDEX idx_t_a"));
        assert!(text.starts_with("-- Source:"));
        assert!(text.contains("BEGIN TRANSACTION;"));
        assert!(text.trim_end().ends_with("PRAGMA foreign_keys = on;"));
    }

    #[test]
    fn test_write_json() {
        let db = seeded_db();
        let catalog = db.catalog().unwrap();
        let mut out = Vec::new();
        write_json(&db, &catalog, None, &mut out).unwrap();
        let value: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["t"][0]["a"], JsonValue::from(1));
        assert_eq!(value["t"][1]["b"], JsonValue::from("has, comma"));
    }

    #[test]
    fn test_write_csv_quotes_fields() {
        let db = seeded_db();
        let catalog = db.catalog().unwrap();
        let mut out = Vec::new();
        write_csv(&db, &catalog, "t", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "a,b");
        assert_eq!(lines[1], "1,x");
        assert_eq!(lines[2], "2,\"has, comma\"");
    }

    #[test]
    fn test_format_inference() {
        assert_eq!(
            ExportFormat::from_path(Path::new("out.json")),
            Some(ExportFormat::Json)
        );
        assert_eq!(
            ExportFormat::from_path(Path::new("out.sql")),
            Some(ExportFormat::Sql)
        );
        assert_eq!(ExportFormat::from_path(Path::new("out.bin")), None);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_blob_round_trips_as_base64() {
        let json = value_to_json(&Value::Blob(vec![1, 2, 3]));
        assert_eq!(json["$blob"], JsonValue::from("AQID"));
    }
}
