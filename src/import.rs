use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::info;
use rusqlite::types::Value;
use serde_json::Value as JsonValue;

use crate::config::Config;
use crate::database::Database;
use crate::ddl::ast::{ColumnDef, ObjectCategory, TableDef};
use crate::ddl::{generate, quote, ObjectDef};
use crate::error::ReliteError;
use crate::utils::Utils;

pub struct Import {}

impl Import {
    /// Loads rows from a JSON or CSV file into a database, creating target
    /// tables with TEXT columns when they do not exist yet.
    pub fn run(
        infile: &Path,
        db_path: &Path,
        table: Option<&str>,
        no_header: bool,
    ) -> Result<(), ReliteError> {
        let db = Database::create_or_open(db_path)?;
        let is_json = infile
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let total = if is_json {
            import_json(&db, infile, table)?
        } else {
            import_csv(&db, infile, table, no_header)?
        };

        info!(
            "Imported {} from {} into {}",
            Utils::plural("row", total),
            infile.display(),
            db_path.display()
        );
        println!(
            "Imported {} into {}.",
            Utils::plural("row", total),
            db_path.display()
        );
        Ok(())
    }
}

fn import_json(db: &Database, infile: &Path, table: Option<&str>) -> Result<usize, ReliteError> {
    let text = fs::read_to_string(infile)?;
    let root: JsonValue = serde_json::from_str(&text)?;

    let mut total = 0usize;
    match root {
        JsonValue::Object(tables) => {
            for (name, rows) in tables {
                let JsonValue::Array(rows) = rows else {
                    return Err(ReliteError::Error(format!(
                        "Expected an array of rows for table '{}'",
                        name
                    )));
                };
                total += insert_json_rows(db, &name, &rows)?;
            }
        }
        JsonValue::Array(rows) => {
            let table = table.ok_or_else(|| {
                ReliteError::Error(
                    "A top-level JSON array requires --table to name the target".to_string(),
                )
            })?;
            total += insert_json_rows(db, table, &rows)?;
        }
        _ => {
            return Err(ReliteError::Error(
                "Expected a JSON object of tables or an array of rows".to_string(),
            ))
        }
    }
    Ok(total)
}

fn insert_json_rows(db: &Database, table: &str, rows: &[JsonValue]) -> Result<usize, ReliteError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let JsonValue::Object(first) = &rows[0] else {
        return Err(ReliteError::Error(format!(
            "Expected row objects for table '{}'",
            table
        )));
    };
    let columns: Vec<String> = first.keys().cloned().collect();
    let types: Vec<&'static str> = columns
        .iter()
        .map(|c| infer_column_type(rows, c))
        .collect();
    ensure_table(db, table, &columns, &types)?;

    insert_batched(db, table, &columns, rows.len(), |i| {
        let JsonValue::Object(row) = &rows[i] else {
            return Err(ReliteError::Error(format!(
                "Row {} of table '{}' is not an object",
                i + 1,
                table
            )));
        };
        let values: Vec<Value> = columns
            .iter()
            .map(|c| json_to_value(row.get(c).unwrap_or(&JsonValue::Null)))
            .collect::<Result<_, _>>()?;
        Ok(values)
    })
}

fn import_csv(
    db: &Database,
    infile: &Path,
    table: Option<&str>,
    no_header: bool,
) -> Result<usize, ReliteError> {
    let table = table
        .map(|t| t.to_string())
        .or_else(|| {
            infile
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
        })
        .ok_or_else(|| ReliteError::Error("Cannot derive table name; use --table".to_string()))?;

    let text = fs::read_to_string(infile)?;
    let records = parse_csv(&text);
    if records.is_empty() {
        return Ok(0);
    }

    let (columns, data_start): (Vec<String>, usize) = if no_header {
        let width = records[0].len();
        let columns = (1..=width).map(|i| format!("c{}", i)).collect();
        (columns, 0usize)
    } else {
        (records[0].clone(), 1usize)
    };
    let types: Vec<&'static str> = columns.iter().map(|_| "TEXT").collect();
    ensure_table(db, &table, &columns, &types)?;

    let rows = &records[data_start..];
    insert_batched(db, &table, &columns, rows.len(), |i| {
        let mut values: Vec<Value> = rows[i]
            .iter()
            .map(|field| Value::Text(field.clone()))
            .collect();
        values.resize(columns.len(), Value::Null);
        Ok(values)
    })
}

/// Column type from the first non-null value; TEXT when in doubt.
fn infer_column_type(rows: &[JsonValue], column: &str) -> &'static str {
    for row in rows {
        let Some(value) = row.get(column) else { continue };
        match value {
            JsonValue::Null => continue,
            JsonValue::Bool(_) => return "INTEGER",
            JsonValue::Number(n) => {
                return if n.as_i64().is_some() { "INTEGER" } else { "REAL" }
            }
            JsonValue::Object(map) if map.contains_key("$blob") => return "BLOB",
            _ => return "TEXT",
        }
    }
    "TEXT"
}

/// Creates the table when missing.
fn ensure_table(
    db: &Database,
    table: &str,
    columns: &[String],
    types: &[&'static str],
) -> Result<(), ReliteError> {
    let catalog = db.catalog()?;
    if catalog.contains(ObjectCategory::Table, table) {
        return Ok(());
    }
    let def = TableDef {
        name: table.to_string(),
        columns: columns
            .iter()
            .zip(types)
            .map(|(name, col_type)| ColumnDef {
                name: name.clone(),
                col_type: Some((*col_type).to_string()),
                constraints: Vec::new(),
            })
            .collect(),
        ..TableDef::default()
    };
    db.execute_logged(&generate(&ObjectDef::Table(def)))?;
    info!("Created table '{}' with {} columns", table, columns.len());
    Ok(())
}

/// Runs INSERTs in batch-sized transactions; `row` produces the values for
/// each index.
fn insert_batched<F>(
    db: &Database,
    table: &str,
    columns: &[String],
    count: usize,
    mut row: F,
) -> Result<usize, ReliteError>
where
    F: FnMut(usize) -> Result<Vec<Value>, ReliteError>,
{
    let batch_size = Config::current().interchange.batch_size;
    let column_list: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        column_list.join(", "),
        placeholders.join(", ")
    );

    let mut inserted = 0usize;
    let mut index = 0usize;
    while index < count {
        db.conn().execute_batch("BEGIN")?;
        let end = (index + batch_size).min(count);
        let result: Result<(), ReliteError> = (|| {
            let mut stmt = db.conn().prepare(&sql)?;
            while index < end {
                let values = row(index)?;
                stmt.execute(rusqlite::params_from_iter(values.iter()))?;
                index += 1;
                inserted += 1;
            }
            Ok(())
        })();
        match result {
            Ok(()) => db.conn().execute_batch("COMMIT")?,
            Err(err) => {
                let _ = db.conn().execute_batch("ROLLBACK");
                return Err(err);
            }
        }
    }
    Ok(inserted)
}

fn json_to_value(value: &JsonValue) -> Result<Value, ReliteError> {
    Ok(match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Integer(*b as i64),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Object(map) => {
            if let Some(JsonValue::String(encoded)) = map.get("$blob") {
                let bytes = BASE64.decode(encoded).map_err(|e| {
                    ReliteError::Error(format!("Invalid base64 blob: {}", e))
                })?;
                Value::Blob(bytes)
            } else {
                Value::Text(value.to_string())
            }
        }
        JsonValue::Array(_) => Value::Text(value.to_string()),
    })
}

/// Minimal CSV reader: comma delimiter, double-quote quoting with `""`
/// escapes, quoted fields may span lines.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    let mut any = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                any = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                any = true;
            }
            '\r' => {}
            '\n' => {
                if any || !field.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                any = false;
            }
            _ => {
                field.push(c);
                any = true;
            }
        }
    }
    if any || !field.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_csv() {
        let records = parse_csv("a,b,c\n1,\"two, too\",3\n4,\"line\nbreak\",\"q\"\"q\"\n");
        assert_eq!(
            records,
            vec![
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                vec!["1".to_string(), "two, too".to_string(), "3".to_string()],
                vec!["4".to_string(), "line\nbreak".to_string(), "q\"q".to_string()],
            ]
        );
    }

    #[test]
    fn test_parse_csv_empty_fields() {
        let records = parse_csv("a,,c\n,,\n");
        assert_eq!(
            records,
            vec![
                vec!["a".to_string(), "".to_string(), "c".to_string()],
                vec!["".to_string(), "".to_string(), "".to_string()],
            ]
        );
    }

    #[test]
    fn test_import_csv_creates_table() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("people.csv");
        fs::write(&csv_path, "name,age\nada,36\ngrace,45\n").unwrap();
        let db_path = dir.path().join("out.db");

        Import::run(&csv_path, &db_path, None, false).unwrap();

        let db = Database::open(&db_path).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM people", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let name: String = db
            .conn()
            .query_row("SELECT name FROM people WHERE age = '45'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "grace");
    }

    #[test]
    fn test_import_json_object_of_tables() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("data.json");
        fs::write(
            &json_path,
            r#"{"pets": [{"name": "rex", "legs": 4}, {"name": "tweety", "legs": 2}]}"#,
        )
        .unwrap();
        let db_path = dir.path().join("out.db");

        Import::run(&json_path, &db_path, None, false).unwrap();

        let db = Database::open(&db_path).unwrap();
        let legs: i64 = db
            .conn()
            .query_row("SELECT legs FROM pets WHERE name = 'rex'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(legs, 4);
    }

    #[test]
    fn test_import_json_array_requires_table() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("rows.json");
        fs::write(&json_path, r#"[{"a": 1}]"#).unwrap();
        let db_path = dir.path().join("out.db");
        assert!(Import::run(&json_path, &db_path, None, false).is_err());
        assert!(Import::run(&json_path, &db_path, Some("things"), false).is_ok());
    }

    #[test]
    fn test_import_into_existing_table_types() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("typed.db");
        {
            let db = Database::create_or_open(&db_path).unwrap();
            db.conn()
                .execute_batch("CREATE TABLE nums (n INTEGER, label TEXT)")
                .unwrap();
        }
        let json_path = dir.path().join("nums.json");
        fs::write(&json_path, r#"{"nums": [{"n": 7, "label": "seven"}]}"#).unwrap();
        Import::run(&json_path, &db_path, None, false).unwrap();

        let db = Database::open(&db_path).unwrap();
        let n: i64 = db
            .conn()
            .query_row("SELECT n FROM nums", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 7);
    }
}
