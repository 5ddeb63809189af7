use std::io::{self, Stdout};
use std::path::Path;

use tablestream::{Column, Stream};

use crate::database::Database;
use crate::ddl::ast::ObjectCategory;
use crate::ddl::quote;
use crate::error::ReliteError;
use crate::schema::Catalog;
use crate::utils::Utils;

/// PRAGMAs reported by `stats`, in display order.
const PRAGMAS: [&str; 12] = [
    "application_id",
    "auto_vacuum",
    "cache_size",
    "encoding",
    "foreign_keys",
    "freelist_count",
    "journal_mode",
    "page_count",
    "page_size",
    "schema_version",
    "user_version",
    "wal_autocheckpoint",
];

#[derive(Clone)]
struct TableStatsRow {
    name: String,
    pk: String,
    columns: usize,
    rows: i64,
    indexes: usize,
    triggers: usize,
}

#[derive(Clone)]
struct PragmaRow {
    name: String,
    value: String,
}

pub struct Stats {}

impl Stats {
    pub fn run(db_path: &Path) -> Result<(), ReliteError> {
        let db = Database::open(db_path)?;
        let catalog = db.catalog()?;

        println!("Database: {}", db_path.display());
        println!("Size: {}", Utils::format_bytes(db.size()));
        println!("SQLite version: {}", rusqlite::version());
        let counts: Vec<String> = ObjectCategory::ALL
            .iter()
            .map(|&category| Utils::plural(&category.to_string(), catalog.count(category)))
            .collect();
        println!("Schema: {}", counts.join(", "));
        println!();

        Self::print_tables(&db, &catalog)?;
        println!();
        Self::print_pragmas(&db)?;
        Ok(())
    }

    fn begin_tables_stream() -> Stream<TableStatsRow, Stdout> {
        Stream::new(
            io::stdout(),
            vec![
                Column::new(|f, r: &TableStatsRow| write!(f, "{}", r.name)).header("Table"),
                Column::new(|f, r: &TableStatsRow| write!(f, "{}", r.pk)).header("Primary key"),
                Column::new(|f, r: &TableStatsRow| write!(f, "{}", r.columns))
                    .header("Columns")
                    .right(),
                Column::new(|f, r: &TableStatsRow| write!(f, "{}", r.rows))
                    .header("Rows")
                    .right(),
                Column::new(|f, r: &TableStatsRow| write!(f, "{}", r.indexes))
                    .header("Indexes")
                    .right(),
                Column::new(|f, r: &TableStatsRow| write!(f, "{}", r.triggers))
                    .header("Triggers")
                    .right(),
            ],
        )
        .empty_row("No tables")
    }

    fn print_tables(db: &Database, catalog: &Catalog) -> Result<(), ReliteError> {
        let mut stream = Self::begin_tables_stream();
        for object in catalog.objects(ObjectCategory::Table) {
            let rows: i64 = db.conn().query_row(
                &format!("SELECT count(*) FROM {}", quote(&object.name)),
                [],
                |r| r.get(0),
            )?;
            let columns = object
                .table_def()
                .map(|d| d.columns.len())
                .unwrap_or_default();
            let (pk_cols, _) = catalog.table_keys(&object.name);
            let own = catalog.related(ObjectCategory::Table, &object.name, Some(true));
            let indexes = own
                .get(&ObjectCategory::Index)
                .map(Vec::len)
                .unwrap_or_default();
            let triggers = own
                .get(&ObjectCategory::Trigger)
                .map(Vec::len)
                .unwrap_or_default();
            stream.row(TableStatsRow {
                name: object.name.clone(),
                pk: pk_cols.join(", "),
                columns,
                rows,
                indexes,
                triggers,
            })?;
        }
        stream.finish()?;
        Ok(())
    }

    fn print_pragmas(db: &Database) -> Result<(), ReliteError> {
        let mut stream = Stream::new(
            io::stdout(),
            vec![
                Column::new(|f, r: &PragmaRow| write!(f, "{}", r.name)).header("Pragma"),
                Column::new(|f, r: &PragmaRow| write!(f, "{}", r.value))
                    .header("Value")
                    .right(),
            ],
        );
        for pragma in PRAGMAS {
            if let Some(value) = db.pragma_text(pragma) {
                stream.row(PragmaRow {
                    name: pragma.to_string(),
                    value,
                })?;
            }
        }
        stream.finish()?;
        Ok(())
    }
}
