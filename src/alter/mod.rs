//! Table alteration operations.
//!
//! SQLite's native ALTER TABLE covers renames and simple column additions.
//! Everything else is emulated by rebuilding the table under a temporary
//! name: copy the rows, drop the original, rename the copy into place, and
//! re-create every dependent index, trigger, and view. The whole sequence
//! runs inside one savepoint and rolls back on any failure.

pub mod executor;
pub mod plan;
pub mod script;

use log::info;

use crate::database::Database;
use crate::ddl::ast::{ColumnDef, DefaultValue, ObjectCategory, TableDef};
use crate::ddl::rewrite::{rewrite_def, Renames};
use crate::ddl::{generator, parse_statement, ObjectDef};
use crate::error::ReliteError;
use crate::schema::Catalog;
use crate::utils::Utils;

pub use plan::{build_rebuild_plan, RebuildPlan, Recreate, RelatedRebuild};

pub struct Alter {}

impl Alter {
    /// Renames a table. Uses the native cascading rename when available;
    /// case-only renames always go through a rebuild because SQLite treats
    /// the old and new names as the same object.
    pub fn rename_table(
        db: &Database,
        old: &str,
        new: &str,
        dry_run: bool,
    ) -> Result<Vec<String>, ReliteError> {
        let catalog = db.catalog()?;
        let old_def = require_table(&catalog, old)?;
        if old_def.name == new {
            return Ok(Vec::new());
        }
        if !Utils::lceq(&old_def.name, new) && catalog.contains(ObjectCategory::Table, new) {
            return Err(ReliteError::Error(format!(
                "Table '{}' already exists",
                new
            )));
        }

        let case_only = Utils::lceq(&old_def.name, new);
        let (script, fks_on) = if !case_only && db.has_full_rename_table() {
            (script::rename_table_script(&old_def.name, new), false)
        } else {
            let mut renames = Renames::new();
            renames.add_table(&old_def.name, new);
            let mut new_def = old_def.clone();
            new_def.name = new.to_string();
            let plan = build_rebuild_plan(db, &catalog, &old_def, &new_def, &renames, &[])?;
            (script::rebuild_script(&plan), plan.fks_on)
        };

        if !dry_run {
            executor::execute(db, &script, fks_on)?;
            info!("Renamed table '{}' to '{}'", old_def.name, new);
        }
        Ok(script)
    }

    /// Renames a column, natively on SQLite >= 3.25.0, else via rebuild.
    pub fn rename_column(
        db: &Database,
        table: &str,
        old: &str,
        new: &str,
        dry_run: bool,
    ) -> Result<Vec<String>, ReliteError> {
        let catalog = db.catalog()?;
        let table_def = require_table(&catalog, table)?;
        require_column(&table_def, old)?;
        if table_def.column(new).is_some() && !Utils::lceq(old, new) {
            return Err(ReliteError::Error(format!(
                "Column '{}' already exists in table '{}'",
                new, table_def.name
            )));
        }

        let (script, fks_on) = if db.has_rename_column() {
            (
                script::rename_column_script(&table_def.name, old, new),
                false,
            )
        } else {
            let mut renames = Renames::new();
            renames.add_column(&table_def.name, old, new);
            let mut new_def = table_def.clone();
            rewrite_table_def(&mut new_def, &renames);
            let plan =
                build_rebuild_plan(db, &catalog, &table_def, &new_def, &renames, &[])?;
            (script::rebuild_script(&plan), plan.fks_on)
        };

        if !dry_run {
            executor::execute(db, &script, fks_on)?;
            info!(
                "Renamed column '{}.{}' to '{}'",
                table_def.name, old, new
            );
        }
        Ok(script)
    }

    /// Adds a column from a SQL definition fragment such as
    /// `"age INTEGER NOT NULL DEFAULT 0"`. In-place when SQLite's ADD COLUMN
    /// restrictions allow it, else via rebuild.
    pub fn add_column(
        db: &Database,
        table: &str,
        definition: &str,
        dry_run: bool,
    ) -> Result<Vec<String>, ReliteError> {
        let catalog = db.catalog()?;
        let table_def = require_table(&catalog, table)?;
        let column = parse_column_definition(definition)?;
        if table_def.column(&column.name).is_some() {
            return Err(ReliteError::Error(format!(
                "Column '{}' already exists in table '{}'",
                column.name, table_def.name
            )));
        }

        let (script, fks_on) = if addable_in_place(&column) {
            (
                script::add_column_script(&table_def.name, &generator::column_sql(&column)),
                false,
            )
        } else {
            let mut new_def = table_def.clone();
            new_def.columns.push(column.clone());
            let plan =
                build_rebuild_plan(db, &catalog, &table_def, &new_def, &Renames::new(), &[])?;
            (script::rebuild_script(&plan), plan.fks_on)
        };

        if !dry_run {
            executor::execute(db, &script, fks_on)?;
            info!("Added column '{}' to table '{}'", column.name, table_def.name);
        }
        Ok(script)
    }

    /// Drops a column via rebuild. Returns the script and the dependent
    /// objects that were dropped without replacement.
    pub fn drop_column(
        db: &Database,
        table: &str,
        column: &str,
        dry_run: bool,
    ) -> Result<(Vec<String>, Vec<(ObjectCategory, String)>), ReliteError> {
        let catalog = db.catalog()?;
        let table_def = require_table(&catalog, table)?;
        require_column(&table_def, column)?;
        if table_def.columns.len() < 2 {
            return Err(ReliteError::Error(format!(
                "Cannot drop the only column of table '{}'",
                table_def.name
            )));
        }

        let mut new_def = table_def.clone();
        new_def
            .columns
            .retain(|c| !Utils::lceq(&c.name, column));
        let plan = build_rebuild_plan(
            db,
            &catalog,
            &table_def,
            &new_def,
            &Renames::new(),
            &[column.to_string()],
        )?;
        let script = script::rebuild_script(&plan);

        if !dry_run {
            executor::execute(db, &script, plan.fks_on)?;
            info!("Dropped column '{}.{}'", table_def.name, column);
        }
        Ok((script, plan.dropped))
    }

    /// Reorders columns via rebuild; `order` must be a permutation of the
    /// existing column names.
    pub fn reorder_columns(
        db: &Database,
        table: &str,
        order: &[String],
        dry_run: bool,
    ) -> Result<Vec<String>, ReliteError> {
        let catalog = db.catalog()?;
        let table_def = require_table(&catalog, table)?;
        if order.len() != table_def.columns.len() {
            return Err(ReliteError::Error(format!(
                "Expected all {} columns of table '{}', got {}",
                table_def.columns.len(),
                table_def.name,
                order.len()
            )));
        }
        let mut new_columns = Vec::with_capacity(order.len());
        for name in order {
            let column = require_column(&table_def, name)?;
            if new_columns
                .iter()
                .any(|c: &ColumnDef| Utils::lceq(&c.name, name))
            {
                return Err(ReliteError::Error(format!(
                    "Column '{}' listed twice",
                    name
                )));
            }
            new_columns.push(column.clone());
        }

        let mut new_def = table_def.clone();
        new_def.columns = new_columns;
        let plan =
            build_rebuild_plan(db, &catalog, &table_def, &new_def, &Renames::new(), &[])?;
        let script = script::rebuild_script(&plan);

        if !dry_run {
            executor::execute(db, &script, plan.fks_on)?;
            info!("Reordered columns of table '{}'", table_def.name);
        }
        Ok(script)
    }

    /// General entry: replaces a table's definition wholesale. `renames`
    /// maps old to new column names; columns absent from `new_def` (after
    /// renames) are dropped.
    pub fn alter_table(
        db: &Database,
        table: &str,
        new_def: &TableDef,
        renames: &Renames,
        dry_run: bool,
    ) -> Result<Vec<String>, ReliteError> {
        let catalog = db.catalog()?;
        let table_def = require_table(&catalog, table)?;

        let mut drops = Vec::new();
        for col in &table_def.columns {
            let target = renames
                .column(&table_def.name, &col.name)
                .unwrap_or(&col.name);
            if new_def.column(target).is_none() {
                drops.push(col.name.clone());
            }
        }

        let plan = build_rebuild_plan(db, &catalog, &table_def, new_def, renames, &drops)?;
        let script = script::rebuild_script(&plan);
        if !dry_run {
            executor::execute(db, &script, plan.fks_on)?;
            info!("Rebuilt table '{}'", table_def.name);
        }
        Ok(script)
    }
}

fn require_table(catalog: &Catalog, name: &str) -> Result<TableDef, ReliteError> {
    let object = catalog
        .get(ObjectCategory::Table, name)
        .ok_or_else(|| ReliteError::Error(format!("No such table: {}", name)))?;
    object
        .table_def()
        .cloned()
        .ok_or_else(|| {
            ReliteError::Error(format!(
                "Table '{}' is outside the supported DDL subset",
                name
            ))
        })
}

fn require_column<'a>(def: &'a TableDef, name: &str) -> Result<&'a ColumnDef, ReliteError> {
    def.column(name).ok_or_else(|| {
        ReliteError::Error(format!(
            "No such column: {}.{}",
            def.name, name
        ))
    })
}

fn rewrite_table_def(def: &mut TableDef, renames: &Renames) {
    let mut wrapped = ObjectDef::Table(def.clone());
    rewrite_def(&mut wrapped, renames);
    if let ObjectDef::Table(t) = wrapped {
        *def = t;
    }
}

/// Parses a bare column definition by wrapping it in a throwaway CREATE.
fn parse_column_definition(definition: &str) -> Result<ColumnDef, ReliteError> {
    let sql = format!("CREATE TABLE c ({})", definition);
    let def = parse_statement(&sql).map_err(|_| {
        ReliteError::Error(format!("Invalid column definition: {}", definition))
    })?;
    match def {
        ObjectDef::Table(t) if t.columns.len() == 1 && t.constraints.is_empty() => {
            Ok(t.columns.into_iter().next().unwrap())
        }
        _ => Err(ReliteError::Error(format!(
            "Expected a single column definition, got: {}",
            definition
        ))),
    }
}

/// SQLite's ADD COLUMN restrictions: no PRIMARY KEY or UNIQUE, NOT NULL only
/// with a non-NULL default, no expression or CURRENT_* defaults, no STORED
/// generated columns.
fn addable_in_place(column: &ColumnDef) -> bool {
    if column.is_primary_key() || column.is_unique() {
        return false;
    }
    if let Some((_, storage)) = column.generated() {
        if storage == Some(crate::ddl::ast::GeneratedStorage::Stored) {
            return false;
        }
    }
    match column.default_value() {
        Some(DefaultValue::Expr(_)) => return false,
        Some(DefaultValue::Literal(lit)) => {
            let lit = lit.to_ascii_lowercase();
            if lit == "current_time" || lit == "current_date" || lit == "current_timestamp" {
                return false;
            }
            if column.is_not_null() && lit == "null" {
                return false;
            }
        }
        Some(_) => {}
        None => {
            if column.is_not_null() {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = "
        CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
        CREATE TABLE invoices (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER REFERENCES customers(id),
            total REAL
        );
        CREATE INDEX idx_customers_email ON customers (email);
        CREATE VIEW customer_names AS SELECT name FROM customers;
        CREATE TRIGGER trg_customers_touch AFTER UPDATE OF name ON customers
        BEGIN
            UPDATE invoices SET total = total WHERE customer_id = new.id;
        END;
        INSERT INTO customers VALUES (1, 'ada', 'ada@example.com');
        INSERT INTO customers VALUES (2, 'grace', 'grace@example.com');
        INSERT INTO invoices VALUES (10, 1, 12.5);
    ";

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.conn().execute_batch(SCHEMA).unwrap();
        db
    }

    fn master_sql(db: &Database, name: &str) -> Option<String> {
        db.conn()
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name = ?1",
                [name],
                |r| r.get(0),
            )
            .ok()
    }

    #[test]
    fn test_drop_column_preserves_data_and_dependents() {
        let db = setup();
        let (_, dropped) = Alter::drop_column(&db, "customers", "email", false).unwrap();

        assert_eq!(
            dropped,
            vec![(ObjectCategory::Index, "idx_customers_email".to_string())]
        );

        let sql = master_sql(&db, "customers").unwrap();
        assert!(!sql.to_lowercase().contains("email"), "{}", sql);

        let names: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM customers ORDER BY id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(names, vec!["ada".to_string(), "grace".to_string()]);

        // The email index is gone; view and trigger survive.
        assert!(master_sql(&db, "idx_customers_email").is_none());
        assert!(master_sql(&db, "customer_names").is_some());
        assert!(master_sql(&db, "trg_customers_touch").is_some());

        // Trigger still fires after the rebuild.
        db.conn()
            .execute("UPDATE customers SET name = 'ada l.' WHERE id = 1", [])
            .unwrap();
    }

    #[test]
    fn test_reorder_columns_keeps_rows() {
        let db = setup();
        Alter::reorder_columns(
            &db,
            "customers",
            &[
                "email".to_string(),
                "name".to_string(),
                "id".to_string(),
            ],
            false,
        )
        .unwrap();

        let first_col: String = db
            .conn()
            .query_row("SELECT name FROM pragma_table_info('customers') WHERE cid = 0", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(first_col, "email");

        let email: String = db
            .conn()
            .query_row("SELECT email FROM customers WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(email, "ada@example.com");
    }

    #[test]
    fn test_rename_table_native() {
        let db = setup();
        Alter::rename_table(&db, "invoices", "bills", false).unwrap();
        assert!(master_sql(&db, "bills").is_some());
        assert!(master_sql(&db, "invoices").is_none());
    }

    #[test]
    fn test_rename_table_case_only_goes_through_rebuild() {
        let db = setup();
        let script = Alter::rename_table(&db, "customers", "Customers", false).unwrap();
        assert!(script.iter().any(|s| s.starts_with("SAVEPOINT")));
        assert!(script.iter().any(|s| s.contains("DROP TABLE")));

        let name: String = db
            .conn()
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'Customers'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(name, "Customers");

        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM Customers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_rename_column_native() {
        let db = setup();
        Alter::rename_column(&db, "customers", "name", "full_name", false).unwrap();
        let sql = master_sql(&db, "customers").unwrap();
        assert!(sql.contains("full_name"), "{}", sql);
    }

    #[test]
    fn test_add_column_in_place_and_rebuild() {
        let db = setup();

        // In-place addition.
        let script =
            Alter::add_column(&db, "customers", "age INTEGER DEFAULT 0", false).unwrap();
        assert!(script.iter().any(|s| s.contains("ADD COLUMN")));
        let age: i64 = db
            .conn()
            .query_row("SELECT age FROM customers WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(age, 0);

        // UNIQUE columns cannot be added in place: rebuild.
        let script =
            Alter::add_column(&db, "customers", "code TEXT UNIQUE", false).unwrap();
        assert!(!script.iter().any(|s| s.contains("ADD COLUMN")));
        assert!(script.iter().any(|s| s.contains("DROP TABLE")));
        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM customers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_failed_rebuild_leaves_schema_and_rows_intact() {
        let db = setup();
        db.conn()
            .execute("INSERT INTO customers VALUES (3, NULL, NULL)", [])
            .unwrap();
        let before = master_sql(&db, "customers").unwrap();

        // NOT NULL over existing NULLs: the row copy must fail and roll back.
        let mut new_def = db
            .catalog()
            .unwrap()
            .get(ObjectCategory::Table, "customers")
            .unwrap()
            .table_def()
            .unwrap()
            .clone();
        for col in &mut new_def.columns {
            if col.name == "name" {
                col.constraints.push(
                    crate::ddl::ast::ColumnConstraint::NotNull {
                        name: None,
                        conflict: None,
                    },
                );
            }
        }
        let result = Alter::alter_table(&db, "customers", &new_def, &Renames::new(), false);
        assert!(result.is_err());

        assert_eq!(master_sql(&db, "customers").unwrap(), before);
        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM customers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
        assert!(master_sql(&db, "customer_names").is_some());
    }

    #[test]
    fn test_dry_run_leaves_database_untouched() {
        let db = setup();
        let script = Alter::drop_column(&db, "customers", "email", true).unwrap().0;
        assert!(!script.is_empty());
        let sql = master_sql(&db, "customers").unwrap();
        assert!(sql.contains("email"));
    }

    #[test]
    fn test_errors() {
        let db = setup();
        assert!(Alter::rename_table(&db, "nope", "x", false).is_err());
        assert!(Alter::rename_column(&db, "customers", "nope", "x", false).is_err());
        assert!(Alter::drop_column(&db, "customers", "nope", false).is_err());
        assert!(Alter::add_column(&db, "customers", "name TEXT", false).is_err());
        assert!(Alter::rename_table(&db, "customers", "invoices", false).is_err());
    }
}
