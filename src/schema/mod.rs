mod related;

use std::collections::{BTreeSet, HashMap, HashSet};

use log::warn;
use rusqlite::Connection;

use crate::ddl::ast::ObjectCategory;
use crate::ddl::{parse_statement, ObjectDef};
use crate::error::ReliteError;

pub use related::Relation;

/// One row of sqlite_master, parsed when possible.
#[derive(Debug, Clone)]
pub struct SchemaObject {
    pub category: ObjectCategory,
    pub name: String,
    /// sqlite_master.tbl_name: the object itself for tables and views, the
    /// subject table for indexes and triggers.
    pub tbl_name: String,
    pub sql: String,
    /// None when the statement is outside the supported DDL subset
    /// (e.g. CREATE VIRTUAL TABLE). Such entries participate in name lookups
    /// but cannot be rewritten.
    pub def: Option<ObjectDef>,
    /// Lowercased names of relations this object references.
    pub tables: BTreeSet<String>,
}

impl SchemaObject {
    pub fn table_def(&self) -> Option<&crate::ddl::ast::TableDef> {
        match &self.def {
            Some(ObjectDef::Table(t)) => Some(t),
            _ => None,
        }
    }

    pub fn references(&self, name: &str) -> bool {
        self.tables.contains(&name.to_ascii_lowercase())
    }
}

/// In-memory snapshot of the database schema, keyed case-insensitively.
#[derive(Debug, Default)]
pub struct Catalog {
    objects: Vec<SchemaObject>,
    by_name: HashMap<(ObjectCategory, String), usize>,
}

impl Catalog {
    pub fn load(conn: &Connection) -> Result<Catalog, ReliteError> {
        let mut catalog = Catalog::default();

        let mut stmt = conn.prepare(
            "SELECT type, name, tbl_name, sql FROM sqlite_master
             WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        for row in rows {
            let (category, name, tbl_name, sql) = row?;
            let Ok(category) = category.parse::<ObjectCategory>() else {
                continue;
            };
            let def = match parse_statement(&sql) {
                Ok(def) => Some(def),
                Err(err) => {
                    warn!("Schema object '{}' kept unparsed: {}", name, err);
                    None
                }
            };
            catalog.insert(SchemaObject {
                category,
                name,
                tbl_name,
                sql,
                def,
                tables: BTreeSet::new(),
            });
        }

        catalog.resolve_references();
        Ok(catalog)
    }

    fn insert(&mut self, object: SchemaObject) {
        let key = (object.category, object.name.to_ascii_lowercase());
        self.by_name.insert(key, self.objects.len());
        self.objects.push(object);
    }

    /// Fills each object's referenced-relation set: direct references (FK
    /// targets, subject tables) plus token-stream identifiers that name an
    /// existing table or view.
    fn resolve_references(&mut self) {
        let relations: HashSet<String> = self
            .objects
            .iter()
            .filter(|o| {
                matches!(o.category, ObjectCategory::Table | ObjectCategory::View)
            })
            .map(|o| o.name.to_ascii_lowercase())
            .collect();

        for object in &mut self.objects {
            let Some(def) = &object.def else {
                // Fall back to the subject table sqlite_master records.
                if object.category == ObjectCategory::Index
                    || object.category == ObjectCategory::Trigger
                {
                    object.tables.insert(object.tbl_name.to_ascii_lowercase());
                }
                continue;
            };
            let mut tables = def.direct_table_refs();
            for candidate in def.ident_candidates() {
                if relations.contains(&candidate) {
                    tables.insert(candidate);
                }
            }
            tables.remove(&object.name.to_ascii_lowercase());
            object.tables = tables;
        }
    }

    pub fn get(&self, category: ObjectCategory, name: &str) -> Option<&SchemaObject> {
        let key = (category, name.to_ascii_lowercase());
        self.by_name.get(&key).map(|&i| &self.objects[i])
    }

    pub fn contains(&self, category: ObjectCategory, name: &str) -> bool {
        self.get(category, name).is_some()
    }

    pub fn objects(&self, category: ObjectCategory) -> impl Iterator<Item = &SchemaObject> {
        self.objects.iter().filter(move |o| o.category == category)
    }

    pub fn count(&self, category: ObjectCategory) -> usize {
        self.objects(category).count()
    }

    /// Every object name, lowercased, for collision-free temp names.
    pub fn all_names(&self) -> HashSet<String> {
        self.objects
            .iter()
            .map(|o| o.name.to_ascii_lowercase())
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn test_catalog(schema_sql: &str) -> Catalog {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(schema_sql).unwrap();
    Catalog::load(&conn).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = "
        CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
        CREATE TABLE invoices (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER REFERENCES customers(id)
        );
        CREATE INDEX idx_invoices_customer ON invoices (customer_id);
        CREATE VIEW customer_totals AS
            SELECT customers.name, count(invoices.id) AS n
            FROM customers JOIN invoices ON invoices.customer_id = customers.id
            GROUP BY customers.id;
        CREATE TRIGGER trg_invoice_touch AFTER INSERT ON invoices
        BEGIN
            UPDATE customers SET name = name WHERE id = new.customer_id;
        END;
    ";

    #[test]
    fn test_load_counts() {
        let catalog = test_catalog(SCHEMA);
        assert_eq!(catalog.count(ObjectCategory::Table), 2);
        assert_eq!(catalog.count(ObjectCategory::Index), 1);
        assert_eq!(catalog.count(ObjectCategory::View), 1);
        assert_eq!(catalog.count(ObjectCategory::Trigger), 1);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = test_catalog(SCHEMA);
        assert!(catalog.get(ObjectCategory::Table, "CUSTOMERS").is_some());
        assert!(catalog.get(ObjectCategory::Table, "nothere").is_none());
    }

    #[test]
    fn test_reference_resolution() {
        let catalog = test_catalog(SCHEMA);
        let invoices = catalog.get(ObjectCategory::Table, "invoices").unwrap();
        assert!(invoices.references("customers"));

        let view = catalog.get(ObjectCategory::View, "customer_totals").unwrap();
        assert!(view.references("customers"));
        assert!(view.references("invoices"));

        let trigger = catalog
            .get(ObjectCategory::Trigger, "trg_invoice_touch")
            .unwrap();
        assert!(trigger.references("invoices"));
        assert!(trigger.references("customers"));
    }
}
