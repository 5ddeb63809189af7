//! Relations between schema objects: ownership (a table's own indexes and
//! triggers) and indirect association (objects referencing each other in
//! bodies or through foreign keys).

use std::collections::BTreeMap;

use crate::ddl::ast::{ColumnConstraint, ObjectCategory, TableConstraint};
use crate::utils::Utils;

use super::{Catalog, SchemaObject};

/// Which categories can relate to an object of a given category.
fn subcategories(category: ObjectCategory) -> &'static [ObjectCategory] {
    match category {
        ObjectCategory::Table => &[
            ObjectCategory::Table,
            ObjectCategory::Index,
            ObjectCategory::View,
            ObjectCategory::Trigger,
        ],
        ObjectCategory::Index => &[ObjectCategory::Table],
        ObjectCategory::Trigger => &[ObjectCategory::Table, ObjectCategory::View],
        ObjectCategory::View => &[
            ObjectCategory::Table,
            ObjectCategory::View,
            ObjectCategory::Trigger,
        ],
    }
}

fn subject_of(object: &SchemaObject) -> Option<&str> {
    match object.category {
        ObjectCategory::Index | ObjectCategory::Trigger => object
            .def
            .as_ref()
            .and_then(|d| d.subject_table())
            .or(Some(object.tbl_name.as_str())),
        _ => None,
    }
}

/// A foreign key edge: local columns pointing at a foreign table's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub columns: Vec<String>,
    pub table: String,
    pub key: Vec<String>,
}

impl Catalog {
    /// Objects related to `name` in any way, grouped by category.
    ///
    /// `own` filters the relation kind: `Some(true)` keeps only direct
    /// ownership (a table's own indexes/triggers, a trigger's subject),
    /// `Some(false)` only indirect association (objects whose bodies or
    /// foreign keys reach the name), `None` both.
    pub fn related(
        &self,
        category: ObjectCategory,
        name: &str,
        own: Option<bool>,
    ) -> BTreeMap<ObjectCategory, Vec<&SchemaObject>> {
        let mut result: BTreeMap<ObjectCategory, Vec<&SchemaObject>> = BTreeMap::new();
        let Some(item) = self.get(category, name) else {
            return result;
        };

        for &subcategory in subcategories(category) {
            for subitem in self.objects(subcategory) {
                if subitem.category == category && Utils::lceq(&subitem.name, name) {
                    continue;
                }
                let is_own = subject_of(subitem)
                    .map(|t| Utils::lceq(t, name))
                    .unwrap_or(false)
                    || subject_of(item)
                        .map(|t| Utils::lceq(t, &subitem.name))
                        .unwrap_or(false);
                let is_rel_from = subitem.references(name)
                    || (subcategory == ObjectCategory::Trigger && is_own);
                let is_rel_to = item.references(&subitem.name)
                    || (category == ObjectCategory::Trigger && is_own);
                if !is_rel_from && !is_rel_to {
                    continue;
                }
                if let Some(own_filter) = own {
                    if own_filter != is_own {
                        continue;
                    }
                }
                result.entry(subcategory).or_default().push(subitem);
            }
        }
        result
    }

    /// Local keys (primary key columns plus columns other tables' foreign
    /// keys point at) and the table's own foreign keys.
    pub fn table_keys(&self, table: &str) -> (Vec<String>, Vec<Relation>) {
        let Some(def) = self
            .get(ObjectCategory::Table, table)
            .and_then(SchemaObject::table_def)
        else {
            return (Vec::new(), Vec::new());
        };

        let mut local: Vec<String> = def
            .columns
            .iter()
            .filter(|c| c.is_primary_key())
            .map(|c| c.name.clone())
            .collect();
        for constraint in &def.constraints {
            if let TableConstraint::PrimaryKey { columns, .. } = constraint {
                for col in columns {
                    if let Some(name) = col.column_name() {
                        if !local.iter().any(|n| Utils::lceq(n, name)) {
                            local.push(name.to_string());
                        }
                    }
                }
            }
        }
        for other in self.objects(ObjectCategory::Table) {
            if Utils::lceq(&other.name, table) {
                continue;
            }
            let Some(other_def) = other.table_def() else {
                continue;
            };
            for fk in table_fks(other_def) {
                if Utils::lceq(&fk.table, table) {
                    for key_col in fk.key {
                        if !local.iter().any(|n| Utils::lceq(n, &key_col)) {
                            local.push(key_col);
                        }
                    }
                }
            }
        }

        (local, table_fks(def))
    }
}

fn table_fks(def: &crate::ddl::ast::TableDef) -> Vec<Relation> {
    let mut out = Vec::new();
    for col in &def.columns {
        for constraint in &col.constraints {
            if let ColumnConstraint::ForeignKey { clause, .. } = constraint {
                out.push(Relation {
                    columns: vec![col.name.clone()],
                    table: clause.table.clone(),
                    key: clause.columns.clone(),
                });
            }
        }
    }
    for constraint in &def.constraints {
        if let TableConstraint::ForeignKey {
            columns, clause, ..
        } = constraint
        {
            out.push(Relation {
                columns: columns.clone(),
                table: clause.table.clone(),
                key: clause.columns.clone(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::test_catalog;
    use super::*;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = "
        CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
        CREATE TABLE invoices (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER REFERENCES customers(id)
        );
        CREATE INDEX idx_customers_name ON customers (name);
        CREATE VIEW big_customers AS SELECT * FROM customers WHERE id > 100;
        CREATE TRIGGER trg_customer_rename AFTER UPDATE OF name ON customers
        BEGIN
            UPDATE invoices SET id = id WHERE customer_id = new.id;
        END;
    ";

    #[test]
    fn test_related_own() {
        let catalog = test_catalog(SCHEMA);
        let own = catalog.related(ObjectCategory::Table, "customers", Some(true));
        let index_names: Vec<&str> = own
            .get(&ObjectCategory::Index)
            .map(|v| v.iter().map(|o| o.name.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(index_names, vec!["idx_customers_name"]);
        let trigger_names: Vec<&str> = own
            .get(&ObjectCategory::Trigger)
            .map(|v| v.iter().map(|o| o.name.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(trigger_names, vec!["trg_customer_rename"]);
        assert!(own.get(&ObjectCategory::View).is_none());
    }

    #[test]
    fn test_related_indirect() {
        let catalog = test_catalog(SCHEMA);
        let indirect = catalog.related(ObjectCategory::Table, "customers", Some(false));
        let table_names: Vec<&str> = indirect
            .get(&ObjectCategory::Table)
            .map(|v| v.iter().map(|o| o.name.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(table_names, vec!["invoices"]);
        let view_names: Vec<&str> = indirect
            .get(&ObjectCategory::View)
            .map(|v| v.iter().map(|o| o.name.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(view_names, vec!["big_customers"]);
    }

    #[test]
    fn test_related_all_includes_both() {
        let catalog = test_catalog(SCHEMA);
        let all = catalog.related(ObjectCategory::Table, "customers", None);
        assert!(all.get(&ObjectCategory::Index).is_some());
        assert!(all.get(&ObjectCategory::View).is_some());
        assert!(all.get(&ObjectCategory::Table).is_some());
    }

    #[test]
    fn test_table_keys() {
        let catalog = test_catalog(SCHEMA);
        let (local, fks) = catalog.table_keys("customers");
        assert_eq!(local, vec!["id".to_string()]);
        assert!(fks.is_empty());

        let (local, fks) = catalog.table_keys("invoices");
        assert_eq!(local, vec!["id".to_string()]);
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].table, "customers");
        assert_eq!(fks[0].columns, vec!["customer_id".to_string()]);
    }
}
