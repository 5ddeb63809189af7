//! Builds the rebuild plan for a table change SQLite cannot express as a
//! native ALTER TABLE: which temporary names to use, which rows to copy,
//! and which dependent objects must be dropped, rewritten, and re-created.

use std::collections::HashSet;

use crate::database::Database;
use crate::ddl::ast::*;
use crate::ddl::generate;
use crate::ddl::rewrite::{rewrite_def, Renames};
use crate::error::ReliteError;
use crate::schema::{Catalog, SchemaObject};
use crate::utils::Utils;

/// A dependent object to drop and, when `sql` is present, re-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recreate {
    pub name: String,
    pub sql: Option<String>,
}

/// A foreign-key neighbor that must itself be rebuilt because its
/// constraints changed.
#[derive(Debug, Clone)]
pub struct RelatedRebuild {
    pub name: String,
    pub tempname: String,
    pub create_sql: String,
    pub indexes: Vec<Recreate>,
    pub triggers: Vec<Recreate>,
}

#[derive(Debug, Clone)]
pub struct RebuildPlan {
    /// Current table name.
    pub name: String,
    /// Final table name (same as `name` unless renaming).
    pub name2: String,
    /// Collision-free name the new table is created under.
    pub tempname: String,
    pub create_sql: String,
    /// Row copy map as (old column, new column) pairs.
    pub columns: Vec<(String, String)>,
    /// Whether PRAGMA foreign_keys was ON when the plan was built.
    pub fks_on: bool,
    pub tables: Vec<RelatedRebuild>,
    pub indexes: Vec<Recreate>,
    pub triggers: Vec<Recreate>,
    pub views: Vec<Recreate>,
    /// Dependents dropped without replacement (indexes and triggers that
    /// only covered dropped columns).
    pub dropped: Vec<(ObjectCategory, String)>,
}

pub fn build_rebuild_plan(
    db: &Database,
    catalog: &Catalog,
    old_def: &TableDef,
    new_def: &TableDef,
    renames: &Renames,
    drops: &[String],
) -> Result<RebuildPlan, ReliteError> {
    let name1 = old_def.name.clone();
    let name2 = new_def.name.clone();
    let drops_lc: Vec<String> = drops.iter().map(|d| d.to_ascii_lowercase()).collect();

    let mut new_def = new_def.clone();
    if !drops_lc.is_empty() {
        prune_own_constraints(&mut new_def, &drops_lc);
    }

    let mut allnames = catalog.all_names();
    let tempname = Utils::make_unique(&name2, &allnames);
    allnames.insert(tempname.to_ascii_lowercase());

    let mut temp_def = new_def.clone();
    temp_def.name = tempname.clone();
    let create_sql = generate(&ObjectDef::Table(temp_def));

    let mut columns = Vec::new();
    for old_col in &old_def.columns {
        if drops_lc.contains(&old_col.name.to_ascii_lowercase()) {
            continue;
        }
        let target = renames
            .column(&name1, &old_col.name)
            .unwrap_or(&old_col.name)
            .to_string();
        match new_def.column(&target) {
            // Generated columns cannot be INSERTed into.
            Some(new_col) if new_col.generated().is_none() => {
                columns.push((old_col.name.clone(), target));
            }
            _ => {}
        }
    }

    let mut plan = RebuildPlan {
        name: name1.clone(),
        name2,
        tempname,
        create_sql,
        columns,
        fks_on: db.foreign_keys_enabled()?,
        tables: Vec::new(),
        indexes: Vec::new(),
        triggers: Vec::new(),
        views: Vec::new(),
        dropped: Vec::new(),
    };

    let related = catalog.related(ObjectCategory::Table, &name1, None);
    let mut processed: HashSet<String> = HashSet::new();
    processed.insert(name1.to_ascii_lowercase());

    for category in [
        ObjectCategory::Table,
        ObjectCategory::Index,
        ObjectCategory::View,
        ObjectCategory::Trigger,
    ] {
        let Some(items) = related.get(&category) else {
            continue;
        };
        for relitem in items {
            if !processed.insert(relitem.name.to_ascii_lowercase()) {
                continue;
            }
            match category {
                ObjectCategory::Index => {
                    plan_index(&mut plan, relitem, renames, &drops_lc)?;
                }
                ObjectCategory::Trigger => {
                    plan_trigger(&mut plan, relitem, &name1, renames, &drops_lc)?;
                }
                ObjectCategory::View => {
                    plan_view(&mut plan, catalog, relitem, renames, &mut processed)?;
                }
                ObjectCategory::Table => {
                    plan_neighbor_table(
                        &mut plan,
                        catalog,
                        relitem,
                        &name1,
                        renames,
                        &drops_lc,
                        &mut allnames,
                        &mut processed,
                    )?;
                }
            }
        }
    }

    Ok(plan)
}

fn unparseable(object: &SchemaObject) -> ReliteError {
    ReliteError::Error(format!(
        "Cannot rewrite '{}': statement is outside the supported DDL subset",
        object.name
    ))
}

fn rewritten_def(object: &SchemaObject, renames: &Renames) -> Result<ObjectDef, ReliteError> {
    let Some(def) = &object.def else {
        return Err(unparseable(object));
    };
    let mut def = def.clone();
    rewrite_def(&mut def, renames);
    Ok(def)
}

fn plan_index(
    plan: &mut RebuildPlan,
    object: &SchemaObject,
    renames: &Renames,
    drops: &[String],
) -> Result<(), ReliteError> {
    let Some(ObjectDef::Index(index)) = &object.def else {
        // Untouched unparsed indexes can still be re-created verbatim.
        if renames.is_empty() && drops.is_empty() {
            plan.indexes.push(Recreate {
                name: object.name.clone(),
                sql: Some(object.sql.clone()),
            });
            return Ok(());
        }
        return Err(unparseable(object));
    };

    if !drops.is_empty() && index_touches(index, drops) {
        plan.dropped
            .push((ObjectCategory::Index, object.name.clone()));
        plan.indexes.push(Recreate {
            name: object.name.clone(),
            sql: None,
        });
        return Ok(());
    }

    let def = rewritten_def(object, renames)?;
    plan.indexes.push(Recreate {
        name: object.name.clone(),
        sql: Some(generate(&def)),
    });
    Ok(())
}

fn index_touches(index: &IndexDef, drops: &[String]) -> bool {
    drops.iter().any(|drop| {
        index.columns.iter().any(|c| c.expr.mentions_ident(drop))
            || index
                .where_expr
                .as_ref()
                .map(|w| w.mentions_ident(drop))
                .unwrap_or(false)
    })
}

fn plan_trigger(
    plan: &mut RebuildPlan,
    object: &SchemaObject,
    table: &str,
    renames: &Renames,
    drops: &[String],
) -> Result<(), ReliteError> {
    let Some(ObjectDef::Trigger(trigger)) = &object.def else {
        return Err(unparseable(object));
    };
    let is_own = Utils::lceq(&trigger.table, table);

    let mut trigger = trigger.clone();
    if is_own && !drops.is_empty() {
        if let TriggerEvent::Update { columns } = &mut trigger.event {
            if !columns.is_empty() {
                columns.retain(|c| !drops.contains(&c.to_ascii_lowercase()));
                if columns.is_empty() {
                    plan.dropped
                        .push((ObjectCategory::Trigger, object.name.clone()));
                    plan.triggers.push(Recreate {
                        name: object.name.clone(),
                        sql: None,
                    });
                    return Ok(());
                }
            }
        }
        if trigger_touches(&trigger, drops) {
            plan.dropped
                .push((ObjectCategory::Trigger, object.name.clone()));
            plan.triggers.push(Recreate {
                name: object.name.clone(),
                sql: None,
            });
            return Ok(());
        }
    }

    let original = ObjectDef::Trigger(trigger.clone());
    let mut def = ObjectDef::Trigger(trigger);
    rewrite_def(&mut def, renames);

    // Foreign triggers survive the rebuild untouched; only re-create them
    // when the rewrite changed their text.
    if !is_own && def == original {
        return Ok(());
    }
    plan.triggers.push(Recreate {
        name: object.name.clone(),
        sql: Some(generate(&def)),
    });
    Ok(())
}

/// Whether the trigger body or WHEN clause references a dropped column,
/// qualified through NEW/OLD or unqualified.
fn trigger_touches(trigger: &TriggerDef, drops: &[String]) -> bool {
    let streams = trigger.when.iter().chain(trigger.body.iter());
    for stream in streams {
        for drop in drops {
            if stream_mentions_column(stream, drop) {
                return true;
            }
        }
    }
    false
}

fn stream_mentions_column(stream: &TokenStream, column: &str) -> bool {
    let tokens = &stream.0;
    for (i, token) in tokens.iter().enumerate() {
        let Some(word) = token.ident() else { continue };
        if !Utils::lceq(word, column) {
            continue;
        }
        let after_dot = i >= 1 && tokens[i - 1] == Token::Dot;
        if !after_dot {
            return true;
        }
        let qualifier = if i >= 2 { tokens[i - 2].ident() } else { None };
        if let Some(q) = qualifier {
            if Utils::lceq(q, "new") || Utils::lceq(q, "old") {
                return true;
            }
        }
    }
    false
}

fn plan_view(
    plan: &mut RebuildPlan,
    catalog: &Catalog,
    object: &SchemaObject,
    renames: &Renames,
    processed: &mut HashSet<String>,
) -> Result<(), ReliteError> {
    // Views are always re-created: the table they select from is dropped
    // mid-script.
    let def = rewritten_def(object, renames)?;
    plan.views.push(Recreate {
        name: object.name.clone(),
        sql: Some(generate(&def)),
    });

    // INSTEAD OF triggers hang off the view and drop with it.
    let own = catalog.related(ObjectCategory::View, &object.name, Some(true));
    if let Some(triggers) = own.get(&ObjectCategory::Trigger) {
        for trigger in triggers {
            if !processed.insert(trigger.name.to_ascii_lowercase()) {
                continue;
            }
            let def = rewritten_def(trigger, renames)?;
            plan.triggers.push(Recreate {
                name: trigger.name.clone(),
                sql: Some(generate(&def)),
            });
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn plan_neighbor_table(
    plan: &mut RebuildPlan,
    catalog: &Catalog,
    object: &SchemaObject,
    table: &str,
    renames: &Renames,
    drops: &[String],
    allnames: &mut HashSet<String>,
    processed: &mut HashSet<String>,
) -> Result<(), ReliteError> {
    let Some(ObjectDef::Table(neighbor)) = &object.def else {
        return Err(unparseable(object));
    };

    let mut neighbor = neighbor.clone();
    let pruned = if drops.is_empty() {
        false
    } else {
        prune_neighbor_fks(&mut neighbor, table, drops)
    };

    let original = ObjectDef::Table(neighbor.clone());
    let mut def = ObjectDef::Table(neighbor);
    rewrite_def(&mut def, renames);

    if !pruned && def == original {
        // FK neighbor is unaffected; SQLite repoints its constraints when the
        // rebuilt table is renamed into place.
        return Ok(());
    }

    let ObjectDef::Table(mut new_neighbor) = def else {
        unreachable!("table definition stays a table through rewrite");
    };
    let final_name = new_neighbor.name.clone();
    let tempname = Utils::make_unique(&final_name, allnames);
    allnames.insert(tempname.to_ascii_lowercase());
    new_neighbor.name = tempname.clone();

    let mut rebuild = RelatedRebuild {
        name: final_name,
        tempname,
        create_sql: generate(&ObjectDef::Table(new_neighbor)),
        indexes: Vec::new(),
        triggers: Vec::new(),
    };

    // The neighbor's own indexes and triggers drop with it; views on the
    // neighbor are re-created at the end of the script.
    let own = catalog.related(ObjectCategory::Table, &object.name, Some(true));
    for (subcategory, subitems) in &own {
        for subitem in subitems {
            if !processed.insert(subitem.name.to_ascii_lowercase()) {
                continue;
            }
            let def = rewritten_def(subitem, renames)?;
            let recreate = Recreate {
                name: subitem.name.clone(),
                sql: Some(generate(&def)),
            };
            match subcategory {
                ObjectCategory::Index => rebuild.indexes.push(recreate),
                ObjectCategory::Trigger => rebuild.triggers.push(recreate),
                _ => {}
            }
        }
    }
    let others = catalog.related(ObjectCategory::Table, &object.name, Some(false));
    if let Some(views) = others.get(&ObjectCategory::View) {
        for view in views {
            if !processed.insert(view.name.to_ascii_lowercase()) {
                continue;
            }
            let def = rewritten_def(view, renames)?;
            plan.views.push(Recreate {
                name: view.name.clone(),
                sql: Some(generate(&def)),
            });
        }
    }

    plan.tables.push(rebuild);
    Ok(())
}

/// Removes dropped columns from the table's own PRIMARY KEY, UNIQUE, CHECK,
/// and FOREIGN KEY constraints; empty constraints are removed entirely.
fn prune_own_constraints(def: &mut TableDef, drops: &[String]) {
    let own_name = def.name.clone();
    def.constraints.retain_mut(|constraint| match constraint {
        TableConstraint::PrimaryKey { columns, .. }
        | TableConstraint::Unique { columns, .. } => {
            columns.retain(|c| match c.column_name() {
                Some(name) => !drops.contains(&name.to_ascii_lowercase()),
                None => true,
            });
            !columns.is_empty()
        }
        TableConstraint::Check { expr, .. } => {
            !drops.iter().any(|d| expr.mentions_ident(d))
        }
        TableConstraint::ForeignKey { columns, clause, .. } => {
            let self_referential = Utils::lceq(&clause.table, &own_name);
            let mut keep = Vec::new();
            for (i, col) in columns.iter().enumerate() {
                let local_dropped = drops.contains(&col.to_ascii_lowercase());
                let target_dropped = self_referential
                    && clause
                        .columns
                        .get(i)
                        .map(|t| drops.contains(&t.to_ascii_lowercase()))
                        .unwrap_or(false);
                keep.push(!local_dropped && !target_dropped);
            }
            let mut index = 0;
            columns.retain(|_| {
                let k = keep[index];
                index += 1;
                k
            });
            let mut index = 0;
            clause.columns.retain(|_| {
                let k = keep.get(index).copied().unwrap_or(true);
                index += 1;
                k
            });
            !columns.is_empty()
        }
    });

    // Pruning compound constraints can leave duplicates behind.
    let mut seen: Vec<TableConstraint> = Vec::new();
    def.constraints.retain(|c| {
        if seen.contains(c) {
            false
        } else {
            seen.push(c.clone());
            true
        }
    });
}

/// Removes foreign key references from a neighbor table that point at
/// dropped columns of `target`. Returns whether anything changed.
fn prune_neighbor_fks(def: &mut TableDef, target: &str, drops: &[String]) -> bool {
    let mut dirty = false;

    for col in &mut def.columns {
        let before = col.constraints.len();
        col.constraints.retain(|constraint| match constraint {
            ColumnConstraint::ForeignKey { clause, .. } => {
                let hits = Utils::lceq(&clause.table, target)
                    && clause
                        .columns
                        .iter()
                        .any(|c| drops.contains(&c.to_ascii_lowercase()));
                !hits
            }
            _ => true,
        });
        dirty |= col.constraints.len() != before;
    }

    let before = def.constraints.len();
    let mut changed_constraint = false;
    def.constraints.retain_mut(|constraint| {
        let TableConstraint::ForeignKey { columns, clause, .. } = constraint else {
            return true;
        };
        if !Utils::lceq(&clause.table, target) {
            return true;
        }
        let keep: Vec<bool> = clause
            .columns
            .iter()
            .map(|c| !drops.contains(&c.to_ascii_lowercase()))
            .collect();
        if keep.iter().all(|&k| k) {
            return true;
        }
        changed_constraint = true;
        let mut index = 0;
        columns.retain(|_| {
            let k = keep.get(index).copied().unwrap_or(true);
            index += 1;
            k
        });
        let mut index = 0;
        clause.columns.retain(|_| {
            let k = keep.get(index).copied().unwrap_or(true);
            index += 1;
            k
        });
        !columns.is_empty()
    });
    dirty |= def.constraints.len() != before || changed_constraint;

    dirty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::Catalog;

    fn setup(schema_sql: &str) -> (Database, Catalog) {
        Config::current();
        let db = Database::open_in_memory().unwrap();
        db.conn().execute_batch(schema_sql).unwrap();
        let catalog = db.catalog().unwrap();
        (db, catalog)
    }

    const SCHEMA: &str = "
        CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
        CREATE TABLE invoices (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER REFERENCES customers(id),
            total REAL
        );
        CREATE INDEX idx_customers_email ON customers (email);
        CREATE INDEX idx_customers_name ON customers (name);
        CREATE VIEW customer_names AS SELECT name FROM customers;
        CREATE TRIGGER trg_customers_mail AFTER UPDATE OF email ON customers
        BEGIN
            UPDATE customers SET name = name WHERE id = new.id;
        END;
    ";

    fn table_def(catalog: &Catalog, name: &str) -> TableDef {
        catalog
            .get(ObjectCategory::Table, name)
            .unwrap()
            .table_def()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_plan_drop_column_sweeps_dependents() {
        let (db, catalog) = setup(SCHEMA);
        let old = table_def(&catalog, "customers");
        let mut new = old.clone();
        new.columns.retain(|c| c.name != "email");

        let plan = build_rebuild_plan(
            &db,
            &catalog,
            &old,
            &new,
            &Renames::new(),
            &["email".to_string()],
        )
        .unwrap();

        // email index dropped without replacement, name index re-created.
        let email_idx = plan
            .indexes
            .iter()
            .find(|r| r.name == "idx_customers_email")
            .unwrap();
        assert!(email_idx.sql.is_none());
        let name_idx = plan
            .indexes
            .iter()
            .find(|r| r.name == "idx_customers_name")
            .unwrap();
        assert!(name_idx.sql.is_some());

        // UPDATE OF email trigger dropped without replacement.
        let trigger = plan
            .triggers
            .iter()
            .find(|r| r.name == "trg_customers_mail")
            .unwrap();
        assert!(trigger.sql.is_none());
        assert!(plan
            .dropped
            .contains(&(ObjectCategory::Trigger, "trg_customers_mail".to_string())));

        // View re-created, copy map excludes the dropped column.
        assert_eq!(plan.views.len(), 1);
        assert!(!plan.columns.iter().any(|(old, _)| old == "email"));
        assert!(plan.columns.iter().any(|(old, _)| old == "name"));
    }

    #[test]
    fn test_plan_rename_column_rewrites_dependents() {
        let (db, catalog) = setup(SCHEMA);
        let old = table_def(&catalog, "customers");
        let mut renames = Renames::new();
        renames.add_column("customers", "name", "full_name");
        let mut new = old.clone();
        rewrite_def_table(&mut new, &renames);

        let plan =
            build_rebuild_plan(&db, &catalog, &old, &new, &renames, &[]).unwrap();

        assert!(plan.columns.contains(&("name".to_string(), "full_name".to_string())));
        let name_idx = plan
            .indexes
            .iter()
            .find(|r| r.name == "idx_customers_name")
            .unwrap();
        assert!(name_idx.sql.as_deref().unwrap().contains("full_name"));
        let view = &plan.views[0];
        assert!(view.sql.as_deref().unwrap().contains("full_name"));
    }

    fn rewrite_def_table(def: &mut TableDef, renames: &Renames) {
        let mut wrapped = ObjectDef::Table(def.clone());
        rewrite_def(&mut wrapped, renames);
        if let ObjectDef::Table(t) = wrapped {
            *def = t;
        }
    }

    #[test]
    fn test_plan_tempname_avoids_collisions() {
        let (db, catalog) = setup(
            "CREATE TABLE t (a INTEGER);
             CREATE TABLE t_2 (b INTEGER);",
        );
        let old = table_def(&catalog, "t");
        let plan =
            build_rebuild_plan(&db, &catalog, &old, &old, &Renames::new(), &[]).unwrap();
        assert_eq!(plan.tempname, "t_3");
    }

    #[test]
    fn test_plan_drop_fk_target_rebuilds_neighbor() {
        let (db, catalog) = setup(SCHEMA);
        let old = table_def(&catalog, "customers");
        let mut new = old.clone();
        new.columns.retain(|c| c.name != "id");
        // Keep at least one column; drop the FK target column.
        let plan = build_rebuild_plan(
            &db,
            &catalog,
            &old,
            &new,
            &Renames::new(),
            &["id".to_string()],
        )
        .unwrap();

        assert_eq!(plan.tables.len(), 1);
        let rebuild = &plan.tables[0];
        assert_eq!(rebuild.name, "invoices");
        assert!(!rebuild.create_sql.to_lowercase().contains("references"));
    }
}
