//! Renders alteration plans into the statement sequences that run against
//! the database. The rebuild sequence:
//!
//!  1. PRAGMA foreign_keys = off        (only if currently on)
//!  2. SAVEPOINT alter_table
//!  3. CREATE TABLE tempname
//!  4. INSERT INTO tempname (..) SELECT .. FROM oldname
//!  5. DROP dependent indexes, views, triggers (own and of affected tables)
//!  6. DROP TABLE oldname
//!  7. ALTER TABLE tempname RENAME TO newname
//!  8. per affected foreign-key neighbor: create temp copy, copy rows,
//!     drop, rename back, re-create its indexes and triggers
//!  9. re-create surviving indexes, views, triggers
//! 10. RELEASE SAVEPOINT alter_table
//! 11. PRAGMA foreign_keys = on         (only if it was on)

use crate::ddl::quote;

use super::plan::{RebuildPlan, Recreate};

const SAVEPOINT: &str = "alter_table";

pub fn rebuild_script(plan: &RebuildPlan) -> Vec<String> {
    let mut script = Vec::new();
    if plan.fks_on {
        script.push("PRAGMA foreign_keys = off".to_string());
    }
    script.push(format!("SAVEPOINT {}", SAVEPOINT));
    script.push(plan.create_sql.clone());

    if !plan.columns.is_empty() {
        let new_cols: Vec<String> = plan.columns.iter().map(|(_, c2)| quote(c2)).collect();
        let old_cols: Vec<String> = plan.columns.iter().map(|(c1, _)| quote(c1)).collect();
        script.push(format!(
            "INSERT INTO {} ({})\nSELECT {}\nFROM {}",
            quote(&plan.tempname),
            new_cols.join(", "),
            old_cols.join(", "),
            quote(&plan.name)
        ));
    }

    push_drops(&mut script, "INDEX", &plan.indexes);
    push_drops(&mut script, "VIEW", &plan.views);
    push_drops(&mut script, "TRIGGER", &plan.triggers);
    for rebuild in &plan.tables {
        push_drops(&mut script, "INDEX", &rebuild.indexes);
        push_drops(&mut script, "TRIGGER", &rebuild.triggers);
    }

    script.push(format!("DROP TABLE {}", quote(&plan.name)));
    script.push(format!(
        "ALTER TABLE {} RENAME TO {}",
        quote(&plan.tempname),
        quote(&plan.name2)
    ));

    for rebuild in &plan.tables {
        script.push(rebuild.create_sql.clone());
        script.push(format!(
            "INSERT INTO {} SELECT * FROM {}",
            quote(&rebuild.tempname),
            quote(&rebuild.name)
        ));
        script.push(format!("DROP TABLE {}", quote(&rebuild.name)));
        script.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&rebuild.tempname),
            quote(&rebuild.name)
        ));
        push_creates(&mut script, &rebuild.indexes);
        push_creates(&mut script, &rebuild.triggers);
    }

    push_creates(&mut script, &plan.indexes);
    push_creates(&mut script, &plan.views);
    push_creates(&mut script, &plan.triggers);

    script.push(format!("RELEASE SAVEPOINT {}", SAVEPOINT));
    if plan.fks_on {
        script.push("PRAGMA foreign_keys = on".to_string());
    }
    script
}

fn push_drops(script: &mut Vec<String>, kind: &str, entries: &[Recreate]) {
    for entry in entries {
        script.push(format!("DROP {} IF EXISTS {}", kind, quote(&entry.name)));
    }
}

fn push_creates(script: &mut Vec<String>, entries: &[Recreate]) {
    for entry in entries {
        if let Some(sql) = &entry.sql {
            script.push(sql.clone());
        }
    }
}

/// Native rename, savepoint-wrapped.
pub fn rename_table_script(old: &str, new: &str) -> Vec<String> {
    vec![
        format!("SAVEPOINT {}", SAVEPOINT),
        format!("ALTER TABLE {} RENAME TO {}", quote(old), quote(new)),
        format!("RELEASE SAVEPOINT {}", SAVEPOINT),
    ]
}

pub fn rename_column_script(table: &str, old: &str, new: &str) -> Vec<String> {
    vec![
        format!("SAVEPOINT {}", SAVEPOINT),
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote(table),
            quote(old),
            quote(new)
        ),
        format!("RELEASE SAVEPOINT {}", SAVEPOINT),
    ]
}

pub fn add_column_script(table: &str, column_sql: &str) -> Vec<String> {
    vec![
        format!("SAVEPOINT {}", SAVEPOINT),
        format!("ALTER TABLE {} ADD COLUMN {}", quote(table), column_sql),
        format!("RELEASE SAVEPOINT {}", SAVEPOINT),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal_plan() -> RebuildPlan {
        RebuildPlan {
            name: "t".to_string(),
            name2: "t".to_string(),
            tempname: "t_2".to_string(),
            create_sql: "CREATE TABLE t_2 (\n  a INTEGER\n)".to_string(),
            columns: vec![("a".to_string(), "a".to_string())],
            fks_on: false,
            tables: Vec::new(),
            indexes: vec![
                Recreate {
                    name: "idx_keep".to_string(),
                    sql: Some("CREATE INDEX idx_keep ON t (a)".to_string()),
                },
                Recreate {
                    name: "idx_gone".to_string(),
                    sql: None,
                },
            ],
            triggers: Vec::new(),
            views: Vec::new(),
            dropped: Vec::new(),
        }
    }

    #[test]
    fn test_rebuild_script_sequence() {
        let script = rebuild_script(&minimal_plan());
        assert_eq!(
            script,
            vec![
                "SAVEPOINT alter_table".to_string(),
                "CREATE TABLE t_2 (\n  a INTEGER\n)".to_string(),
                "INSERT INTO t_2 (a)\nSELECT a\nFROM t".to_string(),
                "DROP INDEX IF EXISTS idx_keep".to_string(),
                "DROP INDEX IF EXISTS idx_gone".to_string(),
                "DROP TABLE t".to_string(),
                "ALTER TABLE t_2 RENAME TO t".to_string(),
                "CREATE INDEX idx_keep ON t (a)".to_string(),
                "RELEASE SAVEPOINT alter_table".to_string(),
            ]
        );
    }

    #[test]
    fn test_rebuild_script_fk_pragma_only_when_on() {
        let mut plan = minimal_plan();
        plan.fks_on = true;
        let script = rebuild_script(&plan);
        assert_eq!(script.first().map(String::as_str), Some("PRAGMA foreign_keys = off"));
        assert_eq!(script.last().map(String::as_str), Some("PRAGMA foreign_keys = on"));

        plan.fks_on = false;
        let script = rebuild_script(&plan);
        assert!(!script.iter().any(|s| s.contains("foreign_keys")));
    }

    #[test]
    fn test_rename_scripts_quote_identifiers() {
        let script = rename_table_script("old table", "order");
        assert_eq!(
            script[1],
            "ALTER TABLE \"old table\" RENAME TO \"order\""
        );
        let script = rename_column_script("t", "from", "source");
        assert_eq!(script[1], "ALTER TABLE t RENAME COLUMN \"from\" TO source");
    }
}
