use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct Utils {}

impl Utils {
    /// Case-insensitive equality, the comparison SQLite applies to identifiers.
    pub fn lceq(a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }

    /// Returns `base` if unused, else `base_2`, `base_3`, .. The returned
    /// name is not in `taken` (compared case-insensitively).
    pub fn make_unique(base: &str, taken: &HashSet<String>) -> String {
        let contains = |name: &str| taken.contains(&name.to_ascii_lowercase());
        if !contains(base) {
            return base.to_string();
        }
        let mut counter = 2u32;
        loop {
            let candidate = format!("{}_{}", base, counter);
            if !contains(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Returns `path` if it does not exist, else inserts a counter before
    /// the extension: "out.sql" -> "out (1).sql".
    pub fn unique_path(path: &Path) -> PathBuf {
        if !path.exists() {
            return path.to_path_buf();
        }
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let ext = path.extension().map(|s| s.to_string_lossy().to_string());
        let mut counter = 1u32;
        loop {
            let name = match &ext {
                Some(ext) => format!("{} ({}).{}", stem, counter, ext),
                None => format!("{} ({})", stem, counter),
            };
            let candidate = path.with_file_name(name);
            if !candidate.exists() {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Matches `text` against a pattern where '*' matches any run of
    /// characters. The pattern is a substring match unless anchored by the
    /// caller with leading/trailing content.
    pub fn wildcard_match(text: &str, pattern: &str, case_sensitive: bool) -> bool {
        let (text, pattern) = if case_sensitive {
            (text.to_string(), pattern.to_string())
        } else {
            (text.to_lowercase(), pattern.to_lowercase())
        };
        let mut pos = 0usize;
        for part in pattern.split('*') {
            if part.is_empty() {
                continue;
            }
            match text[pos..].find(part) {
                Some(found) => pos = pos + found + part.len(),
                None => return false,
            }
        }
        true
    }

    pub fn format_bytes(size: u64) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
        let mut value = size as f64;
        let mut unit = 0usize;
        while value >= 1024.0 && unit + 1 < UNITS.len() {
            value /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} {}", size, UNITS[unit])
        } else {
            format!("{:.1} {}", value, UNITS[unit])
        }
    }

    /// Renders a rusqlite value as a SQL literal for dump output.
    pub fn sql_literal(value: &rusqlite::types::Value) -> String {
        use rusqlite::types::Value;
        match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => {
                if r.fract() == 0.0 && r.is_finite() {
                    format!("{:.1}", r)
                } else {
                    r.to_string()
                }
            }
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Blob(b) => {
                let mut hex = String::with_capacity(b.len() * 2 + 3);
                hex.push_str("X'");
                for byte in b {
                    hex.push_str(&format!("{:02X}", byte));
                }
                hex.push('\'');
                hex
            }
        }
    }

    pub fn plural(word: &str, count: usize) -> String {
        if count == 1 {
            format!("{} {}", count, word)
        } else if word.ends_with('x') {
            format!("{} {}es", count, word)
        } else {
            format!("{} {}s", count, word)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_make_unique_appends_counter() {
        let mut taken = HashSet::new();
        taken.insert("orders".to_string());
        taken.insert("orders_2".to_string());
        assert_eq!(Utils::make_unique("orders", &taken), "orders_3");
        assert_eq!(Utils::make_unique("invoices", &taken), "invoices");
    }

    #[test]
    fn test_make_unique_is_case_insensitive() {
        let mut taken = HashSet::new();
        taken.insert("orders".to_string());
        assert_eq!(Utils::make_unique("Orders", &taken), "Orders_2");
    }

    #[test]
    fn test_wildcard_match() {
        assert!(Utils::wildcard_match("CREATE TABLE foo", "create*foo", false));
        assert!(!Utils::wildcard_match("CREATE TABLE foo", "create*bar", false));
        assert!(Utils::wildcard_match("abc", "abc", true));
        assert!(!Utils::wildcard_match("abc", "ABC", true));
        assert!(Utils::wildcard_match("abc", "ABC", false));
    }

    #[test]
    fn test_sql_literal() {
        use rusqlite::types::Value;
        assert_eq!(Utils::sql_literal(&Value::Null), "NULL");
        assert_eq!(Utils::sql_literal(&Value::Integer(42)), "42");
        assert_eq!(Utils::sql_literal(&Value::Text("it's".into())), "'it''s'");
        assert_eq!(Utils::sql_literal(&Value::Blob(vec![0xab, 0x01])), "X'AB01'");
    }

    #[test]
    fn test_plural() {
        assert_eq!(Utils::plural("table", 1), "1 table");
        assert_eq!(Utils::plural("table", 3), "3 tables");
        assert_eq!(Utils::plural("index", 2), "2 indexes");
    }
}
