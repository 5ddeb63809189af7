//! Search query model: free terms matched against text, keyword filters
//! matched against entity names and dates, and SQL LIKE predicate
//! generation for data searches.

use chrono::NaiveDate;
use pest::iterators::Pair;
use pest::Parser;
use strum::{Display, EnumString};

use crate::error::ReliteError;
use crate::search::{Rule, SearchParser};
use crate::utils::Utils;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// Bare word; `*` is a wildcard.
    Word(String),
    /// Quoted literal phrase.
    Phrase(String),
    /// Either-or alternation.
    Or(Vec<Term>),
    Not(Box<Term>),
    /// Parenthesized conjunction.
    Group(Vec<Term>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum KeywordKind {
    Table,
    View,
    Index,
    Trigger,
    Column,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub negated: bool,
    pub kind: KeywordKind,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub terms: Vec<Term>,
    pub keywords: Vec<Keyword>,
}

impl SearchQuery {
    pub fn parse(input: &str) -> Result<SearchQuery, ReliteError> {
        let input = input.trim();
        let mut query = SearchQuery::default();
        if input.is_empty() {
            return Ok(query);
        }
        let mut pairs = SearchParser::parse(Rule::query, input).map_err(Box::new)?;
        let root = pairs
            .next()
            .ok_or_else(|| ReliteError::Error("empty search query".into()))?;
        for element in root.into_inner() {
            if element.as_rule() == Rule::element {
                if let Some(term) = build_element(element, &mut query.keywords) {
                    query.terms.push(term);
                }
            }
        }
        Ok(query)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.keywords.is_empty()
    }

    /// Whether all free terms match the text.
    pub fn match_text(&self, text: &str, case_sensitive: bool) -> bool {
        self.terms
            .iter()
            .all(|t| term_matches(t, text, case_sensitive))
    }

    /// Applies keyword filters of one kind to candidate values.
    ///
    /// Returns None when the query holds no keywords of this kind,
    /// Some(false) when a negated keyword matches or no positive keyword
    /// does, Some(true) otherwise.
    pub fn match_keywords(
        &self,
        kind: KeywordKind,
        values: &[&str],
        case_sensitive: bool,
    ) -> Option<bool> {
        let of_kind: Vec<&Keyword> =
            self.keywords.iter().filter(|k| k.kind == kind).collect();
        if of_kind.is_empty() {
            return None;
        }
        let matches = |keyword: &Keyword| {
            values
                .iter()
                .any(|v| Utils::wildcard_match(v, &keyword.value, case_sensitive))
        };
        for keyword in of_kind.iter().filter(|k| k.negated) {
            if matches(keyword) {
                return Some(false);
            }
        }
        let positives: Vec<&&Keyword> = of_kind.iter().filter(|k| !k.negated).collect();
        if !positives.is_empty() && !positives.iter().any(|k| matches(k)) {
            return Some(false);
        }
        Some(true)
    }

    pub fn keywords_of(&self, kind: KeywordKind) -> Vec<&Keyword> {
        self.keywords.iter().filter(|k| k.kind == kind).collect()
    }

    /// Builds a WHERE predicate matching the free terms against the given
    /// columns with LIKE, `\`-escaped. Returns the clause and its params.
    pub fn like_predicate(&self, columns: &[String]) -> (String, Vec<String>) {
        if self.terms.is_empty() || columns.is_empty() {
            return ("1".to_string(), Vec::new());
        }
        let mut params = Vec::new();
        let clauses: Vec<String> = self
            .terms
            .iter()
            .map(|t| term_sql(t, columns, &mut params))
            .collect();
        (clauses.join(" AND "), params)
    }

    /// Half-open date ranges from `date:` keywords, as
    /// (negated, start inclusive, end exclusive).
    pub fn date_ranges(&self) -> Result<Vec<(bool, NaiveDate, NaiveDate)>, ReliteError> {
        let mut out = Vec::new();
        for keyword in self.keywords_of(KeywordKind::Date) {
            let value = &keyword.value;
            let (start, end) = if let Some((left, right)) = value.split_once("..") {
                let start = if left.is_empty() {
                    NaiveDate::from_ymd_opt(1, 1, 1).unwrap()
                } else {
                    parse_date_bound(left)?.0
                };
                let end = if right.is_empty() {
                    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap()
                } else {
                    parse_date_bound(right)?.1
                };
                (start, end)
            } else {
                parse_date_bound(value)?
            };
            out.push((keyword.negated, start, end));
        }
        Ok(out)
    }
}

/// Parses `YYYY[-MM[-DD]]` into an inclusive-start/exclusive-end range of
/// its granularity.
fn parse_date_bound(value: &str) -> Result<(NaiveDate, NaiveDate), ReliteError> {
    let invalid = || ReliteError::Error(format!("Invalid date filter: {}", value));
    let parts: Vec<&str> = value.split('-').collect();
    let year: i32 = parts
        .first()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    match parts.len() {
        1 => {
            let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?;
            let end = NaiveDate::from_ymd_opt(year + 1, 1, 1).ok_or_else(invalid)?;
            Ok((start, end))
        }
        2 => {
            let month: u32 = parts[1].parse().map_err(|_| invalid())?;
            let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
            let end = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)
            }
            .ok_or_else(invalid)?;
            Ok((start, end))
        }
        3 => {
            let month: u32 = parts[1].parse().map_err(|_| invalid())?;
            let day: u32 = parts[2].parse().map_err(|_| invalid())?;
            let start = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
            let end = start.succ_opt().ok_or_else(invalid)?;
            Ok((start, end))
        }
        _ => Err(invalid()),
    }
}

fn term_matches(term: &Term, text: &str, case_sensitive: bool) -> bool {
    match term {
        Term::Word(w) => Utils::wildcard_match(text, w, case_sensitive),
        Term::Phrase(p) => {
            if case_sensitive {
                text.contains(p.as_str())
            } else {
                text.to_lowercase().contains(&p.to_lowercase())
            }
        }
        Term::Or(terms) => terms.iter().any(|t| term_matches(t, text, case_sensitive)),
        Term::Not(inner) => !term_matches(inner, text, case_sensitive),
        Term::Group(terms) => terms.iter().all(|t| term_matches(t, text, case_sensitive)),
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn term_sql(term: &Term, columns: &[String], params: &mut Vec<String>) -> String {
    match term {
        Term::Word(w) => {
            let pattern = format!("%{}%", escape_like(w).replace('*', "%"));
            columns_like(columns, &pattern, params)
        }
        Term::Phrase(p) => {
            let pattern = format!("%{}%", escape_like(p));
            columns_like(columns, &pattern, params)
        }
        Term::Or(terms) => {
            let parts: Vec<String> = terms
                .iter()
                .map(|t| term_sql(t, columns, params))
                .collect();
            format!("({})", parts.join(" OR "))
        }
        Term::Not(inner) => format!("NOT {}", term_sql(inner, columns, params)),
        Term::Group(terms) => {
            let parts: Vec<String> = terms
                .iter()
                .map(|t| term_sql(t, columns, params))
                .collect();
            format!("({})", parts.join(" AND "))
        }
    }
}

fn columns_like(columns: &[String], pattern: &str, params: &mut Vec<String>) -> String {
    let parts: Vec<String> = columns
        .iter()
        .map(|col| {
            params.push(pattern.to_string());
            format!("{} LIKE ? ESCAPE '\\'", crate::ddl::quote(col))
        })
        .collect();
    format!("({})", parts.join(" OR "))
}

fn build_element(pair: Pair<Rule>, keywords: &mut Vec<Keyword>) -> Option<Term> {
    let inner = pair.into_inner().next()?;
    match inner.as_rule() {
        Rule::or_group => {
            let mut operands = Vec::new();
            for operand in inner.into_inner() {
                if operand.as_rule() == Rule::term {
                    if let Some(term) = build_term(operand, keywords, false) {
                        operands.push(term);
                    }
                }
            }
            match operands.len() {
                0 => None,
                1 => operands.pop(),
                _ => Some(Term::Or(operands)),
            }
        }
        Rule::term => build_term(inner, keywords, false),
        _ => None,
    }
}

fn build_term(pair: Pair<Rule>, keywords: &mut Vec<Keyword>, negated: bool) -> Option<Term> {
    let inner = pair.into_inner().next()?;
    build_term_inner(inner, keywords, negated)
}

fn build_term_inner(
    pair: Pair<Rule>,
    keywords: &mut Vec<Keyword>,
    negated: bool,
) -> Option<Term> {
    let wrap = |negated: bool, term: Term| {
        if negated {
            Some(Term::Not(Box::new(term)))
        } else {
            Some(term)
        }
    };
    match pair.as_rule() {
        Rule::negated => {
            let inner = pair.into_inner().next()?;
            build_term_inner(inner, keywords, true)
        }
        Rule::keyword => {
            let mut kind = None;
            let mut value = String::new();
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::kw_name => {
                        kind = part.as_str().to_ascii_lowercase().parse::<KeywordKind>().ok();
                    }
                    Rule::kw_value => {
                        let v = part.into_inner().next();
                        value = match v {
                            Some(v) if v.as_rule() == Rule::phrase => strip_quotes(v.as_str()),
                            Some(v) => v.as_str().to_string(),
                            None => String::new(),
                        };
                    }
                    _ => {}
                }
            }
            if let Some(kind) = kind {
                keywords.push(Keyword {
                    negated,
                    kind,
                    value,
                });
            }
            None
        }
        Rule::phrase => wrap(negated, Term::Phrase(strip_quotes(pair.as_str()))),
        Rule::word => wrap(negated, Term::Word(pair.as_str().to_string())),
        Rule::group => {
            let mut terms = Vec::new();
            for element in pair.into_inner() {
                if element.as_rule() == Rule::element {
                    if let Some(term) = build_element(element, keywords) {
                        terms.push(term);
                    }
                }
            }
            if terms.is_empty() {
                None
            } else {
                wrap(negated, Term::Group(terms))
            }
        }
        _ => None,
    }
}

fn strip_quotes(text: &str) -> String {
    text.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_words_and_keywords() {
        let q = SearchQuery::parse("alpha table:users -beta column:\"full name\"").unwrap();
        assert_eq!(
            q.terms,
            vec![
                Term::Word("alpha".to_string()),
                Term::Not(Box::new(Term::Word("beta".to_string()))),
            ]
        );
        assert_eq!(
            q.keywords,
            vec![
                Keyword {
                    negated: false,
                    kind: KeywordKind::Table,
                    value: "users".to_string()
                },
                Keyword {
                    negated: false,
                    kind: KeywordKind::Column,
                    value: "full name".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_or_and_groups() {
        let q = SearchQuery::parse("(one two) OR three").unwrap();
        assert_eq!(
            q.terms,
            vec![Term::Or(vec![
                Term::Group(vec![
                    Term::Word("one".to_string()),
                    Term::Word("two".to_string())
                ]),
                Term::Word("three".to_string()),
            ])]
        );
    }

    #[test]
    fn test_parse_negated_keyword() {
        let q = SearchQuery::parse("-table:log*").unwrap();
        assert_eq!(
            q.keywords,
            vec![Keyword {
                negated: true,
                kind: KeywordKind::Table,
                value: "log*".to_string()
            }]
        );
        assert!(q.terms.is_empty());
    }

    #[test]
    fn test_lone_or_is_a_word() {
        let q = SearchQuery::parse("OR").unwrap();
        assert_eq!(q.terms, vec![Term::Word("OR".to_string())]);
    }

    #[test]
    fn test_match_text() {
        let q = SearchQuery::parse("create -drop").unwrap();
        assert!(q.match_text("CREATE TABLE foo", false));
        assert!(!q.match_text("CREATE then DROP", false));
        assert!(!q.match_text("nothing here", false));

        let q = SearchQuery::parse("one OR two").unwrap();
        assert!(q.match_text("has two inside", false));
        assert!(!q.match_text("has three inside", false));

        let q = SearchQuery::parse("\"exact phrase\"").unwrap();
        assert!(q.match_text("an exact phrase here", false));
        assert!(!q.match_text("exact other phrase", false));
    }

    #[test]
    fn test_match_keywords() {
        let q = SearchQuery::parse("table:use* -table:users_old").unwrap();
        assert_eq!(
            q.match_keywords(KeywordKind::Table, &["users"], false),
            Some(true)
        );
        assert_eq!(
            q.match_keywords(KeywordKind::Table, &["users_old"], false),
            Some(false)
        );
        assert_eq!(
            q.match_keywords(KeywordKind::Table, &["invoices"], false),
            Some(false)
        );
        assert_eq!(q.match_keywords(KeywordKind::View, &["v"], false), None);
    }

    #[test]
    fn test_like_predicate() {
        let q = SearchQuery::parse("ada 50%").unwrap();
        let (clause, params) = q.like_predicate(&["name".to_string(), "note".to_string()]);
        assert_eq!(
            clause,
            "(name LIKE ? ESCAPE '\\' OR note LIKE ? ESCAPE '\\') AND (name LIKE ? ESCAPE '\\' OR note LIKE ? ESCAPE '\\')"
        );
        assert_eq!(
            params,
            vec![
                "%ada%".to_string(),
                "%ada%".to_string(),
                "%50\\%%".to_string(),
                "%50\\%%".to_string(),
            ]
        );
    }

    #[test]
    fn test_wildcard_in_word_becomes_percent() {
        let q = SearchQuery::parse("a*b").unwrap();
        let (_, params) = q.like_predicate(&["c".to_string()]);
        assert_eq!(params, vec!["%a%b%".to_string()]);
    }

    #[test]
    fn test_date_ranges() {
        let q = SearchQuery::parse("date:2020 -date:2020-06 date:2021-02-28..2021-03").unwrap();
        let ranges = q.date_ranges().unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(
            ranges[0],
            (
                false,
                NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
            )
        );
        assert_eq!(
            ranges[1],
            (
                true,
                NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 7, 1).unwrap()
            )
        );
        assert_eq!(
            ranges[2],
            (
                false,
                NaiveDate::from_ymd_opt(2021, 2, 28).unwrap(),
                NaiveDate::from_ymd_opt(2021, 4, 1).unwrap()
            )
        );
    }

    #[test]
    fn test_empty_query() {
        let q = SearchQuery::parse("   ").unwrap();
        assert!(q.is_empty());
        assert!(q.match_text("anything", false));
    }
}
