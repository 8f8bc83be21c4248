//! Filter query DSL.
//!
//! A filter string such as `is:open label:bug -author:bot "crash report"`
//! parses into a [`FilterQuery`]: a positive and a negative [`FilterMap`].
//! The query then compiles to a parameterized SQL condition + sort
//! ([`FilterSql`]) or is evaluated in memory against cached issues
//! ([`FilterQuery::matches`]).
//!
//! Parsing never fails. Unknown `key:value` tokens land in
//! [`FilterMap::other`], anything without a `key:` form becomes a keyword.

mod matcher;
mod sql;

pub use sql::{FilterSql, SortKey};

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?)([\w-]+):(.*)$").expect("key:value pattern"));

/// `is:` / `type:` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsFlag {
    Issue,
    Pr,
    Open,
    Closed,
    Merged,
    Unmerged,
    Read,
    Unread,
    Star,
    Unstar,
    Archived,
    Unarchived,
}

impl IsFlag {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "issue" => Some(Self::Issue),
            "pr" => Some(Self::Pr),
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "merged" => Some(Self::Merged),
            "unmerged" => Some(Self::Unmerged),
            "read" => Some(Self::Read),
            "unread" => Some(Self::Unread),
            "star" | "bookmark" => Some(Self::Star),
            "unstar" | "unbookmark" => Some(Self::Unstar),
            "archived" => Some(Self::Archived),
            "unarchived" => Some(Self::Unarchived),
            _ => None,
        }
    }
}

/// `no:` / `have:` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Presence {
    Label,
    Milestone,
    Assignee,
    DueOn,
}

impl Presence {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "label" => Some(Self::Label),
            "milestone" => Some(Self::Milestone),
            "assignee" => Some(Self::Assignee),
            "dueon" => Some(Self::DueOn),
            _ => None,
        }
    }

    pub(crate) const fn column(self) -> &'static str {
        match self {
            Self::Label => "labels",
            Self::Milestone => "milestone",
            Self::Assignee => "assignees",
            Self::DueOn => "due_on",
        }
    }
}

/// One side (positive or negative) of a parsed filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterMap {
    pub is: BTreeSet<IsFlag>,
    /// `is:` values that are not recognized flags.
    pub is_other: Vec<String>,
    pub no: BTreeSet<Presence>,
    pub have: BTreeSet<Presence>,
    pub numbers: Vec<String>,
    pub authors: Vec<String>,
    pub assignees: Vec<String>,
    pub users: Vec<String>,
    pub repos: Vec<String>,
    pub labels: Vec<String>,
    pub milestones: Vec<String>,
    pub keywords: Vec<String>,
    pub sort: Option<String>,
    /// Values of keys with no dedicated handling, e.g. `involves:foo`.
    pub other: BTreeMap<String, Vec<String>>,
}

impl FilterMap {
    fn insert(&mut self, key: &str, value: &str) {
        match key {
            "number" => self.numbers.push(value.to_string()),
            "is" | "type" => match IsFlag::parse(value) {
                Some(flag) => {
                    self.is.insert(flag);
                }
                None => self.is_other.push(value.to_lowercase()),
            },
            "no" => {
                if let Some(target) = Presence::parse(value) {
                    self.no.insert(target);
                }
            }
            "have" => {
                if let Some(target) = Presence::parse(value) {
                    self.have.insert(target);
                }
            }
            "author" => self.authors.push(value.to_lowercase()),
            "assignee" => self.assignees.push(value.to_lowercase()),
            "user" | "org" => self.users.push(value.to_lowercase()),
            "repo" => self.repos.push(value.to_lowercase()),
            "label" => self.labels.push(value.to_lowercase()),
            "milestone" => self.milestones.push(value.to_lowercase()),
            "sort" => self.sort = Some(value.to_string()),
            other => self
                .other
                .entry(other.to_string())
                .or_default()
                .push(value.to_string()),
        }
    }

    /// True when nothing was captured on this side.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A parsed filter query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    pub positive: FilterMap,
    pub negative: FilterMap,
}

impl FilterQuery {
    /// Parse a filter string. Never fails.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut query = Self::default();

        for token in tokenize(input) {
            let Some(caps) = KEY_VALUE.captures(&token) else {
                query.positive.keywords.push(token.to_lowercase());
                continue;
            };

            let negated = !caps[1].is_empty();
            let key = caps[2].to_lowercase();
            let value = &caps[3];

            if value.is_empty() {
                // `foo:` with nothing after it is searched as text
                query.positive.keywords.push(token.to_lowercase());
                continue;
            }

            let side = if negated {
                &mut query.negative
            } else {
                &mut query.positive
            };
            side.insert(&key, value);
        }

        query
    }
}

/// Split on whitespace outside double-quoted spans. Quotes are removed and
/// empty tokens dropped.
#[must_use]
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_phrase = false;

    for c in input.trim().chars() {
        match c {
            '"' => in_phrase = !in_phrase,
            c if c.is_whitespace() && !in_phrase => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_quotes_and_spaces() {
        assert_eq!(
            tokenize(r#"  is:open   "crash report"  sort:"updated desc" "#),
            vec!["is:open", "crash report", "sort:updated desc"]
        );
        assert!(tokenize("   ").is_empty());
        assert_eq!(tokenize("a\tb\nc"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tokenize_unterminated_quote_keeps_rest() {
        assert_eq!(tokenize(r#"label:"needs review"#), vec!["label:needs review"]);
    }

    #[test]
    fn test_parse_known_keys() {
        let q = FilterQuery::parse(
            "is:open type:pr no:label have:dueon author:Alice assignee:Bob org:Rust-Lang \
             repo:Foo/Bar label:Bug milestone:V1 number:12 sort:created",
        );
        let p = &q.positive;
        assert!(p.is.contains(&IsFlag::Open));
        assert!(p.is.contains(&IsFlag::Pr));
        assert!(p.no.contains(&Presence::Label));
        assert!(p.have.contains(&Presence::DueOn));
        assert_eq!(p.authors, vec!["alice"]);
        assert_eq!(p.assignees, vec!["bob"]);
        assert_eq!(p.users, vec!["rust-lang"]);
        assert_eq!(p.repos, vec!["foo/bar"]);
        assert_eq!(p.labels, vec!["bug"]);
        assert_eq!(p.milestones, vec!["v1"]);
        assert_eq!(p.numbers, vec!["12"]);
        assert_eq!(p.sort.as_deref(), Some("created"));
        assert!(q.negative.is_empty());
    }

    #[test]
    fn test_parse_negation() {
        let q = FilterQuery::parse("-label:wontfix -is:archived label:bug");
        assert_eq!(q.negative.labels, vec!["wontfix"]);
        assert!(q.negative.is.contains(&IsFlag::Archived));
        assert_eq!(q.positive.labels, vec!["bug"]);
    }

    #[test]
    fn test_bare_dash_word_is_positive_keyword() {
        let q = FilterQuery::parse("-flaky Timeout");
        assert_eq!(q.positive.keywords, vec!["-flaky", "timeout"]);
        assert!(q.negative.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_captured() {
        let q = FilterQuery::parse("involves:octocat -team:core is:merged");
        assert_eq!(q.positive.other.get("involves"), Some(&vec!["octocat".to_string()]));
        assert_eq!(q.negative.other.get("team"), Some(&vec!["core".to_string()]));
        assert_eq!(q.positive.is_other, vec!["merged"]);
        assert!(q.positive.keywords.is_empty());
    }

    #[test]
    fn test_empty_value_falls_back_to_keyword() {
        let q = FilterQuery::parse("label: foo");
        assert_eq!(q.positive.keywords, vec!["label:", "foo"]);
        assert!(q.positive.labels.is_empty());
    }

    #[test]
    fn test_star_aliases() {
        let q = FilterQuery::parse("is:bookmark -is:unbookmark");
        assert!(q.positive.is.contains(&IsFlag::Star));
        assert!(q.negative.is.contains(&IsFlag::Unstar));
    }
}
