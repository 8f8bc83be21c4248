//! Compilation of a [`FilterQuery`] into a parameterized SQL condition and an
//! `ORDER BY` list over the `issues` table.

use super::{FilterMap, FilterQuery, IsFlag};
use crate::model::serialized_name;
use std::fmt::Write as _;

/// Columns searched by free-text keywords.
const KEYWORD_COLUMNS: &[&str] = &[
    "title",
    "body",
    "user",
    "repo",
    "author",
    "assignees",
    "labels",
    "milestone",
];

/// `LIKE` escape clause paired with [`like_pattern`].
const LIKE_ESCAPE: &str = r"ESCAPE '\'";

/// `%value%` with the `LIKE` wildcards in `value` escaped.
fn like_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Order used when the filter has no (valid) `sort:`.
pub const DEFAULT_SORT: &str = "updated_at DESC";

/// Compiled filter.
///
/// `condition` uses `?` placeholders bound in order from `params`. An empty
/// condition matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSql {
    pub condition: String,
    pub params: Vec<String>,
    pub sort: String,
}

impl FilterSql {
    /// The condition, or `1=1` when empty.
    #[must_use]
    pub fn where_clause(&self) -> &str {
        if self.condition.is_empty() {
            "1=1"
        } else {
            &self.condition
        }
    }
}

/// Sortable keys and the column / default direction each maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Number,
    Type,
    Read,
    Updated,
    Created,
    Closed,
    Merged,
    Archived,
    Star,
    Author,
    Assignee,
    User,
    Repo,
    Milestone,
    DueOn,
    Title,
}

impl SortKey {
    fn parse(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "number" => Some(Self::Number),
            "type" => Some(Self::Type),
            "read" => Some(Self::Read),
            "updated" => Some(Self::Updated),
            "created" => Some(Self::Created),
            "closed" => Some(Self::Closed),
            "merged" => Some(Self::Merged),
            "archived" => Some(Self::Archived),
            "star" | "bookmark" => Some(Self::Star),
            "author" => Some(Self::Author),
            "assignee" => Some(Self::Assignee),
            "user" => Some(Self::User),
            "repo" => Some(Self::Repo),
            "milestone" => Some(Self::Milestone),
            "dueon" => Some(Self::DueOn),
            "title" => Some(Self::Title),
            _ => None,
        }
    }

    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Type => "type",
            Self::Read => "read_at",
            Self::Updated => "updated_at",
            Self::Created => "created_at",
            Self::Closed => "closed_at",
            Self::Merged => "merged_at",
            Self::Archived => "archived_at",
            Self::Star => "marked_at",
            Self::Author => "author",
            Self::Assignee => "assignees",
            Self::User => "user",
            Self::Repo => "repo",
            Self::Milestone => "milestone",
            Self::DueOn => "due_on",
            Self::Title => "title",
        }
    }

    #[must_use]
    pub const fn default_direction(self) -> &'static str {
        match self {
            Self::Number
            | Self::Read
            | Self::Updated
            | Self::Created
            | Self::Closed
            | Self::Merged
            | Self::Archived
            | Self::Star
            | Self::Milestone => "DESC",
            Self::Type
            | Self::Author
            | Self::Assignee
            | Self::User
            | Self::Repo
            | Self::DueOn
            | Self::Title => "ASC",
        }
    }
}

#[derive(Default)]
struct Builder {
    conditions: Vec<String>,
    params: Vec<String>,
}

impl Builder {
    fn push(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    /// `?, ?, ?` for `values`, binding each one.
    fn placeholders(&mut self, values: &[String]) -> String {
        self.params.extend(values.iter().cloned());
        vec!["?"; values.len()].join(", ")
    }

    /// `column [NOT] LIKE ?` for each name in serialized-list form.
    fn list_likes(&mut self, column: &str, names: &[String], negated: bool) -> Vec<String> {
        let op = if negated { "NOT LIKE" } else { "LIKE" };
        names
            .iter()
            .map(|name| {
                self.params.push(like_pattern(&serialized_name(name)));
                format!("{column} {op} ? {LIKE_ESCAPE}")
            })
            .collect()
    }

    fn in_list(&mut self, column: &str, values: &[String], negated: bool) {
        if values.is_empty() {
            return;
        }
        let op = if negated { "NOT IN" } else { "IN" };
        let placeholders = self.placeholders(values);
        self.push(format!(
            "({column} IS NOT NULL AND lower({column}) {op} ({placeholders}))"
        ));
    }

    fn flags(&mut self, map: &FilterMap, negated: bool) {
        for flag in &map.is {
            let (positive, negative) = match flag {
                IsFlag::Issue => ("type = 'issue'", "type != 'issue'"),
                IsFlag::Pr => ("type = 'pr'", "type != 'pr'"),
                IsFlag::Open => ("closed_at IS NULL", "closed_at IS NOT NULL"),
                IsFlag::Closed => ("closed_at IS NOT NULL", "closed_at IS NULL"),
                IsFlag::Merged => ("merged_at IS NOT NULL", "merged_at IS NULL"),
                IsFlag::Unmerged => ("merged_at IS NULL", "merged_at IS NOT NULL"),
                IsFlag::Read => (
                    "(read_at IS NOT NULL AND read_at >= updated_at)",
                    "(read_at IS NULL OR read_at < updated_at)",
                ),
                IsFlag::Unread => (
                    "(read_at IS NULL OR read_at < updated_at)",
                    "(read_at IS NOT NULL AND read_at >= updated_at)",
                ),
                IsFlag::Star => ("marked_at IS NOT NULL", "marked_at IS NULL"),
                IsFlag::Unstar => ("marked_at IS NULL", "marked_at IS NOT NULL"),
                IsFlag::Archived => ("archived_at IS NOT NULL", "archived_at IS NULL"),
                IsFlag::Unarchived => ("archived_at IS NULL", "archived_at IS NOT NULL"),
            };
            self.push(if negated { negative } else { positive });
        }

        for target in &map.no {
            let null = if negated { "IS NOT NULL" } else { "IS NULL" };
            self.push(format!("{} {null}", target.column()));
        }
        for target in &map.have {
            let null = if negated { "IS NULL" } else { "IS NOT NULL" };
            self.push(format!("{} {null}", target.column()));
        }
    }

    fn side(&mut self, map: &FilterMap, negated: bool) {
        self.flags(map, negated);

        let numbers: Vec<String> = map
            .numbers
            .iter()
            .filter_map(|n| n.trim().parse::<i64>().ok())
            .map(|n| n.to_string())
            .collect();
        if !numbers.is_empty() {
            let op = if negated { "NOT IN" } else { "IN" };
            self.push(format!(
                "(number IS NOT NULL AND number {op} ({}))",
                numbers.join(", ")
            ));
        }

        self.in_list("author", &map.authors, negated);

        if !map.assignees.is_empty() {
            // any assignee matches; a negated list excludes all of them
            let joiner = if negated { " AND " } else { " OR " };
            let likes = self.list_likes("assignees", &map.assignees, negated);
            self.push(format!("({})", likes.join(joiner)));
        }

        self.in_list("milestone", &map.milestones, negated);
        self.in_list("user", &map.users, negated);
        self.in_list("repo", &map.repos, negated);

        if !map.labels.is_empty() {
            let likes = self.list_likes("labels", &map.labels, negated);
            self.push(format!("({})", likes.join(" AND ")));
        }
    }

    fn keywords(&mut self, keywords: &[String]) {
        let mut groups = Vec::new();
        for keyword in keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                continue;
            }
            let mut group = String::from("(");
            for (i, column) in KEYWORD_COLUMNS.iter().enumerate() {
                if i > 0 {
                    group.push_str(" OR ");
                }
                let _ = write!(group, "{column} LIKE ? {LIKE_ESCAPE}");
                self.params.push(like_pattern(keyword));
            }
            group.push(')');
            groups.push(group);
        }
        if !groups.is_empty() {
            self.push(format!("({})", groups.join(" AND ")));
        }
    }
}

/// Parse `"author desc, created"` into `ORDER BY` terms plus any extra
/// conditions a key implies.
fn compile_sort(spec: &str) -> (Vec<String>, Vec<&'static str>) {
    let mut terms = Vec::new();
    let mut conditions = Vec::new();

    for entry in spec.split(',') {
        let mut parts = entry.split_whitespace();
        let Some(key) = parts.next().and_then(SortKey::parse) else {
            continue;
        };
        let direction = match parts.next().map(str::to_lowercase).as_deref() {
            Some("asc") => "ASC",
            Some("desc") => "DESC",
            _ => key.default_direction(),
        };
        terms.push(format!("{} {direction}", key.column()));

        if key == SortKey::DueOn {
            conditions.push("closed_at IS NULL");
            conditions.push("due_on IS NOT NULL");
        }
    }

    (terms, conditions)
}

impl FilterQuery {
    /// Compile into a SQL condition and sort.
    #[must_use]
    pub fn compile(&self) -> FilterSql {
        let mut builder = Builder::default();

        let mut sort = String::from(DEFAULT_SORT);
        if let Some(spec) = &self.positive.sort {
            let (terms, conditions) = compile_sort(spec);
            if !terms.is_empty() {
                sort = terms.join(", ");
            }
            for condition in conditions {
                builder.push(condition);
            }
        }

        builder.side(&self.positive, false);
        builder.side(&self.negative, true);
        builder.keywords(&self.positive.keywords);

        FilterSql {
            condition: builder.conditions.join(" AND "),
            params: builder.params,
            sort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(filter: &str) -> FilterSql {
        FilterQuery::parse(filter).compile()
    }

    #[test]
    fn test_empty_filter() {
        let sql = compile("");
        assert!(sql.condition.is_empty());
        assert!(sql.params.is_empty());
        assert_eq!(sql.where_clause(), "1=1");
        assert_eq!(sql.sort, DEFAULT_SORT);
    }

    #[test]
    fn test_flags() {
        let sql = compile("is:open is:unread -is:pr have:milestone no:assignee");
        assert_eq!(
            sql.condition,
            "closed_at IS NULL AND (read_at IS NULL OR read_at < updated_at) \
             AND assignees IS NULL AND milestone IS NOT NULL AND type != 'pr'"
        );
        assert!(sql.params.is_empty());
    }

    #[test]
    fn test_labels_and_assignees_join_differently() {
        let sql = compile("label:a label:b assignee:x assignee:y");
        assert_eq!(
            sql.condition,
            r"(assignees LIKE ? ESCAPE '\' OR assignees LIKE ? ESCAPE '\') AND (labels LIKE ? ESCAPE '\' AND labels LIKE ? ESCAPE '\')"
        );
        assert_eq!(
            sql.params,
            vec!["%<<<<x>>>>%", "%<<<<y>>>>%", "%<<<<a>>>>%", "%<<<<b>>>>%"]
        );
    }

    #[test]
    fn test_negative_lists() {
        let sql = compile("-author:bot -label:wontfix -number:3");
        assert_eq!(
            sql.condition,
            "(number IS NOT NULL AND number NOT IN (3)) \
             AND (author IS NOT NULL AND lower(author) NOT IN (?)) \
             AND (labels NOT LIKE ? ESCAPE '\\')"
        );
        assert_eq!(sql.params, vec!["bot", "%<<<<wontfix>>>>%"]);
    }

    #[test]
    fn test_like_wildcards_are_escaped() {
        let sql = compile(r"50% label:needs_review");
        assert_eq!(sql.params[0], r"%<<<<needs\_review>>>>%");
        assert_eq!(sql.params[1], r"%50\%%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn test_merged_flags() {
        assert_eq!(compile("is:merged").condition, "merged_at IS NOT NULL");
        assert_eq!(compile("is:unmerged").condition, "merged_at IS NULL");
        assert_eq!(compile("-is:merged").condition, "merged_at IS NULL");
        assert_eq!(compile("-is:unmerged").condition, "merged_at IS NOT NULL");
        assert_eq!(compile("sort:merged").sort, "merged_at DESC");
    }

    #[test]
    fn test_numbers_drop_garbage() {
        let sql = compile("number:12 number:abc");
        assert_eq!(sql.condition, "(number IS NOT NULL AND number IN (12))");
        assert!(compile("number:abc").condition.is_empty());
    }

    #[test]
    fn test_keywords_and_of_ors() {
        let sql = compile(r#"crash "out of memory""#);
        assert_eq!(sql.params.len(), KEYWORD_COLUMNS.len() * 2);
        assert_eq!(sql.params[0], "%crash%");
        assert_eq!(sql.params[KEYWORD_COLUMNS.len()], "%out of memory%");
        assert!(sql.condition.starts_with(r"((title LIKE ? ESCAPE '\' OR body LIKE ?"));
        assert!(sql.condition.contains(") AND (title LIKE ?"));
    }

    #[test]
    fn test_sort_defaults_and_directions() {
        assert_eq!(compile("sort:number").sort, "number DESC");
        assert_eq!(compile("sort:title").sort, "title ASC");
        assert_eq!(compile(r#"sort:"author desc, created""#).sort, "author DESC, created_at DESC");
        assert_eq!(compile(r#"sort:"repo sideways""#).sort, "repo ASC");
        assert_eq!(compile("sort:bookmark").sort, "marked_at DESC");
        assert_eq!(compile("sort:bogus").sort, DEFAULT_SORT);
    }

    #[test]
    fn test_dueon_sort_adds_conditions() {
        let sql = compile("sort:dueon is:issue");
        assert_eq!(sql.sort, "due_on ASC");
        assert_eq!(
            sql.condition,
            "closed_at IS NULL AND due_on IS NOT NULL AND type = 'issue'"
        );
    }

    #[test]
    fn test_user_repo_milestone_lowercase_in() {
        let sql = compile("repo:Foo/Bar user:Foo milestone:V2");
        assert_eq!(
            sql.condition,
            "(milestone IS NOT NULL AND lower(milestone) IN (?)) \
             AND (user IS NOT NULL AND lower(user) IN (?)) \
             AND (repo IS NOT NULL AND lower(repo) IN (?))"
        );
        assert_eq!(sql.params, vec!["v2", "foo", "foo/bar"]);
    }
}
