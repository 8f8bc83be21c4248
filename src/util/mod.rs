//! Shared utilities for `streamsync`.
//!
//! - Time parsing and formatting
//! - Packing qualifier lists into length-bounded search queries
//! - Splitting GitHub API urls into owner / repo / number

pub mod time;

/// Owner, repository and number parsed from an API url such as
/// `https://api.github.com/repos/octocat/hello/issues/42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPath {
    pub owner: String,
    pub name: String,
    pub number: i64,
}

impl ApiPath {
    /// `owner/name`.
    #[must_use]
    pub fn repo(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Parse the trailing `{owner}/{repo}/{kind}/{number}` segments of an API url.
///
/// Any prefix (scheme, host, enterprise path prefix, `repos`) is ignored.
#[must_use]
pub fn parse_api_path(url: &str) -> Option<ApiPath> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let number = segments.next()?.parse::<i64>().ok()?;
    let _kind = segments.next()?;
    let name = segments.next()?;
    let owner = segments.next()?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some(ApiPath {
        owner: owner.to_string(),
        name: name.to_string(),
        number,
    })
}

/// Greedily pack `values` into `separator`-joined strings shorter than
/// `max_len`.
///
/// A single value that is already too long gets a string of its own.
#[must_use]
pub fn join_with_max(values: &[String], max_len: usize, separator: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current = String::new();

    for value in values {
        if current.is_empty() {
            current.push_str(value);
            continue;
        }
        if current.len() + separator.len() + value.len() < max_len {
            current.push_str(separator);
            current.push_str(value);
        } else {
            groups.push(std::mem::take(&mut current));
            current.push_str(value);
        }
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_api_path() {
        let path = parse_api_path("https://api.github.com/repos/octocat/hello/issues/42").unwrap();
        assert_eq!(path.owner, "octocat");
        assert_eq!(path.name, "hello");
        assert_eq!(path.number, 42);
        assert_eq!(path.repo(), "octocat/hello");

        let ghe = parse_api_path("https://ghe.example.com/api/v3/repos/org/svc/pulls/7").unwrap();
        assert_eq!(ghe.repo(), "org/svc");
        assert_eq!(ghe.number, 7);

        assert!(parse_api_path("https://api.github.com/user").is_none());
    }

    #[test]
    fn test_join_with_max_packs_greedily() {
        let values = strings(&["repo:a/b", "repo:c/d", "repo:e/f"]);
        assert_eq!(
            join_with_max(&values, 20, " "),
            vec!["repo:a/b repo:c/d".to_string(), "repo:e/f".to_string()]
        );
        assert_eq!(
            join_with_max(&values, 24, " OR "),
            vec!["repo:a/b OR repo:c/d".to_string(), "repo:e/f".to_string()]
        );
        assert_eq!(join_with_max(&values, 100, " ").len(), 1);
        assert!(join_with_max(&[], 10, " ").is_empty());
    }

    #[test]
    fn test_join_with_max_isolates_oversized_values() {
        let values = strings(&["short", "a-very-long-qualifier", "tiny"]);
        let groups = join_with_max(&values, 10, " ");
        assert_eq!(groups, strings(&["short", "a-very-long-qualifier", "tiny"]));
    }

    #[test]
    fn test_join_with_max_respects_bound() {
        let values: Vec<String> = (0..50).map(|i| format!("repo:org/r{i}")).collect();
        for group in join_with_max(&values, 64, " OR ") {
            assert!(group.len() < 64);
        }
    }
}
