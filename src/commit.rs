//! Commit records, tag queries and helpers for providers without native
//! filtering.

use crate::error::{RemoteError, Result};
use crate::operation::Properties;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

/// A remote commit: its id plus free-form properties.
///
/// `timestamp` (RFC 3339) and `tags` (string -> string) have meaning to the
/// helpers in this module; everything else is opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub id: String,
    pub properties: Properties,
}

impl Commit {
    pub fn new(id: impl Into<String>, properties: Properties) -> Self {
        Self {
            id: id.into(),
            properties,
        }
    }

    pub fn tags(&self) -> Option<&Properties> {
        self.properties.get("tags").and_then(Value::as_object)
    }

    /// Parsed `timestamp` property, or `None` when absent or unparseable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.properties.get("timestamp")?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Sort key: commits without a timestamp count as the Unix epoch
    /// (the default `DateTime<Utc>`).
    fn sort_key(&self) -> DateTime<Utc> {
        self.timestamp().unwrap_or_default()
    }
}

/// One element of a tag query: `key` (must exist) or `key=value` (must match).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: Option<String>,
}

impl TagFilter {
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    fn matches(&self, tags: &Properties) -> bool {
        match (tags.get(&self.key), &self.value) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(wanted)) => actual.as_str() == Some(wanted.as_str()),
        }
    }
}

impl FromStr for TagFilter {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = match s.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => (s, None),
        };
        if key.is_empty() {
            return Err(RemoteError::invalid_config(format!(
                "tag filter '{}' has an empty key",
                s
            )));
        }
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Match commit properties against a tag query. All filters must match; an
/// empty query matches everything.
pub fn match_tags(properties: &Properties, tags: &[TagFilter]) -> bool {
    if tags.is_empty() {
        return true;
    }

    let Some(metadata) = properties.get("tags").and_then(Value::as_object) else {
        return false;
    };

    tags.iter().all(|tag| tag.matches(metadata))
}

/// Sort commits newest first. Stable for equal timestamps; commits without
/// a timestamp go last.
pub fn sort_descending(commits: &mut [Commit]) {
    commits.sort_by_cached_key(|c| Reverse(c.sort_key()));
}

/// Filter by tags, then order newest first.
pub fn filter_and_sort(commits: Vec<Commit>, tags: &[TagFilter]) -> Vec<Commit> {
    let mut matched: Vec<Commit> = commits
        .into_iter()
        .filter(|c| match_tags(&c.properties, tags))
        .collect();
    sort_descending(&mut matched);
    matched
}

/// Check a property map against the fields a provider accepts.
pub fn validate_fields(props: &Properties, required: &[&str], optional: &[&str]) -> Result<()> {
    for field in required {
        if !props.contains_key(*field) {
            return Err(RemoteError::invalid_config(format!(
                "missing required property '{}'",
                field
            )));
        }
    }
    for key in props.keys() {
        if !required.contains(&key.as_str()) && !optional.contains(&key.as_str()) {
            return Err(RemoteError::invalid_config(format!(
                "invalid property '{}'",
                key
            )));
        }
    }
    Ok(())
}

/// Required string property
pub fn require_str<'a>(props: &'a Properties, field: &str) -> Result<&'a str> {
    props
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RemoteError::invalid_config(format!("property '{}' must be a string", field))
        })
}

/// Optional string property; present but non-string is an error.
pub fn optional_str<'a>(props: &'a Properties, field: &str) -> Result<Option<&'a str>> {
    match props.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(RemoteError::invalid_config(format!(
            "property '{}' must be a string",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    fn make_commit(tags: &[(&str, &str)]) -> Properties {
        if tags.is_empty() {
            return Properties::new();
        }
        let map: Properties = tags
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        let mut commit = Properties::new();
        commit.insert("tags".to_string(), Value::Object(map));
        commit
    }

    #[test]
    fn test_empty_tags_match_any_commit() {
        assert!(match_tags(&make_commit(&[]), &[]));
        assert!(match_tags(&make_commit(&[("a", "b")]), &[]));
        assert!(match_tags(&make_commit(&[("c", "d")]), &[]));
    }

    #[test]
    fn test_exact_match() {
        let tags = [TagFilter::equals("a", "b")];
        assert!(!match_tags(&make_commit(&[]), &tags));
        assert!(match_tags(&make_commit(&[("a", "b")]), &tags));
        assert!(!match_tags(&make_commit(&[("a", "c")]), &tags));
        assert!(!match_tags(&make_commit(&[("c", "d")]), &tags));
    }

    #[test]
    fn test_existence_match() {
        let tags = [TagFilter::exists("a")];
        assert!(!match_tags(&make_commit(&[]), &tags));
        assert!(match_tags(&make_commit(&[("a", "b")]), &tags));
        assert!(!match_tags(&make_commit(&[("c", "d")]), &tags));
    }

    #[test]
    fn test_multiple_filters_are_conjunctive() {
        let tags = [TagFilter::exists("a"), TagFilter::equals("c", "d")];
        assert!(!match_tags(&make_commit(&[("a", "b")]), &tags));
        assert!(!match_tags(&make_commit(&[("c", "d")]), &tags));
        assert!(match_tags(&make_commit(&[("a", "b"), ("c", "d")]), &tags));
    }

    #[test]
    fn test_non_object_tags_never_match() {
        let commit = props(json!({"tags": "a=b"}));
        assert!(!match_tags(&commit, &[TagFilter::exists("a")]));
    }

    #[test]
    fn test_sort_descending() {
        let mut commits = vec![
            Commit::new("four", props(json!({"timestamp": "2019-09-21T13:45:30Z"}))),
            Commit::new("one", props(json!({"timestamp": "2019-09-20T13:45:36Z"}))),
            Commit::new("three", props(json!({"timestamp": "2019-09-20T13:45:38Z"}))),
            Commit::new("two", props(json!({"timestamp": "2019-09-20T13:45:37Z"}))),
        ];
        sort_descending(&mut commits);
        let ids: Vec<&str> = commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["four", "three", "two", "one"]);
    }

    #[test]
    fn test_sort_places_missing_timestamps_last() {
        let mut commits = vec![
            Commit::new("four", Properties::new()),
            Commit::new("one", props(json!({"timestamp": "2019-09-20T13:45:36Z"}))),
            Commit::new("three", props(json!({"timestamp": "2019-09-20T13:45:38Z"}))),
            Commit::new("bad", props(json!({"timestamp": "yesterday"}))),
            Commit::new("two", props(json!({"timestamp": "2019-09-20T13:45:37Z"}))),
        ];
        sort_descending(&mut commits);
        let ids: Vec<&str> = commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["three", "two", "one", "four", "bad"]);
    }

    #[test]
    fn test_sort_is_stable_and_offset_aware() {
        let mut commits = vec![
            Commit::new("a", props(json!({"timestamp": "2019-09-20T15:00:00+02:00"}))),
            Commit::new("b", props(json!({"timestamp": "2019-09-20T13:00:00Z"}))),
            Commit::new("c", props(json!({"timestamp": "2019-09-20T13:30:00Z"}))),
        ];
        sort_descending(&mut commits);
        let ids: Vec<&str> = commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_filter_and_sort() {
        let commits = vec![
            Commit::new(
                "old",
                props(json!({"timestamp": "2019-01-01T00:00:00Z", "tags": {"env": "prod"}})),
            ),
            Commit::new(
                "new",
                props(json!({"timestamp": "2020-01-01T00:00:00Z", "tags": {"env": "prod"}})),
            ),
            Commit::new(
                "dev",
                props(json!({"timestamp": "2021-01-01T00:00:00Z", "tags": {"env": "dev"}})),
            ),
        ];
        let result = filter_and_sort(commits, &[TagFilter::equals("env", "prod")]);
        let ids: Vec<&str> = result.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_tag_filter_parse() {
        assert_eq!("a".parse::<TagFilter>().unwrap(), TagFilter::exists("a"));
        assert_eq!(
            "a=b".parse::<TagFilter>().unwrap(),
            TagFilter::equals("a", "b")
        );
        assert_eq!(
            "a=b=c".parse::<TagFilter>().unwrap(),
            TagFilter::equals("a", "b=c")
        );
        assert_eq!("a=".parse::<TagFilter>().unwrap(), TagFilter::equals("a", ""));
        assert!("=b".parse::<TagFilter>().is_err());
        assert_eq!(TagFilter::equals("a", "b").to_string(), "a=b");
    }

    #[test]
    fn test_validate_fields() {
        let ok = props(json!({"path": "/data", "port": 22}));
        assert!(validate_fields(&ok, &["path"], &["port"]).is_ok());

        let err = validate_fields(&props(json!({})), &["path"], &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: missing required property 'path'"
        );

        let err = validate_fields(&props(json!({"path": "/", "bogus": 1})), &["path"], &[])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: invalid property 'bogus'"
        );
    }

    #[test]
    fn test_string_accessors() {
        let p = props(json!({"name": "x", "port": 22}));
        assert_eq!(require_str(&p, "name").unwrap(), "x");
        assert!(require_str(&p, "port").is_err());
        assert!(require_str(&p, "missing").is_err());
        assert_eq!(optional_str(&p, "missing").unwrap(), None);
        assert!(optional_str(&p, "port").is_err());
    }
}
