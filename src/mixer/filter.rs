//! Include/exclude filtering of array elements.

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use thiserror::Error;

use super::path::{FieldPath, PathError};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid {which} pattern `{pattern}`: {source}")]
    Pattern {
        which: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Path(#[from] PathError),
}

/// Compiled form of a spec's `filter_by` / `include` / `exclude` triple.
#[derive(Debug)]
pub struct ElementFilter {
    /// Only parsed when at least one pattern is set.
    filter_by: Option<FieldPath>,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl ElementFilter {
    /// Compile the filter.  Empty patterns mean "no constraint".
    pub fn new(filter_by: &str, include: &str, exclude: &str) -> Result<Self, FilterError> {
        let include = compile("include", include)?;
        let exclude = compile("exclude", exclude)?;
        let filter_by = if include.is_none() && exclude.is_none() {
            None
        } else {
            Some(FieldPath::parse(filter_by)?)
        };
        Ok(Self {
            filter_by,
            include,
            exclude,
        })
    }

    pub fn is_pass_through(&self) -> bool {
        self.filter_by.is_none()
    }

    /// Whether `element` survives the filter.
    ///
    /// The value at `filter_by` is read as a string; a missing value reads as
    /// `""`.  Patterns match anywhere in the value unless they anchor
    /// themselves, and ignore case unless they start with `(?-i)`.
    pub fn retains(&self, element: &Value) -> bool {
        let Some(filter_by) = &self.filter_by else {
            return true;
        };
        let value = filter_by
            .lookup(element)
            .map(value_as_string)
            .unwrap_or_default();

        self.include.as_ref().map_or(true, |re| re.is_match(&value))
            && self.exclude.as_ref().map_or(true, |re| !re.is_match(&value))
    }

    /// Keep the retained elements, in their original order.
    pub fn apply<'a>(&self, elements: &'a [Value]) -> Vec<&'a Value> {
        if self.is_pass_through() {
            return elements.iter().collect();
        }
        elements.iter().filter(|e| self.retains(e)).collect()
    }
}

/// Filter `elements` by the string at `filter_by`.
///
/// An element is kept when it matches `include` (or `include` is empty) and
/// does not match `exclude` (or `exclude` is empty).
pub fn filter_array<'a>(
    elements: &'a [Value],
    filter_by: &str,
    include: &str,
    exclude: &str,
) -> Result<Vec<&'a Value>, FilterError> {
    Ok(ElementFilter::new(filter_by, include, exclude)?.apply(elements))
}

/// Render a scalar the way it would appear in a manifest: strings verbatim,
/// `null` as empty, anything else as compact JSON.
pub fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn compile(which: &'static str, pattern: &str) -> Result<Option<Regex>, FilterError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|source| FilterError::Pattern {
            which,
            pattern: pattern.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items() -> Vec<Value> {
        vec![
            json!({"key": "Apple"}),
            json!({"key": "Ax"}),
            json!({"key": "Banana"}),
        ]
    }

    #[test]
    fn empty_patterns_keep_everything_in_order() {
        let elements = items();
        let kept = filter_array(&elements, "key", "", "").unwrap();
        assert_eq!(kept, elements.iter().collect::<Vec<_>>());
    }

    #[test]
    fn include_and_exclude_combine() {
        let elements = items();
        let kept = filter_array(&elements, "key", "^A", "X").unwrap();
        assert_eq!(kept, vec![&json!({"key": "Apple"})]);
    }

    #[test]
    fn case_sensitivity_is_opt_in() {
        let elements = items();
        let kept = filter_array(&elements, "key", "^A", "(?-i)X").unwrap();
        assert_eq!(kept, vec![&json!({"key": "Apple"}), &json!({"key": "Ax"})]);
    }

    #[test]
    fn matching_is_unanchored_by_default() {
        let elements = vec![json!({"name": "Repo 1"}), json!({"name": "Repo 2"}), json!({"name": "Repo 3"})];
        let kept = filter_array(&elements, "name", "Repo [12]", "Repo 2").unwrap();
        assert_eq!(kept, vec![&json!({"name": "Repo 1"})]);
    }

    #[test]
    fn missing_filter_value_reads_as_empty() {
        let elements = vec![json!({"other": 1}), json!({"key": "keep"})];

        let kept = filter_array(&elements, "key", "", "keep").unwrap();
        assert_eq!(kept, vec![&json!({"other": 1})]);

        let kept = filter_array(&elements, "key", ".", "").unwrap();
        assert_eq!(kept, vec![&json!({"key": "keep"})]);
    }

    #[test]
    fn non_string_values_are_compared_as_text() {
        let elements = vec![json!({"type": 3}), json!({"type": 1})];
        let kept = filter_array(&elements, "type", "^3$", "").unwrap();
        assert_eq!(kept, vec![&json!({"type": 3})]);
    }

    #[test]
    fn unused_filter_path_is_not_parsed() {
        let elements = vec![json!({"k": 1})];
        let kept = filter_array(&elements, "a..b", "", "").unwrap();
        assert_eq!(kept, vec![&json!({"k": 1})]);

        let err = filter_array(&elements, "a..b", "x", "").unwrap_err();
        assert!(matches!(err, FilterError::Path(_)));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = filter_array(&items(), "key", "(", "").unwrap_err();
        assert!(matches!(err, FilterError::Pattern { which: "include", .. }));

        let err = ElementFilter::new("key", "", "[").unwrap_err();
        assert!(err.to_string().contains("exclude"));
    }
}
