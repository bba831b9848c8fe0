//! Dot/bracket field paths into a JSON document.
//!
//! Supported forms:
//!
//! * `spider`: an object key
//! * `a.b.c`: nested keys
//! * `sites[0].api` or `sites.0.api`: array index
//! * `["key.with.dots"]` or `['key']`: a quoted key
//!
//! A numeric segment is an index when applied to an array and a key when
//! applied to an object.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed field path.  An empty path addresses the whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid field path `{path}`: {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: &'static str,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let fail = |reason| PathError {
            path: path.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = path.chars().peekable();
        // Set after a `]` so that `a[0]b` is rejected.
        let mut after_bracket = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if current.is_empty() && !after_bracket {
                        return Err(fail("empty segment"));
                    }
                    if !current.is_empty() {
                        segments.push(plain_segment(std::mem::take(&mut current)));
                    }
                    after_bracket = false;
                    if chars.peek().is_none() {
                        return Err(fail("trailing `.`"));
                    }
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(plain_segment(std::mem::take(&mut current)));
                    }
                    segments.push(bracket_segment(&mut chars).ok_or_else(|| fail("unclosed `[`"))?);
                    after_bracket = true;
                }
                ']' => return Err(fail("unexpected `]`")),
                _ => {
                    if after_bracket {
                        return Err(fail("expected `.` or `[` after `]`"));
                    }
                    current.push(c);
                }
            }
        }

        if !current.is_empty() {
            segments.push(plain_segment(current));
        }
        Ok(Self { segments })
    }

    /// Follow the path through `root`.  `None` when any step is missing.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |value, segment| match (segment, value) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(i), Value::Array(items)) => items.get(*i),
                (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string()),
                _ => None,
            })
    }
}

fn plain_segment(raw: String) -> Segment {
    match raw.parse::<usize>() {
        Ok(index) => Segment::Index(index),
        Err(_) => Segment::Key(raw),
    }
}

/// Read the inside of `[...]`, the opening bracket already consumed.
fn bracket_segment(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<Segment> {
    match chars.peek().copied() {
        Some(quote @ ('"' | '\'')) => {
            chars.next();
            let mut key = String::new();
            loop {
                match chars.next()? {
                    '\\' => key.push(chars.next()?),
                    c if c == quote => break,
                    c => key.push(c),
                }
            }
            (chars.next()? == ']').then_some(Segment::Key(key))
        }
        _ => {
            let mut raw = String::new();
            loop {
                match chars.next()? {
                    ']' => break,
                    c => raw.push(c),
                }
            }
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            Some(plain_segment(raw.to_string()))
        }
    }
}
