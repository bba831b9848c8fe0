//! Relative URL resolution.
//!
//! Upstream manifests often reference their own assets with `./` paths
//! (`"./jar/spider.jar"`).  Once an element is lifted into a mixed document
//! those paths must point back at the directory of the source they came from.

use crate::manifest::{Doh, Ext, Live, Parse, RepoUrl, Rule, Site};

const RELATIVE_MARKER: &str = "./";

/// Resolve `value` against the directory of `origin` when it starts with
/// `./`; return it unchanged otherwise.
///
/// `"./jar/x.jar"` from `"https://host/dir/repo.json"` becomes
/// `"https://host/dir/jar/x.jar"`.
pub fn resolve_relative(value: &str, origin: &str) -> String {
    let Some(rest) = value.strip_prefix(RELATIVE_MARKER) else {
        return value.to_string();
    };
    let base = origin
        .rfind('/')
        .map_or(origin, |slash| &origin[..=slash]);
    format!("{base}{rest}")
}

fn rebase_in_place(value: &mut String, origin: &str) {
    if value.starts_with(RELATIVE_MARKER) {
        *value = resolve_relative(value, origin);
    }
}

/// Elements whose URL-bearing fields are rewritten against their origin after
/// being extracted.
pub trait Rebase {
    fn rebase(self, origin: &str) -> Self;
}

impl Rebase for Site {
    fn rebase(mut self, origin: &str) -> Self {
        rebase_in_place(&mut self.api, origin);
        rebase_in_place(&mut self.jar, origin);
        if let Some(Ext::Text(ext)) = &mut self.ext {
            rebase_in_place(ext, origin);
        }
        self
    }
}

impl Rebase for Doh {
    fn rebase(mut self, origin: &str) -> Self {
        rebase_in_place(&mut self.url, origin);
        self
    }
}

impl Rebase for Live {
    fn rebase(mut self, origin: &str) -> Self {
        rebase_in_place(&mut self.url, origin);
        self
    }
}

impl Rebase for Parse {
    fn rebase(mut self, origin: &str) -> Self {
        rebase_in_place(&mut self.url, origin);
        self
    }
}

impl Rebase for RepoUrl {
    fn rebase(mut self, origin: &str) -> Self {
        rebase_in_place(&mut self.url, origin);
        self
    }
}

// Flags, ad hosts and rules carry no URLs of their own.

impl Rebase for String {
    fn rebase(self, _origin: &str) -> Self {
        self
    }
}

impl Rebase for Rule {
    fn rebase(self, _origin: &str) -> Self {
        self
    }
}
