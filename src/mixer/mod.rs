//! Mixing cached sources into TVBox documents.
//!
//! The mixer is stateless between calls.  Each mix opens a [`MixSession`],
//! which pulls every referenced source out of the [`SourceCache`] once,
//! parses it, and then answers field and array lookups against the parsed
//! documents.  Missing fields are not errors: a scalar resolves to `""` and an
//! array to `[]`, so a partially populated upstream never breaks the mix.

mod filter;
mod path;
mod rewrite;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use filter::{filter_array, value_as_string, ElementFilter, FilterError};
pub use path::{FieldPath, PathError};
pub use rewrite::{resolve_relative, Rebase};

use crate::config::{MixArraySpec, MixFieldSpec, Settings};
use crate::manifest::{MultiRepoDocument, RepoDocument, RepoUrl};
use crate::source::{SourceCache, SourceError, SourceKind};

/// Name of the entry that points an index back at this service's own repo.
pub const SELF_REPO_NAME: &str = "TvBox MixProxy";

#[derive(Debug, Error)]
pub enum MixError {
    #[error("mixing {field}: {source}")]
    Source {
        field: String,
        #[source]
        source: SourceError,
    },

    #[error("mixing {field}: source {source_name} is a {actual} source, expected {expected}")]
    KindMismatch {
        field: String,
        source_name: String,
        expected: SourceKind,
        actual: SourceKind,
    },

    #[error("mixing {field}: source {source_name} is not valid JSON: {source}")]
    MalformedDocument {
        field: String,
        source_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("mixing {field}: {source}")]
    InvalidFilterPattern {
        field: String,
        #[source]
        source: FilterError,
    },

    #[error("mixing {field}: element {index} of `{path}` in source {source_name} is malformed: {source}")]
    MalformedElement {
        field: String,
        source_name: String,
        path: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("mixing {field}: {source}")]
    InvalidFieldPath {
        field: String,
        #[source]
        source: PathError,
    },
}

/// What `/v1/spider` should serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpiderTarget {
    /// No spider is configured.
    None,
    /// A jar on the local filesystem.
    File(PathBuf),
    /// An upstream URL to proxy.
    Remote(String),
}

struct Loaded {
    origin: String,
    kind: SourceKind,
    root: Value,
}

/// Parsed sources for the duration of one mix.
pub struct MixSession<'a> {
    cache: &'a SourceCache,
    documents: HashMap<String, Loaded>,
}

impl<'a> MixSession<'a> {
    pub fn new(cache: &'a SourceCache) -> Self {
        Self {
            cache,
            documents: HashMap::new(),
        }
    }

    async fn load(
        &mut self,
        field: &str,
        source_name: &str,
        expected: SourceKind,
    ) -> Result<&Loaded, MixError> {
        if !self.documents.contains_key(source_name) {
            let wrap = |source| MixError::Source {
                field: field.to_string(),
                source,
            };
            let descriptor = self.cache.descriptor(source_name).await.map_err(wrap)?;
            check_kind(field, source_name, expected, descriptor.kind)?;

            let bytes = self.cache.get_bytes(source_name).await.map_err(wrap)?;
            let root = serde_json::from_slice(&bytes).map_err(|source| MixError::MalformedDocument {
                field: field.to_string(),
                source_name: source_name.to_string(),
                source,
            })?;
            self.documents.insert(
                source_name.to_string(),
                Loaded {
                    origin: descriptor.uri,
                    kind: descriptor.kind,
                    root,
                },
            );
        }

        let loaded = &self.documents[source_name];
        check_kind(field, source_name, expected, loaded.kind)?;
        Ok(loaded)
    }

    /// Read one scalar, resolving a `./` value against the source's URI.
    pub async fn mix_field(
        &mut self,
        field: &str,
        spec: &MixFieldSpec,
        expected: SourceKind,
    ) -> Result<String, MixError> {
        let path = parse_path(field, &spec.field)?;
        let loaded = self.load(field, &spec.source_name, expected).await?;
        let value = path
            .lookup(&loaded.root)
            .map(value_as_string)
            .unwrap_or_default();
        Ok(resolve_relative(&value, &loaded.origin))
    }

    /// Read an array, keep the elements that pass the spec's filter, and
    /// decode each one as `T`.
    pub async fn mix_array<T>(
        &mut self,
        field: &str,
        spec: &MixArraySpec,
        expected: SourceKind,
    ) -> Result<Vec<T>, MixError>
    where
        T: DeserializeOwned + Rebase,
    {
        let path = parse_path(field, &spec.target.field)?;
        let source_name = &spec.target.source_name;
        let loaded = self.load(field, source_name, expected).await?;

        let Some(Value::Array(items)) = path.lookup(&loaded.root) else {
            return Ok(Vec::new());
        };
        let kept = filter_array(items, &spec.filter_by, &spec.include, &spec.exclude).map_err(
            |source| MixError::InvalidFilterPattern {
                field: field.to_string(),
                source,
            },
        )?;

        kept.into_iter()
            .enumerate()
            .map(|(index, element)| {
                T::deserialize(element)
                    .map(|item| item.rebase(&loaded.origin))
                    .map_err(|source| MixError::MalformedElement {
                        field: field.to_string(),
                        source_name: source_name.clone(),
                        path: spec.target.field.clone(),
                        index,
                        source,
                    })
            })
            .collect()
    }
}

fn parse_path(field: &str, raw: &str) -> Result<FieldPath, MixError> {
    FieldPath::parse(raw).map_err(|source| MixError::InvalidFieldPath {
        field: field.to_string(),
        source,
    })
}

fn check_kind(
    field: &str,
    source_name: &str,
    expected: SourceKind,
    actual: SourceKind,
) -> Result<(), MixError> {
    if expected == actual {
        return Ok(());
    }
    Err(MixError::KindMismatch {
        field: field.to_string(),
        source_name: source_name.to_string(),
        expected,
        actual,
    })
}

/// Build the single-repo document.
///
/// Spider, wallpaper and logo default to this service's own endpoints.  Every
/// enabled spec replaces its field with the mixed value, except that an empty
/// spider keeps the default.
pub async fn mix_single_repository(
    settings: &Settings,
    cache: &SourceCache,
) -> Result<RepoDocument, MixError> {
    let opt = &settings.single_repo_opt;
    let external = settings.external_url();
    let mut doc = RepoDocument {
        spider: format!("{external}/v1/spider"),
        wallpaper: format!("{external}/wallpaper?bg_color=333333&border_width=5&border_color=666666"),
        logo: format!("{external}/logo"),
        ..RepoDocument::default()
    };
    let mut session = MixSession::new(cache);
    let single = SourceKind::Single;

    // A local spider jar is served by /v1/spider, so the default link stands.
    if opt.spider.is_enabled() && opt.spider.local_file().is_none() {
        let spider = session.mix_field("spider", &opt.spider, single).await?;
        if !spider.is_empty() {
            doc.spider = spider;
        }
    }
    if opt.wallpaper.is_enabled() {
        doc.wallpaper = session.mix_field("wallpaper", &opt.wallpaper, single).await?;
    }
    if opt.logo.is_enabled() {
        doc.logo = session.mix_field("logo", &opt.logo, single).await?;
    }

    if opt.sites.is_enabled() {
        doc.sites = session.mix_array("sites", &opt.sites, single).await?;
    }
    if opt.doh.is_enabled() {
        doc.doh = session.mix_array("doh", &opt.doh, single).await?;
    }
    if opt.lives.is_enabled() {
        doc.lives = session.mix_array("lives", &opt.lives, single).await?;
    }
    if opt.parses.is_enabled() {
        doc.parses = session.mix_array("parses", &opt.parses, single).await?;
    }
    if opt.flags.is_enabled() {
        doc.flags = session.mix_array("flags", &opt.flags, single).await?;
    }
    if opt.rules.is_enabled() {
        doc.rules = session.mix_array("rules", &opt.rules, single).await?;
    }
    if opt.ads.is_enabled() {
        doc.ads = session.mix_array("ads", &opt.ads, single).await?;
    }

    debug!(
        sources = session.documents.len(),
        sites = doc.sites.len(),
        lives = doc.lives.len(),
        parses = doc.parses.len(),
        "mixed single repo"
    );
    Ok(doc)
}

/// Build the multi-repo index: the optional self entry, then each repo-list
/// spec's entries in configured order.
pub async fn mix_multi_repository(
    settings: &Settings,
    cache: &SourceCache,
) -> Result<MultiRepoDocument, MixError> {
    let opt = &settings.multi_repo_opt;
    let mut doc = MultiRepoDocument::default();
    if opt.include_single_repo {
        doc.repos.push(RepoUrl::new(
            SELF_REPO_NAME,
            format!("{}/v1/repo", settings.external_url()),
        ));
    }

    let mut session = MixSession::new(cache);
    for (i, spec) in opt.repos.iter().enumerate() {
        if !spec.is_enabled() {
            continue;
        }
        let repos: Vec<RepoUrl> = session
            .mix_array(&format!("repos[{i}]"), spec, SourceKind::Multi)
            .await?;
        doc.repos.extend(repos);
    }

    debug!(repos = doc.repos.len(), "mixed multi repo");
    Ok(doc)
}

/// Work out what `/v1/spider` serves.
///
/// Spider values often carry a checksum after a `;` (`url;md5;abc`), which is
/// dropped.
pub async fn resolve_spider(settings: &Settings, cache: &SourceCache) -> Result<SpiderTarget, MixError> {
    let spec = &settings.single_repo_opt.spider;
    if !spec.is_enabled() {
        return Ok(SpiderTarget::None);
    }
    if let Some(path) = spec.local_file() {
        return Ok(SpiderTarget::File(PathBuf::from(path)));
    }

    let value = MixSession::new(cache)
        .mix_field("spider", spec, SourceKind::Single)
        .await?;
    let url = value.split_once(';').map_or(value.as_str(), |(url, _)| url).trim();
    if url.is_empty() {
        Ok(SpiderTarget::None)
    } else {
        Ok(SpiderTarget::Remote(url.to_string()))
    }
}
