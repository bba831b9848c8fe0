//! Process configuration.
//!
//! Settings come from a TOML, YAML or JSON file (picked by extension, TOML
//! otherwise), are adjusted by `TVBOX_MIXPROXY_*` environment variables, and
//! finally by command-line flags (see `main`).  When no file is given the
//! service looks for `.tvbox_mixproxy.{toml,yaml,yml,json}` in the working
//! directory, then in `$HOME`, and otherwise runs on defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::mixer::{ElementFilter, FieldPath};
use crate::source::{CachePolicy, SourceDescriptor};

pub const CONFIG_FILE_STEM: &str = ".tvbox_mixproxy";
const CONFIG_EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];
const ENV_PREFIX: &str = "TVBOX_MIXPROXY_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("config invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_port: u16,
    /// Public base URL of this service, used for self-referencing links.
    /// Empty means `http://localhost:<server_port>`.
    pub external_url: String,
    pub log: LogSettings,
    pub cache: CacheSettings,
    pub sources: Vec<SourceDescriptor>,
    pub single_repo_opt: SingleRepoSpec,
    pub multi_repo_opt: MultiRepoSpec,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_port: 8080,
            external_url: String::new(),
            log: LogSettings::default(),
            cache: CacheSettings::default(),
            sources: Vec::new(),
            single_repo_opt: SingleRepoSpec::default(),
            multi_repo_opt: MultiRepoSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `stdout`, or a file path for a daily-rolling log file.
    pub output: String,
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or
    /// `tvbox_mixproxy=debug,info`.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            output: "stdout".into(),
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub tick_seconds: u64,
    pub fetch_timeout_seconds: u64,
    /// Unset serves the last good payload forever when refreshes fail.
    pub max_stale_seconds: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            fetch_timeout_seconds: 30,
            max_stale_seconds: None,
        }
    }
}

impl CacheSettings {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            tick: Duration::from_secs(self.tick_seconds.max(1)),
            max_stale: self.max_stale_seconds.map(Duration::from_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds.max(1))
    }
}

/// Pick one scalar field out of a named source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MixFieldSpec {
    pub source_name: String,
    pub field: String,
    pub disabled: bool,
}

impl MixFieldSpec {
    #[cfg(test)]
    pub fn new(source_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            field: field.into(),
            disabled: false,
        }
    }

    /// A spec without a source name counts as unset.
    pub fn is_enabled(&self) -> bool {
        !self.disabled && !self.source_name.is_empty()
    }

    /// The path of a `file://` source name, which the spider may use in place
    /// of a configured source.
    pub fn local_file(&self) -> Option<&str> {
        self.source_name.strip_prefix("file://")
    }
}

/// Pick an array out of a named source, optionally filtering its elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MixArraySpec {
    #[serde(flatten)]
    pub target: MixFieldSpec,
    pub filter_by: String,
    pub include: String,
    pub exclude: String,
}

impl MixArraySpec {
    #[cfg(test)]
    pub fn new(source_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            target: MixFieldSpec::new(source_name, field),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn filtered(
        mut self,
        filter_by: impl Into<String>,
        include: impl Into<String>,
        exclude: impl Into<String>,
    ) -> Self {
        self.filter_by = filter_by.into();
        self.include = include.into();
        self.exclude = exclude.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_enabled()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SingleRepoSpec {
    pub disable: bool,
    pub spider: MixFieldSpec,
    pub wallpaper: MixFieldSpec,
    pub logo: MixFieldSpec,
    pub sites: MixArraySpec,
    pub doh: MixArraySpec,
    pub lives: MixArraySpec,
    pub parses: MixArraySpec,
    pub flags: MixArraySpec,
    pub rules: MixArraySpec,
    pub ads: MixArraySpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MultiRepoSpec {
    pub disable: bool,
    /// Prepend an entry pointing at this service's own `/v1/repo`.
    pub include_single_repo: bool,
    pub repos: Vec<MixArraySpec>,
}

impl Settings {
    /// Load settings from `path`, or from the first default location that
    /// exists, then apply environment overrides, defaults and validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path.map(Path::to_path_buf).or_else(find_default_file) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        settings.apply_defaults();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path.extension().and_then(|e| e.to_str());
        let parsed: Result<Self, Box<dyn std::error::Error + Send + Sync>> = match extension {
            Some("yaml" | "yml") => serde_yaml_ng::from_str(&content).map_err(Into::into),
            Some("json") => serde_json::from_str(&content).map_err(Into::into),
            _ => toml::from_str(&content).map_err(Into::into),
        };
        parsed.map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Base URL for links back into this service, without a trailing slash.
    pub fn external_url(&self) -> String {
        let url = self.external_url.trim().trim_end_matches('/');
        if url.is_empty() {
            format!("http://localhost:{}", self.server_port)
        } else {
            url.to_string()
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(port) = var("SERVER_PORT") {
            self.server_port = port.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_PREFIX}SERVER_PORT `{port}` is not a port"))
            })?;
        }
        if let Some(url) = var("EXTERNAL_URL") {
            self.external_url = url;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(output) = var("LOG_OUTPUT") {
            self.log.output = output;
        }
        Ok(())
    }

    /// Fill in the field names every TVBox manifest uses when a spec leaves
    /// them blank.
    pub fn apply_defaults(&mut self) {
        let single = &mut self.single_repo_opt;
        default_field(&mut single.spider, "spider");
        default_field(&mut single.wallpaper, "wallpaper");
        default_field(&mut single.logo, "logo");
        default_field(&mut single.sites.target, "sites");
        default_field(&mut single.doh.target, "doh");
        default_field(&mut single.lives.target, "lives");
        default_field(&mut single.parses.target, "parses");
        default_field(&mut single.flags.target, "flags");
        default_field(&mut single.rules.target, "rules");
        default_field(&mut single.ads.target, "ads");

        for repo in &mut self.multi_repo_opt.repos {
            default_field(&mut repo.target, "urls");
            if repo.filter_by.is_empty() {
                repo.filter_by = "name".into();
            }
        }
    }

    /// Reject configurations that could only fail at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid("a source has an empty name".into()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name `{}`",
                    source.name
                )));
            }
        }

        let single = &self.single_repo_opt;
        let fields = [
            ("spider", &single.spider),
            ("wallpaper", &single.wallpaper),
            ("logo", &single.logo),
        ];
        for (label, spec) in fields {
            if label == "spider" && spec.local_file().is_some() {
                continue;
            }
            check_field(label, spec, &names)?;
        }

        let arrays = [
            ("sites", &single.sites),
            ("doh", &single.doh),
            ("lives", &single.lives),
            ("parses", &single.parses),
            ("flags", &single.flags),
            ("rules", &single.rules),
            ("ads", &single.ads),
        ];
        for (label, spec) in arrays {
            check_array(label, spec, &names)?;
        }
        for (i, spec) in self.multi_repo_opt.repos.iter().enumerate() {
            check_array(&format!("repos[{i}]"), spec, &names)?;
        }
        Ok(())
    }
}

fn find_default_file() -> Option<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    std::iter::once(PathBuf::from("."))
        .chain(home)
        .flat_map(|dir| {
            CONFIG_EXTENSIONS
                .iter()
                .map(move |ext| dir.join(format!("{CONFIG_FILE_STEM}.{ext}")))
        })
        .find(|path| path.is_file())
}

fn default_field(spec: &mut MixFieldSpec, field: &str) {
    if spec.field.is_empty() {
        spec.field = field.to_string();
    }
}

fn check_field(label: &str, spec: &MixFieldSpec, names: &HashSet<&str>) -> Result<(), ConfigError> {
    if !spec.is_enabled() {
        return Ok(());
    }
    if !names.contains(spec.source_name.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "{label}: unknown source `{}`",
            spec.source_name
        )));
    }
    FieldPath::parse(&spec.field).map_err(|e| ConfigError::Invalid(format!("{label}: {e}")))?;
    Ok(())
}

fn check_array(label: &str, spec: &MixArraySpec, names: &HashSet<&str>) -> Result<(), ConfigError> {
    check_field(label, &spec.target, names)?;
    if spec.is_enabled() {
        ElementFilter::new(&spec.filter_by, &spec.include, &spec.exclude)
            .map_err(|e| ConfigError::Invalid(format!("{label}: {e}")))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
