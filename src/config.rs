use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env, fs, path::PathBuf};
use url::Url;

use crate::error::{ExecutorError, Result};
use crate::job::SavepointRestoreSettings;
use crate::types::{JobId, JobName};

/// Configuration keys understood by the executor and the bundled backends.
pub mod options {
    /// Archives whose bundled libraries ship with the job (list of URLs).
    pub const JARS: &str = "pipeline.jars";
    /// Extra search-path entries for user code (list of URLs).
    pub const CLASSPATHS: &str = "pipeline.classpaths";
    /// Job name; defaults to the pipeline's own name.
    pub const JOB_NAME: &str = "pipeline.name";
    /// Pin the job id instead of generating one.
    pub const FIXED_JOB_ID: &str = "pipeline.fixed-job-id";
    /// Special runtime mode that pulls in the python runtime library.
    pub const IS_PYTHON: &str = "pipeline.internal.is-python";
    /// Wait for the job result instead of returning after submission.
    pub const ATTACHED: &str = "execution.attached";
    /// Name of the cluster backend to submit to.
    pub const TARGET: &str = "execution.target";
    pub const SAVEPOINT_PATH: &str = "execution.savepoint.path";
    pub const SAVEPOINT_IGNORE_UNCLAIMED_STATE: &str =
        "execution.savepoint.ignore-unclaimed-state";
    pub const DEFAULT_PARALLELISM: &str = "parallelism.default";
    pub const REST_ADDRESS: &str = "rest.address";
    pub const REST_PORT: &str = "rest.port";
    pub const REST_RESULT_POLL_INTERVAL: &str = "rest.result-poll-interval";
    pub const CLIENT_TIMEOUT: &str = "client.timeout";
}

/// A single typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<String>),
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Integer(v)
    }
}

impl From<u32> for ConfigValue {
    fn from(v: u32) -> Self {
        ConfigValue::Integer(v.into())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(v: Vec<String>) -> Self {
        ConfigValue::List(v)
    }
}

/// Immutable-by-convention key/value configuration.
///
/// Getters are lenient about representation (a bool may be given as the
/// string `"true"`, a list as a `;`-separated string) but strict about
/// meaning: a value that cannot be read as the requested type is a
/// precondition error naming the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: BTreeMap<String, ConfigValue>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Apply a `key=value` property, as given on the command line.
    pub fn set_property(&mut self, property: &str) -> Result<()> {
        let (key, value) = property.split_once('=').ok_or_else(|| {
            ExecutorError::precondition(format!(
                "Property `{}` must have the form key=value",
                property
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ExecutorError::precondition(format!(
                "Property `{}` has an empty key",
                property
            )));
        }
        self.set(key, value.trim());
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::String(s)) => Ok(Some(s.clone())),
            Some(ConfigValue::Integer(i)) => Ok(Some(i.to_string())),
            Some(ConfigValue::Bool(b)) => Ok(Some(b.to_string())),
            Some(ConfigValue::List(_)) => Err(type_mismatch(key, "a string")),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Bool(b)) => Ok(Some(*b)),
            Some(ConfigValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(type_mismatch(key, "a boolean")),
            },
            Some(_) => Err(type_mismatch(key, "a boolean")),
        }
    }

    pub fn get_integer(&self, key: &str) -> Result<Option<i64>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Integer(i)) => Ok(Some(*i)),
            Some(ConfigValue::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| type_mismatch(key, "an integer")),
            Some(_) => Err(type_mismatch(key, "an integer")),
        }
    }

    /// A missing key reads as an empty list.
    pub fn get_list(&self, key: &str) -> Result<Vec<String>> {
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(ConfigValue::List(items)) => Ok(items.clone()),
            Some(ConfigValue::String(s)) => Ok(s
                .split(';')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()),
            Some(_) => Err(type_mismatch(key, "a list")),
        }
    }

    /// Read a list of locations. Absolute filesystem paths are accepted and
    /// turned into `file://` URLs.
    pub fn get_urls(&self, key: &str) -> Result<Vec<Url>> {
        self.get_list(key)?
            .iter()
            .map(|raw| parse_location(raw).map_err(|reason| {
                ExecutorError::precondition(format!(
                    "Invalid location `{}` in `{}`: {}",
                    raw, key, reason
                ))
            }))
            .collect()
    }
}

fn type_mismatch(key: &str, expected: &str) -> ExecutorError {
    ExecutorError::precondition(format!("Configuration value `{}` is not {}", key, expected))
}

fn parse_location(raw: &str) -> std::result::Result<Url, String> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = PathBuf::from(raw);
            if !path.is_absolute() {
                return Err("relative paths are not supported".to_string());
            }
            Url::from_file_path(&path).map_err(|_| "not a valid file path".to_string())
        }
        Err(e) => Err(e.to_string()),
    }
}

/// The execution-related view of a [`Configuration`], read once per submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSettings {
    pub jars: Vec<Url>,
    pub classpaths: Vec<Url>,
    pub detached: bool,
    pub special_runtime_mode: bool,
    pub parallelism: u32,
    pub savepoint: SavepointRestoreSettings,
    pub job_name: Option<JobName>,
    pub fixed_job_id: Option<JobId>,
}

impl ExecutionSettings {
    pub fn from_configuration(configuration: &Configuration) -> Result<Self> {
        let parallelism = match configuration.get_integer(options::DEFAULT_PARALLELISM)? {
            None => 1,
            Some(p) if p >= 1 && p <= i64::from(u32::MAX) => p as u32,
            Some(p) => {
                return Err(ExecutorError::precondition(format!(
                    "`{}` must be a positive integer, got {}",
                    options::DEFAULT_PARALLELISM,
                    p
                )));
            }
        };

        let savepoint = match configuration.get_string(options::SAVEPOINT_PATH)? {
            Some(path) if !path.trim().is_empty() => SavepointRestoreSettings::for_path(
                path.trim(),
                configuration
                    .get_bool(options::SAVEPOINT_IGNORE_UNCLAIMED_STATE)?
                    .unwrap_or(false),
            ),
            _ => SavepointRestoreSettings::none(),
        };

        let fixed_job_id = configuration
            .get_string(options::FIXED_JOB_ID)?
            .map(|raw| JobId::parse(&raw))
            .transpose()?;

        Ok(Self {
            jars: configuration.get_urls(options::JARS)?,
            classpaths: configuration.get_urls(options::CLASSPATHS)?,
            detached: !configuration.get_bool(options::ATTACHED)?.unwrap_or(false),
            special_runtime_mode: configuration.get_bool(options::IS_PYTHON)?.unwrap_or(false),
            parallelism,
            savepoint,
            job_name: configuration.get_string(options::JOB_NAME)?.map(JobName::from),
            fixed_job_id,
        })
    }
}

pub fn resolve_config_path(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p);
    }

    if let Ok(p) = env::var("SESSION_EXECUTOR_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg)
            .join("session-executor")
            .join("config.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("executor.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "No configuration file found (use --config, SESSION_EXECUTOR_CONFIG or ./executor.json)"
    ))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            while let Some(c) = chars.next() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_value(value: ConfigValue) -> ConfigValue {
    match value {
        ConfigValue::String(s) => ConfigValue::String(expand_env_vars(&s)),
        ConfigValue::List(items) => {
            ConfigValue::List(items.into_iter().map(|i| expand_env_vars(&i)).collect())
        }
        other => other,
    }
}

/// Parse a configuration document, expanding `${VAR}` references in string values.
pub fn parse_configuration(raw: &str) -> anyhow::Result<Configuration> {
    let parsed: BTreeMap<String, ConfigValue> = serde_json::from_str(raw)?;
    let entries = parsed
        .into_iter()
        .map(|(key, value)| (key, expand_value(value)))
        .collect();
    Ok(Configuration { entries })
}

pub fn load_configuration(explicit: Option<PathBuf>) -> anyhow::Result<Configuration> {
    let path = resolve_config_path(explicit)?;
    let raw = fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    parse_configuration(&raw)
}
