// Runtime settings shared by the API and the CLI.
// Everything is read from environment variables with sensible defaults.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_STDERR_BUDGET: usize = 300;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Which execution backend runs submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Local subprocess with a hard wall-clock timeout
    #[default]
    Process,
    /// One Docker container per run, with memory/CPU/network limits
    Docker,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "process" | "local" => Ok(BackendKind::Process),
            "docker" => Ok(BackendKind::Docker),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Process => f.write_str("process"),
            BackendKind::Docker => f.write_str("docker"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct SettingsError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub problems_dir: PathBuf,
    pub languages_config: PathBuf,
    pub default_timeout_ms: u64,
    /// Characters of stderr kept in results and feedback
    pub stderr_budget: usize,
    pub backend: BackendKind,
    pub max_concurrent: usize,
    pub bind_addr: String,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            problems_dir: PathBuf::from("problems"),
            languages_config: PathBuf::from("config/languages.json"),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            stderr_budget: DEFAULT_STDERR_BUDGET,
            backend: BackendKind::Process,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            bind_addr: "0.0.0.0:3000".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let problems_dir = lookup("JUDGEMASTER_PROBLEMS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.problems_dir);
        let languages_config = lookup("JUDGEMASTER_LANGUAGES_CONFIG")
            .map(PathBuf::from)
            .unwrap_or(defaults.languages_config);
        let default_timeout_ms = parse_var(&lookup, "JUDGEMASTER_DEFAULT_TIMEOUT_MS")?
            .unwrap_or(defaults.default_timeout_ms);
        let stderr_budget =
            parse_var(&lookup, "JUDGEMASTER_STDERR_BUDGET")?.unwrap_or(defaults.stderr_budget);
        let backend = parse_var(&lookup, "JUDGEMASTER_BACKEND")?.unwrap_or(defaults.backend);
        let max_concurrent =
            parse_var(&lookup, "JUDGEMASTER_MAX_CONCURRENT")?.unwrap_or(defaults.max_concurrent);
        let bind_addr = lookup("JUDGEMASTER_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let log_json = parse_var(&lookup, "JUDGEMASTER_LOG_JSON")?.unwrap_or(defaults.log_json);

        if default_timeout_ms == 0 {
            return Err(SettingsError {
                key: "JUDGEMASTER_DEFAULT_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "timeout must be positive".to_string(),
            });
        }
        if max_concurrent == 0 {
            return Err(SettingsError {
                key: "JUDGEMASTER_MAX_CONCURRENT",
                value: "0".to_string(),
                reason: "at least one concurrent grading is required".to_string(),
            });
        }

        Ok(Self {
            problems_dir,
            languages_config,
            default_timeout_ms,
            stderr_budget,
            backend,
            max_concurrent,
            bind_addr,
            log_json,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| SettingsError {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
