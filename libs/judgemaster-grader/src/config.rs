// Language configuration management for the grader
use anyhow::{bail, Context, Result};
use judgemaster_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::info;

pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 10_000;

/// Command line templates may reference `{dir}`, `{source}` and `{binary}`;
/// they are expanded against the execution artifact at launch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_compile_timeout")]
    pub timeout_ms: u64,
}

fn default_compile_timeout() -> u64 {
    DEFAULT_COMPILE_TIMEOUT_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageExecution {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub compile: Option<CompileStep>,
    /// Extra environment handed to the submission process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: Language,
    pub version: String,
    pub image: String,
    /// File name the submission is written to inside the artifact
    pub source_file: String,
    pub execution: LanguageExecution,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
}

/// Concrete locations a command template is expanded against.
#[derive(Debug, Clone)]
pub struct CommandPaths {
    pub dir: String,
    pub source: String,
    pub binary: String,
}

fn expand(template: &str, paths: &CommandPaths) -> String {
    template
        .replace("{dir}", &paths.dir)
        .replace("{source}", &paths.source)
        .replace("{binary}", &paths.binary)
}

impl LanguageConfig {
    pub fn needs_compilation(&self) -> bool {
        self.execution.compile.is_some()
    }

    pub fn run_command(&self, paths: &CommandPaths) -> (String, Vec<String>) {
        (
            expand(&self.execution.command, paths),
            self.execution.args.iter().map(|a| expand(a, paths)).collect(),
        )
    }

    pub fn compile_command(&self, paths: &CommandPaths) -> Option<(String, Vec<String>)> {
        self.execution.compile.as_ref().map(|step| {
            (
                expand(&step.command, paths),
                step.args.iter().map(|a| expand(a, paths)).collect(),
            )
        })
    }

    fn validate(&self) -> Result<()> {
        if self.execution.command.trim().is_empty() {
            bail!("Language '{}' has an empty run command", self.name);
        }
        if self.source_file.is_empty()
            || self.source_file.contains('/')
            || self.source_file.contains('\\')
            || self.source_file.starts_with('.')
        {
            bail!(
                "Language '{}' has an invalid source file name '{}'",
                self.name,
                self.source_file
            );
        }
        if let Some(step) = &self.execution.compile {
            if step.command.trim().is_empty() {
                bail!("Language '{}' has an empty compile command", self.name);
            }
            if step.timeout_ms == 0 {
                bail!("Language '{}' has a zero compile timeout", self.name);
            }
        }
        Ok(())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Built-in language table, used when no languages.json is present.
pub fn builtin_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            name: Language::Python,
            version: "3".to_string(),
            image: "python:3.12-slim".to_string(),
            source_file: "main.py".to_string(),
            execution: LanguageExecution {
                command: "python3".to_string(),
                args: strings(&["{source}"]),
                compile: None,
                env: BTreeMap::from([(
                    "PYTHONDONTWRITEBYTECODE".to_string(),
                    "1".to_string(),
                )]),
            },
            memory_limit_mb: 256,
            cpu_limit: 0.5,
        },
        LanguageConfig {
            name: Language::JavaScript,
            version: "20".to_string(),
            image: "node:20-slim".to_string(),
            source_file: "main.js".to_string(),
            execution: LanguageExecution {
                command: "node".to_string(),
                args: strings(&["{source}"]),
                compile: None,
                env: BTreeMap::new(),
            },
            memory_limit_mb: 256,
            cpu_limit: 0.5,
        },
        LanguageConfig {
            name: Language::Cpp,
            version: "17".to_string(),
            image: "gcc:13".to_string(),
            source_file: "main.cpp".to_string(),
            execution: LanguageExecution {
                command: "{binary}".to_string(),
                args: vec![],
                compile: Some(CompileStep {
                    command: "g++".to_string(),
                    args: strings(&["-O2", "-std=c++17", "-o", "{binary}", "{source}"]),
                    timeout_ms: DEFAULT_COMPILE_TIMEOUT_MS,
                }),
                env: BTreeMap::new(),
            },
            memory_limit_mb: 256,
            cpu_limit: 0.5,
        },
        LanguageConfig {
            name: Language::Java,
            version: "21".to_string(),
            image: "eclipse-temurin:21".to_string(),
            source_file: "Main.java".to_string(),
            execution: LanguageExecution {
                command: "java".to_string(),
                args: strings(&["-cp", "{dir}", "Main"]),
                compile: Some(CompileStep {
                    command: "javac".to_string(),
                    args: strings(&["-d", "{dir}", "{source}"]),
                    timeout_ms: 20_000,
                }),
                env: BTreeMap::new(),
            },
            memory_limit_mb: 512,
            cpu_limit: 1.0,
        },
    ]
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// The set of languages the grader accepts, keyed by language tag.
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    pub fn builtin() -> Self {
        Self::from_configs(builtin_languages())
    }

    pub fn from_configs(configs: Vec<LanguageConfig>) -> Self {
        Self {
            configs: configs.into_iter().map(|c| (c.name, c)).collect(),
        }
    }

    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to load {}", config_path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        if languages_json.languages.is_empty() {
            bail!("No languages configured");
        }

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            lang.validate()?;
            if configs.contains_key(&lang.name) {
                bail!("Language '{}' is configured more than once", lang.name);
            }
            configs.insert(lang.name, lang);
        }

        Ok(Self { configs })
    }

    /// Use the file when it exists, otherwise fall back to the built-in table
    pub fn load_or_builtin(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            info!(
                path = %config_path.display(),
                "No language config file, using built-in language table"
            );
            Ok(Self::builtin())
        }
    }

    /// Register or replace a language entry
    pub fn insert(&mut self, config: LanguageConfig) {
        self.configs.insert(config.name, config);
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Option<&LanguageConfig> {
        self.configs.get(language)
    }

    pub fn is_supported(&self, language: &Language) -> bool {
        self.configs.contains_key(language)
    }

    /// List all supported languages, in a stable order
    pub fn list_languages(&self) -> Vec<Language> {
        Language::ALL
            .into_iter()
            .filter(|l| self.configs.contains_key(l))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> CommandPaths {
        CommandPaths {
            dir: "/tmp/run".to_string(),
            source: "/tmp/run/main.cpp".to_string(),
            binary: "/tmp/run/main".to_string(),
        }
    }

    #[test]
    fn test_builtin_table_is_valid() {
        for config in builtin_languages() {
            config.validate().unwrap();
        }
        let manager = LanguageConfigManager::builtin();
        assert_eq!(manager.list_languages(), Language::ALL.to_vec());
    }

    #[test]
    fn test_command_expansion() {
        let manager = LanguageConfigManager::builtin();
        let cpp = manager.get_config(&Language::Cpp).unwrap();

        let (program, args) = cpp.compile_command(&paths()).unwrap();
        assert_eq!(program, "g++");
        assert_eq!(args, vec!["-O2", "-std=c++17", "-o", "/tmp/run/main", "/tmp/run/main.cpp"]);

        let (program, args) = cpp.run_command(&paths());
        assert_eq!(program, "/tmp/run/main");
        assert!(args.is_empty());

        let python = manager.get_config(&Language::Python).unwrap();
        assert!(!python.needs_compilation());
        assert!(python.compile_command(&paths()).is_none());
    }

    #[test]
    fn test_parse_restricts_supported_set() {
        let json = r#"{
            "languages": [{
                "name": "python",
                "version": "3.11",
                "image": "python:3.11-slim",
                "source_file": "solution.py",
                "execution": {"command": "python3", "args": ["-I", "{source}"]},
                "memory_limit_mb": 128,
                "cpu_limit": 0.25
            }]
        }"#;
        let manager = LanguageConfigManager::parse(json).unwrap();

        assert!(manager.is_supported(&Language::Python));
        assert!(!manager.is_supported(&Language::Java));
        assert_eq!(manager.list_languages(), vec![Language::Python]);
        let python = manager.get_config(&Language::Python).unwrap();
        assert_eq!(python.source_file, "solution.py");
        assert!(python.execution.env.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        let traversal = r#"{"languages": [{
            "name": "python", "version": "3", "image": "x",
            "source_file": "../main.py",
            "execution": {"command": "python3"},
            "memory_limit_mb": 1, "cpu_limit": 1.0
        }]}"#;
        assert!(LanguageConfigManager::parse(traversal).is_err());

        let duplicate = r#"{"languages": [
            {"name": "python", "version": "3", "image": "x", "source_file": "a.py",
             "execution": {"command": "python3"}, "memory_limit_mb": 1, "cpu_limit": 1.0},
            {"name": "py", "version": "3", "image": "x", "source_file": "b.py",
             "execution": {"command": "python3"}, "memory_limit_mb": 1, "cpu_limit": 1.0}
        ]}"#;
        assert!(LanguageConfigManager::parse(duplicate).is_err());

        assert!(LanguageConfigManager::parse(r#"{"languages": []}"#).is_err());
    }

    #[test]
    fn test_shipped_config_matches_builtin_set() {
        let manager = LanguageConfigManager::parse(include_str!("../../../config/languages.json")).unwrap();

        assert_eq!(manager.list_languages(), Language::ALL.to_vec());
        let java = manager.get_config(&Language::Java).unwrap();
        assert!(java.needs_compilation());
        assert_eq!(java.memory_limit_mb, 512);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(LanguageConfigManager::load(Path::new("/nonexistent/languages.json")).is_err());
        let manager =
            LanguageConfigManager::load_or_builtin(Path::new("/nonexistent/languages.json")).unwrap();
        assert!(manager.is_supported(&Language::Python));
    }
}
