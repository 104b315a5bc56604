//! Configuration for ARV, read from `.arv/arv.toml`.
//!
//! Settings are layered file → environment → CLI. Every section is
//! optional; a missing file means all defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! backend = "sqlite"          # or "memory"
//! path = ".arv/arv.db"
//!
//! [judge]
//! backend = "anthropic"       # or "random"
//! repetitions = 3
//! timeout_secs = 120
//! model = "claude-sonnet-4-20250514"
//! prompt_file = ".arv/judge_prompt.txt"
//!
//! [investment]
//! backend = "paper"
//! timeout_secs = 60
//! stake = 2.0
//! settle_after_secs = 300
//!
//! [sweeper]
//! enabled = true
//! interval_secs = 30
//!
//! [images]
//! dir = "public/images"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3142
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const ARV_DIR: &str = ".arv";
pub const CONFIG_FILE: &str = "arv.toml";

/// Overrides `[judge] repetitions`.
pub const JUDGE_COUNT_ENV: &str = "ARV_JUDGE_COUNT";
/// Older name for `ARV_JUDGE_COUNT`, still honoured.
pub const LEGACY_JUDGE_COUNT_ENV: &str = "JUDGE_COUNT";
pub const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Sqlite => write!(f, "sqlite"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeBackend {
    #[default]
    Anthropic,
    Random,
}

impl std::fmt::Display for JudgeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JudgeBackend::Anthropic => write!(f, "anthropic"),
            JudgeBackend::Random => write!(f, "random"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestmentBackend {
    #[default]
    Paper,
}

impl std::fmt::Display for InvestmentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvestmentBackend::Paper => write!(f, "paper"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Database file, relative to the project directory
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(ARV_DIR).join("arv.db")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSection {
    #[serde(default)]
    pub backend: JudgeBackend,
    /// Judgments per session, majority-voted
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,
    /// Per-judgment timeout
    #[serde(default = "default_judge_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_model")]
    pub model: String,
    /// Prompt template with `{{IMAGE_A}}`, `{{IMAGE_B}}` and `{{IMPRESSIONS}}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<PathBuf>,
}

fn default_repetitions() -> usize {
    1
}

fn default_judge_timeout_secs() -> u64 {
    120
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

impl Default for JudgeSection {
    fn default() -> Self {
        Self {
            backend: JudgeBackend::default(),
            repetitions: default_repetitions(),
            timeout_secs: default_judge_timeout_secs(),
            model: default_model(),
            prompt_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentSection {
    #[serde(default)]
    pub backend: InvestmentBackend,
    #[serde(default = "default_investment_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_stake")]
    pub stake: f64,
    /// Paper exchange only: seconds before a placed order clears
    #[serde(default = "default_settle_after_secs")]
    pub settle_after_secs: u64,
}

fn default_investment_timeout_secs() -> u64 {
    60
}

fn default_stake() -> f64 {
    2.0
}

fn default_settle_after_secs() -> u64 {
    300
}

impl Default for InvestmentSection {
    fn default() -> Self {
        Self {
            backend: InvestmentBackend::default(),
            timeout_secs: default_investment_timeout_secs(),
            stake: default_stake(),
            settle_after_secs: default_settle_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesSection {
    #[serde(default = "default_images_dir")]
    pub dir: PathBuf,
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("public/images")
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            dir: default_images_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3142
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// The complete arv.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArvToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub judge: JudgeSection,
    #[serde(default)]
    pub investment: InvestmentSection,
    #[serde(default)]
    pub sweeper: SweeperSection,
    #[serde(default)]
    pub images: ImagesSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ArvToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse arv.toml")
    }

    /// Load `<arv_dir>/arv.toml`, or defaults if it does not exist.
    pub fn load_or_default(arv_dir: &Path) -> Result<Self> {
        let config_path = arv_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize arv.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.judge.repetitions == 0 {
            warnings.push("judge.repetitions is 0; one judgment will be made".to_string());
        } else if self.judge.repetitions % 2 == 0 {
            warnings.push(format!(
                "judge.repetitions is {}; an odd count avoids tie-breaks",
                self.judge.repetitions
            ));
        }
        if self.judge.timeout_secs == 0 {
            warnings.push("judge.timeout_secs is 0; every judgment will time out".to_string());
        }
        if self.investment.timeout_secs == 0 {
            warnings.push("investment.timeout_secs is 0; every wager call will time out".to_string());
        }
        if self.investment.stake <= 0.0 {
            warnings.push(format!(
                "investment.stake must be positive, got {}",
                self.investment.stake
            ));
        }
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            warnings.push("sweeper.interval_secs is 0; sweeper would spin".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging.level '{}'", self.logging.level));
        }

        warnings
    }
}

/// Resolve the judge repetition count from an environment value and the file setting.
fn resolve_repetitions(env_value: Option<&str>, file_value: usize) -> usize {
    env_value
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(file_value)
}

/// Runtime configuration for ARV.
///
/// It merges settings from:
/// 1. arv.toml file
/// 2. Environment variables (and `.env`)
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct ArvConfig {
    pub project_dir: PathBuf,
    pub arv_dir: PathBuf,
    pub toml: ArvToml,
    pub verbose: bool,
    pub cli_db_path: Option<PathBuf>,
    pub cli_port: Option<u16>,
    pub cli_images_dir: Option<PathBuf>,
}

impl ArvConfig {
    /// Create a new ArvConfig from a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let arv_dir = project_dir.join(ARV_DIR);
        let toml = ArvToml::load_or_default(&arv_dir)?;

        Ok(Self {
            project_dir,
            arv_dir,
            toml,
            verbose: false,
            cli_db_path: None,
            cli_port: None,
            cli_images_dir: None,
        })
    }

    /// Create ArvConfig with CLI overrides.
    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, db_path: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_db_path = db_path;
        Ok(config)
    }

    pub fn config_path(&self) -> PathBuf {
        self.arv_dir.join(CONFIG_FILE)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Database path (CLI → file → default).
    pub fn db_path(&self) -> PathBuf {
        let path = self.cli_db_path.as_deref().unwrap_or(&self.toml.store.path);
        self.resolve(path)
    }

    /// Image directory (CLI → file → default).
    pub fn images_dir(&self) -> PathBuf {
        let dir = self.cli_images_dir.as_deref().unwrap_or(&self.toml.images.dir);
        self.resolve(dir)
    }

    /// Server port (CLI → file → default).
    pub fn port(&self) -> u16 {
        self.cli_port.unwrap_or(self.toml.server.port)
    }

    /// Judge repetitions (env → file → default).
    pub fn judge_repetitions(&self) -> usize {
        let env = std::env::var(JUDGE_COUNT_ENV)
            .or_else(|_| std::env::var(LEGACY_JUDGE_COUNT_ENV))
            .ok();
        resolve_repetitions(env.as_deref(), self.toml.judge.repetitions)
    }

    pub fn judge_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.judge.timeout_secs)
    }

    pub fn investment_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.investment.timeout_secs)
    }

    pub fn settle_after(&self) -> Duration {
        Duration::from_secs(self.toml.investment.settle_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.toml.sweeper.interval_secs.max(1))
    }

    pub fn anthropic_api_key(&self) -> Option<String> {
        std::env::var(ANTHROPIC_KEY_ENV).ok().filter(|k| !k.trim().is_empty())
    }

    /// Custom judge prompt, if `judge.prompt_file` is set.
    pub fn judge_prompt(&self) -> Result<Option<String>> {
        match &self.toml.judge.prompt_file {
            Some(path) => {
                let path = self.resolve(path);
                let prompt = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read judge prompt: {}", path.display()))?;
                Ok(Some(prompt))
            }
            None => Ok(None),
        }
    }

    /// Log filter level; `--verbose` forces debug.
    pub fn log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.toml.logging.level
        }
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.toml.judge.backend == JudgeBackend::Anthropic && self.anthropic_api_key().is_none() {
            warnings.push(format!(
                "judge.backend is anthropic but {} is not set",
                ANTHROPIC_KEY_ENV
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let toml = ArvToml::parse("").unwrap();
        assert_eq!(toml.store.backend, StoreBackend::Sqlite);
        assert_eq!(toml.store.path, PathBuf::from(".arv/arv.db"));
        assert_eq!(toml.judge.backend, JudgeBackend::Anthropic);
        assert_eq!(toml.judge.repetitions, 1);
        assert_eq!(toml.judge.timeout_secs, 120);
        assert_eq!(toml.investment.timeout_secs, 60);
        assert!(toml.sweeper.enabled);
        assert_eq!(toml.sweeper.interval_secs, 30);
        assert_eq!(toml.images.dir, PathBuf::from("public/images"));
        assert_eq!(toml.server.port, 3142);
        assert_eq!(toml.logging.level, "info");
        assert!(!toml.logging.json);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let toml = ArvToml::parse(
            r#"
            [judge]
            backend = "random"
            repetitions = 3

            [sweeper]
            interval_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(toml.judge.backend, JudgeBackend::Random);
        assert_eq!(toml.judge.repetitions, 3);
        assert_eq!(toml.judge.timeout_secs, 120);
        assert_eq!(toml.sweeper.interval_secs, 5);
        assert!(toml.sweeper.enabled);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        let err = ArvToml::parse("[store]\nbackend = \"postgres\"\n").unwrap_err();
        assert!(err.to_string().contains("arv.toml"));
    }

    #[test]
    fn test_backend_display_matches_toml_names() {
        let toml = ArvToml::parse(
            "[store]\nbackend = \"memory\"\n[judge]\nbackend = \"random\"\n[investment]\nbackend = \"paper\"\n",
        )
        .unwrap();
        assert_eq!(toml.store.backend.to_string(), "memory");
        assert_eq!(toml.judge.backend.to_string(), "random");
        assert_eq!(toml.investment.backend.to_string(), "paper");

        let reparsed = ArvToml::parse(&toml::to_string(&toml).unwrap()).unwrap();
        assert_eq!(reparsed.store.backend, StoreBackend::Memory);
        assert_eq!(reparsed.judge.backend, JudgeBackend::Random);
    }

    #[test]
    fn test_validate_flags_suspicious_values() {
        let mut toml = ArvToml::default();
        toml.judge.repetitions = 0;
        toml.sweeper.interval_secs = 0;
        toml.investment.stake = 0.0;
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("repetitions")));
        assert!(warnings.iter().any(|w| w.contains("interval_secs")));
        assert!(warnings.iter().any(|w| w.contains("stake")));

        toml = ArvToml::default();
        toml.judge.repetitions = 2;
        assert!(toml.validate()[0].contains("odd"));
    }

    #[test]
    fn test_resolve_repetitions() {
        assert_eq!(resolve_repetitions(None, 3), 3);
        assert_eq!(resolve_repetitions(Some("5"), 3), 5);
        assert_eq!(resolve_repetitions(Some(" 7 "), 3), 7);
        assert_eq!(resolve_repetitions(Some("many"), 3), 3);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = ArvToml::default();
        toml.judge.prompt_file = Some(PathBuf::from("prompt.txt"));
        toml.server.port = 8080;
        toml.save(&path).unwrap();

        let loaded = ArvToml::load(&path).unwrap();
        assert_eq!(loaded.server.port, 8080);
        assert_eq!(loaded.judge.prompt_file, Some(PathBuf::from("prompt.txt")));
    }

    #[test]
    fn test_config_resolves_paths_and_cli_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(ARV_DIR)).unwrap();
        std::fs::write(
            dir.path().join(ARV_DIR).join(CONFIG_FILE),
            "[images]\ndir = \"pics\"\n[server]\nport = 9000\n",
        )
        .unwrap();

        let mut config = ArvConfig::with_cli_args(dir.path().to_path_buf(), true, None).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.images_dir(), root.join("pics"));
        assert_eq!(config.db_path(), root.join(".arv/arv.db"));
        assert_eq!(config.port(), 9000);
        assert_eq!(config.log_level(), "debug");

        config.cli_port = Some(1234);
        config.cli_db_path = Some(PathBuf::from("/tmp/elsewhere.db"));
        assert_eq!(config.port(), 1234);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/elsewhere.db"));
    }

    #[test]
    fn test_judge_prompt_file() {
        let dir = TempDir::new().unwrap();
        let mut config = ArvConfig::new(dir.path().to_path_buf()).unwrap();
        assert!(config.judge_prompt().unwrap().is_none());

        std::fs::write(dir.path().join("prompt.txt"), "{{IMPRESSIONS}}").unwrap();
        config.toml.judge.prompt_file = Some(PathBuf::from("prompt.txt"));
        assert_eq!(config.judge_prompt().unwrap().as_deref(), Some("{{IMPRESSIONS}}"));

        config.toml.judge.prompt_file = Some(PathBuf::from("missing.txt"));
        assert!(config.judge_prompt().is_err());
    }
}
