//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the file given on the command line or named by `MENTORA_CONFIG`),
//! then applies `MENTORA_WORK_DIR`
//! and `MENTORA_LOG_LEVEL` env overrides. The LLM API key is env-only.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whether the HTTP/WebSocket channel is started.
    pub enabled: bool,
    /// Socket address to bind the HTTP channel to.
    pub bind: String,
}

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature used when a call does not set its own.
    pub temperature: f32,
    /// Connect/read timeout in seconds.
    pub timeout_seconds: u64,
}

/// LLM provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`, `"scripted"`).
    /// Maps to `default` in `[llm]` TOML.
    pub provider: String,
    pub openai: OpenAiConfig,
}

/// Conversation limits and follow-up behaviour (`[chat]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Turn cap per conversation.
    pub max_turns: usize,
    /// Stored turns replayed into each chat prompt.
    pub history_window: usize,
    /// Follow-up questions generated after each answer; `0` disables.
    pub follow_up_count: usize,
    /// Stored turns handed to follow-up synthesis.
    pub follow_up_history: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            history_window: default_history_window(),
            follow_up_count: default_follow_up_count(),
            follow_up_history: default_follow_up_history(),
        }
    }
}

/// Curriculum synthesis behaviour (`[curriculum]`).
#[derive(Debug, Clone, PartialEq)]
pub struct CurriculumConfig {
    /// Maximum unit elaborations in flight; `1` is strictly sequential.
    pub elaboration_concurrency: usize,
}

impl Default for CurriculumConfig {
    fn default() -> Self {
        Self { elaboration_concurrency: 1 }
    }
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    /// Working directory for all persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Append logs here instead of stderr.
    pub log_file: Option<PathBuf>,
    /// Snapshot the context store under `{work_dir}/store/`.
    pub store_persist: bool,
    pub http: HttpConfig,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY` env var; `None` for keyless local models.
    /// Never sourced from TOML.
    pub llm_api_key: Option<String>,
    pub chat: ChatConfig,
    pub curriculum: CurriculumConfig,
    /// Directory of prompt template overrides; built-ins are used when unset.
    pub prompts_dir: Option<PathBuf>,
}

impl Config {
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store_persist.then(|| self.work_dir.join("store"))
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    service: RawService,
    #[serde(default)]
    store: RawStore,
    #[serde(default)]
    comms: RawComms,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    chat: RawChat,
    #[serde(default)]
    curriculum: RawCurriculum,
    #[serde(default)]
    prompts: RawPrompts,
}

#[derive(Deserialize)]
struct RawService {
    name: String,
    work_dir: String,
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Deserialize)]
struct RawStore {
    #[serde(default = "default_true")]
    persist: bool,
}

impl Default for RawStore {
    fn default() -> Self {
        Self { persist: true }
    }
}

#[derive(Deserialize, Default)]
struct RawComms {
    #[serde(default)]
    http: RawHttp,
}

#[derive(Deserialize)]
struct RawHttp {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_http_bind")]
    bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self { enabled: true, bind: default_http_bind() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawChat {
    #[serde(default = "default_max_turns")]
    max_turns: usize,
    #[serde(default = "default_history_window")]
    history_window: usize,
    #[serde(default = "default_follow_up_count")]
    follow_up_count: usize,
    #[serde(default = "default_follow_up_history")]
    follow_up_history: usize,
}

impl Default for RawChat {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            history_window: default_history_window(),
            follow_up_count: default_follow_up_count(),
            follow_up_history: default_follow_up_history(),
        }
    }
}

#[derive(Deserialize)]
struct RawCurriculum {
    #[serde(default = "default_elaboration_concurrency")]
    elaboration_concurrency: usize,
}

impl Default for RawCurriculum {
    fn default() -> Self {
        Self { elaboration_concurrency: default_elaboration_concurrency() }
    }
}

#[derive(Deserialize, Default)]
struct RawPrompts {
    #[serde(default)]
    dir: Option<String>,
}

fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.7 }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_max_turns() -> usize { 100 }
fn default_history_window() -> usize { 20 }
fn default_follow_up_count() -> usize { 3 }
fn default_follow_up_history() -> usize { 10 }
fn default_elaboration_concurrency() -> usize { 1 }
fn default_http_bind() -> String { "127.0.0.1:8080".to_string() }
fn default_true() -> bool { true }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `config_path`, else `MENTORA_CONFIG`, else
/// `config/default.toml`, then apply env-var overrides.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let path = match config_path {
        Some(p) => p.to_string(),
        None => env::var("MENTORA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    };
    let work_dir_override = env::var("MENTORA_WORK_DIR").ok();
    let log_level_override = env::var("MENTORA_LOG_LEVEL").ok();
    let mut config = load_from(
        Path::new(&path),
        work_dir_override.as_deref(),
        log_level_override.as_deref(),
    )?;
    config.llm_api_key = env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
    Ok(config)
}

/// Load from an explicit path with optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;
    resolve(parsed, work_dir_override, log_level_override)
}

fn resolve(
    parsed: RawConfig,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let s = parsed.service;

    let work_dir = expand_home(work_dir_override.unwrap_or(&s.work_dir));
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();
    // Full filter directives (`mentora=debug,...`) are checked by the logger itself.
    if !log_level.contains('=') {
        crate::logger::parse_level(&log_level)
            .map_err(|e| AppError::Config(format!("service.log_level: {e}")))?;
    }

    let chat = ChatConfig {
        max_turns: parsed.chat.max_turns,
        history_window: parsed.chat.history_window,
        follow_up_count: parsed.chat.follow_up_count,
        follow_up_history: parsed.chat.follow_up_history,
    };
    if chat.max_turns < 2 {
        return Err(AppError::Config("chat.max_turns must be at least 2".into()));
    }
    if parsed.curriculum.elaboration_concurrency == 0 {
        return Err(AppError::Config("curriculum.elaboration_concurrency must be at least 1".into()));
    }

    Ok(Config {
        service_name: s.name,
        log_file: s.log_file.map(|f| relative_to(&work_dir, &f)),
        prompts_dir: parsed.prompts.dir.map(|d| expand_home(&d)),
        work_dir,
        log_level,
        store_persist: parsed.store.persist,
        http: HttpConfig {
            enabled: parsed.comms.http.enabled,
            bind: parsed.comms.http.bind,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        llm_api_key: None,
        chat,
        curriculum: CurriculumConfig {
            elaboration_concurrency: parsed.curriculum.elaboration_concurrency,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    if path == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }
    PathBuf::from(path)
}

fn relative_to(base: &Path, path: &str) -> PathBuf {
    let p = expand_home(path);
    if p.is_absolute() { p } else { base.join(p) }
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// `Config` for tests: dummy LLM, no persistence.
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            service_name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            store_persist: false,
            http: HttpConfig { enabled: false, bind: default_http_bind() },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                },
            },
            llm_api_key: None,
            chat: ChatConfig::default(),
            curriculum: CurriculumConfig::default(),
            prompts_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[service]
name = "test-tutor"
work_dir = "~/.mentora"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_minimal_config_applies_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.service_name, "test-tutor");
        assert_eq!(cfg.llm.provider, "dummy");
        assert_eq!(cfg.chat, ChatConfig::default());
        assert_eq!(cfg.chat.max_turns, 100);
        assert_eq!(cfg.chat.history_window, 20);
        assert_eq!(cfg.curriculum.elaboration_concurrency, 1);
        assert!(cfg.store_persist);
        assert!(cfg.http.enabled);
        assert!(cfg.prompts_dir.is_none());
    }

    #[test]
    fn parse_full_config() {
        let f = write_toml(
            r#"
[service]
name = "t"
work_dir = "/srv/mentora"
log_level = "debug"
log_file = "logs/mentora.log"

[store]
persist = false

[comms.http]
bind = "0.0.0.0:9000"

[llm]
default = "openai"

[llm.openai]
model = "gpt-4o"
temperature = 0.4

[chat]
max_turns = 40
follow_up_count = 0

[curriculum]
elaboration_concurrency = 3

[prompts]
dir = "/etc/mentora/prompts"
"#,
        );
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.log_file, Some(PathBuf::from("/srv/mentora/logs/mentora.log")));
        assert_eq!(cfg.store_path(), None);
        assert_eq!(cfg.http.bind, "0.0.0.0:9000");
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.openai.model, "gpt-4o");
        assert_eq!(cfg.llm.openai.timeout_seconds, 60);
        assert_eq!(cfg.chat.max_turns, 40);
        assert_eq!(cfg.chat.follow_up_count, 0);
        assert_eq!(cfg.chat.history_window, 20);
        assert_eq!(cfg.curriculum.elaboration_concurrency, 3);
        assert_eq!(cfg.prompts_dir, Some(PathBuf::from("/etc/mentora/prompts")));
    }

    #[test]
    fn store_path_lives_in_work_dir() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/m"), None).unwrap();
        assert_eq!(cfg.store_path(), Some(PathBuf::from("/tmp/m/store")));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.mentora");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".mentora"));
    }

    #[test]
    fn absolute_and_relative_paths_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), Some("debug")).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/test-override"));
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let f = write_toml(MINIMAL_TOML);
        assert!(load_from(f.path(), None, Some("chatty")).is_err());
        assert!(load_from(f.path(), None, Some("mentora=debug")).is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let f = write_toml(&format!("{MINIMAL_TOML}\n[curriculum]\nelaboration_concurrency = 0\n"));
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn shipped_default_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let cfg = load_from(&path, Some("/tmp/mentora-test"), None).unwrap();
        assert_eq!(cfg.chat.max_turns, 100);
    }
}
