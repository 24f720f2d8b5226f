// src/config.rs
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use crate::errors::{CodeboxError, Result};

/// Which isolation backend executes submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Docker,
    Local,
}

impl std::str::FromStr for BackendKind {
    type Err = CodeboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "local" => Ok(BackendKind::Local),
            other => Err(CodeboxError::Config(format!(
                "SANDBOX_BACKEND must be 'docker' or 'local', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Docker => write!(f, "docker"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

/// Resource limits and admission settings for the execution sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub backend: BackendKind,
    /// Docker size syntax, e.g. `512m` or `2g`.
    pub memory_limit: String,
    pub cpu_limit: f64,
    pub network_enabled: bool,
    pub max_concurrent: usize,
    pub max_output_bytes: usize,
    /// Default and upper bound for a request timeout, in seconds.
    pub max_execution_time: u64,
    pub languages_file: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Docker,
            memory_limit: "2g".to_string(),
            cpu_limit: 2.0,
            network_enabled: true,
            max_concurrent: 4,
            max_output_bytes: 1024 * 1024,
            max_execution_time: 300,
            languages_file: None,
        }
    }
}

/// Credentials accepted by `/api/token`. An empty user table disables auth.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub users: HashMap<String, String>,
    pub token_ttl_minutes: i64,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        !self.users.is_empty()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            token_ttl_minutes: 30,
        }
    }
}

/// High-level application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
    pub cors_origins: Vec<String>,
    pub workspace_dir: PathBuf,
    pub max_workspace_size_mb: u64,
    pub database_url: Option<String>,
    pub sandbox: SandboxConfig,
    pub auth: AuthConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api".to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:4000".to_string(),
            ],
            workspace_dir: PathBuf::from("/workspace"),
            max_workspace_size_mb: 1000,
            database_url: None,
            sandbox: SandboxConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unset keys keep
    /// their defaults; set keys must parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(host) = lookup("API_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            config.port = parse_number("API_PORT", &port)?;
        }
        if let Some(prefix) = lookup("API_PREFIX") {
            let trimmed = prefix.trim().trim_end_matches('/');
            if !trimmed.starts_with('/') {
                return Err(CodeboxError::Config(format!(
                    "API_PREFIX must start with '/', got '{}'",
                    prefix
                )));
            }
            config.api_prefix = trimmed.to_string();
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            config.cors_origins = split_list(&origins);
        }
        if let Some(dir) = lookup("WORKSPACE_DIR") {
            config.workspace_dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup("MAX_WORKSPACE_SIZE_MB") {
            config.max_workspace_size_mb = parse_number("MAX_WORKSPACE_SIZE_MB", &size)?;
        }
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let sandbox = &mut config.sandbox;
        if let Some(backend) = lookup("SANDBOX_BACKEND") {
            sandbox.backend = backend.parse()?;
        }
        if let Some(memory) = lookup("SANDBOX_MEMORY_LIMIT") {
            sandbox.memory_limit = parse_memory_limit(&memory)?;
        }
        if let Some(cpu) = lookup("SANDBOX_CPU_LIMIT") {
            let cpu: f64 = parse_number("SANDBOX_CPU_LIMIT", &cpu)?;
            if !cpu.is_finite() || cpu <= 0.0 {
                return Err(CodeboxError::Config("SANDBOX_CPU_LIMIT must be positive".to_string()));
            }
            sandbox.cpu_limit = cpu;
        }
        if let Some(network) = lookup("SANDBOX_NETWORK") {
            sandbox.network_enabled = parse_bool("SANDBOX_NETWORK", &network)?;
        }
        if let Some(max) = lookup("SANDBOX_MAX_CONCURRENT") {
            sandbox.max_concurrent = parse_number("SANDBOX_MAX_CONCURRENT", &max)?;
            if sandbox.max_concurrent == 0 {
                return Err(CodeboxError::Config("SANDBOX_MAX_CONCURRENT must be at least 1".to_string()));
            }
        }
        if let Some(bytes) = lookup("SANDBOX_MAX_OUTPUT_BYTES") {
            sandbox.max_output_bytes = parse_number("SANDBOX_MAX_OUTPUT_BYTES", &bytes)?;
        }
        if let Some(secs) = lookup("MAX_EXECUTION_TIME") {
            sandbox.max_execution_time = parse_number("MAX_EXECUTION_TIME", &secs)?;
            if sandbox.max_execution_time == 0 {
                return Err(CodeboxError::Config("MAX_EXECUTION_TIME must be at least 1".to_string()));
            }
        }
        sandbox.languages_file = lookup("LANGUAGES_FILE").map(PathBuf::from);

        if let Some(users) = lookup("AUTH_USERS") {
            config.auth.users = parse_users(&users)?;
        }
        if let Some(ttl) = lookup("ACCESS_TOKEN_EXPIRE_MINUTES") {
            config.auth.token_ttl_minutes = parse_number("ACCESS_TOKEN_EXPIRE_MINUTES", &ttl)?;
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CodeboxError::Config(format!("{} has an invalid value: '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CodeboxError::Config(format!("{} must be a boolean, got '{}'", key, value))),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Accepts docker-style sizes: digits followed by an optional b/k/m/g unit.
fn parse_memory_limit(value: &str) -> Result<String> {
    let re = Regex::new(r"(?i)^[1-9][0-9]*[bkmg]?$").map_err(|e| CodeboxError::Config(e.to_string()))?;
    let value = value.trim();
    if re.is_match(value) {
        Ok(value.to_lowercase())
    } else {
        Err(CodeboxError::Config(format!(
            "SANDBOX_MEMORY_LIMIT must look like '512m' or '2g', got '{}'",
            value
        )))
    }
}

fn parse_users(value: &str) -> Result<HashMap<String, String>> {
    let mut users = HashMap::new();
    for entry in split_list(value) {
        match entry.split_once(':') {
            Some((user, password)) if !user.is_empty() && !password.is_empty() => {
                users.insert(user.to_string(), password.to_string());
            }
            _ => {
                return Err(CodeboxError::Config(format!(
                    "AUTH_USERS entries must be 'user:password', got '{}'",
                    entry
                )));
            }
        }
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.workspace_dir, PathBuf::from("/workspace"));
        assert_eq!(config.sandbox.backend, BackendKind::Docker);
        assert_eq!(config.sandbox.memory_limit, "2g");
        assert_eq!(config.sandbox.max_execution_time, 300);
        assert!(!config.auth.enabled());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("API_PORT", "9000"),
            ("API_PREFIX", "/v2/"),
            ("SANDBOX_BACKEND", "Local"),
            ("SANDBOX_MEMORY_LIMIT", "512M"),
            ("SANDBOX_CPU_LIMIT", "0.5"),
            ("SANDBOX_NETWORK", "off"),
            ("MAX_EXECUTION_TIME", "10"),
            ("AUTH_USERS", "alice:secret, bob:hunter2"),
            ("CORS_ORIGINS", "*"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.api_prefix, "/v2");
        assert_eq!(config.sandbox.backend, BackendKind::Local);
        assert_eq!(config.sandbox.memory_limit, "512m");
        assert_eq!(config.sandbox.cpu_limit, 0.5);
        assert!(!config.sandbox.network_enabled);
        assert_eq!(config.sandbox.max_execution_time, 10);
        assert_eq!(config.auth.users.get("bob").map(String::as_str), Some("hunter2"));
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("API_PORT", "eighty")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("SANDBOX_MEMORY_LIMIT", "lots")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("SANDBOX_BACKEND", "vm")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("SANDBOX_CPU_LIMIT", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("AUTH_USERS", "nopassword")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("MAX_EXECUTION_TIME", "0")])).is_err());
    }
}
