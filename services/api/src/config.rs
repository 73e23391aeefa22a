use gemini_realtime::GEMINI_LIVE_URL;
use sidama_core::generic_types::{DEFAULT_LIVE_MODEL, DEFAULT_SYSTEM_PROMPT};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub live_model: String,
    pub live_endpoint: String,
    pub system_prompt_path: Option<PathBuf>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_model =
            std::env::var("LIVE_MODEL").unwrap_or_else(|_| DEFAULT_LIVE_MODEL.to_string());

        let live_endpoint =
            std::env::var("GEMINI_LIVE_ENDPOINT").unwrap_or_else(|_| GEMINI_LIVE_URL.to_string());
        if !(live_endpoint.starts_with("wss://") || live_endpoint.starts_with("ws://")) {
            return Err(ConfigError::InvalidValue(
                "GEMINI_LIVE_ENDPOINT".to_string(),
                format!("'{}' is not a WebSocket URL", live_endpoint),
            ));
        }

        let system_prompt_path = std::env::var("SYSTEM_PROMPT_PATH").ok().map(PathBuf::from);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini_api_key,
            live_model,
            live_endpoint,
            system_prompt_path,
            log_level,
        })
    }

    /// Reads the persona prompt, falling back to the built-in guide persona.
    pub fn load_system_prompt(&self) -> std::io::Result<String> {
        match &self.system_prompt_path {
            Some(path) => Ok(std::fs::read_to_string(path)?.trim().to_string()),
            None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("LIVE_MODEL");
            env::remove_var("GEMINI_LIVE_ENDPOINT");
            env::remove_var("SYSTEM_PROMPT_PATH");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.gemini_api_key, "test-gemini-key");
        assert_eq!(config.live_model, DEFAULT_LIVE_MODEL);
        assert_eq!(config.live_endpoint, GEMINI_LIVE_URL);
        assert_eq!(config.system_prompt_path, None);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.load_system_prompt().unwrap(), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("GEMINI_API_KEY", "custom-gemini-key");
            env::set_var("LIVE_MODEL", "models/custom-live");
            env::set_var("GEMINI_LIVE_ENDPOINT", "ws://localhost:9000/live");
            env::set_var("SYSTEM_PROMPT_PATH", "/custom/prompt.md");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.gemini_api_key, "custom-gemini-key");
        assert_eq!(config.live_model, "models/custom-live");
        assert_eq!(config.live_endpoint, "ws://localhost:9000/live");
        assert_eq!(
            config.system_prompt_path,
            Some(PathBuf::from("/custom/prompt.md"))
        );
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_gemini_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("GEMINI_API_KEY")),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }

        unsafe {
            env::set_var("GEMINI_API_KEY", "   ");
        }
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::MissingVar(_)
        ));
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_endpoint() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("GEMINI_LIVE_ENDPOINT", "https://example.com/live");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "GEMINI_LIVE_ENDPOINT"),
            _ => panic!("Expected InvalidValue for GEMINI_LIVE_ENDPOINT"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    fn test_system_prompt_from_file() {
        let path = std::env::temp_dir().join(format!("sidama-prompt-{}.md", std::process::id()));
        std::fs::write(&path, "You are a calm coffee guide.\n").unwrap();
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            gemini_api_key: "k".to_string(),
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            live_endpoint: GEMINI_LIVE_URL.to_string(),
            system_prompt_path: Some(path.clone()),
            log_level: Level::INFO,
        };
        assert_eq!(
            config.load_system_prompt().unwrap(),
            "You are a calm coffee guide."
        );
        std::fs::remove_file(path).ok();
    }
}
