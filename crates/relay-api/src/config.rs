// Process configuration, loaded once at startup from the environment.

use anyhow::{Context, Result};
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9100";
const DEFAULT_LOG_FILTER: &str = "relay_api=debug,relay_core=debug,tower_http=debug";
const DEFAULT_LLM_API_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub log_filter: String,
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub default_model: String,
    pub max_tool_rounds: u32,
    pub history_size: usize,
    pub memory_recall_timeout: Duration,
    pub remote_tool_discovery_timeout: Duration,
    pub remote_tool_call_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL environment variable required")?;
        let llm_api_key =
            std::env::var("LLM_API_KEY").context("LLM_API_KEY environment variable required")?;

        Ok(Self {
            database_url,
            bind_addr: env_or("BIND_ADDR", DEFAULT_BIND_ADDR),
            log_filter: env_or_filter(),
            llm_api_key,
            llm_api_base_url: env_or("LLM_API_BASE_URL", DEFAULT_LLM_API_BASE_URL),
            default_model: env_or("DEFAULT_MODEL", DEFAULT_MODEL),
            max_tool_rounds: env_parsed_or("MAX_TOOL_ROUNDS", 10)?,
            history_size: env_parsed_or("HISTORY_SIZE", 20)?,
            memory_recall_timeout: Duration::from_secs(env_parsed_or(
                "MEMORY_RECALL_TIMEOUT_SECS",
                3,
            )?),
            remote_tool_discovery_timeout: Duration::from_secs(env_parsed_or(
                "REMOTE_TOOL_DISCOVERY_TIMEOUT_SECS",
                15,
            )?),
            remote_tool_call_timeout: Duration::from_secs(env_parsed_or(
                "REMOTE_TOOL_CALL_TIMEOUT_SECS",
                30,
            )?),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_filter() -> String {
    std::env::var("RELAY_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string())
}

fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_to_default() {
        std::env::remove_var("TEST_UNSET_KEY_XYZ");
        assert_eq!(env_or("TEST_UNSET_KEY_XYZ", "fallback"), "fallback");
    }

    #[test]
    fn test_env_parsed_or_rejects_invalid_value() {
        std::env::set_var("TEST_BAD_NUMBER_XYZ", "not-a-number");
        let result: Result<u32> = env_parsed_or("TEST_BAD_NUMBER_XYZ", 10);
        assert!(result.is_err());
        std::env::remove_var("TEST_BAD_NUMBER_XYZ");
    }
}
