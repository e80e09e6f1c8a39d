//! Configuration module for the SiteScribe backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Quiet period before an allowance edit is written through to the store
    pub allowance_debounce: Duration,
    /// Editing sessions untouched for this long are evicted
    pub session_idle_timeout: Duration,
    /// Render unmarked Sundays as a non-workday in monthly reports
    pub mark_sundays: bool,
    /// Integrity advisor settings
    pub advisor: AdvisorConfig,
}

/// Connection settings for the LLM-backed integrity advisor.
#[derive(Debug, Clone, Default)]
pub struct AdvisorConfig {
    /// Base URL of an OpenAI-compatible API; `None` disables the advisor
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_path = env::var("SITESCRIBE_DB_PATH")
            .unwrap_or_else(|_| "./data/sitescribe.sqlite".to_string())
            .into();

        let bind_addr = env::var("SITESCRIBE_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid SITESCRIBE_BIND_ADDR format");

        let log_level = env::var("SITESCRIBE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let debounce_ms = env::var("SITESCRIBE_ALLOWANCE_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(500);

        let session_idle_secs = env::var("SITESCRIBE_SESSION_IDLE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(8 * 60 * 60);

        let mark_sundays = env::var("SITESCRIBE_MARK_SUNDAYS")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let advisor = AdvisorConfig {
            base_url: env::var("SITESCRIBE_ADVISOR_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            api_key: env::var("SITESCRIBE_ADVISOR_API_KEY").ok(),
            model: env::var("SITESCRIBE_ADVISOR_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        };

        Self {
            db_path,
            bind_addr,
            log_level,
            allowance_debounce: Duration::from_millis(debounce_ms),
            session_idle_timeout: Duration::from_secs(session_idle_secs),
            mark_sundays,
            advisor,
        }
    }
}
