/// Process-level configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
///
/// Detection tuning lives in the monitor's TOML file, not here.
#[derive(Debug, Clone)]
pub struct Config {
    // Database holding templates, bars and the signal journal
    pub database_url: String,

    // Monitor config file path
    pub monitor_config_path: String,

    // Persist every match to the trading_signals table
    pub journal_enabled: bool,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let journal_enabled = match optional_env("SIGNAL_JOURNAL")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            None | Some("1") | Some("true") | Some("on") => true,
            Some("0") | Some("false") | Some("off") => false,
            Some(other) => panic!("ERROR: SIGNAL_JOURNAL must be 'true' or 'false', got: '{other}'"),
        };

        Config {
            database_url: required_env("DATABASE_URL"),
            monitor_config_path: optional_env("MONITOR_CONFIG_PATH")
                .unwrap_or_else(|| "config/monitor.toml".to_string()),
            journal_enabled,
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
