use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Process configuration, loaded once at startup (spec.md 6: environment
/// variables consumed by the scheduler process). Layered: defaults, then
/// an optional `config`/`config.local` file, then the named environment
/// variables as explicit overrides -- not a blanket `Environment::default()`
/// source, since spec.md's variable names (`DB_HOST`, `REDIS_HOST`, ...)
/// carry no crate-specific prefix and would otherwise be too easy to
/// collide with unrelated process environment.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstream current-weather API key.
    pub openweathermap_api_key: String,

    /// Optional API key gating the device-token endpoints. `None` disables
    /// the check (development mode).
    #[serde(default)]
    pub device_api_key: Option<String>,

    #[serde(default)]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default)]
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,

    #[serde(default)]
    pub redis_host: Option<String>,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default)]
    pub redis_password: Option<String>,

    /// Required, no default (spec.md 6).
    pub push_credentials_path: String,

    /// Raw duration string (e.g. `"1m"`); validated and parsed by
    /// `scheduler_interval()`.
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval: String,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "data/scheduler.db".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_scheduler_interval() -> String {
    "1m".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Parses durations of the form `<integer><unit>` with unit `s`/`m`/`h`
/// (unit omitted means seconds), e.g. `"1m"`, `"30s"`, `"2h"`.
fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let split_at = raw.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(raw.len());
    let (value, unit) = raw.split_at(split_at);
    let value: u64 = value
        .parse()
        .map_err(|_| ConfigError::Message(format!("invalid duration: {raw}")))?;
    let secs = match unit {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        other => return Err(ConfigError::Message(format!("unsupported duration unit: {other}"))),
    };
    Ok(Duration::from_secs(secs))
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let builder = Config::builder()
            .set_default("host", default_host())?
            .set_default("port", default_port() as i64)?
            .set_default("db_port", default_db_port() as i64)?
            .set_default("db_name", default_db_name())?
            .set_default("redis_port", default_redis_port() as i64)?
            .set_default("scheduler_interval", default_scheduler_interval())?
            .set_default("metrics_port", default_metrics_port() as i64)?
            .set_default("log_level", default_log_level())?
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("config.local").required(false))
            .set_override_option("openweathermap_api_key", env_str("OPENWEATHERMAP_API_KEY"))?
            .set_override_option("device_api_key", env_str("DEVICE_API_KEY"))?
            .set_override_option("host", env_str("HOST"))?
            .set_override_option("port", env_int("PORT"))?
            .set_override_option("db_host", env_str("DB_HOST"))?
            .set_override_option("db_port", env_int("DB_PORT"))?
            .set_override_option("db_user", env_str("DB_USER"))?
            .set_override_option("db_password", env_str("DB_PASSWORD"))?
            .set_override_option("db_name", env_str("DB_NAME"))?
            .set_override_option("redis_host", env_str("REDIS_HOST"))?
            .set_override_option("redis_port", env_int("REDIS_PORT"))?
            .set_override_option("redis_password", env_str("REDIS_PASSWORD"))?
            .set_override_option("push_credentials_path", env_str("PUSH_CREDENTIALS_PATH"))?
            .set_override_option("scheduler_interval", env_str("SCHEDULER_INTERVAL"))?
            .set_override_option("metrics_port", env_int("METRICS_PORT"))?
            .set_override_option("log_level", env_str("LOG_LEVEL"))?
            .build()?;

        let app_config: AppConfig = builder.try_deserialize()?;

        // spec.md 9, "Open question -- interval != 1 minute": surface the
        // misconfiguration at load time instead of silently dropping
        // alarms that fall off the tick grid.
        let interval = parse_duration(&app_config.scheduler_interval)?;
        let secs = interval.as_secs();
        if secs == 0 || 60 % secs != 0 {
            return Err(ConfigError::Message(format!(
                "SCHEDULER_INTERVAL '{}' must evenly divide 60 seconds, or alarms whose \
                 minute does not align with the tick grid will never fire",
                app_config.scheduler_interval
            )));
        }

        Ok(app_config)
    }

    pub fn scheduler_interval(&self) -> Duration {
        parse_duration(&self.scheduler_interval).expect("validated in AppConfig::load")
    }

    /// This crate's persistence backend is embedded SQLite, following the
    /// teacher (see DESIGN.md for the Open Question this resolves): `DB_NAME`
    /// is taken as the database file path, `DB_HOST`/`DB_PORT`/`DB_USER`/
    /// `DB_PASSWORD` are accepted for environment-contract compatibility but
    /// unused.
    pub fn sqlite_url(&self) -> String {
        if !self.db_host.is_empty() {
            tracing::debug!(
                db_host = %self.db_host,
                "DB_HOST/DB_PORT/DB_USER/DB_PASSWORD are accepted but unused by the embedded sqlite backend"
            );
        }
        format!("sqlite:{}", self.db_name)
    }

    /// `None` selects the single-instance in-process cache; `Some` selects
    /// the Redis-backed cache for multi-instance deployments.
    pub fn redis_url(&self) -> Option<String> {
        self.redis_host.as_ref().map(|host| match &self.redis_password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{password}@{host}:{port}", port = self.redis_port)
            }
            _ => format!("redis://{host}:{port}", port = self.redis_port),
        })
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_int(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
