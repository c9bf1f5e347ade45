use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Timing knobs of the exam runtime. Defaults are the values the exam UI
/// was tuned with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub answer_debounce_ms: u64,
    pub selection_debounce_ms: u64,
    pub highlight_save_throttle_ms: u64,
    pub restore_batch_size: usize,
    pub timer_tick_ms: u64,
    pub section_fetch_attempts: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            answer_debounce_ms: 800,
            selection_debounce_ms: 150,
            highlight_save_throttle_ms: 300,
            restore_batch_size: 5,
            timer_tick_ms: 1000,
            section_fetch_attempts: 3,
        }
    }
}

impl RuntimeSettings {
    pub fn answer_debounce(&self) -> Duration {
        Duration::from_millis(self.answer_debounce_ms)
    }

    pub fn selection_debounce(&self) -> Duration {
        Duration::from_millis(self.selection_debounce_ms)
    }

    pub fn highlight_save_throttle(&self) -> Duration {
        Duration::from_millis(self.highlight_save_throttle_ms)
    }

    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub highlight_store_dir: PathBuf,
    pub runtime: RuntimeSettings,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, then APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let api_base_url = settings
            .get_string("api.base_url")
            .or_else(|_| env::var("EXAM_API_URL"))
            .unwrap_or_else(|_| "http://localhost:8000/api".to_string());

        let api_token = settings
            .get_string("api.token")
            .or_else(|_| env::var("EXAM_API_TOKEN"))
            .ok()
            .filter(|t| !t.trim().is_empty());

        let request_timeout_secs = settings
            .get_int("api.timeout_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(10);

        let highlight_store_dir = settings
            .get_string("store.dir")
            .or_else(|_| env::var("HIGHLIGHT_STORE_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".exam-store"));

        let runtime = match settings.get::<RuntimeSettings>("runtime") {
            Ok(runtime) => runtime,
            Err(config::ConfigError::NotFound(_)) => RuntimeSettings::default(),
            Err(e) => {
                tracing::warn!("Invalid [runtime] settings ({}), using defaults", e);
                RuntimeSettings::default()
            }
        };

        Ok(Config {
            api_base_url,
            api_token,
            request_timeout_secs,
            highlight_store_dir,
            runtime,
        })
    }

    /// Configuration pointing at `base_url` with default tunables.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: base_url.into(),
            api_token: None,
            request_timeout_secs: 10,
            highlight_store_dir: PathBuf::from(".exam-store"),
            runtime: RuntimeSettings::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_falls_back_to_defaults() {
        env::remove_var("EXAM_API_URL");
        env::remove_var("APP__API__BASE_URL");
        env::set_var("APP_ENV", "missing-profile");

        let config = Config::load().unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8000/api");
        assert_eq!(config.runtime.answer_debounce_ms, 800);
        assert_eq!(config.runtime.restore_batch_size, 5);

        env::remove_var("APP_ENV");
    }

    #[test]
    #[serial]
    fn env_overrides_base_url() {
        env::set_var("APP_ENV", "missing-profile");
        env::set_var("EXAM_API_URL", "http://exam.test/api");

        let config = Config::load().unwrap();
        assert_eq!(config.api_base_url, "http://exam.test/api");

        env::remove_var("EXAM_API_URL");
        env::remove_var("APP_ENV");
    }
}
