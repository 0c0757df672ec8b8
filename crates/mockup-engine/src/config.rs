use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_GENERATE_MODEL: &str = "gpt-image-1.5";
pub const DEFAULT_EDIT_MODEL: &str = "gpt-image-1";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 600;
pub const DEFAULT_MAX_JITTER_MS: u64 = 200;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

/// Everything the image client needs; no field is read from the process
/// environment after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_jitter: Duration,
    pub generate_model: String,
    pub edit_model: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
            generate_model: DEFAULT_GENERATE_MODEL.to_string(),
            edit_model: DEFAULT_EDIT_MODEL.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: non_empty_env("OPENAI_API_KEY")
                .or_else(|| non_empty_env("OPENAI_API_KEY_BACKUP")),
            base_url: non_empty_env("OPENAI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.base_url),
            timeout: Duration::from_millis(env_u64(
                "OPENAI_IMAGE_TIMEOUT_MS",
                DEFAULT_TIMEOUT_MS,
                1_000,
                300_000,
            )),
            max_retries: env_u64("OPENAI_IMAGE_MAX_RETRIES", DEFAULT_MAX_RETRIES as u64, 0, 6)
                as u32,
            retry_delay: Duration::from_millis(env_u64(
                "OPENAI_IMAGE_RETRY_DELAY_MS",
                DEFAULT_RETRY_DELAY_MS,
                0,
                10_000,
            )),
            max_jitter: defaults.max_jitter,
            generate_model: non_empty_env("OPENAI_IMAGE_MODEL_GENERATE")
                .unwrap_or(defaults.generate_model),
            edit_model: non_empty_env("OPENAI_IMAGE_MODEL_EDIT").unwrap_or(defaults.edit_model),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_generate_model(mut self, model: impl Into<String>) -> Self {
        self.generate_model = model.into();
        self
    }

    pub fn with_edit_model(mut self, model: impl Into<String>) -> Self {
        self.edit_model = model.into();
        self
    }

    /// The configured key, if it is present and not blank.
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Settings for the HTTP surface and the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub allowed_origins: String,
    pub public_asset_base_url: Option<String>,
    pub asset_root: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            allowed_origins: String::new(),
            public_asset_base_url: None,
            asset_root: PathBuf::from("assets"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            allowed_origins: non_empty_env("ALLOWED_ORIGINS").unwrap_or_default(),
            public_asset_base_url: non_empty_env("PUBLIC_ASSET_BASE_URL"),
            asset_root: non_empty_env("ASSET_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.asset_root),
            max_upload_bytes: env_u64(
                "MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES as u64,
                1,
                512 * 1024 * 1024,
            ) as usize,
        }
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64, min: u64, max: u64) -> u64 {
    parse_clamped(non_empty_env(key).as_deref(), default, min, max)
}

fn parse_clamped(raw: Option<&str>, default: u64, min: u64, max: u64) -> u64 {
    raw.and_then(|text| text.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}
