use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub max_detections: usize,
    pub max_insights: usize,
    pub max_upload_bytes: usize,
    pub gemini_api_key: String,
    pub vision_base_url: String,
    pub vision_model: String,
    pub insight_model: String,
    pub classifier_timeout_secs: u64,
    pub classifier_max_retries: u32,
    pub classifier_backoff_ms: u64,
    pub insight_cron: String,
    pub api_keys: Vec<String>,
}

impl AppConfig {
    #[must_use]
    pub fn is_development(&self) -> bool {
        self.env == Environment::Development
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("data_dir", &self.data_dir)
            .field("max_detections", &self.max_detections)
            .field("max_insights", &self.max_insights)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("gemini_api_key", &"[redacted]")
            .field("vision_base_url", &self.vision_base_url)
            .field("vision_model", &self.vision_model)
            .field("insight_model", &self.insight_model)
            .field("classifier_timeout_secs", &self.classifier_timeout_secs)
            .field("classifier_max_retries", &self.classifier_max_retries)
            .field("classifier_backoff_ms", &self.classifier_backoff_ms)
            .field("insight_cron", &self.insight_cron)
            .field("api_keys", &format!("[{} redacted]", self.api_keys.len()))
            .finish()
    }
}
