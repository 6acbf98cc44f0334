use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be driven by a `HashMap`
/// in tests.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let gemini_api_key = require("GEMINI_API_KEY")?;

    let env = parse_environment(&or_default("TRASHMAP_ENV", "development"));
    let bind_addr = parse_addr("TRASHMAP_BIND_ADDR", "0.0.0.0:5001")?;
    let log_level = or_default("TRASHMAP_LOG_LEVEL", "info");
    let data_dir = PathBuf::from(or_default("TRASHMAP_DATA_DIR", "./uploads"));

    let max_detections = parse_usize("TRASHMAP_MAX_DETECTIONS", "100")?;
    let max_insights = parse_usize("TRASHMAP_MAX_INSIGHTS", "288")?;
    let max_upload_bytes = parse_usize("TRASHMAP_MAX_UPLOAD_BYTES", "10485760")?;
    if max_upload_bytes == 0 {
        return Err(invalid(
            "TRASHMAP_MAX_UPLOAD_BYTES",
            "must be greater than zero".to_string(),
        ));
    }

    let vision_base_url = or_default(
        "TRASHMAP_VISION_BASE_URL",
        "https://generativelanguage.googleapis.com/",
    );
    let vision_model = or_default("TRASHMAP_VISION_MODEL", "gemini-2.0-flash");
    let insight_model = or_default("TRASHMAP_INSIGHT_MODEL", "gemini-2.5-flash");

    let classifier_timeout_secs = parse_u64("TRASHMAP_CLASSIFIER_TIMEOUT_SECS", "30")?;
    let classifier_max_retries = parse_u32("TRASHMAP_CLASSIFIER_MAX_RETRIES", "2")?;
    let classifier_backoff_ms = parse_u64("TRASHMAP_CLASSIFIER_BACKOFF_MS", "500")?;

    let insight_cron = or_default("TRASHMAP_INSIGHT_CRON", "0 */5 * * * *");
    let api_keys = parse_api_keys(&or_default("TRASHMAP_API_KEYS", ""));

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        data_dir,
        max_detections,
        max_insights,
        max_upload_bytes,
        gemini_api_key,
        vision_base_url,
        vision_model,
        insight_model,
        classifier_timeout_secs,
        classifier_max_retries,
        classifier_backoff_ms,
        insight_cron,
        api_keys,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

/// Split a comma-separated bearer token list, dropping blanks and duplicates.
fn parse_api_keys(raw: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_owned());
        }
    }
    keys
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
