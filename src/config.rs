use crate::error::{Error, Result};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OCR_CONCURRENCY: usize = 5;
pub const DEFAULT_TRANSLATE_CONCURRENCY: usize = 4;
pub const DEFAULT_SAVE_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_UPLOAD_MB: f64 = 10.0;

/// Backend endpoints and workflow limits. Populated from the environment
/// (and `.env`), then optionally overridden by CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub ocr_url: Option<String>,
    pub accounting_ocr_url: Option<String>,
    pub translate_url: Option<String>,
    pub accounting_save_url: Option<String>,
    pub user_id: Option<String>,
    pub request_timeout: Duration,
    pub ocr_concurrency: usize,
    pub translate_concurrency: usize,
    pub save_delay: Duration,
    pub max_upload_mb: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ocr_url: None,
            accounting_ocr_url: None,
            translate_url: None,
            accounting_save_url: None,
            user_id: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ocr_concurrency: DEFAULT_OCR_CONCURRENCY,
            translate_concurrency: DEFAULT_TRANSLATE_CONCURRENCY,
            save_delay: Duration::from_millis(DEFAULT_SAVE_DELAY_MS),
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
    }
}

impl Config {
    /// Load `.env` (if any) and read `TAKUMI_*` variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        let ocr_url = env_string("TAKUMI_OCR_URL");
        Ok(Self {
            accounting_ocr_url: env_string("TAKUMI_ACCOUNTING_OCR_URL").or_else(|| ocr_url.clone()),
            ocr_url,
            translate_url: env_string("TAKUMI_TRANSLATE_URL"),
            accounting_save_url: env_string("TAKUMI_ACCOUNTING_SAVE_URL"),
            user_id: env_string("TAKUMI_USER_ID"),
            request_timeout: env_parse::<u64>("TAKUMI_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            ocr_concurrency: env_parse::<usize>("TAKUMI_OCR_CONCURRENCY")?
                .unwrap_or(defaults.ocr_concurrency)
                .max(1),
            translate_concurrency: env_parse::<usize>("TAKUMI_TRANSLATE_CONCURRENCY")?
                .unwrap_or(defaults.translate_concurrency)
                .max(1),
            save_delay: env_parse::<u64>("TAKUMI_SAVE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.save_delay),
            max_upload_mb: env_parse::<f64>("TAKUMI_MAX_UPLOAD_MB")?.unwrap_or(defaults.max_upload_mb),
        })
    }

    /// "configured" when the OCR endpoint is set, "not_configured" otherwise.
    pub fn backend_status(&self) -> &'static str {
        match &self.ocr_url {
            Some(url) if !url.trim().is_empty() => "configured",
            _ => "not_configured",
        }
    }

    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| Error::Config(format!("{} not set in .env", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_workflow_limits() {
        let config = Config::default();
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.translate_concurrency, 4);
        assert_eq!(config.save_delay, Duration::from_millis(100));
        assert_eq!(config.max_upload_mb, 10.0);
        assert_eq!(config.backend_status(), "not_configured");
    }

    #[test]
    fn require_reports_missing_variable() {
        let err = Config::require(&None, "TAKUMI_OCR_URL").unwrap_err();
        assert_eq!(err.to_string(), "TAKUMI_OCR_URL not set in .env");
        let set = Some("http://x".to_string());
        assert_eq!(Config::require(&set, "TAKUMI_OCR_URL").unwrap(), "http://x");
    }
}
