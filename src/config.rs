// src/config.rs
use crate::errors::{Locale, StudioError};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "https://open-wardrobe-market.com";
const DEFAULT_PUBLIC_ASSET_BASE_URL: &str = "https://assets.open-wardrobe-market.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub public_asset_base_url: String,
    pub auth_url: Option<String>,
    pub auth_anon_key: Option<String>,
    pub bind_addr: String,
    pub http_timeout: Duration,
    pub reveal_delay: Duration,
    pub prefetch_timeout: Duration,
    pub fusion_session_ttl: Duration,
    pub studio_ratio: f64,
    pub showcase_ratio: f64,
    pub locale: Locale,
}

impl AppConfig {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, StudioError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StudioError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let locale = match get("ATELIER_LOCALE") {
            Some(raw) => Locale::parse(&raw).ok_or_else(|| {
                StudioError::Config(format!("ATELIER_LOCALE must be ja or en, got {}", raw))
            })?,
            None => Locale::default(),
        };

        let config = Self {
            api_base_url: trim_slash(get("ATELIER_API_BASE_URL"), DEFAULT_API_BASE_URL),
            public_asset_base_url: trim_slash(
                get("ATELIER_PUBLIC_ASSET_BASE_URL"),
                DEFAULT_PUBLIC_ASSET_BASE_URL,
            ),
            auth_url: get("ATELIER_AUTH_URL").map(|u| u.trim_end_matches('/').to_string()),
            auth_anon_key: get("ATELIER_AUTH_ANON_KEY"),
            bind_addr: get("ATELIER_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            http_timeout: millis(get("ATELIER_HTTP_TIMEOUT_MS"), "ATELIER_HTTP_TIMEOUT_MS", 30_000)?,
            reveal_delay: millis(get("ATELIER_REVEAL_DELAY_MS"), "ATELIER_REVEAL_DELAY_MS", 2_000)?,
            prefetch_timeout: millis(
                get("ATELIER_PREFETCH_TIMEOUT_MS"),
                "ATELIER_PREFETCH_TIMEOUT_MS",
                3_000,
            )?,
            fusion_session_ttl: millis(
                get("ATELIER_FUSION_SESSION_TTL_MS"),
                "ATELIER_FUSION_SESSION_TTL_MS",
                30 * 60 * 1_000,
            )?,
            studio_ratio: ratio(get("ATELIER_STUDIO_RATIO"), "ATELIER_STUDIO_RATIO", 0.6)?,
            showcase_ratio: ratio(get("ATELIER_SHOWCASE_RATIO"), "ATELIER_SHOWCASE_RATIO", 0.7)?,
            locale,
        };

        Ok(config)
    }
}

fn trim_slash(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

fn parse<T: FromStr>(value: &str, key: &str) -> Result<T, StudioError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| StudioError::Config(format!("{} has an invalid value: {}", key, value)))
}

fn millis(value: Option<String>, key: &str, default: u64) -> Result<Duration, StudioError> {
    let ms = match value {
        Some(raw) => parse::<u64>(&raw, key)?,
        None => default,
    };
    Ok(Duration::from_millis(ms))
}

fn ratio(value: Option<String>, key: &str, default: f64) -> Result<f64, StudioError> {
    let ratio = match value {
        Some(raw) => parse::<f64>(&raw, key)?,
        None => default,
    };
    if !(0.0..=1.0).contains(&ratio) {
        return Err(StudioError::Config(format!(
            "{} must be between 0 and 1, got {}",
            key, ratio
        )));
    }
    Ok(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, StudioError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.reveal_delay, Duration::from_millis(2000));
        assert_eq!(config.prefetch_timeout, Duration::from_millis(3000));
        assert_eq!(config.fusion_session_ttl, Duration::from_secs(1800));
        assert_eq!(config.studio_ratio, 0.6);
        assert_eq!(config.showcase_ratio, 0.7);
        assert_eq!(config.locale, Locale::Ja);
        assert!(config.auth_url.is_none());
    }

    #[test]
    fn overrides_are_trimmed_and_parsed() {
        let config = config_from(&[
            ("ATELIER_API_BASE_URL", "http://localhost:3000/"),
            ("ATELIER_REVEAL_DELAY_MS", "10"),
            ("ATELIER_LOCALE", "en"),
        ])
        .unwrap();
        assert_eq!(config.api_base_url, "http://localhost:3000");
        assert_eq!(config.reveal_delay, Duration::from_millis(10));
        assert_eq!(config.locale, Locale::En);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config_from(&[("ATELIER_HTTP_TIMEOUT_MS", "soon")]),
            Err(StudioError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("ATELIER_STUDIO_RATIO", "1.5")]),
            Err(StudioError::Config(_))
        ));
    }
}
