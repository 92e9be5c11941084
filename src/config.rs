use anyhow::{anyhow, Result};
use std::env;

use crate::services::nextcloud::{NextcloudConfig, RetryConfig};

#[derive(Clone, Debug)]
pub struct Config {
    pub server_address: String,
    pub api_key: String,
    pub nextcloud: NextcloudConfig,
    pub retry: RetryConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup (the process
    /// environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("{} environment variable not set", key))
        };

        let mut nextcloud = NextcloudConfig::new(
            required("NEXTCLOUD_INSTANCE_URL")?,
            required("NEXTCLOUD_USERNAME")?,
            required("NEXTCLOUD_PASSWORD")?,
            lookup("NEXTCLOUD_USAGE_FOLDER"),
        );
        if let Some(timeout) = parse_optional(&lookup, "NEXTCLOUD_TIMEOUT_SECONDS")? {
            nextcloud.timeout_seconds = timeout;
        }
        if let Some(timeout) = parse_optional(&lookup, "NEXTCLOUD_CONNECT_TIMEOUT_SECONDS")? {
            nextcloud.connect_timeout_seconds = timeout;
        }
        nextcloud.validate()?;

        let mut retry = RetryConfig::default();
        // Retries after the first attempt
        if let Some(retries) = parse_optional(&lookup, "RETRY_MAX_RETRIES")? {
            retry.max_retries =
                u32::try_from(retries).map_err(|_| anyhow!("RETRY_MAX_RETRIES is too large: {}", retries))?;
        }

        Ok(Config {
            server_address: lookup("SERVER_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            api_key: required("API_KEY")?,
            nextcloud,
            retry,
        })
    }
}

fn parse_optional<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{} must be a whole number: {}", key, e)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("NEXTCLOUD_INSTANCE_URL", "https://cloud.example.com/"),
            ("NEXTCLOUD_USERNAME", "alice"),
            ("NEXTCLOUD_PASSWORD", "app-password"),
            ("API_KEY", "secret"),
        ]
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = Config::from_lookup(lookup_from(&base_pairs())).unwrap();
        assert_eq!(config.server_address, "0.0.0.0:8000");
        assert_eq!(config.nextcloud.instance_url, "https://cloud.example.com");
        assert_eq!(config.nextcloud.usage_folder, None);
        assert_eq!(config.nextcloud.timeout_seconds, 30);
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_optional_values_are_read() {
        let mut pairs = base_pairs();
        pairs.push(("NEXTCLOUD_USAGE_FOLDER", "Uploads"));
        pairs.push(("NEXTCLOUD_TIMEOUT_SECONDS", "90"));
        pairs.push(("RETRY_MAX_RETRIES", "0"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.nextcloud.usage_folder.as_deref(), Some("Uploads"));
        assert_eq!(config.nextcloud.timeout_seconds, 90);
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn test_oversized_retry_count_is_rejected() {
        let mut pairs = base_pairs();
        pairs.push(("RETRY_MAX_RETRIES", "4294967296"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("RETRY_MAX_RETRIES"));
    }

    #[test]
    fn test_missing_api_key_fails() {
        let pairs: Vec<_> = base_pairs().into_iter().filter(|(k, _)| *k != "API_KEY").collect();
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("API_KEY"));
    }

    #[test]
    fn test_bad_timeout_fails() {
        let mut pairs = base_pairs();
        pairs.push(("NEXTCLOUD_TIMEOUT_SECONDS", "soon"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }
}
