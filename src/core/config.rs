//! Runtime configuration, read once at startup from the environment
//! (a `.env` file is honored via dotenvy).

use anyhow::{Context, Result};
use std::env;

/// Global settings for the bot process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the sqlite database file.
    pub database_path: String,

    /// Default reminder lead time in minutes, used for every user without a
    /// personal override.
    pub default_lead_minutes: i64,

    /// Fixed UTC offset (whole hours) the whole system operates in.
    pub utc_offset_hours: i32,

    /// Base URL of the remote course-data provider.
    pub provider_base_url: String,

    /// Secret used to derive the at-rest credential encryption key.
    pub secret_key: String,

    /// Capacity of the request serialization queue. Requests submitted while
    /// the queue is full are dropped and logged.
    pub request_queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_path =
            env::var("CLASSBELL_DB_PATH").unwrap_or_else(|_| "classbell.db".to_string());
        let default_lead_minutes = parse_env("CLASSBELL_LEAD_MINUTES", 15)?;
        let utc_offset_hours = parse_env("CLASSBELL_UTC_OFFSET_HOURS", 8)?;
        let provider_base_url = env::var("CLASSBELL_PROVIDER_URL")
            .unwrap_or_else(|_| "http://120.55.151.61".to_string());
        let secret_key = env::var("CLASSBELL_SECRET_KEY")
            .context("CLASSBELL_SECRET_KEY must be set (credential encryption key)")?;
        let request_queue_capacity = parse_env("CLASSBELL_QUEUE_CAPACITY", 100)?;

        Ok(Config {
            database_path,
            default_lead_minutes,
            utc_offset_hours,
            provider_base_url,
            secret_key,
            request_queue_capacity,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {}", name)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_default_when_unset() {
        std::env::remove_var("CLASSBELL_TEST_UNSET");
        let value: i64 = parse_env("CLASSBELL_TEST_UNSET", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        std::env::set_var("CLASSBELL_TEST_GARBAGE", "not-a-number");
        let result: Result<i64> = parse_env("CLASSBELL_TEST_GARBAGE", 0);
        assert!(result.is_err());
        std::env::remove_var("CLASSBELL_TEST_GARBAGE");
    }
}
