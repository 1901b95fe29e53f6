// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::resilience::{BackoffConfig, CircuitBreakerConfig};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(5 * 60);
const DEFAULT_HEALTH_PORT: u16 = 8080;
const DEFAULT_BATCH_SIZE: usize = 1;
const MAX_MULTIPLIER: f64 = 100.0;

pub const LOKI_URL_ENV: &str = "LOKI_URL";
pub const VICTORIA_URL_ENV: &str = "VICTORIA_URL";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LokiConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub query: String,
    /// Pause between two polling cycles.
    #[serde(default = "default_poll_interval", deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VictoriaConfig {
    #[serde(default)]
    pub url: String,
    /// Injected as `_schema` into every record written.
    #[serde(default)]
    pub schema: String,
}

/// Retry and breaker settings for one remote client.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub initial_interval: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_elapsed_time: Duration,
    pub max_attempts: Option<u32>,
    pub circuit_breaker: bool,
    pub failure_ratio: f64,
    pub min_requests: u32,
    pub max_half_open_requests: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub open_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub count_interval: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        let backoff = BackoffConfig::default();
        let breaker = CircuitBreakerConfig::default();
        Self {
            initial_interval: backoff.initial_interval,
            max_interval: backoff.max_interval,
            multiplier: backoff.multiplier,
            randomization_factor: backoff.randomization_factor,
            max_elapsed_time: backoff.max_elapsed_time,
            max_attempts: backoff.max_attempts,
            circuit_breaker: true,
            failure_ratio: breaker.failure_ratio,
            min_requests: breaker.min_requests,
            max_half_open_requests: breaker.max_half_open_requests,
            open_timeout: breaker.open_timeout,
            count_interval: breaker.count_interval,
        }
    }
}

impl ResilienceConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
            max_elapsed_time: self.max_elapsed_time,
            max_attempts: self.max_attempts,
        }
    }

    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            min_requests: self.min_requests,
            failure_ratio: self.failure_ratio,
            max_half_open_requests: self.max_half_open_requests,
            open_timeout: self.open_timeout,
            count_interval: self.count_interval,
        }
    }

    fn validate(&self, client: &str) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.failure_ratio) {
            return Err(ConfigError::Invalid(format!(
                "{client} failureRatio must be between 0 and 1, got {}",
                self.failure_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(ConfigError::Invalid(format!(
                "{client} randomizationFactor must be between 0 and 1, got {}",
                self.randomization_factor
            )));
        }
        if !(1.0..=MAX_MULTIPLIER).contains(&self.multiplier) {
            return Err(ConfigError::Invalid(format!(
                "{client} multiplier must be between 1 and {MAX_MULTIPLIER}, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResilienceSettings {
    pub loki: ResilienceConfig,
    pub victoria: ResilienceConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub loki: LokiConfig,
    pub victoria: VictoriaConfig,
    /// Deliveries allowed in flight at once within a cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Length of the `[now - window, now)` range queried each cycle.
    #[serde(default = "default_time_window", deserialize_with = "deserialize_duration")]
    pub time_window: Duration,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default)]
    pub resilience: ResilienceSettings,
}

impl Config {
    /// Reads the JSON file at `path`, applies `LOKI_URL` / `VICTORIA_URL`
    /// overrides and checks the mandatory fields.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Config::from_json(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env(LOKI_URL_ENV) {
            self.loki.url = url;
        }
        if let Some(url) = non_empty_env(VICTORIA_URL_ENV) {
            self.victoria.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loki.url.trim().is_empty() {
            return Err(ConfigError::Missing("loki URL"));
        }
        if self.victoria.url.trim().is_empty() {
            return Err(ConfigError::Missing("victoria URL"));
        }
        if self.loki.query.trim().is_empty() {
            return Err(ConfigError::Missing("loki query"));
        }
        if self.victoria.schema.trim().is_empty() {
            return Err(ConfigError::Missing("victoria schema"));
        }
        if self.loki.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "loki interval must be greater than 0".to_string(),
            ));
        }
        if self.time_window.is_zero() {
            return Err(ConfigError::Invalid(
                "timeWindow must be greater than 0".to_string(),
            ));
        }
        self.resilience.loki.validate("loki")?;
        self.resilience.victoria.validate("victoria")?;
        Ok(())
    }

    /// `batchSize` of 0 behaves like 1: deliveries run one after another.
    pub fn delivery_concurrency(&self) -> usize {
        self.batch_size.max(1)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_time_window() -> Duration {
    DEFAULT_TIME_WINDOW
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_health_port() -> u16 {
    DEFAULT_HEALTH_PORT
}

/// Durations are either a JSON number of nanoseconds or a duration string
/// such as `"1m30s"`, `"250ms"` or `"2h"`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Nanos(u64),
        Float(f64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
        RawDuration::Float(nanos) if nanos >= 0.0 && nanos.is_finite() => {
            Ok(Duration::from_nanos(nanos as u64))
        }
        RawDuration::Float(nanos) => Err(serde::de::Error::custom(format!(
            "invalid duration: {nanos}"
        ))),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Parses a sequence of decimal numbers each followed by a unit
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err("invalid duration: empty string".to_string());
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = text;
    let mut total_nanos = 0f64;

    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        if number_end == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;

        let after_number = &rest[number_end..];
        let unit_end = after_number.find(is_number).unwrap_or(after_number.len());
        let scale = match &after_number[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(format!("missing unit in duration {input:?}")),
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };

        total_nanos += value * scale;
        rest = &after_number[unit_end..];
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
