//! Server configuration from `VENUEBOOK_*` environment variables.

use std::fmt;
use std::path::PathBuf;

use crate::calendar::parse_hhmm;
use crate::model::WorkingHours;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Working hours given to lazily created day records.
    pub default_hours: WorkingHours,
}

#[derive(Debug, PartialEq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5480,
            data_dir: PathBuf::from("./data"),
            password: "venuebook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            default_hours: WorkingHours::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their
    /// defaults, set-but-unparseable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("VENUEBOOK_BIND") {
            config.bind = v;
        }
        if let Some(v) = lookup("VENUEBOOK_PORT") {
            config.port = parse(&v, "VENUEBOOK_PORT")?;
        }
        if let Some(v) = lookup("VENUEBOOK_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VENUEBOOK_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = lookup("VENUEBOOK_MAX_CONNECTIONS") {
            config.max_connections = parse(&v, "VENUEBOOK_MAX_CONNECTIONS")?;
            if config.max_connections == 0 {
                return Err(ConfigError { var: "VENUEBOOK_MAX_CONNECTIONS", value: v });
            }
        }
        if let Some(v) = lookup("VENUEBOOK_COMPACT_THRESHOLD") {
            config.compact_threshold = parse(&v, "VENUEBOOK_COMPACT_THRESHOLD")?;
        }
        if let Some(v) = lookup("VENUEBOOK_METRICS_PORT") {
            config.metrics_port = Some(parse(&v, "VENUEBOOK_METRICS_PORT")?);
        }
        if let Some(v) = lookup("VENUEBOOK_DEFAULT_HOURS") {
            config.default_hours = parse_hours(&v).ok_or(ConfigError {
                var: "VENUEBOOK_DEFAULT_HOURS",
                value: v.clone(),
            })?;
        }

        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("venuebook.wal")
    }
}

fn parse<T: std::str::FromStr>(value: &str, var: &'static str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError {
        var,
        value: value.to_string(),
    })
}

/// `HH:mm-HH:mm`, e.g. `08:30-18:00`.
fn parse_hours(value: &str) -> Option<WorkingHours> {
    let (start, end) = value.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    if parse_hhmm(start)? >= parse_hhmm(end)? {
        return None;
    }
    Some(WorkingHours {
        start: start.to_string(),
        end: end.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5480");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.default_hours, WorkingHours::default());
        assert_eq!(config.wal_path(), PathBuf::from("./data/venuebook.wal"));
    }

    #[test]
    fn overrides_from_env() {
        let config = Config::from_lookup(lookup(&[
            ("VENUEBOOK_PORT", "7000"),
            ("VENUEBOOK_BIND", "127.0.0.1"),
            ("VENUEBOOK_METRICS_PORT", "9100"),
            ("VENUEBOOK_DEFAULT_HOURS", "08:30-18:00"),
            ("VENUEBOOK_COMPACT_THRESHOLD", "50"),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:7000");
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.default_hours.start, "08:30");
        assert_eq!(config.default_hours.end, "18:00");
    }

    #[test]
    fn bad_values_are_reported() {
        let err = Config::from_lookup(lookup(&[("VENUEBOOK_PORT", "http")])).unwrap_err();
        assert_eq!(err.var, "VENUEBOOK_PORT");
        assert!(Config::from_lookup(lookup(&[("VENUEBOOK_MAX_CONNECTIONS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("VENUEBOOK_DEFAULT_HOURS", "18:00-08:00")])).is_err());
        assert!(Config::from_lookup(lookup(&[("VENUEBOOK_DEFAULT_HOURS", "nine to five")])).is_err());
    }
}
