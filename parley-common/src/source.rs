//! Parameter sources consulted after the config file is parsed.
//!
//! A [`ConfigSource`] is a synchronous key/value lookup that is fully
//! populated before the relay starts. The environment is the production
//! source; [`MapSource`] backs tests.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Synchronous parameter lookup.
pub trait ConfigSource: Send + Sync {
    /// Look up a parameter. Empty values are treated as absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Look up and parse a parameter. Present-but-unparseable is an error.
    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
        Self: Sized,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| Error::Config(format!("invalid value for {key}: {e}"))),
            None => Ok(None),
        }
    }
}

/// Reads parameters from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// In-memory parameter source.
#[derive(Debug, Default, Clone)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_source_get() {
        let source = MapSource::new().with("BOT_NAME", "pepe").with("EMPTY", "");
        assert_eq!(source.get("BOT_NAME").as_deref(), Some("pepe"));
        assert!(source.get("EMPTY").is_none());
        assert!(source.get("MISSING").is_none());
    }

    #[test]
    fn map_source_parse() {
        let source = MapSource::new().with("LEN", " 4096 ").with("BAD", "lots");
        assert_eq!(source.parse::<usize>("LEN").unwrap(), Some(4096));
        assert_eq!(source.parse::<usize>("NOPE").unwrap(), None);
        assert!(source.parse::<usize>("BAD").unwrap_err().is_config());
    }
}
