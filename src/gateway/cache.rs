use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::clock::elapsed_secs;

/// Cached response with its capture time
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

/// Response cache keyed by endpoint and parameters
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
}

impl ResponseCache {
    /// Live entry younger than `ttl`, if any
    pub fn get(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<Value> {
        let entry = self.entries.get(key)?;
        let age = elapsed_secs(now, entry.timestamp);
        (age >= 0.0 && age < ttl.as_secs_f64()).then(|| entry.value.clone())
    }

    pub fn insert(&mut self, key: String, value: Value, now: DateTime<Utc>) {
        self.entries.insert(
            key,
            CacheEntry {
                timestamp: now,
                value,
            },
        );
    }
}

/// Stable key for an endpoint and its query parameters
pub fn cache_key(endpoint: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return endpoint.to_string();
    }
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort_unstable();
    let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", endpoint, query.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    #[test]
    fn entries_expire_after_ttl() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut cache = ResponseCache::default();
        cache.insert("flow".into(), json!({"pv": 1}), t0);

        let ttl = Duration::from_secs(45);
        assert!(cache.get("flow", ttl, t0 + TimeDelta::seconds(44)).is_some());
        assert!(cache.get("flow", ttl, t0 + TimeDelta::seconds(45)).is_none());
        assert!(cache.get("other", ttl, t0).is_none());
    }

    #[test]
    fn key_ignores_parameter_order() {
        assert_eq!(
            cache_key("overview", &[("b", "2"), ("a", "1")]),
            cache_key("overview", &[("a", "1"), ("b", "2")])
        );
        assert_eq!(cache_key("flow", &[]), "flow");
    }
}
