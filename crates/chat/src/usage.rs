//! Token usage reported by the chat API, normalized to one record.
//!
//! Backends report usage in one of two key styles:
//!
//! | field        | [`UsageShape::Snake`] | [`UsageShape::Camel`] |
//! |--------------|-----------------------|-----------------------|
//! | cache reads  | `cache_read`          | `cacheRead`           |
//! | cache writes | `cache_write`         | `cacheWrite`          |
//! | total        | `total_tokens`        | `totalTokens`         |
//!
//! `input` and `output` are shared. Missing fields are zero.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageCost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost: UsageCost,
}

/// Key style of a raw usage object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageShape {
    Snake,
    Camel,
}

impl UsageShape {
    /// Snake case if any snake-only key is present, camel case otherwise.
    pub fn detect(raw: &Map<String, Value>) -> Self {
        const SNAKE_KEYS: [&str; 3] = ["cache_read", "cache_write", "total_tokens"];
        if SNAKE_KEYS.iter().any(|k| raw.contains_key(*k)) {
            Self::Snake
        } else {
            Self::Camel
        }
    }

    fn cache_read(self) -> &'static str {
        match self {
            Self::Snake => "cache_read",
            Self::Camel => "cacheRead",
        }
    }

    fn cache_write(self) -> &'static str {
        match self {
            Self::Snake => "cache_write",
            Self::Camel => "cacheWrite",
        }
    }

    fn total_tokens(self) -> &'static str {
        match self {
            Self::Snake => "total_tokens",
            Self::Camel => "totalTokens",
        }
    }
}

fn count(raw: &Map<String, Value>, key: &str) -> u64 {
    raw.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .unwrap_or(0)
}

fn amount(raw: &Map<String, Value>, key: &str) -> f64 {
    raw.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn normalize_cost(raw: &Map<String, Value>) -> UsageCost {
    let shape = UsageShape::detect(raw);
    UsageCost {
        input: amount(raw, "input"),
        output: amount(raw, "output"),
        cache_read: amount(raw, shape.cache_read()),
        cache_write: amount(raw, shape.cache_write()),
        total: amount(raw, "total"),
    }
}

/// Normalize a raw usage value. Anything that is not an object yields
/// all zeros.
pub fn normalize_usage(raw: Option<&Value>) -> TokenUsage {
    let Some(raw) = raw.and_then(Value::as_object) else {
        return TokenUsage::default();
    };
    let shape = UsageShape::detect(raw);
    TokenUsage {
        input: count(raw, "input"),
        output: count(raw, "output"),
        cache_read: count(raw, shape.cache_read()),
        cache_write: count(raw, shape.cache_write()),
        total_tokens: count(raw, shape.total_tokens()),
        cost: raw
            .get("cost")
            .and_then(Value::as_object)
            .map(normalize_cost)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn snake_case_usage() {
        let usage = normalize_usage(Some(&json!({
            "input": 10,
            "output": 5,
            "cache_read": 3,
            "cache_write": 1,
            "total_tokens": 19,
            "cost": { "input": 0.01, "output": 0.02, "cache_read": 0.001, "total": 0.031 }
        })));
        assert_eq!(usage.cache_read, 3);
        assert_eq!(usage.cache_write, 1);
        assert_eq!(usage.total_tokens, 19);
        assert_eq!(usage.cost.cache_read, 0.001);
        assert_eq!(usage.cost.cache_write, 0.0);
        assert_eq!(usage.cost.total, 0.031);
    }

    #[test]
    fn camel_case_usage() {
        let usage = normalize_usage(Some(&json!({
            "input": 7,
            "cacheRead": 2,
            "totalTokens": 9
        })));
        assert_eq!(usage.input, 7);
        assert_eq!(usage.output, 0);
        assert_eq!(usage.cache_read, 2);
        assert_eq!(usage.total_tokens, 9);
        assert_eq!(usage.cost, UsageCost::default());
    }

    #[test]
    fn missing_or_malformed_usage_is_zero() {
        assert_eq!(normalize_usage(None), TokenUsage::default());
        assert_eq!(normalize_usage(Some(&json!("n/a"))), TokenUsage::default());
        assert_eq!(
            normalize_usage(Some(&json!({ "input": "lots" }))),
            TokenUsage::default()
        );
    }

    #[test]
    fn serializes_camel_case() {
        let usage = normalize_usage(Some(&json!({ "input": 10, "output": 5 })));
        assert_eq!(
            serde_json::to_value(usage).unwrap(),
            json!({
                "input": 10,
                "output": 5,
                "cacheRead": 0,
                "cacheWrite": 0,
                "totalTokens": 0,
                "cost": { "input": 0.0, "output": 0.0, "cacheRead": 0.0, "cacheWrite": 0.0, "total": 0.0 }
            })
        );
    }
}
