// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stat records and the bulk wire format accepted by the ingestion API.

use derive_more::Display;
use serde::Serialize;
use ustr::Ustr;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum StatKind {
    #[display("count")]
    Count,
    #[display("value")]
    Value,
}

/// A single observation. Exactly one of count or value is carried, selected by `kind`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stat {
    pub name: Ustr,
    pub kind: StatKind,
    pub value: f64,
    /// Unix seconds
    pub timestamp: i64,
}

impl Stat {
    #[must_use]
    pub fn count(name: &str, count: f64, timestamp: i64) -> Self {
        Self {
            name: Ustr::from(name),
            kind: StatKind::Count,
            value: count,
            timestamp,
        }
    }

    #[must_use]
    pub fn value(name: &str, value: f64, timestamp: i64) -> Self {
        Self {
            name: Ustr::from(name),
            kind: StatKind::Value,
            value,
            timestamp,
        }
    }

    #[must_use]
    pub fn count_now(name: &str, count: f64) -> Self {
        Self::count(name, count, unix_now())
    }

    #[must_use]
    pub fn value_now(name: &str, value: f64) -> Self {
        Self::value(name, value, unix_now())
    }
}

/// Current time in unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::UNIX_EPOCH
        .elapsed()
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
        .try_into()
        .unwrap_or_default()
}

/// One entry of the `data` array. The unset field of count/value is omitted entirely.
#[derive(Debug, Serialize, PartialEq)]
pub struct EzStat<'a> {
    pub stat: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub t: i64,
}

impl<'a> From<&'a Stat> for EzStat<'a> {
    fn from(stat: &'a Stat) -> Self {
        let (count, value) = match stat.kind {
            StatKind::Count => (Some(stat.value), None),
            StatKind::Value => (None, Some(stat.value)),
        };
        EzStat {
            stat: stat.name.as_str(),
            count,
            value,
            t: stat.timestamp,
        }
    }
}

/// Request body for a single POST to the ingestion endpoint.
#[derive(Debug, Serialize)]
pub struct BulkStat<'a> {
    pub ezkey: &'a str,
    pub data: Vec<EzStat<'a>>,
}

impl<'a> BulkStat<'a> {
    #[must_use]
    pub fn new(ezkey: &'a str, stats: &'a [Stat]) -> Self {
        BulkStat {
            ezkey,
            data: stats.iter().map(EzStat::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn count_omits_value_field() {
        let stat = Stat::count("BMo", 2353.0, 1_656_581_409);
        let encoded = serde_json::to_value(EzStat::from(&stat)).expect("serialize failed");
        assert_eq!(
            encoded,
            json!({"stat": "BMo", "count": 2353.0, "t": 1_656_581_409})
        );
    }

    #[test]
    fn value_omits_count_field() {
        let stat = Stat::value("latency", 0.0, 10);
        let encoded = serde_json::to_value(EzStat::from(&stat)).expect("serialize failed");
        assert_eq!(encoded, json!({"stat": "latency", "value": 0.0, "t": 10}));
        assert!(encoded.get("count").is_none());
    }

    #[test]
    fn bulk_envelope_keeps_order() {
        let stats = vec![
            Stat::count("a", 1.0, 1),
            Stat::value("b", 2.5, 2),
            Stat::count("c", 3.0, 3),
        ];
        let encoded =
            serde_json::to_value(BulkStat::new("EasyEKey", &stats)).expect("serialize failed");
        assert_eq!(encoded["ezkey"], "EasyEKey");
        let names: Vec<&str> = encoded["data"]
            .as_array()
            .expect("data is an array")
            .iter()
            .map(|entry| entry["stat"].as_str().expect("stat is a string"))
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn now_constructors_use_current_time() {
        let before = unix_now();
        let stat = Stat::count_now("BMo", 1.0);
        assert!(stat.timestamp >= before);
        assert!(stat.timestamp - before <= 2);
        assert_eq!(stat.kind.to_string(), "count");
    }
}
