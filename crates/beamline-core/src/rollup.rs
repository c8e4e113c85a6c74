use serde::{Deserialize, Serialize};

/// Finest time granularity the backend retains after rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryGranularity {
    /// No rollup over time; every event timestamp is retained.
    #[default]
    None,
    Second,
    Minute,
    Hour,
}

/// One aggregated column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Aggregator {
    Count { name: String },
    LongSum { name: String, field: String },
    DoubleSum { name: String, field: String },
    DoubleMin { name: String, field: String },
    DoubleMax { name: String, field: String },
}

impl Aggregator {
    pub fn count(name: impl Into<String>) -> Self {
        Aggregator::Count { name: name.into() }
    }

    pub fn long_sum(name: impl Into<String>, field: impl Into<String>) -> Self {
        Aggregator::LongSum {
            name: name.into(),
            field: field.into(),
        }
    }

    pub fn double_sum(name: impl Into<String>, field: impl Into<String>) -> Self {
        Aggregator::DoubleSum {
            name: name.into(),
            field: field.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Aggregator::Count { name }
            | Aggregator::LongSum { name, .. }
            | Aggregator::DoubleSum { name, .. }
            | Aggregator::DoubleMin { name, .. }
            | Aggregator::DoubleMax { name, .. } => name,
        }
    }
}

/// Aggregation schema declared to a backend task when its beam is opened.
///
/// Pure data; the client never aggregates, it only announces what the
/// backend should roll events up into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RollupSchema {
    pub dimensions: Vec<String>,
    pub aggregators: Vec<Aggregator>,
    pub query_granularity: QueryGranularity,
}

impl RollupSchema {
    pub fn new(
        dimensions: Vec<String>,
        aggregators: Vec<Aggregator>,
        query_granularity: QueryGranularity,
    ) -> Self {
        Self {
            dimensions,
            aggregators,
            query_granularity,
        }
    }
}
