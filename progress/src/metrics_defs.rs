//! Metrics definitions for the progress API.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ENTRIES_WRITTEN: MetricDef = MetricDef {
    name: "entries.written",
    metric_type: MetricType::Counter,
    description: "Number of entry rows written by ingestion",
};

pub const MEASURES_WRITTEN: MetricDef = MetricDef {
    name: "measures.written",
    metric_type: MetricType::Counter,
    description: "Number of measure rows written by ingestion",
};

pub const INGEST_REJECTED: MetricDef = MetricDef {
    name: "ingest.rejected",
    metric_type: MetricType::Counter,
    description: "Number of entry batches rejected before or during persistence",
};

pub const INGEST_DURATION: MetricDef = MetricDef {
    name: "ingest.duration",
    metric_type: MetricType::Histogram,
    description: "Time to validate and persist an entry batch in seconds",
};

pub const ENTRY_CACHE_HIT: MetricDef = MetricDef {
    name: "entry_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of full history reads served from the entry cache",
};

pub const ENTRY_CACHE_MISS: MetricDef = MetricDef {
    name: "entry_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of full history reads that missed the entry cache",
};

pub const ENTRY_CACHE_ERROR: MetricDef = MetricDef {
    name: "entry_cache.error",
    metric_type: MetricType::Counter,
    description: "Number of entry cache backend failures",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ENTRIES_WRITTEN,
    MEASURES_WRITTEN,
    INGEST_REJECTED,
    INGEST_DURATION,
    ENTRY_CACHE_HIT,
    ENTRY_CACHE_MISS,
    ENTRY_CACHE_ERROR,
];
