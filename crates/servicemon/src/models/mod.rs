pub mod stats;

pub use stats::{
    INTERVAL_DO_QUERY, INTERVAL_GATHER_METADATA, INTERVAL_STREAM_TO_FILE, Interval, ParamValue,
    QueryParams, QueryStats, QueryStatsRecord, ResultMetadata, STATS_SCHEMA_VERSION, json_schema,
};
