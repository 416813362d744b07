pub mod config;
pub mod csv;
pub mod trace;

pub use config::{CacheConfig, Config, SimConfig, SimSetup, TrafficConfig};
pub use csv::{CsvBackend, JsonBackend, StatsRecord};
pub use trace::{TraceReader, TrafficGen, TRACE_RECORD_BYTES};
