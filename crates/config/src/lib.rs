//! Configuration loading for the parley processes.
//!
//! Every process takes an optional TOML config path as its positional CLI
//! argument (default `conf.conf`). A missing file yields defaults; a file
//! that exists but fails to parse is a fatal init error.

mod loader;
mod schema;

pub use loader::{load_config, load_or_default};
pub use schema::{
    DEFAULT_EDGE_HTTP_PORT, DEFAULT_LOGIC_HTTP_PORT, DatabaseConfig, EdgeTuning, GrpcConfig,
    HistoryConfig, HttpConfig, KafkaConfig, MetricsConfig, ParleyConfig, RedisConfig, RoomSeed,
    SessionConfig,
};
