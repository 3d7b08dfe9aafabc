pub mod backfill;
pub mod config;
pub mod error;
pub mod livetail;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod reorg;
pub mod rpc;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod websocket;
