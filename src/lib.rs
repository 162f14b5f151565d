pub mod ablation;
pub mod config;
pub mod experiment;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod persist;
pub mod prepare;
pub mod run_context;
pub mod run_meta;
pub mod schema;
pub mod series;
pub mod split;
