pub mod catalog;
pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod money;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod reaper;
pub mod wal;
pub mod wire;
