pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod evaluator;
pub mod ingest;
pub mod notify;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod time;
