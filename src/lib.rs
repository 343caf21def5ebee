pub mod climatology;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod model;
pub mod output;
pub mod persist;
pub mod session;
pub mod store;
pub mod time;
