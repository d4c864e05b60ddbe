pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod ip;
pub mod snapshot;
pub mod types;
