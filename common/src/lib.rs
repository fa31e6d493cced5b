//! Ambient stack shared by the catalog services and the event consumer.

pub mod config;
pub mod correlation;
pub mod db;
pub mod error;
pub mod logging;
pub mod pagination;
pub mod shutdown;
pub mod telemetry;
