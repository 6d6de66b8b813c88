//! Core library for the monitor-feed project.
//!
//! The monitor client keeps a live push connection to the trading backend,
//! folds pushed signals and alerts into observable collections, and reports
//! `degraded` when consumers should fall back to polling.

pub mod config;
pub mod errors;
pub mod models;
pub mod monitor;
pub mod reporter;
pub mod utils;

pub use config::{AppConfig, MonitorConfig};
pub use errors::{AppError, Result};
pub use models::{Alert, Channel, ConnectionState, Signal};
pub use monitor::{MonitorClient, Transport, WsTransport};
