//! # Database Operations
//!
//! SQLite connection management and embedded schema migrations. All durable
//! state of the orchestration core (groups, tasks, the shared pause flag)
//! lives in one database so several worker processes on a host can share it.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use geoconv_core::config::DatabaseConfig;
//! use geoconv_core::database::{DatabaseConnection, DatabaseMigrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::{begin_immediate, DatabaseConnection};
pub use migrations::DatabaseMigrations;
