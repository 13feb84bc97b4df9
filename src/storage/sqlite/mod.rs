//! `SQLite` store and its shared infrastructure.
//!
//! ## Module Structure
//!
//! - [`connection`]: lock acquisition, pragma configuration, schema
//! - [`sql`]: condition and ordering compilation
//! - `item_row`: row conversion and relation loading
//! - `metrics`: operation metrics shared with the in-memory store
//! - `store`: [`SqliteStore`]

pub mod connection;
mod item_row;
mod metrics;
pub mod sql;
mod store;

pub use connection::{acquire_lock, configure_connection, create_schema};
pub use metrics::record_operation_metrics;
pub use sql::{WhereClause, compile_condition, order_clause};
pub use store::SqliteStore;
