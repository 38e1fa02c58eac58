//! Persistence layer — libSQL-backed storage for flows, steps, customers,
//! enrollments, and webhook registrations.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Store;
