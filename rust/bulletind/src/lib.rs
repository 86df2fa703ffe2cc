//! Academic record aggregation with year-scoped access: grade resolution,
//! statistics, school-year classification and the year archive, plus the
//! JSON-lines sidecar that exposes them.

pub mod api;
pub mod archive;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod grades;
pub mod ipc;
pub mod logging;
pub mod model;
pub mod session;
pub mod stats;
pub mod years;
