//! Document vault: validated, sanitized, encrypted document uploads with
//! metadata commit and rollback, served over HTTP.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
