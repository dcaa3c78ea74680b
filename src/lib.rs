//! Ehrenmeter: users grant each other Ehre points, backed by PostgreSQL and
//! stateless bearer tokens.

pub mod app;
pub mod auth;
pub mod config;
pub mod ledger;
pub mod state;
pub mod views;
