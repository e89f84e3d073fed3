//! Hydra builds static sites from git branches and serves each one on
//! its own port.
//!
//! A submission names a repository and branch. A background pipeline
//! clones it into a scratch directory, checks out the branch, runs the site
//! builder, allocates a port from a small window and publishes (or serves)
//! the output. Operators can kill or rebuild any submission while a run is
//! in flight; the startup sweep reconciles records left by a previous
//! process.

pub mod config;
pub mod error;
pub mod metrics;
pub mod migration;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
