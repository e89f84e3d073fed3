//! Hydra services.

pub mod orchestrator;
pub mod pg_registry;
pub mod pipeline;
pub mod port_allocator;
pub mod process_runner;
pub mod recovery;
pub mod registry;
pub mod serving;
pub mod site_builder;
pub mod source_control;
pub mod worker;
