//! Reconciliation engine for the DNS service extension
//!
//! Watch notifications pass the [`filter`] into a deduplicating [`queue`];
//! a bounded worker pool hands each key to the [`actuator`], which drives
//! the extension through Reconcile, Delete, Migrate and Restore using the
//! [`applier`] and the [`finalizer`] manager. A [`resync`] scheduler
//! periodically re-enqueues the whole cache.

#![deny(missing_docs)]

pub mod actuator;
pub mod applier;
pub mod client;
pub mod config;
pub mod controller;
pub mod filter;
pub mod finalizer;
pub mod queue;
pub mod resync;
pub mod source;

#[cfg(test)]
mod testing;

pub use actuator::{determine_operation, Actuator, ActuatorConfig, Operation, Outcome};
pub use config::{ControllerConfig, MigrationMode};
pub use controller::Controller;
