//! Operator binary support for the DNS service extension lifecycle controller

#![deny(missing_docs)]

/// Controller configuration loading (file + overrides)
pub mod settings;
/// Startup utilities (logging, CRD install)
pub mod startup;
