//! Custom Resource Definitions for the DNS lifecycle controller

mod extension;
mod types;

pub use extension::{
    DnsExtension, DnsExtensionSpec, DnsExtensionStatus, ExtensionKey, OperationRequest,
};
pub use types::{
    set_condition, Condition, ConditionStatus, ErrorCode, LastError, LastOperation,
    LifecycleState, OperationState, OperationType,
};
