//! Event filter
//!
//! Decides from an (old, new) pair whether a watch notification warrants a
//! reconciliation. Pure: no I/O, no shared state. Status writes made by the
//! controller itself change neither generation nor annotations nor the
//! deletion timestamp, so they are always rejected here.

use std::sync::Arc;

use dns_lifecycle_common::crd::{DnsExtension, OperationRequest};

use crate::queue::OperationHint;

/// A change observed on the watch
#[derive(Clone, Debug)]
pub enum Notification {
    /// Object created or updated; `old` is the previously cached version
    Applied {
        /// Previous version, `None` on first observation
        old: Option<Arc<DnsExtension>>,
        /// Current version
        new: Arc<DnsExtension>,
    },
    /// Object gone from the API server
    Removed(Arc<DnsExtension>),
}

impl Notification {
    /// The most recent version of the object
    pub fn object(&self) -> &Arc<DnsExtension> {
        match self {
            Self::Applied { new, .. } => new,
            Self::Removed(obj) => obj,
        }
    }
}

/// Filter settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterConfig {
    /// Only this `spec.type` is handled
    pub extension_type: String,
    /// Ignore the user-facing operation annotation
    pub ignore_operation_annotation: bool,
}

/// Why a notification was dropped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The object is gone; the finalizer flow already ran
    Removed,
    /// `spec.type` belongs to another controller
    TypeMismatch,
    /// Nothing a reconciliation would act on changed
    NoRelevantChange,
    /// First observation of an object already reconciled
    AlreadyReconciled,
}

/// Filter verdict
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Enqueue with this hint
    Accept(OperationHint),
    /// Drop
    Reject(RejectReason),
}

fn hint_for(request: OperationRequest) -> OperationHint {
    match request {
        OperationRequest::Reconcile => OperationHint::Reconcile,
        OperationRequest::Migrate => OperationHint::Migrate,
        OperationRequest::Restore => OperationHint::Restore,
    }
}

/// Classify a notification
pub fn filter(notification: &Notification, config: &FilterConfig) -> Decision {
    let (old, new) = match notification {
        Notification::Removed(_) => return Decision::Reject(RejectReason::Removed),
        Notification::Applied { old, new } => (old.as_deref(), new.as_ref()),
    };

    if new.spec.type_ != config.extension_type {
        return Decision::Reject(RejectReason::TypeMismatch);
    }

    if new.is_being_deleted() {
        return if old.map_or(true, |o| !o.is_being_deleted()) {
            Decision::Accept(OperationHint::Delete)
        } else {
            Decision::Reject(RejectReason::NoRelevantChange)
        };
    }

    if let Some(planned) = new.planned_operation() {
        if old.map_or(true, |o| o.planned_operation() != Some(planned)) {
            return Decision::Accept(hint_for(planned));
        }
    }

    if !config.ignore_operation_annotation {
        if let Some(raw) = new.operation_annotation_raw() {
            let changed = old.map_or(true, |o| o.operation_annotation_raw() != Some(raw));
            if changed {
                if let Some(request) = OperationRequest::parse(raw) {
                    return Decision::Accept(hint_for(request));
                }
            }
        }
    }

    match old {
        Some(o) if new.generation() > o.generation() => Decision::Accept(OperationHint::Reconcile),
        Some(_) => Decision::Reject(RejectReason::NoRelevantChange),
        None if !new.is_reconciled() => Decision::Accept(OperationHint::Reconcile),
        None => Decision::Reject(RejectReason::AlreadyReconciled),
    }
}
