//! Reconciliation state machine
//!
//! Each execution re-reads the extension, derives the operation from its
//! fields (the queue hint is advisory only), runs it against the target
//! cluster and records the outcome in status. Operations:
//!
//! - Reconcile: finalizer, apply, `Create`/`Reconcile` succeeded
//! - Delete: remove component, release finalizer (teardown)
//! - Migrate: optionally remove, release finalizer (teardown or handover)
//! - Restore: finalizer, apply in `Fresh` mode (kept objects no longer rendered are pruned)
//!
//! The status block is patched once per execution. Operation annotations
//! are cleared only after that write lands: a lost status write must leave
//! the signal in place so the retry runs the same operation again.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use dns_lifecycle_common::crd::{
    set_condition, Condition, ConditionStatus, DnsExtension, DnsExtensionStatus, ErrorCode,
    LastError, LastOperation, OperationRequest, OperationState, OperationType,
};
use dns_lifecycle_common::Error;

use crate::applier::{ApplyMode, ComponentApplier};
use crate::client::ExtensionClient;
use crate::config::{ControllerConfig, MigrationMode};
use crate::finalizer::{FinalizerManager, ReleaseReason};
use crate::queue::ReconcileOperation;

/// Condition type reflecting whether the component is installed
pub const READY_CONDITION: &str = "Ready";

/// Operation to execute
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Install or update
    Reconcile,
    /// Tear down ahead of deletion
    Delete,
    /// Hand over to another instance
    Migrate,
    /// Re-install after a handover
    Restore,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reconcile => write!(f, "reconcile"),
            Self::Delete => write!(f, "delete"),
            Self::Migrate => write!(f, "migrate"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// Why nothing was done
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The object no longer exists
    Gone,
    /// `spec.type` is handled by another controller
    TypeMismatch,
    /// Deleting, but our finalizer is already gone
    AwaitingRemoval,
    /// Migrated; only a restore brings it back
    Migrated,
}

/// Operation selection result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Run this operation
    Execute(Operation),
    /// Do nothing
    Skip(SkipReason),
}

/// Execution result as seen by the worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Finished (success, skip, or permanent failure recorded in status)
    Done,
    /// Transient failure; requeue with backoff
    RetryWithBackoff,
}

/// Settings the actuator acts on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActuatorConfig {
    /// Only this `spec.type` is handled
    pub extension_type: String,
    /// Ignore the user-facing operation annotation
    pub ignore_operation_annotation: bool,
    /// Behavior of Migrate
    pub migration_mode: MigrationMode,
}

impl From<&ControllerConfig> for ActuatorConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            extension_type: config.extension_type.clone(),
            ignore_operation_annotation: config.ignore_operation_annotation,
            migration_mode: config.migration_mode,
        }
    }
}

/// Pick the operation for the current state of `ext`
///
/// A deletion timestamp beats every annotation. The planned-operation
/// signal beats the user annotation, which is ignored entirely when so
/// configured.
pub fn determine_operation(ext: &DnsExtension, config: &ActuatorConfig) -> Decision {
    if ext.spec.type_ != config.extension_type {
        return Decision::Skip(SkipReason::TypeMismatch);
    }

    if ext.is_being_deleted() {
        return if ext.has_finalizer() {
            Decision::Execute(Operation::Delete)
        } else {
            Decision::Skip(SkipReason::AwaitingRemoval)
        };
    }

    let requested = ext.planned_operation().or_else(|| {
        if config.ignore_operation_annotation {
            None
        } else {
            ext.operation_annotation()
        }
    });

    match requested {
        Some(OperationRequest::Migrate) => Decision::Execute(Operation::Migrate),
        Some(OperationRequest::Restore) => Decision::Execute(Operation::Restore),
        Some(OperationRequest::Reconcile) | None if ext.is_migrated() => {
            Decision::Skip(SkipReason::Migrated)
        }
        Some(OperationRequest::Reconcile) | None => Decision::Execute(Operation::Reconcile),
    }
}

/// Success record of an operation, turned into status by [`Actuator`]
struct Completed {
    type_: OperationType,
    description: String,
    observed_generation: Option<i64>,
    ready: Condition,
}

/// Drives extensions through their lifecycle
pub struct Actuator {
    client: Arc<dyn ExtensionClient>,
    component: Arc<dyn ComponentApplier>,
    finalizers: FinalizerManager,
    config: ActuatorConfig,
}

impl Actuator {
    /// Create an actuator
    pub fn new(
        client: Arc<dyn ExtensionClient>,
        component: Arc<dyn ComponentApplier>,
        config: ActuatorConfig,
    ) -> Self {
        let finalizers = FinalizerManager::new(client.clone(), component.clone());
        Self {
            client,
            component,
            finalizers,
            config,
        }
    }

    /// Process one queue item; `attempt` is 1 for the first try
    pub async fn process(&self, op: &ReconcileOperation, attempt: u32) -> Outcome {
        let ext = match self.client.get(&op.key).await {
            Ok(Some(ext)) => ext,
            Ok(None) => {
                debug!(extension = %op.key, "extension gone, nothing to do");
                return Outcome::Done;
            }
            Err(e) => {
                warn!(extension = %op.key, error = %e, "failed to read extension");
                return if e.is_retryable() {
                    Outcome::RetryWithBackoff
                } else {
                    Outcome::Done
                };
            }
        };

        match determine_operation(&ext, &self.config) {
            Decision::Execute(operation) => {
                debug!(
                    extension = %op.key,
                    hint = %op.hint,
                    trigger = %op.trigger,
                    %operation,
                    "executing"
                );
                self.execute(&ext, operation, attempt).await
            }
            Decision::Skip(reason) => {
                debug!(extension = %op.key, ?reason, "skipping");
                Outcome::Done
            }
        }
    }

    /// Run `operation` and record its outcome
    #[instrument(skip(self, ext), fields(extension = %ext.key()))]
    pub async fn execute(&self, ext: &DnsExtension, operation: Operation, attempt: u32) -> Outcome {
        let result = match operation {
            Operation::Reconcile => self.reconcile(ext).await,
            Operation::Delete => self.delete(ext).await,
            Operation::Migrate => self.migrate(ext).await,
            Operation::Restore => self.restore(ext).await,
        };

        match result {
            Ok(completed) => self.record_success(ext, operation, completed).await,
            Err(e) => self.record_failure(ext, operation, attempt, e).await,
        }
    }

    async fn reconcile(&self, ext: &DnsExtension) -> Result<Completed, Error> {
        self.finalizers.ensure_present(ext).await?;
        self.component.apply(ext, ApplyMode::Incremental).await?;

        let type_ = reconcile_type(ext);
        Ok(Completed {
            type_,
            description: format!("{} succeeded for generation {}", type_, ext.generation()),
            observed_generation: Some(ext.generation()),
            ready: Condition::new(
                READY_CONDITION,
                ConditionStatus::True,
                "Reconciled",
                "DNS service component is installed",
            ),
        })
    }

    async fn delete(&self, ext: &DnsExtension) -> Result<Completed, Error> {
        self.component.remove(ext).await?;
        self.finalizers.release(ext, ReleaseReason::Teardown).await?;

        Ok(Completed {
            type_: OperationType::Delete,
            description: "component removed".to_string(),
            observed_generation: ext.observed_generation(),
            ready: Condition::new(
                READY_CONDITION,
                ConditionStatus::False,
                "Deleted",
                "DNS service component was removed",
            ),
        })
    }

    async fn migrate(&self, ext: &DnsExtension) -> Result<Completed, Error> {
        let (reason, description) = match self.config.migration_mode {
            MigrationMode::RemoveManagedObjects => {
                self.component.remove(ext).await?;
                (ReleaseReason::Teardown, "component removed for migration")
            }
            MigrationMode::KeepManagedObjects => (
                ReleaseReason::Handover,
                "component handed over with objects kept",
            ),
        };
        self.finalizers.release(ext, reason).await?;

        Ok(Completed {
            type_: OperationType::Migrate,
            description: description.to_string(),
            observed_generation: ext.observed_generation(),
            ready: Condition::new(
                READY_CONDITION,
                ConditionStatus::False,
                "Migrated",
                "DNS service component is managed elsewhere",
            ),
        })
    }

    async fn restore(&self, ext: &DnsExtension) -> Result<Completed, Error> {
        self.finalizers.ensure_present(ext).await?;
        self.component.apply(ext, ApplyMode::Fresh).await?;

        Ok(Completed {
            type_: OperationType::Restore,
            description: format!("restore succeeded for generation {}", ext.generation()),
            observed_generation: Some(ext.generation()),
            ready: Condition::new(
                READY_CONDITION,
                ConditionStatus::True,
                "Restored",
                "DNS service component is installed",
            ),
        })
    }

    async fn clear_annotations(&self, ext: &DnsExtension) -> Result<(), Error> {
        if ext.has_operation_signal() {
            self.client.clear_operation_annotations(&ext.key()).await?;
        }
        Ok(())
    }

    async fn record_success(
        &self,
        ext: &DnsExtension,
        operation: Operation,
        completed: Completed,
    ) -> Outcome {
        let mut status = ext.status.clone().unwrap_or_default();
        status.observed_generation = completed.observed_generation;
        status.last_operation = Some(LastOperation::new(
            completed.type_,
            OperationState::Succeeded,
            completed.description,
        ));
        status.last_error = None;
        set_condition(&mut status.conditions, completed.ready);

        match self.write_status(ext, &status).await {
            Ok(()) => {}
            // Finalizer released and the object collected before the final write
            Err(e) if operation == Operation::Delete && e.is_not_found() => {
                info!(extension = %ext.key(), %operation, "operation succeeded");
                return Outcome::Done;
            }
            Err(e) => {
                warn!(extension = %ext.key(), error = %e, "failed to record success");
                return Outcome::RetryWithBackoff;
            }
        }

        if operation != Operation::Delete {
            if let Err(e) = self.clear_annotations(ext).await {
                warn!(extension = %ext.key(), error = %e, "failed to clear operation annotations");
                return Outcome::RetryWithBackoff;
            }
        }
        info!(extension = %ext.key(), %operation, "operation succeeded");
        Outcome::Done
    }

    async fn record_failure(
        &self,
        ext: &DnsExtension,
        operation: Operation,
        attempt: u32,
        err: Error,
    ) -> Outcome {
        let retryable = err.is_retryable();
        let (state, description) = if retryable {
            (
                OperationState::Error,
                format!("{} failed (attempt {}): {}", operation, attempt, err),
            )
        } else {
            (
                OperationState::Failed,
                format!("{} failed: {}", operation, err),
            )
        };

        if retryable {
            warn!(extension = %ext.key(), %operation, attempt, error = %err, "operation failed, will retry");
        } else {
            error!(extension = %ext.key(), %operation, error = %err, "operation failed permanently");
        }

        let type_ = match operation {
            Operation::Reconcile => reconcile_type(ext),
            Operation::Delete => OperationType::Delete,
            Operation::Migrate => OperationType::Migrate,
            Operation::Restore => OperationType::Restore,
        };

        let mut status = ext.status.clone().unwrap_or_default();
        status.last_operation = Some(LastOperation::new(type_, state, description.clone()));
        status.last_error = Some(LastError::new(description, error_codes(&err)));
        set_condition(
            &mut status.conditions,
            Condition::new(
                READY_CONDITION,
                ConditionStatus::False,
                format!("{}{}", type_, state),
                err.to_string(),
            ),
        );

        if let Err(e) = self.write_status(ext, &status).await {
            if e.is_not_found() {
                return Outcome::Done;
            }
            warn!(extension = %ext.key(), error = %e, "failed to record failure");
            return Outcome::RetryWithBackoff;
        }

        if retryable {
            Outcome::RetryWithBackoff
        } else {
            Outcome::Done
        }
    }

    async fn write_status(&self, ext: &DnsExtension, status: &DnsExtensionStatus) -> Result<(), Error> {
        self.client.patch_status(&ext.key(), status).await
    }
}

/// `Create` until the first successful install, `Reconcile` afterwards
fn reconcile_type(ext: &DnsExtension) -> OperationType {
    if ext.observed_generation().is_none() {
        OperationType::Create
    } else {
        OperationType::Reconcile
    }
}

/// Classify an error for `status.lastError.codes`
pub fn error_codes(err: &Error) -> Vec<ErrorCode> {
    let code = match err {
        Error::PermanentConfig { .. } | Error::Serialization { .. } => {
            ErrorCode::ConfigurationProblem
        }
        Error::Render { permanent: true, .. } => ErrorCode::ConfigurationProblem,
        Error::PreconditionFailed { .. } => ErrorCode::CleanupClusterResources,
        Error::Kube {
            source: kube::Error::Api(ae),
        } if ae.code == 401 || ae.code == 403 => ErrorCode::InsufficientPrivileges,
        e if e.is_retryable() => ErrorCode::RetryableInfraDependencies,
        _ => ErrorCode::InfraDependencies,
    };
    vec![code]
}
