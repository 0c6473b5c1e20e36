//! Callback traits for front ends
//!
//! These traits allow the engine to report progress and ask for
//! confirmation without depending on a terminal UI.

use crate::error::Result;
use crate::types::OperationOutcome;

/// Progress callback for deploy execution
///
/// Implement this trait to receive progress updates during execution.
/// Host results are reported once their operation has drained.
pub trait ProgressCallback: Send {
    /// Called when an operation is dispatched to `hosts` hosts
    fn on_operation_start(&mut self, name: &str, hosts: usize);

    /// Called once per host with that host's outcome
    fn on_host_complete(&mut self, name: &str, host: &str, outcome: &OperationOutcome);

    /// Called when every host of the operation has finished
    fn on_operation_complete(&mut self, name: &str);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_operation_start(&mut self, _name: &str, _hosts: usize) {}
    fn on_host_complete(&mut self, _name: &str, _host: &str, _outcome: &OperationOutcome) {}
    fn on_operation_complete(&mut self, _name: &str) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}
