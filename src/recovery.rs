//! Recovery for stacks CloudFormation will no longer operate on.
//!
//! A stack left in `REVIEW_IN_PROGRESS` can only be deleted. Recovery runs
//! once, in order: drop the failed change set (best effort), delete the
//! stack, wait for the delete. Nothing here retries; a failure stops the
//! sequence and the caller prints [`manual_commands`].

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::aws::CloudApi;
use crate::error::{AppError, Result};
use crate::poll::Interrupt;

/// Name the CDK CLI gives the change set it creates on deploy.
pub const CHANGE_SET_NAME: &str = "cdk-deploy-change-set";

pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// False when there was no change set to delete (or it could not be).
    pub change_set_deleted: bool,
    pub waited: Duration,
}

pub struct StackRecovery<'a> {
    api: &'a dyn CloudApi,
    interrupt: &'a Interrupt,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a> StackRecovery<'a> {
    pub fn new(api: &'a dyn CloudApi, interrupt: &'a Interrupt) -> Self {
        Self {
            api,
            interrupt,
            timeout: DEFAULT_DELETE_TIMEOUT,
            poll_interval: DELETE_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Delete `stack` and wait until it is gone. `progress` receives one line
    /// per step for the operator.
    pub fn recover(&self, stack: &str, progress: impl Fn(&str)) -> Result<RecoveryReport> {
        self.interrupt.check()?;
        progress(&format!("Deleting change set {}...", CHANGE_SET_NAME));
        let change_set_deleted = match self.api.delete_change_set(stack, CHANGE_SET_NAME) {
            Ok(()) => true,
            Err(e) => {
                warn!(stack, error = %e, "change set not deleted; continuing");
                progress("  No change set to delete (continuing)");
                false
            }
        };

        progress(&format!("Deleting stack {}...", stack));
        self.api.delete_stack(stack).map_err(|e| AppError::StackDeleteFailed {
            stack: stack.to_string(),
            reason: e.to_string(),
        })?;
        info!(stack, "delete-stack accepted");

        progress(&format!("Waiting for deletion (up to {}s)...", self.timeout.as_secs()));
        let waited = self.wait_for_delete(stack)?;
        progress(&format!("Stack deleted after {}s", waited.as_secs()));
        Ok(RecoveryReport { change_set_deleted, waited })
    }

    fn wait_for_delete(&self, stack: &str) -> Result<Duration> {
        let started = Instant::now();
        loop {
            match self.api.describe_stack(stack)? {
                None => return Ok(started.elapsed()),
                Some(s) if s.raw_status == "DELETE_COMPLETE" => return Ok(started.elapsed()),
                Some(s) if s.raw_status == "DELETE_FAILED" => {
                    return Err(AppError::StackDeleteFailed {
                        stack: stack.to_string(),
                        reason: s.status_reason.unwrap_or_else(|| "DELETE_FAILED".to_string()),
                    });
                }
                Some(_) => {}
            }
            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(AppError::DeleteTimeout {
                    stack: stack.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
            if !self.interrupt.sleep(self.poll_interval.min(self.timeout - elapsed)) {
                return Err(AppError::Interrupted);
            }
        }
    }
}

/// The AWS CLI commands an operator runs to finish recovery by hand.
pub fn manual_commands(stack: &str, region: &str) -> Vec<String> {
    vec![
        format!(
            "aws cloudformation delete-change-set --stack-name {stack} --change-set-name {CHANGE_SET_NAME} --region {region}"
        ),
        format!("aws cloudformation delete-stack --stack-name {stack} --region {region}"),
        format!("aws cloudformation wait stack-delete-complete --stack-name {stack} --region {region}"),
    ]
}
