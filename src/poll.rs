//! Status polling: when is a deployment done, and the refresh loop that
//! watches it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{ServiceHealth, StatusResult};

/// How often a sleeping loop checks for Ctrl-C.
const INTERRUPT_TICK: Duration = Duration::from_millis(100);

/// Cancellation flag shared between the Ctrl-C handler and whatever is
/// waiting. Checked at every tick boundary.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT to this flag. Only one handler may be installed per process.
    pub fn install_ctrlc(&self) -> Result<()> {
        let flag = self.0.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .map_err(|e| AppError::Other(format!("cannot install Ctrl-C handler: {}", e)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once Ctrl-C has been pressed.
    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            return Err(AppError::Interrupted);
        }
        Ok(())
    }

    /// Child processes get the same SIGINT and fail on their own; a failure
    /// that follows Ctrl-C is reported as the interrupt.
    pub fn or_interrupted<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(_) if self.is_set() => Err(AppError::Interrupted),
            other => other,
        }
    }

    /// Sleep for `duration`, waking early on interrupt. Returns `false` if
    /// interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(INTERRUPT_TICK.min(deadline - now));
        }
    }
}

/// A poll has settled when CloudFormation is in a stable `_COMPLETE` or
/// `_FAILED` state and no ECS service is still rolling out or starting
/// tasks. CloudFormation reports `UPDATE_COMPLETE` while ECS may still be
/// replacing tasks.
pub fn is_terminal(stack_status: &str, services: &[ServiceHealth]) -> bool {
    let stack_stable = stack_status.ends_with("_COMPLETE") || stack_status.ends_with("_FAILED");
    stack_stable && !services.iter().any(|s| s.is_rolling_out() || s.pending > 0)
}

/// [`is_terminal`] over an aggregated result. A stack that never existed has
/// nothing to wait for; unavailable ECS data counts as no services.
pub fn result_is_terminal(result: &StatusResult) -> bool {
    if !result.stack.exists && !result.stack.is_deleted() {
        return true;
    }
    is_terminal(&result.stack.raw_status, result.services.as_deref().unwrap_or(&[]))
}

/// Parse a refresh interval: `10`, `10s`, `2m`, `500ms`. Zero or
/// unparseable input disables polling.
pub fn parse_refresh_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    let d = if let Some(ms) = s.strip_suffix("ms") {
        Duration::from_millis(ms.trim().parse().ok()?)
    } else if let Some(secs) = s.strip_suffix('s') {
        Duration::from_secs(secs.trim().parse().ok()?)
    } else if let Some(mins) = s.strip_suffix('m') {
        Duration::from_secs(mins.trim().parse::<u64>().ok()?.checked_mul(60)?)
    } else {
        Duration::from_secs(s.parse().ok()?)
    };
    (!d.is_zero()).then_some(d)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// `None`: aggregate once and return.
    pub interval: Option<Duration>,
    /// Stop once the result is terminal. When unset the loop keeps watching.
    pub exit_on_terminal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Polling was disabled; one result was produced.
    Once,
    Terminal,
    Interrupted,
}

/// Passed to the renderer with every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub iteration: u64,
    pub terminal: bool,
    /// When the next refresh happens, if there is one.
    pub next_refresh: Option<Duration>,
}

/// Idle → Polling → Terminal | sleep → Polling, with Interrupted reachable
/// from anywhere. One fetch completes before the next sleep starts. A
/// result fetched after an interrupt is dropped unrendered.
pub fn run_poll_loop<F, R>(
    options: PollOptions,
    interrupt: &Interrupt,
    mut fetch: F,
    mut render: R,
) -> Result<PollOutcome>
where
    F: FnMut() -> Result<StatusResult>,
    R: FnMut(&StatusResult, &Tick),
{
    let mut iteration = 0u64;
    loop {
        if interrupt.is_set() {
            return Ok(PollOutcome::Interrupted);
        }
        let result = match interrupt.or_interrupted(fetch()) {
            Err(AppError::Interrupted) => return Ok(PollOutcome::Interrupted),
            other => other?,
        };
        if interrupt.is_set() {
            return Ok(PollOutcome::Interrupted);
        }
        iteration += 1;
        let terminal = result_is_terminal(&result);
        debug!(iteration, terminal, status = %result.stack.raw_status, "poll");

        let Some(interval) = options.interval else {
            render(&result, &Tick { iteration, terminal, next_refresh: None });
            return Ok(PollOutcome::Once);
        };

        let stop = terminal && options.exit_on_terminal;
        render(&result, &Tick { iteration, terminal, next_refresh: (!stop).then_some(interval) });
        if stop {
            return Ok(PollOutcome::Terminal);
        }
        if !interrupt.sleep(interval) {
            return Ok(PollOutcome::Interrupted);
        }
    }
}
