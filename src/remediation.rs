//! Decides what `deploy` should do about the stack it found.
//!
//! The decider never talks to AWS and never prompts. It returns a
//! [`Decision`] the command layer renders, confirms, and carries out.

use serde::Serialize;

use crate::classify::is_legacy_architecture;
use crate::error::{AppError, Result};
use crate::models::{ResourceInventory, StackCategory};

/// How much the operator can be asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    /// A terminal is attached; choices can be confirmed.
    Interactive,
    /// No terminal and no opt-in: anything without a safe default aborts.
    NonInteractive,
    /// No terminal, but the operator opted in (`--yes`) ahead of time.
    Force,
}

impl InteractionMode {
    pub fn can_prompt(&self) -> bool {
        *self == Self::Interactive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Proceed,
    /// Deploy despite a warning that it will probably fail.
    ProceedAnyway,
    DestroyThenRecreate,
    AbortOrWait,
    Abort,
    MigrationRequired,
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Proceed             => "proceed",
            Self::ProceedAnyway       => "proceed anyway",
            Self::DestroyThenRecreate => "destroy and recreate",
            Self::AbortOrWait         => "abort and wait",
            Self::Abort               => "abort",
            Self::MigrationRequired   => "migration required",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    /// Recommended action; what happens when the operator accepts the default.
    pub action: Action,
    pub rationale: String,
    /// Other choices the operator may pick instead. Empty when the decision
    /// is final for this interaction mode.
    pub alternatives: Vec<Action>,
    /// The default must be confirmed before it runs.
    pub needs_confirmation: bool,
}

impl Decision {
    fn new(action: Action, rationale: impl Into<String>) -> Self {
        Self { action, rationale: rationale.into(), alternatives: Vec::new(), needs_confirmation: false }
    }

    fn with_alternatives(mut self, alternatives: &[Action]) -> Self {
        self.alternatives = alternatives.to_vec();
        self
    }

    fn confirmed(mut self) -> Self {
        self.needs_confirmation = true;
        self
    }

    /// The menu offered to the operator: the default first, then the
    /// alternatives.
    pub fn options(&self) -> Vec<Action> {
        let mut options = vec![self.action];
        options.extend(self.alternatives.iter().copied());
        options
    }

    /// Resolve a menu answer (1-based). An empty answer takes the default.
    pub fn choose(&self, answer: &str) -> Result<Action> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(self.action);
        }
        let options = self.options();
        match answer.parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => Ok(options[n - 1]),
            _ => Err(AppError::Aborted(format!("invalid choice '{}'", answer))),
        }
    }

    /// The deploy must stop without touching the stack.
    pub fn blocks_deploy(&self) -> bool {
        match self.action {
            Action::Abort | Action::AbortOrWait => true,
            Action::MigrationRequired => !self.alternatives.contains(&Action::ProceedAnyway),
            _ => false,
        }
    }
}

/// Decide the remediation for a stack in `category` with the given
/// resources. Order matters: a stack CloudFormation will not touch, or one
/// mid-rollback, outranks an architecture warning.
pub fn decide(category: StackCategory, inventory: &ResourceInventory, mode: InteractionMode) -> Decision {
    match category {
        StackCategory::Unrecoverable => decide_unrecoverable(mode),
        StackCategory::InProgress => decide_in_progress(mode),
        _ if is_legacy_architecture(inventory) => decide_legacy(mode),
        StackCategory::Failed => decide_failed(mode),
        StackCategory::None | StackCategory::Ok => {
            Decision::new(Action::Proceed, "Stack is ready for deployment")
        }
    }
}

fn decide_unrecoverable(mode: InteractionMode) -> Decision {
    let why = "Stack is in REVIEW_IN_PROGRESS: a change set failed before any resources \
               were created and CloudFormation rejects every operation except delete";
    match mode {
        InteractionMode::Interactive => Decision::new(Action::DestroyThenRecreate, why)
            .with_alternatives(&[Action::Abort])
            .confirmed(),
        InteractionMode::Force => Decision::new(Action::DestroyThenRecreate, why),
        InteractionMode::NonInteractive => Decision::new(
            Action::Abort,
            format!("{why}; rerun with --yes to delete and recreate it"),
        ),
    }
}

fn decide_in_progress(mode: InteractionMode) -> Decision {
    let why = "A rollback is in progress; wait for it to finish before deploying";
    let decision = Decision::new(Action::AbortOrWait, why);
    if mode.can_prompt() {
        decision.with_alternatives(&[Action::DestroyThenRecreate, Action::ProceedAnyway])
    } else {
        decision
    }
}

fn decide_failed(mode: InteractionMode) -> Decision {
    let why = "The last rollback failed; retrying the deployment usually succeeds";
    let decision = Decision::new(Action::Proceed, why);
    if mode.can_prompt() {
        decision
            .with_alternatives(&[Action::DestroyThenRecreate, Action::Abort])
            .confirmed()
    } else {
        decision
    }
}

fn decide_legacy(mode: InteractionMode) -> Decision {
    let why = "Stack uses the REST API Gateway architecture; the current release replaces it \
               with an HTTP API and VPC link, which CloudFormation cannot update in place";
    let decision = Decision::new(Action::MigrationRequired, why);
    if mode.can_prompt() {
        decision.with_alternatives(&[Action::ProceedAnyway, Action::Abort]).confirmed()
    } else {
        decision
    }
}

/// Step-by-step instructions for moving a legacy stack to the new architecture.
pub fn migration_instructions(stack: &str, region: &str) -> Vec<String> {
    vec![
        "Save the stack outputs you rely on (webhook URL, secret ARN)".to_string(),
        format!("benchling-webhook destroy --yes   # removes {stack} in {region}"),
        "benchling-webhook deploy          # creates the HTTP API + VPC link stack".to_string(),
        "Update the webhook URL in the Benchling app settings to the new endpoint".to_string(),
    ]
}
