//! Deploy and monitor the Benchling → Quilt webhook stack.
//!
//! - [`classify`] maps CloudFormation statuses to categories
//! - [`remediation`] decides what a deploy should do about them
//! - [`recovery`] deletes stacks stuck in `REVIEW_IN_PROGRESS`
//! - [`health`] aggregates CloudFormation, ECS, ELB and Secrets Manager state
//! - [`poll`] detects settled deployments and drives the refresh loop

pub mod arn;
pub mod aws;
pub mod cdk;
pub mod classify;
pub mod error;
pub mod health;
pub mod models;
pub mod poll;
pub mod profile;
pub mod recovery;
pub mod remediation;
pub mod report;

pub use aws::{AwsCli, CloudApi};
pub use classify::{classify, is_legacy_architecture};
pub use error::{AppError, Result};
pub use health::HealthAggregator;
pub use models::{StackCategory, StatusResult};
pub use poll::{is_terminal, run_poll_loop, Interrupt, PollOptions, PollOutcome};
pub use recovery::StackRecovery;
pub use remediation::{decide, Action, Decision, InteractionMode};
