//! AWS access. [`CloudApi`] is the seam the stack logic talks through;
//! [`AwsCli`] implements it by shelling out to the `aws` binary.
//! Auth (SSO/profiles) is handled transparently by the CLI.

use std::process::Command;

use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::*;

/// Read and delete calls against CloudFormation, ECS, ELBv2 and Secrets
/// Manager. Implementations must be shareable across the aggregation
/// fan-out threads.
pub trait CloudApi: Send + Sync {
    /// `Ok(None)` when the stack does not exist.
    fn describe_stack(&self, stack: &str) -> Result<Option<StackSnapshot>>;
    /// Most recent deleted stack with this name, if any.
    fn find_deleted_stack(&self, stack: &str) -> Result<Option<StackSnapshot>>;
    fn describe_stack_resources(&self, stack: &str) -> Result<ResourceInventory>;
    /// Newest first, at most `limit`.
    fn describe_stack_events(&self, stack: &str, limit: usize) -> Result<Vec<StackEvent>>;
    /// Counts and rollout state; `log` is left unset.
    fn describe_services(&self, cluster: &str, services: &[String]) -> Result<Vec<ServiceHealth>>;
    /// awslogs group and stream prefix of the first container that has one.
    fn describe_task_definition_logs(&self, task_definition: &str) -> Result<Option<LogTarget>>;
    fn describe_target_groups(&self, arns: &[String]) -> Result<Vec<(String, String, Option<u16>)>>;
    fn describe_target_health(&self, target_group_arn: &str) -> Result<Vec<TargetHealth>>;
    fn describe_listener_rules(&self, listener_arn: &str) -> Result<Vec<ListenerRoute>>;
    fn describe_rules(&self, rule_arns: &[String]) -> Result<Vec<ListenerRoute>>;
    fn describe_secret(&self, secret_arn: &str) -> Result<SecretHealth>;
    fn delete_change_set(&self, stack: &str, change_set: &str) -> Result<()>;
    fn delete_stack(&self, stack: &str) -> Result<()>;
}

/// `aws` binary bound to one region and optional named profile.
#[derive(Debug, Clone)]
pub struct AwsCli {
    profile: Option<String>,
    region: String,
}

impl AwsCli {
    pub fn new(region: &str, profile: Option<&str>) -> Self {
        Self {
            profile: profile
                .map(|s| s.to_string())
                .or_else(|| std::env::var("AWS_PROFILE").ok().filter(|s| !s.is_empty())),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn aws_cmd(&self) -> Command {
        let mut cmd = Command::new("aws");
        if let Some(p) = &self.profile {
            cmd.args(["--profile", p]);
        }
        cmd.args(["--region", &self.region]);
        cmd
    }

    fn run_aws(&self, args: &[&str]) -> Result<String> {
        debug!(region = %self.region, "aws {}", args.join(" "));
        let output = self.aws_cmd().args(args).args(["--output", "json"]).output()?;
        if !output.status.success() {
            return Err(AppError::AwsCli(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_aws_silent(&self, args: &[&str]) -> Result<()> {
        debug!(region = %self.region, "aws {}", args.join(" "));
        let output = self.aws_cmd().args(args).output()?;
        if !output.status.success() {
            return Err(AppError::AwsCli(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

impl CloudApi for AwsCli {
    fn describe_stack(&self, stack: &str) -> Result<Option<StackSnapshot>> {
        let json = match self.run_aws(&["cloudformation", "describe-stacks", "--stack-name", stack]) {
            Ok(json) => json,
            Err(e) if e.is_stack_missing() => return Ok(None),
            Err(e) => return Err(e),
        };
        let resp: DescribeStacksResponse = serde_json::from_str(&json)?;
        Ok(resp.stacks.into_iter().next().map(StackSnapshot::from))
    }

    fn find_deleted_stack(&self, stack: &str) -> Result<Option<StackSnapshot>> {
        let json = self.run_aws(&[
            "cloudformation", "list-stacks",
            "--stack-status-filter", "DELETE_COMPLETE",
        ])?;
        let resp: ListStacksResponse = serde_json::from_str(&json)?;
        let name = crate::arn::stack_name(stack);
        Ok(resp
            .summaries
            .into_iter()
            .filter(|s| s.stack_name == name && s.stack_status == "DELETE_COMPLETE")
            .max_by_key(|s| s.deletion_time)
            .map(|s| StackSnapshot::deleted(&s.stack_name, s.stack_id, s.deletion_time)))
    }

    fn describe_stack_resources(&self, stack: &str) -> Result<ResourceInventory> {
        let json = self.run_aws(&["cloudformation", "describe-stack-resources", "--stack-name", stack])?;
        let resp: DescribeStackResourcesResponse = serde_json::from_str(&json)?;
        Ok(ResourceInventory {
            resources: resp
                .resources
                .into_iter()
                .map(|r| StackResource {
                    resource_type: r.resource_type,
                    logical_id: r.logical_id,
                    physical_id: r.physical_id.filter(|p| !p.is_empty()),
                    status: r.status,
                })
                .collect(),
        })
    }

    fn describe_stack_events(&self, stack: &str, limit: usize) -> Result<Vec<StackEvent>> {
        let max_items = limit.to_string();
        let json = self.run_aws(&[
            "cloudformation", "describe-stack-events",
            "--stack-name", stack,
            "--max-items", &max_items,
        ])?;
        let resp: DescribeStackEventsResponse = serde_json::from_str(&json)?;
        Ok(resp
            .events
            .into_iter()
            .take(limit)
            .map(|e| StackEvent {
                timestamp: e.timestamp,
                logical_id: e.logical_id,
                resource_type: e.resource_type,
                status: e.status,
                reason: e.reason.filter(|r| !r.is_empty()),
            })
            .collect())
    }

    fn describe_services(&self, cluster: &str, services: &[String]) -> Result<Vec<ServiceHealth>> {
        if services.is_empty() { return Ok(vec![]); }
        let mut args: Vec<&str> = vec!["ecs", "describe-services", "--cluster", cluster, "--services"];
        args.extend(services.iter().map(|s| s.as_str()));
        let json = self.run_aws(&args)?;
        let resp: DescribeServicesResponse = serde_json::from_str(&json)?;
        for f in &resp.failures {
            warn!(arn = ?f.arn, reason = ?f.reason, "ecs describe-services failure");
        }
        Ok(resp
            .services
            .into_iter()
            .map(|s| {
                let primary = s.deployments.iter().find(|d| d.status == "PRIMARY");
                ServiceHealth {
                    name: s.service_name,
                    cluster: cluster.to_string(),
                    status: s.status,
                    desired: s.desired_count,
                    running: s.running_count,
                    pending: s.pending_count,
                    rollout_state: primary
                        .and_then(|d| d.rollout_state.as_deref())
                        .map(RolloutState::from_str),
                    task_definition: primary
                        .and_then(|d| d.task_definition.clone())
                        .or(s.task_definition),
                    log: None,
                }
            })
            .collect())
    }

    fn describe_task_definition_logs(&self, task_definition: &str) -> Result<Option<LogTarget>> {
        let json = self.run_aws(&["ecs", "describe-task-definition", "--task-definition", task_definition])?;
        let resp: DescribeTaskDefinitionResponse = serde_json::from_str(&json)?;
        Ok(resp
            .task_definition
            .container_definitions
            .into_iter()
            .filter_map(|c| c.log_configuration)
            .filter(|l| l.log_driver == "awslogs")
            .find_map(|mut l| {
                let group = l.options.remove("awslogs-group")?;
                Some(LogTarget { group, stream_prefix: l.options.remove("awslogs-stream-prefix") })
            }))
    }

    fn describe_target_groups(&self, arns: &[String]) -> Result<Vec<(String, String, Option<u16>)>> {
        if arns.is_empty() { return Ok(vec![]); }
        let mut args: Vec<&str> = vec!["elbv2", "describe-target-groups", "--target-group-arns"];
        args.extend(arns.iter().map(|s| s.as_str()));
        let json = self.run_aws(&args)?;
        let resp: DescribeTargetGroupsResponse = serde_json::from_str(&json)?;
        Ok(resp.target_groups.into_iter().map(|tg| (tg.arn, tg.name, tg.port)).collect())
    }

    fn describe_target_health(&self, target_group_arn: &str) -> Result<Vec<TargetHealth>> {
        let json = self.run_aws(&[
            "elbv2", "describe-target-health", "--target-group-arn", target_group_arn,
        ])?;
        let resp: DescribeTargetHealthResponse = serde_json::from_str(&json)?;
        Ok(resp
            .descriptions
            .into_iter()
            .map(|d| TargetHealth {
                id: d.target.id,
                port: d.target.port,
                state: d.health.state,
                reason: d.health.reason,
                description: d.health.description,
            })
            .collect())
    }

    fn describe_listener_rules(&self, listener_arn: &str) -> Result<Vec<ListenerRoute>> {
        let json = self.run_aws(&["elbv2", "describe-rules", "--listener-arn", listener_arn])?;
        let resp: DescribeRulesResponse = serde_json::from_str(&json)?;
        Ok(resp.rules.into_iter().map(ListenerRoute::from).collect())
    }

    fn describe_rules(&self, rule_arns: &[String]) -> Result<Vec<ListenerRoute>> {
        if rule_arns.is_empty() { return Ok(vec![]); }
        let mut args: Vec<&str> = vec!["elbv2", "describe-rules", "--rule-arns"];
        args.extend(rule_arns.iter().map(|s| s.as_str()));
        let json = self.run_aws(&args)?;
        let resp: DescribeRulesResponse = serde_json::from_str(&json)?;
        Ok(resp.rules.into_iter().map(ListenerRoute::from).collect())
    }

    fn describe_secret(&self, secret_arn: &str) -> Result<SecretHealth> {
        let json = self.run_aws(&["secretsmanager", "describe-secret", "--secret-id", secret_arn])?;
        let raw: RawSecret = serde_json::from_str(&json)?;
        Ok(raw.into())
    }

    fn delete_change_set(&self, stack: &str, change_set: &str) -> Result<()> {
        self.run_aws_silent(&[
            "cloudformation", "delete-change-set",
            "--stack-name", stack,
            "--change-set-name", change_set,
        ])
    }

    fn delete_stack(&self, stack: &str) -> Result<()> {
        self.run_aws_silent(&["cloudformation", "delete-stack", "--stack-name", stack])
    }
}

/// Region from the environment or the CLI's configured default.
pub fn get_region(profile: Option<&str>) -> String {
    if let Ok(r) = std::env::var("AWS_REGION") { if !r.is_empty() { return r; } }
    if let Ok(r) = std::env::var("AWS_DEFAULT_REGION") { if !r.is_empty() { return r; } }
    let mut cmd = Command::new("aws");
    if let Some(p) = profile { cmd.args(["--profile", p]); }
    if let Ok(o) = cmd.args(["configure", "get", "region"]).output() {
        let r = String::from_utf8_lossy(&o.stdout).trim().to_string();
        if !r.is_empty() { return r; }
    }
    "us-east-1".to_string()
}
