//! Domain models and raw AWS CLI JSON deserialization types.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::classify::classify;

// ── Domain models ─────────────────────────────────────────────────────────────

/// Semantic condition of a CloudFormation stack. Every raw status maps to
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StackCategory {
    /// No stack by that name.
    None,
    /// A rollback is actively running.
    InProgress,
    /// A rollback itself failed.
    Failed,
    /// Stuck in `REVIEW_IN_PROGRESS`; only deletion gets it out.
    Unrecoverable,
    /// Ready for a normal update, including completed rollbacks.
    Ok,
}

impl StackCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::None          => "none",
            Self::InProgress    => "in_progress",
            Self::Failed        => "failed",
            Self::Unrecoverable => "unrecoverable",
            Self::Ok            => "ok",
        }
    }
}

/// Point-in-time read of one CloudFormation stack.
#[derive(Debug, Clone, Serialize)]
pub struct StackSnapshot {
    pub name: String,
    pub stack_id: Option<String>,
    pub exists: bool,
    pub raw_status: String,
    pub category: StackCategory,
    pub status_reason: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Parameter the Quilt stack uses to switch the webhook on or off.
pub const WEBHOOK_TOGGLE_PARAMETER: &str = "BenchlingWebhook";

impl StackSnapshot {
    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stack_id: None,
            exists: false,
            raw_status: String::new(),
            category: StackCategory::None,
            status_reason: None,
            parameters: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_update_time: None,
        }
    }

    /// A stack that used to exist. Deletion is a finished, stable state.
    pub fn deleted(name: &str, stack_id: Option<String>, deleted_at: Option<DateTime<Utc>>) -> Self {
        Self {
            stack_id,
            raw_status: "DELETE_COMPLETE".to_string(),
            category: StackCategory::Ok,
            last_update_time: deleted_at,
            ..Self::missing(name)
        }
    }

    pub fn is_deleted(&self) -> bool {
        !self.exists && self.raw_status == "DELETE_COMPLETE"
    }

    /// First output whose key ends with `suffix`.
    pub fn output_ending_with(&self, suffix: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(k, _)| k.ends_with(suffix))
            .map(|(_, v)| v.as_str())
    }

    pub fn secret_arn(&self) -> Option<&str> {
        self.output_ending_with("SecretArn")
            .filter(|v| v.starts_with("arn:"))
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(k, v)| k.contains("Endpoint") && v.starts_with("http"))
            .map(|(_, v)| v.as_str())
    }

    pub fn webhook_toggle(&self) -> Option<&str> {
        self.parameters.get(WEBHOOK_TOGGLE_PARAMETER).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StackResource {
    pub resource_type: String,
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub status: String,
}

/// Physical resources belonging to a stack.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceInventory {
    pub resources: Vec<StackResource>,
}

impl ResourceInventory {
    pub fn has_type(&self, resource_type: &str) -> bool {
        self.resources.iter().any(|r| r.resource_type == resource_type)
    }

    pub fn physical_ids(&self, resource_type: &str) -> Vec<String> {
        self.resources
            .iter()
            .filter(|r| r.resource_type == resource_type)
            .filter_map(|r| r.physical_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RolloutState {
    InProgress,
    Completed,
    Failed,
    Other(String),
}

impl RolloutState {
    pub fn from_str(s: &str) -> Self {
        match s {
            "IN_PROGRESS" => Self::InProgress,
            "COMPLETED"   => Self::Completed,
            "FAILED"      => Self::Failed,
            other         => Self::Other(other.to_string()),
        }
    }
    pub fn as_str(&self) -> &str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed  => "COMPLETED",
            Self::Failed     => "FAILED",
            Self::Other(s)   => s.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogTarget {
    pub group: String,
    pub stream_prefix: Option<String>,
}

/// Per ECS service counts and rollout state of the primary deployment.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub cluster: String,
    pub status: String,
    pub desired: u32,
    pub running: u32,
    pub pending: u32,
    pub rollout_state: Option<RolloutState>,
    pub task_definition: Option<String>,
    pub log: Option<LogTarget>,
}

impl ServiceHealth {
    pub fn is_rolling_out(&self) -> bool {
        self.rollout_state == Some(RolloutState::InProgress)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetHealth {
    pub id: String,
    pub port: Option<u16>,
    pub state: String,
    pub reason: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetGroupHealth {
    pub arn: String,
    pub name: String,
    pub port: Option<u16>,
    pub healthy: usize,
    pub unhealthy: usize,
    pub draining: usize,
    pub targets: Vec<TargetHealth>,
}

impl TargetGroupHealth {
    pub fn from_targets(arn: &str, name: &str, port: Option<u16>, targets: Vec<TargetHealth>) -> Self {
        let count = |state: &str| targets.iter().filter(|t| t.state == state).count();
        Self {
            arn: arn.to_string(),
            name: name.to_string(),
            port,
            healthy: count("healthy"),
            unhealthy: count("unhealthy"),
            draining: count("draining"),
            targets,
        }
    }
}

/// One listener rule: which paths forward to which target group.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerRoute {
    pub priority: String,
    pub paths: Vec<String>,
    pub target_group_arn: Option<String>,
    pub is_default: bool,
}

/// Whether a secret has been rotated or edited since it was created.
/// These are reported separately, never folded together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SecretModification {
    NeverModified,
    ModifiedAt(DateTime<Utc>),
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecretHealth {
    pub arn: String,
    pub name: Option<String>,
    pub accessible: bool,
    pub created: Option<DateTime<Utc>>,
    pub modification: SecretModification,
    pub error: Option<String>,
}

impl SecretHealth {
    pub fn inaccessible(arn: &str, error: String) -> Self {
        Self {
            arn: arn.to_string(),
            name: None,
            accessible: false,
            created: None,
            modification: SecretModification::Unknown,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StackEvent {
    pub timestamp: Option<DateTime<Utc>>,
    pub logical_id: String,
    pub resource_type: Option<String>,
    pub status: String,
    pub reason: Option<String>,
}

/// A sub-fetch that failed and was left out of the result.
#[derive(Debug, Clone, Serialize)]
pub struct Unavailable {
    pub source: &'static str,
    pub reason: String,
}

/// Everything known about one stack at one poll.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub stack: StackSnapshot,
    pub resources: Option<ResourceInventory>,
    pub services: Option<Vec<ServiceHealth>>,
    pub target_groups: Option<Vec<TargetGroupHealth>>,
    pub routes: Option<Vec<ListenerRoute>>,
    pub secret: Option<SecretHealth>,
    pub events: Option<Vec<StackEvent>>,
    pub unavailable: Vec<Unavailable>,
    pub fetched_at: DateTime<Utc>,
}

impl StatusResult {
    pub fn stack_only(stack: StackSnapshot) -> Self {
        Self {
            stack,
            resources: None,
            services: None,
            target_groups: None,
            routes: None,
            secret: None,
            events: None,
            unavailable: Vec::new(),
            fetched_at: Utc::now(),
        }
    }
}

// ── Raw JSON deserialization structs (aws cli output) ─────────────────────────

/// The aws binary prints ISO-8601 strings by default and epoch seconds when
/// `cli_timestamp_format = none` on older configs; accept both.
fn aws_timestamp<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Epoch(f64),
    }
    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        Some(Raw::Epoch(secs)) => Ok(DateTime::from_timestamp_millis((secs * 1000.0) as i64)),
    }
}

#[derive(Debug, Deserialize)]
pub struct DescribeStacksResponse {
    #[serde(rename = "Stacks", default)]
    pub stacks: Vec<RawStack>,
}

#[derive(Debug, Deserialize)]
pub struct RawStack {
    #[serde(rename = "StackName")]
    pub stack_name: String,
    #[serde(rename = "StackId")]
    pub stack_id: Option<String>,
    #[serde(rename = "StackStatus")]
    pub stack_status: String,
    #[serde(rename = "StackStatusReason")]
    pub stack_status_reason: Option<String>,
    #[serde(rename = "Parameters", default)]
    pub parameters: Vec<RawParameter>,
    #[serde(rename = "Outputs", default)]
    pub outputs: Vec<RawOutput>,
    #[serde(rename = "CreationTime", default, deserialize_with = "aws_timestamp")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(rename = "LastUpdatedTime", default, deserialize_with = "aws_timestamp")]
    pub last_updated_time: Option<DateTime<Utc>>,
}

impl From<RawStack> for StackSnapshot {
    fn from(raw: RawStack) -> Self {
        Self {
            category: classify(Some(&raw.stack_status)),
            name: raw.stack_name,
            stack_id: raw.stack_id,
            exists: true,
            raw_status: raw.stack_status,
            status_reason: raw.stack_status_reason,
            parameters: raw
                .parameters
                .into_iter()
                .map(|p| (p.key, p.value.unwrap_or_default()))
                .collect(),
            outputs: raw.outputs.into_iter().map(|o| (o.key, o.value)).collect(),
            last_update_time: raw.last_updated_time.or(raw.creation_time),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawParameter {
    #[serde(rename = "ParameterKey")]
    pub key: String,
    #[serde(rename = "ParameterValue")]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawOutput {
    #[serde(rename = "OutputKey")]
    pub key: String,
    #[serde(rename = "OutputValue")]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ListStacksResponse {
    #[serde(rename = "StackSummaries", default)]
    pub summaries: Vec<RawStackSummary>,
}

#[derive(Debug, Deserialize)]
pub struct RawStackSummary {
    #[serde(rename = "StackName")]
    pub stack_name: String,
    #[serde(rename = "StackId")]
    pub stack_id: Option<String>,
    #[serde(rename = "StackStatus")]
    pub stack_status: String,
    #[serde(rename = "DeletionTime", default, deserialize_with = "aws_timestamp")]
    pub deletion_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct DescribeStackResourcesResponse {
    #[serde(rename = "StackResources", default)]
    pub resources: Vec<RawStackResource>,
}

#[derive(Debug, Deserialize)]
pub struct RawStackResource {
    #[serde(rename = "LogicalResourceId")]
    pub logical_id: String,
    #[serde(rename = "PhysicalResourceId")]
    pub physical_id: Option<String>,
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
    #[serde(rename = "ResourceStatus", default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct DescribeStackEventsResponse {
    #[serde(rename = "StackEvents", default)]
    pub events: Vec<RawStackEvent>,
}

#[derive(Debug, Deserialize)]
pub struct RawStackEvent {
    #[serde(rename = "Timestamp", default, deserialize_with = "aws_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "LogicalResourceId", default)]
    pub logical_id: String,
    #[serde(rename = "ResourceType")]
    pub resource_type: Option<String>,
    #[serde(rename = "ResourceStatus", default)]
    pub status: String,
    #[serde(rename = "ResourceStatusReason")]
    pub reason: Option<String>,
}

// ECS responses are camelCase, unlike CloudFormation/ELB.

#[derive(Debug, Deserialize)]
pub struct DescribeServicesResponse {
    #[serde(default)]
    pub services: Vec<RawEcsService>,
    #[serde(default)]
    pub failures: Vec<RawEcsFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEcsService {
    pub service_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub desired_count: u32,
    #[serde(default)]
    pub running_count: u32,
    #[serde(default)]
    pub pending_count: u32,
    pub task_definition: Option<String>,
    #[serde(default)]
    pub deployments: Vec<RawEcsDeployment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEcsDeployment {
    #[serde(default)]
    pub status: String,
    pub rollout_state: Option<String>,
    pub task_definition: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawEcsFailure {
    pub arn: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskDefinitionResponse {
    pub task_definition: RawTaskDefinition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTaskDefinition {
    #[serde(default)]
    pub container_definitions: Vec<RawContainerDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContainerDefinition {
    #[serde(default)]
    pub name: String,
    pub log_configuration: Option<RawLogConfiguration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLogConfiguration {
    pub log_driver: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct DescribeTargetGroupsResponse {
    #[serde(rename = "TargetGroups", default)]
    pub target_groups: Vec<RawTargetGroup>,
}

#[derive(Debug, Deserialize)]
pub struct RawTargetGroup {
    #[serde(rename = "TargetGroupArn")]
    pub arn: String,
    #[serde(rename = "TargetGroupName", default)]
    pub name: String,
    #[serde(rename = "Port")]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct DescribeTargetHealthResponse {
    #[serde(rename = "TargetHealthDescriptions", default)]
    pub descriptions: Vec<RawTargetHealthDescription>,
}

#[derive(Debug, Deserialize)]
pub struct RawTargetHealthDescription {
    #[serde(rename = "Target")]
    pub target: RawTarget,
    #[serde(rename = "TargetHealth")]
    pub health: RawTargetHealth,
}

#[derive(Debug, Deserialize)]
pub struct RawTarget {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Port")]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct RawTargetHealth {
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Reason")]
    pub reason: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DescribeRulesResponse {
    #[serde(rename = "Rules", default)]
    pub rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
pub struct RawRule {
    #[serde(rename = "Priority", default)]
    pub priority: String,
    #[serde(rename = "Conditions", default)]
    pub conditions: Vec<RawRuleCondition>,
    #[serde(rename = "Actions", default)]
    pub actions: Vec<RawRuleAction>,
    #[serde(rename = "IsDefault", default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawRuleCondition {
    #[serde(rename = "Field")]
    pub field: Option<String>,
    #[serde(rename = "Values", default)]
    pub values: Vec<String>,
    #[serde(rename = "PathPatternConfig")]
    pub path_pattern: Option<RawValues>,
}

#[derive(Debug, Deserialize)]
pub struct RawValues {
    #[serde(rename = "Values", default)]
    pub values: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawRuleAction {
    #[serde(rename = "Type", default)]
    pub action_type: String,
    #[serde(rename = "TargetGroupArn")]
    pub target_group_arn: Option<String>,
    #[serde(rename = "ForwardConfig")]
    pub forward: Option<RawForwardConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawForwardConfig {
    #[serde(rename = "TargetGroups", default)]
    pub target_groups: Vec<RawTargetGroupTuple>,
}

#[derive(Debug, Deserialize)]
pub struct RawTargetGroupTuple {
    #[serde(rename = "TargetGroupArn")]
    pub arn: String,
}

impl From<RawRule> for ListenerRoute {
    fn from(raw: RawRule) -> Self {
        let paths = raw
            .conditions
            .iter()
            .filter(|c| c.field.as_deref() == Some("path-pattern"))
            .flat_map(|c| match &c.path_pattern {
                Some(cfg) if !cfg.values.is_empty() => cfg.values.clone(),
                _ => c.values.clone(),
            })
            .collect();
        let target_group_arn = raw
            .actions
            .iter()
            .filter(|a| a.action_type == "forward")
            .find_map(|a| {
                a.target_group_arn.clone().or_else(|| {
                    a.forward
                        .as_ref()
                        .and_then(|f| f.target_groups.first())
                        .map(|t| t.arn.clone())
                })
            });
        Self { priority: raw.priority, paths, target_group_arn, is_default: raw.is_default }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawSecret {
    #[serde(rename = "ARN")]
    pub arn: String,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "CreatedDate", default, deserialize_with = "aws_timestamp")]
    pub created: Option<DateTime<Utc>>,
    #[serde(rename = "LastChangedDate", default, deserialize_with = "aws_timestamp")]
    pub last_changed: Option<DateTime<Utc>>,
}

impl From<RawSecret> for SecretHealth {
    fn from(raw: RawSecret) -> Self {
        let modification = match (raw.created, raw.last_changed) {
            (_, None) => SecretModification::NeverModified,
            // Secrets Manager stamps LastChangedDate at creation; a change
            // within the same second is still the creation write.
            (Some(c), Some(l)) if (l - c).num_seconds().abs() < 1 => SecretModification::NeverModified,
            (_, Some(l)) => SecretModification::ModifiedAt(l),
        };
        Self {
            arn: raw.arn,
            name: raw.name,
            accessible: true,
            created: raw.created,
            modification,
            error: None,
        }
    }
}
