//! Stack health aggregation.
//!
//! One describe-stacks call decides whether there is anything to look at.
//! After that every source (resources, ECS, target groups, listener rules,
//! secret, events) is fetched on its own scoped thread and a failure in one
//! only blanks that one field.

use std::collections::{BTreeMap, HashMap};
use std::thread::{self, ScopedJoinHandle};

use tracing::{debug, warn};

use crate::arn::{self, Arn};
use crate::aws::CloudApi;
use crate::error::{AppError, Result};
use crate::models::*;

pub const DEFAULT_EVENT_LIMIT: usize = 3;

const ECS_CLUSTER_TYPE: &str = "AWS::ECS::Cluster";
const ECS_SERVICE_TYPE: &str = "AWS::ECS::Service";
const TARGET_GROUP_TYPE: &str = "AWS::ElasticLoadBalancingV2::TargetGroup";
const LISTENER_TYPE: &str = "AWS::ElasticLoadBalancingV2::Listener";
const LISTENER_RULE_TYPE: &str = "AWS::ElasticLoadBalancingV2::ListenerRule";

/// Result of a sub-fetch: `None` when the stack has nothing of that kind.
type Fetched<T> = Option<Result<T>>;

struct ResourceFetch {
    inventory: Result<ResourceInventory>,
    services: Fetched<ServiceFetch>,
    target_groups: Fetched<Vec<TargetGroupHealth>>,
    routes: Fetched<Vec<ListenerRoute>>,
}

/// Services that answered, plus an entry for each cluster or service that
/// did not.
struct ServiceFetch {
    services: Vec<ServiceHealth>,
    missing: Vec<Unavailable>,
}

pub struct HealthAggregator<'a> {
    api: &'a dyn CloudApi,
    event_limit: usize,
}

impl<'a> HealthAggregator<'a> {
    pub fn new(api: &'a dyn CloudApi) -> Self {
        Self { api, event_limit: DEFAULT_EVENT_LIMIT }
    }

    pub fn with_event_limit(mut self, limit: usize) -> Self {
        self.event_limit = limit;
        self
    }

    /// Fails only when the stack itself cannot be described.
    pub fn aggregate(&self, stack: &str) -> Result<StatusResult> {
        let Some(snapshot) = self.api.describe_stack(stack)? else {
            return Ok(StatusResult::stack_only(self.absent_stack(stack)));
        };
        debug!(stack = %snapshot.name, status = %snapshot.raw_status, "stack described");

        let secret_arn = snapshot.secret_arn().map(str::to_string);
        let mut result = StatusResult::stack_only(snapshot);

        let (resources, secret, events) = thread::scope(|s| {
            let resources = s.spawn(|| self.fetch_resources(stack));
            let secret = secret_arn
                .as_deref()
                .map(|arn| s.spawn(move || (arn, self.api.describe_secret(arn))));
            let events = s.spawn(|| self.api.describe_stack_events(stack, self.event_limit));
            (
                resources.join(),
                secret.map(|h| h.join()),
                joined(events),
            )
        });

        match resources {
            Ok(fetch) => {
                result.resources = keep(&mut result.unavailable, "resources", Some(fetch.inventory));
                let services = fetch.services.map(|r| {
                    r.map(|f| {
                        result.unavailable.extend(f.missing);
                        f.services
                    })
                });
                result.services = keep(&mut result.unavailable, "ecs", services);
                result.target_groups = keep(&mut result.unavailable, "target groups", fetch.target_groups);
                result.routes = keep(&mut result.unavailable, "listener rules", fetch.routes);
            }
            Err(_) => result.unavailable.push(Unavailable {
                source: "resources",
                reason: "resource fetch panicked".to_string(),
            }),
        }

        result.secret = match secret {
            None => None,
            Some(Ok((_, Ok(health)))) => Some(health),
            Some(Ok((arn, Err(e)))) => {
                warn!(secret = %arn, error = %e, "secret not accessible");
                Some(SecretHealth::inaccessible(arn, e.to_string()))
            }
            Some(Err(_)) => {
                result.unavailable.push(Unavailable {
                    source: "secret",
                    reason: "secret fetch panicked".to_string(),
                });
                None
            }
        };

        result.events = keep(&mut result.unavailable, "events", Some(events));
        Ok(result)
    }

    /// Missing stacks are reported, not raised. A stack that was deleted is
    /// told apart from one that never existed when list-stacks allows it.
    fn absent_stack(&self, stack: &str) -> StackSnapshot {
        match self.api.find_deleted_stack(stack) {
            Ok(Some(deleted)) => deleted,
            Ok(None) => StackSnapshot::missing(&arn::stack_name(stack)),
            Err(e) => {
                warn!(stack, error = %e, "could not check for deleted stack");
                StackSnapshot::missing(&arn::stack_name(stack))
            }
        }
    }

    fn fetch_resources(&self, stack: &str) -> ResourceFetch {
        let inventory = match self.api.describe_stack_resources(stack) {
            Ok(inv) => inv,
            Err(e) => {
                return ResourceFetch { inventory: Err(e), services: None, target_groups: None, routes: None };
            }
        };

        let (services, target_groups, routes) = thread::scope(|s| {
            let services = s.spawn(|| self.fetch_services(&inventory));
            let target_groups = s.spawn(|| self.fetch_target_groups(&inventory));
            let routes = s.spawn(|| self.fetch_routes(&inventory));
            (
                joined_opt(services),
                joined_opt(target_groups),
                joined_opt(routes),
            )
        });

        ResourceFetch { inventory: Ok(inventory), services, target_groups, routes }
    }

    fn fetch_services(&self, inventory: &ResourceInventory) -> Fetched<ServiceFetch> {
        let service_ids = inventory.physical_ids(ECS_SERVICE_TYPE);
        if service_ids.is_empty() {
            return None;
        }
        let default_cluster = inventory.physical_ids(ECS_CLUSTER_TYPE).into_iter().next();

        // Service ARNs carry their cluster; bare names fall back to the
        // stack's own cluster.
        let mut by_cluster: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for id in service_ids {
            let cluster = match Arn::parse(&id) {
                Ok(a) if a.resource_id.contains('/') => Some(a.name().to_string()),
                _ => default_cluster.clone(),
            };
            match cluster {
                Some(c) => by_cluster.entry(c).or_default().push(id),
                None => debug!(service = %id, "no cluster for service"),
            }
        }

        // One cluster failing, or ECS not knowing a service, leaves the rest.
        let mut services = Vec::new();
        let mut missing = Vec::new();
        let mut first_err = None;
        for (cluster, ids) in &by_cluster {
            match self.api.describe_services(cluster, ids) {
                Ok(found) => {
                    for name in ids.iter().map(|id| service_name(id)) {
                        if !found.iter().any(|s| s.name == name) {
                            warn!(cluster = %cluster, service = %name, "service not returned by ECS");
                            missing.push(Unavailable {
                                source: "ecs",
                                reason: format!("service {} not found in cluster {}", name, cluster),
                            });
                        }
                    }
                    services.extend(found);
                }
                Err(e) => {
                    warn!(cluster = %cluster, error = %e, "describe-services failed");
                    missing.push(Unavailable { source: "ecs", reason: format!("cluster {}: {}", cluster, e) });
                    first_err.get_or_insert(e);
                }
            }
        }
        if services.is_empty() {
            if let Some(e) = first_err {
                return Some(Err(e));
            }
        }

        let mut logs: HashMap<String, Option<LogTarget>> = HashMap::new();
        for svc in &mut services {
            let Some(td) = svc.task_definition.clone() else { continue };
            let log = logs.entry(td.clone()).or_insert_with(|| {
                self.api.describe_task_definition_logs(&td).unwrap_or_else(|e| {
                    warn!(task_definition = %td, error = %e, "could not read log configuration");
                    None
                })
            });
            svc.log = log.clone();
        }
        Some(Ok(ServiceFetch { services, missing }))
    }

    fn fetch_target_groups(&self, inventory: &ResourceInventory) -> Fetched<Vec<TargetGroupHealth>> {
        let arns = inventory.physical_ids(TARGET_GROUP_TYPE);
        if arns.is_empty() {
            return None;
        }
        let described: HashMap<String, (String, Option<u16>)> = match self.api.describe_target_groups(&arns) {
            Ok(tgs) => tgs.into_iter().map(|(arn, name, port)| (arn, (name, port))).collect(),
            Err(e) => {
                warn!(error = %e, "describe-target-groups failed; using names from ARNs");
                HashMap::new()
            }
        };
        let mut groups = Vec::with_capacity(arns.len());
        for tg_arn in &arns {
            let targets = match self.api.describe_target_health(tg_arn) {
                Ok(t) => t,
                Err(e) => return Some(Err(e)),
            };
            let (name, port) = described.get(tg_arn).cloned().unwrap_or_else(|| {
                let name = Arn::parse(tg_arn).map(|a| a.name().to_string()).unwrap_or_else(|_| tg_arn.clone());
                (name, None)
            });
            groups.push(TargetGroupHealth::from_targets(tg_arn, &name, port, targets));
        }
        Some(Ok(groups))
    }

    fn fetch_routes(&self, inventory: &ResourceInventory) -> Fetched<Vec<ListenerRoute>> {
        let listeners = inventory.physical_ids(LISTENER_TYPE);
        if !listeners.is_empty() {
            let mut routes = Vec::new();
            for l in &listeners {
                match self.api.describe_listener_rules(l) {
                    Ok(r) => routes.extend(r),
                    Err(e) => return Some(Err(e)),
                }
            }
            return Some(Ok(routes));
        }
        let rules = inventory.physical_ids(LISTENER_RULE_TYPE);
        if rules.is_empty() {
            return None;
        }
        Some(self.api.describe_rules(&rules))
    }
}

/// ECS reports services by name; the stack lists them by ARN.
fn service_name(id: &str) -> String {
    Arn::parse(id).map(|a| a.leaf().to_string()).unwrap_or_else(|_| id.to_string())
}

fn joined<T>(handle: ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(AppError::Other("worker thread panicked".to_string())))
}

fn joined_opt<T>(handle: ScopedJoinHandle<'_, Fetched<T>>) -> Fetched<T> {
    handle
        .join()
        .unwrap_or_else(|_| Some(Err(AppError::Other("worker thread panicked".to_string()))))
}

/// Unwrap a sub-fetch, recording it as unavailable on error.
fn keep<T>(unavailable: &mut Vec<Unavailable>, source: &'static str, fetched: Fetched<T>) -> Option<T> {
    match fetched? {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(source, error = %e, "status source unavailable");
            unavailable.push(Unavailable { source, reason: e.to_string() });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StackResource;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    const SERVICE_ARN: &str = "arn:aws:ecs:us-east-1:123456789012:service/bw-cluster/bw-service";
    const TG_ARN: &str = "arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/bw-tg/6d0ecf831eec9f09";
    const SECRET_ARN: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:bw-creds-AbC";

    #[derive(Default)]
    struct FakeApi {
        stack: Option<StackSnapshot>,
        deleted: Option<StackSnapshot>,
        fail_resources: bool,
        fail_ecs: bool,
        fail_task_definition: bool,
        fail_secret: bool,
        fail_events: bool,
        /// More ECS service ARNs in the stack, possibly in other clusters.
        extra_services: Vec<&'static str>,
        failing_cluster: Option<&'static str>,
        /// Service names ECS no longer knows about.
        vanished: Vec<&'static str>,
        /// Latency of every source call after describe-stacks.
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    fn resource(t: &str, id: &str) -> StackResource {
        StackResource {
            resource_type: t.into(),
            logical_id: t.rsplit("::").next().unwrap_or(t).into(),
            physical_id: Some(id.into()),
            status: "CREATE_COMPLETE".into(),
        }
    }

    fn live_stack() -> StackSnapshot {
        let mut snap = StackSnapshot::missing("BenchlingWebhookStack");
        snap.exists = true;
        snap.raw_status = "UPDATE_COMPLETE".into();
        snap.category = StackCategory::Ok;
        snap.outputs.insert("BenchlingSecretArn".into(), SECRET_ARN.into());
        snap
    }

    fn err(what: &str) -> AppError {
        AppError::AwsCli(format!("AccessDeniedException: not authorized to perform {what}"))
    }

    impl FakeApi {
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    impl CloudApi for FakeApi {
        fn describe_stack(&self, _stack: &str) -> Result<Option<StackSnapshot>> {
            self.record("describe_stack");
            Ok(self.stack.clone())
        }
        fn find_deleted_stack(&self, _stack: &str) -> Result<Option<StackSnapshot>> {
            self.record("find_deleted_stack");
            Ok(self.deleted.clone())
        }
        fn describe_stack_resources(&self, _stack: &str) -> Result<ResourceInventory> {
            self.record("describe_stack_resources");
            std::thread::sleep(self.delay);
            if self.fail_resources { return Err(err("cloudformation:DescribeStackResources")); }
            let mut resources = vec![
                resource("AWS::ECS::Cluster", "bw-cluster"),
                resource("AWS::ECS::Service", SERVICE_ARN),
                resource("AWS::ElasticLoadBalancingV2::TargetGroup", TG_ARN),
                resource("AWS::ElasticLoadBalancingV2::ListenerRule", "arn:rule/1"),
            ];
            resources.extend(self.extra_services.iter().map(|arn| resource("AWS::ECS::Service", arn)));
            Ok(ResourceInventory { resources })
        }
        fn describe_stack_events(&self, _stack: &str, limit: usize) -> Result<Vec<StackEvent>> {
            std::thread::sleep(self.delay);
            if self.fail_events { return Err(err("cloudformation:DescribeStackEvents")); }
            Ok((0..10)
                .map(|i| StackEvent {
                    timestamp: None,
                    logical_id: format!("Res{i}"),
                    resource_type: None,
                    status: "UPDATE_COMPLETE".into(),
                    reason: None,
                })
                .take(limit)
                .collect())
        }
        fn describe_services(&self, cluster: &str, services: &[String]) -> Result<Vec<ServiceHealth>> {
            self.record("describe_services");
            std::thread::sleep(self.delay);
            if self.fail_ecs || self.failing_cluster == Some(cluster) {
                return Err(err("ecs:DescribeServices"));
            }
            Ok(services
                .iter()
                .map(|id| Arn::parse(id).unwrap().leaf().to_string())
                .filter(|name| !self.vanished.contains(&name.as_str()))
                .map(|name| ServiceHealth {
                    name,
                    cluster: cluster.into(),
                    status: "ACTIVE".into(),
                    desired: 2,
                    running: 2,
                    pending: 0,
                    rollout_state: Some(RolloutState::Completed),
                    task_definition: Some("arn:aws:ecs:us-east-1:123456789012:task-definition/bw:7".into()),
                    log: None,
                })
                .collect())
        }
        fn describe_task_definition_logs(&self, _td: &str) -> Result<Option<LogTarget>> {
            if self.fail_task_definition { return Err(err("ecs:DescribeTaskDefinition")); }
            Ok(Some(LogTarget { group: "/ecs/benchling-webhook".into(), stream_prefix: Some("webhook".into()) }))
        }
        fn describe_target_groups(&self, arns: &[String]) -> Result<Vec<(String, String, Option<u16>)>> {
            Ok(arns.iter().map(|a| (a.clone(), "bw-tg".to_string(), Some(5000))).collect())
        }
        fn describe_target_health(&self, _tg: &str) -> Result<Vec<TargetHealth>> {
            std::thread::sleep(self.delay);
            Ok(vec![TargetHealth {
                id: "10.0.1.15".into(),
                port: Some(5000),
                state: "healthy".into(),
                reason: None,
                description: None,
            }])
        }
        fn describe_listener_rules(&self, _listener: &str) -> Result<Vec<ListenerRoute>> {
            unreachable!("stack has no listeners")
        }
        fn describe_rules(&self, _rules: &[String]) -> Result<Vec<ListenerRoute>> {
            std::thread::sleep(self.delay);
            Ok(vec![ListenerRoute {
                priority: "10".into(),
                paths: vec!["/event".into()],
                target_group_arn: Some(TG_ARN.into()),
                is_default: false,
            }])
        }
        fn describe_secret(&self, arn: &str) -> Result<SecretHealth> {
            std::thread::sleep(self.delay);
            if self.fail_secret { return Err(err("secretsmanager:DescribeSecret")); }
            Ok(SecretHealth {
                arn: arn.into(),
                name: Some("bw-creds".into()),
                accessible: true,
                created: None,
                modification: SecretModification::NeverModified,
                error: None,
            })
        }
        fn delete_change_set(&self, _stack: &str, _cs: &str) -> Result<()> { unreachable!() }
        fn delete_stack(&self, _stack: &str) -> Result<()> { unreachable!() }
    }

    #[test]
    fn aggregates_every_source() {
        let api = FakeApi { stack: Some(live_stack()), ..Default::default() };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();

        assert_eq!(result.stack.raw_status, "UPDATE_COMPLETE");
        let services = result.services.unwrap();
        assert_eq!(services[0].log.as_ref().unwrap().group, "/ecs/benchling-webhook");
        let tgs = result.target_groups.unwrap();
        assert_eq!((tgs[0].name.as_str(), tgs[0].healthy), ("bw-tg", 1));
        assert_eq!(result.routes.unwrap()[0].paths, vec!["/event"]);
        assert!(result.secret.unwrap().accessible);
        assert_eq!(result.events.unwrap().len(), DEFAULT_EVENT_LIMIT);
        assert!(result.unavailable.is_empty());
    }

    #[test]
    fn ecs_failure_only_blanks_services() {
        let api = FakeApi { stack: Some(live_stack()), fail_ecs: true, ..Default::default() };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();

        assert!(result.services.is_none());
        assert_eq!(result.stack.raw_status, "UPDATE_COMPLETE");
        assert!(result.target_groups.is_some());
        assert!(result.routes.is_some());
        assert!(result.secret.is_some());
        assert!(result.events.is_some());
        assert_eq!(result.unavailable.len(), 1);
        assert_eq!(result.unavailable[0].source, "ecs");
    }

    #[test]
    fn one_failing_cluster_keeps_the_others() {
        let api = FakeApi {
            stack: Some(live_stack()),
            extra_services: vec!["arn:aws:ecs:us-east-1:123456789012:service/jobs-cluster/bw-worker"],
            failing_cluster: Some("jobs-cluster"),
            ..Default::default()
        };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();

        let services = result.services.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "bw-service");
        assert_eq!(result.unavailable.len(), 1);
        assert_eq!(result.unavailable[0].source, "ecs");
        assert!(result.unavailable[0].reason.contains("jobs-cluster"));
    }

    #[test]
    fn service_unknown_to_ecs_is_reported() {
        let api = FakeApi {
            stack: Some(live_stack()),
            extra_services: vec!["arn:aws:ecs:us-east-1:123456789012:service/bw-cluster/bw-worker"],
            vanished: vec!["bw-worker"],
            ..Default::default()
        };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();

        assert_eq!(result.services.unwrap().len(), 1);
        assert_eq!(result.unavailable.len(), 1);
        assert!(result.unavailable[0].reason.contains("bw-worker"));
    }

    #[test]
    fn sources_are_fetched_concurrently() {
        let delay = Duration::from_millis(100);
        let api = FakeApi { stack: Some(live_stack()), delay, ..Default::default() };
        let started = Instant::now();
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();
        let elapsed = started.elapsed();

        assert!(result.unavailable.is_empty());
        // Serially: resources, services, target health, rules, secret, events.
        // Concurrently: resources, then the slowest of its dependents.
        assert!(elapsed >= delay * 2, "{elapsed:?}");
        assert!(elapsed < delay * 4, "took {elapsed:?}; sources ran one after another");
    }

    #[test]
    fn task_definition_failure_keeps_service_counts() {
        let api = FakeApi { stack: Some(live_stack()), fail_task_definition: true, ..Default::default() };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();
        let services = result.services.unwrap();
        assert_eq!(services[0].running, 2);
        assert!(services[0].log.is_none());
        assert!(result.unavailable.is_empty());
    }

    #[test]
    fn resource_failure_blanks_dependent_sources_only() {
        let api = FakeApi { stack: Some(live_stack()), fail_resources: true, ..Default::default() };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();
        assert!(result.resources.is_none());
        assert!(result.services.is_none());
        assert!(result.target_groups.is_none());
        assert!(result.secret.is_some());
        assert!(result.events.is_some());
        assert_eq!(result.unavailable.len(), 1);
        assert!(!api.calls.lock().unwrap().contains(&"describe_services".to_string()));
    }

    #[test]
    fn secret_failure_reports_inaccessible() {
        let api = FakeApi { stack: Some(live_stack()), fail_secret: true, ..Default::default() };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();
        let secret = result.secret.unwrap();
        assert!(!secret.accessible);
        assert!(secret.error.unwrap().contains("DescribeSecret"));
    }

    #[test]
    fn events_failure_is_unavailable() {
        let api = FakeApi { stack: Some(live_stack()), fail_events: true, ..Default::default() };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();
        assert!(result.events.is_none());
        assert_eq!(result.unavailable[0].source, "events");
    }

    #[test]
    fn no_secret_output_skips_secret_lookup() {
        let mut stack = live_stack();
        stack.outputs.clear();
        let api = FakeApi { stack: Some(stack), fail_secret: true, ..Default::default() };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();
        assert!(result.secret.is_none());
    }

    #[test]
    fn event_limit_is_configurable() {
        let api = FakeApi { stack: Some(live_stack()), ..Default::default() };
        let result = HealthAggregator::new(&api).with_event_limit(5).aggregate("S").unwrap();
        assert_eq!(result.events.unwrap().len(), 5);
    }

    #[test]
    fn deleted_stack_is_reported_not_raised() {
        let api = FakeApi {
            deleted: Some(StackSnapshot::deleted("BenchlingWebhookStack", None, None)),
            ..Default::default()
        };
        let result = HealthAggregator::new(&api).aggregate("BenchlingWebhookStack").unwrap();
        assert!(result.stack.is_deleted());
        assert_eq!(result.stack.category, StackCategory::Ok);
        assert!(!api.calls.lock().unwrap().contains(&"describe_stack_resources".to_string()));
    }

    #[test]
    fn never_existing_stack_is_none() {
        let api = FakeApi::default();
        let result = HealthAggregator::new(&api)
            .aggregate("arn:aws:cloudformation:us-east-1:1:stack/quilt-dev/abc")
            .unwrap();
        assert!(!result.stack.exists);
        assert_eq!(result.stack.category, StackCategory::None);
        assert_eq!(result.stack.name, "quilt-dev");
    }
}
