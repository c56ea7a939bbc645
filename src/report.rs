//! Plain-text rendering of status results and deploy decisions.

use std::fmt::Write as _;
use std::io;

use chrono::{DateTime, Utc};
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{Clear, ClearType},
};

use crate::models::*;
use crate::poll::Tick;
use crate::remediation::{Action, Decision};

pub fn clear_screen() -> io::Result<()> {
    execute!(io::stdout(), Clear(ClearType::All), MoveTo(0, 0))
}

/// "just now", "5 minutes ago", "3 days ago".
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (n, unit) = match secs {
        0..=59 => return "just now".to_string(),
        60..=3599 => (secs / 60, "minute"),
        3600..=86_399 => (secs / 3600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

/// The category says what a deploy would do; the raw status says what
/// CloudFormation is doing now. `CREATE_FAILED` is deployable but not fine.
fn status_marker(stack: &StackSnapshot) -> &'static str {
    match stack.category {
        StackCategory::Failed | StackCategory::Unrecoverable => "✗",
        StackCategory::InProgress => "⟳",
        _ if stack.raw_status.ends_with("_FAILED") => "✗",
        _ if stack.raw_status.ends_with("_IN_PROGRESS") => "⟳",
        StackCategory::None => "-",
        StackCategory::Ok => "✓",
    }
}

pub fn render_status(result: &StatusResult, tick: Option<&Tick>) -> String {
    let now = result.fetched_at;
    let mut out = String::new();
    let stack = &result.stack;

    writeln!(out, "-------------------------------------").ok();
    writeln!(out, "  Stack:    {}", stack.name).ok();
    if !stack.exists {
        if stack.is_deleted() {
            let when = stack.last_update_time.map(|t| relative_time(t, now)).unwrap_or_else(|| "?".into());
            writeln!(out, "  Status:   DELETE_COMPLETE (deleted {})", when).ok();
        } else {
            writeln!(out, "  Status:   not deployed").ok();
        }
        writeln!(out, "-------------------------------------").ok();
        return out;
    }

    writeln!(
        out,
        "  Status:   {} {} ({})",
        status_marker(stack),
        stack.raw_status,
        stack.category.as_str()
    )
    .ok();
    if let Some(reason) = &stack.status_reason {
        writeln!(out, "  Reason:   {}", reason).ok();
    }
    if let Some(t) = stack.last_update_time {
        writeln!(out, "  Updated:  {}", relative_time(t, now)).ok();
    }
    if let Some(toggle) = stack.webhook_toggle() {
        writeln!(out, "  Webhook:  {}", toggle).ok();
    }
    if let Some(endpoint) = stack.endpoint() {
        writeln!(out, "  Endpoint: {}", endpoint).ok();
    }
    for (k, v) in stack.outputs.iter().filter(|(k, _)| k.contains("ImageTag") || k.contains("LogGroup")) {
        writeln!(out, "  {:<9} {}", format!("{}:", short_key(k)), v).ok();
    }

    if let Some(services) = &result.services {
        writeln!(out, "\n  ECS services").ok();
        writeln!(out, "  {:<32} {:<12} {:<8} {:<12}", "NAME", "RUNNING", "PENDING", "ROLLOUT").ok();
        for s in services {
            writeln!(
                out,
                "  {:<32} {:<12} {:<8} {:<12}",
                s.name,
                format!("{}/{}", s.running, s.desired),
                s.pending,
                s.rollout_state.as_ref().map(|r| r.as_str()).unwrap_or("-"),
            )
            .ok();
            if let Some(log) = &s.log {
                match &log.stream_prefix {
                    Some(prefix) => writeln!(out, "    logs: {} ({}/...)", log.group, prefix).ok(),
                    None => writeln!(out, "    logs: {}", log.group).ok(),
                };
            }
        }
    }

    if let Some(groups) = &result.target_groups {
        writeln!(out, "\n  Target groups").ok();
        for tg in groups {
            writeln!(
                out,
                "  {:<32} healthy={} unhealthy={} draining={}",
                tg.name, tg.healthy, tg.unhealthy, tg.draining
            )
            .ok();
            for t in tg.targets.iter().filter(|t| t.state != "healthy") {
                let port = t.port.map(|p| format!(":{}", p)).unwrap_or_default();
                writeln!(
                    out,
                    "    {}{} {} {}",
                    t.id,
                    port,
                    t.state,
                    t.reason.as_deref().or(t.description.as_deref()).unwrap_or("")
                )
                .ok();
            }
        }
    }

    if let Some(routes) = &result.routes {
        let names: std::collections::HashMap<&str, &str> = result
            .target_groups
            .iter()
            .flatten()
            .map(|tg| (tg.arn.as_str(), tg.name.as_str()))
            .collect();
        writeln!(out, "\n  Routes").ok();
        for r in routes {
            let paths = if r.is_default { "(default)".to_string() } else { r.paths.join(", ") };
            let target = r
                .target_group_arn
                .as_deref()
                .map(|arn| names.get(arn).copied().unwrap_or(arn))
                .unwrap_or("-");
            writeln!(out, "  {:<8} {:<32} -> {}", r.priority, paths, target).ok();
        }
    }

    if let Some(secret) = &result.secret {
        writeln!(out, "\n  Secret:   {}", secret.name.as_deref().unwrap_or(&secret.arn)).ok();
        if !secret.accessible {
            writeln!(out, "    not accessible: {}", secret.error.as_deref().unwrap_or("unknown error")).ok();
        } else {
            let line = match (&secret.modification, secret.created) {
                (SecretModification::NeverModified, Some(c)) => {
                    format!("never modified since creation (created {})", relative_time(c, now))
                }
                (SecretModification::NeverModified, None) => "never modified since creation".to_string(),
                (SecretModification::ModifiedAt(t), _) => format!("last modified {}", relative_time(*t, now)),
                (SecretModification::Unknown, _) => "modification time unknown".to_string(),
            };
            writeln!(out, "    {}", line).ok();
        }
    }

    if let Some(events) = &result.events {
        writeln!(out, "\n  Recent events").ok();
        for e in events {
            let when = e.timestamp.map(|t| relative_time(t, now)).unwrap_or_else(|| "?".into());
            writeln!(out, "  {:<14} {:<32} {}", when, e.logical_id, e.status).ok();
            if let Some(reason) = &e.reason {
                writeln!(out, "    {}", reason).ok();
            }
        }
    }

    if !result.unavailable.is_empty() {
        writeln!(out).ok();
        for u in &result.unavailable {
            writeln!(out, "  ! {} unavailable: {}", u.source, u.reason).ok();
        }
    }

    writeln!(out, "-------------------------------------").ok();
    if let Some(tick) = tick {
        match tick.next_refresh {
            Some(d) if tick.terminal => writeln!(out, "Stable. Watching, next refresh in {}s (Ctrl-C to stop)", d.as_secs()).ok(),
            Some(d) => writeln!(out, "In progress. Next refresh in {}s (Ctrl-C to stop)", d.as_secs()).ok(),
            None if tick.terminal => writeln!(out, "Stable.").ok(),
            None => writeln!(out, "In progress.").ok(),
        };
    }
    out
}

fn short_key(key: &str) -> &str {
    if key.contains("ImageTag") { "Image" } else { "Logs" }
}

pub fn render_decision(decision: &Decision) -> String {
    let mut out = String::new();
    writeln!(out, "Recommended: {}", decision.action.as_str()).ok();
    writeln!(out, "  {}", decision.rationale).ok();
    if decision.action == Action::ProceedAnyway || decision.alternatives.contains(&Action::ProceedAnyway) {
        writeln!(out, "  Proceeding anyway is likely to fail.").ok();
    }
    if !decision.alternatives.is_empty() {
        let alts: Vec<&str> = decision.alternatives.iter().map(|a| a.as_str()).collect();
        writeln!(out, "  Other options: {}", alts.join(", ")).ok();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn relative_times() {
        assert_eq!(relative_time(now() - Duration::seconds(10), now()), "just now");
        assert_eq!(relative_time(now() - Duration::minutes(1), now()), "1 minute ago");
        assert_eq!(relative_time(now() - Duration::hours(5), now()), "5 hours ago");
        assert_eq!(relative_time(now() - Duration::days(40), now()), "40 days ago");
        assert_eq!(relative_time(now() + Duration::minutes(3), now()), "just now");
    }

    #[test]
    fn never_modified_and_modified_render_differently() {
        let mut stack = StackSnapshot::missing("S");
        stack.exists = true;
        stack.raw_status = "UPDATE_COMPLETE".into();
        let mut result = StatusResult::stack_only(stack);
        result.fetched_at = now();
        result.secret = Some(SecretHealth {
            arn: "arn:aws:secretsmanager:us-east-1:1:secret:bw".into(),
            name: Some("bw".into()),
            accessible: true,
            created: Some(now() - Duration::days(3)),
            modification: SecretModification::NeverModified,
            error: None,
        });
        let text = render_status(&result, None);
        assert!(text.contains("never modified since creation (created 3 days ago)"));

        result.secret.as_mut().unwrap().modification = SecretModification::ModifiedAt(now() - Duration::hours(2));
        let text = render_status(&result, None);
        assert!(text.contains("last modified 2 hours ago"));
        assert!(!text.contains("never modified"));
    }

    #[test]
    fn missing_and_deleted_stacks() {
        let text = render_status(&StatusResult::stack_only(StackSnapshot::missing("S")), None);
        assert!(text.contains("not deployed"));
        let mut r = StatusResult::stack_only(StackSnapshot::deleted("S", None, Some(now() - Duration::hours(1))));
        r.fetched_at = now();
        assert!(render_status(&r, None).contains("deleted 1 hour ago"));
    }

    #[test]
    fn marker_follows_raw_status() {
        let marker = |raw: &str| {
            let mut stack = StackSnapshot::missing("S");
            stack.exists = true;
            stack.raw_status = raw.into();
            stack.category = crate::classify::classify(Some(raw));
            status_marker(&stack)
        };
        assert_eq!(marker("UPDATE_COMPLETE"), "✓");
        assert_eq!(marker("ROLLBACK_COMPLETE"), "✓");
        assert_eq!(marker("UPDATE_IN_PROGRESS"), "⟳");
        assert_eq!(marker("UPDATE_ROLLBACK_IN_PROGRESS"), "⟳");
        assert_eq!(marker("CREATE_FAILED"), "✗");
        assert_eq!(marker("DELETE_FAILED"), "✗");
        assert_eq!(marker("REVIEW_IN_PROGRESS"), "✗");
    }

    #[test]
    fn unavailable_sources_are_listed() {
        let mut stack = StackSnapshot::missing("S");
        stack.exists = true;
        stack.raw_status = "UPDATE_COMPLETE".into();
        let mut r = StatusResult::stack_only(stack);
        r.unavailable.push(Unavailable { source: "ecs", reason: "AccessDenied".into() });
        assert!(render_status(&r, None).contains("! ecs unavailable: AccessDenied"));
    }
}
