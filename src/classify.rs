//! Stack status classification and legacy-architecture detection.

use crate::models::{ResourceInventory, StackCategory};

/// Rollbacks that are still running. Checked first: nothing else may be
/// attempted against the stack until these settle.
const ROLLBACK_IN_PROGRESS: &[&str] = &[
    "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
    "UPDATE_ROLLBACK_IN_PROGRESS",
    "ROLLBACK_IN_PROGRESS",
];

const ROLLBACK_FAILED: &[&str] = &["ROLLBACK_FAILED", "UPDATE_ROLLBACK_FAILED"];

/// A change set failed before touching any resources; CloudFormation
/// refuses every operation except delete.
const UNRECOVERABLE: &[&str] = &["REVIEW_IN_PROGRESS"];

pub const REST_API_TYPE: &str = "AWS::ApiGateway::RestApi";
pub const HTTP_API_TYPE: &str = "AWS::ApiGatewayV2::Api";
pub const VPC_LINK_TYPE: &str = "AWS::ApiGatewayV2::VpcLink";

/// Map a raw CloudFormation status to its category. `None` means the stack
/// does not exist.
///
/// `UPDATE_ROLLBACK_COMPLETE` and `ROLLBACK_COMPLETE` are `Ok`: once a
/// rollback has finished CloudFormation accepts new updates. Unknown
/// statuses are also `Ok`.
pub fn classify(raw_status: Option<&str>) -> StackCategory {
    let Some(status) = raw_status else {
        return StackCategory::None;
    };
    if ROLLBACK_IN_PROGRESS.contains(&status) {
        StackCategory::InProgress
    } else if ROLLBACK_FAILED.contains(&status) {
        StackCategory::Failed
    } else if UNRECOVERABLE.contains(&status) {
        StackCategory::Unrecoverable
    } else {
        StackCategory::Ok
    }
}

/// The stack still fronts the webhook with a REST API Gateway and has not
/// picked up the HTTP API + VPC link architecture.
pub fn is_legacy_architecture(inventory: &ResourceInventory) -> bool {
    inventory.has_type(REST_API_TYPE)
        && !(inventory.has_type(HTTP_API_TYPE) || inventory.has_type(VPC_LINK_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StackResource;

    const ALL_STATUSES: &[&str] = &[
        "CREATE_IN_PROGRESS", "CREATE_FAILED", "CREATE_COMPLETE",
        "ROLLBACK_IN_PROGRESS", "ROLLBACK_FAILED", "ROLLBACK_COMPLETE",
        "DELETE_IN_PROGRESS", "DELETE_FAILED", "DELETE_COMPLETE",
        "UPDATE_IN_PROGRESS", "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS", "UPDATE_COMPLETE",
        "UPDATE_FAILED", "UPDATE_ROLLBACK_IN_PROGRESS", "UPDATE_ROLLBACK_FAILED",
        "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS", "UPDATE_ROLLBACK_COMPLETE",
        "REVIEW_IN_PROGRESS", "IMPORT_IN_PROGRESS", "IMPORT_COMPLETE",
        "IMPORT_ROLLBACK_IN_PROGRESS", "IMPORT_ROLLBACK_FAILED", "IMPORT_ROLLBACK_COMPLETE",
    ];

    fn inventory(types: &[&str]) -> ResourceInventory {
        ResourceInventory {
            resources: types
                .iter()
                .enumerate()
                .map(|(i, t)| StackResource {
                    resource_type: t.to_string(),
                    logical_id: format!("Res{i}"),
                    physical_id: Some(format!("phys-{i}")),
                    status: "CREATE_COMPLETE".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn absent_stack_is_none() {
        assert_eq!(classify(None), StackCategory::None);
    }

    #[test]
    fn active_rollbacks_are_in_progress() {
        for s in ROLLBACK_IN_PROGRESS {
            assert_eq!(classify(Some(*s)), StackCategory::InProgress, "{s}");
        }
    }

    #[test]
    fn failed_rollbacks_are_failed() {
        assert_eq!(classify(Some("ROLLBACK_FAILED")), StackCategory::Failed);
        assert_eq!(classify(Some("UPDATE_ROLLBACK_FAILED")), StackCategory::Failed);
    }

    #[test]
    fn completed_rollbacks_are_updatable() {
        assert_eq!(classify(Some("ROLLBACK_COMPLETE")), StackCategory::Ok);
        assert_eq!(classify(Some("UPDATE_ROLLBACK_COMPLETE")), StackCategory::Ok);
    }

    #[test]
    fn review_in_progress_is_unrecoverable() {
        assert_eq!(classify(Some("REVIEW_IN_PROGRESS")), StackCategory::Unrecoverable);
    }

    #[test]
    fn every_known_status_has_exactly_one_category() {
        let special = ROLLBACK_IN_PROGRESS.len() + ROLLBACK_FAILED.len() + UNRECOVERABLE.len();
        let non_ok = ALL_STATUSES
            .iter()
            .filter(|s| classify(Some(**s)) != StackCategory::Ok)
            .count();
        assert_eq!(non_ok, special);
        for s in ALL_STATUSES {
            assert_ne!(classify(Some(*s)), StackCategory::None, "{s}");
        }
    }

    #[test]
    fn unknown_status_is_ok() {
        assert_eq!(classify(Some("SOMETHING_NEW")), StackCategory::Ok);
        assert_eq!(classify(Some("")), StackCategory::Ok);
    }

    #[test]
    fn rest_api_without_v2_is_legacy() {
        assert!(is_legacy_architecture(&inventory(&[REST_API_TYPE, "AWS::Lambda::Function"])));
    }

    #[test]
    fn rest_api_with_http_api_is_not_legacy() {
        assert!(!is_legacy_architecture(&inventory(&[REST_API_TYPE, HTTP_API_TYPE])));
        assert!(!is_legacy_architecture(&inventory(&[REST_API_TYPE, VPC_LINK_TYPE])));
        assert!(!is_legacy_architecture(&inventory(&[HTTP_API_TYPE, VPC_LINK_TYPE])));
        assert!(!is_legacy_architecture(&ResourceInventory::default()));
    }
}
