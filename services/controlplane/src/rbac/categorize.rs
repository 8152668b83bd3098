//! Permission name categorization.
//!
//! Permission names follow `<resource>.<selector>.<action>`. The summary groups
//! them by resource for display and flags destructive capabilities.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

const CRITICAL_MARKERS: [&str; 3] = ["delete", "decrypt", "remove"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSummary {
    /// Every name passed in, including ones too short to categorize.
    pub total: usize,
    pub categories: BTreeMap<String, usize>,
    pub has_critical_perm: bool,
}

fn category(resource: &str, action: &str) -> &'static str {
    match resource {
        "api" if action.contains("key") => "Keys",
        "api" => "API",
        "ratelimit" => "Ratelimit",
        "rbac" => "Permissions",
        "identity" => "Identities",
        _ => "Other",
    }
}

pub fn categorize<S: AsRef<str>>(names: &[S]) -> PermissionSummary {
    let mut summary = PermissionSummary {
        total: names.len(),
        ..PermissionSummary::default()
    };
    for name in names.iter().map(AsRef::as_ref) {
        if CRITICAL_MARKERS.iter().any(|marker| name.contains(marker)) {
            summary.has_critical_perm = true;
        }
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() < 3 {
            continue;
        }
        *summary
            .categories
            .entry(category(parts[0], parts[2]).to_string())
            .or_insert(0) += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_resource_and_action() {
        let summary = categorize(&[
            "api.*.create_key",
            "api.*.read_api",
            "ratelimit.ns_1.limit",
            "rbac.*.add_permission_to_key",
            "identity.*.create_identity",
            "billing.*.read",
            "api.*.verify_key",
        ]);
        assert_eq!(summary.total, 7);
        assert_eq!(summary.categories.get("Keys"), Some(&2));
        assert_eq!(summary.categories.get("API"), Some(&1));
        assert_eq!(summary.categories.get("Ratelimit"), Some(&1));
        assert_eq!(summary.categories.get("Permissions"), Some(&1));
        assert_eq!(summary.categories.get("Identities"), Some(&1));
        assert_eq!(summary.categories.get("Other"), Some(&1));
        assert!(!summary.has_critical_perm);
    }

    #[test]
    fn short_names_count_toward_total_only() {
        let summary = categorize(&["admin", "api.read", "api.*.read_api"]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.categories.values().sum::<usize>(), 1);
    }

    #[test]
    fn destructive_actions_are_critical() {
        for name in ["api.*.delete_key", "secrets.*.decrypt", "remove"] {
            assert!(categorize(&[name]).has_critical_perm, "{name}");
        }
    }

    #[test]
    fn empty_input_is_empty_summary() {
        let summary = categorize::<&str>(&[]);
        assert_eq!(summary, PermissionSummary::default());
    }
}
