use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use platform_authz::{MatrixDefinition, Permission, PermissionMatrix, PolicyError, Role};
use platform_metering::{CreditCost, MeteringError, QuotaTable};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const BUILTIN_POLICY: &str = include_str!("../policy/default.json");

#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("policy document is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Matrix(#[from] PolicyError),
    #[error(transparent)]
    Quota(#[from] MeteringError),
    #[error("action {action:?}: {reason}")]
    InvalidAction { action: String, reason: String },
}

/// The external, serialized policy: permission matrix, plan quotas and the
/// action price list.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PolicyDocument {
    pub roles: BTreeMap<Role, Vec<String>>,
    #[serde(default)]
    pub org_overrides: BTreeMap<Uuid, BTreeMap<Role, Vec<String>>>,
    #[serde(default)]
    pub plans: QuotaTable,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionDocument>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ActionDocument {
    pub permission: String,
    #[serde(default)]
    pub quota: Option<String>,
    #[serde(default)]
    pub credit: Option<CreditCost>,
}

/// What one business action requires. Resolved once when the policy loads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRule {
    pub permission: Permission,
    pub quota: Option<String>,
    pub credit: Option<CreditCost>,
}

/// Validated, immutable policy. Replaced whole on reload.
#[derive(Clone, Debug)]
pub struct Policy {
    matrix: PermissionMatrix,
    plans: QuotaTable,
    actions: HashMap<String, ActionRule>,
}

impl Policy {
    pub fn builtin() -> Result<Self, PolicyLoadError> {
        Self::from_json(BUILTIN_POLICY)
    }

    pub fn from_json(raw: &str) -> Result<Self, PolicyLoadError> {
        let document: PolicyDocument = serde_json::from_str(raw)?;
        Self::from_document(document)
    }

    pub fn from_document(document: PolicyDocument) -> Result<Self, PolicyLoadError> {
        let matrix = PermissionMatrix::from_definition(&MatrixDefinition {
            roles: document.roles,
            org_overrides: document.org_overrides,
        })?;
        document.plans.validate()?;

        let catalogue: HashSet<&str> = matrix.catalogue().map(Permission::as_str).collect();
        let mut actions = HashMap::with_capacity(document.actions.len());
        for (name, action) in document.actions {
            let invalid = |reason: String| PolicyLoadError::InvalidAction {
                action: name.clone(),
                reason,
            };
            let permission = Permission::parse(action.permission.as_str())?;
            if !catalogue.contains(permission.as_str()) {
                return Err(invalid(format!("permission {permission} is granted to no role")));
            }
            if let Some(cost) = &action.credit {
                if cost.amount <= 0 {
                    return Err(invalid(format!("credit amount must be positive, got {}", cost.amount)));
                }
                if cost.credit_type.trim().is_empty() {
                    return Err(invalid("credit type is empty".into()));
                }
            }
            if action.quota.as_deref().is_some_and(|quota| quota.trim().is_empty()) {
                return Err(invalid("quota resource type is empty".into()));
            }
            actions.insert(
                name,
                ActionRule {
                    permission,
                    quota: action.quota,
                    credit: action.credit,
                },
            );
        }

        Ok(Self {
            matrix,
            plans: document.plans,
            actions,
        })
    }

    pub fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }

    pub fn plans(&self) -> &QuotaTable {
        &self.plans
    }

    pub fn action(&self, name: &str) -> Option<&ActionRule> {
        self.actions.get(name)
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Credit types some action is priced in.
    pub fn credit_types(&self) -> BTreeSet<&str> {
        self.actions
            .values()
            .filter_map(|rule| rule.credit.as_ref())
            .map(|cost| cost.credit_type.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use entity::orgs::PlanType;
    use platform_authz::{Decision, DenyReason, Principal};
    use platform_metering::Ceiling;
    use serde_json::json;

    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn builtin_policy_loads() {
        let policy = Policy::builtin().unwrap();
        let rule = policy.action("site_analysis.run").unwrap();
        assert_eq!(rule.permission.as_str(), "analyses:run");
        assert_eq!(rule.quota.as_deref(), Some("site_analyses"));
        assert_eq!(rule.credit.as_ref().map(|c| c.amount), Some(1));
        assert_eq!(
            policy.plans().ceiling(PlanType::Core, "site_analyses"),
            Ceiling::Limited(10)
        );
        assert_eq!(
            policy.plans().ceiling(PlanType::Enterprise, "docs"),
            Ceiling::Unlimited
        );
        assert_eq!(
            policy.plans().ceiling(PlanType::Core, "submission_packs"),
            Ceiling::Limited(0)
        );
    }

    #[test]
    fn builtin_roles_behave() {
        let policy = Policy::builtin().unwrap();
        let matrix = policy.matrix();
        assert!(matrix.decide(&principal(Role::Owner), "members:manage").is_allowed());
        assert!(matrix.decide(&principal(Role::Manager), "billing:read").is_allowed());
        assert!(!matrix.decide(&principal(Role::Manager), "billing:manage").is_allowed());
        assert!(matrix.decide(&principal(Role::Staff), "analyses:run").is_allowed());
        assert!(!matrix.decide(&principal(Role::ReadOnly), "cases:write").is_allowed());
        assert!(!matrix.decide(&principal(Role::Client), "analyses:run").is_allowed());
        assert!(matrix.decide(&principal(Role::Authority), "comments:write").is_allowed());
        assert_eq!(
            matrix.decide(&principal(Role::Owner), "root:shell"),
            Decision::Deny(DenyReason::UnknownPermission)
        );
    }

    #[test]
    fn rejects_ungranted_action_permission() {
        let raw = json!({
            "roles": { "admin": ["cases:read"] },
            "actions": { "case.delete": { "permission": "cases:delete" } }
        });
        let err = Policy::from_json(&raw.to_string()).unwrap_err();
        assert!(matches!(err, PolicyLoadError::InvalidAction { ref action, .. } if action == "case.delete"));
    }

    #[test]
    fn rejects_non_positive_costs() {
        let raw = json!({
            "roles": { "admin": ["analyses:run"] },
            "actions": {
                "site_analysis.run": {
                    "permission": "analyses:run",
                    "credit": { "credit_type": "AI_ANALYSIS", "amount": 0 }
                }
            }
        });
        assert!(matches!(
            Policy::from_json(&raw.to_string()),
            Err(PolicyLoadError::InvalidAction { .. })
        ));
    }

    #[test]
    fn rejects_wildcard_outside_owner() {
        let raw = json!({ "roles": { "admin": ["*"] } });
        assert!(matches!(
            Policy::from_json(&raw.to_string()),
            Err(PolicyLoadError::Matrix(PolicyError::WildcardNotAllowed(Role::Admin)))
        ));
    }
}
