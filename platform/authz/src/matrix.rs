use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Decision, DenyReason, Permission, PolicyError, Principal, Role, WILDCARD};

/// Serialized form of the matrix, as it appears in the policy document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MatrixDefinition {
    pub roles: BTreeMap<Role, Vec<String>>,
    /// Organization-scoped additions for custom role needs. They extend a
    /// built-in role inside one org and can never remove a grant.
    #[serde(default)]
    pub org_overrides: BTreeMap<Uuid, BTreeMap<Role, Vec<String>>>,
}

/// Immutable role to permission-set mapping. Built once; a reload builds a
/// fresh matrix and swaps it in whole.
#[derive(Clone, Debug, Default)]
pub struct PermissionMatrix {
    grants: HashMap<Role, HashSet<Permission>>,
    wildcard: HashSet<Role>,
    overlays: HashMap<(Uuid, Role), HashSet<Permission>>,
    catalogue: HashSet<Permission>,
}

impl PermissionMatrix {
    pub fn from_definition(definition: &MatrixDefinition) -> Result<Self, PolicyError> {
        let mut matrix = PermissionMatrix::default();
        for (role, tokens) in &definition.roles {
            let entry = matrix.grants.entry(*role).or_default();
            for token in tokens {
                if token == WILDCARD {
                    if *role != Role::Owner {
                        return Err(PolicyError::WildcardNotAllowed(*role));
                    }
                    matrix.wildcard.insert(*role);
                    continue;
                }
                let permission = Permission::parse(token.as_str())?;
                matrix.catalogue.insert(permission.clone());
                entry.insert(permission);
            }
        }
        for (org_id, roles) in &definition.org_overrides {
            for (role, tokens) in roles {
                let entry = matrix.overlays.entry((*org_id, *role)).or_default();
                for token in tokens {
                    if token == WILDCARD {
                        return Err(PolicyError::WildcardNotAllowed(*role));
                    }
                    let permission = Permission::parse(token.as_str())?;
                    matrix.catalogue.insert(permission.clone());
                    entry.insert(permission);
                }
            }
        }
        Ok(matrix)
    }

    /// The access decision point. Deny unless the token is in the catalogue
    /// and either the role holds the wildcard, the role holds the token, or
    /// the principal's org extends its role with it.
    pub fn decide(&self, principal: &Principal, permission: &str) -> Decision {
        if !self.catalogue.contains(permission) {
            return Decision::Deny(DenyReason::UnknownPermission);
        }
        if self.wildcard.contains(&principal.role) {
            return Decision::Allow;
        }
        let granted = self
            .grants
            .get(&principal.role)
            .is_some_and(|set| set.contains(permission));
        let extended = self
            .overlays
            .get(&(principal.org_id, principal.role))
            .is_some_and(|set| set.contains(permission));
        if granted || extended {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::NotGranted)
        }
    }

    /// Every permission the principal effectively holds, sorted.
    pub fn effective_permissions(&self, principal: &Principal) -> BTreeSet<&Permission> {
        if self.wildcard.contains(&principal.role) {
            return self.catalogue.iter().collect();
        }
        let base = self.grants.get(&principal.role).into_iter().flatten();
        let overlay = self
            .overlays
            .get(&(principal.org_id, principal.role))
            .into_iter()
            .flatten();
        base.chain(overlay).collect()
    }

    pub fn catalogue(&self) -> impl Iterator<Item = &Permission> {
        self.catalogue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn definition() -> MatrixDefinition {
        serde_json::from_value(serde_json::json!({
            "roles": {
                "owner": ["*"],
                "admin": ["cases:read", "cases:write", "billing:manage"],
                "staff": ["cases:read", "cases:write"],
                "read_only": ["cases:read"],
                "client": ["cases:read"],
                "authority": ["submissions:read"]
            },
            "org_overrides": {
                "00000000-0000-0000-0000-00000000000a": { "staff": ["reports:export"] }
            }
        }))
        .unwrap()
    }

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::nil(),
            org_id: Uuid::nil(),
            role,
        }
    }

    #[test]
    fn role_membership_decides() {
        let matrix = PermissionMatrix::from_definition(&definition()).unwrap();
        assert!(matrix.decide(&principal(Role::Staff), "cases:write").is_allowed());
        assert_eq!(
            matrix.decide(&principal(Role::ReadOnly), "cases:write"),
            Decision::Deny(DenyReason::NotGranted)
        );
        // manager has no entry at all in this definition
        assert!(!matrix.decide(&principal(Role::Manager), "cases:read").is_allowed());
    }

    #[test]
    fn wildcard_covers_catalogue_only() {
        let matrix = PermissionMatrix::from_definition(&definition()).unwrap();
        let owner = principal(Role::Owner);
        assert!(matrix.decide(&owner, "billing:manage").is_allowed());
        assert_eq!(
            matrix.decide(&owner, "nuclear:launch"),
            Decision::Deny(DenyReason::UnknownPermission)
        );
    }

    #[test]
    fn wildcard_is_reserved_for_owner() {
        let mut def = definition();
        def.roles.insert(Role::Admin, vec!["*".into()]);
        assert_eq!(
            PermissionMatrix::from_definition(&def).unwrap_err(),
            PolicyError::WildcardNotAllowed(Role::Admin)
        );
    }

    #[test]
    fn org_overlay_only_extends_its_own_org() {
        let matrix = PermissionMatrix::from_definition(&definition()).unwrap();
        let org_a: Uuid = "00000000-0000-0000-0000-00000000000a".parse().unwrap();
        let staff_a = Principal {
            org_id: org_a,
            ..principal(Role::Staff)
        };
        assert!(matrix.decide(&staff_a, "reports:export").is_allowed());
        assert!(!matrix.decide(&principal(Role::Staff), "reports:export").is_allowed());
        assert!(matrix.decide(&staff_a, "cases:write").is_allowed());
        assert!(
            matrix
                .effective_permissions(&staff_a)
                .iter()
                .any(|p| p.as_str() == "reports:export")
        );
    }

    #[test]
    fn overlay_cannot_grant_wildcard() {
        let mut def = definition();
        def.org_overrides
            .entry(Uuid::nil())
            .or_default()
            .insert(Role::Client, vec!["*".into()]);
        assert!(PermissionMatrix::from_definition(&def).is_err());
    }

    fn any_role() -> impl Strategy<Value = Role> {
        proptest::sample::select(Role::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn decisions_are_deterministic(role in any_role(), idx in 0usize..16) {
            let matrix = PermissionMatrix::from_definition(&definition()).unwrap();
            let mut tokens: Vec<String> =
                matrix.catalogue().map(|p| p.as_str().to_string()).collect();
            tokens.sort();
            tokens.push("unknown:thing".into());
            let token = &tokens[idx % tokens.len()];
            let first = matrix.decide(&principal(role), token);
            for _ in 0..4 {
                prop_assert_eq!(matrix.decide(&principal(role), token), first);
            }
        }

        #[test]
        fn tokens_outside_catalogue_are_denied_for_every_role(
            resource in "[a-z]{3,10}",
            action in "[a-z]{3,10}",
        ) {
            let matrix = PermissionMatrix::from_definition(&definition()).unwrap();
            let token = format!("zz{resource}:{action}");
            for role in Role::ALL {
                prop_assert_eq!(
                    matrix.decide(&principal(role), &token),
                    Decision::Deny(DenyReason::UnknownPermission)
                );
            }
        }
    }
}
