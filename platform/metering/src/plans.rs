use std::collections::{BTreeMap, HashMap};

use entity::orgs::PlanType;
use serde::{Deserialize, Serialize};

use crate::MeteringError;

/// Monthly ceiling for one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Ceiling {
    Limited(i64),
    Unlimited,
}

impl Ceiling {
    pub fn limit(self) -> Option<i64> {
        match self {
            Ceiling::Limited(limit) => Some(limit),
            Ceiling::Unlimited => None,
        }
    }
}

/// Per-plan quota ceilings. In the document form a `null` limit means
/// unlimited; a resource type missing from a plan has a ceiling of zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaTable(HashMap<PlanType, BTreeMap<String, Option<i64>>>);

impl QuotaTable {
    pub fn new(plans: HashMap<PlanType, BTreeMap<String, Option<i64>>>) -> Result<Self, MeteringError> {
        let table = Self(plans);
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), MeteringError> {
        for limits in self.0.values() {
            if let Some((resource, _)) = limits
                .iter()
                .find(|(_, limit)| matches!(limit, Some(value) if *value < 0))
            {
                return Err(MeteringError::InvalidLimit(resource.clone()));
            }
        }
        Ok(())
    }

    pub fn ceiling(&self, plan: PlanType, resource_type: &str) -> Ceiling {
        match self.0.get(&plan).and_then(|limits| limits.get(resource_type)) {
            Some(Some(limit)) => Ceiling::Limited(*limit),
            Some(None) => Ceiling::Unlimited,
            None => Ceiling::Limited(0),
        }
    }

    /// Resource types the plan names, in stable order.
    pub fn resources(&self, plan: PlanType) -> impl Iterator<Item = (&str, Ceiling)> {
        self.0.get(&plan).into_iter().flatten().map(|(resource, limit)| {
            let ceiling = match limit {
                Some(value) => Ceiling::Limited(*value),
                None => Ceiling::Unlimited,
            };
            (resource.as_str(), ceiling)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> QuotaTable {
        serde_json::from_value(serde_json::json!({
            "core": { "site_analyses": 10, "submission_packs": 0 },
            "enterprise": { "site_analyses": null }
        }))
        .unwrap()
    }

    #[test]
    fn resolves_ceilings() {
        let table = table();
        assert_eq!(table.ceiling(PlanType::Core, "site_analyses"), Ceiling::Limited(10));
        assert_eq!(table.ceiling(PlanType::Core, "submission_packs"), Ceiling::Limited(0));
        assert_eq!(table.ceiling(PlanType::Enterprise, "site_analyses"), Ceiling::Unlimited);
    }

    #[test]
    fn unknown_resources_and_plans_get_nothing() {
        let table = table();
        assert_eq!(table.ceiling(PlanType::Core, "api_calls"), Ceiling::Limited(0));
        assert_eq!(table.ceiling(PlanType::Professional, "site_analyses"), Ceiling::Limited(0));
    }

    #[test]
    fn negative_limits_are_rejected() {
        let mut plans = HashMap::new();
        plans.insert(PlanType::Core, BTreeMap::from([("docs".to_string(), Some(-1))]));
        assert!(matches!(QuotaTable::new(plans), Err(MeteringError::InvalidLimit(r)) if r == "docs"));
    }
}
