use serde::{Deserialize, Serialize};

/// Identifications (and disease scans) granted per month on the free tier.
pub const MONTHLY_FREE_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }

    pub fn parse(value: &str) -> Option<Tier> {
        match value {
            "free" => Some(Tier::Free),
            "premium" => Some(Tier::Premium),
            _ => None,
        }
    }
}

/// Closed set of gated product features.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FeatureKind {
    Identification,
    DiseaseDetection,
    Analytics,
    Weather,
    Export,
    Collection,
}

impl FeatureKind {
    /// Metered features draw from the shared monthly free-tier allowance.
    fn is_metered(&self) -> bool {
        matches!(self, FeatureKind::Identification | FeatureKind::DiseaseDetection)
    }

    /// Premium-only features are never available on the free tier.
    fn is_premium_only(&self) -> bool {
        matches!(self, FeatureKind::Analytics | FeatureKind::Export)
    }
}

/// Point-in-time view of the user's metered usage for the current month.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AccessReason {
    /// Unconditional access (premium tier or an unmetered feature).
    Ok,
    /// Granted under the free-tier allowance; completing the attempt
    /// consumes one unit.
    FreeLimit,
    /// The monthly free-tier allowance is exhausted.
    LimitExceeded,
    /// No resolvable subscription (anonymous caller, or a premium-only
    /// feature requested on the free tier).
    NoSubscription,
}

/// Outcome of a single gate evaluation. Computed fresh on every capture
/// attempt and never cached beyond one decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureAccessDecision {
    pub has_access: bool,
    pub reason: AccessReason,
    pub remaining_uses: Option<u32>,
}

impl FeatureAccessDecision {
    fn granted(reason: AccessReason, remaining_uses: Option<u32>) -> Self {
        Self {
            has_access: true,
            reason,
            remaining_uses,
        }
    }

    fn denied(reason: AccessReason) -> Self {
        Self {
            has_access: false,
            reason,
            remaining_uses: Some(0),
        }
    }
}

/// Decide whether one capture-to-identification attempt may proceed.
///
/// Pure and synchronous. Must be evaluated before the capture device is
/// acquired so a denied attempt never touches hardware.
pub fn check_access(
    feature: FeatureKind,
    tier: Option<Tier>,
    usage: &UsageSnapshot,
) -> FeatureAccessDecision {
    let Some(tier) = tier else {
        return FeatureAccessDecision::denied(AccessReason::NoSubscription);
    };

    if tier == Tier::Premium {
        return FeatureAccessDecision::granted(AccessReason::Ok, None);
    }

    if feature.is_premium_only() {
        return FeatureAccessDecision::denied(AccessReason::NoSubscription);
    }

    if !feature.is_metered() {
        return FeatureAccessDecision::granted(AccessReason::Ok, None);
    }

    if usage.count < MONTHLY_FREE_LIMIT {
        let remaining_after = MONTHLY_FREE_LIMIT - usage.count - 1;
        FeatureAccessDecision::granted(AccessReason::FreeLimit, Some(remaining_after))
    } else {
        FeatureAccessDecision::denied(AccessReason::LimitExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premium_always_allowed() {
        let decision = check_access(
            FeatureKind::Identification,
            Some(Tier::Premium),
            &UsageSnapshot { count: 999 },
        );
        assert!(decision.has_access);
        assert_eq!(decision.reason, AccessReason::Ok);
        assert_eq!(decision.remaining_uses, None);
    }

    #[test]
    fn free_tier_within_allowance() {
        let decision = check_access(
            FeatureKind::Identification,
            Some(Tier::Free),
            &UsageSnapshot { count: 1 },
        );
        assert!(decision.has_access);
        assert_eq!(decision.reason, AccessReason::FreeLimit);
        assert_eq!(decision.remaining_uses, Some(1));
    }

    #[test]
    fn free_tier_at_limit_is_denied() {
        let decision = check_access(
            FeatureKind::Identification,
            Some(Tier::Free),
            &UsageSnapshot { count: 3 },
        );
        assert!(!decision.has_access);
        assert_eq!(decision.reason, AccessReason::LimitExceeded);
    }

    #[test]
    fn anonymous_caller_has_no_subscription() {
        let decision = check_access(FeatureKind::Identification, None, &UsageSnapshot::default());
        assert!(!decision.has_access);
        assert_eq!(decision.reason, AccessReason::NoSubscription);
    }

    #[test]
    fn premium_only_feature_denied_on_free_tier() {
        let decision = check_access(
            FeatureKind::Export,
            Some(Tier::Free),
            &UsageSnapshot::default(),
        );
        assert!(!decision.has_access);
        assert_eq!(decision.reason, AccessReason::NoSubscription);
    }

    #[test]
    fn unmetered_feature_allowed_on_free_tier() {
        let decision = check_access(
            FeatureKind::Collection,
            Some(Tier::Free),
            &UsageSnapshot { count: 3 },
        );
        assert!(decision.has_access);
        assert_eq!(decision.reason, AccessReason::Ok);
    }

    #[test]
    fn disease_detection_shares_the_allowance() {
        let decision = check_access(
            FeatureKind::DiseaseDetection,
            Some(Tier::Free),
            &UsageSnapshot { count: 3 },
        );
        assert!(!decision.has_access);
        assert_eq!(decision.reason, AccessReason::LimitExceeded);
    }
}
