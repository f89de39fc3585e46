use fedpanel_core::{ActionError, CapabilityCategory};
use serde::{Deserialize, Serialize};

/// Static risk classification of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// What the calling layer obtained before submitting a risky action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub confirmed: bool,
    pub snapshot_taken: bool,
}

impl Acknowledgement {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            snapshot_taken: false,
        }
    }

    pub fn with_snapshot(mut self) -> Self {
        self.snapshot_taken = true;
        self
    }
}

/// Preconditions that apply to one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub category: CapabilityCategory,
    pub risk: RiskLevel,
    pub confirmation_required: bool,
    pub checkpoint_required: bool,
}

/// Enforces confirmation and checkpoint preconditions. Performs no UI.
#[derive(Debug, Clone)]
pub struct SafetyGuard {
    require_checkpoint_for_high_risk: bool,
}

impl Default for SafetyGuard {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SafetyGuard {
    pub fn new(require_checkpoint_for_high_risk: bool) -> Self {
        Self {
            require_checkpoint_for_high_risk,
        }
    }

    pub fn should_confirm(&self, category: CapabilityCategory, risk: RiskLevel) -> bool {
        match risk {
            RiskLevel::High => true,
            RiskLevel::Medium => matches!(
                category,
                CapabilityCategory::Kernel
                    | CapabilityCategory::Security
                    | CapabilityCategory::Storage
                    | CapabilityCategory::Firewall
                    | CapabilityCategory::Package
            ),
            RiskLevel::Low => false,
        }
    }

    pub fn assess(
        &self,
        category: CapabilityCategory,
        risk: RiskLevel,
        checkpoint_available: bool,
    ) -> RiskAssessment {
        RiskAssessment {
            category,
            risk,
            confirmation_required: self.should_confirm(category, risk),
            checkpoint_required: risk == RiskLevel::High
                && checkpoint_available
                && self.require_checkpoint_for_high_risk,
        }
    }

    pub fn gate(
        &self,
        assessment: &RiskAssessment,
        ack: Acknowledgement,
    ) -> Result<(), ActionError> {
        if assessment.confirmation_required && !ack.confirmed {
            return Err(ActionError::unconfirmed(
                "safety.confirmation_required",
                format!(
                    "This {} {} action needs explicit confirmation before it runs",
                    assessment.risk, assessment.category
                ),
            ));
        }
        if assessment.checkpoint_required && !ack.snapshot_taken {
            return Err(ActionError::unconfirmed(
                "safety.checkpoint_required",
                "Take a system snapshot before running this high-risk action",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedpanel_core::ErrorKind;

    #[test]
    fn test_should_confirm_matrix() {
        let guard = SafetyGuard::default();
        assert!(guard.should_confirm(CapabilityCategory::Service, RiskLevel::High));
        assert!(guard.should_confirm(CapabilityCategory::Kernel, RiskLevel::Medium));
        assert!(!guard.should_confirm(CapabilityCategory::Service, RiskLevel::Medium));
        assert!(!guard.should_confirm(CapabilityCategory::Network, RiskLevel::Medium));
        assert!(!guard.should_confirm(CapabilityCategory::Kernel, RiskLevel::Low));
    }

    #[test]
    fn test_gate_requires_confirmation() {
        let guard = SafetyGuard::default();
        let assessment = guard.assess(CapabilityCategory::Package, RiskLevel::High, false);

        let err = guard.gate(&assessment, Acknowledgement::none()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unconfirmed);
        assert_eq!(err.code, "safety.confirmation_required");
        assert!(err.recoverable);

        assert!(guard.gate(&assessment, Acknowledgement::confirmed()).is_ok());
    }

    #[test]
    fn test_gate_requires_snapshot_when_checkpoint_available() {
        let guard = SafetyGuard::default();
        let assessment = guard.assess(CapabilityCategory::Kernel, RiskLevel::High, true);
        assert!(assessment.checkpoint_required);

        let err = guard
            .gate(&assessment, Acknowledgement::confirmed())
            .unwrap_err();
        assert_eq!(err.code, "safety.checkpoint_required");

        assert!(guard
            .gate(&assessment, Acknowledgement::confirmed().with_snapshot())
            .is_ok());
    }

    #[test]
    fn test_checkpoint_policy_can_be_relaxed() {
        let guard = SafetyGuard::new(false);
        let assessment = guard.assess(CapabilityCategory::Kernel, RiskLevel::High, true);
        assert!(!assessment.checkpoint_required);
        assert!(guard.gate(&assessment, Acknowledgement::confirmed()).is_ok());
    }

    #[test]
    fn test_low_risk_passes_without_acknowledgement() {
        let guard = SafetyGuard::default();
        let assessment = guard.assess(CapabilityCategory::Service, RiskLevel::Low, true);
        assert!(guard.gate(&assessment, Acknowledgement::none()).is_ok());
    }
}
