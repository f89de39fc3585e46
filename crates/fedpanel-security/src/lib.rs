//! Security boundary for privileged actions: parameter validation, the
//! escalation broker, confirmation gating and the audit trail.

pub mod audit;
pub mod escalation;
pub mod safety;
pub mod validation;

pub use audit::{hash_stderr, read_records, sanitize_parameters, AuditLogger, AuditRecord, REDACTED};
pub use escalation::{ensure_no_shell, EscalationBroker};
pub use safety::{Acknowledgement, RiskAssessment, RiskLevel, SafetyGuard};
pub use validation::{ParamSchema, ParamSpec, ParamType, ParameterValidator, PathRule};
