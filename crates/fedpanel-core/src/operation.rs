use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Coarse classification of a privileged operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    Package,
    Service,
    Network,
    Firewall,
    Storage,
    Kernel,
    Security,
}

impl CapabilityCategory {
    pub const ALL: [CapabilityCategory; 7] = [
        CapabilityCategory::Package,
        CapabilityCategory::Service,
        CapabilityCategory::Network,
        CapabilityCategory::Firewall,
        CapabilityCategory::Storage,
        CapabilityCategory::Kernel,
        CapabilityCategory::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityCategory::Package => "package",
            CapabilityCategory::Service => "service",
            CapabilityCategory::Network => "network",
            CapabilityCategory::Firewall => "firewall",
            CapabilityCategory::Storage => "storage",
            CapabilityCategory::Kernel => "kernel",
            CapabilityCategory::Security => "security",
        }
    }

    /// Category named by the prefix of a dotted action id (`service.restart` -> Service)
    pub fn from_action_id(action_id: &str) -> Option<Self> {
        action_id.split('.').next().and_then(|prefix| prefix.parse().ok())
    }
}

impl fmt::Display for CapabilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CapabilityCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| format!("unknown capability category '{}'", s))
    }
}

/// A single parameter value supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Boolean(bool),
    Integer(i64),
    Text(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Boolean(_) => "boolean",
            ParamValue::Integer(_) => "integer",
            ParamValue::Text(_) => "text",
            ParamValue::List(_) => "list",
        }
    }

    /// Render as positional command-line values; lists expand to one value per element
    pub fn to_arguments(&self) -> Vec<String> {
        match self {
            ParamValue::Boolean(value) => vec![value.to_string()],
            ParamValue::Integer(value) => vec![value.to_string()],
            ParamValue::Text(value) => vec![value.clone()],
            ParamValue::List(values) => values.clone(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Boolean(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        ParamValue::List(values)
    }
}

impl From<&[&str]> for ParamValue {
    fn from(values: &[&str]) -> Self {
        ParamValue::List(values.iter().map(|v| v.to_string()).collect())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Boolean(value) => write!(f, "{}", value),
            ParamValue::Integer(value) => write!(f, "{}", value),
            ParamValue::Text(value) => f.write_str(value),
            ParamValue::List(values) => f.write_str(&values.join(",")),
        }
    }
}

/// Caller intent for one privileged action.
///
/// Built once by a consumer and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    action_id: String,
    capability_category: CapabilityCategory,
    parameters: BTreeMap<String, ParamValue>,
    dry_run: bool,
}

impl OperationRequest {
    pub fn new(capability_category: CapabilityCategory, action_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            capability_category,
            parameters: BTreeMap::new(),
            dry_run: false,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, parameters: BTreeMap<String, ParamValue>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn capability_category(&self) -> CapabilityCategory {
        self.capability_category
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_through_names() {
        for category in CapabilityCategory::ALL {
            assert_eq!(category.as_str().parse::<CapabilityCategory>(), Ok(category));
        }
        assert!("printer".parse::<CapabilityCategory>().is_err());
    }

    #[test]
    fn test_category_from_action_id() {
        assert_eq!(
            CapabilityCategory::from_action_id("service.restart"),
            Some(CapabilityCategory::Service)
        );
        assert_eq!(
            CapabilityCategory::from_action_id("kernel.add_karg"),
            Some(CapabilityCategory::Kernel)
        );
        assert_eq!(CapabilityCategory::from_action_id("bogus.thing"), None);
    }

    #[test]
    fn test_request_builder() {
        let request = OperationRequest::new(CapabilityCategory::Package, "package.install")
            .param("packages", &["htop", "btop"][..])
            .param("refresh", true)
            .dry_run(true);

        assert_eq!(request.action_id(), "package.install");
        assert_eq!(request.capability_category(), CapabilityCategory::Package);
        assert!(request.is_dry_run());
        assert_eq!(
            request.parameter("packages").unwrap().to_arguments(),
            vec!["htop".to_string(), "btop".to_string()]
        );
        let keys: Vec<_> = request.parameters().keys().cloned().collect();
        assert_eq!(keys, vec!["packages".to_string(), "refresh".to_string()]);
    }

    #[test]
    fn test_param_value_untagged_json() {
        let values: Vec<ParamValue> =
            serde_json::from_str(r#"["sshd", 8080, true, ["a", "b"]]"#).unwrap();
        assert_eq!(values[0], ParamValue::Text("sshd".to_string()));
        assert_eq!(values[1], ParamValue::Integer(8080));
        assert_eq!(values[2], ParamValue::Boolean(true));
        assert_eq!(values[3].type_name(), "list");
    }
}
