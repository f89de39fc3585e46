//! Schema-driven parameter validation.
//!
//! Runs strictly before a command is built, so nothing a caller supplies can
//! reach an argument vector without passing these checks.

use anyhow::{Context, Result};
use fedpanel_core::{ActionError, ParamValue};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z0-9_@][A-Za-z0-9._+@:=/-]*$";
const MAX_IDENTIFIER_LEN: usize = 255;
const MAX_TEXT_LEN: usize = 4096;

/// Confinement rule for a filesystem path parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub base_dir: PathBuf,
    pub require_relative: bool,
}

impl PathRule {
    pub fn relative_to(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            require_relative: true,
        }
    }

    /// Resolve a validated value against the base directory
    pub fn resolve(&self, value: &str) -> PathBuf {
        normalize(&self.base_dir.join(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// Free text without control characters
    Text,
    /// Package, unit, connection or zone name
    Identifier,
    /// One or more identifiers; a single text value counts as a one-element list
    IdentifierList,
    Integer { min: i64, max: i64 },
    Boolean,
    Path(PathRule),
}

impl ParamType {
    fn name(&self) -> &'static str {
        match self {
            ParamType::Text => "text",
            ParamType::Identifier => "identifier",
            ParamType::IdentifierList => "list of identifiers",
            ParamType::Integer { .. } => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Path(_) => "relative path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub allowed_values: Option<Vec<String>>,
    /// Redacted in audit records and masked in rendered commands
    pub secret: bool,
    /// Only ever joined into a larger argument such as `key=value`, so a
    /// leading `-` cannot be read as an option
    pub embedded: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            allowed_values: None,
            secret: false,
            embedded: false,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }
}

/// Declared parameters of one action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|spec| spec.name == name)
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.get(name).map(|spec| spec.secret).unwrap_or(false)
    }

    /// Convert a raw `key=value` string from a text surface into a typed value
    pub fn coerce(&self, name: &str, raw: &str) -> ParamValue {
        match self.get(name).map(|spec| &spec.param_type) {
            Some(ParamType::Integer { .. }) => raw
                .trim()
                .parse::<i64>()
                .map(ParamValue::Integer)
                .unwrap_or_else(|_| ParamValue::Text(raw.to_string())),
            Some(ParamType::Boolean) => match raw.trim() {
                "true" | "yes" | "1" => ParamValue::Boolean(true),
                "false" | "no" | "0" => ParamValue::Boolean(false),
                _ => ParamValue::Text(raw.to_string()),
            },
            Some(ParamType::IdentifierList) if raw.contains(',') => ParamValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => ParamValue::Text(raw.to_string()),
        }
    }
}

/// Checks caller-supplied parameters against an action's schema
#[derive(Debug, Clone)]
pub struct ParameterValidator {
    identifier: Regex,
}

impl ParameterValidator {
    pub fn new() -> Result<Self> {
        let identifier =
            Regex::new(IDENTIFIER_PATTERN).context("Failed to compile identifier pattern")?;
        Ok(Self { identifier })
    }

    pub fn validate(
        &self,
        action_id: &str,
        schema: &ParamSchema,
        parameters: &BTreeMap<String, ParamValue>,
    ) -> std::result::Result<(), ActionError> {
        for spec in schema.specs() {
            if spec.required && !parameters.contains_key(&spec.name) {
                return Err(ActionError::validation(
                    "validation.missing_parameter",
                    format!("Action '{}' requires parameter '{}'", action_id, spec.name),
                ));
            }
        }

        for (name, value) in parameters {
            let spec = schema.get(name).ok_or_else(|| {
                ActionError::validation(
                    "validation.unknown_parameter",
                    format!("Action '{}' does not accept parameter '{}'", action_id, name),
                )
            })?;
            self.check_value(spec, value)?;
        }

        tracing::debug!(action_id, params = parameters.len(), "Parameters validated");
        Ok(())
    }

    fn check_value(&self, spec: &ParamSpec, value: &ParamValue) -> std::result::Result<(), ActionError> {
        match (&spec.param_type, value) {
            (ParamType::Text, ParamValue::Text(text)) => {
                self.check_text(spec, text)?;
                check_allowed(spec, text)
            }
            (ParamType::Identifier, ParamValue::Text(text)) => {
                self.check_identifier(spec, text)?;
                check_allowed(spec, text)
            }
            (ParamType::IdentifierList, ParamValue::Text(text)) => {
                self.check_identifier(spec, text)?;
                check_allowed(spec, text)
            }
            (ParamType::IdentifierList, ParamValue::List(items)) => {
                if items.is_empty() {
                    return Err(invalid_value(spec, "must contain at least one entry"));
                }
                for item in items {
                    self.check_identifier(spec, item)?;
                    check_allowed(spec, item)?;
                }
                Ok(())
            }
            (ParamType::Integer { min, max }, ParamValue::Integer(number)) => {
                if number < min || number > max {
                    return Err(invalid_value(
                        spec,
                        &format!("must be between {} and {}", min, max),
                    ));
                }
                check_allowed(spec, &number.to_string())
            }
            (ParamType::Boolean, ParamValue::Boolean(_)) => Ok(()),
            (ParamType::Path(rule), ParamValue::Text(text)) => check_path(spec, rule, text),
            (expected, actual) => Err(ActionError::validation(
                "validation.type_mismatch",
                format!(
                    "Parameter '{}' must be a {}, got {}",
                    spec.name,
                    expected.name(),
                    actual.type_name()
                ),
            )),
        }
    }

    fn check_text(&self, spec: &ParamSpec, text: &str) -> std::result::Result<(), ActionError> {
        check_option_injection(spec, text)?;
        if text.len() > MAX_TEXT_LEN {
            return Err(invalid_value(spec, "is too long"));
        }
        if text.chars().any(char::is_control) {
            return Err(invalid_value(spec, "must not contain control characters"));
        }
        Ok(())
    }

    fn check_identifier(&self, spec: &ParamSpec, text: &str) -> std::result::Result<(), ActionError> {
        check_option_injection(spec, text)?;
        if text.is_empty() || text.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid_value(
                spec,
                &format!("must be 1 to {} characters", MAX_IDENTIFIER_LEN),
            ));
        }
        if !self.identifier.is_match(text) {
            return Err(invalid_value(
                spec,
                "may only contain letters, digits and . _ + @ : = / -",
            ));
        }
        Ok(())
    }
}

fn invalid_value(spec: &ParamSpec, reason: &str) -> ActionError {
    ActionError::validation(
        "validation.invalid_value",
        format!("Parameter '{}' {}", spec.name, reason),
    )
}

fn check_option_injection(spec: &ParamSpec, text: &str) -> std::result::Result<(), ActionError> {
    if !spec.embedded && text.starts_with('-') {
        return Err(ActionError::validation(
            "validation.option_injection",
            format!("Parameter '{}' must not start with '-'", spec.name),
        ));
    }
    Ok(())
}

fn check_allowed(spec: &ParamSpec, text: &str) -> std::result::Result<(), ActionError> {
    match &spec.allowed_values {
        Some(allowed) if !allowed.iter().any(|candidate| candidate == text) => {
            Err(ActionError::validation(
                "validation.not_allowed",
                format!(
                    "Parameter '{}' must be one of: {}",
                    spec.name,
                    allowed.join(", ")
                ),
            ))
        }
        _ => Ok(()),
    }
}

fn check_path(spec: &ParamSpec, rule: &PathRule, text: &str) -> std::result::Result<(), ActionError> {
    let traversal = || {
        ActionError::validation(
            "validation.path_traversal",
            format!(
                "Parameter '{}' must be a relative path inside {}",
                spec.name,
                rule.base_dir.display()
            ),
        )
    };

    check_option_injection(spec, text)?;
    if text.is_empty() || text.contains('\0') {
        return Err(invalid_value(spec, "must be a non-empty path"));
    }

    let path = Path::new(text);
    if rule.require_relative && path.is_absolute() {
        return Err(traversal());
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(traversal());
    }

    let base = normalize(&rule.base_dir);
    if !rule.resolve(text).starts_with(&base) {
        return Err(traversal());
    }
    Ok(())
}

/// Lexical normalisation; the target does not need to exist
fn normalize(path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedpanel_core::ErrorKind;

    fn params(pairs: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn code_of(result: std::result::Result<(), ActionError>) -> String {
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.recoverable);
        err.code
    }

    fn service_schema() -> ParamSchema {
        ParamSchema::new().with(ParamSpec::required("unit", ParamType::Identifier))
    }

    #[test]
    fn test_accepts_valid_identifier() {
        let validator = ParameterValidator::new().unwrap();
        let result = validator.validate(
            "service.restart",
            &service_schema(),
            &params(&[("unit", "sshd.service".into())]),
        );
        assert!(result.is_ok());

        let templated = params(&[("unit", "getty@tty1.service".into())]);
        assert!(validator
            .validate("service.restart", &service_schema(), &templated)
            .is_ok());
    }

    #[test]
    fn test_missing_and_unknown_parameters() {
        let validator = ParameterValidator::new().unwrap();
        let schema = service_schema();

        let missing = validator.validate("service.restart", &schema, &BTreeMap::new());
        assert_eq!(code_of(missing), "validation.missing_parameter");

        let unknown = validator.validate(
            "service.restart",
            &schema,
            &params(&[("unit", "sshd".into()), ("force", true.into())]),
        );
        assert_eq!(code_of(unknown), "validation.unknown_parameter");
    }

    #[test]
    fn test_type_mismatch() {
        let validator = ParameterValidator::new().unwrap();
        let result = validator.validate(
            "service.restart",
            &service_schema(),
            &params(&[("unit", 22i64.into())]),
        );
        assert_eq!(code_of(result), "validation.type_mismatch");
    }

    #[test]
    fn test_rejects_option_injection_and_shell_metacharacters() {
        let validator = ParameterValidator::new().unwrap();
        let schema = service_schema();

        let dash = validator.validate("service.stop", &schema, &params(&[("unit", "--all".into())]));
        assert_eq!(code_of(dash), "validation.option_injection");

        for hostile in ["sshd; rm -rf /", "a b", "$(reboot)", "x|y", "`id`"] {
            let result = validator.validate("service.stop", &schema, &params(&[("unit", hostile.into())]));
            assert_eq!(code_of(result), "validation.invalid_value", "{}", hostile);
        }
    }

    #[test]
    fn test_embedded_values_may_start_with_dash() {
        let validator = ParameterValidator::new().unwrap();
        let schema = ParamSchema::new()
            .with(ParamSpec::required("key", ParamType::Identifier))
            .with(ParamSpec::required("value", ParamType::Text).embedded());

        let negative = params(&[
            ("key", "kernel.perf_event_paranoid".into()),
            ("value", "-1".into()),
        ]);
        assert!(validator.validate("kernel.set_sysctl", &schema, &negative).is_ok());

        // Still plain text otherwise
        let control = params(&[("key", "vm.swappiness".into()), ("value", "-1\n".into())]);
        assert_eq!(
            code_of(validator.validate("kernel.set_sysctl", &schema, &control)),
            "validation.invalid_value"
        );
        let dashed_key = params(&[("key", "-a".into()), ("value", "1".into())]);
        assert_eq!(
            code_of(validator.validate("kernel.set_sysctl", &schema, &dashed_key)),
            "validation.option_injection"
        );
    }

    #[test]
    fn test_identifier_list_accepts_single_value_and_rejects_empty() {
        let validator = ParameterValidator::new().unwrap();
        let schema = ParamSchema::new().with(ParamSpec::required("packages", ParamType::IdentifierList));

        let single = params(&[("packages", "htop".into())]);
        assert!(validator.validate("package.install", &schema, &single).is_ok());

        let many = params(&[("packages", ParamValue::List(vec!["htop".into(), "gcc-c++".into()]))]);
        assert!(validator.validate("package.install", &schema, &many).is_ok());

        let empty = params(&[("packages", ParamValue::List(vec![]))]);
        assert_eq!(
            code_of(validator.validate("package.install", &schema, &empty)),
            "validation.invalid_value"
        );

        let injected = params(&[("packages", ParamValue::List(vec!["htop".into(), "-y".into()]))]);
        assert_eq!(
            code_of(validator.validate("package.install", &schema, &injected)),
            "validation.option_injection"
        );
    }

    #[test]
    fn test_allowed_values_and_integer_range() {
        let validator = ParameterValidator::new().unwrap();
        let schema = ParamSchema::new()
            .with(ParamSpec::required("port", ParamType::Integer { min: 1, max: 65535 }))
            .with(ParamSpec::required("protocol", ParamType::Identifier).allowed(&["tcp", "udp"]));

        let ok = params(&[("port", 8080i64.into()), ("protocol", "tcp".into())]);
        assert!(validator.validate("firewall.add_port", &schema, &ok).is_ok());

        let bad_proto = params(&[("port", 8080i64.into()), ("protocol", "icmp".into())]);
        assert_eq!(
            code_of(validator.validate("firewall.add_port", &schema, &bad_proto)),
            "validation.not_allowed"
        );

        let bad_port = params(&[("port", 70000i64.into()), ("protocol", "udp".into())]);
        assert_eq!(
            code_of(validator.validate("firewall.add_port", &schema, &bad_port)),
            "validation.invalid_value"
        );
    }

    #[test]
    fn test_path_traversal_is_rejected() {
        let validator = ParameterValidator::new().unwrap();
        let base = PathBuf::from("/home/tester/.config/fedpanel");
        let schema = ParamSchema::new().with(ParamSpec::required(
            "key_file",
            ParamType::Path(PathRule::relative_to(&base)),
        ));

        for hostile in ["../../etc/shadow", "/etc/shadow", "keys/../../../etc/passwd"] {
            let result = validator.validate(
                "security.import_key",
                &schema,
                &params(&[("key_file", hostile.into())]),
            );
            assert_eq!(code_of(result), "validation.path_traversal", "{}", hostile);
        }

        let fine = params(&[("key_file", "keys/./RPM-GPG-KEY-custom".into())]);
        assert!(validator.validate("security.import_key", &schema, &fine).is_ok());
        assert_eq!(
            PathRule::relative_to(&base).resolve("keys/./RPM-GPG-KEY-custom"),
            base.join("keys/RPM-GPG-KEY-custom")
        );
    }

    #[test]
    fn test_hint_never_contains_secret_value() {
        let validator = ParameterValidator::new().unwrap();
        let schema = ParamSchema::new().with(ParamSpec::required("password", ParamType::Text).secret());
        let err = validator
            .validate(
                "network.wifi_connect",
                &schema,
                &params(&[("password", "s3cr3t\u{7}".into())]),
            )
            .unwrap_err();
        assert!(!err.hint.contains("s3cr3t"));
        assert!(schema.is_secret("password"));
    }

    #[test]
    fn test_coerce_follows_schema_types() {
        let schema = ParamSchema::new()
            .with(ParamSpec::required("port", ParamType::Integer { min: 1, max: 65535 }))
            .with(ParamSpec::required("packages", ParamType::IdentifierList))
            .with(ParamSpec::optional("refresh", ParamType::Boolean));

        assert_eq!(schema.coerce("port", "443"), ParamValue::Integer(443));
        assert_eq!(schema.coerce("refresh", "yes"), ParamValue::Boolean(true));
        assert_eq!(
            schema.coerce("packages", "htop, btop"),
            ParamValue::List(vec!["htop".into(), "btop".into()])
        );
        assert_eq!(schema.coerce("other", "x"), ParamValue::Text("x".into()));
    }
}
