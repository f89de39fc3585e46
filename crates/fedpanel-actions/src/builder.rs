//! Pure translation from an operation request to a command descriptor.
//!
//! Every category has one construction branch per package backend. Nothing
//! here spawns a process.

use crate::catalog::{ActionCatalog, ActionSpec};
use crate::mode::{PackageBackend, SystemMode};
use fedpanel_core::{
    ActionError, CapabilityCategory, CommandDescriptor, OperationRequest, ParamValue,
};
use fedpanel_security::{ensure_no_shell, EscalationBroker, ParamType};
use std::sync::Arc;
use tracing::debug;

const DNF: &str = "/usr/bin/dnf";
const RPM_OSTREE: &str = "/usr/bin/rpm-ostree";
const RPM: &str = "/usr/bin/rpm";
const SYSTEMCTL: &str = "/usr/bin/systemctl";
const NMCLI: &str = "/usr/bin/nmcli";
const HOSTNAMECTL: &str = "/usr/bin/hostnamectl";
const FIREWALL_CMD: &str = "/usr/bin/firewall-cmd";
const SNAPPER: &str = "/usr/bin/snapper";
const OSTREE: &str = "/usr/bin/ostree";
const DF: &str = "/usr/bin/df";
const FSTRIM: &str = "/usr/sbin/fstrim";
const SYSCTL: &str = "/usr/sbin/sysctl";
const GRUBBY: &str = "/usr/sbin/grubby";
const SETENFORCE: &str = "/usr/sbin/setenforce";

/// Binary plus argument vector, before escalation
#[derive(Debug)]
struct Invocation {
    binary: &'static str,
    arguments: Vec<String>,
    secret: Vec<usize>,
}

impl Invocation {
    fn new(binary: &'static str, fixed: &[&str]) -> Self {
        Self {
            binary,
            arguments: fixed.iter().map(|a| a.to_string()).collect(),
            secret: Vec::new(),
        }
    }

    fn arg(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    fn args(mut self, arguments: impl IntoIterator<Item = String>) -> Self {
        self.arguments.extend(arguments);
        self
    }

    fn secret_arg(mut self, argument: impl Into<String>) -> Self {
        self.secret.push(self.arguments.len());
        self.arguments.push(argument.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    catalog: Arc<ActionCatalog>,
    broker: EscalationBroker,
    default_timeout_seconds: u64,
}

impl CommandBuilder {
    pub fn new(
        catalog: Arc<ActionCatalog>,
        broker: EscalationBroker,
        default_timeout_seconds: u64,
    ) -> Self {
        Self {
            catalog,
            broker,
            default_timeout_seconds,
        }
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn broker(&self) -> &EscalationBroker {
        &self.broker
    }

    pub fn build(
        &self,
        request: &OperationRequest,
        mode: &SystemMode,
    ) -> Result<CommandDescriptor, ActionError> {
        let spec = self.catalog.lookup(request)?;
        let invocation = invocation(spec, request, mode.package_backend)?;

        let mut descriptor = CommandDescriptor::new(
            spec.id.clone(),
            spec.category,
            invocation.binary,
            invocation.arguments,
        )
        .with_description(describe(spec, request))
        .with_timeout(spec.timeout_seconds.unwrap_or(self.default_timeout_seconds))
        .with_mutating(spec.mutating);
        for index in invocation.secret {
            descriptor = descriptor.with_secret_argument(index);
        }

        ensure_no_shell(&descriptor)?;
        let descriptor = if spec.privileged {
            self.broker.wrap(descriptor)?
        } else {
            descriptor
        };

        debug!(
            action_id = request.action_id(),
            backend = %mode.package_backend,
            command = %descriptor.display_command(),
            "Built command"
        );
        Ok(descriptor)
    }

    /// The inverse command for `request`, if its action declares one on this backend
    pub fn build_undo(
        &self,
        request: &OperationRequest,
        mode: &SystemMode,
    ) -> Result<Option<CommandDescriptor>, ActionError> {
        let spec = self.catalog.lookup(request)?;
        match spec.undo_for(mode.package_backend) {
            Some(template) => {
                let inverse = template.instantiate(request)?;
                self.build(&inverse, mode).map(Some)
            }
            None => Ok(None),
        }
    }
}

fn not_supported(request: &OperationRequest, backend: PackageBackend) -> ActionError {
    ActionError::not_supported(
        "builder.unsupported_on_backend",
        format!(
            "'{}' is not available on {} systems",
            request.action_id(),
            backend
        ),
    )
}

fn unknown(request: &OperationRequest) -> ActionError {
    ActionError::not_supported(
        "builder.unknown_action",
        format!("'{}' is not a supported action", request.action_id()),
    )
}

fn missing(name: &str) -> ActionError {
    ActionError::validation(
        "validation.missing_parameter",
        format!("Parameter '{}' is required", name),
    )
}

fn text(request: &OperationRequest, name: &str) -> Result<String, ActionError> {
    match request.parameter(name) {
        Some(ParamValue::Text(value)) => Ok(value.clone()),
        Some(ParamValue::Integer(value)) => Ok(value.to_string()),
        Some(other) => Err(ActionError::validation(
            "validation.type_mismatch",
            format!("Parameter '{}' cannot be a {}", name, other.type_name()),
        )),
        None => Err(missing(name)),
    }
}

fn list(request: &OperationRequest, name: &str) -> Result<Vec<String>, ActionError> {
    request
        .parameter(name)
        .map(ParamValue::to_arguments)
        .ok_or_else(|| missing(name))
}

/// Short action name after the category prefix
fn verb(spec: &ActionSpec) -> &str {
    spec.id.split_once('.').map(|(_, verb)| verb).unwrap_or("")
}

fn describe(spec: &ActionSpec, request: &OperationRequest) -> String {
    let visible: Vec<String> = request
        .parameters()
        .iter()
        .filter(|(name, _)| !spec.schema.is_secret(name))
        .map(|(_, value)| value.to_string())
        .collect();
    if visible.is_empty() {
        spec.summary.clone()
    } else {
        format!("{}: {}", spec.summary, visible.join(" "))
    }
}

fn invocation(
    spec: &ActionSpec,
    request: &OperationRequest,
    backend: PackageBackend,
) -> Result<Invocation, ActionError> {
    match spec.category {
        CapabilityCategory::Package => package(spec, request, backend),
        CapabilityCategory::Service => service(spec, request, backend),
        CapabilityCategory::Network => network(spec, request, backend),
        CapabilityCategory::Firewall => firewall(spec, request, backend),
        CapabilityCategory::Storage => storage(spec, request, backend),
        CapabilityCategory::Kernel => kernel(spec, request, backend),
        CapabilityCategory::Security => security(spec, request, backend),
    }
}

fn package(
    spec: &ActionSpec,
    request: &OperationRequest,
    backend: PackageBackend,
) -> Result<Invocation, ActionError> {
    use PackageBackend::*;
    let invocation = match (verb(spec), backend) {
        ("install", Transactional) => {
            Invocation::new(DNF, &["install", "-y"]).args(list(request, "packages")?)
        }
        ("install", Atomic) => Invocation::new(RPM_OSTREE, &["install", "--idempotent"])
            .args(list(request, "packages")?),
        ("remove", Transactional) => {
            Invocation::new(DNF, &["remove", "-y"]).args(list(request, "packages")?)
        }
        ("remove", Atomic) => {
            Invocation::new(RPM_OSTREE, &["uninstall"]).args(list(request, "packages")?)
        }
        ("update", Transactional) => Invocation::new(DNF, &["upgrade", "-y", "--refresh"]),
        ("update", Atomic) => Invocation::new(RPM_OSTREE, &["upgrade"]),
        ("rollback", Transactional) => Invocation::new(DNF, &["history", "undo", "last", "-y"]),
        ("rollback", Atomic) => Invocation::new(RPM_OSTREE, &["rollback"]),
        ("search", Transactional) => Invocation::new(DNF, &["search"]).arg(text(request, "query")?),
        ("search", Atomic) => {
            Invocation::new(RPM_OSTREE, &["search"]).arg(text(request, "query")?)
        }
        ("list_installed", Transactional | Atomic) => Invocation::new(RPM, &["-qa"]),
        _ => return Err(unknown(request)),
    };
    Ok(invocation)
}

fn service(
    spec: &ActionSpec,
    request: &OperationRequest,
    backend: PackageBackend,
) -> Result<Invocation, ActionError> {
    use PackageBackend::*;
    // systemd behaves the same on both backends
    let invocation = match (verb(spec), backend) {
        (action @ ("start" | "stop" | "restart" | "enable" | "disable"), Transactional | Atomic) => {
            Invocation::new(SYSTEMCTL, &[action]).arg(text(request, "unit")?)
        }
        ("status", Transactional | Atomic) => {
            Invocation::new(SYSTEMCTL, &["status", "--no-pager"]).arg(text(request, "unit")?)
        }
        _ => return Err(unknown(request)),
    };
    Ok(invocation)
}

fn network(
    spec: &ActionSpec,
    request: &OperationRequest,
    backend: PackageBackend,
) -> Result<Invocation, ActionError> {
    use PackageBackend::*;
    let invocation = match (verb(spec), backend) {
        ("connection_up", Transactional | Atomic) => {
            Invocation::new(NMCLI, &["connection", "up"]).arg(text(request, "connection")?)
        }
        ("connection_down", Transactional | Atomic) => {
            Invocation::new(NMCLI, &["connection", "down"]).arg(text(request, "connection")?)
        }
        ("wifi_connect", Transactional | Atomic) => {
            Invocation::new(NMCLI, &["device", "wifi", "connect"])
                .arg(text(request, "ssid")?)
                .arg("password")
                .secret_arg(text(request, "password")?)
        }
        ("set_hostname", Transactional | Atomic) => {
            Invocation::new(HOSTNAMECTL, &["set-hostname"]).arg(text(request, "hostname")?)
        }
        ("status", Transactional | Atomic) => Invocation::new(NMCLI, &["general", "status"]),
        _ => return Err(unknown(request)),
    };
    Ok(invocation)
}

fn firewall(
    spec: &ActionSpec,
    request: &OperationRequest,
    backend: PackageBackend,
) -> Result<Invocation, ActionError> {
    use PackageBackend::*;
    let permanent = || {
        let invocation = Invocation::new(FIREWALL_CMD, &["--permanent"]);
        match request.parameter("zone").and_then(ParamValue::as_text) {
            Some(zone) => invocation.arg(format!("--zone={}", zone)),
            None => invocation,
        }
    };
    let port = || -> Result<String, ActionError> {
        Ok(format!("{}/{}", text(request, "port")?, text(request, "protocol")?))
    };

    let invocation = match (verb(spec), backend) {
        ("add_service", Transactional | Atomic) => {
            permanent().arg(format!("--add-service={}", text(request, "service")?))
        }
        ("remove_service", Transactional | Atomic) => {
            permanent().arg(format!("--remove-service={}", text(request, "service")?))
        }
        ("add_port", Transactional | Atomic) => permanent().arg(format!("--add-port={}", port()?)),
        ("remove_port", Transactional | Atomic) => {
            permanent().arg(format!("--remove-port={}", port()?))
        }
        ("reload", Transactional | Atomic) => Invocation::new(FIREWALL_CMD, &["--reload"]),
        ("list", Transactional | Atomic) => Invocation::new(FIREWALL_CMD, &["--list-all"]),
        _ => return Err(unknown(request)),
    };
    Ok(invocation)
}

fn storage(
    spec: &ActionSpec,
    request: &OperationRequest,
    backend: PackageBackend,
) -> Result<Invocation, ActionError> {
    use PackageBackend::*;
    let invocation = match (verb(spec), backend) {
        ("snapshot_create", Transactional) => {
            Invocation::new(SNAPPER, &["-c", "root", "create", "--description"])
                .arg(text(request, "description")?)
        }
        // Pins the booted deployment so it survives the next update
        ("snapshot_create", Atomic) => Invocation::new(OSTREE, &["admin", "pin", "0"]),
        ("snapshot_unpin", Transactional) => return Err(not_supported(request, backend)),
        ("snapshot_unpin", Atomic) => Invocation::new(OSTREE, &["admin", "pin", "--unpin", "0"]),
        ("trim", Transactional | Atomic) => Invocation::new(FSTRIM, &["-av"]),
        ("cleanup", Transactional) => Invocation::new(DNF, &["clean", "all"]),
        ("cleanup", Atomic) => Invocation::new(RPM_OSTREE, &["cleanup", "-m"]),
        ("usage", Transactional | Atomic) => {
            let invocation = Invocation::new(DF, &["-h"]);
            match (request.parameter("path"), spec.schema.get("path")) {
                (Some(_), Some(param)) => {
                    let ParamType::Path(rule) = &param.param_type else {
                        return Err(unknown(request));
                    };
                    let resolved = rule.resolve(&text(request, "path")?);
                    invocation.arg(resolved.to_string_lossy().into_owned())
                }
                _ => invocation,
            }
        }
        _ => return Err(unknown(request)),
    };
    Ok(invocation)
}

fn kernel(
    spec: &ActionSpec,
    request: &OperationRequest,
    backend: PackageBackend,
) -> Result<Invocation, ActionError> {
    use PackageBackend::*;
    let invocation = match (verb(spec), backend) {
        ("set_sysctl", Transactional | Atomic) => Invocation::new(SYSCTL, &["-w"]).arg(format!(
            "{}={}",
            text(request, "key")?,
            text(request, "value")?
        )),
        ("add_karg", Transactional) => Invocation::new(GRUBBY, &["--update-kernel=ALL"])
            .arg(format!("--args={}", text(request, "arg")?)),
        ("add_karg", Atomic) => Invocation::new(RPM_OSTREE, &["kargs"])
            .arg(format!("--append={}", text(request, "arg")?)),
        ("remove_karg", Transactional) => Invocation::new(GRUBBY, &["--update-kernel=ALL"])
            .arg(format!("--remove-args={}", text(request, "arg")?)),
        ("remove_karg", Atomic) => Invocation::new(RPM_OSTREE, &["kargs"])
            .arg(format!("--delete={}", text(request, "arg")?)),
        ("list_kargs", Transactional) => Invocation::new(GRUBBY, &["--info=DEFAULT"]),
        ("list_kargs", Atomic) => Invocation::new(RPM_OSTREE, &["kargs"]),
        _ => return Err(unknown(request)),
    };
    Ok(invocation)
}

fn security(
    spec: &ActionSpec,
    request: &OperationRequest,
    backend: PackageBackend,
) -> Result<Invocation, ActionError> {
    use PackageBackend::*;
    let invocation = match (verb(spec), backend) {
        ("selinux_mode", Transactional | Atomic) => {
            let flag = match text(request, "mode")?.as_str() {
                "enforcing" => "1",
                "permissive" => "0",
                _ => {
                    return Err(ActionError::validation(
                        "validation.not_allowed",
                        "SELinux mode must be 'enforcing' or 'permissive'",
                    ))
                }
            };
            Invocation::new(SETENFORCE, &[flag])
        }
        ("import_key", Transactional | Atomic) => {
            let rule = match spec.schema.get("key_file").map(|p| &p.param_type) {
                Some(ParamType::Path(rule)) => rule,
                _ => return Err(unknown(request)),
            };
            let key = rule.resolve(&text(request, "key_file")?);
            Invocation::new(RPM, &["--import"]).arg(key.to_string_lossy().into_owned())
        }
        _ => return Err(unknown(request)),
    };
    Ok(invocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedpanel_core::ErrorKind;
    use fedpanel_security::ParamSpec;
    use proptest::prelude::*;

    const BROKER: &str = "/usr/bin/pkexec";
    const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "fish", "ksh", "csh", "tcsh"];

    fn builder() -> CommandBuilder {
        CommandBuilder::new(
            Arc::new(ActionCatalog::fedora("/home/tester/.config/fedpanel")),
            EscalationBroker::new(BROKER).unwrap(),
            300,
        )
    }

    fn modes() -> [SystemMode; 2] {
        [SystemMode::transactional(), SystemMode::atomic()]
    }

    /// A request for `spec` whose parameters satisfy its schema
    fn sample_request(spec: &ActionSpec, ident: &str, text: &str, number: i64) -> OperationRequest {
        let mut request = OperationRequest::new(spec.category, spec.id.clone());
        for param in spec.schema.specs() {
            let value = sample_value(param, ident, text, number);
            request = request.param(param.name.clone(), value);
        }
        request
    }

    fn sample_value(param: &ParamSpec, ident: &str, text: &str, number: i64) -> ParamValue {
        if let Some(allowed) = &param.allowed_values {
            return ParamValue::Text(allowed[number.unsigned_abs() as usize % allowed.len()].clone());
        }
        match &param.param_type {
            ParamType::Text => ParamValue::Text(text.to_string()),
            ParamType::Identifier => ParamValue::Text(ident.to_string()),
            ParamType::IdentifierList => ParamValue::List(vec![ident.to_string(), format!("{}-devel", ident)]),
            ParamType::Integer { min, max } => ParamValue::Integer(number.clamp(*min, *max)),
            ParamType::Boolean => ParamValue::Boolean(number % 2 == 0),
            ParamType::Path(_) => ParamValue::Text(format!("keys/{}", ident)),
        }
    }

    fn basename(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    #[test]
    fn test_service_restart_is_escalated() {
        let request = OperationRequest::new(CapabilityCategory::Service, "service.restart")
            .param("unit", "sshd");
        let descriptor = builder().build(&request, &SystemMode::transactional()).unwrap();

        assert_eq!(descriptor.binary(), BROKER);
        assert_eq!(descriptor.arguments(), &[SYSTEMCTL, "restart", "sshd"]);
        assert!(descriptor.requires_escalation());
        assert!(descriptor.is_mutating());
        assert_eq!(descriptor.timeout_seconds(), 90);
        assert_eq!(descriptor.description(), "Restart a service: sshd");
    }

    #[test]
    fn test_query_is_not_escalated_and_uses_default_timeout() {
        let request = OperationRequest::new(CapabilityCategory::Network, "network.status");
        let descriptor = builder().build(&request, &SystemMode::atomic()).unwrap();
        assert_eq!(descriptor.binary(), NMCLI);
        assert!(!descriptor.requires_escalation());
        assert!(!descriptor.is_mutating());
        assert_eq!(descriptor.timeout_seconds(), 300);
    }

    #[test]
    fn test_package_branches_select_backend_binary() {
        let builder = builder();
        for spec in builder.catalog().by_category(CapabilityCategory::Package) {
            let request = sample_request(spec, "htop", "editor", 1);
            let transactional = builder.build(&request, &SystemMode::transactional()).unwrap();
            let atomic = builder.build(&request, &SystemMode::atomic()).unwrap();

            if spec.id == "package.list_installed" {
                assert_eq!(transactional.target_binary(), RPM);
                assert_eq!(atomic.target_binary(), RPM);
            } else {
                assert_eq!(transactional.target_binary(), DNF, "{}", spec.id);
                assert_eq!(atomic.target_binary(), RPM_OSTREE, "{}", spec.id);
            }
        }
    }

    #[test]
    fn test_install_arguments_per_backend() {
        let request = OperationRequest::new(CapabilityCategory::Package, "package.install")
            .param("packages", &["htop", "btop"][..]);
        let builder = builder();

        let dnf = builder.build(&request, &SystemMode::transactional()).unwrap();
        assert_eq!(dnf.arguments(), &[DNF, "install", "-y", "htop", "btop"]);

        let ostree = builder.build(&request, &SystemMode::atomic()).unwrap();
        assert_eq!(
            ostree.arguments(),
            &[RPM_OSTREE, "install", "--idempotent", "htop", "btop"]
        );
    }

    #[test]
    fn test_kernel_args_branch_on_backend() {
        let request = OperationRequest::new(CapabilityCategory::Kernel, "kernel.add_karg")
            .param("arg", "mitigations=off");
        let builder = builder();

        let grubby = builder.build(&request, &SystemMode::transactional()).unwrap();
        assert_eq!(
            grubby.arguments(),
            &[GRUBBY, "--update-kernel=ALL", "--args=mitigations=off"]
        );
        let kargs = builder.build(&request, &SystemMode::atomic()).unwrap();
        assert_eq!(kargs.arguments(), &[RPM_OSTREE, "kargs", "--append=mitigations=off"]);
    }

    #[test]
    fn test_firewall_zone_is_optional() {
        let builder = builder();
        let without = OperationRequest::new(CapabilityCategory::Firewall, "firewall.add_port")
            .param("port", 8443i64)
            .param("protocol", "tcp");
        let descriptor = builder.build(&without, &SystemMode::transactional()).unwrap();
        assert_eq!(
            descriptor.arguments(),
            &[FIREWALL_CMD, "--permanent", "--add-port=8443/tcp"]
        );

        let with = OperationRequest::new(CapabilityCategory::Firewall, "firewall.add_service")
            .param("service", "ssh")
            .param("zone", "public");
        let descriptor = builder.build(&with, &SystemMode::transactional()).unwrap();
        assert_eq!(
            descriptor.arguments(),
            &[FIREWALL_CMD, "--permanent", "--zone=public", "--add-service=ssh"]
        );
    }

    #[test]
    fn test_wifi_password_is_secret_and_not_described() {
        let request = OperationRequest::new(CapabilityCategory::Network, "network.wifi_connect")
            .param("ssid", "HomeNet")
            .param("password", "s3cr3t");
        let descriptor = builder().build(&request, &SystemMode::transactional()).unwrap();

        assert!(!descriptor.requires_escalation());
        assert_eq!(descriptor.arguments().last().unwrap(), "s3cr3t");
        assert!(descriptor.is_secret_argument(descriptor.arguments().len() - 1));
        assert!(!descriptor.display_command().contains("s3cr3t"));
        assert!(!descriptor.description().contains("s3cr3t"));
    }

    #[test]
    fn test_key_import_resolves_under_config_dir() {
        let request = OperationRequest::new(CapabilityCategory::Security, "security.import_key")
            .param("key_file", "keys/RPM-GPG-KEY-custom");
        let descriptor = builder().build(&request, &SystemMode::transactional()).unwrap();
        assert_eq!(
            descriptor.arguments(),
            &[RPM, "--import", "/home/tester/.config/fedpanel/keys/RPM-GPG-KEY-custom"]
        );
    }

    #[test]
    fn test_unknown_and_unsupported_actions() {
        let builder = builder();
        let unknown = OperationRequest::new(CapabilityCategory::Service, "service.explode");
        let err = builder.build(&unknown, &SystemMode::transactional()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotSupported);

        let mismatched = OperationRequest::new(CapabilityCategory::Firewall, "service.restart")
            .param("unit", "sshd");
        assert_eq!(
            builder.build(&mismatched, &SystemMode::transactional()).unwrap_err().kind,
            ErrorKind::NotSupported
        );

        let unpin = OperationRequest::new(CapabilityCategory::Storage, "storage.snapshot_unpin");
        let err = builder.build(&unpin, &SystemMode::transactional()).unwrap_err();
        assert_eq!(err.code, "builder.unsupported_on_backend");
        assert!(builder.build(&unpin, &SystemMode::atomic()).is_ok());
    }

    #[test]
    fn test_build_undo_for_service_start() {
        let builder = builder();
        let start = OperationRequest::new(CapabilityCategory::Service, "service.start")
            .param("unit", "sshd");
        let undo = builder
            .build_undo(&start, &SystemMode::transactional())
            .unwrap()
            .unwrap();
        assert_eq!(undo.action_id(), "service.stop");
        assert_eq!(undo.arguments(), &[SYSTEMCTL, "stop", "sshd"]);

        let sysctl = OperationRequest::new(CapabilityCategory::Kernel, "kernel.set_sysctl")
            .param("key", "vm.swappiness")
            .param("value", "10");
        assert!(builder
            .build_undo(&sysctl, &SystemMode::transactional())
            .unwrap()
            .is_none());
    }

    proptest! {
        #[test]
        fn prop_descriptors_never_invoke_a_shell(
            index in 0usize..64,
            atomic in any::<bool>(),
            ident in "[a-z][a-z0-9._-]{0,12}",
            text in "[A-Za-z0-9][A-Za-z0-9 _.]{0,20}",
            number in 1i64..70000,
        ) {
            let builder = builder();
            let specs: Vec<&ActionSpec> = builder.catalog().actions().collect();
            let spec = specs[index % specs.len()];
            let mode = if atomic { SystemMode::atomic() } else { SystemMode::transactional() };
            let request = sample_request(spec, &ident, &text, number);

            match builder.build(&request, &mode) {
                Ok(descriptor) => {
                    let target = descriptor.target_binary();
                    prop_assert!(target.starts_with('/'));
                    prop_assert!(!SHELLS.contains(&basename(target)));
                    prop_assert!(!SHELLS.contains(&basename(descriptor.binary())));
                    prop_assert!(descriptor.arguments().iter().all(|a| a != "-c"));
                    prop_assert!(descriptor.timeout_seconds() > 0);
                }
                Err(err) => prop_assert_eq!(err.kind, ErrorKind::NotSupported),
            }
        }

        #[test]
        fn prop_privileged_actions_go_through_the_broker(
            index in 0usize..64,
            atomic in any::<bool>(),
            ident in "[a-z][a-z0-9.-]{0,12}",
        ) {
            let builder = builder();
            let specs: Vec<&ActionSpec> = builder.catalog().actions().collect();
            let spec = specs[index % specs.len()];
            let mode = if atomic { SystemMode::atomic() } else { SystemMode::transactional() };
            let request = sample_request(spec, &ident, "note", 22);

            if let Ok(descriptor) = builder.build(&request, &mode) {
                prop_assert_eq!(descriptor.requires_escalation(), spec.privileged);
                if spec.privileged {
                    prop_assert_eq!(descriptor.binary(), BROKER);
                    prop_assert!(descriptor.arguments()[0].starts_with('/'));
                    prop_assert_ne!(descriptor.arguments()[0].as_str(), BROKER);
                } else {
                    prop_assert_ne!(descriptor.binary(), BROKER);
                }
            }
        }
    }

    #[test]
    fn test_every_action_builds_on_both_backends() {
        let builder = builder();
        for spec in builder.catalog().actions() {
            for mode in modes() {
                let request = sample_request(spec, "sshd", "note", 22);
                match builder.build(&request, &mode) {
                    Ok(descriptor) => assert_eq!(descriptor.action_id(), spec.id),
                    Err(err) => {
                        assert_eq!(spec.id, "storage.snapshot_unpin");
                        assert!(!mode.is_atomic);
                        assert_eq!(err.kind, ErrorKind::NotSupported);
                    }
                }
            }
        }
    }
}
