//! Static declarations of every supported action: schema, risk, privilege,
//! timeout and undo template.

use crate::mode::PackageBackend;
use fedpanel_core::{ActionError, CapabilityCategory, OperationRequest};
use fedpanel_security::{ParamSchema, ParamSpec, ParamType, PathRule, RiskLevel};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How to derive the inverse request from an original one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoTemplate {
    pub action_id: String,
    /// (target parameter, source parameter) pairs; absent sources are skipped
    pub param_map: Vec<(String, String)>,
    /// Restrict the template to one backend
    pub backend: Option<PackageBackend>,
}

impl UndoTemplate {
    pub fn new(action_id: &str, param_map: &[(&str, &str)]) -> Self {
        Self {
            action_id: action_id.to_string(),
            param_map: param_map
                .iter()
                .map(|(to, from)| (to.to_string(), from.to_string()))
                .collect(),
            backend: None,
        }
    }

    /// Same parameters under another action id
    pub fn mirror(action_id: &str, params: &[&str]) -> Self {
        let pairs: Vec<(&str, &str)> = params.iter().map(|p| (*p, *p)).collect();
        Self::new(action_id, &pairs)
    }

    pub fn only_on(mut self, backend: PackageBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn applies_to(&self, backend: PackageBackend) -> bool {
        self.backend.map(|b| b == backend).unwrap_or(true)
    }

    /// The inverse request for `original`
    pub fn instantiate(&self, original: &OperationRequest) -> Result<OperationRequest, ActionError> {
        let category = CapabilityCategory::from_action_id(&self.action_id).ok_or_else(|| {
            ActionError::not_supported(
                "catalog.bad_undo_template",
                format!("Undo action '{}' has no category", self.action_id),
            )
        })?;
        let mut request = OperationRequest::new(category, self.action_id.clone());
        for (to, from) in &self.param_map {
            if let Some(value) = original.parameter(from) {
                request = request.param(to.clone(), value.clone());
            }
        }
        Ok(request)
    }
}

#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub id: String,
    pub category: CapabilityCategory,
    pub summary: String,
    pub schema: ParamSchema,
    pub risk: RiskLevel,
    pub mutating: bool,
    /// Runs through the escalation broker
    pub privileged: bool,
    /// Falls back to the executor default when unset
    pub timeout_seconds: Option<u64>,
    pub undo: Option<UndoTemplate>,
}

impl ActionSpec {
    fn query(id: &str, category: CapabilityCategory, summary: &str) -> Self {
        Self {
            id: id.to_string(),
            category,
            summary: summary.to_string(),
            schema: ParamSchema::new(),
            risk: RiskLevel::Low,
            mutating: false,
            privileged: false,
            timeout_seconds: None,
            undo: None,
        }
    }

    fn change(id: &str, category: CapabilityCategory, summary: &str, risk: RiskLevel) -> Self {
        Self {
            risk,
            mutating: true,
            privileged: true,
            ..Self::query(id, category, summary)
        }
    }

    fn param(mut self, spec: ParamSpec) -> Self {
        self.schema = self.schema.with(spec);
        self
    }

    fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }

    fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    fn undo(mut self, template: UndoTemplate) -> Self {
        self.undo = Some(template);
        self
    }

    pub fn undo_for(&self, backend: PackageBackend) -> Option<&UndoTemplate> {
        self.undo.as_ref().filter(|t| t.applies_to(backend))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    actions: BTreeMap<String, ActionSpec>,
}

impl ActionCatalog {
    pub fn new(actions: impl IntoIterator<Item = ActionSpec>) -> Self {
        Self {
            actions: actions.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn get(&self, action_id: &str) -> Option<&ActionSpec> {
        self.actions.get(action_id)
    }

    /// Resolve the action for a request, rejecting unknown ids and category mismatches
    pub fn lookup(&self, request: &OperationRequest) -> Result<&ActionSpec, ActionError> {
        match self.actions.get(request.action_id()) {
            Some(spec) if spec.category == request.capability_category() => Ok(spec),
            _ => Err(ActionError::not_supported(
                "builder.unknown_action",
                format!(
                    "'{}' is not a supported {} action",
                    request.action_id(),
                    request.capability_category()
                ),
            )),
        }
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionSpec> {
        self.actions.values()
    }

    pub fn by_category(&self, category: CapabilityCategory) -> impl Iterator<Item = &ActionSpec> {
        self.actions.values().filter(move |a| a.category == category)
    }

    /// The Fedora action set. `user_config_dir` confines user-supplied file paths.
    pub fn fedora(user_config_dir: impl Into<PathBuf>) -> Self {
        use CapabilityCategory::*;
        use RiskLevel::*;

        let user_dir = PathRule::relative_to(user_config_dir);
        let root_relative = PathRule::relative_to("/");
        let packages = || ParamSpec::required("packages", ParamType::IdentifierList);
        let unit = || ParamSpec::required("unit", ParamType::Identifier);
        let connection = || ParamSpec::required("connection", ParamType::Text);
        let firewall_service = || ParamSpec::required("service", ParamType::Identifier);
        let zone = || ParamSpec::optional("zone", ParamType::Identifier);
        let port = || ParamSpec::required("port", ParamType::Integer { min: 1, max: 65535 });
        let protocol = || {
            ParamSpec::required("protocol", ParamType::Identifier)
                .allowed(&["tcp", "udp", "sctp", "dccp"])
        };
        let karg = || ParamSpec::required("arg", ParamType::Identifier);

        Self::new([
            // package
            ActionSpec::change("package.install", Package, "Install packages", Medium)
                .param(packages())
                .timeout(1800)
                .undo(UndoTemplate::mirror("package.remove", &["packages"])),
            ActionSpec::change("package.remove", Package, "Remove packages", High)
                .param(packages())
                .timeout(1800)
                .undo(UndoTemplate::mirror("package.install", &["packages"])),
            ActionSpec::change("package.update", Package, "Update the system", Medium)
                .timeout(3600)
                .undo(UndoTemplate::mirror("package.rollback", &[])),
            ActionSpec::change("package.rollback", Package, "Roll back the last package transaction", High)
                .timeout(1800),
            ActionSpec::query("package.search", Package, "Search package repositories")
                .param(ParamSpec::required("query", ParamType::Text))
                .timeout(120),
            ActionSpec::query("package.list_installed", Package, "List installed packages"),
            // service
            ActionSpec::change("service.start", Service, "Start a service", Low)
                .param(unit())
                .timeout(90)
                .undo(UndoTemplate::mirror("service.stop", &["unit"])),
            ActionSpec::change("service.stop", Service, "Stop a service", Medium)
                .param(unit())
                .timeout(90)
                .undo(UndoTemplate::mirror("service.start", &["unit"])),
            ActionSpec::change("service.restart", Service, "Restart a service", Low)
                .param(unit())
                .timeout(90)
                .undo(UndoTemplate::mirror("service.restart", &["unit"])),
            ActionSpec::change("service.enable", Service, "Enable a service at boot", Low)
                .param(unit())
                .timeout(90)
                .undo(UndoTemplate::mirror("service.disable", &["unit"])),
            ActionSpec::change("service.disable", Service, "Disable a service at boot", Medium)
                .param(unit())
                .timeout(90)
                .undo(UndoTemplate::mirror("service.enable", &["unit"])),
            ActionSpec::query("service.status", Service, "Show service status").param(unit()),
            // network
            ActionSpec::change("network.connection_up", Network, "Activate a connection", Low)
                .param(connection())
                .timeout(60)
                .undo(UndoTemplate::mirror("network.connection_down", &["connection"])),
            ActionSpec::change("network.connection_down", Network, "Deactivate a connection", Medium)
                .param(connection())
                .timeout(60)
                .undo(UndoTemplate::mirror("network.connection_up", &["connection"])),
            ActionSpec::change("network.wifi_connect", Network, "Join a Wi-Fi network", Low)
                .param(ParamSpec::required("ssid", ParamType::Text))
                .param(ParamSpec::required("password", ParamType::Text).secret())
                .unprivileged()
                .timeout(90)
                .undo(UndoTemplate::new("network.connection_down", &[("connection", "ssid")])),
            ActionSpec::change("network.set_hostname", Network, "Change the host name", Medium)
                .param(ParamSpec::required("hostname", ParamType::Identifier))
                .timeout(30),
            ActionSpec::query("network.status", Network, "Show NetworkManager status"),
            // firewall
            ActionSpec::change("firewall.add_service", Firewall, "Allow a service through the firewall", Medium)
                .param(firewall_service())
                .param(zone())
                .timeout(60)
                .undo(UndoTemplate::mirror("firewall.remove_service", &["service", "zone"])),
            ActionSpec::change("firewall.remove_service", Firewall, "Block a firewall service", High)
                .param(firewall_service())
                .param(zone())
                .timeout(60)
                .undo(UndoTemplate::mirror("firewall.add_service", &["service", "zone"])),
            ActionSpec::change("firewall.add_port", Firewall, "Open a port", Medium)
                .param(port())
                .param(protocol())
                .timeout(60)
                .undo(UndoTemplate::mirror("firewall.remove_port", &["port", "protocol"])),
            ActionSpec::change("firewall.remove_port", Firewall, "Close a port", High)
                .param(port())
                .param(protocol())
                .timeout(60)
                .undo(UndoTemplate::mirror("firewall.add_port", &["port", "protocol"])),
            ActionSpec::change("firewall.reload", Firewall, "Reload firewall rules", Low).timeout(60),
            ActionSpec::query("firewall.list", Firewall, "List firewall configuration"),
            // storage
            ActionSpec::change("storage.snapshot_create", Storage, "Create a system snapshot", Low)
                .param(ParamSpec::required("description", ParamType::Text))
                .timeout(600)
                .undo(
                    UndoTemplate::mirror("storage.snapshot_unpin", &[])
                        .only_on(PackageBackend::Atomic),
                ),
            ActionSpec::change("storage.snapshot_unpin", Storage, "Unpin the pinned deployment", Low)
                .timeout(120),
            ActionSpec::change("storage.trim", Storage, "Trim mounted filesystems", Low).timeout(1800),
            ActionSpec::change("storage.cleanup", Storage, "Remove cached package data", Low)
                .timeout(900),
            ActionSpec::query("storage.usage", Storage, "Show disk usage")
                .param(ParamSpec::optional("path", ParamType::Path(root_relative))),
            // kernel
            ActionSpec::change("kernel.set_sysctl", Kernel, "Set a kernel parameter", High)
                .param(ParamSpec::required("key", ParamType::Identifier))
                .param(ParamSpec::required("value", ParamType::Text).embedded())
                .timeout(30),
            ActionSpec::change("kernel.add_karg", Kernel, "Add a kernel boot argument", High)
                .param(karg())
                .timeout(600)
                .undo(UndoTemplate::mirror("kernel.remove_karg", &["arg"])),
            ActionSpec::change("kernel.remove_karg", Kernel, "Remove a kernel boot argument", High)
                .param(karg())
                .timeout(600)
                .undo(UndoTemplate::mirror("kernel.add_karg", &["arg"])),
            ActionSpec::query("kernel.list_kargs", Kernel, "Show kernel boot arguments").timeout(60),
            // security
            ActionSpec::change("security.selinux_mode", Security, "Switch SELinux mode", High)
                .param(
                    ParamSpec::required("mode", ParamType::Identifier)
                        .allowed(&["enforcing", "permissive"]),
                )
                .timeout(30),
            ActionSpec::change("security.import_key", Security, "Import a package signing key", High)
                .param(ParamSpec::required("key_file", ParamType::Path(user_dir)))
                .timeout(60),
        ])
    }
}
