use fedpanel_core::{ActionError, CommandDescriptor};
use std::path::Path;

/// Interpreters that would turn an argument vector back into a command string
const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "fish", "ksh", "csh", "tcsh", "busybox"];

/// Escalation paths other than the sanctioned broker
const AMBIENT_ESCALATORS: &[&str] = &["sudo", "su", "doas", "runuser"];

/// The single sanctioned way to run a command with elevated privileges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationBroker {
    binary: String,
}

impl EscalationBroker {
    pub fn new(binary: impl Into<String>) -> Result<Self, ActionError> {
        let binary = binary.into();
        if !Path::new(&binary).is_absolute() {
            return Err(ActionError::validation(
                "escalation.broker_path",
                format!("Escalation broker '{}' must be an absolute path", binary),
            ));
        }
        if is_forbidden(&binary) {
            return Err(ActionError::authorization_denied(
                "escalation.forbidden_broker",
                format!("'{}' cannot be used as an escalation broker", binary),
            ));
        }
        Ok(Self { binary })
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Wrap a descriptor so it runs through the broker.
    ///
    /// Refuses descriptors that would start a shell or another escalator.
    pub fn wrap(&self, descriptor: CommandDescriptor) -> Result<CommandDescriptor, ActionError> {
        if descriptor.requires_escalation() {
            self.verify(&descriptor)?;
            return Ok(descriptor);
        }
        ensure_no_shell(&descriptor)?;
        Ok(descriptor.into_escalated(self.binary.clone()))
    }

    /// Check a descriptor built elsewhere, e.g. one read back from the
    /// history store, before it is run.
    ///
    /// Escalated descriptors must go through this broker to an absolute
    /// target; unescalated ones must not name the broker at all.
    pub fn verify(&self, descriptor: &CommandDescriptor) -> Result<(), ActionError> {
        ensure_no_shell(descriptor)?;

        let via_broker = descriptor.binary() == self.binary;
        if descriptor.requires_escalation() != via_broker {
            tracing::error!(
                action_id = descriptor.action_id(),
                binary = descriptor.binary(),
                broker = %self.binary,
                "Refusing a command escalated outside the configured broker"
            );
            return Err(ActionError::authorization_denied(
                "escalation.foreign_broker",
                "Privileged commands may only run through the configured escalation broker",
            )
            .with_recoverable(false));
        }

        let target = descriptor.target_binary();
        if !Path::new(target).is_absolute() || (via_broker && target == self.binary) {
            return Err(ActionError::authorization_denied(
                "escalation.bad_target",
                format!("'{}' is not a runnable command path", target),
            )
            .with_recoverable(false));
        }
        Ok(())
    }
}

fn basename(binary: &str) -> &str {
    Path::new(binary)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(binary)
}

fn is_forbidden(binary: &str) -> bool {
    let name = basename(binary);
    SHELLS.contains(&name) || AMBIENT_ESCALATORS.contains(&name)
}

/// Reject a descriptor whose real target is a shell interpreter or an ambient
/// escalator such as sudo.
pub fn ensure_no_shell(descriptor: &CommandDescriptor) -> Result<(), ActionError> {
    let target = descriptor.target_binary();
    if is_forbidden(target) || is_forbidden(descriptor.binary()) {
        tracing::error!(
            action_id = descriptor.action_id(),
            binary = target,
            "Refusing to build a shell or ambient escalation command"
        );
        return Err(ActionError::authorization_denied(
            "escalation.shell_forbidden",
            "Commands are never run through a shell or an ambient superuser tool",
        )
        .with_recoverable(false));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedpanel_core::{CapabilityCategory, ErrorKind};

    fn descriptor(binary: &str, args: &[&str]) -> CommandDescriptor {
        CommandDescriptor::new(
            "service.restart",
            CapabilityCategory::Service,
            binary,
            args.iter().map(|a| a.to_string()).collect(),
        )
        .with_timeout(30)
    }

    #[test]
    fn test_wrap_prefixes_broker() {
        let broker = EscalationBroker::new("/usr/bin/pkexec").unwrap();
        let wrapped = broker
            .wrap(descriptor("/usr/bin/systemctl", &["restart", "sshd"]))
            .unwrap();
        assert_eq!(wrapped.binary(), "/usr/bin/pkexec");
        assert_eq!(
            wrapped.arguments(),
            &["/usr/bin/systemctl", "restart", "sshd"]
        );
        assert!(wrapped.requires_escalation());
    }

    #[test]
    fn test_wrap_is_not_applied_twice() {
        let broker = EscalationBroker::new("/usr/bin/pkexec").unwrap();
        let once = broker.wrap(descriptor("/usr/bin/systemctl", &["stop", "sshd"])).unwrap();
        let twice = broker.wrap(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_shells_and_sudo_are_refused() {
        let broker = EscalationBroker::new("/usr/bin/pkexec").unwrap();
        for binary in ["/bin/sh", "/usr/bin/bash", "/usr/bin/sudo", "/bin/su"] {
            let err = broker.wrap(descriptor(binary, &["-c", "id"])).unwrap_err();
            assert_eq!(err.kind, ErrorKind::AuthorizationDenied);
            assert_eq!(err.code, "escalation.shell_forbidden");
        }
    }

    #[test]
    fn test_wrap_refuses_other_brokers() {
        let broker = EscalationBroker::new("/usr/bin/pkexec").unwrap();
        let elsewhere = descriptor("/usr/bin/systemctl", &["stop", "sshd"])
            .into_escalated("/usr/local/bin/run-as-root");
        let err = broker.wrap(elsewhere).unwrap_err();
        assert_eq!(err.code, "escalation.foreign_broker");
        assert!(!err.recoverable);
    }

    #[test]
    fn test_verify_catches_stored_shell_through_broker() {
        let broker = EscalationBroker::new("/usr/bin/pkexec").unwrap();

        // Broker named as the binary but not marked as escalated
        let disguised = descriptor("/usr/bin/pkexec", &["/bin/sh", "-c", "id > /tmp/x"]);
        assert_eq!(
            broker.verify(&disguised).unwrap_err().kind,
            ErrorKind::AuthorizationDenied
        );

        let escalated_shell = descriptor("/bin/sh", &["-c", "id"]).into_escalated("/usr/bin/pkexec");
        assert_eq!(
            broker.verify(&escalated_shell).unwrap_err().code,
            "escalation.shell_forbidden"
        );

        let relative = descriptor("systemctl", &["stop", "sshd"]).into_escalated("/usr/bin/pkexec");
        assert_eq!(broker.verify(&relative).unwrap_err().code, "escalation.bad_target");

        let good = broker.wrap(descriptor("/usr/bin/systemctl", &["stop", "sshd"])).unwrap();
        assert!(broker.verify(&good).is_ok());
        assert!(broker.verify(&descriptor("/usr/bin/systemctl", &["status", "sshd"])).is_ok());
    }

    #[test]
    fn test_broker_must_be_absolute_and_not_sudo() {
        assert_eq!(
            EscalationBroker::new("pkexec").unwrap_err().kind,
            ErrorKind::Validation
        );
        assert_eq!(
            EscalationBroker::new("/usr/bin/sudo").unwrap_err().code,
            "escalation.forbidden_broker"
        );
    }
}
