//! Fallback-chain provisioning.
//!
//! The container's OS family is not known up front, so each configuration step
//! carries an ordered list of candidate commands covering the package managers
//! and init systems we expect to meet. Candidates run one at a time; the first
//! one whose exit status satisfies the step's predicate ends the step. A step
//! fails only after every candidate has been tried.
//!
//! The candidate tables live in [`ProvisioningPlan::ssh`]. Supporting another
//! distribution means adding a command to a table, not new control flow.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::executor::{CommandOutput, SecretInput};
use crate::report::{ReportEvent, Reporter, Stage};
use crate::runtime::{LxcRuntime, RuntimeError};

/// Port the SSH service is configured to listen on.
pub const SSH_PORT: u16 = 22;

/// Administrative account whose password is set.
pub const SSH_USER: &str = "root";

/// Configuration file overwritten by the service configuration step.
pub const SSHD_CONFIG_PATH: &str = "/etc/ssh/sshd_config";

/// Policy written to [`SSHD_CONFIG_PATH`].
pub const SSHD_CONFIG_LINES: &[&str] = &[
    "Port 22",
    "PermitRootLogin yes",
    "PasswordAuthentication yes",
    "Subsystem sftp internal-sftp",
];

/// Decides whether a candidate's outcome counts as success.
pub type SuccessPredicate = fn(&CommandOutput) -> bool;

/// Default predicate: exit status 0.
pub fn exit_success(output: &CommandOutput) -> bool {
    output.success()
}

/// Errors from provisioning.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("{step}: all {attempts} candidate command(s) failed, last exit status {last_status:?}")]
    Exhausted {
        step: String,
        attempts: usize,
        last_status: Option<i32>,
    },

    #[error("{step}: no candidate commands configured")]
    EmptyChain { step: String },

    #[error("{step}: {source}")]
    Runtime {
        step: String,
        #[source]
        source: RuntimeError,
    },
}

/// One idempotent configuration step with its fallback chain.
#[derive(Debug, Clone)]
pub struct ProvisioningStep {
    pub description: String,
    pub candidates: Vec<String>,
    /// Fed on stdin to every candidate. Never logged.
    pub input: Option<SecretInput>,
    pub success: SuccessPredicate,
}

impl ProvisioningStep {
    /// A step with several candidates, succeeding on exit status 0.
    pub fn new<I, S>(description: impl Into<String>, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            candidates: candidates.into_iter().map(Into::into).collect(),
            input: None,
            success: exit_success,
        }
    }

    /// A step with exactly one command and no alternatives.
    pub fn single(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(description, [command.into()])
    }

    pub fn with_input(mut self, input: SecretInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_predicate(mut self, success: SuccessPredicate) -> Self {
        self.success = success;
        self
    }
}

/// Result of a chain that found a working candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    pub step: String,
    /// Number of candidates executed, including the winner.
    pub attempts: usize,
    /// Index of the winning candidate.
    pub winner: usize,
    pub command: String,
}

/// Ordered list of steps, each gated on the previous one.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningPlan {
    steps: Vec<ProvisioningStep>,
}

impl ProvisioningPlan {
    pub fn new(steps: Vec<ProvisioningStep>) -> Self {
        Self { steps }
    }

    /// Plan that makes a container reachable over SSH as root with `password`.
    pub fn ssh(password: &str) -> Self {
        // The credential goes over stdin so it stays out of argv and logs.
        let set_password = ProvisioningStep::single("Set root password", "chpasswd")
            .with_input(SecretInput::new(format!("{SSH_USER}:{password}\n")));

        let install = ProvisioningStep::new(
            "Install SSH server",
            [
                // Debian family
                "apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y openssh-server",
                // RedHat family
                "yum install -y openssh-server",
                // Alpine family
                "apk add --no-cache openssh",
            ],
        );

        let quoted_lines: Vec<String> = SSHD_CONFIG_LINES.iter().map(|l| shell_quote(l)).collect();
        let configure = ProvisioningStep::single(
            "Write SSH server configuration",
            format!(
                "mkdir -p /etc/ssh && printf '%s\\n' {} > {SSHD_CONFIG_PATH}",
                quoted_lines.join(" ")
            ),
        );

        let restart = ProvisioningStep::new(
            "Restart SSH server",
            [
                "systemctl restart sshd",
                "systemctl restart ssh",
                "service sshd restart",
                "service ssh restart",
            ],
        );

        Self::new(vec![set_password, install, configure, restart])
    }

    pub fn steps(&self) -> &[ProvisioningStep] {
        &self.steps
    }
}

/// Wrap `value` in single quotes for `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Runs provisioning plans inside a container.
pub struct Provisioner {
    runtime: Arc<LxcRuntime>,
    reporter: Arc<dyn Reporter>,
}

impl Provisioner {
    pub fn new(runtime: Arc<LxcRuntime>, reporter: Arc<dyn Reporter>) -> Self {
        Self { runtime, reporter }
    }

    /// Run every step of `plan` in order, stopping at the first failed step.
    pub async fn provision(
        &self,
        container: &str,
        plan: &ProvisioningPlan,
    ) -> Result<Vec<ChainOutcome>, ProvisioningError> {
        let mut outcomes = Vec::with_capacity(plan.steps().len());

        for step in plan.steps() {
            self.reporter
                .stage_started(Stage::Provision, step.description.clone());

            let outcome = self.run_chain(container, step).await?;

            self.reporter.stage_completed(
                Stage::Provision,
                format!(
                    "{} (candidate {} of {})",
                    step.description,
                    outcome.winner + 1,
                    step.candidates.len()
                ),
            );
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Try the candidates of `step` in order until one succeeds.
    pub async fn run_chain(
        &self,
        container: &str,
        step: &ProvisioningStep,
    ) -> Result<ChainOutcome, ProvisioningError> {
        if step.candidates.is_empty() {
            return Err(ProvisioningError::EmptyChain {
                step: step.description.clone(),
            });
        }

        let mut last_status = None;
        for (index, command) in step.candidates.iter().enumerate() {
            debug!(container = %container, step = %step.description, candidate = index, "Trying candidate");

            let output = self
                .runtime
                .exec_shell(container, command, step.input.as_ref())
                .await
                .map_err(|source| ProvisioningError::Runtime {
                    step: step.description.clone(),
                    source,
                })?;

            if (step.success)(&output) {
                info!(
                    container = %container,
                    step = %step.description,
                    candidate = index,
                    "Step succeeded"
                );
                return Ok(ChainOutcome {
                    step: step.description.clone(),
                    attempts: index + 1,
                    winner: index,
                    command: command.clone(),
                });
            }

            last_status = output.status;
            self.reporter.report(ReportEvent::CandidateFailed {
                step: step.description.clone(),
                index,
                command: command.clone(),
                exit_code: output.status,
            });
        }

        Err(ProvisioningError::Exhausted {
            step: step.description.clone(),
            attempts: step.candidates.len(),
            last_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::executor::ScriptedExecutor;
    use crate::report::RecordingReporter;

    fn provisioner(executor: Arc<ScriptedExecutor>) -> (Provisioner, Arc<RecordingReporter>) {
        let runtime = Arc::new(LxcRuntime::new(executor, "lxc", PathBuf::from("/tmp")));
        let reporter = Arc::new(RecordingReporter::new());
        (Provisioner::new(runtime, reporter.clone()), reporter)
    }

    fn scripts(executor: &ScriptedExecutor) -> Vec<String> {
        executor
            .calls()
            .into_iter()
            .map(|c| c.args.last().cloned().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn test_chain_stops_at_second_candidate() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .succeed_when("second")
                .with_default_exit(1),
        );
        let (provisioner, reporter) = provisioner(executor.clone());
        let step = ProvisioningStep::new("demo", ["first", "second", "third"]);

        let outcome = provisioner.run_chain("ci-1", &step).await.unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.winner, 1);
        assert_eq!(outcome.command, "second");
        assert_eq!(scripts(&executor), vec!["first", "second"]);

        let failures = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, ReportEvent::CandidateFailed { .. }))
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_chain_exhausted_after_all_candidates() {
        let executor = Arc::new(ScriptedExecutor::new().with_default_exit(127));
        let (provisioner, _) = provisioner(executor.clone());
        let step = ProvisioningStep::new("demo", ["first", "second", "third"]);

        let err = provisioner.run_chain("ci-1", &step).await.unwrap_err();

        assert!(matches!(
            err,
            ProvisioningError::Exhausted {
                attempts: 3,
                last_status: Some(127),
                ..
            }
        ));
        assert_eq!(scripts(&executor), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_chain_aborts_on_spawn_failure() {
        let executor = Arc::new(ScriptedExecutor::new().spawn_error_when("lxc"));
        let (provisioner, _) = provisioner(executor.clone());
        let step = ProvisioningStep::new("demo", ["first", "second"]);

        let err = provisioner.run_chain("ci-1", &step).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Runtime { .. }));
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_is_an_error() {
        let executor = Arc::new(ScriptedExecutor::new());
        let (provisioner, _) = provisioner(executor.clone());
        let step = ProvisioningStep::new("demo", Vec::<String>::new());

        let err = provisioner.run_chain("ci-1", &step).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::EmptyChain { .. }));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        fn exit_two(output: &CommandOutput) -> bool {
            output.status == Some(2)
        }

        let executor = Arc::new(ScriptedExecutor::new().exit_when("b", 2));
        let (provisioner, _) = provisioner(executor);
        let step = ProvisioningStep::new("demo", ["a", "b"]).with_predicate(exit_two);

        let outcome = provisioner.run_chain("ci-1", &step).await.unwrap();
        assert_eq!(outcome.winner, 1);
    }

    #[test]
    fn test_ssh_plan_shape() {
        let plan = ProvisioningPlan::ssh("s3cret");
        let counts: Vec<usize> = plan.steps().iter().map(|s| s.candidates.len()).collect();
        assert_eq!(counts, vec![1, 3, 1, 4]);

        assert_eq!(plan.steps()[0].candidates[0], "chpasswd");
        assert_eq!(
            plan.steps()[0].input.as_ref().map(SecretInput::expose),
            Some("root:s3cret\n")
        );
        assert!(plan.steps()[1].candidates[0].contains("apt-get install -y openssh-server"));
        assert!(plan.steps()[1].candidates[1].starts_with("yum install"));
        assert!(plan.steps()[1].candidates[2].starts_with("apk add"));
    }

    #[test]
    fn test_sshd_config_command_overwrites() {
        let plan = ProvisioningPlan::ssh("pw");
        let command = &plan.steps()[2].candidates[0];
        assert!(command.ends_with("> /etc/ssh/sshd_config"));
        assert!(!command.contains(">>"));
        for line in SSHD_CONFIG_LINES {
            assert!(command.contains(&format!("'{line}'")));
        }
    }

    #[test]
    fn test_password_with_quotes_needs_no_escaping() {
        let plan = ProvisioningPlan::ssh("it's $(x)");
        let step = &plan.steps()[0];
        assert_eq!(step.candidates, vec!["chpasswd"]);
        assert_eq!(
            step.input.as_ref().map(SecretInput::expose),
            Some("root:it's $(x)\n")
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("Port 22"), "'Port 22'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_password_never_logged_or_in_argv() {
        let (logs, _guard) = crate::report::log_capture::capture();

        // `true` stands in for lxc: it exits 0 without reading stdin.
        let runtime = Arc::new(LxcRuntime::new(
            Arc::new(crate::executor::ProcessExecutor::new()),
            "true",
            PathBuf::from("/tmp"),
        ));
        let reporter = Arc::new(crate::report::TracingReporter::new());
        let provisioner = Provisioner::new(runtime, reporter);
        let plan = ProvisioningPlan::ssh("TopSecret123");

        let outcome = provisioner
            .run_chain("ci-1", &plan.steps()[0])
            .await
            .unwrap();

        assert!(!outcome.command.contains("TopSecret123"));
        let output = logs.contents();
        assert!(output.contains("chpasswd"));
        assert!(!output.contains("TopSecret123"));
    }

    #[tokio::test]
    async fn test_credential_input_reaches_executor() {
        let executor = Arc::new(ScriptedExecutor::new());
        let (provisioner, _) = provisioner(executor.clone());
        let plan = ProvisioningPlan::ssh("s3cret");

        provisioner.run_chain("ci-1", &plan.steps()[0]).await.unwrap();

        let call = &executor.calls()[0];
        assert_eq!(
            call.stdin.as_ref().map(SecretInput::expose),
            Some("root:s3cret\n")
        );
        assert!(call.args.iter().all(|a| !a.contains("s3cret")));
    }

    #[tokio::test]
    async fn test_credential_step_rerunnable() {
        let executor = Arc::new(ScriptedExecutor::new());
        let (provisioner, _) = provisioner(executor.clone());
        let plan = ProvisioningPlan::new(vec![ProvisioningPlan::ssh("pw").steps()[0].clone()]);

        provisioner.provision("ci-1", &plan).await.unwrap();
        provisioner.provision("ci-1", &plan).await.unwrap();
        assert_eq!(executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_alpine_container_full_plan() {
        // No apt-get, no yum, no systemd: only apk and the service script work.
        let executor = Arc::new(
            ScriptedExecutor::new()
                .fail_when("apt-get")
                .fail_when("yum")
                .fail_when("systemctl")
                .fail_when("service sshd"),
        );
        let (provisioner, reporter) = provisioner(executor.clone());

        let outcomes = provisioner
            .provision("ci-1", &ProvisioningPlan::ssh("pw"))
            .await
            .unwrap();

        let winners: Vec<usize> = outcomes.iter().map(|o| o.winner).collect();
        assert_eq!(winners, vec![0, 2, 0, 3]);
        assert_eq!(executor.calls().len(), 1 + 3 + 1 + 4);
        assert_eq!(reporter.completed_stages().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_step_gates_later_steps() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .fail_when("apt-get")
                .fail_when("yum")
                .fail_when("apk"),
        );
        let (provisioner, _) = provisioner(executor.clone());

        let err = provisioner
            .provision("ci-1", &ProvisioningPlan::ssh("pw"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Exhausted { attempts: 3, .. }));
        // Password step plus three install candidates; nothing after.
        assert_eq!(executor.calls().len(), 4);
    }
}
