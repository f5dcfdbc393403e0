//! Terminal output for the builder binary.

use colored::Colorize;
use lxcci_builder::pipeline::{PipelineError, PipelineOutcome};
use lxcci_builder::runtime::RuntimeError;
use lxcci_builder::Stage;

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(pipeline_err) = err.downcast_ref::<PipelineError>() {
        eprintln!("Stage: {}", pipeline_err.stage());
        if let Some(hint) = hint(pipeline_err) {
            eprintln!("\n{}", format!("Hint: {hint}").yellow());
        }
    }
}

/// Operator hint for a pipeline failure.
pub fn hint(err: &PipelineError) -> Option<&'static str> {
    match err {
        PipelineError::Config(_) => Some("The mirror must be an http:// or https:// URL."),
        PipelineError::Discovery(_) => {
            Some("Check the image coordinate and that the mirror is reachable.")
        }
        PipelineError::Verification(_) => {
            Some("The latest build may still be uploading. Retry in a few minutes.")
        }
        PipelineError::Transfer(_) => {
            Some("Check free space in the work directory and the network connection.")
        }
        PipelineError::Runtime {
            source: RuntimeError::Exec(_),
            ..
        } => Some("Check that `lxc` is installed or pass its path with --lxc."),
        PipelineError::Runtime {
            stage: Stage::Publish,
            ..
        } => Some("Check --containers-root, or pass --skip-publish."),
        PipelineError::Runtime { .. } => {
            Some("Check that LXD is running and that this user may run `lxc`.")
        }
        PipelineError::Provisioning(_) => {
            Some("No candidate command worked; the distribution may be unsupported.")
        }
        PipelineError::Record(_) => Some("Check that the output directory is writable."),
    }
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print the summary of a finished run.
pub fn print_outcome(outcome: &PipelineOutcome) {
    let record = &outcome.record;
    print_success(&format!(
        "Container {} ({}/{}/{}) is ready",
        record.name, record.distro, record.version, record.arch
    ));
    print_info(&format!(
        "SSH: {}@{} port {}",
        record.ssh.username, record.name, record.ssh.port
    ));
    print_info(&format!("Record: {}", outcome.record_files.info.display()));

    if let Some(archive) = &outcome.archive {
        print_info(&format!(
            "Archive: {} ({} bytes)",
            archive.path.display(),
            archive.size_bytes
        ));
        if let Some(dest) = &archive.uploaded_to {
            print_info(&format!("Published: {dest}"));
        }
    }
}
