//! Lifecycle commands: install, repair, update, uninstall and verify.

use console::Style;
use dialoguer::Confirm;
use gamesync::checksum::MismatchReason;
use gamesync::config::ConfigFile;
use gamesync::lifecycle::{format_size, TransferTotals};
use gamesync::InstallRequest;

use super::common::Session;
use crate::error::CliError;

/// Arguments for the install command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallArgs {
    pub optional: bool,
    pub languages: Vec<String>,
    pub accept_eula: bool,
    pub yes: bool,
}

fn summary(label: &str, message: &str) {
    let style = Style::new().green().bold();
    eprintln!("{:>12} {}", style.apply_to(label), message);
}

fn totals_line(totals: &TransferTotals) -> String {
    format!(
        "{} downloaded, {} patched, {} already valid ({} transferred)",
        totals.downloaded,
        totals.patched,
        totals.skipped,
        format_size(totals.transferred_bytes)
    )
}

/// Ask a yes/no question on the terminal; `false` when there is none.
fn confirm(prompt: &str) -> Result<bool, CliError> {
    if !console::Term::stderr().is_term() {
        return Ok(false);
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| CliError::Runtime(e.to_string()))
}

pub async fn install(config: &ConfigFile, args: InstallArgs) -> Result<(), CliError> {
    let accepted = args.accept_eula
        || args.yes
        || confirm("Do you accept the license agreement of this game?")?;

    let mut request = InstallRequest {
        accept_eula: accepted,
        ..InstallRequest::default()
    }
    .with_optional(args.optional);
    for tag in args.languages {
        request = request.with_language(tag);
    }

    let session = Session::open(config, args.yes)?;
    let result = session.engine.install(request).await;
    session.close().await;
    let report = result?;

    summary(
        "Installed",
        &format!(
            "version {}",
            report.version.as_deref().unwrap_or("(unversioned)")
        ),
    );
    summary("Totals", &totals_line(&report.totals));
    if report.repair_attempts > 0 {
        summary(
            "Repaired",
            &format!("after {} extra pass(es)", report.repair_attempts),
        );
    }
    Ok(())
}

pub async fn repair(config: &ConfigFile, yes: bool) -> Result<(), CliError> {
    let session = Session::open(config, yes)?;
    let result = session.engine.repair().await;
    session.close().await;
    let report = result?;

    if report.mismatched == 0 {
        summary("Verified", "every file matches the manifest");
    } else {
        summary(
            "Repaired",
            &format!(
                "{} file(s) in {} pass(es)",
                report.mismatched,
                report.repair_attempts.max(1)
            ),
        );
        summary("Totals", &totals_line(&report.totals));
    }
    Ok(())
}

pub async fn update(config: &ConfigFile, yes: bool) -> Result<(), CliError> {
    let session = Session::open(config, yes)?;
    let result = session.engine.update().await;
    session.close().await;
    let report = result?;

    let version = |v: &Option<String>| v.clone().unwrap_or_else(|| "(unversioned)".to_string());
    if report.up_to_date {
        summary("Current", &format!("version {}", version(&report.to_version)));
        return Ok(());
    }

    summary(
        "Updated",
        &format!(
            "{} -> {}",
            version(&report.from_version),
            version(&report.to_version)
        ),
    );
    summary("Totals", &totals_line(&report.totals));
    if report.removed > 0 {
        summary("Removed", &format!("{} obsolete file(s)", report.removed));
    }
    Ok(())
}

pub async fn uninstall(config: &ConfigFile, yes: bool) -> Result<(), CliError> {
    if !yes {
        let prompt = format!(
            "Remove every file under {}?",
            config.install_dir().display()
        );
        if !confirm(&prompt)? {
            return Err(CliError::Aborted);
        }
    }

    let session = Session::open(config, yes)?;
    let result = session.engine.uninstall().await;
    session.close().await;
    let report = result?;

    summary("Uninstalled", &format!("{} file(s) removed", report.removed));
    Ok(())
}

pub async fn verify(config: &ConfigFile) -> Result<(), CliError> {
    let session = Session::open(config, false)?;
    let result = session.engine.verify().await;
    session.close().await;
    let report = result?;

    if report.is_clean() {
        summary("Verified", &format!("{} file(s), all valid", report.checked));
        return Ok(());
    }

    let red = Style::new().red().bold();
    for mismatch in &report.mismatches {
        let reason = match mismatch.reason {
            MismatchReason::Missing => "missing",
            MismatchReason::DigestMismatch => "modified",
        };
        println!("{:>12} {}", red.apply_to(reason), mismatch.entry.path);
    }
    Err(CliError::Runtime(format!(
        "{} of {} file(s) do not match the manifest; run `gamesync repair`",
        report.mismatches.len(),
        report.checked
    )))
}
