//! Delete-all-except command.

use anyhow::Result;

use crate::commands::open_token;
use crate::token::{DeletionOutcome, DeletionReport};
use crate::utils::config::TokenSettings;
use crate::utils::output::{print_info, print_plain, print_success, print_warning};

/// Command to destroy every token object whose label is not kept
pub struct DeleteAllExceptCommand {
    pub settings: TokenSettings,
    pub keep: Vec<String>,
    pub force: bool,
}

impl DeleteAllExceptCommand {
    pub fn new(settings: TokenSettings, keep: Vec<String>, force: bool) -> Self {
        Self {
            settings,
            keep,
            force,
        }
    }

    pub fn execute(&self) -> Result<()> {
        if !self.force {
            anyhow::bail!(
                "Refusing to delete objects from token '{}' without --force",
                self.settings.label
            );
        }

        let mut token = open_token(&self.settings)?;
        let report = token.delete_all_except(&self.keep)?;
        token.finalise()?;

        print_report(&report);

        if let Some(reason) = report.aborted() {
            anyhow::bail!("Deletion stopped early: {}", reason);
        }
        print_success(&format!(
            "Deleted {} object(s), kept {}",
            report.deleted_count(),
            report.kept_count()
        ));
        Ok(())
    }
}

fn print_report(report: &DeletionReport) {
    for (object, outcome) in &report.outcomes {
        match outcome {
            DeletionOutcome::Kept(label) => print_info(&format!("Kept '{}'", label)),
            DeletionOutcome::Deleted(label) => print_plain(&format!("Deleted '{}'", label)),
            DeletionOutcome::DeletedUnlabeled => {
                print_warning(&format!("Deleted unlabeled object {}", object))
            }
            DeletionOutcome::Aborted(reason) => {
                print_warning(&format!("Stopped at object {}: {}", object, reason))
            }
        }
    }
}
