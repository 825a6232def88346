//! tick doctor command implementation
//!
//! Prints one line per check and exits non-zero when any error-level check
//! fails. Warnings alone do not fail the command.

use serde::Serialize;

use crate::doctor::{self, CheckResult};
use crate::engine::Store;
use crate::error::{Error, Result};
use crate::output::{emit_success, OutputOptions};

#[derive(Serialize)]
struct DoctorOutput<'a> {
    issues: usize,
    errors: usize,
    warnings: usize,
    results: &'a [CheckResult],
}

pub fn run(store: &Store, output: OutputOptions) -> Result<()> {
    let report = doctor::diagnose(store.dir(), store.lock_timeout())?;
    tracing::info!(
        issues = report.issue_count(),
        errors = report.error_count(),
        "doctor finished"
    );

    if output.json {
        let data = DoctorOutput {
            issues: report.issue_count(),
            errors: report.error_count(),
            warnings: report.warning_count(),
            results: &report.results,
        };
        emit_success(output, "doctor", &data, None)?;
    } else if !output.quiet {
        println!("{}", report);
    }

    if report.has_errors() {
        return Err(Error::DoctorFailed(report.error_count()));
    }
    Ok(())
}
