// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The print spooler seam. The relay only ever talks to CUPS through this
// trait, so the job cache and the HTTP layer can run against a fake.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use relayprint_core::PrintOptions;
use relayprint_core::error::Result;

/// Printer attributes, flattened to name → string values.
///
/// Single-valued attributes hold one element.
pub type PrinterAttributes = HashMap<String, Vec<String>>;

/// A job the spooler still considers active (not completed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolerJob {
    pub job_id: i32,
    pub name: String,
    /// IPP `job-state` enum (3..=9).
    pub state: i32,
    pub state_reasons: Vec<String>,
    /// `job-printer-uri`, when reported.
    pub printer_uri: Option<String>,
}

impl SpoolerJob {
    /// Queue name, taken from the last segment of `job-printer-uri`.
    pub fn printer_name(&self) -> Option<&str> {
        self.printer_uri
            .as_deref()
            .and_then(|uri| uri.trim_end_matches('/').rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

/// Operations the relay needs from a print spooler.
#[async_trait]
pub trait PrintSpooler: Send + Sync {
    /// Submit `file` to `printer`; returns the spooler's job id.
    async fn print_file(
        &self,
        printer: &str,
        file: &Path,
        title: &str,
        options: &PrintOptions,
    ) -> Result<i32>;

    /// All jobs that are not yet completed, across every printer.
    async fn active_jobs(&self) -> Result<Vec<SpoolerJob>>;

    async fn cancel_job(&self, job_id: i32) -> Result<()>;

    async fn printer_attributes(&self, printer: &str) -> Result<PrinterAttributes>;
}

/// First value of `name`, if present.
pub fn first_value<'a>(attrs: &'a PrinterAttributes, name: &str) -> Option<&'a str> {
    attrs.get(name).and_then(|v| v.first()).map(String::as_str)
}
