// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async IPP client for the local CUPS scheduler.
//
// Uses the `ipp` crate's async API to send standard IPP operations:
//   - Print-Job               (RFC 8011 §4.2.1)
//   - Get-Printer-Attributes  (RFC 8011 §4.2.5)
//   - Get-Jobs                (RFC 8011 §4.2.6)
//   - Cancel-Job              (RFC 8011 §4.3.3)

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use async_trait::async_trait;
use ipp::prelude::*;
use tracing::{debug, error, info, instrument};

use relayprint_core::PrintOptions;
use relayprint_core::error::{RelayError, Result};

use crate::spooler::{PrintSpooler, PrinterAttributes, SpoolerJob};

/// Job attributes requested from Get-Jobs.
const JOB_ATTRIBUTES: &[&str] = &[
    "job-id",
    "job-name",
    "job-state",
    "job-state-reasons",
    "job-printer-uri",
];

/// [`PrintSpooler`] talking IPP to a CUPS scheduler.
///
/// Queues live at `<base>/printers/<name>`, jobs at `<base>/jobs/<id>`.
#[derive(Debug, Clone)]
pub struct CupsClient {
    base: String,
}

impl CupsClient {
    /// Create a client for the scheduler at `base_uri` (e.g. `ipp://localhost:631`).
    pub fn new(base_uri: &str) -> Result<Self> {
        let base = base_uri.trim_end_matches('/').to_string();
        base.parse::<Uri>()
            .map_err(|e| RelayError::Spooler(format!("invalid URI '{base_uri}': {e}")))?;
        Ok(Self { base })
    }

    pub fn base_uri(&self) -> &str {
        &self.base
    }

    pub fn printer_uri(&self, printer: &str) -> Result<Uri> {
        parse_uri(&format!("{}/printers/{printer}", self.base))
    }

    fn job_uri(&self, job_id: i32) -> Result<Uri> {
        parse_uri(&format!("{}/jobs/{job_id}", self.base))
    }

    /// The scheduler root, which addresses every queue at once.
    fn scheduler_uri(&self) -> Result<Uri> {
        parse_uri(&format!("{}/", self.base))
    }
}

#[async_trait]
impl PrintSpooler for CupsClient {
    /// Send a Print-Job with the document read from `file`.
    #[instrument(skip(self, options), fields(printer = %printer, file = %file.display()))]
    async fn print_file(
        &self,
        printer: &str,
        file: &Path,
        title: &str,
        options: &PrintOptions,
    ) -> Result<i32> {
        let uri = self.printer_uri(printer)?;
        let document = tokio::fs::read(file).await?;
        let format = mime_for_path(file);
        let payload = IppPayload::new(Cursor::new(document));

        let mut builder = IppOperationBuilder::print_job(uri.clone(), payload)
            .job_title(title)
            .document_format(format);
        for attribute in job_template_attributes(options) {
            builder = builder.attribute(attribute);
        }
        let operation = builder.build();

        info!(mime = format, "sending Print-Job");
        let response = AsyncIppClient::new(uri)
            .send(operation)
            .await
            .map_err(|e| RelayError::Spooler(format!("Print-Job: {e}")))?;
        check_status(&response, "Print-Job")?;

        let job_id = extract_job_id(response.attributes()).ok_or_else(|| {
            RelayError::Spooler("Print-Job response missing job-id attribute".into())
        })?;

        info!(job_id, "print job accepted by CUPS");
        Ok(job_id)
    }

    #[instrument(skip(self))]
    async fn active_jobs(&self) -> Result<Vec<SpoolerJob>> {
        let uri = self.scheduler_uri()?;
        let mut request =
            IppRequestResponse::new(IppVersion::v1_1(), Operation::GetJobs, Some(uri.clone()));
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("which-jobs", IppValue::Keyword("not-completed".into())),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "requested-attributes",
                IppValue::Array(
                    JOB_ATTRIBUTES
                        .iter()
                        .map(|name| IppValue::Keyword((*name).into()))
                        .collect(),
                ),
            ),
        );

        debug!("sending Get-Jobs");
        let response = AsyncIppClient::new(uri)
            .send(request)
            .await
            .map_err(|e| RelayError::Spooler(format!("Get-Jobs: {e}")))?;
        check_status(&response, "Get-Jobs")?;

        let jobs = parse_jobs(response.attributes());
        debug!(count = jobs.len(), "received job list");
        Ok(jobs)
    }

    #[instrument(skip(self))]
    async fn cancel_job(&self, job_id: i32) -> Result<()> {
        let uri = self.job_uri(job_id)?;
        let operation = IppOperationBuilder::cancel_job(uri.clone(), job_id).build();

        info!(job_id, "sending Cancel-Job");
        let response = AsyncIppClient::new(uri)
            .send(operation)
            .await
            .map_err(|e| RelayError::Spooler(format!("Cancel-Job({job_id}): {e}")))?;
        check_status(&response, "Cancel-Job")?;

        info!(job_id, "job cancelled");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn printer_attributes(&self, printer: &str) -> Result<PrinterAttributes> {
        let uri = self.printer_uri(printer)?;
        let operation = IppOperationBuilder::get_printer_attributes(uri.clone()).build();

        debug!("sending Get-Printer-Attributes");
        let response = AsyncIppClient::new(uri)
            .send(operation)
            .await
            .map_err(|e| RelayError::Spooler(format!("Get-Printer-Attributes: {e}")))?;
        check_status(&response, "Get-Printer-Attributes")?;

        let attrs = flatten_attributes(response.attributes());
        debug!(count = attrs.len(), "received printer attributes");
        Ok(attrs)
    }
}

// ---------------------------------------------------------------------------
// Request and response helpers
// ---------------------------------------------------------------------------

fn parse_uri(uri: &str) -> Result<Uri> {
    uri.parse()
        .map_err(|e| RelayError::Spooler(format!("invalid URI '{uri}': {e}")))
}

fn check_status(response: &IppRequestResponse, operation: &str) -> Result<()> {
    let code = response.header().status_code();
    if code.is_success() {
        return Ok(());
    }
    error!(status = ?code, operation, "IPP request failed");
    Err(RelayError::Spooler(format!("{operation} returned status {code:?}")))
}

/// `document-format` for an upload, by file extension.
///
/// Unknown types are sent as `application/octet-stream` so CUPS auto-types them.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("ps") => "application/postscript",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Job Template attributes for the given options.
pub fn job_template_attributes(options: &PrintOptions) -> Vec<IppAttribute> {
    let mut attrs = Vec::new();
    if let Some(copies) = options.copies {
        attrs.push(IppAttribute::new(
            "copies",
            IppValue::Integer(i32::try_from(copies).unwrap_or(i32::MAX)),
        ));
    }
    if let Some(sides) = options.sides_keyword() {
        attrs.push(IppAttribute::new("sides", IppValue::Keyword(sides.into())));
    }
    if let Some(quality) = options.quality {
        attrs.push(IppAttribute::new(
            "print-quality",
            IppValue::Enum(quality.ipp_enum_value()),
        ));
    }
    attrs
}

/// All values of an attribute as strings; arrays are expanded.
fn value_strings(value: &IppValue) -> Vec<String> {
    match value {
        IppValue::Array(items) => items.iter().flat_map(value_strings).collect(),
        other => vec![other.to_string()],
    }
}

fn int_value(value: &IppValue) -> Option<i32> {
    match value {
        IppValue::Integer(n) | IppValue::Enum(n) => Some(*n),
        _ => None,
    }
}

/// Flatten all attribute groups in an IPP response into a single map.
fn flatten_attributes(attrs: &IppAttributes) -> PrinterAttributes {
    let mut map = HashMap::new();
    for group in attrs.groups() {
        for (name, attr) in group.attributes() {
            map.insert(name.to_string(), value_strings(attr.value()));
        }
    }
    map
}

fn extract_job_id(attrs: &IppAttributes) -> Option<i32> {
    attrs
        .groups_of(DelimiterTag::JobAttributes)
        .find_map(|group| group.attributes().get("job-id").and_then(|a| int_value(a.value())))
}

/// One [`SpoolerJob`] per Job Attributes group; groups without a job-id are skipped.
fn parse_jobs(attrs: &IppAttributes) -> Vec<SpoolerJob> {
    attrs
        .groups_of(DelimiterTag::JobAttributes)
        .filter_map(|group| {
            let attributes = group.attributes();
            let job_id = attributes.get("job-id").and_then(|a| int_value(a.value()))?;
            Some(SpoolerJob {
                job_id,
                name: attributes
                    .get("job-name")
                    .map(|a| a.value().to_string())
                    .unwrap_or_default(),
                state: attributes
                    .get("job-state")
                    .and_then(|a| int_value(a.value()))
                    .unwrap_or(3),
                state_reasons: attributes
                    .get("job-state-reasons")
                    .map(|a| value_strings(a.value()))
                    .unwrap_or_default(),
                printer_uri: attributes.get("job-printer-uri").map(|a| a.value().to_string()),
            })
        })
        .collect()
}
