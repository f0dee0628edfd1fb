// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print job and printer endpoints.

use std::path::{Path, PathBuf};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use relayprint_core::{
    JobStatusReport, PrintOptions, PrintQuality, PrinterSummary, QueueStatus, RelayError,
};
use relayprint_print::PrintSpooler;

use super::{ApiError, ApiResult};
use crate::services::app_services::AppServices;

/// Job title of the printer self-test page.
pub const TEST_PAGE_TITLE: &str = "RelayPrint Test Page";

/// Extensions CUPS is trusted to render.
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "ps", "txt", "png", "jpg", "jpeg"];

/// Fields of a `multipart/form-data` print submission.
#[derive(Debug, Default)]
pub struct PrintUpload {
    /// Client file name; `None` when no `file` part was sent.
    pub file_name: Option<String>,
    pub data: Bytes,
    pub printer_name: Option<String>,
    pub copies: Option<String>,
    pub duplex: Option<String>,
    pub quality: Option<String>,
}

impl PrintUpload {
    pub async fn from_multipart(multipart: &mut Multipart) -> Result<Self, ApiError> {
        let mut upload = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                upload.file_name = Some(field.file_name().unwrap_or_default().to_string());
                upload.data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            match name.as_str() {
                "printer_name" => upload.printer_name = Some(value),
                "copies" => upload.copies = Some(value),
                "duplex" => upload.duplex = Some(value),
                "quality" => upload.quality = Some(value),
                _ => {}
            }
        }
        Ok(upload)
    }

    /// Spooler options from the form fields.
    pub fn options(&self) -> Result<PrintOptions, ApiError> {
        let copies = self
            .copies
            .as_deref()
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or_else(|| ApiError::bad_request(format!("Invalid copies value '{raw}'")))
            })
            .transpose()?;
        let quality = self
            .quality
            .as_deref()
            .map(str::parse::<PrintQuality>)
            .transpose()
            .map_err(ApiError::from)?;

        Ok(PrintOptions {
            copies,
            duplex: self.duplex.as_deref().map(|d| d == "true"),
            quality,
        })
    }
}

/// Whether the file name carries an extension on the allow-list.
pub fn allowed_file(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Reduce a client-supplied file name to a safe single path component.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']);
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

pub async fn submit(State(services): State<AppServices>, mut multipart: Multipart) -> ApiResult<Value> {
    let upload = PrintUpload::from_multipart(&mut multipart).await?;
    submit_upload(&services, upload).await
}

/// Validate an upload, stage it on disk and hand it to the spooler.
///
/// The staged copy is removed whether or not the submission succeeds.
#[instrument(skip_all, fields(file = upload.file_name.as_deref().unwrap_or_default()))]
pub async fn submit_upload(services: &AppServices, upload: PrintUpload) -> ApiResult<Value> {
    let Some(file_name) = upload.file_name.as_deref() else {
        return Err(ApiError::bad_request("No file provided"));
    };
    if file_name.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    if !allowed_file(file_name) {
        return Err(ApiError::bad_request("File type not allowed"));
    }
    let Some(printer) = upload.printer_name.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Err(ApiError::bad_request("Printer name is required"));
    };
    let options = upload.options()?;

    let staged = staged_path(services.upload_dir(), file_name);
    tokio::fs::write(&staged, &upload.data)
        .await
        .map_err(|e| ApiError::from(RelayError::Io(e)))?;

    let submitted = services.queue().submit_job(printer, &staged, &options).await;
    if let Err(e) = tokio::fs::remove_file(&staged).await {
        warn!(path = %staged.display(), error = %e, "could not remove staged upload");
    }

    let job_id = submitted?;
    info!(job_id, printer, bytes = upload.data.len(), "print job submitted");
    Ok(Json(json!({
        "job_id": job_id,
        "status": "submitted",
        "message": "Print job submitted successfully",
    })))
}

fn staged_path(upload_dir: &Path, file_name: &str) -> PathBuf {
    upload_dir.join(format!("{}_{}", Uuid::new_v4().simple(), sanitize_file_name(file_name)))
}

fn parse_job_id(raw: &str) -> Result<i32, ApiError> {
    raw.parse().map_err(|_| ApiError::new(StatusCode::NOT_FOUND, "Not found"))
}

pub async fn job_status(
    State(services): State<AppServices>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<JobStatusReport> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(services.queue().job_status(job_id).await?))
}

pub async fn cancel(State(services): State<AppServices>, UrlPath(job_id): UrlPath<String>) -> ApiResult<Value> {
    let job_id = parse_job_id(&job_id)?;
    if services.queue().cancel_job(job_id).await? {
        Ok(Json(json!({ "message": "Job canceled successfully" })))
    } else {
        Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to cancel job"))
    }
}

fn test_page(printer: &str, at: DateTime<Utc>) -> String {
    format!(
        "{TEST_PAGE_TITLE}\n\
         ===================\n\
         Printer: {printer}\n\
         Time: {}\n\
         \n\
         If you can read this, your printer is working correctly!\n",
        at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Print a plain-text self-test page straight to `name`, bypassing the job
/// cache. The staged page is removed whether or not the spooler accepts it.
#[instrument(skip(services))]
pub async fn test_print(State(services): State<AppServices>, UrlPath(name): UrlPath<String>) -> ApiResult<Value> {
    let staged = services
        .upload_dir()
        .join(format!("{}_test_page.txt", Uuid::new_v4().simple()));
    tokio::fs::write(&staged, test_page(&name, Utc::now()))
        .await
        .map_err(|e| ApiError::from(RelayError::Io(e)))?;

    let printed = services
        .queue()
        .spooler()
        .print_file(&name, &staged, TEST_PAGE_TITLE, &PrintOptions::default())
        .await;
    if let Err(e) = tokio::fs::remove_file(&staged).await {
        warn!(path = %staged.display(), error = %e, "could not remove test page");
    }

    let job_id = printed?;
    info!(job_id, printer = %name, "test page sent");
    Ok(Json(json!({ "success": true, "job_id": job_id })))
}

pub async fn printers(State(services): State<AppServices>) -> Json<Value> {
    let printers = services.discovery().list_printers().await;
    Json(json!({ "printers": printers }))
}

pub async fn printer_summary(State(services): State<AppServices>) -> Json<PrinterSummary> {
    Json(services.discovery().summary().await)
}

pub async fn queue_status(State(services): State<AppServices>) -> ApiResult<QueueStatus> {
    Ok(Json(services.queue().queue_status().await?))
}
