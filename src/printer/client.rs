use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;

use super::errors::PrinterError;
use super::info::PrinterInfo;
use super::source::PrinterStatusSource;
use super::status::JobStatus;

const COMMAND_PORT: u16 = 80;
const CAMERA_PORT: u16 = 10123;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CMD_STATUS: &str = "GETPRINTERSTATUS";
const CMD_INFO: &str = "GETPRINTERINFO";
const CMD_PAUSE: &str = "PAUSE";
const CMD_RESUME: &str = "RESUME";
const CMD_CANCEL: &str = "CANCEL";
const CMD_PRINT: &str = "PRINT";

/// HTTP client for a Dremel printer on the local network.
pub struct Dremel3DPrinter {
    host: String,
    http: reqwest::Client,
    job: JobStatus,
    info: Option<PrinterInfo>,
}

impl Dremel3DPrinter {
    pub fn new(host: impl Into<String>) -> Result<Self, PrinterError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PrinterError::Connectivity(e.to_string()))?;

        Ok(Self {
            host: host.into(),
            http,
            job: JobStatus::default(),
            info: None,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn command_url(&self) -> String {
        format!("http://{}:{}/command", self.host, COMMAND_PORT)
    }

    fn upload_url(&self) -> String {
        format!("http://{}:{}/print_file_uploads", self.host, COMMAND_PORT)
    }

    /// MJPEG stream served by the 3D45 camera.
    pub fn stream_url(&self) -> String {
        format!("http://{}:{}/?action=stream", self.host, CAMERA_PORT)
    }

    pub fn snapshot_url(&self) -> String {
        format!("http://{}:{}/?action=snapshot", self.host, CAMERA_PORT)
    }

    async fn send_command(&self, command: &str) -> Result<Value, PrinterError> {
        tracing::debug!(target: "printer", "[CMD] {} -> {}", command, self.host);

        let response = self
            .http
            .post(self.command_url())
            .body(command.to_string())
            .send()
            .await?;

        let payload: Value = response.json().await?;
        ensure_success(command, &payload)?;
        Ok(payload)
    }

    async fn send_form(&self, key: &str, value: &str) -> Result<Value, PrinterError> {
        tracing::debug!(target: "printer", "[CMD] {}={} -> {}", key, value, self.host);

        let response = self
            .http
            .post(self.command_url())
            .form(&[(key, value)])
            .send()
            .await?;

        let payload: Value = response.json().await?;
        ensure_success(key, &payload)?;
        Ok(payload)
    }

    /// Static printer information. Fetched once and cached.
    pub async fn printer_info(&mut self) -> Result<&PrinterInfo, PrinterError> {
        if self.info.is_none() {
            let payload = self.send_command(CMD_INFO).await?;
            self.info = Some(PrinterInfo::from_json(&payload)?);
        }

        self.info
            .as_ref()
            .ok_or_else(|| PrinterError::InvalidResponse("printer info missing".to_string()))
    }

    pub async fn model(&mut self) -> Result<String, PrinterError> {
        Ok(self.printer_info().await?.model.clone())
    }

    pub async fn pause_print(&self) -> Result<Value, PrinterError> {
        tracing::info!(target: "printer", "[JOB] Pausing print");
        self.send_command(CMD_PAUSE).await
    }

    pub async fn resume_print(&self) -> Result<Value, PrinterError> {
        tracing::info!(target: "printer", "[JOB] Resuming print");
        self.send_command(CMD_RESUME).await
    }

    pub async fn stop_print(&self) -> Result<Value, PrinterError> {
        tracing::info!(target: "printer", "[JOB] Cancelling print");
        self.send_command(CMD_CANCEL).await
    }

    /// Upload a local gcode file and start printing it.
    pub async fn start_print_from_file(&self, path: &Path) -> Result<Value, PrinterError> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "print.gcode".to_string());

        self.upload_and_print(name, bytes).await
    }

    /// Download a gcode file and start printing it.
    pub async fn start_print_from_url(&self, url: &str) -> Result<Value, PrinterError> {
        tracing::info!(target: "printer", "[JOB] Downloading {}", url);

        let response = self.http.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?.to_vec();
        let name = file_name_from_url(url);

        self.upload_and_print(name, bytes).await
    }

    async fn upload_and_print(&self, name: String, bytes: Vec<u8>) -> Result<Value, PrinterError> {
        tracing::info!(
            target: "printer",
            "[JOB] Uploading {} ({} bytes)",
            name,
            bytes.len()
        );

        let part = multipart::Part::bytes(bytes).file_name(name.clone());
        let form = multipart::Form::new().part("print_file", part);

        self.http
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        self.send_form(CMD_PRINT, &name).await
    }
}

#[async_trait]
impl PrinterStatusSource for Dremel3DPrinter {
    async fn refresh(&mut self) -> Result<(), PrinterError> {
        let payload = self.send_command(CMD_STATUS).await?;
        self.job = JobStatus::from_json(&payload)?;
        tracing::trace!(
            target: "printer",
            "[STATUS] {} progress={:.1}%",
            self.job.job_state(),
            self.job.progress
        );
        Ok(())
    }

    fn job_status(&self) -> &JobStatus {
        &self.job
    }
}

/// The printer answers `{"error_code": 200, "message": "success", ...}`.
/// Status payloads omit both fields, which counts as success.
fn ensure_success(command: &str, payload: &Value) -> Result<(), PrinterError> {
    let code = payload.get("error_code").and_then(Value::as_i64);
    let message = payload.get("message").and_then(Value::as_str);

    let ok = match (code, message) {
        (Some(code), _) if code != 200 => false,
        (_, Some(message)) => message.eq_ignore_ascii_case("success"),
        _ => true,
    };

    if ok {
        Ok(())
    } else {
        Err(PrinterError::Api {
            command: command.to_string(),
            message: message.unwrap_or("unknown error").to_string(),
        })
    }
}

fn file_name_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("print.gcode")
        .to_string()
}
