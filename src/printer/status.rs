//! Job status payload and the job state derived from it.
//!
//! The printer reports `status` (`busy`, `ready`, ...) and `jobstatus`
//! (`building`, `paused`, ...) as free-form strings. Older firmware and the
//! friendly names used by other clients differ, so every field is looked up
//! under both spellings.

use serde::Serialize;
use serde_json::Value;

use super::errors::PrinterError;

pub const ELAPSED_TIME: [&str; 2] = ["elaspedtime", "elapsed_time"];
pub const ESTIMATED_TOTAL_TIME: [&str; 2] = ["totalTime", "estimated_total_time"];
pub const REMAINING_TIME: [&str; 2] = ["remaining", "remaining_time"];
pub const PROGRESS: [&str; 2] = ["progress", "progress"];
pub const STATUS: [&str; 2] = ["status", "current_status"];
pub const JOB_STATUS: [&str; 2] = ["jobstatus", "job_status"];
pub const JOB_NAME: [&str; 2] = ["jobname", "job_name"];
pub const DOOR_OPEN: [&str; 2] = ["door_open", "door_open"];
pub const FILAMENT: [&str; 2] = ["filament_type ", "filament"];
pub const FAN_SPEED: [&str; 2] = ["fanSpeed", "fan_speed"];
pub const CHAMBER_TEMPERATURE: [&str; 2] = ["chamber_temperature", "chamber_temperature"];
pub const PLATFORM_TEMPERATURE: [&str; 2] = ["platform_temperature", "platform_temperature"];
pub const PLATFORM_TARGET_TEMPERATURE: [&str; 2] =
    ["buildPlate_target_temperature", "platform_target_temperature"];
pub const EXTRUDER_TEMPERATURE: [&str; 2] = ["temperature", "extruder_temperature"];
pub const EXTRUDER_TARGET_TEMPERATURE: [&str; 2] =
    ["extruder_target_temperature", "extruder_target_temperature"];
pub const NETWORK_BUILD: [&str; 2] = ["networkBuild", "network_build"];

const STATUS_BUSY: &str = "busy";

/// Job state derived from the raw status fields on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Preparing,
    Building,
    Pausing,
    Paused,
    Resuming,
    Completed,
    #[default]
    Unknown,
}

impl JobState {
    /// Derive the state from the printer status and job status strings.
    pub fn derive(printer_status: &str, job_status: &str) -> Self {
        let busy = printer_status.trim().eq_ignore_ascii_case(STATUS_BUSY);

        match job_status.trim().to_lowercase().as_str() {
            "building" => JobState::Building,
            "preparing" => JobState::Preparing,
            "pausing" => JobState::Pausing,
            "paused" => JobState::Paused,
            "resuming" => JobState::Resuming,
            "completed" => JobState::Completed,
            _ if !busy => JobState::Idle,
            _ => JobState::Unknown,
        }
    }

    /// The job is alive but the nozzle is not laying down material.
    pub fn is_suspended(&self) -> bool {
        matches!(
            self,
            JobState::Preparing | JobState::Pausing | JobState::Paused | JobState::Resuming
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::Preparing => "preparing",
            JobState::Building => "building",
            JobState::Pausing => "pausing",
            JobState::Paused => "paused",
            JobState::Resuming => "resuming",
            JobState::Completed => "completed",
            JobState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Parsed `GETPRINTERSTATUS` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStatus {
    #[serde(rename = "current_status")]
    pub printer_status: String,
    pub job_status: String,
    pub job_name: Option<String>,
    /// Seconds since the job started.
    pub elapsed_time: u64,
    /// Seconds, 0 if unknown.
    #[serde(rename = "estimated_total_time")]
    pub total_time: u64,
    /// Seconds, 0 if unknown.
    pub remaining_time: u64,
    /// Percent, 0-100.
    pub progress: f64,
    pub door_open: Option<bool>,
    pub filament: Option<String>,
    pub fan_speed: Option<f64>,
    pub chamber_temperature: Option<f64>,
    pub platform_temperature: Option<f64>,
    pub platform_target_temperature: Option<f64>,
    pub extruder_temperature: Option<f64>,
    pub extruder_target_temperature: Option<f64>,
    pub network_build: Option<bool>,
}

impl JobStatus {
    /// Build a status from the raw JSON returned by the printer.
    pub fn from_json(payload: &Value) -> Result<Self, PrinterError> {
        if !payload.is_object() {
            return Err(PrinterError::InvalidResponse(format!(
                "expected a status object, got {}",
                payload
            )));
        }

        Ok(Self {
            printer_status: string_field(payload, &STATUS).unwrap_or_default(),
            job_status: string_field(payload, &JOB_STATUS).unwrap_or_default(),
            job_name: string_field(payload, &JOB_NAME).filter(|s| !s.is_empty()),
            elapsed_time: u64_field(payload, &ELAPSED_TIME).unwrap_or(0),
            total_time: u64_field(payload, &ESTIMATED_TOTAL_TIME).unwrap_or(0),
            remaining_time: u64_field(payload, &REMAINING_TIME).unwrap_or(0),
            progress: f64_field(payload, &PROGRESS)
                .unwrap_or(0.0)
                .clamp(0.0, 100.0),
            door_open: bool_field(payload, &DOOR_OPEN),
            filament: string_field(payload, &FILAMENT),
            fan_speed: f64_field(payload, &FAN_SPEED),
            chamber_temperature: f64_field(payload, &CHAMBER_TEMPERATURE),
            platform_temperature: f64_field(payload, &PLATFORM_TEMPERATURE),
            platform_target_temperature: f64_field(payload, &PLATFORM_TARGET_TEMPERATURE),
            extruder_temperature: f64_field(payload, &EXTRUDER_TEMPERATURE),
            extruder_target_temperature: f64_field(payload, &EXTRUDER_TARGET_TEMPERATURE),
            network_build: bool_field(payload, &NETWORK_BUILD),
        })
    }

    pub fn job_state(&self) -> JobState {
        JobState::derive(&self.printer_status, &self.job_status)
    }

    pub fn is_busy(&self) -> bool {
        self.printer_status.trim().eq_ignore_ascii_case(STATUS_BUSY)
    }

    pub fn is_building(&self) -> bool {
        self.job_state() == JobState::Building
    }

    pub fn is_completed(&self) -> bool {
        self.job_state() == JobState::Completed
    }
}

pub(crate) fn lookup<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .find(|value| !value.is_null())
}

pub(crate) fn string_field(payload: &Value, keys: &[&str]) -> Option<String> {
    match lookup(payload, keys)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn f64_field(payload: &Value, keys: &[&str]) -> Option<f64> {
    match lookup(payload, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn u64_field(payload: &Value, keys: &[&str]) -> Option<u64> {
    f64_field(payload, keys)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u64)
}

pub(crate) fn bool_field(payload: &Value, keys: &[&str]) -> Option<bool> {
    match lookup(payload, keys)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "open" => Some(true),
            "false" | "0" | "no" | "closed" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
