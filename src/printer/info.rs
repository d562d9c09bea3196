use serde::Serialize;
use serde_json::Value;

use super::errors::PrinterError;
use super::status::{bool_field, f64_field, string_field};

/// Known Dremel models, matched against the `model` / `machine_type` fields.
pub const KNOWN_MODELS: [&str; 3] = ["3D20", "3D40", "3D45"];

/// Parsed `GETPRINTERINFO` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrinterInfo {
    pub model: String,
    #[serde(rename = "SN")]
    pub serial_number: Option<String>,
    pub api_version: Option<String>,
    pub firmware_version: Option<String>,
    pub machine_type: Option<String>,
    pub connection_type: Option<String>,
    pub wifi_ip: Option<String>,
    pub wifi_connected: Option<bool>,
    pub ethernet_ip: Option<String>,
    pub ethernet_connected: Option<bool>,
    pub hours_used: Option<f64>,
    pub available_storage: Option<f64>,
    pub platform_max_temperature: Option<f64>,
    pub extruder_max_temperature: Option<f64>,
}

impl PrinterInfo {
    pub fn from_json(payload: &Value) -> Result<Self, PrinterError> {
        if !payload.is_object() {
            return Err(PrinterError::InvalidResponse(format!(
                "expected a printer info object, got {}",
                payload
            )));
        }

        let machine_type = string_field(payload, &["machine_type"]);
        let model = string_field(payload, &["model"])
            .filter(|m| !m.is_empty())
            .or_else(|| machine_type.as_deref().and_then(model_from_machine_type))
            .unwrap_or_default();

        Ok(Self {
            model,
            serial_number: string_field(payload, &["SN", "serial_number"]),
            api_version: string_field(payload, &["api_version"]),
            firmware_version: string_field(payload, &["firmware_version"]),
            machine_type,
            connection_type: string_field(payload, &["connection_type"]),
            wifi_ip: string_field(payload, &["wifi_ip"]),
            wifi_connected: bool_field(payload, &["wifi_connected"]),
            ethernet_ip: string_field(payload, &["ethernet_ip"]),
            ethernet_connected: bool_field(payload, &["ethernet_connected"]),
            hours_used: f64_field(payload, &["UsageCounter", "hours_used"]),
            available_storage: f64_field(
                payload,
                &["PrintererAvailabelStorage", "available_storage"],
            ),
            platform_max_temperature: f64_field(
                payload,
                &["PrinterBedMessage", "platform_max_temperature"],
            ),
            extruder_max_temperature: f64_field(
                payload,
                &["PrinterNozzleMessage", "extruder_max_temperature"],
            ),
        })
    }
}

/// `"DREMEL DIGILAB 3D45"` -> `"3D45"`.
fn model_from_machine_type(machine_type: &str) -> Option<String> {
    let upper = machine_type.to_uppercase();
    KNOWN_MODELS
        .iter()
        .find(|model| upper.contains(*model))
        .map(|model| model.to_string())
}
