// Device operations for Andersen EV chargers.
//
// Thin callers over the GraphQL client: they format operation bodies,
// interpret response shapes, and report failures as None/false with a
// logged diagnostic. Connection lifecycle and token refresh live entirely
// in the client underneath.

use std::sync::RwLock;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::client::KonnectClient;
use crate::queries;
use crate::session::Connect;

/// Totals for one completed charge session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeSummary {
    pub duration: f64,
    pub charge_cost_total: f64,
    pub charge_energy_total: f64,
    pub grid_cost_total: f64,
    pub grid_energy_total: f64,
    pub solar_energy_total: f64,
    pub solar_cost_total: f64,
    pub surplus_used_cost_total: f64,
    pub surplus_used_energy_total: f64,
}

/// One Andersen EV charger and its operations.
///
/// Status polling keeps the last seen status so EVSE-state and online
/// transitions can be logged; the user-lock flag mirrors the most recent
/// successful lock/unlock command.
pub struct KonnectDevice<C: Connect, R: TokenSource> {
    client: KonnectClient<C, R>,
    device_id: String,
    friendly_name: String,
    user_lock: RwLock<bool>,
    model_name: RwLock<Option<String>>,
    last_status: RwLock<Option<Value>>,
}

impl<C: Connect, R: TokenSource> KonnectDevice<C, R> {
    pub fn new(
        client: KonnectClient<C, R>,
        device_id: impl Into<String>,
        friendly_name: impl Into<String>,
        user_lock: bool,
    ) -> Self {
        Self {
            client,
            device_id: device_id.into(),
            friendly_name: friendly_name.into(),
            user_lock: RwLock::new(user_lock),
            model_name: RwLock::new(None),
            last_status: RwLock::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Model name captured from the most recent status response.
    pub fn model_name(&self) -> Option<String> {
        self.model_name.read().expect("model name lock poisoned").clone()
    }

    /// Whether charging is currently user-locked.
    pub fn user_lock(&self) -> bool {
        *self.user_lock.read().expect("user lock poisoned")
    }

    /// Close the underlying client. Call once during shutdown.
    pub async fn close(&self) {
        self.client.close().await;
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Reset an RCM fault on the device.
    pub async fn reset_rcm(&self) -> bool {
        debug!("resetting RCM for device {} ({})", self.device_id, self.friendly_name);
        let success = self.run_command("rcmReset").await;
        if !success {
            warn!("failed to reset RCM for device {} ({})", self.device_id, self.friendly_name);
        }
        success
    }

    /// Enable charging by releasing the user lock.
    pub async fn enable(&self) -> bool {
        debug!("enabling charging for device {} ({})", self.device_id, self.friendly_name);
        let success = self.run_command("userUnlock").await;
        if success {
            *self.user_lock.write().expect("user lock poisoned") = false;
        } else {
            warn!("failed to enable charging for device {} ({})", self.device_id, self.friendly_name);
        }
        success
    }

    /// Disable charging by engaging the user lock.
    pub async fn disable(&self) -> bool {
        debug!("disabling charging for device {} ({})", self.device_id, self.friendly_name);
        let success = self.run_command("userLock").await;
        if success {
            *self.user_lock.write().expect("user lock poisoned") = true;
        } else {
            warn!("failed to disable charging for device {} ({})", self.device_id, self.friendly_name);
        }
        success
    }

    /// Disable every charging schedule on the device.
    pub async fn disable_all_schedules(&self) -> bool {
        debug!("disabling all schedules for device {}", self.device_id);

        let result = self
            .client
            .execute_mutation(
                "setAllSchedulesDisabled",
                queries::DISABLE_ALL_SCHEDULES,
                Some(json!({ "deviceId": self.device_id })),
            )
            .await;

        match result {
            Ok(data) => {
                debug!("disable all schedules response: {data}");
                true
            }
            Err(_) => false,
        }
    }

    async fn run_command(&self, function: &str) -> bool {
        debug!("sending command {function} for device {}", self.device_id);

        let result = self
            .client
            .execute_mutation(
                "runAEVCommand",
                queries::RUN_COMMAND,
                Some(json!({
                    "deviceId": self.device_id,
                    "functionName": function,
                })),
            )
            .await;

        match result {
            Ok(data) => {
                debug!("command response: {data}");
                true
            }
            Err(_) => false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Real-time device status, or `None` on any failure.
    pub async fn status(&self) -> Option<Value> {
        let result = self
            .client
            .execute_query(
                "getDeviceStatusSimple",
                queries::DEVICE_STATUS,
                Some(json!({ "id": self.device_id })),
            )
            .await
            .ok()?;

        self.extract_status(&result, "device status")
    }

    /// Detailed device status including diagnostics and schedules.
    pub async fn detailed_status(&self) -> Option<Value> {
        debug!("fetching detailed status for device {} ({})", self.device_id, self.friendly_name);

        let result = self
            .client
            .execute_query(
                "getDeviceStatus",
                queries::DEVICE_STATUS_DETAILED,
                Some(json!({ "id": self.device_id })),
            )
            .await
            .ok()?;

        self.extract_status(&result, "detailed device status")
    }

    /// Static device information (model, firmware, user lock).
    pub async fn device_info(&self) -> Option<Value> {
        debug!("fetching info for device {} ({})", self.device_id, self.friendly_name);

        let result = self
            .client
            .execute_query(
                "getDevice",
                queries::DEVICE_INFO,
                Some(json!({ "id": self.device_id })),
            )
            .await
            .ok()?;

        let Some(device) = result.get("getDevice") else {
            warn!("invalid response format from device info request");
            return None;
        };
        Some(device.clone())
    }

    /// Totals for the most recent charge session with at least 0.5 kWh
    /// delivered, or `None` if no such log exists.
    pub async fn last_charge(&self) -> Option<ChargeSummary> {
        let result = self
            .client
            .execute_query(
                "getDeviceCalculatedChargeLogs",
                queries::DEVICE_CHARGE_LOGS,
                Some(json!({
                    "id": self.device_id,
                    "offset": 0,
                    "limit": 1,
                    "minEnergy": 0.5,
                })),
            )
            .await
            .ok()?;

        let Some(logs) = result
            .get("getDevice")
            .and_then(|d| d.get("deviceCalculatedChargeLogs"))
            .and_then(Value::as_array)
        else {
            warn!("invalid response format from last charge request");
            return None;
        };

        let Some(latest) = logs.first() else {
            debug!("no charge logs available for device {}", self.friendly_name);
            return None;
        };

        match serde_json::from_value(latest.clone()) {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!("malformed charge log for {}: {err}", self.friendly_name);
                None
            }
        }
    }

    /// Pull `getDevice.deviceStatus` out of a response, remember the model
    /// name, and log EVSE-state / online transitions.
    fn extract_status(&self, result: &Value, context: &str) -> Option<Value> {
        let Some(device) = result.get("getDevice") else {
            warn!("invalid response format from {context} request");
            return None;
        };
        let Some(status) = device.get("deviceStatus") else {
            warn!("invalid response format from {context} request");
            return None;
        };

        if let Some(name) = device.get("name").and_then(Value::as_str) {
            *self.model_name.write().expect("model name lock poisoned") = Some(name.to_owned());
        }

        self.log_status_transitions(status);
        *self.last_status.write().expect("last status lock poisoned") = Some(status.clone());
        Some(status.clone())
    }

    fn log_status_transitions(&self, status: &Value) {
        let last = self.last_status.read().expect("last status lock poisoned");
        let Some(last) = last.as_ref() else {
            return;
        };

        let changed = |key: &str| match (last.get(key), status.get(key)) {
            (Some(old), Some(new)) if old != new => Some((old.clone(), new.clone())),
            _ => None,
        };

        if let Some((old, new)) = changed("evseState") {
            info!("device {}: EVSE state changed from {old} to {new}", self.friendly_name);
        }
        if let Some((old, new)) = changed("online") {
            info!("device {}: online state changed from {old} to {new}", self.friendly_name);
        }
    }
}
