//! GraphQL operation documents for the Konnect API.
//!
//! The documents are caller-supplied opaque strings as far as the client
//! core is concerned; they only get meaning in [`crate::device`].

/// Default Konnect GraphQL endpoint.
pub const GRAPHQL_URL: &str = "https://graphql.andersen-ev.com/graphql";

/// Run a named command function on a charger.
pub const RUN_COMMAND: &str = "\
mutation runAEVCommand($deviceId: ID!, $functionName: String!) {
  runAEVCommand(deviceId: $deviceId, functionName: $functionName) {
    id
    name
    return_value
  }
}";

/// Disable every charging schedule on a charger.
pub const DISABLE_ALL_SCHEDULES: &str = "\
mutation setAllSchedulesDisabled($deviceId: ID!) {
  setAllSchedulesDisabled(deviceId: $deviceId) {
    id
    name
    return_value
  }
}";

/// Real-time status, reduced to the fields polled every cycle.
pub const DEVICE_STATUS: &str = "\
query getDeviceStatusSimple($id: ID!) {
  getDevice(id: $id) {
    id
    name
    deviceStatus {
      online
      evseState
      chargeStatus {
        chargePower
        chargeEnergyTotal
        duration
      }
    }
  }
}";

/// Full status including network diagnostics and schedule state.
pub const DEVICE_STATUS_DETAILED: &str = "\
query getDeviceStatus($id: ID!) {
  getDevice(id: $id) {
    id
    name
    deviceStatus {
      online
      evseState
      sysRssi
      sysSSID
      solarMaxGridChargePercent
      scheduleSlotsArray {
        enabled
        startTime
        endTime
      }
      chargeStatus {
        start
        chargePower
        chargeEnergyTotal
        duration
      }
    }
  }
}";

/// Static device information (model, firmware, user lock).
pub const DEVICE_INFO: &str = "\
query getDevice($id: ID!) {
  getDevice(id: $id) {
    id
    name
    friendlyName
    userLock
    firmwareVersion
    latestFirmwareVersion
  }
}";

/// Calculated charge logs, newest first.
pub const DEVICE_CHARGE_LOGS: &str = "\
query getDeviceCalculatedChargeLogs($id: ID!, $offset: Int, $limit: Int, $minEnergy: Float) {
  getDevice(id: $id) {
    id
    deviceCalculatedChargeLogs(offset: $offset, limit: $limit, minEnergy: $minEnergy) {
      duration
      chargeCostTotal
      chargeEnergyTotal
      gridCostTotal
      gridEnergyTotal
      solarEnergyTotal
      solarCostTotal
      surplusUsedCostTotal
      surplusUsedEnergyTotal
    }
  }
}";
