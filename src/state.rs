use crate::profile::FieldMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Per-device-instance simulation state.
///
/// Owned exclusively by the [`DeviceStateStore`]; the generator and
/// composer receive a copy and return an updated copy, so a failed
/// emission never leaves a half-advanced record behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSimulationState {
    pub device_instance_id: String,
    pub profile_id: String,
    /// Uplink frame counter. 0 before the first emission, 1 after it.
    pub f_cnt: u32,
    /// Named monotonic counters backing increment-flagged fields.
    pub counters: BTreeMap<String, i64>,
    /// Most recent emission sequence observed for this device.
    pub emission_seq: u64,
    /// Last generated value for each drift field.
    pub last_values: FieldMap,
}

impl DeviceSimulationState {
    pub fn new(device_instance_id: &str, profile_id: &str) -> Self {
        Self {
            device_instance_id: device_instance_id.to_string(),
            profile_id: profile_id.to_string(),
            f_cnt: 0,
            counters: BTreeMap::new(),
            emission_seq: 0,
            last_values: BTreeMap::new(),
        }
    }
}

/// Keyed registry of device simulation state.
///
/// Constructible and injectable rather than a true global singleton, so
/// tests can own a private store and reset it for hermeticity. All
/// operations are atomic per device key; unrelated keys never interact.
#[derive(Debug, Default)]
pub struct DeviceStateStore {
    records: Mutex<HashMap<String, DeviceSimulationState>>,
}

impl DeviceStateStore {
    pub fn new() -> Self {
        Self { records: Mutex::new(HashMap::new()) }
    }

    /// Return the stored state for the device, creating a fresh record at
    /// `f_cnt = 0` if none exists.
    pub fn get_or_create(
        &self,
        device_instance_id: &str,
        profile_id: &str,
    ) -> DeviceSimulationState {
        let mut records = self.records.lock().expect("state store poisoned");
        records
            .entry(device_instance_id.to_string())
            .or_insert_with(|| DeviceSimulationState::new(device_instance_id, profile_id))
            .clone()
    }

    /// Replace the stored record for the state's device instance.
    pub fn update(&self, state: DeviceSimulationState) {
        let mut records = self.records.lock().expect("state store poisoned");
        records.insert(state.device_instance_id.clone(), state);
    }

    /// Atomically increment the frame counter, returning the new value.
    /// The first call for a device yields 1.
    pub fn increment_f_cnt(&self, device_instance_id: &str, profile_id: &str) -> u32 {
        let mut records = self.records.lock().expect("state store poisoned");
        let record = records
            .entry(device_instance_id.to_string())
            .or_insert_with(|| DeviceSimulationState::new(device_instance_id, profile_id));
        record.f_cnt += 1;
        record.f_cnt
    }

    /// Atomically increment a named counter, returning the new value.
    /// Counters are independent per name and per device instance.
    pub fn increment_counter(
        &self,
        device_instance_id: &str,
        profile_id: &str,
        name: &str,
    ) -> i64 {
        let mut records = self.records.lock().expect("state store poisoned");
        let record = records
            .entry(device_instance_id.to_string())
            .or_insert_with(|| DeviceSimulationState::new(device_instance_id, profile_id));
        let counter = record.counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Current snapshot for a device, if one exists.
    pub fn snapshot(&self, device_instance_id: &str) -> Option<DeviceSimulationState> {
        let records = self.records.lock().expect("state store poisoned");
        records.get(device_instance_id).cloned()
    }

    /// Discard one device's record.
    pub fn reset(&self, device_instance_id: &str) {
        let mut records = self.records.lock().expect("state store poisoned");
        records.remove(device_instance_id);
    }

    /// Discard every record. Used between tests and when tearing down a
    /// fleet of stale emulated devices.
    pub fn clear_all(&self) {
        let mut records = self.records.lock().expect("state store poisoned");
        records.clear();
    }

    pub fn device_count(&self) -> usize {
        self.records.lock().expect("state store poisoned").len()
    }
}
