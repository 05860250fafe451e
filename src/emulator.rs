use crate::envelope::{self, Envelope};
use crate::error::{Result, SimError};
use crate::generator::SimulationContext;
use crate::profile::{DeviceInstance, DeviceProfile, Gateway};
use crate::scenario::{ScenarioCatalog, SCENARIO_NORMAL};
use crate::scheduler::{EmissionScheduler, StartOptions};
use crate::state::DeviceStateStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_INTERVAL_SECONDS: u64 = 60;

/// Organizational identity shared by every device in the emulated fleet.
#[derive(Debug, Clone)]
pub struct FleetIdentity {
    pub organization_id: String,
    pub site_id: String,
    pub unit_id: String,
    pub application_id: String,
}

/// External network sink for finished envelopes.
///
/// The core performs no retries; delivery retry/backoff policy belongs
/// entirely to the implementor.
pub trait UplinkSink: Send + Sync {
    fn deliver(&self, envelope: &Envelope, application_id: &str) -> Result<()>;
}

/// Orchestrates the emission pipeline for a fleet of emulated devices:
/// state fetch → generate/compose → envelope build → state commit → sink.
///
/// Profiles and devices are registered up front; after that the emulator
/// is shared behind an `Arc` and every emission runs against the injected
/// state store. A failed emission for one device never affects another
/// device's scheduling, and a device's stored counters only advance after
/// its pipeline ran to completion.
pub struct DeviceEmulator {
    identity: FleetIdentity,
    gateways: Vec<Gateway>,
    profiles: HashMap<String, DeviceProfile>,
    devices: HashMap<String, DeviceInstance>,
    catalog: ScenarioCatalog,
    store: Arc<DeviceStateStore>,
    scheduler: EmissionScheduler,
    sink: Arc<dyn UplinkSink>,
}

impl DeviceEmulator {
    pub fn new(
        identity: FleetIdentity,
        gateways: Vec<Gateway>,
        sink: Arc<dyn UplinkSink>,
    ) -> Self {
        Self {
            identity,
            gateways,
            profiles: HashMap::new(),
            devices: HashMap::new(),
            catalog: ScenarioCatalog::new(),
            store: Arc::new(DeviceStateStore::new()),
            scheduler: EmissionScheduler::new(),
            sink,
        }
    }

    /// Register a device profile after checking its invariants.
    pub fn register_profile(&mut self, profile: DeviceProfile) -> Result<()> {
        profile.validate()?;
        self.profiles.insert(profile.id.clone(), profile);
        Ok(())
    }

    /// Register a device instance; its profile must already be registered.
    pub fn register_device(&mut self, device: DeviceInstance) -> Result<()> {
        if !self.profiles.contains_key(&device.profile_id) {
            return Err(SimError::Configuration(format!(
                "device '{}' references unknown profile '{}'",
                device.id, device.profile_id
            )));
        }
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub fn catalog_mut(&mut self) -> &mut ScenarioCatalog {
        &mut self.catalog
    }

    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    pub fn state_store(&self) -> &Arc<DeviceStateStore> {
        &self.store
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn device(&self, device_id: &str) -> Result<&DeviceInstance> {
        self.devices
            .get(device_id)
            .ok_or_else(|| SimError::DeviceNotFound(device_id.to_string()))
    }

    pub fn profile(&self, profile_id: &str) -> Result<&DeviceProfile> {
        self.profiles.get(profile_id).ok_or_else(|| {
            SimError::Configuration(format!("unknown profile '{profile_id}'"))
        })
    }

    fn profile_for(&self, device: &DeviceInstance) -> Result<&DeviceProfile> {
        self.profiles.get(&device.profile_id).ok_or_else(|| {
            SimError::Configuration(format!(
                "device '{}' references unknown profile '{}'",
                device.id, device.profile_id
            ))
        })
    }

    fn context_for(&self, device_id: &str, emission_seq: u64) -> SimulationContext {
        SimulationContext {
            organization_id: self.identity.organization_id.clone(),
            site_id: self.identity.site_id.clone(),
            unit_id: self.identity.unit_id.clone(),
            device_instance_id: device_id.to_string(),
            emission_seq,
        }
    }

    /// Run the full pipeline once for a device under the given scenario.
    ///
    /// State commits only after the envelope was built; on any failure the
    /// device's stored counters are untouched.
    pub fn emit_once(&self, device_id: &str, scenario_id: &str) -> Result<Envelope> {
        let device = self.device(device_id)?;
        let profile = self.profile_for(device)?;

        let state = self.store.get_or_create(device_id, &profile.id);
        let ctx = self.context_for(device_id, state.emission_seq + 1);
        let composed = self.catalog.compose(profile, device, scenario_id, &state, &ctx)?;
        let envelope = envelope::build(
            device,
            &self.gateways,
            &composed.fields,
            profile,
            &composed.state,
            &self.identity.application_id,
            composed.signal.as_ref(),
        )?;
        self.store.update(composed.state);

        info!(
            device_id,
            scenario = scenario_id,
            f_cnt = envelope.uplink_message.f_cnt,
            fields = envelope.uplink_message.decoded_payload.len(),
            "emitted uplink"
        );
        self.sink.deliver(&envelope, &self.identity.application_id)?;
        Ok(envelope)
    }

    /// Run the pipeline once with a named alarm trigger's overrides.
    /// Unknown trigger ids fail loudly, leaving state untouched.
    pub fn emit_alarm(&self, device_id: &str, trigger_id: &str) -> Result<Envelope> {
        let device = self.device(device_id)?;
        let profile = self.profile_for(device)?;

        let state = self.store.get_or_create(device_id, &profile.id);
        let ctx = self.context_for(device_id, state.emission_seq + 1);
        let composed =
            self.catalog.compose_alarm(profile, device, trigger_id, &state, &ctx)?;
        let envelope = envelope::build(
            device,
            &self.gateways,
            &composed.fields,
            profile,
            &composed.state,
            &self.identity.application_id,
            composed.signal.as_ref(),
        )?;
        self.store.update(composed.state);

        info!(
            device_id,
            trigger = trigger_id,
            f_cnt = envelope.uplink_message.f_cnt,
            "emitted alarm uplink"
        );
        self.sink.deliver(&envelope, &self.identity.application_id)?;
        Ok(envelope)
    }

    /// Start periodic `normal` emissions for one device. An emission
    /// failure is logged and does not stop the timer or touch other
    /// devices.
    pub fn start_device(
        self: &Arc<Self>,
        device_id: &str,
        options: StartOptions,
    ) -> Result<()> {
        let device = self.device(device_id)?;
        let interval = Duration::from_secs(
            device.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS),
        );

        let emulator = Arc::clone(self);
        let id = device_id.to_string();
        self.scheduler.start_device(device_id, interval, options, move || {
            if let Err(error) = emulator.emit_once(&id, SCENARIO_NORMAL) {
                warn!(device_id = %id, %error, "emission failed");
            }
        });
        Ok(())
    }

    /// Start every registered device on its own interval.
    pub fn start_all(self: &Arc<Self>, options: StartOptions) -> Result<()> {
        for device_id in self.device_ids() {
            self.start_device(&device_id, options)?;
        }
        Ok(())
    }

    pub fn is_running(&self, device_id: &str) -> bool {
        self.scheduler.is_running(device_id)
    }

    pub fn stop_device(&self, device_id: &str) -> bool {
        self.scheduler.stop_device(device_id)
    }

    pub fn stop_all(&self) {
        self.scheduler.stop_all();
    }
}
