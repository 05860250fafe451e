//! # LoRaWAN Fleet Emulator
//!
//! A device-fleet emulation library for integration testing of telemetry
//! ingestion pipelines. Each emulated device produces believable, bounded,
//! reproducible readings on its own schedule, packaged into a
//! wire-compatible uplink envelope matching a network server's output.
//!
//! ## Features
//!
//! - **Deterministic field generation**: seeded per-context PRNG, drift
//!   walks, monotonic increment counters
//! - **Scenario and alarm composition**: baseline → scenario override →
//!   example-payload override, with a single final clamp pass
//! - **Wire-compatible envelopes**: TTN-style uplink JSON with normalized
//!   EUIs, frame counters, and per-gateway reception records
//! - **Independent emission scheduling**: one timer per device, restart-
//!   safe, stoppable as a fleet
//! - **Strict state isolation**: per-device-instance counters that never
//!   bleed across keys
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetsim::{DeviceEmulator, FleetIdentity, UplinkSink, Envelope};
//!
//! struct StdoutSink;
//!
//! impl UplinkSink for StdoutSink {
//!     fn deliver(&self, envelope: &Envelope, _application_id: &str) -> fleetsim::Result<()> {
//!         println!("{}", serde_json::to_string(envelope)?);
//!         Ok(())
//!     }
//! }
//!
//! let identity = FleetIdentity {
//!     organization_id: "org-1".into(),
//!     site_id: "site-1".into(),
//!     unit_id: "unit-1".into(),
//!     application_id: "app-ingest".into(),
//! };
//! let emulator = DeviceEmulator::new(identity, vec![], Arc::new(StdoutSink));
//! ```
//!
//! ## Architecture
//!
//! - [`profile`] - Device profiles, field specs, and fleet inventory types
//! - [`generator`] - Deterministic baseline field generation
//! - [`state`] - Per-device-instance simulation state registry
//! - [`scenario`] - Scenario/alarm catalog and override composition
//! - [`envelope`] - Wire-format uplink envelope assembly
//! - [`scheduler`] - Independent per-device emission timers
//! - [`emulator`] - Pipeline orchestrator and public API

pub mod emulator;
pub mod envelope;
pub mod error;
pub mod generator;
pub mod profile;
pub mod scenario;
pub mod scheduler;
pub mod state;

// Re-export main public types for convenience
pub use emulator::{DeviceEmulator, FleetIdentity, UplinkSink};
pub use envelope::Envelope;
pub use error::{Result, SimError};
pub use generator::SimulationContext;
pub use profile::{DeviceInstance, DeviceProfile, FieldSpec, FieldValue, Gateway};
pub use scenario::{AlarmTrigger, Scenario, ScenarioCatalog};
pub use scheduler::{EmissionScheduler, StartOptions};
pub use state::{DeviceSimulationState, DeviceStateStore};
