use crate::error::{Result, SimError};
use crate::generator::{generate, SimulationContext};
use crate::profile::{DeviceInstance, DeviceProfile, FieldMap, FieldSpec, FieldValue};
use crate::state::DeviceSimulationState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SCENARIO_NORMAL: &str = "normal";
pub const SCENARIO_ALARM: &str = "alarm";
pub const SCENARIO_LOW_BATTERY: &str = "low_battery";
pub const SCENARIO_POOR_SIGNAL: &str = "poor_signal";

/// Signal-quality overrides applied at the envelope layer only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalOverrides {
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub snr: Option<f64>,
}

/// Condition a device must satisfy to support a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioPrecondition {
    Category { category: String },
    HasField { field: String },
}

/// A named, reusable set of field overrides representing an operating
/// condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub field_overrides: FieldMap,
    #[serde(default)]
    pub signal: Option<SignalOverrides>,
    #[serde(default)]
    pub precondition: Option<ScenarioPrecondition>,
}

/// A named override set for a specific alert condition, distinct from a
/// device's declared example alarm payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmTrigger {
    pub id: String,
    pub field_overrides: FieldMap,
}

/// Result of composing a scenario or alarm on top of the generated
/// baseline.
#[derive(Debug, Clone)]
pub struct Composition {
    pub fields: FieldMap,
    pub state: DeviceSimulationState,
    pub signal: Option<SignalOverrides>,
    pub alarm: bool,
}

/// Registry of scenarios and alarm triggers.
///
/// Always ships the four baseline scenarios; custom scenarios and triggers
/// can be registered on top. Lookups of unknown ids fail loudly rather
/// than falling back to `normal`.
#[derive(Debug)]
pub struct ScenarioCatalog {
    scenarios: BTreeMap<String, Scenario>,
    triggers: BTreeMap<String, AlarmTrigger>,
}

impl Default for ScenarioCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioCatalog {
    pub fn new() -> Self {
        let mut catalog =
            Self { scenarios: BTreeMap::new(), triggers: BTreeMap::new() };
        for scenario in baseline_scenarios() {
            catalog.add_scenario(scenario);
        }
        catalog
    }

    pub fn add_scenario(&mut self, scenario: Scenario) {
        self.scenarios.insert(scenario.id.clone(), scenario);
    }

    pub fn add_trigger(&mut self, trigger: AlarmTrigger) {
        self.triggers.insert(trigger.id.clone(), trigger);
    }

    pub fn scenario(&self, id: &str) -> Result<&Scenario> {
        self.scenarios
            .get(id)
            .ok_or_else(|| SimError::ScenarioNotFound(id.to_string()))
    }

    pub fn trigger(&self, id: &str) -> Result<&AlarmTrigger> {
        self.triggers
            .get(id)
            .ok_or_else(|| SimError::TriggerNotFound(id.to_string()))
    }

    /// Pure support predicate: a device supports a scenario when the
    /// scenario declares no precondition or the device satisfies it.
    pub fn device_supports_scenario(
        &self,
        device: &DeviceInstance,
        profile: &DeviceProfile,
        scenario_id: &str,
    ) -> bool {
        let Ok(scenario) = self.scenario(scenario_id) else {
            return false;
        };
        match &scenario.precondition {
            None => true,
            Some(ScenarioPrecondition::Category { category }) => {
                device.category.as_deref() == Some(category.as_str())
            }
            Some(ScenarioPrecondition::HasField { field }) => {
                profile.fields.contains_key(field)
            }
        }
    }

    /// Every scenario the device supports. Always includes the four
    /// baselines, and every returned scenario satisfies
    /// [`Self::device_supports_scenario`].
    pub fn device_scenarios(
        &self,
        device: &DeviceInstance,
        profile: &DeviceProfile,
    ) -> Vec<&Scenario> {
        self.scenarios
            .values()
            .filter(|s| self.device_supports_scenario(device, profile, &s.id))
            .collect()
    }

    /// Generate the baseline and overlay the scenario's overrides.
    ///
    /// Overlays are an ordered list merged left-to-right: scenario
    /// overrides first, then (for `alarm`) the device's declared example
    /// alarm payload, which wins on overlapping keys. A single clamp and
    /// validation pass runs after all overlays.
    pub fn compose(
        &self,
        profile: &DeviceProfile,
        device: &DeviceInstance,
        scenario_id: &str,
        state: &DeviceSimulationState,
        ctx: &SimulationContext,
    ) -> Result<Composition> {
        let scenario = self.scenario(scenario_id)?;
        let generated = generate(profile, state, ctx)?;
        let mut fields = generated.fields;

        let mut layers: Vec<&FieldMap> = vec![&scenario.field_overrides];
        let is_alarm = scenario.id == SCENARIO_ALARM;
        if is_alarm {
            if let Some(example) = &device.example_alarm_payload {
                layers.push(example);
            }
        }
        apply_overlays(&mut fields, &layers);
        clamp_fields(profile, &mut fields)?;

        Ok(Composition {
            fields,
            state: generated.state,
            signal: scenario.signal.clone(),
            alarm: is_alarm,
        })
    }

    /// Generate the baseline and overlay a named alarm trigger's overrides.
    /// Unknown trigger ids fail with [`SimError::TriggerNotFound`].
    pub fn compose_alarm(
        &self,
        profile: &DeviceProfile,
        device: &DeviceInstance,
        trigger_id: &str,
        state: &DeviceSimulationState,
        ctx: &SimulationContext,
    ) -> Result<Composition> {
        let trigger = self.trigger(trigger_id)?;
        let generated = generate(profile, state, ctx)?;
        let mut fields = generated.fields;

        let mut layers: Vec<&FieldMap> = vec![&trigger.field_overrides];
        if let Some(example) = &device.example_alarm_payload {
            layers.push(example);
        }
        apply_overlays(&mut fields, &layers);
        clamp_fields(profile, &mut fields)?;

        Ok(Composition { fields, state: generated.state, signal: None, alarm: true })
    }
}

fn apply_overlays(fields: &mut FieldMap, layers: &[&FieldMap]) {
    for layer in layers {
        for (key, value) in layer.iter() {
            fields.insert(key.clone(), value.clone());
        }
    }
}

/// Final clamp and validation pass over a composed field map.
///
/// Numeric overrides may intentionally land outside the declared range
/// (forcing "at max" conditions); the observable value is clamped back
/// into `[min, max]`. Enum overrides must remain a declared value, and int
/// fields must stay integral — both are validation failures, not coercions.
fn clamp_fields(profile: &DeviceProfile, fields: &mut FieldMap) -> Result<()> {
    for (name, value) in fields.iter_mut() {
        let Some(spec) = profile.fields.get(name) else {
            // Keys introduced by overrides without a spec pass through.
            continue;
        };
        match spec {
            FieldSpec::Float { min, max, .. } => {
                let numeric = value.as_f64().ok_or_else(|| {
                    SimError::Validation(format!(
                        "field '{name}': non-numeric value for float field"
                    ))
                })?;
                *value = FieldValue::Float(numeric.clamp(*min, *max));
            }
            FieldSpec::Int { min, max, .. } => match value {
                FieldValue::Int(v) => *value = FieldValue::Int((*v).clamp(*min, *max)),
                other => {
                    return Err(SimError::Validation(format!(
                        "field '{name}': int field requires an integral value, got {other:?}"
                    )))
                }
            },
            FieldSpec::Bool { .. } => {
                if !matches!(value, FieldValue::Bool(_)) {
                    return Err(SimError::Validation(format!(
                        "field '{name}': bool field requires a boolean value"
                    )));
                }
            }
            FieldSpec::Enum { values, .. } => match value {
                FieldValue::Str(v) if values.contains(v) => {}
                other => {
                    return Err(SimError::Validation(format!(
                        "field '{name}': {other:?} is not a declared enum value"
                    )))
                }
            },
            FieldSpec::Str { .. } | FieldSpec::Static { .. } => {}
        }
    }
    Ok(())
}

fn baseline_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            id: SCENARIO_NORMAL.into(),
            name: "Normal operation".into(),
            description: "Baseline readings with no overrides".into(),
            field_overrides: FieldMap::new(),
            signal: None,
            precondition: None,
        },
        Scenario {
            id: SCENARIO_ALARM.into(),
            name: "Alarm condition".into(),
            description: "Generic alarm flag; device example payloads take precedence"
                .into(),
            field_overrides: [("alarm".to_string(), FieldValue::Bool(true))]
                .into_iter()
                .collect(),
            signal: None,
            precondition: None,
        },
        Scenario {
            id: SCENARIO_LOW_BATTERY.into(),
            name: "Low battery".into(),
            description: "Battery level forced to the bottom of its range".into(),
            field_overrides: [("battery".to_string(), FieldValue::Int(1))]
                .into_iter()
                .collect(),
            signal: None,
            precondition: None,
        },
        Scenario {
            id: SCENARIO_POOR_SIGNAL.into(),
            name: "Poor signal".into(),
            description: "Degraded radio link quality on every reception record"
                .into(),
            field_overrides: FieldMap::new(),
            signal: Some(SignalOverrides { rssi: Some(-115), snr: Some(-18.0) }),
            precondition: None,
        },
    ]
}
