use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single generated or overridden field value.
///
/// Untagged so that decoded payloads serialize as plain JSON scalars.
/// Variant order matters for deserialization: integers must be tried
/// before floats or every whole number would come back as `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// Ordered field map used for decoded payloads and overrides.
///
/// A `BTreeMap` keeps iteration deterministic, which the generator's
/// reproducibility contract depends on.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Declarative generation rule for one emitted field.
///
/// Closed tagged union: the generator matches exhaustively, so bounds and
/// validation logic stay centralized here rather than spread across
/// subclass-style hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldSpec {
    Float {
        min: f64,
        max: f64,
        /// Maximum random-walk step per emission. When set, the next value
        /// drifts from the previous one instead of being drawn fresh.
        #[serde(default)]
        drift: Option<f64>,
        /// Drive the value from a monotonic named counter instead of the RNG.
        #[serde(default)]
        increment: bool,
    },
    Int {
        min: i64,
        max: i64,
        #[serde(default)]
        drift: Option<i64>,
        #[serde(default)]
        increment: bool,
    },
    Bool {
        /// Probability of `true`, defaults to 0.5.
        #[serde(default)]
        probability: Option<f64>,
    },
    Enum {
        values: Vec<String>,
        /// Optional selection weights, parallel to `values`.
        #[serde(default)]
        weights: Option<Vec<u32>>,
    },
    #[serde(rename = "string")]
    Str {
        #[serde(default)]
        default: Option<String>,
    },
    /// Never varies; `default` is emitted verbatim on every emission.
    Static { default: FieldValue },
}

/// Declarative description of a device model's emitted fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: String,
    /// Default LoRaWAN FPort stamped on every uplink built from this profile.
    pub default_f_port: u8,
    pub fields: BTreeMap<String, FieldSpec>,
}

impl DeviceProfile {
    /// Check the invariants the generator relies on.
    ///
    /// Profiles arrive pre-validated from the external profile source; this
    /// re-checks only what the core's own invariants need (min <= max,
    /// non-empty enums, sane weights and probabilities).
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in &self.fields {
            match spec {
                FieldSpec::Float { min, max, drift, .. } => {
                    if min > max {
                        return Err(SimError::Configuration(format!(
                            "field '{name}': min {min} > max {max}"
                        )));
                    }
                    if drift.is_some_and(|d| d < 0.0 || !d.is_finite()) {
                        return Err(SimError::Configuration(format!(
                            "field '{name}': drift must be finite and non-negative"
                        )));
                    }
                }
                FieldSpec::Int { min, max, drift, .. } => {
                    if min > max {
                        return Err(SimError::Configuration(format!(
                            "field '{name}': min {min} > max {max}"
                        )));
                    }
                    if drift.is_some_and(|d| d < 0) {
                        return Err(SimError::Configuration(format!(
                            "field '{name}': drift must be non-negative"
                        )));
                    }
                }
                FieldSpec::Bool { probability } => {
                    if probability.is_some_and(|p| !(0.0..=1.0).contains(&p)) {
                        return Err(SimError::Configuration(format!(
                            "field '{name}': probability must be within [0, 1]"
                        )));
                    }
                }
                FieldSpec::Enum { values, weights } => {
                    if values.is_empty() {
                        return Err(SimError::Configuration(format!(
                            "field '{name}': enum requires at least one value"
                        )));
                    }
                    if let Some(w) = weights {
                        if w.len() != values.len() {
                            return Err(SimError::Configuration(format!(
                                "field '{name}': {} weights for {} values",
                                w.len(),
                                values.len()
                            )));
                        }
                        if w.iter().all(|&x| x == 0) {
                            return Err(SimError::Configuration(format!(
                                "field '{name}': enum weights must not all be zero"
                            )));
                        }
                    }
                }
                FieldSpec::Str { .. } | FieldSpec::Static { .. } => {}
            }
        }
        Ok(())
    }
}

/// One emulated device, bound to a profile by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInstance {
    pub id: String,
    /// Raw hardware EUI as supplied by the inventory; any common textual
    /// formatting is accepted and normalized by the envelope builder.
    pub hardware_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Declared example payload merged on top of the generic `alarm`
    /// scenario overrides when that scenario is composed.
    #[serde(default)]
    pub example_alarm_payload: Option<FieldMap>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
}

/// Gateway identity carried on each rx_metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    pub gateway_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eui: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_spec(min: f64, max: f64) -> FieldSpec {
        FieldSpec::Float { min, max, drift: None, increment: false }
    }

    fn profile_with(name: &str, spec: FieldSpec) -> DeviceProfile {
        let mut fields = BTreeMap::new();
        fields.insert(name.to_string(), spec);
        DeviceProfile { id: "test-profile".into(), default_f_port: 2, fields }
    }

    #[test]
    fn valid_profile_passes() {
        assert!(profile_with("temperature", float_spec(-40.0, 85.0))
            .validate()
            .is_ok());
    }

    #[test]
    fn inverted_bounds_rejected() {
        let err = profile_with("temperature", float_spec(10.0, -10.0))
            .validate()
            .unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn empty_enum_rejected() {
        let profile =
            profile_with("mode", FieldSpec::Enum { values: vec![], weights: None });
        assert!(profile.validate().is_err());
    }

    #[test]
    fn mismatched_weights_rejected() {
        let profile = profile_with(
            "mode",
            FieldSpec::Enum {
                values: vec!["a".into(), "b".into()],
                weights: Some(vec![1]),
            },
        );
        assert!(profile.validate().is_err());
    }

    #[test]
    fn out_of_range_probability_rejected() {
        let profile =
            profile_with("moving", FieldSpec::Bool { probability: Some(1.5) });
        assert!(profile.validate().is_err());
    }

    #[test]
    fn field_spec_parses_from_tagged_json() {
        let json = r#"{
            "id": "soil-sensor",
            "default_f_port": 2,
            "fields": {
                "moisture": { "kind": "float", "min": 0.0, "max": 100.0, "drift": 2.5 },
                "pulses": { "kind": "int", "min": 0, "max": 1000000, "increment": true },
                "mode": { "kind": "enum", "values": ["idle", "active"] },
                "fw": { "kind": "static", "default": "1.4.2" }
            }
        }"#;
        let profile: DeviceProfile = serde_json::from_str(json).unwrap();
        assert!(profile.validate().is_ok());
        assert!(matches!(
            profile.fields["pulses"],
            FieldSpec::Int { increment: true, .. }
        ));
        assert!(matches!(
            profile.fields["fw"],
            FieldSpec::Static { default: FieldValue::Str(_) }
        ));
    }

    #[test]
    fn field_values_deserialize_untagged() {
        let v: FieldValue = serde_json::from_str("5").unwrap();
        assert_eq!(v, FieldValue::Int(5));
        let v: FieldValue = serde_json::from_str("5.5").unwrap();
        assert_eq!(v, FieldValue::Float(5.5));
        let v: FieldValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, FieldValue::Bool(true));
    }
}
