use crate::error::Result;
use crate::profile::{DeviceProfile, FieldMap, FieldSpec, FieldValue};
use crate::state::DeviceSimulationState;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const LANE_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

const DEFAULT_TRUE_PROBABILITY: f64 = 0.5;

/// Immutable per-call generation context.
///
/// Every attribute feeds the seed: identical contexts (plus identical
/// profile and prior state) always yield identical fields, and changing
/// any single attribute changes the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationContext {
    pub organization_id: String,
    pub site_id: String,
    pub unit_id: String,
    pub device_instance_id: String,
    /// 1-based, increases with each emission.
    pub emission_seq: u64,
}

/// Output of one generator run: the field map plus the advanced state copy
/// for the caller to commit.
#[derive(Debug, Clone)]
pub struct Generated {
    pub fields: FieldMap,
    pub state: DeviceSimulationState,
}

fn fnv1a64(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Fold every context attribute and the profile id into a 32-byte ChaCha8
/// seed. FNV-1a rather than the std hasher: the sequence must be stable
/// across processes and toolchain versions.
fn derive_seed(profile_id: &str, ctx: &SimulationContext) -> [u8; 32] {
    let mut seed = [0u8; 32];
    for lane in 0..4u64 {
        let mut h = FNV_OFFSET ^ lane.wrapping_mul(LANE_SALT);
        for part in [
            ctx.organization_id.as_str(),
            ctx.site_id.as_str(),
            ctx.unit_id.as_str(),
            ctx.device_instance_id.as_str(),
            profile_id,
        ] {
            h = fnv1a64(h, part.as_bytes());
            // Length-prefix framing so adjacent attributes cannot alias.
            h = fnv1a64(h, &(part.len() as u64).to_le_bytes());
        }
        h = fnv1a64(h, &ctx.emission_seq.to_le_bytes());
        seed[lane as usize * 8..][..8].copy_from_slice(&h.to_le_bytes());
    }
    seed
}

/// Generate baseline field values for one emission.
///
/// Pure: no I/O, no shared state. The input state is read-only; the
/// returned copy carries the advanced frame counter, named counters, and
/// drift history. Iteration follows the profile's ordered field map so the
/// RNG draw sequence is reproducible.
pub fn generate(
    profile: &DeviceProfile,
    state: &DeviceSimulationState,
    ctx: &SimulationContext,
) -> Result<Generated> {
    profile.validate()?;

    let mut rng = ChaCha8Rng::from_seed(derive_seed(&profile.id, ctx));
    let mut fields = FieldMap::new();
    let mut next = state.clone();
    next.f_cnt += 1;
    next.emission_seq = ctx.emission_seq;

    for (name, spec) in &profile.fields {
        let value = match spec {
            FieldSpec::Static { default } => default.clone(),

            FieldSpec::Str { default } => {
                FieldValue::Str(default.clone().unwrap_or_default())
            }

            FieldSpec::Bool { probability } => FieldValue::Bool(
                rng.gen_bool(probability.unwrap_or(DEFAULT_TRUE_PROBABILITY)),
            ),

            FieldSpec::Enum { values, weights } => {
                let choice = match weights {
                    Some(w) => {
                        let total: u64 = w.iter().map(|&x| u64::from(x)).sum();
                        let mut pick = rng.gen_range(0..total);
                        let mut index = 0;
                        for (i, &weight) in w.iter().enumerate() {
                            if pick < u64::from(weight) {
                                index = i;
                                break;
                            }
                            pick -= u64::from(weight);
                        }
                        index
                    }
                    None => rng.gen_range(0..values.len()),
                };
                FieldValue::Str(values[choice].clone())
            }

            FieldSpec::Float { min, max, drift, increment } => {
                if *increment {
                    let counter = next.counters.entry(name.clone()).or_insert(0);
                    *counter += 1;
                    FieldValue::Float((*counter as f64).clamp(*min, *max))
                } else {
                    let prev = state.last_values.get(name).and_then(FieldValue::as_f64);
                    let value = match (drift, prev) {
                        (Some(step), Some(prev)) => {
                            (prev + rng.gen_range(-step..=*step)).clamp(*min, *max)
                        }
                        _ => rng.gen_range(*min..=*max),
                    };
                    if drift.is_some() {
                        next.last_values
                            .insert(name.clone(), FieldValue::Float(value));
                    }
                    FieldValue::Float(value)
                }
            }

            FieldSpec::Int { min, max, drift, increment } => {
                if *increment {
                    let counter = next.counters.entry(name.clone()).or_insert(0);
                    *counter += 1;
                    FieldValue::Int((*counter).clamp(*min, *max))
                } else {
                    let prev = state.last_values.get(name).and_then(FieldValue::as_i64);
                    let value = match (drift, prev) {
                        (Some(step), Some(prev)) => {
                            (prev + rng.gen_range(-step..=*step)).clamp(*min, *max)
                        }
                        _ => rng.gen_range(*min..=*max),
                    };
                    if drift.is_some() {
                        next.last_values.insert(name.clone(), FieldValue::Int(value));
                    }
                    FieldValue::Int(value)
                }
            }
        };
        fields.insert(name.clone(), value);
    }

    Ok(Generated { fields, state: next })
}
