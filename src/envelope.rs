use crate::error::{Result, SimError};
use crate::profile::{DeviceInstance, DeviceProfile, FieldMap, Gateway};
use crate::scenario::SignalOverrides;
use crate::state::DeviceSimulationState;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Stable prefix for derived device identifiers.
const DEVICE_ID_PREFIX: &str = "eui-";

pub const RSSI_MIN: i32 = -120;
pub const RSSI_MAX: i32 = -30;
pub const SNR_MIN: f64 = -20.0;
pub const SNR_MAX: f64 = 15.0;

/// Fixed round-trippable receipt timestamp format: UTC, millisecond
/// precision, `Z`-suffixed.
pub mod ts_millis {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIds {
    pub application_id: String,
}

/// Device identity block of the uplink envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndDeviceIds {
    /// Derived, stable: `eui-` + lowercase hardware EUI.
    pub device_id: String,
    /// 16 uppercase hexadecimal characters.
    pub dev_eui: String,
    pub application_ids: ApplicationIds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayIds {
    pub gateway_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eui: Option<String>,
}

/// One radio-reception record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxMetadata {
    pub gateway_ids: GatewayIds,
    pub rssi: i32,
    pub snr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkMessage {
    pub f_port: u8,
    pub f_cnt: u32,
    pub decoded_payload: FieldMap,
    /// Opaque, losslessly-decodable encoding of `decoded_payload`.
    pub frm_payload: String,
    pub rx_metadata: Vec<RxMetadata>,
}

/// Wire-format uplink envelope handed to the network sink.
///
/// Constructed fresh per emission; never mutated afterwards and never
/// persisted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub end_device_ids: EndDeviceIds,
    #[serde(with = "ts_millis")]
    pub received_at: DateTime<Utc>,
    pub uplink_message: UplinkMessage,
}

/// Normalize a hardware identifier to canonical 16-character uppercase hex.
/// Common separators (`:`, `-`, whitespace) are stripped first.
pub fn normalize_dev_eui(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
        .collect();
    if cleaned.len() != 16 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SimError::Validation(format!(
            "malformed hardware identifier '{raw}': expected 16 hex characters"
        )));
    }
    Ok(cleaned.to_ascii_uppercase())
}

/// Derive the stable device identifier from a normalized EUI. Identical
/// hardware id always yields the identical identifier.
pub fn derive_device_id(dev_eui: &str) -> String {
    format!("{DEVICE_ID_PREFIX}{}", dev_eui.to_ascii_lowercase())
}

/// Encode the decoded field map as base64 over its canonical JSON bytes.
pub fn encode_frm_payload(fields: &FieldMap) -> Result<String> {
    let json = serde_json::to_vec(fields)?;
    Ok(STANDARD.encode(json))
}

/// Recover the field map from a `frm_payload` produced by
/// [`encode_frm_payload`].
pub fn decode_frm_payload(encoded: &str) -> Result<FieldMap> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| SimError::Validation(format!("frm_payload is not valid base64: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn fnv1a64(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Synthesize one reception record per gateway.
///
/// Signal values are seeded from device identity, gateway identity, and
/// the frame counter, so repeated builds of the same emission agree.
/// Scenario overrides are used verbatim, even outside the typical range.
fn rx_metadata_for(
    dev_eui: &str,
    f_cnt: u32,
    gateways: &[Gateway],
    signal: Option<&SignalOverrides>,
) -> Vec<RxMetadata> {
    gateways
        .iter()
        .map(|gateway| {
            let mut h = fnv1a64(0xcbf2_9ce4_8422_2325, dev_eui.as_bytes());
            h = fnv1a64(h, gateway.gateway_id.as_bytes());
            h = fnv1a64(h, &f_cnt.to_le_bytes());
            let mut rng = ChaCha8Rng::seed_from_u64(h);

            let rssi = signal
                .and_then(|s| s.rssi)
                .unwrap_or_else(|| rng.gen_range(RSSI_MIN..=RSSI_MAX));
            let snr = signal.and_then(|s| s.snr).unwrap_or_else(|| {
                // One decimal, matching what real gateways report.
                (rng.gen_range(SNR_MIN..=SNR_MAX) * 10.0).round() / 10.0
            });

            RxMetadata {
                gateway_ids: GatewayIds {
                    gateway_id: gateway.gateway_id.clone(),
                    eui: gateway.eui.clone(),
                },
                rssi,
                snr,
            }
        })
        .collect()
}

/// Assemble the wire-format envelope for one emission.
///
/// `state.f_cnt` is stamped as-is: callers increment (via the generator or
/// the state store) before building when "this call is emission N"
/// semantics are desired. `fields` lands in `decoded_payload` unchanged.
pub fn build(
    device: &DeviceInstance,
    gateways: &[Gateway],
    fields: &FieldMap,
    profile: &DeviceProfile,
    state: &DeviceSimulationState,
    application_id: &str,
    signal: Option<&SignalOverrides>,
) -> Result<Envelope> {
    if gateways.is_empty() {
        return Err(SimError::Validation(
            "at least one gateway is required for rx_metadata".to_string(),
        ));
    }

    let dev_eui = normalize_dev_eui(&device.hardware_id)?;
    let rx_metadata = rx_metadata_for(&dev_eui, state.f_cnt, gateways, signal);

    Ok(Envelope {
        end_device_ids: EndDeviceIds {
            device_id: derive_device_id(&dev_eui),
            dev_eui,
            application_ids: ApplicationIds { application_id: application_id.to_string() },
        },
        received_at: Utc::now(),
        uplink_message: UplinkMessage {
            f_port: profile.default_f_port,
            f_cnt: state.f_cnt,
            decoded_payload: fields.clone(),
            frm_payload: encode_frm_payload(fields)?,
            rx_metadata,
        },
    })
}
