//! GATT identifier normalization
//!
//! Services and characteristics can be named by a full 128-bit UUID, by a
//! 16/32-bit alias of the Bluetooth Base UUID, or by an assigned name such as
//! `heart_rate`. The platform layer is case- and form-sensitive, so every
//! identifier is reduced to one [`CanonicalId`] before it leaves the crate:
//!
//! ```text
//! "0000180D-0000-1000-8000-00805F9B34FB" ─┐
//! "0x180D"                               ─┼─▶ "180d"
//! "heart_rate"                           ─┘
//! "C8C51726-81BC-483B-A052-F7A14EA3D281"  ──▶ "c8c51726-81bc-483b-a052-f7a14ea3d281"
//! ```

use crate::domain::error::{BluetoothError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Bluetooth Base UUID `00000000-0000-1000-8000-00805f9b34fb`
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

const ALIAS_SHIFT: u32 = 96;
const BASE_MASK: u128 = (1u128 << ALIAS_SHIFT) - 1;

/// Assigned GATT names accepted as aliases
const ASSIGNED_NAMES: &[(&str, u16)] = &[
    // Services
    ("generic_access", 0x1800),
    ("generic_attribute", 0x1801),
    ("immediate_alert", 0x1802),
    ("device_information", 0x180a),
    ("heart_rate", 0x180d),
    ("battery_service", 0x180f),
    ("running_speed_and_cadence", 0x1814),
    ("cycling_power", 0x1818),
    ("environmental_sensing", 0x181a),
    // Characteristics
    ("gap.device_name", 0x2a00),
    ("gap.appearance", 0x2a01),
    ("battery_level", 0x2a19),
    ("model_number_string", 0x2a24),
    ("serial_number_string", 0x2a25),
    ("firmware_revision_string", 0x2a26),
    ("manufacturer_name_string", 0x2a29),
    ("heart_rate_measurement", 0x2a37),
    ("body_sensor_location", 0x2a38),
    ("heart_rate_control_point", 0x2a39),
    ("temperature", 0x2a6e),
    ("humidity", 0x2a6f),
];

/// A service or characteristic identifier as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GattId {
    Uuid(Uuid),
    Alias(String),
}

impl GattId {
    /// Reduce to the platform-facing key
    pub fn normalize(&self) -> Result<CanonicalId> {
        match self {
            GattId::Uuid(uuid) => Ok(CanonicalId::from(*uuid)),
            GattId::Alias(alias) => CanonicalId::parse(alias),
        }
    }
}

impl From<Uuid> for GattId {
    fn from(uuid: Uuid) -> Self {
        GattId::Uuid(uuid)
    }
}

impl From<&str> for GattId {
    fn from(alias: &str) -> Self {
        GattId::Alias(alias.to_string())
    }
}

impl From<String> for GattId {
    fn from(alias: String) -> Self {
        GattId::Alias(alias)
    }
}

/// 16-bit assigned number
impl From<u16> for GattId {
    fn from(short: u16) -> Self {
        GattId::Uuid(alias_uuid(u32::from(short)))
    }
}

impl From<&CanonicalId> for GattId {
    fn from(id: &CanonicalId) -> Self {
        GattId::Uuid(id.uuid)
    }
}

/// Normalize any accepted identifier form
pub fn normalize(id: impl Into<GattId>) -> Result<CanonicalId> {
    id.into().normalize()
}

/// Lowercase canonical identifier handed to the platform
///
/// Base-UUID identifiers collapse to their short alias (4 or 8 hex digits);
/// everything else is the hyphenated 36-character form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalId {
    key: String,
    uuid: Uuid,
}

impl CanonicalId {
    /// Parse a string identifier
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "empty identifier"));
        }

        let lower = trimmed.to_ascii_lowercase();
        let hex = lower.strip_prefix("0x").unwrap_or(lower.as_str());
        if matches!(hex.len(), 4 | 8) && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            let short = u32::from_str_radix(hex, 16).map_err(|e| invalid(input, e))?;
            return Ok(Self::from(alias_uuid(short)));
        }

        if let Some((_, short)) = ASSIGNED_NAMES.iter().find(|(name, _)| *name == lower) {
            return Ok(Self::from(alias_uuid(u32::from(*short))));
        }

        Uuid::parse_str(&lower)
            .map(Self::from)
            .map_err(|e| invalid(input, e))
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Full 128-bit UUID this key stands for
    pub fn to_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Short alias if this is a Base-UUID identifier
    pub fn short_alias(&self) -> Option<u32> {
        base_alias(&self.uuid)
    }
}

impl From<Uuid> for CanonicalId {
    fn from(uuid: Uuid) -> Self {
        let key = match base_alias(&uuid) {
            Some(short) if short <= 0xFFFF => format!("{short:04x}"),
            Some(short) => format!("{short:08x}"),
            None => uuid.hyphenated().to_string(),
        };
        Self { key, uuid }
    }
}

impl TryFrom<String> for CanonicalId {
    type Error = BluetoothError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CanonicalId> for String {
    fn from(id: CanonicalId) -> Self {
        id.key
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl AsRef<str> for CanonicalId {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

fn alias_uuid(short: u32) -> Uuid {
    Uuid::from_u128((u128::from(short) << ALIAS_SHIFT) | BLUETOOTH_BASE_UUID)
}

fn base_alias(uuid: &Uuid) -> Option<u32> {
    let value = uuid.as_u128();
    ((value & BASE_MASK) == BLUETOOTH_BASE_UUID).then(|| (value >> ALIAS_SHIFT) as u32)
}

fn invalid(input: &str, reason: impl fmt::Display) -> BluetoothError {
    BluetoothError::InvalidIdentifier {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEART_RATE_FULL: &str = "0000180d-0000-1000-8000-00805f9b34fb";
    const VENDOR: &str = "c8c51726-81bc-483b-a052-f7a14ea3d281";

    fn key(id: impl Into<GattId>) -> String {
        normalize(id).unwrap().to_string()
    }

    #[test]
    fn test_short_aliases_are_lowercased() {
        assert_eq!(key("180D"), "180d");
        assert_eq!(key("0x2A37"), "2a37");
        assert_eq!(key(" 2a37 "), "2a37");
    }

    #[test]
    fn test_equivalent_forms_normalize_identically() {
        let forms: Vec<GattId> = vec![
            "180d".into(),
            "180D".into(),
            "0x180d".into(),
            "0000180d".into(),
            "heart_rate".into(),
            "HEART_RATE".into(),
            HEART_RATE_FULL.into(),
            HEART_RATE_FULL.to_uppercase().into(),
            Uuid::parse_str(HEART_RATE_FULL).unwrap().into(),
            0x180d_u16.into(),
            "{0000180D-0000-1000-8000-00805F9B34FB}".into(),
        ];
        for form in forms {
            assert_eq!(form.normalize().unwrap().as_str(), "180d", "{form:?}");
        }
    }

    #[test]
    fn test_vendor_uuid_keeps_full_form() {
        let upper = VENDOR.to_uppercase();
        assert_eq!(key(upper.as_str()), VENDOR);
        assert_eq!(key(Uuid::parse_str(VENDOR).unwrap()), VENDOR);
        assert_eq!(key(VENDOR.replace('-', "")), VENDOR);
    }

    #[test]
    fn test_32_bit_alias() {
        let id = normalize("0x12345678").unwrap();
        assert_eq!(id.as_str(), "12345678");
        assert_eq!(id.short_alias(), Some(0x1234_5678));
        assert_eq!(
            id.to_uuid().hyphenated().to_string(),
            "12345678-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_to_uuid_expands_short_alias() {
        let id = normalize("2a37").unwrap();
        assert_eq!(
            id.to_uuid().hyphenated().to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_malformed_identifiers_are_rejected() {
        for bad in [
            "",
            "   ",
            "180",
            "180dd",
            "xyz1",
            "not_a_service",
            "0000180d-0000-1000-8000-00805f9b34f",
            "0000180d-0000-1000-8000-00805f9b34fbaa",
            "g000180d-0000-1000-8000-00805f9b34fb",
        ] {
            match normalize(bad) {
                Err(BluetoothError::InvalidIdentifier { input, .. }) => assert_eq!(input, bad),
                other => panic!("{bad:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_canonical_id_serde_revalidates() {
        let id: CanonicalId = serde_json::from_str("\"0X180D\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"180d\"");
        assert!(serde_json::from_str::<CanonicalId>("\"nope\"").is_err());
    }

    #[test]
    fn test_gatt_id_deserializes_either_form() {
        let ids: Vec<GattId> = serde_json::from_str(&format!("[\"{VENDOR}\", \"battery_level\"]")).unwrap();
        assert!(matches!(ids[0], GattId::Uuid(_)));
        assert_eq!(ids[1], GattId::Alias("battery_level".to_string()));
        assert_eq!(key(ids[1].clone()), "2a19");
    }
}
