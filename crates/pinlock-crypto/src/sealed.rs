//! Sealed gate secret wire format

use serde::{Deserialize, Serialize};

/// Current sealed-secret format version
pub const FORMAT_VERSION: u8 = 1;

/// A gate secret sealed under a PIN-derived key.
///
/// Binary fields are base64-encoded in the persisted JSON:
///
/// ```json
/// { "iv": "<base64>", "salt": "<base64>", "data": "<base64>", "version": 1 }
/// ```
///
/// `data` carries the AES-GCM ciphertext with the authentication tag
/// appended. `version` exists for future algorithm migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// AES-GCM nonce (12 bytes)
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    /// KDF salt (16 bytes)
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    /// Ciphertext plus authentication tag
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    /// Format version
    pub version: u8,
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_binary_fields_as_base64() {
        let sealed = SealedSecret {
            iv: vec![0x00, 0x01, 0x02],
            salt: vec![0xff; 4],
            data: vec![0xaa; 8],
            version: FORMAT_VERSION,
        };

        let json: serde_json::Value = serde_json::to_value(&sealed).unwrap();
        assert_eq!(json["iv"], "AAEC");
        assert_eq!(json["salt"], "/////w==");
        assert_eq!(json["version"], 1);

        let back: SealedSecret = serde_json::from_value(json).unwrap();
        assert_eq!(back, sealed);
    }

    #[test]
    fn rejects_invalid_base64() {
        let json = r#"{"iv":"not base64!","salt":"AA==","data":"AA==","version":1}"#;
        assert!(serde_json::from_str::<SealedSecret>(json).is_err());
    }
}
