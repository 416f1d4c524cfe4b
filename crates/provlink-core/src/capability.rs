//! Device capability set and version-response decoding
//!
//! The capability set is deliberately three-state: *unknown* (negotiation
//! not run, or the response did not decode), *known and empty*, and *known
//! with tokens*. Callers branch on the distinction — e.g. proof-of-possession
//! is requested by default when capabilities are unknown, but consulted via
//! the `no_pop` token when they are known — so the states are never
//! collapsed.

use serde::Deserialize;
use tracing::debug;

// ----------------------------------------------------------------------------
// Device Capability Set
// ----------------------------------------------------------------------------

/// Capability set reported by the device during version negotiation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceCapabilities {
    /// Negotiation has not run, or the response did not decode
    #[default]
    Unknown,
    /// Decoded capability tokens, verbatim and in device order (may be empty)
    Known(Vec<String>),
}

impl DeviceCapabilities {
    /// Whether the device reported a concrete capability list
    pub fn is_known(&self) -> bool {
        matches!(self, DeviceCapabilities::Known(_))
    }

    /// Whether a capability token is present; `false` when unknown
    pub fn supports(&self, token: &str) -> bool {
        match self {
            DeviceCapabilities::Known(tokens) => tokens.iter().any(|t| t == token),
            DeviceCapabilities::Unknown => false,
        }
    }

    /// The token list, if known
    pub fn tokens(&self) -> Option<&[String]> {
        match self {
            DeviceCapabilities::Known(tokens) => Some(tokens),
            DeviceCapabilities::Unknown => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Version Response Decoding
// ----------------------------------------------------------------------------

/// Decoded `proto-ver` exchange payload
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
    #[serde(rename = "prov")]
    pub prov: ProvInfo,
}

/// The `prov` object of the version response
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProvInfo {
    #[serde(rename = "ver")]
    pub version: String,
    #[serde(rename = "cap")]
    pub capabilities: Vec<String>,
}

/// Outcome of decoding the version-endpoint response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionDecode {
    /// Well-formed `{"prov":{"ver":...,"cap":[...]}}` payload
    Info(VersionInfo),
    /// Literal `SUCCESS` (any case) from firmware that predates the JSON
    /// response; signals that Wi-Fi auth-mode data will appear in a later
    /// scan response
    LegacySuccess,
    /// Anything else; capabilities stay unknown
    Unrecognized,
}

/// Decode the raw bytes read back from the version endpoint
pub fn decode_version_response(raw: &[u8]) -> VersionDecode {
    let text = String::from_utf8_lossy(raw);

    match serde_json::from_str::<VersionInfo>(&text) {
        Ok(info) => {
            debug!(
                "Device version {} with capabilities {:?}",
                info.prov.version, info.prov.capabilities
            );
            VersionDecode::Info(info)
        }
        Err(_) => {
            if !text.is_empty() && text.eq_ignore_ascii_case("SUCCESS") {
                debug!("Version endpoint replied SUCCESS; legacy firmware");
                VersionDecode::LegacySuccess
            } else {
                debug!("Version response not recognized: {:?}", text);
                VersionDecode::Unrecognized
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_version_and_ordered_capabilities() {
        let raw = br#"{"prov":{"ver":"v1.1","cap":["wifi_scan","no_pop"]}}"#;
        match decode_version_response(raw) {
            VersionDecode::Info(info) => {
                assert_eq!(info.prov.version, "v1.1");
                assert_eq!(info.prov.capabilities, vec!["wifi_scan", "no_pop"]);
            }
            other => panic!("expected Info, got {:?}", other),
        }
    }

    #[test]
    fn empty_capability_list_is_known_empty() {
        let raw = br#"{"prov":{"ver":"v1.1","cap":[]}}"#;
        let VersionDecode::Info(info) = decode_version_response(raw) else {
            panic!("expected Info");
        };
        let caps = DeviceCapabilities::Known(info.prov.capabilities);
        assert!(caps.is_known());
        assert!(!caps.supports("no_pop"));
        assert_eq!(caps.tokens(), Some(&[][..]));
    }

    #[test]
    fn success_any_case_is_legacy() {
        assert_eq!(decode_version_response(b"SUCCESS"), VersionDecode::LegacySuccess);
        assert_eq!(decode_version_response(b"success"), VersionDecode::LegacySuccess);
        assert_eq!(decode_version_response(b"SuCcEsS"), VersionDecode::LegacySuccess);
    }

    #[test]
    fn malformed_text_is_unrecognized() {
        assert_eq!(decode_version_response(b""), VersionDecode::Unrecognized);
        assert_eq!(decode_version_response(b"garbage"), VersionDecode::Unrecognized);
        assert_eq!(
            decode_version_response(br#"{"prov":{"ver":"v1.1"}}"#),
            VersionDecode::Unrecognized
        );
        assert_eq!(
            decode_version_response(br#"{"other":{}}"#),
            VersionDecode::Unrecognized
        );
    }

    #[test]
    fn unknown_capabilities_report_nothing() {
        let caps = DeviceCapabilities::Unknown;
        assert!(!caps.is_known());
        assert!(!caps.supports("wifi_scan"));
        assert_eq!(caps.tokens(), None);
    }
}
