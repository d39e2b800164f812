//! Persisted configuration record

use crate::error::{FenceError, Result};
use serde::{Deserialize, Serialize};

/// User intent persisted by the Config Store
///
/// Every field falls back to its default when missing from the file, so a
/// record read back is always fully populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigRecord {
    pub selected_version: String,
    pub selected_version_path: String,
    pub network_blocked: bool,
    pub license_port: String,
    pub language: String,
}

pub const DEFAULT_LICENSE_PORT: &str = "28000";
pub const DEFAULT_LANGUAGE: &str = "english";

/// Language codes the application accepts
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "english",
    "korean",
    "simpl_chinese",
    "trad_chinese",
    "japanese",
    "german",
    "french",
    "italian",
    "spanish",
    "portuguese",
    "russian",
    "polish",
    "czech",
    "hungarian",
];

/// Lowercased language code, or `InvalidValue` if it is not supported
pub fn normalize_language(language: &str) -> Result<String> {
    let code = language.trim().to_lowercase();
    if SUPPORTED_LANGUAGES.contains(&code.as_str()) {
        Ok(code)
    } else {
        Err(FenceError::InvalidValue {
            field: "language",
            value: language.to_string(),
            expected: SUPPORTED_LANGUAGES.join(", "),
        })
    }
}

/// A TCP port number from 1 to 65535, without surrounding whitespace
pub fn normalize_port(port: &str) -> Result<String> {
    let trimmed = port.trim();
    match trimmed.parse::<u16>() {
        Ok(n) if n != 0 && trimmed.bytes().all(|b| b.is_ascii_digit()) => Ok(n.to_string()),
        _ => Err(FenceError::InvalidValue {
            field: "licensePort",
            value: port.to_string(),
            expected: "a port number from 1 to 65535".to_string(),
        }),
    }
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            selected_version: String::new(),
            selected_version_path: String::new(),
            network_blocked: false,
            license_port: DEFAULT_LICENSE_PORT.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl ConfigRecord {
    /// Normalize the constrained fields, failing on the first invalid one
    pub fn validate(&mut self) -> Result<()> {
        self.license_port = normalize_port(&self.license_port)?;
        self.language = normalize_language(&self.language)?;
        Ok(())
    }

    /// Replace invalid constrained fields with their defaults
    pub(crate) fn sanitize(&mut self) {
        match normalize_port(&self.license_port) {
            Ok(port) => self.license_port = port,
            Err(e) => {
                tracing::warn!("{}; using {}", e, DEFAULT_LICENSE_PORT);
                self.license_port = DEFAULT_LICENSE_PORT.to_string();
            }
        }
        match normalize_language(&self.language) {
            Ok(language) => self.language = language,
            Err(e) => {
                tracing::warn!("{}; using {}", e, DEFAULT_LANGUAGE);
                self.language = DEFAULT_LANGUAGE.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_is_defaulted() {
        let record: ConfigRecord = serde_json::from_str(r#"{"networkBlocked": true}"#).unwrap();
        assert!(record.network_blocked);
        assert_eq!(record.license_port, "28000");
        assert_eq!(record.language, "english");
        assert!(record.selected_version.is_empty());
    }

    #[test]
    fn test_field_names() {
        let json = serde_json::to_value(ConfigRecord::default()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 5);
        for key in [
            "selectedVersion",
            "selectedVersionPath",
            "networkBlocked",
            "licensePort",
            "language",
        ] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
    }

    #[test]
    fn test_language_must_be_supported() {
        assert_eq!(normalize_language("German").unwrap(), "german");
        assert_eq!(normalize_language(" simpl_chinese ").unwrap(), "simpl_chinese");

        let err = normalize_language("klingon").unwrap_err();
        assert!(matches!(err, FenceError::InvalidValue { field: "language", .. }));
        assert!(err.to_string().contains("hungarian"));
    }

    #[test]
    fn test_port_must_be_numeric() {
        assert_eq!(normalize_port("27000").unwrap(), "27000");
        assert_eq!(normalize_port(" 1 ").unwrap(), "1");
        for bad in ["", "0", "65536", "abc", "+80", "-1", "28000@server"] {
            assert!(normalize_port(bad).is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_sanitize_falls_back_to_defaults() {
        let mut record = ConfigRecord {
            license_port: "not a port".to_string(),
            language: "KOREAN".to_string(),
            ..Default::default()
        };
        assert!(record.clone().validate().is_err());

        record.sanitize();
        assert_eq!(record.license_port, DEFAULT_LICENSE_PORT);
        assert_eq!(record.language, "korean");
    }
}
