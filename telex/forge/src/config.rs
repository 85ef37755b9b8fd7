//! Station configuration.
//!
//! A [`StationConfig`] is built once at start-up (usually from JSON) and then shared, immutable,
//! with every forging call.
//!
//! ```json
//! {
//!     "role": "server",
//!     "allowed_cipher_suites": [47, 53, 156],
//!     "dh_group": "oakley2_1024",
//!     "max_fragment_len": 16384
//! }
//! ```
//!
//! Every field is optional. A custom DH group is written as
//! `{"custom": {"modulus_hex": "...", "generator": 2}}`.

use crate::{
    errors::*,
    key_derivation::DhGroup,
    session::Role,
    tls::{MAX_FRAGMENT_LEN, SUPPORTED_CIPHER_SUITES},
};
use num_bigint::BigUint;
use serde::Deserialize;
use snafu::{ensure, ResultExt};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct StationConfig {
    role: Role,
    allowed_cipher_suites: Vec<u16>,
    dh_group: DhGroup,
    max_fragment_len: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            role: Role::default(),
            allowed_cipher_suites: SUPPORTED_CIPHER_SUITES.to_vec(),
            dh_group: DhGroup::oakley_group_2().clone(),
            max_fragment_len: MAX_FRAGMENT_LEN,
        }
    }
}

impl StationConfig {
    pub fn builder() -> StationConfigBuilder {
        StationConfigBuilder::default()
    }

    pub fn from_json_slice(json: &[u8]) -> Result<Self, ConfigError> {
        let raw: RawStationConfig = serde_json::from_slice(json).context(ParseSnafu)?;
        raw.into_config()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read(path).context(ReadSnafu { path })?;
        Self::from_json_slice(&json)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Is `raw_cipher_suite` in the allow-list?
    pub fn allows(&self, raw_cipher_suite: u16) -> bool {
        self.allowed_cipher_suites.contains(&raw_cipher_suite)
    }

    pub fn allowed_cipher_suites(&self) -> &[u16] {
        &self.allowed_cipher_suites[..]
    }

    pub fn dh_group(&self) -> &DhGroup {
        &self.dh_group
    }

    /// The most plaintext that `encrypt` puts in a single record.
    pub fn max_fragment_len(&self) -> usize {
        self.max_fragment_len
    }
}

#[derive(Debug, Default)]
pub struct StationConfigBuilder {
    role: Option<Role>,
    allowed_cipher_suites: Option<Vec<u16>>,
    dh_group: Option<DhGroup>,
    max_fragment_len: Option<usize>,
}

impl StationConfigBuilder {
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn allowed_cipher_suites(mut self, suites: Vec<u16>) -> Self {
        self.allowed_cipher_suites = Some(suites);
        self
    }

    pub fn dh_group(mut self, group: DhGroup) -> Self {
        self.dh_group = Some(group);
        self
    }

    pub fn max_fragment_len(mut self, len: usize) -> Self {
        self.max_fragment_len = Some(len);
        self
    }

    pub fn build(self) -> Result<StationConfig, ConfigError> {
        let defaults = StationConfig::default();
        let max_fragment_len = self.max_fragment_len.unwrap_or(defaults.max_fragment_len);
        ensure!(
            (1..=MAX_FRAGMENT_LEN).contains(&max_fragment_len),
            InvalidFragmentLengthSnafu {
                actual: max_fragment_len,
                max: MAX_FRAGMENT_LEN,
            }
        );
        let allowed_cipher_suites = self
            .allowed_cipher_suites
            .unwrap_or(defaults.allowed_cipher_suites);
        if let Some(suite) = allowed_cipher_suites
            .iter()
            .find(|suite| !SUPPORTED_CIPHER_SUITES.contains(*suite))
        {
            return UnsupportedAllowedCipherSuiteSnafu { suite: *suite }.fail();
        }
        Ok(StationConfig {
            role: self.role.unwrap_or(defaults.role),
            allowed_cipher_suites,
            dh_group: self.dh_group.unwrap_or(defaults.dh_group),
            max_fragment_len,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStationConfig {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    allowed_cipher_suites: Option<Vec<u16>>,
    #[serde(default)]
    dh_group: Option<DhGroupConfig>,
    #[serde(default)]
    max_fragment_len: Option<usize>,
}

#[derive(Debug, Deserialize)]
enum DhGroupConfig {
    #[serde(rename = "oakley2_1024")]
    Oakley2,
    #[serde(rename = "modp14_2048")]
    Modp14,
    #[serde(rename = "custom")]
    Custom { modulus_hex: String, generator: u32 },
}

impl DhGroupConfig {
    fn into_group(self) -> Result<DhGroup, ConfigError> {
        Ok(match self {
            DhGroupConfig::Oakley2 => DhGroup::oakley_group_2().clone(),
            DhGroupConfig::Modp14 => DhGroup::modp_group_14().clone(),
            DhGroupConfig::Custom {
                modulus_hex,
                generator,
            } => {
                let modulus = hex::decode(modulus_hex.trim()).context(InvalidModulusHexSnafu)?;
                DhGroup::new(
                    BigUint::from_bytes_be(&modulus[..]),
                    BigUint::from(generator),
                )
                .context(InvalidDhGroupSnafu)?
            }
        })
    }
}

impl RawStationConfig {
    fn into_config(self) -> Result<StationConfig, ConfigError> {
        let mut builder = StationConfig::builder();
        if let Some(role) = self.role {
            builder = builder.role(role);
        }
        if let Some(suites) = self.allowed_cipher_suites {
            builder = builder.allowed_cipher_suites(suites);
        }
        if let Some(group) = self.dh_group {
            builder = builder.dh_group(group.into_group()?);
        }
        if let Some(len) = self.max_fragment_len {
            builder = builder.max_fragment_len(len);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StationConfig::from_json_slice(b"{}").unwrap();
        assert_eq!(config.role(), Role::Server);
        assert_eq!(config.max_fragment_len(), 16384);
        assert_eq!(config.dh_group(), DhGroup::oakley_group_2());
        for suite in SUPPORTED_CIPHER_SUITES {
            assert!(config.allows(*suite));
        }
    }

    #[test]
    fn test_full_config() {
        let config = StationConfig::from_json_slice(
            br#"{
                "role": "client",
                "allowed_cipher_suites": [47, 156],
                "dh_group": "modp14_2048",
                "max_fragment_len": 1000
            }"#,
        )
        .unwrap();
        assert_eq!(config.role(), Role::Client);
        assert_eq!(config.allowed_cipher_suites(), &[0x002f, 0x009c]);
        assert!(!config.allows(0xc02f));
        assert_eq!(config.dh_group(), DhGroup::modp_group_14());
        assert_eq!(config.max_fragment_len(), 1000);
    }

    #[test]
    fn test_custom_group() {
        let config = StationConfig::from_json_slice(
            br#"{"dh_group": {"custom": {"modulus_hex": "17", "generator": 5}}}"#,
        )
        .unwrap();
        assert_eq!(*config.dh_group().modulus(), BigUint::from(23_u32));
        assert_eq!(*config.dh_group().generator(), BigUint::from(5_u32));

        let err = StationConfig::from_json_slice(
            br#"{"dh_group": {"custom": {"modulus_hex": "03", "generator": 2}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDhGroup { .. }));
        let err = StationConfig::from_json_slice(
            br#"{"dh_group": {"custom": {"modulus_hex": "xyz", "generator": 2}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidModulusHex { .. }));
    }

    #[test]
    fn test_invalid_configs() {
        for (json, expected) in [
            (&br#"{"max_fragment_len": 0}"#[..], "fragment"),
            (&br#"{"max_fragment_len": 16385}"#[..], "fragment"),
            (&br#"{"allowed_cipher_suites": [4865]}"#[..], "suite"),
            (&br#"{"role": "middle"}"#[..], "parse"),
            (&br#"{"unknown": 1}"#[..], "parse"),
        ] {
            let err = StationConfig::from_json_slice(json).unwrap_err();
            let matched = match &err {
                ConfigError::InvalidFragmentLength { .. } => "fragment",
                ConfigError::UnsupportedAllowedCipherSuite { .. } => "suite",
                ConfigError::Parse { .. } => "parse",
                _ => "other",
            };
            assert_eq!(matched, expected, "{:?}", err);
        }
    }

    #[test]
    fn test_missing_file() {
        let err = StationConfig::from_path("/nonexistent/station.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
