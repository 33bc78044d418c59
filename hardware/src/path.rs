//! BIP32 derivation paths and the named presets devices are driven with.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::HardwareError;

const HARDENED: u32 = 0x8000_0000;
const MAX_DEPTH: usize = 10;

/// A parsed BIP32 path such as `m/44'/195'/0'/0/0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether the component at `index` is hardened. Out of range reads as `false`.
    pub fn is_hardened(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(|c| c & HARDENED != 0)
    }

    /// Index of the component at `index` with the hardened bit stripped.
    pub fn index(&self, index: usize) -> Option<u32> {
        self.0.get(index).map(|c| c & !HARDENED)
    }
}

impl FromStr for DerivationPath {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HardwareError::InvalidPath(s.to_string());
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(invalid());
        }
        let mut components = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(d) => (d, true),
                None => (part, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let index: u32 = digits.parse().map_err(|_| invalid())?;
            if index >= HARDENED {
                return Err(invalid());
            }
            components.push(if hardened { index | HARDENED } else { index });
        }
        if components.is_empty() || components.len() > MAX_DEPTH {
            return Err(invalid());
        }
        Ok(Self(components))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for c in &self.0 {
            if c & HARDENED != 0 {
                write!(f, "/{}'", c & !HARDENED)?;
            } else {
                write!(f, "/{c}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How a key is derived on a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum DerivationPreset {
    /// `m/44'/195'/0'/0/0`
    Standard,
    /// `m/44'/195'/0'/0/1`
    Multisig,
    Custom(String),
}

impl DerivationPreset {
    pub const STANDARD_PATH: &'static str = "m/44'/195'/0'/0/0";
    pub const MULTISIG_PATH: &'static str = "m/44'/195'/0'/0/1";

    pub fn path(&self) -> Result<DerivationPath, HardwareError> {
        match self {
            Self::Standard => Self::STANDARD_PATH.parse(),
            Self::Multisig => Self::MULTISIG_PATH.parse(),
            Self::Custom(p) => p.parse(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Multisig => "multisig",
            Self::Custom(_) => "custom",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_standard_path() {
        let path: DerivationPath = "m/44'/195'/0'/0/0".parse().unwrap();
        assert_eq!(path.depth(), 5);
        assert!(path.is_hardened(0) && path.is_hardened(1) && path.is_hardened(2));
        assert!(!path.is_hardened(3));
        assert_eq!(path.index(1), Some(195));
        assert_eq!(path.to_string(), "m/44'/195'/0'/0/0");
    }

    #[test]
    fn h_suffix_normalises_to_apostrophe() {
        let path: DerivationPath = "m/44h/195h/1h".parse().unwrap();
        assert_eq!(path.to_string(), "m/44'/195'/1'");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in [
            "",
            "m",
            "44'/0",
            "m/",
            "m/x",
            "m/-1",
            "m/2147483648",
            "m/1''",
            "m/1/2/3/4/5/6/7/8/9/10/11",
        ] {
            assert!(bad.parse::<DerivationPath>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn presets_resolve() {
        assert_eq!(
            DerivationPreset::Multisig.path().unwrap().to_string(),
            DerivationPreset::MULTISIG_PATH
        );
        assert!(DerivationPreset::Custom("m/bad".into()).path().is_err());
    }

    #[test]
    fn path_serializes_as_string() {
        let path: DerivationPath = "m/44'/0".parse().unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"m/44'/0\"");
    }
}
