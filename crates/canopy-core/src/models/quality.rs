//! Scene-classification quality codes.

use crate::error::{CanopyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest scene-classification code (Sentinel-2 SCL uses 0..=11)
pub const MAX_CLASS_CODE: u8 = 11;

/// Classes treated as cloud when dilating the cloud buffer
pub const CLOUD_CLASSES: [u8; 3] = [8, 9, 10];

/// Nodata, saturated/defective, cloud shadow, unclassified, cloud medium/high,
/// thin cirrus, snow
const DEFAULT_INVALID: [u8; 8] = [0, 1, 3, 7, 8, 9, 10, 11];

/// Closed set of scene-classification codes whose pixels are masked out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct InvalidClasses {
    flags: [bool; MAX_CLASS_CODE as usize + 1],
}

impl Default for InvalidClasses {
    fn default() -> Self {
        let mut flags = [false; MAX_CLASS_CODE as usize + 1];
        for code in DEFAULT_INVALID {
            flags[code as usize] = true;
        }
        Self { flags }
    }
}

impl InvalidClasses {
    /// Build from explicit codes; every code must be within `0..=11`
    pub fn from_codes<I>(codes: I) -> Result<Self>
    where
        I: IntoIterator<Item = u8>,
    {
        let mut flags = [false; MAX_CLASS_CODE as usize + 1];
        for code in codes {
            if code > MAX_CLASS_CODE {
                return Err(CanopyError::ConfigInvalid {
                    key: "invalid_classes".to_string(),
                    reason: format!(
                        "class code {} is outside the classification range 0..={}",
                        code, MAX_CLASS_CODE
                    ),
                });
            }
            flags[code as usize] = true;
        }
        Ok(Self { flags })
    }

    /// Parse a comma-separated list such as `"0,1,3,8,9"`
    pub fn parse(s: &str) -> Result<Self> {
        let codes = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u8>().map_err(|_| CanopyError::ConfigInvalid {
                    key: "invalid_classes".to_string(),
                    reason: format!("'{}' is not a class code", part),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_codes(codes)
    }

    /// Whether a raw class value is masked. Values outside the classification
    /// range are never masked.
    pub fn contains(&self, code: u8) -> bool {
        self.flags.get(code as usize).copied().unwrap_or(false)
    }

    pub fn codes(&self) -> Vec<u8> {
        (0..=MAX_CLASS_CODE).filter(|c| self.flags[*c as usize]).collect()
    }
}

impl TryFrom<Vec<u8>> for InvalidClasses {
    type Error = CanopyError;

    fn try_from(codes: Vec<u8>) -> Result<Self> {
        Self::from_codes(codes)
    }
}

impl From<InvalidClasses> for Vec<u8> {
    fn from(classes: InvalidClasses) -> Self {
        classes.codes()
    }
}

impl fmt::Display for InvalidClasses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<String> = self.codes().iter().map(|c| c.to_string()).collect();
        write!(f, "{}", codes.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set() {
        let classes = InvalidClasses::default();
        assert_eq!(classes.codes(), vec![0, 1, 3, 7, 8, 9, 10, 11]);
        assert!(!classes.contains(4));
        assert!(!classes.contains(200));
    }

    #[test]
    fn test_parse_and_display() {
        let classes = InvalidClasses::parse(" 3, 8 ,9,").unwrap();
        assert_eq!(classes.to_string(), "3,8,9");
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(InvalidClasses::parse("3,12").is_err());
        assert!(InvalidClasses::parse("cloud").is_err());
    }

    #[test]
    fn test_serde_as_list() {
        let classes: InvalidClasses = serde_json::from_str("[8, 9]").unwrap();
        assert_eq!(serde_json::to_string(&classes).unwrap(), "[8,9]");
        assert!(serde_json::from_str::<InvalidClasses>("[42]").is_err());
    }
}
