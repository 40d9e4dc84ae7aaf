use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use xxhash_rust::{xxh3::xxh3_64, xxh64::xxh64};

use crate::error::IndexError;

/// Fixed-width content hash of a string literal; the primary key of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Bit-preserving conversion for SQLite's signed INTEGER column.
    pub fn to_sql(self) -> i64 {
        self.0 as i64
    }

    pub fn from_sql(value: i64) -> Self {
        Fingerprint(value as u64)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("0x");
        u64::from_str_radix(digits, 16)
            .map(Fingerprint)
            .map_err(|e| IndexError::Config(format!("'{}' is not a hex fingerprint: {}", s, e)))
    }
}

/// Pluggable hash over literal bytes. Implementations must be pure and must
/// not depend on process-specific seeds.
pub trait Fingerprinter: Send + Sync {
    /// Stable identifier recorded in the store.
    fn name(&self) -> &'static str;

    fn fingerprint(&self, bytes: &[u8]) -> Fingerprint;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh64;

impl Fingerprinter for Xxh64 {
    fn name(&self) -> &'static str {
        "xxh64"
    }

    fn fingerprint(&self, bytes: &[u8]) -> Fingerprint {
        Fingerprint(xxh64(bytes, 0))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3;

impl Fingerprinter for Xxh3 {
    fn name(&self) -> &'static str {
        "xxh3"
    }

    fn fingerprint(&self, bytes: &[u8]) -> Fingerprint {
        Fingerprint(xxh3_64(bytes))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Xxh64,
    Xxh3,
}

impl HashAlgorithm {
    pub fn fingerprinter(self) -> Arc<dyn Fingerprinter> {
        match self {
            HashAlgorithm::Xxh64 => Arc::new(Xxh64),
            HashAlgorithm::Xxh3 => Arc::new(Xxh3),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Xxh64 => "xxh64",
            HashAlgorithm::Xxh3 => "xxh3",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "xxh64" => Some(HashAlgorithm::Xxh64),
            "xxh3" => Some(HashAlgorithm::Xxh3),
            _ => None,
        }
    }
}

/// Hash of a whole file's bytes, used to skip unchanged files between runs.
/// The seed keys the hash to the settings the file was indexed under.
pub fn content_hash(bytes: &[u8], seed: u64) -> u64 {
    xxh64(bytes, seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_xxh64_values() {
        // Published xxh64 reference values, seed 0.
        assert_eq!(Xxh64.fingerprint(b"").0, 0xef46db3751d8e999);
        assert_eq!(Xxh64.fingerprint(b"a").0, 0xd24ec4f1a98c6e5b);
    }

    #[test]
    fn test_empty_string_is_not_special() {
        let fp = Xxh64.fingerprint(b"");
        assert_eq!(fp, Xxh64.fingerprint(b""));
        assert_ne!(fp, Xxh64.fingerprint(b" "));
    }

    #[test]
    fn test_hex_round_trip_through_display() {
        let fp = Xxh64.fingerprint(b"hello");
        let parsed: Fingerprint = fp.to_string().parse().unwrap();
        assert_eq!(parsed, fp);
        assert_eq!("0x00000000000000ff".parse::<Fingerprint>().unwrap(), Fingerprint(255));
        assert!("zz".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_sql_conversion_preserves_high_bit() {
        let fp = Fingerprint(u64::MAX - 1);
        assert!(fp.to_sql() < 0);
        assert_eq!(Fingerprint::from_sql(fp.to_sql()), fp);
    }

    #[test]
    fn test_algorithm_names() {
        for algo in [HashAlgorithm::Xxh64, HashAlgorithm::Xxh3] {
            assert_eq!(algo.fingerprinter().name(), algo.name());
            assert_eq!(HashAlgorithm::from_name(algo.name()), Some(algo));
        }
        assert_eq!(HashAlgorithm::from_name("md5"), None);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let a = Xxh64.fingerprint(&bytes);
            let b = HashAlgorithm::Xxh64.fingerprinter().fingerprint(&bytes.clone());
            prop_assert_eq!(a, b);
            prop_assert_eq!(Xxh3.fingerprint(&bytes), Xxh3.fingerprint(&bytes));
        }
    }
}
