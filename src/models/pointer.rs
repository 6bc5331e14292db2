//! LFS pointer records
//!
//! A pointer replaces the content of an offloaded file in the working tree:
//!
//! ```text
//! version https://git-lfs.github.com/spec/v1
//! oid sha256:<64 lowercase hex>
//! size <bytes>
//! ```

use serde::{Deserialize, Serialize};

/// Spec URI every pointer starts with
pub const POINTER_VERSION: &str = "https://git-lfs.github.com/spec/v1";

/// Leading token that distinguishes a pointer from real content
pub const POINTER_PREFIX: &str = "version https://git-lfs.github.com/spec/v1\n";

/// Length of a hex-encoded sha256 digest
pub const OID_HEX_LEN: usize = 64;

/// Pointers are tiny; anything larger than this is never parsed
pub const MAX_POINTER_SIZE: usize = 1024;

/// A parsed LFS pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    pub oid: String,
    pub size: u64,
}

impl Pointer {
    pub fn new(oid: impl Into<String>, size: u64) -> Self {
        Self {
            oid: oid.into(),
            size,
        }
    }

    /// Parse pointer text. Anything that is not exactly a pointer yields `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_POINTER_SIZE {
            return None;
        }
        let text = std::str::from_utf8(data).ok()?;
        let rest = text.strip_prefix(POINTER_PREFIX)?;

        let mut lines = rest.split_terminator('\n');
        let oid = lines.next()?.strip_prefix("oid sha256:")?;
        let size = lines.next()?.strip_prefix("size ")?;
        if lines.next().is_some() || !rest.ends_with('\n') {
            return None;
        }

        if !is_valid_oid(oid) {
            return None;
        }
        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let size = size.parse::<u64>().ok()?;

        Some(Self::new(oid, size))
    }

    /// Render the canonical three-line pointer text
    pub fn format(&self) -> String {
        format!(
            "version {}\noid sha256:{}\nsize {}\n",
            POINTER_VERSION, self.oid, self.size
        )
    }
}

/// Check that `oid` is 64 lowercase hex characters
pub fn is_valid_oid(oid: &str) -> bool {
    oid.len() == OID_HEX_LEN && oid.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
