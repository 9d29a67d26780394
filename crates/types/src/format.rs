//! Result-format grammar selection.

use serde::{Deserialize, Serialize};

/// Grammar used when writing an encoded result format.
///
/// Decoding always understands every known version; this only picks the
/// shape new values are written in.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    /// Flat `Stage: <code>|Properties: <json>` string.
    #[default]
    Legacy,
    /// Tagged JSON envelope carrying an explicit `format_version`.
    Versioned,
}

impl FormatVersion {
    /// Numeric tag written into (or implied by) the encoded value.
    pub fn tag(&self) -> u32 {
        match self {
            Self::Legacy => 1,
            Self::Versioned => 2,
        }
    }
}
