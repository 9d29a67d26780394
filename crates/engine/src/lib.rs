//! # CRM Bot Engine
//!
//! The engine owns everything between the console backend and a function
//! definition form: the result-format codec, the CRM metadata cascade
//! (fields → pipelines → stages), and the create / edit / view editor that
//! ties them together.
//!
//! ## Usage
//!
//! ```rust
//! use crmbot_engine::codec;
//!
//! let stored = r#"Stage: C1:NEW|Properties: [{"field_code":"TITLE","field_name":"Title","description":"Deal title"}]"#;
//! let decoded = codec::decode(Some(stored));
//! assert_eq!(decoded.stage.as_deref(), Some("C1:NEW"));
//! assert_eq!(decoded.properties[0].field_code, "TITLE");
//!
//! assert!(codec::decode(Some("garbage")).is_empty());
//! ```
//!
//! ## Architecture
//!
//! - **`codec`**: Encode/decode of the persisted result format (legacy and versioned)
//! - **`metadata`**: Per-bot cache of CRM fields and pipelines, plus field search
//! - **`properties`**: Ordered in-progress field mappings with picker state
//! - **`loader`**: Token-guarded dependent loads for one bot session
//! - **`validate`**: Save-time checks
//! - **`editor`**: The create / edit / view state machine
//! - **`records`**: Persistence seam for function definitions
//! - **`catalog`**: Paginated function listing

pub mod catalog;
pub mod codec;
pub mod editor;
pub mod loader;
pub mod metadata;
pub mod properties;
pub mod records;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::FunctionCatalog;
pub use codec::{DecodeIssue, DecodeReport, EncodedProperty, ResultFormat, decode, decode_detailed, encode, encode_versioned};
pub use editor::{EditorError, EditorMode, FunctionEditor};
pub use loader::{DependentLoader, LoadToken, MetadataRequest, StageRequest};
pub use metadata::{CrmMetadataSource, MetadataCache, filter_fields};
pub use properties::{PropertyStore, PropertyUpdate};
pub use records::FunctionRecordService;
pub use validate::{ValidationError, validate};
