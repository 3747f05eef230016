pub mod attributes;
pub mod context;
pub mod crypto;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod mask;
pub mod schema;
pub mod time;
pub mod version;

pub use attributes::{AttributeMap, Attributes, CreateOption};
pub use context::{Interrupt, OpContext};
pub use error::CoreError;
pub use field_value::{FieldValue, ValueKind};
pub use ids::{PublicId, ScopeId};
pub use mask::{Change, FieldDelta, FieldErrors, FieldMask};
pub use schema::{FieldPath, FieldSpec, MaskRules, Mutability, Schema};
pub use version::VersionSpec;
