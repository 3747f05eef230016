use portcullis_core::attributes::mask_contains;
use portcullis_core::{
    AttributeMap, Attributes, CreateOption, FieldErrors, FieldSpec, FieldValue, MaskRules,
    ValueKind,
};
use portcullis_storage::ResourceRecord;

use crate::error::EngineError;
use crate::registry::AttributeRegistry;

pub const SUBTYPE: &str = "tcp";
pub const ID_PREFIX: &str = "ttcp";

const DEFAULT_PORT_PATH: &str = "attributes.default_port";
pub(crate) const DEFAULT_PORT_COLUMN: &str = "default_port";
const DEFAULT_PORT_KEY: &str = "default_port";

const MSG_REQUIRED: &str = "This field is required.";
const MSG_ZERO_ON_CREATE: &str = "This field cannot be set to zero.";
const MSG_ZERO_ON_UPDATE: &str = "This cannot be set to zero.";
const MSG_OUT_OF_RANGE: &str = "Must be a valid port number.";

const RULES: &[FieldSpec] = &[FieldSpec::required(
    DEFAULT_PORT_PATH,
    DEFAULT_PORT_COLUMN,
    ValueKind::Integer,
)];

/// Attributes of a tcp target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpAttributes {
    pub default_port: Option<i64>,
}

impl TcpAttributes {
    fn check_port(&self, errors: &mut FieldErrors, zero_message: &str) {
        match self.default_port {
            None => {
                errors.insert(DEFAULT_PORT_PATH.into(), MSG_REQUIRED.into());
            }
            Some(0) => {
                errors.insert(DEFAULT_PORT_PATH.into(), zero_message.into());
            }
            Some(port) if !(1..=i64::from(u16::MAX)).contains(&port) => {
                errors.insert(DEFAULT_PORT_PATH.into(), MSG_OUT_OF_RANGE.into());
            }
            Some(_) => {}
        }
    }
}

impl Attributes for TcpAttributes {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        self.check_port(&mut errors, MSG_ZERO_ON_CREATE);
        errors
    }

    fn validate_for_update(&self, mask: &[&str]) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if mask_contains(mask, DEFAULT_PORT_PATH) {
            self.check_port(&mut errors, MSG_ZERO_ON_UPDATE);
        }
        errors
    }

    fn creation_options(&self) -> Vec<CreateOption> {
        match self.default_port.and_then(|p| u32::try_from(p).ok()) {
            Some(port) if port > 0 => vec![CreateOption::DefaultPort(port)],
            _ => Vec::new(),
        }
    }
}

fn build(values: &AttributeMap) -> Box<dyn Attributes> {
    Box::new(TcpAttributes {
        default_port: values.get(DEFAULT_PORT_KEY).and_then(FieldValue::as_integer),
    })
}

fn project(record: &ResourceRecord) -> AttributeMap {
    let mut out = AttributeMap::new();
    if let Some(port) = record.field(DEFAULT_PORT_COLUMN).and_then(FieldValue::as_integer) {
        if port > 0 {
            out.insert(DEFAULT_PORT_KEY.into(), FieldValue::Integer(port));
        }
    }
    out
}

pub fn register(registry: &mut AttributeRegistry) -> Result<(), EngineError> {
    let rules = MaskRules::new(RULES)?;
    registry.register(SUBTYPE, ID_PREFIX, rules, build, project)
}
