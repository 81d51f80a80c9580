use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Input field kind a UDA parameter is rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamFieldType {
    Text,
    Number,
    Boolean,
    Timestamp,
    #[serde(rename = "json")]
    Dictionary,
    Invalid,
}

/// Tie-break order used when one parameter accepts several field kinds.
pub const FIELD_TYPE_PRIORITY: [ParamFieldType; 5] = [
    ParamFieldType::Text,
    ParamFieldType::Number,
    ParamFieldType::Boolean,
    ParamFieldType::Timestamp,
    ParamFieldType::Dictionary,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvalidParamFieldError {
    BadField,
    NoMetadata,
}

impl std::fmt::Display for InvalidParamFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidParamFieldError::BadField => write!(f, "badField"),
            InvalidParamFieldError::NoMetadata => write!(f, "noMetadata"),
        }
    }
}

/// Declared type codes: the server sends either one code or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamTypes {
    Single(i32),
    Many(Vec<i32>),
}

impl ParamTypes {
    pub fn codes(&self) -> Vec<i32> {
        match self {
            ParamTypes::Single(code) => vec![*code],
            ParamTypes::Many(codes) => codes.clone(),
        }
    }
}

impl Default for ParamTypes {
    fn default() -> Self {
        ParamTypes::Many(Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdaParam {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub is_req: bool,
    #[serde(rename = "type", default)]
    pub param_type: ParamTypes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<ParamFieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_strings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_field_types: Option<Vec<BTreeMap<String, ParamFieldType>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_multi_type_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_visible: Option<bool>,
}

impl UdaParam {
    /// True when the parameter carries no usable value.
    pub fn value_is_empty(&self) -> bool {
        match &self.value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Bool(b)) => !b,
            Some(Value::Number(n)) => n.as_f64() == Some(0.0),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UdaReturn {
    #[serde(default, rename = "type")]
    pub return_type: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdaDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<UdaParam>,
    #[serde(default, rename = "return", skip_serializing_if = "Option::is_none")]
    pub return_info: Option<UdaReturn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incompatible_error: Option<InvalidParamFieldError>,
}

/// Resolved UDA invocation, ready to be wrapped by a tier envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdaRequestBody {
    pub language: String,
    pub name: String,
    pub parameter_types: BTreeMap<String, i32>,
    pub params: Map<String, Value>,
    pub return_format: String,
    pub sample_fn: String,
    pub sample_size: u32,
}

const DATA_TYPE_NAMES: &[(i32, &str)] = &[
    (-1, "Boolean"),
    (-2, "GUID"),
    (-4, "Byte"),
    (-5, "Short"),
    (-6, "Int"),
    (-7, "Long"),
    (-8, "Float"),
    (-9, "Double"),
    (-10, "Char"),
    (-11, "Symbol"),
    (-12, "Timestamp"),
    (-13, "Month"),
    (-14, "Date"),
    (-15, "DateTime"),
    (-16, "Timespan"),
    (-17, "Minute"),
    (-18, "Second"),
    (-19, "Time"),
    (0, "List"),
    (1, "Boolean List"),
    (2, "GUID List"),
    (4, "Byte List"),
    (5, "Short List"),
    (6, "Int List"),
    (7, "Long List"),
    (8, "Float List"),
    (9, "Double List"),
    (10, "String"),
    (11, "Symbol List"),
    (12, "Timestamp List"),
    (13, "Month List"),
    (14, "Date List"),
    (15, "DateTime List"),
    (16, "Timespan List"),
    (17, "Minute List"),
    (18, "Second List"),
    (19, "Time List"),
    (77, "Any Map"),
    (98, "Table"),
    (99, "Dictionary"),
    (100, "Lambda"),
    (101, "Unary"),
];

/// Type-code catalogs deciding how a kdb+ type is rendered as an input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCatalog {
    pub boolean: BTreeSet<i32>,
    pub number: BTreeSet<i32>,
    pub text: BTreeSet<i32>,
    pub timestamp: BTreeSet<i32>,
    pub dictionary: BTreeSet<i32>,
    /// Required parameters of these types may be sent empty.
    pub allowed_empty_required: BTreeSet<i32>,
}

impl Default for TypeCatalog {
    fn default() -> Self {
        Self {
            boolean: [-1].into_iter().collect(),
            number: [-4, -5, -6, -7, -8, -9].into_iter().collect(),
            text: [-10, -11, 10].into_iter().collect(),
            timestamp: [-12].into_iter().collect(),
            dictionary: [
                0, 1, 4, 5, 6, 7, 8, 9, 11, 12, 13, 14, 15, 16, 17, 18, 19, 77, 98, 99,
            ]
            .into_iter()
            .collect(),
            allowed_empty_required: [10, -11].into_iter().collect(),
        }
    }
}

impl TypeCatalog {
    pub fn is_known(&self, code: i32) -> bool {
        self.field_type_of(code) != ParamFieldType::Invalid
    }

    /// Field kind for a single code. Later catalogs win when a code appears
    /// in more than one set.
    pub fn field_type_of(&self, code: i32) -> ParamFieldType {
        if self.dictionary.contains(&code) {
            ParamFieldType::Dictionary
        } else if self.timestamp.contains(&code) {
            ParamFieldType::Timestamp
        } else if self.text.contains(&code) {
            ParamFieldType::Text
        } else if self.number.contains(&code) {
            ParamFieldType::Number
        } else if self.boolean.contains(&code) {
            ParamFieldType::Boolean
        } else {
            ParamFieldType::Invalid
        }
    }

    pub fn type_name(code: i32) -> Option<&'static str> {
        DATA_TYPE_NAMES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| *name)
    }

    pub fn type_code(name: &str) -> Option<i32> {
        DATA_TYPE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(code, _)| *code)
    }
}
