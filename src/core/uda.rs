//! UDA parameter reconciliation.
//!
//! Server metadata declares each UDA parameter with one or more kdb+ type
//! codes. Only codes that map onto an input field kind are usable; a UDA
//! whose required parameter has no usable code cannot be called at all.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::error::{InsightsError, Result};
use crate::models::meta::MetaPayload;
use crate::models::request_body::{SAMPLE_FN, SAMPLE_SIZE};
use crate::models::uda::{
    InvalidParamFieldError, ParamFieldType, ParamTypes, TypeCatalog, UdaDescriptor, UdaParam,
    UdaRequestBody, UdaReturn, FIELD_TYPE_PRIORITY,
};

const TIMESTAMP_TYPE: i32 = -12;
const TIMESTAMP_SUFFIX: &str = ":00.000000000";

/// Outcome of reconciling a whole parameter list.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Params(Vec<UdaParam>),
    /// A required parameter has no usable type.
    Invalid,
}

impl Reconciled {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Reconciled::Invalid)
    }
}

pub fn filter_valid_types(types: &ParamTypes, catalog: &TypeCatalog) -> Vec<i32> {
    types
        .codes()
        .into_iter()
        .filter(|code| catalog.is_known(*code))
        .collect()
}

/// Single field kind for a set of codes. Mixed kinds resolve by
/// `FIELD_TYPE_PRIORITY`.
pub fn classify(types: &[i32], catalog: &TypeCatalog) -> ParamFieldType {
    let kinds: HashSet<ParamFieldType> = types
        .iter()
        .map(|code| catalog.field_type_of(*code))
        .collect();

    FIELD_TYPE_PRIORITY
        .iter()
        .copied()
        .find(|kind| kinds.contains(kind))
        .unwrap_or(ParamFieldType::Invalid)
}

pub fn reconcile_param(param: &UdaParam, catalog: &TypeCatalog) -> UdaParam {
    let valid_types = filter_valid_types(&param.param_type, catalog);
    let field_type = if valid_types.is_empty() {
        ParamFieldType::Invalid
    } else {
        classify(&valid_types, catalog)
    };
    let type_strings = convert_types_to_string(&valid_types);

    let distinct: HashSet<ParamFieldType> = valid_types
        .iter()
        .map(|code| catalog.field_type_of(*code))
        .collect();
    let multi_field_types = if distinct.len() > 1 {
        Some(
            valid_types
                .iter()
                .zip(&type_strings)
                .map(|(code, name)| {
                    let mut entry = BTreeMap::new();
                    entry.insert(name.clone(), catalog.field_type_of(*code));
                    entry
                })
                .collect(),
        )
    } else {
        None
    };

    UdaParam {
        param_type: ParamTypes::Many(valid_types),
        field_type: Some(field_type),
        type_strings: Some(type_strings),
        multi_field_types,
        is_visible: Some(param.is_req),
        ..param.clone()
    }
}

pub fn reconcile_uda(params: &[UdaParam], catalog: &TypeCatalog) -> Reconciled {
    let reconciled: Vec<UdaParam> = params
        .iter()
        .map(|param| reconcile_param(param, catalog))
        .collect();

    let has_invalid_required = reconciled
        .iter()
        .any(|param| param.is_req && param.field_type == Some(ParamFieldType::Invalid));

    if has_invalid_required {
        Reconciled::Invalid
    } else {
        Reconciled::Params(reconciled)
    }
}

pub fn incompatible_error(
    metadata: Option<&Value>,
    reconciled: &Reconciled,
) -> Option<InvalidParamFieldError> {
    match (metadata, reconciled) {
        (None, _) | (Some(Value::Null), _) => Some(InvalidParamFieldError::NoMetadata),
        (_, Reconciled::Invalid) => Some(InvalidParamFieldError::BadField),
        _ => None,
    }
}

pub fn convert_types_to_string(types: &[i32]) -> Vec<String> {
    types
        .iter()
        .map(|code| {
            TypeCatalog::type_name(*code)
                .map(str::to_string)
                .unwrap_or_else(|| code.to_string())
        })
        .collect()
}

/// Type code for a type name, `0` (general list) when unknown.
pub fn retrieve_data_type_by_string(name: &str) -> i32 {
    TypeCatalog::type_code(name).unwrap_or(0)
}

fn uda_return(metadata: Option<&Value>) -> UdaReturn {
    let ret = metadata.and_then(|m| m.get("return"));
    let types = ret
        .and_then(|r| r.get("type"))
        .and_then(|t| serde_json::from_value::<ParamTypes>(t.clone()).ok())
        .unwrap_or_default();

    UdaReturn {
        return_type: convert_types_to_string(&types.codes()),
        description: ret
            .and_then(|r| r.get("description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Builds descriptors for every custom API in the meta catalog.
pub fn parse_uda_list(meta: &MetaPayload, catalog: &TypeCatalog) -> Vec<UdaDescriptor> {
    meta.custom_apis()
        .map(|api| {
            let metadata = api.metadata.as_ref().filter(|m| !m.is_null());
            let params: Vec<UdaParam> = match metadata.and_then(|m| m.get("params")) {
                Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
                    warn!("Ignoring malformed params of UDA {}: {}", api.api, e);
                    Vec::new()
                }),
                None => Vec::new(),
            };

            let reconciled = reconcile_uda(&params, catalog);
            let incompatible = incompatible_error(metadata, &reconciled);

            UdaDescriptor {
                name: api.api.clone(),
                description: metadata
                    .and_then(|m| m.get("description"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                params: match reconciled {
                    Reconciled::Params(params) => params,
                    Reconciled::Invalid => Vec::new(),
                },
                return_info: Some(uda_return(metadata)),
                incompatible_error: incompatible,
            }
        })
        .collect()
}

/// Required parameters need a value, except String and Symbol which may be
/// sent empty. `table` is always checked.
pub fn is_invalid_required_param(param: &UdaParam, catalog: &TypeCatalog) -> bool {
    if param.name == "table" && param.is_req {
        return param.value_is_empty();
    }

    let type_to_validate = match &param.param_type {
        ParamTypes::Single(code) => Some(*code),
        ParamTypes::Many(codes) if codes.len() == 1 => Some(codes[0]),
        ParamTypes::Many(codes) if codes.len() > 1 => param
            .selected_multi_type_string
            .as_deref()
            .and_then(|selected| TypeCatalog::type_code(&selected.replacen('_', " ", 1))),
        ParamTypes::Many(_) => None,
    };

    let allowed_empty = type_to_validate
        .map_or(false, |code| catalog.allowed_empty_required.contains(&code));

    !allowed_empty && param.is_req && param.value_is_empty()
}

pub fn resolve_param_type(param: &UdaParam) -> Result<i32> {
    match &param.param_type {
        ParamTypes::Single(code) => Ok(*code),
        ParamTypes::Many(codes) => codes.first().copied().ok_or_else(|| {
            InsightsError::InvalidRequest(format!(
                "Invalid type for parameter: {}. Expected number or array of numbers.",
                param.name
            ))
        }),
    }
}

/// Collects values and type codes of the visible parameters.
pub fn process_uda_params(
    uda: &UdaDescriptor,
    catalog: &TypeCatalog,
) -> Result<(Map<String, Value>, BTreeMap<String, i32>)> {
    let mut params = Map::new();
    let mut parameter_types = BTreeMap::new();

    for param in &uda.params {
        if is_invalid_required_param(param, catalog) {
            return Err(InsightsError::UdaUnavailable(format!(
                "The UDA: {} requires the parameter: {}.",
                uda.name, param.name
            )));
        }

        if param.is_visible == Some(true) {
            let value = if param.value_is_empty() {
                Value::String(String::new())
            } else {
                param.value.clone().unwrap_or_default()
            };
            params.insert(param.name.clone(), value);
            parameter_types.insert(param.name.clone(), resolve_param_type(param)?);
        }
    }

    Ok((params, parameter_types))
}

pub fn create_uda_request_body(
    name: &str,
    params: Map<String, Value>,
    parameter_types: BTreeMap<String, i32>,
    return_format: &str,
) -> UdaRequestBody {
    UdaRequestBody {
        language: "q".to_string(),
        name: name.to_string(),
        parameter_types,
        params,
        return_format: return_format.to_string(),
        sample_fn: SAMPLE_FN.to_string(),
        sample_size: SAMPLE_SIZE,
    }
}

/// Timestamp parameters are edited to minute precision; the API expects
/// nanoseconds.
pub fn fix_time_params(mut body: UdaRequestBody) -> UdaRequestBody {
    for (name, code) in &body.parameter_types {
        if *code != TIMESTAMP_TYPE {
            continue;
        }
        if let Some(Value::String(value)) = body.params.get_mut(name) {
            if !value.is_empty() {
                value.push_str(TIMESTAMP_SUFFIX);
            }
        }
    }
    body
}
