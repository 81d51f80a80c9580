use crate::error::{InsightsError, Result};
use crate::models::request_body::ScopeObject;

/// Largest expression accepted by the scratchpad.
pub const QUERY_CHAR_LIMIT: usize = 250_000;

const SCOPE_AFFINITY: &str = "soft";

/// Cleans up a QSQL target such as `"  myassembly-qe   instance1 "` into
/// `"myassembly instance1"`.
pub fn normalize_assembly_target(target: &str) -> String {
    let mut parts: Vec<String> = target.split_whitespace().map(str::to_string).collect();
    if let Some(first) = parts.first_mut() {
        if let Some(stripped) = first.strip_suffix("-qe") {
            *first = stripped.to_string();
        }
    }
    parts.join(" ")
}

/// Splits a target into the scope sent with QSQL queries:
/// `"<assembly> <tier> <dap>"`, tier and dap optional.
pub fn split_target(target: &str) -> ScopeObject {
    let normalized = normalize_assembly_target(target);
    let mut parts = normalized.split_whitespace().map(str::to_string);

    ScopeObject {
        affinity: Some(SCOPE_AFFINITY.to_string()),
        assembly: parts.next().unwrap_or_default(),
        tier: parts.next(),
        dap: parts.next(),
    }
}

/// Collapses a multi-line q expression into a single line the query
/// environment accepts.
///
/// Comments are dropped, statement breaks become `;` and line breaks inside
/// string literals become the two characters `\n`. A line starting with
/// whitespace continues the previous statement.
pub fn normalize_qsql_query(query: &str) -> String {
    let text = query.replace("\r\n", "\n");
    let text = text.trim();

    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut in_block = false;

    for line in text.split('\n') {
        if in_string {
            out.push_str("\\n");
        } else {
            if in_block {
                if line.trim_end() == "\\" {
                    in_block = false;
                }
                continue;
            }
            if line.trim_end() == "/" {
                in_block = true;
                continue;
            }
            if line.starts_with('/') || line.trim().is_empty() {
                continue;
            }
            if !out.is_empty() && !line.starts_with(char::is_whitespace) {
                out.push(';');
            }
        }

        let mut segment = String::with_capacity(line.len());
        let mut escaped = false;
        let mut prev: Option<char> = None;

        for c in line.chars() {
            if in_string {
                segment.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
            } else if c == '"' {
                in_string = true;
                segment.push(c);
            } else if c == '/' && prev.map_or(false, char::is_whitespace) {
                // trailing comment
                break;
            } else {
                segment.push(c);
            }
            prev = Some(c);
        }

        if in_string {
            out.push_str(&segment);
        } else {
            out.push_str(segment.trim_end());
        }
    }

    out
}

/// QSQL bodies only carry q. Python goes through the scratchpad instead.
pub fn qsql_wrapper(query: &str, is_python: bool) -> Result<String> {
    if is_python {
        return Err(InsightsError::InvalidRequest(
            "Python is not supported for QSQL queries".to_string(),
        ));
    }
    Ok(normalize_qsql_query(query))
}

/// Rejects expressions the scratchpad would refuse.
pub fn normalize_query(query: &str) -> Result<String> {
    let len = query.chars().count();
    if len > QUERY_CHAR_LIMIT {
        return Err(InsightsError::InvalidRequest(format!(
            "Query is too long ({} characters, limit is {})",
            len, QUERY_CHAR_LIMIT
        )));
    }
    Ok(query.to_string())
}
