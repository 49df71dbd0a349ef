//! Wire protocol for `harvest serve`.
//!
//! Messages are newline-delimited JSON on stdio:
//! `{"id", "method", "params"}` → `{"id", "result"}` or `{"id", "error"}`.

use crate::binding::PageBinding;
use crate::harvester::Harvester;
use crate::types::{Action, ExtractionRequest};
use anyhow::{bail, Result};
use serde_json::{json, Value};
use tracing::{debug, error};

pub const E_PARSE: &str = "E_PARSE";
pub const E_INVALID_METHOD: &str = "E_INVALID_METHOD";
pub const E_INVALID_PARAMS: &str = "E_INVALID_PARAMS";
pub const E_BINDING_UNAVAILABLE: &str = "E_BINDING_UNAVAILABLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Extract,
    Continue,
    EndSession,
    Status,
}

impl Method {
    /// Parse a method name string into a Method enum.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "extract" => Ok(Self::Extract),
            "continue" => Ok(Self::Continue),
            "end_session" => Ok(Self::EndSession),
            "status" => Ok(Self::Status),
            _ => bail!("unknown method: {s}"),
        }
    }

    /// The session action a method maps to, if any.
    pub fn action(&self) -> Option<Action> {
        match self {
            Self::Extract => Some(Action::Extract),
            Self::Continue => Some(Action::Continue),
            Self::EndSession => Some(Action::EndSession),
            Self::Status => None,
        }
    }
}

/// A parsed protocol request.
#[derive(Debug)]
pub struct Request {
    pub id: String,
    pub method: Method,
    pub params: Value,
}

fn request_id(v: &Value) -> String {
    v.get("id")
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parse an already-decoded request object.
pub fn parse_value(v: &Value) -> Result<Request> {
    let id = request_id(v);
    let method_str = v
        .get("method")
        .and_then(|m| m.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing 'method' field"))?;
    let method = Method::from_str(method_str)?;
    let params = v.get("params").cloned().unwrap_or(Value::Object(Default::default()));
    Ok(Request { id, method, params })
}

/// Parse a JSON request line.
pub fn parse_request(json: &str) -> Result<Request> {
    let v: Value = serde_json::from_str(json)?;
    parse_value(&v)
}

/// Build the extraction request a session method carries in its params.
pub fn extraction_request(method: Method, params: &Value) -> Result<ExtractionRequest> {
    let Some(action) = method.action() else {
        bail!("method carries no extraction request");
    };
    let mut params = match params {
        Value::Object(map) => map.clone(),
        _ => bail!("params must be an object"),
    };
    params.insert("action".into(), serde_json::to_value(action)?);
    let request: ExtractionRequest = serde_json::from_value(Value::Object(params))?;
    if request.session_id.trim().is_empty() {
        bail!("sessionId must not be empty");
    }
    Ok(request)
}

/// Format a successful response as JSON string (newline-terminated).
pub fn format_response(id: &str, result: Value) -> String {
    let resp = json!({
        "id": id,
        "result": result,
    });
    format!("{}\n", resp)
}

/// Format an error response as JSON string (newline-terminated).
pub fn format_error(id: &str, code: &str, message: &str) -> String {
    let resp = json!({
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    });
    format!("{}\n", resp)
}

/// Handle one request line and produce the newline-terminated reply.
pub async fn dispatch(harvester: &mut Harvester, binding: &dyn PageBinding, line: &str) -> String {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return format_error("unknown", E_PARSE, &e.to_string()),
    };
    let request = match parse_value(&value) {
        Ok(r) => r,
        Err(e) => return format_error(&request_id(&value), E_INVALID_METHOD, &e.to_string()),
    };
    debug!(id = %request.id, method = ?request.method, "dispatching request");

    if request.method == Method::Status {
        let Some(session_id) = request.params.get("sessionId").and_then(Value::as_str) else {
            return format_response(
                &request.id,
                json!({"version": env!("CARGO_PKG_VERSION"), "sessions": harvester.session_count()}),
            );
        };
        return match harvester.status(session_id) {
            Some(status) => match serde_json::to_value(status) {
                Ok(v) => format_response(&request.id, v),
                Err(e) => format_error(&request.id, E_INVALID_PARAMS, &e.to_string()),
            },
            None => format_error(
                &request.id,
                E_INVALID_PARAMS,
                &format!("unknown session {session_id}"),
            ),
        };
    }

    let extraction = match extraction_request(request.method, &request.params) {
        Ok(r) => r,
        Err(e) => return format_error(&request.id, E_INVALID_PARAMS, &format!("{e:#}")),
    };
    match harvester.handle(binding, &extraction).await {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(v) => format_response(&request.id, v),
            Err(e) => format_error(&request.id, E_INVALID_PARAMS, &e.to_string()),
        },
        Err(e) => {
            error!(id = %request.id, error = %e, "binding unavailable");
            format_error(&request.id, E_BINDING_UNAVAILABLE, &e.to_string())
        }
    }
}
