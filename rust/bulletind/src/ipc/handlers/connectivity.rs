use crate::ipc::helpers::{respond, session, to_json, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn status(state: &mut AppState, _req: &Request) -> HandlerResult {
    let s = session(state)?;
    Ok(json!({
        "connectivity": to_json(&s.connectivity())?,
        "apiConfigured": s.config().api_base_url.is_some(),
    }))
}

fn reconnect(state: &mut AppState, _req: &Request) -> HandlerResult {
    let attempt = session(state)?.reconnect(&std::thread::sleep)?;
    Ok(json!({ "connectivity": "connected", "attempt": attempt }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "connectivity.status" => status(state, req),
        "connectivity.reconnect" => reconnect(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
