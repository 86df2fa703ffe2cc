use crate::ipc::helpers::{optional_str, respond, session, to_json, today, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn canonical(state: &mut AppState, req: &Request) -> HandlerResult {
    let grades = session(state)?.canonical_grades(optional_str(req, "matricule"), today(req)?)?;
    Ok(json!({ "grades": to_json(&grades)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.canonical" => Some(respond(&req.id, canonical(state, req))),
        _ => None,
    }
}
