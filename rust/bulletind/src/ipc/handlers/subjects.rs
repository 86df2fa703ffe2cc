use crate::ipc::helpers::{
    parse_param, required_str, respond, session, session_mut, to_json, today, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Subject;
use serde_json::json;

fn list(state: &mut AppState, req: &Request) -> HandlerResult {
    let mut subjects: Vec<&Subject> = session(state)?.subjects(today(req)?)?.iter().collect();
    subjects.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(json!({ "subjects": to_json(&subjects)? }))
}

fn get(state: &mut AppState, req: &Request) -> HandlerResult {
    let code = required_str(req, "code")?;
    to_json(session(state)?.subject(code, today(req)?)?)
}

fn create(state: &mut AppState, req: &Request) -> HandlerResult {
    let subject: Subject = parse_param(req, "subject")?;
    let today = today(req)?;
    to_json(&session_mut(state)?.create_subject(subject, today)?)
}

fn update(state: &mut AppState, req: &Request) -> HandlerResult {
    let code = required_str(req, "code")?;
    let subject: Subject = parse_param(req, "subject")?;
    let today = today(req)?;
    to_json(&session_mut(state)?.update_subject(code, subject, today)?)
}

fn delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let code = required_str(req, "code")?;
    let today = today(req)?;
    session_mut(state)?.delete_subject(code, today)?;
    Ok(json!({ "deleted": code }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subjects.list" => list(state, req),
        "subjects.get" => get(state, req),
        "subjects.create" => create(state, req),
        "subjects.update" => update(state, req),
        "subjects.delete" => delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
