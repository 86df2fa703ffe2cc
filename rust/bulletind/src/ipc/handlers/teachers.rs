use crate::ipc::helpers::{
    parse_param, required_str, respond, session, session_mut, to_json, today, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Teacher;
use serde_json::json;

fn list(state: &mut AppState, req: &Request) -> HandlerResult {
    Ok(json!({ "teachers": to_json(&session(state)?.teachers(today(req)?)?)? }))
}

fn get(state: &mut AppState, req: &Request) -> HandlerResult {
    let id = required_str(req, "id")?;
    to_json(session(state)?.teacher(id, today(req)?)?)
}

fn create(state: &mut AppState, req: &Request) -> HandlerResult {
    let teacher: Teacher = parse_param(req, "teacher")?;
    let today = today(req)?;
    to_json(&session_mut(state)?.create_teacher(teacher, today)?)
}

fn update(state: &mut AppState, req: &Request) -> HandlerResult {
    let id = required_str(req, "id")?;
    let teacher: Teacher = parse_param(req, "teacher")?;
    let today = today(req)?;
    to_json(&session_mut(state)?.update_teacher(id, teacher, today)?)
}

fn delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let id = required_str(req, "id")?;
    let today = today(req)?;
    session_mut(state)?.delete_teacher(id, today)?;
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => list(state, req),
        "teachers.get" => get(state, req),
        "teachers.create" => create(state, req),
        "teachers.update" => update(state, req),
        "teachers.delete" => delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
