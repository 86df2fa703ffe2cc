use crate::ipc::helpers::{
    optional_str, required_str, respond, session, to_json, today, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn student(state: &mut AppState, req: &Request) -> HandlerResult {
    let matricule = required_str(req, "matricule")?;
    to_json(&session(state)?.student_report(matricule, today(req)?)?)
}

fn class(state: &mut AppState, req: &Request) -> HandlerResult {
    let classe = required_str(req, "classe")?;
    to_json(&session(state)?.class_aggregate(classe, today(req)?)?)
}

fn school(state: &mut AppState, req: &Request) -> HandlerResult {
    to_json(&session(state)?.school_aggregate(today(req)?)?)
}

fn ranking(state: &mut AppState, req: &Request) -> HandlerResult {
    let classe = required_str(req, "classe")?;
    let ranking = session(state)?.class_ranking(classe, today(req)?)?;
    Ok(json!({ "classe": classe, "ranking": to_json(&ranking)? }))
}

fn export_table(state: &mut AppState, req: &Request) -> HandlerResult {
    to_json(&session(state)?.export_table(optional_str(req, "classe"), today(req)?)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "stats.student" => student(state, req),
        "stats.class" => class(state, req),
        "stats.school" => school(state, req),
        "stats.ranking" => ranking(state, req),
        "export.table" => export_table(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
