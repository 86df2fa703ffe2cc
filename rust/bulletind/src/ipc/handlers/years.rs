use crate::ipc::helpers::{
    optional_str, parse_param, required_str, respond, session, session_mut, to_json, today,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{GradeObservation, Student, Subject};
use crate::years::SchoolYearConfig;
use serde_json::json;

fn config_get(state: &mut AppState, _req: &Request) -> HandlerResult {
    to_json(&session(state)?.school_year_config()?)
}

fn config_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let cfg: SchoolYearConfig = parse_param(req, "config")?;
    let today = today(req)?;
    session_mut(state)?.set_school_year_config(cfg, today)?;
    to_json(&cfg)
}

fn current(state: &mut AppState, req: &Request) -> HandlerResult {
    let key = session(state)?.current_year(today(req)?)?;
    Ok(json!({ "year": key.to_string() }))
}

fn classify(state: &mut AppState, req: &Request) -> HandlerResult {
    let year = required_str(req, "year")?;
    let class = session(state)?.classify(year, today(req)?)?;
    Ok(json!({ "year": year, "classification": to_json(&class)? }))
}

fn mode(state: &mut AppState, req: &Request) -> HandlerResult {
    let today = today(req)?;
    let s = session(state)?;
    let year = match optional_str(req, "year") {
        Some(y) => y.to_string(),
        None => s.current_year(today)?.to_string(),
    };
    to_json(&s.mode(&year, today)?)
}

fn select(state: &mut AppState, req: &Request) -> HandlerResult {
    let today = today(req)?;
    let s = session_mut(state)?;
    let year = match optional_str(req, "year") {
        Some(y) => y.to_string(),
        None => s.current_year(today)?.to_string(),
    };
    to_json(&s.select_year(&year, today)?)
}

/// Without `students` the selected current year is archived; with them the
/// given dataset is stored for a past year.
fn archive(state: &mut AppState, req: &Request) -> HandlerResult {
    let today = today(req)?;
    let s = session(state)?;
    let snapshot = if req.params.get("students").is_some() {
        let year = required_str(req, "year")?;
        let students: Vec<Student> = parse_param(req, "students")?;
        let subjects: Vec<Subject> = match req.params.get("subjects") {
            Some(_) => parse_param(req, "subjects")?,
            None => Vec::new(),
        };
        let observations: Vec<GradeObservation> = match req.params.get("gradeObservations") {
            Some(_) => parse_param(req, "gradeObservations")?,
            None => Vec::new(),
        };
        s.archive_explicit(year, students, subjects, observations, today)?
    } else {
        let year = match optional_str(req, "year") {
            Some(y) => y.to_string(),
            None => s.current_year(today)?.to_string(),
        };
        s.archive_year(&year, today)?
    };
    Ok(json!({
        "year": snapshot.year_key,
        "snapshotId": snapshot.snapshot_id,
        "savedAt": snapshot.saved_at.to_rfc3339(),
        "students": snapshot.students.len(),
        "observations": snapshot.grade_observations.len(),
    }))
}

fn retrieve(state: &mut AppState, req: &Request) -> HandlerResult {
    let year = required_str(req, "year")?;
    let snapshot = session(state)?.retrieve(year, today(req)?)?;
    Ok(json!({ "snapshot": to_json(&snapshot)? }))
}

fn archived(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(json!({ "years": to_json(&session(state)?.archived_years()?)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "years.config.get" => config_get(state, req),
        "years.config.set" => config_set(state, req),
        "years.current" => current(state, req),
        "years.classify" => classify(state, req),
        "years.mode" => mode(state, req),
        "years.select" => select(state, req),
        "years.archive" => archive(state, req),
        "years.retrieve" => retrieve(state, req),
        "years.archived" => archived(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
