use crate::ipc::helpers::{
    optional_str, parse_param, required_f64, required_str, respond, session, session_mut, to_json,
    today, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Student;
use crate::stats::same_class;
use serde_json::json;

fn list(state: &mut AppState, req: &Request) -> HandlerResult {
    let s = session(state)?;
    let classe = optional_str(req, "classe");
    let students: Vec<&Student> = s
        .students(today(req)?)?
        .iter()
        .filter(|st| classe.map_or(true, |c| same_class(&st.classe, c)))
        .collect();
    Ok(json!({ "students": to_json(&students)? }))
}

fn get(state: &mut AppState, req: &Request) -> HandlerResult {
    let matricule = required_str(req, "matricule")?;
    to_json(session(state)?.student(matricule, today(req)?)?)
}

fn create(state: &mut AppState, req: &Request) -> HandlerResult {
    let student: Student = parse_param(req, "student")?;
    let today = today(req)?;
    to_json(&session_mut(state)?.create_student(student, today)?)
}

fn update(state: &mut AppState, req: &Request) -> HandlerResult {
    let matricule = required_str(req, "matricule")?;
    let student: Student = parse_param(req, "student")?;
    let today = today(req)?;
    to_json(&session_mut(state)?.update_student(matricule, student, today)?)
}

fn delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let matricule = required_str(req, "matricule")?;
    let today = today(req)?;
    session_mut(state)?.delete_student(matricule, today)?;
    Ok(json!({ "deleted": matricule }))
}

fn note_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let matricule = required_str(req, "matricule")?;
    let subject = required_str(req, "subject")?;
    let score = required_f64(req, "score")?;
    let today = today(req)?;
    to_json(&session_mut(state)?.set_note(matricule, subject, score, today)?)
}

fn note_clear(state: &mut AppState, req: &Request) -> HandlerResult {
    let matricule = required_str(req, "matricule")?;
    let subject = required_str(req, "subject")?;
    let today = today(req)?;
    to_json(&session_mut(state)?.clear_note(matricule, subject, today)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => list(state, req),
        "students.get" => get(state, req),
        "students.create" => create(state, req),
        "students.update" => update(state, req),
        "students.delete" => delete(state, req),
        "notes.set" => note_set(state, req),
        "notes.clear" => note_clear(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
