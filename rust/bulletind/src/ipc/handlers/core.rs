use crate::config;
use crate::db;
use crate::ipc::helpers::{respond, to_json, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::session::Session;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(
        &req.id,
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "connectivity": state.session.as_ref().map(|s| s.connectivity()),
        })),
    )
}

fn workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let path = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr::bad_params("missing params.path"))?;

    let conn = db::open_db(&path).map_err(|e| HandlerErr {
        code: "db_open_failed",
        message: format!("{e:#}"),
        details: None,
    })?;
    let storage = |e: anyhow::Error| HandlerErr::from(crate::error::EngineError::storage(e));

    let mut engine_config = config::load_engine_config(&conn).map_err(storage)?;
    if let Some(patch) = req.params.get("config") {
        engine_config = engine_config.merged(patch).map_err(HandlerErr::bad_params)?;
        config::save_engine_config(&conn, &engine_config).map_err(storage)?;
    }

    // Stop the previous workspace's monitor before the new one starts polling.
    state.session = None;
    let session = Session::open(conn, engine_config.clone())?;
    log::info!(
        "event=workspace_selected path={} api_configured={}",
        path.display(),
        engine_config.api_base_url.is_some()
    );
    state.workspace = Some(path.clone());
    state.session = Some(session);

    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "config": to_json(&engine_config)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(respond(&req.id, workspace_select(state, req))),
        _ => None,
    }
}
