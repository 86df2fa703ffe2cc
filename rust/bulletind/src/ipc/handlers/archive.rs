use crate::ipc::helpers::{required_str, respond, session, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn export_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    let out_path = PathBuf::from(required_str(req, "outPath")?);
    let summary = session(state)?.export_archive(&out_path)?;
    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "yearCount": summary.year_count,
    }))
}

fn import_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    let in_path = PathBuf::from(required_str(req, "inPath")?);
    let summary = session(state)?.import_archive(&in_path)?;
    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected,
        "years": summary.years,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "archive.exportBundle" => export_bundle(state, req),
        "archive.importBundle" => import_bundle(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
