//! Year archive store: one immutable snapshot per school year, kept in the
//! workspace database, plus zip bundles for moving archives between machines.

use crate::model::{GradeObservation, Student, Subject};
use crate::years::YearKey;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const YEARS_DIR: &str = "years/";
pub const BUNDLE_FORMAT_V1: &str = "bulletin-archive-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSnapshot {
    pub year_key: String,
    pub snapshot_id: String,
    pub students: Vec<Student>,
    /// Coefficients in force when the year was archived.
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub grade_observations: Vec<GradeObservation>,
    #[serde(default)]
    pub computed_stats: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedYear {
    pub year_key: String,
    pub snapshot_id: String,
    pub saved_at: String,
}

fn checksum(payload: &str) -> String {
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

fn write_snapshot(conn: &Connection, snapshot: &YearSnapshot) -> anyhow::Result<()> {
    let payload = serde_json::to_string(snapshot).context("failed to serialize snapshot")?;
    conn.execute(
        "INSERT INTO year_snapshots(year_key, snapshot_id, payload_json, checksum, saved_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(year_key) DO UPDATE SET
           snapshot_id = excluded.snapshot_id,
           payload_json = excluded.payload_json,
           checksum = excluded.checksum,
           saved_at = excluded.saved_at",
        (
            &snapshot.year_key,
            &snapshot.snapshot_id,
            &payload,
            checksum(&payload),
            snapshot.saved_at.to_rfc3339(),
        ),
    )
    .with_context(|| format!("failed to store snapshot for {}", snapshot.year_key))?;
    Ok(())
}

/// Replaces whatever was stored for `year_key`. Nothing is merged.
pub fn archive(
    conn: &Connection,
    year_key: &str,
    students: Vec<Student>,
    subjects: Vec<Subject>,
    observations: Vec<GradeObservation>,
    computed_stats: serde_json::Value,
) -> anyhow::Result<YearSnapshot> {
    let snapshot = YearSnapshot {
        year_key: year_key.to_string(),
        snapshot_id: Uuid::new_v4().to_string(),
        students,
        subjects,
        grade_observations: observations,
        computed_stats,
        saved_at: Utc::now(),
    };
    let tx = conn
        .unchecked_transaction()
        .context("failed to begin archive transaction")?;
    write_snapshot(&tx, &snapshot)?;
    tx.commit().context("failed to commit archive")?;
    log::info!(
        "event=year_archived year={} snapshot_id={} students={} observations={}",
        snapshot.year_key,
        snapshot.snapshot_id,
        snapshot.students.len(),
        snapshot.grade_observations.len()
    );
    Ok(snapshot)
}

pub fn retrieve(conn: &Connection, year_key: &str) -> anyhow::Result<Option<YearSnapshot>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT payload_json, checksum FROM year_snapshots WHERE year_key = ?",
            [year_key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .context("failed to query year_snapshots")?;
    let Some((payload, stored_checksum)) = row else {
        return Ok(None);
    };
    if checksum(&payload) != stored_checksum {
        return Err(anyhow!("snapshot for {} failed its checksum", year_key));
    }
    let snapshot: YearSnapshot = serde_json::from_str(&payload)
        .with_context(|| format!("snapshot for {} is not valid JSON", year_key))?;
    Ok(Some(snapshot))
}

pub fn archived_years(conn: &Connection) -> anyhow::Result<Vec<ArchivedYear>> {
    let mut stmt = conn.prepare(
        "SELECT year_key, snapshot_id, saved_at FROM year_snapshots ORDER BY year_key DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ArchivedYear {
                year_key: r.get(0)?,
                snapshot_id: r.get(1)?,
                saved_at: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub year_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub years: Vec<String>,
}

pub fn export_bundle(conn: &Connection, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let years = archived_years(conn)?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut checksums: BTreeMap<String, String> = BTreeMap::new();
    for y in &years {
        let Some(snapshot) = retrieve(conn, &y.year_key)? else {
            continue;
        };
        let payload = serde_json::to_string_pretty(&snapshot)
            .context("failed to serialize snapshot")?;
        zip.start_file(format!("{}{}.json", YEARS_DIR, y.year_key), opts)
            .with_context(|| format!("failed to start entry for {}", y.year_key))?;
        zip.write_all(payload.as_bytes())
            .with_context(|| format!("failed to write entry for {}", y.year_key))?;
        checksums.insert(y.year_key.clone(), checksum(&payload));
    }

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": Utc::now().to_rfc3339(),
        "years": checksums,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        year_count: checksums.len(),
    })
}

/// Every entry is read and verified before anything is written; the writes
/// then happen in one transaction.
pub fn import_bundle(conn: &Connection, in_path: &Path) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut zip = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    zip.by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let Some(expected) = manifest.get("years").and_then(|v| v.as_object()) else {
        return Err(anyhow!("manifest.json has no years table"));
    };

    let mut snapshots = Vec::with_capacity(expected.len());
    for (year_key, sum) in expected {
        let canonical = YearKey::parse(year_key)
            .map(|k| k.to_string())
            .map_err(|e| anyhow!("manifest year {:?}: {}", year_key, e))?;
        if canonical != *year_key {
            return Err(anyhow!("manifest year {:?} should be written {}", year_key, canonical));
        }
        let entry_name = format!("{}{}.json", YEARS_DIR, year_key);
        let mut payload = String::new();
        zip.by_name(&entry_name)
            .with_context(|| format!("bundle missing {}", entry_name))?
            .read_to_string(&mut payload)
            .with_context(|| format!("failed to read {}", entry_name))?;
        if Some(checksum(&payload).as_str()) != sum.as_str() {
            return Err(anyhow!("{} failed its checksum", entry_name));
        }
        let snapshot: YearSnapshot = serde_json::from_str(&payload)
            .with_context(|| format!("{} is not a year snapshot", entry_name))?;
        if snapshot.year_key != *year_key {
            return Err(anyhow!(
                "{} holds year {} instead of {}",
                entry_name,
                snapshot.year_key,
                year_key
            ));
        }
        snapshots.push(snapshot);
    }

    let tx = conn
        .unchecked_transaction()
        .context("failed to begin import transaction")?;
    for snapshot in &snapshots {
        write_snapshot(&tx, snapshot)?;
    }
    tx.commit().context("failed to commit import")?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        years: snapshots.into_iter().map(|s| s.year_key).collect(),
    })
}
