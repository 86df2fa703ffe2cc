//! Grade reconciliation: turns the two input channels (manual notes stored on
//! each student, mobile submissions from the OCR pipeline) into one canonical
//! score per (student, subject), and scales it for averaging.

use crate::model::{
    validate_score, CanonicalGrade, GradeObservation, GradeSource, MobileResult, Student, Subject,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashSet};

/// Where the mobile half of the observation stream comes from.
#[derive(Debug, Clone, Copy)]
pub enum GradeFeed<'a> {
    /// Current year: the live results listing.
    Live(&'a [MobileResult]),
    /// Past year: observations stored in the year snapshot.
    Archived(&'a [GradeObservation]),
    /// Future year: nothing is ever surfaced.
    NotYetOpen,
}

fn parse_submitted_at(raw: &str) -> Option<DateTime<Utc>> {
    let t = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    // Some backends emit SQL-style timestamps without an offset.
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(t, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Converts the results listing into mobile observations. Rows with an
/// unreadable timestamp are skipped; the listing position becomes `seq`.
pub fn mobile_observations(results: &[MobileResult]) -> Vec<GradeObservation> {
    let mut out = Vec::with_capacity(results.len());
    for (i, r) in results.iter().enumerate() {
        let Some(submitted_at) = parse_submitted_at(&r.created_at) else {
            log::warn!(
                "event=mobile_result_skipped reason=bad_timestamp student={} subject={} created_at={}",
                r.student_matricule,
                r.subject_code,
                r.created_at
            );
            continue;
        };
        out.push(GradeObservation::MobileSubmission {
            student: r.student_matricule.trim().to_string(),
            subject: r.subject_code.trim().to_string(),
            score: r.score,
            submitted_at,
            seq: i as u64,
        });
    }
    out
}

/// Builds the uniform observation stream for the given students and subjects.
/// Observations for students or subjects outside the sets are dropped.
pub fn observations_for(
    students: &[Student],
    subjects: &[Subject],
    feed: GradeFeed<'_>,
) -> Vec<GradeObservation> {
    if matches!(feed, GradeFeed::NotYetOpen) {
        return Vec::new();
    }
    let student_ids: HashSet<&str> = students.iter().map(|s| s.matricule.as_str()).collect();
    let subject_codes: HashSet<&str> = subjects.iter().map(|s| s.code.as_str()).collect();

    let mut out = Vec::new();
    for s in students {
        for (code, score) in &s.notes {
            if !subject_codes.contains(code.as_str()) {
                continue;
            }
            out.push(GradeObservation::ManualNote {
                student: s.matricule.clone(),
                subject: code.clone(),
                score: *score,
            });
        }
    }

    let mobile = match feed {
        GradeFeed::Live(results) => mobile_observations(results),
        GradeFeed::Archived(stored) => stored.iter().filter(|o| o.is_mobile()).cloned().collect(),
        GradeFeed::NotYetOpen => Vec::new(),
    };
    out.extend(mobile.into_iter().filter(|o| {
        student_ids.contains(o.student()) && subject_codes.contains(o.subject())
    }));
    out
}

pub type GradeKey = (String, String);

/// Mobile beats manual. Between mobile submissions the later `submittedAt`
/// wins, then the higher `seq`. Between duplicate manual notes the first one
/// seen is kept.
fn supersedes(candidate: &GradeObservation, current: &GradeObservation) -> bool {
    match (candidate, current) {
        (GradeObservation::MobileSubmission { .. }, GradeObservation::ManualNote { .. }) => true,
        (GradeObservation::ManualNote { .. }, _) => false,
        (
            GradeObservation::MobileSubmission {
                submitted_at: a,
                seq: sa,
                ..
            },
            GradeObservation::MobileSubmission {
                submitted_at: b,
                seq: sb,
                ..
            },
        ) => (a, sa) > (b, sb),
    }
}

pub fn resolve(observations: &[GradeObservation]) -> BTreeMap<GradeKey, CanonicalGrade> {
    let mut best: BTreeMap<GradeKey, &GradeObservation> = BTreeMap::new();
    for o in observations {
        let key = (o.student().to_string(), o.subject().to_string());
        let replace = best
            .get(&key)
            .map_or(true, |current| supersedes(o, current));
        if replace {
            best.insert(key, o);
        }
    }

    best.into_iter()
        .map(|(key, o)| {
            let grade = match o {
                GradeObservation::ManualNote {
                    student,
                    subject,
                    score,
                } => CanonicalGrade {
                    student: student.clone(),
                    subject: subject.clone(),
                    score: *score,
                    source: GradeSource::Manual,
                    submitted_at: None,
                },
                GradeObservation::MobileSubmission {
                    student,
                    subject,
                    score,
                    submitted_at,
                    ..
                } => CanonicalGrade {
                    student: student.clone(),
                    subject: subject.clone(),
                    score: *score,
                    source: GradeSource::Mobile,
                    submitted_at: Some(*submitted_at),
                },
            };
            (key, grade)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    pub score_over_20: f64,
    pub weighted_contribution: f64,
}

/// Raw scores are always on the 0-20 scale; the coefficient only weights the
/// score inside an average.
pub fn normalize(raw_score: f64, coefficient: f64) -> Result<Normalized, String> {
    if !(coefficient.is_finite() && coefficient > 0.0) {
        return Err(format!("coefficient must be positive (got {})", coefficient));
    }
    validate_score("grade", raw_score)?;
    Ok(Normalized {
        score_over_20: raw_score,
        weighted_contribution: raw_score * coefficient,
    })
}
