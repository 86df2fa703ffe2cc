use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub matricule: String,
    pub nom: String,
    pub prenom: String,
    pub classe: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_naissance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adresse: Option<String>,
    /// subject code -> manually entered score
    #[serde(default)]
    pub notes: BTreeMap<String, f64>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.nom, self.prenom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub code: String,
    pub name: String,
    pub coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    #[serde(default)]
    pub id: String,
    pub nom: String,
    pub prenom: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(default)]
    pub matieres: Vec<String>,
}

/// One grade as seen by one input channel. Manual notes carry no time;
/// mobile submissions come from the OCR correction pipeline and do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GradeObservation {
    ManualNote {
        student: String,
        subject: String,
        score: f64,
    },
    MobileSubmission {
        student: String,
        subject: String,
        score: f64,
        #[serde(rename = "submittedAt")]
        submitted_at: DateTime<Utc>,
        /// Position in the results listing; later listings win ties.
        #[serde(default)]
        seq: u64,
    },
}

impl GradeObservation {
    pub fn student(&self) -> &str {
        match self {
            GradeObservation::ManualNote { student, .. } => student,
            GradeObservation::MobileSubmission { student, .. } => student,
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            GradeObservation::ManualNote { subject, .. } => subject,
            GradeObservation::MobileSubmission { subject, .. } => subject,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            GradeObservation::ManualNote { score, .. } => *score,
            GradeObservation::MobileSubmission { score, .. } => *score,
        }
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, GradeObservation::MobileSubmission { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeSource {
    Manual,
    Mobile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalGrade {
    pub student: String,
    pub subject: String,
    pub score: f64,
    pub source: GradeSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Row of the results listing exposed by the REST collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileResult {
    pub student_matricule: String,
    pub subject_code: String,
    pub score: f64,
    pub created_at: String,
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn score_in_range(v: f64) -> bool {
    v.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&v)
}

pub fn validate_score(subject: &str, score: f64) -> Result<(), String> {
    if score_in_range(score) {
        Ok(())
    } else {
        Err(format!(
            "score for {} must be between {} and {} (got {})",
            subject, MIN_SCORE, MAX_SCORE, score
        ))
    }
}

pub fn validate_student(
    student: &Student,
    known_subjects: &HashSet<&str>,
    today: NaiveDate,
) -> Vec<String> {
    let mut errors = Vec::new();
    if blank(&student.matricule) {
        errors.push("matricule is required".to_string());
    }
    if blank(&student.nom) {
        errors.push("nom is required".to_string());
    }
    if blank(&student.prenom) {
        errors.push("prenom is required".to_string());
    }
    if blank(&student.classe) {
        errors.push("classe is required".to_string());
    }
    match student.genre.trim() {
        "M" | "F" => {}
        other => errors.push(format!("genre must be M or F (got '{}')", other)),
    }
    if let Some(raw) = student.date_naissance.as_deref().filter(|s| !blank(s)) {
        match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
            Ok(d) if d > today => errors.push("dateNaissance cannot be in the future".to_string()),
            Ok(_) => {}
            Err(_) => errors.push(format!("dateNaissance must be YYYY-MM-DD (got '{}')", raw)),
        }
    }
    for (code, score) in &student.notes {
        if !known_subjects.contains(code.as_str()) {
            errors.push(format!("note references unknown subject {}", code));
        }
        if let Err(msg) = validate_score(code, *score) {
            errors.push(msg);
        }
    }
    errors
}

pub fn validate_subject(subject: &Subject) -> Vec<String> {
    let mut errors = Vec::new();
    if blank(&subject.code) {
        errors.push("code is required".to_string());
    }
    if blank(&subject.name) {
        errors.push("name is required".to_string());
    }
    if !(subject.coefficient.is_finite() && subject.coefficient > 0.0) {
        errors.push(format!(
            "coefficient must be a positive number (got {})",
            subject.coefficient
        ));
    }
    errors
}

fn plausible_email(email: &str) -> bool {
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

pub fn validate_teacher(teacher: &Teacher, known_subjects: &HashSet<&str>) -> Vec<String> {
    let mut errors = Vec::new();
    if blank(&teacher.nom) {
        errors.push("nom is required".to_string());
    }
    if blank(&teacher.prenom) {
        errors.push("prenom is required".to_string());
    }
    if !plausible_email(teacher.email.trim()) {
        errors.push(format!("email is invalid (got '{}')", teacher.email));
    }
    for code in &teacher.matieres {
        if !known_subjects.contains(code.as_str()) {
            errors.push(format!("matiere references unknown subject {}", code));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> Student {
        Student {
            matricule: "S1".into(),
            nom: "Diallo".into(),
            prenom: "Awa".into(),
            classe: "6A".into(),
            genre: "F".into(),
            date_naissance: Some("2012-03-04".into()),
            telephone: None,
            adresse: None,
            notes: BTreeMap::from([("MTH".to_string(), 14.0)]),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    #[test]
    fn valid_student_passes() {
        let known = HashSet::from(["MTH"]);
        assert!(validate_student(&student(), &known, today()).is_empty());
    }

    #[test]
    fn student_errors_are_collected_together() {
        let mut s = student();
        s.nom = " ".into();
        s.genre = "X".into();
        s.notes.insert("PHY".into(), 21.0);
        let known = HashSet::from(["MTH"]);
        let errors = validate_student(&s, &known, today());
        assert_eq!(errors.len(), 4, "{errors:?}");
    }

    #[test]
    fn subject_coefficient_must_be_positive() {
        let s = Subject {
            code: "MTH".into(),
            name: "Maths".into(),
            coefficient: 0.0,
        };
        assert_eq!(validate_subject(&s).len(), 1);
    }

    #[test]
    fn teacher_email_shape() {
        assert!(plausible_email("a.b@ecole.sn"));
        assert!(!plausible_email("a@b"));
        assert!(!plausible_email("@ecole.sn"));
        assert!(!plausible_email("a@@ecole.sn"));
    }

    #[test]
    fn observations_use_tagged_wire_shape() {
        let o: GradeObservation = serde_json::from_value(serde_json::json!({
            "kind": "mobileSubmission",
            "student": "S1",
            "subject": "MTH",
            "score": 16.0,
            "submittedAt": "2025-03-01T10:00:00Z"
        }))
        .expect("parse observation");
        assert!(o.is_mobile());
        assert_eq!(o.student(), "S1");
    }
}
