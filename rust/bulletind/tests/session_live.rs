mod test_support;

use bulletind::api::{ApiError, ApiResult, SchoolApi};
use bulletind::config::EngineConfig;
use bulletind::db;
use bulletind::error::EngineError;
use bulletind::model::{GradeObservation, GradeSource, MobileResult, Student, Subject, Teacher};
use bulletind::session::Session;
use bulletind::stats::Bucket;
use bulletind::years::{AccessMode, Connectivity, YearClass};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use test_support::temp_dir;

#[derive(Default)]
struct FakeState {
    students: Vec<Student>,
    subjects: Vec<Subject>,
    teachers: Vec<Teacher>,
    results: Vec<MobileResult>,
    down: bool,
    failing: HashSet<&'static str>,
    reject_next: Option<u16>,
    next_id: u32,
}

/// In-memory stand-in for the school REST service.
#[derive(Default)]
struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake api lock")
    }

    fn gate(&self, branch: &'static str) -> ApiResult<MutexGuard<'_, FakeState>> {
        let mut st = self.state();
        if st.down || st.failing.contains(branch) {
            return Err(ApiError::Transport(format!("{branch}: connection refused")));
        }
        if let Some(status) = st.reject_next.take() {
            return Err(ApiError::Status {
                status,
                message: "rejected".into(),
            });
        }
        Ok(st)
    }
}

impl SchoolApi for FakeApi {
    fn ping(&self) -> ApiResult<()> {
        self.gate("ping").map(|_| ())
    }

    fn list_students(&self) -> ApiResult<Vec<Student>> {
        Ok(self.gate("students")?.students.clone())
    }
    fn create_student(&self, student: &Student) -> ApiResult<Student> {
        self.gate("students")?.students.push(student.clone());
        Ok(student.clone())
    }
    fn update_student(&self, matricule: &str, student: &Student) -> ApiResult<Student> {
        let mut st = self.gate("students")?;
        for s in st.students.iter_mut().filter(|s| s.matricule == matricule) {
            *s = student.clone();
        }
        Ok(student.clone())
    }
    fn delete_student(&self, matricule: &str) -> ApiResult<()> {
        self.gate("students")?
            .students
            .retain(|s| s.matricule != matricule);
        Ok(())
    }

    fn list_subjects(&self) -> ApiResult<Vec<Subject>> {
        Ok(self.gate("subjects")?.subjects.clone())
    }
    fn create_subject(&self, subject: &Subject) -> ApiResult<Subject> {
        self.gate("subjects")?.subjects.push(subject.clone());
        Ok(subject.clone())
    }
    fn update_subject(&self, code: &str, subject: &Subject) -> ApiResult<Subject> {
        let mut st = self.gate("subjects")?;
        for s in st.subjects.iter_mut().filter(|s| s.code == code) {
            *s = subject.clone();
        }
        Ok(subject.clone())
    }
    fn delete_subject(&self, code: &str) -> ApiResult<()> {
        self.gate("subjects")?.subjects.retain(|s| s.code != code);
        Ok(())
    }

    fn list_teachers(&self) -> ApiResult<Vec<Teacher>> {
        Ok(self.gate("teachers")?.teachers.clone())
    }
    fn create_teacher(&self, teacher: &Teacher) -> ApiResult<Teacher> {
        let mut st = self.gate("teachers")?;
        st.next_id += 1;
        let mut created = teacher.clone();
        created.id = format!("T{}", st.next_id);
        st.teachers.push(created.clone());
        Ok(created)
    }
    fn update_teacher(&self, id: &str, teacher: &Teacher) -> ApiResult<Teacher> {
        let mut st = self.gate("teachers")?;
        for t in st.teachers.iter_mut().filter(|t| t.id == id) {
            *t = teacher.clone();
        }
        Ok(teacher.clone())
    }
    fn delete_teacher(&self, id: &str) -> ApiResult<()> {
        self.gate("teachers")?.teachers.retain(|t| t.id != id);
        Ok(())
    }

    fn list_results(&self) -> ApiResult<Vec<MobileResult>> {
        Ok(self.gate("results")?.results.clone())
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

const YEAR: &str = "2024-2025";

fn today() -> NaiveDate {
    date(2025, 3, 10)
}

fn student(matricule: &str, classe: &str, notes: &[(&str, f64)]) -> Student {
    Student {
        matricule: matricule.to_string(),
        nom: format!("Nom{matricule}"),
        prenom: "Prenom".to_string(),
        classe: classe.to_string(),
        genre: "F".to_string(),
        date_naissance: Some("2012-05-04".to_string()),
        telephone: None,
        adresse: None,
        notes: notes
            .iter()
            .map(|(code, score)| (code.to_string(), *score))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn subject(code: &str, coefficient: f64) -> Subject {
    Subject {
        code: code.to_string(),
        name: format!("Matiere {code}"),
        coefficient,
    }
}

/// MTH coeff 2 and FRA coeff 1; S1 has manual MTH=14 and FRA=10, and the
/// mobile pipeline later corrected MTH to 16.
fn seeded_api() -> Arc<FakeApi> {
    let api = Arc::new(FakeApi::default());
    {
        let mut st = api.state();
        st.subjects = vec![subject("MTH", 2.0), subject("FRA", 1.0)];
        st.students = vec![
            student("S1", "6A", &[("MTH", 14.0), ("FRA", 10.0)]),
            student("S2", "6A", &[("MTH", 9.0)]),
        ];
        st.teachers = vec![Teacher {
            id: "T0".into(),
            nom: "Ndiaye".into(),
            prenom: "Moussa".into(),
            email: "m.ndiaye@ecole.sn".into(),
            telephone: None,
            matieres: vec!["MTH".into()],
        }];
        st.results = vec![MobileResult {
            student_matricule: "S1".into(),
            subject_code: "MTH".into(),
            score: 16.0,
            created_at: "2025-02-01 09:00:00".into(),
        }];
    }
    api
}

fn open_session(prefix: &str, api: &Arc<FakeApi>) -> (Session, std::path::PathBuf) {
    let workspace = temp_dir(prefix);
    let conn = db::open_db(&workspace).expect("open db");
    let api: Arc<dyn SchoolApi> = api.clone();
    let session = Session::with_api(conn, EngineConfig::default(), api, false).expect("session");
    (session, workspace)
}

#[test]
fn live_year_resolves_mobile_corrections_and_weights_by_coefficient() {
    let api = seeded_api();
    let (mut session, workspace) = open_session("bulletind-session-live", &api);

    let view = session.select_year(YEAR, today()).expect("select current year");
    assert_eq!(view.classification, YearClass::Current);
    assert_eq!(view.mode, AccessMode::Edit);
    assert!(view.failures.is_empty());
    assert_eq!((view.students, view.subjects, view.teachers), (2, 2, 1));

    let grades = session
        .canonical_grades(Some("S1"), today())
        .expect("canonical grades");
    let mth = grades.iter().find(|g| g.subject == "MTH").expect("MTH grade");
    assert_eq!(mth.score, 16.0);
    assert_eq!(mth.source, GradeSource::Mobile);

    let report = session.student_report("S1", today()).expect("report");
    assert_eq!(report.student.average, Some(14.0));
    assert_eq!(report.student.bucket, Some(Bucket::Good));
    assert_eq!(report.rank, Some(1));

    // A manual edit never beats a mobile submission for the same pair.
    session
        .set_note("S1", "MTH", 19.0, today())
        .expect("manual note");
    let report = session.student_report("S1", today()).expect("report");
    assert_eq!(report.student.average, Some(14.0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_branches_come_back_empty() {
    let api = seeded_api();
    api.state().failing.insert("teachers");
    let (mut session, workspace) = open_session("bulletind-session-partial", &api);

    let view = session.select_year(YEAR, today()).expect("partial load");
    assert_eq!(view.students, 2);
    assert_eq!(view.teachers, 0);
    assert_eq!(view.failures.len(), 1);
    assert!(view.failures[0].starts_with("teachers"));
    assert_eq!(session.connectivity(), Connectivity::Disconnected);
    assert_eq!(view.mode, AccessMode::Consult);

    api.state().failing.extend(["students", "subjects"]);
    let err = session.select_year(YEAR, today()).expect_err("every branch failed");
    assert!(matches!(err, EngineError::LoadFailed(ref branches) if branches.len() == 3));
    // The year's earlier data is still there to consult.
    assert_eq!(session.students(today()).expect("students").len(), 2);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn edits_are_validated_before_reaching_the_api() {
    let api = seeded_api();
    let (mut session, workspace) = open_session("bulletind-session-edit", &api);
    session.select_year(YEAR, today()).expect("select");

    let created = session
        .create_student(student(" S3 ", "6B", &[("FRA", 12.5)]), today())
        .expect("create student");
    assert_eq!(created.matricule, "S3");
    assert_eq!(api.state().students.len(), 3);

    let dup = session
        .create_student(student("S1", "6B", &[]), today())
        .expect_err("duplicate");
    assert!(matches!(dup, EngineError::Conflict(_)));

    let mut bad = student("S4", "6B", &[("MTH", 25.0), ("PC", 10.0)]);
    bad.genre = "X".into();
    let invalid = session.create_student(bad, today()).expect_err("invalid");
    match invalid {
        EngineError::Validation(messages) => assert_eq!(messages.len(), 3, "{messages:?}"),
        other => panic!("expected validation, got {other:?}"),
    }
    assert_eq!(api.state().students.len(), 3);

    let renamed = session
        .update_student("S1", student("S9", "6A", &[]), today())
        .expect_err("matricule is immutable");
    assert!(matches!(renamed, EngineError::Validation(_)));

    let in_use = session.delete_subject("MTH", today()).expect_err("graded subject");
    assert!(matches!(in_use, EngineError::Validation(_)));

    let zero = session
        .create_subject(subject("PC", 0.0), today())
        .expect_err("coefficient must be positive");
    assert!(matches!(zero, EngineError::Validation(_)));

    session
        .update_subject("MTH", subject("MTH", 3.0), today())
        .expect("coefficient change");
    // (16*3 + 10*1) / 4
    let report = session.student_report("S1", today()).expect("report");
    assert_eq!(report.student.average, Some(14.5));

    let teacher = session
        .create_teacher(
            Teacher {
                id: String::new(),
                nom: "Sarr".into(),
                prenom: "Fatou".into(),
                email: "fatou.sarr@ecole.sn".into(),
                telephone: None,
                matieres: vec!["FRA".into()],
            },
            today(),
        )
        .expect("create teacher");
    assert_eq!(teacher.id, "T1");
    session.delete_teacher("T1", today()).expect("delete teacher");
    assert_eq!(session.teachers(today()).expect("teachers").len(), 1);

    let cleared = session.clear_note("S2", "MTH", today()).expect("clear note");
    assert!(cleared.notes.is_empty());
    session.delete_student("S2", today()).expect("delete student");
    assert!(session.student("S2", today()).is_err());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn losing_the_api_revokes_edit_until_reconnected() {
    let api = seeded_api();
    let (mut session, workspace) = open_session("bulletind-session-offline", &api);
    session.select_year(YEAR, today()).expect("select");

    api.state().reject_next = Some(422);
    let rejected = session
        .create_subject(subject("PC", 2.0), today())
        .expect_err("server rejection");
    assert!(matches!(rejected, EngineError::Validation(_)));
    assert_eq!(session.connectivity(), Connectivity::Connected);

    api.state().down = true;
    let offline = session
        .create_subject(subject("PC", 2.0), today())
        .expect_err("api down");
    assert!(matches!(offline, EngineError::Connectivity(_)));
    assert_eq!(session.connectivity(), Connectivity::Disconnected);

    let refused = session
        .set_note("S2", "MTH", 11.0, today())
        .expect_err("read-only while offline");
    assert!(matches!(
        refused,
        EngineError::Policy {
            mode: AccessMode::Consult,
            ..
        }
    ));
    // Reads still work on what was loaded.
    assert!(session.school_aggregate(today()).is_ok());

    let gave_up = session.reconnect(&|_| {}).expect_err("still down");
    assert!(matches!(gave_up, EngineError::Connectivity(_)));

    api.state().down = false;
    assert_eq!(session.reconnect(&|_| {}).expect("back online"), 1);
    session
        .set_note("S2", "MTH", 11.0, today())
        .expect("edit allowed again");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn archived_year_is_consulted_after_rollover() {
    let api = seeded_api();
    let (mut session, workspace) = open_session("bulletind-session-rollover", &api);

    let not_loaded = session
        .archive_year(YEAR, today())
        .expect_err("must select first");
    assert!(matches!(not_loaded, EngineError::Validation(_)));

    session.select_year(YEAR, today()).expect("select");
    let before = session.school_aggregate(today()).expect("stats");
    let snapshot = session.archive_year(YEAR, today()).expect("archive");
    assert_eq!(snapshot.students.len(), 2);
    assert_eq!(snapshot.subjects.len(), 2);

    // New year: the live service has moved on.
    {
        let mut st = api.state();
        st.students.clear();
        st.results.clear();
        st.subjects[0].coefficient = 5.0;
    }
    let next_day = date(2025, 10, 1);
    let view = session.select_year(YEAR, next_day).expect("consult past year");
    assert_eq!(view.classification, YearClass::Past);
    assert_eq!(view.mode, AccessMode::Consult);
    assert_eq!(view.students, 2);
    assert!(view.archived_at.is_some());

    let after = session.school_aggregate(next_day).expect("stats");
    assert_eq!(after.stats.average, before.stats.average);
    assert_eq!(after.stats.mobile_corrections, 1);

    let past_archive = session
        .archive_year(YEAR, next_day)
        .expect_err("snapshots are immutable");
    assert!(matches!(past_archive, EngineError::Policy { .. }));

    let future = session.select_year("2026-2027", next_day).expect("future");
    assert_eq!(future.mode, AccessMode::Prepare);
    assert_eq!(future.students, 0);
    assert!(session
        .canonical_grades(None, next_day)
        .expect("grades")
        .is_empty());
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn moving_the_year_start_hides_a_year_that_is_now_in_preparation() {
    let api = seeded_api();
    let (mut session, workspace) = open_session("bulletind-session-reclassified", &api);
    let september = date(2025, 9, 15);

    let view = session.select_year("2025-2026", september).expect("select");
    assert_eq!(view.mode, AccessMode::Edit);
    assert_eq!(session.students(september).expect("students").len(), 2);

    // Starting the year in October makes 2025-2026 next year again.
    let mut cfg = session.school_year_config().expect("config");
    cfg.start_month = 9;
    session
        .set_school_year_config(cfg, september)
        .expect("save config");

    let mode = session.mode("2025-2026", september).expect("mode");
    assert_eq!(mode.mode, AccessMode::Prepare);
    assert!(session.students(september).expect("students").is_empty());
    assert!(session.subjects(september).expect("subjects").is_empty());
    assert!(session.teachers(september).expect("teachers").is_empty());
    assert!(matches!(
        session.student("S1", september),
        Err(EngineError::NotFound(_))
    ));
    let school = session.school_aggregate(september).expect("stats");
    assert_eq!(school.stats.total_students, 0);
    let refused = session
        .create_subject(subject("PC", 1.0), september)
        .expect_err("nothing is edited in preparation");
    assert!(matches!(
        refused,
        EngineError::Policy {
            mode: AccessMode::Prepare,
            ..
        }
    ));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn data_loaded_under_another_classification_is_not_served() {
    let api = seeded_api();
    let (mut session, workspace) = open_session("bulletind-session-drift", &api);

    session.select_year(YEAR, today()).expect("select current year");
    let rollover = date(2025, 10, 1);
    // Live data of a year that has since become past is not its archive.
    assert!(session.students(rollover).expect("students").is_empty());
    assert!(session
        .canonical_grades(None, rollover)
        .expect("grades")
        .is_empty());
    assert_eq!(session.students(today()).expect("students").len(), 2);

    // A year first selected as past cannot be edited from that selection.
    session.select_year(YEAR, rollover).expect("select as past");
    let stale = session
        .create_subject(subject("PC", 1.0), today())
        .expect_err("must reselect");
    assert!(matches!(stale, EngineError::Validation(_)));
    assert_eq!(api.state().subjects.len(), 2);

    session.select_year(YEAR, today()).expect("reselect");
    session
        .create_subject(subject("PC", 1.0), today())
        .expect("edit after reselecting");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn past_year_dataset_is_archived_verbatim() {
    let api = seeded_api();
    let (session, workspace) = open_session("bulletind-session-verbatim", &api);

    let students = vec![
        student("S1", "6A", &[("MTH", 14.5)]),
        student("S2", "6B", &[]),
    ];
    let subjects = vec![subject("MTH", 2.0)];
    let submitted_at: DateTime<Utc> = "2024-01-15T10:30:00.250Z".parse().expect("timestamp");
    let observations = vec![GradeObservation::MobileSubmission {
        student: "S2".into(),
        subject: "MTH".into(),
        score: 11.75,
        submitted_at,
        seq: 4,
    }];
    session
        .archive_explicit(
            "2023-2024",
            students.clone(),
            subjects.clone(),
            observations.clone(),
            today(),
        )
        .expect("archive");

    let stored = session
        .retrieve("2023-2024", today())
        .expect("retrieve")
        .expect("stored");
    assert_eq!(stored.students, students);
    assert_eq!(stored.subjects, subjects);
    assert_eq!(stored.grade_observations, observations);

    let padded = session
        .archive_explicit(
            "2022-2023",
            vec![student(" S1 ", "6A ", &[])],
            vec![],
            vec![],
            today(),
        )
        .expect_err("keys must be trimmed");
    assert!(matches!(padded, EngineError::Validation(ref m) if m.len() == 1));
    assert!(session
        .retrieve("2022-2023", today())
        .expect("retrieve")
        .is_none());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn snapshot_without_subjects_reports_a_failed_live_fetch() {
    let api = seeded_api();
    let (mut session, workspace) = open_session("bulletind-session-past-subjects", &api);
    session.select_year(YEAR, today()).expect("select");
    assert_eq!(session.connectivity(), Connectivity::Connected);
    session
        .archive_explicit(
            "2023-2024",
            vec![student("S1", "6A", &[("MTH", 12.0)])],
            vec![],
            vec![],
            today(),
        )
        .expect("seed past year");

    api.state().failing.insert("subjects");
    let view = session.select_year("2023-2024", today()).expect("consult");
    assert_eq!(view.subjects, 0);
    assert_eq!(view.failures.len(), 1);
    assert_eq!(session.connectivity(), Connectivity::Disconnected);

    // A refusal from the server says nothing about the link.
    api.state().failing.clear();
    assert_eq!(session.reconnect(&|_| {}).expect("back online"), 1);
    api.state().reject_next = Some(403);
    let view = session.select_year("2023-2024", today()).expect("consult");
    assert_eq!(view.failures.len(), 1);
    assert_eq!(session.connectivity(), Connectivity::Connected);

    let _ = std::fs::remove_dir_all(workspace);
}
