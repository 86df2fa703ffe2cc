//! One administrator session: the selected school year, the data loaded for
//! it, and every read or write the front-end performs against it.

use crate::api::{ApiError, HttpSchoolApi, OfflineApi, SchoolApi};
use crate::archive::{self, ArchivedYear, ExportSummary, ImportSummary, YearSnapshot};
use crate::config::{self, EngineConfig};
use crate::connectivity::{self, ConnectivityMonitor, ConnectivityState};
use crate::error::{EngineError, EngineResult};
use crate::grades::{self, GradeFeed};
use crate::model::{
    validate_score, validate_student, validate_subject, validate_teacher, CanonicalGrade,
    GradeObservation, MobileResult, Student, Subject, Teacher,
};
use crate::stats::{
    self, ClassAggregate, ExportTable, RankedStudent, SchoolAggregate, StatsInput, StudentReport,
};
use crate::years::{self, AccessMode, Connectivity, SchoolYearConfig, YearClass, YearKey};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Where the mobile observations of the loaded year come from.
#[derive(Debug, Clone, Default)]
enum Feed {
    #[default]
    Empty,
    Live(Vec<MobileResult>),
    Archived(Vec<GradeObservation>),
}

#[derive(Debug, Clone, Default)]
struct Dataset {
    students: Vec<Student>,
    subjects: Vec<Subject>,
    teachers: Vec<Teacher>,
    feed: Feed,
}

static NOTHING_LOADED: Dataset = Dataset {
    students: Vec::new(),
    subjects: Vec::new(),
    teachers: Vec::new(),
    feed: Feed::Empty,
};

impl Dataset {
    fn student(&self, matricule: &str) -> EngineResult<&Student> {
        self.students
            .iter()
            .find(|s| s.matricule == matricule.trim())
            .ok_or_else(|| EngineError::NotFound(format!("student {}", matricule)))
    }

    fn subject(&self, code: &str) -> EngineResult<&Subject> {
        self.subjects
            .iter()
            .find(|s| s.code == code.trim())
            .ok_or_else(|| EngineError::NotFound(format!("subject {}", code)))
    }

    fn teacher(&self, id: &str) -> EngineResult<&Teacher> {
        self.teachers
            .iter()
            .find(|t| t.id == id.trim())
            .ok_or_else(|| EngineError::NotFound(format!("teacher {}", id)))
    }

    fn subject_codes(&self) -> HashSet<&str> {
        self.subjects.iter().map(|s| s.code.as_str()).collect()
    }

    fn observations(&self) -> Vec<GradeObservation> {
        let feed = match &self.feed {
            Feed::Empty => GradeFeed::NotYetOpen,
            Feed::Live(results) => GradeFeed::Live(results),
            Feed::Archived(stored) => GradeFeed::Archived(stored),
        };
        grades::observations_for(&self.students, &self.subjects, feed)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearView {
    pub year: String,
    pub classification: YearClass,
    pub mode: AccessMode,
    pub students: usize,
    pub subjects: usize,
    pub teachers: usize,
    pub observations: usize,
    pub failures: Vec<String>,
    pub archived_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeView {
    pub year: String,
    pub current_year: String,
    pub classification: YearClass,
    pub connectivity: Connectivity,
    pub mode: AccessMode,
}

fn trimmed(s: &str) -> String {
    s.trim().to_string()
}

/// Archived keys are stored as given, so they must already be trimmed.
fn untrimmed_keys(
    students: &[Student],
    subjects: &[Subject],
    observations: &[GradeObservation],
) -> Vec<String> {
    let padded = |k: &str| k.trim() != k;
    let mut errors = Vec::new();
    for s in students {
        if padded(&s.matricule) || padded(&s.classe) {
            errors.push(format!("student {:?} has surrounding whitespace", s.matricule));
        }
        for code in s.notes.keys().filter(|c| padded(c)) {
            errors.push(format!(
                "student {:?} note {:?} has surrounding whitespace",
                s.matricule, code
            ));
        }
    }
    for s in subjects.iter().filter(|s| padded(&s.code)) {
        errors.push(format!("subject code {:?} has surrounding whitespace", s.code));
    }
    for o in observations {
        if padded(o.student()) || padded(o.subject()) {
            errors.push(format!(
                "observation {:?}/{:?} has surrounding whitespace",
                o.student(),
                o.subject()
            ));
        }
    }
    errors
}

fn tidy_student(mut s: Student) -> Student {
    s.matricule = trimmed(&s.matricule);
    s.nom = trimmed(&s.nom);
    s.prenom = trimmed(&s.prenom);
    s.classe = trimmed(&s.classe);
    s.genre = trimmed(&s.genre);
    s.notes = s
        .notes
        .into_iter()
        .map(|(code, score)| (trimmed(&code), score))
        .collect();
    s
}

fn tidy_subject(mut s: Subject) -> Subject {
    s.code = trimmed(&s.code);
    s.name = trimmed(&s.name);
    s
}

fn tidy_teacher(mut t: Teacher) -> Teacher {
    t.id = trimmed(&t.id);
    t.nom = trimmed(&t.nom);
    t.prenom = trimmed(&t.prenom);
    t.email = trimmed(&t.email);
    t.matieres = t.matieres.iter().map(|m| trimmed(m)).collect();
    t
}

fn worker_panicked<T>() -> Result<T, ApiError> {
    Err(ApiError::Transport("load worker panicked".to_string()))
}

fn invalid_if_any(errors: Vec<String>) -> EngineResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(errors))
    }
}

pub struct Session {
    conn: Connection,
    config: EngineConfig,
    api: Arc<dyn SchoolApi>,
    connectivity: Arc<ConnectivityState>,
    // Stops polling when the session is dropped.
    _monitor: Option<ConnectivityMonitor>,
    selected_year: Option<YearKey>,
    // Classification of the selected year when `data` was loaded.
    loaded_as: Option<YearClass>,
    data: Dataset,
}

impl Session {
    /// Builds the REST client from `config` and starts connectivity polling
    /// when an API is configured.
    pub fn open(conn: Connection, config: EngineConfig) -> EngineResult<Self> {
        let api: Arc<dyn SchoolApi> = match config.api_base_url.as_deref() {
            Some(url) => Arc::new(
                HttpSchoolApi::new(url, config.request_timeout())
                    .map_err(|e| EngineError::Connectivity(e.to_string()))?,
            ),
            None => Arc::new(OfflineApi),
        };
        let poll = config.api_base_url.is_some();
        Self::with_api(conn, config, api, poll)
    }

    pub fn with_api(
        conn: Connection,
        config: EngineConfig,
        api: Arc<dyn SchoolApi>,
        poll: bool,
    ) -> EngineResult<Self> {
        let connectivity = Arc::new(ConnectivityState::default());
        let monitor = if poll {
            let interval = config.poll_interval();
            Some(
                ConnectivityMonitor::start(api.clone(), connectivity.clone(), interval)
                    .map_err(|e| EngineError::Storage(format!("failed to start monitor: {e}")))?,
            )
        } else {
            None
        };
        Ok(Self {
            conn,
            config,
            api,
            connectivity,
            _monitor: monitor,
            selected_year: None,
            loaded_as: None,
            data: Dataset::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.get()
    }

    pub fn school_year_config(&self) -> EngineResult<SchoolYearConfig> {
        config::load_school_year_config(&self.conn).map_err(EngineError::storage)
    }

    /// Saves the calendar and reloads the selected year if it no longer
    /// classifies the way it did when it was loaded.
    pub fn set_school_year_config(
        &mut self,
        cfg: SchoolYearConfig,
        today: NaiveDate,
    ) -> EngineResult<()> {
        invalid_if_any(cfg.validate())?;
        config::save_school_year_config(&self.conn, &cfg).map_err(EngineError::storage)?;
        log::info!(
            "event=school_year_config_saved start_month={} start_day={}",
            cfg.start_month,
            cfg.start_day
        );
        let Some(key) = self.selected_year else {
            return Ok(());
        };
        if self.stale(today)? {
            log::info!("event=selection_reclassified year={}", key);
            if let Err(e) = self.select_year(&key.to_string(), today) {
                log::warn!("event=reselect_failed year={} error={}", key, e);
                self.data = Dataset::default();
                self.loaded_as = None;
            }
        }
        Ok(())
    }

    pub fn current_year(&self, today: NaiveDate) -> EngineResult<YearKey> {
        Ok(YearKey::containing(today, &self.school_year_config()?))
    }

    pub fn classify(&self, year: &str, today: NaiveDate) -> EngineResult<YearClass> {
        years::classify(year, today, &self.school_year_config()?)
    }

    pub fn mode(&self, year: &str, today: NaiveDate) -> EngineResult<ModeView> {
        let cfg = self.school_year_config()?;
        let classification = years::classify(year, today, &cfg)?;
        let connectivity = self.connectivity.get();
        Ok(ModeView {
            year: YearKey::parse(year)?.to_string(),
            current_year: YearKey::containing(today, &cfg).to_string(),
            classification,
            connectivity,
            mode: years::mode(classification, connectivity),
        })
    }

    /// The selected year, or the current one when nothing was selected yet.
    fn active_year(&self, today: NaiveDate) -> EngineResult<YearKey> {
        match self.selected_year {
            Some(y) => Ok(y),
            None => self.current_year(today),
        }
    }

    fn active_mode(&self, today: NaiveDate) -> EngineResult<(String, AccessMode)> {
        let year = self.active_year(today)?.to_string();
        let view = self.mode(&year, today)?;
        Ok((year, view.mode))
    }

    /// True when the selected year classifies differently now than when its
    /// data was loaded.
    fn stale(&self, today: NaiveDate) -> EngineResult<bool> {
        match self.selected_year {
            Some(key) => Ok(self.loaded_as != Some(self.classify(&key.to_string(), today)?)),
            None => Ok(false),
        }
    }

    /// The loaded data as of `today`. A year in preparation shows nothing,
    /// and neither does a year whose classification moved since it was loaded.
    fn visible(&self, today: NaiveDate) -> EngineResult<&Dataset> {
        let (year, mode) = self.active_mode(today)?;
        if mode == AccessMode::Prepare {
            return Ok(&NOTHING_LOADED);
        }
        if self.stale(today)? {
            log::debug!("event=stale_selection year={}", year);
            return Ok(&NOTHING_LOADED);
        }
        Ok(&self.data)
    }

    /// Evaluated on every write; never cached.
    fn guard(&self, action: &str, today: NaiveDate) -> EngineResult<()> {
        let (year, mode) = self.active_mode(today)?;
        if let Err(e) = years::ensure_editable(action, &year, mode) {
            log::warn!(
                "event=mutation_refused action={} year={} mode={}",
                action,
                year,
                mode
            );
            return Err(e);
        }
        if self.stale(today)? {
            return Err(EngineError::validation(format!(
                "year {} changed classification; select it again",
                year
            )));
        }
        Ok(())
    }

    fn api_failure(&self, action: &str, e: ApiError) -> EngineError {
        if e.is_rejection() {
            return EngineError::validation(format!("{action} rejected by school api: {e}"));
        }
        self.connectivity.mark_disconnected(&e.to_string());
        EngineError::Connectivity(e.to_string())
    }

    pub fn select_year(&mut self, year: &str, today: NaiveDate) -> EngineResult<YearView> {
        let key = YearKey::parse(year)?;
        let classification = self.classify(year, today)?;
        let year_str = key.to_string();
        let mut failures = Vec::new();
        let mut archived_at = None;

        match classification {
            YearClass::Future => {
                self.data = Dataset::default();
            }
            YearClass::Past => {
                let snapshot =
                    archive::retrieve(&self.conn, &year_str).map_err(EngineError::storage)?;
                self.data = match snapshot {
                    Some(s) => {
                        archived_at = Some(s.saved_at.to_rfc3339());
                        let subjects = if s.subjects.is_empty() {
                            self.api.list_subjects().unwrap_or_else(|e| {
                                log::warn!("event=load_branch_failed branch=subjects error={}", e);
                                if !e.is_rejection() {
                                    self.connectivity.mark_disconnected(&e.to_string());
                                }
                                failures.push(format!("subjects: {e}"));
                                Vec::new()
                            })
                        } else {
                            s.subjects
                        };
                        Dataset {
                            students: s.students,
                            subjects,
                            teachers: Vec::new(),
                            feed: Feed::Archived(s.grade_observations),
                        }
                    }
                    None => Dataset::default(),
                };
            }
            YearClass::Current => {
                let reselected = self.selected_year == Some(key);
                self.selected_year = Some(key);
                match self.load_live() {
                    Ok(branch_failures) => failures = branch_failures,
                    Err(e) => {
                        if !reselected {
                            self.data = Dataset::default();
                            self.loaded_as = None;
                        }
                        return Err(e);
                    }
                }
            }
        }
        self.selected_year = Some(key);
        self.loaded_as = Some(classification);

        let mode = self.mode(&year_str, today)?.mode;
        log::info!(
            "event=year_selected year={} class={:?} mode={} students={} subjects={}",
            year_str,
            classification,
            mode,
            self.data.students.len(),
            self.data.subjects.len()
        );
        Ok(YearView {
            year: year_str,
            classification,
            mode,
            students: self.data.students.len(),
            subjects: self.data.subjects.len(),
            teachers: self.data.teachers.len(),
            observations: self.data.observations().len(),
            failures,
            archived_at,
        })
    }

    /// Students, subjects and teachers are fetched in parallel. Branches that
    /// fail come back empty; the load only fails when all three do, and then
    /// whatever was loaded for this year before is kept.
    fn load_live(&mut self) -> EngineResult<Vec<String>> {
        let api = self.api.as_ref();
        let (students, subjects, teachers) = std::thread::scope(|scope| {
            let students = scope.spawn(|| api.list_students());
            let subjects = scope.spawn(|| api.list_subjects());
            let teachers = scope.spawn(|| api.list_teachers());
            (
                students.join().unwrap_or_else(|_| worker_panicked()),
                subjects.join().unwrap_or_else(|_| worker_panicked()),
                teachers.join().unwrap_or_else(|_| worker_panicked()),
            )
        });

        let mut failures = Vec::new();
        let mut note = |branch: &str, e: &ApiError| {
            log::warn!("event=load_branch_failed branch={} error={}", branch, e);
            failures.push(format!("{branch}: {e}"));
        };
        if let Err(e) = &students {
            note("students", e);
        }
        if let Err(e) = &subjects {
            note("subjects", e);
        }
        if let Err(e) = &teachers {
            note("teachers", e);
        }

        if students.is_err() && subjects.is_err() && teachers.is_err() {
            self.connectivity.mark_disconnected("every load branch failed");
            return Err(EngineError::LoadFailed(failures));
        }

        let results = match api.list_results() {
            Ok(v) => v,
            Err(e) => {
                note("results", &e);
                Vec::new()
            }
        };

        self.data = Dataset {
            students: students.unwrap_or_default(),
            subjects: subjects.unwrap_or_default(),
            teachers: teachers.unwrap_or_default(),
            feed: Feed::Live(results),
        };
        if failures.is_empty() {
            self.connectivity.mark_connected();
        } else {
            self.connectivity.mark_disconnected(&failures.join("; "));
        }
        log::info!(
            "event=live_load students={} subjects={} teachers={} failures={}",
            self.data.students.len(),
            self.data.subjects.len(),
            self.data.teachers.len(),
            failures.len()
        );
        Ok(failures)
    }

    /// Statistics over the visible data.
    fn with_stats<T>(
        &self,
        today: NaiveDate,
        f: impl FnOnce(&StatsInput<'_>) -> T,
    ) -> EngineResult<T> {
        let data = self.visible(today)?;
        let grades = grades::resolve(&data.observations());
        Ok(f(&StatsInput {
            students: &data.students,
            subjects: &data.subjects,
            grades: &grades,
        }))
    }

    pub fn students(&self, today: NaiveDate) -> EngineResult<&[Student]> {
        Ok(&self.visible(today)?.students)
    }

    pub fn subjects(&self, today: NaiveDate) -> EngineResult<&[Subject]> {
        Ok(&self.visible(today)?.subjects)
    }

    pub fn teachers(&self, today: NaiveDate) -> EngineResult<&[Teacher]> {
        Ok(&self.visible(today)?.teachers)
    }

    pub fn student(&self, matricule: &str, today: NaiveDate) -> EngineResult<&Student> {
        self.visible(today)?.student(matricule)
    }

    pub fn subject(&self, code: &str, today: NaiveDate) -> EngineResult<&Subject> {
        self.visible(today)?.subject(code)
    }

    pub fn teacher(&self, id: &str, today: NaiveDate) -> EngineResult<&Teacher> {
        self.visible(today)?.teacher(id)
    }

    pub fn create_student(&mut self, student: Student, today: NaiveDate) -> EngineResult<Student> {
        self.guard("students.create", today)?;
        let student = tidy_student(student);
        invalid_if_any(validate_student(&student, &self.data.subject_codes(), today))?;
        if self.data.students.iter().any(|s| s.matricule == student.matricule) {
            return Err(EngineError::Conflict(format!("student {}", student.matricule)));
        }
        let created = self
            .api
            .create_student(&student)
            .map_err(|e| self.api_failure("students.create", e))?;
        self.connectivity.mark_connected();
        self.data.students.push(created.clone());
        Ok(created)
    }

    pub fn update_student(
        &mut self,
        matricule: &str,
        student: Student,
        today: NaiveDate,
    ) -> EngineResult<Student> {
        self.guard("students.update", today)?;
        let mut student = tidy_student(student);
        let matricule = matricule.trim();
        if student.matricule.is_empty() {
            student.matricule = matricule.to_string();
        }
        if student.matricule != matricule {
            return Err(EngineError::validation("matricule cannot be changed"));
        }
        invalid_if_any(validate_student(&student, &self.data.subject_codes(), today))?;
        self.data.student(matricule)?;
        self.push_student_update(matricule, student, "students.update")
    }

    fn push_student_update(
        &mut self,
        matricule: &str,
        student: Student,
        action: &str,
    ) -> EngineResult<Student> {
        let updated = self
            .api
            .update_student(matricule, &student)
            .map_err(|e| self.api_failure(action, e))?;
        self.connectivity.mark_connected();
        if let Some(slot) = self.data.students.iter_mut().find(|s| s.matricule == matricule) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub fn delete_student(&mut self, matricule: &str, today: NaiveDate) -> EngineResult<()> {
        self.guard("students.delete", today)?;
        let matricule = matricule.trim();
        self.data.student(matricule)?;
        self.api
            .delete_student(matricule)
            .map_err(|e| self.api_failure("students.delete", e))?;
        self.connectivity.mark_connected();
        self.data.students.retain(|s| s.matricule != matricule);
        Ok(())
    }

    /// Manual grade entry.
    pub fn set_note(
        &mut self,
        matricule: &str,
        subject: &str,
        score: f64,
        today: NaiveDate,
    ) -> EngineResult<Student> {
        self.guard("notes.set", today)?;
        let subject = subject.trim();
        let mut errors = Vec::new();
        if let Err(msg) = validate_score(subject, score) {
            errors.push(msg);
        }
        if self.data.subject(subject).is_err() {
            errors.push(format!("unknown subject {}", subject));
        }
        invalid_if_any(errors)?;
        let mut student = self.data.student(matricule)?.clone();
        student.notes.insert(subject.to_string(), score);
        let key = student.matricule.clone();
        self.push_student_update(&key, student, "notes.set")
    }

    pub fn clear_note(
        &mut self,
        matricule: &str,
        subject: &str,
        today: NaiveDate,
    ) -> EngineResult<Student> {
        self.guard("notes.clear", today)?;
        let mut student = self.data.student(matricule)?.clone();
        if student.notes.remove(subject.trim()).is_none() {
            return Ok(student);
        }
        let key = student.matricule.clone();
        self.push_student_update(&key, student, "notes.clear")
    }

    pub fn create_subject(&mut self, subject: Subject, today: NaiveDate) -> EngineResult<Subject> {
        self.guard("subjects.create", today)?;
        let subject = tidy_subject(subject);
        invalid_if_any(validate_subject(&subject))?;
        if self.data.subjects.iter().any(|s| s.code == subject.code) {
            return Err(EngineError::Conflict(format!("subject {}", subject.code)));
        }
        let created = self
            .api
            .create_subject(&subject)
            .map_err(|e| self.api_failure("subjects.create", e))?;
        self.connectivity.mark_connected();
        self.data.subjects.push(created.clone());
        Ok(created)
    }

    /// Coefficient edits apply to every average recomputed afterwards,
    /// including live history; archived years keep their own subject list.
    pub fn update_subject(
        &mut self,
        code: &str,
        subject: Subject,
        today: NaiveDate,
    ) -> EngineResult<Subject> {
        self.guard("subjects.update", today)?;
        let mut subject = tidy_subject(subject);
        let code = code.trim();
        if subject.code.is_empty() {
            subject.code = code.to_string();
        }
        if subject.code != code {
            return Err(EngineError::validation("subject code cannot be changed"));
        }
        invalid_if_any(validate_subject(&subject))?;
        self.data.subject(code)?;
        let updated = self
            .api
            .update_subject(code, &subject)
            .map_err(|e| self.api_failure("subjects.update", e))?;
        self.connectivity.mark_connected();
        if let Some(slot) = self.data.subjects.iter_mut().find(|s| s.code == code) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub fn delete_subject(&mut self, code: &str, today: NaiveDate) -> EngineResult<()> {
        self.guard("subjects.delete", today)?;
        let code = code.trim();
        self.data.subject(code)?;
        let graded = self
            .data
            .students
            .iter()
            .filter(|s| s.notes.contains_key(code))
            .count();
        if graded > 0 {
            return Err(EngineError::validation(format!(
                "subject {} still has notes for {} student(s)",
                code, graded
            )));
        }
        self.api
            .delete_subject(code)
            .map_err(|e| self.api_failure("subjects.delete", e))?;
        self.connectivity.mark_connected();
        self.data.subjects.retain(|s| s.code != code);
        Ok(())
    }

    pub fn create_teacher(&mut self, teacher: Teacher, today: NaiveDate) -> EngineResult<Teacher> {
        self.guard("teachers.create", today)?;
        let teacher = tidy_teacher(teacher);
        invalid_if_any(validate_teacher(&teacher, &self.data.subject_codes()))?;
        if !teacher.id.is_empty() && self.data.teachers.iter().any(|t| t.id == teacher.id) {
            return Err(EngineError::Conflict(format!("teacher {}", teacher.id)));
        }
        let created = self
            .api
            .create_teacher(&teacher)
            .map_err(|e| self.api_failure("teachers.create", e))?;
        self.connectivity.mark_connected();
        self.data.teachers.push(created.clone());
        Ok(created)
    }

    pub fn update_teacher(
        &mut self,
        id: &str,
        teacher: Teacher,
        today: NaiveDate,
    ) -> EngineResult<Teacher> {
        self.guard("teachers.update", today)?;
        let mut teacher = tidy_teacher(teacher);
        let id = id.trim();
        if teacher.id.is_empty() {
            teacher.id = id.to_string();
        }
        if teacher.id != id {
            return Err(EngineError::validation("teacher id cannot be changed"));
        }
        invalid_if_any(validate_teacher(&teacher, &self.data.subject_codes()))?;
        self.data.teacher(id)?;
        let updated = self
            .api
            .update_teacher(id, &teacher)
            .map_err(|e| self.api_failure("teachers.update", e))?;
        self.connectivity.mark_connected();
        if let Some(slot) = self.data.teachers.iter_mut().find(|t| t.id == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub fn delete_teacher(&mut self, id: &str, today: NaiveDate) -> EngineResult<()> {
        self.guard("teachers.delete", today)?;
        let id = id.trim();
        self.data.teacher(id)?;
        self.api
            .delete_teacher(id)
            .map_err(|e| self.api_failure("teachers.delete", e))?;
        self.connectivity.mark_connected();
        self.data.teachers.retain(|t| t.id != id);
        Ok(())
    }

    pub fn canonical_grades(
        &self,
        matricule: Option<&str>,
        today: NaiveDate,
    ) -> EngineResult<Vec<CanonicalGrade>> {
        Ok(grades::resolve(&self.visible(today)?.observations())
            .into_values()
            .filter(|g| matricule.map_or(true, |m| g.student == m.trim()))
            .collect())
    }

    pub fn student_report(
        &self,
        matricule: &str,
        today: NaiveDate,
    ) -> EngineResult<StudentReport> {
        self.with_stats(today, |input| stats::student_report(input, matricule.trim()))?
            .ok_or_else(|| EngineError::NotFound(format!("student {}", matricule)))
    }

    pub fn class_aggregate(&self, classe: &str, today: NaiveDate) -> EngineResult<ClassAggregate> {
        self.with_stats(today, |input| stats::class_aggregate(input, classe))
    }

    pub fn school_aggregate(&self, today: NaiveDate) -> EngineResult<SchoolAggregate> {
        self.with_stats(today, stats::school_aggregate)
    }

    pub fn class_ranking(
        &self,
        classe: &str,
        today: NaiveDate,
    ) -> EngineResult<Vec<RankedStudent>> {
        self.with_stats(today, |input| stats::class_ranking(input, classe))
    }

    pub fn export_table(
        &self,
        classe: Option<&str>,
        today: NaiveDate,
    ) -> EngineResult<ExportTable> {
        self.with_stats(today, |input| stats::export_table(input, classe))
    }

    /// Snapshots the loaded data of the current year. Past snapshots are
    /// immutable and future years have nothing to keep.
    pub fn archive_year(&self, year: &str, today: NaiveDate) -> EngineResult<YearSnapshot> {
        let view = self.mode(year, today)?;
        let year = view.year.clone();
        if view.classification != YearClass::Current {
            return Err(EngineError::policy("years.archive", &year, view.mode));
        }
        if self.selected_year.map(|k| k.to_string()).as_deref() != Some(year.as_str()) {
            return Err(EngineError::validation(format!(
                "year {} must be selected before it can be archived",
                year
            )));
        }
        if self.stale(today)? {
            return Err(EngineError::validation(format!(
                "year {} changed classification; select it again",
                year
            )));
        }
        if view.connectivity == Connectivity::Disconnected {
            log::warn!("event=archive_while_offline year={}", year);
        }
        let computed = serde_json::to_value(self.school_aggregate(today)?)
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        archive::archive(
            &self.conn,
            &year,
            self.data.students.clone(),
            self.data.subjects.clone(),
            self.data.observations(),
            computed,
        )
        .map_err(EngineError::storage)
    }

    /// Stores a caller-supplied dataset for a past year exactly as given.
    pub fn archive_explicit(
        &self,
        year: &str,
        students: Vec<Student>,
        subjects: Vec<Subject>,
        observations: Vec<GradeObservation>,
        today: NaiveDate,
    ) -> EngineResult<YearSnapshot> {
        let view = self.mode(year, today)?;
        if view.classification != YearClass::Past {
            return Err(EngineError::policy("years.archive", &view.year, view.mode));
        }

        let mut errors = untrimmed_keys(&students, &subjects, &observations);
        let mut seen = HashSet::new();
        for s in &students {
            if s.matricule.is_empty() {
                errors.push("every student needs a matricule".to_string());
            } else if !seen.insert(s.matricule.as_str()) {
                errors.push(format!("duplicate matricule {}", s.matricule));
            }
        }
        let mut seen_codes = HashSet::new();
        for s in &subjects {
            errors.extend(validate_subject(s));
            if !seen_codes.insert(s.code.as_str()) {
                errors.push(format!("duplicate subject code {}", s.code));
            }
        }
        invalid_if_any(errors)?;

        let grades_map = grades::resolve(&grades::observations_for(
            &students,
            &subjects,
            GradeFeed::Archived(&observations),
        ));
        let computed = serde_json::to_value(stats::school_aggregate(&StatsInput {
            students: &students,
            subjects: &subjects,
            grades: &grades_map,
        }))
        .map_err(|e| EngineError::Storage(e.to_string()))?;

        archive::archive(&self.conn, &view.year, students, subjects, observations, computed)
            .map_err(EngineError::storage)
    }

    /// Future years never surface anything, even if something was stored.
    pub fn retrieve(&self, year: &str, today: NaiveDate) -> EngineResult<Option<YearSnapshot>> {
        if self.classify(year, today)? == YearClass::Future {
            return Ok(None);
        }
        let key = YearKey::parse(year)?.to_string();
        archive::retrieve(&self.conn, &key).map_err(EngineError::storage)
    }

    pub fn archived_years(&self) -> EngineResult<Vec<ArchivedYear>> {
        archive::archived_years(&self.conn).map_err(EngineError::storage)
    }

    pub fn export_archive(&self, out_path: &Path) -> EngineResult<ExportSummary> {
        archive::export_bundle(&self.conn, out_path).map_err(EngineError::storage)
    }

    pub fn import_archive(&self, in_path: &Path) -> EngineResult<ImportSummary> {
        archive::import_bundle(&self.conn, in_path).map_err(EngineError::storage)
    }

    pub fn reconnect(&self, sleep: &dyn Fn(std::time::Duration)) -> EngineResult<u32> {
        connectivity::reconnect(
            self.api.as_ref(),
            &self.connectivity,
            self.config.reconnect_attempts,
            self.config.reconnect_base_delay(),
            sleep,
        )
    }
}
