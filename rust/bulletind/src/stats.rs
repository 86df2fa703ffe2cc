use crate::grades::{normalize, GradeKey};
use crate::model::{CanonicalGrade, GradeSource, Student, Subject};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

pub const EXCELLENT_FROM: f64 = 16.0;
pub const GOOD_FROM: f64 = 14.0;
pub const SATISFACTORY_FROM: f64 = 10.0;

/// Display rounding for exported tables; statistics themselves stay unrounded.
pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Bucket {
    Excellent,
    Good,
    Satisfactory,
    Unsatisfactory,
}

pub fn bucket(average: f64) -> Bucket {
    if average >= EXCELLENT_FROM {
        Bucket::Excellent
    } else if average >= GOOD_FROM {
        Bucket::Good
    } else if average >= SATISFACTORY_FROM {
        Bucket::Satisfactory
    } else {
        Bucket::Unsatisfactory
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub excellent: usize,
    pub good: usize,
    pub satisfactory: usize,
    pub unsatisfactory: usize,
}

impl Distribution {
    fn add(&mut self, average: f64) {
        match bucket(average) {
            Bucket::Excellent => self.excellent += 1,
            Bucket::Good => self.good += 1,
            Bucket::Satisfactory => self.satisfactory += 1,
            Bucket::Unsatisfactory => self.unsatisfactory += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.excellent + self.good + self.satisfactory + self.unsatisfactory
    }
}

pub fn success_rate(students_with_notes: usize, unsatisfactory: usize) -> f64 {
    if students_with_notes == 0 {
        return 0.0;
    }
    let passing = students_with_notes.saturating_sub(unsatisfactory);
    (passing as f64) * 100.0 / (students_with_notes as f64)
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64) * 100.0 / (whole as f64)
    }
}

/// Data every statistic is computed from.
#[derive(Debug, Clone, Copy)]
pub struct StatsInput<'a> {
    pub students: &'a [Student],
    pub subjects: &'a [Subject],
    pub grades: &'a BTreeMap<GradeKey, CanonicalGrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedGrade {
    pub student: String,
    pub subject: String,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub code: String,
    pub name: String,
    pub coefficient: f64,
    pub score: f64,
    pub source: GradeSource,
    pub weighted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLine {
    pub matricule: String,
    pub display_name: String,
    pub classe: String,
    pub subjects: Vec<SubjectLine>,
    pub average: Option<f64>,
    pub total_coefficient: f64,
    pub bucket: Option<Bucket>,
    pub mobile_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub code: String,
    pub name: String,
    pub coefficient: f64,
    pub average: f64,
    pub graded_count: usize,
    pub participation_rate: f64,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeAggregate {
    pub total_students: usize,
    pub students_with_notes: usize,
    pub average: f64,
    pub distribution: Distribution,
    pub success_rate: f64,
    pub subjects: Vec<SubjectStats>,
    pub mobile_corrections: usize,
    pub flagged: Vec<FlaggedGrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub rank: Option<usize>,
    pub matricule: String,
    pub display_name: String,
    pub average: Option<f64>,
    pub bucket: Option<Bucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAggregate {
    pub classe: String,
    pub stats: ScopeAggregate,
    pub ranking: Vec<RankedStudent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub classe: String,
    pub total_students: usize,
    pub students_with_notes: usize,
    pub average: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolAggregate {
    pub stats: ScopeAggregate,
    pub classes: Vec<ClassSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student: StudentLine,
    pub rank: Option<usize>,
    pub class_size: usize,
}

fn grade_for<'g>(
    grades: &'g BTreeMap<GradeKey, CanonicalGrade>,
    matricule: &str,
    code: &str,
) -> Option<&'g CanonicalGrade> {
    grades.get(&(matricule.to_string(), code.to_string()))
}

/// Per-student subject breakdown and weighted average. Grades outside the
/// 0-20 scale are left out and reported through `flagged`.
fn student_line(
    input: &StatsInput<'_>,
    student: &Student,
    flagged: &mut Vec<FlaggedGrade>,
) -> StudentLine {
    let mut lines = Vec::new();
    let mut weighted_sum = 0.0_f64;
    let mut coefficient_sum = 0.0_f64;
    let mut mobile_count = 0;

    for subject in input.subjects {
        let Some(grade) = grade_for(input.grades, &student.matricule, &subject.code) else {
            continue;
        };
        let normalized = match normalize(grade.score, subject.coefficient) {
            Ok(v) => v,
            Err(reason) => {
                flagged.push(FlaggedGrade {
                    student: student.matricule.clone(),
                    subject: subject.code.clone(),
                    score: grade.score,
                    reason,
                });
                continue;
            }
        };
        weighted_sum += normalized.weighted_contribution;
        coefficient_sum += subject.coefficient;
        if grade.source == GradeSource::Mobile {
            mobile_count += 1;
        }
        lines.push(SubjectLine {
            code: subject.code.clone(),
            name: subject.name.clone(),
            coefficient: subject.coefficient,
            score: normalized.score_over_20,
            source: grade.source,
            weighted: normalized.weighted_contribution,
        });
    }

    let average = if coefficient_sum > 0.0 {
        Some(weighted_sum / coefficient_sum)
    } else {
        None
    };

    StudentLine {
        matricule: student.matricule.clone(),
        display_name: student.display_name(),
        classe: student.classe.clone(),
        subjects: lines,
        average,
        total_coefficient: coefficient_sum,
        bucket: average.map(bucket),
        mobile_count,
    }
}

pub fn scope_aggregate(input: &StatsInput<'_>, scope: &[&Student]) -> ScopeAggregate {
    let mut flagged = Vec::new();
    let lines: Vec<StudentLine> = scope
        .iter()
        .map(|s| student_line(input, s, &mut flagged))
        .collect();

    let mut distribution = Distribution::default();
    let mut average_sum = 0.0_f64;
    let mut students_with_notes = 0;
    for avg in lines.iter().filter_map(|l| l.average) {
        distribution.add(avg);
        average_sum += avg;
        students_with_notes += 1;
    }
    debug_assert_eq!(distribution.total(), students_with_notes);

    let subjects = input
        .subjects
        .iter()
        .map(|subject| {
            let scores: Vec<f64> = lines
                .iter()
                .filter_map(|l| l.subjects.iter().find(|g| g.code == subject.code))
                .map(|g| g.score)
                .collect();
            let average = if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / (scores.len() as f64)
            };
            SubjectStats {
                code: subject.code.clone(),
                name: subject.name.clone(),
                coefficient: subject.coefficient,
                average,
                graded_count: scores.len(),
                participation_rate: percent(scores.len(), scope.len()),
                highest: scores.iter().copied().max_by(|a, b| a.total_cmp(b)),
                lowest: scores.iter().copied().min_by(|a, b| a.total_cmp(b)),
            }
        })
        .collect();

    ScopeAggregate {
        total_students: scope.len(),
        students_with_notes,
        average: if students_with_notes > 0 {
            average_sum / (students_with_notes as f64)
        } else {
            0.0
        },
        distribution,
        success_rate: success_rate(students_with_notes, distribution.unsatisfactory),
        subjects,
        mobile_corrections: lines.iter().map(|l| l.mobile_count).sum(),
        flagged,
    }
}

/// Class labels match trimmed and regardless of ASCII case.
pub fn same_class(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn students_in_class<'s>(students: &'s [Student], classe: &str) -> Vec<&'s Student> {
    students
        .iter()
        .filter(|s| same_class(&s.classe, classe))
        .collect()
}

/// Highest average first; equal averages get distinct consecutive ranks,
/// ordered by matricule. Students without any grade come last, unranked.
pub fn rank_students(input: &StatsInput<'_>, scope: &[&Student]) -> Vec<RankedStudent> {
    let mut flagged = Vec::new();
    let mut lines: Vec<StudentLine> = scope
        .iter()
        .map(|s| student_line(input, s, &mut flagged))
        .collect();

    lines.sort_by(|a, b| match (a.average, b.average) {
        (Some(x), Some(y)) => y
            .partial_cmp(&x)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.matricule.cmp(&b.matricule)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a
            .display_name
            .cmp(&b.display_name)
            .then_with(|| a.matricule.cmp(&b.matricule)),
    });

    let mut next_rank = 0;
    lines
        .into_iter()
        .map(|l| {
            let rank = l.average.map(|_| {
                next_rank += 1;
                next_rank
            });
            RankedStudent {
                rank,
                matricule: l.matricule,
                display_name: l.display_name,
                average: l.average,
                bucket: l.bucket,
            }
        })
        .collect()
}

pub fn class_ranking(input: &StatsInput<'_>, classe: &str) -> Vec<RankedStudent> {
    rank_students(input, &students_in_class(input.students, classe))
}

pub fn class_aggregate(input: &StatsInput<'_>, classe: &str) -> ClassAggregate {
    let scope = students_in_class(input.students, classe);
    ClassAggregate {
        classe: classe.trim().to_string(),
        stats: scope_aggregate(input, &scope),
        ranking: rank_students(input, &scope),
    }
}

/// One label per class under `same_class`, spelled as first seen.
pub fn class_names<'s>(students: impl IntoIterator<Item = &'s Student>) -> Vec<String> {
    let mut names: BTreeMap<String, String> = BTreeMap::new();
    for s in students {
        let label = s.classe.trim();
        names
            .entry(label.to_ascii_lowercase())
            .or_insert_with(|| label.to_string());
    }
    names.into_values().collect()
}

pub fn school_aggregate(input: &StatsInput<'_>) -> SchoolAggregate {
    let everyone: Vec<&Student> = input.students.iter().collect();
    let classes = class_names(input.students)
        .into_iter()
        .map(|classe| {
            let scope = students_in_class(input.students, &classe);
            let stats = scope_aggregate(input, &scope);
            ClassSummary {
                classe,
                total_students: stats.total_students,
                students_with_notes: stats.students_with_notes,
                average: stats.average,
                success_rate: stats.success_rate,
            }
        })
        .collect();
    SchoolAggregate {
        stats: scope_aggregate(input, &everyone),
        classes,
    }
}

pub fn student_report(input: &StatsInput<'_>, matricule: &str) -> Option<StudentReport> {
    let student = input.students.iter().find(|s| s.matricule == matricule)?;
    let mut flagged = Vec::new();
    let line = student_line(input, student, &mut flagged);
    let classmates = students_in_class(input.students, &student.classe);
    let rank = rank_students(input, &classmates)
        .into_iter()
        .find(|r| r.matricule == matricule)
        .and_then(|r| r.rank);
    Some(StudentReport {
        student: line,
        rank,
        class_size: classmates.len(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub matricule: String,
    pub nom: String,
    pub prenom: String,
    pub classe: String,
    pub scores: Vec<Option<f64>>,
    pub average: Option<f64>,
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTable {
    pub columns: Vec<String>,
    pub rows: Vec<ExportRow>,
}

/// Tabular "subject x score" projection handed to the CSV/PDF writers.
pub fn export_table(input: &StatsInput<'_>, classe: Option<&str>) -> ExportTable {
    let mut subjects: Vec<&Subject> = input.subjects.iter().collect();
    subjects.sort_by(|a, b| a.code.cmp(&b.code));

    let mut scope: Vec<&Student> = match classe {
        Some(c) => students_in_class(input.students, c),
        None => input.students.iter().collect(),
    };
    scope.sort_by(|a, b| {
        a.classe
            .cmp(&b.classe)
            .then_with(|| a.nom.cmp(&b.nom))
            .then_with(|| a.prenom.cmp(&b.prenom))
            .then_with(|| a.matricule.cmp(&b.matricule))
    });

    let mut rank_by_student: HashMap<String, usize> = HashMap::new();
    for c in class_names(scope.iter().copied()) {
        for r in class_ranking(input, &c) {
            if let Some(rank) = r.rank {
                rank_by_student.insert(r.matricule, rank);
            }
        }
    }

    let mut flagged = Vec::new();
    let rows = scope
        .iter()
        .map(|s| {
            let line = student_line(input, s, &mut flagged);
            let scores = subjects
                .iter()
                .map(|subj| {
                    line.subjects
                        .iter()
                        .find(|g| g.code == subj.code)
                        .map(|g| round_off_2_decimals(g.score))
                })
                .collect();
            ExportRow {
                matricule: s.matricule.clone(),
                nom: s.nom.clone(),
                prenom: s.prenom.clone(),
                classe: s.classe.clone(),
                scores,
                average: line.average.map(round_off_2_decimals),
                rank: rank_by_student.get(&s.matricule).copied(),
            }
        })
        .collect();

    ExportTable {
        columns: subjects.iter().map(|s| s.code.clone()).collect(),
        rows,
    }
}
