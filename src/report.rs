use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::form::Preview;
use crate::gpa;
use crate::models::{
    term_rank, AcademicState, CourseHistoryRecord, RetakeWarning, StudentProfile, ValidCourse,
};
use crate::retake::normalize_code;

#[derive(Debug, Clone, PartialEq)]
pub struct SemesterSummary {
    pub semester: String,
    pub year: i32,
    pub semester_gpa: f64,
    pub total_credits: u32,
    pub course_count: usize,
}

/// Groups stored attempts into semesters, oldest first.
pub fn summarize_semesters(history: &[CourseHistoryRecord]) -> Vec<SemesterSummary> {
    let mut grouped: BTreeMap<(i32, u8, Uuid), Vec<&CourseHistoryRecord>> = BTreeMap::new();
    for record in history {
        grouped
            .entry((record.year, term_rank(&record.semester), record.semester_id))
            .or_default()
            .push(record);
    }

    grouped
        .into_values()
        .map(|records| {
            let courses: Vec<ValidCourse> = records
                .iter()
                .filter_map(|record| {
                    Some(ValidCourse {
                        course_code: record.course_code.clone(),
                        course_name: record.course_name.clone(),
                        credit_hours: record.credit_hours.max(0) as u32,
                        grade: record.grade.parse().ok()?,
                    })
                })
                .collect();
            let summary = gpa::summarize(&courses);
            SemesterSummary {
                semester: records[0].semester.clone(),
                year: records[0].year,
                semester_gpa: summary.semester_gpa,
                total_credits: summary.total_credits,
                course_count: records.len(),
            }
        })
        .collect()
}

pub fn build_preview_report(
    semester: &str,
    year: i32,
    existing: &AcademicState,
    courses: &[ValidCourse],
    preview: &Preview,
    retakes: Option<&RetakeWarning>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Semester Preview: {} {}", semester, year);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Courses");
    if courses.is_empty() {
        let _ = writeln!(output, "No courses entered.");
    } else {
        for course in courses {
            let _ = writeln!(
                output,
                "- {}{} ({} credits) {} = {:.1} points",
                course.course_code,
                course
                    .course_name
                    .as_deref()
                    .map(|name| format!(" {name}"))
                    .unwrap_or_default(),
                course.credit_hours,
                course.grade,
                gpa::grade_point(course.grade)
            );
        }
    }

    let calc = &preview.calculation;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Result");
    let _ = writeln!(
        output,
        "- Semester GPA {:.2} over {} credits ({} courses, {:.2} points)",
        calc.semester_gpa, calc.total_credits, calc.course_count, calc.total_points
    );
    let _ = writeln!(
        output,
        "- Current CGPA {:.2} over {} credits in {} semesters",
        existing.cgpa, existing.credits, existing.semesters_count
    );
    let _ = writeln!(
        output,
        "- Projected CGPA {:.2}: {}",
        preview.projection.projected_cgpa, preview.projection.note
    );

    if let Some(warning) = retakes.filter(|warning| warning.has_retakes) {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Retakes ({})", warning.retake_count);
        for retake in &warning.retakes {
            let effect = if retake.will_replace {
                "new grade replaces it in CGPA"
            } else {
                "earlier grade stays in CGPA"
            };
            let _ = writeln!(
                output,
                "- {}: previously {} in {} {}, {}",
                retake.course_code,
                retake.previous_grade,
                retake.previous_semester,
                retake.previous_year,
                effect
            );
        }
    }

    output
}

pub fn build_history_report(
    student: &StudentProfile,
    generated_on: NaiveDate,
    history: &[CourseHistoryRecord],
    state: &AcademicState,
) -> String {
    let semesters = summarize_semesters(history);
    let mut output = String::new();

    let _ = writeln!(output, "# Academic History Report");
    let _ = writeln!(
        output,
        "Generated for {} ({}) on {}",
        student.full_name, student.email, generated_on
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Standing");
    let _ = writeln!(
        output,
        "- CGPA {:.2} across {} counted credits and {} semesters",
        state.cgpa, state.credits, state.semesters_count
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Semesters");
    if semesters.is_empty() {
        let _ = writeln!(output, "No semesters recorded.");
    } else {
        for summary in &semesters {
            let _ = writeln!(
                output,
                "- {} {}: GPA {:.2} over {} credits ({} courses)",
                summary.semester,
                summary.year,
                summary.semester_gpa,
                summary.total_credits,
                summary.course_count
            );
        }
    }

    let mut attempts: HashMap<String, Vec<&CourseHistoryRecord>> = HashMap::new();
    for record in history {
        attempts
            .entry(normalize_code(&record.course_code))
            .or_default()
            .push(record);
    }
    let mut repeated: Vec<(String, Vec<&CourseHistoryRecord>)> = attempts
        .into_iter()
        .filter(|(_, records)| records.len() > 1)
        .collect();
    repeated.sort_by(|a, b| a.0.cmp(&b.0));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Retaken Courses");
    if repeated.is_empty() {
        let _ = writeln!(output, "No retaken courses.");
    } else {
        for (code, mut records) in repeated {
            records.sort_by_key(|record| {
                (record.year, term_rank(&record.semester), record.submitted_at)
            });
            let trail: Vec<String> = records
                .iter()
                .map(|record| format!("{} ({} {})", record.grade, record.semester, record.year))
                .collect();
            let _ = writeln!(output, "- {}: {} (latest counts)", code, trail.join(" -> "));
        }
    }

    output
}
