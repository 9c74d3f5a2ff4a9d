use std::collections::{HashMap, HashSet};

use crate::error::GpaError;
use crate::models::{
    term_rank, AcademicState, CourseEntry, CourseHistoryRecord, Grade, Projection,
    ProjectionNote, SemesterCalculation, ValidCourse,
};

pub const MIN_CREDIT_HOURS: i32 = 1;
pub const MAX_CREDIT_HOURS: i32 = 5;

pub fn grade_point(grade: Grade) -> f64 {
    match grade {
        Grade::APlus | Grade::A => 4.0,
        Grade::AMinus => 3.7,
        Grade::BPlus => 3.3,
        Grade::B => 3.0,
        Grade::BMinus => 2.7,
        Grade::CPlus => 2.3,
        Grade::C => 2.0,
        Grade::CMinus => 1.7,
        Grade::DPlus => 1.3,
        Grade::D => 1.0,
        Grade::DMinus => 0.7,
        Grade::F => 0.0,
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Checks one form row. `row` is 1-based and only used for the error message.
pub fn validate_course(row: usize, entry: &CourseEntry) -> Result<ValidCourse, GpaError> {
    let course_code = entry.course_code.trim();
    if course_code.is_empty() {
        return Err(GpaError::invalid(row, "course code is required"));
    }

    let grade = match entry.grade.as_deref().map(str::trim) {
        None | Some("") => return Err(GpaError::invalid(row, "grade is required")),
        Some(raw) => raw
            .parse::<Grade>()
            .map_err(|reason| GpaError::invalid(row, reason))?,
    };

    let credit_hours = match entry.credit_hours {
        None => return Err(GpaError::invalid(row, "credit hours are required")),
        Some(hours) if !(MIN_CREDIT_HOURS..=MAX_CREDIT_HOURS).contains(&hours) => {
            return Err(GpaError::invalid(
                row,
                format!(
                    "credit hours must be between {} and {}, got {}",
                    MIN_CREDIT_HOURS, MAX_CREDIT_HOURS, hours
                ),
            ))
        }
        Some(hours) => hours as u32,
    };

    let course_name = entry
        .course_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Ok(ValidCourse {
        course_code: course_code.to_string(),
        course_name,
        credit_hours,
        grade,
    })
}

pub fn validate_courses(entries: &[CourseEntry]) -> Result<Vec<ValidCourse>, GpaError> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| validate_course(index + 1, entry))
        .collect()
}

pub fn summarize(courses: &[ValidCourse]) -> SemesterCalculation {
    let mut total_points = 0.0;
    let mut total_credits = 0u32;

    for course in courses {
        total_points += grade_point(course.grade) * course.credit_hours as f64;
        total_credits += course.credit_hours;
    }

    let semester_gpa = if total_credits > 0 {
        round2(total_points / total_credits as f64)
    } else {
        0.0
    };

    SemesterCalculation {
        semester_gpa,
        total_credits,
        total_points,
        course_count: courses.len(),
    }
}

/// Validates every row before computing anything; the first bad row rejects
/// the whole list.
pub fn calculate_semester(entries: &[CourseEntry]) -> Result<SemesterCalculation, GpaError> {
    let courses = validate_courses(entries)?;
    Ok(summarize(&courses))
}

pub fn project_cgpa(existing: &AcademicState, semester: &SemesterCalculation) -> Projection {
    if existing.semesters_count == 0 {
        return Projection {
            projected_cgpa: semester.semester_gpa,
            note: ProjectionNote::FirstSemester,
        };
    }

    if existing.cgpa == 0.0 {
        return Projection {
            projected_cgpa: semester.semester_gpa,
            note: ProjectionNote::InconsistentRecord {
                semesters_count: existing.semesters_count,
            },
        };
    }

    let combined_credits = existing.credits + semester.total_credits;
    if combined_credits == 0 {
        return Projection {
            projected_cgpa: semester.semester_gpa,
            note: ProjectionNote::NoCredits,
        };
    }

    let weighted = existing.cgpa * existing.credits as f64
        + semester.semester_gpa * semester.total_credits as f64;
    let projected_cgpa = round2(weighted / combined_credits as f64);

    let note = if projected_cgpa > existing.cgpa {
        ProjectionNote::Improves {
            from: existing.cgpa,
        }
    } else if projected_cgpa < existing.cgpa {
        ProjectionNote::Lowers {
            from: existing.cgpa,
        }
    } else {
        ProjectionNote::Maintains
    };

    Projection {
        projected_cgpa,
        note,
    }
}

/// Builds the authoritative standing from stored attempts. Only the latest
/// attempt of each course code counts toward credits and CGPA.
pub fn cumulative_from_history(records: &[CourseHistoryRecord]) -> AcademicState {
    let semesters: HashSet<_> = records.iter().map(|record| record.semester_id).collect();
    let mut latest: HashMap<String, &CourseHistoryRecord> = HashMap::new();

    for record in records {
        let key = record.course_code.trim().to_ascii_uppercase();
        let newer = latest
            .get(&key)
            .map_or(true, |current| attempt_key(record) > attempt_key(current));
        if newer {
            latest.insert(key, record);
        }
    }

    let mut courses = Vec::with_capacity(latest.len());
    for record in latest.values() {
        let grade = match record.grade.parse::<Grade>() {
            Ok(grade) => grade,
            Err(reason) => {
                tracing::warn!(course = %record.course_code, %reason, "skipping stored attempt");
                continue;
            }
        };
        courses.push(ValidCourse {
            course_code: record.course_code.clone(),
            course_name: record.course_name.clone(),
            credit_hours: record.credit_hours.max(0) as u32,
            grade,
        });
    }

    let summary = summarize(&courses);
    AcademicState {
        cgpa: summary.semester_gpa,
        credits: summary.total_credits,
        semesters_count: semesters.len() as u32,
    }
}

fn attempt_key(record: &CourseHistoryRecord) -> (i32, u8, chrono::DateTime<chrono::Utc>) {
    (record.year, term_rank(&record.semester), record.submitted_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn history(
        semester_id: Uuid,
        semester: &str,
        year: i32,
        code: &str,
        credits: i32,
        grade: &str,
    ) -> CourseHistoryRecord {
        CourseHistoryRecord {
            semester_id,
            semester: semester.to_string(),
            year,
            course_code: code.to_string(),
            course_name: None,
            credit_hours: credits,
            grade: grade.to_string(),
            submitted_at: Utc::now() - Duration::days(30),
        }
    }

    #[test]
    fn table_covers_every_grade() {
        let points: Vec<f64> = Grade::ALL.iter().map(|grade| grade_point(*grade)).collect();
        assert_eq!(
            points,
            vec![4.0, 4.0, 3.7, 3.3, 3.0, 2.7, 2.3, 2.0, 1.7, 1.3, 1.0, 0.7, 0.0]
        );
    }

    #[test]
    fn semester_gpa_is_credit_weighted() {
        let entries = vec![
            CourseEntry::new("CSE220", 3, "A"),
            CourseEntry::new("MAT215", 3, "B+"),
        ];
        let result = calculate_semester(&entries).unwrap();
        assert!((result.total_points - 21.9).abs() < 1e-9);
        assert_eq!(result.total_credits, 6);
        assert_eq!(result.semester_gpa, 3.65);
        assert_eq!(result.course_count, 2);
    }

    #[test]
    fn uneven_credits_round_to_two_places() {
        let entries = vec![
            CourseEntry::new("PHY111", 4, "B-"),
            CourseEntry::new("ENG101", 1, "A-"),
            CourseEntry::new("HUM103", 2, "C+"),
        ];
        let result = calculate_semester(&entries).unwrap();
        let expected = round2((2.7 * 4.0 + 3.7 + 2.3 * 2.0) / 7.0);
        assert_eq!(result.semester_gpa, expected);
        assert_eq!(result.semester_gpa, 2.73);
    }

    #[test]
    fn empty_list_yields_zero() {
        let result = calculate_semester(&[]).unwrap();
        assert_eq!(result.semester_gpa, 0.0);
        assert_eq!(result.total_credits, 0);
        assert_eq!(result.course_count, 0);
    }

    #[test]
    fn repeated_calculation_is_identical() {
        let entries = vec![
            CourseEntry::new("CSE110", 3, "A-"),
            CourseEntry::new("BIO101", 4, "C"),
        ];
        let first = calculate_semester(&entries).unwrap();
        let second = calculate_semester(&entries).unwrap();
        assert_eq!(first, second);

        let mut reversed = entries.clone();
        reversed.reverse();
        assert_eq!(calculate_semester(&reversed).unwrap().semester_gpa, first.semester_gpa);
    }

    #[test]
    fn blank_course_code_rejects_whole_list() {
        let entries = vec![
            CourseEntry::new("CSE220", 3, "A"),
            CourseEntry::new("   ", 3, "B"),
        ];
        let err = calculate_semester(&entries).unwrap_err();
        assert_eq!(
            err,
            GpaError::InvalidCourseInput {
                row: 2,
                reason: "course code is required".to_string()
            }
        );
    }

    #[test]
    fn missing_grade_and_credits_are_rejected() {
        let mut no_grade = CourseEntry::new("CSE220", 3, "A");
        no_grade.grade = None;
        assert!(matches!(
            calculate_semester(&[no_grade]),
            Err(GpaError::InvalidCourseInput { row: 1, .. })
        ));

        let mut no_credits = CourseEntry::new("CSE220", 3, "A");
        no_credits.credit_hours = None;
        assert!(calculate_semester(&[no_credits]).is_err());

        assert!(calculate_semester(&[CourseEntry::new("CSE220", 6, "A")]).is_err());
        assert!(calculate_semester(&[CourseEntry::new("CSE220", 0, "A")]).is_err());
        assert!(calculate_semester(&[CourseEntry::new("CSE220", 3, "E")]).is_err());
    }

    #[test]
    fn validation_trims_fields() {
        let entry = CourseEntry::new("  CSE220 ", 3, " b+ ").with_name("  Data Structures ");
        let course = validate_course(1, &entry).unwrap();
        assert_eq!(course.course_code, "CSE220");
        assert_eq!(course.course_name.as_deref(), Some("Data Structures"));
        assert_eq!(course.grade, Grade::BPlus);
    }

    fn calc(gpa: f64, credits: u32) -> SemesterCalculation {
        SemesterCalculation {
            semester_gpa: gpa,
            total_credits: credits,
            total_points: gpa * credits as f64,
            course_count: 1,
        }
    }

    #[test]
    fn first_semester_uses_semester_gpa() {
        let existing = AcademicState {
            cgpa: 2.1,
            credits: 40,
            semesters_count: 0,
        };
        let projection = project_cgpa(&existing, &calc(3.8, 12));
        assert_eq!(projection.projected_cgpa, 3.8);
        assert_eq!(projection.note, ProjectionNote::FirstSemester);
    }

    #[test]
    fn weighted_average_projection() {
        let existing = AcademicState {
            cgpa: 3.0,
            credits: 30,
            semesters_count: 2,
        };
        let projection = project_cgpa(&existing, &calc(4.0, 15));
        assert_eq!(projection.projected_cgpa, 3.33);
        assert_eq!(projection.note, ProjectionNote::Improves { from: 3.0 });
    }

    #[test]
    fn zero_cgpa_with_history_is_flagged() {
        let existing = AcademicState {
            cgpa: 0.0,
            credits: 24,
            semesters_count: 2,
        };
        let projection = project_cgpa(&existing, &calc(3.1, 9));
        assert_eq!(projection.projected_cgpa, 3.1);
        assert_eq!(
            projection.note,
            ProjectionNote::InconsistentRecord { semesters_count: 2 }
        );
    }

    #[test]
    fn zero_credits_everywhere_cannot_project() {
        let existing = AcademicState {
            cgpa: 3.5,
            credits: 0,
            semesters_count: 1,
        };
        let projection = project_cgpa(&existing, &calc(0.0, 0));
        assert_eq!(projection.projected_cgpa, 0.0);
        assert_eq!(projection.note, ProjectionNote::NoCredits);
    }

    #[test]
    fn projection_notes_lowers_and_maintains() {
        let existing = AcademicState {
            cgpa: 3.5,
            credits: 30,
            semesters_count: 3,
        };
        assert_eq!(
            project_cgpa(&existing, &calc(2.0, 15)).note,
            ProjectionNote::Lowers { from: 3.5 }
        );
        assert_eq!(
            project_cgpa(&existing, &calc(3.5, 15)).note,
            ProjectionNote::Maintains
        );
    }

    #[test]
    fn end_to_end_example() {
        let entries = vec![
            CourseEntry::new("CSE220", 3, "A"),
            CourseEntry::new("MAT215", 3, "B+"),
        ];
        let semester = calculate_semester(&entries).unwrap();
        let existing = AcademicState {
            cgpa: 3.2,
            credits: 60,
            semesters_count: 4,
        };
        let projection = project_cgpa(&existing, &semester);
        assert_eq!(semester.semester_gpa, 3.65);
        assert_eq!(projection.projected_cgpa, 3.24);
        assert_eq!(projection.note, ProjectionNote::Improves { from: 3.2 });
    }

    #[test]
    fn history_counts_latest_attempt_only() {
        let spring = Uuid::new_v4();
        let fall = Uuid::new_v4();
        let records = vec![
            history(spring, "Spring", 2025, "MAT110", 3, "D"),
            history(spring, "Spring", 2025, "ENG101", 3, "A"),
            history(fall, "Fall", 2025, "mat110", 3, "B"),
        ];
        let state = cumulative_from_history(&records);
        assert_eq!(state.semesters_count, 2);
        assert_eq!(state.credits, 6);
        assert_eq!(state.cgpa, 3.5);
    }

    #[test]
    fn empty_history_is_zero_state() {
        assert_eq!(cumulative_from_history(&[]), AcademicState::default());
    }
}
