use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Letter grades accepted on a semester form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "D+")]
    DPlus,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D-")]
    DMinus,
    #[serde(rename = "F")]
    F,
}

impl Grade {
    pub const ALL: [Grade; 13] = [
        Grade::APlus,
        Grade::A,
        Grade::AMinus,
        Grade::BPlus,
        Grade::B,
        Grade::BMinus,
        Grade::CPlus,
        Grade::C,
        Grade::CMinus,
        Grade::DPlus,
        Grade::D,
        Grade::DMinus,
        Grade::F,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::DPlus => "D+",
            Grade::D => "D",
            Grade::DMinus => "D-",
            Grade::F => "F",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_uppercase();
        Grade::ALL
            .into_iter()
            .find(|grade| grade.symbol() == wanted)
            .ok_or_else(|| format!("unknown grade '{}'", value.trim()))
    }
}

/// A raw course row as typed into a form or read from CSV. Nothing is
/// guaranteed until it passes validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseEntry {
    pub course_code: String,
    #[serde(default)]
    pub course_name: Option<String>,
    #[serde(default)]
    pub credit_hours: Option<i32>,
    #[serde(default)]
    pub grade: Option<String>,
}

impl CourseEntry {
    pub fn new(code: &str, credit_hours: i32, grade: &str) -> Self {
        Self {
            course_code: code.to_string(),
            course_name: None,
            credit_hours: Some(credit_hours),
            grade: Some(grade.to_string()),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.course_name = Some(name.to_string());
        self
    }
}

/// A course row that passed validation, with trimmed fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidCourse {
    pub course_code: String,
    pub course_name: Option<String>,
    pub credit_hours: u32,
    pub grade: Grade,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemesterCalculation {
    pub semester_gpa: f64,
    pub total_credits: u32,
    pub total_points: f64,
    pub course_count: usize,
}

/// The student's persisted standing before the semester being planned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AcademicState {
    pub cgpa: f64,
    pub credits: u32,
    pub semesters_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectionNote {
    FirstSemester,
    InconsistentRecord { semesters_count: u32 },
    NoCredits,
    Improves { from: f64 },
    Lowers { from: f64 },
    Maintains,
}

impl fmt::Display for ProjectionNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionNote::FirstSemester => {
                write!(f, "first semester, CGPA equals semester GPA")
            }
            ProjectionNote::InconsistentRecord { semesters_count } => write!(
                f,
                "existing CGPA is 0.00 across {} semesters; using semester GPA",
                semesters_count
            ),
            ProjectionNote::NoCredits => write!(f, "no credits on record, cannot project"),
            ProjectionNote::Improves { from } => write!(f, "improves CGPA from {:.2}", from),
            ProjectionNote::Lowers { from } => write!(f, "lowers CGPA from {:.2}", from),
            ProjectionNote::Maintains => write!(f, "maintains current CGPA"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    pub projected_cgpa: f64,
    pub note: ProjectionNote,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetakeMatch {
    pub course_code: String,
    pub previous_grade: String,
    pub previous_semester: String,
    pub previous_year: i32,
    pub will_replace: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetakeWarning {
    pub has_retakes: bool,
    pub retake_count: usize,
    pub retakes: Vec<RetakeMatch>,
}

impl RetakeWarning {
    pub fn from_matches(retakes: Vec<RetakeMatch>) -> Self {
        Self {
            has_retakes: !retakes.is_empty(),
            retake_count: retakes.len(),
            retakes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemesterSubmission {
    pub semester: String,
    pub year: i32,
    pub courses: Vec<ValidCourse>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub semester_id: Uuid,
    pub course_count: usize,
}

/// One stored course attempt from a student's history.
#[derive(Debug, Clone)]
pub struct CourseHistoryRecord {
    pub semester_id: Uuid,
    pub semester: String,
    pub year: i32,
    pub course_code: String,
    pub course_name: Option<String>,
    pub credit_hours: i32,
    pub grade: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StudentProfile {
    pub student_id: Uuid,
    pub full_name: String,
    pub email: String,
}

/// Ordering key for academic terms within a year.
pub fn term_rank(semester: &str) -> u8 {
    match semester.trim().to_ascii_lowercase().as_str() {
        "spring" => 1,
        "summer" => 2,
        "fall" | "autumn" => 3,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_parse_loosely_and_serialize_as_symbols() {
        assert_eq!(" b+ ".parse::<Grade>().unwrap(), Grade::BPlus);
        assert!("E".parse::<Grade>().is_err());
        assert_eq!(serde_json::to_string(&Grade::AMinus).unwrap(), "\"A-\"");
    }

    #[test]
    fn retake_warning_serializes_for_json_output() {
        let warning = RetakeWarning::from_matches(vec![RetakeMatch {
            course_code: "MAT110".to_string(),
            previous_grade: "D".to_string(),
            previous_semester: "Fall".to_string(),
            previous_year: 2024,
            will_replace: true,
        }]);
        let value = serde_json::to_value(&warning).unwrap();
        assert_eq!(value["has_retakes"], true);
        assert_eq!(value["retake_count"], 1);
        assert_eq!(value["retakes"][0]["course_code"], "MAT110");
    }

    #[test]
    fn terms_order_within_a_year() {
        assert!(term_rank("Spring") < term_rank("summer"));
        assert!(term_rank("Summer") < term_rank(" FALL "));
        assert_eq!(term_rank("Winterim"), 0);
    }
}
