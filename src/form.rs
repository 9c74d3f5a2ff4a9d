use async_trait::async_trait;
use serde::Serialize;

use crate::error::GpaError;
use crate::gpa;
use crate::models::{
    AcademicState, CourseEntry, Projection, ProjectionNote, RetakeWarning, SemesterCalculation,
    SemesterSubmission, SubmissionReceipt,
};
use crate::retake::{InputSignature, RetakeOutcome, RetakeRequest};

const GENERIC_SUBMIT_FAILURE: &str = "Failed to save semester. Please try again.";

/// Authoritative destination for finished semesters.
#[async_trait]
pub trait SemesterStore: Send + Sync {
    async fn submit_semester(
        &self,
        submission: &SemesterSubmission,
    ) -> Result<SubmissionReceipt, GpaError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub calculation: SemesterCalculation,
    pub projection: Projection,
}

/// One in-progress semester form for one student.
#[derive(Debug, Clone)]
pub struct FormSession {
    existing: AcademicState,
    semester: String,
    year: i32,
    courses: Vec<CourseEntry>,
    preview: Option<Preview>,
    retake_warning: Option<RetakeWarning>,
    error: Option<String>,
    latest_generation: u64,
}

impl FormSession {
    pub fn new(existing: AcademicState, semester: &str, year: i32) -> Self {
        Self {
            existing,
            semester: semester.trim().to_string(),
            year,
            courses: Vec::new(),
            preview: None,
            retake_warning: None,
            error: None,
            latest_generation: 0,
        }
    }

    pub fn existing(&self) -> &AcademicState {
        &self.existing
    }

    pub fn semester(&self) -> &str {
        &self.semester
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn courses(&self) -> &[CourseEntry] {
        &self.courses
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn retake_warning(&self) -> Option<&RetakeWarning> {
        self.retake_warning.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_term(&mut self, semester: &str, year: i32) {
        self.semester = semester.trim().to_string();
        self.year = year;
        self.touch();
    }

    pub fn add_course(&mut self, entry: CourseEntry) {
        self.courses.push(entry);
        self.touch();
    }

    pub fn update_course(&mut self, index: usize, entry: CourseEntry) -> bool {
        match self.courses.get_mut(index) {
            Some(slot) => {
                *slot = entry;
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn remove_course(&mut self, index: usize) -> Option<CourseEntry> {
        if index >= self.courses.len() {
            return None;
        }
        let removed = self.courses.remove(index);
        self.touch();
        Some(removed)
    }

    fn touch(&mut self) {
        self.preview = None;
        self.retake_warning = None;
        self.error = None;
    }

    pub fn signature(&self) -> InputSignature {
        InputSignature::new(&self.courses, &self.semester, self.year)
    }

    /// The retake lookup for the current inputs, if any row has a code yet.
    pub fn retake_request(&self) -> Option<RetakeRequest> {
        if self.courses.iter().all(|course| course.course_code.trim().is_empty()) {
            return None;
        }
        Some(RetakeRequest {
            courses: self.courses.clone(),
            semester: self.semester.clone(),
            year: self.year,
        })
    }

    /// Records which watcher generation the form is waiting on.
    pub fn expect_generation(&mut self, generation: u64) {
        self.latest_generation = generation;
    }

    /// Applies a retake answer if it still describes the current inputs.
    pub fn apply_retake_outcome(&mut self, outcome: RetakeOutcome) -> bool {
        if outcome.generation != self.latest_generation || outcome.signature != self.signature() {
            tracing::debug!(
                generation = outcome.generation,
                expected = self.latest_generation,
                "discarding stale retake answer"
            );
            return false;
        }
        self.retake_warning = outcome.warning;
        true
    }

    pub fn calculate_preview(&mut self) -> Result<&Preview, GpaError> {
        self.preview = None;
        match gpa::calculate_semester(&self.courses) {
            Ok(calculation) => {
                self.error = None;
                let projection = gpa::project_cgpa(&self.existing, &calculation);
                if let ProjectionNote::InconsistentRecord { semesters_count } = projection.note {
                    tracing::warn!(
                        semesters = semesters_count,
                        "existing CGPA is zero with prior semesters on record"
                    );
                }
                Ok(self.preview.insert(Preview {
                    calculation,
                    projection,
                }))
            }
            Err(err) => {
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn submission(&self) -> Result<SemesterSubmission, GpaError> {
        let courses = gpa::validate_courses(&self.courses)?;
        Ok(SemesterSubmission {
            semester: self.semester.clone(),
            year: self.year,
            courses,
        })
    }

    /// Saves a previewed semester. On failure the rows and the preview stay in
    /// place so the student can fix and resubmit.
    pub async fn submit(
        &mut self,
        store: &dyn SemesterStore,
    ) -> Result<SubmissionReceipt, GpaError> {
        if self.courses.is_empty() {
            return Err(GpaError::SubmissionFailed(
                "add at least one course before submitting".to_string(),
            ));
        }
        if self.preview.is_none() {
            return Err(GpaError::SubmissionFailed(
                "calculate a preview before submitting".to_string(),
            ));
        }
        if self.semester.is_empty() {
            return Err(GpaError::SubmissionFailed("semester is required".to_string()));
        }

        let submission = self.submission()?;
        match store.submit_semester(&submission).await {
            Ok(receipt) => {
                tracing::info!(
                    semester = %submission.semester,
                    year = submission.year,
                    courses = receipt.course_count,
                    "semester saved"
                );
                self.courses.clear();
                self.touch();
                Ok(receipt)
            }
            Err(err) => {
                let message = match err {
                    GpaError::SubmissionFailed(message) if !message.trim().is_empty() => message,
                    GpaError::SubmissionFailed(_) => GENERIC_SUBMIT_FAILURE.to_string(),
                    other => other.to_string(),
                };
                self.error = Some(message.clone());
                Err(GpaError::SubmissionFailed(message))
            }
        }
    }
}
