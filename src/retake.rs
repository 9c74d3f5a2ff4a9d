use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::GpaError;
use crate::models::{term_rank, CourseEntry, CourseHistoryRecord, RetakeMatch, RetakeWarning};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetakeRequest {
    pub courses: Vec<CourseEntry>,
    pub semester: String,
    pub year: i32,
}

impl RetakeRequest {
    pub fn signature(&self) -> InputSignature {
        InputSignature::new(&self.courses, &self.semester, self.year)
    }
}

/// The inputs a retake answer depends on. A response is only applied while
/// the form still has the same signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSignature {
    codes: Vec<String>,
    semester: String,
    year: i32,
}

impl InputSignature {
    pub fn new(courses: &[CourseEntry], semester: &str, year: i32) -> Self {
        Self {
            codes: courses
                .iter()
                .map(|course| normalize_code(&course.course_code))
                .filter(|code| !code.is_empty())
                .collect(),
            semester: semester.trim().to_ascii_lowercase(),
            year,
        }
    }
}

/// Answers whether any requested course repeats an earlier attempt.
#[async_trait]
pub trait RetakeSource: Send + Sync {
    async fn check_retakes(&self, request: &RetakeRequest) -> Result<RetakeWarning, GpaError>;
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Matches the requested codes against stored attempts. Attempts recorded for
/// the requested term itself are not retakes.
pub fn detect_retakes(history: &[CourseHistoryRecord], request: &RetakeRequest) -> RetakeWarning {
    let requested_term = (request.year, term_rank(&request.semester));
    let mut latest: HashMap<String, &CourseHistoryRecord> = HashMap::new();

    for record in history {
        let same_term = record.year == request.year
            && record.semester.trim().eq_ignore_ascii_case(request.semester.trim());
        if same_term {
            continue;
        }
        let key = normalize_code(&record.course_code);
        let newer = latest.get(&key).map_or(true, |current| {
            (record.year, term_rank(&record.semester), record.submitted_at)
                > (current.year, term_rank(&current.semester), current.submitted_at)
        });
        if newer {
            latest.insert(key, record);
        }
    }

    let mut seen = Vec::new();
    let mut retakes = Vec::new();
    for course in &request.courses {
        let code = normalize_code(&course.course_code);
        if code.is_empty() || seen.contains(&code) {
            continue;
        }
        seen.push(code.clone());

        if let Some(previous) = latest.get(&code) {
            let previous_term = (previous.year, term_rank(&previous.semester));
            retakes.push(RetakeMatch {
                course_code: code,
                previous_grade: previous.grade.clone(),
                previous_semester: previous.semester.clone(),
                previous_year: previous.year,
                will_replace: requested_term > previous_term,
            });
        }
    }

    RetakeWarning::from_matches(retakes)
}

/// Runs a retake check without letting it block the caller. Failures and
/// timeouts are logged and turn into `None`.
pub async fn check_advisory(
    source: &dyn RetakeSource,
    request: &RetakeRequest,
    timeout: Duration,
) -> Option<RetakeWarning> {
    let outcome = match tokio::time::timeout(timeout, source.check_retakes(request)).await {
        Ok(result) => result,
        Err(_) => Err(GpaError::RetakeCheckUnavailable(format!(
            "no answer within {}ms",
            timeout.as_millis()
        ))),
    };

    match outcome {
        Ok(warning) => Some(warning),
        Err(err) => {
            tracing::warn!(error = %err, "continuing without retake information");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetakeOutcome {
    pub generation: u64,
    pub signature: InputSignature,
    pub warning: Option<RetakeWarning>,
}

/// Debounced retake lookups for one form session. Each `schedule` call
/// supersedes the previous one; only the newest generation is ever applied.
pub struct RetakeWatcher {
    source: Arc<dyn RetakeSource>,
    debounce: Duration,
    timeout: Duration,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    outcomes: mpsc::UnboundedSender<RetakeOutcome>,
}

impl RetakeWatcher {
    pub fn new(
        source: Arc<dyn RetakeSource>,
        debounce: Duration,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<RetakeOutcome>) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let watcher = Self {
            source,
            debounce,
            timeout,
            generation: 0,
            pending: None,
            outcomes,
        };
        (watcher, receiver)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn schedule(&mut self, request: RetakeRequest) -> u64 {
        self.cancel();
        self.generation += 1;

        let generation = self.generation;
        let source = Arc::clone(&self.source);
        let debounce = self.debounce;
        let timeout = self.timeout;
        let outcomes = self.outcomes.clone();

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            tracing::debug!(generation, "dispatching retake check");
            let warning = check_advisory(source.as_ref(), &request, timeout).await;
            let _ = outcomes.send(RetakeOutcome {
                generation,
                signature: request.signature(),
                warning,
            });
        }));

        generation
    }

    /// Drops any pending lookup and bumps the generation so an answer that
    /// already reached the channel is ignored too.
    pub fn invalidate(&mut self) {
        self.cancel();
        self.generation += 1;
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for RetakeWatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Retake source returning a fixed answer after an optional delay.
    pub(crate) struct FixedSource {
        pub delay: Duration,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl FixedSource {
        pub(crate) fn new(delay: Duration, fail: bool) -> Self {
            Self {
                delay,
                fail,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RetakeSource for FixedSource {
        async fn check_retakes(
            &self,
            request: &RetakeRequest,
        ) -> Result<RetakeWarning, GpaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(GpaError::RetakeCheckUnavailable(
                    "connection refused".to_string(),
                ));
            }
            let retakes = request
                .courses
                .iter()
                .map(|course| RetakeMatch {
                    course_code: normalize_code(&course.course_code),
                    previous_grade: "D".to_string(),
                    previous_semester: "Spring".to_string(),
                    previous_year: request.year - 1,
                    will_replace: true,
                })
                .collect();
            Ok(RetakeWarning::from_matches(retakes))
        }
    }

    fn request(codes: &[&str]) -> RetakeRequest {
        RetakeRequest {
            courses: codes
                .iter()
                .map(|code| CourseEntry::new(code, 3, "A"))
                .collect(),
            semester: "Fall".to_string(),
            year: 2025,
        }
    }

    fn attempt(semester: &str, year: i32, code: &str, grade: &str) -> CourseHistoryRecord {
        CourseHistoryRecord {
            semester_id: Uuid::new_v4(),
            semester: semester.to_string(),
            year,
            course_code: code.to_string(),
            course_name: None,
            credit_hours: 3,
            grade: grade.to_string(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn detects_latest_prior_attempt() {
        let history = vec![
            attempt("Spring", 2024, "MAT110", "F"),
            attempt("Fall", 2024, "MAT110", "D"),
            attempt("Spring", 2024, "ENG101", "A"),
        ];
        let warning = detect_retakes(&history, &request(&["mat110 ", "CSE220"]));
        assert!(warning.has_retakes);
        assert_eq!(warning.retake_count, 1);
        let retake = &warning.retakes[0];
        assert_eq!(retake.course_code, "MAT110");
        assert_eq!(retake.previous_grade, "D");
        assert_eq!(retake.previous_semester, "Fall");
        assert_eq!(retake.previous_year, 2024);
        assert!(retake.will_replace);
    }

    #[test]
    fn same_term_attempts_are_not_retakes() {
        let history = vec![attempt("Fall", 2025, "CSE220", "B")];
        let warning = detect_retakes(&history, &request(&["CSE220"]));
        assert!(!warning.has_retakes);
        assert_eq!(warning.retake_count, 0);
    }

    #[test]
    fn backfilled_older_term_does_not_replace() {
        let history = vec![attempt("Spring", 2026, "CSE220", "B")];
        let warning = detect_retakes(&history, &request(&["CSE220"]));
        assert_eq!(warning.retake_count, 1);
        assert!(!warning.retakes[0].will_replace);
    }

    #[test]
    fn signature_ignores_case_and_blank_rows() {
        let mut a = request(&["cse220", "MAT215"]);
        a.courses.push(CourseEntry::default());
        let b = request(&["CSE220 ", "mat215"]);
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), request(&["CSE220"]).signature());
    }

    #[tokio::test(start_paused = true)]
    async fn advisory_check_swallows_failures() {
        let source = FixedSource::new(Duration::from_millis(10), true);
        let result =
            check_advisory(&source, &request(&["CSE220"]), Duration::from_secs(1)).await;
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn advisory_check_times_out() {
        let source = FixedSource::new(Duration::from_secs(10), false);
        let result =
            check_advisory(&source, &request(&["CSE220"]), Duration::from_secs(1)).await;
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_changes_collapse_into_one_lookup() {
        let source = Arc::new(FixedSource::new(Duration::from_millis(50), false));
        let (mut watcher, mut outcomes) = RetakeWatcher::new(
            source.clone(),
            Duration::from_millis(500),
            Duration::from_secs(3),
        );

        watcher.schedule(request(&["C"]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        watcher.schedule(request(&["CS"]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let last = watcher.schedule(request(&["CSE220"]));

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.generation, last);
        assert_eq!(outcome.signature, request(&["CSE220"]).signature());
        assert_eq!(outcome.warning.unwrap().retakes[0].course_code, "CSE220");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_lookup_is_superseded() {
        let source = Arc::new(FixedSource::new(Duration::from_millis(400), false));
        let (mut watcher, mut outcomes) = RetakeWatcher::new(
            source.clone(),
            Duration::from_millis(500),
            Duration::from_secs(3),
        );

        watcher.schedule(request(&["MAT110"]));
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let latest = watcher.schedule(request(&["MAT215"]));
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.generation, latest);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_lookup_still_reports_outcome() {
        let source = Arc::new(FixedSource::new(Duration::from_millis(10), true));
        let (mut watcher, mut outcomes) =
            RetakeWatcher::new(source, Duration::from_millis(500), Duration::from_secs(3));

        watcher.schedule(request(&["CSE220"]));
        let outcome = outcomes.recv().await.unwrap();
        assert!(outcome.warning.is_none());
    }
}
