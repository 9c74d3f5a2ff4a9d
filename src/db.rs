use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::GpaError;
use crate::form::SemesterStore;
use crate::gpa;
use crate::models::{
    AcademicState, CourseEntry, CourseHistoryRecord, RetakeWarning, SemesterSubmission,
    StudentProfile, SubmissionReceipt,
};
use crate::retake::{self, RetakeRequest, RetakeSource};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("8a4c2e19-6b0d-4f3a-9e57-1c2d7f0b9a61")?,
            "Noor Haddad",
            "noor.haddad@groupscholar.com",
        ),
        (
            Uuid::parse_str("f1e83b47-2c95-4d6e-a0b8-5e7c3d91f204")?,
            "Mateo Alvarez",
            "mateo.alvarez@groupscholar.com",
        ),
        (
            Uuid::parse_str("2b6d9f03-7e41-48c2-b5a9-0f8e6c13d7e5")?,
            "Priya Raman",
            "priya.raman@groupscholar.com",
        ),
    ];

    for (id, name, email) in &students {
        upsert_student(pool, *id, name, email).await?;
    }

    let semesters: Vec<(&str, &str, i32, Vec<CourseEntry>)> = vec![
        (
            "noor.haddad@groupscholar.com",
            "Fall",
            2024,
            vec![
                CourseEntry::new("CSE110", 3, "A-").with_name("Programming Language I"),
                CourseEntry::new("MAT110", 3, "D+").with_name("Differential Calculus"),
                CourseEntry::new("ENG101", 3, "B+").with_name("English Fundamentals"),
            ],
        ),
        (
            "noor.haddad@groupscholar.com",
            "Spring",
            2025,
            vec![
                CourseEntry::new("CSE111", 3, "B").with_name("Programming Language II"),
                CourseEntry::new("PHY111", 4, "B-").with_name("Principles of Physics I"),
                CourseEntry::new("HUM103", 2, "A").with_name("Ethics and Culture"),
            ],
        ),
        (
            "mateo.alvarez@groupscholar.com",
            "Spring",
            2025,
            vec![
                CourseEntry::new("BUS101", 3, "A").with_name("Introduction to Business"),
                CourseEntry::new("ECO101", 3, "A-").with_name("Microeconomics"),
            ],
        ),
    ];

    for (email, semester, year, courses) in semesters {
        let student = find_student(pool, email)
            .await?
            .with_context(|| format!("seed student {email} missing"))?;
        if semester_exists(pool, student.student_id, semester, year).await? {
            continue;
        }
        let submission = SemesterSubmission {
            semester: semester.to_string(),
            year,
            courses: gpa::validate_courses(&courses)?,
        };
        insert_semester(pool, student.student_id, &submission).await?;
    }

    Ok(())
}

async fn upsert_student(pool: &PgPool, id: Uuid, name: &str, email: &str) -> anyhow::Result<Uuid> {
    let student_id: Uuid = sqlx::query(
        r#"
        INSERT INTO gpa_planner.students (id, full_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(student_id)
}

pub async fn find_student(pool: &PgPool, email: &str) -> anyhow::Result<Option<StudentProfile>> {
    let row = sqlx::query("SELECT id, full_name, email FROM gpa_planner.students WHERE email = $1")
        .bind(email.trim())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| StudentProfile {
        student_id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
    }))
}

pub async fn require_student(pool: &PgPool, email: &str) -> anyhow::Result<StudentProfile> {
    find_student(pool, email)
        .await?
        .with_context(|| format!("no student on record for {email}"))
}

async fn semester_exists(
    pool: &PgPool,
    student_id: Uuid,
    semester: &str,
    year: i32,
) -> anyhow::Result<bool> {
    let row = sqlx::query(
        "SELECT 1 AS found FROM gpa_planner.semesters \
         WHERE student_id = $1 AND lower(semester) = lower($2) AND year = $3",
    )
    .bind(student_id)
    .bind(semester)
    .bind(year)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

pub async fn fetch_history(
    pool: &PgPool,
    student_id: Uuid,
) -> Result<Vec<CourseHistoryRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT s.id AS semester_id, s.semester, s.year, s.submitted_at, \
         c.course_code, c.course_name, c.credit_hours, c.grade \
         FROM gpa_planner.semester_courses c \
         JOIN gpa_planner.semesters s ON s.id = c.semester_id \
         WHERE s.student_id = $1 \
         ORDER BY s.year, s.submitted_at, c.course_code",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(CourseHistoryRecord {
            semester_id: row.get("semester_id"),
            semester: row.get("semester"),
            year: row.get("year"),
            course_code: row.get("course_code"),
            course_name: row.get("course_name"),
            credit_hours: row.get("credit_hours"),
            grade: row.get("grade"),
            submitted_at: row.get("submitted_at"),
        });
    }

    Ok(records)
}

/// Standing used for projections. Unknown students start from zero.
pub async fn fetch_academic_state(pool: &PgPool, email: &str) -> anyhow::Result<AcademicState> {
    let Some(student) = find_student(pool, email).await? else {
        tracing::info!(%email, "student not on record, projecting from an empty history");
        return Ok(AcademicState::default());
    };
    let history = fetch_history(pool, student.student_id)
        .await
        .context("failed to load course history")?;
    Ok(gpa::cumulative_from_history(&history))
}

pub async fn insert_semester(
    pool: &PgPool,
    student_id: Uuid,
    submission: &SemesterSubmission,
) -> Result<Uuid, sqlx::Error> {
    let summary = gpa::summarize(&submission.courses);
    let semester_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO gpa_planner.semesters
        (id, student_id, semester, year, semester_gpa, total_credits)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(semester_id)
    .bind(student_id)
    .bind(&submission.semester)
    .bind(submission.year)
    .bind(summary.semester_gpa)
    .bind(summary.total_credits as i32)
    .execute(&mut *tx)
    .await?;

    for course in &submission.courses {
        sqlx::query(
            r#"
            INSERT INTO gpa_planner.semester_courses
            (id, semester_id, course_code, course_name, credit_hours, grade, grade_point)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(semester_id)
        .bind(&course.course_code)
        .bind(course.course_name.as_deref())
        .bind(course.credit_hours as i32)
        .bind(course.grade.symbol())
        .bind(gpa::grade_point(course.grade))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(semester_id)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        semester: String,
        year: i32,
        course_code: String,
        course_name: Option<String>,
        credit_hours: Option<i32>,
        grade: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut groups: BTreeMap<(String, String, i32), (String, Vec<CourseEntry>)> = BTreeMap::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let key = (row.email.trim().to_string(), row.semester.trim().to_string(), row.year);
        let entry = groups
            .entry(key)
            .or_insert_with(|| (row.full_name.trim().to_string(), Vec::new()));
        entry.1.push(CourseEntry {
            course_code: row.course_code,
            course_name: row.course_name,
            credit_hours: row.credit_hours,
            grade: row.grade,
        });
    }

    let mut inserted = 0usize;
    for ((email, semester, year), (full_name, entries)) in groups {
        let courses = gpa::validate_courses(&entries)
            .with_context(|| format!("{email} {semester} {year}"))?;
        let student_id = upsert_student(pool, Uuid::new_v4(), &full_name, &email).await?;

        if semester_exists(pool, student_id, &semester, year).await? {
            tracing::info!(%email, %semester, year, "semester already on record, skipping");
            continue;
        }

        let submission = SemesterSubmission {
            semester,
            year,
            courses,
        };
        insert_semester(pool, student_id, &submission).await?;
        inserted += submission.courses.len();
    }

    Ok(inserted)
}

/// Retake lookups answered from a student's stored history.
pub struct PgRetakeSource {
    pool: PgPool,
    student_id: Uuid,
}

impl PgRetakeSource {
    pub fn new(pool: PgPool, student_id: Uuid) -> Self {
        Self { pool, student_id }
    }
}

#[async_trait]
impl RetakeSource for PgRetakeSource {
    async fn check_retakes(&self, request: &RetakeRequest) -> Result<RetakeWarning, GpaError> {
        let history = fetch_history(&self.pool, self.student_id)
            .await
            .map_err(|err| GpaError::RetakeCheckUnavailable(err.to_string()))?;
        Ok(retake::detect_retakes(&history, request))
    }
}

pub struct PgSemesterStore {
    pool: PgPool,
    student_id: Uuid,
}

impl PgSemesterStore {
    pub fn new(pool: PgPool, student_id: Uuid) -> Self {
        Self { pool, student_id }
    }
}

#[async_trait]
impl SemesterStore for PgSemesterStore {
    async fn submit_semester(
        &self,
        submission: &SemesterSubmission,
    ) -> Result<SubmissionReceipt, GpaError> {
        let exists = semester_exists(
            &self.pool,
            self.student_id,
            &submission.semester,
            submission.year,
        )
        .await
            .map_err(|err| GpaError::SubmissionFailed(format!("{err:#}")))?;
        if exists {
            return Err(already_recorded(submission));
        }

        match insert_semester(&self.pool, self.student_id, submission).await {
            Ok(semester_id) => Ok(SubmissionReceipt {
                semester_id,
                course_count: submission.courses.len(),
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(already_recorded(submission))
            }
            Err(err) => {
                tracing::error!(error = %err, "semester insert failed");
                Err(GpaError::SubmissionFailed(err.to_string()))
            }
        }
    }
}

fn already_recorded(submission: &SemesterSubmission) -> GpaError {
    GpaError::SubmissionFailed(format!(
        "{} {} is already on record for this student",
        submission.semester, submission.year
    ))
}
