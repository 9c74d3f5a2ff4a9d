use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{Datelike, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::io::BufReader;

mod config;
mod db;
mod error;
mod form;
mod gpa;
mod models;
mod plan;
mod report;
mod retake;

use config::Settings;
use form::{FormSession, Preview};
use models::{AcademicState, CourseEntry, RetakeWarning};

#[derive(Parser)]
#[command(name = "gpa-planner")]
#[command(about = "Semester GPA and CGPA planner for Group Scholar students", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import course history from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Preview semester GPA and projected CGPA from a course CSV
    #[command(group(
        ArgGroup::new("standing")
            .args(["email", "existing_cgpa"])
            .multiple(false)
    ))]
    Calculate {
        #[arg(long)]
        csv: PathBuf,
        /// Load the current standing and retake history for this student
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        existing_cgpa: Option<f64>,
        #[arg(long, default_value_t = 0, requires = "existing_cgpa")]
        existing_credits: u32,
        #[arg(long, default_value_t = 0, requires = "existing_cgpa")]
        existing_semesters: u32,
        #[arg(long, default_value = "Fall")]
        semester: String,
        #[arg(long)]
        year: Option<i32>,
        /// Print JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Save a semester from a course CSV
    Submit {
        #[arg(long)]
        email: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Plan a semester interactively with live retake checks
    Plan {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "Fall")]
        semester: String,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Generate a markdown academic history report
    Report {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "history.md")]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct CalculationOutput<'a> {
    semester: &'a str,
    year: i32,
    existing: &'a AcademicState,
    preview: &'a Preview,
    retakes: Option<&'a RetakeWarning>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gpa_planner=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&settings).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&settings).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect(&settings).await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} courses from {}.", csv.display());
        }
        Commands::Calculate {
            csv,
            email,
            existing_cgpa,
            existing_credits,
            existing_semesters,
            semester,
            year,
            json,
        } => {
            let year = year.unwrap_or_else(|| Utc::now().year());
            let entries = read_courses(&csv)?;

            let mut retake_source = None;
            let existing = match (email.as_deref(), existing_cgpa) {
                (Some(email), _) => {
                    let pool = connect(&settings).await?;
                    if let Some(student) = db::find_student(&pool, email).await? {
                        retake_source =
                            Some(db::PgRetakeSource::new(pool.clone(), student.student_id));
                    }
                    db::fetch_academic_state(&pool, email).await?
                }
                (None, Some(cgpa)) => {
                    anyhow::ensure!(cgpa >= 0.0, "--existing-cgpa must not be negative");
                    AcademicState {
                        cgpa,
                        credits: existing_credits,
                        semesters_count: existing_semesters,
                    }
                }
                (None, None) => AcademicState::default(),
            };

            let mut form = FormSession::new(existing, &semester, year);
            for entry in entries {
                form.add_course(entry);
            }

            let retakes = match (&retake_source, form.retake_request()) {
                (Some(source), Some(request)) => {
                    retake::check_advisory(source, &request, settings.retake_timeout).await
                }
                _ => None,
            };

            let preview = form.calculate_preview()?.clone();
            if json {
                let output = CalculationOutput {
                    semester: form.semester(),
                    year,
                    existing: form.existing(),
                    preview: &preview,
                    retakes: retakes.as_ref(),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let courses = gpa::validate_courses(form.courses())?;
                print!(
                    "{}",
                    report::build_preview_report(
                        form.semester(),
                        year,
                        form.existing(),
                        &courses,
                        &preview,
                        retakes.as_ref(),
                    )
                );
            }
        }
        Commands::Submit {
            email,
            semester,
            year,
            csv,
        } => {
            let pool = connect(&settings).await?;
            let student = db::require_student(&pool, &email).await?;
            let existing = db::fetch_academic_state(&pool, &email).await?;

            let mut form = FormSession::new(existing, &semester, year);
            for entry in read_courses(&csv)? {
                form.add_course(entry);
            }
            let preview = form.calculate_preview()?.clone();
            println!(
                "{} {}: semester GPA {:.2}, projected CGPA {:.2} ({})",
                form.semester(),
                year,
                preview.calculation.semester_gpa,
                preview.projection.projected_cgpa,
                preview.projection.note
            );

            let store = db::PgSemesterStore::new(pool.clone(), student.student_id);
            let receipt = form
                .submit(&store)
                .await
                .context("semester was not saved")?;
            println!(
                "Saved {} courses for {} ({}).",
                receipt.course_count, student.full_name, receipt.semester_id
            );
        }
        Commands::Plan {
            email,
            semester,
            year,
        } => {
            let pool = connect(&settings).await?;
            let student = db::require_student(&pool, &email).await?;
            let existing = db::fetch_academic_state(&pool, &email).await?;
            let year = year.unwrap_or_else(|| Utc::now().year());

            let form = FormSession::new(existing, &semester, year);
            let source = Arc::new(db::PgRetakeSource::new(pool.clone(), student.student_id));
            let store = db::PgSemesterStore::new(pool.clone(), student.student_id);
            let timing = plan::PlanTiming {
                debounce: settings.retake_debounce,
                timeout: settings.retake_timeout,
            };

            let mut stdout = std::io::stdout();
            let form = plan::run_session(
                form,
                source,
                &store,
                timing,
                BufReader::new(tokio::io::stdin()),
                &mut stdout,
            )
            .await?;
            if !form.courses().is_empty() {
                println!("Left with {} unsaved rows.", form.courses().len());
            }
        }
        Commands::Report { email, out } => {
            let pool = connect(&settings).await?;
            let student = db::require_student(&pool, &email).await?;
            let history = db::fetch_history(&pool, student.student_id)
                .await
                .context("failed to load course history")?;
            let state = gpa::cumulative_from_history(&history);
            let report =
                report::build_history_report(&student, Utc::now().date_naive(), &history, &state);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    let database_url = settings.require_database_url()?;
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn read_courses(path: &Path) -> anyhow::Result<Vec<CourseEntry>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut entries = Vec::new();
    for result in reader.deserialize::<CourseEntry>() {
        entries.push(result.with_context(|| format!("malformed row in {}", path.display()))?);
    }
    tracing::debug!(rows = entries.len(), path = %path.display(), "read course rows");
    Ok(entries)
}
