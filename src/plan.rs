use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::form::{FormSession, SemesterStore};
use crate::gpa;
use crate::models::CourseEntry;
use crate::report;
use crate::retake::{RetakeSource, RetakeWatcher};

pub const HELP: &str = "\
commands:
  add CODE CREDITS GRADE [NAME]        append a course row
  set ROW CODE CREDITS GRADE [NAME]    replace row ROW (1-based)
  remove ROW                           drop row ROW
  term SEMESTER YEAR                   change the semester being planned
  preview                              calculate semester GPA and projected CGPA
  submit                               save the previewed semester
  show                                 list the current rows
  quit                                 leave without saving";

#[derive(Debug, Clone, PartialEq)]
pub enum PlanCommand {
    Add(CourseEntry),
    Set(usize, CourseEntry),
    Remove(usize),
    Term { semester: String, year: i32 },
    Preview,
    Submit,
    Show,
    Help,
    Quit,
}

impl PlanCommand {
    /// Whether the command changes the inputs a retake lookup depends on.
    pub fn edits_inputs(&self) -> bool {
        matches!(
            self,
            PlanCommand::Add(_)
                | PlanCommand::Set(..)
                | PlanCommand::Remove(_)
                | PlanCommand::Term { .. }
        )
    }
}

pub fn parse_command(line: &str) -> Result<Option<PlanCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = parts.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "add" => PlanCommand::Add(parse_row(&rest)?),
        "set" => {
            let (row, fields) = rest
                .split_first()
                .ok_or("usage: set ROW CODE CREDITS GRADE [NAME]")?;
            PlanCommand::Set(parse_index(row)?, parse_row(fields)?)
        }
        "remove" | "rm" => {
            let row = rest.first().ok_or("usage: remove ROW")?;
            PlanCommand::Remove(parse_index(row)?)
        }
        "term" => match rest.as_slice() {
            [semester, year] => PlanCommand::Term {
                semester: semester.to_string(),
                year: year
                    .parse()
                    .map_err(|_| format!("year must be a number, got '{year}'"))?,
            },
            _ => return Err("usage: term SEMESTER YEAR".to_string()),
        },
        "preview" | "calc" => PlanCommand::Preview,
        "submit" | "save" => PlanCommand::Submit,
        "show" | "ls" => PlanCommand::Show,
        "help" | "?" => PlanCommand::Help,
        "quit" | "exit" => PlanCommand::Quit,
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };

    Ok(Some(command))
}

fn parse_row(fields: &[&str]) -> Result<CourseEntry, String> {
    let [code, credits, grade, name @ ..] = fields else {
        return Err("expected CODE CREDITS GRADE [NAME]".to_string());
    };
    let credit_hours = credits
        .parse::<i32>()
        .map_err(|_| format!("credit hours must be a whole number, got '{credits}'"))?;

    Ok(CourseEntry {
        course_code: code.to_string(),
        course_name: (!name.is_empty()).then(|| name.join(" ")),
        credit_hours: Some(credit_hours),
        grade: Some(grade.to_string()),
    })
}

fn parse_index(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(row) if row >= 1 => Ok(row - 1),
        _ => Err(format!("row must be a positive number, got '{raw}'")),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanTiming {
    pub debounce: Duration,
    pub timeout: Duration,
}

/// Interactive form loop. Retake answers are printed as they arrive; edits
/// reschedule the lookup and stale answers are dropped by the form.
pub async fn run_session<R, W>(
    mut form: FormSession,
    source: Arc<dyn RetakeSource>,
    store: &dyn SemesterStore,
    timing: PlanTiming,
    input: R,
    out: &mut W,
) -> anyhow::Result<FormSession>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let (mut watcher, mut outcomes) = RetakeWatcher::new(source, timing.debounce, timing.timeout);
    let mut lines = input.lines();

    writeln!(
        out,
        "Planning {} {} (current CGPA {:.2}, {} credits). Type 'help' for commands.",
        form.semester(),
        form.year(),
        form.existing().cgpa,
        form.existing().credits
    )?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match parse_command(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(message) => {
                        writeln!(out, "! {message}")?;
                        continue;
                    }
                };

                if command == PlanCommand::Quit {
                    break;
                }
                let edits = command.edits_inputs();
                apply_command(&mut form, command, store, &mut *out).await?;

                if edits {
                    match form.retake_request() {
                        Some(request) => {
                            let generation = watcher.schedule(request);
                            form.expect_generation(generation);
                        }
                        None => {
                            watcher.invalidate();
                            form.expect_generation(watcher.generation());
                        }
                    }
                }
            }
            Some(outcome) = outcomes.recv() => {
                if form.apply_retake_outcome(outcome) {
                    let warning = form.retake_warning().filter(|warning| warning.has_retakes);
                    if let Some(warning) = warning {
                        writeln!(
                            out,
                            "retake notice: {} course(s) taken before",
                            warning.retake_count
                        )?;
                        for retake in &warning.retakes {
                            let effect = if retake.will_replace {
                                ", new grade will replace it"
                            } else {
                                ""
                            };
                            writeln!(
                                out,
                                "  {} previously {} in {} {}{}",
                                retake.course_code,
                                retake.previous_grade,
                                retake.previous_semester,
                                retake.previous_year,
                                effect
                            )?;
                        }
                    }
                }
            }
        }
    }

    Ok(form)
}

async fn apply_command<W: Write>(
    form: &mut FormSession,
    command: PlanCommand,
    store: &dyn SemesterStore,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        PlanCommand::Add(entry) => {
            form.add_course(entry);
            writeln!(out, "row {} added", form.courses().len())?;
        }
        PlanCommand::Set(index, entry) => {
            if form.update_course(index, entry) {
                writeln!(out, "row {} updated", index + 1)?;
            } else {
                writeln!(out, "! no row {}", index + 1)?;
            }
        }
        PlanCommand::Remove(index) => match form.remove_course(index) {
            Some(removed) => writeln!(out, "removed {}", removed.course_code.trim())?,
            None => writeln!(out, "! no row {}", index + 1)?,
        },
        PlanCommand::Term { semester, year } => {
            form.set_term(&semester, year);
            writeln!(out, "now planning {} {}", form.semester(), form.year())?;
        }
        PlanCommand::Preview => {
            if let Err(err) = form.calculate_preview() {
                writeln!(out, "! {err}")?;
                return Ok(());
            }
            let courses = gpa::validate_courses(form.courses())?;
            if let Some(preview) = form.preview() {
                let text = report::build_preview_report(
                    form.semester(),
                    form.year(),
                    form.existing(),
                    &courses,
                    preview,
                    form.retake_warning(),
                );
                write!(out, "{text}")?;
            }
        }
        PlanCommand::Submit => match form.submit(store).await {
            Ok(receipt) => writeln!(
                out,
                "saved {} courses (semester {})",
                receipt.course_count, receipt.semester_id
            )?,
            Err(err) => writeln!(out, "! submission failed: {err}")?,
        },
        PlanCommand::Show => {
            if form.courses().is_empty() {
                writeln!(out, "no rows yet")?;
            }
            for (index, course) in form.courses().iter().enumerate() {
                writeln!(
                    out,
                    "{:>2}. {} {} {}{}",
                    index + 1,
                    course.course_code,
                    course
                        .credit_hours
                        .map(|hours| hours.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    course.grade.as_deref().unwrap_or("-"),
                    course
                        .course_name
                        .as_deref()
                        .map(|name| format!(" ({name})"))
                        .unwrap_or_default()
                )?;
            }
            if let Some(error) = form.error() {
                writeln!(out, "last error: {error}")?;
            }
        }
        PlanCommand::Help => writeln!(out, "{HELP}")?,
        PlanCommand::Quit => {}
    }

    Ok(())
}
