use chrono::{DateTime, Duration, Local, LocalResult, NaiveTime, TimeZone, Utc};

use crate::error::{ReminderVaultError, Result};

pub const MAX_TASK_CHARS: usize = 1000;

const CLOCK_FORMATS: &[&str] = &["%I:%M%p", "%I%p", "%H:%M", "%H"];

/// Trims and checks reminder text before it is encrypted.
pub fn validate_task_text(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ReminderVaultError::Validation(
            "task text must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TASK_CHARS {
        return Err(ReminderVaultError::Validation(format!(
            "task text exceeds {MAX_TASK_CHARS} characters"
        )));
    }
    if trimmed.chars().any(|c| c.is_control() && c != '\t') {
        return Err(ReminderVaultError::Validation(
            "task text contains control characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Parses a due time and normalizes it to UTC.
///
/// Accepts RFC 3339, a bare clock time (`6:35 PM`, `6 pm`, `18:35`) meaning
/// its next occurrence after `now`, or an English phrase such as
/// `tomorrow 5pm`.
pub fn parse_due_time<Tz>(input: &str, now: DateTime<Tz>) -> Result<DateTime<Utc>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ReminderVaultError::Validation(
            "due time must not be empty".to_string(),
        ));
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(at.with_timezone(&Utc));
    }

    if let Some(clock) = parse_clock_time(trimmed) {
        return next_occurrence(clock, &now);
    }

    chrono_english::parse_date_string(trimmed, now, chrono_english::Dialect::Us)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| ReminderVaultError::Validation(format!("could not understand time `{trimmed}`")))
}

pub fn parse_due_time_local(input: &str) -> Result<DateTime<Utc>> {
    parse_due_time(input, Local::now())
}

fn parse_clock_time(input: &str) -> Option<NaiveTime> {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect::<String>()
        .to_uppercase();
    CLOCK_FORMATS.iter().find_map(|format| {
        NaiveTime::parse_from_str(&compact, format)
            .ok()
            .or_else(|| hour_only(&compact, format))
    })
}

// NaiveTime refuses formats without minutes; pad them and retry.
fn hour_only(compact: &str, format: &str) -> Option<NaiveTime> {
    match format {
        "%I%p" => {
            let (hour, meridiem) = compact
                .strip_suffix("AM")
                .map(|hour| (hour, "AM"))
                .or_else(|| compact.strip_suffix("PM").map(|hour| (hour, "PM")))?;
            NaiveTime::parse_from_str(&format!("{hour}:00{meridiem}"), "%I:%M%p").ok()
        }
        "%H" => NaiveTime::parse_from_str(&format!("{compact}:00"), "%H:%M").ok(),
        _ => None,
    }
}

fn next_occurrence<Tz: TimeZone>(clock: NaiveTime, now: &DateTime<Tz>) -> Result<DateTime<Utc>> {
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..=2 {
        let date = today + Duration::days(offset);
        let candidate = match tz.from_local_datetime(&date.and_time(clock)) {
            LocalResult::Single(at) => at,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => continue,
        };
        if candidate > *now {
            return Ok(candidate.with_timezone(&Utc));
        }
    }
    Err(ReminderVaultError::Validation(format!(
        "no upcoming occurrence of {}",
        clock.format("%H:%M")
    )))
}
