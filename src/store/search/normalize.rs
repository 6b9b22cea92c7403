//! Resolves raw tokens into a [`Query`] (spec.md §4.4): date-anchor resolution and AND/OR
//! grouping. Pure data transformation; no SQL is produced here (spec.md §9 "note-search query
//! parser").

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};

use super::ast::{Clause, Combinator, DateMatch, NumericMatch, Query, TextMatch, Term, TodoState};
use super::error::SearchError;
use super::lexer::RawToken;
use crate::store::diacritics;

const KNOWN_PREFIXES: &[&str] = &[
    "tag",
    "notebook",
    "resource",
    "created",
    "updated",
    "subjectDate",
    "latitude",
    "longitude",
    "altitude",
    "author",
    "source",
    "sourceApplication",
    "contentClass",
    "placeName",
    "applicationData",
    "reminderOrder",
    "reminderTime",
    "reminderDoneTime",
    "todo",
    "encryption",
];

pub fn normalize(tokens: Vec<RawToken>, now: DateTime<Utc>) -> Result<Query, SearchError> {
    let mut clauses = Vec::new();
    let mut combinator = Combinator::And;

    for token in tokens {
        if !token.negated && token.body == "any:" {
            combinator = Combinator::Or;
            continue;
        }

        let term = match split_typed(&token.body) {
            Some((prefix, value)) => build_term(prefix, value, now)?,
            None => Term::Free(text_match(&token.body)),
        };
        clauses.push(Clause { negated: token.negated, term });
    }

    Ok(Query { combinator, clauses })
}

fn split_typed(body: &str) -> Option<(&str, &str)> {
    let idx = body.find(':')?;
    let prefix = &body[..idx];
    KNOWN_PREFIXES.contains(&prefix).then(|| (prefix, &body[idx + 1..]))
}

fn build_term(prefix: &str, value: &str, now: DateTime<Utc>) -> Result<Term, SearchError> {
    Ok(match prefix {
        "tag" => Term::Tag(text_match(value)),
        "notebook" => Term::Notebook(text_match(value)),
        "resource" => Term::Resource(text_match(value)),
        "author" => Term::Author(text_match(value)),
        "source" => Term::Source(text_match(value)),
        "sourceApplication" => Term::SourceApplication(text_match(value)),
        "contentClass" => Term::ContentClass(text_match(value)),
        "placeName" => Term::PlaceName(text_match(value)),
        "applicationData" => Term::ApplicationData(key_match(value)),
        "created" => Term::Created(date_match(value, now)?),
        "updated" => Term::Updated(date_match(value, now)?),
        "subjectDate" => Term::SubjectDate(date_match(value, now)?),
        "reminderTime" => Term::ReminderTime(date_match(value, now)?),
        "reminderDoneTime" => Term::ReminderDoneTime(date_match(value, now)?),
        "latitude" => Term::Latitude(numeric_match(value)?),
        "longitude" => Term::Longitude(numeric_match(value)?),
        "altitude" => Term::Altitude(numeric_match(value)?),
        "reminderOrder" => Term::ReminderOrder(numeric_match(value)?),
        "todo" => Term::Todo(todo_state(value)?),
        "encryption" => Term::Encryption,
        _ => unreachable!("split_typed only returns known prefixes"),
    })
}

fn text_match(value: &str) -> TextMatch {
    if value == "*" {
        TextMatch::Any
    } else if value.contains('*') {
        TextMatch::Pattern(like_pattern(&diacritics::strip(value)))
    } else {
        TextMatch::Exact(diacritics::strip(value))
    }
}

/// Application-data keys are tokens, not display names: matched verbatim, never
/// diacritic-stripped.
fn key_match(value: &str) -> TextMatch {
    if value == "*" {
        TextMatch::Any
    } else if value.contains('*') {
        TextMatch::Pattern(like_pattern(value))
    } else {
        TextMatch::Exact(value.to_string())
    }
}

fn like_pattern(stripped: &str) -> String {
    stripped.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_").replace('*', "%")
}

fn numeric_match(value: &str) -> Result<NumericMatch, SearchError> {
    if value == "*" {
        return Ok(NumericMatch::Any);
    }
    value.trim().parse::<f64>().map(NumericMatch::AtLeast).map_err(|_| SearchError::new("invalid numeric value", value))
}

fn date_match(value: &str, now: DateTime<Utc>) -> Result<DateMatch, SearchError> {
    if value == "*" {
        return Ok(DateMatch::Any);
    }
    resolve_date_spec(value, now).map(DateMatch::AtLeast)
}

fn todo_state(value: &str) -> Result<TodoState, SearchError> {
    match value {
        "true" => Ok(TodoState::True),
        "false" => Ok(TodoState::False),
        "*" => Ok(TodoState::Any),
        other => Err(SearchError::new("invalid todo value, expected true, false, or *", other)),
    }
}

/// Resolves an ISO date or an anchored offset (`day`, `week`, `month`, `year`, optionally
/// suffixed `±N`) against `now` (spec.md §4.4 "Date specs").
fn resolve_date_spec(spec: &str, now: DateTime<Utc>) -> Result<i64, SearchError> {
    if let Ok(date) = NaiveDate::parse_from_str(spec, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).expect("valid time").and_utc().timestamp_millis());
    }

    let (anchor, offset) = split_anchor_offset(spec)?;
    let today = now.date_naive();
    let base = match anchor {
        "day" => today,
        "week" => today - Duration::days(today.weekday().num_days_from_sunday() as i64),
        "month" => NaiveDate::from_ymd_opt(today.year(), today.month(), 1).expect("valid date"),
        "year" => NaiveDate::from_ymd_opt(today.year(), 1, 1).expect("valid date"),
        _ => return Err(SearchError::new("unrecognized date anchor, expected day, week, month, or year", spec)),
    };
    let adjusted = apply_offset(base, anchor, offset);
    Ok(adjusted.and_hms_opt(0, 0, 0).expect("valid time").and_utc().timestamp_millis())
}

fn split_anchor_offset(spec: &str) -> Result<(&str, i64), SearchError> {
    match spec.find(['+', '-']) {
        None => Ok((spec, 0)),
        Some(pos) => {
            let anchor = &spec[..pos];
            let offset: i64 = spec[pos..].parse().map_err(|_| SearchError::new("invalid date offset", spec))?;
            Ok((anchor, offset))
        },
    }
}

fn apply_offset(base: NaiveDate, anchor: &str, n: i64) -> NaiveDate {
    match anchor {
        "day" => base + Duration::days(n),
        "week" => base + Duration::weeks(n),
        "month" => {
            if n >= 0 {
                base + Months::new(n as u32)
            } else {
                base - Months::new((-n) as u32)
            }
        },
        "year" => {
            if n >= 0 {
                base + Months::new(n as u32 * 12)
            } else {
                base - Months::new((-n) as u32 * 12)
            }
        },
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::search::lexer::lex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 28, 15, 30, 0).unwrap()
    }

    #[test]
    fn any_marker_switches_whole_query_to_or() {
        let query = normalize(lex("any: todo:true todo:false").unwrap(), now()).unwrap();
        assert_eq!(query.combinator, Combinator::Or);
        assert_eq!(query.clauses.len(), 2);
    }

    #[test]
    fn negated_token_sets_clause_negation() {
        let query = normalize(lex("todo:true -todo:false").unwrap(), now()).unwrap();
        assert_eq!(query.combinator, Combinator::And);
        assert!(!query.clauses[0].negated);
        assert!(query.clauses[1].negated);
    }

    #[test]
    fn free_term_is_diacritic_stripped() {
        let query = normalize(lex("Café").unwrap(), now()).unwrap();
        assert_eq!(query.clauses[0].term, Term::Free(TextMatch::Exact("cafe".to_string())));
    }

    #[test]
    fn day_anchor_resolves_to_midnight_today() {
        let query = normalize(lex("created:day").unwrap(), now()).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap().timestamp_millis();
        assert_eq!(query.clauses[0].term, Term::Created(DateMatch::AtLeast(expected)));
    }

    #[test]
    fn week_anchor_resolves_to_most_recent_sunday() {
        // 2026-07-28 is a Tuesday; the most recent Sunday is 2026-07-26.
        let query = normalize(lex("created:week").unwrap(), now()).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap().timestamp_millis();
        assert_eq!(query.clauses[0].term, Term::Created(DateMatch::AtLeast(expected)));
    }

    #[test]
    fn month_offset_resolves_relative_to_first_of_month() {
        let query = normalize(lex("updated:month-1").unwrap(), now()).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap().timestamp_millis();
        assert_eq!(query.clauses[0].term, Term::Updated(DateMatch::AtLeast(expected)));
    }

    #[test]
    fn iso_date_is_parsed_directly() {
        let query = normalize(lex("created:2024-01-01").unwrap(), now()).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp_millis();
        assert_eq!(query.clauses[0].term, Term::Created(DateMatch::AtLeast(expected)));
    }

    #[test]
    fn negated_numeric_term_keeps_its_value_for_the_compiler_to_flip() {
        let query = normalize(lex("-latitude:10").unwrap(), now()).unwrap();
        assert!(query.clauses[0].negated);
        assert_eq!(query.clauses[0].term, Term::Latitude(NumericMatch::AtLeast(10.0)));
    }

    #[test]
    fn existence_term_compiles_to_any() {
        let query = normalize(lex("-tag:*").unwrap(), now()).unwrap();
        assert!(query.clauses[0].negated);
        assert_eq!(query.clauses[0].term, Term::Tag(TextMatch::Any));
    }

    #[test]
    fn rejects_invalid_numeric_value() {
        assert!(normalize(lex("latitude:north").unwrap(), now()).is_err());
    }

    #[test]
    fn rejects_invalid_todo_value() {
        assert!(normalize(lex("todo:maybe").unwrap(), now()).is_err());
    }

    #[test]
    fn unrecognized_prefix_falls_back_to_a_free_term() {
        let query = normalize(lex("color:blue").unwrap(), now()).unwrap();
        assert_eq!(query.clauses[0].term, Term::Free(TextMatch::Exact("color:blue".to_string())));
    }
}
