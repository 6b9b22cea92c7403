//! SQL emission for a normalized [`Query`] (spec.md §4.4): the only stage that knows SQL.
//! Produces a single parameterized `SELECT` over note local ids; callers never see the text.

use rusqlite::ToSql;

use super::ast::{Clause, Combinator, DateMatch, NumericMatch, Query, TextMatch, Term, TodoState};

/// SQL text plus its bound parameters, in the same order as the `?` placeholders appear in
/// `sql`.
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Box<dyn ToSql>>,
}

struct Compiler {
    params: Vec<Box<dyn ToSql>>,
}

impl Compiler {
    fn bind(&mut self, value: impl ToSql + 'static) -> &'static str {
        self.params.push(Box::new(value));
        "?"
    }

    fn compile_clause(&mut self, clause: &Clause) -> String {
        match &clause.term {
            Term::Free(text) => self.free(text, clause.negated),
            Term::Tag(text) => {
                self.related_exists("note_tags nt JOIN tags t ON t.local_id = nt.tag_local_id", "nt.note_local_id", "t.name_lower", text, clause.negated)
            },
            Term::Notebook(text) => self.notebook(text, clause.negated),
            Term::Resource(text) => self.related_exists_ci("resources r", "r.note_local_id", "r.mime", text, clause.negated),
            Term::Author(text) => self.attribute_text("na.author_stripped", text, clause.negated),
            Term::Source(text) => self.attribute_text("na.source_stripped", text, clause.negated),
            Term::SourceApplication(text) => self.attribute_text("na.source_application_stripped", text, clause.negated),
            Term::ContentClass(text) => self.attribute_text("na.content_class_stripped", text, clause.negated),
            Term::PlaceName(text) => self.attribute_text("na.place_name_stripped", text, clause.negated),
            Term::ApplicationData(text) => self.related_exists("note_application_data nad", "nad.note_local_id", "nad.key", text, clause.negated),
            Term::Created(date) => self.date("n.created", date, clause.negated),
            Term::Updated(date) => self.date("n.updated", date, clause.negated),
            Term::SubjectDate(date) => self.date("na.subject_date", date, clause.negated),
            Term::ReminderTime(date) => self.date("na.reminder_time", date, clause.negated),
            Term::ReminderDoneTime(date) => self.date("na.reminder_done_time", date, clause.negated),
            Term::Latitude(num) => self.numeric("na.latitude", num, clause.negated),
            Term::Longitude(num) => self.numeric("na.longitude", num, clause.negated),
            Term::Altitude(num) => self.numeric("na.altitude", num, clause.negated),
            Term::ReminderOrder(num) => self.numeric("na.reminder_order", num, clause.negated),
            Term::Todo(state) => self.todo(*state, clause.negated),
            Term::Encryption => self.content_marker("<en-crypt", clause.negated),
        }
    }

    fn free(&mut self, text: &TextMatch, negated: bool) -> String {
        if matches!(text, TextMatch::Any) {
            return if negated { "0=1".to_string() } else { "1=1".to_string() };
        }
        let pattern = like_pattern_of(text);
        let p1 = self.bind(pattern.clone());
        let p2 = self.bind(pattern.clone());
        let p3 = self.bind(pattern.clone());
        let p4 = self.bind(pattern);
        let predicate = format!(
            "(n.title_stripped LIKE {p1} ESCAPE '\\' OR n.content_stripped LIKE {p2} ESCAPE '\\' \
             OR EXISTS (SELECT 1 FROM note_tags nt JOIN tags t ON t.local_id = nt.tag_local_id \
                        WHERE nt.note_local_id = n.local_id AND t.name_lower LIKE {p3} ESCAPE '\\') \
             OR EXISTS (SELECT 1 FROM resources r WHERE r.note_local_id = n.local_id \
                        AND r.recognition_data_stripped LIKE {p4} ESCAPE '\\'))"
        );
        if negated {
            format!("NOT {predicate}")
        } else {
            predicate
        }
    }

    fn notebook(&mut self, text: &TextMatch, negated: bool) -> String {
        match text {
            TextMatch::Any => (if negated { "0=1" } else { "1=1" }).to_string(),
            TextMatch::Exact(value) => {
                let p = self.bind(value.clone());
                if negated {
                    format!("nb.name_lower <> {p}")
                } else {
                    format!("nb.name_lower = {p}")
                }
            },
            TextMatch::Pattern(pattern) => {
                let p = self.bind(pattern.clone());
                if negated {
                    format!("nb.name_lower NOT LIKE {p} ESCAPE '\\'")
                } else {
                    format!("nb.name_lower LIKE {p} ESCAPE '\\'")
                }
            },
        }
    }

    /// An `EXISTS` check over a joined/correlated table, matching an already-normalized
    /// column (tag names, application-data keys).
    fn related_exists(&mut self, from: &str, corr_col: &str, match_col: &str, text: &TextMatch, negated: bool) -> String {
        let inner = match text {
            TextMatch::Any => format!("{corr_col} = n.local_id"),
            TextMatch::Exact(value) => format!("{corr_col} = n.local_id AND {match_col} = {}", self.bind(value.clone())),
            TextMatch::Pattern(pattern) => format!("{corr_col} = n.local_id AND {match_col} LIKE {} ESCAPE '\\'", self.bind(pattern.clone())),
        };
        let exists = format!("EXISTS (SELECT 1 FROM {from} WHERE {inner})");
        if negated {
            format!("NOT {exists}")
        } else {
            exists
        }
    }

    /// Same shape, case-insensitive via `LOWER()` (resource MIME types carry no precomputed
    /// stripped column).
    fn related_exists_ci(&mut self, from: &str, corr_col: &str, match_col: &str, text: &TextMatch, negated: bool) -> String {
        let inner = match text {
            TextMatch::Any => format!("{corr_col} = n.local_id"),
            TextMatch::Exact(value) => format!("{corr_col} = n.local_id AND LOWER({match_col}) = LOWER({})", self.bind(value.clone())),
            TextMatch::Pattern(pattern) => {
                format!("{corr_col} = n.local_id AND LOWER({match_col}) LIKE LOWER({}) ESCAPE '\\'", self.bind(pattern.clone()))
            },
        };
        let exists = format!("EXISTS (SELECT 1 FROM {from} WHERE {inner})");
        if negated {
            format!("NOT {exists}")
        } else {
            exists
        }
    }

    fn attribute_text(&mut self, column: &str, text: &TextMatch, negated: bool) -> String {
        match text {
            TextMatch::Any => format!("{column} IS {}", if negated { "NULL" } else { "NOT NULL" }),
            TextMatch::Exact(value) => {
                let p = self.bind(value.clone());
                if negated {
                    format!("({column} IS NULL OR {column} <> {p})")
                } else {
                    format!("{column} = {p}")
                }
            },
            TextMatch::Pattern(pattern) => {
                let p = self.bind(pattern.clone());
                if negated {
                    format!("({column} IS NULL OR {column} NOT LIKE {p} ESCAPE '\\')")
                } else {
                    format!("{column} LIKE {p} ESCAPE '\\'")
                }
            },
        }
    }

    fn date(&mut self, column: &str, date: &DateMatch, negated: bool) -> String {
        match date {
            DateMatch::Any => format!("{column} IS {}", if negated { "NULL" } else { "NOT NULL" }),
            DateMatch::AtLeast(value) => {
                let p = self.bind(*value);
                if negated {
                    format!("{column} < {p}")
                } else {
                    format!("{column} >= {p}")
                }
            },
        }
    }

    fn numeric(&mut self, column: &str, num: &NumericMatch, negated: bool) -> String {
        match num {
            NumericMatch::Any => format!("{column} IS {}", if negated { "NULL" } else { "NOT NULL" }),
            NumericMatch::AtLeast(value) => {
                let p = self.bind(*value);
                if negated {
                    format!("{column} < {p}")
                } else {
                    format!("{column} >= {p}")
                }
            },
        }
    }

    fn todo(&mut self, state: TodoState, negated: bool) -> String {
        match state {
            TodoState::True => self.content_marker(r#"<en-todo checked="true""#, negated),
            TodoState::False => self.content_marker(r#"<en-todo checked="false""#, negated),
            TodoState::Any => {
                let p1 = self.bind(format!("%{}%", r#"<en-todo checked="true""#));
                let p2 = self.bind(format!("%{}%", r#"<en-todo checked="false""#));
                let predicate = format!("(n.content LIKE {p1} ESCAPE '\\' OR n.content LIKE {p2} ESCAPE '\\')");
                if negated {
                    format!("(n.content IS NULL OR NOT {predicate})")
                } else {
                    predicate
                }
            },
        }
    }

    fn content_marker(&mut self, marker: &str, negated: bool) -> String {
        let p = self.bind(format!("%{marker}%"));
        if negated {
            format!("(n.content IS NULL OR n.content NOT LIKE {p} ESCAPE '\\')")
        } else {
            format!("n.content LIKE {p} ESCAPE '\\'")
        }
    }
}

fn like_pattern_of(text: &TextMatch) -> String {
    match text {
        TextMatch::Exact(value) => format!("%{}%", escape_like(value)),
        TextMatch::Pattern(pattern) => pattern.clone(),
        TextMatch::Any => unreachable!("callers handle TextMatch::Any before reaching a LIKE pattern"),
    }
}

fn escape_like(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

pub fn compile(query: &Query) -> CompiledQuery {
    let mut compiler = Compiler { params: Vec::new() };
    let predicates: Vec<String> = query.clauses.iter().map(|clause| compiler.compile_clause(clause)).collect();

    let body = if predicates.is_empty() {
        "1=1".to_string()
    } else {
        let joiner = match query.combinator {
            Combinator::And => " AND ",
            Combinator::Or => " OR ",
        };
        format!("({})", predicates.join(joiner))
    };

    let sql = format!(
        "SELECT DISTINCT n.local_id FROM notes n \
         INNER JOIN notebooks nb ON nb.local_id = n.notebook_local_id \
         LEFT JOIN note_attributes na ON na.note_local_id = n.local_id \
         WHERE {body} ORDER BY n.created ASC"
    );

    CompiledQuery { sql, params: compiler.params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::search::ast::{Clause, Combinator};

    #[test]
    fn and_mode_joins_predicates_with_and() {
        let query = Query {
            combinator: Combinator::And,
            clauses: vec![
                Clause { negated: false, term: Term::Todo(TodoState::True) },
                Clause { negated: true, term: Term::Todo(TodoState::False) },
            ],
        };
        let compiled = compile(&query);
        assert!(compiled.sql.contains(" AND "));
        assert!(compiled.sql.contains("NOT ("));
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn or_mode_joins_predicates_with_or() {
        let query = Query {
            combinator: Combinator::Or,
            clauses: vec![
                Clause { negated: false, term: Term::Todo(TodoState::True) },
                Clause { negated: false, term: Term::Todo(TodoState::False) },
            ],
        };
        let compiled = compile(&query);
        assert!(compiled.sql.contains(" OR "));
    }

    #[test]
    fn empty_query_matches_everything() {
        let query = Query { combinator: Combinator::And, clauses: vec![] };
        let compiled = compile(&query);
        assert!(compiled.sql.contains("1=1"));
        assert!(compiled.params.is_empty());
    }
}
