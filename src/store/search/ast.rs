//! Normalized representation of a compiled note-search query (spec.md §4.4, §9 "keep the AST
//! language-neutral so unit tests can assert on it without touching SQL").

/// How a token's textual value should be matched against a (stripped) column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TextMatch {
    /// `*`: matches any value, including "no value at all" for relational attributes.
    Any,
    /// A plain value, compared after diacritic-stripping.
    Exact(String),
    /// A value containing `*`, already converted to a SQL `LIKE` pattern (`*` -> `%`, with
    /// literal `%`/`_`/`\` escaped).
    Pattern(String),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NumericMatch {
    Any,
    AtLeast(f64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DateMatch {
    Any,
    /// Milliseconds since the Unix epoch, already resolved against the query's "now".
    AtLeast(i64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TodoState {
    True,
    False,
    Any,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Free(TextMatch),
    Tag(TextMatch),
    Notebook(TextMatch),
    Resource(TextMatch),
    Author(TextMatch),
    Source(TextMatch),
    SourceApplication(TextMatch),
    ContentClass(TextMatch),
    PlaceName(TextMatch),
    ApplicationData(TextMatch),
    Created(DateMatch),
    Updated(DateMatch),
    SubjectDate(DateMatch),
    ReminderTime(DateMatch),
    ReminderDoneTime(DateMatch),
    Latitude(NumericMatch),
    Longitude(NumericMatch),
    Altitude(NumericMatch),
    ReminderOrder(NumericMatch),
    Todo(TodoState),
    Encryption,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Clause {
    pub negated: bool,
    pub term: Term,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Combinator {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub combinator: Combinator,
    pub clauses: Vec<Clause>,
}
