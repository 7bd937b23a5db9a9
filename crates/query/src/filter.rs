//! Filter algebra: composable predicates over store subjects.
//!
//! Every filter answers [`Filter::matches`] for one subject; streaming is
//! done by [`Filtered`], which pulls subjects one at a time, so filtering
//! a scan never loads more than the current object.

use crate::error::{QueryError, QueryResult};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use warden_store::{Aff4Object, AttributeValue, Event, Literal};

/// Something a filter can be evaluated against.
pub trait Subject {
    /// Text form of the subject's URN.
    fn urn_text(&self) -> String;

    /// Current value of an attribute.
    fn get(&self, attribute: &str) -> Option<AttributeValue>;
}

impl Subject for Aff4Object {
    fn urn_text(&self) -> String {
        self.urn().to_string()
    }

    fn get(&self, attribute: &str) -> Option<AttributeValue> {
        Aff4Object::get(self, attribute)
    }
}

impl Subject for Event {
    fn urn_text(&self) -> String {
        String::new()
    }

    fn get(&self, attribute: &str) -> Option<AttributeValue> {
        self.field(attribute)
    }
}

impl<T: Subject + ?Sized> Subject for &T {
    fn urn_text(&self) -> String {
        (**self).urn_text()
    }

    fn get(&self, attribute: &str) -> Option<AttributeValue> {
        (**self).get(attribute)
    }
}

/// A predicate over one subject.
pub trait Filter: fmt::Debug + Send + Sync {
    fn matches(&self, subject: &dyn Subject) -> bool;

    /// Lazily yield the subjects that pass. Each call starts a fresh pass.
    fn filter<I>(&self, subjects: I) -> Filtered<'_, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: Subject,
        Self: Sized,
    {
        Filtered {
            filter: self,
            subjects: subjects.into_iter(),
        }
    }
}

impl<F: Filter + ?Sized> Filter for Box<F> {
    fn matches(&self, subject: &dyn Subject) -> bool {
        (**self).matches(subject)
    }
}

/// Lazy stream of subjects passing a filter.
pub struct Filtered<'f, I> {
    filter: &'f dyn Filter,
    subjects: I,
}

impl<I> Iterator for Filtered<'_, I>
where
    I: Iterator,
    I::Item: Subject,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let filter = self.filter;
        self.subjects.by_ref().find(|subject| filter.matches(subject))
    }
}

// ── Leaf filters ─────────────────────────────────────────────────────

/// Passes everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFilter;

impl Filter for IdentityFilter {
    fn matches(&self, _subject: &dyn Subject) -> bool {
        true
    }
}

/// Passes subjects whose attribute is present and truthy.
#[derive(Debug, Clone)]
pub struct HasPredicateFilter {
    attribute: String,
}

impl HasPredicateFilter {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

impl Filter for HasPredicateFilter {
    fn matches(&self, subject: &dyn Subject) -> bool {
        subject
            .get(&self.attribute)
            .is_some_and(|value| value.is_truthy())
    }
}

/// Comparison operator for [`PredicateCompareFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}

impl CompareOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Gt => ordering == Ordering::Greater,
            Self::Le => ordering != Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Eq => ordering == Ordering::Equal,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "=",
        };
        f.write_str(symbol)
    }
}

/// Compares an attribute's current value against a fixed operand.
///
/// The operand is coerced to the attribute's type. An absent or falsy
/// attribute never matches, nor does an operand that cannot be coerced,
/// so `Size < 5` passes over a zero size the way a contains filter passes
/// over an empty string.
#[derive(Debug, Clone)]
pub struct PredicateCompareFilter {
    attribute: String,
    op: CompareOp,
    operand: Literal,
}

impl PredicateCompareFilter {
    pub fn new(attribute: impl Into<String>, op: CompareOp, operand: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            operand: Literal::parse(operand),
        }
    }
}

impl Filter for PredicateCompareFilter {
    fn matches(&self, subject: &dyn Subject) -> bool {
        subject
            .get(&self.attribute)
            .filter(AttributeValue::is_truthy)
            .and_then(|value| value.compare_literal(&self.operand))
            .is_some_and(|ordering| self.op.accepts(ordering))
    }
}

fn compile_regex(pattern: &str) -> QueryResult<Regex> {
    Regex::new(pattern).map_err(|e| QueryError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Regex search over an attribute's text form. An empty pattern passes
/// every subject, including ones without the attribute.
#[derive(Debug, Clone)]
pub struct PredicateContainsFilter {
    attribute: String,
    regex: Option<Regex>,
}

impl PredicateContainsFilter {
    pub fn new(attribute: impl Into<String>, pattern: &str) -> QueryResult<Self> {
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(compile_regex(pattern)?)
        };
        Ok(Self {
            attribute: attribute.into(),
            regex,
        })
    }
}

impl Filter for PredicateContainsFilter {
    fn matches(&self, subject: &dyn Subject) -> bool {
        let Some(regex) = &self.regex else {
            return true;
        };
        subject
            .get(&self.attribute)
            .is_some_and(|value| value.is_truthy() && regex.is_match(&value.to_text()))
    }
}

/// Regex search over the subject's URN.
#[derive(Debug, Clone)]
pub struct SubjectContainsFilter {
    regex: Regex,
}

impl SubjectContainsFilter {
    pub fn new(pattern: &str) -> QueryResult<Self> {
        Ok(Self {
            regex: compile_regex(pattern)?,
        })
    }
}

impl Filter for SubjectContainsFilter {
    fn matches(&self, subject: &dyn Subject) -> bool {
        self.regex.is_match(&subject.urn_text())
    }
}

// ── Combinators ──────────────────────────────────────────────────────

/// Passes a subject when every part does; stops at the first part that rejects it.
#[derive(Debug, Default)]
pub struct AndFilter {
    parts: Vec<Box<dyn Filter>>,
}

impl AndFilter {
    pub fn new(parts: Vec<Box<dyn Filter>>) -> Self {
        Self { parts }
    }
}

impl Filter for AndFilter {
    fn matches(&self, subject: &dyn Subject) -> bool {
        self.parts.iter().all(|part| part.matches(subject))
    }
}

/// Passes a subject when any part does; stops at the first part that accepts it.
#[derive(Debug, Default)]
pub struct OrFilter {
    parts: Vec<Box<dyn Filter>>,
}

impl OrFilter {
    pub fn new(parts: Vec<Box<dyn Filter>>) -> Self {
        Self { parts }
    }
}

impl Filter for OrFilter {
    fn matches(&self, subject: &dyn Subject) -> bool {
        self.parts.iter().any(|part| part.matches(subject))
    }
}
