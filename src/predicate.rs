//! Predicate boundary.
//!
//! A predicate is an opaque, pure boolean test over a message and the
//! messages bound to aliases so far. The rule compiler never looks inside a
//! predicate; it only asks which aliases the predicate reads, so it can decide
//! whether correlating events must be buffered.
//!
//! The comparison types in this module cover the common "field op constant"
//! and "field op `@alias.field`" shapes produced by property front ends.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::{Message, Value};

/// Alias → message lookup visible to a predicate.
#[derive(Debug, Clone, Default)]
pub struct Bindings<'a> {
    entries: Vec<(&'a str, &'a Message)>,
}

impl<'a> Bindings<'a> {
    /// No bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `alias`, shadowing any earlier binding with the same name.
    pub fn bind(&mut self, alias: &'a str, message: &'a Message) {
        self.entries.push((alias, message));
    }

    /// Latest message bound to `alias`.
    #[must_use]
    pub fn get(&self, alias: &str) -> Option<&'a Message> {
        self.entries
            .iter()
            .rev()
            .find(|(a, _)| *a == alias)
            .map(|(_, m)| *m)
    }

    /// True if `alias` is bound.
    #[must_use]
    pub fn contains(&self, alias: &str) -> bool {
        self.get(alias).is_some()
    }

    /// Number of bindings, shadowed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Boolean test over a message and its bindings.
pub trait Predicate: Send + Sync {
    /// Evaluates the predicate. Must be pure and total.
    fn test(&self, message: &Message, bindings: &Bindings<'_>) -> bool;

    /// Aliases this predicate reads.
    fn references(&self) -> Vec<String> {
        Vec::new()
    }

    /// Three-valued evaluation: `None` when the outcome depends on an alias
    /// that is not bound.
    fn test_partial(&self, message: &Message, bindings: &Bindings<'_>) -> Option<bool> {
        if self.references().iter().any(|a| !bindings.contains(a)) {
            None
        } else {
            Some(self.test(message, bindings))
        }
    }
}

impl<F> Predicate for F
where
    F: Fn(&Message, &Bindings<'_>) -> bool + Send + Sync,
{
    fn test(&self, message: &Message, bindings: &Bindings<'_>) -> bool {
        self(message, bindings)
    }
}

/// Shared handle to a predicate.
pub type PredicateRef = Arc<dyn Predicate>;

/// A closure predicate that declares the aliases it reads.
pub struct FnPredicate<F> {
    func: F,
    references: Vec<String>,
}

impl<F> FnPredicate<F>
where
    F: Fn(&Message, &Bindings<'_>) -> bool + Send + Sync,
{
    /// Wraps `func`. It reads no aliases until `reads` says otherwise.
    pub fn new(func: F) -> Self {
        Self {
            func,
            references: Vec::new(),
        }
    }

    /// Declares that the closure reads `@alias`.
    #[must_use]
    pub fn referencing(mut self, alias: impl Into<String>) -> Self {
        self.references.push(alias.into());
        self
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Message, &Bindings<'_>) -> bool + Send + Sync,
{
    fn test(&self, message: &Message, bindings: &Bindings<'_>) -> bool {
        (self.func)(message, bindings)
    }

    fn references(&self) -> Vec<String> {
        self.references.clone()
    }
}

impl<F> fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPredicate")
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}

/// Predicate that always holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl Predicate for Always {
    fn test(&self, _message: &Message, _bindings: &Bindings<'_>) -> bool {
        true
    }
}

/// Comparison operators.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, lhs: &Value, rhs: &Value) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => lhs.loosely_equals(rhs),
            Self::Ne => !lhs.loosely_equals(rhs),
            Self::Lt => lhs.compare(rhs) == Some(Less),
            Self::Le => matches!(lhs.compare(rhs), Some(Less | Equal)),
            Self::Gt => lhs.compare(rhs) == Some(Greater),
            Self::Ge => matches!(lhs.compare(rhs), Some(Greater | Equal)),
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    /// A literal value.
    Const { value: Value },
    /// A field of the message bound to `@alias`.
    Ref { alias: String, field: String },
}

/// `field op operand` over the current message.
///
/// # Examples
///
/// ```
/// use rvsynth::predicate::{Bindings, CmpOp, Compare, Predicate};
/// use rvsynth::Message;
///
/// let positive = Compare::constant("data", CmpOp::Gt, 0);
/// assert!(positive.test(&Message::new().with("data", 1), &Bindings::new()));
/// assert!(!positive.test(&Message::new().with("data", 0), &Bindings::new()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Compare {
    field: String,
    op: CmpOp,
    operand: Operand,
}

impl Compare {
    /// Compares `field` with a constant.
    #[must_use]
    pub fn constant(field: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            operand: Operand::Const {
                value: value.into(),
            },
        }
    }

    /// Compares against `@alias.alias_field`.
    #[must_use]
    pub fn reference(
        field: impl Into<String>,
        op: CmpOp,
        alias: impl Into<String>,
        alias_field: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            op,
            operand: Operand::Ref {
                alias: alias.into(),
                field: alias_field.into(),
            },
        }
    }
}

impl Predicate for Compare {
    fn test(&self, message: &Message, bindings: &Bindings<'_>) -> bool {
        let Some(lhs) = message.get(&self.field) else {
            return false;
        };
        let rhs = match &self.operand {
            Operand::Const { value } => value,
            Operand::Ref { alias, field } => {
                let Some(value) = bindings.get(alias).and_then(|m| m.get(field)) else {
                    return false;
                };
                value
            }
        };
        self.op.holds(lhs, rhs)
    }

    fn references(&self) -> Vec<String> {
        match &self.operand {
            Operand::Const { .. } => Vec::new(),
            Operand::Ref { alias, .. } => vec![alias.clone()],
        }
    }

    fn test_partial(&self, message: &Message, bindings: &Bindings<'_>) -> Option<bool> {
        match &self.operand {
            Operand::Ref { alias, .. } if !bindings.contains(alias) => {
                // A missing left-hand field is false whatever the alias binds to.
                if message.get(&self.field).is_some() {
                    None
                } else {
                    Some(false)
                }
            }
            _ => Some(self.test(message, bindings)),
        }
    }
}

/// String field matched against a regular expression.
#[derive(Debug, Clone)]
pub struct Matches {
    field: String,
    regex: Regex,
}

impl Matches {
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidPredicate` if the pattern does not compile.
    pub fn new(field: impl Into<String>, pattern: &str) -> Result<Self, ValidationError> {
        let regex = Regex::new(pattern).map_err(|e| ValidationError::InvalidPredicate {
            reason: format!("regex for '{pattern}': {e}"),
        })?;
        Ok(Self {
            field: field.into(),
            regex,
        })
    }
}

impl Predicate for Matches {
    fn test(&self, message: &Message, _bindings: &Bindings<'_>) -> bool {
        message
            .get(&self.field)
            .and_then(Value::as_string)
            .is_some_and(|s| self.regex.is_match(s))
    }
}

/// Conjunction.
pub struct All(pub Vec<PredicateRef>);

impl Predicate for All {
    fn test(&self, message: &Message, bindings: &Bindings<'_>) -> bool {
        self.0.iter().all(|p| p.test(message, bindings))
    }

    fn references(&self) -> Vec<String> {
        collect_references(&self.0)
    }

    fn test_partial(&self, message: &Message, bindings: &Bindings<'_>) -> Option<bool> {
        let mut unknown = false;
        for p in &self.0 {
            match p.test_partial(message, bindings) {
                Some(false) => return Some(false),
                Some(true) => {}
                None => unknown = true,
            }
        }
        if unknown {
            None
        } else {
            Some(true)
        }
    }
}

/// Disjunction.
pub struct Any(pub Vec<PredicateRef>);

impl Predicate for Any {
    fn test(&self, message: &Message, bindings: &Bindings<'_>) -> bool {
        self.0.iter().any(|p| p.test(message, bindings))
    }

    fn references(&self) -> Vec<String> {
        collect_references(&self.0)
    }

    fn test_partial(&self, message: &Message, bindings: &Bindings<'_>) -> Option<bool> {
        let mut unknown = false;
        for p in &self.0 {
            match p.test_partial(message, bindings) {
                Some(true) => return Some(true),
                Some(false) => {}
                None => unknown = true,
            }
        }
        if unknown {
            None
        } else {
            Some(false)
        }
    }
}

/// Negation.
pub struct Not(pub PredicateRef);

impl Predicate for Not {
    fn test(&self, message: &Message, bindings: &Bindings<'_>) -> bool {
        !self.0.test(message, bindings)
    }

    fn references(&self) -> Vec<String> {
        self.0.references()
    }

    fn test_partial(&self, message: &Message, bindings: &Bindings<'_>) -> Option<bool> {
        self.0.test_partial(message, bindings).map(|v| !v)
    }
}

fn collect_references(preds: &[PredicateRef]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for p in preds {
        for r in p.references() {
            if !out.contains(&r) {
                out.push(r);
            }
        }
    }
    out
}
