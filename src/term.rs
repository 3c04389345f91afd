//! Answer terms, solutions, and query results.
//!
//! The engine delivers query answers as JSON with a recursive tagged
//! shape: strings for atoms, numbers, arrays for lists, and
//! `{"functor": ..., "args": [...]}` objects for compound terms. This
//! module normalizes that payload into [`Term`], a tagged sum the host can
//! pattern-match on, and defines [`Solution`] / [`QueryResult`] for the
//! shapes the session layer hands back.

use std::fmt;

use serde::ser::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::MqiError;

/// One engine term.
///
/// The empty list is always represented as `List(vec![])`; the decoder
/// normalizes the `"[]"` atom into that form. The wire protocol does not
/// distinguish engine strings from atoms, so JSON strings decode as
/// `Atom`; the `Str` variant exists for hosts that construct terms with
/// explicit string semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// An atom, e.g. `foo` or `'hello world'`.
    Atom(String),
    /// An integer. Values outside the `i64` range surface as `Float`.
    Integer(i64),
    /// A floating point number.
    Float(f64),
    /// A string with explicit string (non-atom) semantics.
    Str(String),
    /// A proper list of terms.
    List(Vec<Term>),
    /// A compound term: functor plus ordered arguments.
    Compound {
        /// The functor name.
        functor: String,
        /// The arguments, in order. Never empty.
        args: Vec<Term>,
    },
    /// An unbound variable, by name.
    Variable(String),
}

impl Term {
    /// Decode one engine JSON value into a term.
    ///
    /// Normalization rules:
    /// - the `"[]"` atom and the empty JSON array both become `List([])`,
    /// - whole numbers become `Integer`, everything else `Float`,
    /// - `{"functor": "variable", "args": [name]}` becomes `Variable`,
    /// - JSON booleans become the `true`/`false` atoms.
    pub fn from_json(value: &Value) -> Result<Term, MqiError> {
        match value {
            Value::String(s) if s == "[]" => Ok(Term::List(Vec::new())),
            Value::String(s) => Ok(Term::Atom(s.clone())),
            Value::Bool(b) => Ok(Term::Atom(b.to_string())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Term::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Term::Float(f))
                } else {
                    Err(MqiError::ProtocolViolation(format!(
                        "unrepresentable number in answer: {}",
                        n
                    )))
                }
            }
            Value::Array(items) => items
                .iter()
                .map(Term::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Term::List),
            Value::Object(map) => {
                let functor = map
                    .get("functor")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        MqiError::ProtocolViolation("compound term without functor".to_string())
                    })?;
                let args = map.get("args").and_then(Value::as_array).ok_or_else(|| {
                    MqiError::ProtocolViolation("compound term without args".to_string())
                })?;

                if functor == "variable" && args.len() == 1 {
                    if let Some(name) = args[0].as_str() {
                        return Ok(Term::Variable(name.to_string()));
                    }
                }

                let args = args
                    .iter()
                    .map(Term::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Term::Compound {
                    functor: functor.to_string(),
                    args,
                })
            }
            Value::Null => Err(MqiError::ProtocolViolation(
                "null has no term representation".to_string(),
            )),
        }
    }

    /// Re-encode this term in the engine's JSON shape.
    ///
    /// `from_json(&t.to_json())` yields a term equal to `t` for every term
    /// the decoder can produce.
    pub fn to_json(&self) -> Value {
        match self {
            Term::Atom(s) => json!(s),
            Term::Integer(i) => json!(i),
            Term::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Term::Str(s) => json!(s),
            Term::List(items) => Value::Array(items.iter().map(Term::to_json).collect()),
            Term::Compound { functor, args } => json!({
                "functor": functor,
                "args": args.iter().map(Term::to_json).collect::<Vec<_>>(),
            }),
            Term::Variable(name) => json!({ "functor": "variable", "args": [name] }),
        }
    }

    /// The atom's name, if this term is an atom.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// The integer value, if this term is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Term::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The float value, if this term is a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Term::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The elements, if this term is a list.
    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(items) => Some(items),
            _ => None,
        }
    }

    /// The variable's name, if this term is an unbound variable.
    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Term::Variable(name) => Some(name),
            _ => None,
        }
    }

    /// The arguments, if this term is a compound with the given functor
    /// and arity.
    pub fn as_compound(&self, functor: &str, arity: usize) -> Option<&[Term]> {
        match self {
            Term::Compound { functor: f, args } if f == functor && args.len() == arity => {
                Some(args)
            }
            _ => None,
        }
    }

    /// Interpret this term as an answer binding.
    ///
    /// A binding is a `=`/2 compound whose left-hand side names a variable,
    /// either as a `Variable` or (when the source name was mis-typed) as a
    /// bare `Atom`. Returns the variable name and the bound term.
    pub fn as_binding(&self) -> Option<(&str, &Term)> {
        let args = self.as_compound("=", 2)?;
        let name = match &args[0] {
            Term::Variable(name) => name.as_str(),
            Term::Atom(name) => name.as_str(),
            _ => return None,
        };
        Some((name, &args[1]))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Term {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// One solution: a mapping from variable names to terms.
///
/// Binding order is the order the engine produced, and names are unique
/// within a solution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Solution {
    bindings: Vec<(String, Term)>,
}

impl Solution {
    /// An empty solution (a success with no bindings).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding, replacing any earlier binding of the same name in
    /// place.
    pub(crate) fn insert(&mut self, name: String, term: Term) {
        match self.bindings.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = term,
            None => self.bindings.push((name, term)),
        }
    }

    /// Look up the term bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Iterate bindings in engine order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.bindings.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if this solution carries no bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Outcome of a synchronous query.
///
/// Failures caused by engine exceptions (timeouts, uncaught errors) are
/// reported through [`MqiError`], not here.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// The goal had no solutions.
    False,
    /// The goal succeeded; one [`Solution`] per answer, in engine order.
    /// A ground goal that simply succeeds yields one empty solution.
    Solutions(Vec<Solution>),
}

impl QueryResult {
    /// True if the goal succeeded at least once.
    pub fn is_true(&self) -> bool {
        matches!(self, QueryResult::Solutions(_))
    }

    /// The solutions, if the goal succeeded.
    pub fn solutions(&self) -> Option<&[Solution]> {
        match self {
            QueryResult::Solutions(s) => Some(s),
            QueryResult::False => None,
        }
    }
}
