//! Prepared statements.
//!
//! `prepare()` captures the `:name` placeholders of a query template;
//! `bind()` substitutes each with a re-parseable literal whose shape
//! depends on the bind kind; `execute()` parses the fully resolved text
//! and runs it. Rebinding a key replaces its previous value.

use crate::error::Error;
use crate::session::{QueryOutput, Session};
use crate::value::{quote, Value, TO_ARRAY, TO_BOOL, TO_NULL};
use std::collections::HashMap;

/// How a bound value is rendered into the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    String,
    Int,
    Float,
    Bool,
    Null,
    Array,
}

/// A query template with typed placeholders.
#[derive(Debug)]
pub struct PreparedStatement<'a> {
    session: &'a Session,
    template: String,
    keys: Vec<String>,
    bindings: HashMap<String, String>,
}

impl<'a> PreparedStatement<'a> {
    pub(crate) fn new(session: &'a Session, template: impl Into<String>) -> Self {
        let template = template.into();
        let keys = capture_keys(&template);
        PreparedStatement {
            session,
            template,
            keys,
            bindings: HashMap::new(),
        }
    }

    /// The placeholders captured from the template, in order of first
    /// appearance.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Bind `key` (including its leading `:`) to a value.
    pub fn bind(
        &mut self,
        key: &str,
        value: impl Into<Value>,
        kind: BindKind,
    ) -> Result<&mut Self, Error> {
        if !self.keys.iter().any(|k| k == key) {
            return Err(Error::parse(format!(
                "'{key}' is not a placeholder of this statement"
            )));
        }
        let text = render_binding(&value.into(), kind)?;
        self.bindings.insert(key.to_string(), text);
        Ok(self)
    }

    /// Substitute every placeholder and run the resolved query.
    pub fn execute(&self) -> Result<QueryOutput, Error> {
        self.session.query(&self.resolve()?)
    }

    /// The resolved query text; every captured key must be bound.
    fn resolve(&self) -> Result<String, Error> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(pos) = rest.find(':') {
            let (before, from_colon) = rest.split_at(pos);
            out.push_str(before);
            let key_len = 1 + word_len(&from_colon[1..]);
            if key_len == 1 {
                out.push(':');
                rest = &from_colon[1..];
                continue;
            }
            let key = &from_colon[..key_len];
            match self.bindings.get(key) {
                Some(text) => out.push_str(text),
                None => {
                    return Err(Error::parse(format!("placeholder '{key}' is not bound")));
                }
            }
            rest = &from_colon[key_len..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// All `:`+word-characters spans in the template, deduplicated.
fn capture_keys(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find(':') {
        rest = &rest[pos + 1..];
        let len = word_len(rest);
        if len > 0 {
            let key = format!(":{}", &rest[..len]);
            if !keys.contains(&key) {
                keys.push(key);
            }
            rest = &rest[len..];
        }
    }
    keys
}

fn word_len(s: &str) -> usize {
    s.find(|c: char| !c.is_alphanumeric() && c != '_')
        .unwrap_or(s.len())
}

/// Render a bound value as query text the parser will read back with
/// the intended type.
fn render_binding(value: &Value, kind: BindKind) -> Result<String, Error> {
    match kind {
        BindKind::String => Ok(quote(&value.to_text())),
        BindKind::Int => match value.as_number() {
            Some(n) => Ok((n as i64).to_string()),
            None => Err(Error::parse(format!("cannot bind '{value}' as INT"))),
        },
        // A bare decimal point would be read as a call separator, so a
        // float travels quoted and the column coercion restores it.
        BindKind::Float => match value.as_number() {
            Some(n) => Ok(quote(&format!("{n:?}"))),
            None => Err(Error::parse(format!("cannot bind '{value}' as FLOAT"))),
        },
        BindKind::Bool => Ok(format!(
            "{}{}",
            if value.is_truthy() { 1 } else { 0 },
            TO_BOOL
        )),
        BindKind::Null => Ok(format!("null{TO_NULL}")),
        BindKind::Array => Ok(format!("{}{}", quote(&value.to_text()), TO_ARRAY)),
    }
}
