//! Query descriptors
//!
//! A [`QueryDescriptor`] is the validated identity of a parameterized,
//! read-only query: its text plus the values bound to its `:name`
//! placeholders. Equality, hashing and the derived [`CacheKey`] are
//! structural and independent of the order parameters were supplied in.
//!
//! ```
//! use fraudboard_core::QueryDescriptor;
//!
//! let a = QueryDescriptor::builder("SELECT * FROM GOLD.FACT_ALERTS WHERE SEVERITY = :sev AND AMOUNT >= :min")
//!     .param("sev", "CRITICAL")
//!     .param("min", 5000)
//!     .build()
//!     .unwrap();
//! let b = QueryDescriptor::builder("SELECT * FROM GOLD.FACT_ALERTS WHERE SEVERITY = :sev AND AMOUNT >= :min")
//!     .param("min", 5000)
//!     .param("sev", "CRITICAL")
//!     .build()
//!     .unwrap();
//! assert_eq!(a.cache_key(), b.cache_key());
//! ```

use crate::error::{Result, WarehouseError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

/// A value bound to a query placeholder
#[derive(Debug, Clone)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Must be finite
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Expanded into an `IN (...)` list; non-empty and flat
    List(Vec<ParamValue>),
}

impl ParamValue {
    fn validate(&self, name: &str) -> Result<()> {
        match self {
            ParamValue::Float(f) if !f.is_finite() => Err(WarehouseError::ValidationError(
                format!("parameter '{}' is not a finite number", name),
            )),
            ParamValue::List(items) => {
                if items.is_empty() {
                    return Err(WarehouseError::ValidationError(format!(
                        "parameter '{}' is an empty list",
                        name
                    )));
                }
                for item in items {
                    if matches!(item, ParamValue::List(_)) {
                        return Err(WarehouseError::ValidationError(format!(
                            "parameter '{}' contains a nested list",
                            name
                        )));
                    }
                    item.validate(name)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Number of positional markers this value occupies once bound
    pub fn arity(&self) -> usize {
        match self {
            ParamValue::List(items) => items.len(),
            _ => 1,
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Null, ParamValue::Null) => true,
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a == b,
            (ParamValue::Int(a), ParamValue::Int(b)) => a == b,
            (ParamValue::Float(a), ParamValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ParamValue::Text(a), ParamValue::Text(b)) => a == b,
            (ParamValue::Date(a), ParamValue::Date(b)) => a == b,
            (ParamValue::Timestamp(a), ParamValue::Timestamp(b)) => a == b,
            (ParamValue::List(a), ParamValue::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ParamValue::Null => {}
            ParamValue::Bool(b) => b.hash(state),
            ParamValue::Int(i) => i.hash(state),
            ParamValue::Float(f) => f.to_bits().hash(state),
            ParamValue::Text(s) => s.hash(state),
            ParamValue::Date(d) => d.hash(state),
            ParamValue::Timestamp(t) => t.hash(state),
            ParamValue::List(items) => items.hash(state),
        }
    }
}

/// Canonical rendering used inside cache keys; distinct values render distinctly
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{:?}", x),
            ParamValue::Text(s) => write!(f, "{:?}", s),
            ParamValue::Date(d) => write!(f, "date'{}'", d),
            ParamValue::Timestamp(t) => write!(f, "timestamp'{}'", t.format("%Y-%m-%dT%H:%M:%S%.f")),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(v: NaiveDate) -> Self {
        ParamValue::Date(v)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(v: NaiveDateTime) -> Self {
        ParamValue::Timestamp(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        ParamValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Canonical cache key derived from query text and sorted parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A `:name` placeholder occurrence in query text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    /// Byte range of the placeholder including the leading colon
    pub span: Range<usize>,
}

/// Validated, immutable identity of a parameterized read query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryDescriptor {
    text: String,
    params: BTreeMap<String, ParamValue>,
    key: CacheKey,
}

impl QueryDescriptor {
    /// Create a descriptor from query text and parameter bindings
    ///
    /// # Errors
    /// `ValidationError` if the text is blank, a name is not an identifier or
    /// bound twice, a value is unsupported, or placeholders and bindings do not
    /// match one-to-one.
    pub fn new<K, V, I>(text: impl Into<String>, params: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<ParamValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(WarehouseError::ValidationError(
                "query text is empty".to_string(),
            ));
        }

        let mut bound = BTreeMap::new();
        for (name, value) in params {
            let name = name.into();
            let value = value.into();
            if !is_identifier(&name) {
                return Err(WarehouseError::ValidationError(format!(
                    "'{}' is not a valid parameter name",
                    name
                )));
            }
            value.validate(&name)?;
            if bound.insert(name.clone(), value).is_some() {
                return Err(WarehouseError::ValidationError(format!(
                    "parameter '{}' is bound more than once",
                    name
                )));
            }
        }

        let referenced: BTreeSet<String> =
            scan_placeholders(&text).into_iter().map(|p| p.name).collect();
        if let Some(missing) = referenced.iter().find(|name| !bound.contains_key(*name)) {
            return Err(WarehouseError::ValidationError(format!(
                "placeholder ':{}' has no bound value",
                missing
            )));
        }
        if let Some(unused) = bound.keys().find(|name| !referenced.contains(*name)) {
            return Err(WarehouseError::ValidationError(format!(
                "parameter '{}' is not referenced by the query",
                unused
            )));
        }

        let key = build_key(&text, &bound);
        Ok(Self {
            text,
            params: bound,
            key,
        })
    }

    /// Descriptor for a query without parameters
    pub fn from_text(text: impl Into<String>) -> Result<Self> {
        Self::new(text, Vec::<(String, ParamValue)>::new())
    }

    /// Start building a descriptor parameter by parameter
    pub fn builder(text: impl Into<String>) -> QueryDescriptorBuilder {
        QueryDescriptorBuilder {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bound parameters, sorted by name
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    /// Placeholder occurrences in text order
    pub fn placeholders(&self) -> Vec<Placeholder> {
        scan_placeholders(&self.text)
    }

    /// Upper-cased object names that follow `FROM` or `JOIN`
    ///
    /// This is a lexical approximation used for invalidation tags; it may
    /// report extra names but does not miss a plain `FROM`/`JOIN` target.
    pub fn referenced_tables(&self) -> BTreeSet<String> {
        const NOT_TABLES: [&str; 3] = ["SELECT", "LATERAL", "TABLE"];

        let tokens: Vec<&str> = self
            .text
            .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
            .filter(|t| !t.is_empty())
            .collect();

        let mut tables = BTreeSet::new();
        for pair in tokens.windows(2) {
            if !(pair[0].eq_ignore_ascii_case("from") || pair[0].eq_ignore_ascii_case("join")) {
                continue;
            }
            let name = pair[1].trim_end_matches(';').replace('"', "");
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
            {
                continue;
            }
            let name = name.to_ascii_uppercase();
            if !NOT_TABLES.contains(&name.as_str()) {
                tables.insert(name);
            }
        }
        tables
    }

    /// Whether `table` (qualified or not) is one of the referenced tables
    pub fn references_table(&self, table: &str) -> bool {
        let wanted = table.replace('"', "").to_ascii_uppercase();
        let suffix = format!(".{}", wanted);
        self.referenced_tables()
            .iter()
            .any(|t| *t == wanted || t.ends_with(&suffix))
    }

    /// Single-line, length-limited rendering for logs
    pub fn summary(&self) -> String {
        const MAX: usize = 96;
        let collapsed = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= MAX {
            collapsed
        } else {
            let head: String = collapsed.chars().take(MAX).collect();
            format!("{}...", head)
        }
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Builder collecting parameters before validation
#[derive(Debug, Clone)]
pub struct QueryDescriptorBuilder {
    text: String,
    params: Vec<(String, ParamValue)>,
}

impl QueryDescriptorBuilder {
    /// Bind a value to `:name`
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Validate and build the descriptor
    pub fn build(self) -> Result<QueryDescriptor> {
        QueryDescriptor::new(self.text, self.params)
    }
}

fn build_key(text: &str, params: &BTreeMap<String, ParamValue>) -> CacheKey {
    let mut key = text.to_string();
    if !params.is_empty() {
        let rendered: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        key.push('?');
        key.push_str(&rendered.join("&"));
    }
    CacheKey(key)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Find `:name` placeholders, skipping literals, quoted identifiers,
/// comments and `::` casts
fn scan_placeholders(text: &str) -> Vec<Placeholder> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut found = Vec::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'\'' => {
                i += 1;
                while i < len {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'\'' if i + 1 < len && bytes[i + 1] == b'\'' => i += 2,
                        b'\'' => break,
                        _ => i += 1,
                    }
                }
                i += 1;
            }
            b'"' => {
                i += 1;
                while i < len && bytes[i] != b'"' {
                    i += 1;
                }
                i += 1;
            }
            b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            b':' if i + 1 < len && bytes[i + 1] == b':' => i += 2,
            b':' => {
                let start = i;
                let mut end = i + 1;
                if end < len && (bytes[end].is_ascii_alphabetic() || bytes[end] == b'_') {
                    end += 1;
                    while end < len && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                        end += 1;
                    }
                    found.push(Placeholder {
                        name: text[start + 1..end].to_string(),
                        span: start..end,
                    });
                    i = end;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    found
}
