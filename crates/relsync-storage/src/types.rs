//! Record and identifier types shared by the storage traits.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A scalar record identifier.
///
/// Deserialization is untagged: JSON numbers become `Int`, strings that parse
/// as a UUID become `Uuid`, any other string becomes `Text`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl Identifier {
    /// Returns the declared id domain this identifier belongs to.
    #[must_use]
    pub fn kind(&self) -> IdKind {
        match self {
            Self::Int(_) => IdKind::Integer,
            Self::Uuid(_) => IdKind::Uuid,
            Self::Text(_) => IdKind::Text,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Uuid> for Identifier {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The identifier domain an entity's primary key lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    #[default]
    Integer,
    Uuid,
    Text,
}

impl IdKind {
    /// Reads a raw JSON scalar as an identifier of this kind.
    ///
    /// - `Integer`: integers, integral floats and integer strings (trimmed).
    /// - `Uuid`: UUID strings (trimmed).
    /// - `Text`: non-empty strings as-is, numbers and booleans by their JSON text.
    ///
    /// The error is a short reason, without the value.
    pub fn parse_value(self, raw: &Value) -> Result<Identifier, String> {
        match (self, raw) {
            (Self::Integer, Value::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    Ok(Identifier::Int(v))
                } else if let Some(f) = n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0) {
                    if f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        Ok(Identifier::Int(f as i64))
                    } else {
                        Err("out of range".into())
                    }
                } else {
                    Err("not an integral number in range".into())
                }
            }
            (Self::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Identifier::Int)
                .map_err(|e| e.to_string()),
            (Self::Integer, other) => Err(format!(
                "expected a number or string, got {}",
                json_type(other)
            )),
            (Self::Uuid, Value::String(s)) => Uuid::parse_str(s.trim())
                .map(Identifier::Uuid)
                .map_err(|e| e.to_string()),
            (Self::Uuid, other) => Err(format!("expected a string, got {}", json_type(other))),
            (Self::Text, Value::String(s)) if s.is_empty() => Err("empty string".into()),
            (Self::Text, Value::String(s)) => Ok(Identifier::Text(s.clone())),
            (Self::Text, Value::Number(n)) => Ok(Identifier::Text(n.to_string())),
            (Self::Text, Value::Bool(b)) => Ok(Identifier::Text(b.to_string())),
            (Self::Text, other) => Err(format!("expected a scalar, got {}", json_type(other))),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Uuid => write!(f, "uuid"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// A set of identifiers with deterministic iteration order.
pub type IdSet = BTreeSet<Identifier>;

/// Builds an [`IdSet`] from anything convertible into identifiers.
pub fn id_set<I, T>(ids: I) -> IdSet
where
    I: IntoIterator<Item = T>,
    T: Into<Identifier>,
{
    ids.into_iter().map(Into::into).collect()
}

/// The owning side of an association, as seen by the caller.
///
/// Holds the cached membership of every association that has been loaded
/// through a transaction. The cache is only trustworthy after a successful
/// reconcile or reload; after a failed reconcile it must be reloaded or
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRecord {
    entity: String,
    id: Identifier,
    #[serde(default)]
    memberships: BTreeMap<String, IdSet>,
}

impl ParentRecord {
    /// Creates a parent handle with nothing loaded.
    #[must_use]
    pub fn new(entity: impl Into<String>, id: impl Into<Identifier>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
            memberships: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Returns the cached membership of an association, if loaded.
    #[must_use]
    pub fn members(&self, association: &str) -> Option<&IdSet> {
        self.memberships.get(association)
    }

    #[must_use]
    pub fn is_loaded(&self, association: &str) -> bool {
        self.memberships.contains_key(association)
    }

    /// Names of all associations currently cached.
    pub fn loaded_associations(&self) -> impl Iterator<Item = &str> {
        self.memberships.keys().map(String::as_str)
    }

    /// Replaces the cached membership of one association.
    pub fn set_members(&mut self, association: impl Into<String>, ids: IdSet) {
        self.memberships.insert(association.into(), ids);
    }

    /// Drops the cached membership of one association.
    pub fn invalidate(&mut self, association: &str) {
        self.memberships.remove(association);
    }
}

/// A related record resolved by identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedRecord {
    /// Entity name of the record.
    pub entity: String,
    /// The record's identifier.
    pub id: Identifier,
    /// Row contents as a JSON object; `Value::Null` when the backend
    /// does not load attributes.
    #[serde(default)]
    pub attributes: Value,
}

impl RelatedRecord {
    /// Creates a new `RelatedRecord`.
    #[must_use]
    pub fn new(entity: impl Into<String>, id: impl Into<Identifier>, attributes: Value) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
            attributes,
        }
    }

    /// Looks up a top-level attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}
