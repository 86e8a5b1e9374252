//! Desired-identifier payloads and their coercion into storage identifiers.

use std::fmt;
use std::sync::Arc;

use relsync_storage::{IdKind, IdSet, Identifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoercionError;

/// One entry of a desired-membership payload: `{"type": "tags", "id": "4"}`.
///
/// Only `id` takes part in reconciliation; `type` is carried for callers that
/// validate it themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub id: Value,
}

impl ResourceIdentifier {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            kind: None,
            id: id.into(),
        }
    }

    pub fn typed(kind: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            kind: Some(kind.into()),
            id: id.into(),
        }
    }
}

/// Builds a payload of untyped identifiers.
pub fn identifiers<I, T>(ids: I) -> Vec<ResourceIdentifier>
where
    I: IntoIterator<Item = T>,
    T: Into<Value>,
{
    ids.into_iter().map(ResourceIdentifier::new).collect()
}

type CoerceFn = dyn Fn(&Value) -> Result<Identifier, CoercionError> + Send + Sync;

/// Converts raw payload ids into [`Identifier`]s.
///
/// Coercion is pure; the reconciler runs it over the whole payload before a
/// transaction is opened. The default is [`Coercer::integer`].
#[derive(Clone)]
pub struct Coercer {
    name: &'static str,
    func: Arc<CoerceFn>,
}

impl Coercer {
    /// Wraps a custom conversion.
    pub fn custom<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Identifier, CoercionError> + Send + Sync + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    /// Integers, integral floats and integer strings (whitespace trimmed).
    pub fn integer() -> Self {
        Self::custom("integer", coerce_integer)
    }

    /// UUID strings.
    pub fn uuid() -> Self {
        Self::custom("uuid", coerce_uuid)
    }

    /// Strings as-is, numbers and booleans by their JSON text.
    pub fn text() -> Self {
        Self::custom("text", coerce_text)
    }

    /// The coercer matching an entity's declared id domain.
    pub fn for_kind(kind: IdKind) -> Self {
        match kind {
            IdKind::Integer => Self::integer(),
            IdKind::Uuid => Self::uuid(),
            IdKind::Text => Self::text(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn coerce(&self, raw: &Value) -> Result<Identifier, CoercionError> {
        (self.func)(raw)
    }

    /// Coerces every entry's `id`, failing on the first bad entry.
    /// Duplicates collapse into one identifier.
    pub fn coerce_all(&self, desired: &[ResourceIdentifier]) -> Result<IdSet, CoercionError> {
        desired
            .iter()
            .enumerate()
            .map(|(position, rio)| self.coerce(&rio.id).map_err(|err| err.at(position)))
            .collect()
    }
}

impl Default for Coercer {
    fn default() -> Self {
        Self::integer()
    }
}

impl fmt::Debug for Coercer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coercer").field("name", &self.name).finish()
    }
}

fn coerce_integer(raw: &Value) -> Result<Identifier, CoercionError> {
    coerce_as(IdKind::Integer, raw)
}

fn coerce_uuid(raw: &Value) -> Result<Identifier, CoercionError> {
    coerce_as(IdKind::Uuid, raw)
}

fn coerce_text(raw: &Value) -> Result<Identifier, CoercionError> {
    coerce_as(IdKind::Text, raw)
}

fn coerce_as(kind: IdKind, raw: &Value) -> Result<Identifier, CoercionError> {
    kind.parse_value(raw)
        .map_err(|reason| CoercionError::new(raw, kind, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_storage::id_set;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_integer_coercion() {
        let c = Coercer::default();
        assert_eq!(c.name(), "integer");
        assert_eq!(c.coerce(&json!(4)).unwrap(), Identifier::Int(4));
        assert_eq!(c.coerce(&json!(" 17 ")).unwrap(), Identifier::Int(17));
        assert_eq!(c.coerce(&json!(-3)).unwrap(), Identifier::Int(-3));
        assert_eq!(c.coerce(&json!(5.0)).unwrap(), Identifier::Int(5));

        assert!(c.coerce(&json!(5.5)).is_err());
        assert!(c.coerce(&json!("12abc")).is_err());
        assert!(c.coerce(&json!(null)).is_err());
        assert!(c.coerce(&json!(u64::MAX)).is_err());
        let err = c.coerce(&json!([1])).unwrap_err();
        assert_eq!(err.reason, "expected a number or string, got array");
    }

    #[test]
    fn test_uuid_coercion() {
        let c = Coercer::uuid();
        let raw = "1b4e28ba-2fa1-11d2-883f-00163e4fdc00";
        assert_eq!(
            c.coerce(&json!(raw)).unwrap(),
            Identifier::Uuid(Uuid::parse_str(raw).unwrap())
        );
        assert!(c.coerce(&json!("not-a-uuid")).is_err());
        assert!(c.coerce(&json!(1)).is_err());
    }

    #[test]
    fn test_text_coercion() {
        let c = Coercer::for_kind(IdKind::Text);
        assert_eq!(c.coerce(&json!("urgent")).unwrap(), Identifier::from("urgent"));
        assert_eq!(c.coerce(&json!(12)).unwrap(), Identifier::from("12"));
        assert!(c.coerce(&json!("")).is_err());
        assert!(c.coerce(&json!({"id": 1})).is_err());
    }

    #[test]
    fn test_coerce_all_deduplicates_and_reports_position() {
        let c = Coercer::integer();
        let ids = c.coerce_all(&identifiers([json!(3), json!("3"), json!(1)])).unwrap();
        assert_eq!(ids, id_set([1_i64, 3]));

        let err = c
            .coerce_all(&identifiers([json!(1), json!(2), json!("x")]))
            .unwrap_err();
        assert_eq!(err.position, Some(2));
        assert_eq!(err.value, json!("x"));
    }

    #[test]
    fn test_custom_coercer() {
        let c = Coercer::custom("prefixed", |raw| {
            raw.as_str()
                .and_then(|s| s.strip_prefix("tag-"))
                .and_then(|s| s.parse::<i64>().ok())
                .map(Identifier::Int)
                .ok_or_else(|| CoercionError::new(raw, IdKind::Integer, "expected tag-<n>"))
        });
        assert_eq!(c.coerce(&json!("tag-9")).unwrap(), Identifier::Int(9));
        assert!(c.coerce(&json!("9")).is_err());
        assert_eq!(format!("{c:?}"), "Coercer { name: \"prefixed\" }");
    }

    #[test]
    fn test_resource_identifier_serde() {
        let rios: Vec<ResourceIdentifier> =
            serde_json::from_value(json!([{"type": "tags", "id": "4"}, {"id": 5}])).unwrap();
        assert_eq!(rios[0], ResourceIdentifier::typed("tags", "4"));
        assert_eq!(rios[1], ResourceIdentifier::new(5));
        assert_eq!(serde_json::to_value(&rios[1]).unwrap(), json!({"id": 5}));
    }
}
