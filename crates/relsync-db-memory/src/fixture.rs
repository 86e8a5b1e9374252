//! Seed data for the in-memory backend.
//!
//! ```json
//! {
//!   "rows": [
//!     {"entity": "project", "id": 1, "attributes": {"name": "apollo"}},
//!     {"entity": "tag", "id": 2}
//!   ],
//!   "links": [
//!     {"owner": "project", "owner_id": 1, "association": "tags", "related": [2]}
//!   ]
//! }
//! ```
//!
//! Ids are kept as raw JSON and read with their entity's declared id kind
//! when the fixture is loaded against a schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub rows: Vec<FixtureRow>,
    #[serde(default)]
    pub links: Vec<FixtureLinks>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRow {
    pub entity: String,
    pub id: Value,
    #[serde(default = "empty_object")]
    pub attributes: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureLinks {
    pub owner: String,
    pub owner_id: Value,
    pub association: String,
    #[serde(default)]
    pub related: Vec<Value>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Adds one row per identifier of `entity` with empty attributes.
    #[must_use]
    pub fn with_rows<I>(mut self, entity: &str, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.rows.extend(ids.into_iter().map(|id| FixtureRow {
            entity: entity.to_string(),
            id: id.into(),
            attributes: empty_object(),
        }));
        self
    }

    #[must_use]
    pub fn with_links<I>(
        mut self,
        owner: &str,
        owner_id: impl Into<Value>,
        association: &str,
        related: I,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.links.push(FixtureLinks {
            owner: owner.to_string(),
            owner_id: owner_id.into(),
            association: association.to_string(),
            related: related.into_iter().map(Into::into).collect(),
        });
        self
    }
}
