//! Entity and association descriptors.
//!
//! A [`Schema`] is built once from a serde [`SchemaDefinition`] (usually the
//! `[schema]` section of the configuration file) and hands out immutable
//! [`Association`] descriptors by owner entity and association name. Backends
//! implement linkage against these descriptors; nothing is looked up by
//! method name at runtime.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::types::IdKind;

/// A persisted entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Logical entity name used by callers.
    pub name: String,
    /// Backing table.
    pub table: String,
    /// Primary key column.
    pub primary_key: String,
    /// Domain of the primary key.
    pub id_kind: IdKind,
}

impl EntityDef {
    /// Creates an entity with an integer `id` primary key.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            id_kind: IdKind::Integer,
        }
    }

    #[must_use]
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    #[must_use]
    pub fn with_id_kind(mut self, kind: IdKind) -> Self {
        self.id_kind = kind;
        self
    }
}

/// How an owner and its related records are physically linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Linkage {
    /// Many-to-many through a join table holding one row per link.
    JoinTable {
        table: String,
        owner_column: String,
        related_column: String,
    },
    /// One-to-many through a nullable foreign key column on the related table.
    ForeignKey { column: String },
}

impl Linkage {
    /// Whether a related record can belong to at most one owner.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::ForeignKey { .. })
    }
}

/// A named relationship from an owner entity to a related entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub name: String,
    pub owner: EntityDef,
    pub related: EntityDef,
    pub linkage: Linkage,
}

/// Serialized form of an entity declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    /// Defaults to the entity name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub id_kind: IdKind,
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// Serialized form of an association declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationDefinition {
    pub owner: String,
    pub name: String,
    pub related: String,
    pub linkage: Linkage,
}

/// Declarative schema as found in configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
    #[serde(default)]
    pub associations: Vec<AssociationDefinition>,
}

impl SchemaDefinition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity with default table name, `id` key and integer ids.
    #[must_use]
    pub fn with_entity(mut self, name: impl Into<String>) -> Self {
        self.entities.push(EntityDefinition {
            name: name.into(),
            table: None,
            primary_key: default_primary_key(),
            id_kind: IdKind::Integer,
        });
        self
    }

    #[must_use]
    pub fn with_entity_def(mut self, entity: EntityDef) -> Self {
        self.entities.push(EntityDefinition {
            name: entity.name,
            table: Some(entity.table),
            primary_key: entity.primary_key,
            id_kind: entity.id_kind,
        });
        self
    }

    #[must_use]
    pub fn with_association(
        mut self,
        owner: impl Into<String>,
        name: impl Into<String>,
        related: impl Into<String>,
        linkage: Linkage,
    ) -> Self {
        self.associations.push(AssociationDefinition {
            owner: owner.into(),
            name: name.into(),
            related: related.into(),
            linkage,
        });
        self
    }

    /// Validates the definition and builds a [`Schema`].
    pub fn build(self) -> Result<Schema, StorageError> {
        Schema::from_definition(self)
    }
}

/// Validated registry of entities and associations.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: IndexMap<String, EntityDef>,
    associations: IndexMap<(String, String), Association>,
}

impl Schema {
    /// Builds a schema, rejecting duplicates, blank names and references to
    /// undeclared entities.
    pub fn from_definition(definition: SchemaDefinition) -> Result<Self, StorageError> {
        let mut entities = IndexMap::new();
        for def in definition.entities {
            let entity = EntityDef {
                table: def.table.unwrap_or_else(|| def.name.clone()),
                name: def.name,
                primary_key: def.primary_key,
                id_kind: def.id_kind,
            };
            ensure_name("entity name", &entity.name)?;
            ensure_name("table", &entity.table)?;
            ensure_name("primary key", &entity.primary_key)?;
            if entities.contains_key(&entity.name) {
                return Err(StorageError::invalid_schema(format!(
                    "entity '{}' declared twice",
                    entity.name
                )));
            }
            entities.insert(entity.name.clone(), entity);
        }

        let mut associations = IndexMap::new();
        for def in definition.associations {
            ensure_name("association name", &def.name)?;
            let owner = lookup(&entities, &def.owner, &def.name)?;
            let related = lookup(&entities, &def.related, &def.name)?;
            match &def.linkage {
                Linkage::JoinTable {
                    table,
                    owner_column,
                    related_column,
                } => {
                    ensure_name("join table", table)?;
                    ensure_name("owner column", owner_column)?;
                    ensure_name("related column", related_column)?;
                }
                Linkage::ForeignKey { column } => ensure_name("foreign key column", column)?,
            }

            let key = (def.owner.clone(), def.name.clone());
            if associations.contains_key(&key) {
                return Err(StorageError::invalid_schema(format!(
                    "association '{}' declared twice on '{}'",
                    def.name, def.owner
                )));
            }
            associations.insert(
                key,
                Association {
                    name: def.name,
                    owner: owner.clone(),
                    related: related.clone(),
                    linkage: def.linkage,
                },
            );
        }

        Ok(Self {
            entities,
            associations,
        })
    }

    /// Returns an entity by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// Resolves an association descriptor on an owner entity.
    #[must_use]
    pub fn association(&self, owner: &str, name: &str) -> Option<&Association> {
        self.associations
            .get(&(owner.to_string(), name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    pub fn associations(&self) -> impl Iterator<Item = &Association> {
        self.associations.values()
    }
}

fn ensure_name(what: &str, value: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() || value.contains('\0') {
        return Err(StorageError::invalid_schema(format!(
            "{what} must be a non-empty name, got {value:?}"
        )));
    }
    Ok(())
}

fn lookup<'a>(
    entities: &'a IndexMap<String, EntityDef>,
    name: &str,
    association: &str,
) -> Result<&'a EntityDef, StorageError> {
    entities.get(name).ok_or_else(|| {
        StorageError::invalid_schema(format!(
            "association '{association}' references unknown entity '{name}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_tags() -> SchemaDefinition {
        SchemaDefinition::new()
            .with_entity("project")
            .with_entity("tag")
            .with_association(
                "project",
                "tags",
                "tag",
                Linkage::JoinTable {
                    table: "project_tags".into(),
                    owner_column: "project_id".into(),
                    related_column: "tag_id".into(),
                },
            )
    }

    #[test]
    fn test_resolves_association() {
        let schema = project_tags().build().unwrap();
        let assoc = schema.association("project", "tags").unwrap();
        assert_eq!(assoc.owner.table, "project");
        assert_eq!(assoc.related.primary_key, "id");
        assert!(!assoc.linkage.is_exclusive());
        assert!(schema.association("tag", "tags").is_none());
    }

    #[test]
    fn test_rejects_unknown_entity() {
        let def = SchemaDefinition::new().with_entity("project").with_association(
            "project",
            "members",
            "user",
            Linkage::ForeignKey {
                column: "project_id".into(),
            },
        );
        let err = def.build().unwrap_err();
        assert!(err.to_string().contains("unknown entity 'user'"));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = SchemaDefinition::new()
            .with_entity("tag")
            .with_entity("tag")
            .build()
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidSchema { .. }));

        let dup = project_tags().with_association(
            "project",
            "tags",
            "tag",
            Linkage::ForeignKey {
                column: "project_id".into(),
            },
        );
        assert!(dup.build().is_err());
    }

    #[test]
    fn test_rejects_blank_columns() {
        let def = SchemaDefinition::new()
            .with_entity("project")
            .with_entity("task")
            .with_association(
                "project",
                "tasks",
                "task",
                Linkage::ForeignKey { column: " ".into() },
            );
        assert!(def.build().is_err());
    }

    #[test]
    fn test_definition_from_toml() {
        let def: SchemaDefinition = toml::from_str(
            r#"
            [[entities]]
            name = "project"
            table = "projects"

            [[entities]]
            name = "tag"
            table = "tags"
            id_kind = "text"
            primary_key = "slug"

            [[associations]]
            owner = "project"
            name = "tags"
            related = "tag"
            linkage = { kind = "join_table", table = "project_tags", owner_column = "project_id", related_column = "tag_slug" }
            "#,
        )
        .unwrap();

        let schema = def.build().unwrap();
        let tag = schema.entity("tag").unwrap();
        assert_eq!(tag.id_kind, IdKind::Text);
        assert_eq!(tag.primary_key, "slug");
        assert_eq!(schema.entity("project").unwrap().table, "projects");
        assert_eq!(schema.associations().count(), 1);
    }
}
