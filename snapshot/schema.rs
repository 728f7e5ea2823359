use anyhow::{Result, bail, ensure};
use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use std::sync::Arc;
use crate::serde_with::{Named, named_map};

/// Relational schema as declared by the application.
///
/// This is the model that the application expects the database to have. It is immutable once
/// built: planning a migration compares two instances of it, and a snapshot of it is stored with
/// every applied migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// All entities, keyed by their table name.
    #[serde(with = "named_map")] // serialize as Vec<Entity>
    pub entities: IndexMap<String, Arc<Entity>>,
}

/// An entity, stored in a single table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Name of the table.
    pub name: String,
    /// Names of the fields that form the primary key, in key order.
    pub primary_key: Vec<String>,
    #[serde(with = "named_map")]
    pub fields: IndexMap<String, Arc<Field>>,
    #[serde(with = "named_map", default)]
    pub indexes: IndexMap<String, Arc<Index>>,
    #[serde(with = "named_map", default)]
    pub foreign_keys: IndexMap<String, Arc<ForeignKey>>,
    /// Free-form description, ignored when comparing schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default)]
    pub nullable: bool,
    /// Value used for existing rows when the column is added, and for rows inserted without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Text,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Double precision float.
    Real,
    Boolean,
    Uuid,
    /// Timestamp with time zone.
    Timestamp,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// A relation from some fields of an entity to the primary (or unique) key of another entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

impl Named for Entity {
    fn name(&self) -> &str { &self.name }
}

impl Named for Field {
    fn name(&self) -> &str { &self.name }
}

impl Named for Index {
    fn name(&self) -> &str { &self.name }
}

impl Named for ForeignKey {
    fn name(&self) -> &str { &self.name }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity, replacing any previous entity with the same name.
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.insert(entity.name.clone(), Arc::new(entity));
        self
    }

    /// Checks that the schema is consistent: every key, index and relation refers to fields that
    /// exist.
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            entity.validate(self)
                .map_err(|err| err.context(format!("invalid entity {:?}", entity.name)))?;
        }
        Ok(())
    }
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            fields: IndexMap::new(),
            indexes: IndexMap::new(),
            foreign_keys: IndexMap::new(),
            comment: None,
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.insert(field.name.clone(), Arc::new(field));
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
        where I: IntoIterator<Item = S>, S: Into<String>
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.insert(index.name.clone(), Arc::new(index));
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.insert(foreign_key.name.clone(), Arc::new(foreign_key));
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Foreign keys that reference other entities. Those entities must exist before this entity
    /// can be created.
    pub fn dependencies(&self) -> impl Iterator<Item = &Arc<ForeignKey>> + '_ {
        self.foreign_keys.values()
            .filter(move |fk| fk.referenced_table != self.name)
    }

    fn validate(&self, schema: &Schema) -> Result<()> {
        ensure!(!self.primary_key.is_empty(), "entity must have a primary key");
        self.ensure_fields(&self.primary_key, "primary key")?;

        let mut seen = HashSet::new();
        for col in self.primary_key.iter() {
            ensure!(seen.insert(col), "field {:?} appears twice in the primary key", col);
            if self.fields[col].nullable {
                bail!("primary key field {:?} cannot be nullable", col);
            }
        }

        for field in self.fields.values() {
            if let Some(default) = &field.default {
                ensure!(default.fits(field.type_),
                    "default value {:?} does not fit field {:?} of type {:?}",
                    default, field.name, field.type_);
                ensure!(field.nullable || *default != Value::Null,
                    "non-nullable field {:?} cannot default to null", field.name);
            }
        }

        for index in self.indexes.values() {
            ensure!(!index.columns.is_empty(), "index {:?} has no columns", index.name);
            self.ensure_fields(&index.columns, &format!("index {:?}", index.name))?;
        }

        for fk in self.foreign_keys.values() {
            let what = format!("foreign key {:?}", fk.name);
            ensure!(!fk.columns.is_empty(), "{} has no columns", what);
            ensure!(fk.columns.len() == fk.referenced_columns.len(),
                "{} has {} columns but references {}",
                what, fk.columns.len(), fk.referenced_columns.len());
            self.ensure_fields(&fk.columns, &what)?;

            let target = match schema.entities.get(&fk.referenced_table) {
                Some(target) => target,
                None => bail!("{} references unknown entity {:?}", what, fk.referenced_table),
            };
            target.ensure_fields(&fk.referenced_columns, &what)?;

            if fk.on_delete == ReferentialAction::SetNull {
                for col in fk.columns.iter() {
                    ensure!(self.fields[col].nullable,
                        "{} sets {:?} to null on delete, but the field is not nullable", what, col);
                }
            }
        }
        Ok(())
    }

    fn ensure_fields(&self, columns: &[String], what: &str) -> Result<()> {
        for col in columns.iter() {
            ensure!(self.fields.contains_key(col), "{} refers to unknown field {:?} of {:?}",
                what, col, self.name);
        }
        Ok(())
    }
}

impl Field {
    pub fn new(name: impl Into<String>, type_: FieldType) -> Self {
        Self { name: name.into(), type_, nullable: false, default: None, comment: None }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Compares everything that ends up in the column definition. Comments are ignored.
    pub fn same_column(&self, other: &Field) -> bool {
        self.name == other.name
            && self.type_ == other.type_
            && self.nullable == other.nullable
            && self.default == other.default
    }
}

impl Value {
    /// Can this value be stored in a column of the given type?
    pub fn fits(&self, type_: FieldType) -> bool {
        match (self, type_) {
            (Value::Null, _) => true,
            (Value::Boolean(_), FieldType::Boolean) => true,
            (Value::Integer(value), FieldType::Integer) => i32::try_from(*value).is_ok(),
            (Value::Integer(_), FieldType::BigInt | FieldType::Real) => true,
            (Value::Real(value), FieldType::Real) => value.is_finite(),
            (Value::Text(_), FieldType::Text | FieldType::Uuid | FieldType::Timestamp | FieldType::Json) => true,
            _ => false,
        }
    }
}

impl Index {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
        where I: IntoIterator<Item = S>, S: Into<String>
    {
        Self { name: name.into(), columns: columns.into_iter().map(Into::into).collect(), unique: false }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

impl ForeignKey {
    pub fn new<I, J, S, T>(
        name: impl Into<String>,
        columns: I,
        referenced_table: impl Into<String>,
        referenced_columns: J,
    ) -> Self
        where I: IntoIterator<Item = S>, S: Into<String>,
              J: IntoIterator<Item = T>, T: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            referenced_table: referenced_table.into(),
            referenced_columns: referenced_columns.into_iter().map(Into::into).collect(),
            on_delete: ReferentialAction::NoAction,
        }
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }
}
