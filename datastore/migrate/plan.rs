use anyhow::{Result, Context, bail};
use automigrate_snapshot::schema;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One structural difference between two schemas.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ChangeOp {
    CreateTable(CreateTable),
    DropTable(DropTable),
    AddColumn(AddColumn),
    DropColumn(DropColumn),
    AlterColumn(AlterColumn),
    CreateIndex(CreateIndex),
    DropIndex(DropIndex),
    AddForeignKey(AddForeignKey),
    DropForeignKey(DropForeignKey),
}

/// Creates the table with all its columns, its primary key and its foreign keys. Indexes are
/// created by separate [`CreateIndex`] operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTable {
    pub entity: Arc<schema::Entity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropTable {
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddColumn {
    pub table_name: String,
    pub field: Arc<schema::Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropColumn {
    pub table_name: String,
    pub col_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterColumn {
    pub table_name: String,
    pub old_field: Arc<schema::Field>,
    pub new_field: Arc<schema::Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIndex {
    pub table_name: String,
    pub index: Arc<schema::Index>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropIndex {
    pub table_name: String,
    pub index_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddForeignKey {
    pub table_name: String,
    pub foreign_key: Arc<schema::ForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropForeignKey {
    pub table_name: String,
    pub fk_name: String,
}

/// Operations collected by kind, so that they can be emitted in an order the database accepts.
#[derive(Default)]
struct Buckets {
    drop_fks: Vec<ChangeOp>,
    drop_indexes: Vec<ChangeOp>,
    drop_tables: Vec<ChangeOp>,
    columns: Vec<ChangeOp>,
    create_indexes: Vec<ChangeOp>,
    /// New tables, each followed by its indexes.
    create_tables: Vec<ChangeOp>,
    add_fks: Vec<ChangeOp>,
}

/// Computes the operations that transform `old_schema` into `new_schema`.
///
/// Foreign keys and indexes are dropped first, then removed tables (tables that reference other
/// tables go before the tables they reference). Columns and indexes of the remaining tables are
/// changed next, so that new tables can reference them. New tables are created after that,
/// referenced tables first and each one followed by its indexes. Foreign keys of the remaining
/// tables are added last.
///
/// Foreign keys that form a cycle among removed tables are dropped before the tables.
pub fn diff(old_schema: &schema::Schema, new_schema: &schema::Schema) -> Result<Vec<ChangeOp>> {
    let mut out = Buckets::default();

    let removed: Vec<&Arc<schema::Entity>> = old_schema.entities.values()
        .filter(|entity| !new_schema.entities.contains_key(&entity.name))
        .collect();
    let mut removed = sort_by_dependencies(&removed, Some(&mut out.drop_fks))
        .context("could not order removed tables")?;
    removed.reverse();
    for old_entity in removed {
        out.drop_tables.push(ChangeOp::DropTable(DropTable { table_name: old_entity.name.clone() }));
    }

    let mut added = Vec::new();
    for new_entity in new_schema.entities.values() {
        match old_schema.entities.get(&new_entity.name) {
            Some(old_entity) => diff_entity(old_entity, new_entity, &mut out)
                .with_context(|| format!("could not migrate table {:?}", new_entity.name))?,
            None => added.push(new_entity),
        }
    }

    for new_entity in sort_by_dependencies(&added, None).context("could not order new tables")? {
        out.create_tables.push(ChangeOp::CreateTable(CreateTable { entity: new_entity.clone() }));
        for index in new_entity.indexes.values() {
            out.create_tables.push(create_index(new_entity, index));
        }
    }

    let Buckets { drop_fks, drop_indexes, drop_tables, columns, create_indexes, create_tables, add_fks } = out;
    Ok([drop_fks, drop_indexes, drop_tables, columns, create_indexes, create_tables, add_fks]
        .into_iter()
        .flatten()
        .collect())
}

fn diff_entity(
    old_entity: &schema::Entity,
    new_entity: &schema::Entity,
    out: &mut Buckets,
) -> Result<()> {
    if old_entity.primary_key != new_entity.primary_key {
        bail!("cannot change the primary key from {:?} to {:?}",
            old_entity.primary_key, new_entity.primary_key);
    }

    let mut add_cols = Vec::new();
    let mut alter_cols = Vec::new();
    let mut drop_cols = Vec::new();
    // columns that are dropped or rebuilt, indexes over them have to be dropped first
    let mut touched_cols = HashSet::new();

    for new_field in new_entity.fields.values() {
        match old_entity.fields.get(&new_field.name) {
            Some(old_field) => if !old_field.same_column(new_field) {
                touched_cols.insert(new_field.name.as_str());
                alter_cols.push(ChangeOp::AlterColumn(AlterColumn {
                    table_name: new_entity.name.clone(),
                    old_field: old_field.clone(),
                    new_field: new_field.clone(),
                }));
            },
            None => {
                if !new_field.nullable && new_field.default.is_none() {
                    bail!("cannot add required field {:?} without a default value", new_field.name);
                }
                add_cols.push(ChangeOp::AddColumn(AddColumn {
                    table_name: new_entity.name.clone(),
                    field: new_field.clone(),
                }));
            },
        }
    }

    for old_field in old_entity.fields.values() {
        if !new_entity.fields.contains_key(&old_field.name) {
            touched_cols.insert(old_field.name.as_str());
            drop_cols.push(ChangeOp::DropColumn(DropColumn {
                table_name: new_entity.name.clone(),
                col_name: old_field.name.clone(),
            }));
        }
    }

    out.columns.extend(add_cols);
    out.columns.extend(alter_cols);
    out.columns.extend(drop_cols);

    let covers_touched = |columns: &[String]| columns.iter().any(|c| touched_cols.contains(c.as_str()));

    for old_index in old_entity.indexes.values() {
        let keep = match new_entity.indexes.get(&old_index.name) {
            Some(new_index) => new_index == old_index && !covers_touched(&old_index.columns),
            None => false,
        };
        if !keep {
            out.drop_indexes.push(ChangeOp::DropIndex(DropIndex {
                table_name: old_entity.name.clone(),
                index_name: old_index.name.clone(),
            }));
        }
    }
    for new_index in new_entity.indexes.values() {
        let exists = match old_entity.indexes.get(&new_index.name) {
            Some(old_index) => old_index == new_index && !covers_touched(&new_index.columns),
            None => false,
        };
        if !exists {
            out.create_indexes.push(create_index(new_entity, new_index));
        }
    }

    for old_fk in old_entity.foreign_keys.values() {
        if new_entity.foreign_keys.get(&old_fk.name) != Some(old_fk) {
            out.drop_fks.push(ChangeOp::DropForeignKey(DropForeignKey {
                table_name: old_entity.name.clone(),
                fk_name: old_fk.name.clone(),
            }));
        }
    }
    for new_fk in new_entity.foreign_keys.values() {
        if old_entity.foreign_keys.get(&new_fk.name) != Some(new_fk) {
            out.add_fks.push(ChangeOp::AddForeignKey(AddForeignKey {
                table_name: new_entity.name.clone(),
                foreign_key: new_fk.clone(),
            }));
        }
    }

    Ok(())
}

fn create_index(entity: &schema::Entity, index: &Arc<schema::Index>) -> ChangeOp {
    ChangeOp::CreateIndex(CreateIndex { table_name: entity.name.clone(), index: index.clone() })
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Orders entities so that every entity comes after the entities it references. Only references
/// between the given entities are considered; the relative order of independent entities is kept.
///
/// A cycle of foreign keys is an error, unless `broken_fks` is given: then the foreign key that
/// closes the cycle is ignored and an operation that drops it is pushed to `broken_fks`.
fn sort_by_dependencies<'a>(
    entities: &[&'a Arc<schema::Entity>],
    mut broken_fks: Option<&mut Vec<ChangeOp>>,
) -> Result<Vec<&'a Arc<schema::Entity>>> {
    let by_name: HashMap<&str, &'a Arc<schema::Entity>> = entities.iter()
        .map(|entity| (entity.name.as_str(), *entity))
        .collect();
    let mut visits = HashMap::new();
    let mut sorted = Vec::with_capacity(entities.len());
    for &entity in entities.iter() {
        if !visits.contains_key(entity.name.as_str()) {
            visit(entity, &by_name, &mut visits, &mut sorted, broken_fks.as_deref_mut())?;
        }
    }
    Ok(sorted)
}

fn visit<'a>(
    entity: &'a Arc<schema::Entity>,
    by_name: &HashMap<&str, &'a Arc<schema::Entity>>,
    visits: &mut HashMap<&'a str, Visit>,
    sorted: &mut Vec<&'a Arc<schema::Entity>>,
    mut broken_fks: Option<&mut Vec<ChangeOp>>,
) -> Result<()> {
    visits.insert(entity.name.as_str(), Visit::InProgress);
    for fk in entity.dependencies() {
        let dep = match by_name.get(fk.referenced_table.as_str()) {
            Some(&dep) => dep,
            None => continue,
        };
        match visits.get(dep.name.as_str()).copied() {
            Some(Visit::Done) => {},
            Some(Visit::InProgress) => match broken_fks.as_deref_mut() {
                Some(broken_fks) => broken_fks.push(ChangeOp::DropForeignKey(DropForeignKey {
                    table_name: entity.name.clone(),
                    fk_name: fk.name.clone(),
                })),
                None => bail!("tables form a cycle of foreign keys through {:?}", dep.name),
            },
            None => visit(dep, by_name, visits, sorted, broken_fks.as_deref_mut())?,
        }
    }
    visits.insert(entity.name.as_str(), Visit::Done);
    sorted.push(entity);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use automigrate_snapshot::schema::{Entity, Field, FieldType, ForeignKey, Index, Schema, Value};
    use proptest::prelude::*;

    fn authors() -> Entity {
        Entity::new("authors")
            .field(Field::new("id", FieldType::BigInt))
            .field(Field::new("name", FieldType::Text))
            .primary_key(["id"])
    }

    fn posts() -> Entity {
        Entity::new("posts")
            .field(Field::new("id", FieldType::BigInt))
            .field(Field::new("author_id", FieldType::BigInt))
            .primary_key(["id"])
            .index(Index::new("posts_author_idx", ["author_id"]))
            .foreign_key(ForeignKey::new("posts_author_fk", ["author_id"], "authors", ["id"]))
    }

    fn op_names(ops: &[ChangeOp]) -> Vec<String> {
        ops.iter().map(|op| match op {
            ChangeOp::CreateTable(op) => format!("create {}", op.entity.name),
            ChangeOp::DropTable(op) => format!("drop {}", op.table_name),
            ChangeOp::AddColumn(op) => format!("add {}.{}", op.table_name, op.field.name),
            ChangeOp::DropColumn(op) => format!("drop {}.{}", op.table_name, op.col_name),
            ChangeOp::AlterColumn(op) => format!("alter {}.{}", op.table_name, op.new_field.name),
            ChangeOp::CreateIndex(op) => format!("create index {}", op.index.name),
            ChangeOp::DropIndex(op) => format!("drop index {}", op.index_name),
            ChangeOp::AddForeignKey(op) => format!("add fk {}", op.foreign_key.name),
            ChangeOp::DropForeignKey(op) => format!("drop fk {}", op.fk_name),
        }).collect()
    }

    #[test]
    fn test_create_referenced_first() {
        // posts is declared first, but references authors
        let new = Schema::new().with_entity(posts()).with_entity(authors());
        let ops = diff(&Schema::new(), &new).unwrap();
        assert_eq!(op_names(&ops), vec![
            "create authors",
            "create posts",
            "create index posts_author_idx",
        ]);
    }

    #[test]
    fn test_drop_referencing_first() {
        let old = Schema::new().with_entity(authors()).with_entity(posts());
        let ops = diff(&old, &Schema::new()).unwrap();
        assert_eq!(op_names(&ops), vec!["drop posts", "drop authors"]);
    }

    #[test]
    fn test_add_nullable_column() {
        let old = Schema::new().with_entity(authors());
        let new = Schema::new().with_entity(authors().field(Field::new("bio", FieldType::Text).nullable()));
        let ops = diff(&old, &new).unwrap();
        assert_eq!(op_names(&ops), vec!["add authors.bio"]);
    }

    #[test]
    fn test_add_required_column_needs_default() {
        let old = Schema::new().with_entity(authors());
        let new = Schema::new().with_entity(authors().field(Field::new("age", FieldType::Integer)));
        assert!(diff(&old, &new).is_err());

        let new = Schema::new().with_entity(authors()
            .field(Field::new("age", FieldType::Integer).default(Value::Integer(0))));
        assert_eq!(op_names(&diff(&old, &new).unwrap()), vec!["add authors.age"]);
    }

    #[test]
    fn test_primary_key_change_refused() {
        let old = Schema::new().with_entity(authors());
        let new = Schema::new().with_entity(authors().primary_key(["id", "name"]));
        let err = diff(&old, &new).unwrap_err();
        assert!(format!("{:#}", err).contains("cannot change the primary key"));
    }

    #[test]
    fn test_altered_column_rebuilds_index() {
        let old = Schema::new().with_entity(authors()).with_entity(posts());
        let altered = posts()
            .field(Field::new("author_id", FieldType::BigInt).nullable());
        let new = Schema::new().with_entity(authors()).with_entity(altered);
        let ops = diff(&old, &new).unwrap();
        assert_eq!(op_names(&ops), vec![
            "drop index posts_author_idx",
            "alter posts.author_id",
            "create index posts_author_idx",
        ]);
    }

    #[test]
    fn test_fk_and_index_changes() {
        let old = Schema::new().with_entity(authors()).with_entity(posts());
        let mut changed = posts();
        changed.foreign_keys.clear();
        changed.indexes.clear();
        let changed = changed
            .field(Field::new("slug", FieldType::Text).nullable())
            .index(Index::new("posts_slug_idx", ["slug"]).unique());
        let new = Schema::new().with_entity(authors()).with_entity(changed);
        let ops = diff(&old, &new).unwrap();
        assert_eq!(op_names(&ops), vec![
            "drop fk posts_author_fk",
            "drop index posts_author_idx",
            "add posts.slug",
            "create index posts_slug_idx",
        ]);
    }

    #[test]
    fn test_new_fk_on_existing_table_comes_last() {
        let old = Schema::new().with_entity(posts_without_fk());
        let new = Schema::new().with_entity(authors()).with_entity(posts());
        let ops = diff(&old, &new).unwrap();
        assert_eq!(op_names(&ops), vec![
            "create authors",
            "add fk posts_author_fk",
        ]);
    }

    fn posts_without_fk() -> Entity {
        let mut posts = posts();
        posts.foreign_keys.clear();
        posts
    }

    #[test]
    fn test_cycle_refused() {
        let a = Entity::new("a")
            .field(Field::new("id", FieldType::Integer))
            .field(Field::new("b_id", FieldType::Integer))
            .primary_key(["id"])
            .foreign_key(ForeignKey::new("a_b", ["b_id"], "b", ["id"]));
        let b = Entity::new("b")
            .field(Field::new("id", FieldType::Integer))
            .field(Field::new("a_id", FieldType::Integer))
            .primary_key(["id"])
            .foreign_key(ForeignKey::new("b_a", ["a_id"], "a", ["id"]));
        let new = Schema::new().with_entity(a).with_entity(b);
        assert!(diff(&Schema::new(), &new).is_err());
    }

    #[test]
    fn test_drop_tables_with_fk_cycle() {
        // a cycle like this can be built on PostgreSQL by adding a foreign key to an existing table
        let a = Entity::new("a")
            .field(Field::new("id", FieldType::Integer))
            .field(Field::new("b_id", FieldType::Integer).nullable())
            .primary_key(["id"])
            .foreign_key(ForeignKey::new("a_b", ["b_id"], "b", ["id"]));
        let b = Entity::new("b")
            .field(Field::new("id", FieldType::Integer))
            .field(Field::new("a_id", FieldType::Integer).nullable())
            .primary_key(["id"])
            .foreign_key(ForeignKey::new("b_a", ["a_id"], "a", ["id"]));
        let c = Entity::new("c")
            .field(Field::new("id", FieldType::Integer))
            .field(Field::new("a_id", FieldType::Integer))
            .primary_key(["id"])
            .foreign_key(ForeignKey::new("c_a", ["a_id"], "a", ["id"]));
        let old = Schema::new().with_entity(a).with_entity(b).with_entity(c);
        let ops = diff(&old, &Schema::new()).unwrap();
        assert_eq!(op_names(&ops), vec!["drop fk b_a", "drop c", "drop a", "drop b"]);
    }

    fn countries() -> Entity {
        Entity::new("countries")
            .field(Field::new("id", FieldType::BigInt))
            .primary_key(["id"])
    }

    fn cities() -> Entity {
        Entity::new("cities")
            .field(Field::new("id", FieldType::BigInt))
            .field(Field::new("country_code", FieldType::Text).nullable())
            .primary_key(["id"])
            .foreign_key(ForeignKey::new("cities_country_fk", ["country_code"], "countries", ["code"]))
    }

    fn countries_with_code() -> Entity {
        countries()
            .field(Field::new("code", FieldType::Text).nullable())
            .index(Index::new("countries_code", ["code"]).unique())
    }

    #[test]
    fn test_new_table_index_precedes_referencing_table() {
        let new = Schema::new().with_entity(cities()).with_entity(countries_with_code());
        let ops = diff(&Schema::new(), &new).unwrap();
        assert_eq!(op_names(&ops), vec![
            "create countries",
            "create index countries_code",
            "create cities",
        ]);
    }

    #[test]
    fn test_new_table_references_added_column() {
        let old = Schema::new().with_entity(countries());
        let new = Schema::new().with_entity(countries_with_code()).with_entity(cities());
        let ops = diff(&old, &new).unwrap();
        assert_eq!(op_names(&ops), vec![
            "add countries.code",
            "create index countries_code",
            "create cities",
        ]);
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        let tree = Entity::new("nodes")
            .field(Field::new("id", FieldType::Integer))
            .field(Field::new("parent_id", FieldType::Integer).nullable())
            .primary_key(["id"])
            .foreign_key(ForeignKey::new("nodes_parent", ["parent_id"], "nodes", ["id"]));
        let ops = diff(&Schema::new(), &Schema::new().with_entity(tree)).unwrap();
        assert_eq!(op_names(&ops), vec!["create nodes"]);
    }

    #[test]
    fn test_comments_are_ignored() {
        let old = Schema::new().with_entity(authors());
        let new = Schema::new().with_entity(authors()
            .comment("people who write")
            .field(Field::new("name", FieldType::Text).comment("full name")));
        assert!(diff(&old, &new).unwrap().is_empty());
    }

    fn arb_field_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::Text),
            Just(FieldType::Integer),
            Just(FieldType::BigInt),
            Just(FieldType::Real),
            Just(FieldType::Boolean),
            Just(FieldType::Uuid),
            Just(FieldType::Timestamp),
            Just(FieldType::Json),
        ]
    }

    fn arb_schema() -> impl Strategy<Value = Schema> {
        let fields = prop::collection::vec((arb_field_type(), any::<bool>()), 1..6);
        prop::collection::vec((fields, any::<bool>()), 0..6).prop_map(|entities| {
            let mut schema = Schema::new();
            for (i, (fields, indexed)) in entities.into_iter().enumerate() {
                let mut entity = Entity::new(format!("e{}", i)).primary_key(["f0"]);
                for (j, (type_, nullable)) in fields.into_iter().enumerate() {
                    let mut field = Field::new(format!("f{}", j), type_);
                    field.nullable = nullable && j != 0;
                    entity = entity.field(field);
                }
                if indexed {
                    entity = entity.index(Index::new(format!("e{}_idx", i), ["f0"]));
                }
                if i > 0 {
                    let parent = schema.entities[&format!("e{}", i - 1)].clone();
                    entity = entity
                        .field(Field::new("parent", parent.fields["f0"].type_).nullable())
                        .foreign_key(ForeignKey::new(format!("e{}_parent", i), ["parent"], parent.name.clone(), ["f0"]));
                }
                schema = schema.with_entity(entity);
            }
            schema
        })
    }

    proptest! {
        #[test]
        fn diff_with_itself_is_empty(schema in arb_schema()) {
            prop_assert!(diff(&schema, &schema).unwrap().is_empty());
        }

        #[test]
        fn declaration_order_does_not_matter(schema in arb_schema()) {
            let mut reordered = Schema::new();
            for entity in schema.entities.values().rev() {
                let mut entity = (**entity).clone();
                entity.fields = entity.fields.into_iter().rev().collect();
                reordered = reordered.with_entity(entity);
            }
            prop_assert!(diff(&schema, &reordered).unwrap().is_empty());
        }

        #[test]
        fn creating_from_scratch_respects_references(schema in arb_schema()) {
            let ops = diff(&Schema::new(), &schema).unwrap();
            let mut created = HashSet::new();
            for op in ops.iter() {
                if let ChangeOp::CreateTable(op) = op {
                    for fk in op.entity.dependencies() {
                        prop_assert!(created.contains(&fk.referenced_table));
                    }
                    created.insert(op.entity.name.clone());
                }
            }
            prop_assert_eq!(created.len(), schema.entities.len());
        }
    }
}
