use anyhow::{Result, Context, bail};
use automigrate_snapshot::schema;
use serde::Serialize;
use sqlx::any::AnyKind;
use std::fmt;
use crate::sql_writer::{Name, SqlWriter};
use super::plan::{self, ChangeOp};
use super::repr;

/// An SQL statement that is executed as a part of a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Command {
    pub sql: String,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Translates change operations into SQL statements for one database engine.
pub fn generate_commands(
    kind: AnyKind,
    ops: &[ChangeOp],
    target: &schema::Schema,
) -> Result<Vec<Command>> {
    let mut out = Vec::with_capacity(ops.len());
    for op in ops.iter() {
        match op {
            ChangeOp::CreateTable(op) => create_table(kind, op, &mut out)
                .with_context(|| format!("could not create table {:?}", op.entity.name)),
            ChangeOp::DropTable(op) => drop_table(kind, op, &mut out)
                .with_context(|| format!("could not drop table {:?}", op.table_name)),
            ChangeOp::AddColumn(op) => add_column(kind, op, &mut out)
                .with_context(|| format!("could not add column {:?} to table {:?}",
                    op.field.name, op.table_name)),
            ChangeOp::DropColumn(op) => drop_column(kind, op, &mut out)
                .with_context(|| format!("could not drop column {:?} from table {:?}",
                    op.col_name, op.table_name)),
            ChangeOp::AlterColumn(op) => alter_column(kind, op, target, &mut out)
                .with_context(|| format!("could not alter column {:?} of table {:?}",
                    op.new_field.name, op.table_name)),
            ChangeOp::CreateIndex(op) => create_index(kind, op, &mut out)
                .with_context(|| format!("could not create index {:?} on table {:?}",
                    op.index.name, op.table_name)),
            ChangeOp::DropIndex(op) => drop_index(kind, op, &mut out)
                .with_context(|| format!("could not drop index {:?}", op.index_name)),
            ChangeOp::AddForeignKey(op) => add_foreign_key(kind, op, &mut out)
                .with_context(|| format!("could not add foreign key {:?} to table {:?}",
                    op.foreign_key.name, op.table_name)),
            ChangeOp::DropForeignKey(op) => drop_foreign_key(kind, op, &mut out)
                .with_context(|| format!("could not drop foreign key {:?} from table {:?}",
                    op.fk_name, op.table_name)),
        }?;
    }
    Ok(out)
}

fn push_sql<F>(kind: AnyKind, out: &mut Vec<Command>, f: F) -> Result<()>
    where F: FnOnce(&mut SqlWriter) -> Result<()>
{
    let mut sql = SqlWriter::new(kind);
    f(&mut sql)?;
    out.push(Command { sql: sql.build() });
    Ok(())
}

//
// tables
//

fn create_table(kind: AnyKind, op: &plan::CreateTable, out: &mut Vec<Command>) -> Result<()> {
    let entity = &op.entity;
    push_sql(kind, out, |sql| {
        sql.write("CREATE TABLE ");
        sql.write(&Name(&entity.name));
        sql.write(" (");

        for (i, field) in entity.fields.values().enumerate() {
            if i != 0 {
                sql.write(", ");
            }
            write_col(sql, field)?;
        }

        sql.write(", PRIMARY KEY ");
        sql.write_names(&entity.primary_key);

        for fk in entity.foreign_keys.values() {
            sql.write(", ");
            write_fk_constraint(sql, fk);
        }

        sql.write(")");
        Ok(())
    })
}

fn drop_table(kind: AnyKind, op: &plan::DropTable, out: &mut Vec<Command>) -> Result<()> {
    push_sql(kind, out, |sql| {
        sql.write("DROP TABLE ");
        sql.write(&Name(&op.table_name));
        Ok(())
    })
}

//
// columns
//

fn add_column(kind: AnyKind, op: &plan::AddColumn, out: &mut Vec<Command>) -> Result<()> {
    push_sql(kind, out, |sql| {
        sql.write("ALTER TABLE ");
        sql.write(&Name(&op.table_name));
        sql.write(" ADD COLUMN ");
        write_col(sql, &op.field)
    })
}

fn drop_column(kind: AnyKind, op: &plan::DropColumn, out: &mut Vec<Command>) -> Result<()> {
    push_sql(kind, out, |sql| {
        sql.write("ALTER TABLE ");
        sql.write(&Name(&op.table_name));
        sql.write(" DROP COLUMN ");
        sql.write(&Name(&op.col_name));
        Ok(())
    })
}

fn alter_column(
    kind: AnyKind,
    op: &plan::AlterColumn,
    target: &schema::Schema,
    out: &mut Vec<Command>,
) -> Result<()> {
    match kind {
        AnyKind::Postgres => alter_column_postgres(op, out),
        AnyKind::Sqlite => alter_column_sqlite(op, target, out),
    }
}

fn alter_column_postgres(op: &plan::AlterColumn, out: &mut Vec<Command>) -> Result<()> {
    let (old_field, new_field) = (&op.old_field, &op.new_field);
    let type_changed = old_field.type_ != new_field.type_;
    let default_changed = old_field.default != new_field.default;

    // the old default may not be convertible to the new type
    if old_field.default.is_some() && (type_changed || default_changed) {
        alter(op, out, |sql| {
            sql.write("DROP DEFAULT");
            Ok(())
        })?;
    }

    if type_changed {
        let type_name = repr::column_type(new_field.type_, AnyKind::Postgres);
        alter(op, out, |sql| {
            sql.write("TYPE ");
            sql.write(type_name);
            sql.write(" USING ");
            sql.write(&Name(&new_field.name));
            sql.write("::");
            sql.write(type_name);
            Ok(())
        })?;
    }

    if let Some(default) = &new_field.default {
        if type_changed || default_changed {
            alter(op, out, |sql| {
                sql.write("SET DEFAULT ");
                repr::write_value(sql, new_field.type_, default)
            })?;
        }
    }

    if old_field.nullable != new_field.nullable {
        alter(op, out, |sql| {
            sql.write(if new_field.nullable { "DROP" } else { "SET" });
            sql.write(" NOT NULL");
            Ok(())
        })?;
    }

    Ok(())
}

fn alter<F>(op: &plan::AlterColumn, out: &mut Vec<Command>, f: F) -> Result<()>
    where F: FnOnce(&mut SqlWriter) -> Result<()>
{
    push_sql(AnyKind::Postgres, out, |sql| {
        sql.write("ALTER TABLE ");
        sql.write(&Name(&op.table_name));
        sql.write(" ALTER COLUMN ");
        sql.write(&Name(&op.new_field.name));
        sql.write(" ");
        f(sql)
    })
}

/// SQLite cannot alter a column in place, so the column is rebuilt: a new column is added, values
/// are copied into it, the old column is dropped and the new one takes its name.
fn alter_column_sqlite(
    op: &plan::AlterColumn,
    target: &schema::Schema,
    out: &mut Vec<Command>,
) -> Result<()> {
    let new_field = &op.new_field;
    if !new_field.nullable && new_field.default.is_none() {
        bail!("SQLite cannot make an existing column required without a default value");
    }
    let in_primary_key = target.entities.get(&op.table_name)
        .map_or(false, |entity| entity.primary_key.contains(&new_field.name));
    if in_primary_key {
        bail!("SQLite cannot alter a primary key column");
    }
    if is_in_foreign_key(target, &op.table_name, &new_field.name) {
        bail!("SQLite cannot alter a column that takes part in a foreign key");
    }

    let tmp_col = schema::Field {
        name: format!("__tmp_{}", new_field.name),
        ..(**new_field).clone()
    };

    // 1. create the new column
    push_sql(AnyKind::Sqlite, out, |sql| {
        sql.write("ALTER TABLE ");
        sql.write(&Name(&op.table_name));
        sql.write(" ADD COLUMN ");
        write_col(sql, &tmp_col)
    })?;

    // 2. copy values from the old column to the new column
    push_sql(AnyKind::Sqlite, out, |sql| {
        sql.write("UPDATE ");
        sql.write(&Name(&op.table_name));
        sql.write(" SET ");
        sql.write(&Name(&tmp_col.name));
        sql.write(" = ");
        if op.old_field.type_ == new_field.type_ {
            sql.write(&Name(&new_field.name));
        } else {
            sql.write("CAST(");
            sql.write(&Name(&new_field.name));
            sql.write(" AS ");
            sql.write(repr::column_type(new_field.type_, AnyKind::Sqlite));
            sql.write(")");
        }
        Ok(())
    })?;

    // 3. drop the old column
    push_sql(AnyKind::Sqlite, out, |sql| {
        sql.write("ALTER TABLE ");
        sql.write(&Name(&op.table_name));
        sql.write(" DROP COLUMN ");
        sql.write(&Name(&new_field.name));
        Ok(())
    })?;

    // 4. rename the new column
    push_sql(AnyKind::Sqlite, out, |sql| {
        sql.write("ALTER TABLE ");
        sql.write(&Name(&op.table_name));
        sql.write(" RENAME COLUMN ");
        sql.write(&Name(&tmp_col.name));
        sql.write(" TO ");
        sql.write(&Name(&new_field.name));
        Ok(())
    })
}

fn is_in_foreign_key(target: &schema::Schema, table_name: &str, col_name: &str) -> bool {
    target.entities.values().any(|entity| {
        entity.foreign_keys.values().any(|fk| {
            (entity.name == table_name && fk.columns.iter().any(|c| c == col_name))
                || (fk.referenced_table == table_name && fk.referenced_columns.iter().any(|c| c == col_name))
        })
    })
}

//
// indexes
//

fn create_index(kind: AnyKind, op: &plan::CreateIndex, out: &mut Vec<Command>) -> Result<()> {
    push_sql(kind, out, |sql| {
        sql.write(if op.index.unique { "CREATE UNIQUE INDEX " } else { "CREATE INDEX " });
        sql.write(&Name(&op.index.name));
        sql.write(" ON ");
        sql.write(&Name(&op.table_name));
        sql.write(" ");
        sql.write_names(&op.index.columns);
        Ok(())
    })
}

fn drop_index(kind: AnyKind, op: &plan::DropIndex, out: &mut Vec<Command>) -> Result<()> {
    push_sql(kind, out, |sql| {
        sql.write("DROP INDEX ");
        sql.write(&Name(&op.index_name));
        Ok(())
    })
}

//
// foreign keys
//

fn add_foreign_key(kind: AnyKind, op: &plan::AddForeignKey, out: &mut Vec<Command>) -> Result<()> {
    if kind == AnyKind::Sqlite {
        bail!("SQLite cannot add a foreign key to an existing table");
    }
    push_sql(kind, out, |sql| {
        sql.write("ALTER TABLE ");
        sql.write(&Name(&op.table_name));
        sql.write(" ADD ");
        write_fk_constraint(sql, &op.foreign_key);
        Ok(())
    })
}

fn drop_foreign_key(kind: AnyKind, op: &plan::DropForeignKey, out: &mut Vec<Command>) -> Result<()> {
    if kind == AnyKind::Sqlite {
        bail!("SQLite cannot drop a foreign key from an existing table");
    }
    push_sql(kind, out, |sql| {
        sql.write("ALTER TABLE ");
        sql.write(&Name(&op.table_name));
        sql.write(" DROP CONSTRAINT ");
        sql.write(&Name(&op.fk_name));
        Ok(())
    })
}

fn write_col(sql: &mut SqlWriter, field: &schema::Field) -> Result<()> {
    sql.write(&Name(&field.name));
    sql.write(" ");
    sql.write(repr::column_type(field.type_, sql.kind()));
    if !field.nullable {
        sql.write(" NOT NULL");
    }
    if let Some(default) = &field.default {
        sql.write(" DEFAULT ");
        repr::write_value(sql, field.type_, default)
            .context("could not encode the default value")?;
    }
    Ok(())
}

fn write_fk_constraint(sql: &mut SqlWriter, fk: &schema::ForeignKey) {
    sql.write("CONSTRAINT ");
    sql.write(&Name(&fk.name));
    sql.write(" FOREIGN KEY ");
    sql.write_names(&fk.columns);
    sql.write(" REFERENCES ");
    sql.write(&Name(&fk.referenced_table));
    sql.write(" ");
    sql.write_names(&fk.referenced_columns);
    sql.write(" ON DELETE ");
    sql.write(repr::referential_action(fk.on_delete));
}
