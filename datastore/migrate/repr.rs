use anyhow::{Result, bail, ensure};
use automigrate_snapshot::schema::{FieldType, ReferentialAction, Value};
use sqlx::any::AnyKind;
use crate::sql_writer::SqlWriter;

/// SQL type of the column that stores a field of given type.
pub fn column_type(type_: FieldType, kind: AnyKind) -> &'static str {
    match kind {
        AnyKind::Postgres => match type_ {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::BigInt => "bigint",
            FieldType::Real => "double precision",
            FieldType::Boolean => "boolean",
            FieldType::Uuid => "uuid",
            FieldType::Timestamp => "timestamptz",
            FieldType::Json => "jsonb",
        },
        AnyKind::Sqlite => match type_ {
            FieldType::Text
                | FieldType::Uuid
                | FieldType::Timestamp
                | FieldType::Json
                => "TEXT",
            FieldType::Integer
                | FieldType::BigInt
                | FieldType::Boolean
                => "INTEGER",
            FieldType::Real => "REAL",
        },
    }
}

pub fn referential_action(action: ReferentialAction) -> &'static str {
    match action {
        ReferentialAction::NoAction => "NO ACTION",
        ReferentialAction::Restrict => "RESTRICT",
        ReferentialAction::Cascade => "CASCADE",
        ReferentialAction::SetNull => "SET NULL",
    }
}

/// Writes `value` as a constant that can be stored in a column of type `type_`.
pub fn write_value(sql: &mut SqlWriter, type_: FieldType, value: &Value) -> Result<()> {
    ensure!(value.fits(type_), "value {:?} cannot be stored in a column of type {:?}", value, type_);
    match value {
        Value::Null => sql.write("NULL"),
        Value::Boolean(value) => match (sql.kind(), value) {
            (AnyKind::Postgres, true) => sql.write("TRUE"),
            (AnyKind::Postgres, false) => sql.write("FALSE"),
            (AnyKind::Sqlite, true) => sql.write("1"),
            (AnyKind::Sqlite, false) => sql.write("0"),
        },
        Value::Integer(value) if type_ == FieldType::Real =>
            sql.write_literal_f64(*value as f64),
        Value::Integer(value) =>
            write!(sql, "{}", value),
        Value::Real(value) => {
            if !value.is_finite() {
                bail!("cannot store {} in SQL", value);
            }
            sql.write_literal_f64(*value)
        },
        Value::Text(value) =>
            sql.write_literal_str(value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(kind: AnyKind, type_: FieldType, value: Value) -> Result<String> {
        let mut sql = SqlWriter::new(kind);
        write_value(&mut sql, type_, &value)?;
        Ok(sql.build())
    }

    #[test]
    fn test_booleans() {
        assert_eq!(render(AnyKind::Sqlite, FieldType::Boolean, Value::Boolean(true)).unwrap(), "1");
        assert_eq!(render(AnyKind::Postgres, FieldType::Boolean, Value::Boolean(false)).unwrap(), "FALSE");
    }

    #[test]
    fn test_integer_in_real_column() {
        assert_eq!(render(AnyKind::Sqlite, FieldType::Real, Value::Integer(3)).unwrap(), "3.0");
    }

    #[test]
    fn test_mismatch() {
        assert!(render(AnyKind::Sqlite, FieldType::Integer, Value::Text("1".into())).is_err());
    }

    #[test]
    fn test_types_differ_per_engine() {
        assert_eq!(column_type(FieldType::Json, AnyKind::Postgres), "jsonb");
        assert_eq!(column_type(FieldType::Json, AnyKind::Sqlite), "TEXT");
    }
}
