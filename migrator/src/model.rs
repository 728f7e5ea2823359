// SPDX-FileCopyrightText: © 2022 ChiselStrike <info@chiselstrike.com>

use anyhow::{Result, Context};
use automigrate_snapshot::schema::Schema;
use std::ffi::OsStr;
use std::path::Path;

/// Reads the model of the application. Files ending in `.yaml` or `.yml` are parsed as YAML,
/// everything else as JSON.
pub async fn read_model(path: &Path) -> Result<Schema> {
    let text = tokio::fs::read_to_string(path).await
        .with_context(|| format!("could not read model file {}", path.display()))?;
    let is_yaml = matches!(path.extension().and_then(OsStr::to_str), Some("yaml" | "yml"));
    let schema: Schema = if is_yaml {
        serde_yaml::from_str(&text)
            .with_context(|| format!("could not parse YAML model {}", path.display()))?
    } else {
        serde_json::from_str(&text)
            .with_context(|| format!("could not parse JSON model {}", path.display()))?
    };
    schema.validate()
        .with_context(|| format!("invalid model in {}", path.display()))?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use automigrate_snapshot::schema::FieldType;

    #[tokio::test]
    async fn test_yaml_and_json_agree() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("model.yaml");
        let json_path = dir.path().join("model.json");
        std::fs::write(&yaml_path, r#"
entities:
  - name: books
    primaryKey: [isbn]
    fields:
      - { name: isbn, type: text }
      - { name: pages, type: integer, nullable: true }
"#).unwrap();
        std::fs::write(&json_path, r#"{"entities": [{
            "name": "books",
            "primaryKey": ["isbn"],
            "fields": [
                {"name": "isbn", "type": "text"},
                {"name": "pages", "type": "integer", "nullable": true}
            ]
        }]}"#).unwrap();

        let from_yaml = read_model(&yaml_path).await.unwrap();
        let from_json = read_model(&json_path).await.unwrap();
        assert_eq!(from_yaml, from_json);
        assert_eq!(from_yaml.entities["books"].fields["pages"].type_, FieldType::Integer);
    }

    #[tokio::test]
    async fn test_invalid_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"entities": [{"name": "t", "primaryKey": ["missing"], "fields": []}]}"#)
            .unwrap();
        assert!(read_model(&path).await.is_err());
    }
}
