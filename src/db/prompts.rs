// src/db/prompts.rs
// Prompt archive: named, reusable prompts for the grid form

use super::{Result, SharedConnection, StoreError};
use chrono::Utc;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub uuid: String,
    pub name: String,
    pub slug: String,
    pub prompt: String,
    /// Unix timestamp
    pub date_created: i64,
    /// Unix timestamp
    pub last_modified: i64,
}

impl Prompt {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            prompt: row.get(3)?,
            date_created: row.get(4)?,
            last_modified: row.get(5)?,
        })
    }
}

/// Fields a client may set. The UUID is generated on create when omitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptInput {
    #[serde(default)]
    pub uuid: Option<String>,
    pub name: String,
    pub slug: String,
    pub prompt: String,
}

impl PromptInput {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Validation("prompt name is required".into()));
        }
        if self.slug.trim().is_empty() {
            return Err(StoreError::Validation("prompt slug is required".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(StoreError::Validation("prompt text is required".into()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PromptStore {
    conn: SharedConnection,
}

impl PromptStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub fn create(&self, input: PromptInput) -> Result<Prompt> {
        input.validate()?;
        let now = Utc::now().timestamp();
        let prompt = Prompt {
            uuid: input
                .uuid
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: input.name,
            slug: input.slug,
            prompt: input.prompt,
            date_created: now,
            last_modified: now,
        };

        self.conn.lock().execute(
            "INSERT INTO prompts (uuid, name, slug, prompt, date_created, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                prompt.uuid,
                prompt.name,
                prompt.slug,
                prompt.prompt,
                prompt.date_created,
                prompt.last_modified
            ],
        )?;

        info!(uuid = %prompt.uuid, name = %prompt.name, "Created prompt");
        Ok(prompt)
    }

    pub fn update(&self, uuid: &str, input: PromptInput) -> Result<Prompt> {
        input.validate()?;
        let now = Utc::now().timestamp();
        let conn = self.conn.lock();

        let updated = conn.execute(
            "UPDATE prompts SET name = ?1, slug = ?2, prompt = ?3, last_modified = ?4
             WHERE uuid = ?5",
            params![input.name, input.slug, input.prompt, now, uuid],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("prompt {uuid}")));
        }

        let prompt = conn.query_row(
            "SELECT uuid, name, slug, prompt, date_created, last_modified
             FROM prompts WHERE uuid = ?1",
            [uuid],
            Prompt::from_row,
        )?;
        info!(uuid = %uuid, "Updated prompt");
        Ok(prompt)
    }

    /// All prompts ordered by name, case-insensitively.
    pub fn list(&self) -> Result<Vec<Prompt>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, name, slug, prompt, date_created, last_modified
             FROM prompts ORDER BY lower(name) ASC",
        )?;
        let prompts = stmt
            .query_map([], Prompt::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(prompts)
    }

    pub fn delete(&self, uuid: &str) -> Result<()> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM prompts WHERE uuid = ?1", [uuid])?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("prompt {uuid}")));
        }
        info!(uuid = %uuid, "Deleted prompt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema_init::SchemaInitializer;
    use crate::db::shared;

    fn store() -> PromptStore {
        PromptStore::new(shared(SchemaInitializer::open_in_memory().unwrap()))
    }

    fn input(name: &str, slug: &str) -> PromptInput {
        PromptInput {
            uuid: None,
            name: name.to_string(),
            slug: slug.to_string(),
            prompt: format!("Tell me about {name}"),
        }
    }

    #[test]
    fn test_create_and_list_sorted_by_name() {
        let store = store();
        store.create(input("zebra", "zebra")).unwrap();
        store.create(input("Apple", "apple")).unwrap();
        store.create(input("mango", "mango")).unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Apple", "mango", "zebra"]);
    }

    #[test]
    fn test_duplicate_slug_is_conflict() {
        let store = store();
        store.create(input("one", "same")).unwrap();
        let err = store.create(input("two", "same")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_update_and_delete() {
        let store = store();
        let created = store.create(input("draft", "draft")).unwrap();

        let updated = store
            .update(
                &created.uuid,
                PromptInput {
                    prompt: "Rewritten".into(),
                    ..input("final", "final")
                },
            )
            .unwrap();
        assert_eq!(updated.name, "final");
        assert_eq!(updated.prompt, "Rewritten");
        assert_eq!(updated.date_created, created.date_created);

        store.delete(&created.uuid).unwrap();
        assert!(matches!(
            store.delete(&created.uuid),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update("missing", input("x", "x")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_blank_fields_rejected() {
        let store = store();
        let err = store.create(input(" ", "slug")).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
