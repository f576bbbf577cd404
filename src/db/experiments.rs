// src/db/experiments.rs
// Persisted experiment logs, one row per experiment UUID

use super::{Result, SharedConnection, StoreError};
use crate::backend::InferenceResult;
use crate::db::settings::AppSettings;
use crate::experiment_log::ExperimentLog;
use crate::grid::ParamIteration;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Deletes every stored experiment when passed to [`ExperimentStore::delete`].
pub const DELETE_ALL: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentFile {
    pub name: String,
    /// RFC 3339 timestamp of the first logged inference.
    pub created: String,
    /// The experiment log as a JSON document.
    pub contents: String,
}

#[derive(Clone)]
pub struct ExperimentStore {
    conn: SharedConnection,
}

impl ExperimentStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Append one successful inference to the log of its experiment, creating
    /// the log on first use.
    pub fn log_inference(
        &self,
        settings: &AppSettings,
        params: &ParamIteration,
        result: &InferenceResult,
    ) -> Result<()> {
        let uuid = params.experiment_uuid.as_str();
        let conn = self.conn.lock();

        let existing: Option<String> = conn
            .query_row(
                "SELECT contents FROM experiments WHERE experiment_uuid = ?1",
                [uuid],
                |row| row.get(0),
            )
            .optional()?;

        let mut log = match existing {
            Some(doc) => ExperimentLog::from_json_str(&doc)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?,
            None => ExperimentLog::new(uuid, settings),
        };
        log.push(params, result);
        let contents = log
            .to_json_string()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO experiments (experiment_uuid, name, created, contents)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(experiment_uuid) DO UPDATE SET contents = excluded.contents",
            params![uuid, format!("{uuid}.json"), Utc::now().to_rfc3339(), contents],
        )?;

        debug!(
            experiment_uuid = %uuid,
            inferences = log.inferences.len(),
            "Experiment logged"
        );
        Ok(())
    }

    pub fn get(&self, uuid: &str) -> Result<Option<ExperimentFile>> {
        let conn = self.conn.lock();
        let file = conn
            .query_row(
                "SELECT name, created, contents FROM experiments WHERE experiment_uuid = ?1",
                [uuid],
                |row| {
                    Ok(ExperimentFile {
                        name: row.get(0)?,
                        created: row.get(1)?,
                        contents: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(file)
    }

    /// All stored experiments, newest first.
    pub fn list(&self) -> Result<Vec<ExperimentFile>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name, created, contents FROM experiments ORDER BY id DESC")?;

        let files = stmt
            .query_map([], |row| {
                Ok(ExperimentFile {
                    name: row.get(0)?,
                    created: row.get(1)?,
                    contents: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Delete one experiment by UUID, or all of them with [`DELETE_ALL`].
    /// Returns the number of rows removed.
    pub fn delete(&self, uuid: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = if uuid == DELETE_ALL {
            conn.execute("DELETE FROM experiments", [])?
        } else {
            conn.execute("DELETE FROM experiments WHERE experiment_uuid = ?1", [uuid])?
        };

        if removed == 0 && uuid != DELETE_ALL {
            return Err(StoreError::NotFound(format!("experiment {uuid}")));
        }
        info!(uuid = %uuid, removed, "Deleted experiments");
        Ok(removed)
    }
}
