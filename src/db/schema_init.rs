// grid-search/src/db/schema_init.rs
use crate::path_manager::PathManager;
use rusqlite::{Connection, Result as SqlResult};
use tracing::info;

pub const DB_NAME: &str = "grid_search";

pub struct SchemaInitializer;

impl SchemaInitializer {
    pub fn init(db_conn: &Connection) -> SqlResult<()> {
        info!("Initializing database schema");
        let schema_sql = include_str!("schema.sql");
        db_conn.execute_batch(schema_sql)?;
        info!("Database schema initialized");
        Ok(())
    }

    pub fn open(path_manager: &PathManager) -> SqlResult<Connection> {
        let db_path = path_manager.db_path(DB_NAME);
        info!("Opening database at: {}", db_path.display());
        let conn = Connection::open(&db_path)?;
        Self::init(&conn)?;
        Ok(conn)
    }

    pub fn open_in_memory() -> SqlResult<Connection> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(conn)
    }
}
