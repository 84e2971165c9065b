mod error;
mod models;

pub use error::{DbError, Result};
pub use models::ServerRecord;

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

const SELECT_SERVER: &str =
  "SELECT id, guild_id, remote, label, inserted_at, updated_at FROM servers";

/// Database wrapper for watched server registrations.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                conn.pragma_update(None, "journal_mode", "WAL")?;

                conn.execute_batch(
                    r#"
                    -- Watched game servers, one row per remote endpoint
                    CREATE TABLE IF NOT EXISTS servers (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        guild_id INTEGER NOT NULL,
                        remote TEXT NOT NULL UNIQUE,
                        label TEXT,
                        inserted_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_servers_guild ON servers(guild_id);
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  /// Register a new server.
  /// Returns an error if the remote is already registered.
  pub async fn create_server(
    &self,
    guild_id: u64,
    remote: String,
    label: Option<String>,
    now: i64,
  ) -> Result<ServerRecord> {
    let record = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let exists: bool = tx
                    .prepare_cached("SELECT EXISTS(SELECT 1 FROM servers WHERE remote = ?1)")?
                    .query_row(params![&remote], |row| row.get(0))?;

                if exists {
                    return Ok(Err(DbError::DuplicateRemote));
                }

                tx.prepare_cached(
                    "INSERT INTO servers (guild_id, remote, label, inserted_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                )?
                    .execute(params![guild_id, &remote, &label, now])?;
                let id = tx.last_insert_rowid();

                tx.commit()?;
                Ok(Ok(ServerRecord {
                    id,
                    guild_id,
                    remote,
                    label,
                    inserted_at: now,
                    updated_at: now,
                }))
            })
            .await??;

    debug!(record.id, record.guild_id, %record.remote, "created server");
    Ok(record)
  }

  /// Get a server by id.
  pub async fn get_server(&self, id: i64) -> Result<Option<ServerRecord>> {
    let record = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(&format!("{SELECT_SERVER} WHERE id = ?1"))?
          .query_row(params![id], read_record)
          .optional()
      })
      .await?;

    Ok(record)
  }

  /// Get every registered server, oldest first.
  pub async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
    let records = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(&format!("{SELECT_SERVER} ORDER BY id"))?;

        let records = stmt
          .query_map([], read_record)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
      })
      .await?;

    Ok(records)
  }

  /// Get all servers for a guild, oldest first.
  pub async fn get_servers_by_guild(&self, guild_id: u64) -> Result<Vec<ServerRecord>> {
    let records = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare_cached(&format!("{SELECT_SERVER} WHERE guild_id = ?1 ORDER BY id"))?;

        let records = stmt
          .query_map(params![guild_id], read_record)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
      })
      .await?;

    Ok(records)
  }

  /// Change the label of a server.
  pub async fn update_label(&self, id: i64, label: Option<String>, now: i64) -> Result<()> {
    let result = self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached("UPDATE servers SET label = ?1, updated_at = ?2 WHERE id = ?3")?
          .execute(params![&label, now, id])?;

        if updated == 0 {
          return Ok(Err(DbError::ServerNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(id, "updated server label");
    Ok(result)
  }

  /// Delete a server by id.
  pub async fn delete_server(&self, id: i64) -> Result<()> {
    let result = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM servers WHERE id = ?1")?
          .execute(params![id])?;

        if deleted == 0 {
          return Ok(Err(DbError::ServerNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(id, "deleted server");
    Ok(result)
  }
}

fn read_record(row: &Row<'_>) -> tokio_rusqlite::rusqlite::Result<ServerRecord> {
  Ok(ServerRecord {
    id: row.get(0)?,
    guild_id: row.get(1)?,
    remote: row.get(2)?,
    label: row.get(3)?,
    inserted_at: row.get(4)?,
    updated_at: row.get(5)?,
  })
}
