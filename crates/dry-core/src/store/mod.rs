//! SQLite persistence for units and tracked files.
//!
//! The store lives at `<repo>/.dry/index.db` and holds two tables: `units`
//! (primary key: derived unit id) and `files` (primary key: repo-relative
//! path). Embedding vectors are bincode-encoded `Vec<f32>` blobs.
//!
//! ## Concurrency
//!
//! SQLite runs in WAL mode. The orchestrator is the single writer per repo;
//! all mutation goes through this struct's API.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{DryError, DryResult};
use crate::types::{IndexUnit, TrackedFile, UnitType};

/// SQLite-backed unit and tracked-file store.
#[derive(Debug)]
pub struct UnitStore {
    conn: Option<Connection>,
    db_path: PathBuf,
}

impl UnitStore {
    /// Open or create the store at the given database path. Idempotent.
    pub fn open(db_path: &Path) -> DryResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Some(conn),
            db_path: db_path.to_path_buf(),
        })
    }

    /// Whether the store currently holds an open connection.
    pub fn is_initialized(&self) -> bool {
        self.conn.is_some()
    }

    /// Release the database handle. Further calls fail with a store error.
    pub fn close(&mut self) {
        self.conn = None;
    }

    /// Path of the backing database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> DryResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DryError::Internal("store is closed".into()))
    }

    // -- units --------------------------------------------------------------

    /// Upsert a single unit by id.
    pub fn save_unit(&self, unit: &IndexUnit) -> DryResult<()> {
        self.save_units(std::slice::from_ref(unit))
    }

    /// Upsert units by id in one transaction.
    pub fn save_units(&self, units: &[IndexUnit]) -> DryResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN")?;
        let result = (|| -> DryResult<()> {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO units (id, name, file_path, start_line, end_line, code, unit_type, parent_id, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     file_path = excluded.file_path,
                     start_line = excluded.start_line,
                     end_line = excluded.end_line,
                     code = excluded.code,
                     unit_type = excluded.unit_type,
                     parent_id = excluded.parent_id,
                     embedding = excluded.embedding",
            )?;
            for unit in units {
                stmt.execute(params![
                    unit.id,
                    unit.name,
                    unit.file_path,
                    unit.start_line,
                    unit.end_line,
                    unit.code,
                    unit.unit_type.as_str(),
                    unit.parent_id,
                    encode_embedding(unit.embedding.as_deref())?,
                ])?;
            }
            Ok(())
        })();
        finish_transaction(conn, result)
    }

    /// Update already-persisted units (same statement as upsert).
    pub fn update_units(&self, units: &[IndexUnit]) -> DryResult<()> {
        self.save_units(units)
    }

    /// Load one unit by id.
    pub fn get_unit(&self, id: &str) -> DryResult<Option<IndexUnit>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, file_path, start_line, end_line, code, unit_type, parent_id, embedding
             FROM units WHERE id = ?1",
        )?;
        let unit = stmt
            .query_row(params![id], row_to_unit)
            .optional()?;
        Ok(unit)
    }

    /// Load every unit in the store.
    pub fn get_all_units(&self) -> DryResult<Vec<IndexUnit>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, file_path, start_line, end_line, code, unit_type, parent_id, embedding
             FROM units ORDER BY id",
        )?;
        let units = stmt
            .query_map([], row_to_unit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    /// Load every unit belonging to the given files.
    pub fn get_units_by_file_paths(&self, paths: &[String]) -> DryResult<Vec<IndexUnit>> {
        let mut units = Vec::new();
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, file_path, start_line, end_line, code, unit_type, parent_id, embedding
             FROM units WHERE file_path = ?1 ORDER BY id",
        )?;
        for path in paths {
            let rows = stmt
                .query_map(params![path], row_to_unit)?
                .collect::<Result<Vec<_>, _>>()?;
            units.extend(rows);
        }
        Ok(units)
    }

    /// Count all units.
    pub fn count_units(&self) -> DryResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM units", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove every unit whose file path appears in the list.
    pub fn remove_units_by_file_paths(&self, paths: &[String]) -> DryResult<usize> {
        let conn = self.conn()?;
        let mut removed = 0usize;
        let mut stmt = conn.prepare_cached("DELETE FROM units WHERE file_path = ?1")?;
        for path in paths {
            removed += stmt.execute(params![path])?;
        }
        Ok(removed)
    }

    // -- tracked files ------------------------------------------------------

    /// Upsert tracked-file rows.
    pub fn save_files(&self, files: &[TrackedFile]) -> DryResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN")?;
        let result = (|| -> DryResult<()> {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO files (file_path, checksum, mtime) VALUES (?1, ?2, ?3)
                 ON CONFLICT(file_path) DO UPDATE SET
                     checksum = excluded.checksum,
                     mtime = excluded.mtime",
            )?;
            for file in files {
                stmt.execute(params![file.file_path, file.checksum, file.mtime])?;
            }
            Ok(())
        })();
        finish_transaction(conn, result)
    }

    /// Load one tracked file by path.
    pub fn get_file(&self, file_path: &str) -> DryResult<Option<TrackedFile>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT file_path, checksum, mtime FROM files WHERE file_path = ?1")?;
        let file = stmt
            .query_row(params![file_path], row_to_file)
            .optional()?;
        Ok(file)
    }

    /// Load every tracked file.
    pub fn get_all_files(&self) -> DryResult<Vec<TrackedFile>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT file_path, checksum, mtime FROM files ORDER BY file_path")?;
        let files = stmt
            .query_map([], row_to_file)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Remove tracked-file rows by path.
    pub fn remove_files_by_file_paths(&self, paths: &[String]) -> DryResult<usize> {
        let conn = self.conn()?;
        let mut removed = 0usize;
        let mut stmt = conn.prepare_cached("DELETE FROM files WHERE file_path = ?1")?;
        for path in paths {
            removed += stmt.execute(params![path])?;
        }
        Ok(removed)
    }
}

fn finish_transaction(conn: &Connection, result: DryResult<()>) -> DryResult<()> {
    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

fn encode_embedding(embedding: Option<&[f32]>) -> DryResult<Option<Vec<u8>>> {
    embedding
        .map(|v| bincode::serialize(v).map_err(|e| DryError::Serialization(e.to_string())))
        .transpose()
}

fn decode_embedding(blob: Option<Vec<u8>>) -> Option<Vec<f32>> {
    blob.and_then(|bytes| bincode::deserialize(&bytes).ok())
}

fn row_to_unit(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexUnit> {
    let type_str: String = row.get(6)?;
    let unit_type = UnitType::parse(&type_str).unwrap_or(UnitType::Block);
    let blob: Option<Vec<u8>> = row.get(8)?;
    Ok(IndexUnit {
        id: row.get(0)?,
        name: row.get(1)?,
        file_path: row.get(2)?,
        start_line: row.get(3)?,
        end_line: row.get(4)?,
        code: row.get(5)?,
        unit_type,
        parent_id: row.get(7)?,
        embedding: decode_embedding(blob),
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedFile> {
    Ok(TrackedFile {
        file_path: row.get(0)?,
        checksum: row.get(1)?,
        mtime: row.get(2)?,
    })
}
