//! The Dependency Store (C5): CRUD for environments, test executions, file
//! fingerprints, and the Affected-Test Resolver (C7) query.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use difftest_core::Fingerprint;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::model::{pack_checksums, unpack_checksums, FingerprintRow};
use crate::schema;

/// One pending `save_test_execution` call, as buffered by a caller batching
/// writes (the orchestrator, per `SPEC_FULL.md` §6.4).
pub struct PendingExecution<'a> {
    pub test_name: String,
    pub duration: Option<f64>,
    pub failed: bool,
    pub forced: bool,
    pub fingerprints: &'a [Fingerprint],
}

/// A single-file embedded relational store. The in-process `Mutex`
/// serializes writers across threads of this process; SQLite's own file
/// lock (via WAL + immediate-mode transactions) serializes writers across
/// processes sharing the same file.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = schema::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent: returns the existing row's id if one matches, else
    /// inserts and returns the new id.
    pub fn get_or_create_environment(
        &self,
        name: &str,
        system_packages: &str,
        python_version: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM environment WHERE environment_name = ?1 AND system_packages = ?2 AND python_version = ?3",
                params![name, system_packages, python_version],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO environment (environment_name, system_packages, python_version) VALUES (?1, ?2, ?3)",
            params![name, system_packages, python_version],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Commit a batch of pending executions inside a single immediate-lock
    /// transaction: per execution, delete the prior `(env, test_name)` row
    /// and its junctions, upsert each fingerprint, insert the new execution
    /// row, and insert the junction edges.
    pub fn save_test_executions_batch(
        &self,
        env_id: i64,
        batch: &[PendingExecution<'_>],
    ) -> Result<Vec<i64>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = schema::begin_immediate(&mut conn)
            .map_err(|e| self.map_contention(e))?;
        let mut exec_ids = Vec::with_capacity(batch.len());
        for item in batch {
            // Explicit, not just relying on `ON DELETE CASCADE`: belt and
            // suspenders against a connection where `PRAGMA foreign_keys`
            // didn't take, and against `test_execution.id` rowid reuse
            // (no AUTOINCREMENT) re-attaching a stale junction row to the
            // next execution inserted for this (env, test_name).
            tx.execute(
                "DELETE FROM test_execution_file_fp WHERE test_execution_id IN (
                     SELECT id FROM test_execution WHERE environment_id = ?1 AND test_name = ?2
                 )",
                params![env_id, item.test_name],
            )?;
            tx.execute(
                "DELETE FROM test_execution WHERE environment_id = ?1 AND test_name = ?2",
                params![env_id, item.test_name],
            )?;
            tx.execute(
                "INSERT INTO test_execution (environment_id, test_name, duration, failed, forced) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![env_id, item.test_name, item.duration, item.failed as i64, item.forced as i64],
            )?;
            let exec_id = tx.last_insert_rowid();
            exec_ids.push(exec_id);

            for fp in item.fingerprints {
                let fingerprint_id = upsert_fingerprint(&tx, fp)?;
                tx.execute(
                    "INSERT OR IGNORE INTO test_execution_file_fp (test_execution_id, fingerprint_id) VALUES (?1, ?2)",
                    params![exec_id, fingerprint_id],
                )?;
            }
            tracing::debug!(test_name = %item.test_name, fingerprints = item.fingerprints.len(), "recorded test execution");
        }
        tx.commit()?;
        Ok(exec_ids)
    }

    /// Convenience single-item form of [`Store::save_test_executions_batch`].
    pub fn save_test_execution(
        &self,
        env_id: i64,
        test_name: &str,
        duration: Option<f64>,
        failed: bool,
        forced: bool,
        fingerprints: &[Fingerprint],
    ) -> Result<i64> {
        let batch = [PendingExecution {
            test_name: test_name.to_string(),
            duration,
            failed,
            forced,
            fingerprints,
        }];
        let ids = self.save_test_executions_batch(env_id, &batch)?;
        Ok(ids[0])
    }

    /// C7: resolve the set of test names to re-run given the Change
    /// Detector's per-file changed-checksum sets, plus every currently
    /// failing test in this environment.
    pub fn get_affected_tests(
        &self,
        env_id: i64,
        changed: &HashMap<String, HashSet<i32>>,
    ) -> Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut affected = HashSet::new();

        if !changed.is_empty() {
            let filenames: Vec<&str> = changed.keys().map(|s| s.as_str()).collect();
            let placeholders = filenames.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!(
                "SELECT id, filename, method_checksums FROM file_fp WHERE filename IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&query)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(filenames.iter()),
                |row| {
                    let id: i64 = row.get(0)?;
                    let filename: String = row.get(1)?;
                    let blob: Vec<u8> = row.get(2)?;
                    Ok((id, filename, blob))
                },
            )?;

            let mut hit_fingerprint_ids = Vec::new();
            for row in rows {
                let (fingerprint_id, filename, blob) = row?;
                let checksums = unpack_checksums(&blob, fingerprint_id)?;
                let changed_set = changed.get(&filename).cloned().unwrap_or_default();
                if checksums.iter().any(|c| changed_set.contains(c)) {
                    hit_fingerprint_ids.push(fingerprint_id);
                }
            }

            if !hit_fingerprint_ids.is_empty() {
                let placeholders = hit_fingerprint_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let query = format!(
                    "SELECT DISTINCT te.test_name FROM test_execution te
                     JOIN test_execution_file_fp tefp ON tefp.test_execution_id = te.id
                     WHERE te.environment_id = ? AND tefp.fingerprint_id IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&query)?;
                let mut params: Vec<&dyn rusqlite::ToSql> = vec![&env_id];
                for id in &hit_fingerprint_ids {
                    params.push(id);
                }
                let rows = stmt.query_map(params.as_slice(), |row| row.get::<_, String>(0))?;
                for row in rows {
                    affected.insert(row?);
                }
            }
        }

        let mut stmt = conn.prepare(
            "SELECT test_name FROM test_execution WHERE environment_id = ?1 AND failed = 1",
        )?;
        let rows = stmt.query_map(params![env_id], |row| row.get::<_, String>(0))?;
        for row in rows {
            affected.insert(row?);
        }

        Ok(affected)
    }

    /// Every `test_name` with a current execution row in `env_id` — used by
    /// the orchestrator's "no prior row ⇒ select" rule.
    pub fn known_test_names(&self, env_id: i64) -> Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT test_name FROM test_execution WHERE environment_id = ?1")?;
        let rows = stmt.query_map(params![env_id], |row| row.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    /// Every distinct filename the store currently has fingerprints for —
    /// used by the change detector to enumerate its "stored side" input.
    pub fn all_filenames(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT filename FROM file_fp")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    /// Refresh `mtime` on every stored row for `filename`, used after a
    /// Level 2 content-hash match confirms the file is unchanged.
    pub fn touch_mtime(&self, filename: &str, mtime: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE file_fp SET mtime = ?1 WHERE filename = ?2",
            params![mtime, filename],
        )?;
        Ok(())
    }

    pub fn list_fingerprints_for_file(&self, filename: &str) -> Result<Vec<FingerprintRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, filename, method_checksums, mtime, fsha FROM file_fp WHERE filename = ?1",
        )?;
        let rows = stmt.query_map(params![filename], |row| {
            let id: i64 = row.get(0)?;
            let filename: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let mtime: f64 = row.get(3)?;
            let content_hash: String = row.get(4)?;
            Ok((id, filename, blob, mtime, content_hash))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, filename, blob, mtime, content_hash) = row?;
            out.push(FingerprintRow {
                id,
                filename,
                method_checksums: unpack_checksums(&blob, id)?,
                mtime,
                content_hash,
            });
        }
        Ok(out)
    }

    pub fn fingerprint_row_by_id(&self, id: i64) -> Result<Option<FingerprintRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, filename, method_checksums, mtime, fsha FROM file_fp WHERE id = ?1",
                params![id],
                |row| {
                    let id: i64 = row.get(0)?;
                    let filename: String = row.get(1)?;
                    let blob: Vec<u8> = row.get(2)?;
                    let mtime: f64 = row.get(3)?;
                    let content_hash: String = row.get(4)?;
                    Ok((id, filename, blob, mtime, content_hash))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((id, filename, blob, mtime, content_hash)) => Ok(Some(FingerprintRow {
                id,
                filename,
                method_checksums: unpack_checksums(&blob, id)?,
                mtime,
                content_hash,
            })),
        }
    }

    pub fn delete_fingerprints_for_file(&self, filename: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM file_fp WHERE filename = ?1", params![filename])?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT data FROM metadata WHERE dataid = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO metadata (dataid, data) VALUES (?1, ?2)
             ON CONFLICT(dataid) DO UPDATE SET data = excluded.data",
            params![key, value],
        )?;
        Ok(())
    }

    /// Upsert a single fingerprint outside of any caller-managed batch
    /// (used by the merge engine, which manages its own transaction scope
    /// per input file).
    pub fn upsert_fingerprint(&self, fp: &Fingerprint) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        upsert_fingerprint(&conn, fp)
    }

    fn map_contention(&self, err: rusqlite::Error) -> StoreError {
        StoreError::from_sqlite_contention(&self.path.display().to_string(), err)
    }
}

/// Upsert one fingerprint, returning its `file_fp.id`. Matches on the
/// `(filename, fsha, method_checksums)` uniqueness constraint; on conflict,
/// refreshes `mtime` (the file was touched but content is unchanged).
fn upsert_fingerprint(conn: &rusqlite::Connection, fp: &Fingerprint) -> Result<i64> {
    let blob = pack_checksums(&fp.method_checksums);
    let id: i64 = conn.query_row(
        "INSERT INTO file_fp (filename, method_checksums, mtime, fsha) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(filename, fsha, method_checksums) DO UPDATE SET mtime = excluded.mtime
         RETURNING id",
        params![fp.filename, blob, fp.mtime, fp.content_hash],
        |row| row.get(0),
    )?;
    Ok(id)
}
