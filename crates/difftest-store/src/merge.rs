//! Merge Engine (C9): deterministically union N store files into one.
//!
//! Inputs are opened read-only and processed strictly in the order given on
//! the command line; later inputs win ties on `(environment, test_name)`.
//! Fingerprint identity (`filename`, `fsha`, `method_checksums`) is deduped
//! by the output store's own uniqueness constraint, so merge is associative
//! up to that tie-break rule.

use std::collections::HashMap;
use std::path::Path;

use difftest_core::Fingerprint;
use rusqlite::{Connection, OpenFlags};

use crate::error::Result;
use crate::model::unpack_checksums;
use crate::store::{PendingExecution, Store};

/// Merge `inputs` (processed in order) into a fresh or existing store at
/// `output_path`.
pub fn merge(output_path: &Path, inputs: &[&Path]) -> Result<()> {
    let output = Store::open(output_path)?;
    for input_path in inputs {
        merge_one(&output, input_path)?;
    }
    Ok(())
}

fn merge_one(output: &Store, input_path: &Path) -> Result<()> {
    let input = Connection::open_with_flags(input_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let mut env_map: HashMap<i64, i64> = HashMap::new();
    {
        let mut stmt = input.prepare(
            "SELECT id, environment_name, system_packages, python_version FROM environment",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (old_id, name, packages, py) = row?;
            let new_id = output.get_or_create_environment(&name, &packages, &py)?;
            env_map.insert(old_id, new_id);
        }
    }

    let mut fp_map: HashMap<i64, i64> = HashMap::new();
    {
        let mut stmt =
            input.prepare("SELECT id, filename, method_checksums, mtime, fsha FROM file_fp")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        for row in rows {
            let (old_id, filename, blob, mtime, fsha) = row?;
            let method_checksums = unpack_checksums(&blob, old_id)?;
            let fp = Fingerprint {
                filename,
                content_hash: fsha,
                mtime,
                method_checksums,
                blocks: Vec::new(),
            };
            let new_id = output.upsert_fingerprint(&fp)?;
            fp_map.insert(old_id, new_id);
        }
    }

    let mut stmt = input.prepare(
        "SELECT id, environment_id, test_name, duration, failed, forced FROM test_execution",
    )?;
    let executions = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, i64>(4)? != 0,
            row.get::<_, i64>(5)? != 0,
        ))
    })?;

    let mut junction_stmt =
        input.prepare("SELECT fingerprint_id FROM test_execution_file_fp WHERE test_execution_id = ?1")?;

    for execution in executions {
        let (old_exec_id, old_env_id, test_name, duration, failed, forced) = execution?;
        let Some(&new_env_id) = env_map.get(&old_env_id) else {
            tracing::warn!(test_name = %test_name, "skipping execution row with unknown environment");
            continue;
        };

        let old_fp_ids: Vec<i64> = junction_stmt
            .query_map([old_exec_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let fingerprints: Vec<Fingerprint> = old_fp_ids
            .iter()
            .filter_map(|old_fp_id| fp_map.get(old_fp_id))
            .filter_map(|&new_fp_id| fingerprint_by_id(output, new_fp_id).ok().flatten())
            .collect();

        let batch = [PendingExecution {
            test_name,
            duration,
            failed,
            forced,
            fingerprints: &fingerprints,
        }];
        output.save_test_executions_batch(new_env_id, &batch)?;
    }

    Ok(())
}

fn fingerprint_by_id(store: &Store, id: i64) -> Result<Option<Fingerprint>> {
    // The output store was just upserted with this row in this same merge
    // pass, so a lookup by filename covers it; fingerprints are addressed
    // by identity, not surrogate id, once they cross a store boundary.
    let row = store.fingerprint_row_by_id(id)?;
    Ok(row.map(|row| Fingerprint {
        filename: row.filename,
        content_hash: row.content_hash,
        mtime: row.mtime,
        method_checksums: row.method_checksums,
        blocks: Vec::new(),
    }))
}
