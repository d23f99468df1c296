//! End-to-end scenarios S1-S6 from `spec.md` §8, driven through the
//! runner-plugin facade the same way a host test runner would.

use std::collections::{HashMap, HashSet};
use std::fs;

use difftest_orchestrator::{flush, init_store, plan, record_result, Mode};
use tempfile::tempdir;

fn touched(filename: &str, lines: &[usize]) -> HashMap<String, Vec<usize>> {
    let mut map = HashMap::new();
    map.insert(filename.to_string(), lines.to_vec());
    map
}

#[test]
fn s1_baseline_then_incremental_with_no_changes_skips_everything() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("m.py"), "def f():\n    return 1\n").unwrap();
    fs::write(
        dir.path().join("test_m.py"),
        "from m import f\ndef test_f():\n    assert f() == 1\n",
    )
    .unwrap();

    let mut handle = init_store(dir.path(), &dir.path().join("store.db"), 100, "default", "", "3.11").unwrap();
    let collected = HashSet::from(["test_m.py::test_f".to_string()]);
    let baseline = plan(&handle, &collected, Mode::Baseline, false, &HashSet::new()).unwrap();
    assert_eq!(baseline.run_set, collected);

    record_result(&mut handle, "test_m.py::test_f", Some(0.001), false, false, &touched("m.py", &[1, 2])).unwrap();
    flush(&mut handle).unwrap();

    let incremental = plan(&handle, &collected, Mode::Incremental, false, &HashSet::new()).unwrap();
    assert!(incremental.run_set.is_empty());
    assert_eq!(incremental.skip_set, collected);
}

#[test]
fn s2_modified_source_reselects_test_which_then_stays_selected_on_failure() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("m.py"), "def f():\n    return 1\n").unwrap();

    let mut handle = init_store(dir.path(), &dir.path().join("store.db"), 100, "default", "", "3.11").unwrap();
    record_result(&mut handle, "test_m.py::test_f", Some(0.001), false, false, &touched("m.py", &[1, 2])).unwrap();
    flush(&mut handle).unwrap();

    fs::write(dir.path().join("m.py"), "def f():\n    return 2\n").unwrap();
    let collected = HashSet::from(["test_m.py::test_f".to_string()]);
    let after_edit = plan(&handle, &collected, Mode::Incremental, false, &HashSet::new()).unwrap();
    assert_eq!(after_edit.run_set, collected);

    // The test runs and fails; the host records that.
    record_result(&mut handle, "test_m.py::test_f", Some(0.001), true, false, &touched("m.py", &[1, 2])).unwrap();
    flush(&mut handle).unwrap();

    let after_failure = plan(&handle, &collected, Mode::Incremental, false, &HashSet::new()).unwrap();
    assert_eq!(after_failure.run_set, collected, "a failing test stays selected until it passes");
}

#[test]
fn s3_comment_edit_above_function_still_changes_module_block() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("m.py"), "def f():\n    return 1\n").unwrap();

    let mut handle = init_store(dir.path(), &dir.path().join("store.db"), 100, "default", "", "3.11").unwrap();
    record_result(&mut handle, "test_m.py::test_f", None, false, false, &touched("m.py", &[1, 2])).unwrap();
    flush(&mut handle).unwrap();

    fs::write(dir.path().join("m.py"), "# a note about f\ndef f():\n    return 1\n").unwrap();
    let collected = HashSet::from(["test_m.py::test_f".to_string()]);
    let outcome = plan(&handle, &collected, Mode::Incremental, false, &HashSet::new()).unwrap();
    assert_eq!(outcome.run_set, collected, "comments are retained in checksum input");
}

#[test]
fn s4_touch_with_no_content_change_is_a_no_op() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("m.py");
    fs::write(&path, "def f():\n    return 1\n").unwrap();

    let mut handle = init_store(dir.path(), &dir.path().join("store.db"), 100, "default", "", "3.11").unwrap();
    record_result(&mut handle, "test_m.py::test_f", None, false, false, &touched("m.py", &[1, 2])).unwrap();
    flush(&mut handle).unwrap();

    // Rewrite identical bytes; on most filesystems this changes mtime.
    fs::write(&path, "def f():\n    return 1\n").unwrap();
    let collected = HashSet::from(["test_m.py::test_f".to_string()]);
    let outcome = plan(&handle, &collected, Mode::Incremental, false, &HashSet::new()).unwrap();
    assert!(outcome.run_set.is_empty());
}

#[test]
fn s5_deleted_source_file_reselects_its_dependents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("m.py");
    fs::write(&path, "def f():\n    return 1\n").unwrap();

    let mut handle = init_store(dir.path(), &dir.path().join("store.db"), 100, "default", "", "3.11").unwrap();
    record_result(&mut handle, "test_m.py::test_f", None, false, false, &touched("m.py", &[1, 2])).unwrap();
    flush(&mut handle).unwrap();

    fs::remove_file(&path).unwrap();
    let collected = HashSet::from(["test_m.py::test_f".to_string()]);
    let outcome = plan(&handle, &collected, Mode::Incremental, false, &HashSet::new()).unwrap();
    assert_eq!(outcome.run_set, collected);
}
