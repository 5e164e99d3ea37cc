// DatumDb tests: open modes, batched commits and generator cursors.

use datumdb::{Datum, DatumDb, DatumDbConfig, DbError, Mode};
use std::path::Path;

fn sample(label: i32) -> Datum {
    Datum::new(1, 2, 2).with_data(vec![label as u8; 4]).with_label(label)
}

fn write_records(path: &Path, keys: &[&str]) {
    let mut db = DatumDb::open_with_config(DatumDbConfig::new(path, Mode::Write)).unwrap();
    for (i, key) in keys.iter().enumerate() {
        db.put(key, &sample(i as i32)).unwrap();
    }
    db.commit().unwrap();
    db.close().unwrap();
}

fn open_read(path: &Path, looping: bool) -> DatumDb {
    DatumDb::open_with_config(DatumDbConfig::new(path, Mode::Read).with_loop(looping)).unwrap()
}

// =============================================================================
// Open modes
// =============================================================================
#[test]
fn new_mode_fails_on_existing_db() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let mut db = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::New)).unwrap();
    db.close().unwrap();

    let err = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::New)).err().unwrap();
    assert!(matches!(err, DbError::AlreadyExists(_)));
}

#[test]
fn read_mode_fails_on_missing_db() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing");

    let err = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::Read)).err().unwrap();
    assert!(matches!(err, DbError::Missing(_)));
    assert!(!path.exists());
}

#[test]
fn write_mode_creates_and_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    write_records(&path, &["a"]);
    write_records(&path, &["b"]);

    let db = open_read(&path, false);
    assert_eq!(db.stats().unwrap().live_keys, 2);
}

#[test]
fn read_mode_rejects_put_and_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    write_records(&path, &["a"]);

    let mut db = open_read(&path, false);
    assert!(matches!(db.put("b", &sample(1)), Err(DbError::ReadOnly(_))));
    assert!(matches!(db.commit(), Err(DbError::ReadOnly(_))));
}

#[test]
fn open_twice_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = DatumDb::new(DatumDbConfig::new(dir.path().join("db"), Mode::Write));
    db.open().unwrap();
    assert!(matches!(db.open(), Err(DbError::AlreadyOpened(_))));
}

#[test]
fn operations_before_open_fail() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = DatumDb::new(DatumDbConfig::new(dir.path().join("db"), Mode::Write));
    assert!(!db.is_opened());
    assert!(matches!(db.put("a", &sample(0)), Err(DbError::NotOpened(_))));
    assert!(matches!(db.get("a"), Err(DbError::NotOpened(_))));
    // 未打开时关闭没有副作用
    db.close().unwrap();
}

// =============================================================================
// Batched writes
// =============================================================================
#[test]
fn committed_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let mut db = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::New)).unwrap();
    db.put("k1", &sample(1)).unwrap();
    db.put("k2", &sample(2)).unwrap();
    assert_eq!(db.pending(), 2);
    db.commit().unwrap();
    assert_eq!(db.pending(), 0);
    drop(db);

    let db = open_read(&path, false);
    assert_eq!(db.get("k1").unwrap(), sample(1));
    assert_eq!(db.get("k2").unwrap(), sample(2));
}

#[test]
fn close_discards_uncommitted_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let mut db = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::New)).unwrap();
    db.put("kept", &sample(1)).unwrap();
    db.commit().unwrap();
    db.put("lost", &sample(2)).unwrap();
    db.close().unwrap();

    let db = open_read(&path, false);
    assert!(db.get("kept").is_ok());
    assert!(matches!(db.get("lost"), Err(DbError::NotFound(_))));
}

#[test]
fn later_put_of_same_key_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let mut db = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::Write)).unwrap();
    db.put("k", &sample(1)).unwrap();
    db.put("k", &sample(2)).unwrap();
    db.commit().unwrap();
    db.put("k", &sample(3)).unwrap();
    db.commit().unwrap();
    assert_eq!(db.get("k").unwrap().label, 3);
}

#[test]
fn failed_commit_keeps_batch_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let mut db = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::New)).unwrap();
    db.put("k1", &sample(1)).unwrap();
    db.put("k2", &sample(2)).unwrap();

    // 底层文件被关闭，提交失败但暂存的记录仍在
    db.store_handle().unwrap().close().unwrap();
    assert!(matches!(db.commit(), Err(DbError::FileNotOpen)));
    assert_eq!(db.pending(), 2);

    db.store_handle().unwrap().reopen().unwrap();
    db.commit().unwrap();
    assert_eq!(db.pending(), 0);
    assert_eq!(db.get("k2").unwrap(), sample(2));
    db.close().unwrap();

    let db = open_read(&path, false);
    assert_eq!(db.get("k1").unwrap(), sample(1));
    assert_eq!(db.stats().unwrap().live_keys, 2);
}

#[test]
fn oversized_shape_does_not_panic() {
    let datum = Datum::new(i32::MAX, i32::MAX, i32::MAX);
    assert_eq!(datum.len(), usize::MAX);
    assert!(!datum.is_empty());
}

// =============================================================================
// Generator
// =============================================================================
#[test]
fn generator_requires_read_mode() {
    let dir = tempfile::tempdir().unwrap();
    let db = DatumDb::open_with_config(DatumDbConfig::new(dir.path().join("db"), Mode::Write)).unwrap();
    assert!(matches!(db.generator(), Err(DbError::NotReadMode(_))));
}

#[test]
fn generator_walks_keys_in_order_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    write_records(&path, &["c", "a", "b"]);

    let db = open_read(&path, false);
    let mut cursor = db.generator().unwrap();
    assert_eq!(cursor.len(), 3);

    let (key, datum) = cursor.current().unwrap().unwrap();
    assert_eq!(key, "a");
    assert_eq!(datum.label, 1);

    assert!(cursor.advance().unwrap());
    assert_eq!(cursor.current().unwrap().unwrap().0, "b");
    assert!(cursor.advance().unwrap());
    assert_eq!(cursor.current().unwrap().unwrap().0, "c");

    assert!(!cursor.advance().unwrap());
    assert!(!cursor.valid());
    assert!(cursor.current().unwrap().is_none());
    // 已经越过末尾后再前进不会改变状态
    assert!(!cursor.advance().unwrap());

    assert!(cursor.reset().unwrap());
    assert_eq!(cursor.current().unwrap().unwrap().0, "a");
}

#[test]
fn generator_without_loop_yields_each_record_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    write_records(&path, &["a", "b", "c"]);

    let db = open_read(&path, false);
    let keys: Vec<String> = db
        .generator()
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn generator_with_loop_wraps_around() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    write_records(&path, &["a", "b", "c"]);

    let db = open_read(&path, true);
    let mut cursor = db.generator().unwrap();
    assert!(cursor.loops());

    assert!(cursor.advance().unwrap());
    assert!(cursor.advance().unwrap());
    assert!(cursor.advance().unwrap());
    assert_eq!(cursor.current().unwrap().unwrap().0, "a");

    let keys: Vec<String> = cursor.take(7).map(|r| r.unwrap().0).collect();
    assert_eq!(keys, vec!["a", "b", "c", "a", "b", "c", "a"]);
}

#[test]
fn generator_on_empty_db_is_never_valid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let mut db = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::New)).unwrap();
    db.close().unwrap();

    let db = open_read(&path, true);
    let mut cursor = db.generator().unwrap();
    assert!(cursor.is_empty());
    assert!(!cursor.valid());
    assert!(!cursor.advance().unwrap());
    assert!(!cursor.reset().unwrap());
    assert!(cursor.next().is_none());
}

#[test]
fn generator_outlives_closed_db() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    write_records(&path, &["a", "b"]);

    let mut db = open_read(&path, false);
    let cursor = db.generator().unwrap();
    db.close().unwrap();

    assert_eq!(cursor.count(), 2);
}

#[test]
fn two_generators_advance_independently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    write_records(&path, &["a", "b", "c"]);

    let db = open_read(&path, false);
    let mut first = db.generator().unwrap();
    let second = db.generator().unwrap();
    first.advance().unwrap();

    assert_eq!(first.current().unwrap().unwrap().0, "b");
    assert_eq!(second.current().unwrap().unwrap().0, "a");
}

// =============================================================================
// Config
// =============================================================================
#[test]
fn config_parses_json_with_defaults() {
    let config = DatumDbConfig::from_json(r#"{ "source": "train_db", "mode": "read", "loop": true }"#).unwrap();
    assert_eq!(config.source, Path::new("train_db"));
    assert_eq!(config.mode, Mode::Read);
    assert!(config.loop_on_end);
    assert!(config.sync_writes);
    assert!(!config.paranoid_checks);

    let config = DatumDbConfig::from_json(r#"{ "source": "out", "mode": "new" }"#).unwrap();
    assert_eq!(config.mode, Mode::New);
    assert!(!config.loop_on_end);
}

#[test]
fn config_rejects_bad_input() {
    assert!(matches!(
        DatumDbConfig::from_json(r#"{ "source": "x", "mode": "append" }"#),
        Err(DbError::Serialization(_))
    ));
    assert!(matches!(
        DatumDbConfig::from_json(r#"{ "source": "", "mode": "read" }"#),
        Err(DbError::ConfigError(_))
    ));
}

#[test]
fn config_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("db.json");
    std::fs::write(&file, r#"{ "source": "/data/train", "mode": "write", "sync_writes": false }"#).unwrap();

    let config = DatumDbConfig::from_json_file(&file).unwrap();
    assert_eq!(config, DatumDbConfig::new("/data/train", Mode::Write).with_sync_writes(false));
}

#[test]
fn mode_controls_store_options() {
    let new = DatumDbConfig::new("x", Mode::New).store_options();
    assert!(new.create_if_missing && new.error_if_exists && !new.read_only);

    let write = DatumDbConfig::new("x", Mode::Write).store_options();
    assert!(write.create_if_missing && !write.error_if_exists && !write.read_only);

    let read = DatumDbConfig::new("x", Mode::Read).store_options();
    assert!(!read.create_if_missing && read.read_only && !read.enable_auto_compact);
}
