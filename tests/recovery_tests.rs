// Recovery tests: torn tails, checksum failures and leftover compactions.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use datumdb::{DbError, Store, StoreOptions, WriteBatch};

fn log_len(dir: &Path) -> u64 {
    std::fs::metadata(dir.join("data.log")).unwrap().len()
}

fn append_raw(dir: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(dir.join("data.log")).unwrap();
    file.write_all(bytes).unwrap();
}

fn write_two_batches(dir: &Path) -> u64 {
    let store = Store::open_default(dir).unwrap();
    store.put("a", "1").unwrap();
    let after_first = log_len(dir);

    let mut batch = WriteBatch::new();
    batch.put("b", "2");
    batch.put("c", "3");
    batch.put("d", "4");
    store.write(&batch).unwrap();
    store.close().unwrap();
    after_first
}

// =============================================================================
// Torn tails
// =============================================================================
#[test]
fn partial_frame_header_is_truncated() {
    let dir = tempfile::tempdir().unwrap();
    write_two_batches(dir.path());
    let clean_len = log_len(dir.path());

    append_raw(dir.path(), &[0xde, 0xad, 0xbe, 0xef, 0x00]);

    let store = Store::open_default(dir.path()).unwrap();
    assert_eq!(store.stats().unwrap().live_keys, 4);
    assert_eq!(log_len(dir.path()), clean_len);

    // 截断后可以继续追加
    store.put("e", "5").unwrap();
    store.close().unwrap();
    let store = Store::open_default(dir.path()).unwrap();
    assert_eq!(store.get(b"e").unwrap(), b"5");
}

#[test]
fn torn_batch_is_dropped_as_a_whole() {
    let dir = tempfile::tempdir().unwrap();
    let after_first = write_two_batches(dir.path());

    // 切掉第二帧的最后几个字节
    let full = log_len(dir.path());
    let file = OpenOptions::new().write(true).open(dir.path().join("data.log")).unwrap();
    file.set_len(full - 3).unwrap();
    drop(file);

    let store = Store::open_default(dir.path()).unwrap();
    assert_eq!(store.get(b"a").unwrap(), b"1");
    for key in [b"b", b"c", b"d"] {
        assert!(matches!(store.get(key), Err(DbError::NotFound(_))));
    }
    assert_eq!(log_len(dir.path()), after_first);
}

#[test]
fn commit_after_torn_tail_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_default(dir.path()).unwrap();
    store.put("a", "1").unwrap();
    let clean_len = log_len(dir.path());

    // 打开期间日志尾部出现一段未确认的残帧
    append_raw(dir.path(), &[0xab; 13]);

    store.put("b", "2").unwrap();
    assert_eq!(store.get(b"b").unwrap(), b"2");
    assert_eq!(log_len(dir.path()), store.stats().unwrap().data_file_size);
    assert!(log_len(dir.path()) > clean_len);
    store.close().unwrap();

    let store = Store::open_default(dir.path()).unwrap();
    assert_eq!(store.get(b"a").unwrap(), b"1");
    assert_eq!(store.get(b"b").unwrap(), b"2");
}

#[test]
fn checksum_mismatch_drops_frame() {
    let dir = tempfile::tempdir().unwrap();
    let after_first = write_two_batches(dir.path());

    // 翻转第二帧负载中的一个字节
    let path = dir.path().join("data.log");
    let mut bytes = std::fs::read(&path).unwrap();
    let target = after_first as usize + 20;
    bytes[target] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let store = Store::open_default(dir.path()).unwrap();
    assert_eq!(store.stats().unwrap().live_keys, 1);
    assert_eq!(log_len(dir.path()), after_first);
}

#[test]
fn paranoid_checks_report_corruption() {
    let dir = tempfile::tempdir().unwrap();
    write_two_batches(dir.path());
    append_raw(dir.path(), &[1, 2, 3]);
    let len = log_len(dir.path());

    let options = StoreOptions::new().with_paranoid_checks(true);
    assert!(matches!(Store::open(dir.path(), options), Err(DbError::Corruption(_))));
    assert_eq!(log_len(dir.path()), len);
}

#[test]
fn read_only_open_leaves_torn_tail_in_place() {
    let dir = tempfile::tempdir().unwrap();
    write_two_batches(dir.path());
    append_raw(dir.path(), &[1, 2, 3]);
    let len = log_len(dir.path());

    let options = StoreOptions::new().with_create_if_missing(false).with_read_only(true);
    let store = Store::open(dir.path(), options).unwrap();
    assert_eq!(store.stats().unwrap().live_keys, 4);
    assert_eq!(log_len(dir.path()), len);
}

#[test]
fn bad_header_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.log"), vec![0u8; 32]).unwrap();
    assert!(matches!(Store::open_default(dir.path()), Err(DbError::Io(_))));
}

// =============================================================================
// Leftover compactions
// =============================================================================
#[test]
fn ready_compaction_is_completed_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("compact_temp");

    let store = Store::open_default(dir.path()).unwrap();
    store.put("old", "1").unwrap();
    store.close().unwrap();

    let compacted = Store::open_default(&temp).unwrap();
    compacted.put("new", "2").unwrap();
    compacted.close().unwrap();
    std::fs::File::create(temp.join(".compact_ready")).unwrap();

    let store = Store::open_default(dir.path()).unwrap();
    assert_eq!(store.get(b"new").unwrap(), b"2");
    assert!(matches!(store.get(b"old"), Err(DbError::NotFound(_))));
    assert!(!temp.exists());
}

#[test]
fn interrupted_compaction_is_discarded_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("compact_temp");

    let store = Store::open_default(dir.path()).unwrap();
    store.put("old", "1").unwrap();
    store.close().unwrap();

    let partial = Store::open_default(&temp).unwrap();
    partial.put("new", "2").unwrap();
    partial.close().unwrap();

    let store = Store::open_default(dir.path()).unwrap();
    assert_eq!(store.get(b"old").unwrap(), b"1");
    assert!(matches!(store.get(b"new"), Err(DbError::NotFound(_))));
    assert!(!temp.exists());
}
