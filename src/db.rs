use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::collections::BTreeMap;
use std::path::Path;
use log::{info, warn, debug};
use crate::batch::WriteBatch;
use crate::iterator::StoreIterator;
use crate::storage::Storage;
use crate::models::{StoreOptions, ValuePointer, DATA_FILE, ENTRY_HEADER_SIZE, HEADER_SIZE};
use crate::error::{Result, DbError};

/// 压缩时每个批次帧的目标大小。
const COMPACT_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// 数据库统计信息。
#[derive(Debug, Clone)]
pub struct DbStats {
    /// 活跃键数量。
    pub live_keys: usize,
    /// 活跃条目占用的字节数。
    pub live_bytes: u64,
    /// 数据文件大小（字节）。
    pub data_file_size: u64,
    /// 可被压缩回收的字节数。
    pub garbage_bytes: u64,
    /// 垃圾比例。
    pub garbage_ratio: f64,
}

/// 数据库的内部状态，由 RwLock 保护。
struct Inner {
    storage: Storage,
    /// 有序内存索引，将键映射到值的位置。迭代器共享同一份快照，写入时写时复制。
    index: Arc<BTreeMap<Vec<u8>, ValuePointer>>,
    /// 活跃条目的编码大小之和。
    live_bytes: u64,
    /// 打开选项（已清除 error_if_exists，用于压缩后重新打开）。
    options: StoreOptions,
    #[cfg(test)]
    fail_before_rename: bool,
}

impl Inner {
    fn garbage(&self) -> (u64, f64) {
        let body = self.storage.len().saturating_sub(HEADER_SIZE as u64);
        let garbage = body.saturating_sub(self.live_bytes);
        (garbage, garbage as f64 / body.max(1) as f64)
    }

    /// 重新打开 data.log，扫描恢复并替换索引。
    fn reload(&mut self) -> Result<()> {
        let mut storage = Storage::open(&self.storage.path, &self.options)?;
        let index = storage.scan_and_recover()?;
        self.live_bytes = index.iter().map(|(k, p)| entry_size(k, p)).sum();
        self.index = Arc::new(index);
        self.storage = storage;
        Ok(())
    }

    /// 把活跃条目写入 `temp_path` 下的新日志，然后替换 `path` 下的旧日志。
    fn rewrite_log(&mut self, path: &Path, temp_path: &Path) -> Result<()> {
        if temp_path.exists() {
            std::fs::remove_dir_all(temp_path)?;
        }
        let temp_options = StoreOptions::new()
            .with_sync_writes(false)
            .with_auto_compact(false);
        let mut new_storage = Storage::open(temp_path, &temp_options)?;

        let mut new_index = BTreeMap::new();
        let mut batch = WriteBatch::new();
        for (key, pointer) in self.index.iter() {
            let value = self.storage.read_value(*pointer)?;
            batch.put(key.clone(), value);
            if batch.approximate_size() >= COMPACT_BATCH_BYTES {
                new_index.extend(flush_live(&mut new_storage, &mut batch)?);
            }
        }
        if !batch.is_empty() {
            new_index.extend(flush_live(&mut new_storage, &mut batch)?);
        }

        // 关闭文件并确保落盘
        new_storage.close()?;
        self.storage.close()?;

        // 创建标记文件以指示新文件已准备就绪
        let ready_marker = temp_path.join(".compact_ready");
        let f = std::fs::File::create(&ready_marker)?;
        f.sync_all()?;
        drop(f);

        // 同步临时目录元数据
        #[cfg(unix)]
        {
            if let Ok(dir) = std::fs::File::open(temp_path) {
                let _ = dir.sync_all();
            }
        }

        #[cfg(test)]
        {
            if self.fail_before_rename {
                return Err(DbError::Io(std::io::Error::new(std::io::ErrorKind::Other, "rename failed")));
            }
        }

        std::fs::rename(temp_path.join(DATA_FILE), path.join(DATA_FILE))?;

        // 同步父目录
        #[cfg(unix)]
        {
            if let Ok(dir) = std::fs::File::open(path) {
                let _ = dir.sync_all();
            }
        }

        std::fs::remove_dir_all(temp_path)?;

        // 重新打开存储
        let expected = new_index.len();
        self.reload()?;
        if self.index.len() != expected {
            return Err(DbError::Corruption(format!(
                "Compacted log holds {} keys, expected {}",
                self.index.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// 单个条目在日志中的编码大小。
fn entry_size(key: &[u8], pointer: &ValuePointer) -> u64 {
    (ENTRY_HEADER_SIZE + key.len()) as u64 + pointer.len as u64
}

/// 线程安全的有序键值存储句柄。
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
    compacting: Arc<AtomicBool>,
}

impl Store {
    /// 在指定路径打开或创建数据库（使用默认选项）。
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, StoreOptions::new())
    }

    /// 在指定路径打开数据库。
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();

        if options.compact_threshold_ratio < 0.0 || options.compact_threshold_ratio > 1.0 {
            return Err(DbError::ConfigError(format!("Invalid compact_threshold_ratio: {}", options.compact_threshold_ratio)));
        }

        info!("Opening store: path={:?}, read_only={}, auto_compact={}",
              path, options.read_only, options.enable_auto_compact);

        // 检查是否存在未完成的压缩操作
        let temp_path = path.join("compact_temp");
        if options.read_only {
            if temp_path.exists() {
                warn!("Found leftover compaction in read-only store {:?}, leaving it untouched", path);
            }
        } else if temp_path.join(".compact_ready").exists() {
            warn!("Found incomplete compaction, completing it...");
            // 压缩已准备好但未完成，继续完成重命名
            if temp_path.join(DATA_FILE).exists() {
                std::fs::rename(temp_path.join(DATA_FILE), path.join(DATA_FILE))?;
            }
            std::fs::remove_dir_all(&temp_path)?;
            info!("Completed incomplete compaction");
        } else if temp_path.exists() {
            warn!("Found interrupted compaction, cleaning up temporary files...");
            // 压缩在生成阶段中断，清理临时目录
            std::fs::remove_dir_all(&temp_path)?;
            info!("Cleaned up interrupted compaction");
        }

        let mut storage = Storage::open(path, &options)?;
        let index = storage.scan_and_recover()?;
        let live_bytes = index.iter().map(|(k, p)| entry_size(k, p)).sum();

        info!("Store opened successfully: {} keys, {} bytes on disk", index.len(), storage.len());

        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                storage,
                index: Arc::new(index),
                live_bytes,
                options: options.with_error_if_exists(false),
                #[cfg(test)]
                fail_before_rename: false,
            })),
            compacting: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 关闭文件句柄。之后的读写返回 `DbError::FileNotOpen`，已创建的迭代器不受影响。
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| DbError::LockPoisoned)?;
        inner.storage.close()
    }

    pub fn is_read_only(&self) -> Result<bool> {
        let inner = self.inner.read().map_err(|_| DbError::LockPoisoned)?;
        Ok(inner.storage.is_read_only())
    }

    /// 读取键对应的值。
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read().map_err(|_| DbError::LockPoisoned)?;
        match inner.index.get(key) {
            Some(pointer) => inner.storage.read_value(*pointer),
            None => Err(DbError::NotFound(String::from_utf8_lossy(key).into_owned())),
        }
    }

    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(&batch)
    }

    /// 删除键。键不存在时也会写入删除记录。
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(&batch)
    }

    /// 原子地应用一个批次。
    ///
    /// 整个批次作为一帧写入 data.log，然后按顺序更新内存索引。
    /// 写入后如果垃圾比例超过阈值，会在后台线程中启动压缩。
    pub fn write(&self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().map_err(|_| DbError::LockPoisoned)?;
        let updates = inner.storage.append_batch(batch)?;

        // 存在未释放的快照时才会真正复制
        let mut index = std::mem::take(&mut inner.index);
        let map = Arc::make_mut(&mut index);
        let mut live_bytes = inner.live_bytes;
        for (key, pointer) in updates {
            if let Some(old) = map.remove(&key) {
                live_bytes -= entry_size(&key, &old);
            }
            if let Some(pointer) = pointer {
                live_bytes += entry_size(&key, &pointer);
                map.insert(key, pointer);
            }
        }
        inner.index = index;
        inner.live_bytes = live_bytes;

        // 检查是否需要自动压缩
        let (garbage, ratio) = inner.garbage();
        let should_compact = inner.options.enable_auto_compact
            && ratio > inner.options.compact_threshold_ratio
            && garbage > inner.options.compact_threshold_bytes;
        drop(inner); // 释放锁，避免阻塞后续操作

        if should_compact {
            warn!("Auto-compaction triggered: garbage={} bytes ({:.1}%)",
                  garbage, ratio * 100.0);
            // 使用 AtomicBool 确保同一时间只有一个压缩任务在运行
            if !self.compacting.swap(true, Ordering::SeqCst) {
                let db = self.clone();
                std::thread::spawn(move || {
                    info!("Starting background compaction...");
                    if let Err(e) = db.compact() {
                        warn!("Compaction failed: {}", e);
                    } else {
                        info!("Background compaction completed successfully");
                    }
                    db.compacting.store(false, Ordering::SeqCst);
                });
            }
        }

        Ok(())
    }

    /// 创建一个未定位的快照迭代器。
    pub fn iter(&self) -> Result<StoreIterator> {
        let inner = self.inner.read().map_err(|_| DbError::LockPoisoned)?;
        Ok(StoreIterator::new(inner.storage.handle()?, Arc::clone(&inner.index)))
    }

    /// 执行数据库压缩。
    ///
    /// 压缩过程：
    /// 1. 在 compact_temp 中创建新的日志文件。
    /// 2. 按键序将活跃条目分批写入新文件。
    /// 3. 写入 .compact_ready 标记后原子替换旧文件。
    /// 4. 重新打开存储并替换内存索引。
    ///
    /// 注意：此操作会获取全局写锁，阻塞所有读写操作。已有迭代器仍读取旧文件。
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| DbError::LockPoisoned)?;
        if inner.storage.is_read_only() {
            return Err(DbError::ReadOnly(inner.storage.path.display().to_string()));
        }
        inner.storage.handle()?;
        let path = inner.storage.path.clone();
        let temp_path = path.join("compact_temp");
        let (garbage, _) = inner.garbage();

        debug!("Starting compaction: path={:?}", path);

        if let Err(e) = inner.rewrite_log(&path, &temp_path) {
            // 未完成的临时目录必须清掉，否则下次打开会用它覆盖之后的写入
            if temp_path.exists() {
                if let Err(clean) = std::fs::remove_dir_all(&temp_path) {
                    warn!("Failed to remove {:?} after compaction error: {}", temp_path, clean);
                }
            }
            // 旧日志已关闭时重新打开，存储保持可用
            if inner.storage.handle().is_err() {
                warn!("Compaction failed after closing the log, reopening: {}", e);
                inner.reload()?;
            }
            return Err(e);
        }

        info!("Compaction completed: {} live keys (reclaimed {} bytes)",
              inner.index.len(), garbage);

        Ok(())
    }

    /// 重新打开已关闭的存储，并从 data.log 重建索引。已打开时什么也不做。
    pub fn reopen(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| DbError::LockPoisoned)?;
        if inner.storage.handle().is_ok() {
            return Ok(());
        }
        inner.reload()
    }

    /// 获取数据库统计信息。
    pub fn stats(&self) -> Result<DbStats> {
        let inner = self.inner.read().map_err(|_| DbError::LockPoisoned)?;
        let (garbage_bytes, garbage_ratio) = inner.garbage();

        Ok(DbStats {
            live_keys: inner.index.len(),
            live_bytes: inner.live_bytes,
            data_file_size: inner.storage.len(),
            garbage_bytes,
            garbage_ratio,
        })
    }
}

/// 把压缩中积累的批次写入新存储，返回新的索引条目。
fn flush_live(storage: &mut Storage, batch: &mut WriteBatch) -> Result<Vec<(Vec<u8>, ValuePointer)>> {
    let updates = storage.append_batch(batch)?;
    batch.clear();
    Ok(updates
        .into_iter()
        .filter_map(|(key, pointer)| pointer.map(|p| (key, p)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_next_rename(store: &Store, enabled: bool) {
        store.inner.write().unwrap().fail_before_rename = enabled;
    }

    #[test]
    fn failed_compaction_leaves_store_usable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::new().with_auto_compact(false)).unwrap();
        store.put("a", "1").unwrap();
        store.put("a", "2").unwrap();
        store.put("b", "3").unwrap();

        fail_next_rename(&store, true);
        assert!(matches!(store.compact(), Err(DbError::Io(_))));
        assert!(!dir.path().join("compact_temp").exists());

        // 旧日志已重新打开，读写照常
        assert_eq!(store.get(b"a").unwrap(), b"2");
        store.put("c", "4").unwrap();
        assert_eq!(store.stats().unwrap().live_keys, 3);

        fail_next_rename(&store, false);
        store.compact().unwrap();
        assert_eq!(store.get(b"c").unwrap(), b"4");
        assert!(store.stats().unwrap().garbage_bytes < 50);

        store.close().unwrap();
        let store = Store::open_default(dir.path()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), b"2");
        assert_eq!(store.get(b"c").unwrap(), b"4");
    }

    #[test]
    fn compaction_of_closed_store_keeps_it_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_default(dir.path()).unwrap();
        store.put("a", "1").unwrap();
        store.close().unwrap();

        assert!(matches!(store.compact(), Err(DbError::FileNotOpen)));
        assert!(matches!(store.get(b"a"), Err(DbError::FileNotOpen)));
    }
}
