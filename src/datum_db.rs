use std::path::{Path, PathBuf};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use crate::batch::WriteBatch;
use crate::datum::Datum;
use crate::db::{DbStats, Store};
use crate::error::{DbError, Result};
use crate::iterator::StoreIterator;
use crate::models::StoreOptions;

/// 打开模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 创建新数据库，已存在时报错。
    New,
    /// 追加写入，不存在时创建。
    Write,
    /// 只读，必须已存在。
    Read,
}

fn default_sync_writes() -> bool {
    true
}

/// Datum 数据库配置，可以从 JSON 文件加载：
///
/// ```json
/// { "source": "train_db", "mode": "read", "loop": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatumDbConfig {
    /// 数据库目录。
    pub source: PathBuf,
    pub mode: Mode,
    /// 读到末尾后是否从头开始。
    #[serde(rename = "loop", default)]
    pub loop_on_end: bool,
    /// 每次提交后是否 fsync。
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
    /// 打开时遇到损坏直接报错，而不是截断。
    #[serde(default)]
    pub paranoid_checks: bool,
}

impl DatumDbConfig {
    pub fn new<P: AsRef<Path>>(source: P, mode: Mode) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            mode,
            loop_on_end: false,
            sync_writes: true,
            paranoid_checks: false,
        }
    }

    pub fn with_loop(mut self, enabled: bool) -> Self {
        self.loop_on_end = enabled;
        self
    }

    pub fn with_sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    pub fn with_paranoid_checks(mut self, enabled: bool) -> Self {
        self.paranoid_checks = enabled;
        self
    }

    /// 从 JSON 文件加载配置。
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        if config.source.as_os_str().is_empty() {
            return Err(DbError::ConfigError("source must not be empty".into()));
        }
        Ok(config)
    }

    /// 按模式生成存储引擎选项。
    pub fn store_options(&self) -> StoreOptions {
        let options = StoreOptions::new()
            .with_sync_writes(self.sync_writes)
            .with_paranoid_checks(self.paranoid_checks);
        match self.mode {
            Mode::New => options
                .with_error_if_exists(true)
                .with_create_if_missing(true),
            Mode::Write => options
                .with_error_if_exists(false)
                .with_create_if_missing(true),
            Mode::Read => options
                .with_error_if_exists(false)
                .with_create_if_missing(false)
                .with_read_only(true)
                .with_auto_compact(false),
        }
    }
}

/// 面向训练数据读取的 Datum 数据库。
///
/// 写模式下 `put` 只把记录暂存在批次中，`commit` 时整批原子写入；
/// `close` 会丢弃未提交的记录。读模式下通过 `generator` 顺序遍历。
pub struct DatumDb {
    config: DatumDbConfig,
    store: Option<Store>,
    batch: Option<WriteBatch>,
}

impl DatumDb {
    /// 创建一个未打开的句柄。
    pub fn new(config: DatumDbConfig) -> Self {
        Self {
            config,
            store: None,
            batch: None,
        }
    }

    /// 创建并立即打开。
    pub fn open_with_config(config: DatumDbConfig) -> Result<Self> {
        let mut db = Self::new(config);
        db.open()?;
        Ok(db)
    }

    pub fn config(&self) -> &DatumDbConfig {
        &self.config
    }

    pub fn is_opened(&self) -> bool {
        self.store.is_some()
    }

    pub fn open(&mut self) -> Result<()> {
        if self.is_opened() {
            return Err(DbError::AlreadyOpened(self.source_name()));
        }
        info!("Opening datum db {:?} in {:?} mode", self.config.source, self.config.mode);

        let store = Store::open(&self.config.source, self.config.store_options()).map_err(|e| {
            error!("Failed to open datum db {:?}: {}", self.config.source, e);
            e
        })?;

        self.batch = match self.config.mode {
            Mode::New | Mode::Write => Some(WriteBatch::new()),
            Mode::Read => None,
        };
        self.store = Some(store);
        Ok(())
    }

    /// 关闭数据库，丢弃未提交的记录。重复调用无副作用。
    ///
    /// 已创建的 Generator 持有自己的快照，关闭后仍可继续读取。
    pub fn close(&mut self) -> Result<()> {
        if let Some(batch) = self.batch.take() {
            if !batch.is_empty() {
                warn!("Discarding {} uncommitted records in {:?}", batch.len(), self.config.source);
            }
        }
        match self.store.take() {
            Some(store) => {
                info!("Closing datum db {:?}", self.config.source);
                store.close()
            }
            None => {
                debug!("Datum db {:?} is not open", self.config.source);
                Ok(())
            }
        }
    }

    /// 读取单条记录。读取失败（包括键不存在）会记录错误日志。
    pub fn get(&self, key: &str) -> Result<Datum> {
        let store = self.store()?;
        store
            .get(key.as_bytes())
            .and_then(|bytes| Datum::decode(&bytes))
            .map_err(|e| {
                error!("{}", e);
                e
            })
    }

    /// 暂存一条记录，`commit` 后才写入磁盘。
    pub fn put(&mut self, key: &str, datum: &Datum) -> Result<()> {
        self.ensure_writable()?;
        let source = self.source_name();
        let batch = self.batch.as_mut().ok_or(DbError::NotOpened(source))?;
        batch.put(key, datum.encode()?);
        Ok(())
    }

    /// 原子写入所有暂存的记录。写入失败时保留批次，可以重试。
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let store = self.store()?;
        let batch = self
            .batch
            .as_ref()
            .ok_or_else(|| DbError::NotOpened(self.source_name()))?;

        store.write(batch).map_err(|e| {
            error!("Failed to write batch to {:?}: {}", self.config.source, e);
            e
        })?;
        debug!("Committed {} records to {:?}", batch.len(), self.config.source);

        self.batch = Some(WriteBatch::new());
        Ok(())
    }

    /// 暂存但尚未提交的记录数。
    pub fn pending(&self) -> usize {
        self.batch.as_ref().map_or(0, WriteBatch::len)
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.store()?.stats()
    }

    /// 底层的键值存储，未打开时为 `None`。
    pub fn store_handle(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    /// 为读模式的数据库创建一个位于第一条记录的 Generator。
    pub fn generator(&self) -> Result<Generator> {
        if self.config.mode != Mode::Read {
            return Err(DbError::NotReadMode(self.source_name()));
        }
        let store = self.store()?;
        info!("Creating generator for {:?}", self.config.source);

        let mut iter = store.iter()?;
        iter.seek_to_first()?;
        Ok(Generator {
            source: self.config.source.clone(),
            iter,
            loop_on_end: self.config.loop_on_end,
            failed: false,
        })
    }

    fn store(&self) -> Result<&Store> {
        self.store
            .as_ref()
            .ok_or_else(|| DbError::NotOpened(self.source_name()))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.mode == Mode::Read {
            return Err(DbError::ReadOnly(self.source_name()));
        }
        Ok(())
    }

    fn source_name(&self) -> String {
        self.config.source.display().to_string()
    }
}

impl Drop for DatumDb {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close datum db {:?}: {}", self.config.source, e);
        }
    }
}

/// 只进的记录游标，可选择在末尾循环。
///
/// 作为 `Iterator` 使用时，每次返回当前记录并前进一步；
/// 开启循环且数据库非空时永不结束。
pub struct Generator {
    source: PathBuf,
    iter: StoreIterator,
    loop_on_end: bool,
    failed: bool,
}

impl Generator {
    pub fn valid(&self) -> bool {
        self.iter.valid()
    }

    /// 回到第一条记录。
    pub fn reset(&mut self) -> Result<bool> {
        self.iter.seek_to_first()?;
        Ok(self.valid())
    }

    /// 前进到下一条记录，返回新位置是否有效。
    pub fn advance(&mut self) -> Result<bool> {
        if self.valid() {
            self.iter.next()?;
            if !self.iter.valid() {
                if self.loop_on_end {
                    debug!("Reached the end of {:?} and looping.", self.source);
                    return self.reset();
                }
                error!("Reached the end of {:?} and not looping.", self.source);
            }
        }
        Ok(self.valid())
    }

    /// 当前位置的键和记录。
    pub fn current(&self) -> Result<Option<(String, Datum)>> {
        let (key, value) = match (self.iter.key(), self.iter.value()) {
            (Some(key), Some(value)) => (key, value),
            _ => return Ok(None),
        };
        let key = String::from_utf8(key.to_vec())
            .map_err(|_| DbError::Corruption("Invalid UTF-8 key".into()))?;
        Ok(Some((key, Datum::decode(value)?)))
    }

    /// 快照中的记录数。
    pub fn len(&self) -> usize {
        self.iter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iter.is_empty()
    }

    pub fn loops(&self) -> bool {
        self.loop_on_end
    }
}

impl Iterator for Generator {
    type Item = Result<(String, Datum)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let record = match self.current() {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        if let Err(e) = self.advance() {
            self.failed = true;
            return Some(Err(e));
        }
        Some(Ok(record))
    }
}
