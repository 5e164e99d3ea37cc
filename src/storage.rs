use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::batch::{BatchOp, WriteBatch};
use crate::models::{
    checked_len, EntryKind, FileHeader, StoreOptions, ValuePointer, DATA_FILE, ENTRY_HEADER_SIZE,
    FRAME_HEADER_SIZE, HEADER_SIZE,
};
use crate::error::{Result, DbError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

#[cfg(unix)]
use std::os::unix::fs::FileExt as UnixFileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt as WindowsFileExt;

/// Cross-platform trait for reading at an offset
pub trait StorageFileExt {
    fn read_exact_at_offset(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()>;
}

#[cfg(unix)]
impl StorageFileExt for File {
    fn read_exact_at_offset(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        UnixFileExt::read_exact_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl StorageFileExt for File {
    fn read_exact_at_offset(&self, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
        while !buf.is_empty() {
            match WindowsFileExt::seek_read(self, buf, offset) {
                Ok(0) => break, // EOF
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "failed to fill whole buffer"))
        } else {
            Ok(())
        }
    }
}

/// 按指针从 data.log 中读取一个值。
pub fn read_value_at(file: &File, pointer: ValuePointer) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; pointer.len as usize];
    file.read_exact_at_offset(&mut buf, pointer.offset)?;
    Ok(buf)
}

/// 一个批次应用后单个键的结果：`Some` 为新值位置，`None` 为删除。
pub type BatchUpdate = (Vec<u8>, Option<ValuePointer>);

/// 处理 data.log 的底层文件 I/O。
///
/// 文件句柄放在 `Arc` 中：迭代器持有创建时的句柄做快照读取，
/// 即使之后发生压缩并替换了文件，旧句柄仍然指向原来的数据。
pub struct Storage {
    file: Option<Arc<File>>,
    pub path: PathBuf,
    read_only: bool,
    sync_writes: bool,
    paranoid_checks: bool,
    /// 下一个批次帧的写入位置。
    end: u64,
}

impl Storage {
    /// 打开或创建存储文件，按选项检查数据库是否存在。
    pub fn open<P: AsRef<Path>>(path: P, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data_path = path.join(DATA_FILE);
        let exists = data_path.exists();

        if exists && options.error_if_exists {
            return Err(DbError::AlreadyExists(path.display().to_string()));
        }
        if !exists && (!options.create_if_missing || options.read_only) {
            return Err(DbError::Missing(path.display().to_string()));
        }

        if !options.read_only {
            std::fs::create_dir_all(&path)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(!options.read_only)
            .create(!options.read_only)
            .truncate(false)
            .open(&data_path)?;

        // 检查或写入头部
        if file.metadata()?.len() == 0 {
            if options.read_only {
                return Err(DbError::Corruption(format!("{:?} has no header", data_path)));
            }
            FileHeader::new().write(&mut file)?;
            file.sync_all()?;
        } else {
            file.seek(SeekFrom::Start(0))?;
            FileHeader::read(&mut file)?;
        }

        let end = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file: Some(Arc::new(file)),
            path,
            read_only: options.read_only,
            sync_writes: options.sync_writes,
            paranoid_checks: options.paranoid_checks,
            end,
        })
    }

    /// 关闭文件句柄。
    pub fn close(&mut self) -> Result<()> {
        if let Some(f) = self.file.take() {
            if !self.read_only {
                f.sync_all()?;
            }
        }
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// 当前日志长度（字节）。
    pub fn len(&self) -> u64 {
        self.end
    }

    /// 共享的文件句柄，供迭代器快照使用。
    pub fn handle(&self) -> Result<Arc<File>> {
        self.file.clone().ok_or(DbError::FileNotOpen)
    }

    /// 将整个批次编码为一帧追加到 data.log。
    ///
    /// 帧总是写在最后一个完整帧之后：写入前丢弃 `end` 之后未确认的字节，
    /// 写入或 fsync 失败时把文件截回 `end`，保证之后的提交不会落在残帧后面。
    ///
    /// 返回每个操作对应的索引更新，顺序与批次一致。
    pub fn append_batch(&mut self, batch: &WriteBatch) -> Result<Vec<BatchUpdate>> {
        if self.read_only {
            return Err(DbError::ReadOnly(self.path.display().to_string()));
        }
        let file = self.file.as_ref().ok_or(DbError::FileNotOpen)?;
        let frame_start = self.end;

        let mut payload = Vec::with_capacity(batch.approximate_size());
        let mut updates = Vec::with_capacity(batch.len());
        for op in batch.iter() {
            let (kind, key, value): (EntryKind, &[u8], &[u8]) = match op {
                BatchOp::Put { key, value } => (EntryKind::Put, key.as_slice(), value.as_slice()),
                BatchOp::Delete { key } => (EntryKind::Delete, key.as_slice(), &[][..]),
            };
            let key_len = checked_len(key.len(), "key")?;
            let val_len = checked_len(value.len(), "value")?;
            let value_offset = frame_start
                + (FRAME_HEADER_SIZE + payload.len() + ENTRY_HEADER_SIZE + key.len()) as u64;

            payload.write_u8(kind as u8)?;
            payload.write_u32::<BigEndian>(key_len)?;
            payload.write_u32::<BigEndian>(val_len)?;
            payload.extend_from_slice(key);
            payload.extend_from_slice(value);

            let pointer = match kind {
                EntryKind::Put => Some(ValuePointer { offset: value_offset, len: val_len }),
                EntryKind::Delete => None,
            };
            updates.push((key.to_vec(), pointer));
        }

        let count = checked_len(batch.len(), "batch entry count")?;
        let payload_len = checked_len(payload.len(), "batch payload")?;

        // 计算校验和
        let mut hasher = Hasher::new();
        hasher.update(&count.to_be_bytes());
        hasher.update(&payload_len.to_be_bytes());
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.write_u32::<BigEndian>(checksum)?;
        frame.write_u32::<BigEndian>(count)?;
        frame.write_u32::<BigEndian>(payload_len)?;
        frame.extend_from_slice(&payload);

        if let Err(e) = Self::write_frame_at(file, frame_start, &frame, self.sync_writes) {
            if let Err(rollback) = file.set_len(frame_start) {
                log::error!(
                    "Failed to roll back torn frame at offset {} in {:?}: {}",
                    frame_start, self.path, rollback
                );
            }
            return Err(e);
        }

        self.end = frame_start + frame.len() as u64;
        Ok(updates)
    }

    /// 在 `offset` 处写入整帧，丢弃其后残留的字节。
    fn write_frame_at(file: &File, offset: u64, frame: &[u8], sync: bool) -> Result<()> {
        if file.metadata()?.len() != offset {
            log::warn!("Discarding unacknowledged bytes after offset {}", offset);
            file.set_len(offset)?;
        }
        let mut writer = file;
        writer.seek(SeekFrom::Start(offset))?;
        writer.write_all(frame)?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// 从指定位置读取一个值。
    pub fn read_value(&self, pointer: ValuePointer) -> Result<Vec<u8>> {
        let file = self.file.as_ref().ok_or(DbError::FileNotOpen)?;
        read_value_at(file, pointer)
    }

    /// 辅助函数：从当前流位置读取下一帧，返回条目数和负载。
    fn read_frame_from_stream<R: Read>(reader: &mut R, remaining: u64) -> Result<(u32, Vec<u8>)> {
        let checksum = reader.read_u32::<BigEndian>()?;
        let count = reader.read_u32::<BigEndian>()?;
        let payload_len = reader.read_u32::<BigEndian>()?;

        if payload_len as u64 > remaining.saturating_sub(FRAME_HEADER_SIZE as u64) {
            return Err(DbError::Corruption(format!(
                "frame payload of {} bytes runs past end of file",
                payload_len
            )));
        }

        let mut payload = vec![0u8; payload_len as usize];
        reader.read_exact(&mut payload)?;

        // 验证校验和
        let mut hasher = Hasher::new();
        hasher.update(&count.to_be_bytes());
        hasher.update(&payload_len.to_be_bytes());
        hasher.update(&payload);
        if hasher.finalize() != checksum {
            return Err(DbError::Corruption("Checksum mismatch".into()));
        }

        Ok((count, payload))
    }

    /// 解析一帧的负载，`frame_start` 为帧在文件中的偏移量。
    fn decode_payload(
        payload: &[u8],
        count: u32,
        frame_start: u64,
    ) -> Result<Vec<(EntryKind, Vec<u8>, ValuePointer)>> {
        let mut entries = Vec::with_capacity(count as usize);
        let mut cursor = std::io::Cursor::new(payload);

        for _ in 0..count {
            let kind_byte = cursor.read_u8()?;
            let kind = EntryKind::from_u8(kind_byte)
                .ok_or_else(|| DbError::Corruption(format!("Unknown entry kind {}", kind_byte)))?;
            let key_len = cursor.read_u32::<BigEndian>()? as usize;
            let val_len = cursor.read_u32::<BigEndian>()?;

            let mut key = vec![0u8; key_len];
            cursor.read_exact(&mut key)?;

            let value_offset = frame_start + FRAME_HEADER_SIZE as u64 + cursor.position();
            let next = cursor.position() + val_len as u64;
            if next > payload.len() as u64 {
                return Err(DbError::Corruption("Entry runs past end of frame".into()));
            }
            cursor.set_position(next);

            entries.push((kind, key, ValuePointer { offset: value_offset, len: val_len }));
        }

        if cursor.position() != payload.len() as u64 {
            return Err(DbError::Corruption("Trailing bytes in frame".into()));
        }

        Ok(entries)
    }

    /// 扫描 data.log 以重建有序索引。
    ///
    /// 恢复过程：
    /// 1. 逐帧读取并校验，按顺序应用到索引。
    /// 2. 遇到不完整或校验失败的帧即停止：可写时截断文件尾部，只读时忽略。
    /// 3. 开启 paranoid_checks 时，任何损坏都直接报错。
    pub fn scan_and_recover(&mut self) -> Result<BTreeMap<Vec<u8>, ValuePointer>> {
        let file = self.file.as_ref().ok_or(DbError::FileNotOpen)?;
        let file_len = file.metadata()?.len();

        let mut reader = BufReader::new(&**file);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        let mut index = BTreeMap::new();
        let mut valid_offset = HEADER_SIZE as u64;

        while valid_offset < file_len {
            let remaining = file_len - valid_offset;
            let frame = Self::read_frame_from_stream(&mut reader, remaining).and_then(|(count, payload)| {
                let entries = Self::decode_payload(&payload, count, valid_offset)?;
                Ok((entries, payload.len()))
            });

            match frame {
                Ok((entries, payload_len)) => {
                    for (kind, key, pointer) in entries {
                        match kind {
                            EntryKind::Put => {
                                index.insert(key, pointer);
                            }
                            EntryKind::Delete => {
                                index.remove(&key);
                            }
                        }
                    }
                    valid_offset += (FRAME_HEADER_SIZE + payload_len) as u64;
                }
                Err(e) => {
                    if self.paranoid_checks {
                        return Err(DbError::Corruption(format!(
                            "Corrupt frame at offset {} in {:?}: {}",
                            valid_offset, self.path, e
                        )));
                    }
                    log::warn!("Recovering from corruption at offset {}: {}", valid_offset, e);
                    break;
                }
            }
        }

        // 如果需要，截断 data.log（损坏/部分写入）
        if valid_offset < file_len {
            if self.read_only {
                log::warn!(
                    "Ignoring {} trailing bytes in read-only database {:?}",
                    file_len - valid_offset,
                    self.path
                );
            } else {
                file.set_len(valid_offset)?;
                file.sync_all()?;
            }
        }
        self.end = valid_offset;

        Ok(index)
    }
}
