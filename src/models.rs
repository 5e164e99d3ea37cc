use std::io::{self, Read, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crate::error::{DbError, Result};

/// 16进制的 "DTDB" 魔数，用于标识文件类型。
pub const MAGIC: u32 = 0x44544442;

/// 当前文件格式版本。
pub const VERSION: u8 = 1;

/// 文件头大小（字节）。
pub const HEADER_SIZE: usize = 32;

/// 批次帧头大小：crc(4) + count(4) + payload_len(4)。
pub const FRAME_HEADER_SIZE: usize = 12;

/// 条目头大小：kind(1) + key_len(4) + val_len(4)。
pub const ENTRY_HEADER_SIZE: usize = 9;

/// 日志文件名。
pub const DATA_FILE: &str = "data.log";

/// 文件头结构，存在于 data.log 的开头。
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    /// 用于验证文件类型的魔数。
    pub magic: u32,
    /// 文件格式版本。
    pub version: u8,
    /// 标志位，预留给未来使用。
    pub flags: u8,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
        }
    }

    /// 将头部写入 writer。
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(self.magic)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.flags)?;
        // 填充至 32 字节
        writer.write_all(&[0u8; HEADER_SIZE - 6])?;
        Ok(())
    }

    /// 从 reader 读取头部。
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let magic = reader.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Invalid magic number"));
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Unsupported version"));
        }
        let flags = reader.read_u8()?;
        let mut reserved = [0u8; HEADER_SIZE - 6];
        reader.read_exact(&mut reserved)?;

        Ok(Self { magic, version, flags })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// 把长度转换为磁盘格式使用的 u32，超过 4 GiB 时报错。
pub fn checked_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| DbError::TooLarge(format!("{} of {} bytes", what, len)))
}

/// 批次中条目的类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Put = 0,
    Delete = 1,
}

impl EntryKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(EntryKind::Put),
            1 => Some(EntryKind::Delete),
            _ => None,
        }
    }
}

/// 内存索引条目，指向 data.log 中某个值的位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuePointer {
    /// 值字节在 data.log 中的绝对偏移量。
    pub offset: u64,
    /// 值的长度。
    pub len: u32,
}

/// 自动压缩的默认阈值：垃圾字节比例。
pub const DEFAULT_COMPACT_RATIO_THRESHOLD: f64 = 0.5;

/// 自动压缩的默认阈值：垃圾字节数。
pub const DEFAULT_COMPACT_BYTES_THRESHOLD: u64 = 64 * 1024 * 1024;

/// 存储引擎的打开选项。
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// 数据库不存在时是否创建。
    pub create_if_missing: bool,
    /// 数据库已存在时是否报错。
    pub error_if_exists: bool,
    /// 以只读方式打开，拒绝所有写操作。
    pub read_only: bool,
    /// 恢复时遇到损坏的尾部直接报错，而不是截断。
    pub paranoid_checks: bool,
    /// 每次写批次后是否 fsync。
    pub sync_writes: bool,
    /// 自动压缩的垃圾比例阈值（0.0 到 1.0）。
    pub compact_threshold_ratio: f64,
    /// 自动压缩的垃圾字节阈值。
    pub compact_threshold_bytes: u64,
    /// 是否启用自动压缩。
    pub enable_auto_compact: bool,
}

impl StoreOptions {
    /// 创建具有默认设置的选项：不存在则创建，可写。
    pub fn new() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            read_only: false,
            paranoid_checks: false,
            sync_writes: true,
            compact_threshold_ratio: DEFAULT_COMPACT_RATIO_THRESHOLD,
            compact_threshold_bytes: DEFAULT_COMPACT_BYTES_THRESHOLD,
            enable_auto_compact: true,
        }
    }

    pub fn with_create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    pub fn with_error_if_exists(mut self, enabled: bool) -> Self {
        self.error_if_exists = enabled;
        self
    }

    pub fn with_read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }

    pub fn with_paranoid_checks(mut self, enabled: bool) -> Self {
        self.paranoid_checks = enabled;
        self
    }

    pub fn with_sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// 设置压缩阈值比例。
    pub fn with_compact_ratio(mut self, ratio: f64) -> Self {
        self.compact_threshold_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// 设置压缩阈值字节数。
    pub fn with_compact_bytes(mut self, bytes: u64) -> Self {
        self.compact_threshold_bytes = bytes;
        self
    }

    /// 设置是否启用自动压缩。
    pub fn with_auto_compact(mut self, enabled: bool) -> Self {
        self.enable_auto_compact = enabled;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}
