use std::io::{Cursor, Read};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use crate::error::{DbError, Result};
use crate::models::checked_len;

/// Datum 编码格式版本。
pub const DATUM_VERSION: u8 = 1;

/// 一条训练样本：图像像素（或已编码的图像字节）加标签。
///
/// `data` 保存按 channels x height x width 排列的原始字节；
/// 当 `encoded` 为 true 时，`data` 是压缩后的图像文件内容。
/// `float_data` 用于非 8 位的特征。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub channels: i32,
    pub height: i32,
    pub width: i32,
    pub data: Vec<u8>,
    pub label: i32,
    pub float_data: Vec<f32>,
    pub encoded: bool,
}

impl Datum {
    pub fn new(channels: i32, height: i32, width: i32) -> Self {
        Self {
            channels,
            height,
            width,
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn with_float_data(mut self, float_data: Vec<f32>) -> Self {
        self.float_data = float_data;
        self
    }

    pub fn with_label(mut self, label: i32) -> Self {
        self.label = label;
        self
    }

    pub fn with_encoded(mut self, encoded: bool) -> Self {
        self.encoded = encoded;
        self
    }

    /// 形状对应的元素个数，超出 usize 时饱和。
    pub fn len(&self) -> usize {
        (self.channels.max(0) as usize)
            .saturating_mul(self.height.max(0) as usize)
            .saturating_mul(self.width.max(0) as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 序列化为字节。
    ///
    /// 格式（大端）：version u8, channels i32, height i32, width i32, label i32,
    /// encoded u8, data_len u32, data, float_count u32, float_data。
    ///
    /// `data` 或 `float_data` 的长度超出 u32 时返回 `DbError::TooLarge`。
    pub fn encode(&self) -> Result<Vec<u8>> {
        let data_len = checked_len(self.data.len(), "datum data")?;
        let float_count = checked_len(self.float_data.len(), "datum float_data")?;
        let mut buf = Vec::with_capacity(26 + self.data.len() + self.float_data.len() * 4);
        self.write_to(&mut buf, data_len, float_count)?;
        Ok(buf)
    }

    fn write_to(&self, buf: &mut Vec<u8>, data_len: u32, float_count: u32) -> std::io::Result<()> {
        buf.write_u8(DATUM_VERSION)?;
        buf.write_i32::<BigEndian>(self.channels)?;
        buf.write_i32::<BigEndian>(self.height)?;
        buf.write_i32::<BigEndian>(self.width)?;
        buf.write_i32::<BigEndian>(self.label)?;
        buf.write_u8(self.encoded as u8)?;
        buf.write_u32::<BigEndian>(data_len)?;
        buf.extend_from_slice(&self.data);
        buf.write_u32::<BigEndian>(float_count)?;
        for &v in &self.float_data {
            buf.write_f32::<BigEndian>(v)?;
        }
        Ok(())
    }

    /// 从字节反序列化，任何格式问题都视为数据损坏。
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes).map_err(|e| match e {
            DbError::Io(io) => DbError::Corruption(format!("Truncated datum: {}", io)),
            other => other,
        })
    }

    fn read_from(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);

        let version = cursor.read_u8()?;
        if version != DATUM_VERSION {
            return Err(DbError::Corruption(format!("Unsupported datum version {}", version)));
        }
        let channels = cursor.read_i32::<BigEndian>()?;
        let height = cursor.read_i32::<BigEndian>()?;
        let width = cursor.read_i32::<BigEndian>()?;
        let label = cursor.read_i32::<BigEndian>()?;
        let encoded = match cursor.read_u8()? {
            0 => false,
            1 => true,
            b => return Err(DbError::Corruption(format!("Invalid encoded flag {}", b))),
        };

        let data_len = cursor.read_u32::<BigEndian>()? as u64;
        if data_len > remaining(&cursor) {
            return Err(DbError::Corruption("Datum data runs past end of record".into()));
        }
        let mut data = vec![0u8; data_len as usize];
        cursor.read_exact(&mut data)?;

        let float_count = cursor.read_u32::<BigEndian>()? as u64;
        if float_count * 4 > remaining(&cursor) {
            return Err(DbError::Corruption("Datum float_data runs past end of record".into()));
        }
        let mut float_data = Vec::with_capacity(float_count as usize);
        for _ in 0..float_count {
            float_data.push(cursor.read_f32::<BigEndian>()?);
        }

        if remaining(&cursor) != 0 {
            return Err(DbError::Corruption("Trailing bytes after datum".into()));
        }

        Ok(Self {
            channels,
            height,
            width,
            data,
            label,
            float_data,
            encoded,
        })
    }
}

fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    (cursor.get_ref().len() as u64).saturating_sub(cursor.position())
}
