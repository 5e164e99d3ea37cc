use crate::models::ENTRY_HEADER_SIZE;

/// 批次中的单个操作。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// 一组原子提交的写操作。
///
/// 批次内的操作按追加顺序生效，对同一个键的后续操作覆盖之前的操作。
/// 整个批次在 data.log 中作为一帧写入，恢复时要么全部可见，要么全部丢弃。
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    size: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一次写入。
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        self.size += ENTRY_HEADER_SIZE + key.len() + value.len();
        self.ops.push(BatchOp::Put { key, value });
    }

    /// 追加一次删除。
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        let key = key.into();
        self.size += ENTRY_HEADER_SIZE + key.len();
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.size = 0;
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// 编码后的负载大小（字节），不含帧头。
    pub fn approximate_size(&self) -> usize {
        self.size
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchOp> {
        self.ops.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_len_and_size() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.put("a", vec![1, 2, 3]);
        batch.delete("bb");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.approximate_size(), (9 + 1 + 3) + (9 + 2));

        let keys: Vec<&[u8]> = batch.iter().map(|op| op.key()).collect();
        assert_eq!(keys, vec![b"a".as_ref(), b"bb".as_ref()]);

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.approximate_size(), 0);
    }
}
