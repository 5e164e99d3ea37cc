use std::collections::BTreeMap;
use std::fs::File;
use std::ops::Bound;
use std::sync::Arc;
use crate::error::Result;
use crate::models::ValuePointer;
use crate::storage::read_value_at;

/// 有序快照迭代器。
///
/// 创建时固定索引和文件句柄，之后的写入和压缩对它不可见。
/// 新建的迭代器未定位，需要先调用 `seek_to_first` 或 `seek`。
pub struct StoreIterator {
    file: Arc<File>,
    index: Arc<BTreeMap<Vec<u8>, ValuePointer>>,
    /// 当前位置的键和值，定位时立即加载。
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl StoreIterator {
    pub(crate) fn new(file: Arc<File>, index: Arc<BTreeMap<Vec<u8>, ValuePointer>>) -> Self {
        Self {
            file,
            index,
            current: None,
        }
    }

    /// 快照中的键数量。
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }

    /// 定位到第一个键。
    pub fn seek_to_first(&mut self) -> Result<()> {
        let first = self.index.iter().next().map(|(k, p)| (k.clone(), *p));
        self.load(first)
    }

    /// 定位到第一个 >= target 的键。
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        let found = self
            .index
            .range::<[u8], _>((Bound::Included(target), Bound::Unbounded))
            .next()
            .map(|(k, p)| (k.clone(), *p));
        self.load(found)
    }

    /// 前进到下一个键。未定位时什么也不做。
    pub fn next(&mut self) -> Result<()> {
        let following = match &self.current {
            Some((key, _)) => self
                .index
                .range::<[u8], _>((Bound::Excluded(key.as_slice()), Bound::Unbounded))
                .next()
                .map(|(k, p)| (k.clone(), *p)),
            None => return Ok(()),
        };
        self.load(following)
    }

    fn load(&mut self, entry: Option<(Vec<u8>, ValuePointer)>) -> Result<()> {
        self.current = None;
        if let Some((key, pointer)) = entry {
            let value = read_value_at(&self.file, pointer)?;
            self.current = Some((key, value));
        }
        Ok(())
    }
}
