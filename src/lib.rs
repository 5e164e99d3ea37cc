/// 文件格式定义和存储选项。
pub mod models;

/// 底层存储管理（文件 I/O）。
pub mod storage;

/// 原子写批次。
pub mod batch;

/// 快照迭代器。
pub mod iterator;

/// 有序键值存储（Get, Write, Iter, Compact）。
pub mod db;

/// 训练样本记录及其编码。
pub mod datum;

/// Datum 数据库与循环游标。
pub mod datum_db;

/// 错误类型。
pub mod error;

pub use batch::WriteBatch;
pub use datum::Datum;
pub use datum_db::{DatumDb, DatumDbConfig, Generator, Mode};
pub use db::{DbStats, Store};
pub use error::{DbError, Result};
pub use models::StoreOptions;
