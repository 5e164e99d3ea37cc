use thiserror::Error;
use std::io;

/// 数据库自定义错误类型。
#[derive(Error, Debug)]
pub enum DbError {
    /// IO 错误包装。
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// 配置文件解析错误包装。
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 数据损坏错误（例如：校验和不匹配，无效的 UTF-8，Datum 解码失败）。
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// 键未找到错误。
    #[error("Key not found: {0}")]
    NotFound(String),

    /// 数据库锁中毒（之前的操作 panic 了）
    #[error("Database lock is poisoned, data may be inconsistent")]
    LockPoisoned,

    /// 文件未打开（内部错误）
    #[error("File not open")]
    FileNotOpen,

    /// 长度超出磁盘格式的 u32 上限。
    #[error("Record too large: {0}")]
    TooLarge(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 以 error_if_exists 打开时数据库已存在。
    #[error("Database already exists: {0}")]
    AlreadyExists(String),

    /// 未设置 create_if_missing 时数据库不存在。
    #[error("Database does not exist: {0}")]
    Missing(String),

    /// 对只读数据库执行写操作。
    #[error("Database is read-only: {0}")]
    ReadOnly(String),

    /// 重复打开同一个句柄。
    #[error("Already opened: {0}")]
    AlreadyOpened(String),

    /// 在未打开的句柄上操作。
    #[error("Not opened: {0}")]
    NotOpened(String),

    /// 只有 Read 模式才能创建 Generator。
    #[error("Only a datum db in read mode can create a generator: {0}")]
    NotReadMode(String),
}

/// DbError 的 Result 类型别名。
pub type Result<T> = std::result::Result<T, DbError>;
