//! 错误类型
//!
//! 启动期错误（课程文件、进度文件损坏）直接终止进程；单次交互中的错误由 Bot 记录日志后回复通用提示。

use std::path::PathBuf;

use thiserror::Error;

/// 课程目录加载错误（均为启动期致命错误）
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Course file not found: {0}")]
    NotFound(PathBuf),

    #[error("Course file read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Course JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid course data: {0}")]
    Invalid(String),
}

/// 进度存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Progress file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 文件存在但无法解析：启动期致命
    #[error("Progress file parse error: {0}")]
    Parse(serde_json::Error),

    #[error("Progress serialize error: {0}")]
    Serialize(serde_json::Error),
}

/// 课程引擎在单次交互中可能返回的错误
#[derive(Error, Debug)]
pub enum CourseError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown user: {0}")]
    UnknownUser(String),
}
