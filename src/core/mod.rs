//! 核心层：错误类型与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{CatalogError, CourseError, StoreError};
pub use shutdown::{
    join_background, run_with_graceful_shutdown, ProgressFlushCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
