//! 课程 Bot - 分步课程、结业考试与进度持久化
//!
//! 模块划分：
//! - **catalog**: 只读课程目录（步骤、小测、结业考试、多语言文案）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、优雅关闭
//! - **engine**: 步骤推进引擎与结业考试引擎
//! - **gateway**: 动作解码、渲染请求、Bot 路由、本地控制台传输
//! - **observability**: 日志初始化
//! - **progress**: 进度存储与后台自动保存

pub mod catalog;
pub mod config;
pub mod core;
pub mod engine;
pub mod gateway;
pub mod observability;
pub mod progress;

pub use catalog::Catalog;
pub use gateway::{Action, CourseBot, Reply};
pub use progress::{AutosaveScheduler, ProgressStore, UserProgress};
