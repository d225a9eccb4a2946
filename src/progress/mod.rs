//! 进度持久化：进度存储与后台自动保存

pub mod autosave;
pub mod store;

pub use autosave::AutosaveScheduler;
pub use store::{ProgressStore, StepUpdate, UserProgress};
