//! 进度存储
//!
//! 内存中的 user_id -> [`UserProgress`] 映射，镜像到单个 JSON 文件。
//! 所有修改与 flush 互斥（写锁 / flush 期间持有读锁），读操作之间以及读与 flush 之间可并发。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::core::error::{CourseError, StoreError};

/// 单个用户的持久化进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    /// 下一个已解锁的步骤（1 = 尚未完成任何步骤），只增不减
    pub step: u32,
    #[serde(default)]
    pub final_passed: bool,
    /// 首次通过结业考试的日期，设置后不再改变
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
}

impl Default for UserProgress {
    fn default() -> Self {
        Self {
            step: 1,
            final_passed: false,
            completion_date: None,
        }
    }
}

/// advance_step 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUpdate {
    Advanced,
    /// 请求与当前状态不符（重复投递或跳步），未修改
    Unchanged { current: u32 },
}

/// 进度存储：显式 load / flush 生命周期，由调用方以 Arc 共享
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, UserProgress>>,
    /// 串行化并发 flush，保证临时文件不被两个写者同时使用
    flush_lock: Mutex<()>,
    flushes: AtomicU64,
}

impl ProgressStore {
    /// 启动时加载；文件不存在则为空，存在但无法解析则返回错误
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(data) => serde_json::from_str(&data).map_err(StoreError::Parse)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };
        tracing::info!(
            "Progress store loaded from {}: {} users",
            path.display(),
            records.len()
        );
        Ok(Self {
            path,
            records: RwLock::new(records),
            flush_lock: Mutex::new(()),
            flushes: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, user_id: &str) -> Option<UserProgress> {
        self.records.read().await.get(user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// 不存在时创建 `{step: 1, final_passed: false}`；幂等
    pub async fn upsert_default(&self, user_id: &str) -> UserProgress {
        if let Some(existing) = self.get(user_id).await {
            return existing;
        }
        let mut records = self.records.write().await;
        records.entry(user_id.to_string()).or_default().clone()
    }

    /// 仅当 `new_step == current + 1` 时前进；重复或跳步的请求不做修改
    pub async fn advance_step(&self, user_id: &str, new_step: u32) -> Result<StepUpdate, CourseError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(user_id)
            .ok_or_else(|| CourseError::UnknownUser(user_id.to_string()))?;
        if new_step != record.step + 1 {
            tracing::debug!(
                "Ignoring advance for {} to step {} (current {})",
                user_id,
                new_step,
                record.step
            );
            return Ok(StepUpdate::Unchanged { current: record.step });
        }
        record.step = new_step;
        Ok(StepUpdate::Advanced)
    }

    /// 标记通过结业考试；已有 completion_date 时不覆盖。返回是否为首次通过
    pub async fn mark_passed(&self, user_id: &str, date: &str) -> bool {
        let mut records = self.records.write().await;
        let record = records.entry(user_id.to_string()).or_default();
        let first = !record.final_passed;
        record.final_passed = true;
        if record.completion_date.is_none() {
            record.completion_date = Some(date.to_string());
        }
        first
    }

    /// 将完整映射写入磁盘：先写临时文件再 rename，读者不会看到写了一半的文件
    pub async fn flush(&self) -> Result<(), StoreError> {
        let _flush_guard = self.flush_lock.lock().await;
        let records = self.records.read().await;
        let json = serde_json::to_string_pretty(&*records).map_err(StoreError::Serialize)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let temp_file = self.temp_path();
        tokio::fs::write(&temp_file, json.as_bytes()).await?;
        tokio::fs::rename(&temp_file, &self.path).await?;
        drop(records);

        self.flushes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Progress flushed to {}", self.path.display());
        Ok(())
    }

    /// 成功 flush 的次数
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "progress.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;

    async fn store_in(dir: &TempDir) -> ProgressStore {
        ProgressStore::load(dir.path().join("progress.json")).await.unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        assert!(store.is_empty().await);
        assert!(store.get("u1").await.is_none());
    }

    #[tokio::test]
    async fn test_load_garbage_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{ broken").unwrap();
        assert!(matches!(
            ProgressStore::load(&path).await,
            Err(StoreError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_default_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        assert_eq!(store.upsert_default("u1").await, UserProgress::default());
        store.advance_step("u1", 2).await.unwrap();
        assert_eq!(store.upsert_default("u1").await.step, 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_advance_step_rejects_duplicates_and_skips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.upsert_default("u1").await;

        assert_eq!(store.advance_step("u1", 2).await.unwrap(), StepUpdate::Advanced);
        assert_eq!(
            store.advance_step("u1", 2).await.unwrap(),
            StepUpdate::Unchanged { current: 2 }
        );
        assert_eq!(
            store.advance_step("u1", 4).await.unwrap(),
            StepUpdate::Unchanged { current: 2 }
        );
        assert_eq!(
            store.advance_step("u1", 1).await.unwrap(),
            StepUpdate::Unchanged { current: 2 }
        );
        assert_eq!(store.get("u1").await.unwrap().step, 2);
    }

    #[tokio::test]
    async fn test_advance_unknown_user_errors() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        assert!(matches!(
            store.advance_step("ghost", 2).await,
            Err(CourseError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_passed_keeps_first_date() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.upsert_default("u1").await;

        assert!(store.mark_passed("u1", "01.02.2025").await);
        assert!(!store.mark_passed("u1", "05.06.2026").await);

        let p = store.get("u1").await.unwrap();
        assert!(p.final_passed);
        assert_eq!(p.completion_date.as_deref(), Some("01.02.2025"));
    }

    #[tokio::test]
    async fn test_flush_round_trips_through_reload() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.upsert_default("u1").await;
        store.advance_step("u1", 2).await.unwrap();
        store.upsert_default("u2").await;
        store.mark_passed("u2", "10.10.2025").await;
        store.flush().await.unwrap();
        assert_eq!(store.flush_count(), 1);
        assert!(!dir.path().join("progress.json.tmp").exists());

        let reloaded = store_in(&dir).await;
        assert_eq!(reloaded.get("u1").await.unwrap().step, 2);
        let u2 = reloaded.get("u2").await.unwrap();
        assert!(u2.final_passed);
        assert_eq!(u2.completion_date.as_deref(), Some("10.10.2025"));
    }

    #[tokio::test]
    async fn test_file_format_is_readable_json() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.upsert_default("42").await;
        store.flush().await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("progress.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["42"]["step"], 1);
        assert_eq!(value["42"]["final_passed"], false);
        assert!(raw.contains('\n'));
    }

    #[tokio::test]
    async fn test_concurrent_advances_apply_once() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir).await);
        store.upsert_default("u1").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let update = store.advance_step("u1", 2).await.unwrap();
                store.flush().await.unwrap();
                update
            }));
        }
        let mut advanced = 0;
        for h in handles {
            if h.await.unwrap() == StepUpdate::Advanced {
                advanced += 1;
            }
        }
        assert_eq!(advanced, 1);
        assert_eq!(store.get("u1").await.unwrap().step, 2);
        assert_eq!(store.flush_count(), 8);
    }
}
