//! 步骤推进引擎
//!
//! 每个用户的状态为「当前解锁步骤」：小测答对且步骤等于当前步骤时前进一步并立即 flush；
//! 答错不修改任何状态。超过已解锁步骤的请求一律视为锁定，与传输层是否隐藏按钮无关。

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::core::error::CourseError;
use crate::progress::{ProgressStore, StepUpdate};

/// 渲染一步所需的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepView {
    pub number: u32,
    pub total: u32,
    pub title: String,
    pub header: String,
    pub body: String,
    /// 最后一步提供结业考试入口而不是小测
    pub is_last: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizView {
    pub step: u32,
    pub question: String,
    pub options: Vec<String>,
}

/// 进入步骤或小测的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEntry<T> {
    Open(T),
    Locked { requested: u32, unlocked: u32 },
    /// 步骤不存在，或最后一步请求小测
    Missing,
}

/// 提交小测答案的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizOutcome {
    /// 前进到 `step`，已 flush
    Advanced { step: u32, is_last: bool },
    /// 答对但该步此前已完成（重复投递或复习），未修改
    AlreadyCompleted { step: u32, current: u32 },
    Incorrect { step: u32 },
    Locked { requested: u32, unlocked: u32 },
    Missing,
}

pub struct StepEngine {
    catalog: Arc<Catalog>,
    store: Arc<ProgressStore>,
}

impl StepEngine {
    pub fn new(catalog: Arc<Catalog>, store: Arc<ProgressStore>) -> Self {
        Self { catalog, store }
    }

    pub fn total_steps(&self) -> u32 {
        self.catalog.step_count()
    }

    /// 当前解锁的步骤（新用户会先建默认记录）
    pub async fn unlocked_step(&self, user_id: &str) -> u32 {
        self.store.upsert_default(user_id).await.step
    }

    /// 已到达最后一步即可参加结业考试
    pub async fn exam_eligible(&self, user_id: &str) -> bool {
        self.unlocked_step(user_id).await >= self.total_steps()
    }

    pub async fn enter(&self, user_id: &str, number: u32, lang: &str) -> StepEntry<StepView> {
        let Some(step) = self.catalog.step(number) else {
            return StepEntry::Missing;
        };
        let unlocked = self.unlocked_step(user_id).await;
        if number > unlocked {
            tracing::debug!("User {} requested locked step {} (unlocked {})", user_id, number, unlocked);
            return StepEntry::Locked {
                requested: number,
                unlocked,
            };
        }
        StepEntry::Open(StepView {
            number,
            total: self.total_steps(),
            title: step.title(lang).to_string(),
            header: step.header(lang).to_string(),
            body: step.body(lang).to_string(),
            is_last: self.catalog.is_last_step(number),
        })
    }

    pub async fn quiz(&self, user_id: &str, number: u32, lang: &str) -> StepEntry<QuizView> {
        let Some(quiz) = self.catalog.step(number).and_then(|s| s.test.as_ref()) else {
            return StepEntry::Missing;
        };
        if self.catalog.is_last_step(number) {
            return StepEntry::Missing;
        }
        let unlocked = self.unlocked_step(user_id).await;
        if number > unlocked {
            return StepEntry::Locked {
                requested: number,
                unlocked,
            };
        }
        StepEntry::Open(QuizView {
            step: number,
            question: quiz.question(lang).to_string(),
            options: quiz.options(lang).to_vec(),
        })
    }

    /// 处理小测答案：只在 `number == 当前步骤` 且答对时前进
    pub async fn answer(
        &self,
        user_id: &str,
        number: u32,
        lang: &str,
        choice: usize,
    ) -> Result<QuizOutcome, CourseError> {
        let Some(quiz) = self.catalog.step(number).and_then(|s| s.test.as_ref()) else {
            return Ok(QuizOutcome::Missing);
        };
        if self.catalog.is_last_step(number) {
            return Ok(QuizOutcome::Missing);
        }

        let current = self.unlocked_step(user_id).await;
        if number > current {
            return Ok(QuizOutcome::Locked {
                requested: number,
                unlocked: current,
            });
        }
        if !quiz.is_correct(lang, choice) {
            return Ok(QuizOutcome::Incorrect { step: number });
        }
        if number < current {
            return Ok(QuizOutcome::AlreadyCompleted {
                step: number,
                current,
            });
        }

        let next = number + 1;
        match self.store.advance_step(user_id, next).await? {
            StepUpdate::Advanced => {
                tracing::info!("User {} advanced to step {}", user_id, next);
                self.store.flush().await?;
                Ok(QuizOutcome::Advanced {
                    step: next,
                    is_last: self.catalog.is_last_step(next),
                })
            }
            StepUpdate::Unchanged { current } => Ok(QuizOutcome::AlreadyCompleted {
                step: number,
                current,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::catalog::fixtures;

    async fn engine(dir: &TempDir) -> (StepEngine, Arc<ProgressStore>) {
        let store = Arc::new(
            ProgressStore::load(dir.path().join("progress.json"))
                .await
                .unwrap(),
        );
        (
            StepEngine::new(Arc::new(fixtures::catalog()), Arc::clone(&store)),
            store,
        )
    }

    #[tokio::test]
    async fn test_correct_answer_advances_and_flushes() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(&dir).await;

        let outcome = engine.answer("u1", 1, "ru", 1).await.unwrap();
        assert_eq!(outcome, QuizOutcome::Advanced { step: 2, is_last: false });
        assert_eq!(store.get("u1").await.unwrap().step, 2);
        assert_eq!(store.flush_count(), 1);

        let on_disk = ProgressStore::load(store.path()).await.unwrap();
        assert_eq!(on_disk.get("u1").await.unwrap().step, 2);
    }

    #[tokio::test]
    async fn test_incorrect_answer_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(&dir).await;

        let outcome = engine.answer("u1", 1, "ru", 0).await.unwrap();
        assert_eq!(outcome, QuizOutcome::Incorrect { step: 1 });
        assert_eq!(store.get("u1").await.unwrap().step, 1);
        assert_eq!(store.flush_count(), 0);
    }

    #[tokio::test]
    async fn test_answer_uses_locale_specific_index() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;
        // ru 正确下标为 1，en 为 0
        assert_eq!(
            engine.answer("u1", 1, "en", 1).await.unwrap(),
            QuizOutcome::Incorrect { step: 1 }
        );
        assert!(matches!(
            engine.answer("u1", 1, "en", 0).await.unwrap(),
            QuizOutcome::Advanced { step: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_replayed_answer_does_not_double_advance() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(&dir).await;

        engine.answer("u1", 1, "ru", 1).await.unwrap();
        let replay = engine.answer("u1", 1, "ru", 1).await.unwrap();
        assert_eq!(replay, QuizOutcome::AlreadyCompleted { step: 1, current: 2 });
        assert_eq!(store.get("u1").await.unwrap().step, 2);
        assert_eq!(store.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_locked_step_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(&dir).await;

        assert_eq!(
            engine.enter("u1", 3, "ru").await,
            StepEntry::Locked { requested: 3, unlocked: 1 }
        );
        assert_eq!(
            engine.answer("u1", 2, "ru", 2).await.unwrap(),
            QuizOutcome::Locked { requested: 2, unlocked: 1 }
        );
        assert!(matches!(engine.quiz("u1", 2, "ru").await, StepEntry::Locked { .. }));
        assert_eq!(store.get("u1").await.unwrap().step, 1);
    }

    #[tokio::test]
    async fn test_enter_renders_localized_step() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;

        let StepEntry::Open(view) = engine.enter("u1", 1, "en").await else {
            panic!("step 1 should be open");
        };
        assert_eq!(view.title, "Idea");
        assert_eq!(view.body, "Body 1");
        assert_eq!(view.total, 3);
        assert!(!view.is_last);
        assert_eq!(engine.enter("u1", 9, "en").await, StepEntry::Missing);
        assert_eq!(engine.enter("u1", 0, "en").await, StepEntry::Missing);
    }

    #[tokio::test]
    async fn test_last_step_has_no_quiz_and_unlocks_exam() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;

        engine.answer("u1", 1, "ru", 1).await.unwrap();
        assert!(!engine.exam_eligible("u1").await);
        let outcome = engine.answer("u1", 2, "ru", 2).await.unwrap();
        assert_eq!(outcome, QuizOutcome::Advanced { step: 3, is_last: true });
        assert!(engine.exam_eligible("u1").await);

        let StepEntry::Open(view) = engine.enter("u1", 3, "ru").await else {
            panic!("last step should be open");
        };
        assert!(view.is_last);
        assert_eq!(engine.quiz("u1", 3, "ru").await, StepEntry::Missing);
        assert_eq!(engine.answer("u1", 3, "ru", 0).await.unwrap(), QuizOutcome::Missing);
    }

    #[tokio::test]
    async fn test_step_never_decreases_over_mixed_sequence() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(&dir).await;

        let answers = [(1, 0), (1, 1), (1, 1), (2, 0), (3, 0), (1, 1), (2, 2), (2, 2), (1, 0)];
        let mut last = 1;
        for (step, choice) in answers {
            engine.answer("u1", step, "ru", choice).await.unwrap();
            let now = store.get("u1").await.unwrap().step;
            assert!(now >= last);
            assert!(now <= last + 1);
            last = now;
        }
        assert_eq!(last, 3);
    }
}
