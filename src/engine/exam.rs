//! 结业考试引擎
//!
//! 每个用户一个短生命周期的内存会话（不持久化）：进入时无条件重置为第 0 题，答对才前进，
//! 答错重复同一题。全部答对后通过 [`ProgressStore::mark_passed`] 写入持久化的通过标记。
//! 同一用户的并发提交（如双击）经会话表的互斥锁串行化，且题号不匹配的提交视为过期投递。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::catalog::Catalog;
use crate::core::error::CourseError;
use crate::progress::ProgressStore;

/// 进行中的考试会话；始终满足 `question_index == score`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamSession {
    pub question_index: usize,
    pub score: usize,
    last_active: Instant,
}

impl ExamSession {
    fn new() -> Self {
        Self {
            question_index: 0,
            score: 0,
            last_active: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() > timeout
    }
}

/// 题目展示（不包含正确答案）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub index: usize,
    pub total: usize,
    pub question: String,
    pub options: Vec<String>,
}

/// 结束时的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamResult {
    Passed {
        score: usize,
        total: usize,
        completion_date: String,
        first_pass: bool,
    },
    Failed {
        score: usize,
        total: usize,
    },
}

/// 提交答案的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamOutcome {
    Correct(QuestionView),
    /// 答错，重新展示同一题
    Incorrect(QuestionView),
    Finished(ExamResult),
    /// 题号与会话当前题不符（重复或迟到的投递），未修改
    Stale(QuestionView),
    NoSession,
}

pub struct ExamEngine {
    catalog: Arc<Catalog>,
    store: Arc<ProgressStore>,
    sessions: Mutex<HashMap<String, ExamSession>>,
    idle_timeout: Option<Duration>,
}

impl ExamEngine {
    pub fn new(catalog: Arc<Catalog>, store: Arc<ProgressStore>) -> Self {
        Self {
            catalog,
            store,
            sessions: Mutex::new(HashMap::new()),
            idle_timeout: None,
        }
    }

    /// 闲置超过 timeout 的会话会被 [`ExamEngine::cleanup_expired`] 清除
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn total_questions(&self) -> usize {
        self.catalog.final_questions().len()
    }

    /// 进入考试：丢弃已有会话，从第 0 题开始
    pub async fn start(&self, user_id: &str, lang: &str) -> QuestionView {
        let mut sessions = self.sessions.lock().await;
        if sessions.insert(user_id.to_string(), ExamSession::new()).is_some() {
            tracing::debug!("Restarting final exam for {}", user_id);
        }
        self.question_view(0, lang)
    }

    pub async fn session(&self, user_id: &str) -> Option<ExamSession> {
        self.sessions.lock().await.get(user_id).copied()
    }

    pub async fn answer(
        &self,
        user_id: &str,
        lang: &str,
        question_index: usize,
        choice: usize,
    ) -> Result<ExamOutcome, CourseError> {
        let total = self.total_questions();
        let finished = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(user_id) else {
                return Ok(ExamOutcome::NoSession);
            };
            session.touch();
            if question_index != session.question_index {
                tracing::debug!(
                    "Stale exam answer from {} for question {} (current {})",
                    user_id,
                    question_index,
                    session.question_index
                );
                return Ok(ExamOutcome::Stale(self.question_view(session.question_index, lang)));
            }

            let correct = self
                .catalog
                .final_questions()
                .get(question_index)
                .is_some_and(|q| q.is_correct(lang, choice));
            if !correct {
                return Ok(ExamOutcome::Incorrect(self.question_view(question_index, lang)));
            }

            session.score += 1;
            session.question_index += 1;
            if session.question_index < total {
                return Ok(ExamOutcome::Correct(self.question_view(session.question_index, lang)));
            }
            sessions.remove(user_id)
        };

        let score = finished.map(|s| s.score).unwrap_or_default();
        self.finalize(user_id, score, total).await.map(ExamOutcome::Finished)
    }

    /// 取消考试：丢弃会话，不记录分数，不影响持久化进度
    pub async fn cancel(&self, user_id: &str) -> bool {
        self.sessions.lock().await.remove(user_id).is_some()
    }

    /// 清除闲置过期的会话，返回清除数量
    pub async fn cleanup_expired(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(timeout));
        before - sessions.len()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn finalize(&self, user_id: &str, score: usize, total: usize) -> Result<ExamResult, CourseError> {
        if score < total {
            return Ok(ExamResult::Failed { score, total });
        }
        let today = chrono::Local::now().format("%d.%m.%Y").to_string();
        let first_pass = self.store.mark_passed(user_id, &today).await;
        self.store.flush().await?;
        let completion_date = self
            .store
            .get(user_id)
            .await
            .and_then(|p| p.completion_date)
            .unwrap_or(today);
        tracing::info!(
            "User {} passed the final exam ({}/{}), first pass: {}",
            user_id,
            score,
            total,
            first_pass
        );
        Ok(ExamResult::Passed {
            score,
            total,
            completion_date,
            first_pass,
        })
    }

    fn question_view(&self, index: usize, lang: &str) -> QuestionView {
        let questions = self.catalog.final_questions();
        let (question, options) = questions
            .get(index)
            .map(|q| (q.question(lang).to_string(), q.options(lang).to_vec()))
            .unwrap_or_default();
        QuestionView {
            index,
            total: questions.len(),
            question,
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::catalog::fixtures;

    async fn engine(dir: &TempDir) -> (ExamEngine, Arc<ProgressStore>) {
        let store = Arc::new(
            ProgressStore::load(dir.path().join("progress.json"))
                .await
                .unwrap(),
        );
        (
            ExamEngine::new(Arc::new(fixtures::catalog()), Arc::clone(&store)),
            store,
        )
    }

    async fn assert_index_matches_score(engine: &ExamEngine, user: &str) {
        if let Some(s) = engine.session(user).await {
            assert_eq!(s.question_index, s.score);
        }
    }

    #[tokio::test]
    async fn test_all_correct_marks_passed() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(&dir).await;
        store.upsert_default("u1").await;

        let first = engine.start("u1", "ru").await;
        assert_eq!(first.index, 0);
        assert_eq!(first.total, 2);
        assert_eq!(first.options, vec!["x", "y"]);

        let outcome = engine.answer("u1", "ru", 0, 0).await.unwrap();
        assert!(matches!(outcome, ExamOutcome::Correct(ref q) if q.index == 1));
        assert_index_matches_score(&engine, "u1").await;

        let outcome = engine.answer("u1", "ru", 1, 2).await.unwrap();
        let ExamOutcome::Finished(ExamResult::Passed { score, total, completion_date, first_pass }) = outcome else {
            panic!("expected a passed exam");
        };
        assert_eq!((score, total), (2, 2));
        assert!(first_pass);
        assert!(!completion_date.is_empty());
        assert!(engine.session("u1").await.is_none());

        let p = store.get("u1").await.unwrap();
        assert!(p.final_passed);
        assert_eq!(p.completion_date, Some(completion_date));
        assert_eq!(p.step, 1);
        assert_eq!(store.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_answer_repeats_question() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;
        engine.start("u1", "en").await;

        for _ in 0..3 {
            let outcome = engine.answer("u1", "en", 0, 1).await.unwrap();
            assert!(matches!(outcome, ExamOutcome::Incorrect(ref q) if q.index == 0));
            let s = engine.session("u1").await.unwrap();
            assert_eq!((s.question_index, s.score), (0, 0));
        }
    }

    #[tokio::test]
    async fn test_second_pass_keeps_completion_date() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(&dir).await;
        store.upsert_default("u1").await;
        store.mark_passed("u1", "01.01.2024").await;

        engine.start("u1", "en").await;
        engine.answer("u1", "en", 0, 0).await.unwrap();
        let outcome = engine.answer("u1", "en", 1, 1).await.unwrap();
        assert!(matches!(
            outcome,
            ExamOutcome::Finished(ExamResult::Passed { first_pass: false, ref completion_date, .. })
                if completion_date == "01.01.2024"
        ));
        assert_eq!(
            store.get("u1").await.unwrap().completion_date.as_deref(),
            Some("01.01.2024")
        );
    }

    #[tokio::test]
    async fn test_restart_discards_progress() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;
        engine.start("u1", "ru").await;
        engine.answer("u1", "ru", 0, 0).await.unwrap();
        assert_eq!(engine.session("u1").await.unwrap().score, 1);

        engine.start("u1", "ru").await;
        let s = engine.session("u1").await.unwrap();
        assert_eq!((s.question_index, s.score), (0, 0));
    }

    #[tokio::test]
    async fn test_cancel_leaves_durable_state_untouched() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(&dir).await;
        store.upsert_default("u1").await;
        store.advance_step("u1", 2).await.unwrap();

        engine.start("u1", "ru").await;
        engine.answer("u1", "ru", 0, 0).await.unwrap();
        assert!(engine.cancel("u1").await);
        assert!(!engine.cancel("u1").await);

        let p = store.get("u1").await.unwrap();
        assert!(!p.final_passed);
        assert_eq!(p.step, 2);
        assert_eq!(
            engine.answer("u1", "ru", 1, 2).await.unwrap(),
            ExamOutcome::NoSession
        );
    }

    #[tokio::test]
    async fn test_stale_and_duplicate_answers_do_not_double_count() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;
        engine.start("u1", "ru").await;

        engine.answer("u1", "ru", 0, 0).await.unwrap();
        let replay = engine.answer("u1", "ru", 0, 0).await.unwrap();
        assert!(matches!(replay, ExamOutcome::Stale(ref q) if q.index == 1));
        let s = engine.session("u1").await.unwrap();
        assert_eq!((s.question_index, s.score), (1, 1));
    }

    #[tokio::test]
    async fn test_concurrent_double_tap_counts_once() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;
        let engine = Arc::new(engine);
        engine.start("u1", "ru").await;

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.answer("u1", "ru", 0, 0).await.unwrap() })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.answer("u1", "ru", 0, 0).await.unwrap() })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        let correct = results
            .iter()
            .filter(|o| matches!(o, ExamOutcome::Correct(_)))
            .count();
        assert_eq!(correct, 1);
        let s = engine.session("u1").await.unwrap();
        assert_eq!((s.question_index, s.score), (1, 1));
    }

    #[tokio::test]
    async fn test_cleanup_expired_sessions() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;
        let engine = engine.with_idle_timeout(Some(Duration::from_millis(20)));
        engine.start("u1", "ru").await;
        assert_eq!(engine.cleanup_expired().await, 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        engine.start("u2", "ru").await;
        assert_eq!(engine.cleanup_expired().await, 1);
        assert!(engine.session("u1").await.is_none());
        assert!(engine.session("u2").await.is_some());
    }

    #[tokio::test]
    async fn test_invariant_holds_for_mixed_answers() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir).await;
        engine.start("u1", "ru").await;

        let answers = [(0, 1), (0, 0), (1, 0), (1, 1), (0, 0), (1, 2)];
        for (q, choice) in answers {
            engine.answer("u1", "ru", q, choice).await.unwrap();
            assert_index_matches_score(&engine, "u1").await;
        }
        assert!(engine.session("u1").await.is_none());
    }
}
