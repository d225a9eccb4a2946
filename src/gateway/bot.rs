//! 课程 Bot：把解码后的 [`Action`] 路由到步骤引擎 / 考试引擎，并生成渲染请求
//!
//! 每个用户的聊天状态（语言、深链参数、等待输入的模式）只保存在内存中；
//! 持久化进度只经由 [`ProgressStore`]。单次交互中的错误记录日志后回复通用提示，不会中断服务。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::action::Action;
use super::reply::{Button, CertificateRequest, Reply, SideEffect};
use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::core::error::CourseError;
use crate::engine::{
    ExamEngine, ExamOutcome, ExamResult, QuestionView, QuizOutcome, QuizView, StepEngine, StepEntry,
    StepView,
};
use crate::progress::ProgressStore;

const LANGUAGE_PROMPT: &str = "<b>Пожалуйста, выберите язык | Please choose your language:</b>";
const GENERIC_ERROR: &str = "❗ Something went wrong, please try again.";

/// 等待用户输入自由文本的模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Awaiting {
    #[default]
    Nothing,
    CertificateName,
    Question,
}

#[derive(Debug, Clone, Default)]
struct ChatState {
    lang: Option<String>,
    start_param: Option<String>,
    awaiting: Awaiting,
}

pub struct CourseBot {
    catalog: Arc<Catalog>,
    store: Arc<ProgressStore>,
    steps: StepEngine,
    exam: Arc<ExamEngine>,
    chats: RwLock<HashMap<String, ChatState>>,
    default_lang: String,
    languages: Vec<String>,
    admin_chat_id: Option<String>,
}

impl CourseBot {
    pub fn new(catalog: Arc<Catalog>, store: Arc<ProgressStore>, config: &AppConfig) -> Self {
        let exam = ExamEngine::new(Arc::clone(&catalog), Arc::clone(&store))
            .with_idle_timeout(config.exam.idle_timeout());
        Self {
            steps: StepEngine::new(Arc::clone(&catalog), Arc::clone(&store)),
            exam: Arc::new(exam),
            catalog,
            store,
            chats: RwLock::new(HashMap::new()),
            default_lang: config.course.default_lang.clone(),
            languages: config.course.languages.clone(),
            admin_chat_id: config.admin.chat_id.clone(),
        }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn exam(&self) -> &Arc<ExamEngine> {
        &self.exam
    }

    /// 处理一次入站交互；永不返回错误
    pub async fn handle(&self, user_id: &str, username: Option<&str>, input: &str) -> Vec<Reply> {
        let action = Action::parse(input);
        tracing::debug!("User {} -> {:?}", user_id, action);
        match self.dispatch(user_id, username, action).await {
            Ok(replies) => replies,
            Err(e) => {
                tracing::error!("Error handling '{}' for user {}: {}", input, user_id, e);
                let lang = self.lang(user_id).await;
                let text = self
                    .catalog
                    .try_text("error_generic", &lang)
                    .unwrap_or_else(|| GENERIC_ERROR.to_string());
                vec![Reply::text(text)]
            }
        }
    }

    async fn dispatch(
        &self,
        user_id: &str,
        username: Option<&str>,
        action: Action,
    ) -> Result<Vec<Reply>, CourseError> {
        let lang = self.lang(user_id).await;
        let replies = match action {
            Action::Start { param } => {
                self.update_chat(user_id, |c| c.start_param = param).await;
                vec![self.language_chooser()]
            }
            Action::ChooseLanguage(code) => return self.choose_language(user_id, code).await,
            Action::Help => vec![Reply {
                text: self.catalog.text("help_brief", &lang),
                ..self.main_menu(user_id, &lang).await
            }],
            Action::BackMain => {
                self.update_chat(user_id, |c| c.awaiting = Awaiting::Nothing).await;
                vec![self.main_menu(user_id, &lang).await]
            }
            Action::ShowCourse => vec![self.course_list(user_id, &lang).await],
            Action::SelectStep(number) => match self.steps.enter(user_id, number, &lang).await {
                StepEntry::Open(view) => vec![self.step_reply(&view, &lang)],
                StepEntry::Locked { .. } => vec![self.locked_step(&lang)],
                StepEntry::Missing => vec![self.unknown(&lang)],
            },
            Action::StartQuiz(number) => match self.steps.quiz(user_id, number, &lang).await {
                StepEntry::Open(view) => vec![self.quiz_reply(&view)],
                StepEntry::Locked { .. } => vec![self.locked_step(&lang)],
                StepEntry::Missing => vec![self.unknown(&lang)],
            },
            Action::AnswerQuiz { step, choice } => {
                let outcome = self.steps.answer(user_id, step, &lang, choice).await?;
                vec![self.quiz_outcome_reply(outcome, &lang)]
            }
            Action::Locked => vec![self.locked_step(&lang)],
            Action::FinalTestCommand | Action::EnterFinal => self.enter_exam(user_id, &lang).await,
            Action::AnswerFinal { question, choice } => {
                let outcome = self.exam.answer(user_id, &lang, question, choice).await?;
                self.exam_outcome_replies(outcome, &lang)
            }
            Action::CancelFinal => {
                self.exam.cancel(user_id).await;
                vec![Reply {
                    text: self.catalog.text("cancelled", &lang),
                    ..self.main_menu(user_id, &lang).await
                }]
            }
            Action::Certificate => {
                if !self.has_passed(user_id).await {
                    vec![self.with_back(Reply::text(self.catalog.text("certificate_locked", &lang)), &lang)]
                } else {
                    let reply = Reply::text(self.catalog.text("certificate_message", &lang)).with_row(vec![
                        Button::action(self.catalog.text("enter_name_button", &lang), &Action::EnterName),
                    ]);
                    vec![self.with_back(reply, &lang)]
                }
            }
            Action::EnterName => {
                if !self.has_passed(user_id).await {
                    vec![self.with_back(Reply::text(self.catalog.text("certificate_locked", &lang)), &lang)]
                } else {
                    self.update_chat(user_id, |c| c.awaiting = Awaiting::CertificateName).await;
                    vec![Reply::text(self.catalog.text("enter_name_prompt", &lang))]
                }
            }
            Action::Bonus => vec![self.bonus(user_id, &lang).await],
            Action::Support => vec![self.support(user_id, &lang).await],
            Action::Feedback => vec![self.feedback(&lang)],
            Action::Ask => {
                self.update_chat(user_id, |c| c.awaiting = Awaiting::Question).await;
                vec![self.ask_prompt(&lang)]
            }
            Action::CancelQuestion => {
                self.update_chat(user_id, |c| c.awaiting = Awaiting::Nothing).await;
                vec![Reply {
                    text: self.catalog.text("cancelled_question", &lang),
                    ..self.main_menu(user_id, &lang).await
                }]
            }
            Action::Text(text) => self.free_text(user_id, username, &text, &lang).await,
            Action::Unknown(_) => vec![self.unknown(&lang)],
        };
        Ok(replies)
    }

    async fn choose_language(&self, user_id: &str, code: String) -> Result<Vec<Reply>, CourseError> {
        if !self.languages.iter().any(|l| *l == code) {
            let lang = self.lang(user_id).await;
            return Ok(vec![self.unknown(&lang)]);
        }
        let mut start_param = None;
        self.update_chat(user_id, |c| {
            c.lang = Some(code.clone());
            start_param = c.start_param.take();
        })
        .await;

        self.store.upsert_default(user_id).await;
        self.store.flush().await?;

        let welcome = format!(
            "{}\n\n{}",
            self.catalog.text("welcome", &code),
            self.catalog.text("overview", &code)
        );
        let mut replies = vec![Reply::text(welcome)];
        if start_param.is_some_and(|p| p.starts_with("final")) {
            replies.extend(self.enter_exam(user_id, &code).await);
        } else {
            replies.push(self.main_menu(user_id, &code).await);
        }
        Ok(replies)
    }

    async fn enter_exam(&self, user_id: &str, lang: &str) -> Vec<Reply> {
        if !self.steps.exam_eligible(user_id).await {
            let reply = Reply::text(self.catalog.text("final_locked", lang))
                .with_row(vec![Button::action(self.catalog.text("menu_show_course", lang), &Action::ShowCourse)]);
            return vec![self.with_back(reply, lang)];
        }
        let question = self.exam.start(user_id, lang).await;
        vec![self.question_reply(&question, lang)]
    }

    async fn free_text(
        &self,
        user_id: &str,
        username: Option<&str>,
        text: &str,
        lang: &str,
    ) -> Vec<Reply> {
        // 空消息不结束等待模式
        let mut awaiting = Awaiting::Nothing;
        self.update_chat(user_id, |c| {
            awaiting = if text.is_empty() {
                c.awaiting
            } else {
                std::mem::take(&mut c.awaiting)
            }
        })
        .await;

        match awaiting {
            Awaiting::CertificateName if !text.is_empty() => {
                let completion_date = self
                    .store
                    .get(user_id)
                    .await
                    .and_then(|p| p.completion_date)
                    .unwrap_or_else(|| chrono::Local::now().format("%d.%m.%Y").to_string());
                let request = CertificateRequest {
                    name: text.to_string(),
                    lang: lang.to_string(),
                    completion_date,
                };
                tracing::info!("Certificate requested by {} for '{}'", user_id, text);
                let reply = Reply::text(format!("✅ {}", self.catalog.text("cert_ready", lang)))
                    .with_effect(SideEffect::Certificate(request));
                vec![self.with_back(reply, lang)]
            }
            Awaiting::Question if !text.is_empty() => {
                let forward = SideEffect::AdminForward {
                    chat_id: self.admin_chat_id.clone(),
                    from_user: user_id.to_string(),
                    username: username.map(str::to_string),
                    text: text.to_string(),
                };
                let reply = Reply::text(self.catalog.text("ask_sent", lang)).with_effect(forward);
                vec![self.with_back(reply, lang)]
            }
            Awaiting::CertificateName => vec![Reply::text(self.catalog.text("enter_name_prompt", lang))],
            Awaiting::Question => vec![self.ask_prompt(lang)],
            Awaiting::Nothing => vec![self.unknown(lang)],
        }
    }

    fn ask_prompt(&self, lang: &str) -> Reply {
        Reply::text(self.catalog.ask_prompt(lang)).with_row(vec![Button::action(
            self.catalog.text("cancel_question", lang),
            &Action::CancelQuestion,
        )])
    }

    async fn bonus(&self, user_id: &str, lang: &str) -> Reply {
        if !self.has_passed(user_id).await {
            return self.with_back(Reply::text(self.catalog.text("bonus_locked", lang)), lang);
        }
        let text = format!(
            "{}\n\n{}",
            self.catalog.text("bonus_title", lang),
            self.catalog.text("bonus_text", lang)
        );
        let mut reply = Reply::text(text);
        if let Some(url) = self.catalog.bonus_link(lang) {
            reply = reply.with_row(vec![Button::url(self.catalog.text("btn_bonus", lang), url)]);
        }
        self.with_back(reply, lang)
    }

    async fn support(&self, user_id: &str, lang: &str) -> Reply {
        if !self.has_passed(user_id).await {
            return self.with_back(Reply::text(self.catalog.text("bonus_locked", lang)), lang);
        }
        let mut reply = Reply::text(self.catalog.support_text(lang));
        if let Some(url) = self.catalog.support_link() {
            reply = reply.with_row(vec![Button::url(self.catalog.support_button(lang), url)]);
        }
        self.with_back(reply, lang)
    }

    fn feedback(&self, lang: &str) -> Reply {
        let mut reply = Reply::text(self.catalog.text("feedback_message", lang));
        if let Some(url) = self.catalog.feedback_link(lang) {
            reply = reply.with_row(vec![Button::url(self.catalog.text("btn_feedback", lang), url)]);
        }
        self.with_back(reply, lang)
    }

    fn language_chooser(&self) -> Reply {
        let row = self
            .languages
            .iter()
            .map(|code| Button::action(language_label(code), &Action::ChooseLanguage(code.clone())))
            .collect();
        Reply::text(LANGUAGE_PROMPT).with_row(row)
    }

    /// 主菜单：证书 / 奖励 / 支持只在通过结业考试后出现
    async fn main_menu(&self, user_id: &str, lang: &str) -> Reply {
        let t = |key: &str| self.catalog.text(key, lang);
        let mut buttons = vec![
            Button::action(t("menu_show_course"), &Action::ShowCourse),
            Button::action(t("menu_final"), &Action::EnterFinal),
        ];
        if self.has_passed(user_id).await {
            buttons.push(Button::action(t("menu_certificate"), &Action::Certificate));
            buttons.push(Button::action(t("menu_bonus"), &Action::Bonus));
            buttons.push(Button::action(t("menu_support"), &Action::Support));
        }
        buttons.push(Button::action(t("menu_feedback"), &Action::Feedback));
        buttons.push(Button::action(t("menu_ask"), &Action::Ask));
        Reply::text(t("main_menu_title")).with_buttons(buttons)
    }

    /// 步骤列表：✓ 已完成，▶ 当前，🔒 锁定
    async fn course_list(&self, user_id: &str, lang: &str) -> Reply {
        let current = self.steps.unlocked_step(user_id).await;
        let buttons = self.catalog.steps().map(|(number, step)| {
            let title = step.title(lang);
            if number < current {
                Button::action(format!("✓ {number}. {title}"), &Action::SelectStep(number))
            } else if number == current {
                Button::action(format!("▶ {number}. {title}"), &Action::SelectStep(number))
            } else {
                Button::action(format!("🔒 {number}. {title}"), &Action::Locked)
            }
        });
        let reply = Reply::text(self.catalog.text("course_list", lang)).with_buttons(buttons);
        self.with_back(reply, lang)
    }

    fn step_reply(&self, view: &StepView, lang: &str) -> Reply {
        let progress = fill(
            &self.catalog.text("progress", lang),
            &[("step", view.number.to_string()), ("total", view.total.to_string())],
        );
        let text = format!(
            "<b>{}</b>\n<i>{}</i>\n\n<b>{}</b>\n\n{}",
            view.title, progress, view.header, view.body
        );
        let entry = if view.is_last {
            Button::action(self.catalog.text("menu_final", lang), &Action::EnterFinal)
        } else {
            Button::action(self.catalog.text("start_test", lang), &Action::StartQuiz(view.number))
        };
        Reply::text(text).with_buttons([
            entry,
            Button::action(self.catalog.text("back_steps", lang), &Action::ShowCourse),
        ])
    }

    fn quiz_reply(&self, view: &QuizView) -> Reply {
        let buttons = view.options.iter().enumerate().map(|(choice, option)| {
            Button::action(
                option.clone(),
                &Action::AnswerQuiz {
                    step: view.step,
                    choice,
                },
            )
        });
        Reply::text(view.question.clone()).with_buttons(buttons)
    }

    fn quiz_outcome_reply(&self, outcome: QuizOutcome, lang: &str) -> Reply {
        match outcome {
            QuizOutcome::Advanced { step, .. } | QuizOutcome::AlreadyCompleted { current: step, .. } => {
                let reply = Reply::text(self.catalog.text("correct", lang)).with_row(vec![Button::action(
                    self.next_step_label(step, lang),
                    &Action::SelectStep(step),
                )]);
                self.with_back(reply, lang)
            }
            QuizOutcome::Incorrect { step } => Reply::text(self.catalog.text("incorrect", lang))
                .with_row(vec![Button::action(self.catalog.text("retry", lang), &Action::StartQuiz(step))]),
            QuizOutcome::Locked { .. } => self.locked_step(lang),
            QuizOutcome::Missing => self.unknown(lang),
        }
    }

    fn next_step_label(&self, step: u32, lang: &str) -> String {
        match self.catalog.step(step) {
            Some(s) => format!("▶ {step}. {}", s.title(lang)),
            None => self.catalog.text("menu_show_course", lang),
        }
    }

    fn question_reply(&self, view: &QuestionView, lang: &str) -> Reply {
        let header = fill(
            &self.catalog.text("test_progress", lang),
            &[("current", (view.index + 1).to_string()), ("total", view.total.to_string())],
        );
        let buttons = view.options.iter().enumerate().map(|(choice, option)| {
            Button::action(
                option.clone(),
                &Action::AnswerFinal {
                    question: view.index,
                    choice,
                },
            )
        });
        Reply::text(format!("❓ {}\n\n{}", header, view.question))
            .with_buttons(buttons)
            .with_row(vec![Button::action(self.catalog.text("cancel_test", lang), &Action::CancelFinal)])
    }

    fn exam_outcome_replies(&self, outcome: ExamOutcome, lang: &str) -> Vec<Reply> {
        match outcome {
            ExamOutcome::Correct(next) => vec![
                Reply::text(self.catalog.text("final_correct", lang)),
                self.question_reply(&next, lang),
            ],
            ExamOutcome::Incorrect(same) => vec![
                Reply::text(self.catalog.text("incorrect", lang)),
                self.question_reply(&same, lang),
            ],
            ExamOutcome::Stale(current) => vec![self.question_reply(&current, lang)],
            ExamOutcome::NoSession => vec![self.unknown(lang)],
            ExamOutcome::Finished(ExamResult::Passed { .. }) => {
                let t = |key: &str| self.catalog.text(key, lang);
                let mut reply = Reply::text(t("final_message")).with_buttons([
                    Button::action(t("menu_bonus"), &Action::Bonus),
                    Button::action(t("menu_certificate"), &Action::Certificate),
                ]);
                reply = match self.catalog.support_link() {
                    Some(url) => reply.with_row(vec![Button::url(t("menu_support"), url)]),
                    None => reply.with_row(vec![Button::action(t("menu_support"), &Action::Support)]),
                };
                vec![self.with_back(reply, lang)]
            }
            ExamOutcome::Finished(ExamResult::Failed { score, total }) => {
                let progress = fill(
                    &self.catalog.text("test_progress", lang),
                    &[("current", score.to_string()), ("total", total.to_string())],
                );
                let reply = Reply::text(format!(
                    "😔 {}\n\n{}",
                    self.catalog.text("final_failed", lang),
                    progress
                ))
                .with_row(vec![Button::action(self.catalog.text("menu_final", lang), &Action::EnterFinal)]);
                vec![self.with_back(reply, lang)]
            }
        }
    }

    fn locked_step(&self, lang: &str) -> Reply {
        Reply::alert(self.catalog.text("locked_step", lang))
    }

    fn unknown(&self, lang: &str) -> Reply {
        self.with_back(Reply::text(self.catalog.text("unknown", lang)), lang)
    }

    fn with_back(&self, reply: Reply, lang: &str) -> Reply {
        reply.with_row(vec![Button::action(self.catalog.text("back_main", lang), &Action::BackMain)])
    }

    async fn has_passed(&self, user_id: &str) -> bool {
        self.store
            .get(user_id)
            .await
            .is_some_and(|p| p.final_passed)
    }

    async fn lang(&self, user_id: &str) -> String {
        self.chats
            .read()
            .await
            .get(user_id)
            .and_then(|c| c.lang.clone())
            .unwrap_or_else(|| self.default_lang.clone())
    }

    async fn update_chat(&self, user_id: &str, f: impl FnOnce(&mut ChatState)) {
        let mut chats = self.chats.write().await;
        f(chats.entry(user_id.to_string()).or_default());
    }
}

fn language_label(code: &str) -> String {
    match code {
        "ru" => "🇷🇺 Русский".to_string(),
        "en" => "🇬🇧 English".to_string(),
        other => other.to_string(),
    }
}

/// 替换模板中的 `{name}` 占位符
fn fill(template: &str, values: &[(&str, String)]) -> String {
    values.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}
