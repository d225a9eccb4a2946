//! 传输层动作
//!
//! 入站的按钮回调 / 文本在边界处解码一次为 [`Action`]，之后由 Bot 穷尽匹配；
//! 出站按钮也由 [`Action::token`] 编码，保证往返一致。选项下标从 0 开始。

use std::fmt;

/// 用户的一次交互
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `/start [param]`：选择语言；param 以 `final` 开头时选完语言直接进入考试
    Start { param: Option<String> },
    /// `/finaltest`
    FinalTestCommand,
    /// `/help`
    Help,
    ChooseLanguage(String),
    ShowCourse,
    SelectStep(u32),
    StartQuiz(u32),
    AnswerQuiz { step: u32, choice: usize },
    EnterFinal,
    AnswerFinal { question: usize, choice: usize },
    CancelFinal,
    Certificate,
    EnterName,
    Bonus,
    Support,
    Feedback,
    Ask,
    CancelQuestion,
    BackMain,
    /// 锁定步骤的占位按钮
    Locked,
    /// 非命令的自由文本（姓名、提问等）
    Text(String),
    Unknown(String),
}

impl Action {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Some(command) = input.strip_prefix('/') {
            return Self::parse_command(command, input);
        }

        let unknown = || Action::Unknown(input.to_string());
        match input {
            "menu_show_course" | "show_course" | "menu_start_course" => return Action::ShowCourse,
            "menu_final" => return Action::EnterFinal,
            "cancel_final" => return Action::CancelFinal,
            "menu_certificate" => return Action::Certificate,
            "enter_name" => return Action::EnterName,
            "menu_bonus" => return Action::Bonus,
            "menu_support" => return Action::Support,
            "menu_feedback" => return Action::Feedback,
            "menu_ask" => return Action::Ask,
            "cancel_question" => return Action::CancelQuestion,
            "back_main" => return Action::BackMain,
            "locked" => return Action::Locked,
            _ => {}
        }

        let Some((prefix, rest)) = input.split_once(':') else {
            return Action::Text(input.to_string());
        };
        match prefix {
            "lang" if !rest.is_empty() => Action::ChooseLanguage(rest.to_string()),
            "select_step" => rest.parse().map(Action::SelectStep).unwrap_or_else(|_| unknown()),
            "test_step" => match rest.split_once(':') {
                Some((step, "start")) => step.parse().map(Action::StartQuiz).unwrap_or_else(|_| unknown()),
                Some((step, choice)) => match (step.parse(), choice.parse()) {
                    (Ok(step), Ok(choice)) => Action::AnswerQuiz { step, choice },
                    _ => unknown(),
                },
                None => unknown(),
            },
            "test_final" => match rest.split_once(':') {
                Some((question, choice)) => match (question.parse(), choice.parse()) {
                    (Ok(question), Ok(choice)) => Action::AnswerFinal { question, choice },
                    _ => unknown(),
                },
                None => unknown(),
            },
            "lang" => unknown(),
            _ => Action::Text(input.to_string()),
        }
    }

    fn parse_command(command: &str, raw: &str) -> Self {
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        // Telegram 风格的 /start@botname
        let name = name.split('@').next().unwrap_or_default();
        match name {
            "start" => Action::Start {
                param: parts.next().map(str::to_string),
            },
            "finaltest" => Action::FinalTestCommand,
            "help" => Action::Help,
            _ => Action::Unknown(raw.to_string()),
        }
    }

    /// 编码为回调 token（Text / Unknown 原样返回）
    pub fn token(&self) -> String {
        match self {
            Action::Start { param: None } => "/start".into(),
            Action::Start { param: Some(p) } => format!("/start {p}"),
            Action::FinalTestCommand => "/finaltest".into(),
            Action::Help => "/help".into(),
            Action::ChooseLanguage(lang) => format!("lang:{lang}"),
            Action::ShowCourse => "show_course".into(),
            Action::SelectStep(n) => format!("select_step:{n}"),
            Action::StartQuiz(n) => format!("test_step:{n}:start"),
            Action::AnswerQuiz { step, choice } => format!("test_step:{step}:{choice}"),
            Action::EnterFinal => "menu_final".into(),
            Action::AnswerFinal { question, choice } => format!("test_final:{question}:{choice}"),
            Action::CancelFinal => "cancel_final".into(),
            Action::Certificate => "menu_certificate".into(),
            Action::EnterName => "enter_name".into(),
            Action::Bonus => "menu_bonus".into(),
            Action::Support => "menu_support".into(),
            Action::Feedback => "menu_feedback".into(),
            Action::Ask => "menu_ask".into(),
            Action::CancelQuestion => "cancel_question".into(),
            Action::BackMain => "back_main".into(),
            Action::Locked => "locked".into(),
            Action::Text(s) | Action::Unknown(s) => s.clone(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}
