//! 课程目录（只读）
//!
//! 启动时从 JSON 课程文件加载一次，之后不可变：有序步骤（每步一道小测）、结业考试题目、
//! 以及按 key 查找的多语言文案。文件缺失或无法解析时返回 [`CatalogError`]，进程不应启动。

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::error::CatalogError;

/// 语言代码 -> 文本
pub type Localized = HashMap<String, String>;

fn pick<'a>(map: &'a Localized, lang: &str) -> &'a str {
    map.get(lang).map(String::as_str).unwrap_or("")
}

/// texts 中的条目：大多数按语言区分，少数（如 support_link）是单一字符串
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextEntry {
    Plain(String),
    Localized(Localized),
}

/// 单选题：步骤小测与结业考试共用
#[derive(Debug, Clone, Deserialize)]
pub struct Quiz {
    pub question: Localized,
    pub options: HashMap<String, Vec<String>>,
    /// 每种语言的正确选项下标（从 0 开始）
    pub correct: HashMap<String, usize>,
}

impl Quiz {
    pub fn question(&self, lang: &str) -> &str {
        pick(&self.question, lang)
    }

    pub fn options(&self, lang: &str) -> &[String] {
        self.options.get(lang).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn correct_index(&self, lang: &str) -> Option<usize> {
        self.correct.get(lang).copied()
    }

    pub fn is_correct(&self, lang: &str, choice: usize) -> bool {
        self.correct_index(lang) == Some(choice)
    }

    fn validate(&self, what: &str) -> Result<(), CatalogError> {
        for (lang, options) in &self.options {
            match self.correct.get(lang) {
                Some(&idx) if idx < options.len() => {}
                Some(&idx) => {
                    return Err(CatalogError::Invalid(format!(
                        "{what}: correct index {idx} out of range for '{lang}' ({} options)",
                        options.len()
                    )))
                }
                None => {
                    return Err(CatalogError::Invalid(format!(
                        "{what}: missing correct index for '{lang}'"
                    )))
                }
            }
        }
        Ok(())
    }

    fn check_lang(&self, what: &str, lang: &str) -> Result<(), CatalogError> {
        let missing = if !self.question.contains_key(lang) {
            Some("question")
        } else if self.options(lang).is_empty() {
            Some("options")
        } else if !self.correct.contains_key(lang) {
            Some("correct index")
        } else {
            None
        };
        match missing {
            Some(field) => Err(CatalogError::Invalid(format!(
                "{what}: missing {field} for '{lang}'"
            ))),
            None => Ok(()),
        }
    }
}

/// 课程中的一步
#[derive(Debug, Clone, Deserialize)]
pub struct CourseStep {
    pub title: Localized,
    #[serde(default)]
    pub header: Localized,
    #[serde(default)]
    pub body: Localized,
    /// 最后一步没有小测，改为进入结业考试
    #[serde(default)]
    pub test: Option<Quiz>,
}

impl CourseStep {
    pub fn title(&self, lang: &str) -> &str {
        pick(&self.title, lang)
    }

    pub fn header(&self, lang: &str) -> &str {
        pick(&self.header, lang)
    }

    pub fn body(&self, lang: &str) -> &str {
        pick(&self.body, lang)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FinalTest {
    #[serde(default)]
    pub questions: Vec<Quiz>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BonusSection {
    #[serde(default)]
    pub links: Localized,
}

/// 课程目录根（对应 full_course_data.json）
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    texts: HashMap<String, TextEntry>,
    steps: Vec<CourseStep>,
    #[serde(default)]
    final_test: FinalTest,
    #[serde(default)]
    bonus: BonusSection,
    #[serde(default)]
    support_text: Localized,
    #[serde(default)]
    btn_support: Localized,
    #[serde(default)]
    support_form_link: Localized,
    #[serde(default)]
    ask_prompt: Localized,
}

impl Catalog {
    /// 从课程文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CatalogError::NotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        tracing::info!(
            "Course file {} loaded ({:.1} KB)",
            path.display(),
            data.len() as f64 / 1024.0
        );
        let catalog = Self::from_json_str(&data)?;
        tracing::info!(
            "Course catalog ready: {} steps, {} final questions, {} texts",
            catalog.steps.len(),
            catalog.final_test.questions.len(),
            catalog.texts.len()
        );
        Ok(catalog)
    }

    pub fn from_json_str(data: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_str(data)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.steps.is_empty() {
            return Err(CatalogError::Invalid("course has no steps".into()));
        }
        let last = self.steps.len();
        for (idx, step) in self.steps.iter().enumerate() {
            let number = idx + 1;
            match &step.test {
                Some(quiz) => quiz.validate(&format!("step {number}"))?,
                None if number < last => {
                    return Err(CatalogError::Invalid(format!("step {number} has no test")))
                }
                None => {}
            }
        }
        if self.final_test.questions.is_empty() {
            return Err(CatalogError::Invalid("final test has no questions".into()));
        }
        for (idx, question) in self.final_test.questions.iter().enumerate() {
            question.validate(&format!("final question {}", idx + 1))?;
        }
        Ok(())
    }

    /// 每道小测与结业题都必须覆盖所有已启用的语言，否则该语言的用户无法作答
    pub fn check_languages(&self, languages: &[String]) -> Result<(), CatalogError> {
        let quizzes = self
            .steps()
            .filter_map(|(number, step)| Some((format!("step {number}"), step.test.as_ref()?)))
            .chain(
                self.final_test
                    .questions
                    .iter()
                    .enumerate()
                    .map(|(idx, q)| (format!("final question {}", idx + 1), q)),
            );
        for (what, quiz) in quizzes {
            for lang in languages {
                quiz.check_lang(&what, lang)?;
            }
        }
        Ok(())
    }

    /// 按 key 查找文案；缺失时返回 key 本身
    pub fn text(&self, key: &str, lang: &str) -> String {
        match self.texts.get(key) {
            Some(TextEntry::Localized(map)) => map
                .get(lang)
                .cloned()
                .unwrap_or_else(|| key.to_string()),
            Some(TextEntry::Plain(s)) => s.clone(),
            None => key.to_string(),
        }
    }

    /// 与 [`Catalog::text`] 相同，但缺失时返回 None
    pub fn try_text(&self, key: &str, lang: &str) -> Option<String> {
        match self.texts.get(key)? {
            TextEntry::Localized(map) => map.get(lang).cloned(),
            TextEntry::Plain(s) => Some(s.clone()),
        }
    }

    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    /// 步骤编号从 1 开始
    pub fn step(&self, number: u32) -> Option<&CourseStep> {
        let idx = (number as usize).checked_sub(1)?;
        self.steps.get(idx)
    }

    pub fn steps(&self) -> impl Iterator<Item = (u32, &CourseStep)> {
        self.steps.iter().enumerate().map(|(i, s)| (i as u32 + 1, s))
    }

    pub fn is_last_step(&self, number: u32) -> bool {
        number == self.step_count()
    }

    pub fn final_questions(&self) -> &[Quiz] {
        &self.final_test.questions
    }

    pub fn support_link(&self) -> Option<String> {
        self.try_text("support_link", "")
    }

    pub fn support_text(&self, lang: &str) -> &str {
        pick(&self.support_text, lang)
    }

    pub fn support_button(&self, lang: &str) -> &str {
        pick(&self.btn_support, lang)
    }

    pub fn bonus_link(&self, lang: &str) -> Option<&str> {
        self.bonus.links.get(lang).map(String::as_str)
    }

    pub fn feedback_link(&self, lang: &str) -> Option<&str> {
        self.support_form_link.get(lang).map(String::as_str)
    }

    pub fn ask_prompt(&self, lang: &str) -> &str {
        pick(&self.ask_prompt, lang)
    }
}
