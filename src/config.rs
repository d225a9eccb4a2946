//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COURSE__*` 覆盖（双下划线表示嵌套，如 `COURSE__STORAGE__AUTOSAVE_INTERVAL_SECS=30`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub course: CourseSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub exam: ExamSection,
    #[serde(default)]
    pub admin: AdminSection,
    #[serde(default)]
    pub shutdown: ShutdownSection,
}

/// [course] 段：课程文件与语言
#[derive(Debug, Clone, Deserialize)]
pub struct CourseSection {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    /// 用户尚未选择语言时使用
    #[serde(default = "default_lang")]
    pub default_lang: String,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("full_course_data.json")
}

fn default_lang() -> String {
    "ru".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["ru".into(), "en".into()]
}

impl Default for CourseSection {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            default_lang: default_lang(),
            languages: default_languages(),
        }
    }
}

/// [storage] 段：进度文件与自动保存节奏（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_progress_path")]
    pub progress_path: PathBuf,
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,
    /// 保存失败后的暂停，避免持续失败时刷屏日志
    #[serde(default = "default_autosave_retry_pause_secs")]
    pub autosave_retry_pause_secs: u64,
}

fn default_progress_path() -> PathBuf {
    PathBuf::from("progress.json")
}

fn default_autosave_interval_secs() -> u64 {
    60
}

fn default_autosave_retry_pause_secs() -> u64 {
    5
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            progress_path: default_progress_path(),
            autosave_interval_secs: default_autosave_interval_secs(),
            autosave_retry_pause_secs: default_autosave_retry_pause_secs(),
        }
    }
}

impl StorageSection {
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }

    pub fn autosave_retry_pause(&self) -> Duration {
        Duration::from_secs(self.autosave_retry_pause_secs)
    }
}

/// [exam] 段：考试会话闲置过期
#[derive(Debug, Clone, Deserialize)]
pub struct ExamSection {
    /// 0 表示永不过期
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_session_idle_timeout_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

impl Default for ExamSection {
    fn default() -> Self {
        Self {
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl ExamSection {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_timeout_secs > 0).then(|| Duration::from_secs(self.session_idle_timeout_secs))
    }
}

/// [admin] 段：用户提问转发目标
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminSection {
    pub chat_id: Option<String>,
}

/// [shutdown] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSection {
    #[serde(default = "default_cleanup_timeout_secs")]
    pub cleanup_timeout_secs: u64,
}

fn default_cleanup_timeout_secs() -> u64 {
    5
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            cleanup_timeout_secs: default_cleanup_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 COURSE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COURSE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COURSE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.storage.autosave_interval_secs, 60);
        assert_eq!(cfg.storage.autosave_retry_pause_secs, 5);
        assert_eq!(cfg.course.default_lang, "ru");
        assert_eq!(cfg.exam.idle_timeout(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("course.toml");
        std::fs::write(
            &path,
            "[storage]\nautosave_interval_secs = 15\n\n[exam]\nsession_idle_timeout_secs = 0\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.storage.autosave_interval(), Duration::from_secs(15));
        assert_eq!(cfg.exam.idle_timeout(), None);
        assert_eq!(cfg.storage.progress_path, PathBuf::from("progress.json"));
    }
}
