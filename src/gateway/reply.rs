//! 出站渲染请求：文本 + 按钮 + 可选的外部副作用

use serde::Serialize;

use super::action::Action;

/// 按钮目标：回调动作或外部链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ButtonTarget {
    Callback { token: String },
    Url { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub target: ButtonTarget,
}

impl Button {
    pub fn action(label: impl Into<String>, action: &Action) -> Self {
        Self {
            label: label.into(),
            target: ButtonTarget::Callback {
                token: action.token(),
            },
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: ButtonTarget::Url { url: url.into() },
        }
    }
}

/// 证书生成请求（由外部渲染器处理）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateRequest {
    pub name: String,
    pub lang: String,
    pub completion_date: String,
}

/// 需要传输层额外执行的动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    Certificate(CertificateRequest),
    /// 将用户提问转发到管理员会话
    AdminForward {
        chat_id: Option<String>,
        from_user: String,
        username: Option<String>,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Reply {
    pub text: String,
    /// 每个内层 Vec 是一行按钮
    pub buttons: Vec<Vec<Button>>,
    /// 以弹窗而非消息展示（如锁定步骤提示）
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub alert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<SideEffect>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            alert: true,
            ..Default::default()
        }
    }

    pub fn with_row(mut self, row: Vec<Button>) -> Self {
        self.buttons.push(row);
        self
    }

    /// 每个按钮单独一行
    pub fn with_buttons(mut self, buttons: impl IntoIterator<Item = Button>) -> Self {
        self.buttons.extend(buttons.into_iter().map(|b| vec![b]));
        self
    }

    pub fn with_effect(mut self, effect: SideEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// 所有回调按钮的 token（便于测试与日志）
    pub fn callback_tokens(&self) -> Vec<&str> {
        self.buttons
            .iter()
            .flatten()
            .filter_map(|b| match &b.target {
                ButtonTarget::Callback { token } => Some(token.as_str()),
                ButtonTarget::Url { .. } => None,
            })
            .collect()
    }

    pub fn has_action(&self, action: &Action) -> bool {
        let token = action.token();
        self.callback_tokens().iter().any(|t| *t == token)
    }
}
