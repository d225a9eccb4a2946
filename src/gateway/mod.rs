//! 传输边界：动作解码、渲染请求、Bot 路由与本地控制台适配器
//!
//! 聊天平台本身（消息投递、回调分发）是外部协作者；这里只约定「每次交互一个动作 token，至少投递一次」。

pub mod action;
pub mod bot;
pub mod console;
pub mod reply;

pub use action::Action;
pub use bot::CourseBot;
pub use reply::{Button, ButtonTarget, CertificateRequest, Reply, SideEffect};
