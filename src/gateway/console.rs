//! 本地控制台传输：从 stdin 逐行读取动作 token，把渲染请求打印到 stdout
//!
//! 每行格式：`<token>`（默认用户 `console`）或 `@<user_id> <token>`，便于在本地模拟多个用户。

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::bot::CourseBot;
use super::reply::{ButtonTarget, Reply};

pub const DEFAULT_USER: &str = "console";

/// 拆出用户 ID 与输入
pub fn split_line(line: &str) -> (&str, &str) {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix('@') {
        match rest.split_once(char::is_whitespace) {
            Some((user, input)) if !user.is_empty() => return (user, input.trim()),
            _ => {}
        }
    }
    (DEFAULT_USER, line)
}

/// 文本 + 按钮的纯文本渲染
pub fn render(reply: &Reply) -> String {
    let mut out = String::new();
    if reply.alert {
        out.push_str("[alert] ");
    }
    out.push_str(&reply.text);
    for row in &reply.buttons {
        out.push('\n');
        let cells: Vec<String> = row
            .iter()
            .map(|b| match &b.target {
                ButtonTarget::Callback { token } => format!("[{}] -> {}", b.label, token),
                ButtonTarget::Url { url } => format!("[{}] <{}>", b.label, url),
            })
            .collect();
        out.push_str(&cells.join("  "));
    }
    if let Some(effect) = &reply.effect {
        out.push('\n');
        match serde_json::to_string(effect) {
            Ok(json) => out.push_str(&format!("(effect) {json}")),
            Err(e) => out.push_str(&format!("(effect unavailable: {e})")),
        }
    }
    out
}

pub async fn run_console(bot: Arc<CourseBot>, shutdown: CancellationToken) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    tracing::info!("Console transport ready, type /start");

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!("Console input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let (user_id, input) = split_line(&line);
        let replies = bot.handle(user_id, None, input).await;
        write_replies(&mut stdout, user_id, &replies).await?;
    }
    Ok(())
}

async fn write_replies<W: AsyncWrite + Unpin>(
    out: &mut W,
    user_id: &str,
    replies: &[Reply],
) -> std::io::Result<()> {
    for reply in replies {
        out.write_all(format!("<{user_id}> {}\n\n", render(reply)).as_bytes())
            .await?;
    }
    out.flush().await
}
