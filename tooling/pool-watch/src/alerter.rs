use crate::{composer::AlertReport, stuck::NetworkAlert};
use teloxide::{
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{ChatId, ParseMode},
    Bot,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

/// Outbound channel for alerts.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_report(&self, report: &AlertReport) -> Result<(), AlertError>;

    async fn send_network_alert(&self, alert: &NetworkAlert) -> Result<(), AlertError>;
}

#[derive(Clone)]
pub struct TelegramAlerter {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramAlerter {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
        }
    }

    async fn send_html(&self, html: String) -> Result<(), AlertError> {
        self.bot
            .send_message(self.chat_id, html)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramAlerter {
    async fn send_report(&self, report: &AlertReport) -> Result<(), AlertError> {
        self.send_html(render_html(&report.body(), &report.mentions)).await
    }

    async fn send_network_alert(&self, alert: &NetworkAlert) -> Result<(), AlertError> {
        self.send_html(escape_html(&alert.message())).await
    }
}

/// Preformatted block followed by the mentions, if any.
pub fn render_html(body: &str, mentions: &[String]) -> String {
    let mut html = format!("<pre>{}</pre>", escape_html(body.trim_end()));
    if !mentions.is_empty() {
        html.push('\n');
        html.push_str(&escape_html(&mentions.join(" ")));
    }
    html
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_pool_names_inside_pre_block() {
        let html = render_html("<b>pool</b> & co\n", &["@alice".to_owned(), "@bob".to_owned()]);

        assert_eq!(html, "<pre>&lt;b&gt;pool&lt;/b&gt; &amp; co</pre>\n@alice @bob");
    }

    #[test]
    fn omits_mention_line_without_watchers() {
        assert_eq!(render_html("all good", &[]), "<pre>all good</pre>");
    }
}
