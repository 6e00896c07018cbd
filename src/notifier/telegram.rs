use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::NotifyError;
use crate::notifier::{NotificationEvent, Notifier};

const API_BASE: &str = "https://api.telegram.org";

/// Sends trigger notifications to a Telegram chat via the Bot API's
/// `sendMessage` call. Credentials are supplied at construction, not read
/// from config directly — see `config::TelegramConfig`.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(client: reqwest::Client, bot_token: String, chat_id: String) -> Self {
        Self {
            client,
            bot_token,
            chat_id,
        }
    }

    fn format_message(event: &NotificationEvent) -> String {
        let mut lines = vec![
            format!("<b>{}</b>", html_escape(&event.filter_name)),
            format!("{} · {}", html_escape(&event.symbol), event.market),
        ];
        if let Some(pct) = event.data.price_change_percent {
            lines.push(format!("change: {pct:.2}%"));
        }
        if let Some(coef) = event.data.spike_coefficient {
            lines.push(format!("spike: {coef:.2}x"));
        }
        if let Some(vol) = event.data.volume_24h {
            lines.push(format!("24h volume: {vol:.0}"));
        }
        if !event.data.url.is_empty() {
            lines.push(event.data.url.clone());
        }
        lines.join("\n")
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

impl Notifier for TelegramNotifier {
    fn notify(&self, event: &NotificationEvent) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        let text = Self::format_message(event);
        Box::pin(async move {
            let url = format!("{API_BASE}/bot{}/sendMessage", self.bot_token);
            let body = SendMessageRequest {
                chat_id: &self.chat_id,
                text,
                parse_mode: "HTML",
                disable_web_page_preview: false,
            };

            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .change_context(NotifyError::Send {
                    channel: "telegram".into(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(NotifyError::Send {
                    channel: "telegram".into(),
                })
                .attach_printable(format!("telegram responded with status {}", response.status())));
            }

            Ok(())
        })
    }
}
