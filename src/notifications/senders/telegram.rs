//! Notification delivery via the Telegram Bot API.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, SenderError};

// Shared across senders; builder only fails on a broken TLS backend.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("default reqwest client")
});

pub struct TelegramSender {
    bot_token: String,
}

impl TelegramSender {
    pub fn new(bot_token: String) -> Self {
        Self { bot_token }
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Escapes text for Telegram MarkdownV2.
/// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . !
fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
            | '{' | '}' | '.' | '!' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send_message(&self, recipient_id: i64, text: &str) -> Result<(), SenderError> {
        let api_url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let chat_id = recipient_id.to_string();

        let escaped_text = escape_markdown_v2(text);
        let payload = SendMessageRequest {
            chat_id: &chat_id,
            text: &escaped_text,
            parse_mode: "MarkdownV2",
        };

        let response = HTTP_CLIENT.post(&api_url).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Telegram API returned {status}: {error_body}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_all_reserved_markdown_characters() {
        assert_eq!(
            escape_markdown_v2("host-1.example.org is DOWN!"),
            "host\\-1\\.example\\.org is DOWN\\!"
        );
        assert_eq!(escape_markdown_v2("a_b*c[d]e"), "a\\_b\\*c\\[d\\]e");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(escape_markdown_v2("all systems go"), "all systems go");
    }
}
