//! Auto-reply: answer greetings on behalf of a tenant.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    tracing::{debug, info},
    zapgate_channels::{ChannelOutbound, EventHandler},
    zapgate_common::InboundEvent,
    zapgate_config::AutoReplyConfig,
};

/// Replies once to any received message whose text contains one of the
/// configured keywords as whole words (case-insensitive).
pub struct AutoReplyHandler {
    keywords: Vec<Keyword>,
    reply_text: String,
    outbound: Arc<dyn ChannelOutbound>,
}

impl AutoReplyHandler {
    pub fn new(
        keywords: impl IntoIterator<Item = String>,
        reply_text: impl Into<String>,
        outbound: Arc<dyn ChannelOutbound>,
    ) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| Keyword::new(&k))
                .filter(|k| !k.words.is_empty())
                .collect(),
            reply_text: reply_text.into(),
            outbound,
        }
    }

    pub fn from_config(config: &AutoReplyConfig, outbound: Arc<dyn ChannelOutbound>) -> Self {
        Self::new(config.keywords.iter().cloned(), config.reply_text.clone(), outbound)
    }

    /// The keyword `text` matches, if any.
    pub fn matched_keyword(&self, text: &str) -> Option<&str> {
        let text = words(text);
        self.keywords
            .iter()
            .find(|k| text.windows(k.words.len()).any(|w| w == k.words.as_slice()))
            .map(|k| k.text.as_str())
    }
}

struct Keyword {
    text: String,
    words: Vec<String>,
}

impl Keyword {
    fn new(raw: &str) -> Self {
        Self {
            text: raw.trim().to_lowercase(),
            words: words(raw),
        }
    }
}

/// Lowercased words of `text`, split on anything that is not alphanumeric.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl EventHandler for AutoReplyHandler {
    fn name(&self) -> &str {
        "auto-reply"
    }

    async fn handle(&self, event: &InboundEvent) -> Result<()> {
        if event.is_from_me() || event.is_group() {
            return Ok(());
        }
        let Some(text) = event.text() else {
            return Ok(());
        };
        let Some(keyword) = self.matched_keyword(text) else {
            return Ok(());
        };
        let sender = event
            .sender()
            .context("greeting has no sender to reply to")?;

        debug!(instance = %event.tenant, sender, keyword, "greeting matched");
        let receipt = self
            .outbound
            .send_text(&event.tenant, sender, &self.reply_text)
            .await
            .with_context(|| format!("auto-reply to {sender}"))?;
        info!(
            instance = %event.tenant,
            to = %receipt.recipient,
            delivery_id = %receipt.delivery_id.0,
            "auto-reply sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        super::*,
        serde_json::json,
        zapgate_channels::SendReceipt,
        zapgate_common::{CanonicalNumber, DeliveryId, EventKind, InstanceKey, OutboundMessage},
    };

    #[derive(Default)]
    struct RecordingOutbound {
        sent: Mutex<Vec<(InstanceKey, String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ChannelOutbound for RecordingOutbound {
        async fn send_text(
            &self,
            instance: &InstanceKey,
            to: &str,
            text: &str,
        ) -> Result<SendReceipt> {
            if self.fail {
                anyhow::bail!("no registered account matches '{to}'");
            }
            self.sent
                .lock()
                .unwrap()
                .push((instance.clone(), to.to_string(), text.to_string()));
            Ok(SendReceipt {
                delivery_id: DeliveryId("ID1".into()),
                recipient: CanonicalNumber::new("5512988053918"),
            })
        }

        async fn send_message(
            &self,
            instance: &InstanceKey,
            to: &str,
            message: OutboundMessage,
        ) -> Result<SendReceipt> {
            match message {
                OutboundMessage::Text { text, .. } => self.send_text(instance, to, &text).await,
                other => anyhow::bail!("unexpected {} message", other.kind()),
            }
        }
    }

    fn handler(outbound: Arc<RecordingOutbound>) -> AutoReplyHandler {
        AutoReplyHandler::from_config(&AutoReplyConfig::default(), outbound)
    }

    fn message(payload: serde_json::Value) -> InboundEvent {
        InboundEvent::new("t1".into(), EventKind::MessageReceived, payload)
    }

    #[tokio::test]
    async fn replies_to_greeting() {
        let outbound = Arc::new(RecordingOutbound::default());
        let h = handler(outbound.clone());
        h.handle(&message(json!({
            "from": "551288053918@s.whatsapp.net",
            "message": "HeLLo there"
        })))
        .await
        .unwrap();

        let sent = outbound.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "t1");
        assert_eq!(sent[0].1, "551288053918@s.whatsapp.net");
        assert_eq!(sent[0].2, AutoReplyConfig::default().reply_text);
    }

    #[tokio::test]
    async fn ignores_other_text() {
        let outbound = Arc::new(RecordingOutbound::default());
        handler(outbound.clone())
            .handle(&message(json!({"from": "5511988887777", "message": "what's up"})))
            .await
            .unwrap();
        assert!(outbound.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ignores_own_and_group_messages() {
        let outbound = Arc::new(RecordingOutbound::default());
        let h = handler(outbound.clone());
        h.handle(&message(json!({
            "from": "5511988887777",
            "message": "hello",
            "is_from_me": true
        })))
        .await
        .unwrap();
        h.handle(&message(json!({
            "from": "120363025246125486@g.us",
            "message": "hello"
        })))
        .await
        .unwrap();
        assert!(outbound.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_failure_is_reported() {
        let outbound = Arc::new(RecordingOutbound {
            fail: true,
            ..Default::default()
        });
        let err = handler(outbound)
            .handle(&message(json!({"from": "5511988887777", "message": "oi"})))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("auto-reply to 5511988887777"));
    }

    #[test]
    fn keyword_matching_is_case_insensitive() {
        let h = AutoReplyHandler::new(
            vec!["  Olá ".to_string(), String::new()],
            "hi",
            Arc::new(RecordingOutbound::default()),
        );
        assert_eq!(h.matched_keyword("OLÁ, tudo bem?"), Some("olá"));
        assert_eq!(h.matched_keyword("bom dia"), None);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let h = handler(Arc::new(RecordingOutbound::default()));
        assert_eq!(h.matched_keyword("oi!"), Some("oi"));
        assert_eq!(h.matched_keyword("Oi, tudo bem?"), Some("oi"));
        assert_eq!(h.matched_keyword("I'm going home"), None);
        assert_eq!(h.matched_keyword("good point"), None);
        assert_eq!(h.matched_keyword("make a choice"), None);
        assert_eq!(h.matched_keyword("hellooo"), None);
    }

    #[test]
    fn multi_word_keywords() {
        let h = AutoReplyHandler::new(
            vec!["Good morning".to_string()],
            "hi",
            Arc::new(RecordingOutbound::default()),
        );
        assert_eq!(h.matched_keyword("good   morning, team"), Some("good morning"));
        assert_eq!(h.matched_keyword("morning good"), None);
    }

    #[tokio::test]
    async fn word_containing_keyword_gets_no_reply() {
        let outbound = Arc::new(RecordingOutbound::default());
        handler(outbound.clone())
            .handle(&message(json!({"from": "5511988887777", "message": "going now"})))
            .await
            .unwrap();
        assert!(outbound.sent.lock().unwrap().is_empty());
    }
}
