//! Builds requests for the AI collaborator and turns its answer, or its
//! failure, into assistant reply text.

use std::sync::Arc;

use converse_core::config::ChatConfig;
use converse_core::types::{Agent, Attachment, Capabilities, Locator, Message, MessageId};

use crate::client::{AiClient, AiRequest, InlineDocument, InlineImage, Turn};
use crate::error::{AiError, ChatError};

/// Per-turn inputs of the system instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnContext {
    pub agent: Agent,
    pub capabilities: Capabilities,
    /// Language code, e.g. `"en"`.
    pub language: String,
    /// First message of a freshly created session.
    pub first_turn: bool,
}

impl TurnContext {
    pub fn new(agent: &Agent, language: impl Into<String>, first_turn: bool) -> Self {
        Self {
            capabilities: agent.capabilities(),
            agent: agent.clone(),
            language: language.into(),
            first_turn,
        }
    }
}

/// How a reply came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Generated,
    /// The collaborator answered with an empty string.
    Fallback,
    RateLimited,
    /// Connectivity or other request failure.
    Unreachable,
}

/// Text to append as the assistant's turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub text: String,
    pub kind: ReplyKind,
}

impl AssistantReply {
    pub fn into_message(self, reply_to: Option<MessageId>) -> Message {
        Message::assistant(self.text, reply_to)
    }
}

/// Request builder and failure mapper around an [`AiClient`].
pub struct ResponseOrchestrator {
    client: Arc<dyn AiClient>,
    config: ChatConfig,
    model: String,
}

impl ResponseOrchestrator {
    pub fn new(client: Arc<dyn AiClient>, config: ChatConfig, model: impl Into<String>) -> Self {
        Self {
            client,
            config,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the outbound request.
    ///
    /// Only the most recent `history_limit` turns are kept. Inline attachments
    /// become image or document payloads; links are appended to the content
    /// as `[Shared File: name - url]` notes.
    pub fn build_request(
        &self,
        history: &[Message],
        content: &str,
        attachments: &[Attachment],
        context: &TurnContext,
    ) -> AiRequest {
        let skip = history.len().saturating_sub(self.config.history_limit);
        let history: Vec<Turn> = history[skip..]
            .iter()
            .map(|m| Turn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        let mut content = content.to_string();
        let mut images = Vec::new();
        let mut documents = Vec::new();
        for attachment in attachments {
            if let Locator::Remote { url } = &attachment.locator {
                let name = if attachment.name.trim().is_empty() {
                    "Link"
                } else {
                    attachment.name.as_str()
                };
                content.push_str(&format!("\n[Shared File: {} - {}]", name, url));
                continue;
            }
            match decode_inline(attachment) {
                Ok((mime_type, data)) if mime_type.starts_with("image/") => {
                    images.push(InlineImage { mime_type, data });
                }
                Ok((mime_type, data)) => documents.push(InlineDocument {
                    mime_type,
                    data,
                    name: attachment.name.clone(),
                }),
                Err(e) => {
                    tracing::warn!(attachment_id = %attachment.id, error = %e, "Skipping attachment");
                }
            }
        }

        AiRequest {
            content,
            history,
            system_instruction: system_instruction(context),
            images,
            documents,
            model: self.model.clone(),
        }
    }

    /// Call the collaborator. Never fails: errors become reply text.
    pub async fn send(&self, request: &AiRequest) -> AssistantReply {
        match self.client.generate(request).await {
            Ok(text) if text.trim().is_empty() => {
                tracing::warn!("AI collaborator returned an empty reply");
                AssistantReply {
                    text: self.config.empty_reply_fallback.clone(),
                    kind: ReplyKind::Fallback,
                }
            }
            Ok(text) => AssistantReply {
                text,
                kind: ReplyKind::Generated,
            },
            Err(AiError::RateLimited) => {
                tracing::warn!("AI collaborator rate limited");
                AssistantReply {
                    text: self.config.rate_limited_reply.clone(),
                    kind: ReplyKind::RateLimited,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "AI request failed");
                AssistantReply {
                    text: self.config.unreachable_reply.clone(),
                    kind: ReplyKind::Unreachable,
                }
            }
        }
    }

    /// Build and send in one step.
    pub async fn respond(
        &self,
        history: &[Message],
        content: &str,
        attachments: &[Attachment],
        context: &TurnContext,
    ) -> AssistantReply {
        let request = self.build_request(history, content, attachments, context);
        tracing::debug!(
            turns = request.history.len(),
            images = request.images.len(),
            documents = request.documents.len(),
            first_turn = context.first_turn,
            "Requesting assistant reply"
        );
        self.send(&request).await
    }
}

fn decode_inline(attachment: &Attachment) -> Result<(String, String), ChatError> {
    attachment
        .locator
        .inline_parts()
        .map(|(mime, data)| (mime.to_string(), data.to_string()))
        .ok_or_else(|| ChatError::InvalidLocator(attachment.name.clone()))
}

fn language_name(code: &str) -> &str {
    match code.to_ascii_lowercase().as_str() {
        "en" => "English",
        "fr" => "French",
        "es" => "Spanish",
        "ar" => "Arabic",
        "de" => "German",
        _ => code,
    }
}

fn system_instruction(context: &TurnContext) -> String {
    let mut lines = vec![
        context.agent.kind.persona_instruction().to_string(),
        format!(
            "Always reply in {} unless the user writes in another language.",
            language_name(&context.language)
        ),
    ];
    if context.capabilities.image_upload {
        lines.push(
            "When the user shares images, describe what you see and answer questions about them."
                .to_string(),
        );
    }
    if context.capabilities.document_upload {
        lines.push(
            "When the user shares documents, read them fully and quote the relevant passages."
                .to_string(),
        );
    }
    if context.capabilities.voice {
        lines.push(
            "Some messages are dictated by voice; tolerate small transcription errors.".to_string(),
        );
    }
    if context.first_turn {
        lines.push(format!(
            "This is the first message of a new conversation. Greet the user, introduce yourself as {} and say briefly what you can help with before answering.",
            context.agent.name
        ));
    }
    lines.join("\n")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use converse_core::types::{AgentKind, AttachmentCategory};
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, AiError>,
        seen: Mutex<Vec<AiRequest>>,
    }

    #[async_trait]
    impl AiClient for Scripted {
        async fn generate(&self, request: &AiRequest) -> Result<String, AiError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone()
        }
    }

    fn orchestrator(reply: Result<String, AiError>) -> ResponseOrchestrator {
        ResponseOrchestrator::new(
            Arc::new(Scripted {
                reply,
                seen: Mutex::new(Vec::new()),
            }),
            ChatConfig::default(),
            "test-model",
        )
    }

    fn context(kind: AgentKind, first_turn: bool) -> TurnContext {
        TurnContext::new(&Agent::new("Helper", kind), "en", first_turn)
    }

    fn inline(name: &str, mime: &str) -> Attachment {
        Attachment {
            id: name.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            category: AttachmentCategory::from_mime(mime),
            size: 2,
            is_link: false,
            locator: Locator::inline(mime, "aGk="),
        }
    }

    fn link(name: &str, url: &str) -> Attachment {
        Attachment {
            id: url.to_string(),
            name: name.to_string(),
            mime_type: "text/uri-list".to_string(),
            category: AttachmentCategory::Link,
            size: 0,
            is_link: true,
            locator: Locator::Remote {
                url: url.to_string(),
            },
        }
    }

    #[test]
    fn test_history_capped_to_most_recent() {
        let orch = orchestrator(Ok("ok".to_string()));
        let history: Vec<Message> = (0..120)
            .map(|i| Message::user(format!("turn {}", i), vec![], Agent::default()))
            .collect();
        let request = orch.build_request(&history, "now", &[], &context(AgentKind::Aisa, false));
        assert_eq!(request.history.len(), 50);
        assert_eq!(request.history[0].content, "turn 70");
        assert_eq!(request.history[49].content, "turn 119");
        assert_eq!(request.model, "test-model");
    }

    #[test]
    fn test_short_history_kept_whole() {
        let orch = orchestrator(Ok("ok".to_string()));
        let history = vec![Message::user("only", vec![], Agent::default())];
        let request = orch.build_request(&history, "now", &[], &context(AgentKind::Aisa, false));
        assert_eq!(request.history.len(), 1);
    }

    #[test]
    fn test_attachments_are_routed() {
        let orch = orchestrator(Ok("ok".to_string()));
        let attachments = vec![
            inline("cat.png", "image/png"),
            inline("report.pdf", "application/pdf"),
            link("a", "https://example.com/a"),
            link("", "https://example.com/"),
        ];
        let request = orch.build_request(&[], "look", &attachments, &context(AgentKind::Aisa, false));
        assert_eq!(request.images.len(), 1);
        assert_eq!(request.images[0].mime_type, "image/png");
        assert_eq!(request.documents.len(), 1);
        assert_eq!(request.documents[0].name, "report.pdf");
        assert_eq!(request.documents[0].data, "aGk=");
        assert_eq!(
            request.content,
            "look\n[Shared File: a - https://example.com/a]\n[Shared File: Link - https://example.com/]"
        );
    }

    #[test]
    fn test_malformed_locator_is_skipped() {
        let orch = orchestrator(Ok("ok".to_string()));
        let mut broken = inline("x.bin", "application/octet-stream");
        broken.locator = Locator::Inline {
            data_url: "not a data url".to_string(),
        };
        let request = orch.build_request(&[], "hi", &[broken], &context(AgentKind::Aisa, false));
        assert!(request.images.is_empty());
        assert!(request.documents.is_empty());
    }

    #[test]
    fn test_instruction_gated_by_capabilities() {
        let orch = orchestrator(Ok("ok".to_string()));
        let full = orch.build_request(&[], "hi", &[], &context(AgentKind::Aisa, false));
        assert!(full.system_instruction.contains("shares images"));
        assert!(full.system_instruction.contains("shares documents"));
        assert!(full.system_instruction.contains("reply in English"));

        let docs_only = orch.build_request(&[], "hi", &[], &context(AgentKind::Document, false));
        assert!(!docs_only.system_instruction.contains("shares images"));
        assert!(docs_only.system_instruction.contains("shares documents"));
        assert!(!docs_only.system_instruction.contains("dictated by voice"));
    }

    #[test]
    fn test_onboarding_only_on_first_turn() {
        let orch = orchestrator(Ok("ok".to_string()));
        let first = orch.build_request(&[], "hi", &[], &context(AgentKind::Aisa, true));
        assert!(first.system_instruction.contains("introduce yourself as Helper"));

        let later = orch.build_request(&[], "hi", &[], &context(AgentKind::Aisa, false));
        assert!(!later.system_instruction.contains("introduce yourself"));
    }

    #[tokio::test]
    async fn test_send_maps_replies() {
        let config = ChatConfig::default();

        let reply = orchestrator(Ok("Hello!".to_string()))
            .send(&AiRequest::default_for_test())
            .await;
        assert_eq!(reply.kind, ReplyKind::Generated);
        assert_eq!(reply.text, "Hello!");

        let reply = orchestrator(Ok("   ".to_string()))
            .send(&AiRequest::default_for_test())
            .await;
        assert_eq!(reply.kind, ReplyKind::Fallback);
        assert_eq!(reply.text, config.empty_reply_fallback);

        let reply = orchestrator(Err(AiError::RateLimited))
            .send(&AiRequest::default_for_test())
            .await;
        assert_eq!(reply.kind, ReplyKind::RateLimited);
        assert_eq!(reply.text, config.rate_limited_reply);

        let reply = orchestrator(Err(AiError::Connectivity("offline".to_string())))
            .send(&AiRequest::default_for_test())
            .await;
        assert_eq!(reply.kind, ReplyKind::Unreachable);
        assert_eq!(reply.text, config.unreachable_reply);
    }

    #[test]
    fn test_reply_into_message() {
        let reply_to = MessageId::from("m1");
        let message = AssistantReply {
            text: "hi".to_string(),
            kind: ReplyKind::Generated,
        }
        .into_message(Some(reply_to.clone()));
        assert_eq!(message.content, "hi");
        assert_eq!(message.reply_to, Some(reply_to));
    }

    impl AiRequest {
        fn default_for_test() -> Self {
            AiRequest {
                content: "hi".to_string(),
                history: Vec::new(),
                system_instruction: String::new(),
                images: Vec::new(),
                documents: Vec::new(),
                model: "test-model".to_string(),
            }
        }
    }
}
