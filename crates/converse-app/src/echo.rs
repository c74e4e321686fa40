//! Offline AI client used when no API key is configured.

use async_trait::async_trait;

use converse_chat::{AiClient, AiError, AiRequest};

/// Answers every request by restating what it received.
#[derive(Debug, Default)]
pub struct EchoClient;

#[async_trait]
impl AiClient for EchoClient {
    async fn generate(&self, request: &AiRequest) -> Result<String, AiError> {
        let mut reply = format!("(offline) You said: {}", request.content);
        let files = request.images.len() + request.documents.len();
        if files > 0 {
            reply.push_str(&format!("\n(offline) {} file(s) received.", files));
        }
        if !request.history.is_empty() {
            reply.push_str(&format!(
                "\n(offline) {} earlier turn(s) in context.",
                request.history.len()
            ));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converse_chat::InlineImage;

    #[tokio::test]
    async fn test_echo_reply() {
        let request = AiRequest {
            content: "hello".to_string(),
            history: Vec::new(),
            system_instruction: String::new(),
            images: vec![InlineImage {
                mime_type: "image/png".to_string(),
                data: "aGk=".to_string(),
            }],
            documents: Vec::new(),
            model: "offline".to_string(),
        };
        let reply = EchoClient.generate(&request).await.unwrap();
        assert!(reply.starts_with("(offline) You said: hello"));
        assert!(reply.contains("1 file(s) received"));
    }
}
