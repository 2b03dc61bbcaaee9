use farm_chat_model::{ChatRequest, Role, Turn};
use serde::Serialize;

use crate::GatewayConfig;

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &ChatRequest,
    config: &GatewayConfig,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        stream: true,
    }
}

#[inline]
fn create_message(turn: &Turn) -> Message {
    let content = turn.content.clone();
    match turn.role {
        Role::System => Message::System { content },
        Role::User => Message::User { content },
        Role::Assistant => Message::Assistant { content },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::GatewayConfigBuilder;

    #[test]
    fn test_create_request() {
        let request = ChatRequest {
            messages: vec![
                Turn::system("You are a farmer-friendly assistant."),
                Turn::user("When to sow wheat?"),
                Turn::assistant("• November is best"),
            ],
        };
        let config = GatewayConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build();
        let expected = ChatCompletionRequest {
            model: "custom".to_owned(),
            messages: vec![
                Message::System {
                    content: "You are a farmer-friendly assistant.".to_owned(),
                },
                Message::User {
                    content: "When to sow wheat?".to_owned(),
                },
                Message::Assistant {
                    content: "• November is best".to_owned(),
                },
            ],
            stream: true,
        };
        assert_eq!(create_request(&request, &config), expected);
    }

    #[test]
    fn test_wire_format() {
        let request = ChatRequest {
            messages: vec![Turn::user("hi")],
        };
        let config = GatewayConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build();
        assert_eq!(
            serde_json::to_value(create_request(&request, &config)).unwrap(),
            json!({
                "model": "custom",
                "messages": [{ "role": "user", "content": "hi" }],
                "stream": true
            })
        );
    }
}
