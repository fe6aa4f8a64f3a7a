//! `POST /api/ai/chat`

use async_trait::async_trait;
use bytes::Bytes;
use fitsync_core::{PipelineResponse, RequestContext};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_body, require_user, respond};
use crate::service::handler::TerminalHandler;
use crate::service::operation::HandlerError;

const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: &'static str,
    topic: Topic,
    user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Topic {
    Training,
    Nutrition,
    Motivation,
    General,
}

impl Topic {
    fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if mentions(&lower, &["workout", "exercise"]) {
            Self::Training
        } else if mentions(&lower, &["nutrition", "diet", "food"]) {
            Self::Nutrition
        } else if mentions(&lower, &["motivation", "help"]) {
            Self::Motivation
        } else {
            Self::General
        }
    }

    fn reply(self) -> &'static str {
        match self {
            Self::Training => {
                "Start with a balanced routine: strength training three times a week and \
                 cardio two or three times. Compound movements like squats, deadlifts and \
                 push-ups build a strong foundation."
            }
            Self::Nutrition => {
                "Favor whole foods with a balanced macro profile: 1.6-2.2 g of protein per kg \
                 of body weight, complex carbohydrates around training, and healthy fats. \
                 Drink at least two liters of water a day."
            }
            Self::Motivation => {
                "Consistency beats perfection. Every small step counts, so focus on progress. \
                 Which area would you like to work on today?"
            }
            Self::General => {
                "Ask me about workouts, nutrition, form tips or motivation. \
                 What would you like to know?"
            }
        }
    }
}

fn mentions(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(*w))
}

/// Canned coaching replies keyed on the message topic.
pub struct ChatHandler;

#[async_trait]
impl TerminalHandler for ChatHandler {
    async fn invoke(
        &self,
        ctx: RequestContext,
        body: Bytes,
    ) -> Result<PipelineResponse, HandlerError> {
        let user_id = require_user(&ctx)?;
        let req: ChatRequest = parse_body(&body)?;
        let length = req.message.chars().count();
        if length == 0 || length > MAX_MESSAGE_CHARS {
            return Err(HandlerError::BadRequest(format!(
                "message must be 1-{MAX_MESSAGE_CHARS} characters"
            )));
        }

        let topic = Topic::classify(&req.message);
        info!(user_id = %user_id, ?topic, "chat message answered");
        respond(
            StatusCode::OK,
            &ChatResponse {
                response: topic.reply(),
                topic,
                user_id,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use fitsync_core::Principal;
    use http::Method;

    use super::*;

    fn ctx() -> RequestContext {
        let mut ctx = RequestContext::new(Method::POST, "/api/ai/chat", "c");
        ctx.set_principal(Principal::new("u7"));
        ctx
    }

    #[test]
    fn topics() {
        assert_eq!(Topic::classify("Best EXERCISE for legs?"), Topic::Training);
        assert_eq!(Topic::classify("what about my diet"), Topic::Nutrition);
        assert_eq!(Topic::classify("I need help"), Topic::Motivation);
        assert_eq!(Topic::classify("hello"), Topic::General);
    }

    #[tokio::test]
    async fn answers_with_topic() {
        let resp = ChatHandler
            .invoke(ctx(), Bytes::from_static(br#"{"message":"plan my workout"}"#))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(json["topic"], "training");
        assert_eq!(json["user_id"], "u7");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let err = ChatHandler
            .invoke(ctx(), Bytes::from_static(br#"{"message":""}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::BadRequest(_)));
    }
}
