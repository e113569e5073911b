use crate::config::QueryMode;
use crate::error::AppError;
use crate::message::{ChatRequest, Message, UpstreamQuery};

/// Phrases that mark a conversation-title/summary request from the chat UI.
pub const META_PHRASES: &[&str] = &["generate a four to five word title", "summarize"];

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Title/summary request; answered locally with an empty message.
    Meta { stream: bool, model: Option<String> },
    /// `model` stays on the gateway; it only labels the reply.
    Forward {
        query: UpstreamQuery,
        model: Option<String>,
    },
}

pub fn is_meta_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    META_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::MalformedRequest("request body is empty".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| AppError::MalformedRequest(e.to_string()))
}

pub fn extract_query(messages: &[Message], mode: QueryMode) -> String {
    match mode {
        QueryMode::LastUser => messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.text())
            .unwrap_or_default(),
        QueryMode::AllUserJoined => messages
            .iter()
            .filter(|m| m.is_user())
            .map(|m| m.text())
            .filter(|text| !is_meta_request(text))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Only the latest user turn counts; system, assistant or tool turns after it are ignored.
fn last_user_message_is_meta(messages: &[Message]) -> bool {
    messages
        .iter()
        .rev()
        .find(|m| m.is_user())
        .is_some_and(|m| is_meta_request(&m.text()))
}

pub fn normalize(
    body: &[u8],
    mode: QueryMode,
    default_temperature: f64,
) -> Result<Normalized, AppError> {
    let request = parse_chat_request(body)?;
    let stream = request.stream.unwrap_or(false);

    if last_user_message_is_meta(&request.messages) {
        return Ok(Normalized::Meta {
            stream,
            model: request.model,
        });
    }

    Ok(Normalized::Forward {
        query: UpstreamQuery {
            query: extract_query(&request.messages, mode),
            stream,
            temperature: request.temperature.unwrap_or(default_temperature),
        },
        model: request.model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_detection_is_case_insensitive() {
        assert!(is_meta_request(
            "Please Generate a four to five word title for this chat"
        ));
        assert!(is_meta_request("SUMMARIZE the conversation"));
        assert!(!is_meta_request("what is the best team for VGC?"));
    }

    #[test]
    fn empty_messages_give_empty_query() {
        let out = normalize(br#"{"messages": []}"#, QueryMode::LastUser, 0.5).unwrap();
        match out {
            Normalized::Forward { query: q, model } => {
                assert_eq!(q.query, "");
                assert_eq!(model, None);
                assert!(!q.stream);
                assert_eq!(q.temperature, 0.5);
            }
            other => panic!("unexpected {other:?}"),
        }

        let out = normalize(b"{}", QueryMode::AllUserJoined, 0.5).unwrap();
        assert!(matches!(out, Normalized::Forward { query: q, .. } if q.query.is_empty()));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            normalize(b"{not json", QueryMode::LastUser, 0.5),
            Err(AppError::MalformedRequest(_))
        ));
        assert!(matches!(
            normalize(b"  ", QueryMode::LastUser, 0.5),
            Err(AppError::MalformedRequest(_))
        ));
    }

    #[test]
    fn multipart_content_is_flattened() {
        let body = br#"{"messages":[{"role":"user","content":[
            {"type":"text","text":"first"},
            {"type":"image_url","image_url":{"url":"http://x"}},
            {"type":"text","text":"second"}]}]}"#;
        let out = normalize(body, QueryMode::LastUser, 0.5).unwrap();
        assert!(matches!(out, Normalized::Forward { query: q, .. } if q.query == "first\nsecond"));
    }

    #[test]
    fn tool_call_turns_without_content_are_tolerated() {
        let body = br#"{"messages":[
            {"role":"user","content":"look it up"},
            {"role":"assistant","content":null,"tool_calls":[]},
            {"role":"tool","content":"result"}]}"#;
        let out = normalize(body, QueryMode::LastUser, 0.5).unwrap();
        assert!(matches!(out, Normalized::Forward { query: q, .. } if q.query == "look it up"));
    }

    #[test]
    fn meta_is_judged_on_last_user_message() {
        let body = br#"{"messages":[
            {"role":"user","content":"Generate a four to five word title"},
            {"role":"system","content":"x"}]}"#;
        let out = normalize(body, QueryMode::LastUser, 0.5).unwrap();
        assert!(matches!(out, Normalized::Meta { stream: false, .. }));

        let body = br#"{"messages":[
            {"role":"user","content":"summarize this"},
            {"role":"user","content":"actually, what beats Incineroar?"},
            {"role":"assistant","content":"ok"}]}"#;
        let out = normalize(body, QueryMode::LastUser, 0.5).unwrap();
        assert!(matches!(
            out,
            Normalized::Forward { query: q, .. } if q.query == "actually, what beats Incineroar?"
        ));
    }

    #[test]
    fn model_is_kept_out_of_the_upstream_query() {
        let body = br#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;
        match normalize(body, QueryMode::LastUser, 0.5).unwrap() {
            Normalized::Forward { query, model } => {
                assert_eq!(model.as_deref(), Some("gpt-4o"));
                let json = serde_json::to_value(&query).unwrap();
                let mut keys: Vec<&str> = json
                    .as_object()
                    .unwrap()
                    .keys()
                    .map(String::as_str)
                    .collect();
                keys.sort();
                assert_eq!(keys, vec!["query", "stream", "temperature"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
