use axum::extract::ws::{Message, WebSocket};
use reelcircle_common::protocol::ws::{ClientEvent, ServerEvent};

use crate::validation::check_ws_frame_size;

pub const WS_INVALID_FRAME: &str = "WS_INVALID_FRAME";
pub const WS_FRAME_TOO_LARGE: &str = "WS_FRAME_TOO_LARGE";
pub const WS_IDENTITY_MISMATCH: &str = "WS_IDENTITY_MISMATCH";

pub fn error_event(code: &str, message: impl Into<String>) -> ServerEvent {
    ServerEvent::Error { code: code.to_owned(), message: message.into(), retryable: false }
}

/// Size check then JSON decode. Either failure becomes the error frame to send back.
pub fn decode_client_event(raw: &str) -> Result<ClientEvent, ServerEvent> {
    check_ws_frame_size(raw.as_bytes()).map_err(|message| error_event(WS_FRAME_TOO_LARGE, message))?;
    serde_json::from_str::<ClientEvent>(raw)
        .map_err(|error| error_event(WS_INVALID_FRAME, format!("invalid event frame: {error}")))
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn send_ws_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_server_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::MAX_WS_FRAME_BYTES;

    fn error_code(event: ServerEvent) -> String {
        match event {
            ServerEvent::Error { code, .. } => code,
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn decodes_tagged_client_frames() {
        let group_id = uuid::Uuid::new_v4();
        let raw = format!(r#"{{"type":"join_group","group_id":"{group_id}"}}"#);

        assert_eq!(decode_client_event(&raw), Ok(ClientEvent::JoinGroup { group_id }));
    }

    #[test]
    fn unknown_type_and_garbage_are_invalid_frames() {
        for raw in [r#"{"type":"teleport"}"#, "not json", r#"{"type":"join_group"}"#] {
            let error = decode_client_event(raw).expect_err("frame should be rejected");
            assert_eq!(error_code(error), WS_INVALID_FRAME);
        }
    }

    #[test]
    fn oversized_frames_are_rejected_before_parsing() {
        let raw = "x".repeat(MAX_WS_FRAME_BYTES + 1);
        let error = decode_client_event(&raw).expect_err("frame should be rejected");
        assert_eq!(error_code(error), WS_FRAME_TOO_LARGE);
    }

    #[test]
    fn error_frames_encode_with_type_tag() {
        let encoded = encode_server_event(&error_event(WS_IDENTITY_MISMATCH, "nope"))
            .expect("error frame should encode");
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("valid json");

        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], WS_IDENTITY_MISMATCH);
        assert_eq!(value["retryable"], false);
    }
}
