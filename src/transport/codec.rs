// Wire codec for raft messages sent over HTTP bodies.
//
// Grounded on `original_source/utils/api/rafthttp/msg_codec.go`: a single
// bincode-encoded message makes up the whole request body (the HTTP layer
// already gives us a length via `Content-Length`, so unlike the Go
// version we don't need our own length prefix), capped at the same
// generous size ceiling to keep a corrupt or malicious peer from forcing
// an unbounded allocation.

use crate::consensus::Message;
use crate::error::{NodeError, Result};

pub const MAX_MESSAGE_BYTES: usize = 512 * 1024 * 1024;

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

pub fn encode_message(m: &Message) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(m, BINCODE_CONFIG).map_err(|e| NodeError::Encode(e.to_string()))
}

pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(NodeError::Transport(format!(
            "message of {} bytes exceeds the {}-byte limit",
            bytes.len(),
            MAX_MESSAGE_BYTES
        )));
    }
    bincode::serde::decode_from_slice(bytes, BINCODE_CONFIG)
        .map(|(m, _)| m)
        .map_err(|e| NodeError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::MessageType;

    #[test]
    fn message_round_trips() {
        let m = Message::new(MessageType::Heartbeat, 1, 2, 5);
        let bytes = encode_message(&m).unwrap();
        let back = decode_message(&bytes).unwrap();
        assert_eq!(back.from, 1);
        assert_eq!(back.to, 2);
        assert_eq!(back.term, 5);
    }

    #[test]
    fn oversized_message_is_rejected_before_decoding() {
        let bytes = vec![0u8; MAX_MESSAGE_BYTES + 1];
        assert!(decode_message(&bytes).is_err());
    }
}
