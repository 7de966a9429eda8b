//! Conversation history — the append-only record of one session's turns.

use serde::{Deserialize, Serialize};

/// One turn in the conversation. Mutated only by the orchestrator, strictly
/// in response-completion order: a user message is appended once ASR
/// finishes, the matching assistant message once that response terminates
/// (completed or cancelled).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User {
        /// Raw PCM16 @ 16 kHz mono utterance audio. Not serialised into the
        /// wire-visible transcript; only `audio_id` and `transcript` are.
        #[serde(skip)]
        audio_bytes: Vec<u8>,
        /// Hex digest of `md5(audio_bytes)` — correlates this turn with the
        /// SLM's per-speaker diarisation keying.
        audio_id: String,
        transcript: String,
    },
    #[serde(rename = "assistant")]
    Assistant { text: String },
}

impl Message {
    pub fn user(audio_bytes: Vec<u8>, transcript: String) -> Self {
        let audio_id = audio_id_of(&audio_bytes);
        Message::User {
            audio_bytes,
            audio_id,
            transcript,
        }
    }

    pub fn assistant(text: String) -> Self {
        Message::Assistant { text }
    }
}

/// Hex digest of the MD5 of raw PCM bytes — the audio turn id.
pub fn audio_id_of(pcm: &[u8]) -> String {
    format!("{:x}", md5::compute(pcm))
}

/// Ordered sequence of turns for one session. Append-only; mutated only by
/// the dialogue orchestrator.
#[derive(Debug, Clone, Default)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// A snapshot to hand to the SLM client without holding the session's
    /// history lock for the duration of the streaming call.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_derives_audio_id_from_pcm() {
        let msg = Message::user(vec![1, 2, 3, 4], "hello".into());
        match msg {
            Message::User { audio_id, transcript, .. } => {
                assert_eq!(transcript, "hello");
                assert_eq!(audio_id, audio_id_of(&[1, 2, 3, 4]));
            }
            _ => panic!("expected user message"),
        }
    }

    #[test]
    fn history_append_is_order_preserving() {
        let mut h = History::new();
        h.append(Message::user(vec![0], "one".into()));
        h.append(Message::assistant("reply one".into()));
        h.append(Message::user(vec![1], "two".into()));
        assert_eq!(h.messages().len(), 3);
        assert!(matches!(h.messages()[0], Message::User { .. }));
        assert!(matches!(h.messages()[1], Message::Assistant { .. }));
    }
}
