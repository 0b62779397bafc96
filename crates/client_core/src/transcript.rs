use shared::{domain::Sender, protocol::ChatMessage};

/// Client-local, append-only record of one thread's messages.
///
/// Display order is insertion order, so a message's index doubles as its
/// row key for as long as nothing is ever removed or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAlignment {
    Leading,
    Trailing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub key: usize,
    pub sender: Sender,
    pub alignment: RowAlignment,
    pub content: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    /// Appends a user message and its reply together; returns the index of
    /// the user message.
    pub(crate) fn append_exchange(&mut self, text: &str, reply: &str) -> usize {
        let first_index = self.messages.len();
        self.messages.reserve(2);
        self.messages.push(ChatMessage::user(text));
        self.messages.push(ChatMessage::assistant(reply));
        first_index
    }

    pub fn rows(&self) -> Vec<MessageRow> {
        self.rows_from(0)
    }

    pub fn rows_from(&self, start: usize) -> Vec<MessageRow> {
        self.messages
            .iter()
            .enumerate()
            .skip(start)
            .map(|(key, message)| MessageRow {
                key,
                sender: message.sender,
                alignment: match message.sender {
                    Sender::User => RowAlignment::Trailing,
                    Sender::Assistant => RowAlignment::Leading,
                },
                content: message.content.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_is_appended_as_user_then_assistant() {
        let mut transcript = Transcript::new();
        transcript.replace(vec![ChatMessage::assistant("welcome")]);

        let first = transcript.append_exchange("hello", "hi there");

        assert_eq!(first, 1);
        assert_eq!(
            transcript.messages(),
            &[
                ChatMessage::assistant("welcome"),
                ChatMessage::user("hello"),
                ChatMessage::assistant("hi there"),
            ]
        );
    }

    #[test]
    fn rows_are_keyed_by_index_and_aligned_by_sender() {
        let mut transcript = Transcript::new();
        transcript.append_exchange("ping", "pong");

        let rows = transcript.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, 0);
        assert_eq!(rows[0].alignment, RowAlignment::Trailing);
        assert_eq!(rows[1].key, 1);
        assert_eq!(rows[1].alignment, RowAlignment::Leading);
        assert_eq!(rows[1].content, "pong");

        let tail = transcript.rows_from(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].key, 1);
    }
}
