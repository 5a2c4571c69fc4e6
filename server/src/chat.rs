//! Chat input handling and outgoing line wrapping.

use crate::spam::SpamLog;
use shared::{COLOR_ESCAPE, STRING_LENGTH};
use std::time::Instant;
use thiserror::Error;

/// Prefix of messages sent by WoM clients to identify themselves.
const WOM_ID_PREFIX: &str = "/womid ";
const CONTINUATION_PREFIX: &str = "> ";

/// Colour used for server messages to a single player.
pub const SYSTEM_COLOR: &str = "&E";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChatViolation {
    #[error("attempted to write illegal characters in chat")]
    IllegalCharacters,
    #[error("sent chat messages too quickly")]
    Spam,
}

impl ChatViolation {
    /// Reason given to the kicked client.
    pub fn kick_reason(&self) -> &'static str {
        match self {
            ChatViolation::IllegalCharacters => crate::blocks::HACKING_DETECTED,
            ChatViolation::Spam => "Kicked for chat spam!",
        }
    }
}

/// What to do with one accepted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    Ignore,
    /// Tell only the sender.
    Reply(String),
    /// Hand to the command dispatcher, leading `/` included.
    Command(String),
    /// Send to everyone as the sender's chat line.
    Broadcast(String),
}

/// Anything outside printable ASCII, and the colour escape, cannot be typed
/// by a real client.
pub fn contains_invalid_chars(message: &str) -> bool {
    message.chars().any(|c| c < ' ' || c == COLOR_ESCAPE || c > '~')
}

/// The broadcast form of a chat line.
pub fn format_chat(name: &str, op_color: Option<&str>, text: &str) -> String {
    match op_color {
        Some(color) => format!("{}{}&F: {}", color, name, text),
        None => format!("&F{}: {}", name, text),
    }
}

/// Per-session chat state: the spam log and a pending partial message.
#[derive(Debug)]
pub struct ChatState {
    spam: SpamLog,
    partial: Option<String>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatState {
    pub fn new() -> Self {
        Self {
            spam: SpamLog::chat(),
            partial: None,
        }
    }

    pub fn partial(&self) -> Option<&str> {
        self.partial.as_deref()
    }

    /// Validates a raw chat frame and decides what it means.
    pub fn receive(
        &mut self,
        raw: &str,
        now: Instant,
        limit_rate: bool,
    ) -> Result<ChatAction, ChatViolation> {
        // WoM ids are padded with zeroes and would fail the character check
        if raw.starts_with(WOM_ID_PREFIX) {
            return Ok(ChatAction::Ignore);
        }
        if contains_invalid_chars(raw) {
            return Err(ChatViolation::IllegalCharacters);
        }
        if limit_rate && self.spam.is_spam(now) {
            return Err(ChatViolation::Spam);
        }
        Ok(self.process(raw))
    }

    /// Applies partial-message and command-prefix rules to a message.
    pub fn process(&mut self, raw: &str) -> ChatAction {
        if raw.is_empty() {
            return ChatAction::Ignore;
        }

        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("/nvm") || lower.starts_with("/cancel") {
            return match self.partial.take() {
                Some(_) => ChatAction::Reply("Partial message cancelled.".to_string()),
                None => ChatAction::Reply("No partial message to cancel.".to_string()),
            };
        }

        let mut message = match self.partial.take() {
            Some(mut partial) => {
                partial.push_str(raw);
                partial
            }
            None => raw.to_string(),
        };

        if message.ends_with(" /") {
            message.pop();
            let reply = format!("Partial: &F{}", message);
            self.partial = Some(message);
            return ChatAction::Reply(reply);
        }
        if message.ends_with(" //") {
            message.pop();
        }

        if let Some(rest) = message.strip_prefix('/') {
            if rest.is_empty() {
                return ChatAction::Reply("Cannot parse message.".to_string());
            }
            if rest.starts_with('/') {
                return ChatAction::Broadcast(rest.to_string());
            }
            return ChatAction::Command(message);
        }

        ChatAction::Broadcast(message)
    }
}

struct LineWrapper {
    lines: Vec<String>,
    line: String,
    len: usize,
    fresh: bool,
    color: Option<char>,
    after_escape: bool,
}

impl LineWrapper {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            line: String::new(),
            len: 0,
            fresh: true,
            color: None,
            after_escape: false,
        }
    }

    fn break_line(&mut self) {
        self.lines.push(std::mem::take(&mut self.line));
        self.line.push_str(CONTINUATION_PREFIX);
        if let Some(color) = self.color {
            self.line.push(COLOR_ESCAPE);
            self.line.push(color);
        }
        self.len = self.line.chars().count();
        self.fresh = true;
        self.after_escape = false;
    }

    fn push_char(&mut self, c: char) {
        let room = STRING_LENGTH - self.len;
        // keep a colour escape together with its code
        if room == 0 || (room == 1 && c == COLOR_ESCAPE) {
            self.break_line();
        }
        if self.after_escape && c.is_ascii_hexdigit() {
            self.color = Some(c);
        }
        self.after_escape = c == COLOR_ESCAPE;
        self.line.push(c);
        self.len += 1;
        self.fresh = false;
    }

    fn push_word(&mut self, word: &str, first: bool) {
        let word_len = word.chars().count();
        if !first && !self.fresh {
            if self.len + 1 + word_len <= STRING_LENGTH {
                self.push_char(' ');
            } else {
                let prefix = CONTINUATION_PREFIX.len() + if self.color.is_some() { 2 } else { 0 };
                if prefix + word_len <= STRING_LENGTH {
                    self.break_line();
                } else if self.len + 1 < STRING_LENGTH {
                    self.push_char(' ');
                }
            }
        }
        for c in word.chars() {
            self.push_char(c);
        }
    }

    fn finish(mut self) -> Vec<String> {
        if !self.fresh || self.lines.is_empty() {
            self.lines.push(self.line);
        }
        self.lines
    }
}

/// Splits a message into lines that fit one chat frame. Continuation lines
/// start with `> ` and repeat the colour in effect.
pub fn wrap_lines(message: &str) -> Vec<String> {
    let mut wrapper = LineWrapper::new();
    for (i, word) in message.split(' ').enumerate() {
        wrapper.push_word(word, i == 0);
    }
    wrapper.finish()
}
