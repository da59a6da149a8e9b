//! Role-tagged transcripts.
//!
//! Rendered prompts encode a conversation as a flat run of role tags:
//! `<system~>...</system~>`, `<user~>...</user~>` and `<assistant~>...</assistant~>`.
//! [`extract_turns`] parses such text back into an ordered list of [`ChatTurn`]s,
//! and [`render_transcript`] does the opposite.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::LazyLock};

/// Role of a turn in a chat transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant output.
    Assistant,
}

impl Role {
    /// Returns the role name as it appears in tags.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role `{s}`")),
        }
    }
}

/// A single turn of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatTurn {
    /// Role of the speaker.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ChatTurn {
    /// Creates a new turn.
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system turn.
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user turn.
    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant turn.
    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Serializes the turn as a role-tagged segment.
    pub fn to_tagged(&self) -> String {
        let role = self.role.as_str();
        format!("<{role}~>{}</{role}~>", self.content)
    }
}

/// Serializes the turns as consecutive role-tagged segments.
pub fn render_transcript(turns: &[ChatTurn]) -> String {
    turns.iter().map(ChatTurn::to_tagged).collect()
}

/// Opening tags of the supported roles.
static OPENING_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(user|system|assistant)~>").expect("role tag pattern should be valid")
});

/// Extracts the role-tagged turns from the text in source order.
///
/// A segment runs from an opening tag to the nearest closing tag of the same role,
/// so its body may span lines and contain tags of other roles verbatim.
/// Text outside of any segment is discarded, and an opening tag without a matching
/// closing tag is skipped.
pub fn extract_turns(text: &str) -> Vec<ChatTurn> {
    let mut turns = Vec::new();
    let mut cursor = 0;
    while let Some(captures) = OPENING_TAG.captures_at(text, cursor) {
        let (Some(tag), Some(role_name)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        let closing_tag = format!("</{}~>", role_name.as_str());
        let body_start = tag.end();
        let Some(offset) = text[body_start..].find(&closing_tag) else {
            tracing::warn!(role = role_name.as_str(), "unterminated role tag is skipped");
            cursor = tag.start() + 1;
            continue;
        };
        let body_end = body_start + offset;
        if let Ok(role) = role_name.as_str().parse() {
            turns.push(ChatTurn::new(role, &text[body_start..body_end]));
        }
        cursor = body_end + closing_tag.len();
    }
    turns
}
