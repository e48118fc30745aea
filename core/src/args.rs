//! Argument records for the tool surface.
//!
//! Each record is parsed from the untyped `arguments` object of a tool call.
//! Parsing is a thin precondition check; the card grammar does the heavy lifting.

use serde_json::Value;

use crate::card::validate::Fields;
use crate::card::{CardDocument, CardProfile, CardValidator};
use crate::error::ValidationError;

pub const DEFAULT_LIST_TOP: u64 = 20;
pub const MAX_LIST_TOP: u64 = 50;

/// Team and channel a delegated-user call is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTarget {
    pub team_id: String,
    pub channel_id: String,
}

/// Message content: fallback text, a card, or both. Never neither.
#[derive(Debug, Clone, PartialEq)]
pub struct RichMessage {
    pub text: Option<String>,
    pub card: Option<CardDocument>,
}

/// `post_message` (bot conversation).
#[derive(Debug, Clone, PartialEq)]
pub struct PostMessageArgs {
    pub text: String,
    pub thread_id: Option<String>,
}

/// `post_rich_message` (bot conversation).
#[derive(Debug, Clone, PartialEq)]
pub struct PostRichMessageArgs {
    pub message: RichMessage,
    pub thread_id: Option<String>,
}

/// `update_message` (bot conversation).
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessageArgs {
    pub activity_id: String,
    pub message: RichMessage,
}

/// `post_channel_message` (delegated user).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPostMessageArgs {
    pub target: ChannelTarget,
    pub text: String,
    pub reply_to_id: Option<String>,
}

/// `post_channel_rich_message` (delegated user).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPostRichMessageArgs {
    pub target: ChannelTarget,
    pub message: RichMessage,
    pub reply_to_id: Option<String>,
}

/// `list_channel_messages` (delegated user).
#[derive(Debug, Clone, PartialEq)]
pub struct ListMessagesArgs {
    pub target: ChannelTarget,
    pub top: u64,
}

/// Parse `{ text?, card?, thread_id? }` and require at least one of text or card.
pub fn validate_post_rich_message_args(
    input: &Value,
) -> Result<PostRichMessageArgs, ValidationError> {
    let fields = Fields::object("", input, "arguments object")?;
    Ok(PostRichMessageArgs {
        message: rich_message(&fields, CardProfile::Bot)?,
        thread_id: fields.optional_nonblank("thread_id")?,
    })
}

pub fn parse_post_message_args(input: &Value) -> Result<PostMessageArgs, ValidationError> {
    let fields = Fields::object("", input, "arguments object")?;
    Ok(PostMessageArgs {
        text: fields.required_nonblank("text")?,
        thread_id: fields.optional_nonblank("thread_id")?,
    })
}

pub fn parse_update_message_args(input: &Value) -> Result<UpdateMessageArgs, ValidationError> {
    let fields = Fields::object("", input, "arguments object")?;
    Ok(UpdateMessageArgs {
        activity_id: fields.required_nonblank("activity_id")?,
        message: rich_message(&fields, CardProfile::Bot)?,
    })
}

pub fn parse_channel_post_message_args(
    input: &Value,
) -> Result<ChannelPostMessageArgs, ValidationError> {
    let fields = Fields::object("", input, "arguments object")?;
    Ok(ChannelPostMessageArgs {
        target: channel_target(&fields)?,
        text: fields.required_nonblank("text")?,
        reply_to_id: fields.optional_nonblank("reply_to_id")?,
    })
}

pub fn parse_channel_post_rich_message_args(
    input: &Value,
) -> Result<ChannelPostRichMessageArgs, ValidationError> {
    let fields = Fields::object("", input, "arguments object")?;
    Ok(ChannelPostRichMessageArgs {
        target: channel_target(&fields)?,
        message: rich_message(&fields, CardProfile::Graph)?,
        reply_to_id: fields.optional_nonblank("reply_to_id")?,
    })
}

pub fn parse_list_messages_args(input: &Value) -> Result<ListMessagesArgs, ValidationError> {
    let fields = Fields::object("", input, "arguments object")?;
    let top = fields.optional_u64("top")?.unwrap_or(DEFAULT_LIST_TOP);
    if !(1..=MAX_LIST_TOP).contains(&top) {
        return Err(ValidationError::new(
            "top",
            format!("integer between 1 and {MAX_LIST_TOP}"),
            format!("number {top}"),
        ));
    }
    Ok(ListMessagesArgs {
        target: channel_target(&fields)?,
        top,
    })
}

/// The cross-field rule, kept apart from the card grammar so both stay composable.
pub fn require_text_or_card(
    text: Option<String>,
    card: Option<CardDocument>,
) -> Result<RichMessage, ValidationError> {
    if text.is_none() && card.is_none() {
        return Err(ValidationError::new(
            "text|card",
            "at least one of 'text' or 'card'",
            "neither",
        ));
    }
    Ok(RichMessage { text, card })
}

fn rich_message(fields: &Fields<'_>, profile: CardProfile) -> Result<RichMessage, ValidationError> {
    let text = fields.optional_nonblank("text")?;
    let card = match fields.get("card") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            CardValidator::new(profile)
                .validate(raw)
                .map_err(|e| e.nested_under("card"))?,
        ),
    };
    require_text_or_card(text, card)
}

fn channel_target(fields: &Fields<'_>) -> Result<ChannelTarget, ValidationError> {
    Ok(ChannelTarget {
        team_id: fields.required_nonblank("team_id")?,
        channel_id: fields.required_nonblank("channel_id")?,
    })
}
