//! JSON Schemas advertised in `tools/list`.
//!
//! The card schema is generated from the same literal tables the validator
//! parses against, so the advertised grammar cannot drift from the enforced one.

use serde_json::{Map, Value, json};
use teams_core::args::{DEFAULT_LIST_TOP, MAX_LIST_TOP};
use teams_core::card::{
    ActionKind, ActionStyle, CARD_TYPE, CardLiteral, CardProfile, ContainerStyle,
    DEFAULT_CARD_VERSION, FontSize, FontWeight, HorizontalAlignment, ImageSize, ImageStyle,
    MAX_BODY_NODES, MAX_FACTS, Spacing, TextColor, VerticalAlignment,
};

fn literal<T: CardLiteral>() -> Value {
    json!({ "type": "string", "enum": T::VALUES })
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn element_ref() -> Value {
    json!({ "$ref": "#/$defs/element" })
}

fn element_array() -> Value {
    json!({ "type": "array", "items": element_ref() })
}

fn column_def() -> Value {
    object(
        json!({
            "type": { "const": "Column" },
            "width": {
                "description": "\"auto\", \"stretch\", \"<n>px\" or a relative weight",
                "oneOf": [
                    { "type": "string", "pattern": "^(auto|stretch|[0-9]+px)$" },
                    { "type": "number", "minimum": 0 }
                ]
            },
            "items": element_array(),
            "verticalContentAlignment": literal::<VerticalAlignment>(),
            "spacing": literal::<Spacing>(),
            "separator": { "type": "boolean" }
        }),
        &[],
    )
}

fn action_def() -> Value {
    object(
        json!({
            "type": literal::<ActionKind>(),
            "title": { "type": "string" },
            "url": {
                "type": "string",
                "format": "uri",
                "description": "Required for Action.OpenUrl"
            },
            "data": { "description": "Payload echoed back on Action.Submit" },
            "style": literal::<ActionStyle>()
        }),
        &["type", "title"],
    )
}

fn element_variants(profile: CardProfile) -> Vec<Value> {
    let mut variants = vec![
        object(
            json!({
                "type": { "const": "TextBlock" },
                "text": { "type": "string" },
                "weight": literal::<FontWeight>(),
                "size": literal::<FontSize>(),
                "color": literal::<TextColor>(),
                "wrap": { "type": "boolean" },
                "isSubtle": { "type": "boolean" },
                "horizontalAlignment": literal::<HorizontalAlignment>(),
                "spacing": literal::<Spacing>(),
                "maxLines": { "type": "integer", "minimum": 0 }
            }),
            &["type", "text"],
        ),
        object(
            json!({
                "type": { "const": "Image" },
                "url": { "type": "string", "format": "uri" },
                "altText": { "type": "string" },
                "size": literal::<ImageSize>(),
                "style": literal::<ImageStyle>(),
                "horizontalAlignment": literal::<HorizontalAlignment>(),
                "width": { "type": "string" },
                "height": { "type": "string" }
            }),
            &["type", "url"],
        ),
        object(
            json!({
                "type": { "const": "FactSet" },
                "facts": {
                    "type": "array",
                    "maxItems": MAX_FACTS,
                    "items": object(
                        json!({ "title": { "type": "string" }, "value": { "type": "string" } }),
                        &["title", "value"],
                    )
                }
            }),
            &["type", "facts"],
        ),
        object(
            json!({
                "type": { "const": "ColumnSet" },
                "columns": { "type": "array", "items": { "$ref": "#/$defs/column" } },
                "spacing": literal::<Spacing>(),
                "separator": { "type": "boolean" }
            }),
            &["type", "columns"],
        ),
        {
            let mut column = column_def();
            column["required"] = json!(["type"]);
            column
        },
        object(
            json!({
                "type": { "const": "Container" },
                "items": element_array(),
                "style": literal::<ContainerStyle>(),
                "spacing": literal::<Spacing>(),
                "separator": { "type": "boolean" }
            }),
            &["type", "items"],
        ),
    ];
    if profile == CardProfile::Bot {
        variants.push(object(
            json!({
                "type": { "const": "ActionSet" },
                "actions": { "type": "array", "items": { "$ref": "#/$defs/action" } }
            }),
            &["type", "actions"],
        ));
    }
    variants
}

/// Recursive Adaptive Card schema for the given API variant.
pub fn card_schema(profile: CardProfile) -> Value {
    let mut defs = Map::new();
    defs.insert(
        "element".to_string(),
        json!({ "oneOf": element_variants(profile) }),
    );
    defs.insert("column".to_string(), column_def());
    defs.insert("action".to_string(), action_def());

    json!({
        "type": "object",
        "description": "Adaptive Card. Unknown properties are dropped.",
        "properties": {
            "type": { "const": CARD_TYPE },
            "$schema": { "type": "string" },
            "version": { "type": "string", "default": DEFAULT_CARD_VERSION },
            "body": {
                "type": "array",
                "maxItems": MAX_BODY_NODES,
                "items": element_ref()
            },
            "actions": { "type": "array", "items": { "$ref": "#/$defs/action" } }
        },
        "required": ["type", "body"],
        "$defs": defs,
    })
}

fn tool_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn rich_message_schema(properties: Value, profile: CardProfile) -> Value {
    let mut schema = tool_schema(properties, &[]);
    schema["properties"]["text"] = json!({
        "type": "string",
        "description": "Fallback or accompanying text. At least one of text or card is required."
    });
    // `$ref`s resolve against the document root, so the card's definitions move up.
    let mut card = card_schema(profile);
    if let Some(defs) = card.as_object_mut().and_then(|card| card.remove("$defs")) {
        schema["$defs"] = defs;
    }
    schema["properties"]["card"] = card;
    schema["anyOf"] = json!([{ "required": ["text"] }, { "required": ["card"] }]);
    schema
}

pub fn post_message_schema() -> Value {
    tool_schema(
        json!({
            "text": { "type": "string", "description": "Markdown message text" },
            "thread_id": {
                "type": "string",
                "description": "Activity to reply to; defaults to the configured thread"
            }
        }),
        &["text"],
    )
}

pub fn post_rich_message_schema() -> Value {
    rich_message_schema(
        json!({
            "thread_id": {
                "type": "string",
                "description": "Activity to reply to; defaults to the configured thread"
            }
        }),
        CardProfile::Bot,
    )
}

pub fn update_message_schema() -> Value {
    let mut schema = rich_message_schema(
        json!({
            "activity_id": {
                "type": "string",
                "description": "Id returned when the message was posted"
            }
        }),
        CardProfile::Bot,
    );
    schema["required"] = json!(["activity_id"]);
    schema
}

fn channel_properties() -> Value {
    json!({
        "team_id": { "type": "string" },
        "channel_id": { "type": "string" },
        "reply_to_id": { "type": "string", "description": "Root message to reply to" }
    })
}

pub fn channel_post_message_schema() -> Value {
    let mut properties = channel_properties();
    properties["text"] = json!({ "type": "string", "description": "HTML message body" });
    tool_schema(properties, &["team_id", "channel_id", "text"])
}

pub fn channel_post_rich_message_schema() -> Value {
    let mut schema = rich_message_schema(channel_properties(), CardProfile::Graph);
    schema["required"] = json!(["team_id", "channel_id"]);
    schema
}

pub fn list_messages_schema() -> Value {
    tool_schema(
        json!({
            "team_id": { "type": "string" },
            "channel_id": { "type": "string" },
            "top": {
                "type": "integer",
                "minimum": 1,
                "maximum": MAX_LIST_TOP,
                "default": DEFAULT_LIST_TOP
            }
        }),
        &["team_id", "channel_id"],
    )
}
