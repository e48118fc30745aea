//! Typed model of the Adaptive Card subset accepted for rich messages.
//!
//! A card is a recursive tree: `Container`, `Column` and `ColumnSet` hold
//! further nodes. Trees are only ever built by [`validate::CardValidator`] from
//! untrusted JSON and serialize back into the wire format the messaging APIs
//! expect (camelCase keys, `type` tags, defaults filled in).

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::{Number, Value};

pub mod validate;

pub use validate::{CardProfile, CardValidator, validate};

/// Root discriminator of a card document.
pub const CARD_TYPE: &str = "AdaptiveCard";
/// Version applied when the input omits one.
pub const DEFAULT_CARD_VERSION: &str = "1.4";
/// Attachment content type identifying an Adaptive Card payload.
pub const ADAPTIVE_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";
pub const MAX_BODY_NODES: usize = 50;
pub const MAX_FACTS: usize = 10;
/// Deepest container nesting accepted.
///
/// Each level costs two JSON levels; the first rejected level, wrapped in a
/// `tools/call` frame, must still decode under serde_json's 128-level limit.
pub const MAX_NESTING_DEPTH: usize = 48;

/// A closed set of string literals accepted for an enumerated card property.
pub trait CardLiteral: Sized + Copy {
    const VALUES: &'static [&'static str];

    fn as_str(self) -> &'static str;

    fn from_literal(raw: &str) -> Option<Self>;
}

macro_rules! card_literal {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $literal:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl CardLiteral for $name {
            const VALUES: &'static [&'static str] = &[$($literal),+];

            fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $literal),+
                }
            }

            fn from_literal(raw: &str) -> Option<Self> {
                match raw {
                    $($literal => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

card_literal!(FontWeight {
    Default => "default",
    Lighter => "lighter",
    Bolder => "bolder",
});

card_literal!(FontSize {
    Default => "default",
    Small => "small",
    Medium => "medium",
    Large => "large",
    ExtraLarge => "extraLarge",
});

card_literal!(TextColor {
    Default => "default",
    Dark => "dark",
    Light => "light",
    Accent => "accent",
    Good => "good",
    Warning => "warning",
    Attention => "attention",
});

card_literal!(HorizontalAlignment {
    Left => "left",
    Center => "center",
    Right => "right",
});

card_literal!(VerticalAlignment {
    Top => "top",
    Center => "center",
    Bottom => "bottom",
});

card_literal!(Spacing {
    None => "none",
    Small => "small",
    Default => "default",
    Medium => "medium",
    Large => "large",
    ExtraLarge => "extraLarge",
    Padding => "padding",
});

card_literal!(ImageSize {
    Auto => "auto",
    Stretch => "stretch",
    Small => "small",
    Medium => "medium",
    Large => "large",
});

card_literal!(ImageStyle {
    Default => "default",
    Person => "person",
});

card_literal!(ContainerStyle {
    Default => "default",
    Emphasis => "emphasis",
    Good => "good",
    Attention => "attention",
    Warning => "warning",
    Accent => "accent",
});

card_literal!(ActionStyle {
    Default => "default",
    Positive => "positive",
    Destructive => "destructive",
});

card_literal!(
    /// Kinds of buttons a card may carry.
    ActionKind {
        Submit => "Action.Submit",
        OpenUrl => "Action.OpenUrl",
        ShowCard => "Action.ShowCard",
    }
);

card_literal!(
    /// Fixed root discriminator; only one kind of document exists.
    DocumentKind {
        AdaptiveCard => "AdaptiveCard",
    }
);

/// The rich message root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardDocument {
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub version: String,
    pub body: Vec<CardNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<CardAction>>,
}

impl CardDocument {
    /// Wire JSON for this card.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One element of a card body, tagged by its `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CardNode {
    TextBlock(TextBlock),
    Image(Image),
    FactSet(FactSet),
    ColumnSet(ColumnSet),
    Column(Column),
    Container(Container),
    ActionSet(ActionSet),
}

impl CardNode {
    pub fn type_name(&self) -> &'static str {
        match self {
            CardNode::TextBlock(_) => "TextBlock",
            CardNode::Image(_) => "Image",
            CardNode::FactSet(_) => "FactSet",
            CardNode::ColumnSet(_) => "ColumnSet",
            CardNode::Column(_) => "Column",
            CardNode::Container(_) => "Container",
            CardNode::ActionSet(_) => "ActionSet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<FontWeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<FontSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<TextColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_subtle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_alignment: Option<HorizontalAlignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spacing: Option<Spacing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<ImageSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ImageStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_alignment: Option<HorizontalAlignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FactSet {
    pub facts: Vec<Fact>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Fact {
    pub title: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSet {
    #[serde(serialize_with = "serialize_columns")]
    pub columns: Vec<Column>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spacing: Option<Spacing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<ColumnWidth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<CardNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_content_alignment: Option<VerticalAlignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spacing: Option<Spacing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<bool>,
}

/// Column width: a keyword (`auto`, `stretch`, `"<n>px"`) or a relative weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnWidth {
    Keyword(String),
    Weight(Number),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub items: Vec<CardNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ContainerStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spacing: Option<Spacing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ActionSet {
    pub actions: Vec<CardAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ActionStyle>,
}

/// Columns live in a typed `Vec<Column>` but still need their `type` tag on the wire.
fn serialize_columns<S: Serializer>(columns: &[Column], serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Tagged<'a> {
        #[serde(rename = "type")]
        kind: &'static str,
        #[serde(flatten)]
        column: &'a Column,
    }

    let mut seq = serializer.serialize_seq(Some(columns.len()))?;
    for column in columns {
        seq.serialize_element(&Tagged {
            kind: "Column",
            column,
        })?;
    }
    seq.end()
}
