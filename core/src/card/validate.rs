use serde_json::{Map, Value};

use super::{
    ActionKind, ActionSet, ActionStyle, CARD_TYPE, CardAction, CardDocument, CardLiteral,
    CardNode, Column, ColumnSet, ColumnWidth, Container, ContainerStyle, DEFAULT_CARD_VERSION,
    DocumentKind, Fact, FactSet, FontSize, FontWeight, HorizontalAlignment, Image, ImageSize,
    ImageStyle, MAX_BODY_NODES, MAX_FACTS, MAX_NESTING_DEPTH, Spacing, TextBlock, TextColor,
    VerticalAlignment,
};
use crate::error::ValidationError;

/// Which API the card is headed for.
///
/// Both variants share one grammar; only the bot connector renders `ActionSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardProfile {
    #[default]
    Bot,
    Graph,
}

impl CardProfile {
    fn node_types(self) -> &'static [&'static str] {
        match self {
            CardProfile::Bot => &[
                "TextBlock",
                "Image",
                "FactSet",
                "ColumnSet",
                "Column",
                "Container",
                "ActionSet",
            ],
            CardProfile::Graph => &[
                "TextBlock",
                "Image",
                "FactSet",
                "ColumnSet",
                "Column",
                "Container",
            ],
        }
    }
}

/// Validate a card with the full (bot) grammar.
pub fn validate(input: &Value) -> Result<CardDocument, ValidationError> {
    CardValidator::default().validate(input)
}

/// Recursive-descent validator turning untrusted JSON into a [`CardDocument`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CardValidator {
    profile: CardProfile,
}

impl CardValidator {
    pub fn new(profile: CardProfile) -> Self {
        Self { profile }
    }

    pub fn validate(&self, input: &Value) -> Result<CardDocument, ValidationError> {
        let obj = Fields::object("", input, "AdaptiveCard object")?;

        match obj.get("type") {
            Some(Value::String(kind)) if kind == CARD_TYPE => {}
            Some(other) => {
                return Err(ValidationError::mistyped(
                    "type",
                    format!("\"{CARD_TYPE}\""),
                    other,
                ));
            }
            None => return Err(ValidationError::missing("type", format!("\"{CARD_TYPE}\""))),
        }

        let version = obj
            .optional_string("version")?
            .unwrap_or_else(|| DEFAULT_CARD_VERSION.to_string());
        let schema = obj.optional_string("$schema")?;

        let body_items = obj.required_array("body")?;
        if body_items.len() > MAX_BODY_NODES {
            return Err(ValidationError::new(
                "body",
                format!("at most {MAX_BODY_NODES} elements"),
                format!("{} elements", body_items.len()),
            ));
        }
        let body = body_items
            .iter()
            .enumerate()
            .map(|(i, item)| self.node(&index_path("body", i), item, 1))
            .collect::<Result<Vec<_>, _>>()?;

        let actions = match obj.optional_array("actions")? {
            Some(items) => Some(self.actions("actions", items)?),
            None => None,
        };

        Ok(CardDocument {
            kind: DocumentKind::AdaptiveCard,
            schema,
            version,
            body,
            actions,
        })
    }

    fn node(&self, path: &str, value: &Value, depth: usize) -> Result<CardNode, ValidationError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ValidationError::new(
                path,
                format!("nesting depth of at most {MAX_NESTING_DEPTH}"),
                format!("depth {depth}"),
            ));
        }
        let obj = Fields::object(path, value, "card element object")?;
        let allowed = self.profile.node_types();
        let kind = match obj.get("type") {
            Some(Value::String(kind)) if allowed.contains(&kind.as_str()) => kind.as_str(),
            Some(other) => {
                return Err(ValidationError::mistyped(
                    obj.path("type"),
                    format!("one of {}", allowed.join(", ")),
                    other,
                ));
            }
            None => {
                return Err(ValidationError::missing(
                    obj.path("type"),
                    format!("one of {}", allowed.join(", ")),
                ));
            }
        };

        let node = match kind {
            "TextBlock" => CardNode::TextBlock(TextBlock {
                text: obj.required_string("text")?,
                weight: obj.optional_literal::<FontWeight>("weight")?,
                size: obj.optional_literal::<FontSize>("size")?,
                color: obj.optional_literal::<TextColor>("color")?,
                wrap: obj.optional_bool("wrap")?,
                is_subtle: obj.optional_bool("isSubtle")?,
                horizontal_alignment: obj
                    .optional_literal::<HorizontalAlignment>("horizontalAlignment")?,
                spacing: obj.optional_literal::<Spacing>("spacing")?,
                max_lines: obj.optional_u32("maxLines")?,
            }),
            "Image" => CardNode::Image(Image {
                url: obj.required_url("url")?,
                alt_text: obj.optional_string("altText")?,
                size: obj.optional_literal::<ImageSize>("size")?,
                style: obj.optional_literal::<ImageStyle>("style")?,
                horizontal_alignment: obj
                    .optional_literal::<HorizontalAlignment>("horizontalAlignment")?,
                width: obj.optional_string("width")?,
                height: obj.optional_string("height")?,
            }),
            "FactSet" => CardNode::FactSet(self.fact_set(&obj)?),
            "ColumnSet" => {
                let path = obj.path("columns");
                let columns = obj
                    .required_array("columns")?
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.column_item(&index_path(&path, i), item, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                CardNode::ColumnSet(ColumnSet {
                    columns,
                    spacing: obj.optional_literal::<Spacing>("spacing")?,
                    separator: obj.optional_bool("separator")?,
                })
            }
            "Column" => CardNode::Column(self.column(&obj, depth)?),
            "Container" => {
                let items = obj.required_array("items")?;
                CardNode::Container(Container {
                    items: self.children(&obj.path("items"), items, depth)?,
                    style: obj.optional_literal::<ContainerStyle>("style")?,
                    spacing: obj.optional_literal::<Spacing>("spacing")?,
                    separator: obj.optional_bool("separator")?,
                })
            }
            "ActionSet" => {
                let items = obj.required_array("actions")?;
                CardNode::ActionSet(ActionSet {
                    actions: self.actions(&obj.path("actions"), items)?,
                })
            }
            other => {
                return Err(ValidationError::new(
                    obj.path("type"),
                    format!("one of {}", allowed.join(", ")),
                    format!("string \"{other}\""),
                ));
            }
        };
        Ok(node)
    }

    fn children(
        &self,
        path: &str,
        items: &[Value],
        depth: usize,
    ) -> Result<Vec<CardNode>, ValidationError> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.node(&index_path(path, i), item, depth + 1))
            .collect()
    }

    /// Entry of `ColumnSet.columns`: a column whose `type` may be omitted.
    fn column_item(
        &self,
        path: &str,
        value: &Value,
        depth: usize,
    ) -> Result<Column, ValidationError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ValidationError::new(
                path,
                format!("nesting depth of at most {MAX_NESTING_DEPTH}"),
                format!("depth {depth}"),
            ));
        }
        let obj = Fields::object(path, value, "Column object")?;
        match obj.get("type") {
            None => {}
            Some(Value::String(kind)) if kind == "Column" => {}
            Some(other) => {
                return Err(ValidationError::mistyped(obj.path("type"), "\"Column\"", other));
            }
        }
        self.column(&obj, depth)
    }

    fn column(&self, obj: &Fields<'_>, depth: usize) -> Result<Column, ValidationError> {
        let items = match obj.optional_array("items")? {
            Some(items) => Some(self.children(&obj.path("items"), items, depth)?),
            None => None,
        };
        Ok(Column {
            width: column_width(obj)?,
            items,
            vertical_content_alignment: obj
                .optional_literal::<VerticalAlignment>("verticalContentAlignment")?,
            spacing: obj.optional_literal::<Spacing>("spacing")?,
            separator: obj.optional_bool("separator")?,
        })
    }

    fn fact_set(&self, obj: &Fields<'_>) -> Result<FactSet, ValidationError> {
        let path = obj.path("facts");
        let items = obj.required_array("facts")?;
        if items.len() > MAX_FACTS {
            return Err(ValidationError::new(
                path,
                format!("at most {MAX_FACTS} facts"),
                format!("{} facts", items.len()),
            ));
        }
        let facts = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let fact_path = index_path(&path, i);
                let fact = Fields::object(&fact_path, item, "{title, value} object")?;
                Ok(Fact {
                    title: fact.required_string("title")?,
                    value: fact.required_string("value")?,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;
        Ok(FactSet { facts })
    }

    fn actions(&self, path: &str, items: &[Value]) -> Result<Vec<CardAction>, ValidationError> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| action(&index_path(path, i), item))
            .collect()
    }
}

fn action(path: &str, value: &Value) -> Result<CardAction, ValidationError> {
    let obj = Fields::object(path, value, "action object")?;
    let kind = obj
        .optional_literal::<ActionKind>("type")?
        .ok_or_else(|| ValidationError::missing(obj.path("type"), literal_set::<ActionKind>()))?;
    let url = match obj.get("url") {
        None | Some(Value::Null) => None,
        Some(_) => Some(obj.required_url("url")?),
    };
    if kind == ActionKind::OpenUrl && url.is_none() {
        return Err(ValidationError::missing(
            obj.path("url"),
            "absolute URL for Action.OpenUrl",
        ));
    }
    Ok(CardAction {
        kind,
        title: obj.required_string("title")?,
        data: obj.get("data").filter(|v| !v.is_null()).cloned(),
        url,
        style: obj.optional_literal::<ActionStyle>("style")?,
    })
}

fn column_width(obj: &Fields<'_>) -> Result<Option<ColumnWidth>, ValidationError> {
    const EXPECTED: &str = "\"auto\", \"stretch\", \"<n>px\" or a non-negative number";
    match obj.get("width") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if is_width_keyword(raw) => {
            Ok(Some(ColumnWidth::Keyword(raw.clone())))
        }
        Some(Value::Number(n)) if n.as_f64().is_some_and(|w| w >= 0.0) => {
            Ok(Some(ColumnWidth::Weight(n.clone())))
        }
        Some(other) => Err(ValidationError::mistyped(obj.path("width"), EXPECTED, other)),
    }
}

fn is_width_keyword(raw: &str) -> bool {
    if raw == "auto" || raw == "stretch" {
        return true;
    }
    raw.strip_suffix("px")
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

fn literal_set<T: CardLiteral>() -> String {
    let quoted: Vec<String> = T::VALUES.iter().map(|v| format!("\"{v}\"")).collect();
    format!("one of {}", quoted.join(", "))
}

/// Typed, path-aware reads over one JSON object.
pub(crate) struct Fields<'a> {
    path: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub(crate) fn object(
        path: &'a str,
        value: &'a Value,
        expected: &str,
    ) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self { path, map }),
            other => Err(ValidationError::mistyped(path, expected, other)),
        }
    }

    pub(crate) fn path(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key)
    }

    fn required_string(&self, key: &str) -> Result<String, ValidationError> {
        match self.get(key) {
            Some(Value::String(v)) => Ok(v.clone()),
            Some(other) => Err(ValidationError::mistyped(self.path(key), "string", other)),
            None => Err(ValidationError::missing(self.path(key), "string")),
        }
    }

    fn optional_string(&self, key: &str) -> Result<Option<String>, ValidationError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(v)) => Ok(Some(v.clone())),
            Some(other) => Err(ValidationError::mistyped(self.path(key), "string", other)),
        }
    }

    /// Required string that must contain more than whitespace.
    pub(crate) fn required_nonblank(&self, key: &str) -> Result<String, ValidationError> {
        let value = self.required_string(key)?;
        if value.trim().is_empty() {
            return Err(ValidationError::new(
                self.path(key),
                "non-empty string",
                "empty string",
            ));
        }
        Ok(value)
    }

    /// Optional string where blank counts as absent.
    pub(crate) fn optional_nonblank(&self, key: &str) -> Result<Option<String>, ValidationError> {
        Ok(self
            .optional_string(key)?
            .filter(|value| !value.trim().is_empty()))
    }

    pub(crate) fn optional_u64(&self, key: &str) -> Result<Option<u64>, ValidationError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) if n.as_u64().is_some() => Ok(n.as_u64()),
            Some(other) => Err(ValidationError::mistyped(
                self.path(key),
                "unsigned integer",
                other,
            )),
        }
    }

    fn optional_bool(&self, key: &str) -> Result<Option<bool>, ValidationError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(v)) => Ok(Some(*v)),
            Some(other) => Err(ValidationError::mistyped(self.path(key), "boolean", other)),
        }
    }

    fn optional_u32(&self, key: &str) -> Result<Option<u32>, ValidationError> {
        match self.optional_u64(key)? {
            None => Ok(None),
            Some(v) => u32::try_from(v).map(Some).map_err(|_| {
                ValidationError::new(
                    self.path(key),
                    "unsigned 32-bit integer",
                    format!("number {v}"),
                )
            }),
        }
    }

    fn optional_literal<T: CardLiteral>(&self, key: &str) -> Result<Option<T>, ValidationError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => T::from_literal(raw)
                .map(Some)
                .ok_or_else(|| {
                    ValidationError::new(self.path(key), literal_set::<T>(), format!("\"{raw}\""))
                }),
            Some(other) => Err(ValidationError::mistyped(
                self.path(key),
                literal_set::<T>(),
                other,
            )),
        }
    }

    fn required_url(&self, key: &str) -> Result<String, ValidationError> {
        let raw = self.required_string(key)?;
        match url::Url::parse(&raw) {
            Ok(_) => Ok(raw),
            Err(e) => Err(ValidationError::new(
                self.path(key),
                "absolute URL",
                format!("\"{raw}\" ({e})"),
            )),
        }
    }

    fn required_array(&self, key: &str) -> Result<&'a [Value], ValidationError> {
        match self.get(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(ValidationError::mistyped(self.path(key), "array", other)),
            None => Err(ValidationError::missing(self.path(key), "array")),
        }
    }

    fn optional_array(&self, key: &str) -> Result<Option<&'a [Value]>, ValidationError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(ValidationError::mistyped(self.path(key), "array", other)),
        }
    }
}
