//! Link definitions as stored in link files

use std::collections::BTreeMap;
use std::fmt;

use reqwest::header::{HeaderName, HeaderValue};
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::LinkError;
use crate::link::field_path::FieldPath;
use crate::transform::TransformStep;

/// A configured link between one data source and one dial.
///
/// Section names follow the link file layout (`[info]`, `[api]`, `[dial]`,
/// `[backlight_map]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDefinition {
    pub info: LinkInfo,

    #[serde(rename = "api")]
    pub source: SourceConfig,

    #[serde(rename = "dial")]
    pub dial_target: DialTarget,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backlight_map: Option<BacklightMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub name: String,

    #[serde(default = "default_description")]
    pub description: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Face image file name in the image store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn default_description() -> String {
    "No Description".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,

    #[serde(rename = "item")]
    pub field_path: FieldPath,

    #[serde(rename = "update_period")]
    pub update_period_seconds: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(rename = "value_modifiers", default, skip_serializing_if = "Vec::is_empty")]
    pub transform_steps: Vec<TransformStep>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialTarget {
    pub uid: String,
    pub host: String,
    pub port: u16,
    pub api_key: String,
}

impl fmt::Debug for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialTarget")
            .field("uid", &self.uid)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Backlight color
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R:{} G:{} B:{}", self.red, self.green, self.blue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklightEntry {
    #[serde(rename = "threshold")]
    pub threshold_percent: i64,

    #[serde(flatten)]
    pub color: Rgb,
}

/// Threshold → color entries in declaration order.
///
/// Declaration order decides which entry wins, not threshold magnitude.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BacklightMap {
    entries: Vec<BacklightEntry>,
}

impl BacklightMap {
    pub fn new(entries: Vec<BacklightEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[BacklightEntry] {
        &self.entries
    }

    /// Color for `percent`, starting from `current`.
    ///
    /// Every entry with `percent >= threshold` overwrites the candidate in
    /// iteration order, so the last qualifying entry wins.
    pub fn resolve(&self, percent: i64, current: Rgb) -> Rgb {
        self.entries
            .iter()
            .filter(|entry| percent >= entry.threshold_percent)
            .fold(current, |_, entry| entry.color)
    }
}

impl Serialize for BacklightMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            let rgb = [entry.color.red, entry.color.green, entry.color.blue];
            map.serialize_entry(&entry.threshold_percent.to_string(), &rgb)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BacklightMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(BacklightMapVisitor)
    }
}

struct BacklightMapVisitor;

impl<'de> Visitor<'de> for BacklightMapVisitor {
    type Value = BacklightMap;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a table of \"threshold\" = [r, g, b] or an array of {threshold, red, green, blue}")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = Vec::new();
        while let Some((key, rgb)) = access.next_entry::<String, [u8; 3]>()? {
            let threshold_percent = key.trim().parse::<i64>().map_err(|_| {
                serde::de::Error::custom(format!("backlight threshold `{}` is not an integer", key))
            })?;
            entries.push(BacklightEntry {
                threshold_percent,
                color: Rgb::new(rgb[0], rgb[1], rgb[2]),
            });
        }
        Ok(BacklightMap::new(entries))
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut entries = Vec::new();
        while let Some(entry) = access.next_element::<BacklightEntry>()? {
            entries.push(entry);
        }
        Ok(BacklightMap::new(entries))
    }
}

impl LinkDefinition {
    /// Parse and validate a link file
    pub fn from_toml(contents: &str) -> Result<Self, LinkError> {
        let definition: LinkDefinition = toml::from_str(contents)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Render as link file contents
    pub fn to_toml(&self) -> Result<String, LinkError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_enabled(&self) -> bool {
        self.info.enabled
    }

    /// Check everything serde cannot
    pub fn validate(&self) -> Result<(), LinkError> {
        let invalid = |msg: String| Err(LinkError::ConfigValidation(msg));

        if self.info.name.trim().is_empty() {
            return invalid("info.name must not be empty".to_string());
        }

        match url::Url::parse(&self.source.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => return invalid(format!("api.url scheme `{}` is not http(s)", url.scheme())),
            Err(e) => return invalid(format!("api.url `{}` is invalid: {}", self.source.url, e)),
        }

        if self.source.update_period_seconds == 0 {
            return invalid("api.update_period must be at least 1 second".to_string());
        }

        for (name, value) in &self.source.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return invalid(format!("api.headers: invalid header name `{}`", name));
            }
            if HeaderValue::from_str(value).is_err() {
                return invalid(format!("api.headers: invalid value for `{}`", name));
            }
        }

        let dial = &self.dial_target;
        if dial.uid.trim().is_empty() {
            return invalid("dial.uid must not be empty".to_string());
        }
        if dial.host.trim().is_empty() {
            return invalid("dial.host must not be empty".to_string());
        }
        if dial.port == 0 {
            return invalid("dial.port must not be 0".to_string());
        }
        if dial.api_key.is_empty() {
            return invalid("dial.api_key must not be empty".to_string());
        }

        if let Some(image) = &self.info.image {
            if !is_plain_file_name(image) {
                return invalid(format!("info.image `{}` must be a plain file name", image));
            }
        }

        Ok(())
    }
}

/// A single path component without separators or parent references
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}
