// ABOUTME: PropertyRecord - one cleaned listing as supplied by upstream normalization
// ABOUTME: Known optional fields plus an open map for any other scraped attribute

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single scraped listing.
///
/// Only `url`, `title`, `location`, `price`, `size` and `description` are modeled; every
/// other attribute (rooms, neighborhood, floor, ...) is kept verbatim in `extra` so that
/// records round-trip without loss. Known fields hold raw JSON values: upstream may hand
/// over repaired numbers, raw scraped strings or anything else, and a record is never
/// rejected for the type of one attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PropertyRecord {
    /// Create a record carrying only a URL.
    pub fn with_url(url: &str) -> Self {
        Self {
            url: Some(Value::String(url.to_string())),
            ..Default::default()
        }
    }

    /// The URL when it is a JSON string.
    pub fn url_str(&self) -> Option<&str> {
        self.url.as_ref().and_then(Value::as_str)
    }

    /// True when no field at all is set. A fresh registry entry starts from this baseline.
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.title.is_none()
            && self.location.is_none()
            && self.price.is_none()
            && self.size.is_none()
            && self.description.is_none()
            && self.extra.is_empty()
    }

    /// Number of fields carried by this record, known and extra.
    pub fn field_count(&self) -> usize {
        self.fields().len()
    }

    /// Flatten the record into a key-ordered JSON object.
    pub fn fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let known = [
            ("url", &self.url),
            ("title", &self.title),
            ("location", &self.location),
            ("price", &self.price),
            ("size", &self.size),
            ("description", &self.description),
        ];
        for (key, value) in known {
            if let Some(v) = value {
                map.insert(key.to_string(), v.clone());
            }
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    /// Fields of `self` that are absent from, or different in, `previous`.
    ///
    /// The result is a partial record: fields only present in `previous` are not
    /// reported, they simply do not appear in the diff.
    pub fn diff_from(&self, previous: &PropertyRecord) -> PropertyRecord {
        let mut changes = PropertyRecord::default();

        macro_rules! diff_field {
            ($field:ident) => {
                if self.$field.is_some() && self.$field != previous.$field {
                    changes.$field = self.$field.clone();
                }
            };
        }

        diff_field!(url);
        diff_field!(title);
        diff_field!(location);
        diff_field!(price);
        diff_field!(size);
        diff_field!(description);

        for (key, value) in &self.extra {
            if previous.extra.get(key) != Some(value) {
                changes.extra.insert(key.clone(), value.clone());
            }
        }

        changes
    }
}
