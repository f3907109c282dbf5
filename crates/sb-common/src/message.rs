//! Message - headers, body and attachments owned by an exchange

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Value;

/// Opaque message payload
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Text(s) => s.is_empty(),
            Body::Bytes(b) => b.is_empty(),
            Body::Json(v) => v.is_null(),
        }
    }

    /// Text view of the body, if it has one
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Body::Empty => None,
            Body::Text(s) => Some(Cow::Borrowed(s)),
            Body::Bytes(b) => std::str::from_utf8(b).ok().map(Cow::Borrowed),
            Body::Json(Value::String(s)) => Some(Cow::Borrowed(s)),
            Body::Json(v) => Some(Cow::Owned(v.to_string())),
        }
    }

    /// Raw bytes of the body; JSON is serialized
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Body::Bytes(b) => b.clone(),
            Body::Json(v) => Bytes::from(v.to_string()),
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

/// A message carried by an exchange
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    headers: IndexMap<String, Value>,
    body: Body,
    attachments: HashMap<String, Bytes>,
}

impl Message {
    pub fn new(body: impl Into<Body>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Header as a string; non-string values are rendered as JSON
    pub fn header_str(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers.get(name).map(|v| match v {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        })
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        self.headers.shift_remove(name)
    }

    pub fn headers(&self) -> &IndexMap<String, Value> {
        &self.headers
    }

    pub fn attachment(&self, name: &str) -> Option<&Bytes> {
        self.attachments.get(name)
    }

    pub fn add_attachment(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.attachments.insert(name.into(), data.into());
    }

    pub fn attachments(&self) -> &HashMap<String, Bytes> {
        &self.attachments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_text_views() {
        assert_eq!(Body::from("hello").as_text().as_deref(), Some("hello"));
        assert_eq!(Body::from(b"raw".to_vec()).as_text().as_deref(), Some("raw"));
        assert_eq!(Body::from(json!({"a": 1})).as_text().as_deref(), Some("{\"a\":1}"));
        assert!(Body::Empty.as_text().is_none());
        assert!(Body::from(vec![0xff, 0xfe]).as_text().is_none());
    }

    #[test]
    fn test_headers_keep_insertion_order() {
        let message = Message::new("body")
            .with_header("b", 2)
            .with_header("a", "one");

        let names: Vec<&str> = message.headers().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(message.header_str("a").as_deref(), Some("one"));
        assert_eq!(message.header_str("b").as_deref(), Some("2"));
    }
}
