use std::collections::BTreeMap;

/// The property bag of a [Message]. The transport does not attach any meaning to the order of
///  properties, a sorted map is used to make the encoded form deterministic.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A single value in a message's property bag
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}
impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}
impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}
impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}
impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}
impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        PropertyValue::Bytes(value)
    }
}


/// An application-level message: a topic plus a property bag. A message is immutable once it is
///  handed to the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    topic: String,
    properties: Properties,
}
impl Message {
    pub fn new(topic: impl Into<String>, properties: Properties) -> Message {
        Message {
            topic: topic.into(),
            properties,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Message {
        self.properties.insert(key.into(), value.into());
        self
    }
}
