/*!
Document serialization and pluggable value converters.

A [`Document`] is a JSON object held in memory. [`DocumentSerializer`] turns it into text
and back, and converts individual values into document entries. Types that are not
serde-serializable (or that need a custom wire shape) are handled by a [`ValueConverter`]
registered for that type; the registry is keyed by [`TypeId`] and resolved statically
through the converter's `Target` type.
*/

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::Formatting;
use crate::{Result, SaveError};

/// In-memory save state: unique string keys mapped to JSON values
pub type Document = Map<String, Value>;

/// Bidirectional conversion between an opaque type and a document entry
///
/// # Example
/// ```rust
/// use keepsake_core::{DocumentSerializer, ValueConverter, Result, SaveError};
/// use serde_json::{json, Value};
///
/// struct Rgb(u8, u8, u8);
///
/// struct RgbConverter;
///
/// impl ValueConverter for RgbConverter {
///     type Target = Rgb;
///
///     fn to_value(&self, c: &Rgb) -> Result<Value> {
///         Ok(json!({ "r": c.0, "g": c.1, "b": c.2 }))
///     }
///
///     fn from_value(&self, v: &Value) -> Result<Rgb> {
///         let channel = |name: &str| {
///             v[name]
///                 .as_u64()
///                 .map(|c| c as u8)
///                 .ok_or_else(|| SaveError::invalid_argument(format!("missing channel {name}")))
///         };
///         Ok(Rgb(channel("r")?, channel("g")?, channel("b")?))
///     }
/// }
///
/// let mut serializer = DocumentSerializer::default();
/// assert!(serializer.register_converter(RgbConverter));
/// assert!(!serializer.register_converter(RgbConverter));
/// ```
pub trait ValueConverter: Send + Sync + 'static {
    /// The type this converter handles
    type Target: 'static;

    /// Convert a value into a document entry
    fn to_value(&self, value: &Self::Target) -> Result<Value>;

    /// Convert a document entry back into a value
    fn from_value(&self, value: &Value) -> Result<Self::Target>;
}

type SharedConverter<T> = Arc<dyn ValueConverter<Target = T>>;

/// Converts documents to and from text and values to and from document entries
#[derive(Default)]
pub struct DocumentSerializer {
    formatting: Formatting,
    converters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl DocumentSerializer {
    /// Create a serializer with the given output layout and no converters
    pub fn new(formatting: Formatting) -> Self {
        Self {
            formatting,
            converters: HashMap::new(),
        }
    }

    /// The output layout used by [`DocumentSerializer::serialize`]
    pub fn formatting(&self) -> Formatting {
        self.formatting
    }

    /// Register a converter for its target type
    ///
    /// Returns `false` and keeps the existing converter if the type already has one.
    pub fn register_converter<C: ValueConverter>(&mut self, converter: C) -> bool {
        let type_id = TypeId::of::<C::Target>();
        if self.converters.contains_key(&type_id) {
            debug!(
                target_type = type_name::<C::Target>(),
                "converter already registered, ignoring"
            );
            return false;
        }

        let shared: SharedConverter<C::Target> = Arc::new(converter);
        self.converters.insert(type_id, Box::new(shared));
        true
    }

    /// Whether a converter is registered for `T`
    pub fn has_converter<T: 'static>(&self) -> bool {
        self.converters.contains_key(&TypeId::of::<T>())
    }

    /// Serialize a whole document to text
    pub fn serialize(&self, document: &Document) -> Result<String> {
        let text = match self.formatting {
            Formatting::Compact => serde_json::to_string(document)?,
            Formatting::Indented => serde_json::to_string_pretty(document)?,
        };
        Ok(text)
    }

    /// Parse text into a document; the text must hold a JSON object
    pub fn parse(&self, text: &str) -> Result<Document> {
        Ok(serde_json::from_str(text)?)
    }

    /// Convert a serde-serializable value into a document entry
    ///
    /// A converter registered for `T` takes precedence over `T`'s serde implementation.
    pub fn serialize_key<T: Serialize + 'static>(&self, key: &str, value: &T) -> Result<Value> {
        if let Some(converter) = self.converter::<T>() {
            return converter
                .to_value(value)
                .map_err(|e| SaveError::serialization(key, e));
        }
        serde_json::to_value(value).map_err(|e| SaveError::serialization(key, e))
    }

    /// Convert an opaque value into a document entry through its registered converter
    pub fn serialize_key_with_converter<T: 'static>(&self, key: &str, value: &T) -> Result<Value> {
        let converter = self
            .converter::<T>()
            .ok_or(SaveError::UnregisteredConverter(type_name::<T>()))?;
        converter
            .to_value(value)
            .map_err(|e| SaveError::serialization(key, e))
    }

    /// Convert the entry at `key` into a `T`
    ///
    /// A converter registered for `T` takes precedence over `T`'s serde implementation.
    pub fn deserialize_key<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
        document: &Document,
    ) -> Result<T> {
        let value = entry(key, document)?;
        if let Some(converter) = self.converter::<T>() {
            return converter
                .from_value(value)
                .map_err(|e| SaveError::deserialization(key, e));
        }
        T::deserialize(value).map_err(|e| SaveError::deserialization(key, e))
    }

    /// Convert the entry at `key` into an opaque `T` through its registered converter
    pub fn deserialize_key_with_converter<T: 'static>(
        &self,
        key: &str,
        document: &Document,
    ) -> Result<T> {
        let converter = self
            .converter::<T>()
            .ok_or(SaveError::UnregisteredConverter(type_name::<T>()))?;
        let value = entry(key, document)?;
        converter
            .from_value(value)
            .map_err(|e| SaveError::deserialization(key, e))
    }

    fn converter<T: 'static>(&self) -> Option<&SharedConverter<T>> {
        self.converters
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<SharedConverter<T>>())
    }
}

impl fmt::Debug for DocumentSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSerializer")
            .field("formatting", &self.formatting)
            .field("converters", &self.converters.len())
            .finish()
    }
}

fn entry<'a>(key: &str, document: &'a Document) -> Result<&'a Value> {
    document
        .get(key)
        .ok_or_else(|| SaveError::deserialization(key, "key not present"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq)]
    struct Vec2 {
        x: f32,
        y: f32,
    }

    struct Vec2Converter;

    impl ValueConverter for Vec2Converter {
        type Target = Vec2;

        fn to_value(&self, value: &Vec2) -> Result<Value> {
            Ok(json!([value.x, value.y]))
        }

        fn from_value(&self, value: &Value) -> Result<Vec2> {
            let pair: [f32; 2] = serde_json::from_value(value.clone())?;
            Ok(Vec2 {
                x: pair[0],
                y: pair[1],
            })
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Player {
        name: String,
        level: u32,
    }

    /// Overrides the serde representation of `Player` with a plain string
    struct PlayerTagConverter;

    impl ValueConverter for PlayerTagConverter {
        type Target = Player;

        fn to_value(&self, value: &Player) -> Result<Value> {
            Ok(Value::String(format!("{}#{}", value.name, value.level)))
        }

        fn from_value(&self, value: &Value) -> Result<Player> {
            let tag = value
                .as_str()
                .ok_or_else(|| SaveError::invalid_argument("expected a tag string"))?;
            let (name, level) = tag
                .split_once('#')
                .ok_or_else(|| SaveError::invalid_argument("missing '#'"))?;
            Ok(Player {
                name: name.to_string(),
                level: level
                    .parse()
                    .map_err(|_| SaveError::invalid_argument("bad level"))?,
            })
        }
    }

    #[test]
    fn test_serialize_formatting() {
        let mut document = Document::new();
        document.insert("a".to_string(), json!(1));

        let compact = DocumentSerializer::new(Formatting::Compact);
        assert_eq!(compact.serialize(&document).unwrap(), r#"{"a":1}"#);

        let indented = DocumentSerializer::new(Formatting::Indented);
        assert_eq!(indented.serialize(&document).unwrap(), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_parse_requires_object() {
        let serializer = DocumentSerializer::default();
        assert_eq!(serializer.parse(r#"{"a": [1, 2]}"#).unwrap().len(), 1);
        assert!(serializer.parse("[1, 2]").is_err());
        assert!(serializer.parse("{\"a\":").is_err());
    }

    #[test]
    fn test_serde_values_roundtrip() {
        let serializer = DocumentSerializer::default();
        let mut document = Document::new();

        let player = Player {
            name: "Ada".to_string(),
            level: 7,
        };
        document.insert(
            "player".to_string(),
            serializer.serialize_key("player", &player).unwrap(),
        );
        assert_eq!(document["player"], json!({"name": "Ada", "level": 7}));

        let restored: Player = serializer.deserialize_key("player", &document).unwrap();
        assert_eq!(restored, player);
    }

    #[test]
    fn test_deserialize_type_mismatch() {
        let serializer = DocumentSerializer::default();
        let mut document = Document::new();
        document.insert("name".to_string(), json!("Ada"));

        let err = serializer
            .deserialize_key::<u32>("name", &document)
            .unwrap_err();
        assert!(matches!(err, SaveError::Deserialization { ref key, .. } if key == "name"));

        let err = serializer
            .deserialize_key::<u32>("missing", &document)
            .unwrap_err();
        assert!(err.to_string().contains("key not present"));
    }

    #[test]
    fn test_serialize_failure_is_wrapped() {
        let serializer = DocumentSerializer::default();
        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8], "tuple keys are not JSON object keys");

        let err = serializer.serialize_key("bad", &bad).unwrap_err();
        assert!(matches!(err, SaveError::Serialization { ref key, .. } if key == "bad"));
    }

    #[test]
    fn test_opaque_type_requires_converter() {
        let mut serializer = DocumentSerializer::default();
        let value = Vec2 { x: 1.0, y: 2.5 };

        let err = serializer
            .serialize_key_with_converter("pos", &value)
            .unwrap_err();
        assert!(matches!(err, SaveError::UnregisteredConverter(name) if name.ends_with("Vec2")));

        assert!(serializer.register_converter(Vec2Converter));
        assert!(serializer.has_converter::<Vec2>());

        let mut document = Document::new();
        let entry = serializer.serialize_key_with_converter("pos", &value).unwrap();
        assert_eq!(entry, json!([1.0, 2.5]));
        document.insert("pos".to_string(), entry);

        let restored: Vec2 = serializer
            .deserialize_key_with_converter("pos", &document)
            .unwrap();
        assert_eq!(restored, value);
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let mut serializer = DocumentSerializer::default();
        assert!(serializer.register_converter(Vec2Converter));
        assert!(!serializer.register_converter(Vec2Converter));
        assert_eq!(serializer.converters.len(), 1);
    }

    #[test]
    fn test_converter_takes_precedence_over_serde() {
        let mut serializer = DocumentSerializer::default();
        serializer.register_converter(PlayerTagConverter);

        let player = Player {
            name: "Bo".to_string(),
            level: 3,
        };
        let entry = serializer.serialize_key("p", &player).unwrap();
        assert_eq!(entry, json!("Bo#3"));

        let mut document = Document::new();
        document.insert("p".to_string(), entry);
        let restored: Player = serializer.deserialize_key("p", &document).unwrap();
        assert_eq!(restored, player);
    }
}
