//! Object types and the attributes they declare.

use crate::error::{StoreError, StoreResult};
use crate::value::{AttributeValue, ValueKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Versions kept per non-series attribute unless a spec says otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 32;

/// Built-in type names.
pub mod types {
    pub const VOLUME: &str = "Volume";
    pub const CLIENT: &str = "Client";
    pub const TIME_SERIES: &str = "TimeSeries";
    pub const INDEX: &str = "Index";
}

/// Attribute names declared by the built-in types.
pub mod attrs {
    pub const DESCRIPTION: &str = "Description";
    pub const HOST: &str = "Host";
    pub const VERSION: &str = "Version";
    pub const MAC: &str = "MAC";
    pub const USERNAMES: &str = "Usernames";
    pub const INSTALL: &str = "Install";
    pub const CLOCK: &str = "Clock";
    pub const CERT: &str = "Cert";
    pub const FIRST_SEEN: &str = "FirstSeen";
    pub const EVENT: &str = "Event";
    pub const SIZE: &str = "Size";
    pub const ENTRIES: &str = "Entries";

    /// Pseudo-attribute holding the object's URN text.
    pub const SUBJECT: &str = "subject";
    /// Pseudo-attribute holding the object's type name.
    pub const TYPE: &str = "type";
}

/// Declaration of one attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: ValueKind,
    /// Series attributes keep every version and are read as a whole.
    pub series: bool,
    /// Indexed attributes feed the client keyword index.
    pub indexed: bool,
    history: Option<usize>,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            series: false,
            indexed: false,
            history: Some(DEFAULT_HISTORY_LIMIT),
        }
    }

    pub fn series(mut self) -> Self {
        self.series = true;
        self.history = None;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn with_history(mut self, limit: usize) -> Self {
        self.history = Some(limit.max(1));
        self
    }

    /// Number of versions retained; `None` keeps all.
    pub fn history(&self) -> Option<usize> {
        self.history
    }
}

/// A named object type.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    pub name: String,
    attributes: BTreeMap<String, AttributeSpec>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, spec: AttributeSpec) -> Self {
        self.attributes.insert(spec.name.clone(), spec);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.values()
    }

    /// Check that `value` may be written to `name` on this type.
    pub fn validate(&self, name: &str, value: &AttributeValue) -> StoreResult<&AttributeSpec> {
        let spec = self.attribute(name).ok_or_else(|| StoreError::Schema {
            type_name: self.name.clone(),
            attribute: name.to_string(),
        })?;
        if spec.kind != value.kind() {
            return Err(StoreError::TypeMismatch {
                attribute: name.to_string(),
                expected: spec.kind,
                found: value.kind(),
            });
        }
        Ok(spec)
    }

    pub fn volume() -> Self {
        Self::new(types::VOLUME)
            .with_attribute(AttributeSpec::new(attrs::DESCRIPTION, ValueKind::String))
    }

    pub fn client() -> Self {
        Self::new(types::CLIENT)
            .with_attribute(AttributeSpec::new(attrs::HOST, ValueKind::String).indexed())
            .with_attribute(AttributeSpec::new(attrs::VERSION, ValueKind::String))
            .with_attribute(AttributeSpec::new(attrs::MAC, ValueKind::String))
            .with_attribute(AttributeSpec::new(attrs::USERNAMES, ValueKind::String).indexed())
            .with_attribute(AttributeSpec::new(attrs::INSTALL, ValueKind::Timestamp))
            .with_attribute(AttributeSpec::new(attrs::CLOCK, ValueKind::Timestamp))
            .with_attribute(AttributeSpec::new(attrs::CERT, ValueKind::Certificate))
            .with_attribute(AttributeSpec::new(attrs::FIRST_SEEN, ValueKind::Timestamp).with_history(1))
    }

    pub fn time_series() -> Self {
        Self::new(types::TIME_SERIES)
            .with_attribute(AttributeSpec::new(attrs::EVENT, ValueKind::Event).series())
            .with_attribute(AttributeSpec::new(attrs::SIZE, ValueKind::Integer))
    }

    pub fn index() -> Self {
        Self::new(types::INDEX)
            .with_attribute(AttributeSpec::new(attrs::ENTRIES, ValueKind::String).series())
            .with_attribute(AttributeSpec::new(attrs::SIZE, ValueKind::Integer))
    }
}

/// Registered schemas, keyed by type name.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `Volume`, `Client`, `TimeSeries` and `Index`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Schema::volume());
        registry.register(Schema::client());
        registry.register(Schema::time_series());
        registry.register(Schema::index());
        registry
    }

    /// Register a schema, replacing any previous one of the same name.
    pub fn register(&mut self, schema: Schema) {
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
    }

    pub fn get(&self, type_name: &str) -> StoreResult<Arc<Schema>> {
        self.schemas
            .get(type_name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = SchemaRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["Client", "Index", "TimeSeries", "Volume"]);
        assert!(matches!(
            registry.get("Nope"),
            Err(StoreError::UnknownType(name)) if name == "Nope"
        ));
    }

    #[test]
    fn test_validate_undeclared_attribute() {
        let client = Schema::client();
        let err = client.validate("Color", &"blue".into()).unwrap_err();
        assert!(matches!(err, StoreError::Schema { ref attribute, .. } if attribute == "Color"));
        assert!(err.is_schema_error());
    }

    #[test]
    fn test_validate_type_mismatch() {
        let client = Schema::client();
        let err = client.validate(attrs::HOST, &AttributeValue::Integer(3)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::TypeMismatch {
                expected: ValueKind::String,
                found: ValueKind::Integer,
                ..
            }
        ));
    }

    #[test]
    fn test_series_keep_everything() {
        let ts = Schema::time_series();
        assert!(ts.attribute(attrs::EVENT).unwrap().series);
        assert_eq!(ts.attribute(attrs::EVENT).unwrap().history(), None);
        assert_eq!(
            ts.attribute(attrs::SIZE).unwrap().history(),
            Some(DEFAULT_HISTORY_LIMIT)
        );
    }
}
