//! Dynamic type and value model.
//!
//! This is the contract the bridge consumes from the host integration
//! framework's type system: a [`DynType`] has a name and a struct-like shape,
//! a [`DynValue`] can be constructed empty from its type, and values convert
//! to and from JSON with a typed error when the shape does not fit. The
//! bridge itself never looks deeper than that.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::{BridgeError, Result};
use crate::protocol::canonicalize_type_name;

/// Shape of a single field inside a [`DynType`].
#[derive(Debug, Clone)]
pub enum FieldType {
    Bool,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    String,
    Struct(Arc<DynType>),
    Sequence(Box<FieldType>),
}

impl FieldType {
    /// Default JSON rendering for an empty value of this field.
    fn default_json(&self) -> Value {
        match self {
            FieldType::Bool => Value::Bool(false),
            FieldType::Int32 | FieldType::Uint32 | FieldType::Int64 | FieldType::Uint64 => {
                json!(0)
            }
            FieldType::Float32 | FieldType::Float64 => json!(0.0),
            FieldType::String => Value::String(String::new()),
            FieldType::Struct(ty) => Value::Object(ty.default_fields()),
            FieldType::Sequence(_) => Value::Array(Vec::new()),
        }
    }

    /// Check that `value` is representable as this field type.
    fn check(&self, field: &str, value: &Value) -> Result<()> {
        let ok = match self {
            FieldType::Bool => value.is_boolean(),
            FieldType::Int32 => value.as_i64().is_some_and(|v| i32::try_from(v).is_ok()),
            FieldType::Uint32 => value.as_u64().is_some_and(|v| u32::try_from(v).is_ok()),
            FieldType::Int64 => value.as_i64().is_some(),
            FieldType::Uint64 => value.as_u64().is_some(),
            FieldType::Float32 | FieldType::Float64 => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Struct(ty) => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| conversion_mismatch(field, "struct", value))?;
                ty.check_fields(obj)?;
                true
            }
            FieldType::Sequence(elem) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| conversion_mismatch(field, "sequence", value))?;
                for item in items {
                    elem.check(field, item)?;
                }
                true
            }
        };

        if ok {
            Ok(())
        } else {
            Err(conversion_mismatch(field, self.label(), value))
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int32 => "int32",
            FieldType::Uint32 => "uint32",
            FieldType::Int64 => "int64",
            FieldType::Uint64 => "uint64",
            FieldType::Float32 => "float32",
            FieldType::Float64 => "float64",
            FieldType::String => "string",
            FieldType::Struct(_) => "struct",
            FieldType::Sequence(_) => "sequence",
        }
    }
}

fn conversion_mismatch(field: &str, expected: &str, value: &Value) -> BridgeError {
    BridgeError::Conversion(format!(
        "field '{field}' does not fit '{expected}': {value}"
    ))
}

/// A named struct-like schema supplied by the host type registry.
#[derive(Debug)]
pub struct DynType {
    name: String,
    fields: Vec<(String, FieldType)>,
}

impl DynType {
    pub fn new(name: impl Into<String>, fields: Vec<(String, FieldType)>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fields,
        })
    }

    /// The type's own (source) name. May contain `/`; canonicalization happens
    /// at registry and wire boundaries.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    fn field_type(&self, field: &str) -> Option<&FieldType> {
        self.fields.iter().find(|(n, _)| n == field).map(|(_, t)| t)
    }

    fn default_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, ty)| (name.clone(), ty.default_json()))
            .collect()
    }

    /// Validate a JSON object against this schema. Declared fields that are
    /// present must fit their type; absent fields default; unknown extra
    /// fields are tolerated (the wire contract tolerates them too).
    fn check_fields(&self, obj: &Map<String, Value>) -> Result<()> {
        for (name, ty) in &self.fields {
            if let Some(value) = obj.get(name) {
                ty.check(name, value)?;
            }
        }
        Ok(())
    }
}

/// A runtime-typed structured value: a JSON object validated against its
/// [`DynType`].
#[derive(Debug, Clone)]
pub struct DynValue {
    ty: Arc<DynType>,
    fields: Map<String, Value>,
}

impl DynValue {
    /// Construct an empty value of the given type (zero/empty defaults).
    pub fn new_empty(ty: Arc<DynType>) -> Self {
        let fields = ty.default_fields();
        Self { ty, fields }
    }

    /// Construct a value of `ty` populated from a JSON object.
    ///
    /// Starts from the empty value and overlays the declared fields present in
    /// `json`; a field whose value does not fit its declared type fails the
    /// whole conversion.
    pub fn from_json(ty: Arc<DynType>, json: &Value) -> Result<Self> {
        let obj = json.as_object().ok_or_else(|| {
            BridgeError::Conversion(format!(
                "cannot populate '{}' from non-object JSON: {json}",
                ty.name()
            ))
        })?;
        ty.check_fields(obj)?;

        let mut fields = ty.default_fields();
        for (name, _) in &ty.fields {
            if let Some(value) = obj.get(name) {
                fields.insert(name.clone(), value.clone());
            }
        }
        Ok(Self { ty, fields })
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn dyn_type(&self) -> &Arc<DynType> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    /// Read a field. `None` if the field is not declared by the type.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Overwrite a field with a value that must fit its declared type.
    pub fn set(&mut self, field: &str, value: Value) -> Result<()> {
        let ty = self.ty.field_type(field).ok_or_else(|| {
            BridgeError::Conversion(format!(
                "type '{}' has no field '{field}'",
                self.ty.name()
            ))
        })?;
        ty.check(field, &value)?;
        self.fields.insert(field.to_string(), value);
        Ok(())
    }
}

/// The host framework's `name -> DynType` lookup.
///
/// Keys are canonicalized on insertion and lookup, so `foo/bar/Baz` and
/// `foo__bar__Baz` resolve to the same entry.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<DynType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under its own name. Returns false on collision.
    pub fn register(&mut self, ty: Arc<DynType>) -> bool {
        let name = canonicalize_type_name(ty.name());
        self.register_as(&name, ty)
    }

    /// Register a type under an explicit name. Returns false on collision.
    pub fn register_as(&mut self, name: &str, ty: Arc<DynType>) -> bool {
        use std::collections::hash_map::Entry;
        match self.types.entry(canonicalize_type_name(name)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ty);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<DynType>> {
        self.types.get(&canonicalize_type_name(name))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
