//! Column type descriptors and the process-wide type registry.

use super::Data;
use super::column::{BooleanType, DoubleType, IntegerType, StringType};
use ferry_common::{FerryError, Result};
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, OnceLock};

/// Shared handle to a type descriptor.
pub type TypeRef = Arc<dyn Type>;

/// A named, sized descriptor able to allocate columns of its type.
pub trait Type: Send + Sync + Debug + Display {
    /// Registry name. Two types are equal when their names are.
    fn name(&self) -> &str;

    /// Width of one value in bytes, as reported to planners.
    fn size(&self) -> usize;

    /// A column of `rows` zero-valued rows.
    fn data(&self, rows: usize) -> Result<Box<dyn Data>>;

    /// An empty column with room for `capacity` rows.
    fn data_empty(&self, capacity: usize) -> Result<Box<dyn Data>>;

    /// Rebuild a column from the bytes produced by [`Data::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Data>>;

    /// Whether this type stands in for any type.
    fn is_wildcard(&self) -> bool {
        false
    }
}

/// Placeholder type declared by runners whose output mirrors their input.
#[derive(Debug, Clone, Copy, Default)]
pub struct WildcardType;

impl Display for WildcardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Type for WildcardType {
    fn name(&self) -> &str {
        "*"
    }

    fn size(&self) -> usize {
        0
    }

    fn data(&self, _rows: usize) -> Result<Box<dyn Data>> {
        Err(FerryError::invalid_data("cannot allocate data of the wildcard type"))
    }

    fn data_empty(&self, _capacity: usize) -> Result<Box<dyn Data>> {
        Err(FerryError::invalid_data("cannot allocate data of the wildcard type"))
    }

    fn decode(&self, _bytes: &[u8]) -> Result<Box<dyn Data>> {
        Err(FerryError::invalid_data("cannot decode data of the wildcard type"))
    }

    fn is_wildcard(&self) -> bool {
        true
    }
}

pub fn wildcard() -> TypeRef {
    Arc::new(WildcardType)
}

pub fn integer() -> TypeRef {
    Arc::new(IntegerType::new())
}

pub fn double() -> TypeRef {
    Arc::new(DoubleType::new())
}

pub fn string() -> TypeRef {
    Arc::new(StringType::new())
}

pub fn boolean() -> TypeRef {
    Arc::new(BooleanType::new())
}

/// Compare two type lists element-wise by name. The wildcard matches anything.
pub fn are_equal_types(a: &[TypeRef], b: &[TypeRef]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.is_wildcard() || y.is_wildcard() || x.name() == y.name())
}

/// Render a type list as `[integer, string]`.
pub fn describe(types: &[TypeRef]) -> String {
    let names: Vec<&str> = types.iter().map(|t| t.name()).collect();
    format!("[{}]", names.join(", "))
}

/// Name-keyed set of types, resolvable on every node of a cluster.
///
/// Built with chained [`TypeRegistry::register`] calls and published once with
/// [`TypeRegistry::install`]; the published registry is read-only.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeRef>,
}

static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();

/// The published registry. Publishes the built-in registry if nothing was installed yet.
pub fn types() -> &'static TypeRegistry {
    REGISTRY.get_or_init(TypeRegistry::builtin)
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the primitive column types shipped with this crate.
    pub fn builtin() -> Self {
        Self::new()
            .register("integer", integer())
            .register("double", double())
            .register("string", string())
            .register("boolean", boolean())
    }

    /// Register `ty` under `name`. Registering a name twice keeps the first type.
    pub fn register(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.types.entry(name.into()).or_insert(ty);
        self
    }

    pub fn get(&self, name: &str) -> Option<TypeRef> {
        self.types.get(name).cloned()
    }

    /// Like [`TypeRegistry::get`], failing with `UnknownType` on a miss.
    pub fn resolve(&self, name: &str) -> Result<TypeRef> {
        self.get(name).ok_or_else(|| FerryError::unknown_type(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    /// Publish this registry process-wide. Fails if a registry was already published,
    /// including implicitly by an earlier call to [`types`].
    pub fn install(self) -> Result<&'static TypeRegistry> {
        REGISTRY
            .set(self)
            .map_err(|_| FerryError::RegistryInitialized)?;
        Ok(types())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_chainable_and_idempotent() {
        let registry = TypeRegistry::new()
            .register("integer", integer())
            .register("integer", string())
            .register("string", string());

        assert_eq!(registry.names(), vec!["integer", "string"]);
        assert_eq!(registry.get("integer").unwrap().name(), "integer");
        assert!(registry.get("double").is_none());
    }

    #[test]
    fn test_resolve_unknown() {
        let err = TypeRegistry::builtin().resolve("decimal").unwrap_err();
        assert!(matches!(err, FerryError::UnknownType { name } if name == "decimal"));
    }

    #[test]
    fn test_builtin_registry() {
        let registry = types();
        for name in ["integer", "double", "string", "boolean"] {
            assert!(registry.contains(name), "missing builtin {name}");
        }
    }

    #[test]
    fn test_are_equal_types() {
        assert!(are_equal_types(&[integer(), string()], &[integer(), string()]));
        assert!(!are_equal_types(&[integer(), string()], &[string(), integer()]));
        assert!(!are_equal_types(&[integer()], &[integer(), integer()]));
        assert!(are_equal_types(&[wildcard()], &[double()]));
    }

    #[test]
    fn test_allocation() {
        let data = integer().data(3).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.strings(), vec!["0", "0", "0"]);

        let empty = string().data_empty(10).unwrap();
        assert!(empty.is_empty());

        assert!(wildcard().data(1).is_err());
        assert_eq!(describe(&[integer(), wildcard()]), "[integer, *]");
    }
}
