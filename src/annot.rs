//! Strongly-typed annotation tree for task parameters.
//!
//! The tree is built once per run by `parse::parse_annotation` and consumed
//! read-only by the signature validator and the schema synthesizer. Union
//! branches are kept exactly as declared (after deduplication); whether a
//! given union shape is acceptable is the validator's call, not the parser's.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::ConfigError;

/// Depth bound for walking model references (fields referencing models
/// referencing models...). Exceeding it means a cyclic model graph.
pub const MAX_MODEL_RECURSION: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Str,
    Int,
    Float,
    Bool,
    /// The absent type (`None` in annotation syntax).
    NoneType,
    Any,
    /// Plain union. Branches are deduplicated, so `int | int` never
    /// reaches this variant.
    Union(Vec<Annotation>),
    /// `Annotated[inner, ...]`. With a discriminator this is the tagged-union
    /// form; without one it is just an annotated (possibly union) type.
    Annotated {
        inner: Box<Annotation>,
        discriminator: Option<String>,
    },
    /// Named structured model or enumeration, resolved via `ModelRegistry`.
    Reference(String),
    List(Box<Annotation>),
    Tuple(Vec<Annotation>),
    /// `Literal[...]` over string values.
    Literal(Vec<String>),
}

impl Annotation {
    /// Union branches, looking through a single `Annotated` wrapper.
    pub fn union_branches(&self) -> Option<&[Annotation]> {
        match self {
            Annotation::Union(branches) => Some(branches),
            Annotation::Annotated { inner, .. } => inner.union_branches(),
            _ => None,
        }
    }

    /// True for the supported "optional" shape: a two-branch union where
    /// exactly one branch is the absent type.
    pub fn is_optional_shaped(&self) -> bool {
        match self.union_branches() {
            Some(branches) => {
                branches.len() == 2
                    && branches
                        .iter()
                        .filter(|b| **b == Annotation::NoneType)
                        .count()
                        == 1
            }
            None => false,
        }
    }

    /// Collect every named reference in the tree, in declaration order.
    pub fn references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Annotation::Reference(name) => out.push(name),
            Annotation::Union(branches) | Annotation::Tuple(branches) => {
                for b in branches {
                    b.references(out);
                }
            }
            Annotation::Annotated { inner, .. } => inner.references(out),
            Annotation::List(item) => item.references(out),
            _ => {}
        }
    }
}

impl std::fmt::Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Annotation::Str => write!(f, "str"),
            Annotation::Int => write!(f, "int"),
            Annotation::Float => write!(f, "float"),
            Annotation::Bool => write!(f, "bool"),
            Annotation::NoneType => write!(f, "None"),
            Annotation::Any => write!(f, "Any"),
            Annotation::Union(branches) => {
                let parts: Vec<String> =
                    branches.iter().map(|b| b.to_string()).collect();
                write!(f, "{}", parts.join(" | "))
            }
            Annotation::Annotated {
                inner,
                discriminator: Some(d),
            } => write!(f, "Annotated[{inner}, discriminator=\"{d}\"]"),
            Annotation::Annotated {
                inner,
                discriminator: None,
            } => write!(f, "Annotated[{inner}, ...]"),
            Annotation::Reference(name) => write!(f, "{name}"),
            Annotation::List(item) => write!(f, "list[{item}]"),
            Annotation::Tuple(elems) => {
                let parts: Vec<String> =
                    elems.iter().map(|e| e.to_string()).collect();
                write!(f, "tuple[{}]", parts.join(", "))
            }
            Annotation::Literal(values) => {
                let parts: Vec<String> =
                    values.iter().map(|v| format!("\"{v}\"")).collect();
                write!(f, "Literal[{}]", parts.join(", "))
            }
        }
    }
}

/// How a parameter's default value is declared.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultSpec {
    /// No default at all.
    Unset,
    /// A literal JSON default, including `null`.
    Value(Value),
    /// A factory producing a model's default instance from its own field
    /// defaults. The string names the model.
    Factory(String),
    /// A factory that needs already-validated sibling data; no default can
    /// be computed statically.
    FactoryTakesData(String),
}

impl DefaultSpec {
    pub fn is_unset(&self) -> bool {
        matches!(self, DefaultSpec::Unset)
    }

    /// Resolve to a concrete JSON default, invoking model factories.
    /// `FactoryTakesData` and `Unset` resolve to `None`.
    pub fn resolve(
        &self,
        registry: &ModelRegistry,
    ) -> Result<Option<Value>, ConfigError> {
        match self {
            DefaultSpec::Unset | DefaultSpec::FactoryTakesData(_) => Ok(None),
            DefaultSpec::Value(v) => Ok(Some(v.clone())),
            DefaultSpec::Factory(model) => {
                registry.default_instance(model).map(Some)
            }
        }
    }
}

/// One declared parameter, of a task function or of a model field.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Annotation,
    pub default: DefaultSpec,
    /// Field-level description; wins over any docstring-derived one.
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    pub name: String,
    pub doc: Option<String>,
    pub fields: Vec<Param>,
}

impl ModelDef {
    /// The `Literal` value of the named discriminator field, used to build
    /// tagged-union mappings.
    pub fn discriminator_value(&self, field: &str) -> Option<&str> {
        self.fields.iter().find(|f| f.name == field).and_then(|f| {
            match &f.annotation {
                Annotation::Literal(values) if values.len() == 1 => {
                    Some(values[0].as_str())
                }
                _ => None,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub doc: Option<String>,
    pub values: Vec<String>,
}

/// The declared interface of one task executable: the function name, its
/// docstring, its parameters, and any locally declared models/enums.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInterface {
    pub function: String,
    pub doc: Option<String>,
    pub params: Vec<Param>,
    pub models: IndexMap<String, ModelDef>,
    pub enums: IndexMap<String, EnumDef>,
}

/// Name-resolution context for `Annotation::Reference`. Holds the models and
/// enums visible to one schema-synthesis run: the interface-local ones plus
/// any package-registered input models.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelDef>,
    enums: IndexMap<String, EnumDef>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_model(&mut self, model: ModelDef) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn insert_enum(&mut self, def: EnumDef) {
        self.enums.insert(def.name.clone(), def);
    }

    /// Merge an interface's local declarations into the registry.
    pub fn absorb_interface(&mut self, interface: &TaskInterface) {
        for model in interface.models.values() {
            self.insert_model(model.clone());
        }
        for def in interface.enums.values() {
            self.insert_enum(def.clone());
        }
    }

    pub fn model(&self, name: &str) -> Option<&ModelDef> {
        self.models.get(name)
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }

    /// Build the default instance a model factory produces: every field
    /// rendered from its own default, recursively.
    pub fn default_instance(&self, name: &str) -> Result<Value, ConfigError> {
        self.default_instance_inner(name, 0)
    }

    fn default_instance_inner(
        &self,
        name: &str,
        depth: usize,
    ) -> Result<Value, ConfigError> {
        if depth > MAX_MODEL_RECURSION {
            return Err(ConfigError::MaxModelRecursion {
                max: MAX_MODEL_RECURSION,
            });
        }
        let model =
            self.model(name)
                .ok_or_else(|| ConfigError::UnresolvedReference {
                    name: name.to_string(),
                    context: " while instantiating factory default".to_string(),
                })?;
        let mut instance = serde_json::Map::new();
        for field in &model.fields {
            let value = match &field.default {
                DefaultSpec::Value(v) => v.clone(),
                DefaultSpec::Factory(inner) => {
                    self.default_instance_inner(inner, depth + 1)?
                }
                DefaultSpec::Unset | DefaultSpec::FactoryTakesData(_) => {
                    return Err(ConfigError::FactoryMissingFieldDefault {
                        factory: name.to_string(),
                        model: model.name.clone(),
                        field: field.name.clone(),
                    });
                }
            };
            instance.insert(field.name.clone(), value);
        }
        Ok(Value::Object(instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, annotation: Annotation, default: DefaultSpec) -> Param {
        Param {
            name: name.to_string(),
            annotation,
            default,
            description: None,
        }
    }

    #[test]
    fn optional_shape_detection() {
        let optional = Annotation::Union(vec![Annotation::Str, Annotation::NoneType]);
        assert!(optional.is_optional_shaped());

        let plain = Annotation::Union(vec![Annotation::Int, Annotation::Str]);
        assert!(!plain.is_optional_shaped());

        let annotated = Annotation::Annotated {
            inner: Box::new(Annotation::Union(vec![
                Annotation::Int,
                Annotation::NoneType,
            ])),
            discriminator: None,
        };
        assert!(annotated.is_optional_shaped());

        assert!(!Annotation::Str.is_optional_shaped());
    }

    #[test]
    fn display_round_trips_shapes() {
        let a = Annotation::Union(vec![Annotation::Int, Annotation::NoneType]);
        assert_eq!(a.to_string(), "int | None");
        let t = Annotation::Tuple(vec![Annotation::Int, Annotation::Int]);
        assert_eq!(t.to_string(), "tuple[int, int]");
        let l = Annotation::Literal(vec!["a".into(), "b".into()]);
        assert_eq!(l.to_string(), "Literal[\"a\", \"b\"]");
    }

    #[test]
    fn factory_default_equals_direct_instantiation() {
        let mut registry = ModelRegistry::new();
        registry.insert_model(ModelDef {
            name: "ModelAllOptional".to_string(),
            doc: None,
            fields: vec![
                field(
                    "x",
                    Annotation::Union(vec![Annotation::Int, Annotation::NoneType]),
                    DefaultSpec::Value(Value::Null),
                ),
                field("y", Annotation::Int, DefaultSpec::Value(json!(1))),
            ],
        });
        let instance = registry.default_instance("ModelAllOptional").unwrap();
        assert_eq!(instance, json!({"x": null, "y": 1}));
    }

    #[test]
    fn factory_fails_on_defaultless_required_field() {
        let mut registry = ModelRegistry::new();
        registry.insert_model(ModelDef {
            name: "ModelSomeRequired".to_string(),
            doc: None,
            fields: vec![field("y", Annotation::Str, DefaultSpec::Unset)],
        });
        let err = registry.default_instance("ModelSomeRequired").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::FactoryMissingFieldDefault { .. }
        ));
    }

    #[test]
    fn nested_factories_resolve_recursively() {
        let mut registry = ModelRegistry::new();
        registry.insert_model(ModelDef {
            name: "Inner".to_string(),
            doc: None,
            fields: vec![field("a", Annotation::Int, DefaultSpec::Value(json!(7)))],
        });
        registry.insert_model(ModelDef {
            name: "Outer".to_string(),
            doc: None,
            fields: vec![field(
                "inner",
                Annotation::Reference("Inner".to_string()),
                DefaultSpec::Factory("Inner".to_string()),
            )],
        });
        let instance = registry.default_instance("Outer").unwrap();
        assert_eq!(instance, json!({"inner": {"a": 7}}));
    }

    #[test]
    fn cyclic_factories_hit_recursion_bound() {
        let mut registry = ModelRegistry::new();
        registry.insert_model(ModelDef {
            name: "Cycle".to_string(),
            doc: None,
            fields: vec![field(
                "next",
                Annotation::Reference("Cycle".to_string()),
                DefaultSpec::Factory("Cycle".to_string()),
            )],
        });
        let err = registry.default_instance("Cycle").unwrap_err();
        assert!(matches!(err, ConfigError::MaxModelRecursion { .. }));
    }
}
