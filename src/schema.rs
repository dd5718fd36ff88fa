//! JSON Schema synthesis for validated task interfaces.
//!
//! Mirrors what a stock model-to-schema generator would emit, with the
//! project's deviations applied on top:
//! - optional fields are flattened (no `anyOf` with a null branch);
//! - `required` is driven by defaults, not nullability;
//! - `null` defaults and data-dependent factory defaults are omitted;
//! - single-element `allOf` wrappers around `$ref`s are collapsed flat.
//!
//! Schemas are built bottom-up and immutable once returned; the interface
//! itself is never touched.

use std::path::Path;

use heck::{ToPascalCase, ToTitleCase};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::annot::{Annotation, DefaultSpec, ModelRegistry, Param, TaskInterface};
use crate::docs;
use crate::error::ConfigError;
use crate::signature::validate_task_interface;

const MISSING_DESCRIPTION: &str = "Missing description";

/// Synthesize the argument schema of one task: an object schema over all
/// declared parameters, with named models/enums registered under `$defs`.
///
/// `executable` is the task's source-file path; with `package == None` it
/// must be absolute, with `package == Some(_)` it must be relative to the
/// package root. The interface's function must reside in that file.
pub fn create_schema_for_single_task(
    interface: &TaskInterface,
    executable: &str,
    package: Option<&str>,
    registry: &ModelRegistry,
) -> Result<Value, ConfigError> {
    let path = Path::new(executable);
    match package {
        None if !path.is_absolute() => {
            return Err(ConfigError::ExecutableNotAbsolute {
                path: executable.to_string(),
            });
        }
        Some(package) if path.is_absolute() => {
            return Err(ConfigError::ExecutableNotInPackage {
                path: executable.to_string(),
                package: package.to_string(),
            });
        }
        _ => {}
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if stem != interface.function {
        return Err(ConfigError::FunctionNotInFile {
            function: interface.function.clone(),
            path: executable.to_string(),
        });
    }

    validate_task_interface(interface, registry)?;

    let mut builder = SchemaBuilder {
        registry,
        defs: IndexMap::new(),
    };

    let arg_descriptions = docs::parse_arg_descriptions(interface.doc.as_deref());
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();
    for param in &interface.params {
        let docstring = arg_descriptions.get(&param.name).map(String::as_str);
        properties.insert(param.name.clone(), builder.build_property(param, docstring)?);
        if param.default.is_unset() && !param.annotation.is_optional_shaped() {
            required.push(param.name.clone());
        }
    }

    let mut schema = Map::new();
    if !builder.defs.is_empty() {
        schema.insert(
            "$defs".to_string(),
            Value::Object(builder.defs.into_iter().collect()),
        );
    }
    schema.insert("additionalProperties".to_string(), json!(false));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    schema.insert("type".to_string(), json!("object"));
    schema.insert(
        "title".to_string(),
        json!(interface.function.to_pascal_case()),
    );

    debug!(function = %interface.function, "schema synthesis done");
    Ok(Value::Object(schema))
}

struct SchemaBuilder<'a> {
    registry: &'a ModelRegistry,
    defs: IndexMap<String, Value>,
}

impl SchemaBuilder<'_> {
    /// One property: the annotation's core schema plus title, description,
    /// and default. Sibling keys on a `$ref` core go through the stock
    /// single-element-`allOf` shape, then get collapsed flat.
    fn build_property(
        &mut self,
        param: &Param,
        docstring_description: Option<&str>,
    ) -> Result<Value, ConfigError> {
        let core = self.annotation_schema(&param.annotation)?;
        let mut prop = if core.get("$ref").is_some() {
            json!({ "allOf": [core] })
        } else {
            core
        };

        let obj = prop.as_object_mut().expect("property schema is an object");
        obj.insert("title".to_string(), json!(param.name.to_title_case()));

        let description = param
            .description
            .as_deref()
            .or(docstring_description)
            .unwrap_or(MISSING_DESCRIPTION);
        obj.insert("description".to_string(), json!(description));

        match &param.default {
            DefaultSpec::Unset => {}
            DefaultSpec::Value(Value::Null) => {
                warn!(
                    param = %param.name,
                    "ignoring `None` default value (not rendered in schema)"
                );
            }
            DefaultSpec::Value(value) => {
                obj.insert("default".to_string(), value.clone());
            }
            DefaultSpec::Factory(model) => {
                obj.insert(
                    "default".to_string(),
                    self.registry.default_instance(model)?,
                );
            }
            DefaultSpec::FactoryTakesData(factory) => {
                warn!(
                    param = %param.name,
                    factory = %factory,
                    "cannot populate default: factory takes validated data"
                );
            }
        }

        Ok(collapse_single_allof(prop))
    }

    fn annotation_schema(&mut self, annotation: &Annotation) -> Result<Value, ConfigError> {
        match annotation {
            Annotation::Str => Ok(json!({ "type": "string" })),
            Annotation::Int => Ok(json!({ "type": "integer" })),
            Annotation::Float => Ok(json!({ "type": "number" })),
            Annotation::Bool => Ok(json!({ "type": "boolean" })),
            Annotation::NoneType => Ok(json!({ "type": "null" })),
            Annotation::Any => Ok(json!({})),
            Annotation::Literal(values) if values.len() == 1 => {
                Ok(json!({ "const": values[0], "type": "string" }))
            }
            Annotation::Literal(values) => {
                Ok(json!({ "enum": values, "type": "string" }))
            }
            Annotation::List(item) => {
                let item_schema = self.annotation_schema(item)?;
                Ok(json!({ "items": item_schema, "type": "array" }))
            }
            Annotation::Tuple(elems) => {
                let prefix: Vec<Value> = elems
                    .iter()
                    .map(|e| self.annotation_schema(e))
                    .collect::<Result<_, _>>()?;
                Ok(json!({
                    "maxItems": elems.len(),
                    "minItems": elems.len(),
                    "prefixItems": prefix,
                    "type": "array",
                }))
            }
            Annotation::Union(branches) => {
                let schemas: Vec<Value> = branches
                    .iter()
                    .map(|b| self.annotation_schema(b))
                    .collect::<Result<_, _>>()?;
                Ok(flatten_anyof(schemas))
            }
            Annotation::Annotated {
                inner,
                discriminator: None,
            } => self.annotation_schema(inner),
            Annotation::Annotated {
                inner,
                discriminator: Some(field),
            } => self.tagged_union_schema(inner, field),
            Annotation::Reference(name) => {
                self.ensure_def(name)?;
                Ok(json!({ "$ref": format!("#/$defs/{name}") }))
            }
        }
    }

    fn tagged_union_schema(
        &mut self,
        inner: &Annotation,
        field: &str,
    ) -> Result<Value, ConfigError> {
        let members = match inner {
            Annotation::Union(branches) => branches.as_slice(),
            // single-member tagged unions collapse during parsing
            other => std::slice::from_ref(other),
        };
        let mut one_of = Vec::new();
        let mut mapping = Map::new();
        for member in members {
            let Annotation::Reference(name) = member else {
                return Err(ConfigError::UnresolvedReference {
                    name: member.to_string(),
                    context: " as tagged-union member".to_string(),
                });
            };
            self.ensure_def(name)?;
            let model = self.registry.model(name).ok_or_else(|| {
                ConfigError::UnresolvedReference {
                    name: name.clone(),
                    context: " as tagged-union member".to_string(),
                }
            })?;
            let value = model.discriminator_value(field).ok_or_else(|| {
                ConfigError::MissingDiscriminator {
                    model: name.clone(),
                    field: field.to_string(),
                }
            })?;
            let reference = format!("#/$defs/{name}");
            mapping.insert(value.to_string(), json!(reference));
            one_of.push(json!({ "$ref": reference }));
        }
        Ok(json!({
            "discriminator": {
                "mapping": mapping,
                "propertyName": field,
            },
            "oneOf": one_of,
        }))
    }

    /// Register the `$defs` entry for a named model or enum, once.
    fn ensure_def(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.defs.contains_key(name) {
            return Ok(());
        }
        if let Some(def) = self.registry.enum_def(name) {
            let description = match &def.doc {
                Some(doc) => docs::task_description(doc),
                None => format!("Missing description for {name}."),
            };
            self.defs.insert(
                name.to_string(),
                json!({
                    "description": description,
                    "enum": def.values,
                    "title": name,
                    "type": "string",
                }),
            );
            return Ok(());
        }

        let model = self.registry.model(name).cloned().ok_or_else(|| {
            ConfigError::UnresolvedReference {
                name: name.to_string(),
                context: String::new(),
            }
        })?;
        // claim the slot before recursing into field types
        self.defs.insert(name.to_string(), Value::Null);

        let attr_descriptions = docs::parse_arg_descriptions(model.doc.as_deref());
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &model.fields {
            let docstring = attr_descriptions.get(&field.name).map(String::as_str);
            properties.insert(field.name.clone(), self.build_property(field, docstring)?);
            if field.default.is_unset() && !field.annotation.is_optional_shaped() {
                required.push(field.name.clone());
            }
        }

        let description = match &model.doc {
            Some(doc) => docs::task_description(doc),
            None => MISSING_DESCRIPTION.to_string(),
        };
        let mut def = Map::new();
        def.insert("description".to_string(), json!(description));
        def.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            def.insert("required".to_string(), json!(required));
        }
        def.insert("title".to_string(), json!(name));
        def.insert("type".to_string(), json!("object"));
        self.defs.insert(name.to_string(), Value::Object(def));
        Ok(())
    }
}

/// Flatten a union's branch schemas the way the customized generator does:
/// drop the null branch (optionality is expressed via `required` instead),
/// and collapse a single survivor to itself.
fn flatten_anyof(mut schemas: Vec<Value>) -> Value {
    let null_schema = json!({ "type": "null" });
    if let Some(pos) = schemas.iter().position(|s| *s == null_schema) {
        warn!("dropping null branch while flattening anyOf");
        schemas.remove(pos);
    }
    match schemas.len() {
        0 => null_schema,
        1 => schemas.remove(0),
        _ => json!({ "anyOf": schemas }),
    }
}

/// Collapse `{"allOf": [{"$ref": ..}], ..siblings}` to a flat object with
/// the `$ref` first, a known artifact of referencing a type while attaching
/// extra schema metadata.
fn collapse_single_allof(prop: Value) -> Value {
    let Value::Object(mut obj) = prop else {
        return prop;
    };
    let collapsible = match obj.get("allOf").and_then(Value::as_array) {
        Some(items) if items.len() == 1 => items[0].is_object(),
        _ => false,
    };
    if !collapsible {
        return Value::Object(obj);
    }
    let Some(Value::Array(mut items)) = obj.remove("allOf") else {
        unreachable!("checked above");
    };
    let Value::Object(inner) = items.remove(0) else {
        unreachable!("checked above");
    };
    let mut out = Map::new();
    for (k, v) in inner {
        out.insert(k, v);
    }
    for (k, v) in obj {
        out.insert(k, v);
    }
    Value::Object(out)
}
