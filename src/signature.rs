//! Signature validation for task interfaces.
//!
//! Gatekeeping pass over a task's declared parameters (and, recursively, the
//! fields of any referenced model): reject annotation shapes the schema
//! synthesizer cannot faithfully represent, before any schema work begins.
//! Never mutates anything; must run to completion before synthesis.

use tracing::debug;

use crate::annot::{
    Annotation, ModelRegistry, Param, TaskInterface, MAX_MODEL_RECURSION,
};
use crate::error::ConfigError;

/// Parameter names that collide with the argument-validation machinery of
/// the runtime engine (variadic catch-alls plus its internal sentinels).
pub const FORBIDDEN_PARAM_NAMES: [&str; 6] = [
    "args",
    "kwargs",
    "v__positional_only",
    "v__duplicate_kwargs",
    "v__args",
    "v__kwargs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionCase {
    NonUnion,
    PlainUnion,
    TaggedAnnotatedUnion,
    NonTaggedAnnotatedUnion,
}

/// Classify a parameter annotation for validation purposes. The tagged case
/// requires a discriminator plus members that all resolve to structured
/// models in `registry`.
pub fn classify_union(
    annotation: &Annotation,
    registry: &ModelRegistry,
) -> UnionCase {
    match annotation {
        Annotation::Union(_) => UnionCase::PlainUnion,
        Annotation::Annotated {
            inner,
            discriminator,
        } => match inner.as_ref() {
            Annotation::Union(branches) => {
                let all_models = branches.iter().all(|b| match b {
                    Annotation::Reference(name) => registry.model(name).is_some(),
                    _ => false,
                });
                if discriminator.is_some() && all_models {
                    UnionCase::TaggedAnnotatedUnion
                } else {
                    UnionCase::NonTaggedAnnotatedUnion
                }
            }
            _ => UnionCase::NonUnion,
        },
        _ => UnionCase::NonUnion,
    }
}

/// Check the supported plain-union shape: exactly two branches, one of them
/// absent, and a default that resolves to absent (unwrapping factories that
/// do not take validated data).
fn validate_plain_union(
    param: &Param,
    branches: &[Annotation],
    registry: &ModelRegistry,
) -> Result<(), ConfigError> {
    if branches.len() != 2 {
        return Err(ConfigError::UnionTooManyBranches {
            param: param.name.clone(),
            annotation: param.annotation.to_string(),
        });
    }
    if !branches.contains(&Annotation::NoneType) {
        return Err(ConfigError::UnionWithoutNone {
            param: param.name.clone(),
            annotation: param.annotation.to_string(),
        });
    }
    if let Some(default) = param.default.resolve(registry)? {
        if !default.is_null() {
            return Err(ConfigError::NonAbsentDefault {
                param: param.name.clone(),
                annotation: param.annotation.to_string(),
                default,
            });
        }
    }
    Ok(())
}

fn validate_params(
    function: &str,
    params: &[Param],
    registry: &ModelRegistry,
    depth: usize,
) -> Result<(), ConfigError> {
    if depth > MAX_MODEL_RECURSION {
        return Err(ConfigError::MaxModelRecursion {
            max: MAX_MODEL_RECURSION,
        });
    }

    for param in params {
        if FORBIDDEN_PARAM_NAMES.contains(&param.name.as_str()) {
            return Err(ConfigError::ForbiddenParamName {
                function: function.to_string(),
                name: param.name.clone(),
            });
        }

        match classify_union(&param.annotation, registry) {
            UnionCase::PlainUnion | UnionCase::NonTaggedAnnotatedUnion => {
                // union_branches is always Some for these two cases
                let branches = param.annotation.union_branches().unwrap_or(&[]);
                validate_plain_union(param, branches, registry)?;
            }
            // Internal consistency of tagged unions (unique discriminator
            // values) is guaranteed upstream by the model declarations.
            UnionCase::TaggedAnnotatedUnion => {}
            UnionCase::NonUnion => {}
        }

        // Recurse into referenced models with the same rules.
        let mut refs = Vec::new();
        param.annotation.references(&mut refs);
        for name in refs {
            if let Some(model) = registry.model(name) {
                validate_params(function, &model.fields, registry, depth + 1)?;
            } else if registry.enum_def(name).is_none() {
                return Err(ConfigError::UnresolvedReference {
                    name: name.to_string(),
                    context: format!(
                        " in parameter '{}' of function '{function}'",
                        param.name
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Validate every parameter of a task interface. Purely advisory: returns
/// `Ok(())` or the first configuration error found.
pub fn validate_task_interface(
    interface: &TaskInterface,
    registry: &ModelRegistry,
) -> Result<(), ConfigError> {
    validate_params(&interface.function, &interface.params, registry, 0)?;
    debug!(function = %interface.function, "signature validation passed");
    Ok(())
}
