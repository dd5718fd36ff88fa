//! Configuration-error taxonomy.
//!
//! Every variant here is fatal: raised immediately, no recovery attempted.
//! Structural divergences found while diffing manifests are *not* errors in
//! this sense; they accumulate in `diff::DiffErrors` instead.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("function '{function}' has argument with forbidden name '{name}'")]
    ForbiddenParamName { function: String, name: String },

    #[error(
        "Only unions of two elements are supported, but parameter \
         '{param}' has type hint '{annotation}'."
    )]
    UnionTooManyBranches { param: String, annotation: String },

    #[error(
        "One union element must be None, but parameter \
         '{param}' has type hint '{annotation}'."
    )]
    UnionWithoutNone { param: String, annotation: String },

    #[error(
        "Non-None default not supported, but parameter \
         '{param}' has type hint '{annotation}' and default {default}."
    )]
    NonAbsentDefault {
        param: String,
        annotation: String,
        default: serde_json::Value,
    },

    #[error("cannot parse type annotation '{expr}': {reason}")]
    AnnotationParse { expr: String, reason: String },

    #[error("unresolved model or enum reference '{name}'{context}")]
    UnresolvedReference { name: String, context: String },

    #[error(
        "default factory '{factory}' cannot instantiate model '{model}': \
         field '{field}' has no default"
    )]
    FactoryMissingFieldDefault {
        factory: String,
        model: String,
        field: String,
    },

    #[error(
        "model '{model}' has no single-literal discriminator field '{field}'"
    )]
    MissingDiscriminator { model: String, field: String },

    #[error("executable path '{path}' must be absolute when no package is given")]
    ExecutableNotAbsolute { path: String },

    #[error(
        "executable path '{path}' must be relative to package '{package}', \
         not absolute"
    )]
    ExecutableNotInPackage { path: String, package: String },

    #[error("function '{function}' does not reside in file '{path}'")]
    FunctionNotInFile { function: String, path: String },

    #[error("invalid package name '{name}'")]
    InvalidPackageName { name: String },

    #[error("package '{package}' is not importable: missing directory {}", dir.display())]
    PackageNotImportable { package: String, dir: PathBuf },

    #[error("Reached MAX_RECURSION_LEVEL={max}. Exit.")]
    MaxRecursionLevel { max: usize },

    #[error("reached maximum model-recursion depth {max} (cyclic model reference?)")]
    MaxModelRecursion { max: usize },

    #[error("manifest_version='{version}' is not supported")]
    UnsupportedManifestVersion { version: String },

    #[error("I/O error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Declaration { path: PathBuf, message: String },
}
