//! Task declarations and the package manifest.
//!
//! A task package declares its tasks in `<package>/dev/task_list.json`.
//! `create_manifest` turns those declarations into the on-disk manifest
//! (`__TASK_MANIFEST__.json`): per task and per execution phase it resolves
//! the declared interface, validates its signature, synthesizes the argument
//! schema, and fills in docs metadata. `check_manifest` regenerates the
//! manifest and deep-diffs it against the committed copy.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::annot::{ModelRegistry, TaskInterface};
use crate::diff::{deepdiff, DiffErrors};
use crate::docs;
use crate::error::ConfigError;
use crate::resolver::{InputModelRef, SourceResolver};
use crate::schema::create_schema_for_single_task;

pub const MANIFEST_VERSION: &str = "2";
pub const ARGS_SCHEMA_VERSION: &str = "pydantic_v2";
pub const MANIFEST_FILENAME: &str = "__TASK_MANIFEST__.json";
pub const TASK_LIST_FILENAME: &str = "task_list.json";

static PACKAGE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]*$").unwrap());

/// Lowercase the package name and fold `-` into `_`, after validating the
/// raw spelling.
pub fn normalize_package_name(raw: &str) -> Result<String, ConfigError> {
    if !PACKAGE_NAME_RE.is_match(raw) {
        return Err(ConfigError::InvalidPackageName {
            name: raw.to_string(),
        });
    }
    Ok(raw.to_lowercase().replace('-', "_"))
}

////////////////////////////////////////////////////////////////////////////
// TASK DECLARATIONS
////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    NonParallel,
    Parallel,
    Compound,
}

/// One entry of `task_list.json`.
///
/// For a compound task `executable` names the parallel phase and
/// `executable_init` the non-parallel one; the phase accessors below fold
/// the three kinds into a uniform non-parallel/parallel view.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawTaskDeclaration")]
pub struct TaskDeclaration {
    pub kind: TaskKind,
    pub name: String,
    executable: String,
    executable_init: Option<String>,
    meta: Option<Value>,
    meta_init: Option<Value>,
    pub input_types: Option<IndexMap<String, bool>>,
    pub output_types: Option<IndexMap<String, bool>>,
    pub category: Option<String>,
    pub modality: Option<String>,
    pub tags: Option<Vec<String>>,
    pub docs_info: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTaskDeclaration {
    #[serde(rename = "type")]
    kind: TaskKind,
    name: String,
    executable: String,
    #[serde(default)]
    executable_init: Option<String>,
    #[serde(default)]
    meta: Option<Value>,
    #[serde(default)]
    meta_init: Option<Value>,
    #[serde(default)]
    input_types: Option<IndexMap<String, bool>>,
    #[serde(default)]
    output_types: Option<IndexMap<String, bool>>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    modality: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    docs_info: Option<String>,
}

impl TryFrom<RawTaskDeclaration> for TaskDeclaration {
    type Error = String;

    fn try_from(raw: RawTaskDeclaration) -> Result<Self, String> {
        match raw.kind {
            TaskKind::Compound => {
                if raw.executable_init.is_none() {
                    return Err(format!(
                        "compound task '{}' is missing 'executable_init'",
                        raw.name
                    ));
                }
            }
            TaskKind::NonParallel | TaskKind::Parallel => {
                if raw.executable_init.is_some() || raw.meta_init.is_some() {
                    return Err(format!(
                        "task '{}' is not compound and cannot set \
                         'executable_init' or 'meta_init'",
                        raw.name
                    ));
                }
            }
        }
        Ok(TaskDeclaration {
            kind: raw.kind,
            name: raw.name,
            executable: raw.executable,
            executable_init: raw.executable_init,
            meta: raw.meta,
            meta_init: raw.meta_init,
            input_types: raw.input_types,
            output_types: raw.output_types,
            category: raw.category,
            modality: raw.modality,
            tags: raw.tags,
            docs_info: raw.docs_info,
        })
    }
}

impl TaskDeclaration {
    pub fn executable_non_parallel(&self) -> Option<&str> {
        match self.kind {
            TaskKind::NonParallel => Some(&self.executable),
            TaskKind::Compound => self.executable_init.as_deref(),
            TaskKind::Parallel => None,
        }
    }

    pub fn executable_parallel(&self) -> Option<&str> {
        match self.kind {
            TaskKind::Parallel | TaskKind::Compound => Some(&self.executable),
            TaskKind::NonParallel => None,
        }
    }

    pub fn meta_non_parallel(&self) -> Option<&Value> {
        match self.kind {
            TaskKind::NonParallel => self.meta.as_ref(),
            TaskKind::Compound => self.meta_init.as_ref(),
            TaskKind::Parallel => None,
        }
    }

    pub fn meta_parallel(&self) -> Option<&Value> {
        match self.kind {
            TaskKind::Parallel | TaskKind::Compound => self.meta.as_ref(),
            TaskKind::NonParallel => None,
        }
    }
}

/// The whole `dev/task_list.json` file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskListFile {
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub docs_link: Option<String>,
    #[serde(default)]
    pub input_models: Vec<InputModelRef>,
    pub task_list: Vec<TaskDeclaration>,
}

////////////////////////////////////////////////////////////////////////////
// MANIFEST
////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Manifest {
    pub manifest_version: String,
    pub has_args_schemas: bool,
    pub args_schema_version: String,
    pub task_list: Vec<ManifestTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ManifestTask {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_types: Option<IndexMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_types: Option<IndexMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_non_parallel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_parallel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_non_parallel: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_parallel: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args_schema_non_parallel: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args_schema_parallel: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_link: Option<String>,
}

impl ManifestTask {
    fn from_declaration(decl: &TaskDeclaration) -> Self {
        ManifestTask {
            name: decl.name.clone(),
            input_types: decl.input_types.clone(),
            output_types: decl.output_types.clone(),
            category: decl.category.clone(),
            modality: decl.modality.clone(),
            tags: decl.tags.clone(),
            executable_non_parallel: decl
                .executable_non_parallel()
                .map(String::from),
            executable_parallel: decl.executable_parallel().map(String::from),
            meta_non_parallel: decl.meta_non_parallel().cloned(),
            meta_parallel: decl.meta_parallel().cloned(),
            args_schema_non_parallel: None,
            args_schema_parallel: None,
            docs_info: None,
            docs_link: None,
        }
    }
}

/// Location of the on-disk manifest for a (normalized) package under
/// `package_root`.
pub fn manifest_path(
    package_root: &Path,
    raw_package_name: &str,
) -> Result<PathBuf, ConfigError> {
    let package = normalize_package_name(raw_package_name)?;
    let dir = package_root.join(&package);
    if !dir.is_dir() {
        return Err(ConfigError::PackageNotImportable { package, dir });
    }
    Ok(dir.join(MANIFEST_FILENAME))
}

fn read_task_list_file(path: &Path) -> Result<TaskListFile, ConfigError> {
    let body = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut de = serde_json::Deserializer::from_str(&body);
    serde_path_to_error::deserialize(&mut de).map_err(|err| {
        ConfigError::Declaration {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    })
}

/// Build the manifest for one task package from its `dev/task_list.json`.
pub fn create_manifest(
    package_root: &Path,
    raw_package_name: &str,
    manifest_version: &str,
    resolver: &mut dyn SourceResolver,
) -> Result<Manifest, ConfigError> {
    if manifest_version != MANIFEST_VERSION {
        return Err(ConfigError::UnsupportedManifestVersion {
            version: manifest_version.to_string(),
        });
    }
    let package = normalize_package_name(raw_package_name)?;
    let src_dir = package_root.join(&package);
    if !src_dir.is_dir() {
        return Err(ConfigError::PackageNotImportable {
            package,
            dir: src_dir,
        });
    }
    info!(package = %package, "start generating a new manifest");

    let task_list_dir = src_dir.join("dev");
    let declarations = read_task_list_file(&task_list_dir.join(TASK_LIST_FILENAME))?;
    if declarations.authors.is_none() {
        warn!("no `authors` found in task-list file");
    }
    if declarations.docs_link.is_none() {
        warn!("no `docs_link` found in task-list file");
    }
    if declarations.input_models.is_empty() {
        warn!("no `input_models` found in task-list file, using `[]`");
    }

    let mut registry = ModelRegistry::new();
    resolver.load_input_models(package_root, &declarations.input_models, &mut registry)?;

    let mut task_list = Vec::new();
    for decl in &declarations.task_list {
        let mut task = ManifestTask::from_declaration(decl);

        let non_parallel = resolve_phase_schema(
            decl.executable_non_parallel(),
            &src_dir,
            &package,
            &registry,
            resolver,
        )?;
        if let Some((_, schema)) = &non_parallel {
            task.args_schema_non_parallel = Some(schema.clone());
        }
        let parallel = resolve_phase_schema(
            decl.executable_parallel(),
            &src_dir,
            &package,
            &registry,
            resolver,
        )?;
        if let Some((_, schema)) = &parallel {
            task.args_schema_parallel = Some(schema.clone());
        }

        task.docs_info = match &decl.docs_info {
            None => docs::create_docs_info(
                non_parallel.as_ref().map(|(i, _)| i),
                parallel.as_ref().map(|(i, _)| i),
            ),
            Some(pointer) if pointer.starts_with("file:") => {
                Some(docs::read_docs_info_from_file(pointer, &task_list_dir)?)
            }
            Some(declared) => Some(declared.clone()),
        };
        task.docs_link = declarations.docs_link.clone();

        task_list.push(task);
    }

    Ok(Manifest {
        manifest_version: MANIFEST_VERSION.to_string(),
        has_args_schemas: true,
        args_schema_version: ARGS_SCHEMA_VERSION.to_string(),
        task_list,
        authors: declarations.authors,
    })
}

fn resolve_phase_schema(
    executable: Option<&str>,
    src_dir: &Path,
    package: &str,
    input_models: &ModelRegistry,
    resolver: &mut dyn SourceResolver,
) -> Result<Option<(TaskInterface, Value)>, ConfigError> {
    let Some(relative) = executable else {
        return Ok(None);
    };
    info!(executable = relative, "START");
    let interface = resolver.task_interface(&src_dir.join(relative))?;
    let mut registry = input_models.clone();
    registry.absorb_interface(&interface);
    let schema =
        create_schema_for_single_task(&interface, relative, Some(package), &registry)?;
    info!(executable = relative, "END (new schema)");
    Ok(Some((interface, schema)))
}

/// Serialize the manifest as pretty JSON with a trailing newline, next to
/// the package sources.
pub fn write_manifest_to_file(
    package_root: &Path,
    raw_package_name: &str,
    manifest: &Manifest,
) -> Result<PathBuf, ConfigError> {
    let path = manifest_path(package_root, raw_package_name)?;
    info!(path = %path.display(), "writing manifest");
    let mut body = serde_json::to_string_pretty(manifest).map_err(|err| {
        ConfigError::Io {
            path: path.clone(),
            source: std::io::Error::other(err),
        }
    })?;
    body.push('\n');
    fs::write(&path, body).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

pub fn read_manifest_from_file(
    package_root: &Path,
    raw_package_name: &str,
) -> Result<Value, ConfigError> {
    let path = manifest_path(package_root, raw_package_name)?;
    let body = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&body).map_err(|err| ConfigError::Declaration {
        path,
        message: err.to_string(),
    })
}

#[derive(Debug)]
pub enum ManifestCheck {
    UpToDate,
    Outdated {
        old: Value,
        new: Value,
        errors: DiffErrors,
    },
}

/// Compare a freshly generated manifest against the on-disk one. An
/// up-to-date manifest only logs; a divergent one carries both trees and
/// the accumulated differences back to the caller.
pub fn check_manifest(
    package_root: &Path,
    raw_package_name: &str,
    manifest: &Manifest,
    ignore_keys_order: bool,
) -> Result<ManifestCheck, ConfigError> {
    let old = read_manifest_from_file(package_root, raw_package_name)?;
    let new = serde_json::to_value(manifest).map_err(|err| ConfigError::Declaration {
        path: package_root.join(MANIFEST_FILENAME),
        message: err.to_string(),
    })?;
    if old == new {
        info!("on-disk manifest is up to date");
        return Ok(ManifestCheck::UpToDate);
    }
    let mut errors = DiffErrors::new();
    deepdiff(&old, &new, "manifest", ignore_keys_order, &mut errors)?;
    Ok(ManifestCheck::Outdated { old, new, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn package_names_are_normalized() {
        assert_eq!(normalize_package_name("My-Package").unwrap(), "my_package");
        assert_eq!(
            normalize_package_name("tasks_core").unwrap(),
            "tasks_core"
        );
        assert!(matches!(
            normalize_package_name("1bad").unwrap_err(),
            ConfigError::InvalidPackageName { .. }
        ));
        assert!(matches!(
            normalize_package_name("bad name").unwrap_err(),
            ConfigError::InvalidPackageName { .. }
        ));
        assert!(normalize_package_name("").is_err());
    }

    #[test]
    fn compound_declaration_splits_phases() {
        let decl: TaskDeclaration = serde_json::from_value(json!({
            "type": "compound",
            "name": "My Task",
            "executable": "compute.py",
            "executable_init": "init_compute.py",
            "meta": {"cpus": 4},
            "meta_init": {"cpus": 1},
        }))
        .unwrap();
        assert_eq!(decl.executable_non_parallel(), Some("init_compute.py"));
        assert_eq!(decl.executable_parallel(), Some("compute.py"));
        assert_eq!(decl.meta_non_parallel(), Some(&json!({"cpus": 1})));
        assert_eq!(decl.meta_parallel(), Some(&json!({"cpus": 4})));
    }

    #[test]
    fn parallel_declaration_has_no_init_phase() {
        let decl: TaskDeclaration = serde_json::from_value(json!({
            "type": "parallel",
            "name": "My Task",
            "executable": "compute.py",
            "meta": {"cpus": 4},
        }))
        .unwrap();
        assert_eq!(decl.executable_non_parallel(), None);
        assert_eq!(decl.executable_parallel(), Some("compute.py"));
        assert_eq!(decl.meta_non_parallel(), None);
        assert_eq!(decl.meta_parallel(), Some(&json!({"cpus": 4})));
    }

    #[test]
    fn non_parallel_declaration_has_no_parallel_phase() {
        let decl: TaskDeclaration = serde_json::from_value(json!({
            "type": "non-parallel",
            "name": "My Task",
            "executable": "prepare.py",
        }))
        .unwrap();
        assert_eq!(decl.executable_non_parallel(), Some("prepare.py"));
        assert_eq!(decl.executable_parallel(), None);
    }

    #[test]
    fn declarations_reject_malformed_input() {
        // unknown field
        assert!(serde_json::from_value::<TaskDeclaration>(json!({
            "type": "parallel",
            "name": "My Task",
            "executable": "compute.py",
            "executable_paralel": "typo.py",
        }))
        .is_err());
        // compound without executable_init
        assert!(serde_json::from_value::<TaskDeclaration>(json!({
            "type": "compound",
            "name": "My Task",
            "executable": "compute.py",
        }))
        .is_err());
        // init phase on a non-compound task
        assert!(serde_json::from_value::<TaskDeclaration>(json!({
            "type": "non-parallel",
            "name": "My Task",
            "executable": "prepare.py",
            "executable_init": "init.py",
        }))
        .is_err());
    }

    #[test]
    fn unset_metadata_is_not_serialized() {
        let manifest = Manifest {
            manifest_version: MANIFEST_VERSION.to_string(),
            has_args_schemas: true,
            args_schema_version: ARGS_SCHEMA_VERSION.to_string(),
            task_list: vec![ManifestTask {
                name: "My Task".to_string(),
                input_types: None,
                output_types: None,
                category: None,
                modality: None,
                tags: None,
                executable_non_parallel: Some("prepare.py".to_string()),
                executable_parallel: None,
                meta_non_parallel: None,
                meta_parallel: None,
                args_schema_non_parallel: None,
                args_schema_parallel: None,
                docs_info: None,
                docs_link: None,
            }],
            authors: None,
        };
        let rendered = serde_json::to_value(&manifest).unwrap();
        assert_eq!(
            rendered,
            json!({
                "manifest_version": "2",
                "has_args_schemas": true,
                "args_schema_version": "pydantic_v2",
                "task_list": [
                    {
                        "name": "My Task",
                        "executable_non_parallel": "prepare.py",
                    }
                ],
            })
        );
    }

    #[test]
    fn unsupported_manifest_version_is_rejected() {
        struct NoResolver;
        impl SourceResolver for NoResolver {
            fn task_interface(
                &mut self,
                _executable: &Path,
            ) -> Result<TaskInterface, ConfigError> {
                unreachable!("never resolved")
            }
            fn load_input_models(
                &mut self,
                _package_root: &Path,
                _refs: &[InputModelRef],
                _registry: &mut ModelRegistry,
            ) -> Result<(), ConfigError> {
                unreachable!("never resolved")
            }
        }
        assert!(matches!(
            create_manifest(Path::new("/tmp"), "my_package", "1", &mut NoResolver)
                .unwrap_err(),
            ConfigError::UnsupportedManifestVersion { .. }
        ));
    }
}
