//! Loading task interfaces from declaration files.
//!
//! Each task executable `<dir>/<name>.py` ships a sibling declaration file
//! `<dir>/<name>.args.json` describing the task function's parameters and
//! any models or enums its annotations reference. The `SourceResolver`
//! trait is the seam between manifest generation and the filesystem; tests
//! substitute an in-memory implementation.
//!
//! Declaration format, by example:
//!
//! ```json
//! {
//!   "function": "thresholding_task",
//!   "doc": "Short description\n\nArgs:\n    zarr_url: Path to the image.",
//!   "params": [
//!     {"name": "zarr_url", "type": "str"},
//!     {"name": "threshold", "type": "int", "default": 128},
//!     {"name": "model", "type": "InitArgs", "default_factory": "InitArgs"}
//!   ],
//!   "models": [
//!     {"name": "InitArgs", "fields": [{"name": "x", "type": "int", "default": 1}]}
//!   ],
//!   "enums": []
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::annot::{
    DefaultSpec, EnumDef, ModelDef, ModelRegistry, Param, TaskInterface,
};
use crate::error::ConfigError;
use crate::parse::parse_annotation;

/// A model or enum defined outside the task package, pulled into scope for
/// every task of the package.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputModelRef {
    pub package: String,
    /// Declaration-file path, relative to the package root.
    pub path: String,
    pub model: String,
}

pub trait SourceResolver {
    /// Resolve the interface declared next to `executable`.
    fn task_interface(&mut self, executable: &Path)
        -> Result<TaskInterface, ConfigError>;

    /// Register the named external models and enums with `registry`.
    fn load_input_models(
        &mut self,
        package_root: &Path,
        refs: &[InputModelRef],
        registry: &mut ModelRegistry,
    ) -> Result<(), ConfigError>;
}

////////////////////////////////////////////////////////////////////////////
// RAW DECLARATION SHAPES
////////////////////////////////////////////////////////////////////////////

// Distinguishes an absent `default` from an explicit `"default": null`.
fn explicit_default<'de, D>(de: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(de).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParam {
    name: String,
    #[serde(rename = "type")]
    annotation: String,
    #[serde(default, deserialize_with = "explicit_default")]
    default: Option<Value>,
    #[serde(default)]
    default_factory: Option<String>,
    #[serde(default)]
    default_factory_takes_data: bool,
    #[serde(default)]
    description: Option<String>,
}

impl RawParam {
    fn into_param(self, path: &Path) -> Result<Param, ConfigError> {
        let default = match (self.default, self.default_factory) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Declaration {
                    path: path.to_path_buf(),
                    message: format!(
                        "parameter '{}' sets both 'default' and 'default_factory'",
                        self.name
                    ),
                });
            }
            (None, Some(factory)) if self.default_factory_takes_data => {
                DefaultSpec::FactoryTakesData(factory)
            }
            (None, Some(factory)) => DefaultSpec::Factory(factory),
            (Some(value), None) => DefaultSpec::Value(value),
            (None, None) => DefaultSpec::Unset,
        };
        Ok(Param {
            name: self.name,
            annotation: parse_annotation(&self.annotation)?,
            default,
            description: self.description,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModel {
    name: String,
    #[serde(default)]
    doc: Option<String>,
    fields: Vec<RawParam>,
}

impl RawModel {
    fn into_model(self, path: &Path) -> Result<ModelDef, ConfigError> {
        Ok(ModelDef {
            name: self.name,
            doc: self.doc,
            fields: self
                .fields
                .into_iter()
                .map(|field| field.into_param(path))
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnum {
    name: String,
    #[serde(default)]
    doc: Option<String>,
    values: Vec<String>,
}

impl From<RawEnum> for EnumDef {
    fn from(raw: RawEnum) -> Self {
        EnumDef {
            name: raw.name,
            doc: raw.doc,
            values: raw.values,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInterface {
    function: String,
    #[serde(default)]
    doc: Option<String>,
    #[serde(default)]
    params: Vec<RawParam>,
    #[serde(default)]
    models: Vec<RawModel>,
    #[serde(default)]
    enums: Vec<RawEnum>,
}

/// Standalone model/enum declaration file, referenced by `input_models`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModelFile {
    #[serde(default)]
    models: Vec<RawModel>,
    #[serde(default)]
    enums: Vec<RawEnum>,
}

fn read_declaration<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
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

////////////////////////////////////////////////////////////////////////////
// FILE RESOLVER
////////////////////////////////////////////////////////////////////////////

/// Filesystem-backed resolver with a per-path interface cache; compound
/// tasks that reuse an executable load its declaration once.
#[derive(Debug, Default)]
pub struct FileResolver {
    interfaces: HashMap<PathBuf, TaskInterface>,
}

impl FileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn interface_path(executable: &Path) -> PathBuf {
        executable.with_extension("args.json")
    }
}

impl SourceResolver for FileResolver {
    fn task_interface(
        &mut self,
        executable: &Path,
    ) -> Result<TaskInterface, ConfigError> {
        let path = Self::interface_path(executable);
        if let Some(interface) = self.interfaces.get(&path) {
            return Ok(interface.clone());
        }
        debug!(path = %path.display(), "loading task interface");
        let raw: RawInterface = read_declaration(&path)?;
        let mut interface = TaskInterface {
            function: raw.function,
            doc: raw.doc,
            params: raw
                .params
                .into_iter()
                .map(|param| param.into_param(&path))
                .collect::<Result<_, _>>()?,
            models: Default::default(),
            enums: Default::default(),
        };
        for model in raw.models {
            let model = model.into_model(&path)?;
            interface.models.insert(model.name.clone(), model);
        }
        for raw_enum in raw.enums {
            let def = EnumDef::from(raw_enum);
            interface.enums.insert(def.name.clone(), def);
        }
        self.interfaces.insert(path, interface.clone());
        Ok(interface)
    }

    fn load_input_models(
        &mut self,
        package_root: &Path,
        refs: &[InputModelRef],
        registry: &mut ModelRegistry,
    ) -> Result<(), ConfigError> {
        for input in refs {
            let path = package_root.join(&input.path);
            debug!(
                package = %input.package,
                model = %input.model,
                path = %path.display(),
                "loading input model"
            );
            let raw: RawModelFile = read_declaration(&path)?;
            let mut found = false;
            for model in raw.models {
                if model.name == input.model {
                    registry.insert_model(model.into_model(&path)?);
                    found = true;
                    break;
                }
            }
            if !found {
                if let Some(raw_enum) = raw
                    .enums
                    .into_iter()
                    .find(|raw_enum| raw_enum.name == input.model)
                {
                    registry.insert_enum(raw_enum.into());
                    found = true;
                }
            }
            if !found {
                return Err(ConfigError::UnresolvedReference {
                    name: input.model.clone(),
                    context: format!(
                        " in declaration file '{}'",
                        path.display()
                    ),
                });
            }
        }
        Ok(())
    }
}
