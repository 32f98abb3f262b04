//! Resolved project model.
//!
//! These types describe a project *after* an external loader has resolved
//! the source project description: a flat list of modules, global and
//! per-module conditional flag bundles, install mappings, and the registry
//! source file list. The generator treats the model as immutable input.
//!
//! The loader interface is [`Project::from_path`], which accepts the model
//! serialised as JSON. Parsing the original project-description format is
//! explicitly someone else's job.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a serialised project model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model file could not be read.
    #[error("cannot read project model {path}")]
    Read {
        /// Path that was attempted.
        path: Utf8PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },
    /// The model file is not a valid serialised project.
    ///
    /// An unrecognised module type string surfaces here; generation never
    /// starts with a partially understood model.
    #[error("malformed project model: {source}")]
    Parse {
        /// Underlying deserialisation error.
        source: serde_json::Error,
    },
}

/// The closed set of module kinds the generator knows how to build.
///
/// Every variant maps to exactly one generation strategy in
/// [`crate::handlers`]. A type string outside this set fails model
/// deserialisation with [`ModelError::Parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleType {
    /// An ordinary user-mode executable.
    Program,
    /// A static archive linked into consumers.
    StaticLibrary,
    /// A shared library with its own build artefact.
    DynamicLibrary,
    /// A kernel-mode driver image.
    KernelModeDriver,
    /// A file-system driver image.
    FileSystemDriver,
    /// Reference-only object collection; consumers link the objects
    /// directly, so no standalone artefact is installed or built by `all`.
    ObjectLibrary,
    /// A raw boot-sector binary.
    BootSector,
    /// A CD image assembled from the output tree.
    Iso,
    /// A CD image assembled from the installed tree.
    LiveIso,
    /// A tool built early and invoked by other modules' rules.
    BuildTool,
    /// A regression-test executable.
    Test,
    /// Another module's artefact under a different install identity.
    Alias,
}

impl ModuleType {
    /// Whether modules of this type only contribute objects to consumers.
    #[must_use]
    pub const fn is_reference_objects(self) -> bool {
        matches!(self, Self::ObjectLibrary)
    }
}

/// A named property emitted as a plain make variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Variable name.
    pub name: String,
    /// Literal value.
    pub value: String,
}

/// A conditional block guarded by a property/value equality test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct If {
    /// Property the guard tests.
    pub property: String,
    /// Value the property must equal for the block to apply.
    pub value: String,
    /// Flags active under this guard; may itself contain nested guards.
    #[serde(default)]
    pub data: IfableData,
}

/// A bundle of compiler inputs, optionally nested under guard conditions.
///
/// Declaration order is preserved throughout emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfableData {
    /// Include directories, emitted as `-I` parameters.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Preprocessor defines, emitted as `-D` parameters.
    #[serde(default)]
    pub defines: Vec<String>,
    /// Raw compiler flags passed through verbatim.
    #[serde(default)]
    pub compiler_flags: Vec<String>,
    /// Plain make variables set at this scope.
    #[serde(default)]
    pub properties: Vec<Property>,
    /// Conditional sub-blocks, nestable to arbitrary depth.
    #[serde(default)]
    pub ifs: Vec<If>,
}

impl IfableData {
    /// Whether the bundle carries any includes or defines, here or in a
    /// nested conditional block.
    #[must_use]
    pub fn has_includes_or_defines(&self) -> bool {
        !self.includes.is_empty()
            || !self.defines.is_empty()
            || self.ifs.iter().any(|i| i.data.has_includes_or_defines())
    }

    /// Whether the bundle carries any raw compiler flags, here or nested.
    #[must_use]
    pub fn has_compiler_flags(&self) -> bool {
        !self.compiler_flags.is_empty() || self.ifs.iter().any(|i| i.data.has_compiler_flags())
    }
}

/// A fixed source/destination install mapping outside any module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFile {
    /// Source path, relative to the project root.
    pub source: Utf8PathBuf,
    /// Destination directory under the install root; empty means the
    /// install root itself.
    #[serde(default)]
    pub base: String,
    /// Destination file name.
    pub newname: String,
}

/// One build-tool invocation a module's rules depend on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Name of the build-tool module to invoke.
    pub tool: String,
    /// Arguments passed to the tool.
    #[serde(default)]
    pub args: Vec<String>,
    /// Files the invocation produces.
    pub outputs: Vec<Utf8PathBuf>,
}

fn default_enabled() -> bool {
    true
}

/// One buildable unit of the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Unique module name; also used for macro and phony-target names.
    pub name: String,
    /// Generation strategy selector.
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Disabled modules contribute nothing to the generated output.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Source directory relative to the project root.
    #[serde(default)]
    pub base: Utf8PathBuf,
    /// Source files relative to `base`.
    #[serde(default)]
    pub files: Vec<Utf8PathBuf>,
    /// Names of modules whose targets must exist before this one builds.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Install file name; `None` keeps the module out of the install set.
    #[serde(default)]
    pub install_name: Option<String>,
    /// Install directory under the install root; `None` installs at the
    /// install root itself.
    #[serde(default)]
    pub install_base: Option<String>,
    /// For [`ModuleType::Alias`], the name of the aliased module. Held as
    /// a name and resolved by lookup at generation time, never ownership.
    #[serde(default)]
    pub aliased_module: Option<String>,
    /// Module-scope conditional flags.
    #[serde(default)]
    pub non_if_data: IfableData,
    /// Build-tool invocations producing this module's generated files.
    #[serde(default)]
    pub invocations: Vec<Invocation>,
}

/// The complete resolved project model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project name, used in the generated header comment.
    pub name: String,
    /// Name of the original project-description file, named in the
    /// generated header so readers edit the right thing.
    #[serde(default)]
    pub file_name: String,
    /// All modules, enabled or not.
    #[serde(default)]
    pub modules: Vec<Module>,
    /// Project-wide conditional flags.
    #[serde(default)]
    pub non_if_data: IfableData,
    /// Project-wide linker flags.
    #[serde(default)]
    pub linker_flags: Vec<String>,
    /// Non-module install mappings.
    #[serde(default)]
    pub install_files: Vec<InstallFile>,
    /// Source files for the registry-hive install block.
    #[serde(default)]
    pub registry_source_files: Vec<String>,
}

impl Project {
    /// Load a serialised project model from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Read`] when the file cannot be read and
    /// [`ModelError::Parse`] when it is not a valid model, including when
    /// a module carries an unknown type string.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: Utf8PathBuf::from(path.display().to_string()),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Deserialise a project model from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Parse`] for malformed input.
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        serde_json::from_str(text).map_err(|source| ModelError::Parse { source })
    }

    /// Look up a module by name.
    #[must_use]
    pub fn locate_module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Iterate over the enabled modules in declaration order.
    pub fn enabled_modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter().filter(|m| m.enabled)
    }
}
