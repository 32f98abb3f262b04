//! Directory hierarchy synthesis.
//!
//! Every output, intermediate, and install path a module references is
//! unioned into one [`Directory`] tree per root before rule emission
//! begins. The tree then serves two purposes: creating the physical
//! directories ahead of the build, and emitting directory-creation rules
//! whose order-only edges let make parallelise safely.
//!
//! Rule emission is strictly parent-first. Make resolves prerequisite
//! rules by first occurrence in the file, so emitting a child before its
//! parent would be a correctness defect, not a style issue.

use crate::emitter::{BuildRule, MakefileEmitter};
use camino::Utf8PathBuf;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Placeholder for the intermediate-artefact root in logical paths.
pub const INTERMEDIATE_MARKER: &str = "$(INTERMEDIATE)";
/// Placeholder for the build-output root in logical paths.
pub const OUTPUT_MARKER: &str = "$(OUTPUT)";
/// Placeholder for the install root in logical paths.
pub const INSTALL_MARKER: &str = "$(INSTALL)";

/// Errors raised while building or materialising the directory tree.
#[derive(Debug, Error)]
pub enum DirTreeError {
    /// The inserted path still contains a variable reference and cannot be
    /// resolved to a literal filesystem location.
    #[error("variable references are not allowed in directory paths: {path}")]
    VariableInPath {
        /// The offending path.
        path: String,
    },
    /// A directory could not be created. Already-existing directories are
    /// not an error; anything else (permissions, a file in the way) is.
    #[error("cannot create directory {path}")]
    CreateDir {
        /// The path that failed.
        path: String,
        /// Underlying io error.
        source: io::Error,
    },
}

/// Configured root paths substituted for the placeholder markers.
#[derive(Debug, Clone)]
pub struct RootPaths {
    /// Intermediate-artefact root, e.g. `obj`.
    pub intermediate: Utf8PathBuf,
    /// Build-output root, e.g. `out`.
    pub output: Utf8PathBuf,
    /// Install root, e.g. `dist`.
    pub install: Utf8PathBuf,
}

impl RootPaths {
    /// Substitute known placeholders in `path` by literal first-match
    /// replacement.
    #[must_use]
    pub fn resolve(&self, path: &str) -> String {
        let s = path.replacen(INTERMEDIATE_MARKER, self.intermediate.as_str(), 1);
        let s = s.replacen(OUTPUT_MARKER, self.output.as_str(), 1);
        s.replacen(INSTALL_MARKER, self.install.as_str(), 1)
    }
}

/// One node of the directory hierarchy.
///
/// Children are exclusively owned and kept ordered by name, which makes
/// traversal (and therefore emitted rule order) deterministic.
#[derive(Debug)]
pub struct Directory {
    name: String,
    children: BTreeMap<String, Directory>,
}

impl Directory {
    /// Create a node named `name`. Root nodes are conventionally named
    /// after a placeholder marker such as [`INTERMEDIATE_MARKER`].
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: BTreeMap::new(),
        }
    }

    /// The node's own name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of direct children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Insert a slash-delimited relative path below this node.
    ///
    /// Insertion is idempotent: segments already present are reused.
    ///
    /// # Errors
    ///
    /// Returns [`DirTreeError::VariableInPath`] without mutating the tree
    /// when `path` contains a `$` variable marker; such paths cannot be
    /// resolved to a literal location at tree-build time.
    pub fn add(&mut self, path: &str) -> Result<(), DirTreeError> {
        if path.contains('$') {
            return Err(DirTreeError::VariableInPath { path: path.into() });
        }
        self.insert(path);
        Ok(())
    }

    fn insert(&mut self, path: &str) {
        let (head, rest) = match path.find(['/', '\\']) {
            Some(i) => (&path[..i], &path[i + 1..]),
            None => (path, ""),
        };
        if head.is_empty() {
            // Tolerate doubled or leading separators.
            if !rest.is_empty() {
                self.insert(rest);
            }
            return;
        }
        let child = self
            .children
            .entry(head.to_owned())
            .or_insert_with(|| Self::new(head));
        if !rest.is_empty() {
            child.insert(rest);
        }
    }

    /// Create this subtree's physical directories, depth-first, parent
    /// before children. Existing directories are left alone; when
    /// `verbose`, each newly created path is reported.
    ///
    /// The root is created even when it has no children: install rules
    /// use the bare root as an order-only prerequisite, so it must exist
    /// before make runs.
    ///
    /// # Errors
    ///
    /// Returns [`DirTreeError::CreateDir`] for any filesystem failure
    /// other than the directory already existing.
    pub fn generate_tree(
        &self,
        parent: &str,
        roots: &RootPaths,
        verbose: bool,
    ) -> Result<(), DirTreeError> {
        let path = if parent.is_empty() {
            let resolved = roots.resolve(&self.name);
            if create_directory(&resolved)? && verbose {
                info!(path = %resolved, "created directory");
            }
            self.name.clone()
        } else {
            let path = format!("{parent}/{}", self.name);
            let resolved = roots.resolve(&path);
            if create_directory(&resolved)? && verbose {
                info!(path = %resolved, "created directory");
            }
            path
        };
        for child in self.children.values() {
            child.generate_tree(&path, roots, verbose)?;
        }
        Ok(())
    }

    /// Emit one rule per node: the node's path order-only-depends on its
    /// parent's path, with a `${mkdir}` recipe. Parents emit strictly
    /// before any rule referencing them as a prerequisite.
    pub fn create_rule(&self, emitter: &mut MakefileEmitter, parent: &str) {
        let path = if parent.is_empty() {
            self.name.clone()
        } else {
            emitter.rule(&BuildRule {
                target: format!("{}/{}", escape_spaces(parent), escape_spaces(&self.name)),
                order_only: vec![escape_spaces(parent)],
                recipe: vec!["$(ECHO_MKDIR)".into(), "${mkdir} $@".into()],
                ..BuildRule::default()
            });
            format!("{parent}/{}", self.name)
        };
        for child in self.children.values() {
            child.create_rule(emitter, &path);
        }
    }
}

/// Escape spaces in a path for use in rule text.
#[must_use]
pub fn escape_spaces(path: &str) -> String {
    path.replace(' ', "\\ ")
}

/// Create `path` and any missing ancestors one component at a time,
/// returning whether the final component was newly created.
fn create_directory(path: &str) -> Result<bool, DirTreeError> {
    let mut prefix = PathBuf::new();
    let mut created = false;
    for component in Path::new(path).components() {
        prefix.push(component);
        created = mkdir_once(&prefix)?;
    }
    Ok(created)
}

fn mkdir_once(path: &Path) -> Result<bool, DirTreeError> {
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(source) => Err(DirTreeError::CreateDir {
            path: path.display().to_string(),
            source,
        }),
    }
}
