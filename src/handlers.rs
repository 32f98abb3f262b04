//! Per-module rule generation strategies.
//!
//! Each enabled module maps to exactly one [`ModuleHandler`] keyed by its
//! [`ModuleType`]. Generation is two-phase across all modules: first every
//! module's object and target macros, then every module's rule blocks.
//! Later rules may reference any module's target macro regardless of
//! declaration order, so all macros must precede all rules.

use crate::dirtree::{INSTALL_MARKER, INTERMEDIATE_MARKER, OUTPUT_MARKER};
use crate::emitter::{BuildRule, MakefileEmitter, WRAP_AT, wrap_join};
use crate::model::{IfableData, Module, ModuleType, Project};
use camino::Utf8Path;
use itertools::Itertools;
use thiserror::Error;

/// Errors raised while generating module rules.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An alias module references a module that does not exist.
    #[error("module '{module}' aliases unknown module '{alias}'")]
    DanglingAlias {
        /// The alias module.
        module: String,
        /// The missing referent.
        alias: String,
    },
    /// An invocation names a build tool that does not exist.
    #[error("module '{module}' invokes unknown build tool '{tool}'")]
    UnknownInvocationTool {
        /// The invoking module.
        module: String,
        /// The missing tool module.
        tool: String,
    },
}

/// Prefix a project-relative path with the intermediate-root marker.
#[must_use]
pub fn intermediate_path(path: &str) -> String {
    join_marker(INTERMEDIATE_MARKER, path)
}

/// Prefix a project-relative path with the output-root marker.
#[must_use]
pub fn output_path(path: &str) -> String {
    join_marker(OUTPUT_MARKER, path)
}

/// Prefix a project-relative path with the install-root marker.
#[must_use]
pub fn install_path(path: &str) -> String {
    join_marker(INSTALL_MARKER, path)
}

fn join_marker(marker: &str, path: &str) -> String {
    if path.is_empty() {
        marker.to_owned()
    } else {
        format!("{marker}/{path}")
    }
}

/// The generation strategy for one module.
#[derive(Debug)]
pub struct ModuleHandler<'a> {
    /// The module this handler generates rules for.
    pub module: &'a Module,
}

impl<'a> ModuleHandler<'a> {
    /// Select the handler for `module`. The type set is closed, so every
    /// module maps to a strategy; unknown type strings have already been
    /// rejected at model deserialisation.
    #[must_use]
    pub fn for_module(module: &'a Module) -> Self {
        Self { module }
    }

    /// Name of the module's object-list macro, `<name>_OBJS`.
    #[must_use]
    pub fn object_macro(&self) -> String {
        format!("{}_OBJS", self.module.name)
    }

    /// Name of the module's target macro, `<name>_TARGET`.
    #[must_use]
    pub fn target_macro(&self) -> String {
        format!("{}_TARGET", self.module.name)
    }

    /// Whether this module participates in the `all` aggregate target.
    /// Reference-only modules, boot sectors, images, tests, and aliases
    /// are excluded by policy.
    #[must_use]
    pub fn include_in_all(&self) -> bool {
        !(self.module.module_type.is_reference_objects()
            || matches!(
                self.module.module_type,
                ModuleType::BootSector
                    | ModuleType::Iso
                    | ModuleType::LiveIso
                    | ModuleType::Test
                    | ModuleType::Alias
            ))
    }

    /// Whether this module compiles sources into intermediate objects.
    #[must_use]
    pub fn uses_objects(&self) -> bool {
        !matches!(
            self.module.module_type,
            ModuleType::BootSector | ModuleType::Iso | ModuleType::LiveIso | ModuleType::Alias
        )
    }

    /// Logical path of the module's build artefact.
    #[must_use]
    pub fn target_file(&self) -> String {
        let artefact = match self.module.module_type {
            ModuleType::StaticLibrary | ModuleType::ObjectLibrary => {
                format!("lib{}.a", self.module.name)
            }
            ModuleType::DynamicLibrary => format!("{}.dll", self.module.name),
            ModuleType::KernelModeDriver | ModuleType::FileSystemDriver => {
                format!("{}.sys", self.module.name)
            }
            ModuleType::BootSector => format!("{}.bin", self.module.name),
            ModuleType::Iso | ModuleType::LiveIso => format!("{}.iso", self.module.name),
            ModuleType::Program
            | ModuleType::BuildTool
            | ModuleType::Test
            | ModuleType::Alias => self.module.name.clone(),
        };
        // Images land at the output root; everything else under the
        // module's own directory.
        let base = match self.module.module_type {
            ModuleType::Iso | ModuleType::LiveIso => "",
            _ => self.module.base.as_str(),
        };
        output_path(&join_relative(base, &artefact))
    }

    /// Logical directory containing the build artefact, used as an
    /// order-only prerequisite.
    #[must_use]
    pub fn target_directory(&self) -> String {
        match self.module.module_type {
            ModuleType::Iso | ModuleType::LiveIso => output_path(""),
            _ => output_path(self.module.base.as_str()),
        }
    }

    /// The build-order dependency path contributed to the `INIT` macro by
    /// build tools.
    #[must_use]
    pub fn dependency_path(&self) -> String {
        self.target_file()
    }

    /// Logical paths of the module's object files. A source file's
    /// relative directory is preserved, so two sources sharing a stem in
    /// different subdirectories map to distinct objects.
    #[must_use]
    pub fn object_files(&self) -> Vec<String> {
        if !self.uses_objects() {
            return Vec::new();
        }
        self.module
            .files
            .iter()
            .map(|f| self.object_for(f))
            .collect()
    }

    fn object_for(&self, source: &Utf8Path) -> String {
        let relative = join_relative(
            self.module.base.as_str(),
            source.with_extension("o").as_str(),
        );
        intermediate_path(&relative)
    }

    /// Directories the module's objects land in, relative to the
    /// intermediate root.
    #[must_use]
    pub fn object_directories(&self) -> Vec<String> {
        if !self.uses_objects() {
            return Vec::new();
        }
        self.module
            .files
            .iter()
            .filter_map(|f| f.parent())
            .filter(|p| !p.as_str().is_empty())
            .map(|p| join_relative(self.module.base.as_str(), p.as_str()))
            .unique()
            .collect()
    }

    /// Phase 1: emit the `<name>_OBJS` macro.
    pub fn generate_object_macro(&self, e: &mut MakefileEmitter) {
        let objects = self.object_files();
        if !objects.is_empty() {
            e.assign(&self.object_macro(), "=", &wrap_join(&objects, WRAP_AT));
        }
    }

    /// Phase 1: emit the `<name>_TARGET` macro.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::DanglingAlias`] when an alias module's
    /// referent cannot be located.
    pub fn generate_target_macro(
        &self,
        e: &mut MakefileEmitter,
        project: &Project,
    ) -> Result<(), HandlerError> {
        let value = match self.module.module_type {
            ModuleType::Alias => {
                let aliased = self.resolve_alias(project)?;
                format!("$({}_TARGET)", aliased.name)
            }
            ModuleType::ObjectLibrary => format!("$({})", self.object_macro()),
            _ => self.target_file(),
        };
        e.assign(&self.target_macro(), "=", &value);
        Ok(())
    }

    /// Emit the module-scope `<name>_CFLAGS` macro, with nested guard
    /// blocks appending under their conditions.
    pub fn generate_other_macros(&self, e: &mut MakefileEmitter) {
        let data = &self.module.non_if_data;
        if data.has_includes_or_defines() || data.has_compiler_flags() {
            emit_cflags_macro(e, &format!("{}_CFLAGS", self.module.name), "=", data);
        }
    }

    /// Phase 2: emit the `<name>_precondition` phony tying the module to
    /// the `INIT` tools and its declared dependencies.
    pub fn generate_precondition(&self, e: &mut MakefileEmitter) {
        let mut prerequisites = vec!["$(INIT)".to_owned()];
        prerequisites.extend(
            self.module
                .dependencies
                .iter()
                .map(|d| format!("$({d}_TARGET)")),
        );
        e.rule(&BuildRule {
            target: format!("{}_precondition", self.module.name),
            prerequisites,
            phony: true,
            ..BuildRule::default()
        });
        e.blank();
    }

    /// Phase 2: emit the module's compile and link rules plus a phony
    /// convenience target named after the module.
    pub fn generate_build_rule(&self, e: &mut MakefileEmitter) {
        self.generate_compile_rules(e);
        match self.module.module_type {
            ModuleType::Program | ModuleType::BuildTool | ModuleType::Test => {
                self.link_rule(e, &["$(ECHO_LD)", "$(Q)${gcc} $^ -o $@ $(PROJECT_LFLAGS)"]);
            }
            ModuleType::StaticLibrary => {
                self.link_rule(e, &["$(ECHO_AR)", "$(Q)${ar} -rc $@ $^"]);
            }
            ModuleType::DynamicLibrary => {
                self.link_rule(
                    e,
                    &["$(ECHO_LD)", "$(Q)${gcc} -shared $^ -o $@ $(PROJECT_LFLAGS)"],
                );
            }
            ModuleType::KernelModeDriver | ModuleType::FileSystemDriver => {
                self.link_rule(
                    e,
                    &[
                        "$(ECHO_LD)",
                        "$(Q)${gcc} -nostartfiles -nostdlib $^ -o $@ $(PROJECT_LFLAGS)",
                    ],
                );
            }
            ModuleType::ObjectLibrary => {
                // Reference-only: consumers link the objects directly.
            }
            ModuleType::BootSector => self.bootsector_rule(e),
            ModuleType::Iso => self.iso_rule(e, "all", OUTPUT_MARKER),
            ModuleType::LiveIso => self.iso_rule(e, "install", INSTALL_MARKER),
            ModuleType::Alias => {}
        }
        e.rule(&BuildRule {
            target: self.module.name.clone(),
            prerequisites: vec![format!("$({})", self.target_macro())],
            phony: true,
            ..BuildRule::default()
        });
        e.blank();
    }

    fn generate_compile_rules(&self, e: &mut MakefileEmitter) {
        if !self.uses_objects() {
            return;
        }
        let module_cflags = if self.module.non_if_data.has_includes_or_defines()
            || self.module.non_if_data.has_compiler_flags()
        {
            format!(" $({}_CFLAGS)", self.module.name)
        } else {
            String::new()
        };
        for source in &self.module.files {
            let source_path = join_relative(self.module.base.as_str(), source.as_str());
            let object = self.object_for(source);
            // The object's own directory, so subdirectory objects do not
            // race ahead of their mkdir rule.
            let directory = match object.rsplit_once('/') {
                Some((dir, _)) => dir.to_owned(),
                None => INTERMEDIATE_MARKER.to_owned(),
            };
            let recipe = match source.extension() {
                Some("s" | "S" | "asm") => {
                    vec!["$(ECHO_NASM)".to_owned(), "$(Q)${nasm} -f elf -o $@ $<".to_owned()]
                }
                _ => vec![
                    "$(ECHO_CC)".to_owned(),
                    format!("$(Q)${{gcc}} -c $< -o $@ $(PROJECT_CFLAGS){module_cflags}"),
                ],
            };
            e.rule(&BuildRule {
                target: object,
                prerequisites: vec![source_path],
                order_only: vec![directory],
                recipe,
                ..BuildRule::default()
            });
        }
    }

    fn link_rule(&self, e: &mut MakefileEmitter, recipe: &[&str]) {
        e.rule(&BuildRule {
            target: format!("$({})", self.target_macro()),
            prerequisites: vec![format!("$({})", self.object_macro())],
            order_only: vec![
                self.target_directory(),
                format!("{}_precondition", self.module.name),
            ],
            recipe: recipe.iter().map(|&l| l.to_owned()).collect(),
            ..BuildRule::default()
        });
    }

    fn bootsector_rule(&self, e: &mut MakefileEmitter) {
        let sources = self
            .module
            .files
            .iter()
            .map(|f| join_relative(self.module.base.as_str(), f.as_str()))
            .collect();
        e.rule(&BuildRule {
            target: format!("$({})", self.target_macro()),
            prerequisites: sources,
            order_only: vec![self.target_directory()],
            recipe: vec!["$(ECHO_NASM)".into(), "$(Q)${nasm} -f bin -o $@ $<".into()],
            ..BuildRule::default()
        });
    }

    fn iso_rule(&self, e: &mut MakefileEmitter, prerequisite: &str, tree: &str) {
        e.rule(&BuildRule {
            target: format!("$({})", self.target_macro()),
            prerequisites: vec![prerequisite.to_owned()],
            order_only: vec![self.target_directory()],
            recipe: vec![
                "$(ECHO_CDMAKE)".into(),
                format!("$(Q)${{mkisofs}} -quiet -o $@ {tree}"),
            ],
            ..BuildRule::default()
        });
    }

    /// Phase 2: emit one rule per build-tool invocation producing this
    /// module's generated files.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::UnknownInvocationTool`] when the named tool
    /// module does not exist.
    pub fn generate_invocations(
        &self,
        e: &mut MakefileEmitter,
        project: &Project,
    ) -> Result<(), HandlerError> {
        for invocation in &self.module.invocations {
            if project.locate_module(&invocation.tool).is_none() {
                return Err(HandlerError::UnknownInvocationTool {
                    module: self.module.name.clone(),
                    tool: invocation.tool.clone(),
                });
            }
            let outputs = invocation
                .outputs
                .iter()
                .map(|o| intermediate_path(&join_relative(self.module.base.as_str(), o.as_str())))
                .join(" ");
            let args = invocation.args.iter().join(" ");
            e.rule(&BuildRule {
                target: outputs,
                prerequisites: vec![format!("$({}_TARGET)", invocation.tool)],
                order_only: vec![intermediate_path(self.module.base.as_str())],
                recipe: vec![
                    "$(ECHO_INVOKE)".into(),
                    format!("$(Q)$({}_TARGET) {args}", invocation.tool),
                ],
                ..BuildRule::default()
            });
            e.blank();
        }
        Ok(())
    }

    /// Phase 2: emit `<name>_clean` and hook it into the aggregate
    /// `clean` target.
    pub fn generate_clean_target(&self, e: &mut MakefileEmitter) {
        let mut victims = vec![format!("$({})", self.target_macro())];
        if self.uses_objects() && !self.module.files.is_empty() {
            victims.push(format!("$({})", self.object_macro()));
        }
        e.rule(&BuildRule {
            target: format!("{}_clean", self.module.name),
            recipe: vec![format!("-@$(rm) {} 2>$(NUL)", victims.join(" "))],
            phony: true,
            ..BuildRule::default()
        });
        e.line(format!("clean: {}_clean", self.module.name));
        e.blank();
    }

    /// Phase 2: emit the `<name>_install` phony for modules with an
    /// install name.
    pub fn generate_install_target(&self, e: &mut MakefileEmitter) {
        let Some(path) = self.install_file_path() else {
            return;
        };
        e.rule(&BuildRule {
            target: format!("{}_install", self.module.name),
            prerequisites: vec![path],
            phony: true,
            ..BuildRule::default()
        });
        e.blank();
    }

    /// Phase 2: emit the `<name>_depends` phony that re-runs the
    /// generator to refresh this module's rules.
    pub fn generate_depends_target(&self, e: &mut MakefileEmitter) {
        e.rule(&BuildRule {
            target: format!("{}_depends", self.module.name),
            recipe: vec![
                "$(ECHO_REGEN)".into(),
                "$(Q)$(MAKEGEN_TARGET) $(MAKEGEN_FLAGS)".into(),
            ],
            phony: true,
            ..BuildRule::default()
        });
        e.blank();
    }

    /// Logical install destination, or `None` when the module does not
    /// install. No install base means the file lands directly under the
    /// install root.
    #[must_use]
    pub fn install_file_path(&self) -> Option<String> {
        let name = self.module.install_name.as_deref()?;
        let relative = match self.module.install_base.as_deref() {
            Some(base) if !base.is_empty() => format!("{base}/{name}"),
            _ => name.to_owned(),
        };
        Some(install_path(&relative))
    }

    /// Resolve an alias to its referent; non-alias modules resolve to
    /// themselves.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::DanglingAlias`] when the referent is
    /// missing.
    pub fn resolve_alias(&self, project: &'a Project) -> Result<&'a Module, HandlerError> {
        match self.module.aliased_module.as_deref() {
            Some(alias) => {
                project
                    .locate_module(alias)
                    .ok_or_else(|| HandlerError::DanglingAlias {
                        module: self.module.name.clone(),
                        alias: alias.to_owned(),
                    })
            }
            None => Ok(self.module),
        }
    }
}

/// Emit a flags macro from an [`IfableData`] bundle: includes as `-I`,
/// defines as `-D`, raw flags verbatim, then each conditional block
/// wrapped in a guard and appending with `+=`. Declaration order is
/// preserved.
pub fn emit_cflags_macro(e: &mut MakefileEmitter, name: &str, op: &str, data: &IfableData) {
    let mut parts: Vec<String> = Vec::new();
    parts.extend(data.includes.iter().map(|i| format!("-I{i}")));
    parts.extend(data.defines.iter().map(|d| format!("-D{d}")));
    parts.extend(data.compiler_flags.iter().cloned());
    if !parts.is_empty() {
        e.assign(name, op, &parts.join(" "));
    }
    for block in &data.ifs {
        if block.data.has_includes_or_defines() || block.data.has_compiler_flags() {
            e.open_guard(&block.property, &block.value);
            emit_cflags_macro(e, name, "+=", &block.data);
            e.close_guard();
        }
    }
}

/// Join a base directory and a relative path, tolerating an empty base.
#[must_use]
pub fn join_relative(base: &str, path: &str) -> String {
    if base.is_empty() {
        path.to_owned()
    } else {
        format!("{base}/{path}")
    }
}
