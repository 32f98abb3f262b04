//! Backend orchestration.
//!
//! [`Backend`] sequences a generation run: toolchain probing happens once
//! up front, the directory trees are built before any rule emission and
//! are read-only afterwards, then the Makefile sections are emitted in a
//! fixed order. That order is an external contract — later sections'
//! variables reference earlier ones.
//!
//! The emitted text accumulates in memory and hits the disk once, at the
//! end of a successful run.

use crate::cli::Cli;
use crate::dirtree::{Directory, INSTALL_MARKER, INTERMEDIATE_MARKER, OUTPUT_MARKER, RootPaths};
use crate::emitter::{BuildRule, MakefileEmitter, WRAP_AT, wrap_join};
use crate::handlers::{ModuleHandler, install_path, join_relative};
use crate::model::{IfableData, ModuleType, Project};
use crate::toolchain::{self, Toolchain};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use itertools::Itertools;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Registry hive files installed under `system32/config`.
const REGISTRY_HIVES: [&str; 5] = ["default", "sam", "security", "software", "system"];

/// Resolved generator configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Path of the Makefile to generate.
    pub makefile: Utf8PathBuf,
    /// Path of the serialised project model, echoed into the regenerate
    /// recipe.
    pub project_file: Utf8PathBuf,
    /// Root directories substituted for the path placeholders.
    pub roots: RootPaths,
    /// Report each newly created directory.
    pub verbose: bool,
    /// Check that module source files exist after generation.
    pub automatic_dependencies: bool,
    /// Write delegating proxy makefiles into the output tree.
    pub proxy_makefiles: bool,
}

/// Load the project model, probe the toolchain, and run generation.
///
/// # Errors
///
/// Returns an error when the model cannot be loaded, the detected
/// binutils version is unsupported, a module configuration is invalid,
/// or the output cannot be written.
pub fn run(cli: &Cli) -> Result<()> {
    let project = Project::from_path(&cli.project)
        .with_context(|| format!("loading project model {}", cli.project))?;
    let toolchain = toolchain::probe().context("probing toolchain")?;
    let config = cli.backend_config();
    Backend::new(&project, &config, toolchain).process()?;
    Ok(())
}

/// One generation run over an immutable project model.
pub struct Backend<'a> {
    project: &'a Project,
    config: &'a BackendConfig,
    toolchain: Toolchain,
    intermediate: Directory,
    output: Directory,
    install: Directory,
    emitter: MakefileEmitter,
}

impl<'a> Backend<'a> {
    /// Create a backend for one run. The toolchain is probed once by the
    /// caller and threaded through explicitly.
    #[must_use]
    pub fn new(project: &'a Project, config: &'a BackendConfig, toolchain: Toolchain) -> Self {
        Self {
            project,
            config,
            toolchain,
            intermediate: Directory::new(INTERMEDIATE_MARKER),
            output: Directory::new(OUTPUT_MARKER),
            install: Directory::new(INSTALL_MARKER),
            emitter: MakefileEmitter::new(),
        }
    }

    /// Run the whole generation pass, write the Makefile, and return the
    /// generated text.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid module configuration (dangling alias,
    /// unknown invocation tool, variable markers in directory paths), for
    /// directory-creation failures, and when the output file cannot be
    /// written.
    pub fn process(mut self) -> Result<String> {
        self.collect_directories()?;
        self.generate_header();
        self.generate_global_variables();
        self.process_modules()?;
        self.generate_install_target()?;
        self.generate_test_target();
        self.generate_directory_targets();
        self.generate_directories()?;
        if self.config.proxy_makefiles {
            self.generate_proxy_makefiles()?;
        }
        if self.config.automatic_dependencies {
            self.check_automatic_dependencies();
        }
        let text = self.emitter.into_string();
        fs::write(self.config.makefile.as_std_path(), &text)
            .with_context(|| format!("cannot create {}", self.config.makefile))?;
        info!(makefile = %self.config.makefile, "generation complete");
        Ok(text)
    }

    /// Union every directory any enabled module references into the three
    /// root trees. The trees only grow here; rule emission treats them as
    /// read-only.
    fn collect_directories(&mut self) -> Result<()> {
        let project = self.project;
        for module in project.enabled_modules() {
            let handler = ModuleHandler::for_module(module);
            let base = module.base.as_str();
            if !base.is_empty() {
                if handler.uses_objects() {
                    self.intermediate.add(base)?;
                }
                self.output.add(base)?;
            }
            for dir in handler.object_directories() {
                self.intermediate.add(&dir)?;
            }
            if let Some(install_base) = module.install_base.as_deref() {
                if !install_base.is_empty() {
                    self.install.add(install_base)?;
                }
            }
        }
        for file in &project.install_files {
            if !file.base.is_empty() {
                self.install.add(&file.base)?;
            }
        }
        if !project.registry_source_files.is_empty() {
            self.install.add("system32/config")?;
        }
        Ok(())
    }

    fn generate_header(&mut self) {
        let subject = if self.project.file_name.is_empty() {
            self.project.name.clone()
        } else {
            self.project.file_name.clone()
        };
        self.emitter.line(format!(
            "# THIS FILE IS AUTOMATICALLY GENERATED, EDIT '{subject}' INSTEAD"
        ));
        self.emitter.blank();
    }

    fn generate_global_variables(&mut self) {
        let project = self.project;
        let e = &mut self.emitter;
        let ar = if self.toolchain.compiler.prefix.is_empty() {
            "ar".to_owned()
        } else {
            format!("{}-ar", self.toolchain.compiler.prefix)
        };
        e.assign("PREFIX", ":=", &self.toolchain.compiler.prefix);
        e.assign("INTERMEDIATE", ":=", self.config.roots.intermediate.as_str());
        e.assign("OUTPUT", ":=", self.config.roots.output.as_str());
        e.assign("INSTALL", ":=", self.config.roots.install.as_str());
        e.assign("gcc", ":=", &self.toolchain.compiler.command);
        e.assign("ld", ":=", &self.toolchain.binutils.command);
        e.assign("ar", ":=", &ar);
        e.assign("nasm", ":=", &self.toolchain.assembler.command);
        e.assign("mkisofs", ":=", "mkisofs");
        e.assign("mkdir", ":=", "mkdir -p");
        e.assign("rm", ":=", "rm -f");
        e.assign("cp", ":=", "cp -f");
        e.assign("NUL", ":=", "/dev/null");
        e.assign("Q", ":=", "@");
        e.assign("MAKEGEN_TARGET", ":=", "makegen");
        e.assign(
            "MAKEGEN_FLAGS",
            ":=",
            &format!(
                "--project {} --makefile {}",
                self.config.project_file, self.config.makefile
            ),
        );
        for echo in [
            "CC", "AR", "LD", "NASM", "MKDIR", "CP", "MKHIVE", "CDMAKE", "INVOKE", "REGEN",
        ] {
            e.assign(&format!("ECHO_{echo}"), ":=", &format!("@echo [{echo}] $@"));
        }
        e.blank();

        generate_global_cflags_and_properties(e, "=", &project.non_if_data);
        generate_project_gcc_options(e, "=", &project.non_if_data);
        e.assign("PROJECT_LFLAGS", ":=", &project.linker_flags.iter().join(" "));
        e.line("PROJECT_CFLAGS += -Wall");
        if self.toolchain.use_pipe {
            e.line("PROJECT_CFLAGS += -pipe");
        }
        e.line("PROJECT_CFLAGS += $(PROJECT_GCCOPTIONS)");
        e.blank();
    }

    /// Two-phase module generation: every module's macros first, then
    /// every module's rule blocks.
    fn process_modules(&mut self) -> Result<()> {
        let project = self.project;
        let handlers: Vec<ModuleHandler<'_>> = project
            .enabled_modules()
            .map(ModuleHandler::for_module)
            .collect();

        for handler in &handlers {
            handler.generate_object_macro(&mut self.emitter);
        }
        self.emitter.blank();
        for handler in &handlers {
            handler.generate_target_macro(&mut self.emitter, project)?;
        }
        self.emitter.blank();

        self.generate_all_target(&handlers);
        self.generate_init_target(&handlers);

        for handler in &handlers {
            handler.generate_other_macros(&mut self.emitter);
        }
        self.emitter.blank();

        for handler in &handlers {
            handler.generate_precondition(&mut self.emitter);
            handler.generate_build_rule(&mut self.emitter);
            handler.generate_invocations(&mut self.emitter, project)?;
            handler.generate_clean_target(&mut self.emitter);
            handler.generate_install_target(&mut self.emitter);
            handler.generate_depends_target(&mut self.emitter);
        }
        Ok(())
    }

    fn generate_all_target(&mut self, handlers: &[ModuleHandler<'_>]) {
        let members: Vec<String> = handlers
            .iter()
            .filter(|h| h.include_in_all())
            .map(|h| format!("$({})", h.target_macro()))
            .collect();
        self.emitter.rule(&BuildRule {
            target: "all".into(),
            prerequisites: members,
            phony: true,
            ..BuildRule::default()
        });
        self.emitter.blank();
    }

    /// `INIT` lists the build tools other rules depend on having built.
    fn generate_init_target(&mut self, handlers: &[ModuleHandler<'_>]) {
        let tools: Vec<String> = handlers
            .iter()
            .filter(|h| h.module.module_type == ModuleType::BuildTool)
            .map(|h| h.dependency_path())
            .collect();
        self.emitter
            .assign("INIT", "=", &wrap_join(&tools, WRAP_AT));
        self.emitter.blank();
    }

    /// The `install` section: non-module files first, then module
    /// installs, then the registry-hive block.
    fn generate_install_target(&mut self) -> Result<()> {
        let project = self.project;
        let mut install_targets: Vec<String> = Vec::new();
        for file in &project.install_files {
            install_targets.push(install_path(&join_relative(&file.base, &file.newname)));
        }
        let mut module_installs = Vec::new();
        for module in project.enabled_modules() {
            let handler = ModuleHandler::for_module(module);
            if let Some(target) = handler.install_file_path() {
                let source_module = handler.resolve_alias(project)?;
                let source = ModuleHandler::for_module(source_module).target_file();
                install_targets.push(target.clone());
                module_installs.push((source, target, module.install_base.clone()));
            }
        }
        let registry_targets = self.registry_target_files();
        let mut all_targets = install_targets;
        all_targets.extend(registry_targets.clone());

        self.emitter.rule(&BuildRule {
            target: "install".into(),
            prerequisites: all_targets,
            phony: true,
            ..BuildRule::default()
        });
        self.emitter.blank();

        for file in &project.install_files {
            let target = install_path(&join_relative(&file.base, &file.newname));
            let directory = install_path(&file.base);
            self.output_install_rule(&target, file.source.as_str(), &directory);
        }
        for (source, target, base) in &module_installs {
            let directory = install_path(base.as_deref().unwrap_or(""));
            self.output_install_rule(target, source, &directory);
        }
        self.output_registry_install_target(&registry_targets);
        Ok(())
    }

    fn output_install_rule(&mut self, target: &str, source: &str, directory: &str) {
        self.emitter.rule(&BuildRule {
            target: target.to_owned(),
            prerequisites: vec![source.to_owned()],
            order_only: vec![directory.to_owned()],
            recipe: vec![
                "$(ECHO_CP)".into(),
                format!("$(Q)${{cp}} {source} $@ 1>$(NUL)"),
            ],
            ..BuildRule::default()
        });
        self.emitter.blank();
    }

    fn registry_target_files(&self) -> Vec<String> {
        if self.project.registry_source_files.is_empty() {
            return Vec::new();
        }
        let config_dir = install_path("system32/config");
        REGISTRY_HIVES
            .iter()
            .map(|hive| format!("{config_dir}/{hive}"))
            .collect()
    }

    fn output_registry_install_target(&mut self, registry_targets: &[String]) {
        if registry_targets.is_empty() {
            return;
        }
        let config_dir = install_path("system32/config");
        let sources: Vec<String> = self.project.registry_source_files.clone();
        self.emitter.rule(&BuildRule {
            target: "install_registry".into(),
            prerequisites: registry_targets.to_vec(),
            phony: true,
            ..BuildRule::default()
        });
        let mut prerequisites = sources.clone();
        prerequisites.push(config_dir.clone());
        prerequisites.push("$(MKHIVE_TARGET)".into());
        self.emitter.rule(&BuildRule {
            target: registry_targets.iter().join(" "),
            prerequisites,
            recipe: vec![
                "$(ECHO_MKHIVE)".into(),
                format!("$(Q)$(MKHIVE_TARGET) {config_dir} {}", sources.iter().join(" ")),
            ],
            ..BuildRule::default()
        });
        self.emitter.blank();
    }

    /// `test` lists exactly the test modules' target macros.
    fn generate_test_target(&mut self) {
        let members: Vec<String> = self
            .project
            .enabled_modules()
            .filter(|m| m.module_type == ModuleType::Test)
            .map(|m| format!("$({}_TARGET)", m.name))
            .collect();
        self.emitter.rule(&BuildRule {
            target: "test".into(),
            prerequisites: members,
            phony: true,
            ..BuildRule::default()
        });
        self.emitter.blank();
    }

    fn generate_directory_targets(&mut self) {
        self.intermediate.create_rule(&mut self.emitter, "");
        self.output.create_rule(&mut self.emitter, "");
        self.install.create_rule(&mut self.emitter, "");
        self.emitter.blank();
    }

    /// Create the physical directory trees. Side effect only; nothing is
    /// emitted.
    fn generate_directories(&self) -> Result<()> {
        info!("creating directories");
        let roots = &self.config.roots;
        self.intermediate
            .generate_tree("", roots, self.config.verbose)?;
        self.output.generate_tree("", roots, self.config.verbose)?;
        self.install.generate_tree("", roots, self.config.verbose)?;
        Ok(())
    }

    /// Write a delegating `GNUmakefile` into each module's output
    /// directory so `make` works from inside the tree.
    fn generate_proxy_makefiles(&self) -> Result<()> {
        info!("generating proxy makefiles");
        for module in self.project.enabled_modules() {
            if module.base.as_str().is_empty() || module.module_type == ModuleType::Alias {
                continue;
            }
            let dir = self.config.roots.output.join(&module.base);
            fs::create_dir_all(dir.as_std_path())
                .with_context(|| format!("cannot create {dir}"))?;
            let depth = dir.components().count();
            let top = (0..depth).map(|_| "..").join("/");
            let makefile_name = self
                .config
                .makefile
                .file_name()
                .unwrap_or(self.config.makefile.as_str());
            let content = format!(
                "# Automatically generated; do not edit.\n\
                 TOP = {top}\n\
                 .PHONY: all\n\
                 all:\n\
                 \t$(MAKE) -C $(TOP) -f {makefile_name} {}\n",
                module.name
            );
            let path = dir.join("GNUmakefile");
            fs::write(path.as_std_path(), content)
                .with_context(|| format!("cannot create {path}"))?;
        }
        Ok(())
    }

    /// Verify each enabled module's source files exist; missing files are
    /// reported but never fatal.
    fn check_automatic_dependencies(&self) {
        info!("checking automatic dependencies");
        for module in self.project.enabled_modules() {
            for file in &module.files {
                let path = join_relative(module.base.as_str(), file.as_str());
                if !Path::new(&path).exists() {
                    warn!(module = %module.name, file = %path, "source file missing");
                }
            }
        }
    }
}

/// Emit scope properties and the `PROJECT_CFLAGS` include/define macro,
/// recursing into conditional blocks with `+=` under their guards.
fn generate_global_cflags_and_properties(e: &mut MakefileEmitter, op: &str, data: &IfableData) {
    for property in &data.properties {
        e.assign(&property.name, ":=", &property.value);
    }
    if !data.includes.is_empty() || !data.defines.is_empty() {
        let parts: Vec<String> = data
            .includes
            .iter()
            .map(|i| format!("-I{i}"))
            .chain(data.defines.iter().map(|d| format!("-D{d}")))
            .collect();
        e.assign("PROJECT_CFLAGS", op, &parts.join(" "));
    }
    for block in &data.ifs {
        if block.data.has_includes_or_defines() || !block.data.properties.is_empty() {
            e.open_guard(&block.property, &block.value);
            generate_global_cflags_and_properties(e, "+=", &block.data);
            e.close_guard();
        }
    }
}

/// Emit the `PROJECT_GCCOPTIONS` raw-flag macro with the same guard
/// nesting.
fn generate_project_gcc_options(e: &mut MakefileEmitter, op: &str, data: &IfableData) {
    if !data.compiler_flags.is_empty() {
        e.assign("PROJECT_GCCOPTIONS", op, &data.compiler_flags.iter().join(" "));
    }
    for block in &data.ifs {
        if block.data.has_compiler_flags() {
            e.open_guard(&block.property, &block.value);
            generate_project_gcc_options(e, "+=", &block.data);
            e.close_guard();
        }
    }
}
