//! Shared fixtures for integration tests.

use camino::Utf8PathBuf;
use makegen::backend::BackendConfig;
use makegen::dirtree::RootPaths;
use makegen::model::{Module, ModuleType, Project};
use makegen::toolchain::{Toolchain, ToolchainInfo};
use std::path::Path;

/// A toolchain as if probing had detected plain `gcc`/`ld`/`nasm`.
#[must_use]
pub fn stub_toolchain() -> Toolchain {
    let tool = |command: &str| ToolchainInfo {
        command: command.to_owned(),
        prefix: String::new(),
        detected: true,
        version: String::new(),
    };
    Toolchain {
        compiler: tool("gcc"),
        binutils: tool("ld"),
        assembler: tool("nasm"),
        use_pipe: false,
        use_pch: false,
    }
}

/// A minimal module of the given type with one C source file.
#[must_use]
pub fn module(name: &str, module_type: ModuleType) -> Module {
    Module {
        name: name.to_owned(),
        module_type,
        enabled: true,
        base: Utf8PathBuf::from(name),
        files: vec![Utf8PathBuf::from("main.c")],
        dependencies: Vec::new(),
        install_name: None,
        install_base: None,
        aliased_module: None,
        non_if_data: makegen::model::IfableData::default(),
        invocations: Vec::new(),
    }
}

/// A project containing the given modules and nothing else.
#[must_use]
pub fn project_with(modules: Vec<Module>) -> Project {
    Project {
        name: "sample".to_owned(),
        file_name: "sample.json".to_owned(),
        modules,
        ..Project::default()
    }
}

/// A backend configuration whose output paths all live under `dir`.
#[must_use]
pub fn config_in(dir: &Path) -> BackendConfig {
    let root = Utf8PathBuf::from(dir.display().to_string());
    BackendConfig {
        makefile: root.join("Makefile.auto"),
        project_file: Utf8PathBuf::from("project.json"),
        roots: RootPaths {
            intermediate: root.join("obj"),
            output: root.join("out"),
            install: root.join("dist"),
        },
        verbose: false,
        automatic_dependencies: false,
        proxy_makefiles: false,
    }
}
