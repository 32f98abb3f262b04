//! Command line interface definition using clap.

use crate::backend::BackendConfig;
use crate::dirtree::RootPaths;
use camino::Utf8PathBuf;
use clap::Parser;

/// Compile a resolved project model into a Makefile.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the resolved project model (JSON).
    #[arg(short, long, value_name = "FILE", default_value = "project.json")]
    pub project: Utf8PathBuf,

    /// Path of the Makefile to generate.
    #[arg(short, long, value_name = "FILE", default_value = "Makefile.auto")]
    pub makefile: Utf8PathBuf,

    /// Root directory for intermediate build artefacts.
    #[arg(long, value_name = "DIR", default_value = "obj")]
    pub intermediate: Utf8PathBuf,

    /// Root directory for build outputs.
    #[arg(long, value_name = "DIR", default_value = "out")]
    pub output: Utf8PathBuf,

    /// Root directory for installed files. The default deliberately
    /// differs from the phony `install` target name, which the expanded
    /// `$(INSTALL)` prerequisite word would otherwise shadow.
    #[arg(long, value_name = "DIR", default_value = "dist")]
    pub install: Utf8PathBuf,

    /// Enable verbose diagnostic logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Skip the source-file dependency check.
    #[arg(long)]
    pub no_auto_deps: bool,

    /// Write delegating proxy makefiles into the output tree.
    #[arg(long)]
    pub proxy_makefiles: bool,
}

impl Cli {
    /// Resolve the CLI flags into a [`BackendConfig`].
    #[must_use]
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            makefile: self.makefile.clone(),
            project_file: self.project.clone(),
            roots: RootPaths {
                intermediate: self.intermediate.clone(),
                output: self.output.clone(),
                install: self.install.clone(),
            },
            verbose: self.verbose,
            automatic_dependencies: !self.no_auto_deps,
            proxy_makefiles: self.proxy_makefiles,
        }
    }
}
