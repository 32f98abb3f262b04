//! Host toolchain probing.
//!
//! Each of compiler, binutils, and assembler is detected by running an
//! ordered list of candidate commands with a cheap capability flag,
//! output discarded; the first candidate that exits successfully wins.
//!
//! Compiler and assembler non-detection is deliberately non-fatal: the
//! generated Makefile still references their command macros and the build
//! fails later, when the missing tool is actually invoked. Binutils is
//! the exception — a detected but unsupported version aborts the run,
//! because the rules it would feed are known to produce broken images.

use std::env;
use std::fs;
use std::process::{Command, Stdio};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable supplying a toolchain prefix tried before the
/// built-in candidate commands.
pub const PREFIX_ENV: &str = "MAKEGEN_PREFIX";

/// Binutils versions lexicographically inside this range are rejected.
const BINUTILS_BROKEN_RANGE: (&str, &str) = ("20040902", "20041008");
/// Binutils versions lexicographically below this are rejected.
const BINUTILS_MINIMUM: &str = "20031001";

/// Errors raised during toolchain detection.
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// Binutils was detected but its version is unsupported. This is the
    /// only detection outcome that aborts generation.
    #[error("detected binutils {command} has unsupported version {version}")]
    UnsupportedBinutils {
        /// The detected binutils command.
        command: String,
        /// The offending version token.
        version: String,
    },
}

/// Detection result for a single tool. Created once per run by
/// [`probe`] and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ToolchainInfo {
    /// Command to invoke, also emitted as the tool's command macro.
    pub command: String,
    /// Prefix the command was derived from, possibly empty.
    pub prefix: String,
    /// Whether any candidate answered the capability query.
    pub detected: bool,
    /// Version token, captured for binutils only. Opaque; compared
    /// lexicographically, never numerically.
    pub version: String,
}

/// The probed toolchain for one generation run.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    /// C compiler.
    pub compiler: ToolchainInfo,
    /// Linker/binutils.
    pub binutils: ToolchainInfo,
    /// Netwide assembler.
    pub assembler: ToolchainInfo,
    /// Whether the compiler accepts `-pipe`.
    pub use_pipe: bool,
    /// Whether the compiler supports precompiled headers.
    pub use_pch: bool,
}

/// Probe the host toolchain.
///
/// # Errors
///
/// Returns [`ToolchainError::UnsupportedBinutils`] when binutils is
/// detected with a version in the rejected ranges. Non-detection of any
/// tool is not an error.
pub fn probe() -> Result<Toolchain, ToolchainError> {
    let prefix_override = env::var(PREFIX_ENV).ok().filter(|p| !p.is_empty());

    let compiler = detect_tool("compiler", &candidates(prefix_override.as_deref(), "gcc"), "-v");
    let binutils = detect_binutils(prefix_override.as_deref())?;
    let assembler = detect_tool(
        "assembler",
        &[
            (String::new(), "nasm".to_owned()),
            (String::new(), "yasm".to_owned()),
        ],
        "-h",
    );

    let use_pipe = compiler.detected && detect_pipe_support(&compiler.command);
    let use_pch = compiler.detected && detect_pch_support(&compiler.command);
    info!(pipe = use_pipe, pch = use_pch, "compiler capabilities");

    Ok(Toolchain {
        compiler,
        binutils,
        assembler,
        use_pipe,
        use_pch,
    })
}

/// Candidate `(prefix, command)` pairs for a prefixed GNU tool, with the
/// environment override first.
fn candidates(prefix_override: Option<&str>, tool: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if let Some(prefix) = prefix_override {
        out.push((prefix.to_owned(), format!("{prefix}-{tool}")));
    }
    out.push((String::new(), tool.to_owned()));
    out.push(("mingw32".to_owned(), format!("mingw32-{tool}")));
    out
}

/// Try candidates in order with `flag`; first success wins.
fn detect_tool(what: &str, candidates: &[(String, String)], flag: &str) -> ToolchainInfo {
    for (prefix, command) in candidates {
        if try_command(command, flag) {
            info!(tool = what, command = %command, "detected");
            return ToolchainInfo {
                command: command.clone(),
                prefix: prefix.clone(),
                detected: true,
                version: String::new(),
            };
        }
    }
    // Degrade: keep the last candidate as the command macro value so the
    // eventual build failure names a plausible tool.
    let (prefix, command) = candidates.last().cloned().unwrap_or_default();
    info!(tool = what, "not detected");
    ToolchainInfo {
        command,
        prefix,
        detected: false,
        version: String::new(),
    }
}

fn detect_binutils(prefix_override: Option<&str>) -> Result<ToolchainInfo, ToolchainError> {
    let mut binutils = detect_tool("binutils", &candidates(prefix_override, "ld"), "-v");
    if binutils.detected {
        if let Some(version) = binutils_version(&binutils.command) {
            if !is_supported_binutils_version(&version) {
                return Err(ToolchainError::UnsupportedBinutils {
                    command: binutils.command,
                    version,
                });
            }
            binutils.version = version;
        }
    }
    Ok(binutils)
}

/// Invoke `command flag` with output discarded; success is exit status 0.
/// A command that cannot be spawned at all counts as not detected.
fn try_command(command: &str, flag: &str) -> bool {
    Command::new(command)
        .arg(flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Capture the version banner of `command -v` and return its last
/// whitespace-delimited token with trailing whitespace stripped.
fn binutils_version(command: &str) -> Option<String> {
    let output = Command::new(command)
        .arg("-v")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let banner = String::from_utf8_lossy(&output.stdout);
    version_token(&banner)
}

/// Extract the version token from a banner: the last whitespace-delimited
/// word, trimmed of trailing newlines and tabs.
#[must_use]
pub fn version_token(banner: &str) -> Option<String> {
    banner
        .split_whitespace()
        .last()
        .map(|t| t.trim_end_matches(['\t', '\r', '\n']).to_owned())
        .filter(|t| !t.is_empty())
}

/// Version compatibility policy, compared lexicographically: reject
/// versions inside the broken range (inclusive) and versions below the
/// minimum; accept everything else.
#[must_use]
pub fn is_supported_binutils_version(version: &str) -> bool {
    let (lo, hi) = BINUTILS_BROKEN_RANGE;
    let in_broken_range = version >= lo && version <= hi;
    !(in_broken_range || version < BINUTILS_MINIMUM)
}

/// Compile a trivial source with `-pipe` in a scoped temporary directory;
/// support means the compile succeeded and produced an object file.
fn detect_pipe_support(compiler: &str) -> bool {
    compile_probe(
        compiler,
        "probe.c",
        "int main(void) { return 0; }\n",
        &["-pipe", "-c"],
        "probe.o",
    )
}

/// Compile a trivial header; precompiled-header support means a `.gch`
/// artefact appears next to it.
fn detect_pch_support(compiler: &str) -> bool {
    compile_probe(
        compiler,
        "probe.h",
        "#define MAKEGEN_PCH_PROBE 1\n",
        &["-c"],
        "probe.h.gch",
    )
}

/// Run `compiler args source` inside a fresh temporary directory and
/// check that `artefact` exists afterwards. The directory guard cleans
/// up on every exit path.
fn compile_probe(
    compiler: &str,
    source: &str,
    content: &str,
    args: &[&str],
    artefact: &str,
) -> bool {
    let Ok(dir) = TempDir::new() else {
        return false;
    };
    if fs::write(dir.path().join(source), content).is_err() {
        return false;
    }
    let status = Command::new(compiler)
        .args(args)
        .arg(source)
        .current_dir(dir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    let ok = status.map(|s| s.success()).unwrap_or(false);
    let produced = dir.path().join(artefact).exists();
    debug!(compiler, source, ok, produced, "compile probe");
    ok && produced
}
