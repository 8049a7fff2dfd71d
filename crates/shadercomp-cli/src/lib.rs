//! Run orchestration for the batch shader compiler.
//!
//! The binary surface is thin: parse the command line, hand a [`RunConfig`]
//! plus the two collaborator implementations (a [`SourceParser`] front-end
//! and a [`ShaderCompiler`]) to [`run`], and turn the returned failed-shader
//! count into the process exit code.

#![forbid(unsafe_code)]

mod exec;
mod frontend;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use shadercomp_combo::{EntrySet, ShaderConfig, ShaderEntry};
use shadercomp_dispatch::{
    write_shader_files, BuildContext, CompileOptions, Dispatcher, LockKind, ProgressSink,
    ShaderCompiler, SingleThread, StopSignal, Threaded,
};
use tracing::{info, warn};

pub use crate::exec::ProcessCompiler;
pub use crate::frontend::FxcParser;

/// One shader source file with its resolved type and model version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShaderInput {
    pub file: String,
    /// Shader type, e.g. `ps`; empty means "infer from the file name".
    pub target: String,
    /// Shader model version, e.g. `30`.
    pub version: String,
}

/// The resolved run configuration, independent of the argument surface.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub shader_root: PathBuf,
    pub inputs: Vec<ShaderInput>,
    /// Worker thread count; `0` means one per hardware thread.
    pub threads: usize,
    pub force_recompile: bool,
    pub fast_fail: bool,
    /// Opaque compile-flag word handed through to the compiler adapter.
    pub compile_flags: u32,
    pub csgo_include: bool,
}

/// The source front-end contract: everything the run needs to know about a
/// shader before the first compile.
pub trait SourceParser {
    /// Canonical shader name, e.g. `water_ps30`.
    fn construct_name(&self, file: &str, target: &str, version: &str) -> String;

    /// Infers the shader type from the file name when none was given.
    fn get_target(&self, file: &str) -> String;

    /// Computes the source CRC and reports whether an existing archive
    /// already matches it (in which case compilation may be skipped).
    fn check_crc(&self, source: &Path, root: &Path, name: &str) -> Result<(u32, bool)>;

    /// Parses axis and skip declarations out of the source file.
    fn parse_file(
        &self,
        source: &Path,
        root: &Path,
        target: &str,
        version: &str,
    ) -> Result<ShaderConfig>;

    /// Generates the companion include header next to the sources.
    fn write_include(&self, path: &Path, config: &ShaderConfig, csgo: bool) -> Result<()>;
}

/// Vertex shaders have no dedicated `2.0b` profile; the version folds back
/// to `20`.
pub fn normalized_version(version: &str, target: &str) -> String {
    if version == "20b" && target == "vs" {
        "20".to_owned()
    } else {
        version.to_owned()
    }
}

/// Compiles every input shader and writes its archive. Returns the number of
/// shaders that had at least one compile failure.
pub fn run(
    config: &RunConfig,
    parser: &dyn SourceParser,
    compiler: &(dyn ShaderCompiler + Sync),
    stop: StopSignal,
) -> Result<usize> {
    let start = Instant::now();
    let configs = collect_configs(config, parser)?;
    if configs.is_empty() {
        println!("Nothing to compile.");
        return Ok(0);
    }

    let set = EntrySet::new(configs).context("laying out combo spaces")?;
    let threads = effective_threads(config.threads);
    info!(
        shaders = set.entries().len(),
        commands = set.total_commands(),
        threads,
        "starting compile"
    );
    let options = CompileOptions {
        flags: config.compile_flags,
        fast_fail: config.fast_fail,
    };
    let progress = CliProgress::new(set.total_commands());

    let failed = if threads > 1 {
        let ctx = BuildContext::<Threaded>::new(stop);
        let dispatcher =
            Dispatcher::new(&set, &ctx, compiler, &progress, options, threads);
        for entry in set.entries() {
            dispatcher.process_entry_parallel(entry);
            if ctx.stop().is_stopped() {
                break;
            }
            write_entry(&ctx, entry, &config.shader_root);
        }
        progress.finish();
        print_summary(&ctx)
    } else {
        let ctx = BuildContext::<SingleThread>::new(stop);
        let dispatcher = Dispatcher::new(&set, &ctx, compiler, &progress, options, 1);
        for entry in set.entries() {
            dispatcher.process_entry(entry);
            if ctx.stop().is_stopped() {
                break;
            }
            write_entry(&ctx, entry, &config.shader_root);
        }
        progress.finish();
        print_summary(&ctx)
    };

    println!("{} elapsed", format_elapsed(start.elapsed()));
    Ok(failed)
}

fn write_entry<K: LockKind>(ctx: &BuildContext<K>, entry: &ShaderEntry, root: &Path) {
    if let Err(e) = write_shader_files(ctx, entry, root) {
        // The shader is already marked failed; the run continues.
        warn!(shader = entry.name(), "archive write failed: {e}");
    }
}

fn collect_configs(config: &RunConfig, parser: &dyn SourceParser) -> Result<Vec<ShaderConfig>> {
    let mut inputs = config.inputs.clone();
    inputs.sort();
    inputs.dedup();

    let mut configs = Vec::new();
    let mut parse_failed = false;
    for input in &inputs {
        let target = if input.target.is_empty() {
            parser.get_target(&input.file)
        } else {
            input.target.clone()
        };
        let version = normalized_version(&input.version, &target);
        let name = parser.construct_name(&input.file, &target, &version);
        let source = config.shader_root.join(&input.file);

        let crc = match parser.check_crc(&source, &config.shader_root, &name) {
            Ok((crc, up_to_date)) => {
                if up_to_date && !config.force_recompile {
                    info!(shader = %name, "archive is up to date, skipping");
                    continue;
                }
                crc
            }
            // An unreadable source surfaces as a parse failure below.
            Err(_) => 0,
        };

        match parser.parse_file(&source, &config.shader_root, &target, &version) {
            Ok(mut parsed) => {
                parsed.name = name;
                parsed.source_crc32 = crc;
                let include = config
                    .shader_root
                    .join("include")
                    .join(format!("{}.inc", parsed.name));
                if let Err(e) = parser.write_include(&include, &parsed, config.csgo_include) {
                    warn!(shader = %parsed.name, "failed to write include header: {e:#}");
                }
                configs.push(parsed);
            }
            Err(e) => {
                eprintln!("Failed to parse {}: {e:#}", input.file);
                parse_failed = true;
            }
        }
    }
    if parse_failed {
        bail!("one or more shaders failed to parse");
    }
    Ok(configs)
}

fn effective_threads(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Prints the aggregated warning/error report and the failed-shader list;
/// returns the failed-shader count.
pub fn print_summary<K: LockKind>(ctx: &BuildContext<K>) -> usize {
    ctx.with_messages(|messages| {
        for (shader, bag) in messages.iter() {
            if !bag.warnings.is_empty() {
                println!("{shader} {} WARNING(S):", bag.warnings.len());
                for (text, stats) in &bag.warnings {
                    println!("{}\nReported {} time(s)", text.trim_end(), stats.count);
                }
            }
            if !bag.errors.is_empty() {
                println!("{shader} {} ERROR(S):", bag.errors.len());
                for (text, stats) in &bag.errors {
                    println!(
                        "{}\nReported {} time(s), example command:",
                        text.trim_end(),
                        stats.count
                    );
                    println!("    {}", stats.first_command);
                }
            }
        }
    });
    let failed = ctx.with_accum(|accum| accum.failed_shaders());
    for shader in &failed {
        println!("FAILED: {shader}");
    }
    failed.len()
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Progress bar over finished compiles. The bar length counts all commands,
/// including skipped ones, so heavily-pruned spaces finish early.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total_commands: u64) -> CliProgress {
        let bar = ProgressBar::new(total_commands);
        bar.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        CliProgress { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for CliProgress {
    fn combo_finished(&self, entry: &ShaderEntry, _command: u64) {
        self.bar.inc(1);
        self.bar.set_message(entry.name().to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_20b_folds_to_20() {
        assert_eq!(normalized_version("20b", "vs"), "20");
        assert_eq!(normalized_version("20b", "ps"), "20b");
        assert_eq!(normalized_version("30", "vs"), "30");
    }

    #[test]
    fn elapsed_formats_as_hms() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "01:02:03");
    }
}
