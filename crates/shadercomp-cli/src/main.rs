#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::{bail, Context, Result};
use clap::builder::PossibleValuesParser;
use clap::Parser;
use shadercomp_cli::{
    normalized_version, FxcParser, ProcessCompiler, RunConfig, ShaderInput, SourceParser,
};
use shadercomp_dispatch::{
    StopSignal, COMPILE_AVOID_FLOW_CONTROL, COMPILE_DEBUG_INFO, COMPILE_OPT_LEVEL0,
    COMPILE_OPT_LEVEL1, COMPILE_OPT_LEVEL2, COMPILE_OPT_LEVEL3, COMPILE_PREFER_FLOW_CONTROL,
    COMPILE_SKIP_VALIDATION,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "shadercomp",
    version,
    about = "Batch HLSL shader compiler producing per-shader VCS archives"
)]
struct Args {
    /// Shader source files to compile.
    #[arg(required = true)]
    files: Vec<String>,

    /// Base path for shader sources and outputs.
    #[arg(long = "shaderpath")]
    shader_path: PathBuf,

    /// Shader model version; one value, or one per input file.
    #[arg(long = "ver", value_delimiter = ',', required = true,
          value_parser = PossibleValuesParser::new(["20b", "30", "40", "41", "50", "51"]))]
    versions: Vec<String>,

    /// Shader type; inferred from the file name when omitted.
    #[arg(long = "types", value_delimiter = ',',
          value_parser = PossibleValuesParser::new(["vs", "ps", "gs", "ds", "hs"]))]
    types: Vec<String>,

    /// Worker threads; 0 means one per hardware thread.
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Skip the source CRC check and recompile everything.
    #[arg(long)]
    force: bool,

    /// Print each shader's source CRC and exit.
    #[arg(long)]
    crc: bool,

    /// Generate only the companion include headers.
    #[arg(long)]
    dynamic: bool,

    /// Stop the whole run on the first failed compile.
    #[arg(long)]
    fastfail: bool,

    /// Optimization level.
    #[arg(long = "optimize", short = 'O', default_value_t = 1,
          value_parser = clap::value_parser!(u8).range(0..=3))]
    optimize: u8,

    /// Skip shader validation.
    #[arg(long = "no-validation")]
    no_validation: bool,

    /// Direct the compiler away from flow-control constructs.
    #[arg(long = "no-flow-control", conflicts_with = "prefer_flow_control")]
    no_flow_control: bool,

    /// Direct the compiler toward flow-control constructs.
    #[arg(long = "prefer-flow-control")]
    prefer_flow_control: bool,

    /// Enable debugging information.
    #[arg(long = "debug-info")]
    debug_info: bool,

    /// Emit combo-name tables into the include headers.
    #[arg(long)]
    csgo: bool,

    /// External compiler executable.
    #[arg(long, default_value = "fxc")]
    compiler: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match real_main(args) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            exit(-1);
        }
    }
}

fn real_main(args: Args) -> Result<i32> {
    let shader_root = std::path::absolute(&args.shader_path)
        .with_context(|| format!("resolving shader path {}", args.shader_path.display()))?;

    if args.versions.len() != 1 && args.versions.len() != args.files.len() {
        bail!("argument count for --ver doesn't match input shader count");
    }
    if args.types.len() > 1 && args.types.len() != args.files.len() {
        bail!("argument count for --types doesn't match input shader count");
    }

    let parser = FxcParser;
    let mut inputs = Vec::with_capacity(args.files.len());
    for (i, file) in args.files.iter().enumerate() {
        let file = Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.clone());
        let target = if args.types.is_empty() {
            parser.get_target(&file)
        } else if args.types.len() == 1 {
            args.types[0].clone()
        } else {
            args.types[i].clone()
        };
        let version = if args.versions.len() == 1 {
            &args.versions[0]
        } else {
            &args.versions[i]
        };
        let version = normalized_version(version, &target);
        inputs.push(ShaderInput {
            file,
            target,
            version,
        });
    }
    inputs.sort();
    inputs.dedup();

    if args.crc {
        for input in &inputs {
            let name = parser.construct_name(&input.file, &input.target, &input.version);
            let (crc, _) =
                parser.check_crc(&shader_root.join(&input.file), &shader_root, &name)?;
            println!("{crc}");
        }
        return Ok(0);
    }

    if args.dynamic {
        let mut failed = false;
        for input in &inputs {
            let name = parser.construct_name(&input.file, &input.target, &input.version);
            match parser.parse_file(
                &shader_root.join(&input.file),
                &shader_root,
                &input.target,
                &input.version,
            ) {
                Ok(mut config) => {
                    config.name = name;
                    let include = shader_root
                        .join("include")
                        .join(format!("{}.inc", config.name));
                    parser.write_include(&include, &config, args.csgo)?;
                }
                Err(e) => {
                    eprintln!("Failed to parse {}: {e:#}", input.file);
                    failed = true;
                }
            }
        }
        return Ok(if failed { -1 } else { 0 });
    }

    let mut flags = 0u32;
    if args.no_validation {
        flags |= COMPILE_SKIP_VALIDATION;
    }
    if args.no_flow_control {
        flags |= COMPILE_AVOID_FLOW_CONTROL;
    } else if args.prefer_flow_control {
        flags |= COMPILE_PREFER_FLOW_CONTROL;
    }
    if args.debug_info {
        flags |= COMPILE_DEBUG_INFO;
    }
    flags |= match args.optimize {
        0 => COMPILE_OPT_LEVEL0,
        2 => COMPILE_OPT_LEVEL2,
        3 => COMPILE_OPT_LEVEL3,
        _ => COMPILE_OPT_LEVEL1,
    };

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            eprintln!("\ninterrupted, draining workers");
            stop.stop();
        })
        .context("installing Ctrl-C handler")?;
    }

    let compiler = ProcessCompiler::new(args.compiler, shader_root.clone());
    let config = RunConfig {
        shader_root,
        inputs,
        threads: args.threads,
        force_recompile: args.force,
        fast_fail: args.fastfail,
        compile_flags: flags,
        csgo_include: args.csgo,
    };
    let failed = shadercomp_cli::run(&config, &parser, &compiler, stop)?;
    Ok(i32::try_from(failed).unwrap_or(i32::MAX))
}
