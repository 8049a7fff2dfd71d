use std::path::PathBuf;
use std::process::Command;

use shadercomp_dispatch::{
    CompileRequest, CompileResponse, ShaderCompiler, COMPILE_AVOID_FLOW_CONTROL,
    COMPILE_DEBUG_INFO, COMPILE_OPT_LEVEL0, COMPILE_OPT_LEVEL1, COMPILE_OPT_LEVEL2,
    COMPILE_OPT_LEVEL3, COMPILE_PREFER_FLOW_CONTROL, COMPILE_SKIP_VALIDATION,
};
use tracing::debug;

/// Compiler adapter that shells out to an external `fxc`-compatible
/// executable.
///
/// The bytecode is routed through a temporary output file (`/Fo`); the
/// child's stderr and stdout become the listing. Failure to launch the
/// process at all is reported as a failed compile with a synthesized
/// listing, never as a crash of the run.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    program: PathBuf,
    shader_root: PathBuf,
}

impl ProcessCompiler {
    pub fn new(program: PathBuf, shader_root: PathBuf) -> ProcessCompiler {
        ProcessCompiler {
            program,
            shader_root,
        }
    }

    fn flag_args(flags: u32) -> Vec<&'static str> {
        let mut args = Vec::new();
        if flags & COMPILE_SKIP_VALIDATION != 0 {
            args.push("/Vd");
        }
        if flags & COMPILE_AVOID_FLOW_CONTROL != 0 {
            args.push("/Gfa");
        }
        if flags & COMPILE_PREFER_FLOW_CONTROL != 0 {
            args.push("/Gfp");
        }
        if flags & COMPILE_DEBUG_INFO != 0 {
            args.push("/Zi");
        }
        if flags & COMPILE_OPT_LEVEL0 != 0 {
            args.push("/O0");
        } else if flags & COMPILE_OPT_LEVEL2 != 0 {
            args.push("/O2");
        } else if flags & COMPILE_OPT_LEVEL3 != 0 {
            args.push("/O3");
        } else if flags & COMPILE_OPT_LEVEL1 != 0 {
            args.push("/O1");
        }
        args
    }
}

impl ShaderCompiler for ProcessCompiler {
    fn execute(&self, request: &CompileRequest) -> CompileResponse {
        let launch_error = |detail: String| {
            CompileResponse::failure(format!(
                "{}(0,0): error 0000: {detail}",
                request.source_file
            ))
        };

        let out_file = match tempfile::Builder::new()
            .prefix("shadercomp-")
            .suffix(".dxbc")
            .tempfile()
        {
            Ok(f) => f,
            Err(e) => return launch_error(format!("cannot create output file: {e}")),
        };

        let mut command = Command::new(&self.program);
        command
            .arg("/nologo")
            .arg("/T")
            .arg(&request.target)
            .arg("/E")
            .arg(&request.entry_point);
        for flag in Self::flag_args(request.flags) {
            command.arg(flag);
        }
        for (name, value) in &request.defines {
            command.arg("/D").arg(format!("{name}={value}"));
        }
        command
            .arg("/Fo")
            .arg(out_file.path())
            .arg(self.shader_root.join(&request.source_file));

        debug!(?command, "spawning compiler");
        let output = match command.output() {
            Ok(output) => output,
            Err(e) => {
                return launch_error(format!(
                    "failed to launch compiler {}: {e}",
                    self.program.display()
                ))
            }
        };

        let mut listing = String::from_utf8_lossy(&output.stderr).into_owned();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            if !listing.is_empty() {
                listing.push('\n');
            }
            listing.push_str(stdout.trim_end());
        }
        let listing = (!listing.trim().is_empty()).then_some(listing);

        if !output.status.success() {
            return CompileResponse {
                succeeded: false,
                bytecode: Vec::new(),
                listing,
            };
        }
        match std::fs::read(out_file.path()) {
            Ok(bytecode) => CompileResponse {
                succeeded: true,
                bytecode,
                listing,
            },
            Err(e) => launch_error(format!("compiler produced no output file: {e}")),
        }
    }
}
