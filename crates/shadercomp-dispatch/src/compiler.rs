use shadercomp_combo::ComboHandle;

/// Compile-flag bits carried opaquely through the dispatcher and interpreted
/// by the compiler adapter.
pub const COMPILE_SKIP_VALIDATION: u32 = 1 << 0;
pub const COMPILE_AVOID_FLOW_CONTROL: u32 = 1 << 1;
pub const COMPILE_PREFER_FLOW_CONTROL: u32 = 1 << 2;
pub const COMPILE_DEBUG_INFO: u32 = 1 << 3;
pub const COMPILE_OPT_LEVEL0: u32 = 1 << 4;
pub const COMPILE_OPT_LEVEL1: u32 = 1 << 5;
pub const COMPILE_OPT_LEVEL2: u32 = 1 << 6;
pub const COMPILE_OPT_LEVEL3: u32 = 1 << 7;

/// One compile invocation: a fully-assigned combo lowered to the external
/// compiler's inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub source_file: String,
    pub entry_point: String,
    /// Target profile string, e.g. `ps_3_0`.
    pub target: String,
    /// Macro defines in axis declaration order.
    pub defines: Vec<(String, String)>,
    pub flags: u32,
}

impl CompileRequest {
    pub fn from_handle(handle: &ComboHandle, flags: u32) -> CompileRequest {
        let entry = handle.entry();
        CompileRequest {
            source_file: entry.source_file().to_owned(),
            entry_point: entry.entry_point().to_owned(),
            target: entry.target().to_owned(),
            defines: handle.defines(),
            flags,
        }
    }
}

/// Outcome of one compile invocation.
///
/// The dispatcher never interprets `bytecode`; it is opaque payload. The
/// `listing` carries the compiler's diagnostics and may be present on
/// success (warnings) as well as failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResponse {
    pub succeeded: bool,
    pub bytecode: Vec<u8>,
    pub listing: Option<String>,
}

impl CompileResponse {
    pub fn success(bytecode: Vec<u8>) -> CompileResponse {
        CompileResponse {
            succeeded: true,
            bytecode,
            listing: None,
        }
    }

    pub fn failure(listing: impl Into<Option<String>>) -> CompileResponse {
        CompileResponse {
            succeeded: false,
            bytecode: Vec::new(),
            listing: listing.into(),
        }
    }

    pub fn with_listing(mut self, listing: impl Into<String>) -> CompileResponse {
        self.listing = Some(listing.into());
        self
    }
}

/// The external compiler. Implementations block for the duration of the
/// compile; the dispatcher never holds a lock across the call.
pub trait ShaderCompiler {
    fn execute(&self, request: &CompileRequest) -> CompileResponse;
}
