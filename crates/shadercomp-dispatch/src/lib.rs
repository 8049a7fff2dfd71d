//! Parallel build dispatch for shader combo spaces.
//!
//! Workers pull combo handles from a shared descending cursor, hand each one
//! to the external compiler, and file the resulting bytecode into per-shader
//! accumulators. A packaging watermark tracks the lowest command number whose
//! whole suffix has finished; static combos whose dynamic range clears the
//! watermark are sealed (sorted, blockwise-LZMA packed) while compilation of
//! lower commands continues. Once an entry's range is drained the accumulated
//! combos are deduplicated and written out as a VCS archive.
//!
//! The whole pipeline is generic over a [`LockKind`]: the multi-threaded
//! instantiation uses real mutexes, the single-threaded one compiles down to
//! `RefCell` borrows with no synchronization cost, with identical semantics.

#![forbid(unsafe_code)]

mod accum;
mod compiler;
mod context;
mod emit;
mod messages;
mod sync;
mod worker;

pub use crate::accum::{Accumulators, ByteCodeBlock, ShaderAccum, StaticCombo};
pub use crate::compiler::{
    CompileRequest, CompileResponse, ShaderCompiler, COMPILE_AVOID_FLOW_CONTROL,
    COMPILE_DEBUG_INFO, COMPILE_OPT_LEVEL0, COMPILE_OPT_LEVEL1, COMPILE_OPT_LEVEL2,
    COMPILE_OPT_LEVEL3, COMPILE_PREFER_FLOW_CONTROL, COMPILE_SKIP_VALIDATION,
};
pub use crate::context::BuildContext;
pub use crate::emit::{write_shader_files, WriteOutcome};
pub use crate::messages::{MessageBag, MessageBags, MessageStats};
pub use crate::sync::{
    LocalLock, LockKind, MutexLock, SharedLock, SingleThread, StopSignal, Threaded,
};
pub use crate::worker::{CompileOptions, Dispatcher, ProgressSink};
