use std::ops::Range;
use std::sync::Arc;
use std::thread;

use shadercomp_combo::{ComboHandle, EntrySet, ShaderEntry};
use shadercomp_vcs::BlockPacker;
use tracing::{debug, error};

use crate::compiler::{CompileRequest, CompileResponse, ShaderCompiler};
use crate::context::BuildContext;
use crate::sync::{LockKind, SharedLock};

/// Dispatch-wide compile options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Opaque flag word handed to the compiler adapter.
    pub flags: u32,
    /// Stop the whole run on the first failed compile.
    pub fast_fail: bool,
}

/// Receives per-combo completion ticks for progress display. Implementations
/// are called from worker threads without any lock held.
pub trait ProgressSink: Sync {
    fn combo_finished(&self, entry: &ShaderEntry, command: u64) {
        let _ = (entry, command);
    }
}

/// No progress reporting.
impl ProgressSink for () {}

/// State guarded by the dispatch lock.
#[derive(Debug)]
struct DispatchState {
    /// Global command range of the entry being processed.
    range: Range<u64>,
    /// Shared descending cursor: the next alive combo to hand out.
    cursor: Option<ComboHandle>,
    /// Lowest command number known packaged. Starts at `range.end` and only
    /// moves down.
    watermark: u64,
    /// Command currently owned by each worker; `None` when idle.
    in_flight: Vec<Option<u64>>,
}

/// Hands combos to workers and seals static combos strictly in combo-index
/// order.
///
/// Iteration is descending, which reduces the "packaging must wait for the
/// slowest worker" rule to a single comparison: when a worker finishes
/// command `c` and no in-flight command is numerically above `c`, every
/// command `>= c` has completed and the watermark can drop to `c`.
pub struct Dispatcher<'a, K: LockKind, C: ?Sized> {
    entries: &'a EntrySet,
    ctx: &'a BuildContext<K>,
    compiler: &'a C,
    progress: &'a dyn ProgressSink,
    options: CompileOptions,
    workers: usize,
    state: K::Lock<DispatchState>,
}

impl<'a, K: LockKind, C: ShaderCompiler + ?Sized> Dispatcher<'a, K, C> {
    pub fn new(
        entries: &'a EntrySet,
        ctx: &'a BuildContext<K>,
        compiler: &'a C,
        progress: &'a dyn ProgressSink,
        options: CompileOptions,
        workers: usize,
    ) -> Dispatcher<'a, K, C> {
        let workers = workers.max(1);
        Dispatcher {
            entries,
            ctx,
            compiler,
            progress,
            options,
            workers,
            state: K::Lock::new(DispatchState {
                range: 0..0,
                cursor: None,
                watermark: 0,
                in_flight: vec![None; workers],
            }),
        }
    }

    /// Compiles an entry's alive combos on the calling thread.
    pub fn process_entry(&self, entry: &Arc<ShaderEntry>) {
        self.range_begin(entry);
        self.worker_loop(0);
        self.range_finished();
    }

    /// Compiles an entry's alive combos on a pool of scoped worker threads,
    /// joining them before returning.
    pub fn process_entry_parallel(&self, entry: &Arc<ShaderEntry>)
    where
        Self: Sync,
    {
        self.range_begin(entry);
        thread::scope(|scope| {
            for worker in 0..self.workers {
                scope.spawn(move || self.worker_loop(worker));
            }
        });
        self.range_finished();
    }

    fn range_begin(&self, entry: &Arc<ShaderEntry>) {
        let range = entry.command_start()..entry.command_end();
        self.ctx.with_accum(|a| a.register(entry.name()));
        let cursor = self
            .entries
            .next_alive_below(range.end)
            .filter(|h| h.command() >= range.start);
        debug!(
            shader = entry.name(),
            commands = range.end - range.start,
            "dispatching entry"
        );
        self.state.with(|s| {
            s.watermark = range.end;
            s.range = range;
            s.cursor = cursor;
            s.in_flight.fill(None);
        });
    }

    /// Seals whatever the watermark has not covered yet, down to the bottom
    /// of the range. Callers must have joined all workers first.
    fn range_finished(&self) {
        let window = self.state.with(|s| {
            debug_assert!(s.in_flight.iter().all(Option::is_none));
            let old = s.watermark;
            if s.range.start < old {
                s.watermark = s.range.start;
                Some((s.range.start, old))
            } else {
                None
            }
        });
        if let Some((lo, hi)) = window {
            self.package_range(lo, hi);
        }
    }

    fn worker_loop(&self, worker: usize) {
        loop {
            // Clone the shared cursor into a worker-local handle and advance
            // it, all under the dispatch lock.
            let handle = self.state.with(|s| {
                let handle = s.cursor.clone();
                match &handle {
                    Some(h) => {
                        s.in_flight[worker] = Some(h.command());
                        s.cursor = if h.command() > s.range.start {
                            self.entries
                                .next_alive_below(h.command())
                                .filter(|n| n.command() >= s.range.start)
                        } else {
                            None
                        };
                    }
                    None => s.in_flight[worker] = None,
                }
                handle
            });
            let Some(handle) = handle else { break };
            if self.ctx.stop().is_stopped() {
                // Give the claim back so stragglers cannot block packaging.
                self.state.with(|s| s.in_flight[worker] = None);
                break;
            }

            self.execute(&handle);
            self.state.with(|s| s.in_flight[worker] = None);
        }
    }

    fn execute(&self, handle: &ComboHandle) {
        let request = CompileRequest::from_handle(handle, self.options.flags);
        debug!(
            shader = handle.entry().name(),
            command = handle.command(),
            "running compile"
        );
        let response = self.compiler.execute(&request);
        self.handle_response(handle, response);
    }

    fn handle_response(&self, handle: &ComboHandle, response: CompileResponse) {
        let entry = handle.entry();
        let CompileResponse {
            succeeded,
            bytecode,
            listing,
        } = response;

        if succeeded {
            let (static_id, dynamic_id) = entry.split(handle.combo());
            self.ctx
                .with_accum(|a| a.add_dynamic(entry.name(), static_id, dynamic_id, bytecode));
        } else {
            self.ctx.with_accum(|a| a.mark_error(entry.name()));
        }

        // Process the listing even on success, for warnings.
        if listing.is_some() || !succeeded {
            let listing = listing.unwrap_or_else(|| {
                format!(
                    "{}(0,0): error 0000: Compiler failed without error description. Command number {}",
                    entry.source_file(),
                    handle.command()
                )
            });
            let command = handle.format_command();
            self.ctx
                .with_messages(|m| m.shader_mut(entry.name()).record_listing(&command, &listing));
        }
        if !succeeded && self.options.fast_fail {
            self.ctx.stop().stop();
        }

        self.progress.combo_finished(entry, handle.command());
        self.try_package(handle.command());
    }

    /// Advances the watermark if `cmd` closes the finished suffix, then
    /// seals the static combos the move uncovered.
    fn try_package(&self, cmd: u64) {
        let window = self.state.with(|s| {
            // A neighbor that started earlier (higher command) is still
            // running; it will trigger packaging when it lands.
            if s.in_flight.iter().flatten().any(|&running| running > cmd) {
                return None;
            }
            if cmd >= s.watermark {
                return None;
            }
            let old = s.watermark;
            s.watermark = cmd;
            Some((cmd, old))
        });
        if let Some((lo, hi)) = window {
            self.package_range(lo, hi);
        }
    }

    /// Seals every static combo whose lowest command number lies in
    /// `[lo, hi)`. Runs outside the dispatch lock; concurrent windows are
    /// disjoint, so no combo is sealed twice.
    fn package_range(&self, lo: u64, hi: u64) {
        let mut cmd = hi;
        while cmd > lo {
            let Some(entry) = self.entries.entry_for_command(cmd - 1) else {
                break;
            };
            let nd = entry.dynamic_combo_count();
            let local_lo = lo.max(entry.command_start()) - entry.command_start();
            let local_hi = cmd - entry.command_start();
            let first_static = local_lo.div_ceil(nd);
            let end_static = local_hi.div_ceil(nd);
            for static_id in first_static..end_static {
                self.seal_static_combo(entry, static_id);
            }
            cmd = entry.command_start();
        }
    }

    fn seal_static_combo(&self, entry: &Arc<ShaderEntry>, static_id: u64) {
        let Some(mut blocks) = self
            .ctx
            .with_accum(|a| a.take_raw_blocks(entry.name(), static_id))
        else {
            return;
        };
        blocks.sort_by_key(|b| b.dynamic_id);

        // Pack without holding any lock; only this call owns the blocks.
        let mut packer = BlockPacker::new();
        let packed = blocks
            .iter()
            .try_for_each(|block| {
                let dynamic_id = u32::try_from(block.dynamic_id).map_err(|_| {
                    shadercomp_vcs::VcsError::ComboIdTooLarge {
                        id: block.dynamic_id,
                    }
                })?;
                packer.push(dynamic_id, &block.bytes)
            })
            .and_then(|()| packer.finish());
        match packed {
            Ok(blob) => {
                debug!(
                    shader = entry.name(),
                    static_id,
                    dynamics = blocks.len(),
                    packed_len = blob.len(),
                    "sealed static combo"
                );
                self.ctx
                    .with_accum(|a| a.store_packed(entry.name(), static_id, blob));
            }
            Err(e) => {
                error!(
                    shader = entry.name(),
                    static_id,
                    "failed to pack static combo: {e}"
                );
                self.ctx.with_accum(|a| a.mark_error(entry.name()));
            }
        }
    }
}
