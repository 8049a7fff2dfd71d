use crate::accum::Accumulators;
use crate::messages::MessageBags;
use crate::sync::{LockKind, SharedLock, StopSignal};

/// The owned, run-wide shared state: per-shader accumulators, diagnostic
/// bags and the stop flag.
///
/// Two locks mirror the two coarse critical sections of the pipeline: the
/// accumulator lock guards bytecode and the error/written sets, the message
/// lock guards diagnostic aggregation. Both are `LockKind`-selected so the
/// single-threaded build pays nothing for them.
pub struct BuildContext<K: LockKind> {
    accum: K::Lock<Accumulators>,
    messages: K::Lock<MessageBags>,
    stop: StopSignal,
}

impl<K: LockKind> BuildContext<K> {
    pub fn new(stop: StopSignal) -> BuildContext<K> {
        BuildContext {
            accum: K::Lock::new(Accumulators::new()),
            messages: K::Lock::new(MessageBags::new()),
            stop,
        }
    }

    pub fn stop(&self) -> &StopSignal {
        &self.stop
    }

    pub fn with_accum<R>(&self, f: impl FnOnce(&mut Accumulators) -> R) -> R {
        self.accum.with(f)
    }

    pub fn with_messages<R>(&self, f: impl FnOnce(&mut MessageBags) -> R) -> R {
        self.messages.with(f)
    }
}

impl<K: LockKind> Default for BuildContext<K> {
    fn default() -> BuildContext<K> {
        BuildContext::new(StopSignal::new())
    }
}
