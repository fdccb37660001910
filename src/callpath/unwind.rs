//! Live stack walking for call-path capture
//!
//! Walks the calling thread's stack with the `backtrace` crate and turns each
//! frame into a [`RawFrame`]. A frame's module identity is the load base of
//! the module containing it (rendered as hex), and its offset is the
//! instruction pointer relative to that base. Offsets survive ASLR but load
//! bases do not, so identities only compare within one process.
//!
//! Symbol resolution is best effort. Frames whose symbol, file or line cannot
//! be resolved keep those fields empty and render with the `[unknown]`
//! sentinel; they still participate in call-path identity.

use super::frame::{RawFrame, UNKNOWN_MODULE};

/// Maximum stack depth to unwind (prevent runaway walks)
pub const MAX_STACK_DEPTH: usize = 64;

/// Symbols marking language-runtime startup frames
const RUNTIME_MARKERS: &[&str] = &[
    "__libc_start_main",
    "__libc_start_call_main",
    "std::rt::lang_start",
    "_start",
];

/// Result of one stack walk
#[derive(Debug, Clone, Default)]
pub struct StackWalk {
    /// Frames ordered outermost first
    pub frames: Vec<RawFrame>,
    /// True when no frame had a resolvable symbol
    pub unresolved: bool,
}

/// Capture the current thread's call stack
///
/// `skip` drops that many innermost frames (the instrumentation's own
/// frames). The returned frames are ordered from outermost to innermost.
pub fn capture_raw_frames(skip: usize) -> StackWalk {
    let mut innermost_first = Vec::with_capacity(16);
    // The closure below is itself a frame of this function's callee chain.
    let mut to_skip = skip + 1;

    backtrace::trace(|frame| {
        if to_skip > 0 {
            to_skip -= 1;
            return true;
        }

        let ip = frame.ip() as u64;
        let (module, offset) = match frame.module_base_address() {
            Some(base) if !base.is_null() => {
                let base = base as u64;
                (format!("0x{:x}", base), ip.wrapping_sub(base))
            }
            _ => (UNKNOWN_MODULE.to_string(), ip),
        };

        let mut raw = RawFrame::unresolved(module, offset);
        backtrace::resolve_frame(frame, |symbol| {
            if raw.symbol.is_none() {
                raw.symbol = symbol.name().map(|n| n.to_string());
            }
            if raw.file.is_none() {
                raw.file = symbol.filename().map(|p| p.display().to_string());
                raw.line = symbol.lineno();
            }
        });

        innermost_first.push(raw);
        innermost_first.len() < MAX_STACK_DEPTH
    });

    let unresolved = innermost_first.iter().all(|f| f.symbol.is_none());
    if unresolved {
        tracing::debug!(depth = innermost_first.len(), "stack walk resolved no symbols");
    }

    innermost_first.reverse();
    StackWalk {
        frames: innermost_first,
        unresolved,
    }
}

/// Drop language-runtime startup frames from the outer end of a walk
///
/// Everything outside (and including) the innermost runtime-start frame is
/// removed, so paths begin at the program's own entry point. Walks without a
/// runtime frame are left unchanged.
pub fn chop_runtime_frames(frames: &mut Vec<RawFrame>) {
    let last_runtime = frames.iter().rposition(|f| {
        f.symbol
            .as_deref()
            .is_some_and(|s| RUNTIME_MARKERS.iter().any(|m| s.starts_with(m)))
    });
    if let Some(pos) = last_runtime {
        frames.drain(..=pos);
    }
}
