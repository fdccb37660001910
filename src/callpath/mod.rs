//! Call-path identity for tagging effort samples
//!
//! A call path is the ordered list of frames (outermost first) active when an
//! effort sample is recorded. Paths are compared structurally over every
//! field of every frame, and a [`CallPathTable`] hands out a small, stable
//! [`CallPathId`] the first time each distinct path is seen.
//!
//! ```
//! use libra_effort::callpath::{CallPathTable, RawFrame};
//!
//! let mut table = CallPathTable::new();
//! let walk = vec![
//!     RawFrame::resolved("app", 0x40, "main", "main.c", 12),
//!     RawFrame::unresolved("libsolver.so", 0x1f0),
//! ];
//! let id = table.resolve(&walk);
//! assert_eq!(table.resolve(&walk), id);
//! ```

mod frame;
mod table;
mod unwind;

pub use frame::{FrameDescriptor, RawFrame, UNKNOWN, UNKNOWN_MODULE};
pub use table::{CallPath, CallPathId, CallPathTable};
pub use unwind::{capture_raw_frames, chop_runtime_frames, StackWalk, MAX_STACK_DEPTH};
