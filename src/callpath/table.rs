use super::frame::{FrameDescriptor, RawFrame};
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Small integer identity of a unique call path within one table
///
/// Ids are assigned in first-seen order and never reused. They are stable for
/// the lifetime of the table, not across processes or runs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CallPathId(pub u32);

impl CallPathId {
    /// Id of the empty path, present in every table
    pub const EMPTY: CallPathId = CallPathId(0);

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallPathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path#{}", self.0)
    }
}

/// Ordered frames from outermost to innermost
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CallPath {
    frames: Vec<FrameDescriptor>,
}

impl CallPath {
    pub fn new(frames: Vec<FrameDescriptor>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                write!(f, " : ")?;
            }
            write!(f, "{}", frame)?;
        }
        Ok(())
    }
}

/// Deduplicating table of call paths
///
/// Module names are interned so every frame from one module shares a single
/// allocation, and each structurally distinct path gets one [`CallPathId`].
#[derive(Debug)]
pub struct CallPathTable {
    modules: FnvHashSet<Arc<str>>,
    ids: FnvHashMap<CallPath, CallPathId>,
    paths: Vec<CallPath>,
    walks: u64,
    bad_walks: u64,
}

impl Default for CallPathTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CallPathTable {
    pub fn new() -> Self {
        let mut table = Self {
            modules: FnvHashSet::default(),
            ids: FnvHashMap::default(),
            paths: Vec::new(),
            walks: 0,
            bad_walks: 0,
        };
        let empty = table.intern(CallPath::default());
        debug_assert_eq!(empty, CallPathId::EMPTY);
        table
    }

    /// Shared module name, inserting it on first sight
    pub fn module_for(&mut self, name: &str) -> Arc<str> {
        if let Some(existing) = self.modules.get(name) {
            return Arc::clone(existing);
        }
        let module: Arc<str> = Arc::from(name);
        self.modules.insert(Arc::clone(&module));
        module
    }

    /// Build a descriptor for a raw frame, sharing its module name
    pub fn descriptor(&mut self, raw: &RawFrame) -> FrameDescriptor {
        FrameDescriptor::new(
            self.module_for(&raw.module),
            raw.offset,
            raw.file.clone(),
            raw.line,
            raw.symbol.clone(),
        )
    }

    /// Resolve a stack walk to its stable id, assigning one on first sight
    pub fn resolve(&mut self, raw_frames: &[RawFrame]) -> CallPathId {
        let frames = raw_frames.iter().map(|raw| self.descriptor(raw)).collect();
        self.intern(CallPath::new(frames))
    }

    /// Dedup an already-built path
    pub fn intern(&mut self, path: CallPath) -> CallPathId {
        if let Some(id) = self.ids.get(&path) {
            return *id;
        }
        let id = CallPathId(self.paths.len() as u32);
        tracing::trace!(%id, frames = path.len(), "new call path");
        self.paths.push(path.clone());
        self.ids.insert(path, id);
        id
    }

    pub fn get(&self, id: CallPathId) -> Option<&CallPath> {
        self.paths.get(id.0 as usize)
    }

    /// Number of unique paths, including the empty path
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Always false: the empty path is present from construction
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Count one stack walk; `bad` marks walks that resolved no symbols
    pub fn note_walk(&mut self, bad: bool) {
        self.walks += 1;
        if bad {
            self.bad_walks += 1;
        }
    }

    pub fn walks(&self) -> u64 {
        self.walks
    }

    pub fn bad_walks(&self) -> u64 {
        self.bad_walks
    }

    pub fn iter(&self) -> impl Iterator<Item = (CallPathId, &CallPath)> {
        self.paths
            .iter()
            .enumerate()
            .map(|(i, p)| (CallPathId(i as u32), p))
    }

    /// Write every known path, one header line per id and one line per frame
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let file_width = self
            .paths
            .iter()
            .flat_map(|p| p.frames())
            .map(|f| match (f.source_file(), f.line_number()) {
                (Some(file), Some(line)) => file.len() + 1 + line.to_string().len(),
                (Some(file), None) => file.len() + 1,
                _ => super::frame::UNKNOWN.len(),
            })
            .max()
            .unwrap_or(0)
            + 2;
        let sym_width = self
            .paths
            .iter()
            .flat_map(|p| p.frames())
            .map(|f| f.symbol_name().map_or(0, str::len))
            .max()
            .unwrap_or(0)
            .max(super::frame::UNKNOWN.len())
            + 2;

        for (id, path) in self.iter() {
            writeln!(out, "{} ({} frames)", id, path.len())?;
            for frame in path.frames() {
                writeln!(out, "    {}", frame.render(file_width, sym_width))?;
            }
        }
        Ok(())
    }
}
