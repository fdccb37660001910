use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Placeholder rendered for frames whose source location is unknown
pub const UNKNOWN: &str = "[unknown]";

/// Module name used when a stack walk cannot identify the loaded module
pub const UNKNOWN_MODULE: &str = "[unknown module]";

/// One frame as reported by a stack walk, before interning
///
/// Any of the symbolic fields may be missing when the walker could not
/// resolve them; that is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawFrame {
    /// Loadable module the address belongs to
    pub module: String,
    /// Return address relative to the module's load base
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl RawFrame {
    /// Frame with only a module and offset (nothing symbolic resolved)
    pub fn unresolved(module: impl Into<String>, offset: u64) -> Self {
        Self {
            module: module.into(),
            offset,
            symbol: None,
            file: None,
            line: None,
        }
    }

    /// Frame with full symbol and source information
    pub fn resolved(
        module: impl Into<String>,
        offset: u64,
        symbol: impl Into<String>,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            module: module.into(),
            offset,
            symbol: Some(symbol.into()),
            file: Some(file.into()),
            line: Some(line),
        }
    }
}

/// Immutable description of one stack frame
///
/// The module name is shared (`Arc<str>`) with every other frame from the
/// same module in the owning [`CallPathTable`](super::CallPathTable).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameDescriptor {
    module: Arc<str>,
    code_offset: u64,
    source_file: Option<String>,
    line_number: Option<u32>,
    symbol_name: Option<String>,
}

impl FrameDescriptor {
    pub fn new(
        module: Arc<str>,
        code_offset: u64,
        source_file: Option<String>,
        line_number: Option<u32>,
        symbol_name: Option<String>,
    ) -> Self {
        Self {
            module,
            code_offset,
            source_file,
            line_number,
            symbol_name,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    #[cfg(test)]
    pub(crate) fn module_arc(&self) -> &Arc<str> {
        &self.module
    }

    pub fn code_offset(&self) -> u64 {
        self.code_offset
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    pub fn line_number(&self) -> Option<u32> {
        self.line_number
    }

    pub fn symbol_name(&self) -> Option<&str> {
        self.symbol_name.as_deref()
    }

    /// Render as fixed-width columns: `file:line`, symbol, then `module(0xoff)`
    ///
    /// Frames without a source file render `[unknown]` in both the
    /// file/line and symbol columns.
    pub fn render(&self, file_line_width: usize, sym_width: usize) -> String {
        let (file_line, symbol) = match &self.source_file {
            None => (UNKNOWN.to_string(), UNKNOWN),
            Some(file) => {
                let line = self
                    .line_number
                    .map(|l| l.to_string())
                    .unwrap_or_default();
                (
                    format!("{}:{}", file, line),
                    self.symbol_name.as_deref().unwrap_or(""),
                )
            }
        };
        format!(
            "{:<fw$}{:<sw$}{}(0x{:x})",
            file_line,
            symbol,
            self.module,
            self.code_offset,
            fw = file_line_width,
            sw = sym_width
        )
    }
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:x})", self.module, self.code_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(file: Option<&str>, line: Option<u32>, sym: Option<&str>) -> FrameDescriptor {
        FrameDescriptor::new(
            Arc::from("mod1"),
            0x10,
            file.map(String::from),
            line,
            sym.map(String::from),
        )
    }

    #[test]
    fn test_render_resolved_frame_in_order() {
        let rendered = frame(Some("a.c"), Some(5), Some("foo")).render(12, 8);

        let file_pos = rendered.find("a.c:5").unwrap();
        let sym_pos = rendered.find("foo").unwrap();
        let mod_pos = rendered.find("mod1").unwrap();
        let off_pos = rendered.find("(0x10)").unwrap();
        assert!(file_pos < sym_pos);
        assert!(sym_pos < mod_pos);
        assert!(mod_pos < off_pos);
        assert_eq!(rendered, "a.c:5       foo     mod1(0x10)");
    }

    #[test]
    fn test_render_unknown_file_uses_sentinel_twice() {
        let rendered = frame(None, None, Some("ignored")).render(10, 10);
        assert_eq!(rendered, "[unknown] [unknown] mod1(0x10)");
        assert!(!rendered.contains("ignored"));
        assert_eq!(rendered.matches(UNKNOWN).count(), 2);
    }

    #[test]
    fn test_render_narrow_widths_do_not_truncate() {
        let rendered = frame(Some("long_file.c"), Some(120), Some("symbol")).render(0, 0);
        assert_eq!(rendered, "long_file.c:120symbolmod1(0x10)");
    }

    #[test]
    fn test_display_is_module_and_offset() {
        assert_eq!(frame(None, None, None).to_string(), "mod1(0x10)");
    }

    #[test]
    fn test_frames_differing_only_in_symbol_are_distinct() {
        let a = frame(Some("a.c"), Some(5), Some("foo"));
        let b = frame(Some("a.c"), Some(5), None);
        assert_ne!(a, b);
    }
}
