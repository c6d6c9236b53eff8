//! Stack traces
//!
//! `std::backtrace::Backtrace` only exposes its frames through `Display`, so
//! a capture is rendered once and parsed back into [`Frame`]s. Frames that
//! belong to the standard library, the unwinder or this crate's own capture
//! path are dropped.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::LazyLock;

static FRAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+:\s+(.+?)\s*$").expect("valid frame regex"));

static LOCATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at\s+(.+?):(\d+)(?::(\d+))?\s*$").expect("valid location regex")
});

/// Symbol prefixes that never point at application code
const RUNTIME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "__rust",
    "rust_begin_unwind",
    "rust_panic",
    "__libc_start",
    "_start",
    "backtrace::",
    "catcher_core::trace::",
    "catcher_core::fault::",
    "catcher_core::hook::",
];

/// One frame of a stack trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Demangled function path
    pub function: String,
    /// Source file, when debug info is available
    pub file: Option<String>,
    /// Source line
    pub line: Option<u32>,
    /// Source column
    pub column: Option<u32>,
}

impl Frame {
    /// Create a frame with no location
    #[must_use]
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    /// Attach a source location
    #[must_use]
    pub fn at(mut self, file: impl Into<String>, line: u32, column: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self.column = column;
        self
    }

    fn is_runtime(&self) -> bool {
        RUNTIME_PREFIXES
            .iter()
            .any(|prefix| self.function.starts_with(prefix))
            || self.function.contains(" as core::ops::function::")
    }
}

/// Ordered frames, innermost first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTrace {
    frames: Vec<Frame>,
}

impl StackTrace {
    /// Capture the current thread's stack regardless of `RUST_BACKTRACE`
    #[must_use]
    pub fn capture() -> Self {
        Self::parse(&Backtrace::force_capture().to_string())
    }

    /// Build a trace from explicit frames
    #[must_use]
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Parse the `Display` rendering of a `std::backtrace::Backtrace`
    #[must_use]
    pub fn parse(rendered: &str) -> Self {
        let mut frames: Vec<Frame> = Vec::new();

        for line in rendered.lines() {
            if let Some(caps) = LOCATION_LINE.captures(line) {
                if let Some(frame) = frames.last_mut() {
                    if frame.file.is_none() {
                        frame.file = Some(caps[1].to_string());
                        frame.line = caps[2].parse().ok();
                        frame.column = caps.get(3).and_then(|c| c.as_str().parse().ok());
                    }
                }
            } else if let Some(caps) = FRAME_LINE.captures(line) {
                frames.push(Frame::new(&caps[1]));
            }
        }

        frames.retain(|frame| !frame.is_runtime());
        Self { frames }
    }

    /// Put a frame on top of the trace (the innermost position)
    pub fn push_innermost(&mut self, frame: Frame) {
        self.frames.insert(0, frame);
    }

    /// Frames, innermost first
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Whether no application frame survived capture
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, frame) in self.frames.iter().enumerate() {
            writeln!(f, "{index:>4}: {}", frame.function)?;
            if let (Some(file), Some(line)) = (&frame.file, frame.line) {
                match frame.column {
                    Some(column) => writeln!(f, "             at {file}:{line}:{column}")?,
                    None => writeln!(f, "             at {file}:{line}")?,
                }
            }
        }
        Ok(())
    }
}
