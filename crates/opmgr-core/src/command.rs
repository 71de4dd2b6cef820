#![forbid(unsafe_code)]

//! Command descriptors.
//!
//! A [`Command`] is the static description shared by every operation of the
//! same kind: what a menu shows ("Undo Paste"), the help text, and the
//! shortcut. Commands carry no behavior.
//!
//! Kind ids come from a [`CommandRegistry`]. Registries are plain values so
//! that every manager owns its own counter.

use std::fmt;
use std::sync::Arc;

/// Stable numeric identifier for a command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKind(u32);

impl CommandKind {
    /// Create a kind from a raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

/// Immutable descriptor of a command kind.
///
/// Cloning is cheap: the strings are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    kind: CommandKind,
    name: Arc<str>,
    info: Arc<str>,
    shortcut: Arc<str>,
}

impl Command {
    /// Create a command with empty help text and no shortcut.
    #[must_use]
    pub fn new(kind: CommandKind, name: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            name: name.into(),
            info: Arc::from(""),
            shortcut: Arc::from(""),
        }
    }

    /// Set the help text.
    #[must_use]
    pub fn with_info(mut self, info: impl Into<Arc<str>>) -> Self {
        self.info = info.into();
        self
    }

    /// Set the menu shortcut, e.g. `"Ctrl+V"`.
    #[must_use]
    pub fn with_shortcut(mut self, shortcut: impl Into<Arc<str>>) -> Self {
        self.shortcut = shortcut.into();
        self
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Display name (e.g. "Paste").
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }

    /// Menu shortcut; empty when the command has none.
    #[must_use]
    pub fn shortcut(&self) -> &str {
        &self.shortcut
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Monotonic allocator for [`CommandKind`] ids.
///
/// Ids start at 1 and are never reused by the same registry.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    allocated: u32,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next kind id.
    pub fn allocate(&mut self) -> CommandKind {
        self.allocated += 1;
        CommandKind(self.allocated)
    }

    /// Allocate a kind and build its descriptor in one step.
    pub fn command(
        &mut self,
        name: impl Into<Arc<str>>,
        info: impl Into<Arc<str>>,
        shortcut: impl Into<Arc<str>>,
    ) -> Command {
        Command::new(self.allocate(), name)
            .with_info(info)
            .with_shortcut(shortcut)
    }

    /// Number of kinds handed out so far.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}
