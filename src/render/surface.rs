//! Output surfaces for reply text

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Where revealed reply text lands
///
/// Surfaces take appends of already-ordered deltas. `replace` swaps the
/// whole visible reply, used when an error repaints it.
pub trait TextSurface: Send + Sync {
    /// Append a delta to the visible reply
    fn append(&self, delta: &str);

    /// Replace the visible reply outright
    fn replace(&self, text: &str);
}

/// Surface that writes to stdout as deltas arrive
pub struct TerminalSurface;

impl TextSurface for TerminalSurface {
    fn append(&self, delta: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    /// Terminals cannot erase committed output, so replacement starts a
    /// fresh line with the new text
    fn replace(&self, text: &str) {
        println!();
        println!("{text}");
    }
}

/// In-memory surface tracking the visible reply, for tests and capture
#[derive(Clone, Default)]
pub struct BufferSurface {
    text: Arc<Mutex<String>>,
}

impl BufferSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the currently visible text
    #[must_use]
    pub fn text(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TextSurface for BufferSurface {
    fn append(&self, delta: &str) {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(delta);
    }

    fn replace(&self, text: &str) {
        let mut visible = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        visible.clear();
        visible.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_surface_appends_in_order() {
        let surface = BufferSurface::new();
        surface.append("Hello ");
        surface.append("world");
        assert_eq!(surface.text(), "Hello world");
    }

    #[test]
    fn test_buffer_surface_replace_discards_previous() {
        let surface = BufferSurface::new();
        surface.append("partial repl");
        surface.replace("something went wrong");
        assert_eq!(surface.text(), "something went wrong");
    }

    #[test]
    fn test_clones_share_the_surface() {
        let surface = BufferSurface::new();
        let other = surface.clone();
        surface.append("shared");
        assert_eq!(other.text(), "shared");
    }
}
