//! Processing cursor storage

use std::sync::Mutex;

use crate::error::Result;
use crate::types::ProcessingCursor;

/// Get/set access to the single processing cursor.
///
/// Read at the start of each polling pass and written after it with the
/// cursor returned by the classifier.
pub trait CursorStore {
    fn load_cursor(&self) -> Result<Option<ProcessingCursor>>;

    fn save_cursor(&self, cursor: &ProcessingCursor) -> Result<()>;

    /// Forget the cursor. Returns whether one was stored.
    fn clear_cursor(&self) -> Result<bool>;
}

/// Cursor held in memory only, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: Mutex<Option<ProcessingCursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing cursor
    pub fn with_cursor(cursor: Option<ProcessingCursor>) -> Self {
        Self {
            cursor: Mutex::new(cursor),
        }
    }
}

impl CursorStore for MemoryCursorStore {
    fn load_cursor(&self) -> Result<Option<ProcessingCursor>> {
        Ok(self.cursor.lock().unwrap().clone())
    }

    fn save_cursor(&self, cursor: &ProcessingCursor) -> Result<()> {
        *self.cursor.lock().unwrap() = Some(cursor.clone());
        Ok(())
    }

    fn clear_cursor(&self) -> Result<bool> {
        Ok(self.cursor.lock().unwrap().take().is_some())
    }
}
