//! Keyset pagination cursors.
//!
//! Document selection pages through `(created_at DESC, id DESC)`. A cursor
//! captures the sort key of the last row of a page so the next page starts
//! strictly after it, which keeps pagination stable under concurrent inserts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position after the last row of a page, ordered by `(created_at, id)` descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl PageCursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    /// Returns true when a row with the given key sorts strictly after this cursor.
    pub fn precedes(&self, created_at: DateTime<Utc>, id: Uuid) -> bool {
        created_at < self.created_at || (created_at == self.created_at && id < self.id)
    }
}
