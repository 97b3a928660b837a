// src/commit/token.rs

use crate::types::AttemptId;

/// Single-writer "output committed" flag of one task.
///
/// Once set it is never cleared or handed to another attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitToken {
    holder: Option<AttemptId>,
}

impl CommitToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self) -> Option<AttemptId> {
        self.holder
    }

    pub fn is_set(&self) -> bool {
        self.holder.is_some()
    }

    /// Take the token for `attempt`. Re-acquiring by the holder is a no-op;
    /// any other attempt gets the holder back as `Err`.
    pub fn try_acquire(&mut self, attempt: AttemptId) -> Result<(), AttemptId> {
        match self.holder {
            None => {
                self.holder = Some(attempt);
                Ok(())
            }
            Some(holder) if holder == attempt => Ok(()),
            Some(holder) => Err(holder),
        }
    }
}
