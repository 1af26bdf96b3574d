use crate::error::{MachineError, Result};
use crate::shot::Shot;

/// Circular, non-empty sequence of shots played in Program mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotCycle {
    shots: Vec<Shot>,
    cursor: usize,
}

impl ShotCycle {
    pub fn new(shots: Vec<Shot>) -> Result<Self> {
        if shots.is_empty() {
            return Err(MachineError::Configuration(
                "shot cycle needs at least one shot".into(),
            ));
        }
        Ok(Self { shots, cursor: 0 })
    }

    /// Shot at the cursor, without advancing.
    pub fn peek_current(&self) -> &Shot {
        &self.shots[self.cursor]
    }

    /// Shot at the cursor; the cursor then moves on, wrapping past the end.
    pub fn advance_and_get(&mut self) -> &Shot {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.shots.len();
        &self.shots[index]
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.shots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shots.is_empty()
    }

    pub fn shots(&self) -> &[Shot] {
        &self.shots
    }
}
