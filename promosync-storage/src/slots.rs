//! Replica slot roles and the three-way rotation.

use promosync_core::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three physical replica tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
    C,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::A, Slot::B, Slot::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::A => "a",
            Slot::B => "b",
            Slot::C => "c",
        }
    }

    /// Physical table backing this slot.
    pub fn table(&self) -> &'static str {
        match self {
            Slot::A => "promotions_slot_a",
            Slot::B => "promotions_slot_b",
            Slot::C => "promotions_slot_c",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
            Slot::C => 2,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Slot::A),
            "b" => Ok(Slot::B),
            "c" => Ok(Slot::C),
            other => Err(StorageError::Query {
                operation: "parse_slot",
                reason: format!("unknown replica slot '{}'", other),
            }),
        }
    }
}

/// Role assignment of the three slots. Exactly one slot is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub live: Slot,
    pub shadow: Slot,
    pub retired: Slot,
    pub generation: i64,
}

impl Default for SlotAssignment {
    fn default() -> Self {
        Self::initial()
    }
}

impl SlotAssignment {
    /// Assignment written by the replica migrations.
    pub fn initial() -> Self {
        Self {
            live: Slot::A,
            shadow: Slot::B,
            retired: Slot::C,
            generation: 0,
        }
    }

    /// Assignment after promoting the shadow slot:
    /// live becomes retired, shadow becomes live, retired becomes shadow.
    pub fn rotated(&self) -> Self {
        Self {
            live: self.shadow,
            shadow: self.retired,
            retired: self.live,
            generation: self.generation + 1,
        }
    }

    /// Check that the three roles name three distinct slots.
    pub fn is_valid(&self) -> bool {
        self.live != self.shadow && self.shadow != self.retired && self.live != self.retired
    }
}

impl fmt::Display for SlotAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gen {} (live={}, shadow={}, retired={})",
            self.generation, self.live, self.shadow, self.retired
        )
    }
}
