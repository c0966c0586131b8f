//! Globally unique object identity

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// 64-bit object identity made of two random 32-bit halves
///
/// Ordering is lexicographic on `(high, low)`, which gives deterministic
/// iteration over identity tables. On the wire the low half is written first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetworkId {
    high: i32,
    low: i32,
}

impl NetworkId {
    /// "No object" / "no prefab" sentinel used by pre-placed scene objects
    pub const EMPTY: NetworkId = NetworkId { high: 0, low: 0 };

    pub const fn from_parts(high: i32, low: i32) -> Self {
        Self { high, low }
    }

    /// Draws two independent uniform random halves
    ///
    /// Collisions are unlikely but possible; use [`NetworkId::new_unique`]
    /// whenever a table of live ids is at hand.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            high: rng.gen(),
            low: rng.gen(),
        }
    }

    /// Re-rolls until `taken` reports the id as free. Never yields `EMPTY`.
    pub fn new_unique(mut taken: impl FnMut(&NetworkId) -> bool) -> Self {
        loop {
            let id = Self::new();
            if !id.is_empty() && !taken(&id) {
                return id;
            }
            log::debug!("NetworkId collision on {}, re-rolling", id);
        }
    }

    pub fn high(&self) -> i32 {
        self.high
    }

    pub fn low(&self) -> i32 {
        self.low
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn to_u64(self) -> u64 {
        ((self.high as u32 as u64) << 32) | self.low as u32 as u64
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            high: (value >> 32) as u32 as i32,
            low: value as u32 as i32,
        }
    }
}

impl Ord for NetworkId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.high
            .cmp(&other.high)
            .then_with(|| self.low.cmp(&other.low))
    }
}

impl PartialOrd for NetworkId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}{:08x}", self.high as u32, self.low as u32)
    }
}

impl Serialize for NetworkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.low, self.high).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NetworkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (low, high) = <(i32, i32)>::deserialize(deserializer)?;
        Ok(Self { high, low })
    }
}
