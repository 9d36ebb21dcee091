//! What a connected peer is allowed to do.

use std::fmt;
use std::ops::BitOr;

/// Bitmask of granted capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(u8);

impl Permissions {
    /// No access; the connection is refused.
    pub const NONE: Permissions = Permissions(0);
    /// Peer may receive our bundles (and is greeted).
    pub const READ: Permissions = Permissions(1);
    /// Peer may send us bundles.
    pub const WRITE: Permissions = Permissions(2);
    /// Peer may cause new containers to be made on its behalf.
    pub const MAKE: Permissions = Permissions(4);
    /// Everything.
    pub const ALL: Permissions = Permissions(7);

    /// From a raw bitmask; unknown bits are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        Permissions(bits & Self::ALL.0)
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every capability in `other` is granted.
    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when nothing is granted.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |p: Permissions, c: char| if self.contains(p) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Self::READ, 'r'),
            flag(Self::WRITE, 'w'),
            flag(Self::MAKE, 'm')
        )
    }
}
