//! Planar compass directions used to link grid nodes to their 8 neighbors.

/// One of the 8 planar directions on the navigation lattice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dir {
    NORTH = 0,
    EAST = 1,
    SOUTH = 2,
    WEST = 3,
    NORTHEAST = 4,
    SOUTHEAST = 5,
    SOUTHWEST = 6,
    NORTHWEST = 7,
}

pub use self::Dir::*;

impl Dir {
    pub fn all() -> std::iter::Copied<std::slice::Iter<'static, Dir>> {
        [
            NORTH, EAST, SOUTH, WEST, NORTHEAST, SOUTHEAST, SOUTHWEST, NORTHWEST,
        ]
        .iter()
        .copied()
    }

    /// Lattice offset `(dx, dz)`. North is +z.
    pub fn vector(self) -> (i32, i32) {
        match self {
            NORTH => (0, 1),
            EAST => (1, 0),
            SOUTH => (0, -1),
            WEST => (-1, 0),
            NORTHEAST => (1, 1),
            SOUTHEAST => (1, -1),
            SOUTHWEST => (-1, -1),
            NORTHWEST => (-1, 1),
        }
    }

    pub fn is_diagonal(self) -> bool {
        let (dx, dz) = self.vector();
        dx != 0 && dz != 0
    }
}
