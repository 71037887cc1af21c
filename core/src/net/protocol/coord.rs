//! Range-checked board coordinate

use crate::game::GRID_SIZE;

/// A board coordinate in `[0, 2]`
///
/// The only way to build one is [`Coord::new`] (or `TryFrom`), so a `Coord`
/// held by a message is always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord(u8);

impl Coord {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = (GRID_SIZE - 1) as u8;

    /// Returns `None` when `value` is outside `[MIN, MAX]`
    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// As a grid index
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Every valid coordinate, in order
    pub fn all() -> impl Iterator<Item = Coord> {
        (Self::MIN..=Self::MAX).map(Coord)
    }
}

impl TryFrom<u8> for Coord {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(value)
    }
}

impl TryFrom<usize> for Coord {
    type Error = usize;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(value)
    }
}

impl From<Coord> for u8 {
    fn from(coord: Coord) -> u8 {
        coord.0
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_bounds() {
        assert_eq!(Coord::new(0).map(Coord::get), Some(0));
        assert_eq!(Coord::new(2).map(Coord::get), Some(2));
        assert!(Coord::new(3).is_none());
        assert!(Coord::new(u8::MAX).is_none());
    }

    #[test]
    fn test_coord_try_from_usize() {
        assert_eq!(Coord::try_from(1usize).map(Coord::index), Ok(1));
        assert_eq!(Coord::try_from(300usize), Err(300));
    }

    #[test]
    fn test_coord_all() {
        let all: Vec<u8> = Coord::all().map(Coord::get).collect();
        assert_eq!(all, vec![0, 1, 2]);
    }
}
