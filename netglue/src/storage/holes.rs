//! A hole descriptor list, as in RFC 815.
//!
//! Tracks which byte ranges of a datagram are still missing. A fresh list contains a single hole
//! reaching to infinity. Each received range is punched out of the holes it overlaps, which leaves
//! at most two remainders per hole. The list is complete once the end of the datagram is known and
//! no hole remains.
use core::fmt;

/// Marker for the end of the unbounded trailing hole.
pub const INFINITY: u32 = u32::max_value();

/// A contiguous range of absent data, `first..end`.
///
/// An `end` of [`INFINITY`] marks the trailing hole of a datagram whose length is not yet known.
///
/// [`INFINITY`]: constant.INFINITY.html
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Hole {
    first: u32,
    end: u32,
}

/// The sorted list of holes of one datagram.
///
/// Holes are kept sorted by offset and never overlap or touch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoleList {
    holes: Vec<Hole>,
}

impl Hole {
    /// Create a hole covering `first..end`.
    pub fn new(first: u32, end: u32) -> Self {
        debug_assert!(first < end);
        Hole { first, end }
    }

    /// The first missing byte.
    pub fn first(&self) -> u32 {
        self.first
    }

    /// One past the last missing byte.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Whether the end of this hole is not yet known.
    pub fn is_unbounded(&self) -> bool {
        self.end == INFINITY
    }

    fn overlaps(&self, first: u32, end: u32) -> bool {
        first < self.end && self.first < end
    }
}

impl fmt::Display for Hole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "[{}..)", self.first)
        } else {
            write!(f, "[{}..{})", self.first, self.end)
        }
    }
}

impl fmt::Display for HoleList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ ")?;
        for hole in self.holes.iter() {
            write!(f, "{} ", hole)?;
        }
        write!(f, "]")
    }
}

impl Default for HoleList {
    fn default() -> Self {
        HoleList::new()
    }
}

impl HoleList {
    /// A list for a datagram of which nothing was received yet.
    pub fn new() -> Self {
        HoleList {
            holes: vec![Hole::new(0, INFINITY)],
        }
    }

    /// Whether no byte is missing anymore.
    ///
    /// Note that this can only happen after the length was fixed with [`truncate`].
    ///
    /// [`truncate`]: #method.truncate
    pub fn is_empty(&self) -> bool {
        self.holes.is_empty()
    }

    /// The number of holes.
    pub fn len(&self) -> usize {
        self.holes.len()
    }

    /// Iterate over all holes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item=&Hole> + '_ {
        self.holes.iter()
    }

    /// Mark the range `first..end` as received.
    ///
    /// Returns the sub-ranges that were previously missing, in ascending order. Bytes of the range
    /// that were already received are not part of the result, the first arrival of each byte
    /// stays the one that counts.
    ///
    /// ## Example
    ///
    /// ```
    /// # use netglue::storage::HoleList;
    /// let mut holes = HoleList::new();
    /// assert_eq!(holes.fill(4, 8), vec![(4, 8)]);
    /// // Only the front was missing.
    /// assert_eq!(holes.fill(0, 6), vec![(0, 4)]);
    /// ```
    pub fn fill(&mut self, first: u32, end: u32) -> Vec<(u32, u32)> {
        let mut covered = Vec::new();
        if first >= end {
            return covered;
        }

        // Untouched holes before the range stay where they are.
        let start = self.holes
            .iter()
            .position(|hole| hole.end > first)
            .unwrap_or(self.holes.len());

        let mut idx = start;
        let mut replacement = Vec::with_capacity(2);
        while idx < self.holes.len() && self.holes[idx].overlaps(first, end) {
            let hole = self.holes[idx];
            covered.push((hole.first.max(first), hole.end.min(end)));

            if hole.first < first {
                replacement.push(Hole::new(hole.first, first));
            }

            if end < hole.end {
                replacement.push(Hole::new(end, hole.end));
            }

            idx += 1;
        }

        self.holes.splice(start..idx, replacement);
        self.debug_check();
        covered
    }

    /// Fix the length of the datagram.
    ///
    /// Removes all holes beyond `len` and shortens the one containing it. It is the caller's job
    /// to ensure that no data beyond `len` was received before.
    pub fn truncate(&mut self, len: u32) {
        self.holes.retain(|hole| hole.first < len);
        if let Some(last) = self.holes.last_mut() {
            last.end = last.end.min(len);
        }
        self.debug_check();
    }

    /// The lowest offset that is still covered by the unbounded hole, if there is one.
    pub fn unbounded_from(&self) -> Option<u32> {
        self.holes
            .last()
            .filter(|hole| hole.is_unbounded())
            .map(|hole| hole.first)
    }

    /// Check that holes are sorted, non-empty and pairwise separated.
    pub fn is_well_formed(&self) -> bool {
        self.holes.iter().all(|hole| hole.first < hole.end)
            && self.holes.windows(2).all(|pair| pair[0].end < pair[1].first)
    }

    fn debug_check(&self) {
        debug_assert!(self.is_well_formed(), "Hole list corrupted: {}", self);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! holes {
        [$( ($first:expr, $end:expr) ),*] => ({
            HoleList { holes: vec![$( Hole::new($first, $end) ),*] }
        })
    }

    #[test]
    fn test_fill_front() {
        let mut list = HoleList::new();
        assert_eq!(list.fill(0, 16), vec![(0, 16)]);
        assert_eq!(list, holes![(16, INFINITY)]);
    }

    #[test]
    fn test_fill_mid() {
        let mut list = HoleList::new();
        assert_eq!(list.fill(4, 8), vec![(4, 8)]);
        assert_eq!(list, holes![(0, 4), (8, INFINITY)]);
    }

    #[test]
    fn test_fill_exact_hole() {
        let mut list = holes![(0, 4), (8, 12)];
        assert_eq!(list.fill(0, 4), vec![(0, 4)]);
        assert_eq!(list, holes![(8, 12)]);
    }

    #[test]
    fn test_fill_spanning_holes() {
        let mut list = holes![(2, 4), (6, 8), (10, 12)];
        assert_eq!(list.fill(0, 11), vec![(2, 4), (6, 8), (10, 11)]);
        assert_eq!(list, holes![(11, 12)]);
    }

    #[test]
    fn test_fill_duplicate() {
        let mut list = holes![(8, INFINITY)];
        assert_eq!(list.fill(0, 8), vec![]);
        assert_eq!(list, holes![(8, INFINITY)]);
    }

    #[test]
    fn test_fill_overlap_back() {
        let mut list = holes![(0, 4), (8, INFINITY)];
        assert_eq!(list.fill(2, 10), vec![(2, 4), (8, 10)]);
        assert_eq!(list, holes![(0, 2), (10, INFINITY)]);
    }

    #[test]
    fn test_fill_empty_range() {
        let mut list = HoleList::new();
        assert_eq!(list.fill(4, 4), vec![]);
        assert_eq!(list, HoleList::new());
    }

    #[test]
    fn test_truncate() {
        let mut list = holes![(0, 4), (8, 12), (16, INFINITY)];
        list.truncate(10);
        assert_eq!(list, holes![(0, 4), (8, 10)]);
        assert_eq!(list.unbounded_from(), None);
    }

    #[test]
    fn test_truncate_closes() {
        let mut list = holes![(16, INFINITY)];
        list.truncate(16);
        assert!(list.is_empty());
    }

    #[test]
    fn test_unbounded_from() {
        let list = holes![(0, 4), (16, INFINITY)];
        assert_eq!(list.unbounded_from(), Some(16));
    }

    #[test]
    fn test_well_formed_after_each_fill() {
        let mut list = HoleList::new();
        let ranges = [(40, 48), (0, 8), (4, 20), (30, 41), (8, 9), (60, 64), (19, 31)];
        for &(first, end) in ranges.iter() {
            list.fill(first, end);
            assert!(list.is_well_formed(), "{}", list);
        }
        assert_eq!(list, holes![(48, 60), (64, INFINITY)]);
    }

    #[test]
    fn test_display() {
        let list = holes![(0, 4), (8, INFINITY)];
        assert_eq!(format!("{}", list), "[ [0..4) [8..) ]");
    }
}
