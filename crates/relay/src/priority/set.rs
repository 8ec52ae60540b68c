const ABSENT: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PrioritySetError {
    #[error("index {0} is already in the set")]
    AlreadyPresent(u32),
    #[error("index {0} is not in the set")]
    NotPresent(u32),
    #[error("index {index} exceeds capacity {capacity}")]
    OutOfCapacity { index: u32, capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityItem {
    pub index: u32,
    pub priority: f32,
}

/// Sparse set of integer indices carrying an accumulated send priority.
///
/// `slots[index]` holds the position of `index` inside `items`, so membership
/// tests, lookups and removals are O(1). The live slice is fully resorted
/// once per tick with [`PrioritySet::sort`] and then consumed front to back
/// with [`PrioritySet::pop`].
#[derive(Debug, Clone, Default)]
pub struct PrioritySet {
    slots: Vec<u32>,
    items: Vec<PriorityItem>,
    sorted: bool,
    cursor: usize,
}

impl PrioritySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut set = Self::new();
        set.ensure_capacity(capacity);
        set
    }

    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.slots.len() {
            self.slots.resize(capacity, ABSENT);
            self.items.reserve(capacity - self.items.len());
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.position(index).is_some()
    }

    pub fn priority(&self, index: u32) -> Option<f32> {
        self.position(index).map(|pos| self.items[pos].priority)
    }

    pub fn add(&mut self, index: u32) -> Result<(), PrioritySetError> {
        let capacity = self.slots.len();
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(PrioritySetError::OutOfCapacity { index, capacity })?;
        if *slot != ABSENT {
            return Err(PrioritySetError::AlreadyPresent(index));
        }

        *slot = self.items.len() as u32;
        self.items.push(PriorityItem {
            index,
            priority: 0.0,
        });
        self.sorted = false;
        Ok(())
    }

    pub fn remove(&mut self, index: u32) -> Result<(), PrioritySetError> {
        let pos = self
            .position(index)
            .ok_or(PrioritySetError::NotPresent(index))?;

        self.items.swap_remove(pos);
        if let Some(moved) = self.items.get(pos) {
            self.slots[moved.index as usize] = pos as u32;
        }
        self.slots[index as usize] = ABSENT;
        self.sorted = false;
        Ok(())
    }

    pub fn age_all(&mut self, delta: f32) {
        for item in &mut self.items {
            item.priority += delta;
        }
    }

    pub fn bump(&mut self, index: u32, delta: f32) -> Result<(), PrioritySetError> {
        let pos = self
            .position(index)
            .ok_or(PrioritySetError::NotPresent(index))?;
        self.items[pos].priority += delta;
        Ok(())
    }

    /// Orders the live slice by descending priority and rewinds the
    /// consumption cursor. Equal priorities keep no particular order.
    pub fn sort(&mut self) {
        self.items
            .sort_unstable_by(|a, b| b.priority.total_cmp(&a.priority));
        for (pos, item) in self.items.iter().enumerate() {
            self.slots[item.index as usize] = pos as u32;
        }
        self.sorted = true;
        self.cursor = 0;
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Reads the `rank`-th largest item of the last sort.
    pub fn peek(&self, rank: usize) -> Option<PriorityItem> {
        debug_assert!(self.sorted, "peek on an unsorted priority set");
        if !self.sorted {
            return None;
        }
        self.items.get(rank).copied()
    }

    pub fn peek_next(&self) -> Option<PriorityItem> {
        if self.sorted {
            self.items.get(self.cursor).copied()
        } else {
            None
        }
    }

    pub fn remaining(&self) -> usize {
        if self.sorted {
            self.items.len() - self.cursor
        } else {
            0
        }
    }

    /// Consumes the next item in sorted order and resets its priority.
    pub fn pop(&mut self) -> Option<u32> {
        debug_assert!(self.sorted, "pop on an unsorted priority set");
        debug_assert!(
            self.cursor < self.items.len(),
            "pop past the end of a sorted priority set"
        );
        if !self.sorted {
            return None;
        }

        let item = self.items.get_mut(self.cursor)?;
        item.priority = 0.0;
        self.cursor += 1;
        Some(item.index)
    }

    pub fn iter(&self) -> impl Iterator<Item = PriorityItem> + '_ {
        self.items.iter().copied()
    }

    pub fn clear(&mut self) {
        for item in &self.items {
            self.slots[item.index as usize] = ABSENT;
        }
        self.items.clear();
        self.sorted = false;
        self.cursor = 0;
    }

    fn position(&self, index: u32) -> Option<usize> {
        match self.slots.get(index as usize) {
            Some(&pos) if pos != ABSENT => Some(pos as usize),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with(indices: &[u32]) -> PrioritySet {
        let mut set = PrioritySet::with_capacity(16);
        for &index in indices {
            set.add(index).unwrap();
        }
        set
    }

    #[test]
    fn readd_after_remove_starts_at_zero() {
        let mut set = set_with(&[3]);
        set.age_all(5.0);
        assert_eq!(set.priority(3), Some(5.0));

        set.remove(3).unwrap();
        assert!(!set.contains(3));

        set.add(3).unwrap();
        assert_eq!(set.priority(3), Some(0.0));
    }

    #[test]
    fn add_rejects_duplicates_and_overflow() {
        let mut set = set_with(&[1]);
        assert_eq!(set.add(1), Err(PrioritySetError::AlreadyPresent(1)));
        assert_eq!(
            set.add(16),
            Err(PrioritySetError::OutOfCapacity {
                index: 16,
                capacity: 16
            })
        );
    }

    #[test]
    fn remove_absent_fails() {
        let mut set = set_with(&[1, 2]);
        assert_eq!(set.remove(7), Err(PrioritySetError::NotPresent(7)));
        set.remove(1).unwrap();
        assert_eq!(set.remove(1), Err(PrioritySetError::NotPresent(1)));
    }

    #[test]
    fn swap_remove_keeps_other_members_addressable() {
        let mut set = set_with(&[0, 1, 2, 3]);
        set.bump(3, 7.0).unwrap();
        set.remove(0).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.priority(3), Some(7.0));
        set.remove(3).unwrap();
        assert!(set.contains(1));
        assert!(set.contains(2));
    }

    #[test]
    fn sort_then_pop_yields_descending_priorities() {
        let mut set = set_with(&[0, 1, 2]);
        set.bump(0, 1.0).unwrap();
        set.bump(1, 3.0).unwrap();
        set.bump(2, 2.0).unwrap();
        set.sort();

        assert_eq!(set.peek(0).map(|item| item.index), Some(1));
        assert_eq!(set.peek(2).map(|item| item.index), Some(0));

        assert_eq!(set.pop(), Some(1));
        assert_eq!(set.priority(1), Some(0.0));
        assert_eq!(set.peek_next().map(|item| item.index), Some(2));
        assert_eq!(set.remaining(), 2);

        assert_eq!(set.pop(), Some(2));
        assert_eq!(set.pop(), Some(0));
        assert_eq!(set.remaining(), 0);
        assert_eq!(set.peek_next(), None);
    }

    #[test]
    fn membership_change_invalidates_sort() {
        let mut set = set_with(&[0, 1]);
        set.sort();
        assert!(set.is_sorted());
        set.add(2).unwrap();
        assert!(!set.is_sorted());
        assert_eq!(set.peek_next(), None);
    }

    #[test]
    fn ensure_capacity_never_shrinks() {
        let mut set = PrioritySet::with_capacity(8);
        set.ensure_capacity(4);
        assert_eq!(set.capacity(), 8);
        set.ensure_capacity(32);
        assert_eq!(set.capacity(), 32);
        set.add(31).unwrap();
    }
}
