//! Generation-counted handles and the slot table behind them.
//!
//! A handle packs a slot index (low 32 bits) and the slot's generation
//! (high 32 bits). Generations start at 1, so the all-zero value never names
//! a live slot and doubles as the "no buffer" sentinel.

use std::fmt;

/// Opaque identifier for a device buffer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(u64);

impl Handle {
    /// Reserved "no buffer" value.
    pub const NULL: Handle = Handle(0);

    fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of values addressed by [`Handle`].
///
/// Removing a value bumps the slot generation, so handles to removed values
/// fail lookup even after the slot is reused.
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    vacant: Vec<u32>,
    live: usize,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.live += 1;
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        Handle::new(index, 1)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        if handle.is_null() {
            return None;
        }
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if handle.is_null() {
            return None;
        }
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;

        // Skip 0 on wrap so a recycled slot never produces the null handle.
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.vacant.push(handle.index() as u32);
        self.live -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (Handle::new(i as u32, slot.generation), v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_handle_is_not_null() {
        let mut table = SlotTable::new();
        let h = table.insert("a");
        assert!(!h.is_null());
        assert_eq!(table.get(h), Some(&"a"));
    }

    #[test]
    fn test_null_handle_never_resolves() {
        let mut table = SlotTable::new();
        table.insert(1);
        assert!(table.get(Handle::NULL).is_none());
        assert!(table.remove(Handle::NULL).is_none());
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut table = SlotTable::new();
        let first = table.insert(10);
        assert_eq!(table.remove(first), Some(10));

        let second = table.insert(20);
        assert_ne!(first, second);
        assert!(table.get(first).is_none());
        assert_eq!(table.get(second), Some(&20));
    }

    #[test]
    fn test_double_remove_is_noop() {
        let mut table = SlotTable::new();
        let h = table.insert(5);
        assert!(table.remove(h).is_some());
        assert!(table.remove(h).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_iter_reports_live_values() {
        let mut table = SlotTable::new();
        let a = table.insert('a');
        let b = table.insert('b');
        table.remove(a);

        let live: Vec<_> = table.iter().collect();
        assert_eq!(live, vec![(b, &'b')]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(Handle::from_raw(0x1_0000_0002).to_string(), "0000000100000002");
    }
}
