//! # Fixed-Capacity Arena
//!
//! Backing store for semaphores and counters. Objects live in a fixed array
//! of slots and are addressed by a [`Handle`]: the slot index plus the slot's
//! generation, packed into a `u32` so it fits a trap argument register.
//! Freeing a slot bumps its generation, so a stale handle stops resolving
//! instead of silently aliasing whatever reuses the slot.

use core::num::NonZeroU16;

/// Opaque, generation-checked reference into an [`Arena`].
///
/// Raw layout: generation in the high half, slot index in the low half.
/// Generations start at 1, so the raw value `0` never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    const fn new(index: usize, generation: NonZeroU16) -> Self {
        Handle(((generation.get() as u32) << 16) | index as u32)
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

struct Slot<T> {
    generation: NonZeroU16,
    value: Option<T>,
}

pub struct Arena<T, const N: usize> {
    slots: [Slot<T>; N],
}

impl<T, const N: usize> Arena<T, N> {
    pub const fn new() -> Self {
        Self {
            slots: [const {
                Slot {
                    generation: NonZeroU16::MIN,
                    value: None,
                }
            }; N],
        }
    }

    /// Place `value` in the first free slot, scanning in slot order.
    /// Hands the value back if the arena is full.
    pub fn insert(&mut self, value: T) -> Result<Handle, T> {
        match self.slots.iter().position(|slot| slot.value.is_none()) {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.value = Some(value);
                Ok(Handle::new(index, slot.generation))
            }
            None => Err(value),
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation.get() != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation.get() != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation.get() != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.checked_add(1).unwrap_or(NonZeroU16::MIN);
        Some(value)
    }

    /// Drop every live object.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.checked_add(1).unwrap_or(NonZeroU16::MIN);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, const N: usize> Default for Arena<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_until_full() {
        let mut arena: Arena<u32, 2> = Arena::new();
        let a = arena.insert(10).unwrap();
        let b = arena.insert(20).unwrap();
        assert_ne!(a, b);
        assert_eq!(arena.insert(30), Err(30));
        assert_eq!(arena.get(a), Some(&10));
        assert_eq!(arena.get(b), Some(&20));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let mut arena: Arena<u32, 1> = Arena::new();
        let first = arena.insert(1).unwrap();
        assert_eq!(arena.remove(first), Some(1));
        let second = arena.insert(2).unwrap();

        assert_ne!(first, second);
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn test_null_and_out_of_range_handles() {
        let mut arena: Arena<u32, 4> = Arena::new();
        arena.insert(5).unwrap();
        assert_eq!(arena.get(Handle::from_raw(0)), None);
        assert_eq!(arena.get(Handle::from_raw((1 << 16) | 200)), None);
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut arena: Arena<u32, 4> = Arena::new();
        let h = arena.insert(5).unwrap();
        arena.clear();
        assert!(arena.is_empty());
        assert_eq!(arena.get(h), None);
    }
}
