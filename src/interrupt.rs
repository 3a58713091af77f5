//! Per-buffer flag and interrupt sets
//!
//! Every message buffer owns one bit in the flag register and one in the
//! interrupt mask register. A flag is raised when a receive buffer got a
//! frame or a transmit buffer finished (or aborted) a transmission. If the
//! corresponding mask bit is set, the flag also asserts the peripheral's
//! message buffer interrupt line.

/// A set of message buffers
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferSet(pub u32);

impl FromIterator<usize> for BufferSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut set = 0_u32;
        for i in iter.into_iter().filter(|&i| i < 32) {
            set |= 1u32 << i;
        }
        BufferSet(set)
    }
}

impl BufferSet {
    /// Returns the set of all message buffers
    pub fn all() -> Self {
        Self(u32::MAX)
    }

    /// `true` if buffer `index` is part of the set
    pub fn contains(&self, index: usize) -> bool {
        index < 32 && self.0 & (1 << index) != 0
    }

    /// `true` if no buffer is part of the set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Buffers that are part of both sets
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// An iterator visiting all elements in ascending order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

impl IntoIterator for BufferSet {
    type Item = usize;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

/// An iterator over the buffer indexes of the buffers in a [`BufferSet`].
///
/// This `struct` is created by [`BufferSet::iter`].
pub struct Iter {
    flags: BufferSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < 32 {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) != 0 {
                return Some(i as usize);
            }
        }
        None
    }
}
