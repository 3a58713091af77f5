//! Acceptance masks for receive buffers
//!
//! Every receive buffer compares incoming identifiers against its own
//! acceptance identifier. A [`Mask`] selects which identifier bits take part
//! in that comparison. Buffers use their individual mask when one is set and
//! the global mask otherwise.
use crate::message::control::IdWord;
use crate::messageram::MAX_BUFFERS;
use embedded_can::{ExtendedId, Id, StandardId};

/// Identifier bits that must match, laid out like the identifier word
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mask(u32);

impl Mask {
    /// Every identifier bit must match
    pub const EXACT: Self = Self(0x1FFF_FFFF);
    /// Any identifier of the buffer's format is accepted
    pub const ACCEPT_ALL: Self = Self(0);

    /// Mask for standard identifiers, bits set in `mask` must match
    pub fn standard(mask: StandardId) -> Self {
        Self(IdWord::new(Id::Standard(mask)).into())
    }

    /// Mask for extended identifiers, bits set in `mask` must match
    pub fn extended(mask: ExtendedId) -> Self {
        Self(IdWord::new(Id::Extended(mask)).into())
    }

    /// Value as written into the mask registers
    pub fn raw(self) -> u32 {
        self.0
    }

    /// `true` if a buffer armed with `acceptance` takes `incoming` under
    /// this mask.
    ///
    /// The identifier format always has to match.
    pub fn accepts(self, acceptance: Id, incoming: Id) -> bool {
        let same_format = matches!(
            (acceptance, incoming),
            (Id::Standard(_), Id::Standard(_)) | (Id::Extended(_), Id::Extended(_))
        );
        let difference = u32::from(IdWord::new(acceptance)) ^ u32::from(IdWord::new(incoming));
        same_format && difference & self.0 == 0
    }
}

impl Default for Mask {
    fn default() -> Self {
        Self::EXACT
    }
}

/// Acceptance masks of all receive buffers
///
/// Only reachable in configuration mode; the controller ignores mask writes
/// outside of freeze mode.
#[derive(Clone, Debug)]
pub struct FilterBank {
    global: Mask,
    individual: [Option<Mask>; MAX_BUFFERS],
}

impl Default for FilterBank {
    fn default() -> Self {
        Self {
            global: Mask::EXACT,
            individual: [None; MAX_BUFFERS],
        }
    }
}

impl FilterBank {
    /// Mask used by receive buffers without an individual mask
    pub fn global(&self) -> Mask {
        self.global
    }

    /// Overwrites the global mask
    pub fn set_global(&mut self, mask: Mask) {
        self.global = mask;
    }

    /// Overwrites the individual `mask` of buffer `index`.
    /// Returns back the `mask` if the `index` is out of range.
    pub fn set(&mut self, index: usize, mask: Mask) -> Result<(), Mask> {
        self.individual
            .get_mut(index)
            .map(|m| *m = Some(mask))
            .ok_or(mask)
    }

    /// Makes buffer `index` fall back to the global mask
    pub fn reset(&mut self, index: usize) {
        if let Some(m) = self.individual.get_mut(index) {
            *m = None;
        }
    }

    /// Individual mask of buffer `index`, if any
    pub fn individual(&self, index: usize) -> Option<Mask> {
        self.individual.get(index).copied().flatten()
    }

    /// Mask that applies to buffer `index`
    pub fn effective(&self, index: usize) -> Mask {
        self.individual(index).unwrap_or(self.global)
    }

    /// Drops all individual masks and restores the exact global mask
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn individual_set(&self) -> u32 {
        self.individual
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_some())
            .fold(0, |set, (index, _)| set | 1 << index)
    }
}
