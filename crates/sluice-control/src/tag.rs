//! Tag allocation.
//!
//! A [`Tag`] is a flat 64-bit identity: the upper 16 bits carry a
//! per-issuer uniqueifier drawn from a process-wide counter, the lower
//! 48 bits a monotonically increasing per-issuer counter starting at 1.
//! The flat layout lets every downstream table index by a single integer
//! key while [`TagIssuer::valid_tag`] still rejects tags minted by a
//! different issuer instance, e.g. tags that survived a reconnect.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

/// Opaque 64-bit identity issued per registered resource.
pub type Tag = u64;

const COUNTER_BITS: u32 = 48;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

static NEXT_UID: AtomicU16 = AtomicU16::new(1);

// Uid 0 is reserved so every issued tag is nonzero; the 16-bit counter
// wraps on very long-lived processes.
fn next_uid() -> u16 {
    loop {
        let uid = NEXT_UID.fetch_add(1, Ordering::Relaxed);
        if uid != 0 {
            return uid;
        }
    }
}

/// Mints tags that are unique and strictly increasing for the lifetime
/// of the issuer.
#[derive(Debug)]
pub struct TagIssuer {
    uid: u16,
    issued: AtomicU64,
}

impl Default for TagIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl TagIssuer {
    pub fn new() -> Self {
        Self {
            uid: next_uid(),
            issued: AtomicU64::new(0),
        }
    }

    /// This issuer's uniqueifier, occupying the tag's upper 16 bits.
    pub fn uid(&self) -> u16 {
        self.uid
    }

    /// Allocates the next tag. Never blocks, never fails.
    pub fn next_tag(&self) -> Tag {
        let count = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(count <= COUNTER_MASK, "tag counter exhausted");
        ((self.uid as u64) << COUNTER_BITS) | count
    }

    /// Inclusive lower edge of the live tag range (the first tag this
    /// issuer can mint).
    pub fn lower_bound(&self) -> Tag {
        ((self.uid as u64) << COUNTER_BITS) | 1
    }

    /// Exclusive upper edge of the live tag range (one past the most
    /// recently minted tag).
    pub fn upper_bound(&self) -> Tag {
        ((self.uid as u64) << COUNTER_BITS) + self.issued.load(Ordering::Acquire) + 1
    }

    /// True iff `tag` lies in `[lower_bound, upper_bound)`, i.e. was
    /// minted by this issuer instance.
    pub fn valid_tag(&self, tag: Tag) -> bool {
        self.lower_bound() <= tag && tag < self.upper_bound()
    }
}
