//! Signing statistics.
//!
//! Counters filled in by the denial and signature passes.  Where they go
//! (logs, a metrics endpoint, an operator report) is up to the embedding
//! process.

//----------- SignStats --------------------------------------------------------

/// Counters for one signing pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignStats {
    /// Denial RRsets created this pass.
    pub nsec_added: u32,

    /// Denial RRsets whose content was refreshed this pass.
    pub nsec_updated: u32,

    /// Signatures newly created this pass.
    pub rrsig_created: u32,

    /// Signatures still valid and left in place.
    pub rrsig_reused: u32,

    /// Signatures dropped (expired, or no longer backed by a key).
    pub rrsig_dropped: u32,
}

impl SignStats {
    /// Construct zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all counters to zero.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
