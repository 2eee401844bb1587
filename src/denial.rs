//! Denial of existence data points.
//!
//! A [`Denial`] is one node of the NSEC or NSEC3 chain: an owner name
//! (hashed under NSEC3), the generated denial RRset, and two dirty flags.
//! `bitmap_changed` means the set of types at the covered domain changed;
//! `nxt_changed` means the chain neighbourhood changed.  The chain pass
//! recomputes exactly the nodes with a flag set and leaves the rest alone,
//! which is what keeps incremental re-signing cheap.

use bytes::Bytes;

use crate::name::Name;
use crate::nsec3::Nsec3Params;
use crate::rr::{Rdata, RrClass, RrType, TypeBitmap};
use crate::rrset::RrSet;
use crate::stats::SignStats;

//----------- Denial -----------------------------------------------------------

/// One point in the denial of existence chain.
#[derive(Clone, Debug)]
pub struct Denial {
    /// The owner of the denial RRset: the domain name itself for NSEC, its
    /// hashed form for NSEC3.
    owner: Name,

    /// The generated NSEC or NSEC3 RRset, once the chain pass has run.
    rrset: Option<RrSet>,

    /// The domain this data point covers.
    domain: Option<Name>,

    /// The raw NSEC3 hash of the covered domain; [`None`] under NSEC.
    ///
    /// Kept so the predecessor's "next hashed owner name" field can be
    /// filled without re-hashing or decoding the owner label.
    hash: Option<Bytes>,

    /// The type bitmap no longer matches the covered domain.
    bitmap_changed: bool,

    /// The successor in the chain changed.
    nxt_changed: bool,
}

impl Denial {
    /// Construct an NSEC data point.
    pub fn new(owner: Name) -> Self {
        Self {
            owner,
            rrset: None,
            domain: None,
            hash: None,
            bitmap_changed: true,
            nxt_changed: true,
        }
    }

    /// Construct an NSEC3 data point with its raw hash.
    pub fn with_hash(owner: Name, hash: Bytes) -> Self {
        Self {
            hash: Some(hash),
            ..Self::new(owner)
        }
    }

    /// The owner of the denial RRset.
    pub fn owner(&self) -> &Name {
        &self.owner
    }

    /// The covered domain, if linked.
    pub fn domain(&self) -> Option<&Name> {
        self.domain.as_ref()
    }

    pub(crate) fn set_domain(&mut self, domain: Name) {
        self.domain = Some(domain);
    }

    /// The raw NSEC3 hash of the covered domain.
    pub fn hash(&self) -> Option<&Bytes> {
        self.hash.as_ref()
    }

    pub(crate) fn set_hash(&mut self, hash: Bytes) {
        self.hash = Some(hash);
    }

    /// The generated denial RRset, if any.
    pub fn rrset(&self) -> Option<&RrSet> {
        self.rrset.as_ref()
    }

    pub(crate) fn rrset_mut(&mut self) -> Option<&mut RrSet> {
        self.rrset.as_mut()
    }

    /// Whether the type bitmap must be recomputed.
    pub fn bitmap_changed(&self) -> bool {
        self.bitmap_changed
    }

    /// Whether the chain successor changed.
    pub fn nxt_changed(&self) -> bool {
        self.nxt_changed
    }

    pub(crate) fn mark_bitmap_changed(&mut self) {
        self.bitmap_changed = true;
    }

    pub(crate) fn mark_nxt_changed(&mut self) {
        self.nxt_changed = true;
    }

    /// Drop the generated RRset and mark the node dirty.
    pub(crate) fn wipe(&mut self) {
        self.rrset = None;
        self.bitmap_changed = true;
        self.nxt_changed = true;
    }

    /// Restore a recovered denial RRset verbatim.
    pub(crate) fn recover_rrset(&mut self, set: RrSet) {
        self.rrset = Some(set);
        self.bitmap_changed = false;
        self.nxt_changed = false;
    }

    /// Produce or refresh the NSEC RRset at this data point.
    ///
    /// The bitmap lists the types at the covered domain plus `NSEC` and
    /// `RRSIG`, per RFC 4034 section 4.1.2.
    pub(crate) fn nsecify(
        &mut self,
        types: &[RrType],
        next: &Name,
        ttl: u32,
        klass: RrClass,
        stats: &mut SignStats,
    ) {
        let mut bitmap = TypeBitmap::from_types(types.iter().copied());
        bitmap.add(RrType::Nsec);
        bitmap.add(RrType::Rrsig);
        let rdata = Rdata::Nsec {
            next: next.clone(),
            bitmap,
        };
        self.apply(rdata, RrType::Nsec, ttl, klass, stats);
    }

    /// Produce or refresh the NSEC3 RRset at this data point.
    ///
    /// The bitmap lists the types at the covered domain, plus `RRSIG` when
    /// the domain carries signed RRsets.  An empty non-terminal yields an
    /// empty bitmap (RFC 5155 section 7.1).
    pub(crate) fn nsecify3(
        &mut self,
        types: &[RrType],
        include_rrsig: bool,
        params: &Nsec3Params,
        next_hashed: &Bytes,
        ttl: u32,
        klass: RrClass,
        stats: &mut SignStats,
    ) {
        let mut bitmap = TypeBitmap::from_types(types.iter().copied());
        if include_rrsig && !bitmap.is_empty() {
            bitmap.add(RrType::Rrsig);
        }
        let rdata = Rdata::Nsec3 {
            algorithm: params.algorithm,
            flags: params.flags,
            iterations: params.iterations,
            salt: params.salt.clone(),
            next_hashed: next_hashed.clone(),
            bitmap,
        };
        self.apply(rdata, RrType::Nsec3, ttl, klass, stats);
    }

    /// Install freshly computed denial rdata, counting what happened.
    fn apply(
        &mut self,
        rdata: Rdata,
        rtype: RrType,
        ttl: u32,
        klass: RrClass,
        stats: &mut SignStats,
    ) {
        match &mut self.rrset {
            None => {
                let mut set = RrSet::new(self.owner.clone(), klass, rtype, ttl);
                set.replace(rdata, ttl);
                self.rrset = Some(set);
                stats.nsec_added += 1;
            }
            Some(set) => {
                let unchanged = set.ttl() == ttl
                    && set.rdatas().len() == 1
                    && set.rdatas()[0] == rdata;
                if !unchanged {
                    set.replace(rdata, ttl);
                    stats.nsec_updated += 1;
                }
            }
        }
        self.bitmap_changed = false;
        self.nxt_changed = false;
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        Name::from_text(text).unwrap()
    }

    #[test]
    fn nsec_generation_and_refresh() {
        let mut stats = SignStats::new();
        let mut denial = Denial::new(name("mail.example."));
        denial.nsecify(
            &[RrType::A],
            &name("www.example."),
            3600,
            RrClass::In,
            &mut stats,
        );
        assert_eq!(stats.nsec_added, 1);
        assert!(!denial.bitmap_changed());
        assert!(!denial.nxt_changed());

        let set = denial.rrset().unwrap();
        assert_eq!(set.rtype(), RrType::Nsec);
        let Rdata::Nsec { next, bitmap } = &set.rdatas()[0] else {
            panic!("not an NSEC");
        };
        assert_eq!(next, &name("www.example."));
        assert_eq!(bitmap.types(), &[RrType::A, RrType::Rrsig, RrType::Nsec]);

        // Same input: nothing to refresh.
        denial.nsecify(
            &[RrType::A],
            &name("www.example."),
            3600,
            RrClass::In,
            &mut stats,
        );
        assert_eq!(stats.nsec_updated, 0);

        // New successor: the RRset is refreshed in place.
        denial.nsecify(
            &[RrType::A],
            &name("example."),
            3600,
            RrClass::In,
            &mut stats,
        );
        assert_eq!(stats.nsec_updated, 1);
    }

    #[test]
    fn nsec3_for_ent_has_empty_bitmap() {
        let mut stats = SignStats::new();
        let params = Nsec3Params::new(0, 0, Bytes::new());
        let hash = Bytes::from_static(&[0u8; 20]);
        let mut denial = Denial::with_hash(name("abc.example."), hash.clone());
        denial.nsecify3(&[], true, &params, &hash, 3600, RrClass::In, &mut stats);

        let Rdata::Nsec3 { bitmap, .. } = &denial.rrset().unwrap().rdatas()[0] else {
            panic!("not an NSEC3");
        };
        assert!(bitmap.is_empty());
    }
}
