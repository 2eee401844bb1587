//! The transactional RRset store.
//!
//! An [`RrSet`] holds the rdata for one (owner, class, type) combination in
//! three sets: the committed content, pending additions and pending
//! deletions.  Mutations stage into the pending sets; [`commit()`] promotes
//! them atomically and [`rollback()`] discards them.  Signatures over the
//! RRset live in a parallel store with the same transactional behaviour, so
//! that a failed signing pass can be rolled back without leaving stray
//! RRSIGs behind.
//!
//! [`commit()`]: RrSet::commit()
//! [`rollback()`]: RrSet::rollback()

use tracing::{debug, warn};

use crate::error::ZoneError;
use crate::name::Name;
use crate::rr::{Rdata, Rr, RrClass, RrType, RrsigRdata};
use crate::serial::serial_gt;

//----------- SignedRrsig ------------------------------------------------------

/// An RRSIG together with the key that produced it.
///
/// The key locator and flags are what [`diff()`](crate::ZoneData::diff())
/// needs to decide whether a signature is still backed by a current key, and
/// what the backup recovery path restores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedRrsig {
    /// The signature rdata.
    pub rdata: RrsigRdata,

    /// The locator of the signing key.
    pub key_locator: String,

    /// The DNSKEY flags of the signing key.
    pub key_flags: u16,
}

//----------- RrSet ------------------------------------------------------------

/// The set of records at one (owner, class, type).
///
/// ## Invariants
///
/// - `no-dups`: `committed`, `pending_add` and `pending_del` are each free of
///   duplicates under canonical rdata comparison.
/// - `add-disjoint`: `pending_add` contains no rdata present in `committed`.
/// - `del-subset`: `pending_del` only contains rdata present in `committed`.
/// - `sorted`: `committed` is kept in canonical rdata order.
#[derive(Clone, Debug)]
pub struct RrSet {
    owner: Name,
    class: RrClass,
    rtype: RrType,
    ttl: u32,

    /// The current authoritative content.
    committed: Vec<Rdata>,

    /// Staged additions.
    pending_add: Vec<Rdata>,

    /// Staged deletions.
    pending_del: Vec<Rdata>,

    /// The signatures currently associated with this RRset.
    sigs: Vec<SignedRrsig>,

    /// Staged signature additions.
    sigs_pending_add: Vec<SignedRrsig>,

    /// Staged signature deletions.
    sigs_pending_del: Vec<RrsigRdata>,
}

impl RrSet {
    /// Construct an empty RRset.
    pub fn new(owner: Name, class: RrClass, rtype: RrType, ttl: u32) -> Self {
        Self {
            owner,
            class,
            rtype,
            ttl,
            committed: Vec::new(),
            pending_add: Vec::new(),
            pending_del: Vec::new(),
            sigs: Vec::new(),
            sigs_pending_add: Vec::new(),
            sigs_pending_del: Vec::new(),
        }
    }

    /// The owner name.
    pub fn owner(&self) -> &Name {
        &self.owner
    }

    /// The record class.
    pub fn class(&self) -> RrClass {
        self.class
    }

    /// The record type.
    pub fn rtype(&self) -> RrType {
        self.rtype
    }

    /// The TTL of the RRset.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    fn position(set: &[Rdata], rdata: &Rdata) -> Option<usize> {
        set.iter()
            .position(|r| r.canonical_cmp(rdata) == std::cmp::Ordering::Equal)
    }

    /// Stage an rdata for addition.
    ///
    /// A matching pending deletion is cancelled instead.  Adding rdata that
    /// is already committed or already staged is a no-op.
    pub fn add(&mut self, rdata: Rdata, ttl: u32) -> Result<(), ZoneError> {
        self.ttl = ttl;
        if let Some(pos) = Self::position(&self.pending_del, &rdata) {
            self.pending_del.remove(pos);
            return Ok(());
        }
        if Self::position(&self.committed, &rdata).is_some()
            || Self::position(&self.pending_add, &rdata).is_some()
        {
            debug!("not staging duplicate {} RR at {}", self.rtype, self.owner);
            return Ok(());
        }
        self.pending_add.push(rdata);
        Ok(())
    }

    /// Stage an rdata for deletion.
    ///
    /// A matching pending addition is cancelled instead.  Deleting rdata that
    /// is not present is a no-op with a warning.
    pub fn del(&mut self, rdata: &Rdata) -> Result<(), ZoneError> {
        if let Some(pos) = Self::position(&self.pending_add, rdata) {
            self.pending_add.remove(pos);
            return Ok(());
        }
        if Self::position(&self.committed, rdata).is_some() {
            if Self::position(&self.pending_del, rdata).is_none() {
                self.pending_del.push(rdata.clone());
            }
            return Ok(());
        }
        warn!(
            "unable to delete {} RR at {}: no such rdata",
            self.rtype, self.owner
        );
        Ok(())
    }

    /// The staged changes, additions first.
    pub fn diff(&self) -> Result<(Vec<Rdata>, Vec<Rdata>), ZoneError> {
        Ok((self.pending_add.clone(), self.pending_del.clone()))
    }

    /// Whether any rdata changes are staged.
    pub fn has_pending(&self) -> bool {
        !self.pending_add.is_empty() || !self.pending_del.is_empty()
    }

    /// Mark every committed rdata for deletion.
    pub fn wipe(&mut self) {
        let committed = self.committed.clone();
        for rdata in &committed {
            if Self::position(&self.pending_del, rdata).is_none() {
                self.pending_del.push(rdata.clone());
            }
        }
        self.pending_add.clear();
    }

    /// Promote all staged changes.
    ///
    /// Deletions are applied before additions; both pending sets and both
    /// pending signature sets are cleared.  Returns the number of records
    /// after the commit.
    pub fn commit(&mut self) -> Result<usize, ZoneError> {
        for rdata in self.pending_del.drain(..) {
            match Self::position(&self.committed, &rdata) {
                Some(pos) => {
                    self.committed.remove(pos);
                }
                // 'del-subset' was upheld when the deletion was staged, so
                // the rdata can only be missing if comparison broke down.
                None => return Err(ZoneError::CompareFailed),
            }
        }
        self.committed.append(&mut self.pending_add);
        self.committed
            .sort_by(|a, b| a.canonical_cmp(b));

        for rdata in self.sigs_pending_del.drain(..) {
            if let Some(pos) = self.sigs.iter().position(|s| s.rdata == rdata) {
                self.sigs.remove(pos);
            }
        }
        self.sigs.append(&mut self.sigs_pending_add);

        Ok(self.committed.len())
    }

    /// Discard all staged changes.
    pub fn rollback(&mut self) {
        self.pending_add.clear();
        self.pending_del.clear();
        self.sigs_pending_add.clear();
        self.sigs_pending_del.clear();
    }

    /// The committed rdata, in canonical order.
    pub fn rdatas(&self) -> &[Rdata] {
        &self.committed
    }

    /// The number of committed records.
    pub fn count(&self) -> usize {
        self.committed.len()
    }

    /// The rdata as it will look after a commit, in canonical order.
    pub fn effective_rdatas(&self) -> Vec<&Rdata> {
        let mut rdatas: Vec<&Rdata> = self
            .committed
            .iter()
            .filter(|r| Self::position(&self.pending_del, r).is_none())
            .chain(self.pending_add.iter())
            .collect();
        rdatas.sort_by(|a, b| a.canonical_cmp(b));
        rdatas
    }

    /// The number of records after a commit of the staged changes.
    pub fn effective_count(&self) -> usize {
        self.committed.len() - self.pending_del.len() + self.pending_add.len()
    }

    /// Whether a commit of the staged changes would leave the RRset empty.
    pub fn is_effectively_empty(&self) -> bool {
        self.effective_count() == 0
    }

    /// The RFC 4034 section 6 canonical byte stream of the RRset.
    ///
    /// Each record is emitted as lowercased owner, type, class, TTL, rdata
    /// length and canonical rdata, with the records in ascending canonical
    /// rdata order.  This is the exact input to signature generation.
    pub fn canonical(&self, ttl_override: Option<u32>) -> Vec<u8> {
        let ttl = ttl_override.unwrap_or(self.ttl);
        let mut buf = Vec::new();
        for rdata in self.effective_rdatas() {
            self.owner.compose_canonical(&mut buf);
            buf.extend_from_slice(&self.rtype.to_u16().to_be_bytes());
            buf.extend_from_slice(&self.class.to_u16().to_be_bytes());
            buf.extend_from_slice(&ttl.to_be_bytes());
            let wire = rdata.to_canonical_wire();
            buf.extend_from_slice(&(wire.len() as u16).to_be_bytes());
            buf.extend_from_slice(&wire);
        }
        buf
    }

    /// The committed records as printable [`Rr`]s.
    pub fn records(&self) -> impl Iterator<Item = Rr> + '_ {
        self.committed.iter().map(move |rdata| {
            Rr::new(
                self.owner.clone(),
                self.ttl,
                self.class,
                self.rtype,
                rdata.clone(),
            )
        })
    }

    //--- Signature bookkeeping

    /// Stage a signature for attachment.
    pub fn attach_rrsig(&mut self, rdata: RrsigRdata, key_locator: &str, key_flags: u16) {
        self.sigs_pending_add.push(SignedRrsig {
            rdata,
            key_locator: key_locator.to_string(),
            key_flags,
        });
    }

    /// Stage for deletion every signature matching the predicate.
    ///
    /// Returns how many signatures were staged.
    pub fn drop_rrsigs(&mut self, mut expired: impl FnMut(&SignedRrsig) -> bool) -> usize {
        let mut dropped = 0;
        for sig in &self.sigs {
            if expired(sig) && !self.sigs_pending_del.contains(&sig.rdata) {
                self.sigs_pending_del.push(sig.rdata.clone());
                dropped += 1;
            }
        }
        dropped
    }

    /// The committed signatures.
    pub fn rrsigs(&self) -> &[SignedRrsig] {
        &self.sigs
    }

    /// The signatures as they will look after a commit.
    pub fn effective_rrsigs(&self) -> Vec<&SignedRrsig> {
        self.sigs
            .iter()
            .filter(|s| !self.sigs_pending_del.contains(&s.rdata))
            .chain(self.sigs_pending_add.iter())
            .collect()
    }

    /// Whether a signature by `key_locator` remains valid past `horizon`.
    ///
    /// Expiration times compare in serial arithmetic, like all 32-bit DNS
    /// timestamps.
    pub fn has_valid_rrsig(&self, key_locator: &str, horizon: u32) -> bool {
        self.effective_rrsigs()
            .iter()
            .any(|s| s.key_locator == key_locator && serial_gt(s.rdata.expiration, horizon))
    }

    /// Stamp a fresh serial into SOA rdata, committed and staged alike.
    ///
    /// Returns whether any rdata actually changed.
    pub(crate) fn set_soa_serial(&mut self, serial: u32) -> bool {
        let mut changed = false;
        for rdata in self
            .committed
            .iter_mut()
            .chain(self.pending_add.iter_mut())
        {
            if let Rdata::Soa(soa) = rdata {
                if soa.serial != serial {
                    soa.serial = serial;
                    changed = true;
                }
            }
        }
        changed
    }

    //--- Backup recovery

    /// Restore an rdata directly into the committed set.
    pub(crate) fn recover(&mut self, rdata: Rdata, ttl: u32) {
        self.ttl = ttl;
        if Self::position(&self.committed, &rdata).is_none() {
            self.committed.push(rdata);
            self.committed.sort_by(|a, b| a.canonical_cmp(b));
        }
    }

    /// Restore a signature directly into the committed signature set.
    pub(crate) fn recover_rrsig(&mut self, rdata: RrsigRdata, key_locator: &str, key_flags: u16) {
        self.sigs.push(SignedRrsig {
            rdata,
            key_locator: key_locator.to_string(),
            key_flags,
        });
    }

    /// Replace the committed content outright.
    ///
    /// Reserved for engine-generated RRsets (NSEC/NSEC3), whose content is
    /// derived state rather than operator input.  Stale signatures are
    /// staged for deletion.
    pub(crate) fn replace(&mut self, rdata: Rdata, ttl: u32) {
        self.ttl = ttl;
        self.committed.clear();
        self.committed.push(rdata);
        self.pending_add.clear();
        self.pending_del.clear();
        let stale: Vec<RrsigRdata> = self.sigs.iter().map(|s| s.rdata.clone()).collect();
        for rdata in stale {
            if !self.sigs_pending_del.contains(&rdata) {
                self.sigs_pending_del.push(rdata);
            }
        }
        self.sigs_pending_add.clear();
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;

    fn a_rdata(addr: &str) -> Rdata {
        Rdata::A(addr.parse().unwrap())
    }

    fn rrset() -> RrSet {
        RrSet::new(
            Name::from_text("www.example.").unwrap(),
            RrClass::In,
            RrType::A,
            3600,
        )
    }

    #[test]
    fn staged_add_commits() {
        let mut set = rrset();
        set.add(a_rdata("192.0.2.1"), 3600).unwrap();
        set.add(a_rdata("192.0.2.2"), 3600).unwrap();
        assert_eq!(set.count(), 0);
        assert_eq!(set.effective_count(), 2);
        assert_eq!(set.commit().unwrap(), 2);
        assert!(!set.has_pending());
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn add_cancels_pending_del() {
        let mut set = rrset();
        set.add(a_rdata("192.0.2.1"), 3600).unwrap();
        set.commit().unwrap();

        set.del(&a_rdata("192.0.2.1")).unwrap();
        assert!(set.has_pending());
        set.add(a_rdata("192.0.2.1"), 3600).unwrap();
        assert!(!set.has_pending());
        set.commit().unwrap();
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn del_cancels_pending_add() {
        let mut set = rrset();
        set.add(a_rdata("192.0.2.1"), 3600).unwrap();
        set.del(&a_rdata("192.0.2.1")).unwrap();
        assert!(!set.has_pending());
        assert_eq!(set.commit().unwrap(), 0);
    }

    #[test]
    fn rollback_discards_staging() {
        let mut set = rrset();
        set.add(a_rdata("192.0.2.1"), 3600).unwrap();
        set.commit().unwrap();

        set.add(a_rdata("192.0.2.2"), 3600).unwrap();
        set.del(&a_rdata("192.0.2.1")).unwrap();
        set.rollback();
        assert!(!set.has_pending());
        assert_eq!(set.count(), 1);
        // Rollback is idempotent.
        set.rollback();
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn wipe_stages_everything() {
        let mut set = rrset();
        set.add(a_rdata("192.0.2.1"), 3600).unwrap();
        set.add(a_rdata("192.0.2.2"), 3600).unwrap();
        set.commit().unwrap();

        set.wipe();
        assert_eq!(set.effective_count(), 0);
        set.commit().unwrap();
        assert_eq!(set.count(), 0);
    }

    #[test]
    fn canonical_stream_is_sorted() {
        let mut set = rrset();
        set.add(a_rdata("192.0.2.2"), 3600).unwrap();
        set.add(a_rdata("192.0.2.1"), 3600).unwrap();
        let stream = set.canonical(None);

        // owner (13 octets) + type/class/ttl/rdlen (10) + rdata (4), twice.
        assert_eq!(stream.len(), 2 * (13 + 10 + 4));
        // The lower address sorts first.
        let first_rdata = &stream[23..27];
        assert_eq!(first_rdata, &[192, 0, 2, 1]);
    }

    #[test]
    fn signatures_are_transactional() {
        let mut set = rrset();
        set.add(a_rdata("192.0.2.1"), 3600).unwrap();
        set.commit().unwrap();

        let sig = RrsigRdata {
            type_covered: RrType::A,
            algorithm: 8,
            labels: 2,
            original_ttl: 3600,
            expiration: 2000,
            inception: 1000,
            key_tag: 42,
            signer: Name::from_text("example.").unwrap(),
            signature: bytes::Bytes::from_static(b"sig"),
        };
        set.attach_rrsig(sig.clone(), "key-1", 256);
        assert!(set.rrsigs().is_empty());
        assert!(set.has_valid_rrsig("key-1", 1500));
        assert!(!set.has_valid_rrsig("key-1", 2000));

        set.rollback();
        assert!(set.effective_rrsigs().is_empty());

        set.attach_rrsig(sig, "key-1", 256);
        set.commit().unwrap();
        assert_eq!(set.rrsigs().len(), 1);

        let dropped = set.drop_rrsigs(|s| s.key_locator == "key-1");
        assert_eq!(dropped, 1);
        set.commit().unwrap();
        assert!(set.rrsigs().is_empty());
    }
}
