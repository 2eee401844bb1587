//! Domain nodes.
//!
//! A [`Domain`] is one owner name in the zone: its RRsets, its authority
//! status, and its place in the tree (parent link, subdomain counters) and
//! in the denial chain (denial back-reference).  The domain tree owns these
//! nodes exclusively; the back-references are plain names into the owning
//! maps, never owning handles.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::ZoneError;
use crate::name::Name;
use crate::rr::{Rr, RrType};
use crate::rrset::RrSet;
use crate::signconf::SignConf;

//----------- DomainStatus -----------------------------------------------------

/// The authority status of a domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DomainStatus {
    /// Not yet classified.
    #[default]
    None,

    /// The zone apex.
    Apex,

    /// An authoritative name.
    Auth,

    /// An unsigned delegation (NS without DS).
    Ns,

    /// A secure delegation (NS with DS).
    Ds,

    /// An empty non-terminal above authoritative names.
    EntAuth,

    /// An empty non-terminal above an unsigned delegation.
    EntNs,

    /// An empty non-terminal above glue only.
    EntGlue,

    /// Glue or other data below a zone cut; not authoritative.
    Occluded,

    /// A hashed shadow name in the NSEC3 space.
    Hash,
}

impl DomainStatus {
    /// Whether this status counts towards the parent's authoritative
    /// subdomain counter.
    pub fn is_auth(self) -> bool {
        matches!(self, DomainStatus::Auth | DomainStatus::Ds)
    }

    /// Whether this is one of the empty non-terminal statuses.
    pub fn is_ent(self) -> bool {
        matches!(
            self,
            DomainStatus::EntAuth | DomainStatus::EntNs | DomainStatus::EntGlue
        )
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainStatus::None => f.write_str("NONE"),
            DomainStatus::Apex => f.write_str("APEX"),
            DomainStatus::Auth => f.write_str("AUTH"),
            DomainStatus::Ns => f.write_str("NS"),
            DomainStatus::Ds => f.write_str("DS"),
            DomainStatus::EntAuth => f.write_str("ENT_AUTH"),
            DomainStatus::EntNs => f.write_str("ENT_NS"),
            DomainStatus::EntGlue => f.write_str("ENT_GLUE"),
            DomainStatus::Occluded => f.write_str("OCCLUDED"),
            DomainStatus::Hash => f.write_str("HASH"),
        }
    }
}

impl FromStr for DomainStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NONE" => DomainStatus::None,
            "APEX" => DomainStatus::Apex,
            "AUTH" => DomainStatus::Auth,
            "NS" => DomainStatus::Ns,
            "DS" => DomainStatus::Ds,
            "ENT_AUTH" => DomainStatus::EntAuth,
            "ENT_NS" => DomainStatus::EntNs,
            "ENT_GLUE" => DomainStatus::EntGlue,
            "OCCLUDED" => DomainStatus::Occluded,
            "HASH" => DomainStatus::Hash,
            _ => return Err(()),
        })
    }
}

//----------- Domain -----------------------------------------------------------

/// One owner name in the zone.
#[derive(Clone, Debug)]
pub struct Domain {
    /// The owner name.
    dname: Name,

    /// The RRsets at this name, by type.
    rrsets: BTreeMap<RrType, RrSet>,

    /// The authority status.
    status: DomainStatus,

    /// The parent domain, present for every non-apex domain after
    /// entization.
    parent: Option<Name>,

    /// The number of immediate children in the domain tree.
    subdomain_count: u32,

    /// The number of immediate children with an authoritative status.
    subdomain_auth: u32,

    /// The denial of existence data point covering this name.
    denial: Option<Name>,

    /// The internal serial that last touched this domain.
    internal_serial: u32,
}

impl Domain {
    /// Construct an empty domain.
    pub fn new(dname: Name) -> Self {
        Self {
            dname,
            rrsets: BTreeMap::new(),
            status: DomainStatus::None,
            parent: None,
            subdomain_count: 0,
            subdomain_auth: 0,
            denial: None,
            internal_serial: 0,
        }
    }

    /// The owner name.
    pub fn dname(&self) -> &Name {
        &self.dname
    }

    /// The authority status.
    pub fn status(&self) -> DomainStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: DomainStatus) {
        self.status = status;
    }

    /// The parent domain name, if linked.
    pub fn parent(&self) -> Option<&Name> {
        self.parent.as_ref()
    }

    pub(crate) fn set_parent(&mut self, parent: Name) {
        self.parent = Some(parent);
    }

    /// The owner of the denial data point covering this name, if linked.
    pub fn denial(&self) -> Option<&Name> {
        self.denial.as_ref()
    }

    pub(crate) fn set_denial(&mut self, owner: Name) {
        self.denial = Some(owner);
    }

    pub(crate) fn clear_denial(&mut self) {
        self.denial = None;
    }

    /// The number of immediate children in the domain tree.
    pub fn subdomain_count(&self) -> u32 {
        self.subdomain_count
    }

    /// The number of immediate children with an authoritative status.
    pub fn subdomain_auth(&self) -> u32 {
        self.subdomain_auth
    }

    pub(crate) fn adjust_subdomains(&mut self, count: i64, auth: i64) {
        self.subdomain_count = (self.subdomain_count as i64 + count).max(0) as u32;
        self.subdomain_auth = (self.subdomain_auth as i64 + auth).max(0) as u32;
    }

    pub(crate) fn set_subdomains(&mut self, count: u32, auth: u32) {
        self.subdomain_count = count;
        self.subdomain_auth = auth;
    }

    /// The internal serial that last touched this domain.
    pub fn internal_serial(&self) -> u32 {
        self.internal_serial
    }

    pub(crate) fn set_internal_serial(&mut self, serial: u32) {
        self.internal_serial = serial;
    }

    //--- RRsets

    /// The RRsets at this name, ascending by type.
    pub fn rrsets(&self) -> impl Iterator<Item = &RrSet> {
        self.rrsets.values()
    }

    pub(crate) fn rrsets_mut(&mut self) -> impl Iterator<Item = &mut RrSet> {
        self.rrsets.values_mut()
    }

    /// The RRset of the given type, if present.
    pub fn rrset(&self, rtype: RrType) -> Option<&RrSet> {
        self.rrsets.get(&rtype)
    }

    pub(crate) fn rrset_mut(&mut self, rtype: RrType) -> Option<&mut RrSet> {
        self.rrsets.get_mut(&rtype)
    }

    /// Stage a record for addition.
    pub fn add_rr(&mut self, rr: &Rr) -> Result<(), ZoneError> {
        let set = self.rrsets.entry(rr.rtype).or_insert_with(|| {
            RrSet::new(self.dname.clone(), rr.class, rr.rtype, rr.ttl)
        });
        set.add(rr.rdata.clone(), rr.ttl)
    }

    /// Stage a record for deletion.
    pub fn del_rr(&mut self, rr: &Rr) -> Result<(), ZoneError> {
        match self.rrsets.get_mut(&rr.rtype) {
            Some(set) => set.del(&rr.rdata),
            None => {
                warn!(
                    "unable to delete {} RR at {}: no such RRset",
                    rr.rtype, self.dname
                );
                Ok(())
            }
        }
    }

    /// The number of RRsets that will be non-empty after a commit.
    pub fn count_rrsets(&self) -> usize {
        self.rrsets
            .values()
            .filter(|set| !set.is_effectively_empty())
            .count()
    }

    /// The types that will be present after a commit, ascending.
    pub fn effective_types(&self) -> Vec<RrType> {
        self.rrsets
            .iter()
            .filter(|(_, set)| !set.is_effectively_empty())
            .map(|(rtype, _)| *rtype)
            .collect()
    }

    /// Whether data of `rtype` (or any type) is present, optionally
    /// ignoring address glue.
    pub fn has_data(&self, rtype: Option<RrType>, skip_glue: bool) -> bool {
        self.rrsets.iter().any(|(t, set)| {
            if let Some(wanted) = rtype {
                *t == wanted && !set.is_effectively_empty()
            } else if skip_glue && t.is_glue_type() {
                false
            } else {
                !set.is_effectively_empty()
            }
        })
    }

    /// Whether any NS rdata at this name points at `target`.
    pub fn ns_references(&self, target: &Name) -> bool {
        let Some(set) = self.rrsets.get(&RrType::Ns) else {
            return false;
        };
        set.effective_rdatas().into_iter().any(|rdata| {
            matches!(rdata, crate::rr::Rdata::Ns(name) if name == target)
        })
    }

    //--- Structural checks

    /// Whether a CNAME at this name has no other data next to it.
    pub fn examine_cname_alone(&self) -> bool {
        if !self.has_data(Some(RrType::Cname), false) {
            return true;
        }
        !self.rrsets.iter().any(|(t, set)| {
            *t != RrType::Cname && !set.is_effectively_empty()
        })
    }

    /// Whether at most one record of `rtype` is present.
    pub fn examine_singleton(&self, rtype: RrType) -> bool {
        self.rrsets
            .get(&rtype)
            .map(|set| set.effective_count() <= 1)
            .unwrap_or(true)
    }

    /// Whether a zone cut at this name carries only NS, DS and glue.
    pub fn examine_valid_zonecut(&self) -> bool {
        if !self.has_data(Some(RrType::Ns), false) {
            return true;
        }
        !self.rrsets.iter().any(|(t, set)| {
            !matches!(t, RrType::Ns | RrType::Ds)
                && !t.is_glue_type()
                && !set.is_effectively_empty()
        })
    }

    //--- Transactions

    /// Whether any change is staged on any RRset.
    pub fn has_pending(&self) -> bool {
        self.rrsets.values().any(RrSet::has_pending)
    }

    /// Commit the staged changes of every RRset.
    ///
    /// RRsets that end up empty are dropped.  Returns whether any rdata
    /// changed, which is what decides whether the covering denial bitmap
    /// must be recomputed.
    pub fn commit(&mut self) -> Result<bool, ZoneError> {
        let mut changed = false;
        for set in self.rrsets.values_mut() {
            changed |= set.has_pending();
            set.commit()?;
        }
        // An RRset without records has nothing left to say, signatures
        // included.
        self.rrsets.retain(|_, set| set.count() > 0);
        Ok(changed)
    }

    /// Discard the staged changes of every RRset.
    ///
    /// RRsets that were created by the discarded changes disappear again.
    pub fn rollback(&mut self) {
        for set in self.rrsets.values_mut() {
            set.rollback();
        }
        self.rrsets
            .retain(|_, set| set.count() > 0 || !set.rrsigs().is_empty());
    }

    /// Mark every committed record of every RRset for deletion.
    pub fn wipe_rrsets(&mut self) {
        for set in self.rrsets.values_mut() {
            set.wipe();
        }
    }

    /// Restore a record directly into the committed content.
    pub(crate) fn recover_rr(&mut self, rr: &Rr) {
        let set = self.rrsets.entry(rr.rtype).or_insert_with(|| {
            RrSet::new(self.dname.clone(), rr.class, rr.rtype, rr.ttl)
        });
        set.recover(rr.rdata.clone(), rr.ttl);
    }

    /// Stage for deletion every signature not backed by a current key.
    ///
    /// Returns how many signatures were staged.
    pub fn diff(&mut self, conf: &SignConf) -> usize {
        let mut dropped = 0;
        for set in self.rrsets.values_mut() {
            dropped += set.drop_rrsigs(|sig| !conf.has_key_locator(&sig.key_locator));
        }
        dropped
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::Rr;

    fn rr(line: &str) -> Rr {
        Rr::from_line(line).unwrap()
    }

    fn domain(dname: &str) -> Domain {
        Domain::new(Name::from_text(dname).unwrap())
    }

    #[test]
    fn cname_must_be_alone() {
        let mut d = domain("www.example.");
        d.add_rr(&rr("www.example. 3600 IN CNAME host.example.")).unwrap();
        assert!(d.examine_cname_alone());
        d.add_rr(&rr("www.example. 3600 IN A 192.0.2.1")).unwrap();
        assert!(!d.examine_cname_alone());
    }

    #[test]
    fn singletons() {
        let mut d = domain("www.example.");
        d.add_rr(&rr("www.example. 3600 IN CNAME a.example.")).unwrap();
        assert!(d.examine_singleton(RrType::Cname));
        d.add_rr(&rr("www.example. 3600 IN CNAME b.example.")).unwrap();
        assert!(!d.examine_singleton(RrType::Cname));
    }

    #[test]
    fn zonecut_allows_only_glue_and_ds() {
        let mut d = domain("sub.example.");
        d.add_rr(&rr("sub.example. 3600 IN NS ns.sub.example.")).unwrap();
        d.add_rr(&rr("sub.example. 3600 IN DS 60485 5 1 2BB183AF5F22588179A53B0A98631FAD1A292118")).unwrap();
        assert!(d.examine_valid_zonecut());
        d.add_rr(&rr("sub.example. 3600 IN TXT \"not allowed\"")).unwrap();
        assert!(!d.examine_valid_zonecut());
    }

    #[test]
    fn commit_drops_empty_rrsets() {
        let mut d = domain("www.example.");
        d.add_rr(&rr("www.example. 3600 IN A 192.0.2.1")).unwrap();
        assert!(d.commit().unwrap());
        assert_eq!(d.count_rrsets(), 1);

        d.del_rr(&rr("www.example. 3600 IN A 192.0.2.1")).unwrap();
        assert_eq!(d.count_rrsets(), 0);
        assert!(d.commit().unwrap());
        assert!(d.rrset(RrType::A).is_none());
    }

    #[test]
    fn rollback_removes_fresh_rrsets() {
        let mut d = domain("www.example.");
        d.add_rr(&rr("www.example. 3600 IN A 192.0.2.1")).unwrap();
        d.rollback();
        assert!(d.rrset(RrType::A).is_none());
        assert!(!d.has_pending());
    }

    #[test]
    fn effective_types_are_sorted() {
        let mut d = domain("example.");
        d.add_rr(&rr("example. 3600 IN TXT \"x\"")).unwrap();
        d.add_rr(&rr("example. 3600 IN NS ns1.example.")).unwrap();
        d.add_rr(&rr("example. 3600 IN SOA ns1.example. host.example. 1 2 3 4 5")).unwrap();
        assert_eq!(
            d.effective_types(),
            vec![RrType::Ns, RrType::Soa, RrType::Txt]
        );
    }
}
