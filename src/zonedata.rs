//! The zone data engine.
//!
//! [`ZoneData`] is the in-memory representation of one zone under signing:
//! an ordered tree of [`Domain`]s and, next to it, the ordered denial of
//! existence chain of [`Denial`]s.  Both trees are keyed by canonical name,
//! so forward iteration is the canonical walk every DNSSEC algorithm here
//! depends on.
//!
//! A signing pass drives the engine through a fixed sequence: records are
//! staged with [`add_rr`]/[`del_rr`], [`entize`] materializes empty
//! non-terminals and classifies every name, [`examine`] validates the
//! structure, [`nsecify`] or [`nsecify3`] builds the denial chain, [`sign`]
//! advances the serial and produces signatures, and [`commit`] (or
//! [`update`]) promotes the staged state — or [`rollback`] discards it.
//!
//! The engine is a single-owner, single-threaded state machine per zone.
//! There is no internal locking; the embedding process serializes passes.
//!
//! [`add_rr`]: ZoneData::add_rr
//! [`del_rr`]: ZoneData::del_rr
//! [`entize`]: ZoneData::entize
//! [`examine`]: ZoneData::examine
//! [`nsecify`]: ZoneData::nsecify
//! [`nsecify3`]: ZoneData::nsecify3
//! [`sign`]: ZoneData::sign
//! [`commit`]: ZoneData::commit
//! [`update`]: ZoneData::update
//! [`rollback`]: ZoneData::rollback

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::ops::Bound;

use bytes::Bytes;
use jiff::Timestamp;
use tracing::{debug, error, warn};

use crate::crypto::{SignRequest, SigningOracle};
use crate::denial::Denial;
use crate::domain::{Domain, DomainStatus};
use crate::error::ZoneError;
use crate::name::Name;
use crate::nsec3::Nsec3Params;
use crate::rr::{Rdata, Rr, RrClass, RrType};
use crate::rrset::{RrSet, SignedRrsig};
use crate::serial::serial_gt;
use crate::signconf::{SignConf, SignKey};
use crate::stats::SignStats;

//----------- ExamineMode ------------------------------------------------------

/// Where the records under examination came from.
///
/// Zone transfers arrive pre-validated by the primary, so only file input
/// gets the full occluded-data scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExamineMode {
    /// Records read from a zone file.
    File,

    /// Records received over a zone transfer.
    Transfer,
}

//----------- CommitPolicy -----------------------------------------------------

/// Tunables for the commit pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitPolicy {
    /// Keep the denial data point of a domain that lost all its RRsets but
    /// still has descendants.
    ///
    /// The next chain pass reclaims such data points anyway; dropping them
    /// eagerly shrinks the chain one pass earlier at the cost of extra
    /// churn.  The default is to retain.
    pub retain_orphan_denials: bool,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            retain_orphan_denials: true,
        }
    }
}

//----------- ZoneData ---------------------------------------------------------

/// The zone data: domain tree, denial chain, and the serial triple.
#[derive(Clone, Debug)]
pub struct ZoneData {
    /// The domain tree, in canonical order.
    pub(crate) domains: BTreeMap<Name, Domain>,

    /// The denial of existence chain, in canonical order.
    ///
    /// Under NSEC the owners coincide with domain names; under NSEC3 they
    /// are the hashed owners, and this tree doubles as the hashed shadow
    /// space.
    pub(crate) denials: BTreeMap<Name, Denial>,

    /// Whether a serial was ever produced.
    pub(crate) initialized: bool,

    /// Fallback TTL for generated records.
    pub(crate) default_ttl: u32,

    /// The last serial seen on the unsigned zone.
    pub(crate) inbound_serial: u32,

    /// The latest serial produced by this engine.
    pub(crate) internal_serial: u32,

    /// The last serial written out.
    pub(crate) outbound_serial: u32,
}

impl Default for ZoneData {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneData {
    /// Create empty zone data.
    pub fn new() -> Self {
        Self {
            domains: BTreeMap::new(),
            denials: BTreeMap::new(),
            initialized: false,
            default_ttl: 3600,
            inbound_serial: 0,
            internal_serial: 0,
            outbound_serial: 0,
        }
    }

    /// The fallback TTL for generated records.
    pub fn default_ttl(&self) -> u32 {
        self.default_ttl
    }

    /// Override the fallback TTL for generated records.
    pub fn set_default_ttl(&mut self, ttl: u32) {
        self.default_ttl = ttl;
    }

    /// The serial triple: inbound, internal, outbound.
    pub fn serials(&self) -> (u32, u32, u32) {
        (self.inbound_serial, self.internal_serial, self.outbound_serial)
    }

    /// Whether a serial was ever produced.
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// The domains, in canonical order.
    pub fn domains(&self) -> impl Iterator<Item = (&Name, &Domain)> {
        self.domains.iter()
    }

    /// The denial chain, in canonical order.
    pub fn denials(&self) -> impl Iterator<Item = (&Name, &Denial)> {
        self.denials.iter()
    }

    /// Look up a domain by name.
    pub fn lookup_domain(&self, dname: &Name) -> Option<&Domain> {
        self.domains.get(dname)
    }

    /// Look up a denial of existence data point by owner.
    pub fn lookup_denial(&self, owner: &Name) -> Option<&Denial> {
        self.denials.get(owner)
    }

    /// The canonical predecessor of `owner` in the denial chain, wrapping
    /// around to the last data point.
    fn prev_denial_owner(&self, owner: &Name) -> Option<Name> {
        self.denials
            .range::<Name, _>(..owner)
            .next_back()
            .map(|(name, _)| name.clone())
            .or_else(|| self.denials.keys().next_back().cloned())
    }

    /// The canonical successor of `dname` in the domain tree.
    fn next_domain_name(&self, dname: &Name) -> Option<Name> {
        self.domains
            .range::<Name, _>((Bound::Excluded(dname), Bound::Unbounded))
            .next()
            .map(|(name, _)| name.clone())
    }

    //--- Record staging

    /// Stage a record for addition, creating its domain if needed.
    pub fn add_rr(&mut self, rr: &Rr, at_apex: bool) -> Result<(), ZoneError> {
        if at_apex && rr.rtype == RrType::Soa {
            if let Rdata::Soa(soa) = &rr.rdata {
                self.inbound_serial = soa.serial;
                self.default_ttl = rr.ttl;
            }
        }
        if !self.domains.contains_key(&rr.owner) {
            let mut domain = Domain::new(rr.owner.clone());
            if at_apex {
                domain.set_status(DomainStatus::Apex);
            }
            debug!("+DD {}", rr.owner);
            self.domains.insert(rr.owner.clone(), domain);
        }
        let Some(domain) = self.domains.get_mut(&rr.owner) else {
            return Err(ZoneError::Failed("failed to add domain"));
        };
        domain.add_rr(rr)
    }

    /// Stage a record for deletion.
    ///
    /// Deleting from a name the zone does not know is a warning, not an
    /// error.
    pub fn del_rr(&mut self, rr: &Rr) -> Result<(), ZoneError> {
        match self.domains.get_mut(&rr.owner) {
            Some(domain) => domain.del_rr(rr),
            None => {
                warn!("unable to delete RR from zone data: no such domain {}", rr.owner);
                Ok(())
            }
        }
    }

    /// Stage every committed record of every domain for deletion.
    ///
    /// This precedes a full zone re-read: records the adapter feeds back in
    /// cancel their own deletion, and whatever remains staged afterwards is
    /// content that disappeared from the source.
    pub fn del_rrs(&mut self) {
        for domain in self.domains.values_mut() {
            domain.wipe_rrsets();
        }
    }

    //--- Entize

    /// Materialize empty non-terminals and classify every name.
    ///
    /// Every domain below `apex` gets its parent chain built up to the
    /// apex, with fresh ENT domains created where a name has no node yet.
    /// Afterwards every name's authority status is brought up to date, and
    /// empty non-terminals above freshly occluded names are reclassified as
    /// glue ENTs.
    pub fn entize(&mut self, apex: &Name) -> Result<(), ZoneError> {
        let names: Vec<Name> = self.domains.keys().cloned().collect();
        for name in names {
            self.entize_domain(&name, apex)?;
            let prev_status = match self.domains.get(&name) {
                Some(domain) => domain.status(),
                None => continue,
            };
            self.update_status(&name);
            let Some(domain) = self.domains.get(&name) else {
                continue;
            };
            if domain.status() == DomainStatus::Occluded
                && prev_status != DomainStatus::Occluded
            {
                self.entize_revise(&name);
            }
        }
        Ok(())
    }

    /// Walk from one domain towards the apex, creating or updating parents.
    fn entize_domain(&mut self, name: &Name, apex: &Name) -> Result<(), ZoneError> {
        let Some(domain) = self.domains.get(name) else {
            return Ok(());
        };
        if domain.parent().is_some() {
            // Already linked into the tree.
            return Ok(());
        }

        // An empty non-terminal chain above an unsigned delegation is
        // classified ENT_NS, not ENT_AUTH (RFC 5155 opt-out wants to skip
        // it).
        let ent_to_unsigned = domain.has_data(Some(RrType::Ns), false)
            && !domain.has_data(Some(RrType::Ds), false);
        let serial = domain.internal_serial();

        let mut child = name.clone();
        while child != *apex && child.is_subdomain_of(apex) {
            let Some(parent_name) = child.parent() else {
                break;
            };
            if self.domains.contains_key(&parent_name) {
                let Some(parent) = self.domains.get_mut(&parent_name) else {
                    break;
                };
                parent.set_internal_serial(serial);
                parent.adjust_subdomains(1, if ent_to_unsigned { 0 } else { 1 });
                if parent.count_rrsets() == 0 && parent.status() != DomainStatus::EntAuth {
                    parent.set_status(if ent_to_unsigned {
                        DomainStatus::EntNs
                    } else {
                        DomainStatus::EntAuth
                    });
                }
                if let Some(child_domain) = self.domains.get_mut(&child) {
                    child_domain.set_parent(parent_name);
                }
                break;
            }

            // RFC 5155 section 7.1: empty non-terminals between the apex
            // and an owner name need their own denial data, so they must
            // exist as domains.
            let mut parent = Domain::new(parent_name.clone());
            parent.set_status(if ent_to_unsigned {
                DomainStatus::EntNs
            } else {
                DomainStatus::EntAuth
            });
            parent.set_subdomains(1, if ent_to_unsigned { 0 } else { 1 });
            parent.set_internal_serial(serial);
            debug!("+DD {parent_name} (empty non-terminal)");
            self.domains.insert(parent_name.clone(), parent);
            if let Some(child_domain) = self.domains.get_mut(&child) {
                child_domain.set_parent(parent_name.clone());
            }
            child = parent_name;
        }
        Ok(())
    }

    /// Bring one domain's authority status up to date.
    fn update_status(&mut self, name: &Name) {
        let Some(domain) = self.domains.get(name) else {
            return;
        };
        if matches!(domain.status(), DomainStatus::Apex | DomainStatus::Hash) {
            return;
        }
        if domain.count_rrsets() == 0 {
            // Empty non-terminal statuses are managed by the entize walk.
            return;
        }
        let status = if self.occluded_by_ancestor(name) {
            DomainStatus::Occluded
        } else if domain.has_data(Some(RrType::Ns), false) {
            if domain.has_data(Some(RrType::Ds), false) {
                DomainStatus::Ds
            } else {
                DomainStatus::Ns
            }
        } else {
            DomainStatus::Auth
        };
        if let Some(domain) = self.domains.get_mut(name) {
            domain.set_status(status);
        }
    }

    /// Whether any proper ancestor cuts this name out of the zone.
    fn occluded_by_ancestor(&self, name: &Name) -> bool {
        let mut cursor = self
            .domains
            .get(name)
            .and_then(|domain| domain.parent().cloned());
        while let Some(parent_name) = cursor {
            let Some(parent) = self.domains.get(&parent_name) else {
                break;
            };
            if parent.has_data(Some(RrType::Dname), false) {
                return true;
            }
            if parent.status() != DomainStatus::Apex
                && parent.has_data(Some(RrType::Ns), false)
            {
                return true;
            }
            cursor = parent.parent().cloned();
        }
        false
    }

    /// Reclassify the ENT chain above a freshly occluded domain as glue.
    fn entize_revise(&mut self, name: &Name) {
        let mut cursor = self
            .domains
            .get(name)
            .and_then(|domain| domain.parent().cloned());
        while let Some(parent_name) = cursor {
            let Some(parent) = self.domains.get_mut(&parent_name) else {
                break;
            };
            if !parent.status().is_ent() {
                break;
            }
            parent.set_status(DomainStatus::EntGlue);
            cursor = parent.parent().cloned();
        }
    }

    //--- Examine

    /// Validate the zone structure.
    ///
    /// The CNAME/DNAME singleton rules are hard errors.  Occluded data is
    /// scanned for in [`ExamineMode::File`] only and logged at warning
    /// severity; it never fails the pass.
    pub fn examine(&self, apex: &Name, mode: ExamineMode) -> Result<(), ZoneError> {
        let mut sound = true;
        for (name, domain) in &self.domains {
            if !domain.examine_cname_alone() {
                error!("CNAME and other data at {name}");
                sound = false;
            }
            if !domain.examine_singleton(RrType::Cname) {
                error!("multiple CNAME RRs at {name}");
                sound = false;
            }
            if !domain.examine_singleton(RrType::Dname) {
                error!("multiple DNAME RRs at {name}");
                sound = false;
            }
            if mode == ExamineMode::File {
                // Occluded data is the operator's zone file being sloppy,
                // not a reason to refuse service.
                let _ = self.examine_occluded(name, domain, apex);
            }
        }
        if sound {
            Ok(())
        } else {
            Err(ZoneError::Failed("zone data contains errors"))
        }
    }

    /// Scan one domain for occluded data, warning about findings.
    fn examine_occluded(&self, name: &Name, domain: &Domain, apex: &Name) -> bool {
        if name == apex {
            return false;
        }
        if !domain.examine_valid_zonecut() {
            warn!("occluded (non-glue non-DS) data at {name} NS");
            return true;
        }
        let mut cursor = name.parent();
        while let Some(parent_name) = cursor {
            if parent_name == *apex || !parent_name.is_subdomain_of(apex) {
                break;
            }
            if let Some(parent) = self.domains.get(&parent_name) {
                if parent.has_data(Some(RrType::Dname), false) && domain.has_data(None, false) {
                    warn!("occluded data at {name} (below {parent_name} DNAME)");
                    return true;
                } else if parent.has_data(Some(RrType::Ns), false)
                    && domain.has_data(None, true)
                {
                    warn!("occluded (non-glue) data at {name} (below {parent_name} NS)");
                    return true;
                } else if parent.has_data(Some(RrType::Ns), false)
                    && domain.has_data(None, false)
                    && !parent.ns_references(name)
                {
                    // Glue that no NS record points at.
                    warn!("occluded data at {name} (below {parent_name} NS)");
                    return true;
                }
            }
            cursor = parent_name.parent();
        }
        false
    }

    //--- The denial chain

    /// Add a denial of existence data point for a domain.
    ///
    /// With NSEC3 parameters the data point's owner is the hashed name
    /// under the apex; otherwise it is the domain name itself.  The
    /// canonical predecessor (wrapping around to the last data point) is
    /// marked for successor recomputation.
    pub fn add_denial(
        &mut self,
        dname: &Name,
        apex: &Name,
        nsec3params: Option<&Nsec3Params>,
    ) -> Result<(), ZoneError> {
        if !self.domains.contains_key(dname) {
            error!("unable to add denial of existence data point: no domain {dname}");
            return Err(ZoneError::Assert("no domain for denial data point"));
        }

        let (owner, hash) = match nsec3params {
            Some(params) => {
                let digest = Bytes::from(params.hash(dname)?);
                let owner = params.hash_name(dname, apex)?;
                (owner, Some(digest))
            }
            None => (dname.clone(), None),
        };

        if self.denials.contains_key(&owner) {
            error!("unable to add denial of existence for {dname}: data point exists (collision?)");
            return Err(ZoneError::Conflict(owner));
        }

        let mut denial = match hash {
            Some(digest) => Denial::with_hash(owner.clone(), digest),
            None => Denial::new(owner.clone()),
        };
        denial.set_domain(dname.clone());
        self.denials.insert(owner.clone(), denial);

        if let Some(prev) = self.prev_denial_owner(&owner) {
            if let Some(prev_denial) = self.denials.get_mut(&prev) {
                prev_denial.mark_nxt_changed();
            }
        }
        if let Some(domain) = self.domains.get_mut(dname) {
            domain.set_denial(owner);
        }
        Ok(())
    }

    /// Remove a denial of existence data point.
    ///
    /// The generated RRset is wiped and committed before the node goes, and
    /// the canonical predecessor is marked for successor recomputation.
    pub fn del_denial(&mut self, owner: &Name) -> Result<(), ZoneError> {
        if !self.denials.contains_key(owner) {
            error!("unable to del denial of existence data point {owner}: not found");
            return Err(ZoneError::Failed("denial data point not found"));
        }
        if let Some(prev) = self.prev_denial_owner(owner) {
            if prev != *owner {
                if let Some(prev_denial) = self.denials.get_mut(&prev) {
                    prev_denial.mark_nxt_changed();
                }
            }
        }
        let Some(mut denial) = self.denials.remove(owner) else {
            return Err(ZoneError::Failed("denial data point not found"));
        };
        if let Some(set) = denial.rrset_mut() {
            set.wipe();
            set.commit()?;
        }
        if let Some(dname) = denial.domain() {
            if let Some(domain) = self.domains.get_mut(dname) {
                if domain.denial() == Some(owner) {
                    domain.clear_denial();
                }
            }
        }
        Ok(())
    }

    /// Drop denial data points that no longer cover a retained domain, or
    /// that belong to the other denial flavour.
    fn prune_denials(
        &mut self,
        retained: &BTreeSet<Name>,
        nsec3: bool,
    ) -> Result<(), ZoneError> {
        let stale: Vec<Name> = self
            .denials
            .iter()
            .filter(|(_, denial)| {
                let covered = denial
                    .domain()
                    .map(|dname| retained.contains(dname))
                    .unwrap_or(false);
                !covered || denial.hash().is_some() != nsec3
            })
            .map(|(owner, _)| owner.clone())
            .collect();
        for owner in stale {
            self.del_denial(&owner)?;
        }
        Ok(())
    }

    /// Build and link the NSEC chain.
    ///
    /// Every retained domain (authoritative status and at least one RRset)
    /// gets an NSEC RRset pointing at the next retained name, wrapping
    /// around to the apex at the end of the zone.
    pub fn nsecify(&mut self, klass: RrClass, stats: &mut SignStats) -> Result<(), ZoneError> {
        if self.domains.is_empty() {
            return Ok(());
        }
        let retained: Vec<Name> = self
            .domains
            .iter()
            .filter(|(_, domain)| {
                !matches!(
                    domain.status(),
                    DomainStatus::None | DomainStatus::Occluded | DomainStatus::Hash
                ) && domain.count_rrsets() > 0
            })
            .map(|(name, _)| name.clone())
            .collect();
        if retained.is_empty() {
            return Ok(());
        }
        let apex = match retained
            .iter()
            .find(|name| {
                self.domains
                    .get(*name)
                    .map(|domain| domain.status() == DomainStatus::Apex)
                    .unwrap_or(false)
            }) {
            Some(apex) => apex.clone(),
            None => {
                error!("unable to nsecify: apex undefined");
                return Err(ZoneError::Failed("apex undefined"));
            }
        };

        let retained_set: BTreeSet<Name> = retained.iter().cloned().collect();
        self.prune_denials(&retained_set, false)?;
        for name in &retained {
            let has_denial = self
                .domains
                .get(name)
                .map(|domain| domain.denial().is_some())
                .unwrap_or(false);
            if !has_denial {
                self.add_denial(name, &apex, None)?;
            }
        }

        let ttl = self.default_ttl;
        for (i, name) in retained.iter().enumerate() {
            let next = &retained[(i + 1) % retained.len()];
            let Some(domain) = self.domains.get(name) else {
                continue;
            };
            let types = domain.effective_types();
            let Some(owner) = domain.denial().cloned() else {
                continue;
            };
            if let Some(denial) = self.denials.get_mut(&owner) {
                denial.nsecify(&types, next, ttl, klass, stats);
            }
        }
        Ok(())
    }

    /// Build and link the NSEC3 chain.
    ///
    /// Phase one makes sure every qualifying domain has a hashed denial
    /// data point (skipping unsigned delegations and their ENT chains when
    /// Opt-Out is in use); phase two walks the chain in hash order and
    /// points every data point at its successor, wrapping around at the
    /// end.  A sole NSEC3 points at itself.
    pub fn nsecify3(
        &mut self,
        klass: RrClass,
        params: &Nsec3Params,
        stats: &mut SignStats,
    ) -> Result<(), ZoneError> {
        if self.domains.is_empty() {
            return Ok(());
        }
        let apex = match self
            .domains
            .iter()
            .find(|(_, domain)| domain.status() == DomainStatus::Apex)
        {
            Some((name, _)) => name.clone(),
            None => {
                error!("apex undefined, aborting nsecify3");
                return Err(ZoneError::Failed("apex undefined"));
            }
        };

        let qualifying: Vec<Name> = self
            .domains
            .iter()
            .filter(|(name, domain)| match domain.status() {
                DomainStatus::None | DomainStatus::Occluded | DomainStatus::EntGlue
                | DomainStatus::Hash => {
                    debug!("nsecify3: skip glue domain {name}");
                    false
                }
                DomainStatus::Ns | DomainStatus::EntNs if params.opt_out() => {
                    debug!("opt-out {name}: unsigned delegation");
                    false
                }
                _ => true,
            })
            .map(|(name, _)| name.clone())
            .collect();

        let qualifying_set: BTreeSet<Name> = qualifying.iter().cloned().collect();
        self.prune_denials(&qualifying_set, true)?;
        for name in &qualifying {
            let has_denial = self
                .domains
                .get(name)
                .map(|domain| domain.denial().is_some())
                .unwrap_or(false);
            if !has_denial {
                self.add_denial(name, &apex, Some(params))?;
            }
        }

        // The chain is complete; fill in every next hashed owner from the
        // successor, wrapping from the last data point to the first.
        let chain: Vec<Name> = self.denials.keys().cloned().collect();
        let ttl = self.default_ttl;
        for (i, owner) in chain.iter().enumerate() {
            let next_owner = &chain[(i + 1) % chain.len()];
            let next_hash = match self.denials.get(next_owner).and_then(|d| d.hash().cloned()) {
                Some(hash) => hash,
                None => {
                    error!("denial chain node {next_owner} lacks its hash");
                    return Err(ZoneError::Failed("denial chain node without hash"));
                }
            };
            let (types, include_rrsig) = match self
                .denials
                .get(owner)
                .and_then(|denial| denial.domain())
                .and_then(|dname| self.domains.get(dname))
            {
                Some(domain) => (
                    domain.effective_types(),
                    matches!(
                        domain.status(),
                        DomainStatus::Apex | DomainStatus::Auth | DomainStatus::Ds
                    ),
                ),
                None => continue,
            };
            if let Some(denial) = self.denials.get_mut(owner) {
                denial.nsecify3(&types, include_rrsig, params, &next_hash, ttl, klass, stats);
            }
        }
        Ok(())
    }

    /// Wipe every NSEC RRset, keeping the chain topology.
    pub fn wipe_nsec(&mut self) {
        for denial in self.denials.values_mut() {
            denial.wipe();
        }
    }

    /// Tear down the NSEC3 denial chain wholesale.
    pub fn wipe_nsec3(&mut self) {
        let owners: Vec<Name> = self.denials.keys().cloned().collect();
        for owner in owners {
            if let Some(denial) = self.denials.remove(&owner) {
                if let Some(dname) = denial.domain() {
                    if let Some(domain) = self.domains.get_mut(dname) {
                        domain.clear_denial();
                    }
                }
            }
        }
    }

    //--- Signatures

    /// Drop signatures that are no longer backed by a current key.
    pub fn diff(&mut self, conf: &SignConf) -> Result<(), ZoneError> {
        for domain in self.domains.values_mut() {
            domain.diff(conf);
        }
        for denial in self.denials.values_mut() {
            if let Some(set) = denial.rrset_mut() {
                set.drop_rrsigs(|sig| !conf.has_key_locator(&sig.key_locator));
            }
        }
        Ok(())
    }

    /// Advance the serial under the configured policy.
    pub fn update_serial(&mut self, sc: &SignConf, now: Timestamp) -> Result<(), ZoneError> {
        debug!(
            "update serial: inbound={} internal={} outbound={} now={}",
            self.inbound_serial,
            self.internal_serial,
            self.outbound_serial,
            now.as_second()
        );
        let step = sc.serial_policy.advance(
            self.internal_serial,
            self.inbound_serial,
            self.initialized,
            now,
        )?;
        debug!(
            "update serial: previous={} new={}",
            self.internal_serial, step.internal
        );
        self.internal_serial = step.internal;
        self.initialized = true;
        Ok(())
    }

    /// Produce signatures for every RRset that needs one.
    ///
    /// The serial is advanced first if the internal serial has already been
    /// written out.  A signing context is opened with the oracle and closed
    /// again on every exit path.  An RRset is (re)signed when its content
    /// changed, when it lacks a valid signature by one of the current keys,
    /// or when a signature expires within the refresh window.
    pub fn sign<O: SigningOracle>(
        &mut self,
        owner: &Name,
        sc: &SignConf,
        oracle: &O,
        stats: &mut SignStats,
        now: Timestamp,
    ) -> Result<(), ZoneError> {
        if !serial_gt(self.internal_serial, self.outbound_serial) {
            self.update_serial(sc, now)?;
        }
        if self.internal_serial == 0 {
            error!("unable to sign zone data: failed to update serial");
            return Err(ZoneError::Failed("failed to update serial"));
        }

        // Stamp the new serial into the apex SOA before anything is
        // canonicalized, so the signature covers what will be published.
        let internal_serial = self.internal_serial;
        for domain in self.domains.values_mut() {
            if domain.status() != DomainStatus::Apex {
                continue;
            }
            if let Some(set) = domain.rrset_mut(RrType::Soa) {
                if set.set_soa_serial(internal_serial) {
                    set.drop_rrsigs(|_| true);
                }
            }
        }

        let mut ctx = oracle.open().map_err(|err| {
            error!("error creating signing context: {err}");
            ZoneError::Hsm(err.to_string())
        })?;
        debug!(
            "rrsig timers: offset={} jitter={} validity={}",
            sc.sig_inception_offset.as_secs(),
            sc.sig_jitter.as_secs(),
            sc.sig_validity_default.as_secs()
        );
        let result = self.sign_domains(oracle, &mut ctx, owner, sc, stats, now);
        oracle.close(ctx);
        result
    }

    fn sign_domains<O: SigningOracle>(
        &mut self,
        oracle: &O,
        ctx: &mut O::Context,
        zone_owner: &Name,
        sc: &SignConf,
        stats: &mut SignStats,
        now: Timestamp,
    ) -> Result<(), ZoneError> {
        let now_secs = now.as_second() as u32;
        let inception = now_secs.wrapping_sub(sc.sig_inception_offset.as_secs() as u32);
        let horizon = now_secs.wrapping_add(sc.sig_refresh.as_secs() as u32);
        let internal_serial = self.internal_serial;

        let names: Vec<Name> = self.domains.keys().cloned().collect();
        for name in names {
            let Some(domain) = self.domains.get(&name) else {
                continue;
            };
            let status = domain.status();
            if matches!(
                status,
                DomainStatus::None
                    | DomainStatus::Occluded
                    | DomainStatus::EntGlue
                    | DomainStatus::Hash
            ) {
                continue;
            }

            // At a secure delegation only the DS RRset is signed; at an
            // unsigned delegation nothing is.  Glue is never signed.
            let rtypes: Vec<RrType> = match status {
                DomainStatus::Apex | DomainStatus::Auth => domain
                    .rrsets()
                    .map(|set| set.rtype())
                    .filter(|rtype| *rtype != RrType::Rrsig)
                    .collect(),
                DomainStatus::Ds => vec![RrType::Ds],
                _ => Vec::new(),
            };
            for rtype in rtypes {
                let Some(set) = self
                    .domains
                    .get_mut(&name)
                    .and_then(|domain| domain.rrset_mut(rtype))
                else {
                    continue;
                };
                sign_rrset(
                    set,
                    oracle,
                    ctx,
                    zone_owner,
                    sc,
                    sc.sig_validity_default,
                    inception,
                    horizon,
                    now_secs,
                    stats,
                )?;
            }

            // The denial RRset covering this name, with the denial
            // validity.
            let denial_owner = self
                .domains
                .get(&name)
                .and_then(|domain| domain.denial().cloned());
            if let Some(owner) = denial_owner {
                if let Some(set) = self
                    .denials
                    .get_mut(&owner)
                    .and_then(|denial| denial.rrset_mut())
                {
                    sign_rrset(
                        set,
                        oracle,
                        ctx,
                        zone_owner,
                        sc,
                        sc.sig_validity_denial,
                        inception,
                        horizon,
                        now_secs,
                        stats,
                    )?;
                }
            }

            if let Some(domain) = self.domains.get_mut(&name) {
                domain.set_internal_serial(internal_serial);
            }
        }
        Ok(())
    }

    //--- Transactions

    /// Promote all staged changes, dropping empty leaf domains.
    pub fn commit(&mut self) -> Result<(), ZoneError> {
        self.commit_with(CommitPolicy::default())
    }

    /// Promote all staged changes under an explicit policy.
    ///
    /// Domains are committed in reverse canonical order so children are
    /// evaluated before their parents and leaf removal cascades.  A domain
    /// that ends up with no RRsets is removed when its canonical successor
    /// is not one of its descendants (i.e. it is a leaf).
    pub fn commit_with(&mut self, policy: CommitPolicy) -> Result<(), ZoneError> {
        let names: Vec<Name> = self.domains.keys().cloned().collect();
        for name in names.iter().rev() {
            let Some(domain) = self.domains.get_mut(name) else {
                continue;
            };
            let changed = domain.commit()?;
            let empty = domain.count_rrsets() == 0;
            let denial_owner = domain.denial().cloned();
            if changed {
                if let Some(owner) = &denial_owner {
                    if let Some(denial) = self.denials.get_mut(owner) {
                        denial.mark_bitmap_changed();
                    }
                }
            }
            if empty {
                let is_leaf = match self.next_domain_name(name) {
                    Some(next) => !next.is_subdomain_of(name),
                    None => true,
                };
                if is_leaf {
                    if self.del_domain(name).is_err() {
                        warn!("unable to delete obsoleted domain {name}");
                        return Err(ZoneError::Failed("unable to delete obsoleted domain"));
                    }
                } else if let Some(owner) = denial_owner {
                    if !policy.retain_orphan_denials {
                        self.del_denial(&owner)?;
                    }
                }
            }
        }
        for denial in self.denials.values_mut() {
            if let Some(set) = denial.rrset_mut() {
                set.commit()?;
            }
        }
        Ok(())
    }

    /// Discard all staged changes on every domain and denial data point.
    ///
    /// Rollback is idempotent and never removes domains; afterwards the
    /// engine is back at the last committed state.
    pub fn rollback(&mut self) {
        for domain in self.domains.values_mut() {
            domain.rollback();
        }
        for denial in self.denials.values_mut() {
            if let Some(set) = denial.rrset_mut() {
                set.rollback();
            }
        }
    }

    /// The transactional update pass: advance the serial, commit every
    /// domain, and garbage-collect empty leaves up their parent chains.
    ///
    /// A comparator failure is fatal and leaves the zone partially updated
    /// for the operator; any other failure rolls the zone back.
    pub fn update(&mut self, sc: &SignConf, now: Timestamp) -> Result<(), ZoneError> {
        if let Err(err) = self.update_serial(sc, now) {
            error!("unable to update zone data: failed to update serial");
            self.rollback();
            return Err(err);
        }
        if self.internal_serial == 0 {
            error!("unable to update zone data: failed to update serial");
            self.rollback();
            return Err(ZoneError::Failed("failed to update serial"));
        }

        let names: Vec<Name> = self.domains.keys().cloned().collect();
        for name in names {
            let Some(domain) = self.domains.get_mut(&name) else {
                // Removed by an earlier garbage collection walk.
                continue;
            };
            match domain.commit() {
                Ok(changed) => {
                    if changed {
                        if let Some(owner) = domain.denial().cloned() {
                            if let Some(denial) = self.denials.get_mut(&owner) {
                                denial.mark_bitmap_changed();
                            }
                        }
                    }
                }
                Err(ZoneError::CompareFailed) => {
                    error!(
                        "unable to update zone data to serial {}: rr compare function failed; \
                         the zone is partially updated",
                        self.internal_serial
                    );
                    return Err(ZoneError::CompareFailed);
                }
                Err(err) => {
                    self.rollback();
                    return Err(err);
                }
            }

            let Some(domain) = self.domains.get(&name) else {
                continue;
            };
            if domain.count_rrsets() == 0 && !domain.status().is_ent() {
                let mut parent = domain.parent().cloned();
                if domain.subdomain_count() == 0 && self.del_domain(&name).is_err() {
                    error!("failed to delete obsoleted domain {name}");
                }
                while let Some(parent_name) = parent {
                    let Some(candidate) = self.domains.get(&parent_name) else {
                        break;
                    };
                    if candidate.count_rrsets() > 0 {
                        break;
                    }
                    let next = candidate.parent().cloned();
                    if candidate.subdomain_count() == 0
                        && self.del_domain(&parent_name).is_err()
                    {
                        error!("failed to delete obsoleted domain {parent_name}");
                    }
                    parent = next;
                }
            }
        }
        for denial in self.denials.values_mut() {
            if let Some(set) = denial.rrset_mut() {
                set.commit()?;
            }
        }
        Ok(())
    }

    /// Remove a domain from the tree.
    ///
    /// The parent's subdomain counters are adjusted and the domain's denial
    /// data point, if any, is removed with it (marking the denial chain
    /// predecessor for successor recomputation).
    pub fn del_domain(&mut self, dname: &Name) -> Result<(), ZoneError> {
        let Some(domain) = self.domains.get(dname) else {
            error!("unable to del domain {dname}: not found");
            return Err(ZoneError::Failed("domain not found"));
        };
        debug!("-DD {dname}");
        let parent = domain.parent().cloned();
        let denial_owner = domain.denial().cloned();
        let status = domain.status();

        if let Some(owner) = denial_owner {
            if self.del_denial(&owner).is_err() {
                error!("failed to delete corresponding denial, deleting domain {dname}");
            }
        }
        if let Some(parent_name) = parent {
            if let Some(parent) = self.domains.get_mut(&parent_name) {
                parent.adjust_subdomains(-1, if status.is_auth() { -1 } else { 0 });
            }
        }
        self.domains.remove(dname);
        Ok(())
    }

    /// Tear down all zone data: the denial chain first, then the domains.
    pub fn cleanup(&mut self) {
        self.denials.clear();
        self.domains.clear();
    }

    //--- Printing

    /// Print the zone in master-file form.
    ///
    /// Domains are walked in canonical order; every RRset is followed by
    /// its signatures and every name by its denial RRset.  The apex SOA is
    /// stamped with the internal serial, which is recorded as written out.
    pub fn print(&mut self, out: &mut impl io::Write) -> io::Result<()> {
        if self.domains.is_empty() {
            writeln!(out, "; empty zone")?;
            return Ok(());
        }
        for (_, domain) in self.domains.iter() {
            for set in domain.rrsets() {
                for mut rr in set.records() {
                    if rr.rtype == RrType::Soa && self.initialized {
                        if let Rdata::Soa(soa) = &mut rr.rdata {
                            soa.serial = self.internal_serial;
                        }
                    }
                    writeln!(out, "{rr}")?;
                }
                for sig in set.rrsigs() {
                    writeln!(out, "{}", rrsig_rr(set, sig))?;
                }
            }
            if let Some(denial) = domain.denial().and_then(|owner| self.denials.get(owner)) {
                if let Some(set) = denial.rrset() {
                    for rr in set.records() {
                        writeln!(out, "{rr}")?;
                    }
                    for sig in set.rrsigs() {
                        writeln!(out, "{}", rrsig_rr(set, sig))?;
                    }
                }
            }
        }
        self.outbound_serial = self.internal_serial;
        Ok(())
    }

    /// Print the denial of existence records only.
    pub fn print_nsec(&self, out: &mut impl io::Write) -> io::Result<()> {
        if self.denials.is_empty() {
            writeln!(out, "; empty zone")?;
            return Ok(());
        }
        for denial in self.denials.values() {
            if let Some(set) = denial.rrset() {
                for rr in set.records() {
                    writeln!(out, "{rr}")?;
                }
            }
        }
        Ok(())
    }

    /// Print the signatures only.
    pub fn print_rrsig(&self, out: &mut impl io::Write) -> io::Result<()> {
        if self.domains.is_empty() {
            writeln!(out, "; empty zone")?;
            return Ok(());
        }
        for domain in self.domains.values() {
            for set in domain.rrsets() {
                for sig in set.rrsigs() {
                    writeln!(out, "{}", rrsig_rr(set, sig))?;
                }
            }
        }
        for denial in self.denials.values() {
            if let Some(set) = denial.rrset() {
                for sig in set.rrsigs() {
                    writeln!(out, "{}", rrsig_rr(set, sig))?;
                }
            }
        }
        Ok(())
    }

    //--- Backup recovery

    /// Restore the zone data from a backup stream.
    pub fn recover_from_backup(&mut self, reader: impl io::BufRead) -> Result<(), ZoneError> {
        crate::backup::read_backup(self, reader)
    }

    /// Write the zone data to a backup stream.
    pub fn backup(&self, out: &mut impl io::Write) -> io::Result<()> {
        crate::backup::write_backup(self, out)
    }

    /// Restore one record into its domain's committed content.
    pub fn recover_rr_from_backup(&mut self, rr: &Rr) -> Result<(), ZoneError> {
        match self.domains.get_mut(&rr.owner) {
            Some(domain) => {
                domain.recover_rr(rr);
                Ok(())
            }
            None => {
                error!("unable to recover RR: domain {} does not exist", rr.owner);
                Err(ZoneError::Failed("domain does not exist"))
            }
        }
    }

    /// Restore one signature, with the key that produced it.
    ///
    /// Signatures over denial RRsets are routed into the denial chain, the
    /// rest to the covered RRset of the owner domain.
    pub fn recover_rrsig_from_backup(
        &mut self,
        rrsig: &Rr,
        locator: &str,
        flags: u16,
    ) -> Result<(), ZoneError> {
        let Rdata::Rrsig(sig) = &rrsig.rdata else {
            return Err(ZoneError::Failed("not an RRSIG record"));
        };
        match sig.type_covered {
            RrType::Nsec | RrType::Nsec3 => {
                let Some(set) = self
                    .denials
                    .get_mut(&rrsig.owner)
                    .and_then(|denial| denial.rrset_mut())
                else {
                    error!(
                        "unable to recover RRSIG: no denial data point at {}",
                        rrsig.owner
                    );
                    return Err(ZoneError::Failed("denial data point does not exist"));
                };
                set.recover_rrsig(sig.clone(), locator, flags);
                Ok(())
            }
            covered => {
                let Some(set) = self
                    .domains
                    .get_mut(&rrsig.owner)
                    .and_then(|domain| domain.rrset_mut(covered))
                else {
                    error!(
                        "unable to recover RRSIG: no {} RRset at {}",
                        covered, rrsig.owner
                    );
                    return Err(ZoneError::Failed("covered RRset does not exist"));
                };
                set.recover_rrsig(sig.clone(), locator, flags);
                Ok(())
            }
        }
    }
}

/// A signature as a printable record.
fn rrsig_rr(set: &RrSet, sig: &SignedRrsig) -> Rr {
    Rr::new(
        set.owner().clone(),
        set.ttl(),
        set.class(),
        RrType::Rrsig,
        Rdata::Rrsig(sig.rdata.clone()),
    )
}

/// Sign one RRset if it is due.
///
/// Expiring signatures are dropped first; then, per applicable key, a fresh
/// signature is requested when the RRset changed or no valid signature by
/// that key remains.
#[allow(clippy::too_many_arguments)]
fn sign_rrset<O: SigningOracle>(
    set: &mut RrSet,
    oracle: &O,
    ctx: &mut O::Context,
    zone_owner: &Name,
    sc: &SignConf,
    validity: std::time::Duration,
    inception: u32,
    horizon: u32,
    now_secs: u32,
    stats: &mut SignStats,
) -> Result<(), ZoneError> {
    if set.effective_count() == 0 {
        // The RRset is on its way out; nothing left to cover.
        return Ok(());
    }

    let dropped = set.drop_rrsigs(|sig| !serial_gt(sig.rdata.expiration, horizon));
    stats.rrsig_dropped += dropped as u32;

    let keys: Vec<SignKey> = sc.signing_keys(set.rtype()).cloned().collect();
    for key in keys {
        if !set.has_pending() && set.has_valid_rrsig(&key.locator, horizon) {
            stats.rrsig_reused += 1;
            continue;
        }
        // The content changed: whatever this key signed before is stale.
        set.drop_rrsigs(|sig| sig.key_locator == key.locator);

        let mut expiration = now_secs.wrapping_add(validity.as_secs() as u32);
        let jitter = sc.sig_jitter.as_secs() as i64;
        if jitter > 0 {
            use rand::Rng;
            let offset = rand::thread_rng().gen_range(-jitter..=jitter);
            expiration = expiration.wrapping_add(offset as u32);
        }

        let canonical = set.canonical(None);
        let request = SignRequest {
            rrset: &canonical,
            owner: set.owner(),
            type_covered: set.rtype(),
            original_ttl: set.ttl(),
            inception,
            expiration,
            signer: zone_owner,
            key: &key,
        };
        let rrsig = oracle
            .sign(ctx, &request)
            .map_err(|err| ZoneError::Hsm(err.to_string()))?;
        set.attach_rrsig(rrsig, &key.locator, key.flags);
        stats.rrsig_created += 1;
    }
    Ok(())
}
