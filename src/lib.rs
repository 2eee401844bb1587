//! The zone-data engine of an authoritative DNSSEC signer.
//!
//! Weir turns an unsigned DNS zone into a signed one: it keeps the zone as
//! an ordered domain tree with a parallel denial of existence chain, and
//! provides the algorithms that
//!
//! - materialize empty non-terminals and classify every name's authority
//!   status,
//! - build and link the NSEC or NSEC3 chain in canonical order,
//! - drive a transactional add/commit/rollback cycle over pending record
//!   changes,
//! - produce RRSIGs per RRset through a pluggable signing oracle, and
//! - advance the SOA serial under the configured policy.
//!
//! Everything around it — zone file and transfer adapters, key management,
//! scheduling, serving — is an external collaborator.  Adapters feed
//! records in through [`ZoneData::add_rr`] and write the signed zone out
//! through [`ZoneData::print`]; the signing oracle is the
//! [`SigningOracle`] trait; the signer policy arrives as a [`SignConf`].

pub use crate::crypto::{FlakyOracle, MockOracle, OracleError, SignRequest, SigningOracle};
pub use crate::denial::Denial;
pub use crate::domain::{Domain, DomainStatus};
pub use crate::error::ZoneError;
pub use crate::name::{Name, NameError};
pub use crate::nsec3::Nsec3Params;
pub use crate::rr::{
    Rdata, RecordError, Rr, RrClass, RrType, RrsigRdata, SoaRdata, TypeBitmap,
};
pub use crate::rrset::{RrSet, SignedRrsig};
pub use crate::serial::{SerialPolicy, serial_gt};
pub use crate::signconf::{SignConf, SignKey};
pub use crate::stats::SignStats;
pub use crate::zonedata::{CommitPolicy, ExamineMode, ZoneData};

pub mod backup;
pub mod crypto;
pub mod denial;
pub mod domain;
pub mod error;
pub mod name;
pub mod nsec3;
pub mod rr;
pub mod rrset;
pub mod serial;
pub mod signconf;
pub mod stats;
mod util;
pub mod zonedata;
