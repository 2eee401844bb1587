//! Errors of the zone data engine.

use std::fmt;

use crate::name::Name;

//----------- ZoneError --------------------------------------------------------

/// An error from a zone data operation.
///
/// The engine reports errors as values and never panics on bad zone content.
/// Unless documented otherwise, a failed mutating operation leaves the engine
/// in the state of the last successful sub-step; the caller is expected to
/// invoke [`rollback()`](crate::ZoneData::rollback()) before any further
/// mutating call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneError {
    /// A precondition was violated (programmer error).
    Assert(&'static str),

    /// A denial of existence data point already exists at this owner.
    ///
    /// Under NSEC3 this is a hash collision; the existing data point is left
    /// intact and the caller may recover.
    Conflict(Name),

    /// A generic operation failure.
    Failed(&'static str),

    /// The rdata comparator is undefined for a record type.
    ///
    /// When this surfaces from a commit the zone is partially updated; it is
    /// not rolled back automatically and requires operator attention.
    CompareFailed,

    /// The signing oracle failed; the caller should roll back and may retry.
    Hsm(String),

    /// A backup stream could not be parsed; the load must be aborted.
    Corrupted(String),

    /// The `keep` serial policy cannot reuse the inbound serial.
    SerialNotIncrementing,

    /// An NSEC3 hash algorithm other than SHA-1 was requested.
    Nsec3Algorithm(u8),
}

impl std::error::Error for ZoneError {}

impl fmt::Display for ZoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneError::Assert(what) => write!(f, "precondition violated: {what}"),
            ZoneError::Conflict(owner) => {
                write!(f, "denial of existence data point exists at {owner}")
            }
            ZoneError::Failed(what) => f.write_str(what),
            ZoneError::CompareFailed => f.write_str("rdata compare function failed"),
            ZoneError::Hsm(err) => write!(f, "signing oracle failure: {err}"),
            ZoneError::Corrupted(what) => write!(f, "backup stream corrupted: {what}"),
            ZoneError::SerialNotIncrementing => {
                f.write_str("cannot keep SOA serial from input zone")
            }
            ZoneError::Nsec3Algorithm(alg) => {
                write!(f, "unsupported NSEC3 hash algorithm {alg}")
            }
        }
    }
}
