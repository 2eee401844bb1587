//! SOA serial arithmetic and progression policies.
//!
//! Serial numbers live in a 32-bit circle (RFC 1982); a signer that gets
//! this wrong strands secondaries on stale zone versions.  [`serial_gt`] is
//! the serial-arithmetic "greater than", and [`SerialPolicy`] decides how
//! the internal serial advances on each signing pass.

use std::fmt;

use jiff::Timestamp;
use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};

use crate::error::ZoneError;

/// The largest serial increment RFC 1982 allows in one step.
const MAX_SERIAL_STEP: u32 = 0x7FFF_FFFF;

/// Serial-arithmetic "greater than" (RFC 1982 section 3.2).
pub fn serial_gt(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) > MAX_SERIAL_STEP
}

//----------- SerialPolicy -----------------------------------------------------

/// Policy for advancing the internal SOA serial.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialPolicy {
    /// Use the current Unix time, in seconds.
    ///
    /// New versions of the zone cannot be generated in the same second, so
    /// a forced bump by one is applied when needed.
    UnixTime,

    /// Increment the serial number on every pass.
    Counter,

    /// Set the serial number to `<YYYY><MM><DD><xx>` in UTC.
    ///
    /// At most 100 versions of the zone can be produced per day.
    DateCounter,

    /// Use the same serial number as the unsigned zone.
    ///
    /// The zone cannot be resigned without a change in the inbound serial;
    /// this is the only policy that can hard-fail.
    Keep,
}

/// The outcome of one serial advance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SerialStep {
    /// The new internal serial.
    pub internal: u32,
}

impl SerialPolicy {
    /// Advance the internal serial.
    ///
    /// `prev` is the previous internal serial, `inbound` the last serial
    /// seen on the unsigned zone, and `initialized` whether a serial was
    /// ever produced before.  The result always satisfies
    /// `serial_gt(result, prev)`, except under [`Keep`](Self::Keep) where
    /// the inbound serial is adopted or the advance fails.
    pub fn advance(
        &self,
        prev: u32,
        inbound: u32,
        initialized: bool,
        now: Timestamp,
    ) -> Result<SerialStep, ZoneError> {
        let mut base = prev;
        let update;
        match self {
            SerialPolicy::UnixTime => {
                let mut soa = inbound.max(now.as_second() as u32);
                if !serial_gt(soa, prev) {
                    soa = prev.wrapping_add(1);
                }
                update = soa.wrapping_sub(prev);
            }
            SerialPolicy::Counter => {
                let mut soa = inbound.max(prev);
                if !initialized {
                    return Ok(SerialStep {
                        internal: soa.wrapping_add(1),
                    });
                }
                if !serial_gt(soa, prev) {
                    soa = prev.wrapping_add(1);
                }
                update = soa.wrapping_sub(prev);
            }
            SerialPolicy::DateCounter => {
                let mut soa = inbound.max(date_serial(now));
                if !serial_gt(soa, prev) {
                    soa = prev.wrapping_add(1);
                }
                update = soa.wrapping_sub(prev);
            }
            SerialPolicy::Keep => {
                let soa = inbound;
                if initialized && !serial_gt(soa, prev) {
                    return Err(ZoneError::SerialNotIncrementing);
                }
                base = soa;
                update = 0;
            }
        }

        // The serial is stored in 32 bits; a larger jump would move the
        // serial "backwards" in RFC 1982 terms.
        let update = update.min(MAX_SERIAL_STEP);
        Ok(SerialStep {
            internal: base.wrapping_add(update),
        })
    }
}

/// The `YYYYMMDD00` base serial for a point in time, in UTC.
fn date_serial(now: Timestamp) -> u32 {
    let date = now.to_zoned(TimeZone::UTC).date();
    let ymd =
        date.year() as u32 * 10_000 + date.month() as u32 * 100 + date.day() as u32;
    ymd * 100
}

impl fmt::Display for SerialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialPolicy::UnixTime => f.write_str("unixtime"),
            SerialPolicy::Counter => f.write_str("counter"),
            SerialPolicy::DateCounter => f.write_str("datecounter"),
            SerialPolicy::Keep => f.write_str("keep"),
        }
    }
}

//============ Tests ===========================================================
