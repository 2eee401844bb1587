//! The backup codec.
//!
//! Crash recovery for the zone data: a tokenized text stream, bracketed by
//! a magic line, that round-trips the domain tree, its RRsets, the domain
//! statuses and counters, and the denial chain topology.  Domains are
//! written in canonical order, so the reader can resolve every parent link
//! as it goes.
//!
//! Tokens:
//!
//! - `;WEIRV1` — magic header and trailer.
//! - `;DNAME <owner> <status> <subdomains> <auth-subdomains>` — a domain,
//!   followed by the master-file lines of its records.
//! - `;DNAME3 <hashed-owner>` — the hashed shadow of the preceding domain.
//! - `;NSEC` / `;NSEC3` — the denial RRset of the preceding domain, one
//!   record line.
//!
//! Any unknown token and any premature end of the stream is corruption;
//! the reader reports it and the caller aborts the load.  Signatures are
//! not part of this stream; they are restored separately through
//! [`ZoneData::recover_rrsig_from_backup`].

use std::io::{self, BufRead, Write};

use bytes::Bytes;
use camino::Utf8Path;
use data_encoding::BASE32HEX_NOPAD;
use tracing::warn;

use crate::denial::Denial;
use crate::domain::{Domain, DomainStatus};
use crate::error::ZoneError;
use crate::name::Name;
use crate::rr::{Rr, RrType};
use crate::rrset::RrSet;
use crate::util::write_file;
use crate::zonedata::ZoneData;

/// The magic header and trailer line.
pub const BACKUP_MAGIC: &str = ";WEIRV1";

//--- Writing

/// Write the zone data as a backup stream.
pub fn write_backup(zd: &ZoneData, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{BACKUP_MAGIC}")?;
    for (name, domain) in zd.domains.iter() {
        writeln!(
            out,
            ";DNAME {name} {} {} {}",
            domain.status(),
            domain.subdomain_count(),
            domain.subdomain_auth()
        )?;
        for set in domain.rrsets() {
            for rr in set.records() {
                writeln!(out, "{rr}")?;
            }
        }
        if let Some(denial) = domain.denial().and_then(|owner| zd.denials.get(owner)) {
            if denial.hash().is_some() {
                writeln!(out, ";DNAME3 {}", denial.owner())?;
                if let Some(set) = denial.rrset() {
                    writeln!(out, ";NSEC3")?;
                    for rr in set.records() {
                        writeln!(out, "{rr}")?;
                    }
                }
            } else if let Some(set) = denial.rrset() {
                writeln!(out, ";NSEC")?;
                for rr in set.records() {
                    writeln!(out, "{rr}")?;
                }
            }
        }
    }
    writeln!(out, "{BACKUP_MAGIC}")?;
    Ok(())
}

/// Write the zone data as a backup file, atomically.
pub fn write_backup_file(zd: &ZoneData, path: &Utf8Path) -> io::Result<()> {
    let mut contents = Vec::new();
    write_backup(zd, &mut contents)?;
    write_file(path, &contents)
}

//--- Reading

/// Read a backup stream into the zone data.
pub fn read_backup(zd: &mut ZoneData, mut reader: impl BufRead) -> Result<(), ZoneError> {
    let first = next_line(&mut reader)?
        .ok_or_else(|| ZoneError::Corrupted("empty backup stream".into()))?;
    if first != BACKUP_MAGIC {
        return Err(ZoneError::Corrupted("missing magic header".into()));
    }

    let mut current: Option<Name> = None;
    loop {
        let Some(line) = next_line(&mut reader)? else {
            return Err(ZoneError::Corrupted("premature end of stream".into()));
        };
        if line.is_empty() {
            continue;
        }
        if line == BACKUP_MAGIC {
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix(";DNAME3 ") {
            current = read_nsec3_shadow(zd, rest, current)?;
        } else if let Some(rest) = line.strip_prefix(";DNAME ") {
            current = Some(read_domain(zd, rest)?);
        } else if line == ";NSEC" {
            read_denial_rr(zd, &mut reader, RrType::Nsec)?;
        } else if line == ";NSEC3" {
            read_denial_rr(zd, &mut reader, RrType::Nsec3)?;
        } else if line.starts_with(';') {
            return Err(ZoneError::Corrupted(format!("unknown token '{line}'")));
        } else {
            let rr = Rr::from_line(&line)
                .map_err(|err| ZoneError::Corrupted(format!("bad record line: {err}")))?;
            let Some(domain) = zd.domains.get_mut(&rr.owner) else {
                return Err(ZoneError::Corrupted(format!(
                    "record for unknown domain {}",
                    rr.owner
                )));
            };
            domain.recover_rr(&rr);
        }
    }
}

/// Read a backup file into the zone data.
pub fn read_backup_file(zd: &mut ZoneData, path: &Utf8Path) -> Result<(), ZoneError> {
    let file = std::fs::File::open(path)
        .map_err(|err| ZoneError::Corrupted(format!("cannot open backup: {err}")))?;
    read_backup(zd, io::BufReader::new(file))
}

/// Parse a `;DNAME` payload and insert the domain.
fn read_domain(zd: &mut ZoneData, rest: &str) -> Result<Name, ZoneError> {
    let mut fields = rest.split_whitespace();
    let owner: Name = fields
        .next()
        .ok_or_else(|| ZoneError::Corrupted("truncated ;DNAME".into()))?
        .parse()
        .map_err(|err| ZoneError::Corrupted(format!("bad domain name: {err}")))?;
    let status: DomainStatus = fields
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| ZoneError::Corrupted("bad domain status".into()))?;
    let subdomains: u32 = fields
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| ZoneError::Corrupted("bad subdomain count".into()))?;
    let auth: u32 = fields
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| ZoneError::Corrupted("bad auth subdomain count".into()))?;

    if zd.domains.contains_key(&owner) {
        return Err(ZoneError::Corrupted(format!("duplicate domain {owner}")));
    }
    let mut domain = Domain::new(owner.clone());
    domain.set_status(status);
    domain.set_subdomains(subdomains, auth);

    // Domains arrive in canonical order, so the parent (if any) has been
    // read already.
    if let Some(parent) = owner.parent() {
        if zd.domains.contains_key(&parent) {
            domain.set_parent(parent);
        } else if status != DomainStatus::Apex {
            warn!("recovered domain {owner} has no parent in the backup");
        }
    }
    zd.domains.insert(owner.clone(), domain);
    Ok(owner)
}

/// Parse a `;DNAME3` payload: the hashed shadow of the current domain.
fn read_nsec3_shadow(
    zd: &mut ZoneData,
    rest: &str,
    current: Option<Name>,
) -> Result<Option<Name>, ZoneError> {
    let Some(dname) = current else {
        return Err(ZoneError::Corrupted(";DNAME3 before any domain".into()));
    };
    let owner: Name = rest
        .trim()
        .parse()
        .map_err(|err| ZoneError::Corrupted(format!("bad hashed owner: {err}")))?;

    // The raw hash is the base32hex decode of the first label.
    let label = owner
        .labels()
        .next()
        .ok_or_else(|| ZoneError::Corrupted("hashed owner without labels".into()))?;
    let hash = BASE32HEX_NOPAD
        .decode(label.to_ascii_uppercase().as_slice())
        .map_err(|err| ZoneError::Corrupted(format!("bad hashed owner label: {err}")))?;

    if zd.denials.contains_key(&owner) {
        return Err(ZoneError::Corrupted(format!(
            "duplicate denial data point {owner}"
        )));
    }
    let mut denial = Denial::with_hash(owner.clone(), Bytes::from(hash));
    denial.set_domain(dname.clone());
    zd.denials.insert(owner.clone(), denial);
    if let Some(domain) = zd.domains.get_mut(&dname) {
        domain.set_denial(owner);
    }
    Ok(Some(dname))
}

/// Read the record line following a `;NSEC` or `;NSEC3` token.
fn read_denial_rr(
    zd: &mut ZoneData,
    reader: &mut impl BufRead,
    rtype: RrType,
) -> Result<(), ZoneError> {
    let Some(line) = next_line(reader)? else {
        return Err(ZoneError::Corrupted("premature end of stream".into()));
    };
    let rr = Rr::from_line(&line)
        .map_err(|err| ZoneError::Corrupted(format!("bad denial record: {err}")))?;
    if rr.rtype != rtype {
        return Err(ZoneError::Corrupted(format!(
            "expected {rtype} record, found {}",
            rr.rtype
        )));
    }

    if rtype == RrType::Nsec {
        // The denial data point shares the domain's name; create and link
        // it on the fly.
        if !zd.domains.contains_key(&rr.owner) {
            return Err(ZoneError::Corrupted(format!(
                "NSEC for unknown domain {}",
                rr.owner
            )));
        }
        if !zd.denials.contains_key(&rr.owner) {
            let mut denial = Denial::new(rr.owner.clone());
            denial.set_domain(rr.owner.clone());
            zd.denials.insert(rr.owner.clone(), denial);
            if let Some(domain) = zd.domains.get_mut(&rr.owner) {
                domain.set_denial(rr.owner.clone());
            }
        }
    }

    let Some(denial) = zd.denials.get_mut(&rr.owner) else {
        return Err(ZoneError::Corrupted(format!(
            "denial record for unknown data point {}",
            rr.owner
        )));
    };
    let mut set = RrSet::new(rr.owner.clone(), rr.class, rtype, rr.ttl);
    set.recover(rr.rdata.clone(), rr.ttl);
    denial.recover_rrset(set);
    Ok(())
}

/// Read one line, trimming the terminator; I/O failures are corruption.
fn next_line(reader: &mut impl BufRead) -> Result<Option<String>, ZoneError> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .map_err(|err| ZoneError::Corrupted(format!("read failure: {err}")))?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_magic() {
        let mut zd = ZoneData::new();
        let err = read_backup(&mut zd, "; not a backup\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ZoneError::Corrupted(_)));
    }

    #[test]
    fn rejects_unknown_token() {
        let mut zd = ZoneData::new();
        let stream = format!("{BACKUP_MAGIC}\n;BOGUS\n{BACKUP_MAGIC}\n");
        let err = read_backup(&mut zd, stream.as_bytes()).unwrap_err();
        assert!(matches!(err, ZoneError::Corrupted(_)));
    }

    #[test]
    fn rejects_premature_eof() {
        let mut zd = ZoneData::new();
        let stream = format!("{BACKUP_MAGIC}\n;DNAME example. APEX 0 0\n");
        let err = read_backup(&mut zd, stream.as_bytes()).unwrap_err();
        assert!(matches!(err, ZoneError::Corrupted(_)));
    }

    #[test]
    fn empty_backup_roundtrips() {
        let zd = ZoneData::new();
        let mut buf = Vec::new();
        write_backup(&zd, &mut buf).unwrap();

        let mut restored = ZoneData::new();
        read_backup(&mut restored, buf.as_slice()).unwrap();
        assert_eq!(restored.domains().count(), 0);
    }
}
