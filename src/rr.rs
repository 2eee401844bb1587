//! Resource records.
//!
//! This module provides the record-level building blocks of the zone data
//! engine: [`RrType`], [`RrClass`], typed [`Rdata`] and the full record
//! [`Rr`].  Rdata is kept in parsed form so the engine can reach into the
//! fields it needs (the SOA serial, NS targets for glue checks, RRSIG
//! timestamps) while still producing the two external representations:
//!
//! - the canonical wire form of RFC 4034 section 6.2, used for signing and
//!   for rdata comparison, and
//! - master-file presentation, used for printing and for the backup stream.

use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use bytes::Bytes;
use data_encoding::{BASE32HEX_NOPAD, BASE64, HEXLOWER_PERMISSIVE, HEXUPPER};

use crate::name::{Name, NameError};

//----------- RrType -----------------------------------------------------------

/// A resource record type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RrType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Dname,
    Ds,
    Rrsig,
    Nsec,
    Dnskey,
    Nsec3,
    Nsec3param,
    /// A type without a parsed representation (RFC 3597).
    Other(u16),
}

impl RrType {
    /// The IANA type number.
    pub fn to_u16(self) -> u16 {
        match self {
            RrType::A => 1,
            RrType::Ns => 2,
            RrType::Cname => 5,
            RrType::Soa => 6,
            RrType::Ptr => 12,
            RrType::Mx => 15,
            RrType::Txt => 16,
            RrType::Aaaa => 28,
            RrType::Srv => 33,
            RrType::Dname => 39,
            RrType::Ds => 43,
            RrType::Rrsig => 46,
            RrType::Nsec => 47,
            RrType::Dnskey => 48,
            RrType::Nsec3 => 50,
            RrType::Nsec3param => 51,
            RrType::Other(n) => n,
        }
    }

    /// The type for an IANA type number.
    pub fn from_u16(n: u16) -> Self {
        match n {
            1 => RrType::A,
            2 => RrType::Ns,
            5 => RrType::Cname,
            6 => RrType::Soa,
            12 => RrType::Ptr,
            15 => RrType::Mx,
            16 => RrType::Txt,
            28 => RrType::Aaaa,
            33 => RrType::Srv,
            39 => RrType::Dname,
            43 => RrType::Ds,
            46 => RrType::Rrsig,
            47 => RrType::Nsec,
            48 => RrType::Dnskey,
            50 => RrType::Nsec3,
            51 => RrType::Nsec3param,
            n => RrType::Other(n),
        }
    }

    /// Whether records of this type are address glue below a delegation.
    pub fn is_glue_type(self) -> bool {
        matches!(self, RrType::A | RrType::Aaaa)
    }
}

impl Ord for RrType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_u16().cmp(&other.to_u16())
    }
}

impl PartialOrd for RrType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RrType::A => f.write_str("A"),
            RrType::Ns => f.write_str("NS"),
            RrType::Cname => f.write_str("CNAME"),
            RrType::Soa => f.write_str("SOA"),
            RrType::Ptr => f.write_str("PTR"),
            RrType::Mx => f.write_str("MX"),
            RrType::Txt => f.write_str("TXT"),
            RrType::Aaaa => f.write_str("AAAA"),
            RrType::Srv => f.write_str("SRV"),
            RrType::Dname => f.write_str("DNAME"),
            RrType::Ds => f.write_str("DS"),
            RrType::Rrsig => f.write_str("RRSIG"),
            RrType::Nsec => f.write_str("NSEC"),
            RrType::Dnskey => f.write_str("DNSKEY"),
            RrType::Nsec3 => f.write_str("NSEC3"),
            RrType::Nsec3param => f.write_str("NSEC3PARAM"),
            RrType::Other(n) => write!(f, "TYPE{n}"),
        }
    }
}

impl FromStr for RrType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "A" => RrType::A,
            "NS" => RrType::Ns,
            "CNAME" => RrType::Cname,
            "SOA" => RrType::Soa,
            "PTR" => RrType::Ptr,
            "MX" => RrType::Mx,
            "TXT" => RrType::Txt,
            "AAAA" => RrType::Aaaa,
            "SRV" => RrType::Srv,
            "DNAME" => RrType::Dname,
            "DS" => RrType::Ds,
            "RRSIG" => RrType::Rrsig,
            "NSEC" => RrType::Nsec,
            "DNSKEY" => RrType::Dnskey,
            "NSEC3" => RrType::Nsec3,
            "NSEC3PARAM" => RrType::Nsec3param,
            other => match other.strip_prefix("TYPE") {
                Some(n) => RrType::Other(
                    n.parse()
                        .map_err(|_| RecordError::UnknownType(s.to_string()))?,
                ),
                None => return Err(RecordError::UnknownType(s.to_string())),
            },
        })
    }
}

//----------- RrClass ----------------------------------------------------------

/// A resource record class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RrClass {
    In,
    Ch,
    Hs,
    Other(u16),
}

impl RrClass {
    /// The IANA class number.
    pub fn to_u16(self) -> u16 {
        match self {
            RrClass::In => 1,
            RrClass::Ch => 3,
            RrClass::Hs => 4,
            RrClass::Other(n) => n,
        }
    }
}

impl fmt::Display for RrClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RrClass::In => f.write_str("IN"),
            RrClass::Ch => f.write_str("CH"),
            RrClass::Hs => f.write_str("HS"),
            RrClass::Other(n) => write!(f, "CLASS{n}"),
        }
    }
}

impl FromStr for RrClass {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "IN" => RrClass::In,
            "CH" => RrClass::Ch,
            "HS" => RrClass::Hs,
            other => match other.strip_prefix("CLASS") {
                Some(n) => RrClass::Other(
                    n.parse()
                        .map_err(|_| RecordError::UnknownClass(s.to_string()))?,
                ),
                None => return Err(RecordError::UnknownClass(s.to_string())),
            },
        })
    }
}

//----------- TypeBitmap -------------------------------------------------------

/// The type bitmap of an NSEC or NSEC3 record.
///
/// Stored as a sorted, duplicate-free list of types; the windowed wire
/// encoding of RFC 4034 section 4.1.2 is produced on demand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeBitmap {
    types: Vec<RrType>,
}

impl TypeBitmap {
    /// Construct an empty bitmap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type to the bitmap.
    pub fn add(&mut self, rtype: RrType) {
        if let Err(pos) = self.types.binary_search(&rtype) {
            self.types.insert(pos, rtype);
        }
    }

    /// The types in the bitmap, ascending.
    pub fn types(&self) -> &[RrType] {
        &self.types
    }

    /// Whether the bitmap contains `rtype`.
    pub fn contains(&self, rtype: RrType) -> bool {
        self.types.binary_search(&rtype).is_ok()
    }

    /// Whether the bitmap is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Append the windowed wire encoding to `buf`.
    pub fn compose(&self, buf: &mut Vec<u8>) {
        let mut i = 0;
        while i < self.types.len() {
            let window = (self.types[i].to_u16() >> 8) as u8;
            let mut octets = [0u8; 32];
            let mut len = 0usize;
            while i < self.types.len() && (self.types[i].to_u16() >> 8) as u8 == window {
                let low = (self.types[i].to_u16() & 0xFF) as u8;
                octets[(low / 8) as usize] |= 0x80 >> (low % 8);
                len = len.max((low / 8) as usize + 1);
                i += 1;
            }
            buf.push(window);
            buf.push(len as u8);
            buf.extend_from_slice(&octets[..len]);
        }
    }
}

impl TypeBitmap {
    /// Build a bitmap from a list of types.
    pub fn from_types(types: impl IntoIterator<Item = RrType>) -> Self {
        let mut bitmap = Self::new();
        for rtype in types {
            bitmap.add(rtype);
        }
        bitmap
    }
}

impl fmt::Display for TypeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rtype) in self.types.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{rtype}")?;
        }
        Ok(())
    }
}

//----------- SoaRdata ---------------------------------------------------------

/// The rdata of a SOA record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaRdata {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

//----------- RrsigRdata -------------------------------------------------------

/// The rdata of an RRSIG record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RrsigRdata {
    pub type_covered: RrType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer: Name,
    pub signature: Bytes,
}

//----------- Rdata ------------------------------------------------------------

/// Parsed record data.
///
/// Types the engine has no business looking into are carried opaquely as
/// their wire form (RFC 3597).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rdata {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Dname(Name),
    Mx {
        preference: u16,
        exchange: Name,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    Txt(Vec<Box<[u8]>>),
    Soa(SoaRdata),
    Ds {
        key_tag: u16,
        algorithm: u8,
        digest_type: u8,
        digest: Bytes,
    },
    Dnskey {
        flags: u16,
        protocol: u8,
        algorithm: u8,
        public_key: Bytes,
    },
    Rrsig(RrsigRdata),
    Nsec {
        next: Name,
        bitmap: TypeBitmap,
    },
    Nsec3 {
        algorithm: u8,
        flags: u8,
        iterations: u16,
        salt: Bytes,
        next_hashed: Bytes,
        bitmap: TypeBitmap,
    },
    Nsec3param {
        algorithm: u8,
        flags: u8,
        iterations: u16,
        salt: Bytes,
    },
    Other(Bytes),
}

impl Rdata {
    /// Append the canonical wire form to `buf`.
    ///
    /// Per RFC 4034 section 6.2, domain names embedded in the rdata of the
    /// affected types are lowercased.
    pub fn compose_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            Rdata::A(addr) => buf.extend_from_slice(&addr.octets()),
            Rdata::Aaaa(addr) => buf.extend_from_slice(&addr.octets()),
            Rdata::Ns(name) | Rdata::Cname(name) | Rdata::Ptr(name) | Rdata::Dname(name) => {
                name.compose_canonical(buf)
            }
            Rdata::Mx {
                preference,
                exchange,
            } => {
                buf.extend_from_slice(&preference.to_be_bytes());
                exchange.compose_canonical(buf);
            }
            Rdata::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                buf.extend_from_slice(&weight.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                target.compose_canonical(buf);
            }
            Rdata::Txt(strings) => {
                for s in strings {
                    buf.push(s.len() as u8);
                    buf.extend_from_slice(s);
                }
            }
            Rdata::Soa(soa) => {
                soa.mname.compose_canonical(buf);
                soa.rname.compose_canonical(buf);
                buf.extend_from_slice(&soa.serial.to_be_bytes());
                buf.extend_from_slice(&soa.refresh.to_be_bytes());
                buf.extend_from_slice(&soa.retry.to_be_bytes());
                buf.extend_from_slice(&soa.expire.to_be_bytes());
                buf.extend_from_slice(&soa.minimum.to_be_bytes());
            }
            Rdata::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                buf.extend_from_slice(&key_tag.to_be_bytes());
                buf.push(*algorithm);
                buf.push(*digest_type);
                buf.extend_from_slice(digest);
            }
            Rdata::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => {
                buf.extend_from_slice(&flags.to_be_bytes());
                buf.push(*protocol);
                buf.push(*algorithm);
                buf.extend_from_slice(public_key);
            }
            Rdata::Rrsig(sig) => {
                buf.extend_from_slice(&sig.type_covered.to_u16().to_be_bytes());
                buf.push(sig.algorithm);
                buf.push(sig.labels);
                buf.extend_from_slice(&sig.original_ttl.to_be_bytes());
                buf.extend_from_slice(&sig.expiration.to_be_bytes());
                buf.extend_from_slice(&sig.inception.to_be_bytes());
                buf.extend_from_slice(&sig.key_tag.to_be_bytes());
                sig.signer.compose_canonical(buf);
                buf.extend_from_slice(&sig.signature);
            }
            Rdata::Nsec { next, bitmap } => {
                next.compose_canonical(buf);
                bitmap.compose(buf);
            }
            Rdata::Nsec3 {
                algorithm,
                flags,
                iterations,
                salt,
                next_hashed,
                bitmap,
            } => {
                buf.push(*algorithm);
                buf.push(*flags);
                buf.extend_from_slice(&iterations.to_be_bytes());
                buf.push(salt.len() as u8);
                buf.extend_from_slice(salt);
                buf.push(next_hashed.len() as u8);
                buf.extend_from_slice(next_hashed);
                bitmap.compose(buf);
            }
            Rdata::Nsec3param {
                algorithm,
                flags,
                iterations,
                salt,
            } => {
                buf.push(*algorithm);
                buf.push(*flags);
                buf.extend_from_slice(&iterations.to_be_bytes());
                buf.push(salt.len() as u8);
                buf.extend_from_slice(salt);
            }
            Rdata::Other(wire) => buf.extend_from_slice(wire),
        }
    }

    /// The canonical wire form as a fresh buffer.
    pub fn to_canonical_wire(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.compose_canonical(&mut buf);
        buf
    }

    /// Compare two rdatas by their canonical wire form (RFC 4034 section
    /// 6.3).
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.to_canonical_wire().cmp(&other.to_canonical_wire())
    }

    /// Parse rdata from whitespace-split presentation tokens.
    pub fn from_tokens(rtype: RrType, tokens: &[&str]) -> Result<Self, RecordError> {
        let mut t = Tokens { tokens, pos: 0 };
        let rdata = match rtype {
            RrType::A => Rdata::A(
                t.next()?
                    .parse()
                    .map_err(|_| RecordError::Syntax("bad A address"))?,
            ),
            RrType::Aaaa => Rdata::Aaaa(
                t.next()?
                    .parse()
                    .map_err(|_| RecordError::Syntax("bad AAAA address"))?,
            ),
            RrType::Ns => Rdata::Ns(t.name()?),
            RrType::Cname => Rdata::Cname(t.name()?),
            RrType::Ptr => Rdata::Ptr(t.name()?),
            RrType::Dname => Rdata::Dname(t.name()?),
            RrType::Mx => Rdata::Mx {
                preference: t.number()?,
                exchange: t.name()?,
            },
            RrType::Srv => Rdata::Srv {
                priority: t.number()?,
                weight: t.number()?,
                port: t.number()?,
                target: t.name()?,
            },
            RrType::Txt => {
                let mut strings = Vec::new();
                while let Ok(s) = t.next() {
                    let s = s.strip_prefix('"').unwrap_or(s);
                    let s = s.strip_suffix('"').unwrap_or(s);
                    strings.push(s.as_bytes().to_vec().into_boxed_slice());
                }
                if strings.is_empty() {
                    return Err(RecordError::Syntax("empty TXT rdata"));
                }
                Rdata::Txt(strings)
            }
            RrType::Soa => Rdata::Soa(SoaRdata {
                mname: t.name()?,
                rname: t.name()?,
                serial: t.number()?,
                refresh: t.number()?,
                retry: t.number()?,
                expire: t.number()?,
                minimum: t.number()?,
            }),
            RrType::Ds => Rdata::Ds {
                key_tag: t.number()?,
                algorithm: t.number()?,
                digest_type: t.number()?,
                digest: t.hex_rest()?,
            },
            RrType::Dnskey => Rdata::Dnskey {
                flags: t.number()?,
                protocol: t.number()?,
                algorithm: t.number()?,
                public_key: t.base64_rest()?,
            },
            RrType::Rrsig => Rdata::Rrsig(RrsigRdata {
                type_covered: t.next()?.parse()?,
                algorithm: t.number()?,
                labels: t.number()?,
                original_ttl: t.number()?,
                expiration: parse_rrsig_time(t.next()?)?,
                inception: parse_rrsig_time(t.next()?)?,
                key_tag: t.number()?,
                signer: t.name()?,
                signature: t.base64_rest()?,
            }),
            RrType::Nsec => Rdata::Nsec {
                next: t.name()?,
                bitmap: t.bitmap_rest()?,
            },
            RrType::Nsec3 => Rdata::Nsec3 {
                algorithm: t.number()?,
                flags: t.number()?,
                iterations: t.number()?,
                salt: t.salt()?,
                next_hashed: t.base32hex()?,
                bitmap: t.bitmap_rest()?,
            },
            RrType::Nsec3param => Rdata::Nsec3param {
                algorithm: t.number()?,
                flags: t.number()?,
                iterations: t.number()?,
                salt: t.salt()?,
            },
            RrType::Other(_) => {
                // RFC 3597 form: "\# <length> <hex>".
                if t.next()? != "\\#" {
                    return Err(RecordError::Syntax("expected RFC 3597 rdata"));
                }
                let len: usize = t
                    .next()?
                    .parse()
                    .map_err(|_| RecordError::Syntax("bad RFC 3597 length"))?;
                let wire = t.hex_rest()?;
                if wire.len() != len {
                    return Err(RecordError::Syntax("RFC 3597 length mismatch"));
                }
                Rdata::Other(wire)
            }
        };
        Ok(rdata)
    }
}

impl fmt::Display for Rdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rdata::A(addr) => write!(f, "{addr}"),
            Rdata::Aaaa(addr) => write!(f, "{addr}"),
            Rdata::Ns(name) | Rdata::Cname(name) | Rdata::Ptr(name) | Rdata::Dname(name) => {
                write!(f, "{name}")
            }
            Rdata::Mx {
                preference,
                exchange,
            } => write!(f, "{preference} {exchange}"),
            Rdata::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{priority} {weight} {port} {target}"),
            Rdata::Txt(strings) => {
                for (i, s) in strings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    f.write_str("\"")?;
                    for &octet in s.iter() {
                        if octet.is_ascii_graphic() && octet != b'"' && octet != b'\\' {
                            write!(f, "{}", octet as char)?;
                        } else if octet == b' ' {
                            f.write_str(" ")?;
                        } else {
                            write!(f, "\\{octet:03}")?;
                        }
                    }
                    f.write_str("\"")?;
                }
                Ok(())
            }
            Rdata::Soa(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum
            ),
            Rdata::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => write!(
                f,
                "{key_tag} {algorithm} {digest_type} {}",
                HEXUPPER.encode(digest)
            ),
            Rdata::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => write!(
                f,
                "{flags} {protocol} {algorithm} {}",
                BASE64.encode(public_key)
            ),
            Rdata::Rrsig(sig) => write!(
                f,
                "{} {} {} {} {} {} {} {} {}",
                sig.type_covered,
                sig.algorithm,
                sig.labels,
                sig.original_ttl,
                fmt_rrsig_time(sig.expiration),
                fmt_rrsig_time(sig.inception),
                sig.key_tag,
                sig.signer,
                BASE64.encode(&sig.signature)
            ),
            Rdata::Nsec { next, bitmap } => {
                write!(f, "{next}")?;
                if !bitmap.is_empty() {
                    write!(f, " {bitmap}")?;
                }
                Ok(())
            }
            Rdata::Nsec3 {
                algorithm,
                flags,
                iterations,
                salt,
                next_hashed,
                bitmap,
            } => {
                write!(
                    f,
                    "{algorithm} {flags} {iterations} {} {}",
                    fmt_salt(salt),
                    BASE32HEX_NOPAD.encode(next_hashed)
                )?;
                if !bitmap.is_empty() {
                    write!(f, " {bitmap}")?;
                }
                Ok(())
            }
            Rdata::Nsec3param {
                algorithm,
                flags,
                iterations,
                salt,
            } => write!(f, "{algorithm} {flags} {iterations} {}", fmt_salt(salt)),
            Rdata::Other(wire) => write!(f, "\\# {} {}", wire.len(), HEXUPPER.encode(wire)),
        }
    }
}

/// Format an NSEC3 salt field, `-` when empty.
fn fmt_salt(salt: &Bytes) -> String {
    if salt.is_empty() {
        "-".to_string()
    } else {
        HEXUPPER.encode(salt)
    }
}

/// Format an RRSIG timestamp as YYYYMMDDHHmmSS in UTC.
fn fmt_rrsig_time(t: u32) -> String {
    let ts = jiff::Timestamp::from_second(i64::from(t))
        .expect("32-bit timestamps are within the representable range");
    ts.to_zoned(jiff::tz::TimeZone::UTC)
        .strftime("%Y%m%d%H%M%S")
        .to_string()
}

/// Parse an RRSIG timestamp: YYYYMMDDHHmmSS, or seconds since the epoch.
fn parse_rrsig_time(s: &str) -> Result<u32, RecordError> {
    if s.len() == 14 && s.bytes().all(|b| b.is_ascii_digit()) {
        let dt = jiff::civil::DateTime::strptime("%Y%m%d%H%M%S", s)
            .map_err(|e| RecordError::Number(e.to_string()))?;
        let zoned = dt
            .to_zoned(jiff::tz::TimeZone::UTC)
            .map_err(|e| RecordError::Number(e.to_string()))?;
        Ok(zoned.timestamp().as_second() as u32)
    } else {
        s.parse().map_err(|_| RecordError::Number(s.to_string()))
    }
}

//----------- Rr ---------------------------------------------------------------

/// A complete resource record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rr {
    pub owner: Name,
    pub ttl: u32,
    pub class: RrClass,
    pub rtype: RrType,
    pub rdata: Rdata,
}

impl Rr {
    /// Construct a record.
    pub fn new(owner: Name, ttl: u32, class: RrClass, rtype: RrType, rdata: Rdata) -> Self {
        Self {
            owner,
            ttl,
            class,
            rtype,
            rdata,
        }
    }

    /// Parse a record from one master-file line.
    ///
    /// The accepted shape is strict: `owner ttl class type rdata...`.  This
    /// is the format the printer and the backup codec emit.
    pub fn from_line(line: &str) -> Result<Self, RecordError> {
        let tokens = tokenize(line);
        if tokens.len() < 4 {
            return Err(RecordError::Syntax("truncated record line"));
        }
        let owner = Name::from_text(&tokens[0])?;
        let ttl = tokens[1]
            .parse()
            .map_err(|_| RecordError::Number(tokens[1].clone()))?;
        let class = tokens[2].parse()?;
        let rtype: RrType = tokens[3].parse()?;
        let rest: Vec<&str> = tokens[4..].iter().map(String::as_str).collect();
        let rdata = Rdata::from_tokens(rtype, &rest)?;
        Ok(Self {
            owner,
            ttl,
            class,
            rtype,
            rdata,
        })
    }
}

impl fmt::Display for Rr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.owner, self.ttl, self.class, self.rtype, self.rdata
        )
    }
}

/// Split a record line into tokens, honouring double quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

//----------- Tokens -----------------------------------------------------------

/// A cursor over presentation tokens.
struct Tokens<'a> {
    tokens: &'a [&'a str],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn next(&mut self) -> Result<&'a str, RecordError> {
        let token = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or(RecordError::Syntax("truncated rdata"))?;
        self.pos += 1;
        Ok(token)
    }

    fn name(&mut self) -> Result<Name, RecordError> {
        Ok(Name::from_text(self.next()?)?)
    }

    fn number<T: FromStr>(&mut self) -> Result<T, RecordError> {
        let token = self.next()?;
        token
            .parse()
            .map_err(|_| RecordError::Number(token.to_string()))
    }

    fn salt(&mut self) -> Result<Bytes, RecordError> {
        let token = self.next()?;
        if token == "-" {
            return Ok(Bytes::new());
        }
        HEXLOWER_PERMISSIVE
            .decode(token.as_bytes())
            .map(Bytes::from)
            .map_err(|e| RecordError::Encoding(e.to_string()))
    }

    fn base32hex(&mut self) -> Result<Bytes, RecordError> {
        let token = self.next()?.to_ascii_uppercase();
        BASE32HEX_NOPAD
            .decode(token.as_bytes())
            .map(Bytes::from)
            .map_err(|e| RecordError::Encoding(e.to_string()))
    }

    fn hex_rest(&mut self) -> Result<Bytes, RecordError> {
        let mut joined = String::new();
        while let Ok(token) = self.next() {
            joined.push_str(token);
        }
        HEXLOWER_PERMISSIVE
            .decode(joined.as_bytes())
            .map(Bytes::from)
            .map_err(|e| RecordError::Encoding(e.to_string()))
    }

    fn base64_rest(&mut self) -> Result<Bytes, RecordError> {
        let mut joined = String::new();
        while let Ok(token) = self.next() {
            joined.push_str(token);
        }
        BASE64
            .decode(joined.as_bytes())
            .map(Bytes::from)
            .map_err(|e| RecordError::Encoding(e.to_string()))
    }

    fn bitmap_rest(&mut self) -> Result<TypeBitmap, RecordError> {
        let mut bitmap = TypeBitmap::new();
        while let Ok(token) = self.next() {
            bitmap.add(token.parse()?);
        }
        Ok(bitmap)
    }
}

//============ Errors ==========================================================

//----------- RecordError ------------------------------------------------------

/// An error parsing a resource record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// A domain name could not be parsed.
    Name(NameError),

    /// The record line did not have the expected shape.
    Syntax(&'static str),

    /// A numeric field could not be parsed.
    Number(String),

    /// A base64/base32hex/hex field could not be decoded.
    Encoding(String),

    /// An unknown record type mnemonic.
    UnknownType(String),

    /// An unknown record class mnemonic.
    UnknownClass(String),
}

impl std::error::Error for RecordError {}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Name(err) => write!(f, "bad domain name: {err}"),
            RecordError::Syntax(what) => f.write_str(what),
            RecordError::Number(token) => write!(f, "bad numeric field '{token}'"),
            RecordError::Encoding(err) => write!(f, "bad encoded field: {err}"),
            RecordError::UnknownType(token) => write!(f, "unknown record type '{token}'"),
            RecordError::UnknownClass(token) => write!(f, "unknown record class '{token}'"),
        }
    }
}

impl From<NameError> for RecordError {
    fn from(err: NameError) -> Self {
        RecordError::Name(err)
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(line: &str) {
        let rr = Rr::from_line(line).unwrap();
        assert_eq!(rr.to_string().split_whitespace().collect::<Vec<_>>(),
                   line.split_whitespace().collect::<Vec<_>>());
    }

    #[test]
    fn parse_common_types() {
        roundtrip("www.example.\t3600\tIN\tA\t192.0.2.1");
        roundtrip("example.\t3600\tIN\tNS\tns1.example.");
        roundtrip("example.\t3600\tIN\tMX\t10 mail.example.");
        roundtrip("example.\t3600\tIN\tSOA\tns1.example. host.example. 2010 10800 3600 604800 3600");
        roundtrip("example.\t3600\tIN\tTXT\t\"hello\"");
    }

    #[test]
    fn parse_denial_types() {
        roundtrip("example.\t3600\tIN\tNSEC\tmail.example. SOA NS RRSIG NSEC");
        let rr = Rr::from_line(
            "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom.example. 3600 IN NSEC3 \
             1 1 12 AABBCCDD 2T7B4G4VSA5SMI47K61MV5BV1A22BOJR A RRSIG",
        )
        .unwrap();
        match &rr.rdata {
            Rdata::Nsec3 {
                algorithm,
                flags,
                iterations,
                salt,
                next_hashed,
                bitmap,
            } => {
                assert_eq!(*algorithm, 1);
                assert_eq!(*flags, 1);
                assert_eq!(*iterations, 12);
                assert_eq!(salt.as_ref(), &[0xAA, 0xBB, 0xCC, 0xDD]);
                assert_eq!(next_hashed.len(), 20);
                assert_eq!(bitmap.types(), &[RrType::A, RrType::Rrsig]);
            }
            other => panic!("parsed into {other:?}"),
        }
    }

    #[test]
    fn rrsig_timestamps() {
        let rr = Rr::from_line(
            "www.example. 3600 IN RRSIG A 8 2 3600 \
             20260301000000 20260201000000 12345 example. aGVsbG8=",
        )
        .unwrap();
        let Rdata::Rrsig(sig) = &rr.rdata else {
            panic!("not an RRSIG");
        };
        assert!(sig.expiration > sig.inception);
        assert_eq!(fmt_rrsig_time(sig.expiration), "20260301000000");
        assert_eq!(fmt_rrsig_time(sig.inception), "20260201000000");
    }

    #[test]
    fn canonical_rdata_ordering() {
        let a = Rdata::A("192.0.2.1".parse().unwrap());
        let b = Rdata::A("192.0.2.2".parse().unwrap());
        assert_eq!(a.canonical_cmp(&b), Ordering::Less);
        assert_eq!(a.canonical_cmp(&a), Ordering::Equal);

        // Embedded names are lowercased before comparison.
        let x = Rdata::Ns(Name::from_text("NS1.example.").unwrap());
        let y = Rdata::Ns(Name::from_text("ns1.example.").unwrap());
        assert_eq!(x.canonical_cmp(&y), Ordering::Equal);
    }

    #[test]
    fn bitmap_wire_encoding() {
        let bitmap = TypeBitmap::from_types([RrType::A, RrType::Mx, RrType::Rrsig, RrType::Nsec]);
        let mut buf = Vec::new();
        bitmap.compose(&mut buf);
        // Window 0, 6 octets: A (1), MX (15), RRSIG (46), NSEC (47).
        assert_eq!(buf, [0x00, 0x06, 0x40, 0x01, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn unknown_type_roundtrip() {
        let rr = Rr::from_line("x.example. 300 IN TYPE65280 \\# 3 ABCDEF").unwrap();
        assert_eq!(rr.rtype, RrType::Other(65280));
        assert_eq!(rr.rdata, Rdata::Other(Bytes::from_static(&[0xAB, 0xCD, 0xEF])));
        roundtrip("x.example. 300 IN TYPE65280 \\# 3 ABCDEF");
    }
}
