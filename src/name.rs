//! Domain names and their canonical ordering.
//!
//! This module provides [`Name`], an owned domain name: a sequence of labels,
//! stored case-preserved but compared case-insensitively.  The [`Ord`] impl
//! is the DNSSEC canonical ordering of RFC 4034 section 6.1 (most significant
//! label last), so an ordered map keyed by [`Name`] iterates the way a signed
//! zone must be walked.  Both the domain tree and the denial chain rely on
//! this.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// The maximum length of a single label, in octets.
const MAX_LABEL_LEN: usize = 63;

/// The maximum length of a name in wire format, in octets.
const MAX_NAME_LEN: usize = 255;

//----------- Name -------------------------------------------------------------

/// An absolute DNS domain name.
///
/// The root name is the empty label sequence.  Labels are stored in master
/// file order (least significant first) with their original case; comparisons
/// and equality are case-insensitive.
///
/// ## Invariants
///
/// - `label-len`: every label is between 1 and 63 octets long.
/// - `name-len`: the wire form (labels plus length octets plus the root
///   label) is at most 255 octets.
#[derive(Clone, Debug, Default)]
pub struct Name {
    /// The labels of the name, least significant first.  The root label is
    /// not stored.
    labels: Vec<Box<[u8]>>,
}

impl Name {
    /// The root name.
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    /// Whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// The labels of the name, least significant first.
    pub fn labels(&self) -> impl DoubleEndedIterator<Item = &[u8]> + ExactSizeIterator {
        self.labels.iter().map(|l| l.as_ref())
    }

    /// The number of labels, not counting the root label.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// The number of labels as recorded in an RRSIG.
    ///
    /// Per RFC 4034 section 3.1.3, the root label does not count and neither
    /// does a leading wildcard label.
    pub fn rrsig_label_count(&self) -> u8 {
        let count = match self.labels.first() {
            Some(l) if l.as_ref() == b"*" => self.labels.len() - 1,
            _ => self.labels.len(),
        };
        count as u8
    }

    /// The parent of this name, with the leftmost label chopped off.
    ///
    /// The root name has no parent.
    pub fn parent(&self) -> Option<Self> {
        if self.labels.is_empty() {
            return None;
        }
        Some(Self {
            labels: self.labels[1..].to_vec(),
        })
    }

    /// Whether this name is a proper subdomain of `ancestor`.
    ///
    /// A name is not a subdomain of itself.
    pub fn is_subdomain_of(&self, ancestor: &Name) -> bool {
        if self.labels.len() <= ancestor.labels.len() {
            return false;
        }
        let skip = self.labels.len() - ancestor.labels.len();
        self.labels[skip..]
            .iter()
            .zip(&ancestor.labels)
            .all(|(a, b)| label_eq(a, b))
    }

    /// Prepend a single label to `origin`, producing a new name.
    ///
    /// This is how an NSEC3 owner name is formed: the hash label in front of
    /// the zone apex.
    pub fn prepend(label: &[u8], origin: &Name) -> Result<Self, NameError> {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(NameError::LabelTooLong);
        }
        let mut labels = Vec::with_capacity(origin.labels.len() + 1);
        labels.push(label.to_vec().into_boxed_slice());
        labels.extend(origin.labels.iter().cloned());
        let name = Self { labels };
        if name.wire_len() > MAX_NAME_LEN {
            return Err(NameError::NameTooLong);
        }
        Ok(name)
    }

    /// Parse a name from presentation format.
    ///
    /// A trailing dot is accepted and ignored; `"."` is the root.  Escapes
    /// are not supported; zone data flows into this crate in wire or
    /// pre-tokenized form.
    pub fn from_text(text: &str) -> Result<Self, NameError> {
        if text.is_empty() {
            return Err(NameError::Empty);
        }
        if text == "." {
            return Ok(Self::root());
        }
        let text = text.strip_suffix('.').unwrap_or(text);
        let mut labels = Vec::new();
        for label in text.split('.') {
            if label.is_empty() {
                return Err(NameError::EmptyLabel);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(NameError::LabelTooLong);
            }
            labels.push(label.as_bytes().to_vec().into_boxed_slice());
        }
        let name = Self { labels };
        if name.wire_len() > MAX_NAME_LEN {
            return Err(NameError::NameTooLong);
        }
        Ok(name)
    }

    /// The length of the wire form, in octets.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// Append the wire form to `buf`, preserving case.
    pub fn compose(&self, buf: &mut Vec<u8>) {
        for label in &self.labels {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label);
        }
        buf.push(0);
    }

    /// Append the canonical (lowercased) wire form to `buf`.
    ///
    /// This is the form used for RRset signing (RFC 4034 section 6.2) and
    /// NSEC3 hashing (RFC 5155 section 5).
    pub fn compose_canonical(&self, buf: &mut Vec<u8>) {
        for label in &self.labels {
            buf.push(label.len() as u8);
            buf.extend(label.iter().map(u8::to_ascii_lowercase));
        }
        buf.push(0);
    }

    /// The canonical wire form as a fresh buffer.
    pub fn to_canonical_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.compose_canonical(&mut buf);
        buf
    }
}

//--- Comparison

/// Case-insensitive label equality.
fn label_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
}

/// Case-insensitive bytewise label comparison.
fn label_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let la = a.iter().map(u8::to_ascii_lowercase);
    let lb = b.iter().map(u8::to_ascii_lowercase);
    la.cmp(lb)
}

impl Ord for Name {
    /// The DNSSEC canonical ordering (RFC 4034 section 6.1).
    ///
    /// Names are compared label by label starting from the most significant
    /// (rightmost) label; on a shared suffix, the name with fewer labels
    /// sorts first.
    fn cmp(&self, other: &Self) -> Ordering {
        let mut a = self.labels.iter().rev();
        let mut b = other.labels.iter().rev();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(x), Some(y)) => match label_cmp(x, y) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
            }
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self.labels.iter().zip(&other.labels).all(|(a, b)| label_eq(a, b))
    }
}

impl Eq for Name {}

//--- Conversion and formatting

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_text(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(".");
        }
        for label in &self.labels {
            for &octet in label.iter() {
                if octet.is_ascii_graphic() && octet != b'.' && octet != b'\\' {
                    write!(f, "{}", octet as char)?;
                } else {
                    write!(f, "\\{octet:03}")?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

//============ Errors ==========================================================

//----------- NameError --------------------------------------------------------

/// An error constructing a domain name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameError {
    /// The presentation form was empty.
    Empty,

    /// A label was empty (two consecutive dots).
    EmptyLabel,

    /// A label was longer than 63 octets.
    LabelTooLong,

    /// The name would exceed 255 octets in wire form.
    NameTooLong,
}

impl std::error::Error for NameError {}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::Empty => f.write_str("empty domain name"),
            NameError::EmptyLabel => f.write_str("empty label in domain name"),
            NameError::LabelTooLong => f.write_str("label exceeds 63 octets"),
            NameError::NameTooLong => f.write_str("domain name exceeds 255 octets"),
        }
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::Name;

    fn name(text: &str) -> Name {
        Name::from_text(text).unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(name(".").to_string(), ".");
        assert_eq!(name("example").to_string(), "example.");
        assert_eq!(name("www.example.").to_string(), "www.example.");
        assert!(Name::from_text("").is_err());
        assert!(Name::from_text("a..b").is_err());
    }

    #[test]
    fn case_insensitive_equality() {
        assert_eq!(name("WWW.Example."), name("www.example."));
        assert_ne!(name("www.example."), name("mail.example."));
    }

    #[test]
    fn canonical_order() {
        // The ordering example from RFC 4034 section 6.1 (sans the escaped
        // octet, which presentation parsing does not accept).
        let mut names = vec![
            name("*.z.example"),
            name("example"),
            name("zABC.a.EXAMPLE"),
            name("a.example"),
            name("Z.a.example"),
            name("yljkjljk.a.example"),
            name("z.example"),
        ];
        names.sort();
        let display: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        assert_eq!(
            display,
            [
                "example.",
                "a.example.",
                "yljkjljk.a.example.",
                "Z.a.example.",
                "zABC.a.EXAMPLE.",
                "z.example.",
                "*.z.example.",
            ]
        );
    }

    #[test]
    fn parent_and_subdomain() {
        let www = name("www.example.");
        let example = name("example.");
        assert_eq!(www.parent(), Some(example.clone()));
        assert_eq!(Name::root().parent(), None);
        assert!(www.is_subdomain_of(&example));
        assert!(www.is_subdomain_of(&Name::root()));
        assert!(!example.is_subdomain_of(&www));
        assert!(!example.is_subdomain_of(&example));
    }

    #[test]
    fn wire_forms() {
        let mut buf = Vec::new();
        name("Ab.example.").compose(&mut buf);
        assert_eq!(buf, b"\x02Ab\x07example\x00");
        buf.clear();
        name("Ab.example.").compose_canonical(&mut buf);
        assert_eq!(buf, b"\x02ab\x07example\x00");
    }

    #[test]
    fn prepend_label() {
        let apex = name("example.");
        let owner = Name::prepend(b"0p9mhaveqvm6t7vbl5lop2u3t2rp3tom", &apex).unwrap();
        assert_eq!(
            owner.to_string(),
            "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom.example."
        );
    }
}
