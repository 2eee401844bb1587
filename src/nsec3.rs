//! NSEC3 hashing.
//!
//! The hash of RFC 5155 section 5: iterated, salted SHA-1 over the
//! wire-canonical lowercase owner name.  The hashed owner name of a domain
//! is the base32hex form of that digest, prepended as a single label to the
//! zone apex.  The hash is fully determined by the parameters, which is what
//! makes the denial chain reproducible across signer restarts.

use std::fmt;

use bytes::Bytes;
use data_encoding::BASE32HEX_NOPAD;
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::error::ZoneError;
use crate::name::Name;

/// The NSEC3 hash algorithm number for SHA-1, the only one defined.
pub const NSEC3_HASH_SHA1: u8 = 1;

/// The NSEC3 Opt-Out flag bit.
pub const NSEC3_FLAG_OPT_OUT: u8 = 0x01;

//----------- Nsec3Params ------------------------------------------------------

/// The parameters of an NSEC3 denial chain.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Nsec3Params {
    /// The hash algorithm.  Must be 1 (SHA-1).
    #[serde(default = "default_algorithm")]
    pub algorithm: u8,

    /// The NSEC3 flags field.  Only Opt-Out is defined.
    #[serde(default)]
    pub flags: u8,

    /// Extra hash iterations beyond the initial one.
    #[serde(default)]
    pub iterations: u16,

    /// The salt, empty for an unsalted chain.
    #[serde(default, deserialize_with = "crate::util::deserialize_hex_bytes")]
    pub salt: Bytes,
}

fn default_algorithm() -> u8 {
    NSEC3_HASH_SHA1
}

impl Nsec3Params {
    /// Construct parameters for an unsalted SHA-1 chain.
    pub fn new(flags: u8, iterations: u16, salt: Bytes) -> Self {
        Self {
            algorithm: NSEC3_HASH_SHA1,
            flags,
            iterations,
            salt,
        }
    }

    /// Whether the Opt-Out flag is set.
    pub fn opt_out(&self) -> bool {
        self.flags & NSEC3_FLAG_OPT_OUT != 0
    }

    /// The RFC 5155 section 5 hash of a name.
    pub fn hash(&self, name: &Name) -> Result<Vec<u8>, ZoneError> {
        if self.algorithm != NSEC3_HASH_SHA1 {
            return Err(ZoneError::Nsec3Algorithm(self.algorithm));
        }
        let mut hasher = Sha1::new();
        hasher.update(name.to_canonical_wire());
        hasher.update(&self.salt);
        let mut digest = hasher.finalize_reset();
        for _ in 0..self.iterations {
            hasher.update(digest);
            hasher.update(&self.salt);
            digest = hasher.finalize_reset();
        }
        Ok(digest.to_vec())
    }

    /// The hashed owner name of `name`: the hash as a base32hex label in
    /// front of the apex.
    pub fn hash_name(&self, name: &Name, apex: &Name) -> Result<Name, ZoneError> {
        let digest = self.hash(name)?;
        let label = BASE32HEX_NOPAD.encode(&digest);
        Name::prepend(label.as_bytes(), apex)
            .map_err(|_| ZoneError::Failed("hashed owner name does not fit"))
    }
}

impl fmt::Display for Nsec3Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.algorithm,
            self.flags,
            self.iterations,
            if self.salt.is_empty() {
                "-".to_string()
            } else {
                data_encoding::HEXUPPER.encode(&self.salt)
            }
        )
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
    fn rfc5155_appendix_a_vector() {
        // From the signed example zone in RFC 5155 appendix A:
        // H(example) = 0p9mhaveqvm6t7vbl5lop2u3t2rp3tom with 12 extra
        // iterations and salt AABBCCDD.
        let params = Nsec3Params::new(
            NSEC3_FLAG_OPT_OUT,
            12,
            Bytes::from_static(&[0xAA, 0xBB, 0xCC, 0xDD]),
        );
        let owner = params
            .hash_name(&name("example."), &name("example."))
            .unwrap();
        assert_eq!(
            owner.to_string().to_ascii_lowercase(),
            "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom.example."
        );

        let owner = params
            .hash_name(&name("a.example."), &name("example."))
            .unwrap();
        assert_eq!(
            owner.to_string().to_ascii_lowercase(),
            "35mthgpgcu1qg68fab165klnsnk3dpvl.example."
        );
    }

    #[test]
    fn hash_is_case_insensitive() {
        let params = Nsec3Params::new(0, 0, Bytes::new());
        assert_eq!(
            params.hash(&name("WWW.Example.")).unwrap(),
            params.hash(&name("www.example.")).unwrap()
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let params = Nsec3Params::new(0, 5, Bytes::from_static(b"\x01\x02"));
        assert_eq!(
            params.hash(&name("mail.example.")).unwrap(),
            params.hash(&name("mail.example.")).unwrap()
        );
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let params = Nsec3Params {
            algorithm: 2,
            flags: 0,
            iterations: 0,
            salt: Bytes::new(),
        };
        assert_eq!(
            params.hash(&name("example.")).unwrap_err(),
            ZoneError::Nsec3Algorithm(2)
        );
    }
}
