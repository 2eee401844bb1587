//! The signing oracle.
//!
//! RRSIG generation is the one operation the engine cannot perform itself:
//! the private keys live in an HSM (or a software token) on the far side of
//! a session-oriented API.  [`SigningOracle`] mirrors that shape: a context
//! is opened per signing pass, asked for one RRSIG per (RRset, key) pair,
//! and closed on every exit path.
//!
//! [`MockOracle`] is a deterministic stand-in: same input, same "signature".
//! It exists for tests and for dry runs where the output zone structure
//! matters but the signatures do not validate.

use std::cell::Cell;
use std::fmt;

use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::name::Name;
use crate::rr::{RrType, RrsigRdata};
use crate::signconf::SignKey;

//----------- SignRequest ------------------------------------------------------

/// One signature request.
#[derive(Clone, Debug)]
pub struct SignRequest<'a> {
    /// The canonical RRset byte stream (RFC 4034 section 6).
    pub rrset: &'a [u8],

    /// The owner of the RRset.
    pub owner: &'a Name,

    /// The type the signature covers.
    pub type_covered: RrType,

    /// The TTL of the covered RRset.
    pub original_ttl: u32,

    /// The inception timestamp.
    pub inception: u32,

    /// The expiration timestamp.
    pub expiration: u32,

    /// The signer name (the zone owner).
    pub signer: &'a Name,

    /// The key to sign with.
    pub key: &'a SignKey,
}

//----------- SigningOracle ----------------------------------------------------

/// A producer of RRSIGs.
///
/// Implementations wrap an HSM session, a remote signer, or a local key
/// store.  The engine opens one context per signing pass and guarantees the
/// context is closed again whether the pass succeeds or fails.
pub trait SigningOracle {
    /// A signing session.
    type Context;

    /// Open a signing session.
    fn open(&self) -> Result<Self::Context, OracleError>;

    /// Produce the RRSIG for one request.
    fn sign(
        &self,
        ctx: &mut Self::Context,
        request: &SignRequest<'_>,
    ) -> Result<RrsigRdata, OracleError>;

    /// Close a signing session.
    fn close(&self, ctx: Self::Context) {
        drop(ctx);
    }
}

//----------- MockOracle -------------------------------------------------------

/// A deterministic signing oracle.
///
/// The "signature" is a digest of the key locator and the canonical RRset,
/// so that identical input produces byte-identical output and any change to
/// the RRset changes the signature.  Nothing about it is cryptographically
/// meaningful.
#[derive(Clone, Debug, Default)]
pub struct MockOracle;

impl SigningOracle for MockOracle {
    type Context = ();

    fn open(&self) -> Result<(), OracleError> {
        Ok(())
    }

    fn sign(
        &self,
        _ctx: &mut (),
        request: &SignRequest<'_>,
    ) -> Result<RrsigRdata, OracleError> {
        let mut hasher = Sha1::new();
        hasher.update(request.key.locator.as_bytes());
        hasher.update(request.rrset);
        let digest = hasher.finalize();
        Ok(RrsigRdata {
            type_covered: request.type_covered,
            algorithm: request.key.algorithm,
            labels: request.owner.rrsig_label_count(),
            original_ttl: request.original_ttl,
            expiration: request.expiration,
            inception: request.inception,
            key_tag: request.key.keytag,
            signer: request.signer.clone(),
            signature: Bytes::copy_from_slice(&digest),
        })
    }
}

//----------- FlakyOracle ------------------------------------------------------

/// An oracle that fails after a configured number of signatures.
///
/// This is the test double for the failure-atomicity contract: a signing
/// pass that dies halfway must leave nothing behind after a rollback.
#[derive(Debug)]
pub struct FlakyOracle {
    inner: MockOracle,
    remaining: Cell<usize>,
}

impl FlakyOracle {
    /// An oracle that succeeds `successes` times, then fails.
    pub fn new(successes: usize) -> Self {
        Self {
            inner: MockOracle,
            remaining: Cell::new(successes),
        }
    }
}

impl SigningOracle for FlakyOracle {
    type Context = ();

    fn open(&self) -> Result<(), OracleError> {
        Ok(())
    }

    fn sign(
        &self,
        ctx: &mut (),
        request: &SignRequest<'_>,
    ) -> Result<RrsigRdata, OracleError> {
        let remaining = self.remaining.get();
        if remaining == 0 {
            return Err(OracleError::new("token unavailable"));
        }
        self.remaining.set(remaining - 1);
        self.inner.sign(ctx, request)
    }
}

//============ Errors ==========================================================

//----------- OracleError ------------------------------------------------------

/// An error from the signing oracle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleError {
    message: String,
}

impl OracleError {
    /// Construct an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::error::Error for OracleError {}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::RrType;

    fn request<'a>(rrset: &'a [u8], owner: &'a Name, key: &'a SignKey) -> SignRequest<'a> {
        SignRequest {
            rrset,
            owner,
            type_covered: RrType::A,
            original_ttl: 3600,
            inception: 1000,
            expiration: 2000,
            signer: owner,
            key,
        }
    }

    fn key() -> SignKey {
        SignKey {
            locator: "test-key".into(),
            algorithm: 8,
            keytag: 42,
            flags: 256,
            ksk: true,
            zsk: true,
            publish: true,
        }
    }

    #[test]
    fn mock_is_deterministic() {
        let oracle = MockOracle;
        let owner = Name::from_text("example.").unwrap();
        let key = key();
        let mut ctx = oracle.open().unwrap();
        let a = oracle.sign(&mut ctx, &request(b"rrset", &owner, &key)).unwrap();
        let b = oracle.sign(&mut ctx, &request(b"rrset", &owner, &key)).unwrap();
        let c = oracle.sign(&mut ctx, &request(b"other", &owner, &key)).unwrap();
        oracle.close(ctx);
        assert_eq!(a, b);
        assert_ne!(a.signature, c.signature);
        assert_eq!(a.key_tag, 42);
        assert_eq!(a.labels, 1);
    }

    #[test]
    fn flaky_fails_on_schedule() {
        let oracle = FlakyOracle::new(1);
        let owner = Name::from_text("example.").unwrap();
        let key = key();
        let mut ctx = oracle.open().unwrap();
        assert!(oracle.sign(&mut ctx, &request(b"one", &owner, &key)).is_ok());
        assert!(oracle.sign(&mut ctx, &request(b"two", &owner, &key)).is_err());
        oracle.close(ctx);
    }
}
