//! Signer configuration.
//!
//! A [`SignConf`] is the slice of signer policy this engine consumes: how
//! the SOA serial advances, the timing of signatures, the denial flavour,
//! and the keys to sign with.  Where it comes from (KASP, a policy daemon,
//! an operator file) is not this crate's concern, but a TOML form is
//! provided so a configuration can be kept next to the zone.

use std::io;
use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;

use crate::nsec3::Nsec3Params;
use crate::rr::RrType;
use crate::serial::SerialPolicy;
use crate::util::deserialize_duration_from_secs;

//----------- SignKey ----------------------------------------------------------

/// A reference to one signing key.
///
/// The key material itself lives behind the signing oracle; the engine only
/// needs the locator to request signatures and the role flags to decide
/// which RRsets the key covers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignKey {
    /// The locator under which the oracle knows this key.
    pub locator: String,

    /// The DNSSEC algorithm number.
    pub algorithm: u8,

    /// The key tag, as it will appear in RRSIGs.
    pub keytag: u16,

    /// The DNSKEY flags field.
    #[serde(default = "default_key_flags")]
    pub flags: u16,

    /// Whether the key signs the DNSKEY RRset.
    #[serde(default)]
    pub ksk: bool,

    /// Whether the key signs the zone content.
    #[serde(default)]
    pub zsk: bool,

    /// Whether the key is published in the zone.
    ///
    /// A key that is published but neither KSK nor ZSK is in the
    /// introduction phase of a rollover.
    #[serde(default = "default_true")]
    pub publish: bool,
}

fn default_key_flags() -> u16 {
    256
}

fn default_true() -> bool {
    true
}

//----------- SignConf ---------------------------------------------------------

/// The signer configuration for one zone.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignConf {
    /// How the SOA serial advances.
    #[serde(default = "default_serial_policy")]
    pub serial_policy: SerialPolicy,

    /// How far in the past signature inceptions are backdated.
    #[serde(
        default = "default_inception_offset",
        deserialize_with = "deserialize_duration_from_secs"
    )]
    pub sig_inception_offset: Duration,

    /// The maximum deviation applied to signature expirations.
    #[serde(default, deserialize_with = "deserialize_duration_from_secs")]
    pub sig_jitter: Duration,

    /// How long signatures over regular RRsets are valid.
    #[serde(
        default = "default_validity",
        deserialize_with = "deserialize_duration_from_secs"
    )]
    pub sig_validity_default: Duration,

    /// How long signatures over denial RRsets are valid.
    #[serde(
        default = "default_validity",
        deserialize_with = "deserialize_duration_from_secs"
    )]
    pub sig_validity_denial: Duration,

    /// How long before expiration a signature must be replaced.
    #[serde(
        default = "default_refresh",
        deserialize_with = "deserialize_duration_from_secs"
    )]
    pub sig_refresh: Duration,

    /// NSEC3 parameters; [`None`] selects plain NSEC.
    #[serde(default)]
    pub nsec3: Option<Nsec3Params>,

    /// The keys available for signing.
    #[serde(default)]
    pub keys: Vec<SignKey>,
}

fn default_serial_policy() -> SerialPolicy {
    SerialPolicy::UnixTime
}

fn default_inception_offset() -> Duration {
    Duration::from_secs(3600)
}

fn default_validity() -> Duration {
    // 30 days.
    Duration::from_secs(30 * 24 * 3600)
}

fn default_refresh() -> Duration {
    // 3 days.
    Duration::from_secs(3 * 24 * 3600)
}

impl Default for SignConf {
    fn default() -> Self {
        Self {
            serial_policy: default_serial_policy(),
            sig_inception_offset: default_inception_offset(),
            sig_jitter: Duration::ZERO,
            sig_validity_default: default_validity(),
            sig_validity_denial: default_validity(),
            sig_refresh: default_refresh(),
            nsec3: None,
            keys: Vec::new(),
        }
    }
}

impl SignConf {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Utf8Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// The keys that sign RRsets of the given type.
    ///
    /// The DNSKEY RRset is signed by the KSKs, everything else by the ZSKs.
    pub fn signing_keys(&self, rtype: RrType) -> impl Iterator<Item = &SignKey> {
        self.keys.iter().filter(move |key| match rtype {
            RrType::Dnskey => key.ksk,
            _ => key.zsk,
        })
    }

    /// Whether a key with the given locator is in the key list.
    pub fn has_key_locator(&self, locator: &str) -> bool {
        self.keys.iter().any(|key| key.locator == locator)
    }
}

//============ Tests ===========================================================
