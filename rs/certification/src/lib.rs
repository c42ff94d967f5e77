//! Verification of certificates issued by Internet Computer replicas.
//!
//! A certificate is a partial state tree together with a BLS threshold
//! signature over the tree's root digest, and optionally a delegation: a
//! second certificate, signed by the root key, that vouches for the key of
//! the subnet that produced the outer signature and for the set of canister
//! ids that subnet is allowed to answer for.
//!
//! Verification establishes that every value disclosed by the tree was
//! certified by the IC for the given canister at a recent enough time.
//! After a successful [`Certificate::verify`], [`Certificate::lookup`] reads
//! are trustworthy.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use ic_agent_hash_tree::{Digest, HashTree, Label, LookupResult, SubtreeLookupResult};
use ic_principal::Principal;

mod bls;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

const DOMAIN_IC_STATE_ROOT: &str = "ic-state-root";

/// How far in the future a certificate's timestamp may lie before it is
/// rejected, to allow for clock skew between the replica and this machine.
pub const ALLOWED_CERTIFICATE_TIME_DRIFT: Duration = Duration::from_secs(5 * 60);

/// The default freshness window for certificates.
pub const DEFAULT_MAX_CERTIFICATE_AGE: Duration = Duration::from_secs(5 * 60);

// All BLS public keys on the IC are exchanged in the same fixed DER
// envelope: this SubjectPublicKeyInfo prefix followed by the 96 raw key
// bytes. The envelope never varies, so it is compared literally instead of
// being parsed.
const DER_PREFIX: [u8; 37] = [
    0x30, 0x81, 0x82, 0x30, 0x1d, 0x06, 0x0d, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0xdc, 0x7c,
    0x05, 0x03, 0x01, 0x02, 0x01, 0x06, 0x0c, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0xdc, 0x7c,
    0x05, 0x03, 0x02, 0x01, 0x03, 0x61, 0x00,
];
const BLS_PUBLIC_KEY_LENGTH: usize = 96;
const BLS_SIGNATURE_LENGTH: usize = 48;

/// The DER-encoded root public key of the IC mainnet.
pub const IC_ROOT_KEY: [u8; 133] = [
    0x30, 0x81, 0x82, 0x30, 0x1d, 0x06, 0x0d, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0xdc, 0x7c,
    0x05, 0x03, 0x01, 0x02, 0x01, 0x06, 0x0c, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0xdc, 0x7c,
    0x05, 0x03, 0x02, 0x01, 0x03, 0x61, 0x00, 0x81, 0x4c, 0x0e, 0x6e, 0xc7, 0x1f, 0xab, 0x58,
    0x3b, 0x08, 0xbd, 0x81, 0x37, 0x3c, 0x25, 0x5c, 0x3c, 0x37, 0x1b, 0x2e, 0x84, 0x86, 0x3c,
    0x98, 0xa4, 0xf1, 0xe0, 0x8b, 0x74, 0x23, 0x5d, 0x14, 0xfb, 0x5d, 0x9c, 0x0c, 0xd5, 0x46,
    0xd9, 0x68, 0x5f, 0x91, 0x3a, 0x0c, 0x0b, 0x2c, 0xc5, 0x34, 0x15, 0x83, 0xbf, 0x4b, 0x43,
    0x92, 0xe4, 0x67, 0xdb, 0x96, 0xd6, 0x5b, 0x9b, 0xb4, 0xcb, 0x71, 0x71, 0x12, 0xf8, 0x47,
    0x2e, 0x0d, 0x5a, 0x4d, 0x14, 0x50, 0x5f, 0xfd, 0x74, 0x84, 0xb0, 0x12, 0x91, 0x09, 0x1c,
    0x5f, 0x87, 0xb9, 0x88, 0x83, 0x46, 0x3f, 0x98, 0x09, 0x1a, 0x0b, 0xaa, 0xae,
];

/// Describes why a certificate was rejected.
#[derive(Debug, thiserror::Error)]
pub enum CertificateVerificationError {
    /// Failed to deserialize some part of the certificate.
    #[error("failed to deserialize certificate: {0}")]
    Deserialize(String),

    /// A value the verification algorithm needs is missing from the tree or
    /// has an unexpected shape.
    #[error("malformed certificate tree at {path}: {reason}")]
    MalformedTree { path: String, reason: String },

    /// The certificate contains a delegation that itself contains a
    /// delegation. The IC never produces these, so they are rejected
    /// without further inspection.
    #[error("expected certificate with a maximum of one delegation but found nested delegations")]
    NestedDelegation,

    /// The canister id is not covered by the ranges the delegation grants
    /// to the signing subnet.
    #[error("canister id {0} is not contained in the canister ranges of the delegated subnet")]
    CanisterIdOutOfRange(Principal),

    /// The DER envelope around a BLS public key is not the fixed IC form.
    #[error("invalid DER-encoded BLS public key: {reason}")]
    InvalidDerKey { reason: String },

    /// The BLS signature does not verify under the (delegated) public key.
    #[error("signature verification failed")]
    SignatureVerification,

    /// The certificate timestamp is older than the caller's freshness
    /// window.
    #[error(
        "certificate is stale: certificate time {certificate_time_ns} ns, \
         current time {current_time_ns} ns"
    )]
    CertificateOutdated {
        certificate_time_ns: u64,
        current_time_ns: u64,
    },

    /// The certificate timestamp lies too far in the future.
    #[error(
        "certificate is dated in the future: certificate time {certificate_time_ns} ns, \
         current time {current_time_ns} ns"
    )]
    CertificateFromFuture {
        certificate_time_ns: u64,
        current_time_ns: u64,
    },
}

/// A delegation from the root key to a subnet key, carried inside a
/// certificate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    #[serde(with = "serde_bytes")]
    pub subnet_id: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub certificate: Vec<u8>,
}

impl fmt::Debug for Delegation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegation")
            .field("subnet_id", &hex::encode(&self.subnet_id))
            .field("certificate", &hex::encode(&self.certificate))
            .finish()
    }
}

/// A certificate as issued by a replica: a partial state tree, a signature
/// over its root digest and an optional subnet delegation.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Certificate {
    pub tree: HashTree,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation: Option<Delegation>,
}

/// What a certificate is verified against.
#[derive(Clone, Debug)]
pub struct VerifyParams<'a> {
    /// The DER-encoded root public key ([`IC_ROOT_KEY`] for mainnet).
    pub root_key: &'a [u8],
    /// The canister the certified data was read from; delegations are only
    /// accepted if they cover this canister.
    pub canister_id: Principal,
    /// Maximum accepted certificate age. `None` disables the freshness
    /// check.
    pub max_cert_age: Option<Duration>,
}

impl<'a> VerifyParams<'a> {
    pub fn new(root_key: &'a [u8], canister_id: Principal) -> Self {
        Self {
            root_key,
            canister_id,
            max_cert_age: Some(DEFAULT_MAX_CERTIFICATE_AGE),
        }
    }
}

impl Certificate {
    /// Parses a certificate from its CBOR encoding. The result is untrusted
    /// until [`Certificate::verify`] succeeds.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CertificateVerificationError> {
        serde_cbor::from_slice(bytes)
            .map_err(|err| CertificateVerificationError::Deserialize(err.to_string()))
    }

    /// Verifies the certificate against the current wall clock.
    pub fn verify(&self, params: &VerifyParams<'_>) -> Result<(), CertificateVerificationError> {
        self.verify_at_time(params, current_time_ns())
    }

    /// Verifies the certificate against an explicit notion of "now", in
    /// nanoseconds since the UNIX epoch.
    pub fn verify_at_time(
        &self,
        params: &VerifyParams<'_>,
        current_time_ns: u64,
    ) -> Result<(), CertificateVerificationError> {
        let root_digest = self.tree.digest();
        let der_key = self.check_delegation_and_get_key(params, current_time_ns)?;
        let key = extract_der(&der_key)?;

        if let Some(max_age) = params.max_cert_age {
            self.check_time(max_age, current_time_ns)?;
        }

        let signature: &[u8; BLS_SIGNATURE_LENGTH] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| CertificateVerificationError::SignatureVerification)?;
        if !bls::verify_bls_signature(signature, key, &signed_message(&root_digest)) {
            return Err(CertificateVerificationError::SignatureVerification);
        }
        Ok(())
    }

    /// Looks up a value in the certified tree. Only trustworthy after a
    /// successful [`Certificate::verify`].
    pub fn lookup(&self, path: &[Label]) -> LookupResult<'_> {
        self.tree.lookup_path(path)
    }

    /// Looks up a subtree in the certified tree.
    pub fn lookup_subtree(&self, path: &[Label]) -> SubtreeLookupResult<'_> {
        self.tree.lookup_subtree(path)
    }

    // Returns the DER key the signature must verify under: the root key
    // when there is no delegation, the delegated subnet key otherwise.
    fn check_delegation_and_get_key(
        &self,
        params: &VerifyParams<'_>,
        current_time_ns: u64,
    ) -> Result<Vec<u8>, CertificateVerificationError> {
        let Some(delegation) = &self.delegation else {
            return Ok(params.root_key.to_vec());
        };

        let inner = Certificate::from_cbor(&delegation.certificate)?;
        if inner.delegation.is_some() {
            return Err(CertificateVerificationError::NestedDelegation);
        }

        // The delegation certificate is signed directly by the root key.
        // Its own age is not checked: delegations are long-lived and the
        // outer certificate carries the timestamp that matters.
        inner.verify_at_time(
            &VerifyParams {
                root_key: params.root_key,
                canister_id: params.canister_id,
                max_cert_age: None,
            },
            current_time_ns,
        )?;

        // The management canister is served by every subnet; a delegation
        // can never list it in its ranges.
        if params.canister_id != Principal::management_canister()
            && !check_canister_ranges(&params.canister_id, &delegation.subnet_id, &inner.tree)?
        {
            return Err(CertificateVerificationError::CanisterIdOutOfRange(
                params.canister_id,
            ));
        }

        let path = [
            Label::from("subnet"),
            Label::from(&delegation.subnet_id),
            Label::from("public_key"),
        ];
        match inner.tree.lookup_path(&path) {
            LookupResult::Found(der_key) => Ok(der_key.to_vec()),
            _ => Err(CertificateVerificationError::MalformedTree {
                path: format!("/subnet/{}/public_key", hex::encode(&delegation.subnet_id)),
                reason: "delegation certificate does not disclose the subnet key".to_string(),
            }),
        }
    }

    fn check_time(
        &self,
        max_age: Duration,
        current_time_ns: u64,
    ) -> Result<(), CertificateVerificationError> {
        let path = [Label::from("time")];
        let encoded = match self.tree.lookup_path(&path) {
            LookupResult::Found(bytes) => bytes,
            _ => {
                return Err(CertificateVerificationError::MalformedTree {
                    path: "/time".to_string(),
                    reason: "certificate does not disclose its timestamp".to_string(),
                })
            }
        };
        let certificate_time_ns = leb128::read::unsigned(&mut &encoded[..]).map_err(|err| {
            CertificateVerificationError::MalformedTree {
                path: "/time".to_string(),
                reason: format!("timestamp is not valid LEB128: {}", err),
            }
        })?;

        let max_age_ns = saturating_duration_ns(max_age);
        let drift_ns = saturating_duration_ns(ALLOWED_CERTIFICATE_TIME_DRIFT);
        if certificate_time_ns.saturating_add(max_age_ns) < current_time_ns {
            return Err(CertificateVerificationError::CertificateOutdated {
                certificate_time_ns,
                current_time_ns,
            });
        }
        if certificate_time_ns > current_time_ns.saturating_add(drift_ns) {
            return Err(CertificateVerificationError::CertificateFromFuture {
                certificate_time_ns,
                current_time_ns,
            });
        }
        Ok(())
    }
}

/// Checks whether `canister_id` falls into one of the canister ranges the
/// tree certifies for `subnet_id`.
///
/// Ranges are inclusive on both ends and compared on the principals' raw
/// bytes: lexicographic, with the shorter id ordered first when one is a
/// prefix of the other. Subnet routing uses exactly this order, so no other
/// comparison (in particular not `Principal`'s derived `Ord`) may be
/// substituted.
pub fn check_canister_ranges(
    canister_id: &Principal,
    subnet_id: &[u8],
    tree: &HashTree,
) -> Result<bool, CertificateVerificationError> {
    let path = [
        Label::from("subnet"),
        Label::from(subnet_id),
        Label::from("canister_ranges"),
    ];
    let encoded = match tree.lookup_path(&path) {
        LookupResult::Found(bytes) => bytes,
        _ => {
            return Err(CertificateVerificationError::MalformedTree {
                path: format!("/subnet/{}/canister_ranges", hex::encode(subnet_id)),
                reason: "delegation certificate does not disclose the canister ranges"
                    .to_string(),
            })
        }
    };
    let ranges: Vec<(ByteBuf, ByteBuf)> = serde_cbor::from_slice(encoded).map_err(|err| {
        CertificateVerificationError::Deserialize(format!(
            "failed to decode canister ranges: {}",
            err
        ))
    })?;

    let id = canister_id.as_slice();
    for (low, high) in &ranges {
        let low = principal_from_bytes(low)?;
        let high = principal_from_bytes(high)?;
        if low.as_slice() <= id && id <= high.as_slice() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn principal_from_bytes(bytes: &[u8]) -> Result<Principal, CertificateVerificationError> {
    Principal::try_from_slice(bytes).map_err(|err| {
        CertificateVerificationError::Deserialize(format!(
            "failed to decode principal in canister range: {}",
            err
        ))
    })
}

// The byte string the replicas actually sign: the domain-separated root
// digest, with the same one-byte length prefix the hash tree domains use.
pub(crate) fn signed_message(root_digest: &Digest) -> Vec<u8> {
    let mut message = Vec::with_capacity(1 + DOMAIN_IC_STATE_ROOT.len() + 32);
    message.push(DOMAIN_IC_STATE_ROOT.len() as u8);
    message.extend_from_slice(DOMAIN_IC_STATE_ROOT.as_bytes());
    message.extend_from_slice(root_digest.as_bytes());
    message
}

// Strips the fixed DER envelope, returning the raw 96-byte BLS key.
fn extract_der(der: &[u8]) -> Result<&[u8; BLS_PUBLIC_KEY_LENGTH], CertificateVerificationError> {
    let expected_length = DER_PREFIX.len() + BLS_PUBLIC_KEY_LENGTH;
    if der.len() != expected_length {
        return Err(CertificateVerificationError::InvalidDerKey {
            reason: format!("expected {} bytes, got {}", expected_length, der.len()),
        });
    }
    let (prefix, key) = der.split_at(DER_PREFIX.len());
    if prefix != DER_PREFIX {
        return Err(CertificateVerificationError::InvalidDerKey {
            reason: format!("unexpected prefix {}", hex::encode(prefix)),
        });
    }
    let key: &[u8; BLS_PUBLIC_KEY_LENGTH] = key
        .try_into()
        .expect("length checked above");
    Ok(key)
}

// Wraps a raw 96-byte BLS key in the fixed DER envelope.
pub(crate) fn wrap_der(key: &[u8; BLS_PUBLIC_KEY_LENGTH]) -> Vec<u8> {
    let mut der = Vec::with_capacity(DER_PREFIX.len() + key.len());
    der.extend_from_slice(&DER_PREFIX);
    der.extend_from_slice(key);
    der
}

fn saturating_duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn current_time_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since_epoch| u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
