//! Builders producing really-signed certificates for tests.

use crate::{signed_message, wrap_der, Certificate, Delegation};
use ic_agent_hash_tree::{fork, label, leaf, HashTree};
use ic_bls12_381::{G1Affine, G2Affine, G2Projective, Scalar};
use ic_principal::Principal;
use rand::RngCore;

#[derive(Clone)]
pub struct BlsKeyPair {
    secret: Scalar,
    public: G2Affine,
}

impl BlsKeyPair {
    pub fn generate<R: RngCore>(rng: &mut R) -> Self {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        let secret = Scalar::from_bytes_wide(&wide);
        let public = G2Affine::from(G2Projective::generator() * secret);
        Self { secret, public }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 48] {
        let point = crate::bls::hash_to_g1(message);
        G1Affine::from(point * self.secret).to_compressed()
    }

    pub fn public_key_bytes(&self) -> [u8; 96] {
        self.public.to_compressed()
    }

    pub fn public_key_der(&self) -> Vec<u8> {
        wrap_der(&self.public_key_bytes())
    }
}

fn leb128_leaf(value: u64) -> HashTree {
    let mut encoded = Vec::new();
    leb128::write::unsigned(&mut encoded, value).expect("writing to a Vec cannot fail");
    leaf(encoded)
}

/// Builds a signed certificate around an arbitrary payload tree, optionally
/// wrapped in a subnet delegation. Labels of the payload must sort before
/// "time".
pub struct CertificateBuilder {
    payload: HashTree,
    time_ns: Option<u64>,
    delegation: Option<DelegationSpec>,
    invalid_signature: bool,
}

struct DelegationSpec {
    subnet_id: Vec<u8>,
    canister_ranges: Vec<(Principal, Principal)>,
    time_ns: u64,
    nested: bool,
}

/// A built certificate plus the root key it verifies under.
pub struct BuiltCertificate {
    pub certificate: Certificate,
    pub cbor: Vec<u8>,
    pub root_key_der: Vec<u8>,
}

impl CertificateBuilder {
    pub fn new(payload: HashTree) -> Self {
        Self {
            payload,
            time_ns: None,
            delegation: None,
            invalid_signature: false,
        }
    }

    pub fn with_time(mut self, time_ns: u64) -> Self {
        self.time_ns = Some(time_ns);
        self
    }

    pub fn with_delegation(
        mut self,
        subnet_id: &[u8],
        canister_ranges: Vec<(Principal, Principal)>,
    ) -> Self {
        self.delegation = Some(DelegationSpec {
            subnet_id: subnet_id.to_vec(),
            canister_ranges,
            time_ns: 0,
            nested: false,
        });
        self
    }

    /// Makes the delegation certificate itself carry a (bogus) delegation.
    pub fn with_nested_delegation(mut self) -> Self {
        self.delegation
            .as_mut()
            .expect("call with_delegation first")
            .nested = true;
        self
    }

    pub fn with_invalid_signature(mut self) -> Self {
        self.invalid_signature = true;
        self
    }

    pub fn build<R: RngCore>(self, rng: &mut R) -> BuiltCertificate {
        let root_keypair = BlsKeyPair::generate(rng);

        let (signing_keypair, delegation) = match self.delegation {
            None => (root_keypair.clone(), None),
            Some(spec) => {
                let subnet_keypair = BlsKeyPair::generate(rng);
                let ranges: Vec<(serde_bytes::ByteBuf, serde_bytes::ByteBuf)> = spec
                    .canister_ranges
                    .iter()
                    .map(|(low, high)| {
                        (
                            serde_bytes::ByteBuf::from(low.as_slice().to_vec()),
                            serde_bytes::ByteBuf::from(high.as_slice().to_vec()),
                        )
                    })
                    .collect();
                let ranges_cbor =
                    serde_cbor::to_vec(&ranges).expect("failed to encode canister ranges");

                let inner_tree = fork(
                    label(
                        "subnet",
                        label(
                            spec.subnet_id.clone(),
                            fork(
                                label("canister_ranges", leaf(ranges_cbor)),
                                label("public_key", leaf(subnet_keypair.public_key_der())),
                            ),
                        ),
                    ),
                    label("time", leb128_leaf(spec.time_ns)),
                );
                let inner_certificate = Certificate {
                    signature: root_keypair
                        .sign(&signed_message(&inner_tree.digest()))
                        .to_vec(),
                    tree: inner_tree,
                    delegation: spec.nested.then(|| Delegation {
                        subnet_id: spec.subnet_id.clone(),
                        certificate: Vec::new(),
                    }),
                };
                let delegation = Delegation {
                    subnet_id: spec.subnet_id,
                    certificate: serde_cbor::to_vec(&inner_certificate)
                        .expect("failed to encode delegation certificate"),
                };
                (subnet_keypair, Some(delegation))
            }
        };

        let tree = match self.time_ns {
            Some(time_ns) => fork(self.payload, label("time", leb128_leaf(time_ns))),
            None => self.payload,
        };

        let mut signature = signing_keypair.sign(&signed_message(&tree.digest()));
        if self.invalid_signature {
            signature[7] ^= 0x01;
        }

        let certificate = Certificate {
            tree,
            signature: signature.to_vec(),
            delegation,
        };
        let cbor = serde_cbor::to_vec(&certificate).expect("failed to encode certificate");

        BuiltCertificate {
            certificate,
            cbor,
            root_key_der: root_keypair.public_key_der(),
        }
    }
}

/// A canister id in the replicas' own format: a big-endian index followed by
/// the opaque-id marker bytes.
pub fn canister_id(index: u64) -> Principal {
    let mut bytes = index.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[0x01, 0x01]);
    Principal::try_from_slice(&bytes).expect("10 bytes is a valid principal")
}

pub fn subnet_id(index: u64) -> Vec<u8> {
    let mut bytes = index.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[0x01, 0x02]);
    bytes
}
