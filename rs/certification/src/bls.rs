//! BLS12-381 signature verification for certificate root hashes.
//!
//! Replicas sign with the ciphersuite `BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_`:
//! signatures are compressed G1 points, public keys compressed G2 points,
//! and a signature is valid iff `e(sig, g2) == e(H(msg), pk)`.

use ic_bls12_381::hash_to_curve::{ExpandMsgXmd, HashToCurve};
use ic_bls12_381::{multi_miller_loop, G1Affine, G1Projective, G2Affine, G2Prepared, Gt};
use sha2::Sha256;

const BLS_SIGNATURE_DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

pub(crate) fn hash_to_g1(message: &[u8]) -> G1Affine {
    G1Affine::from(
        <G1Projective as HashToCurve<ExpandMsgXmd<Sha256>>>::hash_to_curve(
            message,
            BLS_SIGNATURE_DST,
        ),
    )
}

/// Verifies a combined threshold signature over `message`.
///
/// Malformed points (not on the curve, not in the subgroup) verify as
/// `false`; there is no separate error path for them, since an attacker can
/// produce them as easily as any other invalid signature.
pub(crate) fn verify_bls_signature(
    signature: &[u8; 48],
    public_key: &[u8; 96],
    message: &[u8],
) -> bool {
    let signature = match Option::<G1Affine>::from(G1Affine::from_compressed(signature)) {
        Some(point) => point,
        None => return false,
    };
    let public_key = match Option::<G2Affine>::from(G2Affine::from_compressed(public_key)) {
        Some(point) => point,
        None => return false,
    };

    let message_point = hash_to_g1(message);

    // e(sig, g2) == e(H(msg), pk), checked as a single pairing product
    // e(sig, -g2) * e(H(msg), pk) == 1.
    let generator_neg = G2Prepared::from(-G2Affine::generator());
    let public_key = G2Prepared::from(public_key);
    let product = multi_miller_loop(&[
        (&signature, &generator_neg),
        (&message_point, &public_key),
    ])
    .final_exponentiation();
    product == Gt::identity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::BlsKeyPair;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn accepts_own_signature() {
        let mut rng = SmallRng::seed_from_u64(1);
        let keypair = BlsKeyPair::generate(&mut rng);
        let signature = keypair.sign(b"certified message");
        assert!(verify_bls_signature(
            &signature,
            &keypair.public_key_bytes(),
            b"certified message"
        ));
    }

    #[test]
    fn rejects_other_message() {
        let mut rng = SmallRng::seed_from_u64(2);
        let keypair = BlsKeyPair::generate(&mut rng);
        let signature = keypair.sign(b"certified message");
        assert!(!verify_bls_signature(
            &signature,
            &keypair.public_key_bytes(),
            b"forged message"
        ));
    }

    #[test]
    fn rejects_flipped_signature_bits() {
        let mut rng = SmallRng::seed_from_u64(3);
        let keypair = BlsKeyPair::generate(&mut rng);
        let mut signature = keypair.sign(b"certified message");
        for byte in 0..signature.len() {
            signature[byte] ^= 0x01;
            assert!(!verify_bls_signature(
                &signature,
                &keypair.public_key_bytes(),
                b"certified message"
            ));
            signature[byte] ^= 0x01;
        }
    }

    #[test]
    fn rejects_wrong_key() {
        let mut rng = SmallRng::seed_from_u64(4);
        let keypair = BlsKeyPair::generate(&mut rng);
        let other = BlsKeyPair::generate(&mut rng);
        let signature = keypair.sign(b"certified message");
        assert!(!verify_bls_signature(
            &signature,
            &other.public_key_bytes(),
            b"certified message"
        ));
    }
}
