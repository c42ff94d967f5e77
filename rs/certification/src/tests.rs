use std::time::Duration;

use assert_matches::assert_matches;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use ic_agent_hash_tree::{fork, label, leaf, Label, LookupResult};
use ic_principal::Principal;

use crate::test_utils::{canister_id, subnet_id, CertificateBuilder};
use crate::{
    check_canister_ranges, Certificate, CertificateVerificationError, VerifyParams, IC_ROOT_KEY,
};

const NOW_NS: u64 = 1_700_000_000_000_000_000;

fn rng() -> SmallRng {
    SmallRng::seed_from_u64(42)
}

fn payload() -> ic_agent_hash_tree::HashTree {
    label(
        "canister",
        label(
            canister_id(1).as_slice(),
            label("certified_data", leaf(vec![0xAB; 32])),
        ),
    )
}

fn params<'a>(root_key: &'a [u8]) -> VerifyParams<'a> {
    VerifyParams::new(root_key, canister_id(1))
}

#[test]
fn verifies_certificate_without_delegation() {
    let built = CertificateBuilder::new(payload()).with_time(NOW_NS).build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).expect("failed to parse certificate");
    assert_eq!(certificate, built.certificate);

    certificate
        .verify_at_time(&params(&built.root_key_der), NOW_NS)
        .expect("expected valid certificate");
}

#[test]
fn lookup_reads_certified_values() {
    let built = CertificateBuilder::new(payload()).with_time(NOW_NS).build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();
    certificate
        .verify_at_time(&params(&built.root_key_der), NOW_NS)
        .unwrap();

    let path = [
        Label::from("canister"),
        Label::from(canister_id(1).as_slice()),
        Label::from("certified_data"),
    ];
    assert_matches!(certificate.lookup(&path), LookupResult::Found(data) if data == &[0xAB; 32][..]);
    assert_matches!(
        certificate.lookup(&[Label::from("no_such_label")]),
        LookupResult::Absent
    );
}

#[test]
fn rejects_flipped_signature() {
    let built = CertificateBuilder::new(payload())
        .with_time(NOW_NS)
        .with_invalid_signature()
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    assert_matches!(
        certificate.verify_at_time(&params(&built.root_key_der), NOW_NS),
        Err(CertificateVerificationError::SignatureVerification)
    );
}

#[test]
fn rejects_wrong_root_key() {
    let built = CertificateBuilder::new(payload()).with_time(NOW_NS).build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    assert_matches!(
        certificate.verify_at_time(&params(&IC_ROOT_KEY), NOW_NS),
        Err(CertificateVerificationError::SignatureVerification)
    );
}

#[test]
fn rejects_stale_certificate() {
    let ten_minutes_ago = NOW_NS - 10 * 60 * 1_000_000_000;
    let built = CertificateBuilder::new(payload())
        .with_time(ten_minutes_ago)
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    assert_matches!(
        certificate.verify_at_time(&params(&built.root_key_der), NOW_NS),
        Err(CertificateVerificationError::CertificateOutdated { .. })
    );
}

#[test]
fn rejects_certificate_from_the_future() {
    let ten_minutes_ahead = NOW_NS + 10 * 60 * 1_000_000_000;
    let built = CertificateBuilder::new(payload())
        .with_time(ten_minutes_ahead)
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    assert_matches!(
        certificate.verify_at_time(&params(&built.root_key_der), NOW_NS),
        Err(CertificateVerificationError::CertificateFromFuture { .. })
    );
}

#[test]
fn freshness_check_can_be_disabled() {
    let ten_minutes_ago = NOW_NS - 10 * 60 * 1_000_000_000;
    let built = CertificateBuilder::new(payload())
        .with_time(ten_minutes_ago)
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    let mut params = params(&built.root_key_der);
    params.max_cert_age = None;
    certificate
        .verify_at_time(&params, NOW_NS)
        .expect("freshness check should be disabled");
}

#[test]
fn slightly_future_certificate_within_drift_is_accepted() {
    let one_minute_ahead = NOW_NS + 60 * 1_000_000_000;
    let built = CertificateBuilder::new(payload())
        .with_time(one_minute_ahead)
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    certificate
        .verify_at_time(&params(&built.root_key_der), NOW_NS)
        .expect("expected drift allowance to cover one minute");
}

#[test]
fn rejects_missing_time() {
    let built = CertificateBuilder::new(payload()).build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    assert_matches!(
        certificate.verify_at_time(&params(&built.root_key_der), NOW_NS),
        Err(CertificateVerificationError::MalformedTree { path, .. }) if path == "/time"
    );
}

#[test]
fn verifies_certificate_with_delegation() {
    let built = CertificateBuilder::new(payload())
        .with_time(NOW_NS)
        .with_delegation(&subnet_id(1), vec![(canister_id(0), canister_id(10))])
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    certificate
        .verify_at_time(&params(&built.root_key_der), NOW_NS)
        .expect("expected valid delegated certificate");
}

#[test]
fn accepts_range_endpoints() {
    for id in [0, 10] {
        let built = CertificateBuilder::new(payload())
            .with_time(NOW_NS)
            .with_delegation(&subnet_id(1), vec![(canister_id(0), canister_id(10))])
            .build(&mut rng());
        let certificate = Certificate::from_cbor(&built.cbor).unwrap();

        let params = VerifyParams {
            canister_id: canister_id(id),
            ..params(&built.root_key_der)
        };
        certificate
            .verify_at_time(&params, NOW_NS)
            .expect("range bounds are inclusive");
    }
}

#[test]
fn rejects_canister_outside_delegated_ranges() {
    let built = CertificateBuilder::new(payload())
        .with_time(NOW_NS)
        .with_delegation(&subnet_id(1), vec![(canister_id(10), canister_id(20))])
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    assert_matches!(
        certificate.verify_at_time(&params(&built.root_key_der), NOW_NS),
        Err(CertificateVerificationError::CanisterIdOutOfRange(_))
    );
}

#[test]
fn management_canister_bypasses_range_check() {
    let built = CertificateBuilder::new(payload())
        .with_time(NOW_NS)
        .with_delegation(&subnet_id(1), vec![(canister_id(10), canister_id(20))])
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    let params = VerifyParams {
        canister_id: Principal::management_canister(),
        ..params(&built.root_key_der)
    };
    certificate
        .verify_at_time(&params, NOW_NS)
        .expect("management canister is always in range");
}

#[test]
fn rejects_nested_delegation() {
    let built = CertificateBuilder::new(payload())
        .with_time(NOW_NS)
        .with_delegation(&subnet_id(1), vec![(canister_id(0), canister_id(10))])
        .with_nested_delegation()
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    assert_matches!(
        certificate.verify_at_time(&params(&built.root_key_der), NOW_NS),
        Err(CertificateVerificationError::NestedDelegation)
    );
}

#[test]
fn delegation_age_is_not_checked() {
    // The delegation certificate is always built with time 0; only the
    // outer certificate's timestamp is subject to the freshness window.
    let built = CertificateBuilder::new(payload())
        .with_time(NOW_NS)
        .with_delegation(&subnet_id(1), vec![(canister_id(0), canister_id(10))])
        .build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    certificate
        .verify_at_time(&params(&built.root_key_der), NOW_NS)
        .expect("inner certificate age must not matter");
}

#[test]
fn rejects_garbage_cbor() {
    assert_matches!(
        Certificate::from_cbor(&[0xDE, 0xAD, 0xBE, 0xEF]),
        Err(CertificateVerificationError::Deserialize(_))
    );
}

#[test]
fn rejects_der_key_with_wrong_length() {
    let built = CertificateBuilder::new(payload()).with_time(NOW_NS).build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    let truncated = &built.root_key_der[..built.root_key_der.len() - 1];
    assert_matches!(
        certificate.verify_at_time(&params(truncated), NOW_NS),
        Err(CertificateVerificationError::InvalidDerKey { .. })
    );
}

#[test]
fn rejects_der_key_with_wrong_prefix() {
    let built = CertificateBuilder::new(payload()).with_time(NOW_NS).build(&mut rng());
    let certificate = Certificate::from_cbor(&built.cbor).unwrap();

    let mut tampered = built.root_key_der.clone();
    tampered[0] ^= 0x01;
    assert_matches!(
        certificate.verify_at_time(&params(&tampered), NOW_NS),
        Err(CertificateVerificationError::InvalidDerKey { .. })
    );
}

#[test]
fn range_check_compares_principal_bytes_lexicographically() {
    // Build a subnet tree directly; ranges [A, C] with B inside and D
    // outside, in plain byte-lexicographic order.
    let low = Principal::try_from_slice(&[1, 1]).unwrap();
    let high = Principal::try_from_slice(&[1, 9]).unwrap();
    let inside = Principal::try_from_slice(&[1, 5]).unwrap();
    // A strict prefix of the lower bound sorts before it.
    let prefix = Principal::try_from_slice(&[1]).unwrap();
    let outside = Principal::try_from_slice(&[2]).unwrap();

    let ranges = vec![(
        serde_bytes::ByteBuf::from(low.as_slice().to_vec()),
        serde_bytes::ByteBuf::from(high.as_slice().to_vec()),
    )];
    let ranges_cbor = serde_cbor::to_vec(&ranges).unwrap();
    let subnet = subnet_id(7);
    let tree = label(
        "subnet",
        label(
            subnet.as_slice(),
            label("canister_ranges", leaf(ranges_cbor)),
        ),
    );

    assert_matches!(check_canister_ranges(&inside, &subnet, &tree), Ok(true));
    assert_matches!(check_canister_ranges(&low, &subnet, &tree), Ok(true));
    assert_matches!(check_canister_ranges(&high, &subnet, &tree), Ok(true));
    assert_matches!(check_canister_ranges(&prefix, &subnet, &tree), Ok(false));
    assert_matches!(check_canister_ranges(&outside, &subnet, &tree), Ok(false));
}

#[test]
fn range_check_missing_ranges_is_malformed() {
    let tree = fork(label("a", leaf(b"x".to_vec())), label("b", leaf(b"y".to_vec())));
    assert_matches!(
        check_canister_ranges(&canister_id(1), &subnet_id(1), &tree),
        Err(CertificateVerificationError::MalformedTree { .. })
    );
}

#[test]
fn default_params_use_five_minute_window() {
    let params = VerifyParams::new(&IC_ROOT_KEY, canister_id(1));
    assert_eq!(params.max_cert_age, Some(Duration::from_secs(300)));
}
