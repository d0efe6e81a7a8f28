//! Property-based tests for otapush-core.
//!
//! # Properties Tested
//!
//! - The tee stream forwards every byte unchanged and its digest is the
//!   SHA-256 of the payload, whatever the chunk size
//! - A digest claim only verifies when it is the payload's own digest
//! - Feature lists parse independently of surrounding whitespace

#![cfg(test)]

use std::io::Cursor;

use futures_util::StreamExt;
use proptest::prelude::*;
use sha2::{Digest, Sha256};

use crate::error::UpdateError;
use crate::session::parse_features;
use crate::stream::{verify_remote_digest, Tally, TeeStream};

// =============================================================================
// Generators
// =============================================================================

/// Generate random image content (0 to 64KB).
fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..65536)
}

/// Generate a feature name.
fn arb_feature() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

fn compute_hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn drain_tee(payload: Vec<u8>, chunk_size: usize) -> (Vec<u8>, Tally) {
    let tally = Tally::new();
    let mut stream = TeeStream::with_chunk_size(Cursor::new(payload), tally.clone(), chunk_size);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let forwarded = runtime.block_on(async {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    });
    (forwarded, tally)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_tee_digest_matches_payload(payload in arb_payload(), chunk_size in 1usize..10000) {
        let expected = compute_hash(&payload);
        let (forwarded, tally) = drain_tee(payload.clone(), chunk_size);

        prop_assert_eq!(&forwarded, &payload);
        prop_assert_eq!(tally.bytes(), payload.len() as u64);
        prop_assert_eq!(tally.digest(), expected);
    }

    #[test]
    fn prop_only_own_digest_verifies(payload in arb_payload(), flip in any::<prop::sample::Index>()) {
        let local = compute_hash(&payload);
        prop_assert!(verify_remote_digest(hex::encode(local).as_bytes(), &local).is_ok());

        // Corrupting a single payload byte must be detected
        prop_assume!(!payload.is_empty());
        let mut corrupted = payload.clone();
        let idx = flip.index(corrupted.len());
        corrupted[idx] ^= 0x01;
        let remote = hex::encode(compute_hash(&corrupted));
        let result = verify_remote_digest(remote.as_bytes(), &local);
        let is_mismatch = matches!(result, Err(UpdateError::DigestMismatch { .. }));
        prop_assert!(is_mismatch, "corrupted payload digest was accepted: {:?}", result);
    }

    #[test]
    fn prop_feature_list_membership(
        features in prop::collection::vec(arb_feature(), 1..8),
        pick in any::<prop::sample::Index>(),
    ) {
        let body = features.iter().map(|f| format!(" {f} ")).collect::<Vec<_>>().join(",");
        let parsed = parse_features(&body);

        prop_assert_eq!(&parsed, &features);
        let wanted = &features[pick.index(features.len())];
        prop_assert!(parsed.contains(wanted));
    }
}
