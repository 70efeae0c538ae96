//! Double-SHA-256 and the ckpool byte-order conventions.
//!
//! Stratum v1 hardware expects the previous-block hash and merkle root in a
//! word-swapped form inherited from ckpool: each 32-byte field is treated as
//! eight 4-byte words and the bytes within every word are reversed
//! (`flip_32`). An 80-byte header built from those wire-form fields is
//! restored to its consensus serialization by `flip_80` before hashing.
//! Both operations are involutions.
//!
//! Target arithmetic uses 256-bit unsigned integers throughout; hashes are
//! compared as little-endian integers, matching the byte order double
//! SHA-256 emits.

use sha2::{Digest, Sha256};

pub use ruint::aliases::U256;

/// The pool difficulty-1 target: `0x00000000ffff0000...0`.
///
/// Share targets are derived from this, not from the chain's proof-of-work
/// limit, so pool difficulty is comparable across networks.
const DIFF1_BE: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

/// Difficulty-1 target as a 256-bit integer.
pub fn diff1_target() -> U256 {
    U256::from_be_bytes(DIFF1_BE)
}

/// Double SHA-256.
pub fn dsha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Double SHA-256 over the concatenation of two 32-byte nodes.
///
/// This is the merkle combining step; `left` and `right` are in natural
/// (little-endian) byte order.
pub fn dsha256_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    dsha256(&buf)
}

/// Reverse the byte order within each of the eight 4-byte words.
pub fn flip_32(buf: &mut [u8; 32]) {
    for word in buf.chunks_exact_mut(4) {
        word.reverse();
    }
}

/// `flip_32` as a value transform.
pub fn flipped_32(mut buf: [u8; 32]) -> [u8; 32] {
    flip_32(&mut buf);
    buf
}

/// Word-swap the `prev` and `merkle` fields of an 80-byte header in place.
///
/// The header layout is `version(4) | prev(32) | merkle(32) | ntime(4) |
/// bits(4) | nonce(4)`; the three scalar fields are untouched. Applying
/// this to a header whose hash fields are in Stratum wire form yields the
/// consensus serialization, and vice versa.
pub fn flip_80(header: &mut [u8; 80]) {
    for word in header[4..68].chunks_exact_mut(4) {
        word.reverse();
    }
}

/// Hash a wire-form header: restore consensus byte order, double-SHA, and
/// return the digest as a little-endian 256-bit integer.
pub fn wire_header_hash(header: &[u8; 80]) -> (U256, [u8; 32]) {
    let mut natural = *header;
    flip_80(&mut natural);
    let digest = dsha256(&natural);
    (U256::from_le_bytes(digest), digest)
}

/// Expand a compact `nbits` encoding into a full 256-bit target.
///
/// `exp` is the leading byte, `mant` the remaining three:
/// `target = mant << (8 * (exp - 3))`. Out-of-range exponents saturate.
pub fn target_from_bits(bits: u32) -> U256 {
    let exp = (bits >> 24) as u32;
    let mant = U256::from(bits & 0x00ff_ffff);
    if exp <= 3 {
        mant >> (8 * (3 - exp) as usize)
    } else if exp > 32 {
        U256::MAX
    } else {
        mant << (8 * (exp - 3) as usize)
    }
}

/// Share target for a pool difficulty: `floor(diff1_target / difficulty)`.
///
/// Computed in fixed point with 32 fractional bits so fractional
/// difficulties (used for low-power test hardware) divide sensibly.
/// Non-positive and non-finite difficulties clamp to difficulty 1.
pub fn target_for_difficulty(difficulty: f64) -> U256 {
    if !difficulty.is_finite() || difficulty <= 0.0 {
        return diff1_target();
    }

    let scaled = (difficulty * 4_294_967_296.0) as u128;
    let divisor = U256::from(scaled.max(1));

    // diff1 has 32 leading zero bits, so the shift cannot overflow.
    (diff1_target() << 32) / divisor
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::CompactTarget;
    use bitcoin::pow::Target;
    use test_case::test_case;

    // Bitcoin genesis block, consensus serialization.
    const GENESIS_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000\
                                  000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa\
                                  4b1e5e4a29ab5f49ffff001d1dac2b7c";

    // dsha256 of the genesis header (little-endian digest order).
    const GENESIS_HASH_LE: &str =
        "6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000";

    fn genesis_header() -> [u8; 80] {
        hex::decode(GENESIS_HEADER).unwrap().try_into().unwrap()
    }

    #[test]
    fn flip_32_is_an_involution() {
        let original: [u8; 32] = std::array::from_fn(|i| i as u8);
        let once = flipped_32(original);
        assert_ne!(once, original);
        assert_eq!(flipped_32(once), original);
    }

    #[test]
    fn flip_32_swaps_within_words() {
        let mut buf = [0u8; 32];
        buf[..4].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        buf[28..].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);
        flip_32(&mut buf);
        assert_eq!(&buf[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[28..], &[0xdd, 0xcc, 0xbb, 0xaa]);
    }

    #[test]
    fn flip_80_is_an_involution_and_preserves_scalars() {
        let mut header: [u8; 80] = std::array::from_fn(|i| i as u8);
        let original = header;
        flip_80(&mut header);

        // version, ntime, bits, nonce untouched
        assert_eq!(header[..4], original[..4]);
        assert_eq!(header[68..], original[68..]);
        // hash fields changed
        assert_ne!(header[4..68], original[4..68]);

        flip_80(&mut header);
        assert_eq!(header, original);
    }

    #[test]
    fn genesis_header_hashes_to_known_value() {
        let natural = genesis_header();

        // The wire form of the genesis header is its flip_80 image; hashing
        // it must reproduce the published block hash.
        let mut wire = natural;
        flip_80(&mut wire);
        let (value, digest) = wire_header_hash(&wire);

        let expected: [u8; 32] = hex::decode(GENESIS_HASH_LE).unwrap().try_into().unwrap();
        assert_eq!(digest, expected);
        assert_eq!(value, U256::from_le_bytes(expected));

        // Genesis met the difficulty-1 network target.
        assert!(value <= target_from_bits(0x1d00ffff));
    }

    #[test]
    fn diff1_bits_expand_to_diff1_target() {
        assert_eq!(target_from_bits(0x1d00ffff), diff1_target());
    }

    #[test_case(0x1d00ffff)]
    #[test_case(0x1b0404cb)]
    #[test_case(0x1703fffc)]
    #[test_case(0x207fffff)] // regtest
    fn target_from_bits_matches_rust_bitcoin(bits: u32) {
        let ours = target_from_bits(bits);
        let theirs = Target::from_compact(CompactTarget::from_consensus(bits));
        assert_eq!(ours.to_be_bytes::<32>(), theirs.to_be_bytes());
    }

    #[test]
    fn difficulty_one_is_diff1_target() {
        assert_eq!(target_for_difficulty(1.0), diff1_target());
    }

    #[test]
    fn higher_difficulty_means_smaller_target() {
        let d1 = target_for_difficulty(1.0);
        let d1k = target_for_difficulty(1000.0);
        let d1m = target_for_difficulty(1_000_000.0);
        assert!(d1k < d1);
        assert!(d1m < d1k);
        // Integral difficulties divide exactly.
        assert_eq!(d1k, diff1_target() / U256::from(1000u64));
    }

    #[test]
    fn fractional_difficulty_raises_target() {
        let half = target_for_difficulty(0.5);
        assert_eq!(half, diff1_target() * U256::from(2u64));
    }

    #[test]
    fn degenerate_difficulty_clamps_to_one() {
        assert_eq!(target_for_difficulty(0.0), diff1_target());
        assert_eq!(target_for_difficulty(-3.0), diff1_target());
        assert_eq!(target_for_difficulty(f64::NAN), diff1_target());
        assert_eq!(target_for_difficulty(f64::INFINITY), diff1_target());
    }
}
