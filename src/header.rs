use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hex::encode;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::BlockHeaderFields;

pub const HEADER_SIZE: usize = 80;

/// Header version with the BIP9 top bits set and no deployment signalled.
pub const BLOCK_VERSION: i32 = 0x2000_0000;

const DIFFICULTY_1_BITS: u32 = 0x1d00ffff;

/// Serialize the header fields into the canonical 80-byte layout.
pub fn build_header(fields: &BlockHeaderFields) -> Result<[u8; HEADER_SIZE]> {
    let previous_block = decode_hash(&fields.prev_block_hash)?;
    let merkle_root = decode_hash(&fields.merkle_root)?;
    let bits = parse_bits(&fields.bits)?;

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.write_i32::<LittleEndian>(fields.version)?;
    header.extend_from_slice(&previous_block);
    header.extend_from_slice(&merkle_root);
    header.write_u32::<LittleEndian>(fields.timestamp)?;
    header.write_u32::<LittleEndian>(bits)?;
    header.write_u32::<LittleEndian>(fields.nonce)?;

    header
        .try_into()
        .map_err(|v: Vec<u8>| Error::Encoding(format!("header is {} bytes, expected {}", v.len(), HEADER_SIZE)))
}

/// Double SHA-256 of the header, reversed into display order.
pub fn canonical_hash(header: &[u8; HEADER_SIZE]) -> [u8; 32] {
    let first_hash = Sha256::digest(header);
    let second_hash = Sha256::digest(first_hash);

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&second_hash);
    hash.reverse();
    hash
}

pub fn hash_hex(hash: &[u8; 32]) -> String {
    encode(hash)
}

/// Decode an 80-byte header back into its fields.
pub fn parse_header(bytes: &[u8]) -> Result<BlockHeaderFields> {
    if bytes.len() != HEADER_SIZE {
        return Err(Error::Encoding(format!(
            "header is {} bytes, expected {}",
            bytes.len(),
            HEADER_SIZE
        )));
    }

    let mut reader = Cursor::new(bytes);
    let version = reader.read_i32::<LittleEndian>()?;
    let prev_block_hash = read_hash(&mut reader)?;
    let merkle_root = read_hash(&mut reader)?;
    let timestamp = reader.read_u32::<LittleEndian>()?;
    let bits = format!("{:08x}", reader.read_u32::<LittleEndian>()?);
    let nonce = reader.read_u32::<LittleEndian>()?;

    Ok(BlockHeaderFields {
        version,
        prev_block_hash,
        merkle_root,
        timestamp,
        bits,
        nonce,
    })
}

/// Parse the compact difficulty field, e.g. `"1d00ffff"`.
pub fn parse_bits(bits: &str) -> Result<u32> {
    if bits.is_empty() || bits.len() > 8 || !bits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Encoding(format!("invalid bits {:?}", bits)));
    }
    u32::from_str_radix(bits, 16).map_err(|e| Error::Encoding(format!("invalid bits {:?}: {}", bits, e)))
}

/// Expand compact bits into a 256-bit big-endian target.
///
/// Returns `None` for negative or overflowing encodings.
pub fn compact_to_target(bits: u32) -> Option<[u8; 32]> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 && mantissa != 0 {
        return None;
    }

    let mut target = [0u8; 32];
    if exponent <= 3 {
        let value = mantissa >> (8 * (3 - exponent));
        target[28..].copy_from_slice(&value.to_be_bytes());
    } else {
        if exponent > 32 {
            return None;
        }
        let start = 32 - exponent;
        for (i, byte) in mantissa.to_be_bytes()[1..].iter().enumerate() {
            if let Some(slot) = target.get_mut(start + i) {
                *slot = *byte;
            }
        }
    }
    Some(target)
}

/// Whether a display-order hash is at or below the target encoded by `bits`.
pub fn meets_target(hash: &[u8; 32], bits: u32) -> bool {
    compact_to_target(bits).map_or(false, |target| *hash <= target)
}

/// Difficulty relative to the minimum target `0x1d00ffff`.
pub fn difficulty(bits: u32) -> Result<f64> {
    let target = compact_value(bits)?;
    let difficulty_1_target = compact_value(DIFFICULTY_1_BITS)?;
    Ok(difficulty_1_target / target)
}

fn compact_value(bits: u32) -> Result<f64> {
    let exp = (bits >> 24) as i32;
    let coef = bits & 0x00ff_ffff;

    let exp = exp
        .checked_sub(3)
        .filter(|e| *e >= 0)
        .ok_or_else(|| Error::Encoding(format!("exponent underflow in bits {:08x}", bits)))?;
    if coef == 0 {
        return Err(Error::Encoding(format!("zero coefficient in bits {:08x}", bits)));
    }
    Ok(coef as f64 * 256f64.powi(exp))
}

/// Hex hash in display order to internal (reversed) byte order.
fn decode_hash(hash: &str) -> Result<[u8; 32]> {
    let mut bytes: [u8; 32] = hex::decode(hash)?
        .try_into()
        .map_err(|v: Vec<u8>| Error::Encoding(format!("hash is {} bytes, expected 32", v.len())))?;
    bytes.reverse();
    Ok(bytes)
}

fn read_hash<R: Read>(reader: &mut R) -> Result<String> {
    let mut hash = [0; 32];
    reader.read_exact(&mut hash)?;
    Ok(encode(hash.iter().rev().cloned().collect::<Vec<u8>>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";
    const GENESIS_HASH: &str = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";

    fn example_fields() -> BlockHeaderFields {
        BlockHeaderFields {
            version: BLOCK_VERSION,
            prev_block_hash: format!("{}01", "00".repeat(31)),
            merkle_root: "11".repeat(32),
            timestamp: 0,
            bits: "1d00ffff".to_string(),
            nonce: 0,
        }
    }

    fn genesis_fields() -> BlockHeaderFields {
        BlockHeaderFields {
            version: 1,
            prev_block_hash: "00".repeat(32),
            merkle_root: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b".to_string(),
            timestamp: 1231006505,
            bits: "1d00ffff".to_string(),
            nonce: 2083236893,
        }
    }

    #[test]
    fn test_example_header_layout() {
        let header = build_header(&example_fields()).unwrap();

        let mut expected = vec![0x00, 0x00, 0x00, 0x20];
        expected.push(0x01);
        expected.extend_from_slice(&[0u8; 31]);
        expected.extend_from_slice(&[0x11; 32]);
        expected.extend_from_slice(&[0, 0, 0, 0]);
        expected.extend_from_slice(&[0xff, 0xff, 0x00, 0x1d]);
        expected.extend_from_slice(&[0, 0, 0, 0]);

        assert_eq!(header.len(), HEADER_SIZE);
        assert_eq!(header.to_vec(), expected);
        assert_eq!(&header[..4], &[0x00, 0x00, 0x00, 0x20]);

        let mut prev = hex::decode(&example_fields().prev_block_hash).unwrap();
        prev.reverse();
        assert_eq!(&header[4..36], prev.as_slice());
    }

    #[test]
    fn test_genesis_header() {
        let header = build_header(&genesis_fields()).unwrap();
        assert_eq!(encode(header), GENESIS_HEADER);
        assert_eq!(hash_hex(&canonical_hash(&header)), GENESIS_HASH);
    }

    #[test]
    fn test_build_is_deterministic() {
        let fields = example_fields();
        let first = build_header(&fields).unwrap();
        let second = build_header(&fields).unwrap();
        assert_eq!(first, second);
        assert_eq!(canonical_hash(&first), canonical_hash(&second));
    }

    #[test]
    fn test_single_bit_flip_changes_hash() {
        let header = build_header(&example_fields()).unwrap();
        let mut flipped = header;
        flipped[76] ^= 0x01;
        assert_ne!(canonical_hash(&header), canonical_hash(&flipped));
    }

    #[test]
    fn test_parse_header_recovers_fields() {
        let fields = genesis_fields();
        let header = build_header(&fields).unwrap();
        assert_eq!(parse_header(&header).unwrap(), fields);

        let fields = example_fields();
        let parsed = parse_header(&build_header(&fields).unwrap()).unwrap();
        assert_eq!(parsed.prev_block_hash, fields.prev_block_hash);
        assert_eq!(parsed.merkle_root, fields.merkle_root);
    }

    #[test]
    fn test_parse_header_rejects_wrong_length() {
        assert!(matches!(parse_header(&[0u8; 79]), Err(Error::Encoding(_))));
        assert!(matches!(parse_header(&[0u8; 81]), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let mut fields = example_fields();
        fields.prev_block_hash = "00".repeat(31);
        assert!(matches!(build_header(&fields), Err(Error::Encoding(_))));

        let mut fields = example_fields();
        fields.merkle_root = "zz".repeat(32);
        assert!(matches!(build_header(&fields), Err(Error::Encoding(_))));

        let mut fields = example_fields();
        fields.bits = "not-hex".to_string();
        assert!(matches!(build_header(&fields), Err(Error::Encoding(_))));

        let mut fields = example_fields();
        fields.bits = "1d00ffff00".to_string();
        assert!(matches!(build_header(&fields), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_compact_to_target() {
        let target = compact_to_target(0x1d00ffff).unwrap();
        assert_eq!(
            encode(target),
            "00000000ffff0000000000000000000000000000000000000000000000000000"
        );

        let target = compact_to_target(0x03123456).unwrap();
        assert_eq!(&target[29..], &[0x12, 0x34, 0x56]);

        assert!(compact_to_target(0x04923456).is_none());
        assert!(compact_to_target(0x21010000).is_none());
    }

    #[test]
    fn test_meets_target() {
        let genesis = canonical_hash(&build_header(&genesis_fields()).unwrap());
        assert!(meets_target(&genesis, 0x1d00ffff));
        assert!(!meets_target(&[0xff; 32], 0x1d00ffff));
    }

    #[test]
    fn test_difficulty() {
        assert_eq!(difficulty(0x1d00ffff).unwrap(), 1.0);
        let d = difficulty(0x1b0404cb).unwrap();
        assert!((d - 16307.420938523983).abs() < 1e-6);
        assert!(difficulty(0x02008000).is_err());
        assert!(difficulty(0x1d000000).is_err());
    }
}
