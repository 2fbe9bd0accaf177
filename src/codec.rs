//! Compact text codec for integer sequences.
//!
//! Sorted sequences are first turned into deltas, then every non-negative integer is packed into
//! printable characters: zero or more overflow characters (`!`, each worth [`MAX_VALUE`])
//! followed by one payload character in `#..=~`. `"` is skipped because JSON escapes it.

use anyhow::{bail, ensure, Result};

const OVERFLOW_CHAR: u8 = b'!';
const PAYLOAD_MIN_CHAR: u8 = b'#';
const PAYLOAD_MAX_CHAR: u8 = b'~';
pub const MAX_VALUE: i64 = (PAYLOAD_MAX_CHAR - PAYLOAD_MIN_CHAR) as i64;

/// For `[0, 10, 11, 22, 25]` returns `[10, 1, 11, 3]`.
///
/// The sequence has to start at zero and be sorted ascending. Anything else means an upstream
/// invariant was broken, so it is reported as an error instead of being encoded.
pub fn delta_encode(values: &[i64]) -> Result<Vec<i64>> {
    if let Some(first) = values.first() {
        ensure!(*first == 0, "sequence starts at {} instead of 0: {:?}", first, values);
    }
    ensure!(
        values.windows(2).all(|pair| pair[0] <= pair[1]),
        "sequence is not sorted: {:?}",
        values
    );
    Ok(values.windows(2).map(|pair| pair[1] - pair[0]).collect())
}

/// For `[10, 1, 11, 3]` returns `[0, 10, 11, 22, 25]`.
pub fn delta_decode(deltas: &[i64]) -> Vec<i64> {
    let mut values = Vec::with_capacity(deltas.len() + 1);
    let mut current = 0;
    values.push(current);
    for delta in deltas {
        current += delta;
        values.push(current);
    }
    values
}

/// For `[0, 1, 2, 14, 91, 92, 15, 182, 183, 16]` returns `#$%1~!$2!~!!$3`.
pub fn pack(values: &[i64]) -> Result<String> {
    let mut output = String::with_capacity(values.len());
    for &value in values {
        if value < 0 {
            bail!("negative value {} in {:?}", value, values);
        }
        let overflow_count = (value - 1).max(0) / MAX_VALUE;
        let payload = value - overflow_count * MAX_VALUE;
        for _ in 0..overflow_count {
            output.push(OVERFLOW_CHAR as char);
        }
        output.push((PAYLOAD_MIN_CHAR + payload as u8) as char);
    }
    Ok(output)
}

/// Inverse of [`pack`].
pub fn unpack(text: &str) -> Result<Vec<i64>> {
    let mut values = vec![];
    let mut pending = 0;
    let mut has_overflow = false;
    for byte in text.bytes() {
        match byte {
            OVERFLOW_CHAR => {
                pending += MAX_VALUE;
                has_overflow = true;
            }
            PAYLOAD_MIN_CHAR..=PAYLOAD_MAX_CHAR => {
                values.push(pending + i64::from(byte - PAYLOAD_MIN_CHAR));
                pending = 0;
                has_overflow = false;
            }
            other => bail!("unexpected character {:?} in packed text {:?}", other as char, text),
        }
    }
    ensure!(!has_overflow, "packed text {:?} ends with an overflow character", text);
    Ok(values)
}

/// Delta-encodes a zero based, sorted sequence and packs the deltas.
pub fn encode_sorted(values: &[i64]) -> Result<String> {
    pack(&delta_encode(values)?)
}

pub fn decode_sorted(text: &str) -> Result<Vec<i64>> {
    Ok(delta_decode(&unpack(text)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_string() {
        let values = [0, 1, 2, 14, 91, 92, 15, 182, 183, 16];
        assert_eq!(pack(&values).unwrap(), "#$%1~!$2!~!!$3");
        assert_eq!(unpack("#$%1~!$2!~!!$3").unwrap(), values);
    }

    #[test]
    fn test_delta_example() {
        assert_eq!(delta_encode(&[0, 10, 11, 22, 25]).unwrap(), vec![10, 1, 11, 3]);
        assert_eq!(delta_decode(&[10, 1, 11, 3]), vec![0, 10, 11, 22, 25]);
    }

    #[test]
    fn test_delta_round_trip() {
        let sequences: Vec<Vec<i64>> = vec![
            vec![0],
            vec![0, 0, 0],
            vec![0, 5, 5, 6, 480],
            vec![0, 91, 92, 182, 183, 10_000],
        ];
        for sequence in sequences {
            let deltas = delta_encode(&sequence).unwrap();
            assert_eq!(deltas.len(), sequence.len() - 1);
            assert_eq!(delta_decode(&deltas), sequence);
            assert_eq!(decode_sorted(&encode_sorted(&sequence).unwrap()).unwrap(), sequence);
        }
    }

    #[test]
    fn test_delta_rejects_bad_input() {
        assert!(delta_encode(&[1, 2, 3]).is_err());
        assert!(delta_encode(&[0, 5, 4]).is_err());
        assert!(delta_encode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_pack_boundaries() {
        // Values around multiples of 91 are where the overflow count changes.
        let values: Vec<i64> = (0..=400).collect();
        let packed = pack(&values).unwrap();
        assert_eq!(unpack(&packed).unwrap(), values);
        assert!(packed.bytes().all(|b| b == b'!' || (b'#'..=b'~').contains(&b)));
        assert_eq!(pack(&[91]).unwrap(), "~");
        assert_eq!(pack(&[92]).unwrap(), "!$");
        assert_eq!(pack(&[182]).unwrap(), "!~");
    }

    #[test]
    fn test_pack_rejects_negative() {
        assert!(pack(&[0, 3, -1]).is_err());
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(unpack("#\"").is_err());
        assert!(unpack("#!").is_err());
        assert_eq!(unpack("").unwrap(), Vec::<i64>::new());
    }
}
