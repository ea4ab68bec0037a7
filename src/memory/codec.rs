//! Blob encoding for embedding vectors: packed little-endian `f32`.
//!
//! Databases written by earlier deployments hold pickled NumPy `float32`
//! arrays instead. Those are still readable; new rows are always packed.

use super::error::StorageError;

const F32_BYTES: usize = std::mem::size_of::<f32>();

// Pickle opcodes needed to locate the raw array buffer.
const PICKLE_PROTO: u8 = 0x80;
const PICKLE_STOP: u8 = b'.';
const PICKLE_NEWFALSE: u8 = 0x89;
const PICKLE_BINBYTES: u8 = b'B';
const PICKLE_SHORT_BINBYTES: u8 = b'C';

/// Opcodes allowed after the array buffer: memo, `TUPLE`, memo, `BUILD`, `STOP`.
const PICKLE_MAX_TRAILER: usize = 16;

/// Pack a vector into its on-disk representation.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Unpack a blob written by [`encode_vector`].
///
/// `chunk_id` is only used to label the error when the blob length is not a
/// multiple of four bytes.
pub fn decode_vector(chunk_id: i64, blob: &[u8]) -> Result<Vec<f32>, StorageError> {
    if let Some(payload) = numpy_pickle_payload(blob) {
        return Ok(decode_le(payload));
    }

    if blob.len() % F32_BYTES != 0 {
        return Err(StorageError::CorruptVector {
            chunk_id,
            len: blob.len(),
        });
    }

    Ok(decode_le(blob))
}

fn decode_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Raw buffer of a little-endian `float32` NumPy array pickled with protocol
/// 3 or 4 (`pickle.dumps(np.array(..., dtype="float32"))`).
///
/// The array state ends with `is_fortran` (`NEWFALSE`) followed by the data
/// as a bytes object, and only a handful of opcodes follow it. Anything else
/// is not treated as a pickle.
fn numpy_pickle_payload(blob: &[u8]) -> Option<&[u8]> {
    let header_ok = blob.first() == Some(&PICKLE_PROTO) && matches!(blob.get(1), Some(3 | 4));
    if !header_ok || blob.last() != Some(&PICKLE_STOP) {
        return None;
    }
    if !contains(blob, b"_reconstruct") || !contains(blob, b"f4") {
        return None;
    }

    (0..blob.len())
        .filter(|&at| blob[at] == PICKLE_NEWFALSE)
        .find_map(|at| array_buffer_at(blob, at + 1))
}

fn array_buffer_at(blob: &[u8], at: usize) -> Option<&[u8]> {
    let (len, start) = match *blob.get(at)? {
        PICKLE_SHORT_BINBYTES => (usize::from(*blob.get(at + 1)?), at + 2),
        PICKLE_BINBYTES => {
            let raw: [u8; 4] = blob.get(at + 1..at + 5)?.try_into().ok()?;
            (u32::from_le_bytes(raw) as usize, at + 5)
        }
        _ => return None,
    };
    let end = start.checked_add(len)?;
    let trailer = blob.get(end..)?;

    let plausible = len > 0
        && len % F32_BYTES == 0
        && trailer.len() <= PICKLE_MAX_TRAILER
        && trailer.ends_with(b"b.")
        && trailer.contains(&b't');
    if plausible {
        blob.get(start..end)
    } else {
        None
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_exact_round_trip() {
        let v = vec![0.0, -0.0, 1.5, f32::MIN_POSITIVE, -3.25e-7, f32::MAX];
        let decoded = decode_vector(1, &encode_vector(&v)).unwrap();
        let bits: Vec<u32> = decoded.iter().map(|f| f.to_bits()).collect();
        let expected: Vec<u32> = v.iter().map(|f| f.to_bits()).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn test_blob_length() {
        assert_eq!(encode_vector(&[1.0; 1536]).len(), 1536 * 4);
    }

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    // pickle.dumps(np.array([1.0, 2.0, -0.5], dtype="float32"), protocol=4)
    const NUMPY_PICKLE_V4: &str = "80049594000000000000008c156e756d70792e636f72652e6d756c7469\
        6172726179948c0c5f7265636f6e7374727563749493948c056e756d7079948c076e6461727261799493\
        944b0085944301629487945294284b014b03859468038c0564747970659493948c02663494898887945294\
        284b038c013c944e4e4e4affffffff4affffffff4b0074946289430c0000803f00000040000000bf947494\
        622e";

    // Same array, protocol 3.
    const NUMPY_PICKLE_V3: &str = "8003636e756d70792e636f72652e6d756c746961727261790a5f7265\
        636f6e7374727563740a7100636e756d70790a6e6461727261790a71014b008571024301627103877104\
        527105284b014b03857106636e756d70790a64747970650a7107580200000066347108898887710952710a\
        284b0358010000003c710b4e4e4e4affffffff4affffffff4b0074710c6289430c0000803f000000400000\
        00bf710d74710e622e";

    #[test]
    fn test_reads_numpy_pickles() {
        for hex in [NUMPY_PICKLE_V4, NUMPY_PICKLE_V3] {
            let blob = unhex(&hex.split_whitespace().collect::<String>());
            assert_eq!(decode_vector(1, &blob).unwrap(), vec![1.0, 2.0, -0.5]);
        }
    }

    #[test]
    fn test_reads_large_numpy_pickle() {
        // Buffers over 255 bytes use BINBYTES with a four-byte length.
        let v: Vec<f32> = (0..1536).map(|i| i as f32 * 0.25).collect();
        let data = encode_vector(&v);
        let small = unhex(&NUMPY_PICKLE_V4.split_whitespace().collect::<String>());
        let buffer_op = small.len() - 5 - 12 - 2;
        assert_eq!(small[buffer_op], PICKLE_SHORT_BINBYTES);

        let mut blob = small[..buffer_op].to_vec();
        blob.push(PICKLE_BINBYTES);
        blob.extend_from_slice(&(data.len() as u32).to_le_bytes());
        blob.extend_from_slice(&data);
        blob.extend_from_slice(&small[small.len() - 5..]);

        assert_eq!(decode_vector(1, &blob).unwrap(), v);
    }

    #[test]
    fn test_packed_blob_with_pickle_like_prefix() {
        // Starts with PROTO 4 and ends with STOP but has no array layout.
        let blob = [0x80, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2e];
        let decoded = decode_vector(1, &blob).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_rejects_truncated_blob() {
        let err = decode_vector(42, &[0, 0, 128]).unwrap_err();
        assert!(matches!(err, StorageError::CorruptVector { chunk_id: 42, len: 3 }));
    }
}
