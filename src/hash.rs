//! Streaming QuickXorHash, a 160-bit rolling-XOR digest compatible with the
//! remote service's `quickXorHash` file attribute.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const WIDTH_IN_BITS: usize = 160;
const BITS_IN_LAST_CELL: u32 = 32;
const SHIFT: u32 = 11;
const CELL_COUNT: usize = 3;
const DIGEST_SIZE: usize = 20;

pub struct QuickXorHash {
    data: [u64; CELL_COUNT],
    length_so_far: u64,
    shift_so_far: u32,
}

impl Default for QuickXorHash {
    fn default() -> Self {
        Self::new()
    }
}

impl QuickXorHash {
    pub fn new() -> Self {
        Self {
            data: [0; CELL_COUNT],
            length_so_far: 0,
            shift_so_far: 0,
        }
    }

    /// Feed a chunk of bytes into the running digest. Chunk boundaries do
    /// not affect the final digest (see `digest` property P2).
    pub fn write(&mut self, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }

        let mut cell = (self.shift_so_far / 64) as usize;
        let mut off = self.shift_so_far % 64;
        let iterations = buf.len().min(WIDTH_IN_BITS);

        let bits_for = |cell: usize| -> u32 {
            if cell == CELL_COUNT - 1 {
                BITS_IN_LAST_CELL
            } else {
                64
            }
        };

        for i in 0..iterations {
            let is_last_cell = cell == CELL_COUNT - 1;
            let bits = bits_for(cell);

            if off <= bits - 8 {
                let mut j = i;
                while j < buf.len() {
                    self.data[cell] ^= (buf[j] as u64) << off;
                    j += WIDTH_IN_BITS;
                }
            } else {
                let index2 = if is_last_cell { 0 } else { cell + 1 };
                let low = bits - off;
                let mut xored = 0u8;
                let mut j = i;
                while j < buf.len() {
                    xored ^= buf[j];
                    j += WIDTH_IN_BITS;
                }
                self.data[cell] ^= (xored as u64) << off;
                self.data[index2] ^= (xored as u64) >> low;
            }

            off += SHIFT;
            loop {
                let bits = bits_for(cell);
                if off < bits {
                    break;
                }
                cell = if cell == CELL_COUNT - 1 { 0 } else { cell + 1 };
                off -= bits;
            }
        }

        self.shift_so_far = (self.shift_so_far + SHIFT * (buf.len() % WIDTH_IN_BITS) as u32)
            % WIDTH_IN_BITS as u32;
        self.length_so_far = self.length_so_far.wrapping_add(buf.len() as u64);
    }

    /// Finalize the digest into its 20-byte representation.
    pub fn digest(&self) -> [u8; DIGEST_SIZE] {
        let mut out = [0u8; DIGEST_SIZE];
        out[0..8].copy_from_slice(&self.data[0].to_le_bytes());
        out[8..16].copy_from_slice(&self.data[1].to_le_bytes());
        let last = self.data[2].to_le_bytes();
        out[16..20].copy_from_slice(&last[0..4]);

        let length_bytes = self.length_so_far.to_le_bytes();
        let start = DIGEST_SIZE - length_bytes.len(); // 20 - 8 = 12
        for (i, b) in length_bytes.iter().enumerate() {
            out[start + i] ^= b;
        }
        out
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(self.digest())
    }
}

/// Hash a file's full contents in `CHUNK_SIZE`-ish reads.
pub fn hash_of_file(path: &Path, chunk_size: usize) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = QuickXorHash::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.write(&buf[..n]);
    }
    Ok(hasher.base64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    fn hash_whole(buf: &[u8]) -> String {
        let mut h = QuickXorHash::new();
        h.write(buf);
        h.base64()
    }

    fn hash_chunked(buf: &[u8], chunk: usize) -> String {
        let mut h = QuickXorHash::new();
        for c in buf.chunks(chunk.max(1)) {
            h.write(c);
        }
        h.base64()
    }

    #[test]
    fn empty_digest_is_deterministic() {
        assert_eq!(hash_whole(&[]), hash_whole(&[]));
    }

    #[test]
    fn chunk_boundaries_do_not_affect_digest() {
        for len in [0usize, 1, 159, 160, 161, 10_000] {
            let buf = vector(len);
            let whole = hash_whole(&buf);
            for chunk in [1usize, 7, 64, 160, 4096] {
                assert_eq!(
                    whole,
                    hash_chunked(&buf, chunk),
                    "len={len} chunk={chunk}"
                );
            }
        }
    }

    #[test]
    fn distinct_inputs_hash_differently() {
        let a = hash_whole(b"hello, world!");
        let b = hash_whole(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn one_million_bytes_is_stable_across_partitions() {
        let buf = vector(1_000_000);
        let whole = hash_whole(&buf);
        assert_eq!(whole, hash_chunked(&buf, 65536));
    }
}
