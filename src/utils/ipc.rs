use crate::error::{InsightsError, Result};

const HEADER_LEN: usize = 8;

/// Detects and expands compressed kdb+ IPC messages.
pub trait Decompressor: Send + Sync {
    fn is_compressed(&self, bytes: &[u8]) -> bool;
    fn uncompress(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KdbIpcDecompressor;

fn truncated() -> InsightsError {
    InsightsError::Ipc("Compressed message is truncated".to_string())
}

impl Decompressor for KdbIpcDecompressor {
    fn is_compressed(&self, bytes: &[u8]) -> bool {
        bytes.get(2) == Some(&1)
    }

    /// Expands the kdb+ IPC compression scheme. The 8-byte message header is
    /// kept with its compressed flag cleared and its size set to the
    /// uncompressed length.
    fn uncompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < HEADER_LEN + 5 {
            return Ok(bytes.to_vec());
        }

        let little_endian = bytes[0] == 1;
        let mut size_bytes = [0u8; 4];
        size_bytes.copy_from_slice(&bytes[8..12]);
        let total = if little_endian {
            u32::from_le_bytes(size_bytes)
        } else {
            u32::from_be_bytes(size_bytes)
        } as usize;

        if total < HEADER_LEN {
            return Err(InsightsError::Ipc(format!(
                "Invalid uncompressed size: {}",
                total
            )));
        }

        let mut dst = vec![0u8; total];
        dst[..HEADER_LEN].copy_from_slice(&bytes[..HEADER_LEN]);
        dst[2] = 0;
        dst[4..8].copy_from_slice(&size_bytes);

        let read = |d: &mut usize| -> Result<u8> {
            let b = *bytes.get(*d).ok_or_else(truncated)?;
            *d += 1;
            Ok(b)
        };

        // positions of the last occurrence of each xor'd byte pair
        let mut refs = [0usize; 256];
        let mut s = HEADER_LEN;
        let mut p = s;
        let mut d = 12;
        let mut flags = 0u32;
        let mut bit = 0u32;

        while s < total {
            if bit == 0 {
                flags = read(&mut d)? as u32;
                bit = 1;
            }

            let is_ref = flags & bit != 0;
            let n = if is_ref {
                let mut r = refs[read(&mut d)? as usize];
                for _ in 0..2 {
                    let b = *dst.get(r).ok_or_else(truncated)?;
                    *dst.get_mut(s).ok_or_else(truncated)? = b;
                    s += 1;
                    r += 1;
                }
                let n = read(&mut d)? as usize;
                for m in 0..n {
                    let b = *dst.get(r + m).ok_or_else(truncated)?;
                    *dst.get_mut(s + m).ok_or_else(truncated)? = b;
                }
                n
            } else {
                let b = read(&mut d)?;
                *dst.get_mut(s).ok_or_else(truncated)? = b;
                s += 1;
                0
            };

            while p + 1 < s {
                refs[(dst[p] ^ dst[p + 1]) as usize] = p;
                p += 1;
            }

            if is_ref {
                s += n;
                p = s;
            }

            bit *= 2;
            if bit == 256 {
                bit = 0;
            }
        }

        Ok(dst)
    }
}
