//! XXTEA block cipher (no padding)
//!
//! Data and key are read as little-endian 32-bit words. Data must be a
//! multiple of 4 bytes and at least 8 bytes long; the key is exactly 16.

const DELTA: u32 = 0x9E37_79B9;

/// 16 byte cipher key
pub type Key = [u8; 16];

fn to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn key_words(key: &Key) -> [u32; 4] {
    let w = to_words(key);
    [w[0], w[1], w[2], w[3]]
}

#[inline]
fn mx(sum: u32, y: u32, z: u32, p: usize, e: usize, k: &[u32; 4]) -> u32 {
    (((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4)))
        ^ ((sum ^ y).wrapping_add(k[(p & 3) ^ e] ^ z))
}

fn valid_block(data: &[u8]) -> bool {
    data.len() >= 8 && data.len() % 4 == 0
}

/// Encrypt `data`, returning the ciphertext.
///
/// Returns `None` when `data` is not a whole number of words or shorter
/// than two words.
pub fn encrypt(data: &[u8], key: &Key) -> Option<Vec<u8>> {
    if !valid_block(data) {
        return None;
    }
    let k = key_words(key);
    let mut v = to_words(data);
    let n = v.len();
    let rounds = 6 + 52 / n;
    let mut sum: u32 = 0;
    let mut z = v[n - 1];

    for _ in 0..rounds {
        sum = sum.wrapping_add(DELTA);
        let e = ((sum >> 2) & 3) as usize;
        for p in 0..n - 1 {
            let y = v[p + 1];
            v[p] = v[p].wrapping_add(mx(sum, y, z, p, e, &k));
            z = v[p];
        }
        let y = v[0];
        v[n - 1] = v[n - 1].wrapping_add(mx(sum, y, z, n - 1, e, &k));
        z = v[n - 1];
    }

    Some(to_bytes(&v))
}

/// Decrypt `data`, the inverse of [`encrypt`].
pub fn decrypt(data: &[u8], key: &Key) -> Option<Vec<u8>> {
    if !valid_block(data) {
        return None;
    }
    let k = key_words(key);
    let mut v = to_words(data);
    let n = v.len();
    let rounds = 6 + 52 / n;
    let mut sum = (rounds as u32).wrapping_mul(DELTA);
    let mut y = v[0];

    while sum != 0 {
        let e = ((sum >> 2) & 3) as usize;
        for p in (1..n).rev() {
            let z = v[p - 1];
            v[p] = v[p].wrapping_sub(mx(sum, y, z, p, e, &k));
            y = v[p];
        }
        let z = v[n - 1];
        v[0] = v[0].wrapping_sub(mx(sum, y, z, 0, e, &k));
        y = v[0];
        sum = sum.wrapping_sub(DELTA);
    }

    Some(to_bytes(&v))
}
