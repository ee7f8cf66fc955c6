use crc32fast::Hasher;

/// Standard (IEEE) CRC32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// True when `content` hashes to `expected`.
pub fn verify(content: &[u8], expected: u32) -> bool {
    crc32(content) == expected
}
