/// A 32-byte BLAKE3 hash used as a content fingerprint.
///
/// The script bundler keeps one of these for every module that went into a
/// bundle, and for the bundle request itself. A bundle is only rebuilt when
/// any of those fingerprints changes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new().update_mmap(path)?.finalize().into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Adapter feeding `std::hash::Hash` implementations into BLAKE3, so that
/// any `Hash` value can be fingerprinted as a [`Hash32`].
#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl Blake3Hasher {
    pub(crate) fn fingerprint(value: &impl std::hash::Hash) -> Hash32 {
        let mut hasher = Self::default();
        value.hash(&mut hasher);
        hasher.into()
    }
}

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        let bytes: [u8; 32] = value.0.finalize().into();
        Hash32::from(bytes)
    }
}

impl std::hash::Hasher for Blake3Hasher {
    fn finish(&self) -> u64 {
        let mut output = [0u8; 8];
        self.0.finalize_xof().fill(&mut output);
        u64::from_le_bytes(output)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_lowercase_and_full_length() {
        let hash = Hash32::hash(b"reveal");
        let hex = hash.to_hex();

        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn file_hash_matches_buffer_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.js");
        std::fs::write(&path, b"export default 1;").unwrap();

        assert_eq!(
            Hash32::hash_file(&path).unwrap(),
            Hash32::hash(b"export default 1;")
        );
    }

    #[test]
    fn fingerprint_follows_value() {
        let a = Blake3Hasher::fingerprint(&("js/index.js", true));
        let b = Blake3Hasher::fingerprint(&("js/index.js", true));
        let c = Blake3Hasher::fingerprint(&("js/index.js", false));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
