//! Hash provider with a legacy-algorithm fallback.
//!
//! The legacy build used `md4` for module ids and content hashes. Modern
//! digest backends no longer ship it, so the provider checks the backend once
//! at startup and, when `md4` is missing, aliases it to `md5`. The alias table
//! is consulted exactly once per request, so installing the fallback twice
//! never chains rewrites.

use std::collections::HashMap;
use std::sync::Once;

use md5::Md5;
use sha2::digest::DynDigest;
use sha2::{Sha256, Sha512};
use tracing::warn;

use crate::errors::{DashpackError, Result};

/// The legacy identifier requested by default configurations
pub const LEGACY_ALGORITHM: &str = "md4";

/// Algorithm substituted when the legacy one is unavailable
pub const FALLBACK_ALGORITHM: &str = "md5";

/// Underlying digest primitive
pub trait DigestBackend: Send + Sync {
    fn supports(&self, algorithm: &str) -> bool;

    fn create(&self, algorithm: &str) -> Option<Box<dyn DynDigest + Send>>;
}

/// RustCrypto-backed primitives. Does not provide `md4`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoBackend;

impl DigestBackend for RustCryptoBackend {
    fn supports(&self, algorithm: &str) -> bool {
        matches!(algorithm, "md5" | "sha256" | "sha512")
    }

    fn create(&self, algorithm: &str) -> Option<Box<dyn DynDigest + Send>> {
        match algorithm {
            "md5" => Some(Box::new(Md5::default())),
            "sha256" => Some(Box::new(Sha256::default())),
            "sha512" => Some(Box::new(Sha512::default())),
            _ => None,
        }
    }
}

/// Hash factory shared by the whole build.
pub struct HashProvider {
    backend: Box<dyn DigestBackend>,
    aliases: HashMap<String, String>,
    warned: Once,
}

impl HashProvider {
    /// Build a provider and install the legacy fallback if the backend needs it.
    pub fn new(backend: impl DigestBackend + 'static) -> Self {
        let mut provider = Self {
            backend: Box::new(backend),
            aliases: HashMap::new(),
            warned: Once::new(),
        };
        provider.install_legacy_fallback();
        provider
    }

    /// Alias `md4` to `md5` when the backend lacks `md4`. Safe to call repeatedly.
    pub fn install_legacy_fallback(&mut self) {
        if self.backend.supports(LEGACY_ALGORITHM) {
            return;
        }
        if self.aliases.contains_key(LEGACY_ALGORITHM) {
            return;
        }

        self.aliases
            .insert(LEGACY_ALGORITHM.to_string(), FALLBACK_ALGORITHM.to_string());

        self.warned.call_once(|| {
            warn!(
                "Hash algorithm '{}' is not supported by the digest backend; using '{}' instead",
                LEGACY_ALGORITHM, FALLBACK_ALGORITHM
            );
        });
    }

    /// The identifier actually used for `algorithm`
    pub fn effective_algorithm<'a>(&'a self, algorithm: &'a str) -> &'a str {
        self.aliases
            .get(algorithm)
            .map(String::as_str)
            .unwrap_or(algorithm)
    }

    pub fn supports(&self, algorithm: &str) -> bool {
        self.backend.supports(self.effective_algorithm(algorithm))
    }

    /// Create a hasher for `algorithm`, honoring the alias table.
    pub fn create_hash(&self, algorithm: &str) -> Result<Box<dyn DynDigest + Send>> {
        let effective = self.effective_algorithm(algorithm);
        self.backend.create(effective).ok_or_else(|| {
            DashpackError::configuration(format!("Unsupported hash function: {}", algorithm))
        })
    }

    pub fn digest(&self, algorithm: &str, data: &[u8]) -> Result<Vec<u8>> {
        let mut hasher = self.create_hash(algorithm)?;
        hasher.update(data);
        Ok(hasher.finalize().to_vec())
    }

    /// Hex digest truncated to `length` characters (0 keeps the full digest).
    pub fn digest_hex(&self, algorithm: &str, data: &[u8], length: usize) -> Result<String> {
        let mut hex: String = self
            .digest(algorithm, data)?
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect();

        if length > 0 && length < hex.len() {
            hex.truncate(length);
        }
        Ok(hex)
    }
}

impl Default for HashProvider {
    fn default() -> Self {
        Self::new(RustCryptoBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A backend that does provide md4-like behavior, so no alias is installed.
    struct FullBackend;

    impl DigestBackend for FullBackend {
        fn supports(&self, algorithm: &str) -> bool {
            matches!(algorithm, "md4" | "md5" | "sha256")
        }

        fn create(&self, algorithm: &str) -> Option<Box<dyn DynDigest + Send>> {
            match algorithm {
                // sha256 stands in for a native md4 here
                "md4" | "sha256" => Some(Box::new(Sha256::default())),
                "md5" => Some(Box::new(Md5::default())),
                _ => None,
            }
        }
    }

    #[test]
    fn test_legacy_algorithm_matches_fallback_digest() {
        let provider = HashProvider::default();

        let legacy = provider.digest("md4", b"src/shellui.ts").unwrap();
        let fallback = provider.digest("md5", b"src/shellui.ts").unwrap();

        assert_eq!(legacy, fallback);
        assert_eq!(legacy.len(), 16);
        assert_eq!(provider.effective_algorithm("md4"), "md5");
    }

    #[test]
    fn test_other_algorithms_are_never_rewritten() {
        let provider = HashProvider::default();

        assert_eq!(provider.effective_algorithm("sha256"), "sha256");
        assert_eq!(provider.effective_algorithm("md5"), "md5");
        assert_eq!(provider.digest("sha256", b"x").unwrap().len(), 32);
        assert!(provider.create_hash("whirlpool").is_err());
    }

    #[test]
    fn test_fallback_install_is_idempotent() {
        let mut provider = HashProvider::default();
        provider.install_legacy_fallback();
        provider.install_legacy_fallback();

        assert_eq!(provider.aliases.len(), 1);
        assert_eq!(provider.effective_algorithm("md4"), "md5");
        assert_eq!(provider.effective_algorithm("md5"), "md5");
    }

    #[test]
    fn test_no_alias_when_backend_supports_legacy() {
        let provider = HashProvider::new(FullBackend);

        assert!(provider.aliases.is_empty());
        assert_eq!(provider.effective_algorithm("md4"), "md4");
        assert_eq!(provider.digest("md4", b"x").unwrap().len(), 32);
    }

    #[test]
    fn test_digest_hex_is_deterministic_and_truncated() {
        let provider = HashProvider::default();

        let a = provider.digest_hex("md4", b"same input", 20).unwrap();
        let b = provider.digest_hex("md4", b"same input", 20).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        assert_eq!(provider.digest_hex("md5", b"same input", 0).unwrap().len(), 32);
    }
}
