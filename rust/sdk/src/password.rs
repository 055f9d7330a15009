use argon2::{Algorithm, Argon2, Params, Version};
use blake2::{Blake2b512, Digest};
use sphinx_host_api::types::{SecretBytesArray, SecretBytesVec};

/// A user-chosen master password.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MasterPassword(SecretBytesVec);

impl MasterPassword {
    pub fn expose_secret(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl From<Vec<u8>> for MasterPassword {
    fn from(value: Vec<u8>) -> Self {
        Self(SecretBytesVec::from(value))
    }
}

impl From<&str> for MasterPassword {
    fn from(value: &str) -> Self {
        Self::from(value.as_bytes().to_vec())
    }
}

/// The memory-hardened form of the master password that every protocol step
/// starts from. Never sent anywhere; it only feeds the OPRF and the PAKE.
#[derive(Clone, Debug)]
pub struct AccessKey(SecretBytesArray<64>);

impl AccessKey {
    pub fn expose_secret(&self) -> &[u8; 64] {
        self.0.expose_secret()
    }
}

/// Controls the cost of hashing the master password into an [`AccessKey`].
#[derive(Clone, Copy, Debug)]
pub enum PasswordHashingMode {
    /// Uses Argon2id with parameters suitable for production (2019 OWASP
    /// recommendations).
    Standard2019,
    /// A fast hash for testing. Do not use in production.
    FastInsecure,
}

impl MasterPassword {
    /// Stretches the password into an access key, salted by the host name
    /// so the same password yields unrelated keys at unrelated hosts.
    ///
    /// Returns `None` on parameter or length errors, which cannot happen
    /// for the fixed parameters below.
    pub(crate) fn access_key(&self, mode: PasswordHashingMode, host: &str) -> Option<AccessKey> {
        let params = match mode {
            PasswordHashingMode::Standard2019 => Params::new(1024 * 16, 32, 1, Some(64)),
            PasswordHashingMode::FastInsecure => Params::new(128, 1, 1, Some(64)),
        }
        .ok()?;

        let digest: [u8; 64] = Blake2b512::new()
            .chain_update(b"sphinx access key salt")
            .chain_update(host.as_bytes())
            .finalize()
            .into();
        let salt = &digest[..16];

        let mut hashed = [0u8; 64];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(self.expose_secret(), salt, &mut hashed)
            .ok()?;
        Some(AccessKey(SecretBytesArray::from(hashed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_key_is_deterministic() {
        let password = MasterPassword::from("my secret pwd");
        let a = password
            .access_key(PasswordHashingMode::FastInsecure, "example.com")
            .unwrap();
        let b = password
            .access_key(PasswordHashingMode::FastInsecure, "example.com")
            .unwrap();
        assert_eq!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn test_access_key_depends_on_host() {
        let password = MasterPassword::from("my secret pwd");
        let a = password
            .access_key(PasswordHashingMode::FastInsecure, "example.com")
            .unwrap();
        let b = password
            .access_key(PasswordHashingMode::FastInsecure, "example.org")
            .unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn test_access_key_depends_on_password() {
        let a = MasterPassword::from("one")
            .access_key(PasswordHashingMode::FastInsecure, "example.com")
            .unwrap();
        let b = MasterPassword::from("two")
            .access_key(PasswordHashingMode::FastInsecure, "example.com")
            .unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn test_debug_is_redacted() {
        let password = MasterPassword::from("my secret pwd");
        assert_eq!(format!("{password:?}"), "MasterPassword(SecretBytesVec(REDACTED))");
    }
}
