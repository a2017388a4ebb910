use crate::domain::protocol::{ConnectionProfile, KeyVersion, ProtocolVersion};
use crate::error::{EbicsError, Result};
use crate::infrastructure::crypto;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The three key roles of an EBICS subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyRole {
    Signature,
    Authentication,
    Encryption,
}

impl KeyRole {
    pub const ALL: [KeyRole; 3] = [
        KeyRole::Signature,
        KeyRole::Authentication,
        KeyRole::Encryption,
    ];

    /// The single-letter name used throughout the EBICS documentation.
    pub fn letter(&self) -> &'static str {
        match self {
            Self::Signature => "A",
            Self::Authentication => "X",
            Self::Encryption => "E",
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Signature => "signature",
            Self::Authentication => "authentication",
            Self::Encryption => "encryption",
        };
        write!(f, "{} ({})", name, self.letter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOwner {
    User,
    Bank,
}

impl fmt::Display for KeyOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Bank => f.write_str("bank"),
        }
    }
}

/// One RSA key of the user or the bank.
///
/// The version tag is a constructor argument, so a `KeyMaterial` never exists
/// without it. The public key is a DER `SubjectPublicKeyInfo`; the private key,
/// when present, is a password-protected PKCS#8 `EncryptedPrivateKeyInfo`.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    version: KeyVersion,
    public_key: Vec<u8>,
    private_key: Option<Vec<u8>>,
    certificate: Option<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(version: KeyVersion, public_key: Vec<u8>) -> Self {
        Self {
            version,
            public_key,
            private_key: None,
            certificate: None,
        }
    }

    pub fn with_private_key(mut self, private_key: Vec<u8>) -> Self {
        self.private_key = Some(private_key);
        self
    }

    pub fn with_certificate(mut self, certificate: Vec<u8>) -> Self {
        self.certificate = Some(certificate);
        self
    }

    pub fn role(&self) -> KeyRole {
        self.version.role()
    }

    pub fn version(&self) -> KeyVersion {
        self.version
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key(&self) -> Option<&[u8]> {
        self.private_key.as_deref()
    }

    pub fn certificate(&self) -> Option<&[u8]> {
        self.certificate.as_deref()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("version", &self.version)
            .field("public_key_len", &self.public_key.len())
            .field("has_private_key", &self.private_key.is_some())
            .field("has_certificate", &self.certificate.is_some())
            .finish()
    }
}

/// A freshly generated set of user keys, not yet installed in a keyring.
#[derive(Debug, Clone)]
pub struct UserKeySet {
    pub signature: KeyMaterial,
    pub authentication: KeyMaterial,
    pub encryption: KeyMaterial,
}

impl UserKeySet {
    fn into_keys(self) -> [KeyMaterial; 3] {
        [self.signature, self.authentication, self.encryption]
    }
}

/// Key material of one user/bank pair under one protocol generation.
#[derive(Clone)]
pub struct Keyring {
    profile: ConnectionProfile,
    password: String,
    user: BTreeMap<KeyRole, KeyMaterial>,
    bank: BTreeMap<KeyRole, KeyMaterial>,
}

impl Keyring {
    pub fn new(profile: ConnectionProfile, password: impl Into<String>) -> Self {
        Self {
            profile,
            password: password.into(),
            user: BTreeMap::new(),
            bank: BTreeMap::new(),
        }
    }

    pub fn profile(&self) -> ConnectionProfile {
        self.profile
    }

    pub fn version(&self) -> ProtocolVersion {
        self.profile.protocol
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Generates a new A/X/E key set protected by this keyring's password
    /// without touching the keys currently installed.
    pub fn generate_user_signatures(&self, key_size: usize) -> Result<UserKeySet> {
        let generate = |version: KeyVersion| -> Result<KeyMaterial> {
            let (public_key, private_key) = crypto::generate_key_pair(key_size, &self.password)?;
            Ok(KeyMaterial::new(version, public_key).with_private_key(private_key))
        };

        Ok(UserKeySet {
            signature: generate(self.profile.signature_version)?,
            authentication: generate(KeyVersion::X002)?,
            encryption: generate(KeyVersion::E002)?,
        })
    }

    /// Generates and installs a new A/X/E key set.
    pub fn create_user_signatures(&mut self, key_size: usize) -> Result<()> {
        let keys = self.generate_user_signatures(key_size)?;
        self.install_user_signatures(keys)
    }

    pub fn install_user_signatures(&mut self, keys: UserKeySet) -> Result<()> {
        let keys = keys.into_keys();
        for key in &keys {
            if key.private_key().is_none() {
                return Err(EbicsError::ValidationError(format!(
                    "user {} key has no private key",
                    key.role()
                )));
            }
        }
        for key in keys {
            self.user.insert(key.role(), key);
        }
        Ok(())
    }

    /// Installs a single user key, e.g. when restoring a keyring.
    pub fn set_user_signature(&mut self, key: KeyMaterial) -> Result<()> {
        if key.private_key().is_none() {
            return Err(EbicsError::ValidationError(format!(
                "user {} key has no private key",
                key.role()
            )));
        }
        self.user.insert(key.role(), key);
        Ok(())
    }

    /// Installs a bank public key. The bank only owns authentication and
    /// encryption keys.
    pub fn set_bank_signature(&mut self, role: KeyRole, key: KeyMaterial) -> Result<()> {
        if role == KeyRole::Signature {
            return Err(EbicsError::ValidationError(
                "the bank has no signature key".to_string(),
            ));
        }
        if key.role() != role {
            return Err(EbicsError::ValidationError(format!(
                "a {} key cannot be stored as the bank {} key",
                key.version(),
                role
            )));
        }
        self.bank.insert(role, key);
        Ok(())
    }

    /// Attaches an X.509 certificate to an installed user key. The
    /// certificate must carry that key's public key.
    pub fn attach_certificate(&mut self, role: KeyRole, certificate: Vec<u8>) -> Result<()> {
        let certified_key = crypto::public_key_from_certificate(&certificate)?;
        let key = self
            .user
            .get_mut(&role)
            .ok_or_else(|| EbicsError::signature_missing(KeyOwner::User, role))?;
        if crypto::public_key_components(&key.public_key)? != crypto::public_key_components(&certified_key)? {
            return Err(EbicsError::ValidationError(format!(
                "the certificate does not match the user {role} key"
            )));
        }
        key.certificate = Some(certificate);
        Ok(())
    }

    /// Issues a self-signed certificate for every user key, making the
    /// keyring certified.
    ///
    /// # Arguments
    ///
    /// * `subject` - An RFC 4514 distinguished name such as `CN=USER,O=PARTNER`.
    pub fn certify_user_signatures(&mut self, subject: &str) -> Result<()> {
        let mut certificates = Vec::with_capacity(KeyRole::ALL.len());
        for role in KeyRole::ALL {
            let key = self.user_signature(role)?;
            let private_key = key
                .private_key()
                .ok_or_else(|| EbicsError::signature_missing(KeyOwner::User, role))?;
            let certificate =
                crypto::self_signed_certificate(key.public_key(), private_key, &self.password, subject)?;
            certificates.push((role, certificate));
        }
        for (role, certificate) in certificates {
            self.attach_certificate(role, certificate)?;
        }
        Ok(())
    }

    pub fn user_signature(&self, role: KeyRole) -> Result<&KeyMaterial> {
        self.user
            .get(&role)
            .ok_or_else(|| EbicsError::signature_missing(KeyOwner::User, role))
    }

    pub fn bank_signature(&self, role: KeyRole) -> Result<&KeyMaterial> {
        self.bank
            .get(&role)
            .ok_or_else(|| EbicsError::signature_missing(KeyOwner::Bank, role))
    }

    pub fn has_bank_signature(&self, role: KeyRole) -> bool {
        self.bank.contains_key(&role)
    }

    /// True when every user key carries an X.509 certificate. A certified
    /// keyring exchanges certificates instead of raw public keys.
    pub fn is_certified(&self) -> bool {
        KeyRole::ALL.iter().all(|role| {
            self.user
                .get(role)
                .is_some_and(|key| key.certificate().is_some())
        })
    }

    /// Digest the bank expects for `key`: the certificate fingerprint in a
    /// certified keyring, the modulus/exponent digest otherwise.
    pub fn key_digest(&self, key: &KeyMaterial) -> Result<String> {
        if !self.is_certified() {
            return crypto::calculate_public_key_digest(key.public_key());
        }
        key.certificate()
            .map(crypto::calculate_certificate_fingerprint)
            .ok_or_else(|| {
                EbicsError::ValidationError(format!(
                    "the {} key has no certificate but the keyring is certified",
                    key.role()
                ))
            })
    }

    /// Re-wraps all three user private keys under a new password.
    ///
    /// Either every key is re-wrapped or the keyring is left untouched.
    pub fn change_password(&mut self, old_password: &str, new_password: &str) -> Result<()> {
        let mut rewrapped = Vec::with_capacity(KeyRole::ALL.len());
        for role in KeyRole::ALL {
            let key = self.user_signature(role)?;
            let private_key = key
                .private_key()
                .ok_or_else(|| EbicsError::signature_missing(KeyOwner::User, role))?;
            let wrapped = crypto::rewrap_private_key(private_key, old_password, new_password)?;
            rewrapped.push((role, wrapped));
        }

        for (role, wrapped) in rewrapped {
            if let Some(key) = self.user.get_mut(&role) {
                key.private_key = Some(wrapped);
            }
        }
        self.password = new_password.to_string();
        Ok(())
    }

    pub(crate) fn user_keys(&self) -> impl Iterator<Item = &KeyMaterial> {
        self.user.values()
    }

    pub(crate) fn bank_keys(&self) -> impl Iterator<Item = &KeyMaterial> {
        self.bank.values()
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("profile", &self.profile)
            .field("password", &"<redacted>")
            .field("user", &self.user)
            .field("bank", &self.bank)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_SIZE: usize = 1024;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new(ProtocolVersion::H004, KeyVersion::A006).unwrap()
    }

    #[test]
    fn test_create_user_signatures_installs_all_roles() {
        let mut keyring = Keyring::new(profile(), "secret");
        keyring.create_user_signatures(KEY_SIZE).unwrap();

        for role in KeyRole::ALL {
            let key = keyring.user_signature(role).unwrap();
            assert_eq!(key.role(), role);
            assert!(key.private_key().is_some());
        }
        assert_eq!(
            keyring.user_signature(KeyRole::Signature).unwrap().version(),
            KeyVersion::A006
        );
        assert!(!keyring.is_certified());
    }

    #[test]
    fn test_missing_keys_are_reported_by_owner_and_role() {
        let keyring = Keyring::new(profile(), "secret");
        assert!(matches!(
            keyring.user_signature(KeyRole::Authentication),
            Err(EbicsError::SignatureMissingError {
                owner: KeyOwner::User,
                role: KeyRole::Authentication
            })
        ));
        assert!(matches!(
            keyring.bank_signature(KeyRole::Encryption),
            Err(EbicsError::SignatureMissingError {
                owner: KeyOwner::Bank,
                role: KeyRole::Encryption
            })
        ));
    }

    #[test]
    fn test_bank_signature_role_checks() {
        let mut keyring = Keyring::new(profile(), "secret");
        let key = KeyMaterial::new(KeyVersion::X002, vec![1, 2, 3]);

        assert!(keyring.set_bank_signature(KeyRole::Signature, key.clone()).is_err());
        assert!(keyring.set_bank_signature(KeyRole::Encryption, key.clone()).is_err());
        keyring
            .set_bank_signature(KeyRole::Authentication, key)
            .unwrap();
        assert!(keyring.has_bank_signature(KeyRole::Authentication));
    }

    #[test]
    fn test_change_password_rewraps_every_key() {
        let mut keyring = Keyring::new(profile(), "old");
        keyring.create_user_signatures(KEY_SIZE).unwrap();

        keyring.change_password("old", "new").unwrap();

        let signature = keyring.user_signature(KeyRole::Signature).unwrap();
        let private_key = signature.private_key().unwrap();
        assert!(crypto::sign(private_key, "new", KeyVersion::A006, b"data").is_ok());
        assert!(matches!(
            crypto::sign(private_key, "old", KeyVersion::A006, b"data"),
            Err(EbicsError::PasswordError)
        ));
        assert_eq!(keyring.password(), "new");
    }

    #[test]
    fn test_change_password_with_wrong_password_changes_nothing() {
        let mut keyring = Keyring::new(profile(), "old");
        keyring.create_user_signatures(KEY_SIZE).unwrap();
        let before = keyring.user_signature(KeyRole::Encryption).unwrap().clone();

        let result = keyring.change_password("wrong", "new");

        assert!(matches!(result, Err(EbicsError::PasswordError)));
        assert_eq!(keyring.user_signature(KeyRole::Encryption).unwrap(), &before);
        assert_eq!(keyring.password(), "old");
    }

    #[test]
    fn test_attach_certificate_requires_installed_key() {
        let mut keyring = Keyring::new(profile(), "secret");
        assert!(matches!(
            keyring.attach_certificate(KeyRole::Signature, vec![0x30, 0x00]),
            Err(EbicsError::CryptoError(_))
        ));
    }

    #[test]
    fn test_certified_keyring_identifies_keys_by_certificate() {
        let mut keyring = Keyring::new(profile(), "secret");
        keyring.create_user_signatures(KEY_SIZE).unwrap();
        let (bank_public_key, _) = crypto::generate_key_pair(KEY_SIZE, "bank").unwrap();
        keyring
            .set_bank_signature(
                KeyRole::Authentication,
                KeyMaterial::new(KeyVersion::X002, bank_public_key.clone()),
            )
            .unwrap();

        let bank_key = keyring.bank_signature(KeyRole::Authentication).unwrap().clone();
        assert_eq!(
            keyring.key_digest(&bank_key).unwrap(),
            crypto::calculate_public_key_digest(&bank_public_key).unwrap()
        );

        keyring.certify_user_signatures("CN=USER,O=PARTNER").unwrap();
        assert!(keyring.is_certified());
        for role in KeyRole::ALL {
            let key = keyring.user_signature(role).unwrap().clone();
            let certificate = key.certificate().unwrap();
            assert_eq!(
                crypto::public_key_from_certificate(certificate).unwrap(),
                key.public_key()
            );
            assert_eq!(
                keyring.key_digest(&key).unwrap(),
                crypto::calculate_certificate_fingerprint(certificate)
            );
        }
        assert!(matches!(
            keyring.key_digest(&bank_key),
            Err(EbicsError::ValidationError(_))
        ));
    }

    #[test]
    fn test_attach_certificate_rejects_another_keys_certificate() {
        let mut keyring = Keyring::new(profile(), "secret");
        keyring.create_user_signatures(KEY_SIZE).unwrap();
        keyring.certify_user_signatures("CN=USER").unwrap();
        let signature_certificate = keyring
            .user_signature(KeyRole::Signature)
            .unwrap()
            .certificate()
            .unwrap()
            .to_vec();

        assert!(matches!(
            keyring.attach_certificate(KeyRole::Authentication, signature_certificate),
            Err(EbicsError::ValidationError(_))
        ));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let keyring = Keyring::new(profile(), "hunter2");
        let debug = format!("{:?}", keyring);
        assert!(!debug.contains("hunter2"));
    }
}
