//! RSA, AES and zlib primitives used by the EBICS envelopes.
//!
//! Every function works on plain byte buffers. Public keys are DER
//! `SubjectPublicKeyInfo` documents, private keys are PKCS#8
//! `EncryptedPrivateKeyInfo` documents unlocked with the keyring password.

use crate::domain::protocol::KeyVersion;
use crate::domain::transaction::TransactionKey;
use crate::error::{EbicsError, Result};
use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use rand::RngCore;
use rsa::pkcs8::pkcs5::pbes2;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, PrivateKeyInfo};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::str::FromStr;
use std::time::Duration;
use x509_cert::Certificate;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::{Decode, Encode};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// EBICS encrypts order data with a zero IV; every transaction uses a fresh key.
const ZERO_IV: [u8; 16] = [0; 16];
const AES_BLOCK_SIZE: usize = 16;

pub const TRANSACTION_KEY_SIZE: usize = 16;
const NONCE_SIZE: usize = 16;

const PRIVATE_KEY_KDF_ROUNDS: u32 = 100_000;

const CERTIFICATE_VALIDITY: Duration = Duration::from_secs(5 * 365 * 24 * 60 * 60);

fn crypto_error(context: &str, err: impl std::fmt::Display) -> EbicsError {
    EbicsError::CryptoError(format!("{context}: {err}"))
}

/// Generates an RSA key pair and returns `(public SPKI DER, encrypted PKCS#8 DER)`.
pub fn generate_key_pair(bits: usize, password: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut rng = rand::thread_rng();
    let private_key =
        RsaPrivateKey::new(&mut rng, bits).map_err(|e| crypto_error("key generation", e))?;
    let public_key = encode_public_key(&RsaPublicKey::from(&private_key))?;
    let wrapped = wrap_private_key(&private_key, password)?;
    Ok((public_key, wrapped))
}

fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>> {
    key.to_public_key_der()
        .map(|document| document.as_bytes().to_vec())
        .map_err(|e| crypto_error("public key encoding", e))
}

fn decode_public_key(public_key: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(public_key).map_err(|e| crypto_error("public key", e))
}

fn wrap_private_key(key: &RsaPrivateKey, password: &str) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let der = key
        .to_pkcs8_der()
        .map_err(|e| crypto_error("private key encoding", e))?;
    let info = PrivateKeyInfo::try_from(der.as_bytes())
        .map_err(|e| crypto_error("private key encoding", e))?;
    let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(PRIVATE_KEY_KDF_ROUNDS, &salt, &iv)
        .map_err(|e| crypto_error("private key encryption", e))?;
    let encrypted = info
        .encrypt_with_params(params, password)
        .map_err(|e| crypto_error("private key encryption", e))?;
    Ok(encrypted.as_bytes().to_vec())
}

fn unwrap_private_key(private_key: &[u8], password: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_encrypted_der(private_key, password)
        .map_err(|_| EbicsError::PasswordError)
}

/// Decrypts a private key with `old_password` and encrypts it again with
/// `new_password`.
pub fn rewrap_private_key(private_key: &[u8], old_password: &str, new_password: &str) -> Result<Vec<u8>> {
    let key = unwrap_private_key(private_key, old_password)?;
    wrap_private_key(&key, new_password)
}

pub fn digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Signs `data` with the scheme belonging to `version`. The data is hashed with
/// SHA-256 first.
pub fn sign(private_key: &[u8], password: &str, version: KeyVersion, data: &[u8]) -> Result<Vec<u8>> {
    let key = unwrap_private_key(private_key, password)?;
    let hashed = digest(data);
    let signature = match version {
        KeyVersion::A005 | KeyVersion::X002 => key.sign(Pkcs1v15Sign::new::<Sha256>(), &hashed),
        KeyVersion::A006 => {
            key.sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &hashed)
        }
        KeyVersion::E002 => {
            return Err(EbicsError::UnsupportedOperationError(
                "E002 keys cannot produce signatures".to_string(),
            ));
        }
    };
    signature.map_err(|e| crypto_error("signing", e))
}

/// Checks a signature produced by [`sign`]. Malformed keys or signatures verify
/// as `false`.
pub fn verify(public_key: &[u8], version: KeyVersion, data: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = decode_public_key(public_key) else {
        return false;
    };
    let hashed = digest(data);
    let result = match version {
        KeyVersion::A005 | KeyVersion::X002 => {
            key.verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)
        }
        KeyVersion::A006 => key.verify(Pss::new::<Sha256>(), &hashed, signature),
        KeyVersion::E002 => return false,
    };
    result.is_ok()
}

pub fn generate_transaction_key() -> TransactionKey {
    let mut key = vec![0u8; TRANSACTION_KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    TransactionKey::new(key)
}

/// AES-128-CBC with a zero IV. The padding is PKCS#7, which is also valid
/// ANSI X9.23 padding as EBICS requires.
pub fn encrypt_by_key(key: &TransactionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128CbcEnc::new_from_slices(key.as_bytes(), &ZERO_IV)
        .map_err(|e| crypto_error("transaction key", e))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Inverse of [`encrypt_by_key`]. Only the trailing length byte of the padding
/// is interpreted; banks fill the other padding bytes arbitrarily.
pub fn decrypt_by_key(key: &TransactionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128CbcDec::new_from_slices(key.as_bytes(), &ZERO_IV)
        .map_err(|e| crypto_error("transaction key", e))?;
    let mut plaintext = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| crypto_error("order data decryption", e))?;

    let padding = plaintext.last().copied().unwrap_or(0) as usize;
    if padding == 0 || padding > AES_BLOCK_SIZE || padding > plaintext.len() {
        return Err(EbicsError::CryptoError(
            "order data decryption: invalid padding".to_string(),
        ));
    }
    plaintext.truncate(plaintext.len() - padding);
    Ok(plaintext)
}

/// Wraps the transaction key with the recipient's E002 public key
/// (RSAES-PKCS1-v1_5).
pub fn encrypt_transaction_key(public_key: &[u8], key: &TransactionKey) -> Result<Vec<u8>> {
    let public_key = decode_public_key(public_key)?;
    public_key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, key.as_bytes())
        .map_err(|e| crypto_error("transaction key encryption", e))
}

pub fn decrypt_transaction_key(
    private_key: &[u8],
    password: &str,
    wrapped: &[u8],
) -> Result<TransactionKey> {
    let key = unwrap_private_key(private_key, password)?;
    key.decrypt(Pkcs1v15Encrypt, wrapped)
        .map(TransactionKey::new)
        .map_err(|e| crypto_error("transaction key decryption", e))
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflates zlib data, refusing output larger than `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data).take((limit as u64).saturating_add(1));
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| crypto_error("order data decompression", e))?;
    if out.len() > limit {
        return Err(EbicsError::ProtocolViolationError(format!(
            "order data inflates beyond {limit} bytes"
        )));
    }
    Ok(out)
}

/// 128 random bits as 32 upper-case hex characters.
pub fn generate_nonce() -> String {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    hex::encode_upper(nonce)
}

/// H003 order ids: one letter followed by three alphanumerics.
pub fn generate_order_id() -> String {
    const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);

    let mut id = String::with_capacity(4);
    id.push(LETTERS[bytes[0] as usize % LETTERS.len()] as char);
    for byte in &bytes[1..] {
        id.push(ALPHANUMERIC[*byte as usize % ALPHANUMERIC.len()] as char);
    }
    id
}

/// SHA-256 over `hex(exponent) + " " + hex(modulus)` (lower case, leading
/// zeros stripped), base64 encoded.
pub fn calculate_public_key_digest(public_key: &[u8]) -> Result<String> {
    let (modulus, exponent) = public_key_components(public_key)?;
    let modulus = hex::encode(modulus);
    let exponent = hex::encode(exponent);
    let input = format!(
        "{} {}",
        exponent.trim_start_matches('0'),
        modulus.trim_start_matches('0')
    );
    Ok(STANDARD.encode(digest(input.as_bytes())))
}

/// SHA-256 of the DER certificate, base64 encoded.
pub fn calculate_certificate_fingerprint(certificate: &[u8]) -> String {
    STANDARD.encode(digest(certificate))
}

/// Big-endian `(modulus, exponent)` of a public key.
pub fn public_key_components(public_key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let key = decode_public_key(public_key)?;
    Ok((key.n().to_bytes_be(), key.e().to_bytes_be()))
}

pub fn public_key_from_components(modulus: &[u8], exponent: &[u8]) -> Result<Vec<u8>> {
    let key = RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        BigUint::from_bytes_be(exponent),
    )
    .map_err(|e| crypto_error("public key", e))?;
    encode_public_key(&key)
}

/// Extracts the RSA public key of a DER X.509 certificate.
pub fn public_key_from_certificate(certificate: &[u8]) -> Result<Vec<u8>> {
    let certificate =
        Certificate::from_der(certificate).map_err(|e| crypto_error("certificate", e))?;
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| crypto_error("certificate", e))?;
    decode_public_key(&spki)?;
    Ok(spki)
}

/// Issues a self-signed X.509 certificate over `public_key`, signed with
/// the matching private key (RSASSA-PKCS1-v1_5, SHA-256).
pub fn self_signed_certificate(
    public_key: &[u8],
    private_key: &[u8],
    password: &str,
    subject: &str,
) -> Result<Vec<u8>> {
    let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(unwrap_private_key(private_key, password)?);
    let spki = SubjectPublicKeyInfoOwned::from_der(public_key).map_err(|e| crypto_error("public key", e))?;
    let subject = Name::from_str(subject).map_err(|e| crypto_error("certificate subject", e))?;
    let validity = Validity::from_now(CERTIFICATE_VALIDITY).map_err(|e| crypto_error("certificate validity", e))?;

    // Positive and without a leading zero octet.
    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    serial[0] = (serial[0] & 0x7f) | 0x01;
    let serial = SerialNumber::new(&serial).map_err(|e| crypto_error("certificate serial", e))?;

    let certificate = CertificateBuilder::new(Profile::Root, serial, validity, subject, spki, &signer)
        .map_err(|e| crypto_error("certificate", e))?
        .build::<rsa::pkcs1v15::Signature>()
        .map_err(|e| crypto_error("certificate signing", e))?;
    certificate.to_der().map_err(|e| crypto_error("certificate encoding", e))
}
