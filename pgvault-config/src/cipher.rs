//! Symmetric encryption envelope for metadata/payload files (spec.md §6).
//!
//! When a stanza is encrypted, the catalog holds a *sub-passphrase* used to
//! protect payload files, while the catalog itself is protected by the
//! user-level passphrase. Both use `aes-256-cbc`, mirroring the cipher the
//! teacher stack (`openssl`) already pulls in for chunk encryption.

use anyhow::{bail, Context, Result};
use openssl::symm::{Cipher, Crypter, Mode};

use pgvault_types::RepoError;

const IV_LEN: usize = 16;

/// Encrypt `plaintext` under `passphrase`, producing `iv || ciphertext`.
///
/// The key is derived from the passphrase with a single SHA-256 pass; this
/// is sufficient for a repository-internal sub-passphrase (itself random,
/// never user-typed) and keeps the dependency footprint to what `openssl`
/// already provides, rather than pulling in a KDF crate for a value that is
/// not attacker-guessable the way a user passphrase would be.
pub fn encrypt(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = openssl::sha::sha256(passphrase);
    let mut iv = [0u8; IV_LEN];
    openssl::rand::rand_bytes(&mut iv).context("generating IV")?;

    let cipher = Cipher::aes_256_cbc();
    let mut crypter = Crypter::new(cipher, Mode::Encrypt, &key, Some(&iv))
        .context("initializing aes-256-cbc encrypter")?;

    let mut out = vec![0u8; plaintext.len() + cipher.block_size()];
    let mut count = crypter.update(plaintext, &mut out)?;
    count += crypter.finalize(&mut out[count..])?;
    out.truncate(count);

    let mut result = Vec::with_capacity(IV_LEN + out.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&out);
    Ok(result)
}

/// Inverse of [`encrypt`].
pub fn decrypt(passphrase: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < IV_LEN {
        bail!("encrypted payload shorter than the IV");
    }
    let (iv, ciphertext) = sealed.split_at(IV_LEN);
    let key = openssl::sha::sha256(passphrase);

    let cipher = Cipher::aes_256_cbc();
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, &key, Some(iv))
        .context("initializing aes-256-cbc decrypter")?;

    let mut out = vec![0u8; ciphertext.len() + cipher.block_size()];
    let mut count = crypter
        .update(ciphertext, &mut out)
        .context("decrypting payload")?;
    count += crypter
        .finalize(&mut out[count..])
        .context("finalizing decryption - wrong passphrase?")?;
    out.truncate(count);
    Ok(out)
}

/// Generate a fresh random sub-passphrase for a newly created stanza.
pub fn generate_sub_passphrase() -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; 32];
    openssl::rand::rand_bytes(&mut bytes).context("generating sub-passphrase")?;
    Ok(bytes)
}

/// Encrypt `plaintext` under `passphrase` when one is given, else pass it
/// through unchanged. The file-pair envelope calls this right before
/// writing, so a stanza without a passphrase never pays for the envelope.
pub fn seal(passphrase: Option<&[u8]>, plaintext: &[u8], file: &str) -> Result<Vec<u8>, RepoError> {
    match passphrase {
        Some(pass) => encrypt(pass, plaintext).map_err(|err| RepoError::Cipher {
            file: file.to_string(),
            reason: err.to_string(),
        }),
        None => Ok(plaintext.to_vec()),
    }
}

/// Inverse of [`seal`].
pub fn open(passphrase: Option<&[u8]>, sealed: &[u8], file: &str) -> Result<Vec<u8>, RepoError> {
    match passphrase {
        Some(pass) => decrypt(pass, sealed).map_err(|err| RepoError::Cipher {
            file: file.to_string(),
            reason: err.to_string(),
        }),
        None => Ok(sealed.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let pass = b"correct horse battery staple";
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let sealed = encrypt(pass, plaintext).unwrap();
        assert_ne!(sealed, plaintext);
        let recovered = decrypt(pass, &sealed).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealed = encrypt(b"right", b"payload payload!").unwrap();
        assert!(decrypt(b"wrong", &sealed).is_err());
    }

    #[test]
    fn seal_and_open_are_passthrough_without_a_passphrase() {
        let plaintext = b"unencrypted catalog bytes";
        let sealed = seal(None, plaintext, "backup.info").unwrap();
        assert_eq!(sealed, plaintext);
        let opened = open(None, &sealed, "backup.info").unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn seal_and_open_roundtrip_with_a_passphrase() {
        let plaintext = b"encrypted catalog bytes";
        let sealed = seal(Some(b"pass"), plaintext, "backup.info").unwrap();
        assert_ne!(sealed, plaintext);
        let opened = open(Some(b"pass"), &sealed, "backup.info").unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_with_wrong_passphrase_returns_cipher_error() {
        let sealed = seal(Some(b"right"), b"payload", "backup.info").unwrap();
        let err = open(Some(b"wrong"), &sealed, "backup.info").unwrap_err();
        assert!(matches!(err, RepoError::Cipher { .. }));
    }
}
