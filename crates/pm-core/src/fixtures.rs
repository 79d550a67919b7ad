//! Archive and signing helpers shared by the unit tests.

use std::path::{Path, PathBuf};

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use crate::manifest::{MANIFEST_ENTRY, SIGNATURE_ENTRY};

pub(crate) struct ArchiveBuilder {
    builder: tar::Builder<Vec<u8>>,
}

impl ArchiveBuilder {
    pub(crate) fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    pub(crate) fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.file_with_mode(name, data, 0o644);
        self
    }

    pub(crate) fn executable(mut self, name: &str, data: &[u8]) -> Self {
        self.file_with_mode(name, data, 0o755);
        self
    }

    fn file_with_mode(&mut self, name: &str, data: &[u8], mode: u32) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        self.builder.append_data(&mut header, name, data).unwrap();
    }

    pub(crate) fn dir(mut self, name: &str) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        self.builder
            .append_data(&mut header, name, std::io::empty())
            .unwrap();
        self
    }

    pub(crate) fn symlink(mut self, name: &str, target: &str) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        self.builder.append_link(&mut header, name, target).unwrap();
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.builder.into_inner().unwrap()
    }
}

pub(crate) fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub(crate) fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub(crate) fn public_key_b64(key: &SigningKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.verifying_key().as_bytes())
}

pub(crate) fn sign_b64(key: &SigningKey, message: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.sign(message).to_bytes())
}

/// Manifest transcript for the given files, in the given order.
pub(crate) fn transcript(files: &[(&str, &[u8])]) -> Vec<u8> {
    files
        .iter()
        .map(|(name, data)| format!("{}\t{name}\n", sha256_hex(data)))
        .collect::<String>()
        .into_bytes()
}

/// Archive with a signed manifest covering `files`, followed by `files`.
pub(crate) fn signed_archive(key: &SigningKey, files: &[(&str, &[u8])]) -> Vec<u8> {
    signed_archive_with(key, &transcript(files), files)
}

/// Archive whose manifest is `manifest` (signed by `key`) and whose content
/// entries are `files`, which need not agree with the manifest.
pub(crate) fn signed_archive_with(
    key: &SigningKey,
    manifest: &[u8],
    files: &[(&str, &[u8])],
) -> Vec<u8> {
    let mut builder = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, manifest)
        .file(SIGNATURE_ENTRY, sign_b64(key, manifest).as_bytes());
    for (name, data) in files {
        builder = builder.file(name, data);
    }
    builder.finish()
}

/// Write a keyring directory trusting `keys`.
pub(crate) fn write_keyring(dir: &Path, keys: &[&SigningKey]) -> PathBuf {
    let keyring = dir.join("keyring");
    std::fs::create_dir_all(&keyring).unwrap();
    for (i, key) in keys.iter().enumerate() {
        std::fs::write(
            keyring.join(format!("key{i}.pub")),
            format!("{}\n", public_key_b64(key)),
        )
        .unwrap();
    }
    keyring
}
