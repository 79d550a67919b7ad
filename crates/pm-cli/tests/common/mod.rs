//! Shared fixtures: an isolated install root, a signing key, and signed
//! package archives.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use pm_core::Layout;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

pub const MANIFEST_ENTRY: &str = "manifest.sha256";
pub const SIGNATURE_ENTRY: &str = "manifest.sha256.asc";

/// A temporary install root whose keyring trusts `key`.
pub struct Fixture {
    pub dir: TempDir,
    pub key: SigningKey,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let key = signing_key(1);
        let fixture = Self { dir, key };

        let keyring = fixture.layout().keyring_dir();
        std::fs::create_dir_all(&keyring).unwrap();
        std::fs::write(
            keyring.join("release.pub"),
            base64::engine::general_purpose::STANDARD.encode(fixture.key.verifying_key().as_bytes()),
        )
        .unwrap();
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.root())
    }

    /// Write the available database: `(name, version, url)` triples.
    pub fn write_available(&self, packages: &[(&str, &str, String)]) {
        let entries: Vec<String> = packages
            .iter()
            .map(|(name, version, url)| {
                format!(r#"{{"name":"{name}","version":"{version}","url":"{url}"}}"#)
            })
            .collect();
        let path = self.layout().available_db();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!(r#"{{"packages":[{}]}}"#, entries.join(","))).unwrap();
    }

    /// Write `bytes` to a file named `name` under the root and return its path.
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.root().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Manifest transcript declaring `files`.
pub fn transcript(files: &[(&str, &[u8])]) -> Vec<u8> {
    files
        .iter()
        .map(|(name, data)| format!("{}\t{name}\n", sha256_hex(data)))
        .collect::<String>()
        .into_bytes()
}

fn append(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8], mode: u32) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    builder.append_data(&mut header, name, data).unwrap();
}

/// Archive whose manifest (`manifest`, signed by `key`) need not match `files`.
pub fn archive_with(key: &SigningKey, manifest: &[u8], files: &[(&str, &[u8])]) -> Vec<u8> {
    let signature =
        base64::engine::general_purpose::STANDARD.encode(key.sign(manifest).to_bytes());

    let mut builder = tar::Builder::new(Vec::new());
    append(&mut builder, MANIFEST_ENTRY, manifest, 0o644);
    append(&mut builder, SIGNATURE_ENTRY, signature.as_bytes(), 0o644);
    for (name, data) in files {
        append(&mut builder, name, data, 0o755);
    }
    builder.into_inner().unwrap()
}

/// Correctly signed archive for `files`.
pub fn archive(key: &SigningKey, files: &[(&str, &[u8])]) -> Vec<u8> {
    archive_with(key, &transcript(files), files)
}
