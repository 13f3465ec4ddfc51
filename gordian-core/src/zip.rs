//! Encrypted container format ("locked zip").
//!
//! An archive is a sequence of entry blobs followed by a directory, an
//! optional password lock, and a fixed trailer:
//!
//! ```text
//! magic "GKZF" | version u8
//! entry blobs ... (keyset-encrypted when the archive is locked)
//! directory: bincode ZipFileContents (keyset-encrypted when locked)
//! lock: bincode Lock (locked archives only)
//! trailer: dir_offset u64 | dir_len u64 | lock_len u64 | magic "GKZF"
//! ```
//!
//! A wrong password fails at the directory-unlock step with
//! `Authentication`; a truncated or corrupt archive fails at the
//! container level with `Format`. The two are never conflated.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use aes_gcm::aead::rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use gordian_common::logging::Logger;

use crate::error::{GordianError, Result};
use crate::factory::GordianFactory;
use crate::idspec::IdSpec;
use crate::keyset::KeySet;
use crate::keystore::ProtectedBytes;

const ZIP_MAGIC: [u8; 4] = *b"GKZF";
const ZIP_VERSION: u8 = 1;

/// Leading magic plus version byte
const HEADER_LEN: u64 = 5;

/// dir_offset + dir_len + lock_len + trailing magic
const TRAILER_LEN: u64 = 8 + 8 + 8 + 4;

/// Length of the random keyset secret guarded by a [`Lock`]
const ARCHIVE_SECRET_LEN: usize = 32;

/// Password-derived wrapping of the archive keyset secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    secret: ProtectedBytes,
}

impl Lock {
    /// Create a lock around a fresh random archive secret; returns the
    /// lock and the secret it guards.
    pub fn new(factory: &GordianFactory, password: &[u8]) -> Result<(Lock, Zeroizing<Vec<u8>>)> {
        let mut secret = Zeroizing::new(vec![0u8; ARCHIVE_SECRET_LEN]);
        OsRng.fill_bytes(&mut secret);
        let protected = ProtectedBytes::protect(
            &secret,
            password,
            factory.parameters().lock_iterations(),
        )?;
        Ok((Lock { secret: protected }, secret))
    }

    /// Recover the archive secret. A wrong password surfaces as
    /// `Authentication`.
    pub fn unlock(&self, password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.secret.reveal(password)
    }
}

/// Directory metadata for one archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipFileEntry {
    name: String,
    offset: u64,
    stored_len: u64,
    plain_len: u64,
    encrypted: bool,
    /// Obfuscated external id of the primary cipher spec used for this
    /// entry, when encrypted
    algorithm_id: Option<i32>,
}

impl ZipFileEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plaintext size of the entry
    pub fn len(&self) -> u64 {
        self.plain_len
    }

    pub fn is_empty(&self) -> bool {
        self.plain_len == 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn algorithm_id(&self) -> Option<i32> {
        self.algorithm_id
    }
}

/// The archive directory: an ordered list of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipFileContents {
    entries: Vec<ZipFileEntry>,
}

impl ZipFileContents {
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&ZipFileEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write handle for building an archive. Entries are added one at a
/// time; [`ZipWriteFile::seal`] writes the directory and trailer and
/// consumes the handle, closing the file on every path.
pub struct ZipWriteFile {
    writer: BufWriter<File>,
    position: u64,
    entries: Vec<ZipFileEntry>,
    keyset: Option<KeySet>,
    lock: Option<Lock>,
    factory: GordianFactory,
    logger: Arc<Logger>,
}

impl ZipWriteFile {
    /// Create a plain (unlocked) archive.
    pub fn create(
        path: impl AsRef<Path>,
        factory: &GordianFactory,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        Self::create_inner(path, factory, None, None, logger)
    }

    /// Create a password-locked archive: entries and the directory are
    /// encrypted under a fresh keyset whose secret is wrapped by the
    /// password-derived [`Lock`].
    pub fn create_locked(
        path: impl AsRef<Path>,
        factory: &GordianFactory,
        password: &[u8],
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let (lock, secret) = Lock::new(factory, password)?;
        let keyset = KeySet::new(factory, &secret)?;
        Self::create_inner(path, factory, Some(keyset), Some(lock), logger)
    }

    fn create_inner(
        path: impl AsRef<Path>,
        factory: &GordianFactory,
        keyset: Option<KeySet>,
        lock: Option<Lock>,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&ZIP_MAGIC)?;
        writer.write_all(&[ZIP_VERSION])?;
        logger.debug(format!(
            "Created {} archive at {}",
            if lock.is_some() { "locked" } else { "plain" },
            path.as_ref().display()
        ));
        Ok(Self {
            writer,
            position: HEADER_LEN,
            entries: Vec::new(),
            keyset,
            lock,
            factory: factory.clone(),
            logger,
        })
    }

    /// Append one named entry. In a locked archive the entry bytes go
    /// through the keyset; in a plain archive they are stored as-is.
    pub fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let encrypt = self.keyset.is_some();
        self.write_entry_inner(name, bytes, encrypt)
    }

    /// Append one named entry stored as plaintext even when the archive
    /// is locked. Entries are individually encryptable, so a locked
    /// archive can mix protected payloads with readable metadata.
    pub fn write_entry_plain(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.write_entry_inner(name, bytes, false)
    }

    fn write_entry_inner(&mut self, name: &str, bytes: &[u8], encrypt: bool) -> Result<()> {
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(GordianError::Logic(format!(
                "archive already has an entry named {name}"
            )));
        }
        let (stored, encrypted, algorithm_id) = match self.keyset.as_ref().filter(|_| encrypt) {
            Some(keyset) => {
                let blob = keyset.encrypt_bytes(bytes)?;
                let algorithm_id = self
                    .factory
                    .obfuscater()
                    .external_id(&IdSpec::SymCipher(keyset.cipher_specs()[0]))?;
                (blob, true, Some(algorithm_id))
            }
            None => (bytes.to_vec(), false, None),
        };
        self.writer.write_all(&stored)?;
        self.entries.push(ZipFileEntry {
            name: name.to_string(),
            offset: self.position,
            stored_len: stored.len() as u64,
            plain_len: bytes.len() as u64,
            encrypted,
            algorithm_id,
        });
        self.position += stored.len() as u64;
        self.logger
            .debug(format!("Wrote entry {name} ({} bytes)", bytes.len()));
        Ok(())
    }

    /// Serialize the directory (encrypting it when locked), append the
    /// lock descriptor and trailer, and flush. The directory is immutable
    /// from here on.
    pub fn seal(mut self) -> Result<()> {
        let contents = ZipFileContents {
            entries: std::mem::take(&mut self.entries),
        };
        let mut directory = bincode::serialize(&contents)
            .map_err(|e| GordianError::Format(format!("directory encoding failed: {e}")))?;
        if let Some(keyset) = &self.keyset {
            directory = keyset.encrypt_bytes(&directory)?;
        }
        let dir_offset = self.position;
        self.writer.write_all(&directory)?;

        let lock_len = match &self.lock {
            Some(lock) => {
                let lock_bytes = bincode::serialize(lock)
                    .map_err(|e| GordianError::Format(format!("lock encoding failed: {e}")))?;
                self.writer.write_all(&lock_bytes)?;
                lock_bytes.len() as u64
            }
            None => 0,
        };

        self.writer.write_all(&dir_offset.to_be_bytes())?;
        self.writer.write_all(&(directory.len() as u64).to_be_bytes())?;
        self.writer.write_all(&lock_len.to_be_bytes())?;
        self.writer.write_all(&ZIP_MAGIC)?;
        self.writer.flush()?;
        self.logger.info(format!(
            "Sealed archive with {} entries",
            contents.entries.len()
        ));
        Ok(())
    }
}

/// Read handle over an archive.
pub struct ZipReadFile {
    reader: BufReader<File>,
    factory: GordianFactory,
    /// Raw (possibly encrypted) directory bytes
    directory: Vec<u8>,
    lock: Option<Lock>,
    keyset: Option<KeySet>,
    contents: Option<ZipFileContents>,
    logger: Arc<Logger>,
}

impl ZipReadFile {
    /// Open an archive and parse its trailer and directory. The contents
    /// of a locked archive stay unavailable until
    /// [`ZipReadFile::unlock`].
    pub fn open(
        path: impl AsRef<Path>,
        factory: &GordianFactory,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);

        let file_len = reader.seek(SeekFrom::End(0))?;
        if file_len < HEADER_LEN + TRAILER_LEN {
            return Err(GordianError::Format("archive is truncated".to_string()));
        }
        let mut header = [0u8; HEADER_LEN as usize];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut header)?;
        if header[..4] != ZIP_MAGIC {
            return Err(GordianError::Format("bad archive magic".to_string()));
        }
        if header[4] != ZIP_VERSION {
            return Err(GordianError::Format(format!(
                "unsupported archive version {}",
                header[4]
            )));
        }

        reader.seek(SeekFrom::End(-(TRAILER_LEN as i64)))?;
        let mut trailer = [0u8; TRAILER_LEN as usize];
        reader.read_exact(&mut trailer)?;
        if trailer[24..28] != ZIP_MAGIC {
            return Err(GordianError::Format("bad archive trailer".to_string()));
        }
        let dir_offset = u64::from_be_bytes(trailer[0..8].try_into().unwrap());
        let dir_len = u64::from_be_bytes(trailer[8..16].try_into().unwrap());
        let lock_len = u64::from_be_bytes(trailer[16..24].try_into().unwrap());
        let trailer_start = file_len - TRAILER_LEN;
        if dir_offset < HEADER_LEN
            || dir_offset
                .checked_add(dir_len)
                .and_then(|end| end.checked_add(lock_len))
                != Some(trailer_start)
        {
            return Err(GordianError::Format(
                "archive trailer is inconsistent".to_string(),
            ));
        }

        let directory = read_region(&mut reader, dir_offset, dir_len)?;
        let lock = if lock_len > 0 {
            let lock_bytes = read_region(&mut reader, dir_offset + dir_len, lock_len)?;
            let lock: Lock = bincode::deserialize(&lock_bytes)
                .map_err(|e| GordianError::Format(format!("lock decoding failed: {e}")))?;
            Some(lock)
        } else {
            None
        };

        let contents = if lock.is_none() {
            Some(decode_contents(&directory)?)
        } else {
            None
        };
        logger.debug(format!(
            "Opened archive {} ({})",
            path.as_ref().display(),
            if lock.is_some() { "locked" } else { "plain" }
        ));
        Ok(Self {
            reader,
            factory: factory.clone(),
            directory,
            lock,
            keyset: None,
            contents,
            logger,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.lock.is_some()
    }

    /// Unlock a locked archive: recover the keyset secret from the lock
    /// and decrypt the directory. A wrong password fails here with
    /// `Authentication`.
    pub fn unlock(&mut self, password: &[u8]) -> Result<()> {
        let lock = self.lock.as_ref().ok_or_else(|| {
            GordianError::Logic("archive is not password-locked".to_string())
        })?;
        let secret = lock.unlock(password)?;
        let keyset = KeySet::new(&self.factory, &secret)?;
        let directory = keyset.decrypt_bytes(&self.directory)?;
        self.contents = Some(decode_contents(&directory)?);
        self.keyset = Some(keyset);
        self.logger.debug("Archive directory unlocked");
        Ok(())
    }

    /// The parsed directory. Fails with `Logic` while a locked archive
    /// is still locked.
    pub fn contents(&self) -> Result<&ZipFileContents> {
        self.contents.as_ref().ok_or_else(|| {
            GordianError::Logic("archive is locked; unlock it first".to_string())
        })
    }

    /// Open one entry as a lazy, non-restartable byte stream. The stream
    /// may be fully consumed once; reopening requires a fresh call.
    pub fn create_input_stream(&mut self, name: &str) -> Result<ZipEntryStream> {
        let entry = self
            .contents()?
            .find(name)
            .ok_or_else(|| GordianError::NotFound(name.to_string()))?
            .clone();
        let stored = read_region(&mut self.reader, entry.offset, entry.stored_len)?;
        let plain = if entry.encrypted {
            let keyset = self.keyset.as_ref().ok_or_else(|| {
                GordianError::Logic("encrypted entry in an unlocked archive".to_string())
            })?;
            keyset.decrypt_bytes(&stored)?
        } else {
            stored
        };
        if plain.len() as u64 != entry.plain_len {
            return Err(GordianError::Format(format!(
                "entry {name} decodes to {} bytes, directory says {}",
                plain.len(),
                entry.plain_len
            )));
        }
        Ok(ZipEntryStream {
            inner: Cursor::new(plain),
        })
    }

    /// Drain an entry's stream and parse it as a structured metadata
    /// document.
    pub fn read_document(&mut self, name: &str) -> Result<serde_json::Value> {
        let mut stream = self.create_input_stream(name)?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GordianError::Format(format!("entry {name} is not a valid document: {e}")))
    }
}

fn decode_contents(directory: &[u8]) -> Result<ZipFileContents> {
    bincode::deserialize(directory)
        .map_err(|e| GordianError::Format(format!("directory decoding failed: {e}")))
}

fn read_region(reader: &mut BufReader<File>, offset: u64, len: u64) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut bytes = vec![0u8; len as usize];
    reader
        .read_exact(&mut bytes)
        .map_err(|_| GordianError::Format("archive region is truncated".to_string()))?;
    Ok(bytes)
}

/// A single-use byte stream over one decoded entry.
pub struct ZipEntryStream {
    inner: Cursor<Vec<u8>>,
}

impl Read for ZipEntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
