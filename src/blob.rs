use std::fmt;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use futures::stream::{Stream, StreamExt};
use multer::bytes::Bytes;
use sha2::{Digest as _, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::errors::{PimbinError, Result};
use crate::sniff;

/// SHA-256 of a blob's content. Displayed (and stored on disk) as unpadded
/// URL-safe base64, 43 characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base64::encode_config(self.0, base64::URL_SAFE_NO_PAD))
    }
}

impl FromStr for Digest {
    type Err = PimbinError;

    fn from_str(s: &str) -> Result<Self> {
        let not_found = || PimbinError::NotFound(format!("blob {s}"));
        let bytes = base64::decode_config(s, base64::URL_SAFE_NO_PAD).map_err(|_| not_found())?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| not_found())?;
        Ok(Digest(bytes))
    }
}

/// Content-addressed file storage. Every blob lives in a single directory
/// under the name of its digest; in-flight uploads are hidden dot files in
/// the same directory so the final rename stays on one filesystem.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Cannot create uploads dir {}", root.to_string_lossy()))?;
        Ok(BlobStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.to_string())
    }

    pub async fn contains(&self, digest: &Digest) -> bool {
        fs::metadata(self.path(digest)).await.is_ok()
    }

    /// Write the stream to disk and return its digest. Storing content that
    /// is already present replaces the blob with identical bytes.
    pub async fn store<S>(&self, stream: S) -> Result<Digest>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        let tmp_path = self
            .root
            .join(format!(".upload-{:016x}", rand::random::<u64>()));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await
            .with_context(|| {
                format!(
                    "Error opening file {} for write",
                    &tmp_path.to_string_lossy()
                )
            })?;

        let stored = match write_hashed(file, stream, &tmp_path).await {
            Ok(digest) => fs::rename(&tmp_path, self.path(&digest))
                .await
                .with_context(|| format!("Cannot move upload into place as {digest}"))
                .map(|_| digest)
                .map_err(PimbinError::from),
            Err(err) => Err(err),
        };

        if stored.is_err() {
            if let Err(err) = fs::remove_file(&tmp_path).await {
                log::error!(
                    "Could not remove temporary upload {}: {err:?}",
                    tmp_path.to_string_lossy()
                );
            }
        }
        stored
    }

    /// Open a blob. The MIME type comes from the display name's extension
    /// when it has a known one, from the content otherwise, and every
    /// `text/*` type is reported as `text/plain`.
    pub async fn read(&self, digest: &Digest, display_name: &str) -> Result<(fs::File, String)> {
        let mut file = match fs::File::open(self.path(digest)).await {
            Ok(f) => f,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(PimbinError::NotFound(format!("blob {digest}")))
            }
            Err(err) => return Err(err.into()),
        };

        let mime = match sniff::guess_from_name(display_name) {
            Some(mime) => mime,
            None => {
                let mut head = Vec::with_capacity(sniff::SNIFF_LEN);
                (&mut file)
                    .take(sniff::SNIFF_LEN as u64)
                    .read_to_end(&mut head)
                    .await?;
                file.seek(SeekFrom::Start(0)).await?;
                sniff::sniff(&head).mime.to_string()
            }
        };

        Ok((file, sniff::normalize(&mime)))
    }
}

async fn write_hashed<S>(mut file: fs::File, stream: S, path: &Path) -> Result<Digest>
where
    S: Stream<Item = Result<Bytes>>,
{
    futures::pin_mut!(stream);
    let mut hasher = Sha256::new();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .with_context(|| format!("Error writing to file {}", path.to_string_lossy()))?;
        written += chunk.len() as u64;
    }
    file.sync_all()
        .await
        .with_context(|| format!("Error writing to file {}", path.to_string_lossy()))?;

    let digest = Digest(hasher.finalize().into());
    log::debug!("wrote {written} bytes for blob {digest}");
    Ok(digest)
}
