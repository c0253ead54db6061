#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::path::Path;

use futures::stream;
use multer::bytes::Bytes;
use multipart::client::lazy::Multipart;
use tempfile::TempDir;

use pimbin::access::Authorized;
use pimbin::blob::BlobStore;
use pimbin::conf::PimbinConfig;
use pimbin::db::Paste;
use pimbin::errors;
use pimbin::id::{self, IdAllocator, IdStrategy};
use pimbin::repo::Repository;
use pimbin::Pimbin;

pub const PNG_HEADER: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
];

/// A service over a scratch directory, with two users `sam` and `eve`.
pub struct Harness {
    pub pimbin: Pimbin,
    pub sam_token: String,
    pub eve_token: String,
    // dropped last, removes the database and blobs
    pub tmp: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| ()).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut PimbinConfig)) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        tweak(&mut config);
        let ids = id::allocator(config.id_strategy, config.id_interval());
        Self::build(tmp, config, ids).await
    }

    pub async fn with_allocator(ids: Box<dyn IdAllocator>) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        Self::build(tmp, config, ids).await
    }

    async fn build(tmp: TempDir, config: PimbinConfig, ids: Box<dyn IdAllocator>) -> Self {
        let repo = Repository::open(&config.database_url).unwrap();
        for name in ["sam", "eve"] {
            repo.create_user(name.to_string(), "$scrypt$unused".to_string())
                .await
                .unwrap();
        }
        let blobs = BlobStore::open(&config.uploads_dir).await.unwrap();
        let pimbin = Pimbin::new(&config, repo, blobs, ids).await.unwrap();

        let sam_token = pimbin.refresh_token("sam").await.unwrap();
        let eve_token = pimbin.refresh_token("eve").await.unwrap();

        Harness {
            pimbin,
            sam_token,
            eve_token,
            tmp,
        }
    }

    pub fn sam(&self) -> Authorized {
        self.pimbin.access().authorize(Some(&self.sam_token)).unwrap()
    }

    pub fn eve(&self) -> Authorized {
        self.pimbin.access().authorize(Some(&self.eve_token)).unwrap()
    }

    /// Feeds the encoded form to the pipeline in small chunks, so parts
    /// straddle reads.
    pub async fn upload(&self, who: &Authorized, form: Form) -> errors::Result<Paste> {
        let (boundary, body) = form.finish();
        let chunks: Vec<_> = body
            .chunks(7)
            .map(|c| Ok::<_, std::io::Error>(Bytes::copy_from_slice(c)))
            .collect();
        self.pimbin
            .upload(who, stream::iter(chunks), &boundary)
            .await
    }

    /// Blobs on disk, temporary uploads included.
    pub fn blob_count(&self) -> usize {
        std::fs::read_dir(self.pimbin.blobs().root())
            .unwrap()
            .count()
    }
}

pub fn test_config(dir: &Path) -> PimbinConfig {
    PimbinConfig {
        database_url: dir.join("pimbin.db").to_string_lossy().into_owned(),
        uploads_dir: dir.join("uploads"),
        id_strategy: IdStrategy::Random,
        ..PimbinConfig::default()
    }
}

/// multipart/form-data body, parts kept in insertion order.
pub struct Form {
    inner: Multipart<'static, 'static>,
}

impl Form {
    pub fn new() -> Self {
        Form {
            inner: Multipart::new(),
        }
    }

    /// A part with raw content; `filename` goes into its Content-Disposition.
    pub fn file(mut self, field: &str, filename: Option<&str>, data: &[u8]) -> Self {
        self.inner.add_stream(
            field.to_string(),
            Cursor::new(data.to_vec()),
            filename.map(str::to_string),
            None,
        );
        self
    }

    pub fn text(mut self, field: &str, value: &str) -> Self {
        self.inner.add_text(field.to_string(), value.to_string());
        self
    }

    /// The boundary and the encoded body.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        let mut prepared = self.inner.prepare().unwrap();
        let boundary = prepared.boundary().to_string();
        let mut body = Vec::new();
        prepared.read_to_end(&mut body).unwrap();
        (boundary, body)
    }
}

pub async fn read_blob(pimbin: &Pimbin, hash: &str) -> Vec<u8> {
    use tokio::io::AsyncReadExt;

    let (mut file, _) = pimbin.read_blob(hash, "").await.unwrap();
    let mut content = Vec::new();
    file.read_to_end(&mut content).await.unwrap();
    content
}
