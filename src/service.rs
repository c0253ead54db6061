use rocket::http::RawStr;
use tokio::fs;

use crate::access::{AccessControl, Authorized};
use crate::blob::{BlobStore, Digest};
use crate::conf::PimbinConfig;
use crate::db::Paste;
use crate::errors::Result;
use crate::id::{self, IdAllocator};
use crate::repo::Repository;
use crate::sniff::{self, ContentFilter};

/// Everything a request handler needs, built once at startup.
pub struct Pimbin {
    pub(crate) blobs: BlobStore,
    pub(crate) repo: Repository,
    pub(crate) access: AccessControl,
    pub(crate) ids: Box<dyn IdAllocator>,
    pub(crate) filter: ContentFilter,
    pub(crate) max_body_size: u64,
    base_url: String,
}

impl Pimbin {
    pub async fn from_config(config: &PimbinConfig) -> Result<Self> {
        let repo = Repository::open(&config.database_url)?;
        let blobs = BlobStore::open(&config.uploads_dir).await?;
        let ids = id::allocator(config.id_strategy, config.id_interval());
        Self::new(config, repo, blobs, ids).await
    }

    pub async fn new(
        config: &PimbinConfig,
        repo: Repository,
        blobs: BlobStore,
        ids: Box<dyn IdAllocator>,
    ) -> Result<Self> {
        let access = AccessControl::load(&repo).await?;
        Ok(Pimbin {
            blobs,
            repo,
            access,
            ids,
            filter: config.content_filter(),
            max_body_size: config.max_body_size,
            base_url: config.base_url.clone(),
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }

    pub fn paste_url(&self, id: &str) -> String {
        format!("{}{}", self.base_url, id)
    }

    pub fn blob_url(&self, hash: &str, name: &str) -> String {
        if name.is_empty() {
            format!("{}blob/{}", self.base_url, hash)
        } else {
            let name = RawStr::new(name).percent_encode();
            format!("{}blob/{}/{}", self.base_url, hash, name.as_str())
        }
    }

    pub async fn get_paste(&self, id: &str) -> Result<Paste> {
        self.repo.get_paste(id.to_string()).await
    }

    /// A paste holding a single non-text file is served as that file.
    pub async fn direct_url(&self, paste: &Paste) -> Result<Option<String>> {
        match paste.files.as_slice() {
            [file] => {
                let (_, mime) = self.read_blob(&file.hash, &file.name).await?;
                Ok((mime != sniff::TEXT_PLAIN).then(|| self.blob_url(&file.hash, &file.name)))
            }
            _ => Ok(None),
        }
    }

    pub async fn read_blob(&self, hash: &str, name: &str) -> Result<(fs::File, String)> {
        let digest: Digest = hash.parse()?;
        self.blobs.read(&digest, name).await
    }

    /// Only the owner may delete. The paste's blobs stay on disk.
    pub async fn delete_paste(&self, who: &Authorized, id: &str) -> Result<()> {
        let paste = self.repo.get_paste(id.to_string()).await?;
        self.access.check_owner(who, &paste)?;
        self.repo.delete_paste(id.to_string()).await?;
        log::info!("{} deleted paste {id}", who.username());
        Ok(())
    }

    pub async fn refresh_token(&self, username: &str) -> Result<String> {
        self.access.refresh_token(&self.repo, username).await
    }
}
