//! Multipart upload ingestion.
//!
//! Parts are named `file:<index>` (or `f:<index>`) for content and
//! `name:<index>` (or `n:<index>`) for display names. Each file part is
//! sniffed and filtered before a single byte reaches the blob store; the
//! paste is only committed once every part has been read.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use multer::bytes::{Bytes, BytesMut};
use multer::{Constraints, Field, Multipart, SizeLimit};

use crate::access::Authorized;
use crate::db::{File, Paste, MAX_FILE_NAME_LEN};
use crate::errors::{PimbinError, Result};
use crate::service::Pimbin;
use crate::sniff::{self, Sniffed};

const ID_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    File,
    Name,
}

#[derive(Debug)]
struct StoredPart {
    hash: String,
    sniffed: Sniffed,
    /// `filename` from the part's Content-Disposition
    file_name: Option<String>,
}

impl Pimbin {
    /// Turn a multipart body into a committed paste owned by `who`.
    pub async fn upload<'r, S, O, E>(
        &self,
        who: &Authorized,
        body: S,
        boundary: &str,
    ) -> Result<Paste>
    where
        S: Stream<Item = std::result::Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let constraints =
            Constraints::new().size_limit(SizeLimit::new().whole_stream(self.max_body_size));
        let mut multipart = Multipart::with_constraints(body, boundary.to_string(), constraints);

        let mut parts: BTreeMap<u32, StoredPart> = BTreeMap::new();
        let mut names: HashMap<u32, String> = HashMap::new();

        while let Some(field) = multipart.next_field().await? {
            let (role, index) = parse_part_name(field.name())?;
            match role {
                Role::File => {
                    if parts.contains_key(&index) {
                        return Err(invalid(format!("duplicate file index {index}")));
                    }
                    let part = self.store_part(field).await?;
                    log::debug!("file:{index} stored as {} ({})", part.hash, part.sniffed.mime);
                    parts.insert(index, part);
                }
                Role::Name => {
                    if names.contains_key(&index) {
                        return Err(invalid(format!("duplicate name index {index}")));
                    }
                    let name = read_name(field).await?;
                    if names.values().any(|n| *n == name) {
                        return Err(invalid(format!("duplicate file name {name:?}")));
                    }
                    names.insert(index, name);
                }
            }
        }

        if parts.is_empty() {
            return Err(invalid("upload contains no file".to_string()));
        }
        if let Some(index) = names.keys().find(|i| !parts.contains_key(i)) {
            return Err(invalid(format!("name:{index} has no matching file")));
        }

        let sole = parts.len() == 1;
        // BTreeMap iteration is ascending: indices define the file order
        let files: Vec<File> = parts
            .into_iter()
            .map(|(index, part)| {
                let name = names
                    .remove(&index)
                    .or(part.file_name)
                    .unwrap_or_else(|| fallback_name(index, sole, part.sniffed.extension));
                File {
                    hash: part.hash,
                    name,
                }
            })
            .collect();

        // filenames and fallbacks can collide with explicit names too
        let mut seen = HashSet::new();
        for file in &files {
            if !seen.insert(file.name.as_str()) {
                return Err(invalid(format!("duplicate file name {:?}", file.name)));
            }
        }

        self.commit(who, files).await
    }

    async fn store_part(&self, mut field: Field<'_>) -> Result<StoredPart> {
        let file_name = match field.file_name() {
            Some(name) if name.len() > MAX_FILE_NAME_LEN => {
                return Err(invalid(format!(
                    "file name longer than {MAX_FILE_NAME_LEN} bytes"
                )))
            }
            Some(name) if !name.is_empty() => Some(name.to_string()),
            _ => None,
        };

        let mut head = BytesMut::with_capacity(sniff::SNIFF_LEN);
        while head.len() < sniff::SNIFF_LEN {
            match field.chunk().await? {
                Some(chunk) => head.extend_from_slice(&chunk),
                None => break,
            }
        }

        let sniffed = sniff::sniff(&head);
        if !self.filter.allows(sniffed.mime) {
            log::info!("rejecting upload of type {}", sniffed.mime);
            return Err(PimbinError::Policy(sniff::essence(sniffed.mime)));
        }

        let head = head.freeze();
        let body = stream::once(async move { Ok::<_, PimbinError>(head) })
            .chain(field.map_err(PimbinError::from));
        let digest = self.blobs.store(body).await?;

        Ok(StoredPart {
            hash: digest.to_string(),
            sniffed,
            file_name,
        })
    }

    async fn commit(&self, who: &Authorized, files: Vec<File>) -> Result<Paste> {
        for attempt in 1..=ID_ATTEMPTS {
            let paste = Paste {
                id: self.ids.next_id().await,
                owner: who.username().to_string(),
                files: files.clone(),
            };
            match self.repo.put_paste(paste.clone()).await {
                Ok(()) => {
                    log::info!(
                        "{} created paste {} with {} files",
                        paste.owner,
                        paste.id,
                        paste.files.len()
                    );
                    return Ok(paste);
                }
                Err(PimbinError::PasteIdTaken(id)) => {
                    log::warn!("paste id {id} already taken (attempt {attempt}/{ID_ATTEMPTS})");
                }
                Err(err) => return Err(err),
            }
        }
        Err(anyhow!("no free paste id after {ID_ATTEMPTS} attempts").into())
    }
}

fn invalid(message: String) -> PimbinError {
    PimbinError::Validation(message)
}

fn parse_part_name(name: Option<&str>) -> Result<(Role, u32)> {
    let name = name.ok_or_else(|| invalid("multipart part without a name".to_string()))?;
    let bad_name = || {
        invalid(format!(
            "invalid part name {name:?}, expected file:<index> or name:<index>"
        ))
    };
    let (role, index) = name.split_once(':').ok_or_else(bad_name)?;
    let role = match role {
        "file" | "f" => Role::File,
        "name" | "n" => Role::Name,
        _ => return Err(bad_name()),
    };
    let index = index.parse::<u32>().map_err(|_| bad_name())?;
    Ok((role, index))
}

async fn read_name(mut field: Field<'_>) -> Result<String> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        buf.extend_from_slice(&chunk);
        if buf.len() > MAX_FILE_NAME_LEN {
            return Err(invalid(format!(
                "file name longer than {MAX_FILE_NAME_LEN} bytes"
            )));
        }
    }
    String::from_utf8(buf).map_err(|_| invalid("file name is not valid utf-8".to_string()))
}

/// `""` for a lone file, its index otherwise, plus the sniffed extension.
fn fallback_name(index: u32, sole: bool, extension: Option<&str>) -> String {
    let base = if sole { String::new() } else { index.to_string() };
    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}
