//! Content type detection for uploaded and stored blobs.
//!
//! Types are detected from at most the first [`SNIFF_LEN`] bytes of content:
//! magic numbers first, then a plain-text heuristic, then
//! `application/octet-stream`.

pub const SNIFF_LEN: usize = 512;
pub const TEXT_PLAIN: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";

const TEXT_UTF8: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sniffed {
    pub mime: &'static str,
    /// best-guess file extension, without the leading dot
    pub extension: Option<&'static str>,
}

pub fn sniff(head: &[u8]) -> Sniffed {
    let head = &head[..head.len().min(SNIFF_LEN)];
    if let Some(kind) = infer::get(head) {
        return Sniffed {
            mime: kind.mime_type(),
            extension: Some(kind.extension()),
        };
    }
    if looks_like_text(head) {
        Sniffed {
            mime: TEXT_UTF8,
            extension: Some("txt"),
        }
    } else {
        Sniffed {
            mime: OCTET_STREAM,
            extension: None,
        }
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    let utf8 = match std::str::from_utf8(head) {
        Ok(_) => true,
        // a multi-byte sequence cut at the end of the sniffing window
        Err(err) => err.error_len().is_none(),
    };
    utf8 && !head.iter().any(|b| is_binary_byte(*b))
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

/// The type without its parameters, lowercased: `Text/HTML; charset=x` is `text/html`.
pub fn essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or(mime)
        .trim()
        .to_ascii_lowercase()
}

/// Every `text/*` type collapses to [`TEXT_PLAIN`]; downstream rendering
/// only ever branches on that single value.
pub fn normalize(mime: &str) -> String {
    let essence = essence(mime);
    if essence.starts_with("text/") {
        TEXT_PLAIN.to_string()
    } else {
        essence
    }
}

pub fn guess_from_name(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPolicy {
    /// only the listed types are accepted
    Allow,
    /// the listed types are rejected
    Deny,
}

#[derive(Debug, Clone)]
pub struct ContentFilter {
    policy: FilterPolicy,
    types: Vec<String>,
}

impl ContentFilter {
    pub fn new(policy: FilterPolicy, types: &[String]) -> Self {
        Self {
            policy,
            types: types.iter().map(|t| essence(t)).collect(),
        }
    }

    pub fn allows(&self, mime: &str) -> bool {
        let essence = essence(mime);
        let listed = self.types.iter().any(|t| *t == essence);
        match self.policy {
            FilterPolicy::Allow => listed,
            FilterPolicy::Deny => !listed,
        }
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new(FilterPolicy::Deny, &[])
    }
}
