use std::path::{Path, PathBuf};

use super::checksum::Checksum;
use crate::core::error::{EngineError, EngineResult};

/// Immutable description of one file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    urls: Vec<String>,
    dest: PathBuf,
    checksum: Option<Checksum>,
    size: Option<u64>,
    cache_key: String,
}

impl DownloadDescriptor {
    pub fn builder(dest: impl Into<PathBuf>) -> DownloadDescriptorBuilder {
        DownloadDescriptorBuilder {
            urls: Vec::new(),
            dest: dest.into(),
            checksum: None,
            size: None,
            cache_key: None,
        }
    }

    /// Candidate URLs in fallback order.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn file_name(&self) -> String {
        self.dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.dest.display().to_string())
    }
}

pub struct DownloadDescriptorBuilder {
    urls: Vec<String>,
    dest: PathBuf,
    checksum: Option<Checksum>,
    size: Option<u64>,
    cache_key: Option<String>,
}

impl DownloadDescriptorBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Overrides the derived key (checksum, else first URL).
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn build(self) -> EngineResult<DownloadDescriptor> {
        let mut urls = Vec::with_capacity(self.urls.len());
        for url in self.urls {
            let url = url.trim().to_string();
            if !url.is_empty() && !urls.contains(&url) {
                urls.push(url);
            }
        }
        let Some(first) = urls.first() else {
            return Err(EngineError::Configuration(format!(
                "no candidate URLs for {}",
                self.dest.display()
            )));
        };
        if self.dest.file_name().is_none() {
            return Err(EngineError::Configuration(format!(
                "destination {} has no file name",
                self.dest.display()
            )));
        }

        let cache_key = match (self.cache_key, &self.checksum) {
            (Some(key), _) => key,
            (None, Some(checksum)) => checksum.cache_key(),
            (None, None) => format!("url:{first}"),
        };

        Ok(DownloadDescriptor {
            urls,
            dest: self.dest,
            checksum: self.checksum,
            size: self.size,
            cache_key,
        })
    }
}
