//! Content-addressed response cache. One file per prompt, named
//! `<sha256-of-prompt>.json`, written atomically (write-then-rename) so a
//! crashed writer never leaves a torn entry behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{NightingaleError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub prompt_hash: String,
    pub response: String,
    pub cached_at: DateTime<Utc>,
}

pub struct ResponseCache {
    dir: PathBuf,
    pub enabled: bool,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
        }
    }

    pub fn default_dir() -> PathBuf {
        PathBuf::from(".nightingale_cache")
    }

    pub fn prompt_hash(prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.json"))
    }

    pub fn get(&self, prompt: &str) -> Result<Option<String>> {
        let hash = Self::prompt_hash(prompt);
        let path = self.entry_path(&hash);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| NightingaleError::Configuration(format!("reading cache entry: {e}")))?;
        let entry: CacheEntry = serde_json::from_str(&text)
            .map_err(|e| NightingaleError::Configuration(format!("parsing cache entry: {e}")))?;
        Ok(Some(entry.response))
    }

    /// Stores `response` under the prompt's hash. Disabled while `enabled`
    /// is false (set during a schema-retry sequence so a corrective
    /// re-prompt never overwrites the prior good entry).
    pub fn put(&self, prompt: &str, response: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let hash = Self::prompt_hash(prompt);
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| NightingaleError::Configuration(format!("creating cache dir: {e}")))?;

        let entry = CacheEntry {
            prompt_hash: hash.clone(),
            response: response.to_string(),
            cached_at: Utc::now(),
        };
        let body = serde_json::to_string_pretty(&entry)
            .map_err(|e| NightingaleError::Configuration(format!("serializing cache entry: {e}")))?;

        let final_path = self.entry_path(&hash);
        let tmp_path = self.dir.join(format!("{hash}.json.tmp"));
        std::fs::write(&tmp_path, body)
            .map_err(|e| NightingaleError::Configuration(format!("writing cache entry: {e}")))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| NightingaleError::Configuration(format!("committing cache entry: {e}")))?;
        Ok(())
    }

    pub fn path_for(&self, prompt: &str) -> PathBuf {
        self.entry_path(&Self::prompt_hash(prompt))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        cache.put("prompt-a", "response-a").unwrap();
        assert_eq!(cache.get("prompt-a").unwrap().as_deref(), Some("response-a"));
    }

    #[test]
    fn miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        assert!(cache.get("never-seen").unwrap().is_none());
    }

    #[test]
    fn disabled_cache_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResponseCache::new(dir.path());
        cache.enabled = false;
        cache.put("prompt-b", "response-b").unwrap();
        assert!(cache.get("prompt-b").unwrap().is_none());
    }

    #[test]
    fn entry_file_is_named_by_prompt_hash() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        cache.put("prompt-c", "response-c").unwrap();
        let expected = dir.path().join(format!("{}.json", ResponseCache::prompt_hash("prompt-c")));
        assert!(expected.exists());
    }
}
