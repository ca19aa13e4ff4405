use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::{
    types::{Audio, AudioFormat},
    RussoError,
};

pub mod synthesizer;

pub use synthesizer::CachedSynthesizer;

pub const DEFAULT_CACHE_DIR: &str = ".russo_cache";

const AUDIO_EXT: &str = "audio";
const META_EXT: &str = "meta";
const TMP_EXT: &str = "tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Describes the payload stored next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub format: AudioFormat,
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_sample_width")]
    pub sample_width: u16,
    /// Text the payload was synthesized from.
    #[serde(default)]
    pub prompt: String,
}

fn default_channels() -> u16 {
    1
}

fn default_sample_width() -> u16 {
    2
}

impl CacheMetadata {
    pub fn for_audio(audio: &Audio, prompt: impl Into<String>) -> Self {
        Self {
            format: audio.format,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            sample_width: audio.sample_width,
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn into_audio(self) -> Audio {
        Audio::new(self.payload)
            .with_format(self.metadata.format)
            .with_sample_rate(self.metadata.sample_rate)
            .with_channels(self.metadata.channels)
            .with_sample_width(self.metadata.sample_width)
    }
}

/// Deterministic cache key for `input_text` under `extra_context`.
///
/// Insertion order of `extra_context` does not matter; any change to the text
/// or to a context value produces a different key.
pub fn derive_key(input_text: &str, extra_context: &Map<String, Value>) -> String {
    let mut document = String::new();
    document.push_str("{\"extra\":");
    write_canonical(&Value::Object(extra_context.clone()), &mut document);
    document.push_str(",\"input\":");
    document.push_str(&Value::String(input_text.to_string()).to_string());
    document.push('}');

    hex::encode(Sha256::digest(document.as_bytes()))
}

/// Compact JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn validate_key(key: &str) -> Result<(), RussoError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RussoError::InvalidCacheKey(key.to_string()))
    }
}

/// Directory of `<key>.audio` / `<key>.meta` file pairs.
#[derive(Debug, Clone)]
pub struct AudioCache {
    dir: PathBuf,
}

impl Default for AudioCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DIR)
    }
}

impl AudioCache {
    /// The directory is created lazily on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ext}"))
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, RussoError> {
        validate_key(key)?;

        let payload = match read_optional(&self.entry_path(key, AUDIO_EXT)).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let meta = match read_optional(&self.entry_path(key, META_EXT)).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match serde_json::from_slice::<CacheMetadata>(&meta) {
            Ok(metadata) => {
                tracing::debug!(key, bytes = payload.len(), "cache hit");
                Ok(Some(CacheEntry { payload, metadata }))
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "corrupt cache entry, removing");
                self.evict(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn put(
        &self,
        key: &str,
        payload: &[u8],
        metadata: &CacheMetadata,
    ) -> Result<(), RussoError> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir).await?;

        let meta = serde_json::to_vec_pretty(metadata)?;
        // Payload first: a reader only trusts an entry once its metadata exists.
        self.write_atomic(&self.entry_path(key, AUDIO_EXT), payload).await?;
        self.write_atomic(&self.entry_path(key, META_EXT), &meta).await?;

        tracing::debug!(key, bytes = payload.len(), "cached entry");
        Ok(())
    }

    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<(), RussoError> {
        let file_name = target
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("entry");
        let tmp = self.dir.join(format!(
            ".{file_name}.{}.{}.{TMP_EXT}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&tmp, bytes).await?;
        if let Err(err) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Removes both halves of an entry. Returns whether anything was removed.
    pub async fn evict(&self, key: &str) -> Result<bool, RussoError> {
        validate_key(key)?;
        let mut removed = false;
        for ext in [AUDIO_EXT, META_EXT] {
            match fs::remove_file(self.entry_path(key, ext)).await {
                Ok(()) => removed = true,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }

    /// Removes every cache file and returns how many were deleted.
    pub async fn clear(&self) -> Result<usize, RussoError> {
        let mut removed = 0;
        for path in self.list_files().await? {
            let is_cache_file = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some(AUDIO_EXT | META_EXT | TMP_EXT)
            );
            if !is_cache_file {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        tracing::info!(removed, dir = %self.dir.display(), "cleared cache");
        Ok(removed)
    }

    /// Number of complete entries. A payload without metadata is not one.
    pub async fn size(&self) -> Result<usize, RussoError> {
        let files = self.list_files().await?;
        let metas = keys_with_extension(&files, META_EXT);
        Ok(keys_with_extension(&files, AUDIO_EXT)
            .intersection(&metas)
            .count())
    }

    async fn list_files(&self) -> Result<Vec<PathBuf>, RussoError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            files.push(entry.path());
        }
        Ok(files)
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, RussoError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn keys_with_extension<'a>(files: &'a [PathBuf], ext: &str) -> HashSet<&'a str> {
    files
        .iter()
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(ext))
        .filter_map(|path| path.file_stem()?.to_str())
        .collect()
}
