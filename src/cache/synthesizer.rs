use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    cache::{derive_key, AudioCache, CacheMetadata},
    pipeline::Synthesizer,
    types::Audio,
    RussoError,
};

/// Serves repeated prompts from an [`AudioCache`] instead of re-synthesizing.
///
/// Cache failures never fail synthesis: a broken read falls through to the
/// inner synthesizer and a broken write still returns the fresh audio.
pub struct CachedSynthesizer<S> {
    inner: S,
    cache: AudioCache,
    enabled: bool,
    key_extra: Map<String, Value>,
}

impl<S: Synthesizer> CachedSynthesizer<S> {
    pub fn new(inner: S, cache: AudioCache) -> Self {
        Self {
            inner,
            cache,
            enabled: true,
            key_extra: Map::new(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Synthesizer settings (voice, model, ...) folded into every key so a
    /// configuration change misses the old entries.
    pub fn with_key_extra(mut self, key_extra: Map<String, Value>) -> Self {
        self.key_extra = key_extra;
        self
    }

    pub fn key_extra(&self) -> &Map<String, Value> {
        &self.key_extra
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cache(&self) -> &AudioCache {
        &self.cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl<S: Synthesizer> Synthesizer for CachedSynthesizer<S> {
    async fn synthesize(&self, text: &str) -> Result<Audio, RussoError> {
        if !self.enabled {
            return self.inner.synthesize(text).await;
        }

        let key = derive_key(text, &self.key_extra);
        match self.cache.get(&key).await {
            Ok(Some(entry)) => return Ok(entry.into_audio()),
            Ok(None) => tracing::debug!(key = %key, "cache miss"),
            Err(err) => tracing::warn!(key = %key, error = %err, "cache read failed"),
        }

        let audio = self.inner.synthesize(text).await?;
        let metadata = CacheMetadata::for_audio(&audio, text);
        if let Err(err) = self.cache.put(&key, &audio.data, &metadata).await {
            tracing::warn!(key = %key, error = %err, "cache write failed");
        }
        Ok(audio)
    }
}
