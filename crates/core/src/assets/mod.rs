use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    audio::{AudioConverter, LinearConverter, SoundBuffer, TARGET_SPEC},
    render::{Drawable, TextureId},
    timeline::{Stimulus, StimulusKind, Timeline},
    Result,
};

/// Platform decoding collaborator: turns files and strings into drawables
/// and PCM buffers.
pub trait AssetDecoder {
    fn decode_image(&mut self, path: &Path) -> Result<Drawable>;
    fn render_text(&mut self, text: &str) -> Result<Drawable>;
    fn decode_wav(&mut self, path: &Path) -> Result<SoundBuffer>;
    /// Frees a drawable previously returned by this decoder.
    fn release(&mut self, texture: TextureId);
}

/// Decoded form of one distinct `(kind, reference)` pair. An entry whose
/// decode failed has neither field set.
#[derive(Debug, Default)]
pub struct CacheEntry {
    pub drawable: Option<Drawable>,
    pub sound: Option<Arc<SoundBuffer>>,
}

impl CacheEntry {
    pub fn is_loaded(&self) -> bool {
        self.drawable.is_some() || self.sound.is_some()
    }
}

/// Per-timeline-position handle to a shared cache entry.
pub type Resource = Arc<CacheEntry>;

/// Totals reported after a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub images: usize,
    pub sounds: usize,
    pub texts: usize,
    pub failed: usize,
    pub estimated_bytes: usize,
}

/// Decode-once store keyed by stimulus kind and reference. Drawables are
/// released through the decoder when the cache is dropped, so resources must
/// not be drawn after that.
pub struct ResourceCache<D: AssetDecoder> {
    decoder: D,
    converter: Box<dyn AudioConverter>,
    entries: HashMap<(StimulusKind, String), Resource>,
}

impl<D: AssetDecoder> ResourceCache<D> {
    pub fn new(decoder: D) -> Self {
        Self::with_converter(decoder, Box::new(LinearConverter))
    }

    pub fn with_converter(decoder: D, converter: Box<dyn AudioConverter>) -> Self {
        Self {
            decoder,
            converter,
            entries: HashMap::new(),
        }
    }

    /// Resolves every stimulus of `timeline` to a resource, decoding each
    /// distinct asset once. Failures are absorbed: the failed entry is cached
    /// as empty and never retried.
    pub fn load(&mut self, timeline: &Timeline, assets_dir: &Path) -> Vec<Resource> {
        let resources: Vec<Resource> = timeline
            .iter()
            .map(|stimulus| self.resolve(stimulus, assets_dir))
            .collect();

        let summary = self.summary();
        tracing::info!(
            images = summary.images,
            sounds = summary.sounds,
            texts = summary.texts,
            failed = summary.failed,
            estimated_mb = summary.estimated_bytes as f64 / (1024.0 * 1024.0),
            "resources loaded"
        );
        resources
    }

    fn resolve(&mut self, stimulus: &Stimulus, assets_dir: &Path) -> Resource {
        let key = (stimulus.kind, stimulus.reference.clone());
        if let Some(entry) = self.entries.get(&key) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(self.decode(stimulus, assets_dir));
        self.entries.insert(key, Arc::clone(&entry));
        entry
    }

    fn decode(&mut self, stimulus: &Stimulus, assets_dir: &Path) -> CacheEntry {
        let reference = stimulus.reference.as_str();
        match stimulus.kind {
            StimulusKind::Image => {
                let path = asset_path(assets_dir, reference);
                match self.decoder.decode_image(&path) {
                    Ok(drawable) => CacheEntry {
                        drawable: Some(drawable),
                        sound: None,
                    },
                    Err(err) => {
                        tracing::warn!(path = %path.display(), "failed to load image: {err}");
                        CacheEntry::default()
                    }
                }
            }
            StimulusKind::Text => match self.decoder.render_text(reference) {
                Ok(drawable) => CacheEntry {
                    drawable: Some(drawable),
                    sound: None,
                },
                Err(err) => {
                    tracing::warn!(text = reference, "failed to render text: {err}");
                    CacheEntry::default()
                }
            },
            StimulusKind::Sound => {
                let path = asset_path(assets_dir, reference);
                match self.decoder.decode_wav(&path) {
                    Ok(buffer) => CacheEntry {
                        drawable: None,
                        sound: Some(Arc::new(self.normalise(buffer, &path))),
                    },
                    Err(err) => {
                        tracing::warn!(path = %path.display(), "failed to load sound: {err}");
                        CacheEntry::default()
                    }
                }
            }
        }
    }

    fn normalise(&self, buffer: SoundBuffer, path: &Path) -> SoundBuffer {
        if buffer.is_target_format() {
            return buffer;
        }
        match self.converter.convert(&buffer, TARGET_SPEC) {
            Ok(converted) => converted,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    spec = ?buffer.spec(),
                    "audio conversion failed, keeping original format: {err}"
                );
                buffer
            }
        }
    }

    /// Number of distinct cached keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> LoadSummary {
        let mut summary = LoadSummary::default();
        for ((kind, _), entry) in &self.entries {
            if !entry.is_loaded() {
                summary.failed += 1;
                continue;
            }
            match kind {
                StimulusKind::Image => summary.images += 1,
                StimulusKind::Text => summary.texts += 1,
                StimulusKind::Sound => summary.sounds += 1,
            }
            summary.estimated_bytes += entry.drawable.map_or(0, |d| d.estimated_bytes())
                + entry.sound.as_ref().map_or(0, |s| s.len_bytes());
        }
        summary
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Direct access for assets outside the timeline, such as splash screens.
    /// Drawables obtained this way are not released by the cache.
    pub fn decoder_mut(&mut self) -> &mut D {
        &mut self.decoder
    }
}

impl<D: AssetDecoder> Drop for ResourceCache<D> {
    fn drop(&mut self) {
        for entry in self.entries.values() {
            if let Some(drawable) = entry.drawable {
                self.decoder.release(drawable.id);
            }
        }
    }
}

fn asset_path(assets_dir: &Path, reference: &str) -> PathBuf {
    assets_dir.join(reference)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        audio::{AudioSpec, SampleFormat},
        PresenterError,
    };

    #[derive(Default)]
    struct Calls {
        images: Vec<PathBuf>,
        texts: Vec<String>,
        sounds: Vec<PathBuf>,
        released: Vec<TextureId>,
    }

    /// Decoder that succeeds for every reference not containing "missing".
    #[derive(Clone, Default)]
    struct CountingDecoder {
        calls: Rc<RefCell<Calls>>,
        next_id: u64,
        sound_spec: Option<AudioSpec>,
    }

    impl CountingDecoder {
        fn texture(&mut self) -> Drawable {
            self.next_id += 1;
            Drawable {
                id: TextureId(self.next_id),
                width: 10,
                height: 5,
            }
        }
    }

    impl AssetDecoder for CountingDecoder {
        fn decode_image(&mut self, path: &Path) -> Result<Drawable> {
            self.calls.borrow_mut().images.push(path.to_path_buf());
            if path.to_string_lossy().contains("missing") {
                return Err(PresenterError::msg("no such file"));
            }
            Ok(self.texture())
        }

        fn render_text(&mut self, text: &str) -> Result<Drawable> {
            self.calls.borrow_mut().texts.push(text.to_string());
            Ok(self.texture())
        }

        fn decode_wav(&mut self, path: &Path) -> Result<SoundBuffer> {
            self.calls.borrow_mut().sounds.push(path.to_path_buf());
            if path.to_string_lossy().contains("missing") {
                return Err(PresenterError::msg("no such file"));
            }
            Ok(SoundBuffer::from_i16(
                self.sound_spec.unwrap_or(TARGET_SPEC),
                &[1, 2, 3, 4],
            ))
        }

        fn release(&mut self, texture: TextureId) {
            self.calls.borrow_mut().released.push(texture);
        }
    }

    struct FailingConverter;

    impl AudioConverter for FailingConverter {
        fn convert(&self, _: &SoundBuffer, _: AudioSpec) -> Result<SoundBuffer> {
            Err(PresenterError::msg("unsupported"))
        }
    }

    fn timeline(rows: &[(StimulusKind, &str)]) -> Timeline {
        Timeline::new(
            rows.iter()
                .enumerate()
                .map(|(i, (kind, reference))| Stimulus::new(i as u64 * 100, 50, *kind, *reference))
                .collect(),
        )
    }

    #[test]
    fn duplicates_decode_once_and_share_entry() {
        let decoder = CountingDecoder::default();
        let calls = Rc::clone(&decoder.calls);
        let mut cache = ResourceCache::new(decoder);

        let timeline = timeline(&[
            (StimulusKind::Image, "a.png"),
            (StimulusKind::Text, "a.png"),
            (StimulusKind::Image, "a.png"),
        ]);
        let resources = cache.load(&timeline, Path::new("stim"));

        assert_eq!(resources.len(), 3);
        assert!(Arc::ptr_eq(&resources[0], &resources[2]));
        assert!(!Arc::ptr_eq(&resources[0], &resources[1]));
        assert_eq!(cache.len(), 2);
        assert_eq!(calls.borrow().images, vec![PathBuf::from("stim/a.png")]);
        assert_eq!(calls.borrow().texts, vec!["a.png".to_string()]);
    }

    #[test]
    fn failures_are_cached_and_not_retried() {
        let decoder = CountingDecoder::default();
        let calls = Rc::clone(&decoder.calls);
        let mut cache = ResourceCache::new(decoder);

        let timeline = timeline(&[
            (StimulusKind::Sound, "missing.wav"),
            (StimulusKind::Sound, "missing.wav"),
            (StimulusKind::Image, "missing.png"),
        ]);
        let resources = cache.load(&timeline, Path::new("."));

        assert!(resources.iter().all(|r| !r.is_loaded()));
        assert_eq!(calls.borrow().sounds.len(), 1);

        let again = cache.load(&timeline, Path::new("."));
        assert_eq!(again.len(), 3);
        assert_eq!(calls.borrow().sounds.len(), 1);
        assert_eq!(calls.borrow().images.len(), 1);
        assert_eq!(cache.summary().failed, 2);
    }

    #[test]
    fn foreign_sounds_are_converted() {
        let decoder = CountingDecoder {
            sound_spec: Some(AudioSpec {
                format: SampleFormat::S16,
                channels: 1,
                sample_rate: 44_100,
            }),
            ..CountingDecoder::default()
        };
        let mut cache = ResourceCache::new(decoder);
        let resources = cache.load(&timeline(&[(StimulusKind::Sound, "beep.wav")]), Path::new("."));

        let sound = resources[0].sound.as_ref().unwrap();
        assert!(sound.is_target_format());
        assert_eq!(sound.len_samples(), 8);
    }

    #[test]
    fn failed_conversion_keeps_original_buffer() {
        let spec = AudioSpec {
            format: SampleFormat::S16,
            channels: 1,
            sample_rate: 8_000,
        };
        let decoder = CountingDecoder {
            sound_spec: Some(spec),
            ..CountingDecoder::default()
        };
        let mut cache = ResourceCache::with_converter(decoder, Box::new(FailingConverter));
        let resources = cache.load(&timeline(&[(StimulusKind::Sound, "beep.wav")]), Path::new("."));

        let sound = resources[0].sound.as_ref().unwrap();
        assert_eq!(sound.spec(), spec);
        assert_eq!(sound.len_samples(), 4);
    }

    #[test]
    fn summary_counts_by_kind() {
        let mut cache = ResourceCache::new(CountingDecoder::default());
        cache.load(
            &timeline(&[
                (StimulusKind::Image, "a.png"),
                (StimulusKind::Image, "b.png"),
                (StimulusKind::Text, "hello"),
                (StimulusKind::Sound, "beep.wav"),
            ]),
            Path::new("."),
        );

        let summary = cache.summary();
        assert_eq!(
            summary,
            LoadSummary {
                images: 2,
                sounds: 1,
                texts: 1,
                failed: 0,
                estimated_bytes: 3 * 10 * 5 * 4 + 8,
            }
        );
    }

    #[test]
    fn drop_releases_each_drawable_once() {
        let decoder = CountingDecoder::default();
        let calls = Rc::clone(&decoder.calls);
        {
            let mut cache = ResourceCache::new(decoder);
            cache.load(
                &timeline(&[
                    (StimulusKind::Image, "a.png"),
                    (StimulusKind::Image, "a.png"),
                    (StimulusKind::Text, "hi"),
                    (StimulusKind::Sound, "beep.wav"),
                    (StimulusKind::Image, "missing.png"),
                ]),
                Path::new("."),
            );
        }

        let mut released = calls.borrow().released.clone();
        released.sort();
        assert_eq!(released, vec![TextureId(1), TextureId(2)]);
    }
}
