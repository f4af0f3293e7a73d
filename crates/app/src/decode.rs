use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use presenter_core::{
    AssetDecoder, AudioSpec, Color, Drawable, PresenterError, Result, SampleFormat, SoundBuffer,
    TextureId,
};

#[cfg(target_os = "windows")]
const SYSTEM_FONTS: &[&str] = &["C:\\Windows\\Fonts\\arial.ttf"];
#[cfg(target_os = "macos")]
const SYSTEM_FONTS: &[&str] = &["/System/Library/Fonts/Helvetica.ttc"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
];

/// First `.ttf`/`.ttc` in `./fonts`, else the first well-known system font
/// that exists.
pub fn default_font_path() -> Option<PathBuf> {
    find_font_in(Path::new("fonts")).or_else(|| {
        SYSTEM_FONTS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.is_file())
    })
}

fn find_font_in(dir: &Path) -> Option<PathBuf> {
    let mut fonts: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("ttc"))
        })
        .collect();
    fonts.sort();
    fonts.into_iter().next()
}

/// Decodes stimuli from disk: pictures through `image`, WAV through `hound`
/// and text through `ab_glyph`. Decoded pixels are kept until released.
pub struct FileDecoder {
    font: Option<FontVec>,
    font_size: f32,
    text_color: Color,
    textures: HashMap<TextureId, RgbaImage>,
    next_id: u64,
}

impl FileDecoder {
    /// A missing or unreadable font only disables text stimuli.
    pub fn new(font_path: Option<&Path>, font_size: f32, text_color: Color) -> Self {
        let font = font_path.and_then(|path| match load_font(path) {
            Ok(font) => {
                tracing::debug!(path = %path.display(), "font loaded");
                Some(font)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), "text stimuli disabled: {err}");
                None
            }
        });
        if font_path.is_none() {
            tracing::warn!("no font found, text stimuli disabled");
        }
        Self {
            font,
            font_size,
            text_color,
            textures: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn texture(&self, id: TextureId) -> Option<&RgbaImage> {
        self.textures.get(&id)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn store(&mut self, pixels: RgbaImage) -> Drawable {
        self.next_id += 1;
        let id = TextureId(self.next_id);
        let drawable = Drawable {
            id,
            width: pixels.width(),
            height: pixels.height(),
        };
        self.textures.insert(id, pixels);
        drawable
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = fs::read(path)?;
    FontVec::try_from_vec(bytes).map_err(|err| PresenterError::msg(err.to_string()))
}

impl AssetDecoder for FileDecoder {
    fn decode_image(&mut self, path: &Path) -> Result<Drawable> {
        let pixels = image::open(path)
            .map_err(|err| PresenterError::msg(format!("{}: {err}", path.display())))?
            .to_rgba8();
        Ok(self.store(pixels))
    }

    fn render_text(&mut self, text: &str) -> Result<Drawable> {
        let font = self
            .font
            .as_ref()
            .ok_or_else(|| PresenterError::msg("no font available"))?;
        let pixels = rasterise(font, self.font_size, self.text_color, text);
        Ok(self.store(pixels))
    }

    fn decode_wav(&mut self, path: &Path) -> Result<SoundBuffer> {
        let wav_err = |err: hound::Error| PresenterError::msg(format!("{}: {err}", path.display()));
        let mut reader = hound::WavReader::open(path).map_err(wav_err)?;
        let wav = reader.spec();

        match wav.sample_format {
            hound::SampleFormat::Float => {
                let samples = reader
                    .samples::<f32>()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(wav_err)?;
                let spec = AudioSpec {
                    format: SampleFormat::F32,
                    channels: wav.channels,
                    sample_rate: wav.sample_rate,
                };
                Ok(SoundBuffer::from_f32(spec, &samples))
            }
            hound::SampleFormat::Int => {
                let bits = u32::from(wav.bits_per_sample);
                let samples = reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|s| to_s16(s, bits)))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(wav_err)?;
                let spec = AudioSpec {
                    format: SampleFormat::S16,
                    channels: wav.channels,
                    sample_rate: wav.sample_rate,
                };
                Ok(SoundBuffer::from_i16(spec, &samples))
            }
        }
    }

    fn release(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }
}

/// Rescales an integer PCM sample of `bits` width to 16 bits.
fn to_s16(sample: i32, bits: u32) -> i16 {
    let scaled = if bits > 16 {
        sample >> (bits - 16)
    } else {
        sample << (16 - bits)
    };
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Renders a single line of `text` onto a transparent image sized to fit.
fn rasterise(font: &FontVec, size: f32, color: Color, text: &str) -> RgbaImage {
    let scaled = font.as_scaled(PxScale::from(size));
    let ascent = scaled.ascent();

    let mut glyphs = Vec::with_capacity(text.len());
    let mut pen_x = 0.0f32;
    let mut prev = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = prev {
            pen_x += scaled.kern(prev, id);
        }
        glyphs.push(id.with_scale_and_position(scaled.scale(), point(pen_x, ascent)));
        pen_x += scaled.h_advance(id);
        prev = Some(id);
    }

    let width = pen_x.ceil().max(1.0) as u32;
    let height = (ascent - scaled.descent()).ceil().max(1.0) as u32;
    let mut pixels = RgbaImage::new(width, height);

    for glyph in glyphs {
        let Some(outlined) = scaled.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|x, y, coverage| {
            let px = bounds.min.x as i32 + x as i32;
            let py = bounds.min.y as i32 + y as i32;
            if px < 0 || py < 0 || px as u32 >= width || py as u32 >= height {
                return;
            }
            let alpha = (coverage.clamp(0.0, 1.0) * color.a as f32) as u8;
            let current = pixels.get_pixel(px as u32, py as u32)[3];
            pixels.put_pixel(
                px as u32,
                py as u32,
                Rgba([color.r, color.g, color.b, alpha.max(current)]),
            );
        });
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("presenter-decode-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn integer_widths_rescale_to_16_bits() {
        assert_eq!(to_s16(-128, 8), i16::MIN);
        assert_eq!(to_s16(127, 8), 127 << 8);
        assert_eq!(to_s16(1234, 16), 1234);
        assert_eq!(to_s16(8_388_607, 24), i16::MAX);
    }

    #[test]
    fn decodes_wav_files() {
        let dir = scratch("wav");
        let path = dir.join("beep.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for sample in [0i16, 1000, -1000, 32767] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let mut decoder = FileDecoder::new(None, 24.0, Color::WHITE);
        let sound = decoder.decode_wav(&path).unwrap();
        let _ = fs::remove_dir_all(&dir);

        assert_eq!(sound.spec().channels, 1);
        assert_eq!(sound.spec().sample_rate, 22_050);
        assert_eq!(
            sound.s16_samples(0..sound.len_bytes()).collect::<Vec<_>>(),
            vec![0, 1000, -1000, 32767]
        );
    }

    #[test]
    fn decodes_and_releases_images() {
        let dir = scratch("img");
        let path = dir.join("a.png");
        RgbaImage::from_pixel(12, 7, Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let mut decoder = FileDecoder::new(None, 24.0, Color::WHITE);
        let drawable = decoder.decode_image(&path).unwrap();
        let _ = fs::remove_dir_all(&dir);

        assert_eq!((drawable.width, drawable.height), (12, 7));
        assert_eq!(decoder.live_textures(), 1);
        decoder.release(drawable.id);
        assert_eq!(decoder.live_textures(), 0);
    }

    #[test]
    fn missing_files_and_fonts_are_errors() {
        let mut decoder = FileDecoder::new(None, 24.0, Color::WHITE);
        assert!(decoder.decode_image(Path::new("does/not/exist.png")).is_err());
        assert!(decoder.decode_wav(Path::new("does/not/exist.wav")).is_err());
        assert!(decoder.render_text("hello").is_err());
    }

    #[test]
    fn renders_text_when_a_font_is_installed() {
        let Some(path) = default_font_path() else {
            return;
        };
        let mut decoder = FileDecoder::new(Some(&path), 32.0, Color::WHITE);
        let short = decoder.render_text("Hi").unwrap();
        let long = decoder.render_text("Hello there").unwrap();

        assert!(long.width > short.width);
        assert_eq!(short.height, long.height);
        let pixels = decoder.texture(long.id).unwrap();
        assert!(pixels.pixels().any(|p| p[3] > 0));
    }

    #[test]
    fn font_directory_is_searched_for_font_files() {
        let dir = scratch("fonts");
        fs::write(dir.join("readme.txt"), "x").unwrap();
        fs::write(dir.join("b.TTF"), "x").unwrap();
        fs::write(dir.join("a.ttc"), "x").unwrap();

        let found = find_font_in(&dir);
        let _ = fs::remove_dir_all(&dir);
        assert_eq!(found.unwrap().file_name().unwrap(), "a.ttc");
    }
}
