//! Thumbnail generator - produces and stores the thumbnail of one object
//!
//! Workflow for a single eligible object:
//! 1. Download the original bytes
//! 2. Decode, resize to the configured width (aspect ratio kept), re-encode
//! 3. Upload the result under the thumbnail folder
//! 4. Tag the original with `thumbnailGenerated=true`
//!
//! Decoding and encoding run on the blocking thread pool.

use super::{ThumbnailError, derived_key};
use crate::{
    models::{file_metadata::FileMetadata, metadata::THUMBNAIL_GENERATED_TAG, object::ObjectRecord},
    services::storage_service::ObjectStore,
};
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, imageops::FilterType};
use std::{collections::BTreeMap, io::Cursor, sync::Arc};
use tracing::{debug, info, warn};

const JPEG_QUALITY: u8 = 85;

/// Configuration for thumbnail generation
#[derive(Clone, Debug)]
pub struct ThumbnailConfig {
    /// Target width in pixels; height follows the source aspect ratio.
    pub width: u32,
    /// Folder (single path segment) thumbnails are written under.
    pub folder: String,
    /// Base used to build public URLs of created thumbnails.
    pub public_base_url: String,
}

/// Encodings a thumbnail can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Bmp,
    Gif,
    Tiff,
}

impl OutputFormat {
    /// Format matching the source content-type subtype, or JPEG when no
    /// encoder exists for it.
    pub fn for_content_type(content_type: Option<&str>) -> Self {
        let subtype = content_type
            .and_then(|ct| ct.split(';').next())
            .and_then(|ct| ct.trim().rsplit_once('/'))
            .map(|(_, subtype)| subtype.to_ascii_lowercase());

        match subtype.as_deref() {
            Some("png") => OutputFormat::Png,
            Some("bmp" | "x-ms-bmp") => OutputFormat::Bmp,
            Some("gif") => OutputFormat::Gif,
            Some("tiff" | "tif") => OutputFormat::Tiff,
            _ => OutputFormat::Jpeg,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Gif => "gif",
            OutputFormat::Tiff => "tiff",
        }
    }

    pub fn content_type(self) -> String {
        format!("image/{}", self.name())
    }

    fn encode(self, img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        match self {
            OutputFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
                .write_to(&mut buf, ImageOutputFormat::Jpeg(JPEG_QUALITY))?,
            OutputFormat::Png => img.write_to(&mut buf, ImageOutputFormat::Png)?,
            OutputFormat::Bmp => DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut buf, ImageOutputFormat::Bmp)?,
            OutputFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut buf, ImageOutputFormat::Gif)?,
            OutputFormat::Tiff => DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut buf, ImageOutputFormat::Tiff)?,
        }
        Ok(buf.into_inner())
    }
}

pub struct ThumbnailGenerator {
    store: Arc<dyn ObjectStore>,
    config: ThumbnailConfig,
}

impl ThumbnailGenerator {
    pub fn new(store: Arc<dyn ObjectStore>, config: ThumbnailConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    /// Generate, store and record the thumbnail of `object`.
    ///
    /// Returns `Ok(None)` when the bytes are not a decodable image. Any other
    /// failure is returned for the caller to log; nothing is retried here.
    pub async fn process(
        &self,
        bucket: &str,
        object: &ObjectRecord,
    ) -> Result<Option<FileMetadata>, ThumbnailError> {
        let original = self.store.get_object(bucket, &object.name).await?;
        let format = OutputFormat::for_content_type(object.content_type.as_deref());
        let width = self.config.width;

        let encoded = tokio::task::spawn_blocking(move || render(&original, width, format)).await??;
        let Some(encoded) = encoded else {
            warn!(object = %object.name, "Skipping - not a valid image");
            return Ok(None);
        };

        let key = derived_key(&self.config.folder, &object.name);
        let created = self
            .store
            .put_object(bucket, &key, Bytes::from(encoded), &format.content_type())
            .await?;

        let marker = BTreeMap::from([(THUMBNAIL_GENERATED_TAG.to_string(), "true".to_string())]);
        self.store.merge_tags(bucket, &object.name, &marker).await?;

        info!(
            object = %object.name,
            thumbnail = %created.name,
            size = created.size_bytes,
            "Thumbnail created"
        );
        Ok(Some(FileMetadata::from_record(
            &created,
            &self.config.public_base_url,
        )))
    }
}

/// Decode, resize and encode. `Ok(None)` means the input is not an image.
fn render(
    original: &[u8],
    width: u32,
    format: OutputFormat,
) -> image::ImageResult<Option<Vec<u8>>> {
    let img = match image::load_from_memory(original) {
        Ok(img) => img,
        Err(err) => {
            debug!(error = %err, "image decode failed");
            return Ok(None);
        }
    };

    let thumbnail = resize_to_width(&img, width);
    format.encode(&thumbnail).map(Some)
}

/// Scale to `width` keeping the aspect ratio; narrower images are kept as-is.
fn resize_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w <= width || width == 0 {
        return img.clone();
    }
    let new_h = ((u64::from(orig_h) * u64::from(width) + u64::from(orig_w) / 2) / u64::from(orig_w))
        .max(1) as u32;
    img.resize_exact(width, new_h, FilterType::Lanczos3)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::memory_store::MemoryObjectStore;
    use image::{ImageFormat, Rgb, RgbImage};

    pub(crate) fn image_bytes(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        image_bytes(width, height, ImageOutputFormat::Jpeg(90))
    }

    fn generator(store: &Arc<MemoryObjectStore>, width: u32) -> ThumbnailGenerator {
        ThumbnailGenerator::new(
            store.clone(),
            ThumbnailConfig {
                width,
                folder: "thumbnails".into(),
                public_base_url: "https://storage.example.com".into(),
            },
        )
    }

    #[test]
    fn output_format_follows_subtype_with_jpeg_fallback() {
        assert_eq!(OutputFormat::for_content_type(Some("image/png")), OutputFormat::Png);
        assert_eq!(OutputFormat::for_content_type(Some("image/jpg")), OutputFormat::Jpeg);
        assert_eq!(
            OutputFormat::for_content_type(Some("image/PNG; charset=binary")),
            OutputFormat::Png
        );
        assert_eq!(OutputFormat::for_content_type(Some("image/gif")), OutputFormat::Gif);
        assert_eq!(OutputFormat::for_content_type(Some("image/tiff")), OutputFormat::Tiff);
        assert_eq!(OutputFormat::for_content_type(Some("image/webp")), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::for_content_type(None), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::Jpeg.content_type(), "image/jpeg");
    }

    #[tokio::test]
    async fn creates_scaled_thumbnail_and_tags_source() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        store.insert("photos", "a.jpg", "image/jpeg", jpeg_bytes(400, 200), &[("owner", "alice")]);

        let source = store.record("photos", "a.jpg").unwrap();
        let created = generator(&store, 100)
            .process("photos", &source)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.name, "thumbnails/a.jpg");
        assert_eq!(created.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(created.url, "https://storage.example.com/photos/thumbnails/a.jpg");

        let thumb = store.data("photos", "thumbnails/a.jpg").unwrap();
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&thumb).unwrap().dimensions(), (100, 50));

        let tagged = store.record("photos", "a.jpg").unwrap();
        assert_eq!(tagged.tag("thumbnailGenerated"), Some("true"));
        assert_eq!(tagged.tag("owner"), Some("alice"));
    }

    #[tokio::test]
    async fn keeps_png_and_does_not_upscale() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        let png = image_bytes(60, 30, ImageOutputFormat::Png);
        store.insert("photos", "small.png", "image/png", png, &[]);

        let source = store.record("photos", "small.png").unwrap();
        let created = generator(&store, 150)
            .process("photos", &source)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.content_type.as_deref(), Some("image/png"));
        let thumb = store.data("photos", "thumbnails/small.png").unwrap();
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Png);
        assert_eq!(image::load_from_memory(&thumb).unwrap().dimensions(), (60, 30));
    }

    #[tokio::test]
    async fn keeps_gif_when_an_encoder_exists() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        let source_img = image::load_from_memory(&image_bytes(300, 150, ImageOutputFormat::Png)).unwrap();
        let gif = OutputFormat::Gif.encode(&source_img).unwrap();
        store.insert("photos", "anim.gif", "image/gif", gif, &[]);

        let source = store.record("photos", "anim.gif").unwrap();
        let created = generator(&store, 100)
            .process("photos", &source)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.content_type.as_deref(), Some("image/gif"));
        let thumb = store.data("photos", "thumbnails/anim.gif").unwrap();
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Gif);
        assert_eq!(image::load_from_memory(&thumb).unwrap().dimensions(), (100, 50));
    }

    #[tokio::test]
    async fn unsupported_subtype_falls_back_to_jpeg() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        let png = image_bytes(300, 300, ImageOutputFormat::Png);
        store.insert("photos", "pic.webp", "image/webp", png, &[]);

        let source = store.record("photos", "pic.webp").unwrap();
        let created = generator(&store, 150)
            .process("photos", &source)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.name, "thumbnails/pic.webp");
        assert_eq!(created.content_type.as_deref(), Some("image/jpeg"));
        let thumb = store.data("photos", "thumbnails/pic.webp").unwrap();
        assert_eq!(image::load_from_memory(&thumb).unwrap().dimensions(), (150, 150));
    }

    #[tokio::test]
    async fn undecodable_bytes_are_skipped_without_side_effects() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        store.insert("photos", "broken.jpg", "image/jpeg", "definitely not a jpeg", &[]);

        let source = store.record("photos", "broken.jpg").unwrap();
        let result = generator(&store, 100).process("photos", &source).await.unwrap();

        assert!(result.is_none());
        assert!(store.record("photos", "thumbnails/broken.jpg").is_none());
        assert!(store.record("photos", "broken.jpg").unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn store_failures_are_reported() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        store.insert("photos", "a.jpg", "image/jpeg", jpeg_bytes(200, 100), &[]);
        store.fail_tag_writes_of("a.jpg");

        let source = store.record("photos", "a.jpg").unwrap();
        let err = generator(&store, 100)
            .process("photos", &source)
            .await
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Storage(_)));
    }
}
