use {
    crate::{paths, warp_util::HttpError},
    anyhow::{Error, Result},
    bytes::{Bytes, BytesMut},
    futures::{Stream, TryStreamExt},
    http::{header, Response},
    hyper::Body,
    image::{imageops::FilterType, GenericImageView, ImageError, ImageFormat},
    lazy_static::lazy_static,
    regex::Regex,
    std::path::{Path, PathBuf},
    tokio::{
        fs::{self, File as AsyncFile},
        io::AsyncRead,
        sync::RwLock as AsyncRwLock,
        task,
    },
    tokio_util::codec::{BytesCodec, FramedRead},
    tracing::info,
};

/// Thumbnails are bounded to this size, preserving aspect ratio
pub const THUMBNAIL_BOUNDS: (u32, u32) = (100, 100);

/// Cache filename for one archive file's thumbnail, derived from its root-relative path with every
/// character outside `[a-zA-Z0-9_.-]` mapped to `_` so nested paths flatten into one directory.
fn cache_filename(relative: &str) -> String {
    lazy_static! {
        static ref UNSAFE_PATTERN: Regex = Regex::new("[^a-zA-Z0-9_.-]").unwrap();
    }

    format!("{}_thumb.jpg", UNSAFE_PATTERN.replace_all(relative, "_"))
}

/// Resolve a client-supplied path to a regular file under the archive root.
async fn resolve_file(archive_dir: &str, path: &str) -> Result<PathBuf> {
    let resolved = paths::resolve_under(archive_dir, path).await?;

    if !fs::metadata(&resolved).await.map(|m| m.is_file()).unwrap_or(false) {
        return Err(HttpError::not_found("file not found").into());
    }

    Ok(resolved)
}

fn as_stream(input: impl AsyncRead + Send) -> impl Stream<Item = Result<Bytes>> + Send {
    FramedRead::new(input, BytesCodec::new())
        .map_ok(BytesMut::freeze)
        .map_err(Error::from)
}

/// Stream one file from disk as a download attachment, named after its final path component.
pub async fn send_attachment(path: &Path) -> Result<Response<Body>> {
    let file = AsyncFile::open(path).await?;
    let length = file.metadata().await?.len();

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().replace('"', ""))
        .unwrap_or_default();

    Ok(crate::response()
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::wrap_stream(as_stream(file)))?)
}

/// Handle a GET /download request: stream one archive file to the client as an attachment.
pub async fn download(archive_dir: &str, path: &str) -> Result<Response<Body>> {
    let resolved = resolve_file(archive_dir, path).await?;

    info!("serving file for download: {}", resolved.display());

    send_attachment(&resolved).await
}

async fn thumbnail_file(
    image_lock: &AsyncRwLock<()>,
    archive_dir: &str,
    path: &str,
    cache_dir: &str,
) -> Result<(AsyncFile, u64)> {
    let original = resolve_file(archive_dir, path).await?;

    let root = fs::canonicalize(archive_dir).await?;

    let relative = original
        .strip_prefix(&root)
        .unwrap_or(&original)
        .to_string_lossy()
        .into_owned();

    let filename = Path::new(cache_dir).join(cache_filename(&relative));

    let read = image_lock.read().await;

    let result = AsyncFile::open(&filename).await;

    Ok(if let Ok(file) = result {
        let length = file.metadata().await?.len();

        (file, length)
    } else {
        drop(read);

        let _write = image_lock.write().await;

        fs::create_dir_all(cache_dir).await?;

        info!(
            "generating thumbnail for {} at {}",
            original.display(),
            filename.display()
        );

        let content = fs::read(&original).await?;

        task::block_in_place(|| {
            let image = image::load_from_memory(&content).map_err(|e| -> Error {
                if matches!(e, ImageError::Unsupported(_)) {
                    HttpError::not_found("not a recognized image").into()
                } else {
                    e.into()
                }
            })?;

            let (width, height) = image.dimensions();

            // never upscale; small originals are served at their own size
            let thumbnail = if width > THUMBNAIL_BOUNDS.0 || height > THUMBNAIL_BOUNDS.1 {
                image.resize(THUMBNAIL_BOUNDS.0, THUMBNAIL_BOUNDS.1, FilterType::Lanczos3)
            } else {
                image
            };

            let temp = crate::backup::temp_sibling(&filename);

            // JPEG has no alpha channel, so flatten whatever mode the original uses
            if let Err(e) = thumbnail.to_rgb8().save_with_format(&temp, ImageFormat::Jpeg) {
                let _ = std::fs::remove_file(&temp);

                return Err(e.into());
            }

            std::fs::rename(&temp, &filename)?;

            Ok::<_, Error>(())
        })?;

        let file = AsyncFile::open(&filename).await?;
        let length = file.metadata().await?.len();

        (file, length)
    })
}

/// Handle a GET /thumbnail request: serve a bounded JPEG thumbnail for one archive image, generating and
/// caching it on first request.
pub async fn thumbnail(
    image_lock: &AsyncRwLock<()>,
    archive_dir: &str,
    path: &str,
    cache_dir: &str,
) -> Result<Response<Body>> {
    let (file, length) = thumbnail_file(image_lock, archive_dir, path, cache_dir).await?;

    Ok(crate::response()
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(Body::wrap_stream(as_stream(file)))?)
}

/// Generate and cache the thumbnail for one archive image without serving it.  Used by the admin tool to
/// warm the cache ahead of traffic.
pub async fn preload_thumbnail(
    image_lock: &AsyncRwLock<()>,
    archive_dir: &str,
    path: &str,
    cache_dir: &str,
) -> Result<()> {
    thumbnail_file(image_lock, archive_dir, path, cache_dir).await?;

    Ok(())
}
