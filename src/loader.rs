// loader.rs - background decoding of equirectangular source images

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::thread;

use image::io::Reader as ImageReader;
use image::GenericImageView;

use crate::error::LoadError;

/// Decoded source image together with where it came from. Immutable once
/// produced; the renderer consumes it wholesale.
pub struct SourceImage {
    pub path: PathBuf,
    pub pixels: image::RgbaImage,
}

pub type LoadResult = Result<SourceImage, LoadError>;

/// Decodes `path` into an RGBA buffer.
///
/// Decode limits are lifted on purpose: photospheres are routinely larger
/// than the `image` crate's default pixel cap, and the renderer downscales
/// to the GPU texture limit afterwards anyway.
pub fn load_image(path: &PathBuf) -> LoadResult {
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.clone(),
        source,
    })?;

    let decoded = ImageReader::new(BufReader::new(file))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)
        .and_then(|mut reader| {
            reader.no_limits();
            reader.decode()
        })
        .map_err(|source| LoadError::Decode {
            path: path.clone(),
            source,
        })?;

    let (w, h) = decoded.dimensions();
    log::info!("loaded {:?} ({}x{})", path, w, h);

    Ok(SourceImage {
        path: path.clone(),
        pixels: decoded.to_rgba8(),
    })
}

/// Decodes on a spawned thread so multi-megapixel images never stall input
/// or painting; the result arrives over `tx` and is picked up by the event
/// loop's channel poll.
pub fn spawn_load(path: PathBuf, tx: Sender<LoadResult>) {
    thread::spawn(move || {
        log::info!("loading {:?} in background", path);
        let result = load_image(&path);
        if let Err(err) = &result {
            log::warn!("{err}");
        }
        if tx.send(result).is_err() {
            log::warn!("viewer shut down before load finished");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_an_open_error() {
        let path = PathBuf::from("/definitely/not/here.jpg");
        match load_image(&path) {
            Err(LoadError::Open { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected open error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let dir = std::env::temp_dir();
        let path = dir.join("photosphere_loader_test_garbage.png");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"not an image at all").unwrap();
        drop(f);

        assert!(matches!(load_image(&path), Err(LoadError::Decode { .. })));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn decodes_a_tiny_png() {
        let dir = std::env::temp_dir();
        let path = dir.join("photosphere_loader_test_tiny.png");
        let img = image::RgbaImage::from_pixel(4, 2, image::Rgba([10, 20, 30, 255]));
        img.save(&path).unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.pixels.dimensions(), (4, 2));
        assert_eq!(loaded.pixels.get_pixel(0, 0), &image::Rgba([10, 20, 30, 255]));
        let _ = std::fs::remove_file(&path);
    }
}
