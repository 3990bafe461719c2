// error.rs - error taxonomy for the viewer core

use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning a picked file into an RGBA pixel buffer.
///
/// None of these are fatal: the renderer keeps the previously bound texture
/// and the host shows the message in the status bar.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
