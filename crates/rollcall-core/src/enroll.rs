//! Enrollment store: builds the gallery from a directory of reference images.
//!
//! One image per person, named `<identity>.{jpg,jpeg,png}`. Reference images
//! are assumed single-subject: only the first detected face is used, any
//! others are ignored. Files are processed in file-name order so the gallery
//! order (and therefore match tie-breaking) is deterministic.

use crate::embedder::FaceEmbedder;
use crate::frame::Frame;
use crate::types::{Gallery, Identity};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Accepted reference image extensions (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("enrollment directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("failed to read enrollment directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no identities enrolled from {0}: add one single-face image per person")]
    EmptyGallery(PathBuf),
}

/// Why a reference image contributed no identity.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoFace,
    Unreadable(String),
    ModelFailed(String),
    /// Embedding length differs from the identities already enrolled.
    DimensionMismatch { expected: usize, found: usize },
}

/// Enrollment outcome with per-file diagnostics.
#[derive(Debug)]
pub struct EnrollReport {
    pub gallery: Gallery,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    /// Names whose earlier entry was overwritten by a later file with the same stem.
    pub replaced: Vec<String>,
}

/// Load the gallery from `dir`, discarding per-file diagnostics.
pub fn load_gallery<E>(dir: &Path, embedder: &mut E) -> Result<Gallery, EnrollError>
where
    E: FaceEmbedder + ?Sized,
{
    enroll(dir, embedder).map(|report| report.gallery)
}

/// Enroll every reference image in `dir`.
///
/// Missing directory and empty result are errors; individual files that
/// cannot be read or contain no face are skipped with a warning.
pub fn enroll<E>(dir: &Path, embedder: &mut E) -> Result<EnrollReport, EnrollError>
where
    E: FaceEmbedder + ?Sized,
{
    if !dir.is_dir() {
        return Err(EnrollError::DirectoryNotFound(dir.to_path_buf()));
    }
    tracing::info!(dir = %dir.display(), "loading known faces");

    let io_err = |source| EnrollError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && has_image_extension(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut identities: Vec<Identity> = Vec::new();
    let mut skipped = Vec::new();
    let mut replaced = Vec::new();

    for path in paths {
        let Some(name) = identity_name(&path) else {
            continue;
        };

        let embedding = match embed_reference(&path, embedder) {
            Ok(embedding) => embedding,
            Err(reason) => {
                match &reason {
                    SkipReason::NoFace => {
                        tracing::warn!(file = %path.display(), "no face found in reference image; skipping")
                    }
                    SkipReason::Unreadable(e) | SkipReason::ModelFailed(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "failed to load reference image; skipping")
                    }
                    SkipReason::DimensionMismatch { .. } => {}
                }
                skipped.push((path, reason));
                continue;
            }
        };

        if let Some(expected) = identities.first().map(|i| i.embedding.dims()) {
            if embedding.dims() != expected {
                tracing::warn!(
                    file = %path.display(),
                    expected,
                    found = embedding.dims(),
                    "embedding length differs from gallery; skipping"
                );
                skipped.push((
                    path,
                    SkipReason::DimensionMismatch {
                        expected,
                        found: embedding.dims(),
                    },
                ));
                continue;
            }
        }

        let identity = Identity { name, embedding };
        if let Some(existing) = identities.iter_mut().find(|i| i.name == identity.name) {
            tracing::warn!(
                name = %identity.name,
                file = %path.display(),
                "duplicate identity name; later file replaces earlier entry"
            );
            replaced.push(identity.name.clone());
            *existing = identity;
        } else {
            tracing::info!(name = %identity.name, "loaded identity");
            identities.push(identity);
        }
    }

    let gallery =
        Gallery::new(identities).ok_or_else(|| EnrollError::EmptyGallery(dir.to_path_buf()))?;
    tracing::info!(count = gallery.len(), skipped = skipped.len(), "known faces loaded");

    Ok(EnrollReport {
        gallery,
        skipped,
        replaced,
    })
}

fn embed_reference<E>(path: &Path, embedder: &mut E) -> Result<crate::types::Embedding, SkipReason>
where
    E: FaceEmbedder + ?Sized,
{
    let image = image::open(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    let frame = Frame::from_luma(image.to_luma8());
    let detections = embedder
        .detect_and_embed(&frame)
        .map_err(|e| SkipReason::ModelFailed(e.to_string()))?;
    detections
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or(SkipReason::NoFace)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

/// Identity name: the file stem, e.g. `alice` for `alice.jpg`.
fn identity_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    (!stem.is_empty()).then_some(stem)
}
