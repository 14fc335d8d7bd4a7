use serde::{Deserialize, Serialize};

/// Label shown for a face that matched no enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean distance between two embeddings of equal length.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        debug_assert_eq!(self.dims(), other.dims(), "embedding length mismatch");
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn dims(&self) -> usize {
        self.values.len()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Face rectangle in pixel coordinates, ordered (top, right, bottom, left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceBox {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Map a box found in a `from` (width, height) image onto a `to` image.
    ///
    /// Each axis is scaled by its own ratio, rounded to the nearest pixel and
    /// clamped to `to`.
    pub fn rescaled(&self, from: (u32, u32), to: (u32, u32)) -> Self {
        let axis = |v: u32, from: u32, to: u32| {
            let mapped = (v as f32 * to as f32 / from.max(1) as f32).round() as u32;
            mapped.min(to)
        };
        Self {
            top: axis(self.top, from.1, to.1),
            right: axis(self.right, from.0, to.0),
            bottom: axis(self.bottom, from.1, to.1),
            left: axis(self.left, from.0, to.0),
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// One face found in a frame by the detect-and-embed collaborator.
#[derive(Debug, Clone)]
pub struct Detection {
    pub face_box: FaceBox,
    pub embedding: Embedding,
}

/// An enrolled person. `name` is unique within a [`Gallery`].
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub name: String,
    pub embedding: Embedding,
}

/// Ordered, non-empty set of enrolled identities. Read-only once built.
#[derive(Debug, Clone)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    /// Returns `None` for an empty identity list; recognition needs at least one candidate.
    pub fn new(identities: Vec<Identity>) -> Option<Self> {
        if identities.is_empty() {
            None
        } else {
            Some(Self { identities })
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Identity> {
        self.identities.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.name == name)
    }
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance to the nearest gallery entry.
    pub distance: f32,
    /// Name of the matched identity (if any).
    pub name: Option<String>,
}

impl MatchResult {
    /// Display label: the matched name, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Per-face output of the frame pipeline, in source-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub face_box: FaceBox,
    pub label: String,
    pub distance: f32,
    /// Whether this face produced a ledger row in this frame.
    pub logged: bool,
}
