//! Nearest-neighbour identity matching.
//!
//! Every query is compared against every gallery entry: O(gallery) per face,
//! O(faces × gallery) per frame. That is fine for tens to low hundreds of
//! enrolled people; past that an index structure would be needed.

use crate::types::{Embedding, Gallery, MatchResult};

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// The nearest entry is accepted only when its distance is `<= tolerance`.
/// Ties resolve to the earliest entry in gallery order.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&identity.embedding);
            // Strict `<` keeps the first minimum.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => MatchResult {
                matched: true,
                distance: best_dist,
                name: Some(gallery.identities()[idx].name.clone()),
            },
            _ => MatchResult {
                matched: false,
                distance: best_dist,
                name: None,
            },
        }
    }
}
