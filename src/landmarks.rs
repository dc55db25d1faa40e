use parking_lot::RwLock;
use std::sync::Arc;

use crate::types::{FaceLandmarks, Landmark};

/// Flattens faces into one list: face order first, then point order.
pub fn extract(faces: &[FaceLandmarks]) -> Vec<Landmark> {
    faces.iter().flat_map(|f| f.points.iter().copied()).collect()
}

/// The most recent per-frame detection result.
///
/// Clones share the same slot. The controller replaces the whole list at
/// once, so a reader on another thread sees either the old list or the new
/// one, never a mix.
#[derive(Debug, Clone, Default)]
pub struct LandmarkSnapshot {
    slot: Arc<RwLock<Option<Arc<Vec<FaceLandmarks>>>>>,
}

impl LandmarkSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn store(&self, faces: Vec<FaceLandmarks>) {
        *self.slot.write() = Some(Arc::new(faces));
    }

    /// `None` until the first detection pass has completed.
    pub fn current(&self) -> Option<Arc<Vec<FaceLandmarks>>> {
        self.slot.read().clone()
    }

    pub fn is_present(&self) -> bool {
        self.slot.read().is_some()
    }

    /// All landmarks of the current snapshot as one flat list; empty when
    /// no snapshot exists yet.
    pub fn get_landmarks_list(&self) -> Vec<Landmark> {
        self.current().map(|faces| extract(&faces)).unwrap_or_default()
    }
}
