//! Hand keypoint sets and their position/scale normalization.

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, DegenerateInput};

/// Number of landmarks in one hand pose.
pub const NUM_KEYPOINTS: usize = 21;

/// Number of scalar features a keypoint set flattens to.
pub const NUM_FEATURES: usize = NUM_KEYPOINTS * 3;

pub type Position = [f32; 3];

/// Names for the hand pose landmarks, in the order estimators emit them.
///
/// - **CMC**: carpometacarpal joint, the lowest joint of the thumb near the wrist.
/// - **MCP**: metacarpophalangeal joint, the knuckle joints near the palm.
/// - **PIP** / **DIP**: proximal and distal interphalangeal joints.
/// - **Tip**: placed on the tip of the finger, above the DIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandLandmark {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// One detected hand: exactly [`NUM_KEYPOINTS`] 3D points.
///
/// Coordinates are typically normalized image coordinates as produced by the
/// estimator. "No hand" is modelled as `Option<KeypointSet>::None`, never as
/// an empty set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeypointSet {
    positions: [Position; NUM_KEYPOINTS],
}

impl KeypointSet {
    pub fn new(positions: [Position; NUM_KEYPOINTS]) -> Self {
        Self { positions }
    }

    /// Builds a set from a slice of points, which must hold exactly 21 entries.
    pub fn from_slice(points: &[Position]) -> Result<Self, ClassifierError> {
        let positions: [Position; NUM_KEYPOINTS] = points.try_into().map_err(|_| {
            ClassifierError::ShapeMismatch(format!(
                "expected {NUM_KEYPOINTS} keypoints, got {}",
                points.len()
            ))
        })?;
        Ok(Self { positions })
    }

    /// Builds a set from 63 interleaved `x, y, z` values.
    pub fn from_flat(values: &[f32]) -> Result<Self, ClassifierError> {
        if values.len() != NUM_FEATURES {
            return Err(ClassifierError::ShapeMismatch(format!(
                "expected {NUM_FEATURES} values, got {}",
                values.len()
            )));
        }
        let mut positions = [[0.0; 3]; NUM_KEYPOINTS];
        for (out, chunk) in positions.iter_mut().zip(values.chunks_exact(3)) {
            out.copy_from_slice(chunk);
        }
        Ok(Self { positions })
    }

    pub fn positions(&self) -> &[Position; NUM_KEYPOINTS] {
        &self.positions
    }

    pub fn get(&self, landmark: HandLandmark) -> Position {
        self.positions[landmark as usize]
    }

    pub fn centroid(&self) -> Position {
        let mut center = [0.0f32; 3];
        for pos in &self.positions {
            for axis in 0..3 {
                center[axis] += pos[axis];
            }
        }
        center.map(|sum| sum / NUM_KEYPOINTS as f32)
    }
}

/// A [`KeypointSet`] centered on its centroid and scaled so that the largest
/// absolute coordinate is 1.
///
/// Only [`normalize`] creates these, so holding one means the invariant holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedKeypointSet {
    positions: [Position; NUM_KEYPOINTS],
}

impl NormalizedKeypointSet {
    pub fn positions(&self) -> &[Position; NUM_KEYPOINTS] {
        &self.positions
    }

    /// Row-major `x, y, z` features in landmark order, as the classifier consumes them.
    pub fn to_features(&self) -> [f32; NUM_FEATURES] {
        let mut features = [0.0; NUM_FEATURES];
        for (chunk, pos) in features.chunks_exact_mut(3).zip(&self.positions) {
            chunk.copy_from_slice(pos);
        }
        features
    }

    /// Runs [`normalize`] on the already-normalized points.
    pub fn renormalize(&self) -> Result<Self, DegenerateInput> {
        normalize(&KeypointSet::new(self.positions))
    }

    pub fn max_abs(&self) -> f32 {
        max_abs(&self.positions)
    }
}

fn max_abs(positions: &[Position]) -> f32 {
    positions
        .iter()
        .flatten()
        .fold(0.0f32, |acc, coord| acc.max(coord.abs()))
}

/// Translates `keypoints` so their centroid is the origin and divides by the
/// largest absolute coordinate.
///
/// Fails with [`DegenerateInput`] if every point coincides with the centroid
/// (or the input contains non-finite values), since no scale exists then.
pub fn normalize(keypoints: &KeypointSet) -> Result<NormalizedKeypointSet, DegenerateInput> {
    let center = keypoints.centroid();
    let mut positions = keypoints.positions;
    for pos in &mut positions {
        for axis in 0..3 {
            pos[axis] -= center[axis];
        }
    }

    let scale = max_abs(&positions);
    if scale == 0.0 || !scale.is_finite() {
        return Err(DegenerateInput);
    }

    for pos in &mut positions {
        *pos = pos.map(|coord| coord / scale);
    }

    Ok(NormalizedKeypointSet { positions })
}
