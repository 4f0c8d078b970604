pub mod extractor;
pub mod keypoints;

pub use extractor::{decode_frame, EstimatorSettings, HandPoseEstimator, LandmarkExtractor};
pub use keypoints::{
    normalize, HandLandmark, KeypointSet, NormalizedKeypointSet, Position, NUM_FEATURES,
    NUM_KEYPOINTS,
};
