//! Shared fixtures: synthetic frames, scripted estimators and classifiers.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::Cursor,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use gesturebridge::{
    session::RefineFuture, ClassificationResult, ClassifierError, Classify, KeypointSet,
    LandmarkExtractor, NormalizedKeypointSet, Recognizer, Refiner,
};
use image::{ImageFormat, Rgb, RgbImage};

/// Frame widths understood by [`width_estimator`].
pub const NO_HAND: u32 = 1;
pub const HAND: u32 = 2;
pub const BROKEN: u32 = 3;

/// PNG-encoded frame of the given width.
pub fn frame(width: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(width, 2, Rgb([120, 80, 40]))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode frame");
    bytes
}

/// An open hand with the fingers spread in the x/y plane.
pub fn open_hand() -> KeypointSet {
    let mut positions = [[0.0; 3]; 21];
    for (i, pos) in positions.iter_mut().enumerate() {
        let finger = i.saturating_sub(1) / 4;
        let joint = (i.saturating_sub(1) % 4) as f32 + 1.0;
        *pos = [finger as f32 * 0.05, joint * 0.04, 0.01 * finger as f32];
    }
    positions[0] = [0.1, 0.0, 0.0];
    KeypointSet::new(positions)
}

/// Estimator reading the frame width: [`NO_HAND`], [`HAND`] or [`BROKEN`].
pub fn width_extractor() -> LandmarkExtractor {
    LandmarkExtractor::from_fn(|frame: &RgbImage| match frame.width() {
        NO_HAND => Ok(None),
        BROKEN => Err(anyhow!("estimator backend crashed")),
        _ => Ok(Some(open_hand())),
    })
}

/// Returns scripted results in order, then repeats the last one.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<ClassificationResult>>,
    last: Mutex<ClassificationResult>,
}

impl ScriptedClassifier {
    pub fn new(confidences: &[(usize, f32)]) -> Self {
        let script: VecDeque<_> = confidences
            .iter()
            .map(|&(label, confidence)| ClassificationResult::new(label, confidence))
            .collect();
        let last = script
            .back()
            .copied()
            .unwrap_or(ClassificationResult::new(0, 1.0));
        Self {
            script: Mutex::new(script),
            last: Mutex::new(last),
        }
    }

    pub fn constant(label: usize, confidence: f32) -> Self {
        Self::new(&[(label, confidence)])
    }
}

impl Classify for ScriptedClassifier {
    fn classify(
        &self,
        _keypoints: &NormalizedKeypointSet,
    ) -> Result<ClassificationResult, ClassifierError> {
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(result) = next {
            *last = result;
        }
        Ok(*last)
    }

    fn label(&self, index: usize) -> Option<String> {
        ["Hello", "Thank you", "Please", "Yes"]
            .get(index)
            .map(|s| s.to_string())
    }
}

pub fn recognizer(classifier: impl Classify) -> Recognizer {
    Recognizer::new(width_extractor(), Arc::new(classifier))
}

/// Refiner that answers after `delay` with an exclamation mark appended.
pub struct DelayedRefiner {
    pub delay: Duration,
}

impl Refiner for DelayedRefiner {
    fn refine<'a>(&'a self, label: &'a str, _language: &'a str) -> RefineFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(format!("{label}!"))
        })
    }
}
