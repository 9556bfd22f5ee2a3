use std::{collections::BTreeMap, fs, path::Path, str::FromStr};

use image::{RgbImage, imageops::FilterType};

use crate::{error::ServiceError, model::ImagePrediction};

/// Side length of the square network input.
pub const INPUT_SIZE: u32 = 224;

const TORCH_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD: [f32; 3] = [0.229, 0.224, 0.225];
// BGR order.
const CAFFE_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preprocessing {
    /// RGB scaled to [0, 1] and normalized with the ImageNet mean/std.
    Torch,
    /// BGR, zero-centered on the ImageNet mean, no scaling.
    Caffe,
}

impl FromStr for Preprocessing {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "torch" => Ok(Preprocessing::Torch),
            "caffe" => Ok(Preprocessing::Caffe),
            other => Err(ServiceError::BadRequest(format!(
                "unknown preprocessing mode '{other}' (expected torch or caffe)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Logits,
    Probabilities,
}

impl FromStr for OutputKind {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "logits" => Ok(OutputKind::Logits),
            "probabilities" | "softmax" => Ok(OutputKind::Probabilities),
            other => Err(ServiceError::BadRequest(format!(
                "unknown output kind '{other}' (expected logits or probabilities)"
            ))),
        }
    }
}

impl Preprocessing {
    /// Decodes an uploaded image (format sniffed from its bytes) and returns
    /// a flattened 1x3x224x224 tensor in NCHW order.
    pub fn prepare(&self, bytes: &[u8]) -> Result<Vec<f32>, ServiceError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ServiceError::Image(format!("cannot decode image: {e}")))?;
        let resized = decoded
            .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Nearest)
            .to_rgb8();
        Ok(self.tensor_from_rgb(&resized))
    }

    pub fn tensor_from_rgb(&self, img: &RgbImage) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let plane = (width * height) as usize;
        let mut data = vec![0.0_f32; 3 * plane];

        for (x, y, pixel) in img.enumerate_pixels() {
            let offset = (y * width + x) as usize;
            for channel in 0..3 {
                let value = match self {
                    Preprocessing::Torch => {
                        let scaled = pixel[channel] as f32 / 255.0;
                        (scaled - TORCH_MEAN[channel]) / TORCH_STD[channel]
                    }
                    Preprocessing::Caffe => {
                        let bgr = 2 - channel;
                        pixel[bgr] as f32 - CAFFE_MEAN[channel]
                    }
                };
                data[channel * plane + offset] = value;
            }
        }
        data
    }
}

/// ImageNet label table read from the `imagenet_class_index.json` layout:
/// `{"0": ["n01440764", "tench"], ...}`.
#[derive(Debug, Clone)]
pub struct ClassIndex {
    entries: Vec<(String, String)>,
}

impl ClassIndex {
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        if !path.exists() {
            return Err(ServiceError::Artifact(format!(
                "class index missing: {}",
                path.display()
            )));
        }
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ServiceError> {
        let parsed: BTreeMap<String, (String, String)> = serde_json::from_str(raw)
            .map_err(|e| ServiceError::Artifact(format!("invalid class index: {e}")))?;

        let mut numbered = Vec::with_capacity(parsed.len());
        for (key, entry) in parsed {
            let idx: usize = key.parse().map_err(|_| {
                ServiceError::Artifact(format!("class index key '{key}' is not a number"))
            })?;
            numbered.push((idx, entry));
        }
        numbered.sort_by_key(|(idx, _)| *idx);

        if numbered.is_empty() {
            return Err(ServiceError::Artifact("class index is empty".into()));
        }
        if let Some((pos, (idx, _))) = numbered
            .iter()
            .enumerate()
            .find(|(pos, (idx, _))| pos != idx)
        {
            return Err(ServiceError::Artifact(format!(
                "class index is not contiguous: expected {pos}, found {idx}"
            )));
        }

        Ok(Self {
            entries: numbered.into_iter().map(|(_, entry)| entry).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<(&str, &str)> {
        self.entries
            .get(idx)
            .map(|(wordnet, label)| (wordnet.as_str(), label.as_str()))
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / total).collect()
}

/// Picks the `top_k` best classes, then keeps the first one unconditionally
/// and the rest only when they reach `min_probability`.
pub fn decode_predictions(
    probabilities: &[f32],
    index: &ClassIndex,
    top_k: usize,
    min_probability: f32,
) -> Result<Vec<ImagePrediction>, ServiceError> {
    if probabilities.len() != index.len() {
        return Err(ServiceError::Inference(format!(
            "model produced {} scores for {} classes",
            probabilities.len(),
            index.len()
        )));
    }

    let mut ranked: Vec<usize> = (0..probabilities.len()).collect();
    ranked.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    let predictions = ranked
        .into_iter()
        .take(top_k.max(1))
        .enumerate()
        .filter(|&(rank, class)| rank == 0 || probabilities[class] >= min_probability)
        .filter_map(|(_, class)| {
            index.get(class).map(|(wordnet, label)| ImagePrediction {
                wordnet: wordnet.to_string(),
                label: label.to_string(),
                probability: probabilities[class],
            })
        })
        .collect();
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb};

    use super::*;

    fn small_index() -> ClassIndex {
        ClassIndex::from_json(
            r#"{"0": ["n01440764", "tench"], "1": ["n02112018", "Pomeranian"],
                "2": ["n02510455", "giant_panda"], "3": ["n04228054", "ski"]}"#,
        )
        .unwrap()
    }

    #[test]
    fn keeps_first_label_and_confident_runners_up() {
        let index = small_index();
        let predictions = decode_predictions(&[0.02, 0.05, 0.15, 0.78], &index, 5, 0.1).unwrap();
        let labels: Vec<&str> = predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["ski", "giant_panda"]);
        assert_eq!(predictions[0].wordnet, "n04228054");
    }

    #[test]
    fn first_label_survives_even_when_unconfident() {
        let index = small_index();
        let predictions = decode_predictions(&[0.26, 0.25, 0.25, 0.24], &index, 5, 0.3).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].label, "tench");
    }

    #[test]
    fn top_k_limits_candidates() {
        let index = small_index();
        let predictions = decode_predictions(&[0.25, 0.25, 0.25, 0.25], &index, 2, 0.1).unwrap();
        assert_eq!(predictions.len(), 2);
    }

    #[test]
    fn score_count_must_match_labels() {
        let index = small_index();
        assert!(matches!(
            decode_predictions(&[1.0], &index, 5, 0.1),
            Err(ServiceError::Inference(_))
        ));
    }

    #[test]
    fn class_index_must_be_contiguous() {
        let err = ClassIndex::from_json(r#"{"0": ["a", "b"], "2": ["c", "d"]}"#).unwrap_err();
        assert!(err.to_string().contains("contiguous"));
        assert!(ClassIndex::from_json(r#"{"x": ["a", "b"]}"#).is_err());
        assert!(ClassIndex::from_json("{}").is_err());
    }

    #[test]
    fn class_index_orders_numerically() {
        let raw = (0..12)
            .map(|i| format!("\"{i}\": [\"n{i:08}\", \"label{i}\"]"))
            .collect::<Vec<_>>()
            .join(",");
        let index = ClassIndex::from_json(&format!("{{{raw}}}")).unwrap();
        assert_eq!(index.len(), 12);
        assert_eq!(index.get(10), Some(("n00000010", "label10")));
    }

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1000.0, 1000.0, 998.0]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!((probs[0] - probs[1]).abs() < 1e-6);
        assert!(probs[2] < probs[0]);
    }

    #[test]
    fn torch_preprocessing_normalizes_channels() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 128]));
        let data = Preprocessing::Torch.tensor_from_rgb(&img);
        assert_eq!(data.len(), 12);
        assert!((data[0] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((data[4] - (0.0 - 0.456) / 0.224).abs() < 1e-5);
    }

    #[test]
    fn caffe_preprocessing_swaps_to_bgr() {
        let img = RgbImage::from_pixel(1, 1, Rgb([10, 20, 200]));
        let data = Preprocessing::Caffe.tensor_from_rgb(&img);
        assert!((data[0] - (200.0 - 103.939)).abs() < 1e-4);
        assert!((data[1] - (20.0 - 116.779)).abs() < 1e-4);
        assert!((data[2] - (10.0 - 123.68)).abs() < 1e-4);
    }

    #[test]
    fn prepare_resizes_encoded_images() {
        let img = RgbImage::from_pixel(40, 30, Rgb([1, 2, 3]));
        let mut encoded = Cursor::new(Vec::new());
        img.write_to(&mut encoded, ImageFormat::Png).unwrap();

        let data = Preprocessing::Torch.prepare(encoded.get_ref()).unwrap();
        assert_eq!(data.len(), (3 * INPUT_SIZE * INPUT_SIZE) as usize);
        assert!(matches!(
            Preprocessing::Torch.prepare(b"not an image"),
            Err(ServiceError::Image(_))
        ));
    }
}
