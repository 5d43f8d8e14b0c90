use std::{convert::TryFrom, path::Path};

use image::{RgbImage, imageops::FilterType};
use tch::{self, Device, Kind, Tensor};
use tracing::debug;

use crate::{
    detector::{Candidate, Detector, DetectorError, select_candidates},
    geometry::BoundingBox,
};

/// TorchScript YOLOv8-style detector.
///
/// The module must map a `[1, 3, H, W]` float tensor in `[0, 1]` to
/// `[1, 4 + C, N]`: box center, size and `C` per-class scores for `N`
/// proposals, in input-image pixels.
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    input_size: (u32, u32),
    class_names: Vec<String>,
    iou_threshold: f32,
    max_candidates: usize,
    name: String,
}

impl TorchDetector {
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (u32, u32),
        class_names: Vec<String>,
    ) -> Result<Self, DetectorError> {
        let path = model_path.as_ref();
        let module = tch::CModule::load_on_device(path, device)
            .map_err(|err| DetectorError::ModelLoad(format!("{}: {err}", path.display())))?;
        let name = format!(
            "torchscript:{}",
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        );
        Ok(Self {
            module,
            device,
            input_size,
            class_names,
            iou_threshold: 0.45,
            max_candidates: 512,
            name,
        })
    }

    pub fn with_iou_threshold(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    fn to_tensor(&self, frame: &RgbImage) -> Result<Tensor, DetectorError> {
        let (in_w, in_h) = self.input_size;
        let resized;
        let pixels = if frame.dimensions() == (in_w, in_h) {
            frame
        } else {
            resized = image::imageops::resize(frame, in_w, in_h, FilterType::Triangle);
            &resized
        };

        Tensor::from_slice(pixels.as_raw())
            .f_to_device(self.device)
            .and_then(|t| t.f_to_kind(Kind::Float))
            .and_then(|t| t.f_view([1, in_h as i64, in_w as i64, 3]))
            .and_then(|t| t.f_permute([0, 3, 1, 2]))
            .and_then(|t| t.f_div_scalar(255.0))
            .map_err(inference_error)
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl Detector for TorchDetector {
    fn infer(&mut self, frame: &RgbImage, threshold: f32) -> Result<Vec<Candidate>, DetectorError> {
        let (frame_w, frame_h) = frame.dimensions();
        let input = self.to_tensor(frame)?;
        let output =
            tch::no_grad(|| self.module.forward_ts(&[input])).map_err(inference_error)?;

        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(DetectorError::OutputShape(shape));
        }

        let preds = output
            .f_to_device(Device::Cpu)
            .and_then(|t| t.f_to_kind(Kind::Float))
            .and_then(|t| t.f_squeeze_dim(0))
            .and_then(|t| t.f_permute([1, 0]))
            .and_then(|t| t.f_contiguous())
            .map_err(inference_error)?;
        let rows = Vec::<Vec<f32>>::try_from(&preds).map_err(inference_error)?;

        let scale_x = frame_w as f32 / self.input_size.0 as f32;
        let scale_y = frame_h as f32 / self.input_size.1 as f32;
        let mut candidates = Vec::new();
        for row in rows {
            let Some((class_id, &score)) = row[4..]
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
            else {
                continue;
            };
            if score < threshold {
                continue;
            }
            let (cx, cy, w, h) = (row[0] * scale_x, row[1] * scale_y, row[2] * scale_x, row[3] * scale_y);
            let raw = BoundingBox::new(
                (cx - w / 2.0).round() as i32,
                (cy - h / 2.0).round() as i32,
                (cx + w / 2.0).round() as i32,
                (cy + h / 2.0).round() as i32,
            );
            let Some(bbox) = raw.and_then(|bbox| bbox.clamp_to(frame_w, frame_h)) else {
                continue;
            };
            candidates.push(Candidate::new(self.class_name(class_id), score, bbox));
        }

        let proposals = candidates.len();
        let kept = select_candidates(candidates, self.iou_threshold, self.max_candidates);
        debug!(proposals, count = kept.len(), "torch detector pass");
        Ok(kept)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn inference_error(err: tch::TchError) -> DetectorError {
    DetectorError::Inference(err.to_string())
}
