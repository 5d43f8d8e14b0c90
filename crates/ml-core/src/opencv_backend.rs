use image::RgbImage;
use opencv::{
    core::{Mat, Ptr, Rect},
    prelude::*,
    tracking::{TrackerCSRT, TrackerCSRT_Params, TrackerKCF, TrackerKCF_Params},
};

use crate::{
    geometry::BoundingBox,
    tracker::{Tracker, TrackerError, TrackerKind},
};

enum Inner {
    Csrt(Ptr<TrackerCSRT>),
    Kcf(Ptr<TrackerKCF>),
}

struct OpenCvTracker {
    inner: Inner,
}

pub(crate) fn csrt() -> Result<Box<dyn Tracker>, TrackerError> {
    let params = TrackerCSRT_Params::default().map_err(|err| unavailable(TrackerKind::Csrt, err))?;
    let tracker = TrackerCSRT::create(&params).map_err(|err| unavailable(TrackerKind::Csrt, err))?;
    Ok(Box::new(OpenCvTracker {
        inner: Inner::Csrt(tracker),
    }))
}

pub(crate) fn kcf() -> Result<Box<dyn Tracker>, TrackerError> {
    let params = TrackerKCF_Params::default().map_err(|err| unavailable(TrackerKind::Kcf, err))?;
    let tracker = TrackerKCF::create(params).map_err(|err| unavailable(TrackerKind::Kcf, err))?;
    Ok(Box::new(OpenCvTracker {
        inner: Inner::Kcf(tracker),
    }))
}

fn unavailable(kind: TrackerKind, err: opencv::Error) -> TrackerError {
    TrackerError::Unavailable {
        kind,
        reason: err.to_string(),
    }
}

fn backend(err: opencv::Error) -> TrackerError {
    TrackerError::Backend(err.to_string())
}

/// Copy an RGB frame into an owned BGR `Mat`.
fn to_bgr_mat(frame: &RgbImage) -> opencv::Result<Mat> {
    let (_, height) = frame.dimensions();
    let mut bgr = frame.as_raw().clone();
    for pixel in bgr.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
    let flat = Mat::from_slice(&bgr)?;
    let shaped = flat.reshape(3, height as i32)?;
    shaped.try_clone()
}

impl Tracker for OpenCvTracker {
    fn init(&mut self, frame: &RgbImage, bbox: BoundingBox) -> Result<(), TrackerError> {
        let (width, height) = frame.dimensions();
        let visible = bbox
            .clamp_to(width, height)
            .ok_or(TrackerError::InvalidBox {
                bbox,
                width,
                height,
            })?;
        let mat = to_bgr_mat(frame).map_err(backend)?;
        let rect = Rect::new(visible.x1, visible.y1, visible.width(), visible.height());
        match &mut self.inner {
            Inner::Csrt(tracker) => tracker.init(&mat, rect).map_err(backend),
            Inner::Kcf(tracker) => tracker.init(&mat, rect).map_err(backend),
        }
    }

    fn update(&mut self, frame: &RgbImage) -> Option<BoundingBox> {
        let mat = to_bgr_mat(frame).ok()?;
        let mut rect = Rect::default();
        let found = match &mut self.inner {
            Inner::Csrt(tracker) => tracker.update(&mat, &mut rect),
            Inner::Kcf(tracker) => tracker.update(&mat, &mut rect),
        };
        match found {
            Ok(true) => BoundingBox::from_xywh(rect.x, rect.y, rect.width, rect.height),
            _ => None,
        }
    }
}
