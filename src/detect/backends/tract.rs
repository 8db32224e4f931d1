#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::postprocess::{decode_yolov5, letterbox, DecodeParams, Letterbox};
use crate::detect::result::Detection;
use crate::error::CountError;
use crate::frame::Frame;

type Plan = TypedRunnableModel<TypedModel>;

/// Tract-based YOLOv5 backend.
///
/// The model is loaded from a local ONNX file in `initialize` and dropped in
/// `shutdown`. Frames of any size are letterboxed to the square model input.
pub struct TractBackend {
    model_path: PathBuf,
    input_size: u32,
    params: DecodeParams,
    model: Option<Plan>,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            input_size,
            params: DecodeParams::default(),
            model: None,
        }
    }

    /// Override the default decode thresholds.
    pub fn with_params(mut self, params: DecodeParams) -> Self {
        self.params = params;
        self
    }

    fn load(&self) -> TractResult<Plan> {
        let size = self.input_size as usize;
        tract_onnx::onnx()
            .model_for_path(&self.model_path)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )?
            .into_optimized()?
            .into_runnable()
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, Letterbox), CountError> {
        let image = frame.clone().into_rgb_image()?;
        let (canvas, geometry) = letterbox(&image, self.input_size);
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok((input.into_tensor(), geometry))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn initialize(&mut self) -> Result<(), CountError> {
        if self.model.is_some() {
            return Ok(());
        }
        let model = self.load().map_err(|e| {
            CountError::internal(format!(
                "failed to load ONNX model from {}: {}",
                self.model_path.display(),
                e
            ))
        })?;
        log::info!(
            "loaded ONNX model {} ({}x{} input)",
            self.model_path.display(),
            self.input_size,
            self.input_size
        );
        self.model = Some(model);
        Ok(())
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, CountError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| CountError::inference("model not initialized"))?;
        let (input, geometry) = self.build_input(frame)?;
        let outputs = model
            .run(tvec!(input.into()))
            .map_err(|e| CountError::inference(format!("ONNX inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| CountError::inference("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| CountError::inference(format!("model output was not f32: {}", e)))?;

        // [1, N, 5 + classes]
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(CountError::inference(format!(
                "unexpected output shape {:?}",
                shape
            )));
        }
        let row_len = shape[2];
        let data: Vec<f32> = view.iter().copied().collect();
        Ok(decode_yolov5(&data, row_len, &self.params, &geometry))
    }

    fn shutdown(&mut self) {
        self.model = None;
    }
}
