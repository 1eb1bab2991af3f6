//! ONNX Runtime classifier backend.
//!
//! Expects a model with a single float input `[batch, width]`. The first
//! output is either integer class ids (`[batch]` or `[batch, 1]`) or float
//! scores `[batch, k]`, decoded the same way as the CatBoost backend.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::classifier::{Classifier, decode_scores};
use crate::features::FeatureMatrix;

pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path) -> anyhow::Result<Self> {
        anyhow::ensure!(model_path.exists(), "{} not found", model_path.display());

        let session = Session::builder()?.commit_from_file(model_path)?;
        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| anyhow::anyhow!("model has no inputs"))?;

        info!(input = %input_name, model = %model_path.display(), "loaded onnx classifier");
        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict_classes(&self, features: &FeatureMatrix) -> anyhow::Result<Vec<usize>> {
        let rows = features.rows();
        if rows == 0 {
            return Ok(Vec::new());
        }

        let shape = [rows as i64, features.width() as i64];
        let input = Tensor::from_array((shape, features.as_slice().to_vec().into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("onnx session lock poisoned"))?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;

        if let Ok((_, labels)) = outputs[0].try_extract_tensor::<i64>() {
            anyhow::ensure!(
                labels.len() == rows,
                "label output has {} values for {rows} rows",
                labels.len()
            );
            return labels
                .iter()
                .map(|&id| usize::try_from(id).map_err(|_| anyhow::anyhow!("negative class id {id}")))
                .collect();
        }

        let (output_shape, scores) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = output_shape;
        anyhow::ensure!(
            !scores.is_empty() && scores.len() % rows == 0,
            "unexpected output shape: {dims:?} for {rows} rows"
        );
        let k = scores.len() / rows;
        Ok(scores
            .chunks(k)
            .map(|row| {
                let row: Vec<f64> = row.iter().map(|&s| f64::from(s)).collect();
                decode_scores(&row)
            })
            .collect())
    }
}
