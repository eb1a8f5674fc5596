use super::keypoint::KeypointIndex;
use super::preprocess::ModelInput;
use crate::error::{TrackerError, TrackerResult};

/// モデル出力: キーポイントごとの (y, x, confidence)、座標はモデル空間 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelOutput {
    pub keypoints: [[f32; 3]; KeypointIndex::COUNT],
}

impl ModelOutput {
    /// 17x3 のフラットな配列から作成
    pub fn from_flat(values: &[f32]) -> TrackerResult<Self> {
        if values.len() != KeypointIndex::COUNT * 3 {
            return Err(TrackerError::inference(format!(
                "expected {} output values, got {}",
                KeypointIndex::COUNT * 3,
                values.len()
            )));
        }
        let mut keypoints = [[0.0; 3]; KeypointIndex::COUNT];
        for (kp, chunk) in keypoints.iter_mut().zip(values.chunks_exact(3)) {
            kp.copy_from_slice(chunk);
        }
        Ok(Self { keypoints })
    }
}

/// 推論エンジン（固定サイズ画像 → 17 キーポイント）
pub trait PoseEngine: Send {
    fn infer(&mut self, input: &ModelInput) -> TrackerResult<ModelOutput>;
}

impl<F> PoseEngine for F
where
    F: FnMut(&ModelInput) -> TrackerResult<ModelOutput> + Send,
{
    fn infer(&mut self, input: &ModelInput) -> TrackerResult<ModelOutput> {
        self(input)
    }
}

#[cfg(feature = "onnx")]
pub use onnx::PoseDetector;

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;

    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use tracing::info;

    use super::{ModelOutput, PoseEngine};
    use crate::error::{TrackerError, TrackerResult};
    use crate::pose::preprocess::ModelInput;

    /// MoveNet (ONNX) を使用した姿勢検出器
    pub struct PoseDetector {
        session: Session,
        input_name: String,
        output_name: String,
    }

    impl PoseDetector {
        /// ONNXモデルを読み込んで初期化
        pub fn new<P: AsRef<Path>>(model_path: P) -> anyhow::Result<Self> {
            use anyhow::Context;

            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(model_path.as_ref())
                .context("Failed to load ONNX model")?;

            let input_name = session
                .inputs
                .first()
                .map(|i| i.name.clone())
                .context("model has no inputs")?;
            let output_name = session
                .outputs
                .first()
                .map(|o| o.name.clone())
                .context("model has no outputs")?;
            info!("model loaded: {} -> {}", input_name, output_name);

            Ok(Self {
                session,
                input_name,
                output_name,
            })
        }
    }

    impl PoseEngine for PoseDetector {
        /// 入力: [1, 192, 192, 3] の f32 テンソル
        /// 出力: [1, 1, 17, 3] (y, x, confidence)
        fn infer(&mut self, input: &ModelInput) -> TrackerResult<ModelOutput> {
            let input_tensor = Tensor::from_array(input.to_tensor())
                .map_err(|e| TrackerError::inference(e.to_string()))?;
            let outputs = self
                .session
                .run(ort::inputs![self.input_name.as_str() => input_tensor])
                .map_err(|e| TrackerError::inference(format!("inference failed: {}", e)))?;

            let output: ndarray::ArrayViewD<f32> = outputs[self.output_name.as_str()]
                .try_extract_array()
                .map_err(|e| TrackerError::inference(format!("failed to extract output: {}", e)))?;

            let values: Vec<f32> = output.iter().copied().collect();
            ModelOutput::from_flat(&values)
        }
    }
}
