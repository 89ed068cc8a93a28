//! Test doubles for the model layer

use super::{ModelHandle, ModelInfo, ModelLoader};
use crate::error::ModelError;
use crate::models::ImageTensor;
use crate::predictor::InferenceBackend;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RGB_128: [usize; 4] = [1, 128, 128, 3];

/// Backend returning a fixed output
pub struct StubBackend {
    output: Result<Vec<f32>, String>,
    input_shape: [usize; 4],
    calls: Arc<AtomicU64>,
}

impl StubBackend {
    pub fn new(output: [f32; 5]) -> Self {
        Self::with_output(output.to_vec())
    }

    pub fn with_output(output: Vec<f32>) -> Self {
        Self {
            output: Ok(output),
            input_shape: RGB_128,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            output: Err(message.to_string()),
            input_shape: RGB_128,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_input_shape(mut self, input_shape: [usize; 4]) -> Self {
        self.input_shape = input_shape;
        self
    }

    pub fn calls(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl InferenceBackend for StubBackend {
    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn run(&self, _tensor: &ImageTensor) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.output.clone().map_err(|e| anyhow::anyhow!(e))
    }
}

fn stub_info(path: &Path, input_shape: [usize; 4]) -> ModelInfo {
    ModelInfo {
        path: path.to_path_buf(),
        size_bytes: 7,
        checksum: "stub".to_string(),
        input_shape,
        loaded_at: 0,
    }
}

pub fn handle_with(backend: StubBackend) -> Arc<ModelHandle> {
    let info = stub_info(&PathBuf::from("stub.onnx"), backend.input_shape);
    Arc::new(ModelHandle::new(Box::new(backend), info))
}

/// Loader that counts invocations and produces stub handles
pub struct CountingLoader {
    loads: AtomicU64,
    corrupt: bool,
    output: [f32; 5],
    delay: Duration,
}

impl CountingLoader {
    pub fn succeeding() -> Self {
        Self::with_output([0.05, 0.05, 0.8, 0.05, 0.05])
    }

    pub fn with_output(output: [f32; 5]) -> Self {
        Self {
            loads: AtomicU64::new(0),
            corrupt: false,
            output,
            delay: Duration::ZERO,
        }
    }

    pub fn corrupt() -> Self {
        Self {
            corrupt: true,
            ..Self::succeeding()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<ModelHandle, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        if self.corrupt {
            return Err(ModelError::Corrupt {
                path: path.to_path_buf(),
                reason: "stub corruption".to_string(),
            });
        }

        let backend = StubBackend::new(self.output);
        Ok(ModelHandle::new(Box::new(backend), stub_info(path, RGB_128)))
    }
}

/// Serialized ONNX classifier: Flatten, MatMul, Softmax
///
/// Every input value contributes `weights[k]` to logit `k`, so the output
/// has `weights.len()` classes.
pub fn onnx_classifier(input_shape: [usize; 4], weights: &[f32]) -> Vec<u8> {
    use prost::Message;
    use tract_onnx::pb::{
        tensor_proto::DataType, tensor_shape_proto::dimension, tensor_shape_proto::Dimension,
        type_proto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
        TensorShapeProto, TypeProto, ValueInfoProto,
    };

    let features: usize = input_shape.iter().product();
    let classes = weights.len();

    let input = ValueInfoProto {
        name: "image".to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: DataType::Float as i32,
                shape: Some(TensorShapeProto {
                    dim: input_shape
                        .iter()
                        .map(|&d| Dimension {
                            value: Some(dimension::Value::DimValue(d as i64)),
                            ..Default::default()
                        })
                        .collect(),
                }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    };

    let matrix = TensorProto {
        name: "weights".to_string(),
        dims: vec![features as i64, classes as i64],
        data_type: DataType::Float as i32,
        float_data: (0..features).flat_map(|_| weights.iter().copied()).collect(),
        ..Default::default()
    };

    let node = |op: &str, inputs: &[&str], output: &str| NodeProto {
        op_type: op.to_string(),
        name: output.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: vec![output.to_string()],
        ..Default::default()
    };

    let graph = GraphProto {
        name: "freshness".to_string(),
        node: vec![
            node("Flatten", &["image"], "flat"),
            node("MatMul", &["flat", "weights"], "logits"),
            node("Softmax", &["logits"], "probs"),
        ],
        initializer: vec![matrix],
        input: vec![input],
        output: vec![ValueInfoProto {
            name: "probs".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };

    ModelProto {
        ir_version: 7,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 13,
        }],
        producer_name: "freshness-tests".to_string(),
        graph: Some(graph),
        ..Default::default()
    }
    .encode_to_vec()
}

/// Write [`onnx_classifier`] to `path`
pub fn write_onnx_classifier(path: &Path, input_shape: [usize; 4], weights: &[f32]) {
    std::fs::write(path, onnx_classifier(input_shape, weights)).expect("write onnx fixture");
}
