use std::{fs, io, path::Path, sync::Mutex};

use image::{imageops::FilterType, ImageError};
use tensorflow::{
    Graph, ImportGraphDefOptions, Operation, Output, Session, SessionOptions, SessionRunArgs,
    Status, Tensor,
};

use crate::error::{ModelError, PredictError};

/// Something that turns a preprocessed image into one probability per class.
pub trait Classifier: Send + Sync {
    /// Square input resolution expected by `infer`.
    fn input_size(&self) -> u32;

    fn class_count(&self) -> usize;

    /// `input` is HWC, RGB, normalised to [0, 1].
    fn infer(&self, input: &[f32]) -> Result<Vec<f32>, PredictError>;
}

struct TfSession {
    graph: Graph,
    session: Session,
}

/// Frozen TensorFlow graph holding both the convolutional base and the dense head.
pub struct TfClassifier {
    inner: Mutex<TfSession>,
    input_op: String,
    output_op: String,
    input_size: u32,
    class_count: usize,
}

impl TfClassifier {
    pub fn load(
        model_path: &Path,
        input_op: &str,
        output_op: &str,
        input_size: u32,
        class_count: usize,
    ) -> Result<Self, ModelError> {
        let model_bytes = fs::read(model_path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ModelError::GraphMissing(model_path.to_path_buf()),
            _ => ModelError::Io(err),
        })?;

        let mut graph = Graph::new();
        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;

        let input = find_operation(&graph, input_op)?;
        let output = find_operation(&graph, output_op)?;
        check_topology(&graph, input, output, input_size, class_count)?;
        check_dense_head(&dense_widths(&graph)?, class_count)?;

        let session = Session::new(&SessionOptions::new(), &graph)?;

        Ok(TfClassifier {
            inner: Mutex::new(TfSession { graph, session }),
            input_op: input_op.to_string(),
            output_op: output_op.to_string(),
            input_size,
            class_count,
        })
    }
}

fn find_operation(graph: &Graph, name: &str) -> Result<Operation, ModelError> {
    graph
        .operation_by_name(name)
        .map_err(Status::from)?
        .ok_or_else(|| ModelError::MissingOperation(name.to_string()))
}

// Unknown dimensions are accepted; only dimensions the graph pins down are compared.
fn check_topology(
    graph: &Graph,
    input: Operation,
    output: Operation,
    input_size: u32,
    class_count: usize,
) -> Result<(), ModelError> {
    let input_shape = graph.tensor_shape(Output {
        operation: input,
        index: 0,
    })?;
    if let Some(rank) = input_shape.dims() {
        if rank != 4 {
            return Err(ModelError::Topology(format!(
                "input has rank {rank}, expected 4"
            )));
        }
        let expected = [input_size as i64, input_size as i64, 3];
        for (axis, want) in (1..4).zip(expected) {
            if let Some(got) = input_shape[axis] {
                if got != want {
                    return Err(ModelError::Topology(format!(
                        "input axis {axis} is {got}, expected {want}"
                    )));
                }
            }
        }
    }

    let output_shape = graph.tensor_shape(Output {
        operation: output,
        index: 0,
    })?;
    if let Some(rank) = output_shape.dims() {
        if rank > 0 {
            if let Some(width) = output_shape[rank - 1] {
                if width as usize != class_count {
                    return Err(ModelError::Topology(format!(
                        "model outputs {width} classes but the mapping has {class_count}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Widths of the dense layers between the pooled VGG16 features and the softmax layer.
/// The dropout layers (rate 0.4 after the first, 0.3 after the second) are identities at
/// inference and leave nothing in a frozen graph to check.
pub const DENSE_UNITS: [i64; 2] = [128, 64];

/// Output width of every `MatMul` in graph order, `None` where the graph leaves it open.
fn dense_widths(graph: &Graph) -> Result<Vec<Option<i64>>, ModelError> {
    let mut widths = Vec::new();
    for operation in graph.operation_iter() {
        if operation.op_type().map_err(Status::from)? != "MatMul" {
            continue;
        }
        let shape = graph.tensor_shape(Output {
            operation,
            index: 0,
        })?;
        widths.push(match shape.dims() {
            Some(rank) if rank > 0 => shape[rank - 1],
            _ => None,
        });
    }
    Ok(widths)
}

// A graph without plain MatMul ops lowered its dense layers some other way; nothing to compare.
fn check_dense_head(widths: &[Option<i64>], class_count: usize) -> Result<(), ModelError> {
    if widths.is_empty() {
        return Ok(());
    }

    let expected: Vec<i64> = DENSE_UNITS
        .iter()
        .copied()
        .chain([class_count as i64])
        .collect();
    let matches = widths.len() == expected.len()
        && widths
            .iter()
            .zip(&expected)
            .all(|(got, want)| got.map_or(true, |got| got == *want));

    if matches {
        Ok(())
    } else {
        Err(ModelError::Topology(format!(
            "dense layers have widths {widths:?}, expected {expected:?}"
        )))
    }
}

impl Classifier for TfClassifier {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn class_count(&self) -> usize {
        self.class_count
    }

    fn infer(&self, input: &[f32]) -> Result<Vec<f32>, PredictError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| PredictError::Inference("model session lock poisoned".into()))?;

        let size = self.input_size as u64;
        let input_tensor = Tensor::new(&[1, size, size, 3]).with_values(input)?;

        let input_operation = inner
            .graph
            .operation_by_name(&self.input_op)
            .map_err(Status::from)?
            .ok_or_else(|| PredictError::Inference(format!("missing op {}", self.input_op)))?;
        let output_operation = inner
            .graph
            .operation_by_name(&self.output_op)
            .map_err(Status::from)?
            .ok_or_else(|| PredictError::Inference(format!("missing op {}", self.output_op)))?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &input_tensor);
        let output_token = args.request_fetch(&output_operation, 0);
        inner.session.run(&mut args)?;

        let output_tensor: Tensor<f32> = args.fetch(output_token)?;
        Ok(output_tensor.to_vec())
    }
}

/// Decodes the image at `path` into the flat tensor layout `Classifier::infer` takes.
pub fn preprocess(path: &Path, size: u32) -> Result<Vec<f32>, PredictError> {
    let image = image::open(path).map_err(|err| match err {
        ImageError::IoError(ref io_err) if io_err.kind() == io::ErrorKind::NotFound => {
            PredictError::NotFound(path.to_path_buf())
        }
        other => PredictError::Decode(other),
    })?;

    let resized = image::imageops::resize(&image.to_rgb8(), size, size, FilterType::CatmullRom);

    Ok(resized
        .pixels()
        .flat_map(|pixel| pixel.0)
        .map(|channel| channel as f32 / 255.0)
        .collect())
}
