//! Sequence-model scorer.
//!
//! Inference-only: loads a JSON weight artifact describing a stacked
//! recurrent network (LSTM layers + sigmoid head) and runs the forward
//! pass with nalgebra. Training happens elsewhere; dropout exists only at
//! training time and has no inference counterpart.
//!
//! The loaded model is shared read-only behind an `ArcSwapOption`, so an
//! admin-triggered reload swaps the artifact atomically under live
//! traffic. Inference is CPU-bound and runs on a blocking thread with a
//! hard cap; on timeout the caller re-weights and proceeds without the
//! model component.

pub mod features;

use crate::errors::{FraudError, FraudResult};
use arc_swap::ArcSwapOption;
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// On-disk artifact. Kernel layout follows the usual convention for
/// stacked LSTMs: per layer, `kernel` is input_dim x 4*units and
/// `recurrent_kernel` is units x 4*units, gates ordered i, f, g, o.
#[derive(Debug, Deserialize)]
struct ModelArtifact {
    model_version: String,
    sequence_length: usize,
    n_features: usize,
    layers: Vec<LayerArtifact>,
    output: OutputArtifact,
}

#[derive(Debug, Deserialize)]
struct LayerArtifact {
    units: usize,
    kernel: Vec<Vec<f64>>,
    recurrent_kernel: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct OutputArtifact {
    weights: Vec<f64>,
    bias: f64,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

struct LstmLayer {
    units: usize,
    /// 4*units x input_dim (transposed at load time).
    kernel_t: DMatrix<f64>,
    /// 4*units x units.
    recurrent_t: DMatrix<f64>,
    bias: DVector<f64>,
}

impl LstmLayer {
    fn from_artifact(layer: &LayerArtifact, input_dim: usize) -> FraudResult<Self> {
        let units = layer.units;
        if layer.kernel.len() != input_dim
            || layer.kernel.iter().any(|row| row.len() != 4 * units)
        {
            return Err(FraudError::ModelUnavailable(format!(
                "kernel shape mismatch: expected {}x{}",
                input_dim,
                4 * units
            )));
        }
        if layer.recurrent_kernel.len() != units
            || layer.recurrent_kernel.iter().any(|row| row.len() != 4 * units)
        {
            return Err(FraudError::ModelUnavailable(format!(
                "recurrent kernel shape mismatch: expected {}x{}",
                units,
                4 * units
            )));
        }
        if layer.bias.len() != 4 * units {
            return Err(FraudError::ModelUnavailable(format!(
                "bias length mismatch: expected {}",
                4 * units
            )));
        }

        let kernel = DMatrix::from_fn(input_dim, 4 * units, |r, c| layer.kernel[r][c]);
        let recurrent =
            DMatrix::from_fn(units, 4 * units, |r, c| layer.recurrent_kernel[r][c]);

        Ok(Self {
            units,
            kernel_t: kernel.transpose(),
            recurrent_t: recurrent.transpose(),
            bias: DVector::from_column_slice(&layer.bias),
        })
    }

    /// Run the layer over the input sequence, returning the hidden state
    /// for every timestep.
    fn forward(&self, inputs: &[DVector<f64>]) -> Vec<DVector<f64>> {
        let u = self.units;
        let mut h = DVector::zeros(u);
        let mut c = DVector::zeros(u);
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let z = &self.kernel_t * x + &self.recurrent_t * &h + &self.bias;

            let i = z.rows(0, u).map(sigmoid);
            let f = z.rows(u, u).map(sigmoid);
            let g = z.rows(2 * u, u).map(f64::tanh);
            let o = z.rows(3 * u, u).map(sigmoid);

            c = f.component_mul(&c) + i.component_mul(&g);
            h = o.component_mul(&c.map(f64::tanh));
            outputs.push(h.clone());
        }

        outputs
    }
}

/// A loaded, validated model. Immutable after construction.
pub struct FraudModel {
    version: String,
    sequence_length: usize,
    n_features: usize,
    layers: Vec<LstmLayer>,
    output_weights: DVector<f64>,
    output_bias: f64,
}

impl FraudModel {
    pub fn load(path: &Path) -> FraudResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FraudError::ModelUnavailable(format!("{}: {e}", path.display())))?;
        let artifact: ModelArtifact = serde_json::from_str(&raw)
            .map_err(|e| FraudError::ModelUnavailable(format!("malformed artifact: {e}")))?;
        Self::from_artifact(artifact)
    }

    fn from_artifact(artifact: ModelArtifact) -> FraudResult<Self> {
        if artifact.layers.is_empty() {
            return Err(FraudError::ModelUnavailable("no layers".to_string()));
        }

        let mut layers = Vec::with_capacity(artifact.layers.len());
        let mut input_dim = artifact.n_features;
        for layer in &artifact.layers {
            let built = LstmLayer::from_artifact(layer, input_dim)?;
            input_dim = built.units;
            layers.push(built);
        }

        if artifact.output.weights.len() != input_dim {
            return Err(FraudError::ModelUnavailable(format!(
                "output weights length mismatch: expected {input_dim}"
            )));
        }

        Ok(Self {
            version: artifact.model_version,
            sequence_length: artifact.sequence_length,
            n_features: artifact.n_features,
            layers,
            output_weights: DVector::from_column_slice(&artifact.output.weights),
            output_bias: artifact.output.bias,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Forward pass over one L x n_features sequence -> probability.
    pub fn score(&self, sequence: &DMatrix<f64>) -> FraudResult<f64> {
        if sequence.nrows() != self.sequence_length || sequence.ncols() != self.n_features {
            return Err(FraudError::ModelUnavailable(format!(
                "sequence shape {}x{} does not match model {}x{}",
                sequence.nrows(),
                sequence.ncols(),
                self.sequence_length,
                self.n_features
            )));
        }

        let mut states: Vec<DVector<f64>> = (0..sequence.nrows())
            .map(|t| sequence.row(t).transpose())
            .collect();

        for layer in &self.layers {
            states = layer.forward(&states);
        }

        // Only the final hidden state feeds the head.
        let last = states
            .last()
            .ok_or_else(|| FraudError::ModelUnavailable("empty sequence".to_string()))?;
        let logit = self.output_weights.dot(last) + self.output_bias;
        Ok(sigmoid(logit))
    }
}

/// Shared scorer handle. Absent artifact is a supported mode: the scoring
/// engine re-balances weights and runs rules + velocity only.
pub struct MlScorer {
    model: ArcSwapOption<FraudModel>,
    timeout: Duration,
}

impl MlScorer {
    /// Build a scorer with no model loaded.
    pub fn disabled(timeout: Duration) -> Self {
        Self {
            model: ArcSwapOption::empty(),
            timeout,
        }
    }

    /// Try to load the artifact at `path`; a missing or malformed file
    /// leaves the scorer in rules-only mode.
    pub fn load(path: &Path, timeout: Duration) -> Self {
        let scorer = Self::disabled(timeout);
        match FraudModel::load(path) {
            Ok(model) => {
                info!(version = %model.version(), "🧠 Fraud model loaded");
                scorer.model.store(Some(Arc::new(model)));
            }
            Err(e) => {
                warn!("Fraud model not loaded, using rule-based detection only: {e}");
            }
        }
        scorer
    }

    /// Atomically swap in a freshly loaded artifact. Admin action.
    pub fn reload(&self, path: &Path) -> FraudResult<String> {
        let model = FraudModel::load(path)?;
        let version = model.version().to_string();
        self.model.store(Some(Arc::new(model)));
        info!(version = %version, "🧠 Fraud model reloaded");
        Ok(version)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.load().is_some()
    }

    pub fn model_version(&self) -> Option<String> {
        self.model.load().as_ref().map(|m| m.version().to_string())
    }

    /// Sequence length of the loaded artifact, if any.
    pub fn loaded_sequence_length(&self) -> Option<usize> {
        self.model.load().as_ref().map(|m| m.sequence_length())
    }

    /// Score a sequence off the async runtime, capped at the configured
    /// inference timeout.
    pub async fn score(&self, sequence: DMatrix<f64>) -> FraudResult<f64> {
        let model = self
            .model
            .load_full()
            .ok_or_else(|| FraudError::ModelUnavailable("no artifact loaded".to_string()))?;

        let task = tokio::task::spawn_blocking(move || model.score(&sequence));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(FraudError::ModelUnavailable(format!(
                "inference task failed: {join_err}"
            ))),
            Err(_) => Err(FraudError::ModelUnavailable(
                "inference timed out".to_string(),
            )),
        }
    }
}
