/// Sequence driver: controller + memory interface + output layer, iterated
/// over time.
///
/// Per step t:
///   h_t, ctrl_t = controller(x_t, reads_{t-1}, ctrl_{t-1})
///   reads_t, M_t, iface_t = interface.step(h_t, M_{t-1}, iface_{t-1})
///   y_t = concat(h_t, reads_t) @ W_out + b_out
///
/// Steps are strictly sequential: step t consumes exactly what step t-1 returned.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::addressing::Attention;
use crate::config::ModelConfig;
use crate::controller::{Controller, ControllerNet, ControllerState};
use crate::error::{MemoryError, Result};
use crate::interface::{InterfaceParams, MemoryInterface};
use crate::linear::Linear;
use crate::memory::Memory;
use crate::state::InterfaceState;
use crate::tensor::{concat_cols, SimpleRng, Tensor};

/// All learnable parameters of a cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub controller: ControllerNet,
    pub interface: InterfaceParams,
    /// [H + R*C, O]
    pub output: Linear,
}

impl ModelParams {
    pub fn num_params(&self) -> usize {
        self.controller.num_params() + self.interface.num_params() + self.output.num_params()
    }
}

/// Recurrent state of a cell between steps.
#[derive(Clone, Debug)]
pub struct CellState {
    pub controller: ControllerState,
    pub interface: InterfaceState,
    pub memory: Memory,
    /// Read vectors of the previous step concatenated, [B, R*C].
    pub reads: Tensor,
}

pub struct MemoryCell {
    cfg: ModelConfig,
    controller: ControllerNet,
    interface: MemoryInterface,
    output: Linear,
}

impl MemoryCell {
    pub fn new(cfg: ModelConfig, seed: u64) -> Result<Self> {
        cfg.validate()?;
        let icfg = cfg.interface_config();
        let interface = MemoryInterface::new(icfg.clone(), seed)?;
        let read_size = interface.read_size();
        let mut rng = SimpleRng::new(seed.wrapping_add(1));
        let controller = ControllerNet::new(
            cfg.controller.kind,
            cfg.input_size,
            read_size,
            icfg.hidden_size,
            &mut rng,
        );
        let output = Linear::init(icfg.hidden_size + read_size, cfg.output_size, &mut rng);
        Self::from_params(cfg, ModelParams { controller, interface: interface.into_params(), output })
    }

    /// Rebuild from saved parameters. Every width is checked against the config.
    pub fn from_params(cfg: ModelConfig, params: ModelParams) -> Result<Self> {
        cfg.validate()?;
        let interface = MemoryInterface::with_params(cfg.interface_config(), params.interface)?;
        let read_size = interface.read_size();
        let hidden = cfg.controller.hidden_state_size;

        if params.controller.kind() != cfg.controller.kind {
            return Err(MemoryError::Config(format!(
                "controller params are {:?}, config asks for {:?}",
                params.controller.kind(), cfg.controller.kind
            )));
        }
        if params.controller.input_width() != cfg.input_size + read_size
            || params.controller.hidden_size() != hidden
        {
            return Err(MemoryError::ShapeMismatch {
                what: "controller params",
                expected: vec![cfg.input_size + read_size, hidden],
                actual: vec![params.controller.input_width(), params.controller.hidden_size()],
            });
        }
        if params.output.in_dim != hidden + read_size || params.output.out_dim != cfg.output_size {
            return Err(MemoryError::ShapeMismatch {
                what: "output layer",
                expected: vec![hidden + read_size, cfg.output_size],
                actual: vec![params.output.in_dim, params.output.out_dim],
            });
        }

        Ok(MemoryCell { cfg, controller: params.controller, interface, output: params.output })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.cfg
    }

    pub fn interface(&self) -> &MemoryInterface {
        &self.interface
    }

    pub fn params(&self) -> ModelParams {
        ModelParams {
            controller: self.controller.clone(),
            interface: self.interface.params().clone(),
            output: self.output.clone(),
        }
    }

    pub fn init_state(&self, batch: usize, addresses: usize) -> Result<CellState> {
        Ok(CellState {
            controller: self.controller.init_state(batch),
            interface: self.interface.init_state(batch, addresses)?,
            memory: self.interface.init_memory(batch, addresses, self.cfg.memory.init_value),
            reads: Tensor::zeros(&[batch, self.interface.read_size()]),
        })
    }

    /// One time step. `input`: [B, I]; returns output [B, O] and the next state.
    pub fn step(&self, input: &Tensor, state: &CellState) -> Result<(Tensor, CellState)> {
        input.expect_shape("cell input", &[state.memory.batch, self.cfg.input_size])?;
        let (hidden, controller) = self.controller.forward(input, &state.reads, &state.controller)?;
        let out = self.interface.step(&hidden, &state.memory, &state.interface)?;

        let read_refs: Vec<&Tensor> = out.read_vectors.iter().collect();
        let reads = concat_cols(&read_refs)?;
        let y = self.output.forward(&concat_cols(&[&hidden, &reads])?)?;

        Ok((y, CellState { controller, interface: out.state, memory: out.memory, reads }))
    }
}

/// Memory and attention after one step, kept for read-only inspection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub memory: Memory,
    pub read_attentions: Vec<Attention>,
    pub write_attentions: Vec<Attention>,
}

pub struct SequenceOutput {
    /// [B, T, O]
    pub outputs: Tensor,
    /// One snapshot per step when history recording is on.
    pub history: Option<Vec<StepSnapshot>>,
    pub final_state: CellState,
}

pub struct SequenceDriver {
    cell: MemoryCell,
}

impl SequenceDriver {
    pub fn new(cfg: ModelConfig, seed: u64) -> Result<Self> {
        Ok(SequenceDriver { cell: MemoryCell::new(cfg, seed)? })
    }

    pub fn from_cell(cell: MemoryCell) -> Self {
        SequenceDriver { cell }
    }

    pub fn cell(&self) -> &MemoryCell {
        &self.cell
    }

    /// Run a full sequence. `inputs`: [B, T, I].
    pub fn run(&self, inputs: &Tensor) -> Result<SequenceOutput> {
        let cfg = self.cell.config();
        if inputs.shape.len() != 3 || inputs.shape[2] != cfg.input_size {
            return Err(MemoryError::ShapeMismatch {
                what: "sequence inputs",
                expected: vec![inputs.shape.first().copied().unwrap_or(0), 0, cfg.input_size],
                actual: inputs.shape.clone(),
            });
        }
        let (batch, seq_len, in_dim) = (inputs.shape[0], inputs.shape[1], inputs.shape[2]);
        let addresses = cfg.memory.num_addresses.unwrap_or(seq_len);
        if batch == 0 {
            return Err(MemoryError::InvalidDimension { name: "batch" });
        }
        if addresses == 0 {
            return Err(MemoryError::InvalidDimension { name: "num_addresses" });
        }
        debug!(batch, seq_len, addresses, "running sequence");

        let out_dim = cfg.output_size;
        let mut outputs = Tensor::zeros(&[batch, seq_len, out_dim]);
        let mut history = cfg.record_history.then(|| Vec::with_capacity(seq_len));
        let mut state = self.cell.init_state(batch, addresses)?;
        let mut x_t = Tensor::zeros(&[batch, in_dim]);

        for t in 0..seq_len {
            for b in 0..batch {
                let src = (b * seq_len + t) * in_dim;
                x_t.data[b * in_dim..(b + 1) * in_dim].copy_from_slice(&inputs.data[src..src + in_dim]);
            }
            let (y, next) = self.cell.step(&x_t, &state)?;
            for b in 0..batch {
                let dst = (b * seq_len + t) * out_dim;
                outputs.data[dst..dst + out_dim].copy_from_slice(y.row(b));
            }
            if let Some(h) = history.as_mut() {
                h.push(StepSnapshot {
                    memory: next.memory.clone(),
                    read_attentions: next.interface.read_attentions().into_iter().cloned().collect(),
                    write_attentions: next.interface.write_attentions().into_iter().cloned().collect(),
                });
            }
            state = next;
        }

        Ok(SequenceOutput { outputs, history, final_state: state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_param_count() {
        let cfg = ModelConfig::test_config();
        let cell = MemoryCell::new(cfg.clone(), 42).unwrap();
        let p = cell.params();
        // controller: (I + R*C) * H + H; output: (H + R*C) * O + O
        let rc = 4;
        let expected_ctrl = (cfg.input_size + rc) * 8 + 8;
        let expected_out = (8 + rc) * cfg.output_size + cfg.output_size;
        assert_eq!(p.controller.num_params(), expected_ctrl);
        assert_eq!(p.output.num_params(), expected_out);
        assert_eq!(p.num_params(), expected_ctrl + expected_out + p.interface.num_params());
    }

    #[test]
    fn test_from_params_rejects_wrong_controller_kind() {
        let cell = MemoryCell::new(ModelConfig::test_config(), 1).unwrap();
        let params = cell.params();
        let cfg = ModelConfig::lstm_test_config();
        assert!(matches!(MemoryCell::from_params(cfg, params), Err(MemoryError::Config(_))));
    }

    #[test]
    fn test_step_threads_reads() {
        let cell = MemoryCell::new(ModelConfig::test_config(), 3).unwrap();
        let st = cell.init_state(2, 6).unwrap();
        assert!(st.reads.data.iter().all(|&x| x == 0.0));
        let x = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0], &[2, 4]).unwrap();
        let (y, next) = cell.step(&x, &st).unwrap();
        assert_eq!(y.shape, vec![2, 3]);
        assert_eq!(next.reads.shape, vec![2, 4]);
        assert_eq!(next.memory.shape(), [2, 6, 4]);
    }

    #[test]
    fn test_run_rejects_wrong_input_width() {
        let driver = SequenceDriver::new(ModelConfig::test_config(), 3).unwrap();
        let inputs = Tensor::zeros(&[1, 5, 3]);
        assert!(matches!(driver.run(&inputs), Err(MemoryError::ShapeMismatch { .. })));
    }
}
