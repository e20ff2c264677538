/// Read/write interface between a controller and the external memory bank.
///
/// Per step (hidden state h, previous memory M, previous state):
///   for each read head r:
///     p_r = h @ W_r + b_r                    → {q, beta, g, s, gamma}
///     w_r = address(p_r, M, w_r_prev)
///     read_r = w_r^T · M                     [B, C]
///   for each write head k (all addressed against the previous M):
///     p_k = h @ W_k + b_k                    → {q, beta, g, s, gamma, e, a}
///     w_k = address(p_k, M, w_k_prev)
///   M' = fold_k  M ⊙ (1 - w_k ⊗ sigmoid(e_k)) + w_k ⊗ sigmoid(a_k)
///
/// The interface owns only the projection weights. Memory and head state are
/// passed in and returned; nothing is retained between calls.

use serde::{Serialize, Deserialize};
use tracing::{debug, trace};

use crate::addressing::{address, AddressingParams, ShiftKernel};
use crate::config::{InterfaceConfig, QueryActivation};
use crate::error::{MemoryError, Result};
use crate::layout::{HeadKind, HeadParams, ParamLayout};
use crate::linear::Linear;
use crate::memory::Memory;
use crate::state::{HeadState, InterfaceState};
use crate::tensor::{sigmoid_f32, SimpleRng, Tensor};

/// Trainable projections, one per head: hidden [H] → bundle [P].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterfaceParams {
    pub read: Vec<Linear>,
    pub write: Vec<Linear>,
}

impl InterfaceParams {
    pub fn num_params(&self) -> usize {
        self.read.iter().chain(&self.write).map(Linear::num_params).sum()
    }
}

/// Everything one step produces.
#[derive(Clone, Debug)]
pub struct StepOutput {
    /// One [B, C] tensor per read head, in head order.
    pub read_vectors: Vec<Tensor>,
    pub memory: Memory,
    pub state: InterfaceState,
}

#[derive(Clone, Debug)]
pub struct MemoryInterface {
    cfg: InterfaceConfig,
    read_layout: ParamLayout,
    write_layout: ParamLayout,
    params: InterfaceParams,
}

impl MemoryInterface {
    /// Build with freshly initialised projections.
    pub fn new(cfg: InterfaceConfig, seed: u64) -> Result<Self> {
        cfg.validate()?;
        let mut rng = SimpleRng::new(seed);
        let read_width = ParamLayout::new(HeadKind::Read, &cfg)?.width();
        let write_width = ParamLayout::new(HeadKind::Write, &cfg)?.width();
        let params = InterfaceParams {
            read: (0..cfg.num_read_heads)
                .map(|_| Linear::init(cfg.hidden_size, read_width, &mut rng))
                .collect(),
            write: (0..cfg.num_write_heads)
                .map(|_| Linear::init(cfg.hidden_size, write_width, &mut rng))
                .collect(),
        };
        Self::with_params(cfg, params)
    }

    /// Build around existing projections. Head counts and every projection's
    /// input/output width are checked against the config here, not at step time.
    pub fn with_params(cfg: InterfaceConfig, params: InterfaceParams) -> Result<Self> {
        cfg.validate()?;
        let read_layout = ParamLayout::new(HeadKind::Read, &cfg)?;
        let write_layout = ParamLayout::new(HeadKind::Write, &cfg)?;

        if params.read.len() != cfg.num_read_heads {
            return Err(MemoryError::Config(format!(
                "expected {} read projections, got {}", cfg.num_read_heads, params.read.len()
            )));
        }
        if params.write.len() != cfg.num_write_heads {
            return Err(MemoryError::Config(format!(
                "expected {} write projections, got {}", cfg.num_write_heads, params.write.len()
            )));
        }
        let heads = params.read.iter().map(|p| (p, &read_layout, "read"))
            .chain(params.write.iter().map(|p| (p, &write_layout, "write")));
        for (i, (proj, layout, kind)) in heads.enumerate() {
            let head = format!("{kind} head #{i}");
            if proj.in_dim != cfg.hidden_size {
                return Err(MemoryError::ProjectionInputMismatch {
                    head,
                    expected: cfg.hidden_size,
                    actual: proj.in_dim,
                });
            }
            if proj.out_dim != layout.width() {
                return Err(MemoryError::ParamWidthMismatch {
                    head,
                    expected: layout.width(),
                    actual: proj.out_dim,
                });
            }
        }

        debug!(
            read_heads = cfg.num_read_heads,
            write_heads = cfg.num_write_heads,
            read_bundle = read_layout.width(),
            write_bundle = write_layout.width(),
            shift_size = cfg.shift_size,
            "memory interface built"
        );
        Ok(MemoryInterface { cfg, read_layout, write_layout, params })
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.cfg
    }

    pub fn params(&self) -> &InterfaceParams {
        &self.params
    }

    pub fn into_params(self) -> InterfaceParams {
        self.params
    }

    pub fn read_layout(&self) -> &ParamLayout {
        &self.read_layout
    }

    pub fn write_layout(&self) -> &ParamLayout {
        &self.write_layout
    }

    /// Width of all read vectors concatenated: R * C.
    pub fn read_size(&self) -> usize {
        self.cfg.num_read_heads * self.cfg.content_width
    }

    /// Fresh state for a new sequence: every head on address 0, gate on
    /// "previous", zero shift.
    pub fn init_state(&self, batch: usize, addresses: usize) -> Result<InterfaceState> {
        let head = || HeadState::initial(batch, addresses, self.cfg.gate_mode, self.cfg.shift_size);
        Ok(InterfaceState {
            read_heads: (0..self.cfg.num_read_heads).map(|_| head()).collect::<Result<_>>()?,
            write_heads: (0..self.cfg.num_write_heads).map(|_| head()).collect::<Result<_>>()?,
        })
    }

    /// Fresh memory bank matching this interface's content width.
    pub fn init_memory(&self, batch: usize, addresses: usize, init: f32) -> Memory {
        Memory::new(batch, addresses, self.cfg.content_width, init)
    }

    pub fn step(&self, hidden: &Tensor, memory: &Memory, state: &InterfaceState) -> Result<StepOutput> {
        self.check_inputs(hidden, memory, state)?;

        let mut read_vectors = Vec::with_capacity(self.cfg.num_read_heads);
        let mut read_heads = Vec::with_capacity(self.cfg.num_read_heads);
        for (i, (proj, prev)) in self.params.read.iter().zip(&state.read_heads).enumerate() {
            let (head, _) = self.address_head(&self.read_layout, proj, hidden, memory, prev)?;
            trace!(head = i, peak = head.attention.argmax(0), "read head addressed");
            read_vectors.push(memory.read(&head.attention)?);
            read_heads.push(head);
        }

        let mut new_memory = memory.clone();
        let mut write_heads = Vec::with_capacity(self.cfg.num_write_heads);
        for (i, (proj, prev)) in self.params.write.iter().zip(&state.write_heads).enumerate() {
            let (head, raw) = self.address_head(&self.write_layout, proj, hidden, memory, prev)?;
            let erase = activate(raw.erase, "erase")?;
            let add = activate(raw.add, "add")?;
            trace!(head = i, peak = head.attention.argmax(0), "write head addressed");
            new_memory = new_memory.write(&head.attention, &erase, &add)?;
            write_heads.push(head);
        }

        Ok(StepOutput {
            read_vectors,
            memory: new_memory,
            state: InterfaceState { read_heads, write_heads },
        })
    }

    fn address_head(
        &self,
        layout: &ParamLayout,
        proj: &Linear,
        hidden: &Tensor,
        memory: &Memory,
        prev: &HeadState,
    ) -> Result<(HeadState, HeadParams)> {
        let bundle = proj.forward(hidden)?;
        let mut raw = layout.split(&bundle)?;
        if self.cfg.query_activation == QueryActivation::Sigmoid {
            if let Some(q) = raw.query.as_mut() {
                q.iter_mut().for_each(|x| *x = sigmoid_f32(*x));
            }
        }

        let kernel = ShiftKernel::from_logits(&raw.shift, memory.batch, self.cfg.shift_size)?;
        let addressed = address(
            AddressingParams {
                query: raw.query.as_deref(),
                strength: raw.strength.as_deref(),
                gate: &raw.gate,
                shift: kernel,
                gamma: &raw.gamma,
            },
            memory,
            &prev.attention,
            self.cfg.gate_mode,
            self.cfg.numeric.eps,
        )?;

        let head = HeadState {
            attention: addressed.attention,
            gate: addressed.gate,
            shift: addressed.shift,
        };
        Ok((head, raw))
    }

    fn check_inputs(&self, hidden: &Tensor, memory: &Memory, state: &InterfaceState) -> Result<()> {
        if memory.batch == 0 {
            return Err(MemoryError::InvalidDimension { name: "batch" });
        }
        if memory.addresses == 0 {
            return Err(MemoryError::InvalidDimension { name: "num_addresses" });
        }
        memory.check_buffer()?;
        hidden.expect_shape("controller hidden state", &[memory.batch, self.cfg.hidden_size])?;
        if memory.width != self.cfg.content_width {
            return Err(MemoryError::ShapeMismatch {
                what: "memory content width",
                expected: vec![memory.batch, memory.addresses, self.cfg.content_width],
                actual: memory.shape().to_vec(),
            });
        }
        if state.read_heads.len() != self.cfg.num_read_heads
            || state.write_heads.len() != self.cfg.num_write_heads
        {
            return Err(MemoryError::ShapeMismatch {
                what: "interface state head count",
                expected: vec![self.cfg.num_read_heads, self.cfg.num_write_heads],
                actual: vec![state.read_heads.len(), state.write_heads.len()],
            });
        }
        for head in state.read_heads.iter().chain(&state.write_heads) {
            let w = &head.attention;
            w.check_buffer("head attention buffer")?;
            if w.batch != memory.batch || w.addresses != memory.addresses {
                return Err(MemoryError::ShapeMismatch {
                    what: "head attention vs memory",
                    expected: vec![memory.batch, memory.addresses],
                    actual: vec![w.batch, w.addresses],
                });
            }
        }
        Ok(())
    }
}

fn activate(raw: Option<Vec<f32>>, name: &str) -> Result<Vec<f32>> {
    let mut v = raw.ok_or_else(|| MemoryError::Config(format!("write head layout has no {name} slot")))?;
    v.iter_mut().for_each(|x| *x = sigmoid_f32(*x));
    Ok(v)
}
