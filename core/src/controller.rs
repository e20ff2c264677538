/// Controllers that produce the hidden state driving the memory interface.
///
/// Input to every controller at step t is concat(x_t, reads_{t-1}), where
/// reads_{t-1} are the read vectors returned by the interface on the previous
/// step (zeros on the first step).
///
/// FeedForward: h_t = tanh(z_t @ W + b)
/// LSTM:        [i, f, g, o] = concat(z_t, h_{t-1}) @ W + b
///              c_t = sigmoid(f) * c_{t-1} + sigmoid(i) * tanh(g)
///              h_t = sigmoid(o) * tanh(c_t)

use serde::{Serialize, Deserialize};

use crate::config::ControllerKind;
use crate::error::{MemoryError, Result};
use crate::linear::Linear;
use crate::tensor::{concat_cols, sigmoid_f32, SimpleRng, Tensor};

/// One recurrent controller step.
pub trait Controller {
    type State: Clone;

    fn hidden_size(&self) -> usize;

    fn init_state(&self, batch: usize) -> Self::State;

    /// `input`: [B, I], `prev_reads`: [B, R*C]. Returns hidden [B, H] and next state.
    fn forward(&self, input: &Tensor, prev_reads: &Tensor, state: &Self::State) -> Result<(Tensor, Self::State)>;
}

// ── Feed-forward ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardController {
    pub layer: Linear,
}

impl FeedForwardController {
    pub fn new(input_size: usize, read_size: usize, hidden_size: usize, rng: &mut SimpleRng) -> Self {
        FeedForwardController { layer: Linear::init(input_size + read_size, hidden_size, rng) }
    }
}

impl Controller for FeedForwardController {
    type State = ();

    fn hidden_size(&self) -> usize {
        self.layer.out_dim
    }

    fn init_state(&self, _batch: usize) -> Self::State {}

    fn forward(&self, input: &Tensor, prev_reads: &Tensor, _state: &()) -> Result<(Tensor, ())> {
        let z = concat_cols(&[input, prev_reads])?;
        let mut h = self.layer.forward(&z)?;
        h.data.iter_mut().for_each(|x| *x = x.tanh());
        Ok((h, ()))
    }
}

// ── LSTM ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LstmController {
    /// [I + R*C + H, 4H], gate order i, f, g, o.
    pub layer: Linear,
    pub hidden_size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LstmState {
    /// [B, H]
    pub h: Tensor,
    /// [B, H]
    pub c: Tensor,
}

impl LstmController {
    pub fn new(input_size: usize, read_size: usize, hidden_size: usize, rng: &mut SimpleRng) -> Self {
        let mut layer = Linear::init(input_size + read_size + hidden_size, 4 * hidden_size, rng);
        // forget-gate bias 1.0
        for b in &mut layer.b[hidden_size..2 * hidden_size] {
            *b = 1.0;
        }
        LstmController { layer, hidden_size }
    }
}

impl Controller for LstmController {
    type State = LstmState;

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn init_state(&self, batch: usize) -> LstmState {
        LstmState {
            h: Tensor::zeros(&[batch, self.hidden_size]),
            c: Tensor::zeros(&[batch, self.hidden_size]),
        }
    }

    fn forward(&self, input: &Tensor, prev_reads: &Tensor, state: &LstmState) -> Result<(Tensor, LstmState)> {
        let z = concat_cols(&[input, prev_reads, &state.h])?;
        let pre = self.layer.forward(&z)?;
        let hd = self.hidden_size;
        let batch = z.shape[0];
        pre.expect_shape("lstm gate pre-activations", &[batch, 4 * hd])?;
        state.c.expect_shape("lstm cell state", &[batch, hd])?;

        let mut h = Tensor::zeros(&[batch, hd]);
        let mut c = Tensor::zeros(&[batch, hd]);
        for b in 0..batch {
            let g = pre.row(b);
            for j in 0..hd {
                let i_g = sigmoid_f32(g[j]);
                let f_g = sigmoid_f32(g[hd + j]);
                let c_hat = g[2 * hd + j].tanh();
                let o_g = sigmoid_f32(g[3 * hd + j]);
                let c_t = f_g * state.c.data[b * hd + j] + i_g * c_hat;
                c.data[b * hd + j] = c_t;
                h.data[b * hd + j] = o_g * c_t.tanh();
            }
        }
        Ok((h.clone(), LstmState { h, c }))
    }
}

// ── Runtime selection ────────────────────────────────────────────────

/// Controller chosen by `ControllerKind` at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControllerNet {
    FeedForward(FeedForwardController),
    Lstm(LstmController),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ControllerState {
    FeedForward,
    Lstm(LstmState),
}

impl ControllerNet {
    pub fn new(kind: ControllerKind, input_size: usize, read_size: usize, hidden_size: usize, rng: &mut SimpleRng) -> Self {
        match kind {
            ControllerKind::FeedForward =>
                ControllerNet::FeedForward(FeedForwardController::new(input_size, read_size, hidden_size, rng)),
            ControllerKind::Lstm =>
                ControllerNet::Lstm(LstmController::new(input_size, read_size, hidden_size, rng)),
        }
    }

    pub fn kind(&self) -> ControllerKind {
        match self {
            ControllerNet::FeedForward(_) => ControllerKind::FeedForward,
            ControllerNet::Lstm(_) => ControllerKind::Lstm,
        }
    }

    /// Width of concat(input, reads) the controller expects.
    pub fn input_width(&self) -> usize {
        match self {
            ControllerNet::FeedForward(c) => c.layer.in_dim,
            ControllerNet::Lstm(c) => c.layer.in_dim.saturating_sub(c.hidden_size),
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            ControllerNet::FeedForward(c) => c.layer.num_params(),
            ControllerNet::Lstm(c) => c.layer.num_params(),
        }
    }
}

impl Controller for ControllerNet {
    type State = ControllerState;

    fn hidden_size(&self) -> usize {
        match self {
            ControllerNet::FeedForward(c) => c.hidden_size(),
            ControllerNet::Lstm(c) => c.hidden_size(),
        }
    }

    fn init_state(&self, batch: usize) -> ControllerState {
        match self {
            ControllerNet::FeedForward(_) => ControllerState::FeedForward,
            ControllerNet::Lstm(c) => ControllerState::Lstm(c.init_state(batch)),
        }
    }

    fn forward(&self, input: &Tensor, prev_reads: &Tensor, state: &ControllerState) -> Result<(Tensor, ControllerState)> {
        match (self, state) {
            (ControllerNet::FeedForward(c), ControllerState::FeedForward) => {
                let (h, ()) = c.forward(input, prev_reads, &())?;
                Ok((h, ControllerState::FeedForward))
            }
            (ControllerNet::Lstm(c), ControllerState::Lstm(s)) => {
                let (h, next) = c.forward(input, prev_reads, s)?;
                Ok((h, ControllerState::Lstm(next)))
            }
            _ => Err(MemoryError::Config(format!(
                "controller state does not belong to a {:?} controller", self.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(batch: usize, width: usize, scale: f32) -> Tensor {
        let data = (0..batch * width).map(|i| ((i % 7) as f32 - 3.0) * scale).collect();
        Tensor::from_vec(data, &[batch, width]).unwrap()
    }

    #[test]
    fn test_feed_forward_bounded() {
        let ctrl = FeedForwardController::new(3, 4, 6, &mut SimpleRng::new(42));
        let (h, ()) = ctrl.forward(&inputs(2, 3, 10.0), &inputs(2, 4, 10.0), &()).unwrap();
        assert_eq!(h.shape, vec![2, 6]);
        assert!(h.data.iter().all(|x| x.abs() <= 1.0));
    }

    #[test]
    fn test_lstm_state_evolves() {
        let ctrl = LstmController::new(3, 4, 5, &mut SimpleRng::new(7));
        let s0 = ctrl.init_state(2);
        let (h1, s1) = ctrl.forward(&inputs(2, 3, 0.5), &inputs(2, 4, 0.5), &s0).unwrap();
        assert_eq!(h1.shape, vec![2, 5]);
        assert_eq!(h1, s1.h);
        assert_ne!(s1.c, s0.c);
        let (h2, _) = ctrl.forward(&inputs(2, 3, 0.5), &inputs(2, 4, 0.5), &s1).unwrap();
        assert_ne!(h1, h2, "recurrent state should change the output");
        assert!(h2.data.iter().all(|x| x.is_finite() && x.abs() < 1.0));
    }

    #[test]
    fn test_lstm_forget_bias() {
        let ctrl = LstmController::new(2, 0, 3, &mut SimpleRng::new(1));
        assert!(ctrl.layer.b[3..6].iter().all(|&b| b == 1.0));
        assert!(ctrl.layer.b[..3].iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_net_dispatch_and_mismatch() {
        let mut rng = SimpleRng::new(3);
        let ff = ControllerNet::new(ControllerKind::FeedForward, 2, 2, 4, &mut rng);
        let lstm = ControllerNet::new(ControllerKind::Lstm, 2, 2, 4, &mut rng);
        assert_eq!(ff.input_width(), 4);
        assert_eq!(lstm.input_width(), 4);
        let x = inputs(1, 2, 1.0);
        let r = inputs(1, 2, 1.0);
        let st = lstm.init_state(1);
        assert!(lstm.forward(&x, &r, &st).is_ok());
        assert!(matches!(ff.forward(&x, &r, &st), Err(MemoryError::Config(_))));
    }
}
