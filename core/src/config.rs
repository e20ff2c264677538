/// Configuration for the memory interface and the sequence model around it.
///
/// Experiment files are YAML with `controller`, `memory` and `interface`
/// sections; JSON is accepted too (checkpoints embed the config as JSON).
/// All configs are immutable after construction and validated before any
/// component is built from them.

use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::error::{MemoryError, Result};

/// How a head blends content attention with its previous attention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// One scalar g: `sigmoid(g) * content + (1 - sigmoid(g)) * previous`.
    Interpolate,
    /// Three logits softmaxed over {previous, content, home (address 0)}.
    Selector,
}

impl GateMode {
    /// Number of raw gate parameters this mode consumes.
    pub fn width(self) -> usize {
        match self {
            GateMode::Interpolate => 1,
            GateMode::Selector => 3,
        }
    }
}

/// Nonlinearity applied to the raw query before content addressing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryActivation {
    Identity,
    Sigmoid,
}

/// Which recurrent controller drives the interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    FeedForward,
    Lstm,
}

/// Numeric settings threaded explicitly through construction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericConfig {
    /// Denominator floor for L1/L2 normalisation.
    pub eps: f32,
}

impl Default for NumericConfig {
    fn default() -> Self {
        NumericConfig { eps: 1e-8 }
    }
}

/// Everything the interface needs to build its heads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Controller hidden-state width H.
    pub hidden_size: usize,
    /// Memory content width C.
    pub content_width: usize,
    pub num_read_heads: usize,
    pub num_write_heads: usize,
    /// Width S of the shift kernel; odd, covers shifts -S/2..=S/2.
    pub shift_size: usize,
    pub use_content_addressing: bool,
    pub gate_mode: GateMode,
    pub query_activation: QueryActivation,
    #[serde(default)]
    pub numeric: NumericConfig,
}

impl InterfaceConfig {
    /// Test configuration: tiny interface for fast iteration.
    pub fn test_config() -> Self {
        InterfaceConfig {
            hidden_size: 8,
            content_width: 4,
            num_read_heads: 2,
            num_write_heads: 1,
            shift_size: 3,
            use_content_addressing: true,
            gate_mode: GateMode::Interpolate,
            query_activation: QueryActivation::Identity,
            numeric: NumericConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_read_heads == 0 {
            return Err(MemoryError::NoReadHeads);
        }
        if self.num_write_heads == 0 {
            return Err(MemoryError::NoWriteHeads);
        }
        if self.shift_size == 0 || self.shift_size % 2 == 0 {
            return Err(MemoryError::InvalidShiftSize(self.shift_size));
        }
        if self.hidden_size == 0 {
            return Err(MemoryError::InvalidDimension { name: "hidden_size" });
        }
        if self.content_width == 0 {
            return Err(MemoryError::InvalidDimension { name: "content_width" });
        }
        if !(self.numeric.eps > 0.0) {
            return Err(MemoryError::Config(format!(
                "numeric.eps must be positive, got {}", self.numeric.eps
            )));
        }
        Ok(())
    }
}

// ── Experiment file sections ────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(rename = "type")]
    pub kind: ControllerKind,
    pub hidden_state_size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of addresses A. `None` sizes the bank to the sequence length.
    #[serde(default)]
    pub num_addresses: Option<usize>,
    pub num_content_bits: usize,
    /// Constant every cell starts from at the beginning of a sequence.
    #[serde(default)]
    pub init_value: f32,
}

fn default_write_heads() -> usize { 1 }
fn default_shift_size() -> usize { 3 }
fn default_true() -> bool { true }
fn default_gate_mode() -> GateMode { GateMode::Interpolate }
fn default_query_activation() -> QueryActivation { QueryActivation::Identity }

/// Head settings as written in experiment files. Widths come from the
/// `controller` and `memory` sections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSection {
    pub num_read_heads: usize,
    #[serde(default = "default_write_heads")]
    pub num_write_heads: usize,
    #[serde(default = "default_shift_size")]
    pub shift_size: usize,
    #[serde(default = "default_true")]
    pub use_content_addressing: bool,
    #[serde(default = "default_gate_mode")]
    pub gate_mode: GateMode,
    #[serde(default = "default_query_activation")]
    pub query_activation: QueryActivation,
}

/// Full model configuration: controller + memory + interface + output layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_size: usize,
    pub output_size: usize,
    pub controller: ControllerConfig,
    pub memory: MemoryConfig,
    pub interface: InterfaceSection,
    #[serde(default)]
    pub numeric: NumericConfig,
    /// Keep a per-step memory/attention snapshot for downstream inspection.
    #[serde(default)]
    pub record_history: bool,
}

impl ModelConfig {
    /// Test configuration: small copy-task-sized model.
    pub fn test_config() -> Self {
        ModelConfig {
            input_size: 4,
            output_size: 3,
            controller: ControllerConfig { kind: ControllerKind::FeedForward, hidden_state_size: 8 },
            memory: MemoryConfig { num_addresses: Some(6), num_content_bits: 4, init_value: 0.0 },
            interface: InterfaceSection {
                num_read_heads: 1,
                num_write_heads: 1,
                shift_size: 3,
                use_content_addressing: true,
                gate_mode: GateMode::Interpolate,
                query_activation: QueryActivation::Identity,
            },
            numeric: NumericConfig::default(),
            record_history: false,
        }
    }

    /// Same as `test_config` with an LSTM controller.
    pub fn lstm_test_config() -> Self {
        let mut cfg = Self::test_config();
        cfg.controller.kind = ControllerKind::Lstm;
        cfg
    }

    /// Flatten the file sections into the interface's construction config.
    pub fn interface_config(&self) -> InterfaceConfig {
        InterfaceConfig {
            hidden_size: self.controller.hidden_state_size,
            content_width: self.memory.num_content_bits,
            num_read_heads: self.interface.num_read_heads,
            num_write_heads: self.interface.num_write_heads,
            shift_size: self.interface.shift_size,
            use_content_addressing: self.interface.use_content_addressing,
            gate_mode: self.interface.gate_mode,
            query_activation: self.interface.query_activation,
            numeric: self.numeric,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(MemoryError::InvalidDimension { name: "input_size" });
        }
        if self.output_size == 0 {
            return Err(MemoryError::InvalidDimension { name: "output_size" });
        }
        if self.memory.num_addresses == Some(0) {
            return Err(MemoryError::InvalidDimension { name: "memory.num_addresses" });
        }
        self.interface_config().validate()
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: ModelConfig = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: ModelConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loading model config");
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_test_config_valid() {
        assert!(InterfaceConfig::test_config().validate().is_ok());
    }

    #[test]
    fn test_even_shift_rejected() {
        let mut cfg = InterfaceConfig::test_config();
        cfg.shift_size = 4;
        assert!(matches!(cfg.validate(), Err(MemoryError::InvalidShiftSize(4))));
        cfg.shift_size = 0;
        assert!(matches!(cfg.validate(), Err(MemoryError::InvalidShiftSize(0))));
    }

    #[test]
    fn test_zero_heads_rejected() {
        let mut cfg = InterfaceConfig::test_config();
        cfg.num_read_heads = 0;
        assert!(matches!(cfg.validate(), Err(MemoryError::NoReadHeads)));
        let mut cfg = InterfaceConfig::test_config();
        cfg.num_write_heads = 0;
        assert!(matches!(cfg.validate(), Err(MemoryError::NoWriteHeads)));
    }

    #[test]
    fn test_gate_widths() {
        assert_eq!(GateMode::Interpolate.width(), 1);
        assert_eq!(GateMode::Selector.width(), 3);
    }

    #[test]
    fn test_yaml_defaults_filled() {
        let yaml = "
input_size: 3
output_size: 2
controller:
  type: lstm
  hidden_state_size: 10
memory:
  num_content_bits: 5
interface:
  num_read_heads: 2
";
        let cfg = ModelConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.controller.kind, ControllerKind::Lstm);
        assert_eq!(cfg.memory.num_addresses, None);
        assert_eq!(cfg.interface.num_write_heads, 1);
        assert_eq!(cfg.interface.shift_size, 3);
        assert!(cfg.interface.use_content_addressing);
        assert_eq!(cfg.numeric, NumericConfig::default());

        let icfg = cfg.interface_config();
        assert_eq!(icfg.hidden_size, 10);
        assert_eq!(icfg.content_width, 5);
        assert_eq!(icfg.num_read_heads, 2);
    }

    #[test]
    fn test_yaml_invalid_shift_fails_on_load() {
        let yaml = "
input_size: 3
output_size: 2
controller: { type: feed_forward, hidden_state_size: 10 }
memory: { num_content_bits: 5 }
interface: { num_read_heads: 1, shift_size: 2 }
";
        assert!(matches!(ModelConfig::from_yaml_str(yaml), Err(MemoryError::InvalidShiftSize(2))));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        assert!(matches!(ModelConfig::from_yaml_str("input_size: [oops"), Err(MemoryError::Config(_))));
    }
}
