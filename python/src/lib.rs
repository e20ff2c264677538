//! PyO3 bindings for the memory-augmented decoder core.
//!
//! Thin wrappers over the Rust core. Tensors cross the boundary as flat
//! row-major lists plus explicit dimensions. No Python-side math.

use pyo3::prelude::*;
use pyo3::exceptions::PyValueError;
use pyo3::types::PyDict;

use mad_memory_core::config::{
    GateMode, InterfaceConfig as RustInterfaceConfig, ModelConfig as RustModelConfig,
    NumericConfig, QueryActivation,
};
use mad_memory_core::driver::SequenceDriver as RustSequenceDriver;
use mad_memory_core::interface::MemoryInterface as RustMemoryInterface;
use mad_memory_core::memory::Memory;
use mad_memory_core::state::InterfaceState as RustInterfaceState;
use mad_memory_core::tensor::Tensor;
use mad_memory_core::checkpoint::{load_cell as rust_load_cell, save_checkpoint as rust_save_checkpoint};
use mad_memory_core::MemoryError;

fn to_py_err(e: MemoryError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse_gate_mode(s: &str) -> PyResult<GateMode> {
    match s {
        "interpolate" => Ok(GateMode::Interpolate),
        "selector" => Ok(GateMode::Selector),
        other => Err(PyValueError::new_err(format!(
            "gate_mode must be 'interpolate' or 'selector', got '{other}'"
        ))),
    }
}

fn parse_query_activation(s: &str) -> PyResult<QueryActivation> {
    match s {
        "identity" => Ok(QueryActivation::Identity),
        "sigmoid" => Ok(QueryActivation::Sigmoid),
        other => Err(PyValueError::new_err(format!(
            "query_activation must be 'identity' or 'sigmoid', got '{other}'"
        ))),
    }
}

// ── InterfaceConfig ──────────────────────────────────────────────────

#[pyclass(frozen)]
struct InterfaceConfig {
    inner: RustInterfaceConfig,
}

#[pymethods]
impl InterfaceConfig {
    #[new]
    #[pyo3(signature = (
        hidden_size, content_width, num_read_heads, num_write_heads=1, shift_size=3,
        use_content_addressing=true, gate_mode="interpolate", query_activation="identity", eps=1e-8
    ))]
    fn new(
        hidden_size: usize,
        content_width: usize,
        num_read_heads: usize,
        num_write_heads: usize,
        shift_size: usize,
        use_content_addressing: bool,
        gate_mode: &str,
        query_activation: &str,
        eps: f32,
    ) -> PyResult<Self> {
        let inner = RustInterfaceConfig {
            hidden_size,
            content_width,
            num_read_heads,
            num_write_heads,
            shift_size,
            use_content_addressing,
            gate_mode: parse_gate_mode(gate_mode)?,
            query_activation: parse_query_activation(query_activation)?,
            numeric: NumericConfig { eps },
        };
        inner.validate().map_err(to_py_err)?;
        Ok(InterfaceConfig { inner })
    }

    #[getter]
    fn hidden_size(&self) -> usize { self.inner.hidden_size }
    #[getter]
    fn content_width(&self) -> usize { self.inner.content_width }
    #[getter]
    fn num_read_heads(&self) -> usize { self.inner.num_read_heads }
    #[getter]
    fn num_write_heads(&self) -> usize { self.inner.num_write_heads }
    #[getter]
    fn shift_size(&self) -> usize { self.inner.shift_size }
}

// ── InterfaceState ───────────────────────────────────────────────────

#[pyclass(frozen)]
struct InterfaceState {
    inner: RustInterfaceState,
}

#[pymethods]
impl InterfaceState {
    /// Per read head, flat [batch * addresses] attention.
    fn read_attentions(&self) -> Vec<Vec<f32>> {
        self.inner.read_attentions().into_iter().map(|w| w.data.clone()).collect()
    }

    /// Per write head, flat [batch * addresses] attention.
    fn write_attentions(&self) -> Vec<Vec<f32>> {
        self.inner.write_attentions().into_iter().map(|w| w.data.clone()).collect()
    }
}

// ── MemoryInterface ──────────────────────────────────────────────────

#[pyclass]
struct MemoryInterface {
    inner: RustMemoryInterface,
}

#[pymethods]
impl MemoryInterface {
    #[new]
    #[pyo3(signature = (cfg, seed=0))]
    fn new(cfg: &InterfaceConfig, seed: u64) -> PyResult<Self> {
        let inner = RustMemoryInterface::new(cfg.inner.clone(), seed).map_err(to_py_err)?;
        Ok(MemoryInterface { inner })
    }

    fn num_params(&self) -> usize {
        self.inner.params().num_params()
    }

    fn init_state(&self, batch: usize, addresses: usize) -> PyResult<InterfaceState> {
        let inner = self.inner.init_state(batch, addresses).map_err(to_py_err)?;
        Ok(InterfaceState { inner })
    }

    /// One step. `hidden` is flat [batch * hidden_size], `memory` flat
    /// [batch * addresses * content_width]. Returns (read_vectors, memory, state).
    fn step(
        &self,
        hidden: Vec<f32>,
        memory: Vec<f32>,
        batch: usize,
        addresses: usize,
        state: &InterfaceState,
    ) -> PyResult<(Vec<Vec<f32>>, Vec<f32>, InterfaceState)> {
        let cfg = self.inner.config();
        let hidden = Tensor::from_vec(hidden, &[batch, cfg.hidden_size]).map_err(to_py_err)?;
        let memory = Memory::from_vec(memory, batch, addresses, cfg.content_width).map_err(to_py_err)?;
        let out = self.inner.step(&hidden, &memory, &state.inner).map_err(to_py_err)?;
        let reads = out.read_vectors.into_iter().map(|r| r.data).collect();
        Ok((reads, out.memory.data, InterfaceState { inner: out.state }))
    }
}

// ── ModelConfig ──────────────────────────────────────────────────────

#[pyclass(frozen)]
struct ModelConfig {
    inner: RustModelConfig,
}

#[pymethods]
impl ModelConfig {
    /// Load an experiment file (YAML, or JSON for `.json` paths).
    #[staticmethod]
    fn from_file(path: &str) -> PyResult<Self> {
        let inner = RustModelConfig::from_file(std::path::Path::new(path)).map_err(to_py_err)?;
        Ok(ModelConfig { inner })
    }

    #[staticmethod]
    fn from_yaml(text: &str) -> PyResult<Self> {
        let inner = RustModelConfig::from_yaml_str(text).map_err(to_py_err)?;
        Ok(ModelConfig { inner })
    }

    fn to_yaml(&self) -> PyResult<String> {
        self.inner.to_yaml_string().map_err(to_py_err)
    }

    #[getter]
    fn input_size(&self) -> usize { self.inner.input_size }
    #[getter]
    fn output_size(&self) -> usize { self.inner.output_size }
}

// ── SequenceDriver ───────────────────────────────────────────────────

#[pyclass]
struct SequenceDriver {
    inner: RustSequenceDriver,
}

#[pymethods]
impl SequenceDriver {
    #[new]
    #[pyo3(signature = (cfg, seed=0))]
    fn new(cfg: &ModelConfig, seed: u64) -> PyResult<Self> {
        let inner = RustSequenceDriver::new(cfg.inner.clone(), seed).map_err(to_py_err)?;
        Ok(SequenceDriver { inner })
    }

    fn num_params(&self) -> usize {
        self.inner.cell().params().num_params()
    }

    /// Run a sequence. `inputs` is flat [batch * seq_len * input_size].
    /// Returns a dict with "outputs" (flat [batch * seq_len * output_size])
    /// and, when history recording is on, "memory_history" and
    /// "read_attention_history" (one entry per step).
    fn run<'py>(&self, py: Python<'py>, inputs: Vec<f32>, batch: usize, seq_len: usize) -> PyResult<Bound<'py, PyDict>> {
        let in_dim = self.inner.cell().config().input_size;
        let inputs = Tensor::from_vec(inputs, &[batch, seq_len, in_dim]).map_err(to_py_err)?;
        let out = self.inner.run(&inputs).map_err(to_py_err)?;

        let dict = PyDict::new(py);
        dict.set_item("outputs", out.outputs.data)?;
        dict.set_item("num_addresses", out.final_state.memory.addresses)?;
        if let Some(history) = out.history {
            let memories: Vec<Vec<f32>> = history.iter().map(|s| s.memory.data.clone()).collect();
            let reads: Vec<Vec<Vec<f32>>> = history
                .iter()
                .map(|s| s.read_attentions.iter().map(|w| w.data.clone()).collect())
                .collect();
            dict.set_item("memory_history", memories)?;
            dict.set_item("read_attention_history", reads)?;
        }
        Ok(dict)
    }
}

// ── Checkpoints ──────────────────────────────────────────────────────

#[pyfunction]
fn save_checkpoint(path: &str, driver: &SequenceDriver) -> PyResult<()> {
    let cell = driver.inner.cell();
    rust_save_checkpoint(std::path::Path::new(path), &cell.params(), cell.config())
        .map_err(|e| PyValueError::new_err(format!("save_checkpoint failed: {e}")))
}

#[pyfunction]
fn load_checkpoint(path: &str) -> PyResult<SequenceDriver> {
    let cell = rust_load_cell(std::path::Path::new(path))
        .map_err(|e| PyValueError::new_err(format!("load_checkpoint failed: {e}")))?;
    Ok(SequenceDriver { inner: RustSequenceDriver::from_cell(cell) })
}

// ── Module ───────────────────────────────────────────────────────────

#[pymodule]
fn mad_memory(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<InterfaceConfig>()?;
    m.add_class::<InterfaceState>()?;
    m.add_class::<MemoryInterface>()?;
    m.add_class::<ModelConfig>()?;
    m.add_class::<SequenceDriver>()?;
    m.add_function(wrap_pyfunction!(save_checkpoint, m)?)?;
    m.add_function(wrap_pyfunction!(load_checkpoint, m)?)?;
    Ok(())
}
