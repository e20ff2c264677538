/// Parameter layout for head bundles.
///
/// A head's linear projection emits one flat row of P values per batch element.
/// The layout is a fixed table of (kind, offset, width) slots computed once when
/// the interface is built:
///
///   read head:  [query C][strength 1][gate G][shift S][gamma 1]
///   write head: [query C][strength 1][gate G][shift S][gamma 1][erase C][add C]
///
/// `query` and `strength` are omitted when content addressing is disabled;
/// G is 1 (interpolate) or 3 (selector).

use serde::{Serialize, Deserialize};

use crate::config::InterfaceConfig;
use crate::error::{MemoryError, Result};
use crate::tensor::Tensor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadKind {
    Read,
    Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Query,
    Strength,
    Gate,
    Shift,
    Gamma,
    Erase,
    Add,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSlot {
    pub kind: ParamKind,
    pub offset: usize,
    pub width: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamLayout {
    pub head: HeadKind,
    slots: Vec<ParamSlot>,
    width: usize,
}

/// One head's raw parameters split out of the bundle, each [batch, slot width].
#[derive(Clone, Debug, PartialEq)]
pub struct HeadParams {
    pub query: Option<Vec<f32>>,
    pub strength: Option<Vec<f32>>,
    pub gate: Vec<f32>,
    pub shift: Vec<f32>,
    pub gamma: Vec<f32>,
    pub erase: Option<Vec<f32>>,
    pub add: Option<Vec<f32>>,
}

impl ParamLayout {
    pub fn new(head: HeadKind, cfg: &InterfaceConfig) -> Result<Self> {
        cfg.validate()?;
        let c = cfg.content_width;
        let mut sizes: Vec<(ParamKind, usize)> = Vec::with_capacity(7);
        if cfg.use_content_addressing {
            sizes.push((ParamKind::Query, c));
            sizes.push((ParamKind::Strength, 1));
        }
        sizes.push((ParamKind::Gate, cfg.gate_mode.width()));
        sizes.push((ParamKind::Shift, cfg.shift_size));
        sizes.push((ParamKind::Gamma, 1));
        if head == HeadKind::Write {
            sizes.push((ParamKind::Erase, c));
            sizes.push((ParamKind::Add, c));
        }

        let mut slots = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for (kind, width) in sizes {
            slots.push(ParamSlot { kind, offset, width });
            offset += width;
        }
        Ok(ParamLayout { head, slots, width: offset })
    }

    /// Total bundle width P.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    pub fn slot(&self, kind: ParamKind) -> Option<ParamSlot> {
        self.slots.iter().copied().find(|s| s.kind == kind)
    }

    /// Split a [batch, P] bundle into its sub-parameters.
    pub fn split(&self, bundle: &Tensor) -> Result<HeadParams> {
        if bundle.shape.len() != 2 || bundle.shape[1] != self.width {
            return Err(MemoryError::ShapeMismatch {
                what: "parameter bundle",
                expected: vec![bundle.shape.first().copied().unwrap_or(0), self.width],
                actual: bundle.shape.clone(),
            });
        }
        let batch = bundle.shape[0];
        let gather = |slot: ParamSlot| -> Vec<f32> {
            let mut out = Vec::with_capacity(batch * slot.width);
            for b in 0..batch {
                let row = bundle.row(b);
                out.extend_from_slice(&row[slot.offset..slot.offset + slot.width]);
            }
            out
        };
        let take = |kind: ParamKind| self.slot(kind).map(&gather);

        Ok(HeadParams {
            query: take(ParamKind::Query),
            strength: take(ParamKind::Strength),
            gate: take(ParamKind::Gate).unwrap_or_default(),
            shift: take(ParamKind::Shift).unwrap_or_default(),
            gamma: take(ParamKind::Gamma).unwrap_or_default(),
            erase: take(ParamKind::Erase),
            add: take(ParamKind::Add),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateMode;

    #[test]
    fn test_read_layout_offsets() {
        let cfg = InterfaceConfig::test_config(); // C=4, S=3, interpolate
        let layout = ParamLayout::new(HeadKind::Read, &cfg).unwrap();
        let offsets: Vec<(ParamKind, usize, usize)> =
            layout.slots().iter().map(|s| (s.kind, s.offset, s.width)).collect();
        assert_eq!(offsets, vec![
            (ParamKind::Query, 0, 4),
            (ParamKind::Strength, 4, 1),
            (ParamKind::Gate, 5, 1),
            (ParamKind::Shift, 6, 3),
            (ParamKind::Gamma, 9, 1),
        ]);
        assert_eq!(layout.width(), 10);
    }

    #[test]
    fn test_write_layout_adds_erase_add() {
        let cfg = InterfaceConfig::test_config();
        let layout = ParamLayout::new(HeadKind::Write, &cfg).unwrap();
        assert_eq!(layout.width(), 10 + 2 * 4);
        assert_eq!(layout.slot(ParamKind::Erase).unwrap().offset, 10);
        assert_eq!(layout.slot(ParamKind::Add).unwrap().offset, 14);
    }

    #[test]
    fn test_location_only_selector_layout() {
        let mut cfg = InterfaceConfig::test_config();
        cfg.use_content_addressing = false;
        cfg.gate_mode = GateMode::Selector;
        cfg.shift_size = 5;
        let layout = ParamLayout::new(HeadKind::Read, &cfg).unwrap();
        // gate 3 + shift 5 + gamma 1
        assert_eq!(layout.width(), 9);
        assert!(layout.slot(ParamKind::Query).is_none());
        assert_eq!(layout.slot(ParamKind::Shift).unwrap().offset, 3);
    }

    #[test]
    fn test_split_batched() {
        let cfg = InterfaceConfig::test_config();
        let layout = ParamLayout::new(HeadKind::Read, &cfg).unwrap();
        let p = layout.width();
        let data: Vec<f32> = (0..2 * p).map(|i| i as f32).collect();
        let bundle = Tensor::from_vec(data, &[2, p]).unwrap();
        let hp = layout.split(&bundle).unwrap();
        assert_eq!(hp.query.unwrap(), vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0]);
        assert_eq!(hp.strength.unwrap(), vec![4.0, 14.0]);
        assert_eq!(hp.gate, vec![5.0, 15.0]);
        assert_eq!(hp.shift, vec![6.0, 7.0, 8.0, 16.0, 17.0, 18.0]);
        assert_eq!(hp.gamma, vec![9.0, 19.0]);
        assert!(hp.erase.is_none());
    }

    #[test]
    fn test_split_rejects_wrong_width() {
        let cfg = InterfaceConfig::test_config();
        let layout = ParamLayout::new(HeadKind::Read, &cfg).unwrap();
        let bundle = Tensor::zeros(&[1, layout.width() + 1]);
        assert!(matches!(layout.split(&bundle), Err(MemoryError::ShapeMismatch { .. })));
    }
}
