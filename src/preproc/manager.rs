//! Per-item preprocessing configuration and history.

use super::history::{HistoryStore, HistoryValue, Timespec};
use super::variant::Variant;
use super::{run_pipeline, PreprocError, Step, ValueType};

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("item {0} has no preprocessing configuration")]
    UnknownItem(u64),
    #[error(transparent)]
    Preprocessing(#[from] PreprocError),
}

/// Preprocessing configuration of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPreprocessing {
    pub value_type: ValueType,
    pub steps: Vec<Step>,
}

/// Owns item preprocessing configuration and the history used by delta steps.
///
/// A single `Preprocessor` is the only writer of its items' history.
#[derive(Debug, Default)]
pub struct Preprocessor {
    items: HashMap<u64, ItemPreprocessing>,
    history: HistoryStore,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the configuration of an item.
    ///
    /// History is dropped when the step list changes.
    pub fn update_item(&mut self, itemid: u64, value_type: ValueType, steps: Vec<Step>) {
        let config = ItemPreprocessing { value_type, steps };

        if let Some(previous) = self.items.get(&itemid) {
            if previous.steps != config.steps {
                self.history.remove(itemid);
                tracing::debug!("Preprocessor: steps of item {} changed, history reset", itemid);
            }
        }

        self.items.insert(itemid, config);
    }

    pub fn remove_item(&mut self, itemid: u64) {
        self.items.remove(&itemid);
        self.history.remove(itemid);
    }

    pub fn item(&self, itemid: u64) -> Option<&ItemPreprocessing> {
        self.items.get(&itemid)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Preprocess a collected value of a configured item.
    pub fn process(
        &mut self,
        itemid: u64,
        raw: Variant,
        ts: Timespec,
    ) -> Result<Option<Variant>, ProcessError> {
        let config = self
            .items
            .get(&itemid)
            .ok_or(ProcessError::UnknownItem(itemid))?;

        let uses_history = config.steps.iter().any(|s| s.step_type.is_delta());
        let mut scratch = HistoryValue::default();
        let history = if uses_history {
            self.history.entry(itemid)
        } else {
            &mut scratch
        };

        match run_pipeline(config.value_type, raw, ts, &config.steps, history) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::debug!("Preprocessor: item {}: {}", itemid, e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preproc::StepType;

    #[test]
    fn test_unknown_item() {
        let mut p = Preprocessor::new();
        let err = p.process(7, Variant::Ui64(1), Timespec::new(1, 0)).unwrap_err();
        assert_eq!(err, ProcessError::UnknownItem(7));
    }

    #[test]
    fn test_delta_history_per_item() {
        let mut p = Preprocessor::new();
        let steps = vec![Step::new(StepType::DeltaValue, "")];
        p.update_item(1, ValueType::Uint64, steps.clone());
        p.update_item(2, ValueType::Uint64, steps);

        assert_eq!(p.process(1, Variant::Ui64(10), Timespec::new(100, 0)).unwrap(), None);
        assert_eq!(p.process(2, Variant::Ui64(1000), Timespec::new(100, 0)).unwrap(), None);
        assert_eq!(
            p.process(1, Variant::Ui64(15), Timespec::new(101, 0)).unwrap(),
            Some(Variant::Ui64(5))
        );
        assert_eq!(p.history().len(), 2);
    }

    #[test]
    fn test_step_change_resets_history() {
        let mut p = Preprocessor::new();
        p.update_item(1, ValueType::Uint64, vec![Step::new(StepType::DeltaValue, "")]);
        p.process(1, Variant::Ui64(10), Timespec::new(100, 0)).unwrap();
        assert!(p.history().get(1).is_some());

        // Same steps keep the baseline
        p.update_item(1, ValueType::Uint64, vec![Step::new(StepType::DeltaValue, "")]);
        assert!(p.history().get(1).is_some());

        p.update_item(1, ValueType::Uint64, vec![Step::new(StepType::DeltaSpeed, "")]);
        assert!(p.history().get(1).is_none());
        assert_eq!(p.process(1, Variant::Ui64(20), Timespec::new(101, 0)).unwrap(), None);
    }

    #[test]
    fn test_stateless_items_keep_no_history() {
        let mut p = Preprocessor::new();
        p.update_item(3, ValueType::Float, vec![Step::new(StepType::Multiplier, "0.5")]);
        assert_eq!(
            p.process(3, Variant::Str("9".into()), Timespec::new(1, 0)).unwrap(),
            Some(Variant::Dbl(4.5))
        );
        assert!(p.history().is_empty());

        p.remove_item(3);
        assert!(p.item(3).is_none());
    }
}
