//! Live simulation parameters keyed by control id.
//!
//! The host owns the values; the frame driver only ever reads them through a
//! [`ParameterHandle`], once per tick, so a change made between two frames is
//! seen by the very next frame.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::payload::ControlSpec;

/// Value of a single control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f32),
}

impl ParamValue {
    pub fn as_number(self) -> f32 {
        match self {
            ParamValue::Number(v) => v,
            ParamValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            ParamValue::Bool(b) => b,
            ParamValue::Number(v) => v != 0.0,
        }
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Number(v)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Mapping from control id to its current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterState {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from each control's default. The first control wins on duplicate ids.
    pub fn seeded(controls: &[ControlSpec]) -> Self {
        let mut values = BTreeMap::new();
        for control in controls {
            if values.contains_key(&control.id) {
                log::warn!("Ignoring duplicate control id '{}'", control.id);
                continue;
            }
            values.insert(control.id.clone(), control.default_value);
        }
        Self { values }
    }

    pub fn get(&self, id: &str) -> Option<ParamValue> {
        self.values.get(id).copied()
    }

    pub fn set(&mut self, id: &str, value: ParamValue) {
        self.values.insert(id.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }
}

/// Shared, host-owned parameter state read fresh at every frame.
#[derive(Debug, Clone, Default)]
pub struct ParameterHandle(Rc<RefCell<ParameterState>>);

impl ParameterHandle {
    pub fn new(state: ParameterState) -> Self {
        Self(Rc::new(RefCell::new(state)))
    }

    /// Copy of the current values.
    pub fn snapshot(&self) -> ParameterState {
        self.0.borrow().clone()
    }

    pub fn replace(&self, state: ParameterState) {
        *self.0.borrow_mut() = state;
    }

    pub fn set(&self, id: &str, value: ParamValue) {
        self.0.borrow_mut().set(id, value);
    }

    pub fn get(&self, id: &str) -> Option<ParamValue> {
        self.0.borrow().get(id)
    }
}
