use crate::config::DisplayConfig;
use log::debug;
use std::collections::BTreeMap;

/// A compositor output as far as scaling is concerned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Output {
    pub id: u32,
    /// Integer buffer scale.
    pub scale_factor: i32,
    pub device_scale_factor: f32,
}

impl Output {
    pub fn new(id: u32, scale_factor: i32, device_scale_factor: f32) -> Self {
        Self {
            id,
            scale_factor,
            device_scale_factor,
        }
    }
}

/// Known outputs, the primary one, and the optional forced UI scale.
#[derive(Debug, Clone)]
pub struct OutputManager {
    outputs: BTreeMap<u32, Output>,
    primary: Option<u32>,
    forced_device_scale_factor: Option<f32>,
}

impl OutputManager {
    pub fn new(config: &DisplayConfig) -> Self {
        let mut outputs = BTreeMap::new();
        let mut primary = None;
        for output in &config.outputs {
            outputs.insert(
                output.id,
                Output::new(output.id, output.scale_factor, output.device_scale_factor),
            );
            if output.primary {
                primary = Some(output.id);
            }
        }
        if outputs.is_empty() {
            outputs.insert(1, Output::new(1, 1, 1.0));
        }
        let primary = primary.or_else(|| outputs.keys().next().copied());

        Self {
            outputs,
            primary,
            forced_device_scale_factor: config.forced_device_scale_factor,
        }
    }

    pub fn add_output(&mut self, output: Output) {
        debug!("output {} added with scale {}", output.id, output.scale_factor);
        self.outputs.insert(output.id, output);
        if self.primary.is_none() {
            self.primary = Some(output.id);
        }
    }

    pub fn remove_output(&mut self, id: u32) -> Option<Output> {
        let removed = self.outputs.remove(&id);
        if self.primary == Some(id) {
            self.primary = self.outputs.keys().next().copied();
        }
        removed
    }

    pub fn set_primary(&mut self, id: u32) -> bool {
        if !self.outputs.contains_key(&id) {
            return false;
        }
        self.primary = Some(id);
        true
    }

    pub fn output(&self, id: u32) -> Option<&Output> {
        self.outputs.get(&id)
    }

    /// Falls back to a 1x output when none is known.
    pub fn primary(&self) -> Output {
        self.primary
            .and_then(|id| self.outputs.get(&id))
            .copied()
            .unwrap_or(Output::new(0, 1, 1.0))
    }

    /// The entered output with the largest scale, else the primary output.
    pub fn preferred_output<'a>(&self, entered: impl IntoIterator<Item = &'a u32>) -> Output {
        entered
            .into_iter()
            .filter_map(|id| self.outputs.get(id))
            .max_by_key(|output| output.scale_factor)
            .copied()
            .unwrap_or_else(|| self.primary())
    }

    pub fn ui_scale(&self, output: &Output) -> f32 {
        self.forced_device_scale_factor
            .unwrap_or(output.device_scale_factor)
    }
}
