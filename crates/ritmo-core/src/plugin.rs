//! Plugin hosting boundary.
//!
//! The core does not load plugin binaries itself; hosts implement
//! [`PluginHost`] and hand back [`PluginInstance`]s. [`PluginProcessor`]
//! adapts an instance to the graph's [`Processor`] trait.

use crate::processor::{ProcessContext, PortIo, Processor, ProcessorFault};

/// Errors from plugin instantiation and processing.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The host could not create an instance.
    #[error("failed to instantiate plugin {uri}: {reason}")]
    InstantiationFailed {
        /// Plugin identifier.
        uri: String,
        /// Host-specific cause.
        reason: String,
    },

    /// The instance refused to activate.
    #[error("failed to activate plugin: {0}")]
    ActivationFailed(String),

    /// Processing failed mid-block.
    #[error("plugin processing failed: {0}")]
    ProcessFailed(String),
}

/// Static description of a loadable plugin.
#[derive(Clone, Debug)]
pub struct PluginDescriptor {
    /// Stable identifier understood by the host (e.g. an LV2 URI).
    pub uri: String,
    /// Human-readable name.
    pub name: String,
}

impl PluginDescriptor {
    /// Creates a descriptor.
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }
}

/// A live plugin instance with stereo I/O.
pub trait PluginInstance: Send {
    /// Prepares the instance for processing.
    fn activate(&mut self, sample_rate: u32, max_block: usize) -> Result<(), PluginError>;

    /// Processes one block. All slices have equal length, at most the
    /// `max_block` given to `activate`.
    fn process(
        &mut self,
        left_in: &[f32],
        right_in: &[f32],
        left_out: &mut [f32],
        right_out: &mut [f32],
    ) -> Result<(), PluginError>;

    /// Current reported latency in frames. Hosts may refine this after the
    /// first blocks have run.
    fn latency(&self) -> usize {
        0
    }

    /// Releases processing resources. Called once, before drop.
    fn deactivate(&mut self);
}

/// Creates plugin instances from descriptors.
pub trait PluginHost {
    /// Instantiates the described plugin.
    fn instantiate(&self, descriptor: &PluginDescriptor)
    -> Result<Box<dyn PluginInstance>, PluginError>;
}

/// Adapts a [`PluginInstance`] to the graph so it can sit in an insert slot.
///
/// Expects two audio inputs and two audio outputs on its node.
pub struct PluginProcessor {
    name: String,
    instance: Box<dyn PluginInstance>,
    sample_rate: u32,
    max_block: usize,
}

impl PluginProcessor {
    /// Instantiates and activates the described plugin.
    pub fn new(
        host: &dyn PluginHost,
        descriptor: &PluginDescriptor,
        sample_rate: u32,
        max_block: usize,
    ) -> Result<Self, PluginError> {
        let mut instance = host.instantiate(descriptor)?;
        instance.activate(sample_rate, max_block)?;
        tracing::info!(uri = %descriptor.uri, name = %descriptor.name, "plugin activated");
        Ok(Self {
            name: descriptor.name.clone(),
            instance,
            sample_rate,
            max_block,
        })
    }
}

impl Processor for PluginProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, ctx: &ProcessContext, io: &mut PortIo<'_>) -> Result<(), ProcessorFault> {
        let n = ctx.n_frames;
        // Copy the input slice reference out before borrowing the outputs;
        // inputs and outputs are disjoint.
        let inputs = io.inputs;
        let (left_out, right_out) = io.audio_out_pair(0, 1);
        self.instance
            .process(
                &inputs[0].samples()[..n],
                &inputs[1].samples()[..n],
                &mut left_out[..n],
                &mut right_out[..n],
            )
            .map_err(|e| ProcessorFault(e.to_string()))
    }

    fn latency(&self) -> usize {
        self.instance.latency()
    }

    fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
        self.instance.deactivate();
        if let Err(e) = self.instance.activate(rate, self.max_block) {
            tracing::warn!(plugin = %self.name, "reactivation failed: {e}");
        }
    }

    fn set_block_length(&mut self, frames: usize) {
        self.max_block = frames;
        self.instance.deactivate();
        if let Err(e) = self.instance.activate(self.sample_rate, frames) {
            tracing::warn!(plugin = %self.name, "reactivation failed: {e}");
        }
    }
}

impl Drop for PluginProcessor {
    fn drop(&mut self) {
        self.instance.deactivate();
    }
}
