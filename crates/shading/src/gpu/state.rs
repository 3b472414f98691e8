use super::{Capability, GpuBackend, NEUTRAL_EMISSION};

/// Scoped fixed-pipeline state.
///
/// Every capability enabled through the scope is disabled again, in reverse
/// order, when the scope drops; an emission term set through it is restored
/// to [`NEUTRAL_EMISSION`]. Early returns and `?` therefore never leak state
/// into the next draw.
pub struct StateScope<'a> {
    gpu: &'a mut dyn GpuBackend,
    enabled: Vec<Capability>,
    emissive: bool,
}

impl<'a> StateScope<'a> {
    pub fn new(gpu: &'a mut dyn GpuBackend) -> Self {
        Self {
            gpu,
            enabled: Vec::new(),
            emissive: false,
        }
    }

    pub fn enable(&mut self, capability: Capability) {
        if self.enabled.contains(&capability) {
            return;
        }
        self.gpu.enable(capability);
        self.enabled.push(capability);
    }

    pub fn set_emission(&mut self, rgba: [f32; 4]) {
        self.gpu.set_emission(rgba);
        self.emissive = true;
    }

    pub fn gpu(&mut self) -> &mut dyn GpuBackend {
        &mut *self.gpu
    }
}

impl Drop for StateScope<'_> {
    fn drop(&mut self) {
        for capability in self.enabled.drain(..).rev() {
            self.gpu.disable(capability);
        }
        if self.emissive {
            self.gpu.set_emission(NEUTRAL_EMISSION);
        }
    }
}
