//! Transcoded output dimension checks.

use crate::error::{FleetError, Result};
use crate::media::Resolution;

/// Accepts an output when it matches the target exactly, or when one
/// dimension matches and the other fits inside the target (letterbox or
/// pillarbox). Nothing may exceed the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputValidator;

impl OutputValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, width: u32, height: u32, target: Resolution) -> bool {
        let (target_w, target_h) = target.dimensions();
        if width > target_w || height > target_h {
            return false;
        }
        width == target_w || height == target_h
    }

    pub fn check(&self, width: u32, height: u32, target: Resolution) -> Result<()> {
        if self.validate(width, height, target) {
            Ok(())
        } else {
            Err(FleetError::InvalidOutput {
                width,
                height,
                target,
            })
        }
    }
}
