//! Post-processing chain applied after the scene pass.
//!
//! The chain is a fixed sequence: scene render pass, bloom, tone mapping.
//! This module holds the CPU-side description; GPU backends read it every
//! frame, so a strength change made by the view settings bridge shows up on
//! the next rendered frame without rebuilding anything.

use serde::{Deserialize, Serialize};

pub const DEFAULT_BLOOM_RADIUS: f32 = 0.4;
pub const DEFAULT_BLOOM_THRESHOLD: f32 = 0.85;
pub const MAX_BLOOM_STRENGTH: f32 = 10.0;

/// Pixel size of a post-processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassStage {
    pub size: StageSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomStage {
    pub strength: f32,
    /// Spread of the glow, `0.0..=1.0`.
    pub radius: f32,
    /// Luminance above which pixels contribute to the glow.
    pub threshold: f32,
    #[serde(skip)]
    pub size: StageSize,
}

impl BloomStage {
    pub fn new(strength: f32) -> Self {
        Self {
            strength: clamp_strength(strength),
            radius: DEFAULT_BLOOM_RADIUS,
            threshold: DEFAULT_BLOOM_THRESHOLD,
            size: StageSize::default(),
        }
    }

    pub fn set_strength(&mut self, strength: f32) {
        self.strength = clamp_strength(strength);
    }

    pub fn is_active(&self) -> bool {
        self.strength > 0.0
    }
}

fn clamp_strength(strength: f32) -> f32 {
    if strength.is_finite() {
        strength.clamp(0.0, MAX_BLOOM_STRENGTH)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapping {
    None,
    Reinhard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostChain {
    pub render_pass: RenderPassStage,
    pub bloom: BloomStage,
    pub tone_mapping: ToneMapping,
    pub exposure: f32,
}

impl PostChain {
    pub fn new(width: u32, height: u32, bloom_strength: f32) -> Self {
        let mut chain = Self {
            render_pass: RenderPassStage {
                size: StageSize::default(),
            },
            bloom: BloomStage::new(bloom_strength),
            tone_mapping: ToneMapping::Reinhard,
            exposure: 1.0,
        };
        chain.set_size(width, height);
        chain
    }

    /// Resize every stage.
    pub fn set_size(&mut self, width: u32, height: u32) {
        let size = StageSize {
            width: width.max(1),
            height: height.max(1),
        };
        self.render_pass.size = size;
        self.bloom.size = size;
    }

    pub fn size(&self) -> StageSize {
        self.render_pass.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let chain = PostChain::new(800, 600, 0.8);
        assert_eq!(chain.bloom.strength, 0.8);
        assert_eq!(chain.bloom.radius, 0.4);
        assert_eq!(chain.bloom.threshold, 0.85);
        assert_eq!(chain.tone_mapping, ToneMapping::Reinhard);
    }

    #[test]
    fn test_resize_all_stages() {
        let mut chain = PostChain::new(800, 600, 0.8);
        chain.set_size(1920, 1080);
        assert_eq!(chain.render_pass.size, StageSize { width: 1920, height: 1080 });
        assert_eq!(chain.bloom.size, chain.render_pass.size);
        chain.set_size(0, 0);
        assert_eq!(chain.size(), StageSize { width: 1, height: 1 });
    }

    #[test]
    fn test_strength_clamped() {
        let mut bloom = BloomStage::new(-1.0);
        assert_eq!(bloom.strength, 0.0);
        assert!(!bloom.is_active());
        bloom.set_strength(f32::NAN);
        assert_eq!(bloom.strength, 0.0);
        bloom.set_strength(2.5);
        assert_eq!(bloom.strength, 2.5);
    }
}
