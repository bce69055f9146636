use std::collections::HashSet;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::Color;

pub const DEFAULT_PALETTE: [&str; 12] = [
    "red", "orange", "yellow", "lime", "green", "teal", "cyan", "blue", "indigo", "purple",
    "pink", "brown",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("every palette color is reserved")]
pub struct PaletteExhausted;

/// Picks a color that is not in `reserved`.
pub trait ColorAllocator: Send + Sync {
    fn allocate(&self, reserved: &HashSet<Color>) -> Result<Color, PaletteExhausted>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Uniform over the free colors.
    #[default]
    Random,
    /// First free color in palette order.
    FirstFree,
}

#[derive(Debug, Clone)]
pub struct PaletteAllocator {
    palette: Vec<Color>,
    strategy: AllocationStrategy,
}

impl PaletteAllocator {
    /// Duplicate palette entries are dropped, keeping the first occurrence.
    pub fn new(palette: impl IntoIterator<Item = Color>, strategy: AllocationStrategy) -> Self {
        let mut seen = HashSet::new();
        let palette = palette
            .into_iter()
            .filter(|color| seen.insert(color.clone()))
            .collect();
        Self { palette, strategy }
    }

    pub fn with_default_palette(strategy: AllocationStrategy) -> Self {
        Self::new(DEFAULT_PALETTE.into_iter().map(Color::from), strategy)
    }

    pub fn palette(&self) -> &[Color] {
        &self.palette
    }
}

impl ColorAllocator for PaletteAllocator {
    fn allocate(&self, reserved: &HashSet<Color>) -> Result<Color, PaletteExhausted> {
        let mut free = self.palette.iter().filter(|color| !reserved.contains(*color));
        let picked = match self.strategy {
            AllocationStrategy::FirstFree => free.next(),
            AllocationStrategy::Random => {
                let free: Vec<&Color> = free.collect();
                free.choose(&mut rand::thread_rng()).copied()
            }
        };
        picked.cloned().ok_or(PaletteExhausted)
    }
}
