//! Weighted placement sampling ("peekaboo").
//!
//! Each surface axis carries a [`WeightHistogram`]. Placing an image draws the
//! image centre from a piecewise-linear density built from the histogram
//! weights, then resets the weight of every boundary the image covers to `1`
//! and ages every other boundary by `+2`.

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use tracing::trace;

pub const DEFAULT_BIN_COUNT: usize = 20;

const COVERED_WEIGHT: f32 = 1.0;
const AGING_STEP: f32 = 2.0;

/// Bin boundaries along one axis with a usage weight per boundary.
///
/// Positions are strictly increasing and the last one equals the axis length.
/// Weights never drop below `1`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightHistogram {
    positions: Vec<f32>,
    weights: Vec<f32>,
}

impl WeightHistogram {
    pub fn new(axis_length: f32, bins: usize) -> Self {
        if axis_length <= 0.0 || !axis_length.is_finite() {
            return Self {
                positions: vec![0.0],
                weights: vec![COVERED_WEIGHT],
            };
        }
        // Rounded boundaries collide when there are more bins than pixels.
        let bins = bins.min(axis_length.floor() as usize).max(1);
        let mut positions: Vec<f32> = (0..bins)
            .map(|i| (i as f32 * axis_length / bins as f32).round())
            .collect();
        positions.push(axis_length);
        positions.dedup_by(|next, prev| *next <= *prev);
        let weights = vec![COVERED_WEIGHT; positions.len()];
        Self { positions, weights }
    }

    pub fn with_default_bins(axis_length: f32) -> Self {
        Self::new(axis_length, DEFAULT_BIN_COUNT)
    }

    /// The axis length the histogram was built for (the last boundary).
    pub fn axis_length(&self) -> f32 {
        self.positions.last().copied().unwrap_or(0.0)
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Places an image of `extent` along this axis; see [`sample_offset`].
    pub fn place<R: Rng + ?Sized>(&mut self, extent: f32, rng: &mut R) -> AxisPlacement {
        sample_offset(self, extent, rng)
    }

    /// Index range of boundaries that may host the image centre, or `None`
    /// when fewer than two boundaries qualify.
    fn candidate_range(&self, half: f32) -> Option<(usize, usize)> {
        let window = self.axis_length();
        let count = self.positions.len();
        let start = self
            .positions
            .iter()
            .position(|&p| p >= half)
            .map_or(count, |i| i.saturating_sub(1));
        let end = self
            .positions
            .iter()
            .rposition(|&p| window - p >= half)
            .map(|i| (i + 2).min(count))?;
        (end > start && end - start >= 2).then_some((start, end))
    }

    fn record_coverage(&mut self, left: f32, right: f32) {
        for (position, weight) in self.positions.iter().zip(self.weights.iter_mut()) {
            if *position >= left && *position <= right {
                *weight = COVERED_WEIGHT;
            } else {
                *weight += AGING_STEP;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// Image is at least as long as the axis; pinned at the origin.
    Pinned,
    /// Centre drawn from the weighted histogram; weights updated.
    Weighted,
    /// No usable bin range; uniform offset, weights untouched.
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisPlacement {
    pub offset: f32,
    pub strategy: PlacementStrategy,
}

/// Picks the leading-edge offset for an image of `extent` along the axis
/// described by `histogram`, and records the new coverage.
///
/// The result always satisfies `0 <= offset` and
/// `offset + extent <= histogram.axis_length()`.
pub fn sample_offset<R: Rng + ?Sized>(
    histogram: &mut WeightHistogram,
    extent: f32,
    rng: &mut R,
) -> AxisPlacement {
    let window = histogram.axis_length();
    if extent >= window {
        return AxisPlacement {
            offset: 0.0,
            strategy: PlacementStrategy::Pinned,
        };
    }
    let extent = extent.max(0.0);
    let half = extent / 2.0;
    let max_offset = window - extent;

    let Some((start, end)) = histogram.candidate_range(half) else {
        let offset = rng.random_range(0.0..=max_offset);
        trace!(window, extent, offset, "peekaboo uniform fallback");
        return AxisPlacement {
            offset,
            strategy: PlacementStrategy::Uniform,
        };
    };

    let center = match sample_piecewise_linear(
        &histogram.positions[start..end],
        &histogram.weights[start..end],
        rng,
    ) {
        Some(center) => center,
        None => {
            let offset = rng.random_range(0.0..=max_offset);
            return AxisPlacement {
                offset,
                strategy: PlacementStrategy::Uniform,
            };
        }
    };

    let left = (center - half).min(max_offset).max(0.0);
    let right = left + extent;
    histogram.record_coverage(left, right);
    trace!(window, extent, center, left, start, end, "peekaboo weighted placement");
    AxisPlacement {
        offset: left,
        strategy: PlacementStrategy::Weighted,
    }
}

/// Draws from the density that is linear between consecutive `boundaries`,
/// taking value `densities[i]` at `boundaries[i]`.
fn sample_piecewise_linear<R: Rng + ?Sized>(
    boundaries: &[f32],
    densities: &[f32],
    rng: &mut R,
) -> Option<f32> {
    debug_assert_eq!(boundaries.len(), densities.len());
    let areas: Vec<f32> = boundaries
        .windows(2)
        .zip(densities.windows(2))
        .map(|(b, d)| 0.5 * (d[0] + d[1]) * (b[1] - b[0]))
        .collect();
    let segment = WeightedIndex::new(&areas).ok()?.sample(rng);

    let (x0, x1) = (boundaries[segment], boundaries[segment + 1]);
    let (w0, w1) = (densities[segment], densities[segment + 1]);
    let width = x1 - x0;
    let u: f32 = rng.random();
    // Inverse CDF of the trapezoid on [x0, x1].
    let t = if (w1 - w0).abs() <= f32::EPSILON {
        u * width
    } else {
        width * ((w0 * w0 + u * (w1 * w1 - w0 * w0)).sqrt() - w0) / (w1 - w0)
    };
    Some((x0 + t).clamp(x0, x1))
}
