use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use crate::events::{PreparedImageCpu, SurfaceId, TargetKey};
use crate::gpu::resources::Layer;
use crate::processing::layout::{Rect, scale_to_fit};
use crate::processing::peekaboo::WeightHistogram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfacePhase {
    Idle,
    Loading,
    Placed,
    Animating,
    Settled,
    ResourcesInvalid,
    Failed,
}

impl SurfacePhase {
    /// Phases in which the surface has an image on screen.
    pub fn is_presenting(self) -> bool {
        matches!(self, Self::Placed | Self::Animating | Self::Settled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceStateChange {
    pub from: SurfacePhase,
    pub to: SurfacePhase,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationStep {
    pub progress: f32,
    pub finished: bool,
}

/// One display area: its bounds inside the render target, the image it is
/// showing and where, the crossfade progress and the placement histograms.
#[derive(Debug)]
pub struct SurfaceState {
    id: SurfaceId,
    target: TargetKey,
    bounds: Rect,
    bins: usize,
    hist_x: WeightHistogram,
    hist_y: WeightHistogram,
    phase: SurfacePhase,
    // Phase to return to once resources come back.
    resume: SurfacePhase,
    // Phase to return to after a failed load.
    before_load: SurfacePhase,
    image: Option<PreparedImageCpu>,
    /// Offset and fitted size relative to `bounds`.
    placement: Rect,
    generation: u64,
    progress: f32,
    animation_started: Option<Instant>,
    animation_duration: Duration,
}

impl SurfaceState {
    pub fn new(
        id: SurfaceId,
        target: TargetKey,
        bounds: Rect,
        bins: usize,
        animation_duration: Duration,
    ) -> Self {
        Self {
            id,
            target,
            bounds,
            bins,
            hist_x: WeightHistogram::new(bounds.width, bins),
            hist_y: WeightHistogram::new(bounds.height, bins),
            phase: SurfacePhase::Idle,
            resume: SurfacePhase::Idle,
            before_load: SurfacePhase::Idle,
            image: None,
            placement: Rect::default(),
            generation: 0,
            progress: 0.0,
            animation_started: None,
            animation_duration,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn target(&self) -> TargetKey {
        self.target
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn phase(&self) -> SurfacePhase {
        self.phase
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn image(&self) -> Option<&PreparedImageCpu> {
        self.image.as_ref()
    }

    /// Current placement in target coordinates.
    pub fn placement(&self) -> Rect {
        self.placement.translated(self.bounds.x, self.bounds.y)
    }

    pub fn histograms(&self) -> (&WeightHistogram, &WeightHistogram) {
        (&self.hist_x, &self.hist_y)
    }

    pub fn is_animating(&self) -> bool {
        self.animation_started.is_some()
    }

    /// Moves the surface to `bounds`. A size change rebuilds both histograms
    /// and refits the current image so it stays inside the new bounds.
    pub fn resize(&mut self, bounds: Rect) {
        let size_changed = bounds.size() != self.bounds.size();
        self.bounds = bounds;
        if !size_changed {
            return;
        }
        self.hist_x = WeightHistogram::new(bounds.width, self.bins);
        self.hist_y = WeightHistogram::new(bounds.height, self.bins);
        if let Some(image) = self.image.as_ref() {
            let size = bounds.size();
            let (w, h) = scale_to_fit(image.width, image.height, size.width, size.height);
            let (w, h) = (w as f32, h as f32);
            let x = self.placement.x.min(bounds.width - w).max(0.0).round();
            let y = self.placement.y.min(bounds.height - h).max(0.0).round();
            self.placement = Rect::new(x, y, w, h);
        }
        debug!(surface = %self.id, width = bounds.width, height = bounds.height, "surface resized");
    }

    pub fn begin_loading(&mut self) -> Option<SurfaceStateChange> {
        if self.phase == SurfacePhase::Loading {
            return None;
        }
        self.before_load = self.phase;
        self.goto(SurfacePhase::Loading)
    }

    /// Returns to whatever the surface showed before loading started.
    pub fn abort_loading(&mut self) -> Option<SurfaceStateChange> {
        if self.phase != SurfacePhase::Loading {
            return None;
        }
        self.goto(self.before_load)
    }

    /// Fits `image` into the bounds and samples its position on both axes.
    /// Progress restarts at zero. Returns the placement in target
    /// coordinates.
    pub fn place<R: Rng + ?Sized>(&mut self, image: PreparedImageCpu, rng: &mut R) -> Rect {
        let size = self.bounds.size();
        let (w, h) = scale_to_fit(image.width, image.height, size.width, size.height);
        let x = self.hist_x.place(w as f32, rng);
        let y = self.hist_y.place(h as f32, rng);
        // Whole pixels keep the linear sampler from softening the photo.
        self.placement = Rect::new(x.offset.round(), y.offset.round(), w as f32, h as f32);
        debug!(
            surface = %self.id,
            path = %image.path.display(),
            x = x.offset,
            y = y.offset,
            width = w,
            height = h,
            x_strategy = ?x.strategy,
            y_strategy = ?y.strategy,
            "image placed"
        );
        self.image = Some(image);
        self.generation += 1;
        self.progress = 0.0;
        self.animation_started = None;
        self.goto(SurfacePhase::Placed);
        self.placement()
    }

    pub fn start_animation(&mut self, now: Instant) -> Option<SurfaceStateChange> {
        if self.phase != SurfacePhase::Placed {
            return None;
        }
        self.animation_started = Some(now);
        self.goto(SurfacePhase::Animating)
    }

    /// Recomputes progress from the time elapsed since the animation started.
    /// Progress never decreases; at `1` the surface settles.
    pub fn advance_animation(&mut self, now: Instant) -> AnimationStep {
        let Some(started) = self.animation_started else {
            return AnimationStep {
                progress: self.progress,
                finished: true,
            };
        };
        let elapsed = now.saturating_duration_since(started);
        let target = if self.animation_duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f32() / self.animation_duration.as_secs_f32()).clamp(0.0, 1.0)
        };
        self.progress = self.progress.max(target);
        let finished = self.progress >= 1.0;
        if finished {
            self.animation_started = None;
            match self.phase {
                SurfacePhase::Animating => {
                    self.goto(SurfacePhase::Settled);
                }
                SurfacePhase::ResourcesInvalid if self.resume == SurfacePhase::Animating => {
                    self.resume = SurfacePhase::Settled;
                }
                _ => {}
            }
        }
        AnimationStep {
            progress: self.progress,
            finished,
        }
    }

    /// GPU resources behind this surface are gone. Only surfaces with an
    /// image on screen are affected.
    pub fn invalidate_resources(&mut self) -> Option<SurfaceStateChange> {
        if !self.phase.is_presenting() {
            return None;
        }
        self.resume = self.phase;
        self.goto(SurfacePhase::ResourcesInvalid)
    }

    pub fn resources_restored(&mut self) -> Option<SurfaceStateChange> {
        if self.phase != SurfacePhase::ResourcesInvalid {
            return None;
        }
        self.goto(self.resume)
    }

    pub fn fail(&mut self) -> Option<SurfaceStateChange> {
        self.animation_started = None;
        self.goto(SurfacePhase::Failed)
    }

    pub fn layer(&self) -> Layer<'_> {
        Layer {
            surface: self.id,
            bounds: self.bounds,
            placement: self.placement(),
            image: self.image.as_ref(),
            generation: self.generation,
            progress: self.progress,
        }
    }

    fn goto(&mut self, to: SurfacePhase) -> Option<SurfaceStateChange> {
        if self.phase == to {
            return None;
        }
        let change = SurfaceStateChange {
            from: self.phase,
            to,
        };
        debug!(surface = %self.id, from = ?change.from, to = ?change.to, "surface phase");
        self.phase = to;
        Some(change)
    }
}
