use tracing::debug;

use crate::{
    config::EngineConfig,
    data::{
        domain::Interval,
        uid::{Keyed, Uid},
    },
    error::{ChartflowResult, ViewportError},
    provider::request::LoadRequest,
    storage::store::SortedStore,
    viewport::{grid::GridSpacing, stepper::Stepper},
};

/// Maps pixels to identities over a window of `n` equal slots.
///
/// `frame_start` is the identity in slot 0 and may be virtual. `offset` is the sub-slot
/// pixel remainder of a pan in progress, kept within one slot width.
#[derive(Debug, Clone)]
pub struct Viewport {
    frame_start: Uid,
    n: usize,
    width: u32,
    offset: f64,
    stepper: Stepper,
    config: EngineConfig,
}

impl Viewport {
    pub fn new(
        frame_start: Uid,
        n: usize,
        width: u32,
        interval: Interval,
        config: EngineConfig,
    ) -> ChartflowResult<Self> {
        if width == 0 {
            return Err(ViewportError::ZeroWidth.into());
        }
        if !interval.is_positive() {
            return Err(ViewportError::NonPositiveInterval(interval.millis()).into());
        }
        check_slots(n, &config)?;
        Ok(Self {
            frame_start,
            n,
            width,
            offset: 0.0,
            stepper: Stepper::new(interval),
            config,
        })
    }

    pub fn frame_start(&self) -> Uid {
        self.frame_start
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn interval(&self) -> Interval {
        self.stepper.interval()
    }

    pub fn stepper(&self) -> Stepper {
        self.stepper
    }

    pub fn slot_width(&self) -> f64 {
        f64::from(self.width) / self.n as f64
    }

    /// Centre of slot `index`.
    pub fn index_to_x(&self, index: i64) -> f64 {
        let slot = self.slot_width();
        slot * index as f64 + slot / 2.0 + self.offset
    }

    pub fn x_to_index(&self, x: f64) -> i64 {
        ((x - self.offset) / self.slot_width()).floor() as i64
    }

    pub fn to_x<T: Keyed>(&self, store: &SortedStore<T>, uid: Uid) -> f64 {
        self.index_to_x(self.stepper.distance(store, self.frame_start, uid))
    }

    pub fn to_value<T: Keyed>(&self, store: &SortedStore<T>, x: f64) -> Uid {
        self.stepper
            .step(store, self.frame_start, self.x_to_index(x))
    }

    /// First and last visible identities.
    pub fn range<T: Keyed>(&self, store: &SortedStore<T>) -> (Uid, Uid) {
        let last = self
            .stepper
            .step(store, self.frame_start, self.n as i64 - 1);
        (self.frame_start, last)
    }

    /// Identities of the visible slots that carry a grid line.
    pub fn grid<T: Keyed>(&self, store: &SortedStore<T>, spacing: &dyn GridSpacing) -> Vec<Uid> {
        let mut lines = Vec::new();
        let mut prev = None;
        for i in 0..self.n as i64 {
            let uid = self.stepper.step(store, self.frame_start, i);
            if spacing.is_line(uid, prev, self.interval()) {
                lines.push(uid);
            }
            prev = Some(uid);
        }
        lines
    }

    // ============================================================================
    // Interaction
    // ============================================================================

    /// Pans by `dx` pixels; positive `dx` scrolls toward newer data.
    ///
    /// Whole slots shift the frame start; the remainder stays in `offset`. Returns the fetch
    /// covering the new frame plus the prefetch margin in the direction of travel.
    pub fn move_by<T: Keyed>(
        &mut self,
        store: &SortedStore<T>,
        dx: f64,
    ) -> ChartflowResult<Option<LoadRequest>> {
        if !dx.is_finite() {
            return Err(ViewportError::NonFiniteDelta(dx).into());
        }
        let slot = self.slot_width();
        let total = self.offset - dx;
        let shift = (-total / slot).trunc() as i64;
        self.offset = total + shift as f64 * slot;
        if shift == 0 {
            return Ok(None);
        }

        self.frame_start = self.stepper.step(store, self.frame_start, shift);
        let reach = shift
            .saturating_abs()
            .saturating_add((self.config.prefetch_frames * self.n) as i64);
        debug!(
            shift,
            frame_start = %self.frame_start,
            offset = self.offset,
            "Viewport moved"
        );
        Ok(Some(LoadRequest::counted(
            self.frame_start,
            reach * shift.signum(),
        )))
    }

    /// Zooms in (`direction > 0`, fewer slots) or out (`direction < 0`, more slots).
    ///
    /// The right edge stays anchored. Zooming out prefetches older data for the wider frame.
    pub fn scale<T: Keyed>(
        &mut self,
        store: &SortedStore<T>,
        direction: i32,
    ) -> ChartflowResult<Option<LoadRequest>> {
        if direction == 0 {
            return Ok(None);
        }
        let step = ((self.n as f64 * self.config.zoom_step).round() as usize).max(1);
        let wanted = if direction > 0 {
            self.n.saturating_sub(step)
        } else {
            self.n + step
        };
        let new_n = wanted.clamp(self.config.min_frame, self.config.max_frame);
        if new_n == self.n {
            return Ok(None);
        }

        let delta = self.n as i64 - new_n as i64;
        self.frame_start = self.stepper.step(store, self.frame_start, delta);
        self.n = new_n;
        debug!(n = self.n, frame_start = %self.frame_start, "Viewport scaled");

        let reach = (self.config.prefetch_frames * new_n) as i64;
        Ok((delta < 0 && reach > 0).then(|| LoadRequest::counted(self.frame_start, -reach)))
    }

    /// Moves the frame start onto the position it occupies in `store`.
    ///
    /// A virtual frame start becomes an in-span gap once data arrives around it; it then
    /// takes its successor's slot. Returns whether the frame start changed.
    pub fn rebase<T: Keyed>(&mut self, store: &SortedStore<T>) -> bool {
        let snapped = self.stepper.snap(store, self.frame_start);
        if snapped == self.frame_start {
            return false;
        }
        debug!(from = %self.frame_start, to = %snapped, "Frame start rebased");
        self.frame_start = snapped;
        true
    }

    pub fn resize(&mut self, width: u32) -> ChartflowResult<()> {
        if width == 0 {
            return Err(ViewportError::ZeroWidth.into());
        }
        self.width = width;
        self.offset = self.offset.clamp(-self.slot_width(), self.slot_width());
        Ok(())
    }

    /// Rebinds to a new lattice step, keeping the frame start and slot count.
    pub fn set_interval(&mut self, interval: Interval) -> ChartflowResult<()> {
        if !interval.is_positive() {
            return Err(ViewportError::NonPositiveInterval(interval.millis()).into());
        }
        self.stepper = Stepper::new(interval);
        self.offset = 0.0;
        Ok(())
    }
}

fn check_slots(n: usize, config: &EngineConfig) -> ChartflowResult<()> {
    if n == 0 || n < config.min_frame || n > config.max_frame {
        return Err(ViewportError::InvalidSlotCount {
            n,
            min: config.min_frame,
            max: config.max_frame,
        }
        .into());
    }
    Ok(())
}
