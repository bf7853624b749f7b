//! Render state machine, independent of threads and clocks.
//!
//! [`RenderCore`] owns the surface, the latest options and data, and the
//! debouncer. The worker thread feeds it messages and polls it; tests drive
//! it directly with explicit instants.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::debounce::Debouncer;
use crate::error::{RenderError, Result};
use crate::message::RenderMessage;
use crate::options::{RenderConfig, RenderOptions};
use crate::painters::Painter;
use crate::surface::{Rgba, Surface, TextAlign, TextBaseline, TextLabel};

/// Lifecycle of a render worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    /// No surface yet.
    #[default]
    Uninitialized,
    /// Surface received, nothing painted.
    Ready,
    /// A paint is scheduled or in progress.
    Painting,
    /// Waiting for the next change.
    Idle,
}

/// Paint counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaintStats {
    /// Completed paints.
    pub paints: u64,
    /// Paints abandoned because newer messages arrived.
    pub interrupted: u64,
    /// Paints skipped for lack of a surface or options.
    pub skipped: u64,
}

/// Result of one paint attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOutcome {
    /// The frame was drawn.
    Painted,
    /// Abandoned in favour of newer input; a repaint is scheduled.
    Interrupted,
    /// Nothing to paint on, or nothing to paint with.
    Skipped,
}

/// Marker returned by a painter abandoning its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Cooperative yield point handed to painters.
pub struct PaintContext<'a> {
    yield_every: usize,
    yield_after: Duration,
    iterations: usize,
    timer: Instant,
    drain: &'a mut dyn FnMut() -> bool,
}

impl<'a> PaintContext<'a> {
    /// A context whose `drain` pulls pending messages and reports whether
    /// any of them supersedes the frame being painted.
    pub fn new(config: &RenderConfig, drain: &'a mut dyn FnMut() -> bool) -> Self {
        Self {
            yield_every: config.yield_every.max(1),
            yield_after: config.yield_after,
            iterations: 0,
            timer: Instant::now(),
            drain,
        }
    }

    /// Call once per loop iteration of a long paint.
    ///
    /// # Errors
    /// Returns [`Interrupted`] when newer options or data arrived; the
    /// painter should return it immediately.
    pub fn checkpoint(&mut self) -> std::result::Result<(), Interrupted> {
        self.iterations += 1;
        if self.iterations % self.yield_every != 0 {
            return Ok(());
        }
        if self.timer.elapsed() < self.yield_after {
            return Ok(());
        }
        if (self.drain)() {
            return Err(Interrupted);
        }
        self.timer = Instant::now();
        Ok(())
    }

    /// Iterations seen so far.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Owns everything a worker paints with.
pub struct RenderCore<P: Painter, S: Surface> {
    painter: P,
    config: RenderConfig,
    surface: Option<S>,
    opts: Option<RenderOptions>,
    data: Option<P::Data>,
    debouncer: Debouncer,
    state: RenderState,
    stats: PaintStats,
}

impl<P: Painter, S: Surface> RenderCore<P, S> {
    /// A core with no surface, options or data.
    #[must_use]
    pub fn new(painter: P, config: RenderConfig) -> Self {
        Self {
            painter,
            debouncer: Debouncer::new(config.debounce),
            config,
            surface: None,
            opts: None,
            data: None,
            state: RenderState::Uninitialized,
            stats: PaintStats::default(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Paint counters.
    #[must_use]
    pub fn stats(&self) -> PaintStats {
        self.stats
    }

    /// When the scheduled paint is due, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// The surface, if transferred.
    #[must_use]
    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    /// Give the surface back.
    #[must_use]
    pub fn into_surface(self) -> Option<S> {
        self.surface
    }

    /// Apply a message and schedule a paint.
    ///
    /// # Errors
    /// Returns [`RenderError::CanvasAlreadyTransferred`] for a second canvas.
    pub fn handle(&mut self, message: RenderMessage<S, P::Data>, now: Instant) -> Result<()> {
        match message {
            RenderMessage::Canvas(surface) => {
                if self.surface.is_some() {
                    return Err(RenderError::CanvasAlreadyTransferred);
                }
                self.surface = Some(surface);
                if self.state == RenderState::Uninitialized {
                    self.state = RenderState::Ready;
                }
            }
            RenderMessage::Opts(opts) => {
                self.opts = Some(opts);
                self.schedule_repaint();
            }
            RenderMessage::Data(data) => {
                self.data = Some(data);
                self.schedule_repaint();
            }
        }
        self.debouncer.trigger(now);
        Ok(())
    }

    fn schedule_repaint(&mut self) {
        if self.surface.is_some() {
            self.state = RenderState::Painting;
        }
    }

    /// Run the scheduled paint if it is due.
    ///
    /// `next` yields messages that arrive while painting; they are applied
    /// after the paint finishes or is abandoned.
    pub fn poll(
        &mut self,
        now: Instant,
        next: &mut dyn FnMut() -> Option<RenderMessage<S, P::Data>>,
    ) -> Option<PaintOutcome> {
        if !self.debouncer.take_due(now) {
            return None;
        }
        Some(self.paint_now(now, next))
    }

    /// Paint immediately, bypassing the debouncer.
    pub fn paint_now(
        &mut self,
        now: Instant,
        next: &mut dyn FnMut() -> Option<RenderMessage<S, P::Data>>,
    ) -> PaintOutcome {
        let (Some(surface), Some(opts)) = (self.surface.as_mut(), self.opts.as_ref()) else {
            self.stats.skipped += 1;
            if self.surface.is_some() {
                self.state = if self.stats.paints == 0 {
                    RenderState::Ready
                } else {
                    RenderState::Idle
                };
            }
            return PaintOutcome::Skipped;
        };

        self.state = RenderState::Painting;
        let mut stash: Vec<RenderMessage<S, P::Data>> = Vec::new();
        let mut drain = || {
            let mut newer = false;
            while let Some(message) = next() {
                newer |= !matches!(message, RenderMessage::Canvas(_));
                stash.push(message);
            }
            newer
        };
        let mut ctx = PaintContext::new(&self.config, &mut drain);

        // resizing also clears
        surface.resize(opts.canvas_width, opts.canvas_height);
        let width = f64::from(opts.canvas_width);
        let height = f64::from(opts.canvas_height);

        if let Some(info) = opts.info_message.as_deref().filter(|m| !m.is_empty()) {
            surface.fill_text(
                TextLabel::new(info, width / 2.0, 0.0, Rgba::RED)
                    .with_size(20.0)
                    .anchored(TextAlign::Center, TextBaseline::Top),
            );
        }

        let result = if opts.zoom_in_required {
            surface.fill_text(centered(self.painter.zoom_message(), width, height, Rgba::PINK));
            Ok(())
        } else if let Some(data) = self.data.as_ref() {
            self.painter.paint(&mut *surface, opts, data, &mut ctx)
        } else {
            surface.fill_text(centered("Loading...", width, height, Rgba::GRAY));
            Ok(())
        };
        surface.set_clip(None);
        drop(ctx);

        let outcome = match result {
            Ok(()) => {
                self.stats.paints += 1;
                self.state = RenderState::Idle;
                PaintOutcome::Painted
            }
            Err(Interrupted) => {
                self.stats.interrupted += 1;
                debug!("paint abandoned for newer input");
                self.debouncer.trigger(now);
                PaintOutcome::Interrupted
            }
        };

        for message in stash {
            let kind = message.kind();
            if let Err(e) = self.handle(message, now) {
                warn!("dropping {kind} message: {e}");
            }
        }
        outcome
    }
}

fn centered(text: &str, width: f64, height: f64, color: Rgba) -> TextLabel {
    TextLabel::new(text, width / 2.0, height / 2.0, color)
        .with_size(20.0)
        .anchored(TextAlign::Center, TextBaseline::Middle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::RasterSurface;

    /// Fills the plot area once per value, checkpointing each time.
    struct CountingPainter {
        painted: Vec<Vec<u32>>,
    }

    impl Painter for CountingPainter {
        type Data = Vec<u32>;

        fn paint(
            &mut self,
            surface: &mut dyn Surface,
            opts: &RenderOptions,
            data: &Self::Data,
            ctx: &mut PaintContext<'_>,
        ) -> std::result::Result<(), Interrupted> {
            for _ in data {
                ctx.checkpoint()?;
                surface.fill_rect(opts.plot_rect(), Rgba::BLACK);
            }
            self.painted.push(data.clone());
            Ok(())
        }
    }

    type Core = RenderCore<CountingPainter, RasterSurface>;
    type Msg = RenderMessage<RasterSurface, Vec<u32>>;

    fn core(config: RenderConfig) -> Core {
        RenderCore::new(CountingPainter { painted: Vec::new() }, config)
    }

    fn none() -> impl FnMut() -> Option<Msg> {
        || None
    }

    #[test]
    fn test_burst_of_messages_paints_once_after_debounce() {
        let mut core = core(RenderConfig::default());
        let t0 = Instant::now();
        core.handle(RenderMessage::Canvas(RasterSurface::new(10, 10)), t0).unwrap();
        for i in 0..20u32 {
            let at = t0 + Duration::from_micros(u64::from(i) * 200);
            let message = if i % 2 == 0 {
                RenderMessage::Opts(RenderOptions::new(100 + i, 50))
            } else {
                RenderMessage::Data(vec![i])
            };
            core.handle(message, at).unwrap();
            assert_eq!(core.poll(at, &mut none()), None);
        }
        assert_eq!(core.stats().paints, 0);
        assert_eq!(core.poll(t0 + Duration::from_millis(9), &mut none()), None);

        let due = t0 + Duration::from_millis(10);
        assert_eq!(core.poll(due, &mut none()), Some(PaintOutcome::Painted));
        assert_eq!(core.poll(due + Duration::from_millis(30), &mut none()), None);
        assert_eq!(core.stats().paints, 1);
        // the paint used the latest options and data
        assert_eq!(core.surface().unwrap().width(), 118);
        assert_eq!(core.painter.painted, vec![vec![19]]);
        assert_eq!(core.state(), RenderState::Idle);
    }

    #[test]
    fn test_state_machine_and_skips() {
        let mut core = core(RenderConfig::default());
        let t0 = Instant::now();
        assert_eq!(core.state(), RenderState::Uninitialized);

        core.handle(RenderMessage::Opts(RenderOptions::new(20, 20)), t0).unwrap();
        let due = t0 + Duration::from_millis(10);
        assert_eq!(core.poll(due, &mut none()), Some(PaintOutcome::Skipped));
        assert_eq!(core.state(), RenderState::Uninitialized);

        core.handle(RenderMessage::Canvas(RasterSurface::new(1, 1)), due).unwrap();
        assert_eq!(core.state(), RenderState::Ready);
        let err = core
            .handle(RenderMessage::Canvas(RasterSurface::new(1, 1)), due)
            .unwrap_err();
        assert!(matches!(err, RenderError::CanvasAlreadyTransferred));

        let later = due + Duration::from_millis(10);
        assert_eq!(core.poll(later, &mut none()), Some(PaintOutcome::Painted));
        assert_eq!(core.state(), RenderState::Idle);

        let stats = core.stats();
        assert_eq!((stats.paints, stats.skipped), (1, 1));
        // no data yet
        let labels = core.surface().unwrap().labels();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].text, "Loading...");
        assert_eq!(labels[0].color, Rgba::GRAY);

        // new input schedules a paint; the state holds until it lands
        core.handle(RenderMessage::Data(vec![1]), later).unwrap();
        assert_eq!(core.state(), RenderState::Painting);
        assert_eq!(core.poll(later, &mut none()), None);
        assert_eq!(core.state(), RenderState::Painting);
        let repaint = later + Duration::from_millis(10);
        assert_eq!(core.poll(repaint, &mut none()), Some(PaintOutcome::Painted));
        assert_eq!(core.state(), RenderState::Idle);
        assert_eq!(core.stats().paints, 2);
    }

    #[test]
    fn test_zoom_and_info_messages() {
        let mut core = core(RenderConfig::default());
        let t0 = Instant::now();
        let mut opts = RenderOptions::new(200, 100);
        opts.zoom_in_required = true;
        opts.info_message = Some("3 units hidden".into());
        core.handle(RenderMessage::Canvas(RasterSurface::new(1, 1)), t0).unwrap();
        core.handle(RenderMessage::Opts(opts), t0).unwrap();
        core.handle(RenderMessage::Data(vec![1, 2]), t0).unwrap();
        core.paint_now(t0, &mut none());

        let surface = core.surface().unwrap();
        let labels = surface.labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].text, "3 units hidden");
        assert_eq!((labels[0].x, labels[0].y), (100.0, 0.0));
        assert_eq!(labels[1].color, Rgba::PINK);
        assert_eq!(surface.painted_pixels(), 0);
        assert!(core.painter.painted.is_empty());
    }

    #[test]
    fn test_newer_data_interrupts_long_paint() {
        let config = RenderConfig::default()
            .with_yield_every(2)
            .with_yield_after(Duration::ZERO);
        let mut core = core(config);
        let t0 = Instant::now();
        core.handle(RenderMessage::Canvas(RasterSurface::new(1, 1)), t0).unwrap();
        core.handle(RenderMessage::Opts(RenderOptions::new(30, 30)), t0).unwrap();
        core.handle(RenderMessage::Data((0..100).collect()), t0).unwrap();

        let mut pending = vec![Msg::Data(vec![7])];
        let mut next = move || pending.pop();
        let due = t0 + Duration::from_millis(10);
        assert_eq!(core.poll(due, &mut next), Some(PaintOutcome::Interrupted));
        assert_eq!(core.stats().interrupted, 1);
        assert!(core.painter.painted.is_empty());
        assert_eq!(core.state(), RenderState::Painting);
        // rescheduled with the newer data applied
        assert!(core.deadline().is_some());
        let again = due + Duration::from_millis(10);
        assert_eq!(core.poll(again, &mut none()), Some(PaintOutcome::Painted));
        assert_eq!(core.painter.painted, vec![vec![7]]);
    }
}
