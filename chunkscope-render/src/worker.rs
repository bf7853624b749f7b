//! Dedicated render thread per panel.
//!
//! The host owns a [`RenderWorker`] handle and sends it messages over an
//! mpsc channel. The thread sleeps until a message arrives or the debounced
//! paint falls due, so bursts of updates cost one paint.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::engine::{PaintStats, RenderCore, RenderState};
use crate::error::{RenderError, Result};
use crate::message::{RenderCommand, RenderMessage};
use crate::options::{RenderConfig, RenderOptions};
use crate::painters::Painter;
use crate::surface::Surface;

#[derive(Debug, Clone, Copy, Default)]
struct Status {
    state: RenderState,
    stats: PaintStats,
}

/// Handle to a render thread.
pub struct RenderWorker<S, D> {
    sender: Option<Sender<RenderMessage<S, D>>>,
    handle: Option<JoinHandle<Option<S>>>,
    canvas_sent: bool,
    status: Arc<Mutex<Status>>,
}

impl<S, D> RenderWorker<S, D>
where
    S: Surface + 'static,
    D: Send + 'static,
{
    /// Start a thread painting with `painter`.
    ///
    /// # Errors
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn<P>(painter: P, config: RenderConfig) -> Result<Self>
    where
        P: Painter<Data = D>,
    {
        let (tx, rx) = mpsc::channel();
        let status = Arc::new(Mutex::new(Status::default()));
        let shared = Arc::clone(&status);
        let handle = thread::Builder::new()
            .name("chunkscope-render".into())
            .spawn(move || run(RenderCore::new(painter, config), &rx, &shared))?;
        Ok(Self {
            sender: Some(tx),
            handle: Some(handle),
            canvas_sent: false,
            status,
        })
    }

    /// Hand the surface to the worker. Succeeds once.
    ///
    /// # Errors
    /// Returns [`RenderError::CanvasAlreadyTransferred`] on a second call,
    /// or [`RenderError::WorkerGone`] if the thread has exited.
    pub fn transfer_canvas(&mut self, surface: S) -> Result<()> {
        if self.canvas_sent {
            return Err(RenderError::CanvasAlreadyTransferred);
        }
        self.send(RenderMessage::Canvas(surface))?;
        self.canvas_sent = true;
        Ok(())
    }

    /// Replace the view options.
    ///
    /// # Errors
    /// Returns [`RenderError::WorkerGone`] if the thread has exited.
    pub fn send_opts(&self, opts: RenderOptions) -> Result<()> {
        self.send(RenderMessage::Opts(opts))
    }

    /// Replace the plot data.
    ///
    /// # Errors
    /// Returns [`RenderError::WorkerGone`] if the thread has exited.
    pub fn send_data(&self, data: D) -> Result<()> {
        self.send(RenderMessage::Data(data))
    }

    /// Forward a JSON command (`{"opts": ...}` or `{"data": ...}`).
    ///
    /// # Errors
    /// Returns [`RenderError::InvalidCommand`] for an unknown shape, or
    /// [`RenderError::WorkerGone`] if the thread has exited.
    pub fn send_command(&self, json: &str) -> Result<()>
    where
        D: DeserializeOwned,
    {
        let command = RenderCommand::<D>::from_json(json)?;
        self.send(command.into())
    }

    /// Last state published by the thread.
    #[must_use]
    pub fn state(&self) -> RenderState {
        self.status.lock().state
    }

    /// Paint counters published by the thread.
    #[must_use]
    pub fn stats(&self) -> PaintStats {
        self.status.lock().stats
    }

    /// Stop the thread and take the surface back.
    ///
    /// # Errors
    /// Returns [`RenderError::WorkerPanicked`] if the thread panicked.
    pub fn terminate(mut self) -> Result<Option<S>> {
        self.sender = None;
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| RenderError::WorkerPanicked),
            None => Ok(None),
        }
    }

    fn send(&self, message: RenderMessage<S, D>) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(RenderError::WorkerGone)?;
        sender.send(message).map_err(|_| RenderError::WorkerGone)
    }
}

impl<S, D> Drop for RenderWorker<S, D> {
    fn drop(&mut self) {
        // disconnecting the channel ends the loop
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("render worker panicked");
            }
        }
    }
}

fn run<P, S>(
    mut core: RenderCore<P, S>,
    rx: &Receiver<RenderMessage<S, P::Data>>,
    status: &Mutex<Status>,
) -> Option<S>
where
    P: Painter,
    S: Surface,
{
    loop {
        let received = match core.deadline() {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        };
        match received {
            Ok(message) => {
                let kind = message.kind();
                if let Err(e) = core.handle(message, Instant::now()) {
                    warn!("render worker rejected {kind} message: {e}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Some(outcome) = core.poll(Instant::now(), &mut || rx.try_recv().ok()) {
            debug!("render worker paint: {outcome:?}");
        }
        *status.lock() = Status {
            state: core.state(),
            stats: core.stats(),
        };
    }
    debug!("render worker stopping");
    core.into_surface()
}
