// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Threads moving frames from the camera to the screen.
//!
//! ```text
//! acquisition --(raw mailbox)--> processing --(processed mailbox)--> rendering
//! ```
//!
//! Acquisition never waits on the rest of the pipeline: if processing hasn't taken the previous
//! raw frame yet, the new one is dropped. Processing and rendering block on their input
//! mailboxes. Frames always arrive in the order they were read; dropping a frame only ever
//! leaves a gap.
use std::boxed::Box;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::config::LiveOptions;
use crate::frame::{FrameProcessor, FrameSource, ProcessedFrame, RawFrame};
use crate::mailbox::Mailbox;

/// The long running parts of the pipeline, one thread each.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Unit {
    Acquisition,
    Processing,
    Rendering,
}

impl Unit {
    pub fn name(self) -> &'static str {
        match self {
            Unit::Acquisition => "acquisition",
            Unit::Processing => "processing",
            Unit::Rendering => "rendering",
        }
    }

    /// Reading the camera on time matters most, then keeping the screen responsive.
    pub fn priority(self) -> UnitPriority {
        match self {
            Unit::Acquisition => UnitPriority::High,
            Unit::Processing => UnitPriority::Low,
            Unit::Rendering => UnitPriority::Medium,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Relative scheduling priority of a [`Unit`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum UnitPriority {
    Low,
    Medium,
    High,
}

/// Called from each pipeline thread as it starts, to apply its priority.
pub type PriorityHook = fn(Unit, UnitPriority);

/// Host threads have no priorities worth setting, so the default hook only logs.
fn log_priority(unit: Unit, priority: UnitPriority) {
    debug!("{} thread started with {:?} priority", unit, priority);
}

/// Knobs for spawning the pipeline threads.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Stack size for each thread, or the platform default.
    pub stack_size: Option<usize>,

    pub priority_hook: PriorityHook,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stack_size: None,
            priority_hook: log_priority,
        }
    }
}

/// Where processed frames end up, normally the display.
pub trait RenderSink {
    fn render(&mut self, frame: ProcessedFrame);
}

impl<F> RenderSink for F
where
    F: FnMut(ProcessedFrame),
{
    fn render(&mut self, frame: ProcessedFrame) {
        self(frame)
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// A thread couldn't be started.
    Spawn(io::Error),

    /// A thread panicked.
    Panicked(Unit),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Spawn(err) => write!(f, "unable to start pipeline thread: {}", err),
            PipelineError::Panicked(unit) => write!(f, "{} thread panicked", unit),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Spawn(err) => Some(err),
            PipelineError::Panicked(_) => None,
        }
    }
}

/// Counters kept by the pipeline threads, for diagnostics.
#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicUsize,
    dropped: AtomicUsize,
    read_failures: AtomicUsize,
    refresh_failures: AtomicUsize,
    processed: AtomicUsize,
    rendered: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A snapshot of the pipeline counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PipelineStats {
    /// Frames read from the camera.
    pub frames_acquired: usize,

    /// Frames thrown away because processing was still busy.
    pub frames_dropped: usize,

    /// Failed attempts at reading a frame.
    pub read_failures: usize,

    /// Failed attempts at changing the refresh rate.
    pub refresh_failures: usize,

    pub frames_processed: usize,

    pub frames_rendered: usize,
}

/// State shared between the pipeline threads and the handle.
#[derive(Debug)]
struct Shared {
    quit: AtomicBool,
    paused: AtomicBool,
    options: Arc<LiveOptions>,
    raw: Mailbox<Box<RawFrame>, 1>,
    processed: Mailbox<Box<ProcessedFrame>, 1>,
    counters: Counters,
}

impl Shared {
    fn should_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

/// Handle to the running pipeline. Dropping it shuts the pipeline down.
#[derive(Debug)]
pub struct Pipeline {
    shared: Arc<Shared>,
    acquisition: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<()>>,
    rendering: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the pipeline with the default [`PipelineConfig`].
    pub fn start<S, P, R>(
        source: S,
        processor: P,
        sink: R,
        options: Arc<LiveOptions>,
    ) -> Result<Self, PipelineError>
    where
        S: FrameSource + Send + 'static,
        P: FrameProcessor + Send + 'static,
        R: RenderSink + Send + 'static,
    {
        Self::start_with_config(source, processor, sink, options, PipelineConfig::default())
    }

    /// Spawn the three pipeline threads.
    ///
    /// `options` is read by acquisition for the frame rate and by processing for the emissivity,
    /// so changes made through it apply from the next frame on.
    pub fn start_with_config<S, P, R>(
        source: S,
        processor: P,
        sink: R,
        options: Arc<LiveOptions>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError>
    where
        S: FrameSource + Send + 'static,
        P: FrameProcessor + Send + 'static,
        R: RenderSink + Send + 'static,
    {
        let shared = Arc::new(Shared {
            quit: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            options,
            raw: Mailbox::new(),
            processed: Mailbox::new(),
            counters: Counters::default(),
        });
        // If spawning fails part way, dropping this stops whatever was already started.
        let mut pipeline = Self {
            shared,
            acquisition: None,
            processing: None,
            rendering: None,
        };
        pipeline.rendering = Some(spawn_unit(
            Unit::Rendering,
            &config,
            &pipeline.shared,
            move |shared| render_loop(sink, shared),
        )?);
        pipeline.processing = Some(spawn_unit(
            Unit::Processing,
            &config,
            &pipeline.shared,
            move |shared| process_loop(processor, shared),
        )?);
        pipeline.acquisition = Some(spawn_unit(
            Unit::Acquisition,
            &config,
            &pipeline.shared,
            move |shared| acquisition_loop(source, shared),
        )?);
        info!("pipeline started");
        Ok(pipeline)
    }

    /// The live options the pipeline reads from.
    pub fn options(&self) -> &Arc<LiveOptions> {
        &self.shared.options
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = &self.shared.counters;
        PipelineStats {
            frames_acquired: counters.acquired.load(Ordering::Relaxed),
            frames_dropped: counters.dropped.load(Ordering::Relaxed),
            read_failures: counters.read_failures.load(Ordering::Relaxed),
            refresh_failures: counters.refresh_failures.load(Ordering::Relaxed),
            frames_processed: counters.processed.load(Ordering::Relaxed),
            frames_rendered: counters.rendered.load(Ordering::Relaxed),
        }
    }

    /// Stop reading the camera after the current frame. Frames already read still drain through.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        info!("pipeline paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        if let Some(acquisition) = &self.acquisition {
            acquisition.thread().unpark();
        }
        info!("pipeline resumed");
    }

    /// Pause if running, resume if paused. Returns whether the pipeline is now paused.
    pub fn toggle_pause(&self) -> bool {
        if self.is_paused() {
            self.resume();
            false
        } else {
            self.pause();
            true
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Stop every thread and wait for them to exit.
    pub fn shutdown(mut self) -> Result<(), PipelineError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        if self.acquisition.is_none() && self.processing.is_none() && self.rendering.is_none() {
            return Ok(());
        }
        let shared = &self.shared;
        shared.quit.store(true, Ordering::SeqCst);
        if let Some(acquisition) = &self.acquisition {
            acquisition.thread().unpark();
        }
        shared.raw.inject_sentinel_if_empty();
        shared.processed.inject_sentinel_if_empty();
        // Processing might be waiting for rendering to make room.
        shared.processed.wake_all();
        let mut result = Ok(());
        let units = [
            (Unit::Acquisition, self.acquisition.take()),
            (Unit::Processing, self.processing.take()),
            (Unit::Rendering, self.rendering.take()),
        ];
        for (unit, handle) in units {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("{} thread panicked", unit);
                    if result.is_ok() {
                        result = Err(PipelineError::Panicked(unit));
                    }
                }
            }
        }
        info!("pipeline stopped");
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("error while stopping pipeline: {}", err);
        }
    }
}

fn spawn_unit<F>(
    unit: Unit,
    config: &PipelineConfig,
    shared: &Arc<Shared>,
    body: F,
) -> Result<JoinHandle<()>, PipelineError>
where
    F: FnOnce(&Shared) + Send + 'static,
{
    let mut builder = thread::Builder::new().name(unit.name().into());
    if let Some(stack_size) = config.stack_size {
        builder = builder.stack_size(stack_size);
    }
    let hook = config.priority_hook;
    let shared = Arc::clone(shared);
    builder
        .spawn(move || {
            hook(unit, unit.priority());
            body(&shared);
        })
        .map_err(PipelineError::Spawn)
}

fn acquisition_loop<S: FrameSource>(mut source: S, shared: &Shared) {
    let counters = &shared.counters;
    'frames: while !shared.should_quit() {
        if shared.paused.load(Ordering::SeqCst) {
            // Unparked by resume and shutdown. Spurious wakeups just go around again.
            thread::park();
            continue;
        }
        let desired = shared.options.refresh_rate();
        if desired != source.refresh_rate() {
            match source.set_refresh_rate(desired) {
                Ok(()) => info!("refresh rate changed to {:?}", desired),
                Err(err) => {
                    Counters::bump(&counters.refresh_failures);
                    warn!("unable to change refresh rate to {:?}: {:?}", desired, err);
                }
            }
        }
        let mut frame = Box::new(RawFrame::default());
        while let Err(err) = source.read_frame(&mut frame) {
            Counters::bump(&counters.read_failures);
            warn!("unable to read frame: {:?}", err);
            if shared.should_quit() {
                break 'frames;
            }
        }
        Counters::bump(&counters.acquired);
        if shared.raw.try_put(frame).is_err() {
            Counters::bump(&counters.dropped);
            debug!("processing is still busy, dropping frame");
        }
    }
    info!("acquisition stopped");
}

fn process_loop<P: FrameProcessor>(processor: P, shared: &Shared) {
    while !shared.should_quit() {
        let raw = match shared.raw.get() {
            Some(raw) => raw,
            None => continue,
        };
        let processed = processor.process(&raw, shared.options.emissivity());
        Counters::bump(&shared.counters.processed);
        if shared
            .processed
            .put_unless(Box::new(processed), || shared.should_quit())
            .is_err()
        {
            debug!("shutting down, dropping processed frame");
        }
    }
    info!("processing stopped");
}

fn render_loop<R: RenderSink>(mut sink: R, shared: &Shared) {
    while !shared.should_quit() {
        let frame = match shared.processed.get() {
            Some(frame) => frame,
            None => continue,
        };
        sink.render(*frame);
        Counters::bump(&shared.counters.rendered);
    }
    info!("rendering stopped");
}
