//! Pipeline orchestration.
//!
//! The [`PipelineManager`] owns the fixed component graph and everything
//! that flows through it: stage and tunnel lifecycle, the buffer pools and
//! their conservation, flushing, and the serialization loop that drains
//! driver events. All driver events and the periodic stall tick pass
//! through one queue and one worker thread, so event handling is strictly
//! ordered; the device-facing calls are guarded by a single mutex and are
//! safe to invoke concurrently with the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferPool, MediaBuffer, PoolStats, StreamKind};
use crate::clock::ClockController;
use crate::display::{render_region, DisplayMode, DisplayService};
use crate::driver::{
    DriverEvent, DriverStatus, EventSink, PipelineDriver, PortFormat, SinkMessage, StageConfig,
    StageHandle,
};
use crate::error::{Error, Result};
use crate::graph::{
    StageArena, StageRecord, StageRole, TunnelArena, TunnelRecord, TunnelRole,
    STAGE_CREATION_ORDER, TUNNEL_CREATION_ORDER,
};
use crate::observability::{
    init_metrics, record_buffer_returned, record_buffer_submitted, record_buffers_lost,
    record_flush, record_pool_free, record_stall,
};
use crate::stall::{StallConfig, StallDetector};
use crate::time::MediaTicks;

// ============================================================================
// Configuration
// ============================================================================

/// Pipeline construction settings.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Number of audio input buffers to allocate.
    pub audio_buffers: usize,
    /// Capacity of each audio buffer in bytes.
    pub audio_buffer_capacity: usize,
    /// Number of video input buffers to allocate.
    pub video_buffers: usize,
    /// Capacity of each video buffer in bytes.
    pub video_buffer_capacity: usize,
    /// How long `deinit` waits for in-flight buffers before forcing
    /// teardown.
    pub deinit_timeout: Duration,
    /// Stall detection settings.
    pub stall: StallConfig,
    /// How video is mapped onto the display.
    pub display_mode: DisplayMode,
    /// Live-rendering latency target pushed to the clock stage.
    pub latency_target: Option<MediaTicks>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_buffers: 16,
            audio_buffer_capacity: 64 * 1024,
            video_buffers: 20,
            video_buffer_capacity: 256 * 1024,
            deinit_timeout: Duration::from_secs(2),
            stall: StallConfig::default(),
            display_mode: DisplayMode::default(),
            latency_target: None,
        }
    }
}

/// Outcome of a `deinit` call.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeinitReport {
    /// Buffers still outstanding when the bounded wait expired; written
    /// off rather than blocking teardown.
    pub lost_buffers: usize,
    /// Whether teardown was forced after the drain timed out.
    pub forced: bool,
}

// ============================================================================
// Shared state
// ============================================================================

#[derive(Default)]
struct Hooks {
    on_stall: Option<Box<dyn Fn(StreamKind) + Send + Sync>>,
    on_eos: Option<Box<dyn Fn() + Send + Sync>>,
    on_error: Option<Box<dyn Fn(DriverStatus) + Send + Sync>>,
}

struct PipelineState {
    ready: bool,
    stages: StageArena,
    tunnels: TunnelArena,
    pools: [BufferPool; StreamKind::COUNT],
    /// Next buffer per stream anchors the clock (set at init and after
    /// every flush).
    start_time_pending: [bool; StreamKind::COUNT],
    /// Next buffer per stream starts a new timeline.
    discontinuity_pending: [bool; StreamKind::COUNT],
    video_format: Option<PortFormat>,
    stall: StallDetector,
}

struct Core {
    driver: Arc<dyn PipelineDriver>,
    display: Arc<dyn DisplayService>,
    display_mode: DisplayMode,
    state: Mutex<PipelineState>,
    drained: Condvar,
    hooks: Mutex<Hooks>,
}

fn status_of(err: &Error) -> DriverStatus {
    match err {
        Error::Driver { status, .. } => *status,
        Error::StageCreation { status, .. } => *status,
        Error::TunnelCreation { status, .. } => *status,
        _ => DriverStatus::NONE,
    }
}

fn input_stage(stream: StreamKind) -> StageRole {
    match stream {
        StreamKind::Audio => StageRole::AudioRender,
        StreamKind::Video => StageRole::VideoDecoder,
    }
}

// ============================================================================
// PipelineManager
// ============================================================================

/// Owner of the component graph, tunnels and buffer lifecycle.
pub struct PipelineManager {
    core: Arc<Core>,
    clock: Arc<ClockController>,
    config: PipelineConfig,
    tx: kanal::Sender<SinkMessage>,
    ticker_stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager").finish_non_exhaustive()
    }
}

impl PipelineManager {
    /// Build the pipeline: all stages, then all tunnels, in dependency
    /// order; enable every stage and allocate the input buffer pools.
    ///
    /// Fails fatally on any creation error; everything already built is
    /// rolled back so nothing is left dangling.
    pub fn init(
        driver: Arc<dyn PipelineDriver>,
        display: Arc<dyn DisplayService>,
        config: PipelineConfig,
    ) -> Result<Arc<Self>> {
        init_metrics();

        let (tx, rx) = kanal::unbounded();
        driver.set_event_sink(EventSink::new(tx.clone()));

        let mut stages = StageArena::new();
        let mut tunnels = TunnelArena::new();

        if let Err(err) = Self::build_graph(&driver, &mut stages, &mut tunnels, &config) {
            Self::rollback(&driver, &mut stages, &mut tunnels);
            return Err(err);
        }

        let mut pools = [
            BufferPool::new(StreamKind::Audio),
            BufferPool::new(StreamKind::Video),
        ];
        for (stream, count, capacity) in [
            (StreamKind::Audio, config.audio_buffers, config.audio_buffer_capacity),
            (StreamKind::Video, config.video_buffers, config.video_buffer_capacity),
        ] {
            let stage = stages
                .handle(input_stage(stream))
                .expect("graph is complete");
            match driver.allocate_buffers(stage, stream, count, capacity) {
                Ok(buffers) => pools[stream.index()].charge(buffers),
                Err(err) => {
                    Self::release_pools(&driver, &stages, &mut pools);
                    Self::rollback(&driver, &mut stages, &mut tunnels);
                    return Err(err);
                }
            }
            record_pool_free(stream, pools[stream.index()].available());
        }

        let clock_stage = stages.handle(StageRole::Clock).expect("graph is complete");
        let clock = Arc::new(ClockController::new(driver.clone(), clock_stage));
        if let Some(target) = config.latency_target {
            if let Err(err) = clock.set_latency_target(target.to_driver()) {
                warn!(error = %err, "driver refused latency target");
            }
        }

        let core = Arc::new(Core {
            driver,
            display,
            display_mode: config.display_mode,
            state: Mutex::new(PipelineState {
                ready: true,
                stages,
                tunnels,
                pools,
                start_time_pending: [true; StreamKind::COUNT],
                discontinuity_pending: [false; StreamKind::COUNT],
                video_format: None,
                stall: StallDetector::new(&config.stall),
            }),
            drained: Condvar::new(),
            hooks: Mutex::new(Hooks::default()),
        });

        let worker = {
            let core = core.clone();
            let clock = clock.clone();
            std::thread::Builder::new()
                .name("lockstep-events".into())
                .spawn(move || run_worker(core, clock, rx))
        };
        let worker = match worker {
            Ok(handle) => handle,
            Err(err) => {
                error!(error = %err, "failed to spawn event worker");
                Self::abort_init(&core);
                return Err(Error::NotReady);
            }
        };

        let ticker_stop = Arc::new(AtomicBool::new(false));
        let ticker = {
            let tx = tx.clone();
            let stop = ticker_stop.clone();
            let interval = config.stall.poll_interval;
            std::thread::Builder::new()
                .name("lockstep-ticker".into())
                .spawn(move || run_ticker(tx, interval, stop))
        };
        let ticker = match ticker {
            Ok(handle) => handle,
            Err(err) => {
                error!(error = %err, "failed to spawn stall ticker");
                let _ = tx.send(SinkMessage::Shutdown);
                let _ = worker.join();
                Self::abort_init(&core);
                return Err(Error::NotReady);
            }
        };

        info!("pipeline initialized");
        Ok(Arc::new(Self {
            core,
            clock,
            config,
            tx,
            ticker_stop,
            worker: Mutex::new(Some(worker)),
            ticker: Mutex::new(Some(ticker)),
        }))
    }

    fn build_graph(
        driver: &Arc<dyn PipelineDriver>,
        stages: &mut StageArena,
        tunnels: &mut TunnelArena,
        config: &PipelineConfig,
    ) -> Result<()> {
        for role in STAGE_CREATION_ORDER {
            let handle = driver
                .create_stage(role)
                .map_err(|e| Error::StageCreation { role, status: status_of(&e) })?;
            stages.insert(StageRecord { role, handle, enabled: false });
            debug!(stage = %role, "stage created");
        }

        for role in STAGE_CREATION_ORDER {
            let record = stages.get_mut(role).expect("just created");
            driver.set_stage_enabled(record.handle, true).map_err(|e| {
                Error::StageCreation { role, status: status_of(&e) }
            })?;
            record.enabled = true;
        }

        for role in TUNNEL_CREATION_ORDER {
            let (up, down) = role.endpoints();
            let upstream = stages.handle(up).expect("stages are complete");
            let downstream = stages.handle(down).expect("stages are complete");
            let handle = driver
                .create_tunnel(role, upstream, downstream)
                .map_err(|e| Error::TunnelCreation { role, status: status_of(&e) })?;
            tunnels.insert(TunnelRecord { role, handle });
            debug!(tunnel = %role, "tunnel created");
        }

        // Stall watch lives on the video decoder's input port.
        let decoder = stages
            .handle(StageRole::VideoDecoder)
            .expect("stages are complete");
        if let Err(err) =
            driver.configure(decoder, StageConfig::StallThreshold(config.stall.threshold))
        {
            warn!(error = %err, "driver refused stall threshold");
        }

        Ok(())
    }

    /// Undo a partially completed init once the graph already lives inside
    /// the shared state.
    fn abort_init(core: &Arc<Core>) {
        let mut state = core.state.lock().unwrap();
        state.ready = false;
        let mut pools = std::mem::replace(
            &mut state.pools,
            [
                BufferPool::new(StreamKind::Audio),
                BufferPool::new(StreamKind::Video),
            ],
        );
        Self::release_pools(&core.driver, &state.stages, &mut pools);
        let PipelineState { stages, tunnels, .. } = &mut *state;
        Self::rollback(&core.driver, stages, tunnels);
    }

    /// Tear down whatever `build_graph` managed to create, tunnels before
    /// stages, in reverse creation order. Errors are logged, not returned:
    /// rollback must run to completion.
    fn rollback(
        driver: &Arc<dyn PipelineDriver>,
        stages: &mut StageArena,
        tunnels: &mut TunnelArena,
    ) {
        for role in TUNNEL_CREATION_ORDER.iter().rev() {
            if let Some(record) = tunnels.take(*role) {
                if let Err(err) = driver.destroy_tunnel(record.handle) {
                    warn!(tunnel = %role, error = %err, "rollback: tunnel destruction failed");
                }
            }
        }
        for role in STAGE_CREATION_ORDER.iter().rev() {
            if let Some(record) = stages.take(*role) {
                if record.enabled {
                    if let Err(err) = driver.set_stage_enabled(record.handle, false) {
                        warn!(stage = %role, error = %err, "rollback: stage disable failed");
                    }
                }
                if let Err(err) = driver.destroy_stage(record.handle) {
                    warn!(stage = %role, error = %err, "rollback: stage destruction failed");
                }
            }
        }
    }

    fn release_pools(
        driver: &Arc<dyn PipelineDriver>,
        stages: &StageArena,
        pools: &mut [BufferPool; StreamKind::COUNT],
    ) {
        for stream in [StreamKind::Audio, StreamKind::Video] {
            let buffers = pools[stream.index()].drain_for_release();
            if buffers.is_empty() {
                continue;
            }
            if let Some(stage) = stages.handle(input_stage(stream)) {
                if let Err(err) = driver.release_buffers(stage, buffers) {
                    warn!(stream = %stream, error = %err, "buffer release failed");
                }
            }
        }
    }

    /// The clock controller for this pipeline.
    pub fn clock(&self) -> &Arc<ClockController> {
        &self.clock
    }

    /// The cached video format, once the decoder has reported one.
    pub fn video_size(&self) -> Option<PortFormat> {
        self.core.state.lock().unwrap().video_format
    }

    /// Register the buffer-stall notification hook.
    pub fn on_buffer_stall(&self, hook: impl Fn(StreamKind) + Send + Sync + 'static) {
        self.core.hooks.lock().unwrap().on_stall = Some(Box::new(hook));
    }

    /// Register the end-of-stream notification hook.
    pub fn on_end_of_stream(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.core.hooks.lock().unwrap().on_eos = Some(Box::new(hook));
    }

    /// Register the driver-error notification hook.
    pub fn on_error(&self, hook: impl Fn(DriverStatus) + Send + Sync + 'static) {
        self.core.hooks.lock().unwrap().on_error = Some(Box::new(hook));
    }

    /// Check audio buffer availability without acquiring.
    pub fn poll_audio_buffers(&self) -> bool {
        self.poll_buffers(StreamKind::Audio)
    }

    /// Check video buffer availability without acquiring.
    pub fn poll_video_buffers(&self) -> bool {
        self.poll_buffers(StreamKind::Video)
    }

    fn poll_buffers(&self, stream: StreamKind) -> bool {
        let state = self.core.state.lock().unwrap();
        state.ready && state.pools[stream.index()].available() > 0
    }

    /// Take a free audio buffer with the given PTS attached.
    ///
    /// Non-blocking: `None` when the pipeline is not ready or the pool is
    /// exhausted; poll and retry.
    pub fn get_audio_buffer(&self, pts: MediaTicks) -> Option<MediaBuffer> {
        self.get_buffer(StreamKind::Audio, pts)
    }

    /// Take a free video buffer with the given PTS attached.
    ///
    /// Non-blocking: `None` when the pipeline is not ready or the pool is
    /// exhausted; poll and retry.
    pub fn get_video_buffer(&self, pts: MediaTicks) -> Option<MediaBuffer> {
        self.get_buffer(StreamKind::Video, pts)
    }

    fn get_buffer(&self, stream: StreamKind, pts: MediaTicks) -> Option<MediaBuffer> {
        let mut state = self.core.state.lock().unwrap();
        if !state.ready {
            return None;
        }
        let mut buf = state.pools[stream.index()].take()?;
        buf.set_pts(pts);
        // The anchor needs a valid timestamp; an untimestamped buffer
        // (codec config) leaves the marker pending for the next one.
        if state.start_time_pending[stream.index()] && pts.is_some() {
            buf.flags_mut().start_time = true;
            state.start_time_pending[stream.index()] = false;
        }
        if state.discontinuity_pending[stream.index()] {
            buf.flags_mut().discontinuity = true;
            state.discontinuity_pending[stream.index()] = false;
        }
        record_pool_free(stream, state.pools[stream.index()].available());
        Some(buf)
    }

    /// Submit a filled audio buffer downstream.
    pub fn empty_audio_buffer(&self, buf: MediaBuffer) -> Result<()> {
        self.empty_buffer(StreamKind::Audio, buf)
    }

    /// Submit a filled video buffer downstream.
    pub fn empty_video_buffer(&self, buf: MediaBuffer) -> Result<()> {
        self.empty_buffer(StreamKind::Video, buf)
    }

    fn empty_buffer(&self, stream: StreamKind, buf: MediaBuffer) -> Result<()> {
        debug_assert_eq!(buf.stream(), stream);
        let anchors_clock = buf.flags().start_time;
        let pts = buf.pts();

        {
            let mut state = self.core.state.lock().unwrap();
            if !state.ready {
                return Err(Error::NotReady);
            }
            let stage = state
                .stages
                .handle(input_stage(stream))
                .ok_or(Error::NotReady)?;

            state.stall.record_submission(stream, self.clock.media_time());
            if let Err(submit) = self.core.driver.submit_buffer(stage, buf) {
                warn!(stream = %stream, status = %submit.status, "buffer submission rejected");
                if state.pools[stream.index()].put_back(submit.buffer).is_err() {
                    warn!(stream = %stream, "rejected buffer was not outstanding");
                }
                return Err(Error::driver("buffer submission", submit.status));
            }
            record_buffer_submitted(stream);
        }

        // The first timestamped buffer of a (re)started stream anchors the
        // clock and releases a matching WaitFor* state.
        if anchors_clock && pts.is_some() {
            self.clock.set_current_reference_time(stream, pts)?;
        }
        Ok(())
    }

    /// Drain queued buffers for a stream.
    ///
    /// Optionally flushes the render stage as well. The stream's trackers
    /// are reset so its next buffer is marked as starting a new timeline;
    /// required after any speed or direction change and after an
    /// end-of-stream restart.
    pub fn flush(&self, stream: StreamKind, flush_render: bool) -> Result<()> {
        let mut state = self.core.state.lock().unwrap();
        if !state.ready {
            return Err(Error::NotReady);
        }

        let input = state
            .stages
            .handle(input_stage(stream))
            .ok_or(Error::NotReady)?;
        self.core.driver.flush_stage(input)?;

        if stream == StreamKind::Video && flush_render {
            if let Some(render) = state.stages.handle(StageRole::VideoRender) {
                self.core.driver.flush_stage(render)?;
            }
        }

        state.start_time_pending[stream.index()] = true;
        state.discontinuity_pending[stream.index()] = true;
        state.stall.reset(stream);
        record_flush(stream);
        debug!(stream = %stream, flush_render, "stream flushed");
        Ok(())
    }

    /// Mute or unmute the audio render stage.
    pub fn set_audio_mute(&self, mute: bool) -> Result<()> {
        let state = self.core.state.lock().unwrap();
        if !state.ready {
            return Err(Error::NotReady);
        }
        let stage = state
            .stages
            .handle(StageRole::AudioRender)
            .ok_or(Error::NotReady)?;
        self.core.driver.configure(stage, StageConfig::Mute(mute))
    }

    /// Queue an end-of-stream marker on the video path.
    ///
    /// The driver's end-of-stream event fires the registered hook once the
    /// marker has drained through the render stage.
    pub fn submit_eos(&self) -> Result<()> {
        let mut state = self.core.state.lock().unwrap();
        if !state.ready {
            return Err(Error::NotReady);
        }
        let stage = state
            .stages
            .handle(StageRole::VideoDecoder)
            .ok_or(Error::NotReady)?;
        let mut buf = state.pools[StreamKind::Video.index()]
            .take()
            .ok_or(Error::PoolExhausted)?;
        buf.set_pts(MediaTicks::NONE);
        buf.flags_mut().eos = true;

        if let Err(submit) = self.core.driver.submit_buffer(stage, buf) {
            let status = submit.status;
            if state.pools[StreamKind::Video.index()].put_back(submit.buffer).is_err() {
                warn!("rejected EOS buffer was not outstanding");
            }
            return Err(Error::driver("end-of-stream submission", status));
        }
        record_buffer_submitted(StreamKind::Video);
        Ok(())
    }

    /// Pool accounting for a stream.
    pub fn pool_stats(&self, stream: StreamKind) -> PoolStats {
        self.core.state.lock().unwrap().pools[stream.index()].stats()
    }

    /// Tear the pipeline down.
    ///
    /// Flushes in-flight buffers and waits (bounded) for the driver to
    /// return them, then disables stages, destroys tunnels in reverse
    /// creation order and finally the stages. If the wait expires the
    /// teardown proceeds anyway and outstanding buffers are written off in
    /// the report rather than blocking indefinitely.
    pub fn deinit(&self) -> Result<DeinitReport> {
        let lost;
        {
            let mut state = self.core.state.lock().unwrap();
            if !state.ready {
                return Err(Error::NotReady);
            }
            state.ready = false;

            // Push the driver to return everything it holds.
            for stream in [StreamKind::Audio, StreamKind::Video] {
                if let Some(stage) = state.stages.handle(input_stage(stream)) {
                    if let Err(err) = self.core.driver.flush_stage(stage) {
                        warn!(stream = %stream, error = %err, "teardown flush failed");
                    }
                }
            }

            // Bounded drain: the worker returns buffers to the pools and
            // notifies while we wait.
            let deadline = Instant::now() + self.config.deinit_timeout;
            while state.pools.iter().map(BufferPool::in_flight).sum::<usize>() > 0 {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = self
                    .core
                    .drained
                    .wait_timeout(state, deadline - now)
                    .unwrap();
                state = guard;
            }

            lost = state.pools.iter().map(BufferPool::in_flight).sum::<usize>();
            if lost > 0 {
                warn!(lost, "drain timed out; forcing teardown, buffers written off");
                record_buffers_lost(lost);
            }

            if let Err(err) = self.clock.stop() {
                warn!(error = %err, "clock stop failed during teardown");
            }

            let mut pools = std::mem::replace(
                &mut state.pools,
                [
                    BufferPool::new(StreamKind::Audio),
                    BufferPool::new(StreamKind::Video),
                ],
            );
            Self::release_pools(&self.core.driver, &state.stages, &mut pools);

            for role in TUNNEL_CREATION_ORDER.iter().rev() {
                if let Some(record) = state.tunnels.take(*role) {
                    if let Err(err) = self.core.driver.destroy_tunnel(record.handle) {
                        warn!(tunnel = %role, error = %err, "tunnel destruction failed");
                    }
                }
            }
            for role in STAGE_CREATION_ORDER.iter().rev() {
                if let Some(record) = state.stages.take(*role) {
                    if let Err(err) = self.core.driver.set_stage_enabled(record.handle, false) {
                        warn!(stage = %role, error = %err, "stage disable failed");
                    }
                    if let Err(err) = self.core.driver.destroy_stage(record.handle) {
                        warn!(stage = %role, error = %err, "stage destruction failed");
                    }
                }
            }
        }

        self.stop_threads();
        info!(lost, "pipeline deinitialized");
        Ok(DeinitReport { lost_buffers: lost, forced: lost > 0 })
    }

    fn stop_threads(&self) {
        self.ticker_stop.store(true, Ordering::SeqCst);
        let _ = self.tx.send(SinkMessage::Shutdown);
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        // deinit already stopped the threads; this only covers a manager
        // dropped without teardown.
        self.stop_threads();
    }
}

// ============================================================================
// Serialization loop
// ============================================================================

fn run_worker(
    core: Arc<Core>,
    clock: Arc<ClockController>,
    rx: kanal::Receiver<SinkMessage>,
) {
    while let Ok(message) = rx.recv() {
        match message {
            SinkMessage::Shutdown => break,
            SinkMessage::Event(event) => handle_event(&core, &clock, event),
            SinkMessage::Tick => handle_tick(&core, &clock),
        }
    }
    debug!("event worker stopped");
}

fn handle_event(core: &Core, clock: &ClockController, event: DriverEvent) {
    match event {
        DriverEvent::BufferReturned { stage: _, buffer } => {
            let stream = buffer.stream();
            let mut state = core.state.lock().unwrap();
            match state.pools[stream.index()].put_back(buffer) {
                Ok(()) => {
                    state.stall.record_consumption(stream, clock.media_time());
                    record_buffer_returned(stream);
                    record_pool_free(stream, state.pools[stream.index()].available());
                    core.drained.notify_all();
                }
                Err(id) => {
                    warn!(stream = %stream, id = id.raw(), "dropping unexpected buffer return");
                }
            }
        }

        DriverEvent::PortSettingsChanged { stage, format } => {
            handle_port_settings_changed(core, stage, format);
        }

        DriverEvent::EndOfStream { stage } => {
            info!(stage = stage.raw(), "end of stream");
            let hooks = core.hooks.lock().unwrap();
            if let Some(hook) = &hooks.on_eos {
                hook();
            }
        }

        DriverEvent::StageError { stage, status } => {
            error!(stage = stage.raw(), status = %status, "stage error");
            let hooks = core.hooks.lock().unwrap();
            if let Some(hook) = &hooks.on_error {
                hook(status);
            }
        }
    }
}

fn handle_port_settings_changed(core: &Core, stage: StageHandle, format: PortFormat) {
    let mut state = core.state.lock().unwrap();
    let Some(role) = state.stages.role_of(stage) else {
        return;
    };
    if role != StageRole::VideoDecoder {
        debug!(stage = %role, "ignoring port change on non-decoder stage");
        return;
    }
    info!(format = %format, "decoder port settings changed");

    let Some(tunnel) = state.tunnels.handle(TunnelRole::DecoderToEffects) else {
        return;
    };
    if let Err(err) = core.driver.reconfigure_tunnel(tunnel, &format) {
        // Non-fatal: keep rendering with the previous configuration.
        warn!(format = %format, error = %err, "tunnel renegotiation failed, keeping previous format");
        return;
    }
    state.video_format = Some(format);

    if let Some(render) = state.stages.handle(StageRole::VideoRender) {
        let timing = core.display.output_timing();
        let region = render_region(&format, &timing, core.display_mode);
        if let Err(err) = core.driver.configure(render, StageConfig::RenderRegion(region)) {
            warn!(error = %err, "render region update failed");
        }
    }
}

/// Feeds periodic stall-evaluation ticks into the serialization queue so
/// time-based checks run on the same worker as every other event.
fn run_ticker(tx: kanal::Sender<SinkMessage>, interval: Duration, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(interval);
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if tx.send(SinkMessage::Tick).is_err() {
            break;
        }
    }
    debug!("stall ticker stopped");
}

fn handle_tick(core: &Core, clock: &ClockController) {
    let now = clock.media_time();
    let mut raised: SmallVec<[StreamKind; StreamKind::COUNT]> = SmallVec::new();
    {
        let mut state = core.state.lock().unwrap();
        if !state.ready {
            return;
        }
        for stream in [StreamKind::Audio, StreamKind::Video] {
            let pending = state.pools[stream.index()].in_flight();
            if state.stall.check(stream, pending, now) {
                record_stall(stream);
                raised.push(stream);
            }
        }
    }
    if raised.is_empty() {
        return;
    }
    let hooks = core.hooks.lock().unwrap();
    if let Some(hook) = &hooks.on_stall {
        for stream in raised {
            hook(stream);
        }
    }
}
