//! Shared test scaffolding: a scripted in-memory pipeline driver.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lockstep::buffer::{BufferId, MediaBuffer, StreamKind};
use lockstep::display::StaticDisplay;
use lockstep::driver::{
    DriverEvent, DriverStatus, EventSink, PipelineDriver, PortFormat, StageConfig, StageHandle,
    SubmitError, TunnelHandle,
};
use lockstep::error::{Error, Result};
use lockstep::graph::{StageRole, TunnelRole};
use lockstep::manager::{PipelineConfig, PipelineManager};

#[derive(Default)]
struct FakeInner {
    sink: Option<EventSink>,
    next_handle: u64,
    next_buffer: u64,
    stages: HashMap<u64, StageRole>,
    tunnels: HashMap<u64, TunnelRole>,
    enabled: HashMap<u64, bool>,
    /// Buffers a stage holds after submission, oldest first.
    held: HashMap<u64, Vec<MediaBuffer>>,
    /// Complete submissions immediately instead of holding them.
    auto_complete: bool,
    /// Pretend the hardware is wedged: flushes stop returning buffers.
    stuck: bool,
    fail_stage: Option<StageRole>,
    fail_tunnel: Option<TunnelRole>,
    fail_reconfigure: bool,
    fail_submit: bool,
    calls: Vec<String>,
}

/// Scripted driver fake: records every call, optionally fails on cue, and
/// returns submitted buffers either immediately or on demand.
pub struct FakeDriver {
    inner: Mutex<FakeInner>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FakeInner { auto_complete: true, ..FakeInner::default() }),
        })
    }

    /// Toggle immediate completion of submitted buffers.
    pub fn set_auto_complete(&self, on: bool) {
        self.inner.lock().unwrap().auto_complete = on;
    }

    /// Make flushes stop returning held buffers (wedged hardware).
    pub fn set_stuck(&self, on: bool) {
        self.inner.lock().unwrap().stuck = on;
    }

    /// Script the next creation of this stage role to fail.
    pub fn fail_stage(&self, role: StageRole) {
        self.inner.lock().unwrap().fail_stage = Some(role);
    }

    /// Script the next creation of this tunnel role to fail.
    pub fn fail_tunnel(&self, role: TunnelRole) {
        self.inner.lock().unwrap().fail_tunnel = Some(role);
    }

    /// Script tunnel renegotiation to fail.
    pub fn fail_reconfigure(&self, on: bool) {
        self.inner.lock().unwrap().fail_reconfigure = on;
    }

    /// Script buffer submission to be rejected.
    pub fn fail_submit(&self, on: bool) {
        self.inner.lock().unwrap().fail_submit = on;
    }

    /// Buffers currently held by any stage.
    pub fn held_count(&self) -> usize {
        self.inner.lock().unwrap().held.values().map(Vec::len).sum()
    }

    /// Return every held buffer through the event sink.
    pub fn complete_all(&self) {
        let (sink, buffers) = {
            let mut inner = self.inner.lock().unwrap();
            let buffers: Vec<(u64, Vec<MediaBuffer>)> = inner
                .held
                .iter_mut()
                .map(|(stage, held)| (*stage, held.drain(..).collect()))
                .collect();
            (inner.sink.clone(), buffers)
        };
        if let Some(sink) = sink {
            for (stage, held) in buffers {
                for buffer in held {
                    sink.deliver(DriverEvent::BufferReturned {
                        stage: StageHandle::new(stage),
                        buffer,
                    });
                }
            }
        }
    }

    /// Return the oldest held buffer of one stream, if any.
    pub fn complete_one(&self, stream: StreamKind) -> bool {
        let (sink, returned) = {
            let mut inner = self.inner.lock().unwrap();
            let role = input_role(stream);
            let stage = inner
                .stages
                .iter()
                .find(|(_, r)| **r == role)
                .map(|(h, _)| *h);
            let returned = stage.and_then(|h| {
                let held = inner.held.get_mut(&h)?;
                if held.is_empty() { None } else { Some((h, held.remove(0))) }
            });
            (inner.sink.clone(), returned)
        };
        match (sink, returned) {
            (Some(sink), Some((stage, buffer))) => {
                sink.deliver(DriverEvent::BufferReturned { stage: StageHandle::new(stage), buffer })
            }
            _ => false,
        }
    }

    /// Deliver a decoder port-settings-changed event.
    pub fn send_port_settings(&self, format: PortFormat) {
        self.send_from(StageRole::VideoDecoder, |stage| DriverEvent::PortSettingsChanged {
            stage,
            format,
        });
    }

    /// Deliver an end-of-stream event from the video render stage.
    pub fn send_eos(&self) {
        self.send_from(StageRole::VideoRender, |stage| DriverEvent::EndOfStream { stage });
    }

    /// Deliver a stage error event from the video decoder.
    pub fn send_error(&self, status: DriverStatus) {
        self.send_from(StageRole::VideoDecoder, |stage| DriverEvent::StageError {
            stage,
            status,
        });
    }

    fn send_from(&self, role: StageRole, make: impl FnOnce(StageHandle) -> DriverEvent) {
        let (sink, stage) = {
            let inner = self.inner.lock().unwrap();
            let stage = inner
                .stages
                .iter()
                .find(|(_, r)| **r == role)
                .map(|(h, _)| StageHandle::new(*h));
            (inner.sink.clone(), stage)
        };
        if let (Some(sink), Some(stage)) = (sink, stage) {
            sink.deliver(make(stage));
        }
    }

    /// Number of live (created, not destroyed) stages.
    pub fn live_stages(&self) -> usize {
        self.inner.lock().unwrap().stages.len()
    }

    /// Number of live tunnels.
    pub fn live_tunnels(&self) -> usize {
        self.inner.lock().unwrap().tunnels.len()
    }

    /// Recorded calls, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Count recorded calls starting with a prefix.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

fn input_role(stream: StreamKind) -> StageRole {
    match stream {
        StreamKind::Audio => StageRole::AudioRender,
        StreamKind::Video => StageRole::VideoDecoder,
    }
}

impl PipelineDriver for FakeDriver {
    fn create_stage(&self, role: StageRole) -> Result<StageHandle> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("create-stage {}", role));
        if inner.fail_stage == Some(role) {
            return Err(Error::Driver {
                context: "stage creation",
                status: DriverStatus::INSUFFICIENT_RESOURCES,
            });
        }
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.stages.insert(handle, role);
        inner.held.insert(handle, Vec::new());
        Ok(StageHandle::new(handle))
    }

    fn destroy_stage(&self, stage: StageHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let role = inner.stages.remove(&stage.raw());
        inner.held.remove(&stage.raw());
        inner.calls.push(match role {
            Some(role) => format!("destroy-stage {}", role),
            None => format!("destroy-stage unknown#{}", stage.raw()),
        });
        Ok(())
    }

    fn create_tunnel(
        &self,
        role: TunnelRole,
        upstream: StageHandle,
        downstream: StageHandle,
    ) -> Result<TunnelHandle> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("create-tunnel {}", role));
        assert!(inner.stages.contains_key(&upstream.raw()), "tunnel from missing stage");
        assert!(inner.stages.contains_key(&downstream.raw()), "tunnel to missing stage");
        if inner.fail_tunnel == Some(role) {
            return Err(Error::Driver {
                context: "tunnel creation",
                status: DriverStatus::PORT_UNPOPULATED,
            });
        }
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.tunnels.insert(handle, role);
        Ok(TunnelHandle::new(handle))
    }

    fn destroy_tunnel(&self, tunnel: TunnelHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let role = inner.tunnels.remove(&tunnel.raw());
        inner.calls.push(match role {
            Some(role) => format!("destroy-tunnel {}", role),
            None => format!("destroy-tunnel unknown#{}", tunnel.raw()),
        });
        Ok(())
    }

    fn reconfigure_tunnel(&self, tunnel: TunnelHandle, format: &PortFormat) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("reconfigure-tunnel {}", format));
        assert!(inner.tunnels.contains_key(&tunnel.raw()));
        if inner.fail_reconfigure {
            return Err(Error::Driver {
                context: "tunnel renegotiation",
                status: DriverStatus::BAD_PARAMETER,
            });
        }
        Ok(())
    }

    fn set_stage_enabled(&self, stage: StageHandle, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let role = inner.stages.get(&stage.raw()).copied();
        inner.enabled.insert(stage.raw(), enabled);
        if let Some(role) = role {
            inner
                .calls
                .push(format!("{} {}", if enabled { "enable" } else { "disable" }, role));
        }
        Ok(())
    }

    fn allocate_buffers(
        &self,
        stage: StageHandle,
        stream: StreamKind,
        count: usize,
        capacity: usize,
    ) -> Result<Vec<MediaBuffer>> {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.stages.contains_key(&stage.raw()));
        inner.calls.push(format!("allocate {} {}", count, stream));
        let buffers = (0..count)
            .map(|_| {
                inner.next_buffer += 1;
                MediaBuffer::new(BufferId::new(inner.next_buffer), stream, capacity)
            })
            .collect();
        Ok(buffers)
    }

    fn release_buffers(&self, _stage: StageHandle, buffers: Vec<MediaBuffer>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("release {}", buffers.len()));
        Ok(())
    }

    fn submit_buffer(
        &self,
        stage: StageHandle,
        buffer: MediaBuffer,
    ) -> std::result::Result<(), SubmitError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.stages.contains_key(&stage.raw()) {
            return Err(SubmitError { buffer, status: DriverStatus::INVALID_STATE });
        }
        if inner.fail_submit {
            return Err(SubmitError { buffer, status: DriverStatus::OVERFLOW });
        }
        inner
            .calls
            .push(format!("submit {} {}", buffer.stream(), buffer.driver_ticks()));
        if inner.auto_complete {
            let sink = inner.sink.clone();
            drop(inner);
            if let Some(sink) = sink {
                sink.deliver(DriverEvent::BufferReturned { stage, buffer });
            }
            return Ok(());
        }
        inner.held.entry(stage.raw()).or_default().push(buffer);
        Ok(())
    }

    fn flush_stage(&self, stage: StageHandle) -> Result<()> {
        let (sink, flushed) = {
            let mut inner = self.inner.lock().unwrap();
            let role = inner.stages.get(&stage.raw()).copied();
            inner.calls.push(match role {
                Some(role) => format!("flush {}", role),
                None => format!("flush unknown#{}", stage.raw()),
            });
            if inner.stuck {
                return Ok(());
            }
            let flushed: Vec<MediaBuffer> = inner
                .held
                .get_mut(&stage.raw())
                .map(|held| held.drain(..).collect())
                .unwrap_or_default();
            (inner.sink.clone(), flushed)
        };
        if let Some(sink) = sink {
            for buffer in flushed {
                sink.deliver(DriverEvent::BufferReturned { stage, buffer });
            }
        }
        Ok(())
    }

    fn configure(&self, stage: StageHandle, config: StageConfig) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let role = inner.stages.get(&stage.raw()).copied();
        inner.calls.push(match role {
            Some(role) => format!("configure {} {:?}", role, config),
            None => format!("configure unknown#{} {:?}", stage.raw(), config),
        });
        Ok(())
    }

    fn set_event_sink(&self, sink: EventSink) {
        self.inner.lock().unwrap().sink = Some(sink);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Fast-teardown, fast-stall config for tests.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        audio_buffers: 4,
        video_buffers: 4,
        audio_buffer_capacity: 1024,
        video_buffer_capacity: 4096,
        deinit_timeout: Duration::from_millis(250),
        stall: lockstep::stall::StallConfig {
            threshold: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        },
        ..PipelineConfig::default()
    }
}

/// Route pipeline logs through the test harness (once per process).
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Bring up a pipeline on a fresh fake driver.
pub fn test_pipeline() -> (Arc<FakeDriver>, Arc<PipelineManager>) {
    test_pipeline_with(test_config())
}

/// Bring up a pipeline on a fresh fake driver with an explicit config.
pub fn test_pipeline_with(config: PipelineConfig) -> (Arc<FakeDriver>, Arc<PipelineManager>) {
    init_test_logging();
    let driver = FakeDriver::new();
    let pipeline = PipelineManager::init(
        driver.clone(),
        Arc::new(StaticDisplay::default()),
        config,
    )
    .expect("pipeline init");
    (driver, pipeline)
}

/// Poll until `predicate` holds or `timeout` expires.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}
