//! The fixed component graph: stage and tunnel roles, dependency order,
//! and the arenas that track what the driver has created.
//!
//! The graph never changes shape at runtime. Creation order is encoded in
//! explicit tables ([`STAGE_CREATION_ORDER`], [`TUNNEL_CREATION_ORDER`]);
//! teardown walks the same tables in reverse.

use crate::driver::{StageHandle, TunnelHandle};

// ============================================================================
// Roles
// ============================================================================

/// The role of a pipeline stage.
///
/// Exactly one stage exists per role; identity never changes between
/// `init` and `deinit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageRole {
    /// The system time clock that paces both renderers.
    Clock,
    /// Hardware video decoder (elementary-stream input).
    VideoDecoder,
    /// Deinterlacer / image effects stage.
    VideoEffects,
    /// Frame scheduler, releasing frames against the clock.
    VideoScheduler,
    /// Video output stage.
    VideoRender,
    /// Audio output stage (also clock-paced).
    AudioRender,
}

impl StageRole {
    /// Number of stage roles.
    pub const COUNT: usize = 6;

    /// Dense index for arena storage.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            StageRole::Clock => 0,
            StageRole::VideoDecoder => 1,
            StageRole::VideoEffects => 2,
            StageRole::VideoScheduler => 3,
            StageRole::VideoRender => 4,
            StageRole::AudioRender => 5,
        }
    }

    /// Human-readable role name.
    pub const fn as_str(self) -> &'static str {
        match self {
            StageRole::Clock => "clock",
            StageRole::VideoDecoder => "video-decoder",
            StageRole::VideoEffects => "video-effects",
            StageRole::VideoScheduler => "video-scheduler",
            StageRole::VideoRender => "video-render",
            StageRole::AudioRender => "audio-render",
        }
    }
}

impl std::fmt::Display for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage creation order. The clock comes first so tunnels from it can be
/// built as soon as both endpoints exist; destruction is the reverse.
pub const STAGE_CREATION_ORDER: [StageRole; StageRole::COUNT] = [
    StageRole::Clock,
    StageRole::VideoDecoder,
    StageRole::VideoEffects,
    StageRole::VideoScheduler,
    StageRole::VideoRender,
    StageRole::AudioRender,
];

/// The role of a tunnel between two stage ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TunnelRole {
    /// Decoded frames into the effects stage.
    DecoderToEffects,
    /// Effects output into the scheduler.
    EffectsToScheduler,
    /// Scheduled frames into the video output.
    SchedulerToRender,
    /// Clock reference into the scheduler.
    ClockToScheduler,
    /// Clock reference into the audio output.
    ClockToAudioRender,
}

impl TunnelRole {
    /// Number of tunnel roles.
    pub const COUNT: usize = 5;

    /// Dense index for arena storage.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            TunnelRole::DecoderToEffects => 0,
            TunnelRole::EffectsToScheduler => 1,
            TunnelRole::SchedulerToRender => 2,
            TunnelRole::ClockToScheduler => 3,
            TunnelRole::ClockToAudioRender => 4,
        }
    }

    /// The (upstream, downstream) stages this tunnel connects.
    ///
    /// Both endpoints must exist before the tunnel is created, and the
    /// tunnel is torn down before either endpoint is destroyed.
    pub const fn endpoints(self) -> (StageRole, StageRole) {
        match self {
            TunnelRole::DecoderToEffects => (StageRole::VideoDecoder, StageRole::VideoEffects),
            TunnelRole::EffectsToScheduler => (StageRole::VideoEffects, StageRole::VideoScheduler),
            TunnelRole::SchedulerToRender => (StageRole::VideoScheduler, StageRole::VideoRender),
            TunnelRole::ClockToScheduler => (StageRole::Clock, StageRole::VideoScheduler),
            TunnelRole::ClockToAudioRender => (StageRole::Clock, StageRole::AudioRender),
        }
    }

    /// Human-readable role name.
    pub const fn as_str(self) -> &'static str {
        match self {
            TunnelRole::DecoderToEffects => "decoder->effects",
            TunnelRole::EffectsToScheduler => "effects->scheduler",
            TunnelRole::SchedulerToRender => "scheduler->render",
            TunnelRole::ClockToScheduler => "clock->scheduler",
            TunnelRole::ClockToAudioRender => "clock->audio-render",
        }
    }
}

impl std::fmt::Display for TunnelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunnel creation order; teardown is the reverse.
pub const TUNNEL_CREATION_ORDER: [TunnelRole; TunnelRole::COUNT] = [
    TunnelRole::DecoderToEffects,
    TunnelRole::EffectsToScheduler,
    TunnelRole::SchedulerToRender,
    TunnelRole::ClockToScheduler,
    TunnelRole::ClockToAudioRender,
];

// ============================================================================
// Arenas
// ============================================================================

/// A created pipeline stage.
#[derive(Clone, Copy, Debug)]
pub struct StageRecord {
    /// The stage's role in the graph.
    pub role: StageRole,
    /// Driver-assigned handle.
    pub handle: StageHandle,
    /// Whether the stage is currently enabled.
    pub enabled: bool,
}

/// Arena of stage records indexed by role.
#[derive(Debug, Default)]
pub struct StageArena {
    slots: [Option<StageRecord>; StageRole::COUNT],
}

impl StageArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created stage.
    pub fn insert(&mut self, record: StageRecord) {
        self.slots[record.role.index()] = Some(record);
    }

    /// Get the record for a role, if created.
    pub fn get(&self, role: StageRole) -> Option<&StageRecord> {
        self.slots[role.index()].as_ref()
    }

    /// Get a mutable record for a role, if created.
    pub fn get_mut(&mut self, role: StageRole) -> Option<&mut StageRecord> {
        self.slots[role.index()].as_mut()
    }

    /// Get the driver handle for a role, if created.
    pub fn handle(&self, role: StageRole) -> Option<StageHandle> {
        self.get(role).map(|r| r.handle)
    }

    /// Find the role owning a driver handle.
    pub fn role_of(&self, handle: StageHandle) -> Option<StageRole> {
        self.slots
            .iter()
            .flatten()
            .find(|r| r.handle == handle)
            .map(|r| r.role)
    }

    /// Remove and return the record for a role.
    pub fn take(&mut self, role: StageRole) -> Option<StageRecord> {
        self.slots[role.index()].take()
    }

    /// True once every role has a created stage.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

/// A created tunnel.
#[derive(Clone, Copy, Debug)]
pub struct TunnelRecord {
    /// The tunnel's role in the graph.
    pub role: TunnelRole,
    /// Driver-assigned handle.
    pub handle: TunnelHandle,
}

/// Arena of tunnel records indexed by role.
#[derive(Debug, Default)]
pub struct TunnelArena {
    slots: [Option<TunnelRecord>; TunnelRole::COUNT],
}

impl TunnelArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created tunnel.
    pub fn insert(&mut self, record: TunnelRecord) {
        self.slots[record.role.index()] = Some(record);
    }

    /// Get the record for a role, if created.
    pub fn get(&self, role: TunnelRole) -> Option<&TunnelRecord> {
        self.slots[role.index()].as_ref()
    }

    /// Get the driver handle for a role, if created.
    pub fn handle(&self, role: TunnelRole) -> Option<TunnelHandle> {
        self.get(role).map(|r| r.handle)
    }

    /// Remove and return the record for a role.
    pub fn take(&mut self, role: TunnelRole) -> Option<TunnelRecord> {
        self.slots[role.index()].take()
    }

    /// True once every role has a created tunnel.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_order_covers_all_roles() {
        for role in [
            StageRole::Clock,
            StageRole::VideoDecoder,
            StageRole::VideoEffects,
            StageRole::VideoScheduler,
            StageRole::VideoRender,
            StageRole::AudioRender,
        ] {
            assert!(STAGE_CREATION_ORDER.contains(&role));
        }
        for role in [
            TunnelRole::DecoderToEffects,
            TunnelRole::EffectsToScheduler,
            TunnelRole::SchedulerToRender,
            TunnelRole::ClockToScheduler,
            TunnelRole::ClockToAudioRender,
        ] {
            assert!(TUNNEL_CREATION_ORDER.contains(&role));
        }
    }

    #[test]
    fn test_tunnel_endpoints_exist_before_tunnel() {
        // Every tunnel's endpoints must appear in the stage creation order
        // before any tunnel is created (stages are all built first).
        for tunnel in TUNNEL_CREATION_ORDER {
            let (up, down) = tunnel.endpoints();
            assert!(STAGE_CREATION_ORDER.contains(&up));
            assert!(STAGE_CREATION_ORDER.contains(&down));
            assert_ne!(up, down);
        }
    }

    #[test]
    fn test_stage_arena() {
        let mut arena = StageArena::new();
        assert!(!arena.is_complete());
        assert!(arena.get(StageRole::Clock).is_none());

        let handle = StageHandle::new(7);
        arena.insert(StageRecord {
            role: StageRole::Clock,
            handle,
            enabled: false,
        });

        assert_eq!(arena.handle(StageRole::Clock), Some(handle));
        assert_eq!(arena.role_of(handle), Some(StageRole::Clock));

        arena.get_mut(StageRole::Clock).unwrap().enabled = true;
        assert!(arena.get(StageRole::Clock).unwrap().enabled);

        let taken = arena.take(StageRole::Clock).unwrap();
        assert_eq!(taken.role, StageRole::Clock);
        assert!(arena.get(StageRole::Clock).is_none());
    }

    #[test]
    fn test_tunnel_arena() {
        let mut arena = TunnelArena::new();
        let handle = TunnelHandle::new(3);
        arena.insert(TunnelRecord {
            role: TunnelRole::ClockToScheduler,
            handle,
        });

        assert_eq!(arena.handle(TunnelRole::ClockToScheduler), Some(handle));
        assert!(arena.take(TunnelRole::ClockToScheduler).is_some());
        assert!(arena.get(TunnelRole::ClockToScheduler).is_none());
    }
}
