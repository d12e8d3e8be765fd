/// Nominal frame rate of the shared timeline. All positions on the wire are in frames at this rate.
pub const FRAMES_PER_SECOND: f64 = 30.0;

/// Local playback may differ from the extrapolated remote position by this many frames before a
/// corrective seek is issued.
pub const DRIFT_THRESHOLD_FRAMES: f64 = 2.0;

/// Default interval between liveness probes sent to every connection, in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5000;

/// Default port the sync server listens on
pub const DEFAULT_SERVER_PORT: u16 = 20311;

/// Largest position a control packet may carry: 24 hours of frames
pub const MAX_POSITION_FRAMES: f64 = FRAMES_PER_SECOND * 60.0 * 60.0 * 24.0;

/// Latest `requestTime` accepted, in ms since the Unix epoch (year 9999)
pub const MAX_REQUEST_TIME_MS: i64 = 253_402_300_799_999;

/// Largest playback rate a client may request
pub const MAX_PLAYBACK_RATE: f64 = 16.0;
