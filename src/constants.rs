//! Constants affecting hub function and wire handling.

use std::time::Duration;

/// Sample rate of USRP voice audio.
pub const SAMPLE_RATE_RAW: usize = 8_000;

/// Number of audio frames/packets carried per second on the USRP side.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Number of signed 16-bit samples in one complete USRP voice frame.
pub const VOICE_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Number of bytes in one complete frame of raw `i16`-encoded voice audio.
pub const VOICE_FRAME_BYTE_SIZE: usize = VOICE_FRAME_SIZE * std::mem::size_of::<i16>();

/// Length (in milliseconds) of any USRP voice frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Size of the fixed USRP packet header.
pub const HEADER_LEN: usize = 32;

/// Total on-wire size of a USRP voice packet.
pub const VOICE_PACKET_LEN: usize = HEADER_LEN + VOICE_FRAME_BYTE_SIZE;

/// Total on-wire size of a USRP µ-law voice packet.
pub const ULAW_PACKET_LEN: usize = HEADER_LEN + VOICE_FRAME_SIZE;

/// Maximum datagram size accepted by any ingress socket.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const INGRESS_PACKET_MAX: usize = 1460;

/// Sample rate of audio exchanged with the external Discord client.
pub const DISCORD_SAMPLE_RATE: usize = 48_000;

/// Read deadline on every ingress socket; cancellation is observed
/// at most this long after it is signalled.
pub const INGRESS_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-read deadline on an accepted TCP connection.
pub const TCP_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an ingress worker may wait on a full hub channel before the
/// frame is dropped as backpressure.
pub const HUB_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on any single transcode call made on behalf of a destination.
pub const TRANSCODE_TIMEOUT: Duration = Duration::from_millis(100);

/// Interval of the housekeeping tick which sweeps expired transmissions.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of each destination's egress queue.
///
/// The dispatcher hands frames over without blocking; a destination which
/// cannot drain this many frames is skipped until it catches up.
pub const EGRESS_QUEUE_LEN: usize = 64;

/// Default capacity of the hub channel.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Default number of distinct sources which may key up at once.
pub const DEFAULT_MAX_CONCURRENT_TX: usize = 3;

/// Default lifetime of a keyed transmission with no traffic.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(30);

/// Default RMS level above which PCM ingress is treated as an active
/// transmission.
pub const DEFAULT_PTT_RMS_THRESHOLD: u32 = 1000;

/// Conventional port for USRP listeners.
pub const DEFAULT_USRP_PORT: u16 = 32001;

/// Conventional port of an AllStarLink node's USRP remote.
pub const DEFAULT_ALLSTARLINK_PORT: u16 = 34000;

/// Conventional port of the status surface.
pub const DEFAULT_STATUS_PORT: u16 = 9090;
