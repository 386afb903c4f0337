//! Configuration for the hub and its service endpoints.
//!
//! These structures are produced by an external loader (CLI flags or a
//! config file) and handed to [`Hub::new`] already deserialised; the hub
//! validates them once at startup and treats them as read-only afterwards.
//!
//! [`Hub::new`]: crate::Hub::new

use crate::{
    constants::{
        DEFAULT_BUFFER_SIZE,
        DEFAULT_MAX_CONCURRENT_TX,
        DEFAULT_PTT_RMS_THRESHOLD,
        DEFAULT_TX_TIMEOUT,
        DISCORD_SAMPLE_RATE,
        SAMPLE_RATE_RAW,
    },
    frame::AudioFormat,
};
use serde::Deserialize;
use std::{collections::HashMap, error::Error, fmt, time::Duration};

/// The service flavours an endpoint can speak.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ServiceType {
    /// AllStarLink-compatible USRP endpoint.
    Usrp,
    /// WhoTalkie-style Opus endpoint.
    WhoTalkie,
    /// Discord voice, bridged by an external gateway client.
    Discord,
    /// Raw UDP/TCP byte service.
    Generic,
}

impl ServiceType {
    /// Stable lower-case name, used for synthesised ids and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Usrp => "usrp",
            ServiceType::WhoTalkie => "whotalkie",
            ServiceType::Discord => "discord",
            ServiceType::Generic => "generic",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol of an endpoint's sockets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Datagram transport; the default.
    #[default]
    Udp,
    /// Stream transport; each read is handled as one payload.
    Tcp,
}

/// Global routing stance applied before per-service filters.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    /// Every enabled pair of distinct endpoints may exchange frames.
    #[default]
    AllToAll,
    /// Reserved: frames terminate at the hub.
    HubOnly,
    /// No routing at all.
    None,
}

/// Hub-level configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    /// Capacity of the hub channel.
    ///
    /// Defaults to 1000. Producers which find the channel full drop the
    /// frame after a 100 ms grace rather than blocking the network.
    pub buffer_size: usize,
    /// Number of distinct sources which may hold an active transmission
    /// at once. Defaults to 3.
    pub max_concurrent_tx: usize,
    /// Seconds of silence after which a keyed transmission expires.
    /// Defaults to 30.
    pub tx_timeout_seconds: u64,
    /// Whether destination-bound transcoding is performed at all.
    ///
    /// When `false`, frames whose format does not match a destination's
    /// profile are silently not delivered there. Defaults to `true`.
    pub enable_conversion: bool,
    /// Compressed format produced by the built-in transcode engine.
    ///
    /// One of [`AudioFormat::Opus`] or [`AudioFormat::Ogg`]; defaults to
    /// Opus.
    pub default_format: AudioFormat,
    /// Informational: self-routing is suppressed unconditionally, this
    /// flag only records the operator's intent.
    pub prevent_loops: bool,
    /// Whether a higher-priority source may key up past the concurrency
    /// cap. Defaults to `true`.
    pub enable_priority_rules: bool,
    /// Global routing stance. Defaults to [`RoutingMode::AllToAll`].
    pub default_routing: RoutingMode,
    /// The configured service endpoints.
    pub services: Vec<ServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_concurrent_tx: DEFAULT_MAX_CONCURRENT_TX,
            tx_timeout_seconds: DEFAULT_TX_TIMEOUT.as_secs(),
            enable_conversion: true,
            default_format: AudioFormat::Opus,
            prevent_loops: true,
            enable_priority_rules: true,
            default_routing: RoutingMode::AllToAll,
            services: vec![],
        }
    }
}

impl Config {
    /// Sets this `Config`'s hub channel capacity.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets this `Config`'s concurrent transmission cap.
    #[must_use]
    pub fn max_concurrent_tx(mut self, max_concurrent_tx: usize) -> Self {
        self.max_concurrent_tx = max_concurrent_tx;
        self
    }

    /// Sets this `Config`'s transmission expiry in seconds.
    #[must_use]
    pub fn tx_timeout_seconds(mut self, tx_timeout_seconds: u64) -> Self {
        self.tx_timeout_seconds = tx_timeout_seconds;
        self
    }

    /// Enables or disables destination-bound transcoding.
    #[must_use]
    pub fn enable_conversion(mut self, enable_conversion: bool) -> Self {
        self.enable_conversion = enable_conversion;
        self
    }

    /// Sets the compressed format of the built-in transcode engine.
    #[must_use]
    pub fn default_format(mut self, default_format: AudioFormat) -> Self {
        self.default_format = default_format;
        self
    }

    /// Enables or disables priority preemption.
    #[must_use]
    pub fn enable_priority_rules(mut self, enable_priority_rules: bool) -> Self {
        self.enable_priority_rules = enable_priority_rules;
        self
    }

    /// Sets the global routing stance.
    #[must_use]
    pub fn default_routing(mut self, default_routing: RoutingMode) -> Self {
        self.default_routing = default_routing;
        self
    }

    /// Adds a service endpoint.
    #[must_use]
    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.services.push(service);
        self
    }

    /// The transmission expiry as a [`Duration`].
    #[must_use]
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_seconds)
    }

    /// Normalises service defaults and checks every startup invariant.
    ///
    /// Failures here are fatal: the hub refuses to start on an invalid
    /// configuration.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.max_concurrent_tx == 0 {
            return Err(ConfigError::ZeroConcurrencyCap);
        }
        if self.default_format == AudioFormat::Pcm {
            return Err(ConfigError::UncompressedDefaultFormat);
        }

        let mut seen = std::collections::HashSet::new();
        for (index, service) in self.services.iter_mut().enumerate() {
            service.normalise(index);
            service.validate()?;
            if !seen.insert(service.id.clone()) {
                return Err(ConfigError::DuplicateServiceId(service.id.clone()));
            }
        }

        Ok(())
    }
}

/// Configuration of one service endpoint.
///
/// Immutable once validated; workers hold it behind an `Arc` and never
/// write to it.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ServiceConfig {
    /// Unique endpoint id. Synthesised as `<type>_<index>` when empty.
    pub id: String,
    /// The service flavour of this endpoint.
    #[serde(rename = "type")]
    pub kind: ServiceType,
    /// Disabled endpoints are skipped entirely at startup.
    pub enabled: bool,
    /// Socket transport.
    pub protocol: Protocol,
    /// Local address to listen on; ingress is disabled when no listen
    /// port is configured.
    pub listen_addr: Option<String>,
    /// Local port to listen on.
    pub listen_port: Option<u16>,
    /// Remote peer address; egress is disabled when no remote is
    /// configured.
    pub remote_addr: Option<String>,
    /// Remote peer port.
    pub remote_port: Option<u16>,
    /// Audio format of this endpoint's traffic; defaulted by kind.
    pub format: Option<AudioFormat>,
    /// Sample rate of this endpoint's traffic; defaulted by kind.
    pub sample_rate: Option<u32>,
    /// Channel count of this endpoint's traffic; defaulted by kind.
    pub channels: Option<u8>,
    /// Encoder bitrate hint for compressed egress.
    pub bitrate: Option<u32>,
    /// Whether frames from this endpoint enter the hub.
    pub can_send: bool,
    /// Whether this endpoint may be a routing destination.
    pub can_receive: bool,
    /// When non-empty, only destinations of these types receive this
    /// endpoint's frames.
    pub send_to_types: Vec<ServiceType>,
    /// When non-empty, only sources of these types are delivered here.
    pub receive_from: Vec<ServiceType>,
    /// Destination ids never sent to from this endpoint.
    pub exclude_services: Vec<String>,
    /// Transmission priority, 0–10.
    pub priority: u8,
    /// Opaque type-specific settings, parsed by the endpoint
    /// constructor (e.g. Discord guild/channel ids, RMS threshold).
    pub settings: HashMap<String, serde_json::Value>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: ServiceType::Generic,
            enabled: true,
            protocol: Protocol::Udp,
            listen_addr: None,
            listen_port: None,
            remote_addr: None,
            remote_port: None,
            format: None,
            sample_rate: None,
            channels: None,
            bitrate: None,
            can_send: true,
            can_receive: true,
            send_to_types: vec![],
            receive_from: vec![],
            exclude_services: vec![],
            priority: 0,
            settings: HashMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Creates a named endpoint of the given kind with kind defaults.
    #[must_use]
    pub fn new(kind: ServiceType, id: impl Into<String>) -> Self {
        let mut out = Self {
            id: id.into(),
            kind,
            ..Default::default()
        };
        out.normalise(0);
        out
    }

    /// Sets the listen binding.
    #[must_use]
    pub fn listen(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.listen_addr = Some(addr.into());
        self.listen_port = Some(port);
        self
    }

    /// Sets the remote peer.
    #[must_use]
    pub fn remote(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.remote_addr = Some(addr.into());
        self.remote_port = Some(port);
        self
    }

    /// Sets the transport protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the transmission priority.
    #[must_use]
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Restricts which destination types receive this endpoint's frames.
    #[must_use]
    pub fn send_to_types(mut self, types: impl IntoIterator<Item = ServiceType>) -> Self {
        self.send_to_types = types.into_iter().collect();
        self
    }

    /// Restricts which source types are delivered to this endpoint.
    #[must_use]
    pub fn receive_from(mut self, types: impl IntoIterator<Item = ServiceType>) -> Self {
        self.receive_from = types.into_iter().collect();
        self
    }

    /// Excludes destination ids from this endpoint's frames.
    #[must_use]
    pub fn exclude_services(
        mut self,
        ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.exclude_services = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Fills the audio profile and id from kind defaults.
    pub(crate) fn normalise(&mut self, index: usize) {
        if self.id.is_empty() {
            self.id = format!("{}_{}", self.kind.as_str(), index);
        }

        let (format, rate, channels) = match self.kind {
            ServiceType::Usrp | ServiceType::Generic =>
                (AudioFormat::Pcm, SAMPLE_RATE_RAW as u32, 1),
            ServiceType::WhoTalkie => (AudioFormat::Opus, DISCORD_SAMPLE_RATE as u32, 1),
            ServiceType::Discord => (AudioFormat::Pcm, DISCORD_SAMPLE_RATE as u32, 2),
        };

        self.format.get_or_insert(format);
        self.sample_rate.get_or_insert(rate);
        self.channels.get_or_insert(channels);
    }

    /// Checks this endpoint's startup invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.priority > 10 {
            return Err(ConfigError::PriorityOutOfRange {
                id: self.id.clone(),
                priority: self.priority,
            });
        }

        if self.listen_addr.is_some() && self.listen_port.is_none() {
            return Err(ConfigError::MissingPort {
                id: self.id.clone(),
                which: "listen",
            });
        }
        if self.remote_addr.is_some() && self.remote_port.is_none() {
            return Err(ConfigError::MissingPort {
                id: self.id.clone(),
                which: "remote",
            });
        }

        match self.channels {
            Some(1 | 2) | None => {},
            Some(c) => {
                return Err(ConfigError::BadChannelCount {
                    id: self.id.clone(),
                    channels: c,
                });
            },
        }

        Ok(())
    }

    /// The endpoint's audio format after normalisation.
    #[must_use]
    pub fn audio_format(&self) -> AudioFormat {
        self.format.unwrap_or(AudioFormat::Pcm)
    }

    /// The endpoint's sample rate after normalisation.
    #[must_use]
    pub fn audio_sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(SAMPLE_RATE_RAW as u32)
    }

    /// The endpoint's channel count after normalisation.
    #[must_use]
    pub fn audio_channels(&self) -> u8 {
        self.channels.unwrap_or(1)
    }

    /// The local socket string, when ingress is configured.
    #[must_use]
    pub fn listen_socket(&self) -> Option<String> {
        let port = self.listen_port?;
        let addr = self.listen_addr.as_deref().unwrap_or("0.0.0.0");
        Some(format!("{}:{}", addr, port))
    }

    /// The remote socket string, when egress is configured.
    #[must_use]
    pub fn remote_socket(&self) -> Option<String> {
        let port = self.remote_port?;
        let addr = self.remote_addr.as_deref()?;
        Some(format!("{}:{}", addr, port))
    }

    /// RMS level above which PCM ingress counts as an active
    /// transmission; per-endpoint, from the `settings` bag.
    #[must_use]
    pub fn ptt_rms_threshold(&self) -> u32 {
        self.settings
            .get("ptt_rms_threshold")
            .and_then(serde_json::Value::as_u64)
            .map_or(DEFAULT_PTT_RMS_THRESHOLD, |v| v as u32)
    }

    /// A string value from the `settings` bag.
    #[must_use]
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(serde_json::Value::as_str)
    }

    /// A boolean value from the `settings` bag.
    #[must_use]
    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(serde_json::Value::as_bool)
    }
}

/// Fatal configuration errors raised at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Two services share an id.
    DuplicateServiceId(String),
    /// A priority fell outside 0–10.
    PriorityOutOfRange {
        /// Offending service id.
        id: String,
        /// The rejected priority.
        priority: u8,
    },
    /// An address was configured without its port.
    MissingPort {
        /// Offending service id.
        id: String,
        /// Which binding lacked a port.
        which: &'static str,
    },
    /// A channel count other than mono or stereo.
    BadChannelCount {
        /// Offending service id.
        id: String,
        /// The rejected channel count.
        channels: u8,
    },
    /// The hub channel cannot hold zero frames.
    ZeroBufferSize,
    /// The concurrency cap cannot be zero.
    ZeroConcurrencyCap,
    /// The transcode target must be a compressed format.
    UncompressedDefaultFormat,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: ")?;
        match self {
            ConfigError::DuplicateServiceId(id) => write!(f, "duplicate service id {:?}.", id),
            ConfigError::PriorityOutOfRange { id, priority } =>
                write!(f, "service {:?} priority {} outside 0-10.", id, priority),
            ConfigError::MissingPort { id, which } =>
                write!(f, "service {:?} has a {} address but no port.", id, which),
            ConfigError::BadChannelCount { id, channels } =>
                write!(f, "service {:?} channel count {} unsupported.", id, channels),
            ConfigError::ZeroBufferSize => write!(f, "buffer_size must be nonzero."),
            ConfigError::ZeroConcurrencyCap => write!(f, "max_concurrent_tx must be nonzero."),
            ConfigError::UncompressedDefaultFormat =>
                write!(f, "default_format must be opus or ogg."),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_defaults_applied() {
        let usrp = ServiceConfig::new(ServiceType::Usrp, "usrp_1");
        assert_eq!(usrp.audio_format(), AudioFormat::Pcm);
        assert_eq!(usrp.audio_sample_rate(), 8000);
        assert_eq!(usrp.audio_channels(), 1);

        let wt = ServiceConfig::new(ServiceType::WhoTalkie, "wt_1");
        assert_eq!(wt.audio_format(), AudioFormat::Opus);
        assert_eq!(wt.audio_sample_rate(), 48_000);
        assert_eq!(wt.audio_channels(), 1);

        let disc = ServiceConfig::new(ServiceType::Discord, "disc_1");
        assert_eq!(disc.audio_format(), AudioFormat::Pcm);
        assert_eq!(disc.audio_channels(), 2);
    }

    #[test]
    fn empty_ids_are_synthesised() {
        let mut config = Config::default()
            .service(ServiceConfig {
                kind: ServiceType::Usrp,
                ..Default::default()
            })
            .service(ServiceConfig {
                kind: ServiceType::Discord,
                ..Default::default()
            });

        config.validate().unwrap();
        assert_eq!(config.services[0].id, "usrp_0");
        assert_eq!(config.services[1].id, "discord_1");
    }

    #[test]
    fn duplicate_ids_fatal() {
        let mut config = Config::default()
            .service(ServiceConfig::new(ServiceType::Usrp, "dup"))
            .service(ServiceConfig::new(ServiceType::Generic, "dup"));

        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateServiceId("dup".into())),
        );
    }

    #[test]
    fn priority_range_enforced() {
        let svc = ServiceConfig::new(ServiceType::Usrp, "hot").priority(11);
        assert!(matches!(
            svc.validate(),
            Err(ConfigError::PriorityOutOfRange { priority: 11, .. }),
        ));
    }

    #[test]
    fn port_required_with_addr() {
        let mut svc = ServiceConfig::new(ServiceType::Generic, "g");
        svc.listen_addr = Some("127.0.0.1".into());
        assert!(matches!(
            svc.validate(),
            Err(ConfigError::MissingPort { which: "listen", .. }),
        ));
    }

    #[test]
    fn pcm_default_format_rejected() {
        let mut config = Config::default().default_format(AudioFormat::Pcm);
        assert_eq!(config.validate(), Err(ConfigError::UncompressedDefaultFormat));
    }

    #[test]
    fn settings_bag_reads() {
        let mut svc = ServiceConfig::new(ServiceType::Discord, "d");
        assert_eq!(svc.ptt_rms_threshold(), DEFAULT_PTT_RMS_THRESHOLD);

        svc.settings
            .insert("ptt_rms_threshold".into(), serde_json::json!(250));
        svc.settings
            .insert("guild_id".into(), serde_json::json!("1234"));

        assert_eq!(svc.ptt_rms_threshold(), 250);
        assert_eq!(svc.setting_str("guild_id"), Some("1234"));
    }

    #[test]
    fn deserialises_loader_shape() {
        let raw = r#"{
            "buffer_size": 64,
            "default_routing": "all-to-all",
            "services": [
                {
                    "type": "usrp",
                    "id": "usrp_main",
                    "listen_port": 32001,
                    "remote_addr": "10.0.0.1",
                    "remote_port": 34001
                }
            ]
        }"#;

        let mut config: Config = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.services[0].kind, ServiceType::Usrp);
        assert_eq!(
            config.services[0].remote_socket().as_deref(),
            Some("10.0.0.1:34001"),
        );
    }
}
