//! Phone configuration structures
//!
//! This module provides the configuration for the softphone session core:
//! gateway endpoint, SIP registration identity, widget behavior flags, and
//! the timing thresholds that drive staleness detection and recovery.
//!
//! # Key Components
//!
//! - **PhoneConfig** - Main configuration with endpoint, identity, and timing
//! - **RegistrationRequest** - The registration parameters handed to the
//!   signaling channel, derived from the config
//!
//! # Usage Examples
//!
//! ## Basic Configuration
//!
//! ```rust
//! use wephone_session_core::config::PhoneConfig;
//!
//! let config = PhoneConfig::new("wss://gateway.example.com/ws", "1004", "s3cret")
//!     .with_proxy("pbx.example.com", 5060)
//!     .with_display_name("Alice");
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.extension, "1004");
//! assert_eq!(config.proxy_port, 5060);
//! ```
//!
//! ## Tuning Staleness Thresholds
//!
//! ```rust
//! use wephone_session_core::config::PhoneConfig;
//! use std::time::Duration;
//!
//! let config = PhoneConfig::new("wss://gateway.example.com/ws", "1004", "s3cret")
//!     .with_short_inactivity(Duration::from_secs(120))
//!     .with_long_inactivity(Duration::from_secs(3600));
//!
//! assert_eq!(config.short_inactivity, Duration::from_secs(120));
//! assert_eq!(config.long_inactivity, Duration::from_secs(3600));
//! ```
//!
//! ## Mobile Widget
//!
//! ```rust
//! use wephone_session_core::config::PhoneConfig;
//! use wephone_session_core::types::{AnswerDevice, UserAgentClass};
//!
//! let config = PhoneConfig::new("wss://gateway.example.com/ws", "2001", "pw")
//!     .with_user_agent_class(UserAgentClass::Mobile)
//!     .with_answer_device(AnswerDevice::Physical);
//!
//! assert_eq!(config.user_agent_class, UserAgentClass::Mobile);
//! // A physical desk phone answers; the widget only observes.
//! assert_eq!(config.answer_device, AnswerDevice::Physical);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SessionError, SessionResult};
use crate::types::{AnswerDevice, UserAgentClass};

/// Default short inactivity threshold: hidden spans shorter than this never
/// warrant a reload on their own.
pub const DEFAULT_SHORT_INACTIVITY: Duration = Duration::from_secs(3 * 60);

/// Default long inactivity threshold: past this, even an active call no
/// longer vetoes a rebuild (the call is almost certainly a zombie).
pub const DEFAULT_LONG_INACTIVITY: Duration = Duration::from_secs(30 * 60);

/// Default bound on how long a session build may stay in flight before the
/// re-entrancy guard is forcibly released.
pub const DEFAULT_INIT_SAFETY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default health check period (keepalive while registered, retry while
/// degraded).
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the softphone session core.
///
/// Uses the builder pattern: start from [`PhoneConfig::new`] and chain
/// `with_*` methods. Call [`validate`](PhoneConfig::validate) before handing
/// the config to the manager; construction itself never fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneConfig {
    /// WebRTC gateway endpoint (ws, wss, http, or https URL)
    pub gateway_url: String,
    /// Extension to register (SIP user part)
    pub extension: String,
    /// Shared secret for registration
    pub secret: String,
    /// SIP proxy host the registration targets
    pub proxy_host: String,
    /// SIP proxy port
    pub proxy_port: u16,
    /// Display name sent with calls
    pub display_name: Option<String>,
    /// Registration expiry in seconds
    pub register_expiry: u32,
    /// Desktop or mobile behavior on hangup
    pub user_agent_class: UserAgentClass,
    /// Which endpoint answers calls
    pub answer_device: AnswerDevice,
    /// Hidden spans at or above this warrant a reload evaluation
    pub short_inactivity: Duration,
    /// Inactivity at or above this forces a rebuild and overrides the
    /// active-call veto
    pub long_inactivity: Duration,
    /// Upper bound on a session build before the guard is released
    pub init_safety_timeout: Duration,
    /// Period of the keepalive/retry health check
    pub health_interval: Duration,
}

impl PhoneConfig {
    /// Create a configuration with the required identity fields and default
    /// timing.
    pub fn new(
        gateway_url: impl Into<String>,
        extension: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            extension: extension.into(),
            secret: secret.into(),
            proxy_host: "localhost".to_string(),
            proxy_port: 5060,
            display_name: None,
            register_expiry: 3600,
            user_agent_class: UserAgentClass::default(),
            answer_device: AnswerDevice::default(),
            short_inactivity: DEFAULT_SHORT_INACTIVITY,
            long_inactivity: DEFAULT_LONG_INACTIVITY,
            init_safety_timeout: DEFAULT_INIT_SAFETY_TIMEOUT,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }

    /// Set the SIP proxy the registration targets
    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy_host = host.into();
        self.proxy_port = port;
        self
    }

    /// Set the display name sent with calls
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the registration expiry in seconds
    pub fn with_register_expiry(mut self, expiry_secs: u32) -> Self {
        self.register_expiry = expiry_secs;
        self
    }

    /// Set desktop or mobile hangup behavior
    pub fn with_user_agent_class(mut self, class: UserAgentClass) -> Self {
        self.user_agent_class = class;
        self
    }

    /// Set which endpoint answers calls
    pub fn with_answer_device(mut self, device: AnswerDevice) -> Self {
        self.answer_device = device;
        self
    }

    /// Set the short inactivity threshold
    pub fn with_short_inactivity(mut self, threshold: Duration) -> Self {
        self.short_inactivity = threshold;
        self
    }

    /// Set the long inactivity threshold
    pub fn with_long_inactivity(mut self, threshold: Duration) -> Self {
        self.long_inactivity = threshold;
        self
    }

    /// Set the init safety timeout
    pub fn with_init_safety_timeout(mut self, timeout: Duration) -> Self {
        self.init_safety_timeout = timeout;
        self
    }

    /// Set the health check period
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Validate the configuration.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use wephone_session_core::config::PhoneConfig;
    ///
    /// let bad = PhoneConfig::new("not a url", "1004", "pw");
    /// assert!(bad.validate().is_err());
    ///
    /// let bad = PhoneConfig::new("wss://gw.example.com/ws", "", "pw");
    /// assert!(bad.validate().is_err());
    /// ```
    pub fn validate(&self) -> SessionResult<()> {
        let url = Url::parse(&self.gateway_url)
            .map_err(|e| SessionError::config("gateway_url", e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" | "http" | "https" => {}
            other => {
                return Err(SessionError::config(
                    "gateway_url",
                    format!("unsupported scheme '{}'", other),
                ));
            }
        }

        if self.extension.is_empty() {
            return Err(SessionError::config("extension", "must not be empty"));
        }
        if self.proxy_host.is_empty() {
            return Err(SessionError::config("proxy_host", "must not be empty"));
        }
        if self.proxy_port == 0 {
            return Err(SessionError::config("proxy_port", "must not be zero"));
        }
        if self.short_inactivity >= self.long_inactivity {
            return Err(SessionError::config(
                "short_inactivity",
                "must be below long_inactivity",
            ));
        }
        if self.init_safety_timeout.is_zero() {
            return Err(SessionError::config("init_safety_timeout", "must not be zero"));
        }
        if self.health_interval.is_zero() {
            return Err(SessionError::config("health_interval", "must not be zero"));
        }

        Ok(())
    }

    /// Build the registration request handed to the signaling channel.
    pub fn registration_request(&self) -> RegistrationRequest {
        RegistrationRequest {
            extension: self.extension.clone(),
            secret: self.secret.clone(),
            proxy_host: self.proxy_host.clone(),
            proxy_port: self.proxy_port,
            display_name: self.display_name.clone(),
            expiry_secs: self.register_expiry,
        }
    }

    /// The SIP identity URI this config registers.
    pub fn identity_uri(&self) -> String {
        format!("sip:{}@{}:{}", self.extension, self.proxy_host, self.proxy_port)
    }
}

/// Registration parameters handed to the signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub extension: String,
    pub secret: String,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub display_name: Option<String>,
    pub expiry_secs: u32,
}

impl RegistrationRequest {
    /// The SIP URI being registered.
    pub fn uri(&self) -> String {
        format!("sip:{}@{}:{}", self.extension, self.proxy_host, self.proxy_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PhoneConfig {
        PhoneConfig::new("wss://gateway.example.com/ws", "1004", "s3cret")
            .with_proxy("pbx.example.com", 5060)
    }

    #[test]
    fn test_defaults() {
        let config = base();
        assert_eq!(config.short_inactivity, Duration::from_secs(180));
        assert_eq!(config.long_inactivity, Duration::from_secs(1800));
        assert_eq!(config.init_safety_timeout, Duration::from_secs(30));
        assert_eq!(config.user_agent_class, UserAgentClass::Desktop);
        assert_eq!(config.answer_device, AnswerDevice::Webrtc);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_gateway_url() {
        let config = PhoneConfig::new("ftp://gateway.example.com", "1004", "pw");
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = base()
            .with_short_inactivity(Duration::from_secs(600))
            .with_long_inactivity(Duration::from_secs(300));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registration_request_uri() {
        let req = base().registration_request();
        assert_eq!(req.uri(), "sip:1004@pbx.example.com:5060");
        assert_eq!(req.expiry_secs, 3600);
    }
}
