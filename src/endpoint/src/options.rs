use restate_sdk_core::DriverOptions;
use restate_sdk_service_protocol::discovery::ProtocolMode;
use serde_with::serde_as;
use std::time::Duration;

/// # Endpoint options
#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    /// # Protocol mode
    ///
    /// Protocol mode advertised in the discovery manifest. Request/response
    /// deployments buffer a whole invocation attempt per request; bidi
    /// deployments stream over HTTP/2.
    protocol_mode: ProtocolMode,

    /// # Suspension timeout
    ///
    /// Inactivity period after which a blocked bidi invocation releases its
    /// execution slot by suspending.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    suspension_timeout: humantime::Duration,

    /// # Abort timeout
    ///
    /// Hard cap on the lifetime of an invocation that stopped making
    /// progress. When this timer fires the invocation is failed,
    /// potentially **interrupting** user code.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    abort_timeout: humantime::Duration,

    /// # Message size warning
    ///
    /// Threshold to log a warning in case protocol messages coming from the
    /// runtime are larger than the specified amount.
    message_size_warning: usize,

    /// # Message size limit
    ///
    /// Threshold to fail the invocation in case protocol messages coming
    /// from the runtime are larger than the specified amount.
    message_size_limit: Option<usize>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            protocol_mode: ProtocolMode::BidiStream,
            suspension_timeout: Duration::from_secs(60).into(),
            abort_timeout: (Duration::from_secs(60) * 60).into(),
            message_size_warning: 1024 * 1024 * 10,
            message_size_limit: None,
        }
    }
}

impl EndpointOptions {
    pub fn protocol_mode(&self) -> ProtocolMode {
        self.protocol_mode
    }

    pub fn with_protocol_mode(mut self, protocol_mode: ProtocolMode) -> Self {
        self.protocol_mode = protocol_mode;
        self
    }

    pub fn with_suspension_timeout(mut self, suspension_timeout: Duration) -> Self {
        self.suspension_timeout = suspension_timeout.into();
        self
    }

    pub fn with_abort_timeout(mut self, abort_timeout: Duration) -> Self {
        self.abort_timeout = abort_timeout.into();
        self
    }

    pub(crate) fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            protocol_mode: self.protocol_mode,
            suspension_timeout: *self.suspension_timeout,
            abort_timeout: *self.abort_timeout,
            message_size_warning: self.message_size_warning,
            message_size_limit: self.message_size_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_parse_with_humantime_durations() {
        let options: EndpointOptions = serde_json::from_str(
            r#"{"protocol_mode": "REQUEST_RESPONSE", "suspension_timeout": "10s"}"#,
        )
        .unwrap();
        assert_eq!(options.protocol_mode(), ProtocolMode::RequestResponse);
        assert_eq!(*options.suspension_timeout, Duration::from_secs(10));
    }

    #[test]
    fn defaults_apply_for_missing_fields() {
        let options: EndpointOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.protocol_mode(), ProtocolMode::BidiStream);
        assert_eq!(options.message_size_warning, 1024 * 1024 * 10);
    }
}
