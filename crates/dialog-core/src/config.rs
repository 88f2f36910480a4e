//! Stack configuration.

use std::net::SocketAddr;

use sipline_transaction_core::TimerSettings;

/// Settings for one stack instance.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Product token stamped into `User-Agent` on locally built requests.
    pub user_agent: String,
    /// When set, every outbound request goes to the proxy instead of the
    /// resolved destination.
    pub outbound_proxy: Option<SocketAddr>,
    /// Automatically ACK 2xx INVITE responses on the dialog's behalf.
    pub auto_ack: bool,
    /// Transaction timer bases; tests shrink these.
    pub timers: TimerSettings,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            user_agent: concat!("sipline/", env!("CARGO_PKG_VERSION")).to_string(),
            outbound_proxy: None,
            auto_ack: true,
            timers: TimerSettings::default(),
        }
    }
}

impl StackConfig {
    pub fn with_user_agent(mut self, product: impl Into<String>) -> Self {
        self.user_agent = product.into();
        self
    }

    pub fn with_outbound_proxy(mut self, proxy: SocketAddr) -> Self {
        self.outbound_proxy = Some(proxy);
        self
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }
}
