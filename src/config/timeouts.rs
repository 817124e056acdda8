//! Timeouts applied to both legs of a proxied session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Read, write and connect deadlines.
///
/// Read and write deadlines wrap every inbound read and write, and every
/// exchange with the upstream relay. A deadline that expires ends the
/// connection with a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Default: 60 seconds
    #[serde(default = "defaults::read_secs")]
    pub read_secs: u64,

    /// Default: 60 seconds
    #[serde(default = "defaults::write_secs")]
    pub write_secs: u64,

    /// Timeout for dialling the upstream relay.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read_secs: defaults::read_secs(),
            write_secs: defaults::write_secs(),
            connect_secs: defaults::connect_secs(),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    #[must_use]
    pub const fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

mod defaults {
    pub const fn read_secs() -> u64 {
        60
    }

    pub const fn write_secs() -> u64 {
        60
    }

    pub const fn connect_secs() -> u64 {
        30
    }
}
