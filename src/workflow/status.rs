use std::fmt;

/// Lifecycle status of a workflow service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    /// Registered, never started.
    Initialized,
    Starting,
    Started,
    Suspending,
    Suspended,
    Stopping,
    Stopped,
    /// Removed from the registry; terminal.
    Shutdown,
}

impl ServiceStatus {
    /// `true` for statuses in which the workflow holds no running consumer.
    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceStatus::Initialized | ServiceStatus::Stopped)
    }

    pub fn is_started(&self) -> bool {
        matches!(self, ServiceStatus::Started)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, ServiceStatus::Suspended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Initialized => "initialized",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Started => "started",
            ServiceStatus::Suspending => "suspending",
            ServiceStatus::Suspended => "suspended",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
