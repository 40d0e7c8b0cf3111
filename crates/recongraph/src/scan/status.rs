//! Scan job state machine.

use serde::{Deserialize, Serialize};

/// Status of a scan job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Stopped,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Paused => "paused",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Stopped => "stopped",
        }
    }

    /// Parses a persisted status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "running" => Some(ScanStatus::Running),
            "paused" => Some(ScanStatus::Paused),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            "cancelled" => Some(ScanStatus::Cancelled),
            "stopped" => Some(ScanStatus::Stopped),
            _ => None,
        }
    }

    /// Completed, failed, cancelled and stopped admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled | ScanStatus::Stopped
        )
    }

    /// True when the execution path must stop at its next checkpoint.
    pub fn is_user_terminated(&self) -> bool {
        matches!(self, ScanStatus::Cancelled | ScanStatus::Stopped)
    }

    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        match self {
            Pending => matches!(next, Running | Failed | Cancelled | Stopped),
            Running => matches!(next, Paused | Completed | Failed | Cancelled | Stopped),
            Paused => matches!(next, Running | Failed | Cancelled | Stopped),
            Completed | Failed | Cancelled | Stopped => false,
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A user-issued control request against a scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
    Stop,
}

impl ControlAction {
    /// The status the scan ends up in once the action is applied.
    pub fn target_status(&self) -> ScanStatus {
        match self {
            ControlAction::Pause => ScanStatus::Paused,
            ControlAction::Resume => ScanStatus::Running,
            ControlAction::Cancel => ScanStatus::Cancelled,
            ControlAction::Stop => ScanStatus::Stopped,
        }
    }

    /// Statuses from which the action is legal.
    pub fn allowed_from(&self) -> &'static [ScanStatus] {
        match self {
            ControlAction::Pause => &[ScanStatus::Running],
            ControlAction::Resume => &[ScanStatus::Paused],
            ControlAction::Cancel | ControlAction::Stop => &[ScanStatus::Running, ScanStatus::Paused],
        }
    }

    pub fn is_allowed_from(&self, status: ScanStatus) -> bool {
        self.allowed_from().contains(&status)
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlAction::Pause => write!(f, "pause"),
            ControlAction::Resume => write!(f, "resume"),
            ControlAction::Cancel => write!(f, "cancel"),
            ControlAction::Stop => write!(f, "stop"),
        }
    }
}
