/// Page job state definitions
///
/// A page job walks from `Pending` to `Done`, or stops at `Failed` from any
/// non-terminal state.
use crate::crawler::FetchErrorKind;
use crate::HarvestError;
use std::fmt;

/// Why a page job stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// robots.txt (or fail-closed policy) forbids the page
    PermissionDenied,
    /// Page fetch failed after retries
    Fetch(FetchErrorKind),
    /// Cancelled before the page was fetched
    Cancelled,
    /// Page record could not be written
    Storage,
    /// Seed URL unusable
    InvalidUrl,
}

impl FailureReason {
    pub fn to_db_string(&self) -> String {
        match self {
            Self::PermissionDenied => "permission_denied".to_string(),
            Self::Fetch(kind) => format!("fetch:{}", kind.as_str()),
            Self::Cancelled => "cancelled".to_string(),
            Self::Storage => "storage".to_string(),
            Self::InvalidUrl => "invalid_url".to_string(),
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "permission_denied" => Some(Self::PermissionDenied),
            "cancelled" => Some(Self::Cancelled),
            "storage" => Some(Self::Storage),
            "invalid_url" => Some(Self::InvalidUrl),
            _ => {
                let kind = match s.strip_prefix("fetch:")? {
                    "timeout" => FetchErrorKind::Timeout,
                    "connection_refused" => FetchErrorKind::ConnectionRefused,
                    "too_many_requests" => FetchErrorKind::TooManyRequests,
                    "server_error" => FetchErrorKind::ServerError,
                    "client_error" => FetchErrorKind::ClientError,
                    "malformed" => FetchErrorKind::Malformed,
                    _ => return None,
                };
                Some(Self::Fetch(kind))
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_db_string())
    }
}

/// Represents the current state of a page job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    PermissionChecked,
    PageFetched,
    ContentExtracted,
    PdfsDiscovered,
    PdfsDownloaded,
    Persisted,

    // ===== Terminal States =====
    Done,
    Failed(FailureReason),
}

impl JobState {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Returns true if the page was fetched (side effects may exist)
    pub fn page_fetched(&self) -> bool {
        !matches!(
            self,
            Self::Pending | Self::PermissionChecked | Self::Failed(_)
        )
    }

    /// Checks whether `next` may follow this state
    ///
    /// Active states advance one step at a time; `Failed` may follow any of them.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (_, Failed(_))
                | (Pending, PermissionChecked)
                | (PermissionChecked, PageFetched)
                | (PageFetched, ContentExtracted)
                | (ContentExtracted, PdfsDiscovered)
                | (PdfsDiscovered, PdfsDownloaded)
                | (PdfsDownloaded, Persisted)
                | (Persisted, Done)
        )
    }

    /// Moves to `next`, rejecting invalid transitions
    pub fn advance(&mut self, next: JobState) -> Result<(), HarvestError> {
        if !self.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    /// Converts the job state to a database string representation
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Pending => "pending".to_string(),
            Self::PermissionChecked => "permission_checked".to_string(),
            Self::PageFetched => "page_fetched".to_string(),
            Self::ContentExtracted => "content_extracted".to_string(),
            Self::PdfsDiscovered => "pdfs_discovered".to_string(),
            Self::PdfsDownloaded => "pdfs_downloaded".to_string(),
            Self::Persisted => "persisted".to_string(),
            Self::Done => "done".to_string(),
            Self::Failed(reason) => format!("failed:{}", reason.to_db_string()),
        }
    }

    /// Parses a job state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "permission_checked" => Some(Self::PermissionChecked),
            "page_fetched" => Some(Self::PageFetched),
            "content_extracted" => Some(Self::ContentExtracted),
            "pdfs_discovered" => Some(Self::PdfsDiscovered),
            "pdfs_downloaded" => Some(Self::PdfsDownloaded),
            "persisted" => Some(Self::Persisted),
            "done" => Some(Self::Done),
            _ => s
                .strip_prefix("failed:")
                .and_then(FailureReason::from_db_string)
                .map(Self::Failed),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_db_string())
    }
}
