use chrono::{DateTime, Utc};

/// Default status for competitions that expose no dates at all.
/// Rolling competitions publish without dates, so they count as open.
pub const UNDATED_DEFAULT: Status = Status::Open;

/// Lifecycle state of a competition relative to a reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Forthcoming,
    Open,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Forthcoming => "forthcoming",
            Status::Open => "open",
            Status::Closed => "closed",
        }
    }
}

/// Closed wins over forthcoming; a missing bound never disqualifies.
pub fn infer_status(
    opens_at: Option<DateTime<Utc>>,
    closes_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Status {
    infer_status_with_default(opens_at, closes_at, now, UNDATED_DEFAULT)
}

pub fn infer_status_with_default(
    opens_at: Option<DateTime<Utc>>,
    closes_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    undated: Status,
) -> Status {
    if let Some(closes) = closes_at {
        if closes < now {
            return Status::Closed;
        }
    }
    if let Some(opens) = opens_at {
        if opens > now {
            return Status::Forthcoming;
        }
    }
    if opens_at.is_none() && closes_at.is_none() {
        return undated;
    }
    Status::Open
}

pub fn is_active(status: Status) -> bool {
    status == Status::Open
}

// ── Tests ──
