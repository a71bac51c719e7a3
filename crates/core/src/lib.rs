#![forbid(unsafe_code)]

pub mod ids {
    const MAX_LOCK_NAME_LEN: usize = 255;
    const MAX_HOLDER_ID_LEN: usize = 255;
    const MAX_RUN_KIND_LEN: usize = 64;

    /// Name of a lease-protected resource, e.g. `sync-project-ABC`.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct LockName(String);

    impl LockName {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, LockNameError> {
            let value = value.into();
            validate_lock_name(&value)?;
            Ok(Self(value))
        }

        /// `sync-{kind}` followed by `-{part}` for every non-empty part.
        pub fn for_job<'a>(
            kind: &RunKind,
            parts: impl IntoIterator<Item = &'a str>,
        ) -> Result<Self, LockNameError> {
            let mut name = format!("sync-{}", kind.as_str());
            for part in parts {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                name.push('-');
                name.push_str(part);
            }
            Self::try_new(name)
        }
    }

    impl std::fmt::Display for LockName {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum LockNameError {
        Empty,
        TooLong,
        InvalidChar { ch: char, index: usize },
    }

    impl std::fmt::Display for LockNameError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "lock name must not be empty"),
                Self::TooLong => write!(f, "lock name is too long"),
                Self::InvalidChar { ch, index } => {
                    write!(f, "lock name has invalid char {ch:?} at {index}")
                }
            }
        }
    }

    impl std::error::Error for LockNameError {}

    fn validate_lock_name(value: &str) -> Result<(), LockNameError> {
        if value.trim().is_empty() {
            return Err(LockNameError::Empty);
        }
        if value.len() > MAX_LOCK_NAME_LEN {
            return Err(LockNameError::TooLong);
        }
        for (index, ch) in value.chars().enumerate() {
            if ch.is_control() || ch.is_whitespace() {
                return Err(LockNameError::InvalidChar { ch, index });
            }
        }
        Ok(())
    }

    /// Opaque identity of the process instance owning a lease.
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct HolderId(String);

    impl HolderId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, HolderIdError> {
            let value = value.into();
            if value.trim().is_empty() {
                return Err(HolderIdError::Empty);
            }
            if value.len() > MAX_HOLDER_ID_LEN {
                return Err(HolderIdError::TooLong);
            }
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for HolderId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum HolderIdError {
        Empty,
        TooLong,
    }

    impl std::fmt::Display for HolderIdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "holder id must not be empty"),
                Self::TooLong => write!(f, "holder id is too long"),
            }
        }
    }

    impl std::error::Error for HolderIdError {}

    /// Kind of synchronization job (`full`, `project`, `metrics`, ...).
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct RunKind(String);

    impl RunKind {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, RunKindError> {
            let value = value.into();
            let Some(first) = value.chars().next() else {
                return Err(RunKindError::Empty);
            };
            if value.len() > MAX_RUN_KIND_LEN {
                return Err(RunKindError::TooLong);
            }
            if !first.is_ascii_alphanumeric() {
                return Err(RunKindError::InvalidChar { ch: first, index: 0 });
            }
            for (index, ch) in value.chars().enumerate() {
                if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.') {
                    continue;
                }
                return Err(RunKindError::InvalidChar { ch, index });
            }
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for RunKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum RunKindError {
        Empty,
        TooLong,
        InvalidChar { ch: char, index: usize },
    }

    impl std::fmt::Display for RunKindError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "run kind must not be empty"),
                Self::TooLong => write!(f, "run kind is too long"),
                Self::InvalidChar { ch, index } => {
                    write!(f, "run kind has invalid char {ch:?} at {index}")
                }
            }
        }
    }

    impl std::error::Error for RunKindError {}
}

pub mod model {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum RunStatus {
        Running,
        Completed,
        Failed,
    }

    impl RunStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                RunStatus::Running => "running",
                RunStatus::Completed => "completed",
                RunStatus::Failed => "failed",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value.trim().to_ascii_lowercase().as_str() {
                "running" => Some(RunStatus::Running),
                "completed" => Some(RunStatus::Completed),
                "failed" => Some(RunStatus::Failed),
                _ => None,
            }
        }

        pub fn is_terminal(self) -> bool {
            !matches!(self, RunStatus::Running)
        }
    }

    /// Why a lease row went inactive.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ReleaseReason {
        Released,
        Expired,
    }

    impl ReleaseReason {
        pub fn as_str(self) -> &'static str {
            match self {
                ReleaseReason::Released => "released",
                ReleaseReason::Expired => "expired",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "released" => Some(ReleaseReason::Released),
                "expired" => Some(ReleaseReason::Expired),
                _ => None,
            }
        }
    }

    pub const MS_PER_MINUTE: i64 = 60_000;

    /// Whole minutes left until `remaining_ms` elapses, rounded up.
    pub fn minutes_remaining(remaining_ms: i64) -> i64 {
        if remaining_ms <= 0 {
            return 0;
        }
        remaining_ms / MS_PER_MINUTE + i64::from(remaining_ms % MS_PER_MINUTE != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::ids::{LockName, LockNameError, RunKind, RunKindError};
    use super::model::{ReleaseReason, RunStatus, minutes_remaining};

    #[test]
    fn lock_name_for_job_joins_parts() {
        let kind = RunKind::try_new("project").unwrap();
        let name = LockName::for_job(&kind, ["ABC"]).unwrap();
        assert_eq!(name.as_str(), "sync-project-ABC");

        let all = RunKind::try_new("all").unwrap();
        let name = LockName::for_job(&all, ["", "  "]).unwrap();
        assert_eq!(name.as_str(), "sync-all");
    }

    #[test]
    fn lock_name_rejects_blank_and_whitespace() {
        assert_eq!(LockName::try_new("   "), Err(LockNameError::Empty));
        assert_eq!(
            LockName::try_new("a b"),
            Err(LockNameError::InvalidChar { ch: ' ', index: 1 })
        );
        assert_eq!(
            LockName::try_new("x".repeat(256)),
            Err(LockNameError::TooLong)
        );
    }

    #[test]
    fn run_kind_validation() {
        assert!(RunKind::try_new("full").is_ok());
        assert_eq!(RunKind::try_new(""), Err(RunKindError::Empty));
        assert_eq!(
            RunKind::try_new("-x"),
            Err(RunKindError::InvalidChar { ch: '-', index: 0 })
        );
    }

    #[test]
    fn run_status_roundtrips_through_str() {
        for status in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn minutes_remaining_rounds_up() {
        assert_eq!(minutes_remaining(0), 0);
        assert_eq!(minutes_remaining(-5), 0);
        assert_eq!(minutes_remaining(1), 1);
        assert_eq!(minutes_remaining(60_000), 1);
        assert_eq!(minutes_remaining(60_001), 2);
        assert_eq!(minutes_remaining(30 * 60_000), 30);
        assert_eq!(minutes_remaining(i64::MAX), i64::MAX / 60_000 + 1);
    }

    #[test]
    fn release_reason_round_trips() {
        for reason in [ReleaseReason::Released, ReleaseReason::Expired] {
            assert_eq!(ReleaseReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(ReleaseReason::parse("gone"), None);
    }
}
