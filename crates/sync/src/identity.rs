use jm_core::ids::{HolderId, HolderIdError};

const UNKNOWN_HOST: &str = "unknown-host";
const MAX_HOST_LEN: usize = 128;

/// Who this process is, as seen by other replicas.
///
/// Every acquisition gets a fresh holder id built from host, pid, the acquisition
/// time and a random suffix, so two acquisitions never share an id even inside
/// one process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HolderIdentity {
    host: String,
    pid: u32,
}

impl HolderIdentity {
    pub fn detect() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .map(|name| sanitize_host(&name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_HOST.to_string());
        Self::new(host, std::process::id())
    }

    pub fn new(host: impl Into<String>, pid: u32) -> Self {
        let host = sanitize_host(&host.into());
        let host = if host.is_empty() {
            UNKNOWN_HOST.to_string()
        } else {
            host
        };
        Self { host, pid }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// `host:pid`, shared by every holder id this process generates.
    pub fn prefix(&self) -> String {
        format!("{}:{}", self.host, self.pid)
    }

    pub fn next_holder_id(&self, now_ms: i64) -> Result<HolderId, HolderIdError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        HolderId::try_new(format!("{}:{now_ms}:{}", self.prefix(), &nonce[..12]))
    }
}

fn sanitize_host(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|ch| !ch.is_whitespace() && !ch.is_control() && *ch != ':')
        .take(MAX_HOST_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_ids_are_unique_and_prefixed() {
        let identity = HolderIdentity::new("pod-a", 42);
        let first = identity.next_holder_id(1_000).unwrap();
        let second = identity.next_holder_id(1_000).unwrap();
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("pod-a:42:1000:"));
    }

    #[test]
    fn host_is_sanitized() {
        let identity = HolderIdentity::new(" my host:1 ", 7);
        assert_eq!(identity.host(), "myhost1");
        assert_eq!(identity.prefix(), "myhost1:7");

        let blank = HolderIdentity::new("   ", 7);
        assert_eq!(blank.host(), "unknown-host");
    }

    #[test]
    fn detect_produces_usable_identity() {
        let identity = HolderIdentity::detect();
        assert!(!identity.host().is_empty());
        assert_eq!(identity.pid(), std::process::id());
    }
}
