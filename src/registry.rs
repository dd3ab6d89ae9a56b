use tokio::sync::Mutex;

/// A peer as the coordinator sees it: the transport-observed remote address
/// paired with the peer's self-reported listening port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub addr: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl std::fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Append-only record of every peer that has registered, in registration
/// order. Registration order is the integrity-critical invariant, so append
/// and snapshot happen under one lock.
pub struct Registry {
    peers: Mutex<Vec<PeerEndpoint>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Appends the endpoint and returns the full registry snapshot including
    /// the new entry. Re-registering an identical endpoint appends a second
    /// entry; the registry does not deduplicate.
    pub async fn register(&self, endpoint: PeerEndpoint) -> Vec<PeerEndpoint> {
        let mut peers = self.peers.lock().await;
        peers.push(endpoint);
        peers.clone()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
