use std::sync::Arc;
use std::time::Duration;

use switchboard::agent::AgentClient;
use switchboard::gateway::RunGateway;
use switchboard::store::ChatStore;

/// Shared state for all routes. The store and gateway are constructor
/// injected; nothing here reaches for globals, so tests can stand up an
/// `AppState` around a scratch database.
#[derive(Clone)]
pub struct AppState {
    store: ChatStore,
    gateway: Arc<RunGateway>,
    probe: reqwest::Client,
}

impl AppState {
    pub fn new(store: ChatStore, agent_timeout: Duration) -> Arc<AppState> {
        let gateway = Arc::new(RunGateway::new(
            store.clone(),
            AgentClient::new(),
            agent_timeout,
        ));
        Arc::new(Self {
            store,
            gateway,
            probe: reqwest::Client::new(),
        })
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn gateway(&self) -> Arc<RunGateway> {
        Arc::clone(&self.gateway)
    }

    /// Plain HTTP client for agent health probes.
    pub fn probe_client(&self) -> &reqwest::Client {
        &self.probe
    }
}
