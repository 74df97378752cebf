use ingestplane_common::Config;
use ingestplane_repo::Repo;

/// Shared application state, handed to every handler via `State<Arc<AppState>>`.
/// Grounded on `rootsignal-api/src/main.rs`'s own `AppState`.
pub struct AppState {
    pub repo: Repo,
    pub config: Config,
    pub http: reqwest::Client,
}
