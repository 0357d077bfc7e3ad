use crate::session::MapSession;
use tokio::sync::Mutex;

pub struct AppState {
    /// Held across a whole run, so concurrent `/api/process` calls queue up.
    pub session: Mutex<MapSession>,
}
