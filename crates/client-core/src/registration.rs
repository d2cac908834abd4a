//! Registration management
//!
//! A registration keeps this client reachable at a server: one initial
//! REGISTER, then periodic refreshes driven from the main loop. Each
//! refresh runs on a fresh session so a wedged previous exchange cannot
//! poison the next one; the reply handler destroys the session again once
//! the server has spoken.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Refresh this long before the registration would expire
pub const REFRESH_MARGIN: Duration = Duration::from_secs(3);

/// Server's verdict on a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationReply {
    /// Accepted; we are registered
    Ack,
    /// Rejected; the registration is removed
    Rejected,
    /// No reply in time
    Timeout,
}

/// One active registration
pub struct Registration {
    /// Identifier handed back to the application
    pub id: u32,
    /// In-flight registration session; `None` between exchanges
    pub session: Option<Box<dyn Session>>,
    /// Registrar host
    pub host: String,
    /// Account user
    pub user: String,
    /// Account password
    pub pass: String,
    /// Requested registration lifetime in seconds
    pub refresh_secs: u64,
    /// When the last REGISTER was sent
    pub last: Instant,
}

impl Registration {
    /// Whether this registration is due for a refresh at `now`
    pub fn due_for_refresh(&self, now: Instant) -> bool {
        let lifetime = Duration::from_secs(self.refresh_secs);
        let due_after = lifetime.saturating_sub(REFRESH_MARGIN);
        now.duration_since(self.last) > due_after
    }
}
