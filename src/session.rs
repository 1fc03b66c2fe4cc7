//! Per-session context owned by the shell and passed into every engine call.
//!
//! Holds identity, role, the cart being built, the scan input, the
//! cooperative idle clock, the catalog-sync flag and label, and the product
//! currently being edited on the inventory screen. The idle timeout is never
//! enforced in the background: it fires on the next interaction.

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::cart::Cart;
use crate::error::{PosError, PosResult};
use crate::models::{Role, Screen};

const PENDING_SYNC_LABEL: &str = "Pending";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    user: Option<SessionUser>,
    pub cart: Cart,
    /// Contents of the scan field; cleared after every scan.
    pub scan_input: String,
    pub scan_quantity: i64,
    last_activity: DateTime<Utc>,
    idle_timeout: Duration,
    catalog_synced: bool,
    last_sync: Option<String>,
    editing_product: Option<i64>,
}

impl Session {
    pub fn new(idle_timeout_secs: i64) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user: None,
            cart: Cart::default(),
            scan_input: String::new(),
            scan_quantity: 1,
            last_activity: Utc::now(),
            idle_timeout: Duration::seconds(idle_timeout_secs.max(1)),
            catalog_synced: false,
            last_sync: None,
            editing_product: None,
        }
    }

    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub(crate) fn establish(&mut self, name: &str, role: Role, now: DateTime<Utc>) {
        self.user = Some(SessionUser {
            name: name.to_string(),
            role,
        });
        self.last_activity = now;
        info!(session_id = %self.session_id, user = %name, role = %role, "session established");
    }

    /// Discard all session state, cart and sync flag included.
    pub fn logout(&mut self) {
        if let Some(user) = &self.user {
            info!(session_id = %self.session_id, user = %user.name, "session logged out");
        }
        *self = Self::new(self.idle_timeout.num_seconds());
    }

    /// Refresh the inactivity clock.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// Run on every interaction. Logs the session out and returns `true`
    /// when it sat idle past the timeout; otherwise refreshes the clock.
    pub fn check_timeout(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_logged_in() {
            return false;
        }
        if now - self.last_activity > self.idle_timeout {
            info!(
                session_id = %self.session_id,
                idle_secs = (now - self.last_activity).num_seconds(),
                "session idle timeout"
            );
            self.logout();
            return true;
        }
        self.last_activity = now;
        false
    }

    pub fn require_user(&self) -> PosResult<&SessionUser> {
        self.user.as_ref().ok_or(PosError::NotLoggedIn)
    }

    pub fn require_screen(&self, screen: Screen) -> PosResult<&SessionUser> {
        let user = self.require_user()?;
        if !user.role.can_access(screen) {
            return Err(PosError::Forbidden(format!(
                "{} cannot open {screen:?}",
                user.role
            )));
        }
        Ok(user)
    }

    pub fn needs_catalog_sync(&self) -> bool {
        !self.catalog_synced
    }

    pub(crate) fn mark_catalog_synced(&mut self) {
        self.catalog_synced = true;
    }

    /// Human-readable time of the last successful mirror exchange.
    pub fn last_sync_label(&self) -> &str {
        self.last_sync.as_deref().unwrap_or(PENDING_SYNC_LABEL)
    }

    pub(crate) fn record_sync(&mut self, at: &str) {
        self.last_sync = Some(at.to_string());
    }

    pub fn editing_product(&self) -> Option<i64> {
        self.editing_product
    }

    pub fn begin_edit(&mut self, product_id: i64) {
        self.editing_product = Some(product_id);
    }

    pub fn cancel_edit(&mut self) {
        self.editing_product = None;
    }
}
