//! Username/password login and staff administration.
//!
//! Credentials live in the `users` table and are compared as stored.
//! Identity and role are kept on the caller's `Session`; nothing about the
//! login is persisted.

use chrono::Utc;
use rusqlite::{params, ErrorCode, OptionalExtension};
use tracing::{info, warn};

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Role, Screen, UserSummary};
use crate::session::{Session, SessionUser};

/// Verify credentials and establish the session. On any mismatch the
/// session is left exactly as it was.
pub fn login(
    db: &DbState,
    session: &mut Session,
    name: &str,
    password: &str,
) -> PosResult<SessionUser> {
    let name = name.trim();
    if name.is_empty() || password.is_empty() {
        return Err(PosError::InvalidCredentials);
    }

    let stored: Option<(String, String)> = {
        let conn = db.lock()?;
        conn.query_row(
            "SELECT password, role FROM users WHERE name = ?1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    };

    let Some((stored_password, role)) = stored else {
        warn!(user = %name, "login failed: unknown user");
        return Err(PosError::InvalidCredentials);
    };
    if stored_password != password {
        warn!(user = %name, "login failed: wrong password");
        return Err(PosError::InvalidCredentials);
    }

    let role: Role = role.parse().map_err(PosError::InvalidInput)?;
    session.establish(name, role, Utc::now());
    info!(user = %name, %role, "login successful");

    Ok(SessionUser {
        name: name.to_string(),
        role,
    })
}

pub fn logout(session: &mut Session) {
    session.logout();
}

/// Manager-only: add a staff account.
pub fn create_user(
    db: &DbState,
    session: &mut Session,
    name: &str,
    password: &str,
    role: Role,
) -> PosResult<()> {
    session.require_screen(Screen::Users)?;
    session.touch(Utc::now());

    let name = name.trim();
    if name.is_empty() || password.is_empty() {
        return Err(PosError::InvalidInput(
            "User name and password are required".to_string(),
        ));
    }

    let conn = db.lock()?;
    match conn.execute(
        "INSERT INTO users (name, password, role) VALUES (?1, ?2, ?3)",
        params![name, password, role.as_str()],
    ) {
        Ok(_) => {
            info!(user = %name, %role, "user created");
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(PosError::InvalidInput(format!("User {name} already exists")))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn list_users(db: &DbState, session: &Session) -> PosResult<Vec<UserSummary>> {
    session.require_screen(Screen::Users)?;

    let conn = db.lock()?;
    let mut stmt = conn.prepare("SELECT name, role FROM users ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut users = Vec::new();
    for row in rows {
        let (name, role) = row?;
        let role = role.parse().map_err(PosError::InvalidInput)?;
        users.push(UserSummary { name, role });
    }
    Ok(users)
}
