use crate::common::Profile;
use crate::common::types::{DEFAULT_BIO, default_avatar};
use crate::error::ChatError;
use crate::storage::ClientDatabase;

/// Lower-cases a user-chosen handle and strips everything but `[a-z0-9]`.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Rendezvous name peers dial to reach `handle`.
pub fn endpoint_name(prefix: &str, handle: &str) -> String {
    format!("{prefix}{}", normalize_handle(handle))
}

/// Reverses [`endpoint_name`]: recovers the handle from a remote endpoint name.
pub fn handle_from_endpoint(prefix: &str, endpoint: &str) -> String {
    normalize_handle(endpoint.strip_prefix(prefix).unwrap_or(endpoint))
}

/// Identity store plus the "logged in" gate.
pub struct Session {
    profile: Option<Profile>,
    authenticated: bool,
}

impl Session {
    /// Restores the last persisted identity and session flag.
    pub fn restore(db: &ClientDatabase) -> Self {
        let profile = match db.load_profile() {
            Ok(profile) => profile,
            Err(err) => {
                log::warn!("Failed to load stored profile: {err}");
                None
            }
        };
        let authenticated = profile.is_some()
            && db.is_logged_in().unwrap_or_else(|err| {
                log::warn!("Failed to read session flag: {err}");
                false
            });
        Self {
            profile,
            authenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The profile of an authenticated session.
    pub fn profile(&self) -> Option<&Profile> {
        if self.authenticated {
            self.profile.as_ref()
        } else {
            None
        }
    }

    /// Validates the login form and opens the session, keeping a previously
    /// generated id when one is stored.
    pub fn login(
        &mut self,
        db: &ClientDatabase,
        display_name: &str,
        handle: &str,
    ) -> Result<Profile, ChatError> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidLogin("display name"));
        }
        let handle = normalize_handle(handle);
        if handle.is_empty() {
            return Err(ChatError::InvalidLogin("handle"));
        }

        let profile = match self.profile.clone() {
            Some(mut existing) => {
                if existing.handle != handle {
                    existing.avatar = default_avatar(&handle);
                }
                existing.name = name.to_string();
                existing.handle = handle;
                existing
            }
            None => Profile {
                id: Profile::generate_id(),
                avatar: default_avatar(&handle),
                handle,
                name: name.to_string(),
                bio: DEFAULT_BIO.to_string(),
            },
        };

        db.save_profile(&profile)?;
        db.set_logged_in(true)?;
        log::info!("Logged in as @{} ({})", profile.handle, profile.id);

        self.profile = Some(profile.clone());
        self.authenticated = true;
        Ok(profile)
    }

    /// Clears the session flag and every locally cached record.
    pub fn logout(&mut self, db: &mut ClientDatabase) {
        if let Err(err) = db.clear_all() {
            log::warn!("Failed to clear local state on logout: {err}");
        }
        self.profile = None;
        self.authenticated = false;
        log::info!("Logged out");
    }

    /// Drops only the session flag, keeping the stored identity for the next login.
    pub fn suspend(&mut self, db: &ClientDatabase) {
        if let Err(err) = db.set_logged_in(false) {
            log::warn!("Failed to persist session flag: {err}");
        }
        self.authenticated = false;
    }

    pub fn update_profile(
        &mut self,
        db: &ClientDatabase,
        name: Option<&str>,
        bio: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Profile, ChatError> {
        if !self.authenticated {
            return Err(ChatError::NotLoggedIn);
        }
        let profile = self.profile.as_mut().ok_or(ChatError::NotLoggedIn)?;
        if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
            profile.name = name.to_string();
        }
        if let Some(bio) = bio {
            profile.bio = bio.trim().to_string();
        }
        if let Some(avatar) = avatar.map(str::trim).filter(|avatar| !avatar.is_empty()) {
            profile.avatar = avatar.to_string();
        }
        db.save_profile(profile)?;
        Ok(profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_is_lowercased_and_filtered() {
        assert_eq!(normalize_handle("  Ana.Maria_99! "), "anamaria99");
        assert_eq!(normalize_handle("@@@"), "");
        assert_eq!(normalize_handle("JOSÉ ß"), "jos");
        assert_eq!(endpoint_name("concord-", "Bruno"), "concord-bruno");
        assert_eq!(handle_from_endpoint("concord-", "concord-bruno"), "bruno");
        assert_eq!(handle_from_endpoint("concord-", "bruno"), "bruno");
    }

    #[test]
    fn login_rejects_empty_fields() {
        let db = ClientDatabase::in_memory().unwrap();
        let mut session = Session::restore(&db);
        assert!(matches!(
            session.login(&db, "  ", "ana"),
            Err(ChatError::InvalidLogin("display name"))
        ));
        assert!(matches!(
            session.login(&db, "Ana", "!!"),
            Err(ChatError::InvalidLogin("handle"))
        ));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn login_persists_and_id_survives_relogin() {
        let db = ClientDatabase::in_memory().unwrap();
        let mut session = Session::restore(&db);
        let first = session.login(&db, "Ana", "Ana").unwrap();
        assert_eq!(first.handle, "ana");
        assert!(first.id.starts_with("usr_"));

        session.suspend(&db);
        assert!(session.profile().is_none());

        let second = session.login(&db, "Ana Clara", "ana").unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.name, "Ana Clara");

        let restored = Session::restore(&db);
        assert!(restored.is_authenticated());
        assert_eq!(restored.profile().map(|p| p.id.clone()), Some(first.id));
    }

    #[test]
    fn logout_forgets_identity() {
        let mut db = ClientDatabase::in_memory().unwrap();
        let mut session = Session::restore(&db);
        let first = session.login(&db, "Ana", "ana").unwrap();
        session.logout(&mut db);

        assert!(!Session::restore(&db).is_authenticated());
        let next = session.login(&db, "Ana", "ana").unwrap();
        assert_ne!(next.id, first.id);
    }
}
