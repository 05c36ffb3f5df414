use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqlResult, params};
use std::path::Path;

use super::database::Database;
use crate::common::{ChatMessage, Contact, ContactStatus, Profile};

const LOGGED_IN_KEY: &str = "logged_in";

/// Local persistence of profile, session flag, contacts and messages
pub struct ClientDatabase {
    db: Database,
}

impl ClientDatabase {
    /// Open (or create) the database at `path`
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    pub fn in_memory() -> SqlResult<Self> {
        Ok(Self {
            db: Database::in_memory()?,
        })
    }

    // ========== Profile & session ==========

    pub fn save_profile(&self, profile: &Profile) -> SqlResult<()> {
        self.db.connection().execute(
            "INSERT OR REPLACE INTO profile (slot, id, handle, name, avatar, bio)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![
                profile.id,
                profile.handle,
                profile.name,
                profile.avatar,
                profile.bio
            ],
        )?;
        Ok(())
    }

    pub fn load_profile(&self) -> SqlResult<Option<Profile>> {
        self.db
            .connection()
            .query_row(
                "SELECT id, handle, name, avatar, bio FROM profile WHERE slot = 1",
                [],
                |row| {
                    Ok(Profile {
                        id: row.get(0)?,
                        handle: row.get(1)?,
                        name: row.get(2)?,
                        avatar: row.get(3)?,
                        bio: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    pub fn set_logged_in(&self, logged_in: bool) -> SqlResult<()> {
        self.db.connection().execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![LOGGED_IN_KEY, if logged_in { "true" } else { "false" }],
        )?;
        Ok(())
    }

    pub fn is_logged_in(&self) -> SqlResult<bool> {
        let value: Option<String> = self
            .db
            .connection()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![LOGGED_IN_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.as_deref() == Some("true"))
    }

    // ========== Contacts ==========

    /// Insert or update a contact, keeping its original list position
    pub fn upsert_contact(&self, contact: &Contact) -> SqlResult<()> {
        self.db.connection().execute(
            "INSERT INTO contacts (id, handle, name, avatar, bio, status, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, (SELECT COALESCE(MAX(position), 0) + 1 FROM contacts))
             ON CONFLICT(id) DO UPDATE SET
                handle = excluded.handle,
                name = excluded.name,
                avatar = excluded.avatar,
                bio = excluded.bio,
                status = excluded.status",
            params![
                contact.id,
                contact.handle,
                contact.name,
                contact.avatar,
                contact.bio,
                contact.status.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn contacts(&self) -> SqlResult<Vec<Contact>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT id, handle, name, avatar, bio, status
             FROM contacts
             ORDER BY position ASC",
        )?;

        let contacts = stmt
            .query_map([], |row| {
                let status: String = row.get(5)?;
                Ok(Contact {
                    id: row.get(0)?,
                    handle: row.get(1)?,
                    name: row.get(2)?,
                    avatar: row.get(3)?,
                    bio: row.get(4)?,
                    status: ContactStatus::parse(&status),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(contacts)
    }

    // ========== Messages ==========

    /// Insert a message; a duplicate id is ignored
    pub fn insert_message(&self, message: &ChatMessage) -> SqlResult<()> {
        self.db.connection().execute(
            "INSERT OR IGNORE INTO messages
                (id, conversation, sender_id, sender_name, target_id, text, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id,
                message.conversation().to_string(),
                message.sender_id,
                message.sender_name,
                message.target_id,
                message.text,
                message.timestamp
            ],
        )?;
        Ok(())
    }

    /// All messages, oldest first
    pub fn messages(&self) -> SqlResult<Vec<ChatMessage>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, sender_name, target_id, text, timestamp
             FROM messages
             ORDER BY timestamp ASC, created_at ASC",
        )?;

        let messages = stmt
            .query_map([], |row| {
                let timestamp: DateTime<Utc> = row.get(5)?;
                Ok(ChatMessage {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    sender_name: row.get(2)?,
                    target_id: row.get(3)?,
                    text: row.get(4)?,
                    timestamp,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(messages)
    }

    pub fn message_count(&self) -> SqlResult<usize> {
        let count: i64 =
            self.db
                .connection()
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Wipe profile, session flag, contacts and messages
    pub fn clear_all(&mut self) -> SqlResult<()> {
        let tx = self.db.connection_mut().transaction()?;
        tx.execute("DELETE FROM messages", [])?;
        tx.execute("DELETE FROM contacts", [])?;
        tx.execute("DELETE FROM profile", [])?;
        tx.execute("DELETE FROM settings", [])?;
        tx.commit()
    }
}
