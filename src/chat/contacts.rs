use crate::common::{Contact, ContactStatus};

/// Contacts in the order they were first added.
#[derive(Debug, Default)]
pub struct ContactBook {
    contacts: Vec<Contact>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_contacts(contacts: Vec<Contact>) -> Self {
        let mut book = Self::new();
        for contact in contacts {
            book.upsert(contact);
        }
        book
    }

    /// Inserts `contact` or replaces the card of an existing one in place.
    /// Returns true when the book changed.
    pub fn upsert(&mut self, contact: Contact) -> bool {
        match self.contacts.iter_mut().find(|c| c.id == contact.id) {
            Some(existing) if *existing == contact => false,
            Some(existing) => {
                *existing = contact;
                true
            }
            None => {
                self.contacts.push(contact);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn list(&self) -> &[Contact] {
        &self.contacts
    }

    /// Returns true when the status actually changed.
    pub fn set_status(&mut self, id: &str, status: ContactStatus) -> bool {
        match self.contacts.iter_mut().find(|c| c.id == id) {
            Some(contact) if contact.status != status => {
                contact.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
    }
}
