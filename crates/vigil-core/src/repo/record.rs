use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RepositoryEntry;
use crate::engine::BackendKind;
use crate::lifecycle::Record;

/// Stored connection settings for one repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: u64,
    pub name: String,
    pub backend: BackendKind,
    pub url: String,
    pub password: String,
    pub key_id: Option<String>,
    pub secret: Option<String>,
    pub region: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum RepositoryField {
    Name(String),
    Password(String),
}

impl Record for RepositoryRecord {
    type Field = RepositoryField;
    const COLLECTION: &'static str = "repositories";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn touch(&mut self, now: DateTime<Utc>, created: bool) {
        if created {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }

    fn apply(&mut self, field: RepositoryField) {
        match field {
            RepositoryField::Name(n) => self.name = n,
            RepositoryField::Password(p) => self.password = p,
        }
    }
}

impl From<&RepositoryEntry> for RepositoryRecord {
    fn from(entry: &RepositoryEntry) -> Self {
        Self {
            name: entry.name.clone(),
            backend: entry.backend,
            url: entry.url.clone(),
            password: entry.password.clone(),
            key_id: entry.key_id.clone(),
            secret: entry.secret.clone(),
            region: entry.region.clone(),
            ..Default::default()
        }
    }
}
