use serde::{Deserialize, Serialize};

use crate::config::DataConfig;
use crate::repo::RepositoryRecord;

/// Storage backend kind behind a repository location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    S3,
    Sftp,
    Rest,
    Obs,
    Cos,
}

impl BackendKind {
    fn prefix(self) -> &'static str {
        match self {
            BackendKind::Local => "",
            BackendKind::S3 => "s3:",
            BackendKind::Sftp => "sftp:",
            BackendKind::Rest => "rest:",
            BackendKind::Obs => "obs:",
            BackendKind::Cos => "cos:",
        }
    }
}

const MASK: &str = "******";

/// Everything the engine needs to open one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub backend: BackendKind,
    /// Engine location string, e.g. `s3:host/bucket` or `/srv/repo`.
    pub location: String,
    pub password: String,
    pub key_id: Option<String>,
    pub secret: Option<String>,
    pub region: Option<String>,
    pub cache_dir: Option<String>,
    pub no_cache: bool,
}

impl ConnectionOptions {
    pub fn resolve(record: &RepositoryRecord, data: &DataConfig) -> Self {
        Self {
            backend: record.backend,
            location: location_for(record),
            password: record.password.clone(),
            key_id: record.key_id.clone(),
            secret: record.secret.clone(),
            region: record.region.clone(),
            cache_dir: data.cache_dir.clone(),
            no_cache: data.no_cache,
        }
    }

    /// Copy with password and secret replaced, for status output.
    pub fn masked(&self) -> Self {
        let mut out = self.clone();
        out.password = MASK.into();
        if out.secret.is_some() {
            out.secret = Some(MASK.into());
        }
        if let (BackendKind::Rest, Some(key_id)) = (self.backend, &self.key_id) {
            if let Some(secret) = &self.secret {
                out.location = out
                    .location
                    .replace(&format!("{key_id}:{secret}@"), &format!("{key_id}:{MASK}@"));
            }
        }
        out
    }
}

fn location_for(record: &RepositoryRecord) -> String {
    let url = record.url.trim();
    match (record.backend, &record.key_id, &record.secret) {
        // REST servers take basic-auth credentials inside the URL.
        (BackendKind::Rest, Some(user), Some(pass)) => match url.split_once("://") {
            Some((scheme, rest)) => format!("rest:{scheme}://{user}:{pass}@{rest}"),
            None => format!("rest:http://{user}:{pass}@{url}"),
        },
        (kind, _, _) if url.starts_with(kind.prefix()) => url.to_string(),
        (kind, _, _) => format!("{}{url}", kind.prefix()),
    }
}
