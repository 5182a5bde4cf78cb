use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::storage::{BlobStore, StorageError};

pub const HISTORY_LIST: &str = "history-audio-list.json";
pub const MEANDERING_LIST: &str = "audio-list.json";
pub const HISTORY_FOLDER: &str = "boringhistory";

const HISTORY_PREFIX: &str = "HIST";
const DEFAULT_TOPIC: &str = "boring";
const DEFAULT_GENDER: &str = "female";

pub const HISTORY_CATEGORIES: [(&str, &str); 6] = [
    ("ancient", "Ancient Civilizations"),
    ("medieval", "Medieval Life"),
    ("crafts", "Crafts & Trades"),
    ("daily", "Daily Routines"),
    ("government", "Government & Society"),
    ("industrial", "Industrial Era"),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtopic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Fields written by other tools are carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: String,
    pub name: String,
}

pub fn history_categories() -> Vec<Category> {
    HISTORY_CATEGORIES
        .iter()
        .map(|(id, name)| Category {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioList {
    #[serde(default)]
    pub audios: Vec<AudioEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<Category>>,
}

impl AudioList {
    pub fn find_mut(&mut self, id: &str) -> Option<&mut AudioEntry> {
        self.audios.iter_mut().find(|a| a.id == id)
    }

    /// Removes entries with any of `ids`; returns how many went.
    pub fn remove_ids(&mut self, ids: &[&str]) -> usize {
        let before = self.audios.len();
        self.audios.retain(|a| !ids.contains(&a.id.as_str()));
        before - self.audios.len()
    }
}

/// The two audio libraries and their list documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Library {
    History,
    Meandering,
}

impl Library {
    pub fn from_folder(folder: Option<&str>) -> Self {
        match folder {
            Some(HISTORY_FOLDER) => Library::History,
            _ => Library::Meandering,
        }
    }

    pub fn document(self) -> &'static str {
        match self {
            Library::History => HISTORY_LIST,
            Library::Meandering => MEANDERING_LIST,
        }
    }
}

/// Where an upload goes and the list entry that announces it.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPlan {
    pub library: Library,
    pub id: String,
    pub file_name: String,
    pub upload_path: String,
    pub entry: AudioEntry,
}

/// `HIST` + one past the highest existing number, zero-padded to three digits.
pub fn next_history_id(list: Option<&AudioList>) -> String {
    let highest = list
        .map(|l| {
            l.audios
                .iter()
                .filter_map(|a| a.id.strip_prefix(HISTORY_PREFIX)?.parse::<u32>().ok())
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    format!("{}{:03}", HISTORY_PREFIX, highest + 1)
}

/// Eight random uppercase hex characters.
pub fn random_meandering_id() -> String {
    let value: u32 = rand::thread_rng().gen();
    format!("{:08X}", value)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Names a new recording. `existing` is the current list of the target
/// library (used for History ids).
pub fn plan_upload(
    library: Library,
    existing: Option<&AudioList>,
    title: &str,
    gender: Option<&str>,
    topic: Option<&str>,
) -> UploadPlan {
    match library {
        Library::History => {
            let id = next_history_id(existing);
            let file_name = format!("{}.mp3", id);
            UploadPlan {
                library,
                upload_path: format!("{}/{}", HISTORY_FOLDER, file_name),
                entry: AudioEntry {
                    id: id.clone(),
                    title: Some(title.to_string()),
                    ..AudioEntry::default()
                },
                id,
                file_name,
            }
        }
        Library::Meandering => {
            let id = random_meandering_id();
            let topic = non_blank(topic).unwrap_or(DEFAULT_TOPIC);
            let gender = non_blank(gender).unwrap_or(DEFAULT_GENDER);
            let file_name = format!("{}_{}_{}.mp3", id, topic, gender);
            let upload_path = if topic == DEFAULT_TOPIC {
                format!("archive/{}", file_name)
            } else {
                file_name.clone()
            };
            UploadPlan {
                library,
                upload_path,
                entry: AudioEntry {
                    id: id.clone(),
                    topic: Some(topic.to_string()),
                    subtopic: Some(title.to_string()),
                    gender: Some(gender.to_string()),
                    ..AudioEntry::default()
                },
                id,
                file_name,
            }
        }
    }
}

/// `boringhistory/HIST004.mp3` -> `HIST004`.
pub fn entry_id(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    base.strip_suffix(".mp3").unwrap_or(base)
}

/// Ids a deleted object may be listed under: the extensionless base name and,
/// for Meandering names, the id before the first `_`.
pub fn candidate_ids(key: &str) -> Vec<&str> {
    let base = key.rsplit('/').next().unwrap_or(key);
    let stem = base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base);
    let mut ids = vec![stem];
    if let Some((lead, _)) = stem.split_once('_') {
        if !lead.is_empty() {
            ids.push(lead);
        }
    }
    ids
}

/// Whole JSON documents kept as public blobs.
#[derive(Clone)]
pub struct DocumentStore {
    blobs: Arc<dyn BlobStore>,
    write_lock: Arc<Mutex<()>>,
}

impl DocumentStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Held across a read-modify-write so writers in this process do not
    /// drop each other's updates.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    async fn write(&self, name: &str, document: &Value) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(document)?;
        self.blobs
            .put(name, Bytes::from(body), mime::APPLICATION_JSON.as_ref())
            .await?;
        self.blobs.make_public(name).await
    }

    /// `None` when the document is absent. Empty or malformed documents read
    /// as an empty list.
    pub async fn read_audio_list(&self, name: &str) -> Result<Option<AudioList>, StorageError> {
        let Some(raw) = self.blobs.get(name).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<AudioList>(&raw) {
            Ok(list) => Ok(Some(list)),
            Err(e) => {
                tracing::warn!("{} is not a valid audio list ({}); treating it as empty", name, e);
                Ok(Some(AudioList::default()))
            }
        }
    }

    pub async fn write_audio_list(&self, name: &str, list: &AudioList) -> Result<(), StorageError> {
        self.write(name, &serde_json::to_value(list)?).await
    }
}
