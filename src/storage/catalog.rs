use crate::entitlement::SubscriptionRecord;
use crate::storage::{MemorySubscriptionStore, MemoryVideoStore, VideoRecord};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Seed data for the in-process stores.
///
/// ```toml
/// [[videos]]
/// id = "intro"
/// ownerId = "alice"
/// isActive = true
/// storageLocator = "intro.mp4"
/// tierRequired = "basic"
///
/// [[subscriptions]]
/// subjectId = "alice"
/// tier = "premium"
/// status = "active"
/// maxUploads = 50
/// uploadsUsed = 3
/// maxClients = 10
/// clientsUsed = 1
/// maxFileSize = 2147483648
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub videos: Vec<VideoRecord>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionRecord>,
}

impl Catalog {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read catalog {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse catalog {}", path.display()))
    }

    pub fn seed(self, videos: &MemoryVideoStore, subscriptions: &MemorySubscriptionStore) {
        let video_count = self.videos.len();
        for video in self.videos {
            videos.upsert(video);
        }

        let mut subscription_count = 0;
        for record in self.subscriptions {
            if subscriptions.upsert(record) {
                subscription_count += 1;
            } else {
                warn!("Skipping catalog subscription without subjectId");
            }
        }

        info!(videos = video_count, subscriptions = subscription_count, "Catalog seeded");
    }
}
