use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Stories keyed by their derived `story-<timestamp>` key.
pub type StoryMap = BTreeMap<String, Story>;

/// One ephemeral post belonging to a user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub username: String,
    pub profile_image: String,
    pub user_id: String,
    /// Milliseconds since the epoch. Identity and ordering key.
    pub timestamp: i64,
    pub image: String,
    pub is_verified: bool,
    pub is_viewed: bool,
    pub views: u64,
    pub likes: bool,
    pub mime_type: String,
}

impl Story {
    /// A fresh, unviewed and unliked story for `owner`.
    pub fn new(owner: &StoryOwner, timestamp: i64, media: StoryMedia) -> Self {
        Self {
            username: owner.username.clone(),
            profile_image: owner.profile_image.clone(),
            user_id: owner.user_id.clone(),
            timestamp,
            image: media.image,
            is_verified: media.is_verified,
            is_viewed: false,
            views: 0,
            likes: false,
            mime_type: media.mime_type,
        }
    }

    pub fn is_expired(&self, now_ms: i64, ttl: Duration) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.timestamp) >= ttl_ms
    }
}

/// Denormalised profile fields copied onto an aggregate and its stories.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoryOwner {
    pub user_id: String,
    pub username: String,
    pub profile_image: String,
}

impl StoryOwner {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, profile_image: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), username: username.into(), profile_image: profile_image.into() }
    }
}

/// Media half of a story, as supplied by the uploader.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StoryMedia {
    pub image: String,
    pub mime_type: String,
    #[serde(default)]
    pub is_verified: bool,
    pub timestamp: Option<i64>,
}

/// A user's stories as an ordered sequence, the shape consumed by callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStory {
    pub user_id: String,
    pub username: String,
    pub profile_image: String,
    pub stories: Vec<Story>,
}

impl UserStory {
    pub fn new(owner: StoryOwner, stories: Vec<Story>) -> Self {
        Self {
            user_id: owner.user_id,
            username: owner.username,
            profile_image: owner.profile_image,
            stories,
        }
    }

    pub fn owner(&self) -> StoryOwner {
        StoryOwner::new(self.user_id.clone(), self.username.clone(), self.profile_image.clone())
    }

    pub fn sort_chronologically(&mut self) {
        self.stories.sort_by_key(|s| s.timestamp);
    }

    pub fn find(&self, timestamp: i64) -> Option<&Story> {
        self.stories.iter().find(|s| s.timestamp == timestamp)
    }
}

/// The stored shape: stories keyed by derived key so single stories can be
/// merge-written without touching their siblings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStoryWithMap {
    pub user_id: String,
    pub username: String,
    pub profile_image: String,
    #[serde(default)]
    pub stories: StoryMap,
}

impl UserStoryWithMap {
    pub fn new(owner: StoryOwner, stories: StoryMap) -> Self {
        Self {
            user_id: owner.user_id,
            username: owner.username,
            profile_image: owner.profile_image,
            stories,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoryCreate {
    pub username: String,
    pub profile_image: String,
    #[serde(flatten)]
    pub media: StoryMedia,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoryBatchCreate {
    pub username: String,
    pub profile_image: String,
    pub stories: Vec<StoryMedia>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StoryLike {
    pub likes: bool,
}
