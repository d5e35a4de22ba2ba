use crate::http_error::AppError;
use crate::plugins::communication::stories::aggregate::{self, ToTransport};
use crate::plugins::communication::stories::models::{Story, StoryOwner, UserStory, UserStoryWithMap};
use crate::store::{Document, DynStore};
use anyhow::Context;
use serde_json::Value;
use std::time::Duration;

/// Reads and merge-writes story aggregates, one document per user.
#[derive(Clone)]
pub struct StoryRepository {
    store: DynStore,
    collection: String,
    ttl: Duration,
}

fn decode(doc: Document) -> Result<UserStory, AppError> {
    let stored: UserStoryWithMap = serde_json::from_value(Value::Object(doc))?;
    Ok(UserStory::from(stored))
}

impl StoryRepository {
    pub fn new(store: DynStore, collection: impl Into<String>, ttl: Duration) -> Self {
        Self { store, collection: collection.into(), ttl }
    }

    pub async fn load(&self, user_id: &str) -> Result<Option<UserStory>, AppError> {
        match self.store.get(&self.collection, user_id).await? {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    /// Unexpired stories, oldest first.
    pub async fn load_active(&self, user_id: &str, now_ms: i64) -> Result<Option<UserStory>, AppError> {
        Ok(self.load(user_id).await?.map(|mut user_story| {
            user_story.stories.retain(|s| !s.is_expired(now_ms, self.ttl));
            user_story.sort_chronologically();
            user_story
        }))
    }

    async fn load_existing(&self, user_id: &str) -> Result<UserStory, AppError> {
        self.load(user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("no stories for user {}", user_id)))
    }

    /// Merge-writes one story and refreshes the owner's profile fields.
    pub async fn add_story(&self, story: Story) -> Result<(), AppError> {
        let owner = StoryOwner::new(story.user_id.clone(), story.username.clone(), story.profile_image.clone());
        let user_id = owner.user_id.clone();
        let single = UserStory::new(owner, vec![story]);
        let patch = single.to_transport().context("encoding story")?;
        self.store.merge(&self.collection, &user_id, patch).await?;
        tracing::debug!(user_id = %user_id, "story added");
        Ok(())
    }

    /// Profile merge, then one independent upsert per story in input order.
    pub async fn add_stories(&self, owner: &StoryOwner, stories: &[Story]) -> Result<(), AppError> {
        let profile = aggregate::owner_patch(owner).context("encoding story owner")?;
        self.store.merge(&self.collection, &owner.user_id, profile).await?;
        for entry in aggregate::to_sequence_of_maps(stories) {
            let patch = aggregate::stories_patch(&entry).context("encoding story")?;
            self.store.merge(&self.collection, &owner.user_id, patch).await?;
        }
        tracing::debug!(user_id = %owner.user_id, count = stories.len(), "stories added");
        Ok(())
    }

    async fn find_story(&self, user_id: &str, timestamp: i64) -> Result<Story, AppError> {
        let user_story = self.load_existing(user_id).await?;
        user_story
            .find(timestamp)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("story {} not found", aggregate::key_for_timestamp(timestamp))))
    }

    /// Sets `isViewed` and bumps `views` in the store, so concurrent views all
    /// count. Viewing state is per story, not per viewer.
    pub async fn mark_viewed(&self, user_id: &str, timestamp: i64) -> Result<Story, AppError> {
        let mut story = self.find_story(user_id, timestamp).await?;
        let key = aggregate::key_for_timestamp(timestamp);

        let mut fields = Document::new();
        fields.insert("isViewed".to_string(), Value::Bool(true));
        self.store
            .merge(&self.collection, user_id, aggregate::story_patch(timestamp, fields))
            .await?;
        let views = self
            .store
            .increment(&self.collection, user_id, &["stories", key.as_str(), "views"], 1)
            .await?;

        story.is_viewed = true;
        story.views = u64::try_from(views).unwrap_or_default();
        Ok(story)
    }

    pub async fn set_liked(&self, user_id: &str, timestamp: i64, liked: bool) -> Result<Story, AppError> {
        let mut story = self.find_story(user_id, timestamp).await?;
        story.likes = liked;

        let mut fields = Document::new();
        fields.insert("likes".to_string(), Value::Bool(liked));
        self.store
            .merge(&self.collection, user_id, aggregate::story_patch(timestamp, fields))
            .await?;
        Ok(story)
    }

    pub async fn remove_story(&self, user_id: &str, timestamp: i64) -> Result<(), AppError> {
        self.find_story(user_id, timestamp).await?;
        let key = aggregate::key_for_timestamp(timestamp);
        self.store
            .delete_field(&self.collection, user_id, &["stories", key.as_str()])
            .await?;
        Ok(())
    }

    /// Deletes every expired story of `user_id`, returning how many went.
    pub async fn prune_expired(&self, user_id: &str, now_ms: i64) -> Result<usize, AppError> {
        let user_story = self.load_existing(user_id).await?;
        let mut removed = 0;
        for story in user_story.stories.iter().filter(|s| s.is_expired(now_ms, self.ttl)) {
            let key = aggregate::derive_key(story);
            self.store
                .delete_field(&self.collection, user_id, &["stories", key.as_str()])
                .await?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(user_id = %user_id, removed, "pruned expired stories");
        }
        Ok(removed)
    }

    pub async fn clear(&self, user_id: &str) -> Result<(), AppError> {
        self.load_existing(user_id).await?;
        self.store.delete(&self.collection, user_id).await?;
        Ok(())
    }

    /// One page of aggregates ordered by user id, with expired stories dropped.
    pub async fn list_page(&self, now_ms: i64, per_page: usize, offset: usize) -> Result<(Vec<UserStory>, usize), AppError> {
        let docs = self.store.list(&self.collection).await?;
        let total = docs.len();
        let mut items = Vec::new();
        for (_, doc) in docs.into_iter().skip(offset).take(per_page) {
            let mut user_story = decode(doc)?;
            user_story.stories.retain(|s| !s.is_expired(now_ms, self.ttl));
            user_story.sort_chronologically();
            items.push(user_story);
        }
        Ok((items, total))
    }
}
