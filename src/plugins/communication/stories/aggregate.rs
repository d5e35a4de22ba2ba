//! Conversion between the ordered (`UserStory`) and keyed (`UserStoryWithMap`)
//! shapes of a user's stories.
//!
//! Everything here is pure: no I/O, no shared state, inputs are only borrowed
//! or consumed.

use crate::plugins::communication::stories::models::{Story, StoryMap, StoryOwner, UserStory, UserStoryWithMap};
use crate::store::Document;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const STORY_KEY_PREFIX: &str = "story-";

pub fn key_for_timestamp(timestamp: i64) -> String {
    format!("{}{}", STORY_KEY_PREFIX, timestamp)
}

/// `"story-" + timestamp`, plain decimal.
pub fn derive_key(story: &Story) -> String {
    key_for_timestamp(story.timestamp)
}

/// Keys that more than one story in `stories` would map to.
pub fn colliding_keys(stories: &[Story]) -> Vec<String> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for story in stories {
        *seen.entry(derive_key(story)).or_default() += 1;
    }
    seen.into_iter().filter(|(_, n)| *n > 1).map(|(k, _)| k).collect()
}

/// Keyed view of `stories`. Same-timestamp stories collapse: the later one wins.
pub fn to_map(stories: &[Story]) -> StoryMap {
    let mut map = StoryMap::new();
    for story in stories {
        if let Some(previous) = map.insert(derive_key(story), story.clone()) {
            tracing::warn!(
                user_id = %previous.user_id,
                key = %derive_key(&previous),
                "story key collision, keeping the later story"
            );
        }
    }
    map
}

/// One single-entry map per story, in input order. Never collapses collisions.
pub fn to_sequence_of_maps(stories: &[Story]) -> Vec<StoryMap> {
    stories
        .iter()
        .map(|story| StoryMap::from([(derive_key(story), story.clone())]))
        .collect()
}

/// Values come out in the map's key order; callers sort if they need chronology.
pub fn from_map(aggregate: UserStoryWithMap) -> UserStory {
    UserStory {
        user_id: aggregate.user_id,
        username: aggregate.username,
        profile_image: aggregate.profile_image,
        stories: aggregate.stories.into_values().collect(),
    }
}

pub fn to_map_as_aggregate(aggregate: &UserStory) -> UserStoryWithMap {
    UserStoryWithMap {
        user_id: aggregate.user_id.clone(),
        username: aggregate.username.clone(),
        profile_image: aggregate.profile_image.clone(),
        stories: to_map(&aggregate.stories),
    }
}

impl From<UserStoryWithMap> for UserStory {
    fn from(aggregate: UserStoryWithMap) -> Self {
        from_map(aggregate)
    }
}

impl From<&UserStory> for UserStoryWithMap {
    fn from(aggregate: &UserStory) -> Self {
        to_map_as_aggregate(aggregate)
    }
}

/// Flat field mapping handed to a merge-write. Wire names come from the
/// models' serde attributes, the same ones `decode` reads back.
pub trait ToTransport {
    fn to_transport(&self) -> serde_json::Result<Document>;
}

fn to_document<T: Serialize>(value: &T) -> serde_json::Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(serde::ser::Error::custom(format!("expected a JSON object, got {}", other))),
    }
}

impl ToTransport for Story {
    fn to_transport(&self) -> serde_json::Result<Document> {
        to_document(self)
    }
}

impl ToTransport for UserStory {
    fn to_transport(&self) -> serde_json::Result<Document> {
        to_document(&to_map_as_aggregate(self))
    }
}

impl ToTransport for UserStoryWithMap {
    fn to_transport(&self) -> serde_json::Result<Document> {
        to_document(self)
    }
}

/// `{"userId", "username", "profileImage"}` of `owner`, leaving `stories` alone.
pub fn owner_patch(owner: &StoryOwner) -> serde_json::Result<Document> {
    to_document(owner)
}

/// `{"stories": {<key>: <story>, ..}}`, a merge-write touching only these keys.
pub fn stories_patch(stories: &StoryMap) -> serde_json::Result<Document> {
    let mut doc = Document::new();
    doc.insert("stories".to_string(), serde_json::to_value(stories)?);
    Ok(doc)
}

/// `{"stories": {<key>: <fields>}}`, a nested partial update of one story.
pub fn story_patch(timestamp: i64, fields: Document) -> Document {
    let mut stories = Document::new();
    stories.insert(key_for_timestamp(timestamp), Value::Object(fields));
    let mut doc = Document::new();
    doc.insert("stories".to_string(), Value::Object(stories));
    doc
}
