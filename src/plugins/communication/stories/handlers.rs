use axum::extract::rejection::PathRejection;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{Extension, Json};
use crate::http_error::AppError;
use crate::plugins::communication::shared::ListResponse;
use crate::plugins::communication::stories::aggregate;
use crate::plugins::communication::stories::models::{Story, StoryBatchCreate, StoryCreate, StoryLike, StoryOwner, UserStory};
use crate::plugins::communication::stories::repo::StoryRepository;

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub async fn list_stories(Extension(repo): Extension<StoryRepository>, Query(q): Query<ListQuery>) -> Result<Json<ListResponse<UserStory>>, AppError> {
    let page = q.page.unwrap_or(1).max(1);
    let per_page = q.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1).saturating_mul(per_page) as usize;

    let (items, total) = repo.list_page(now_ms(), per_page as usize, offset).await?;
    Ok(Json(ListResponse::new(items, page, per_page, total as i64)))
}

pub async fn get_user_stories(Extension(repo): Extension<StoryRepository>, Path(user_id): Path<String>) -> Result<Json<UserStory>, AppError> {
    let user_story = repo
        .load_active(&user_id, now_ms())
        .await?
        .ok_or_else(|| AppError::not_found(format!("no stories for user {}", user_id)))?;
    Ok(Json(user_story))
}

pub async fn create_story(Extension(repo): Extension<StoryRepository>, Path(user_id): Path<String>, Json(payload): Json<StoryCreate>) -> Result<Json<Story>, AppError> {
    let owner = StoryOwner::new(user_id, payload.username, payload.profile_image);
    let timestamp = payload.media.timestamp.unwrap_or_else(now_ms);
    let story = Story::new(&owner, timestamp, payload.media);
    repo.add_story(story.clone()).await?;
    Ok(Json(story))
}

/// Entries without a timestamp get consecutive milliseconds from now, so one
/// batch never collides with itself. Explicit duplicates are rejected.
pub async fn create_stories(Extension(repo): Extension<StoryRepository>, Path(user_id): Path<String>, Json(payload): Json<StoryBatchCreate>) -> Result<Json<UserStory>, AppError> {
    let owner = StoryOwner::new(user_id, payload.username, payload.profile_image);
    let base = now_ms();
    let stories: Vec<Story> = payload
        .stories
        .into_iter()
        .enumerate()
        .map(|(i, media)| {
            let timestamp = media.timestamp.unwrap_or(base + i as i64);
            Story::new(&owner, timestamp, media)
        })
        .collect();

    let collisions = aggregate::colliding_keys(&stories);
    if !collisions.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, format!("duplicate story keys: {}", collisions.join(", "))).with_code("duplicate_timestamp"));
    }

    repo.add_stories(&owner, &stories).await?;
    Ok(Json(UserStory::new(owner, stories)))
}

pub async fn view_story(Extension(repo): Extension<StoryRepository>, path: Result<Path<(String, i64)>, PathRejection>) -> Result<Json<Story>, AppError> {
    let Path((user_id, timestamp)) = path?;
    Ok(Json(repo.mark_viewed(&user_id, timestamp).await?))
}

pub async fn like_story(Extension(repo): Extension<StoryRepository>, path: Result<Path<(String, i64)>, PathRejection>, Json(payload): Json<StoryLike>) -> Result<Json<Story>, AppError> {
    let Path((user_id, timestamp)) = path?;
    Ok(Json(repo.set_liked(&user_id, timestamp, payload.likes).await?))
}

pub async fn delete_story(Extension(repo): Extension<StoryRepository>, path: Result<Path<(String, i64)>, PathRejection>) -> Result<StatusCode, AppError> {
    let Path((user_id, timestamp)) = path?;
    repo.remove_story(&user_id, timestamp).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn prune_stories(Extension(repo): Extension<StoryRepository>, Path(user_id): Path<String>) -> Result<Json<serde_json::Value>, AppError> {
    let removed = repo.prune_expired(&user_id, now_ms()).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

pub async fn clear_stories(Extension(repo): Extension<StoryRepository>, Path(user_id): Path<String>) -> Result<StatusCode, AppError> {
    repo.clear(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
