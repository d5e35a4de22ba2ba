use axum::{Router, routing::get, routing::post, routing::put, Extension};
use crate::kernel::Plugin;
use crate::plugins::communication::stories::handlers::*;
use crate::plugins::communication::stories::repo::StoryRepository;

pub struct StoriesPlugin { pub repo: StoryRepository }

impl StoriesPlugin {
    pub fn new(repo: StoryRepository) -> Self { Self { repo } }
}

#[async_trait::async_trait]
impl Plugin for StoriesPlugin {
    async fn router(&self) -> Router {
        Router::new()
            .route("/", get(list_stories))
            .route("/:user_id", get(get_user_stories).post(create_story).delete(clear_stories))
            .route("/:user_id/batch", post(create_stories))
            .route("/:user_id/prune", post(prune_stories))
            .route("/:user_id/:timestamp", axum::routing::delete(delete_story))
            .route("/:user_id/:timestamp/view", put(view_story))
            .route("/:user_id/:timestamp/like", put(like_story))
            .layer(Extension(self.repo.clone()))
    }

    fn name(&self) -> &'static str { "communication/stories" }
}
