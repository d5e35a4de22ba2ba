pub mod aggregate;
pub mod handlers;
pub mod models;
pub mod plugin;
pub mod repo;

pub use plugin::StoriesPlugin;
pub use repo::StoryRepository;
