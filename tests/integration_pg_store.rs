mod common;

use stories_api_kernel::store::PgDocumentStore;

#[tokio::test]
async fn postgres_store_honours_merge_contract() -> anyhow::Result<()> {
    let database_url = match std::env::var("TEST_DATABASE_URL") {
        Ok(u) => u,
        Err(_) => {
            eprintln!("SKIPPING postgres_store_honours_merge_contract: TEST_DATABASE_URL not set");
            return Ok(());
        }
    };

    let store = match PgDocumentStore::connect(&database_url).await {
        Ok(s) => s.into_arc(),
        Err(e) => {
            eprintln!("SKIPPING postgres_store_honours_merge_contract: cannot connect to Postgres: {:#}", e);
            return Ok(());
        }
    };

    assert_eq!(store.backend(), "postgres");
    common::exercise_store(&store, &common::unique_collection("stories")).await
}
