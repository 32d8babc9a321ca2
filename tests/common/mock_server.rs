//! Mock Supabase helpers for integration tests

use doublecheck_sync::shared::config::SyncConfig;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// API key accepted by the mock project
pub const TEST_API_KEY: &str = "test-anon-key";

/// Configuration pointing at `server`
pub fn supabase_config(server: &MockServer) -> SyncConfig {
    SyncConfig::builder()
        .supabase(server.uri(), TEST_API_KEY)
        .schedule_retries(false)
        .drain_interval_secs(0)
        .build()
        .expect("valid supabase config")
}

/// Respond to inspection inserts with `status`, at most `times` times
pub async fn mount_inspections(server: &MockServer, status: u16, times: u64) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/inspections"))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// Respond to every storage upload with `status`
pub async fn mount_storage(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/storage/v1/object/.+"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
