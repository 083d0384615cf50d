use rocket::local::blocking::Client;

use roomcast::auth::{HmacTokenValidator, Identity};
use roomcast::config::Config;

pub const TEST_SECRET: &str = "integration-secret";

/// Wrapper around Client that deletes the temp DB (and upload scratch
/// directory) on drop so test files don't accumulate under /tmp.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        // Drop the client first to release the SQLite connection (WAL
        // mode holds the file open)
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
        let _ = std::fs::remove_dir_all(format!("{}.uploads", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    let db_path = format!(
        "/tmp/roomcast_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let config = Config::for_testing(&db_path, TEST_SECRET);
    let rocket = roomcast::rocket_with_config(config).expect("store should open");
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Mint a bearer token the test server will accept.
pub fn token_for(user_id: i64, username: &str) -> String {
    HmacTokenValidator::new(TEST_SECRET).issue(
        &Identity {
            user_id,
            username: username.to_string(),
        },
        chrono::Utc::now().timestamp() + 3600,
    )
}
