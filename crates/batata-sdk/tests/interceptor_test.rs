mod common;

use std::sync::Arc;
use std::time::Duration;

use batata_sdk::{
    ClientError, ConfigChangeListener, ConfigEntry, ConfigInterceptor, ConfigRequest,
    ConfigResponse, FnConfigChangeListener, FnConfigInterceptor,
};
use parking_lot::Mutex;

use common::{MockServer, connect_with, test_props, wait_until};

const DATA_KEY: &str = "test-data-key";

/// Reverses content on the way out and back in, standing in for a cipher.
fn cipher() -> Arc<dyn ConfigInterceptor> {
    Arc::new(FnConfigInterceptor::new(
        |req: Option<ConfigRequest>, resp: Option<ConfigResponse>| {
            let flip = |s: &str| s.chars().rev().collect::<String>();
            (
                req.map(|mut r| {
                    r.content = flip(&r.content);
                    r.encrypted_data_key = DATA_KEY.to_string();
                    r
                }),
                resp.map(|mut r| {
                    assert_eq!(r.encrypted_data_key, DATA_KEY);
                    r.content = flip(&r.content);
                    r
                }),
            )
        },
    ))
}

#[tokio::test]
async fn test_content_transformed_both_ways() {
    let server = MockServer::new();
    let client = connect_with(&server, test_props(), Some(cipher())).await;
    let config = client.config();
    let key = config.key("cipher-db.password", "DEFAULT_GROUP");

    config.publish(&key, "s3cret").await.unwrap();

    let (stored, data_key) = server.stored_config(&key).unwrap();
    assert_eq!(stored, "terc3s");
    assert_eq!(data_key, DATA_KEY);

    let entry = config.get_detailed(&key).await.unwrap();
    assert_eq!(entry.content, "s3cret");
    assert_eq!(entry.encrypted_data_key.as_deref(), Some(DATA_KEY));
    client.shutdown().await;
}

#[tokio::test]
async fn test_pushed_changes_are_decrypted() {
    let server = MockServer::new();
    let client = connect_with(&server, test_props(), Some(cipher())).await;
    let config = client.config();
    let key = config.key("cipher-token", "DEFAULT_GROUP");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let listener: Arc<dyn ConfigChangeListener> =
        Arc::new(FnConfigChangeListener::new(move |entry: ConfigEntry| {
            seen_clone.lock().push(entry.content);
        }));
    config.add_listener(&key, listener).await.unwrap();

    config.publish(&key, "abc").await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 1).await);
    assert_eq!(seen.lock()[0], "abc");
    client.shutdown().await;
}

#[tokio::test]
async fn test_both_slots_rejects_publish() {
    let server = MockServer::new();
    let both: Arc<dyn ConfigInterceptor> = Arc::new(FnConfigInterceptor::new(
        |req: Option<ConfigRequest>, _resp: Option<ConfigResponse>| {
            (req, Some(ConfigResponse::default()))
        },
    ));
    let client = connect_with(&server, test_props(), Some(both)).await;
    let key = client.config().key("guarded", "DEFAULT_GROUP");

    let result = client.config().publish(&key, "value").await;
    assert!(matches!(
        result,
        Err(ClientError::InterceptorContractViolation(_))
    ));
    assert_eq!(server.request_count("ConfigPublishRequest"), 0);
    assert!(server.stored_config(&key).is_none());
    client.shutdown().await;
}

#[tokio::test]
async fn test_neither_slot_rejects_read() {
    let server = MockServer::new();
    let neither: Arc<dyn ConfigInterceptor> = Arc::new(FnConfigInterceptor::new(
        |req: Option<ConfigRequest>, _resp: Option<ConfigResponse>| (req, None),
    ));
    let client = connect_with(&server, test_props(), Some(neither)).await;
    let key = client.config().key("guarded-read", "DEFAULT_GROUP");
    server.put_config(&key, "value");

    // Outbound passes through untouched, inbound returns nothing
    let result = client.config().get(&key).await;
    assert!(matches!(
        result,
        Err(ClientError::InterceptorContractViolation(_))
    ));
    client.shutdown().await;
}
