use rand_core::OsRng;
use sphinx_host_api::requests::{ClientRequest, ClientResponse};
use sphinx_host_api::rpc::{Transport, TransportError};
use sphinx_host_store::{Host, InProcessTransport, MemoryStore};
use sphinx_sdk::{Client, CreateError, MasterPassword, PasswordHashingMode, RuleError};

fn client() -> Client<InProcessTransport<MemoryStore>> {
    let host = Host::new(
        sphinx_oprf::PrivateKey::new_random(&mut OsRng),
        MemoryStore::new(),
    );
    Client::new(
        InProcessTransport::new(host),
        PasswordHashingMode::FastInsecure,
    )
}

fn master() -> MasterPassword {
    MasterPassword::from("my master password")
}

#[tokio::test]
async fn test_create_and_get() {
    let client = client();
    let pwd = client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .expect("fresh record");
    assert_eq!(pwd.len(), 20);

    let again = client.get(&master(), "user1", "example.com").await.unwrap();
    assert_eq!(again.as_deref(), Some(pwd.as_str()));
}

#[tokio::test]
async fn test_create_existing_returns_none() {
    let client = client();
    let pwd = client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        client
            .create(&master(), "user1", "example.com", "uld", 30)
            .await
            .unwrap(),
        None
    );
    // The original record is intact.
    assert_eq!(
        client.get(&master(), "user1", "example.com").await.unwrap(),
        Some(pwd)
    );
}

#[tokio::test]
async fn test_get_absent_returns_none() {
    let client = client();
    assert_eq!(
        client.get(&master(), "user1", "example.com").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_get_with_wrong_master_password_returns_none() {
    let client = client();
    client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        client
            .get(&MasterPassword::from("not it"), "user1", "example.com")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_change_commit_lifecycle() {
    let client = client();
    let original = client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();

    let staged = client
        .change(&master(), "user1", "example.com")
        .await
        .unwrap()
        .expect("change stages a version");
    assert_ne!(staged, original);
    assert_eq!(staged.len(), 20);

    // Still the original until committed.
    assert_eq!(
        client.get(&master(), "user1", "example.com").await.unwrap(),
        Some(original)
    );
    // Only one staged version at a time.
    assert_eq!(
        client.change(&master(), "user1", "example.com").await.unwrap(),
        None
    );

    let committed = client
        .commit(&master(), "user1", "example.com")
        .await
        .unwrap();
    assert_eq!(committed, Some(staged.clone()));
    assert_eq!(
        client.get(&master(), "user1", "example.com").await.unwrap(),
        Some(staged)
    );

    // Double commit finds nothing staged.
    assert_eq!(
        client.commit(&master(), "user1", "example.com").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_undo_restores_original() {
    let client = client();
    let original = client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();
    client
        .change(&master(), "user1", "example.com")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        client.undo(&master(), "user1", "example.com").await.unwrap(),
        Some(original.clone())
    );
    assert_eq!(
        client.get(&master(), "user1", "example.com").await.unwrap(),
        Some(original)
    );
    // Nothing left to undo.
    assert_eq!(
        client.undo(&master(), "user1", "example.com").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_delete() {
    let client = client();
    client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();

    assert!(client.delete(&master(), "user1", "example.com").await.unwrap());
    assert_eq!(
        client.get(&master(), "user1", "example.com").await.unwrap(),
        None
    );
    assert!(!client.delete(&master(), "user1", "example.com").await.unwrap());

    // The identifier is free again.
    assert!(client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_write_and_read_blobs() {
    let client = client();
    assert_eq!(
        client.read(&master(), "user1", "example.com").await.unwrap(),
        None
    );

    assert!(client
        .write(&master(), "user1", "example.com", b"first")
        .await
        .unwrap());
    assert_eq!(
        client.read(&master(), "user1", "example.com").await.unwrap(),
        Some(b"first".to_vec())
    );

    // Overwrite in place.
    assert!(client
        .write(&master(), "user1", "example.com", b"second")
        .await
        .unwrap());
    assert_eq!(
        client.read(&master(), "user1", "example.com").await.unwrap(),
        Some(b"second".to_vec())
    );
}

#[tokio::test]
async fn test_write_with_wrong_master_password_is_refused() {
    let client = client();
    client
        .write(&master(), "user1", "example.com", b"mine")
        .await
        .unwrap();
    assert!(!client
        .write(&MasterPassword::from("not it"), "user1", "example.com", b"theirs")
        .await
        .unwrap());
    assert_eq!(
        client.read(&master(), "user1", "example.com").await.unwrap(),
        Some(b"mine".to_vec())
    );
}

#[tokio::test]
async fn test_blob_and_password_records_are_separate() {
    let client = client();
    let pwd = client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();
    client
        .write(&master(), "user1", "example.com", b"notes")
        .await
        .unwrap();

    assert_eq!(
        client.get(&master(), "user1", "example.com").await.unwrap(),
        Some(pwd)
    );
    assert_eq!(
        client.read(&master(), "user1", "example.com").await.unwrap(),
        Some(b"notes".to_vec())
    );
}

#[tokio::test]
async fn test_list_users() {
    let client = client();
    assert_eq!(client.list(&master(), "example.com").await.unwrap(), None);

    client
        .create(&master(), "user2", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();
    client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        client.list(&master(), "example.com").await.unwrap().as_deref(),
        Some("user1\nuser2")
    );
    // Another host's index is untouched.
    assert_eq!(client.list(&master(), "example.org").await.unwrap(), None);

    client.delete(&master(), "user1", "example.com").await.unwrap();
    assert_eq!(
        client.list(&master(), "example.com").await.unwrap().as_deref(),
        Some("user2")
    );
}

#[tokio::test]
async fn test_list_is_private_to_the_master_password() {
    let client = client();
    client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        client
            .list(&MasterPassword::from("not it"), "example.com")
            .await
            .unwrap(),
        None
    );
}

/// Acts like a host whose record is deleted between a session's two
/// messages: every exchange is served normally except the closing one,
/// which reports the record gone.
struct VanishingRecordTransport {
    inner: InProcessTransport<MemoryStore>,
}

#[async_trait::async_trait]
impl Transport for VanishingRecordTransport {
    async fn send(&self, request: ClientRequest) -> Result<ClientResponse, TransportError> {
        use sphinx_host_api::requests::Login2Response;
        if matches!(request, ClientRequest::Login2(_)) {
            return Ok(ClientResponse::Login2(Login2Response::NotFound));
        }
        self.inner.send(request).await
    }
}

#[tokio::test]
async fn test_record_deleted_mid_session_reads_as_absent() {
    let host = Host::new(
        sphinx_oprf::PrivateKey::new_random(&mut OsRng),
        MemoryStore::new(),
    );
    let client = Client::new(
        VanishingRecordTransport {
            inner: InProcessTransport::new(host),
        },
        PasswordHashingMode::FastInsecure,
    );

    // Creation is a single exchange and goes through untouched.
    client
        .create(&master(), "user1", "example.com", "ulsd", 20)
        .await
        .unwrap()
        .unwrap();

    // The record vanishing mid-session is an absence, not a failure.
    assert_eq!(
        client.get(&master(), "user1", "example.com").await.unwrap(),
        None
    );
    assert!(!client.delete(&master(), "user1", "example.com").await.unwrap());
    assert_eq!(
        client.undo(&master(), "user1", "example.com").await.unwrap(),
        None
    );
}

/// Fails the test if any request reaches it.
struct UnreachableTransport;

#[async_trait::async_trait]
impl Transport for UnreachableTransport {
    async fn send(&self, _request: ClientRequest) -> Result<ClientResponse, TransportError> {
        panic!("rule validation must happen before any request is sent");
    }
}

#[tokio::test]
async fn test_invalid_rules_are_rejected_before_any_request() {
    let client = Client::new(UnreachableTransport, PasswordHashingMode::FastInsecure);
    assert!(matches!(
        client.create(&master(), "user1", "example.com", "asdf", 20).await,
        Err(CreateError::InvalidRules(RuleError::UnknownClass('a')))
    ));
    assert!(matches!(
        client.create(&master(), "user1", "example.com", "ulsd", 2).await,
        Err(CreateError::InvalidRules(RuleError::BadLength))
    ));
}
