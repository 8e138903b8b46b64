use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use xmldex::error::{Result, XmldexError};
use xmldex::metadata::{DocumentMetadata, LockTimeout, OPAQUE_TOKEN_SCHEME};
use xmldex::resource::{Access, DocumentRecord, NO_USER, ResourceRegistry, User};
use xmldex::storage::memory::MemoryStorage;
use xmldex::storage::{Storage, StorageInput, StorageOutput};
use xmldex::txn::TransactionManager;
use xmldex::webdav::{
    LockCoordinator, LockError, LockRequest, SC_CONFLICT, SC_LOCKED, SC_NOT_FOUND,
    SC_NOT_IMPLEMENTED, SC_UNAUTHORIZED,
};

const DOC: &str = "/db/test/a.xml";

/// Memory storage whose writes can be switched off.
#[derive(Debug)]
struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
}

impl FlakyStorage {
    fn new() -> Self {
        FlakyStorage {
            inner: MemoryStorage::new_default(),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(XmldexError::storage("device full"));
        }
        Ok(())
    }
}

impl Storage for FlakyStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.inner.open_input(name)
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.check()?;
        self.inner.create_output(name)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.inner.file_exists(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_file(name)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.inner.list_files()
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.inner.file_size(name)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.check()?;
        self.inner.rename_file(old_name, new_name)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

struct Fixture {
    storage: Arc<FlakyStorage>,
    registry: Arc<ResourceRegistry>,
    coordinator: LockCoordinator<ResourceRegistry>,
    alice: User,
    bob: User,
}

fn fixture() -> Result<Fixture> {
    let storage = Arc::new(FlakyStorage::new());
    let registry = Arc::new(ResourceRegistry::new(storage.clone()));

    let alice = User::new(2, "alice");
    let bob = User::new(3, "bob");
    registry.add_user(alice.clone());
    registry.add_user(bob.clone());
    registry.add_document(DocumentRecord::new(1, DOC))?;

    let coordinator = LockCoordinator::new(Arc::clone(&registry), Arc::new(TransactionManager::new()));
    Ok(Fixture {
        storage,
        registry,
        coordinator,
        alice,
        bob,
    })
}

#[test]
fn test_lock_is_persisted_and_discoverable() -> Result<()> {
    let f = fixture()?;

    let granted = f.coordinator.lock(&f.alice, DOC, &LockRequest::default())?;
    let uri = granted.token.token_uri().unwrap_or_default();
    assert!(uri.starts_with(OPAQUE_TOKEN_SCHEME));
    assert_eq!(granted.token.owner.as_deref(), Some("alice"));

    // Both the in-memory and the persisted metadata carry the lock
    let metadata = f.registry.metadata(DOC)?;
    assert_eq!(metadata.user_lock(), f.alice.id);
    assert_eq!(metadata.lock_token(), Some(&granted.token));
    assert_eq!(f.registry.load_metadata(DOC)?, metadata);

    let discovered = f.coordinator.discover(&f.bob, DOC)?;
    assert_eq!(discovered.as_ref(), Some(&granted));

    let xml = granted.to_xml();
    assert!(xml.contains("<D:owner>alice</D:owner>"));
    assert!(xml.contains(&format!("<D:href>{uri}</D:href>")));
    Ok(())
}

#[test]
fn test_conflicting_lock_leaves_token_untouched() -> Result<()> {
    let f = fixture()?;
    let granted = f.coordinator.lock(&f.alice, DOC, &LockRequest::default())?;

    let err = f
        .coordinator
        .lock(&f.bob, DOC, &LockRequest::default())
        .unwrap_err();
    assert_eq!(err.status_code(), SC_LOCKED);
    assert!(matches!(&err, LockError::Locked { holder, .. } if holder == "alice"));

    let metadata = f.registry.metadata(DOC)?;
    assert_eq!(metadata.user_lock(), f.alice.id);
    assert_eq!(metadata.lock_token(), Some(&granted.token));
    Ok(())
}

#[test]
fn test_same_owner_relock_regrants() -> Result<()> {
    let f = fixture()?;
    let first = f.coordinator.lock(&f.alice, DOC, &LockRequest::default())?;
    let second = f.coordinator.lock(
        &f.alice,
        DOC,
        &LockRequest::default().with_timeout(LockTimeout::Seconds(600)),
    )?;

    assert_ne!(first.token.opaque_token, second.token.opaque_token);
    assert_eq!(second.token.timeout, LockTimeout::Seconds(600));
    assert_eq!(f.registry.metadata(DOC)?.lock_token(), Some(&second.token));
    Ok(())
}

#[test]
fn test_unlock() -> Result<()> {
    let f = fixture()?;

    let not_locked = f.coordinator.unlock(&f.alice, DOC, "anything").unwrap_err();
    assert_eq!(not_locked.status_code(), SC_CONFLICT);

    let granted = f.coordinator.lock(&f.alice, DOC, &LockRequest::default())?;
    let uri = granted.token.token_uri().unwrap_or_default();

    let by_other = f.coordinator.unlock(&f.bob, DOC, &uri).unwrap_err();
    assert_eq!(by_other.status_code(), SC_LOCKED);

    let wrong_token = f
        .coordinator
        .unlock(&f.alice, DOC, "opaquelocktoken:00000000-0000-0000-0000-000000000000")
        .unwrap_err();
    assert_eq!(wrong_token.status_code(), SC_CONFLICT);

    f.coordinator.unlock(&f.alice, DOC, &format!("<{uri}>"))?;
    let metadata = f.registry.metadata(DOC)?;
    assert_eq!(metadata.user_lock(), NO_USER);
    assert!(metadata.lock_token().is_none());

    // Now bob can take it
    f.coordinator.lock(&f.bob, DOC, &LockRequest::default())?;
    Ok(())
}

#[test]
fn test_status_codes() -> Result<()> {
    let f = fixture()?;
    let private = Access::Users([f.alice.id].into_iter().collect());
    f.registry
        .add_document(DocumentRecord::new(2, "/db/test/private.xml").with_access(private))?;

    let missing = f
        .coordinator
        .lock(&f.alice, "/db/test/missing.xml", &LockRequest::default())
        .unwrap_err();
    assert_eq!(missing.status_code(), SC_NOT_FOUND);

    let collection = f
        .coordinator
        .lock(&f.alice, "/db/test", &LockRequest::default())
        .unwrap_err();
    assert_eq!(collection.status_code(), SC_NOT_IMPLEMENTED);

    let shared = f
        .coordinator
        .lock(&f.alice, DOC, &LockRequest::shared())
        .unwrap_err();
    assert_eq!(shared.status_code(), SC_NOT_IMPLEMENTED);
    assert!(f.registry.metadata(DOC)?.lock_token().is_none());

    let denied = f
        .coordinator
        .lock(&f.bob, "/db/test/private.xml", &LockRequest::default())
        .unwrap_err();
    assert_eq!(denied.status_code(), SC_UNAUTHORIZED);
    Ok(())
}

#[test]
fn test_failed_commit_keeps_previous_state() -> Result<()> {
    let f = fixture()?;
    let before: DocumentMetadata = f.registry.metadata(DOC)?;

    f.storage.fail_writes.store(true, Ordering::SeqCst);
    let err = f
        .coordinator
        .lock(&f.alice, DOC, &LockRequest::default())
        .unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert_eq!(f.registry.metadata(DOC)?, before);

    // The update lock was released, so a later attempt goes through
    f.storage.fail_writes.store(false, Ordering::SeqCst);
    f.coordinator.lock(&f.alice, DOC, &LockRequest::default())?;
    assert_eq!(f.registry.load_metadata(DOC)?.user_lock(), f.alice.id);
    Ok(())
}

#[test]
fn test_concurrent_lock_attempts_grant_exactly_one() -> Result<()> {
    let f = fixture()?;
    let users: Vec<User> = (10..18).map(|id| User::new(id, format!("user{id}"))).collect();
    for user in &users {
        f.registry.add_user(user.clone());
    }

    let outcomes: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = users
            .iter()
            .map(|user| {
                let coordinator = &f.coordinator;
                scope.spawn(move || coordinator.lock(user, DOC, &LockRequest::default()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| err.status_code() == SC_LOCKED)
    );

    let holder = f.registry.metadata(DOC)?.user_lock();
    assert_eq!(winners[0].token.owner.as_deref(), Some(format!("user{holder}").as_str()));
    Ok(())
}
