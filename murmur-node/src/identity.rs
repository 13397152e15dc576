//! `murmur identity` and `murmur contacts`.

use std::sync::Arc;

use dialoguer::Password;
use murmur_crypto::encryption::DEFAULT_RSA_BITS;
use murmur_crypto::identity::{Identity, IdentityParams};
use murmur_storage::contact_store::ContactStore;
use murmur_storage::key_store::KeyStore;
use murmur_storage::memory::MemoryStore;
use murmur_storage::sqlite::SqliteStore;
use murmur_storage::traits::KvStore;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::ui::{data_table, info_table, print_table, style_dim, style_success, style_warn};

/// Open the backend named by `[identity] storage`.
pub fn open_store(config: &NodeConfig) -> Result<Arc<dyn KvStore>, NodeError> {
    match config.identity.storage.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sqlite" => {
            std::fs::create_dir_all(&config.identity.data_dir)?;
            let path = config.database_path();
            debug!(path = %path.display(), "opening sqlite store");
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        other => Err(NodeError::ConfigError {
            reason: format!("unknown storage backend '{other}', expected 'memory' or 'sqlite'"),
        }),
    }
}

/// Unlock `account`, creating it first if nothing is stored under it.
/// Returns the identity and whether it was just created.
pub fn unlock(
    store: Arc<dyn KvStore>,
    account: &str,
    password: &str,
    params: IdentityParams,
) -> Result<(Identity, bool), NodeError> {
    let keys = KeyStore::new(store);
    let created = keys.load(account)?.is_none();
    let identity = Identity::load_or_create(&keys, account, password, params)?;
    Ok((identity, created))
}

fn prompt_password(account: &str, new: bool) -> Result<String, NodeError> {
    let mut prompt = Password::new().with_prompt(format!("Password for '{account}'"));
    if new {
        prompt = prompt.with_confirmation("Confirm password", "Passwords do not match");
    }
    prompt
        .interact()
        .map_err(|e| NodeError::IoError(std::io::Error::other(e)))
}

/// Create or unlock an identity and print its fingerprint.
pub fn run(config: &NodeConfig, account: Option<String>) -> Result<(), NodeError> {
    let account = account.unwrap_or_else(|| config.identity.account.clone());
    let store = open_store(config)?;
    let exists = KeyStore::new(store.clone()).load(&account)?.is_some();
    if !exists {
        println!(
            "  {}",
            style_warn().apply_to(format!("No identity for '{account}' yet, creating one."))
        );
    }
    let password = prompt_password(&account, !exists)?;
    let params = IdentityParams {
        rsa_bits: DEFAULT_RSA_BITS,
        kdf_iterations: config.identity.kdf_iterations,
    };
    let (identity, created) = unlock(store, &account, &password, params)?;

    println!();
    let verb = if created { "Created" } else { "Unlocked" };
    println!(
        "  {}",
        style_success().apply_to(format!("{verb} identity '{account}'"))
    );
    let mut table = info_table();
    table.add_row(vec!["Fingerprint".to_string(), identity.fingerprint()]);
    table.add_row(vec!["Storage".to_string(), config.identity.storage.clone()]);
    print_table(&table);
    Ok(())
}

/// Accounts with a stored identity.
pub fn accounts(store: Arc<dyn KvStore>) -> Result<Vec<String>, NodeError> {
    let mut accounts = KeyStore::new(store).accounts()?;
    accounts.sort();
    Ok(accounts)
}

/// Print the stored accounts, marking the configured default.
pub fn list_accounts(config: &NodeConfig) -> Result<(), NodeError> {
    let accounts = accounts(open_store(config)?)?;
    if accounts.is_empty() {
        println!("  {}", style_dim().apply_to("No identities stored yet."));
        return Ok(());
    }
    let mut table = data_table(&["Account", "Default"]);
    for account in accounts {
        let default = if account == config.identity.account { "yes" } else { "" };
        table.add_row(vec![account, default.to_string()]);
    }
    print_table(&table);
    Ok(())
}

/// Delete a learned identity. Returns whether one was stored under
/// `fingerprint`.
pub fn forget_contact(store: Arc<dyn KvStore>, fingerprint: &str) -> Result<bool, NodeError> {
    let contacts = ContactStore::new(store);
    if contacts.load(fingerprint)?.is_none() {
        return Ok(false);
    }
    contacts.remove(fingerprint)?;
    info!(%fingerprint, "contact forgotten");
    Ok(true)
}

/// `murmur contacts --forget`.
pub fn run_forget(config: &NodeConfig, fingerprint: &str) -> Result<(), NodeError> {
    if forget_contact(open_store(config)?, fingerprint)? {
        println!(
            "  {}",
            style_success().apply_to(format!("Forgot {fingerprint}"))
        );
    } else {
        println!(
            "  {}",
            style_warn().apply_to(format!("No identity with fingerprint {fingerprint}"))
        );
    }
    Ok(())
}

/// Print every identity the mesh has taught this node.
pub fn list_contacts(config: &NodeConfig) -> Result<(), NodeError> {
    let store = open_store(config)?;
    let records = ContactStore::new(store).load_all()?;
    if records.is_empty() {
        println!("  {}", style_dim().apply_to("No identities learned yet."));
        return Ok(());
    }

    let mut table = data_table(&["Fingerprint", "Nickname", "Aliases", "Contact"]);
    for (fingerprint, record) in &records {
        let aliases: Vec<&str> = record.other_nicknames.iter().map(String::as_str).collect();
        table.add_row(vec![
            fingerprint.clone(),
            record.nickname.clone(),
            aliases.join(", "),
            if record.registered { "yes" } else { "" }.to_string(),
        ]);
    }
    print_table(&table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::contact::PeerIdentityRecord;
    use murmur_types::error::MurmurError;

    const PARAMS: IdentityParams = IdentityParams {
        rsa_bits: 1024,
        kdf_iterations: 1000,
    };

    fn sqlite_config(dir: &std::path::Path) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.identity.data_dir = dir.to_string_lossy().into_owned();
        config
    }

    #[test]
    fn test_unlock_creates_then_reopens() {
        let tmp = tempfile::tempdir().unwrap();
        let config = sqlite_config(tmp.path());

        let (first, created) =
            unlock(open_store(&config).unwrap(), "work", "hunter2", PARAMS).unwrap();
        assert!(created);
        assert!(config.database_path().exists());

        let (again, created) =
            unlock(open_store(&config).unwrap(), "work", "hunter2", PARAMS).unwrap();
        assert!(!created);
        assert_eq!(again.fingerprint(), first.fingerprint());
    }

    #[test]
    fn test_wrong_password_is_rejected() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        unlock(store.clone(), "work", "right", PARAMS).unwrap();
        let err = unlock(store, "work", "wrong", PARAMS).err().unwrap();
        assert!(matches!(err, NodeError::IdentityError(MurmurError::DecryptionFailed { .. })));
    }

    #[test]
    fn test_accounts_are_independent() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (a, _) = unlock(store.clone(), "a", "pw", PARAMS).unwrap();
        let (b, created) = unlock(store, "b", "pw", PARAMS).unwrap();
        assert!(created);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_accounts_lists_every_unlocked_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let config = sqlite_config(tmp.path());
        assert!(accounts(open_store(&config).unwrap()).unwrap().is_empty());

        unlock(open_store(&config).unwrap(), "work", "pw", PARAMS).unwrap();
        unlock(open_store(&config).unwrap(), "home", "pw", PARAMS).unwrap();
        assert_eq!(
            accounts(open_store(&config).unwrap()).unwrap(),
            vec!["home".to_string(), "work".to_string()]
        );
    }

    #[test]
    fn test_forget_contact() {
        let tmp = tempfile::tempdir().unwrap();
        let config = sqlite_config(tmp.path());
        let record = PeerIdentityRecord::new("pk".to_string(), None, "alice".to_string());
        ContactStore::new(open_store(&config).unwrap())
            .save("f1", &record)
            .unwrap();

        assert!(forget_contact(open_store(&config).unwrap(), "f1").unwrap());
        assert!(!forget_contact(open_store(&config).unwrap(), "f1").unwrap());
        let left = ContactStore::new(open_store(&config).unwrap())
            .load_all()
            .unwrap();
        assert!(left.is_empty());
    }

    #[test]
    fn test_unknown_backend() {
        let mut config = NodeConfig::default();
        config.identity.storage = "rocksdb".to_string();
        assert!(matches!(
            open_store(&config),
            Err(NodeError::ConfigError { .. })
        ));
    }
}
