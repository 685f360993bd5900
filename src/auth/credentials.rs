use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// A named API key resolved for one adapter
///
/// The value is never shown by `Debug`.
#[derive(Debug, Clone)]
pub struct Credential {
    name: String,
    value: SecretString,
}

impl Credential {
    pub fn new(name: impl Into<String>, value: SecretString) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }
}

/// Lookup of named secrets
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, name: &str) -> Option<SecretString>;
}

/// API keys persisted as a flat JSON object of name -> key
#[derive(Debug, Clone)]
pub struct JsonFileCredentials {
    /// Path to key storage file
    file_path: PathBuf,
    /// In-memory cache of keys
    keys: Arc<RwLock<HashMap<String, SecretString>>>,
}

impl JsonFileCredentials {
    /// Load keys from file, creating an empty `{}` file if none exists
    pub fn load(file_path: impl Into<PathBuf>) -> Result<Self> {
        let file_path = file_path.into();

        let keys = if file_path.exists() {
            let content = fs::read_to_string(&file_path)
                .context("Failed to read secrets file")?;
            let raw: HashMap<String, String> = serde_json::from_str(&content)
                .context("Failed to parse secrets file")?;
            raw.into_iter()
                .map(|(name, value)| (name, SecretString::new(value)))
                .collect()
        } else {
            HashMap::new()
        };

        let store = Self {
            file_path,
            keys: Arc::new(RwLock::new(keys)),
        };

        if !store.file_path.exists() {
            store.persist()?;
            tracing::info!("Created empty secrets file at {}", store.file_path.display());
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Store a key and write the file
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        {
            let mut keys = self.keys.write()
                .expect("Secrets lock poisoned during write - cannot proceed safely");
            keys.insert(name.to_string(), SecretString::new(value.to_string()));
        }

        self.persist()
    }

    /// Remove a key and write the file
    pub fn remove(&self, name: &str) -> Result<()> {
        {
            let mut keys = self.keys.write()
                .expect("Secrets lock poisoned during write - cannot proceed safely");
            keys.remove(name);
        }

        self.persist()
    }

    /// Names of all stored keys, sorted
    pub fn names(&self) -> Vec<String> {
        let keys = self.keys.read()
            .expect("Secrets lock poisoned during read - cannot proceed safely");
        let mut names: Vec<String> = keys.keys().cloned().collect();
        names.sort();
        names
    }

    fn persist(&self) -> Result<()> {
        let keys = self.keys.read()
            .expect("Secrets lock poisoned during read - cannot proceed safely");
        let plain: BTreeMap<&str, &str> = keys
            .iter()
            .map(|(name, value)| (name.as_str(), value.expose_secret().as_str()))
            .collect();
        let json = serde_json::to_string_pretty(&plain)
            .context("Failed to serialize secrets")?;

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context("Failed to create secrets directory")?;
            }
        }

        fs::write(&self.file_path, json)
            .context("Failed to write secrets file")?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.file_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.file_path, perms)?;
        }

        Ok(())
    }
}

impl CredentialSource for JsonFileCredentials {
    fn lookup(&self, name: &str) -> Option<SecretString> {
        let keys = self.keys.read()
            .expect("Secrets lock poisoned during read - cannot proceed safely");
        keys.get(name).cloned()
    }
}

/// Keys taken from process environment variables of the same name
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, name: &str) -> Option<SecretString> {
        std::env::var(name).ok().map(SecretString::new)
    }
}

/// Fixed in-memory keys
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<String, SecretString>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.keys.insert(name.to_string(), SecretString::new(value.to_string()));
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn lookup(&self, name: &str) -> Option<SecretString> {
        self.keys.get(name).cloned()
    }
}

/// First source holding a non-empty value wins
#[derive(Default)]
pub struct ChainedCredentials {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl ChainedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl CredentialSource for ChainedCredentials {
    fn lookup(&self, name: &str) -> Option<SecretString> {
        self.sources
            .iter()
            .filter_map(|source| source.lookup(name))
            .find(|value| !value.expose_secret().trim().is_empty())
    }
}
