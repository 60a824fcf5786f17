//! Exchange API credentials
//!
//! A client without a matching credential runs in read-only mode: every
//! mutating operation becomes a silent no-op.

use std::env;

/// One backend's API key pair
#[derive(Debug, Clone)]
pub struct Credential {
    pub public_key: String,
    pub secret_key: String,
    pub exchange_name: String,
}

impl Credential {
    pub fn new(
        public_key: impl Into<String>,
        secret_key: impl Into<String>,
        exchange_name: impl Into<String>,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            secret_key: secret_key.into(),
            exchange_name: exchange_name.into().to_lowercase(),
        }
    }
}

/// Injected credential registry, looked up by backend name
#[derive(Debug, Default)]
pub struct CredentialStore {
    credentials: Vec<Credential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, credential: Credential) {
        self.credentials.push(credential);
    }

    /// Read `{EXCHANGE}_PUBLIC_KEY` / `{EXCHANGE}_SECRET_KEY` for each named
    /// backend. Backends without both variables simply get no entry.
    pub fn from_env(exchanges: &[&str]) -> Self {
        let mut store = Self::new();
        for exchange in exchanges {
            let prefix = exchange.to_uppercase().replace('-', "_");
            let public = env::var(format!("{prefix}_PUBLIC_KEY")).ok();
            let secret = env::var(format!("{prefix}_SECRET_KEY")).ok();
            if let (Some(public), Some(secret)) = (public, secret) {
                store.add(Credential::new(public, secret, *exchange));
            }
        }
        store
    }

    pub fn find_by_exchange(&self, exchange_name: &str) -> Option<&Credential> {
        self.credentials
            .iter()
            .find(|credential| credential.exchange_name.eq_ignore_ascii_case(exchange_name))
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut store = CredentialStore::new();
        store.add(Credential::new("pk", "sk", "Buda"));

        assert!(store.find_by_exchange("buda").is_some());
        assert!(store.find_by_exchange("BUDA").is_some());
        assert!(store.find_by_exchange("bitso").is_none());
    }

    #[test]
    fn missing_credential_means_no_entry() {
        let store = CredentialStore::from_env(&["definitely-not-configured"]);
        assert!(store.find_by_exchange("definitely-not-configured").is_none());
    }
}
