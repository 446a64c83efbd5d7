//! Provider discovery
//!
//! Providers live in a shared directory as `<root>/<package>/<service>.sock`.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use blocking::unblock;

use crate::error::{Error, Result};

/// A package exposing a named service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub package_family_name: String,
    pub endpoint: PathBuf,
}

/// Finds the providers of a service by name
pub trait DiscoveryService: Send + Sync {
    fn find_providers(
        &self,
        service_name: &str,
    ) -> impl Future<Output = Result<Vec<ProviderDescriptor>>> + Send;
}

/// Pick the provider to bind to: only a unique match is accepted.
pub fn select_provider<'a>(
    service_name: &str,
    providers: &'a [ProviderDescriptor],
) -> Result<&'a ProviderDescriptor> {
    match providers {
        [provider] => Ok(provider),
        [] => Err(Error::AppUnavailable {
            service: service_name.to_string(),
        }),
        many => Err(Error::AmbiguousProvider {
            service: service_name.to_string(),
            count: many.len(),
        }),
    }
}

/// Discovery over a directory of provider sockets
#[derive(Debug, Clone)]
pub struct SocketDirectory {
    root: PathBuf,
}

impl SocketDirectory {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Where `package` publishes `service_name`
    pub fn endpoint(&self, package_family_name: &str, service_name: &str) -> PathBuf {
        self.root
            .join(package_family_name)
            .join(format!("{service_name}.sock"))
    }
}

impl DiscoveryService for SocketDirectory {
    async fn find_providers(&self, service_name: &str) -> Result<Vec<ProviderDescriptor>> {
        let root = self.root.clone();
        let file_name = format!("{service_name}.sock");
        let providers = unblock(move || scan(&root, &file_name)).await?;
        tracing::debug!(service = service_name, count = providers.len(), "found providers");
        Ok(providers)
    }
}

fn scan(root: &Path, file_name: &str) -> io::Result<Vec<ProviderDescriptor>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut providers = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let endpoint = entry.path().join(file_name);
        if endpoint.exists() {
            providers.push(ProviderDescriptor {
                package_family_name: entry.file_name().to_string_lossy().into_owned(),
                endpoint,
            });
        }
    }
    providers.sort_by(|a, b| a.package_family_name.cmp(&b.package_family_name));
    Ok(providers)
}
