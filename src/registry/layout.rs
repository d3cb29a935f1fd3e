// src/registry/layout.rs

use std::fs;
use std::path::{Path, PathBuf};

/// Maps service names to checkout directories under a common root.
#[derive(Debug, Clone)]
pub struct CheckoutLayout {
    root: PathBuf,
}

impl CheckoutLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `API_GATEWAY` -> `api-gateway`.
    pub fn folder_name(service: &str) -> String {
        service.to_lowercase().replace('_', "-")
    }

    pub fn checkout_path(&self, service: &str) -> PathBuf {
        self.root.join(Self::folder_name(service))
    }

    /// A service counts as cloned when its checkout directory exists and is
    /// not empty. `.git` is deliberately not required.
    pub fn is_cloned(&self, service: &str) -> bool {
        match fs::read_dir(self.checkout_path(service)) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_name_is_lowercase_kebab() {
        assert_eq!(CheckoutLayout::folder_name("API_GATEWAY"), "api-gateway");
        assert_eq!(CheckoutLayout::folder_name("web"), "web");
    }

    #[test]
    fn empty_or_missing_directory_is_not_cloned() {
        let root = tempfile::tempdir().unwrap();
        let layout = CheckoutLayout::new(root.path());
        assert!(!layout.is_cloned("MISSING"));

        fs::create_dir(root.path().join("empty")).unwrap();
        assert!(!layout.is_cloned("EMPTY"));

        fs::create_dir(root.path().join("web")).unwrap();
        fs::write(root.path().join("web/README.md"), "hi").unwrap();
        assert!(layout.is_cloned("WEB"));
    }
}
