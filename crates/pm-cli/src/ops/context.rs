//! Shared installation context.
//!
//! This module defines the `Context` struct, which groups the collaborators
//! the install pipeline needs so they can be swapped out in tests.

use std::fmt;
use std::sync::Arc;

use pm_core::catalog::Catalog;
use pm_core::io::download::Fetcher;
use pm_core::store::Store;
use pm_core::trust::TrustVerifier;
use pm_core::{Layout, Reporter};

/// Groups common state used during installation operations.
#[derive(Clone)]
pub struct Context {
    pub layout: Layout,
    pub catalog: Arc<dyn Catalog>,
    pub trust: Arc<dyn TrustVerifier>,
    pub fetcher: Fetcher,
    pub store: Store,
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("layout", &self.layout)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        layout: Layout,
        catalog: Arc<dyn Catalog>,
        trust: Arc<dyn TrustVerifier>,
        fetcher: Fetcher,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            store: Store::new(layout.clone()),
            layout,
            catalog,
            trust,
            fetcher,
            reporter,
        }
    }
}
