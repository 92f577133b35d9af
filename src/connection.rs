use std::sync::Arc;

use crate::client::DocumentClient;
use crate::document::Fields;
use crate::error::{Error, Result};
use crate::ident::DocumentIdentity;
use crate::scope::CancelScope;

/// The resources one store instance owns: a client handle, its collection
/// and prefix, and the cancellation scope all of its operations run in.
pub(crate) struct Connection {
    pub client: Arc<dyn DocumentClient>,
    /// False when the caller supplied the client; it then stays open on close.
    pub owns_client: bool,
    pub scope: CancelScope,
    pub collection: String,
    pub ident: DocumentIdentity,
}

impl Connection {
    pub fn new(
        client: Arc<dyn DocumentClient>,
        owns_client: bool,
        collection: String,
        ident: DocumentIdentity,
    ) -> Self {
        Self {
            client,
            owns_client,
            scope: CancelScope::new(),
            collection,
            ident,
        }
    }

    /// Reads one document inside the store's scope.
    pub async fn get(&self, id: &str, op: impl FnOnce() -> String) -> Result<Option<Fields>> {
        self.scope
            .run(async {
                self.client
                    .get(&self.collection, id)
                    .await
                    .map_err(|e| Error::client(op(), e))
            })
            .await
    }

    pub async fn close(&self) -> Result<()> {
        self.scope.cancel();
        if !self.owns_client {
            return Ok(());
        }
        match self.client.close().await {
            Ok(()) => Ok(()),
            Err(e) => Err(Error::client("close client", e)),
        }
    }
}
