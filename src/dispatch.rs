//! Method dispatch against the file store.
//!
//! Every outcome, including store failures, becomes a [`Response`]; nothing
//! here returns an error to the connection handler.

use crate::error::ResourceError;
use crate::protocol::{Method, Request, Response, Status};
use crate::storage::FileStore;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes requests against a [`FileStore`].
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn FileStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    pub async fn dispatch(&self, request: &Request) -> Response {
        match request.method {
            Method::Get => self.get(&request.path).await,
            Method::Post => {
                let body = request.body.clone().unwrap_or_default();
                self.post(&request.path, body).await
            }
            Method::Delete => self.delete(&request.path).await,
        }
    }

    async fn get(&self, path: &str) -> Response {
        if !path.starts_with('/') {
            return Response::error(Status::NotFound);
        }
        match self.blocking(path, |store, path| store.read(&path)).await {
            Ok(contents) => Response::content(contents),
            Err(ResourceError::Forbidden) => Response::error(Status::Forbidden),
            Err(e) => {
                debug!(path, error = %e, "GET failed");
                Response::error(Status::NotFound)
            }
        }
    }

    async fn post(&self, path: &str, body: Bytes) -> Response {
        if !path.starts_with('/') {
            return Response::error(Status::Forbidden);
        }
        match self
            .blocking(path, move |store, path| store.write(&path, &body))
            .await
        {
            Ok(()) => Response::dated(Status::Created),
            Err(ResourceError::Forbidden) => Response::error(Status::Forbidden),
            Err(e) => {
                warn!(path, error = %e, "POST failed");
                Response::with_reason(Status::BadRequest, "Could not create resource")
            }
        }
    }

    async fn delete(&self, path: &str) -> Response {
        if !path.starts_with('/') {
            return Response::error(Status::Forbidden);
        }
        match self.blocking(path, |store, path| store.remove(&path)).await {
            Ok(()) => Response::dated(Status::Ok),
            Err(ResourceError::Forbidden) => Response::error(Status::Forbidden),
            Err(e) => {
                debug!(path, error = %e, "DELETE failed");
                Response::with_reason(Status::NotFound, "Could not find resource")
            }
        }
    }

    /// Run a store operation on the blocking pool.
    async fn blocking<T, F>(&self, path: &str, op: F) -> Result<T, ResourceError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FileStore, String) -> Result<T, ResourceError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let path = path.to_string();
        tokio::task::spawn_blocking(move || op(store.as_ref(), path))
            .await
            .map_err(|e| ResourceError::Io(std::io::Error::other(e)))?
    }
}
