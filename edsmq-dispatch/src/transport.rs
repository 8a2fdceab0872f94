use crate::request::{Method, Reply, Request};
use async_trait::async_trait;
use edsmq_http::{HttpClient, HttpError};
use std::sync::Arc;

/// Performs one attempt of a [`Request`]. Retries belong to the dispatcher.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, request: &Request) -> Result<Reply, HttpError>;
}

#[async_trait]
impl Transport for HttpClient {
    async fn execute(&self, request: &Request) -> Result<Reply, HttpError> {
        let path = request.path();
        match request.method() {
            Method::Get => self.get_json(&path, request.params()).await,
            Method::Post => self.post_form(&path, request.params()).await,
        }
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: &Request) -> Result<Reply, HttpError> {
        (**self).execute(request).await
    }
}
