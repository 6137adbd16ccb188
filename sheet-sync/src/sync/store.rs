//! Remote file store abstraction

use anyhow::Result;
use async_trait::async_trait;

/// Where workbooks are fetched from and published to
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short description for logs, e.g. "Google Drive"
    fn describe(&self) -> String;

    /// Fetch the bytes of a file by id
    async fn download(&self, id: &str) -> Result<Vec<u8>>;

    /// Id of the file with this exact name, if any
    async fn find_by_name(&self, name: &str) -> Result<Option<String>>;

    /// Publish bytes; updates `existing_id` in place when given, otherwise
    /// creates a new file named `name`. Returns the file id.
    async fn upload(&self, bytes: Vec<u8>, name: &str, existing_id: Option<&str>) -> Result<String>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        (**self).download(id).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        (**self).find_by_name(name).await
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str, existing_id: Option<&str>) -> Result<String> {
        (**self).upload(bytes, name, existing_id).await
    }
}
