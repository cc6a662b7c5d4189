//! HTTP implementation of [`DocumentApi`]

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{
    BatchDeleteResult, DocumentApi, DocumentDetail, DocumentSummary, JobAction, JobDetail,
    ProgressEvent, TranslateRequest,
};
use crate::error::{Result, SyncError};
use crate::pdf::Page;

/// JSON-over-HTTP client for the document server
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "GET");
        let response = self.client.get(self.url(path)).send().await?;
        decode(check(response).await?).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        debug!(path, "POST");
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        decode(check(response).await?).await
    }
}

/// Turn a non-success response into [`SyncError::Http`], keeping the server's detail.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.detail)
        .unwrap_or(body);
    Err(SyncError::Http {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl DocumentApi for HttpApi {
    async fn list_documents(&self, scope: &str) -> Result<Vec<DocumentSummary>> {
        let body: ProjectDocuments = self
            .get_json(&format!("/projects/{}/documents", scope))
            .await?;
        Ok(body.documents)
    }

    async fn get_document(&self, id: &str) -> Result<DocumentDetail> {
        let body: DocumentBody = match self.get_json(&format!("/documents/{}", id)).await {
            Err(SyncError::Http { status: 404, .. }) => {
                return Err(SyncError::document_not_found(id))
            }
            other => other?,
        };
        Ok(body.into_detail(id))
    }

    async fn get_progress(&self, id: &str) -> Result<ProgressEvent> {
        self.get_json(&format!("/documents/{}/progress", id)).await
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        debug!(document_id = %id, "DELETE");
        let response = self
            .client
            .delete(self.url(&format!("/documents/{}", id)))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<BatchDeleteResult> {
        let body = serde_json::json!({ "ids": ids });
        self.post_json("/documents/batch-delete", Some(&body)).await
    }

    async fn get_job(&self, job_id: &str) -> Result<JobDetail> {
        match self.get_json(&format!("/jobs/{}", job_id)).await {
            Err(SyncError::Http { status: 404, .. }) => Err(SyncError::job_not_found(job_id)),
            other => other,
        }
    }

    async fn control_job(&self, job_id: &str, action: JobAction) -> Result<JobDetail> {
        let path = format!("/jobs/{}/{}", job_id, action.as_str());
        match action {
            // Retry re-queues under the same id and only answers with the id.
            JobAction::Retry => {
                let _: JobCreated = self.post_json(&path, None).await?;
                self.get_job(job_id).await
            }
            _ => self.post_json(&path, None).await,
        }
    }

    async fn create_translate_job(&self, request: &TranslateRequest) -> Result<String> {
        let body = serde_json::to_value(request)?;
        let created: JobCreated = self.post_json("/jobs/translate", Some(&body)).await?;
        Ok(created.job_id)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Deserialize)]
struct ProjectDocuments {
    #[serde(default)]
    documents: Vec<DocumentSummary>,
}

#[derive(Debug, Deserialize)]
struct JobCreated {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct DocumentBody {
    #[serde(default)]
    document: Option<DocumentInfo>,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    num_pages: Option<i64>,
    #[serde(default)]
    lang_in: String,
    #[serde(default)]
    lang_out: String,
    #[serde(default)]
    status: Option<String>,
}

impl DocumentBody {
    /// A zero page count with parsed pages present means the count was not
    /// back-filled yet; the pages are authoritative.
    fn into_detail(self, requested_id: &str) -> DocumentDetail {
        let info = self.document.unwrap_or_default();
        let mut num_pages = info.num_pages.unwrap_or(0);
        if num_pages <= 0 && !self.pages.is_empty() {
            num_pages = self.pages.len() as i64;
        }
        let status = match info.status {
            Some(s) if !s.is_empty() && s != "pending" => s,
            _ if num_pages > 0 => "parsed".to_string(),
            _ => "parsing".to_string(),
        };
        DocumentDetail {
            summary: DocumentSummary {
                id: info.id.unwrap_or_else(|| requested_id.to_string()),
                title: info.title,
                num_pages: Some(num_pages),
                lang_in: info.lang_in,
                lang_out: info.lang_out,
                status,
            },
            pages: self.pages,
        }
    }
}
