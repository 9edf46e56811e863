//! Reading and rewriting a space's readme over WebDAV.

use std::collections::HashMap;
use reqwest::header::{HeaderMap, ETAG};
use reqwest::Client;
use url::Url;
use crate::core::{Result, UploadError};
use crate::transport::build_headers;

/// Readme descriptor attached to a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceReadme {
    pub web_dav_url: String,
    pub etag: Option<String>,
}

/// Path of `web_dav_url` relative to the WebDAV root: everything after the
/// first `dav` segment, or the whole value when there is none.
pub fn dav_path(web_dav_url: &str) -> String {
    let segments: Vec<&str> = web_dav_url.split('/').collect();
    match segments.iter().position(|segment| *segment == "dav") {
        Some(index) => segments[index + 1..].join("/"),
        None => web_dav_url.to_string(),
    }
}

pub struct ReadmeClient {
    client: Client,
    dav_root: Url,
    headers: HashMap<String, String>,
}

impl ReadmeClient {
    pub fn new(client: Client, dav_root: &str, headers: HashMap<String, String>) -> Result<Self> {
        let mut dav_root = Url::parse(dav_root)?;
        if !dav_root.path().ends_with('/') {
            let path = format!("{}/", dav_root.path());
            dav_root.set_path(&path);
        }

        Ok(Self {
            client,
            dav_root,
            headers,
        })
    }

    fn request_headers(&self) -> Result<HeaderMap> {
        build_headers(&self.headers, &HashMap::new())
    }

    pub async fn read(&self, path: &str) -> Result<String> {
        let url = self.dav_root.join(path)?;
        let response = self
            .client
            .get(url)
            .headers(self.request_headers()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::server_error(status.as_u16(), "Failed to read file contents"));
        }

        Ok(response.text().await?)
    }

    /// Returns the `ETag` of the stored content, when the server sends one.
    pub async fn write(&self, path: &str, content: &str) -> Result<Option<String>> {
        let url = self.dav_root.join(path)?;
        let response = self
            .client
            .put(url)
            .headers(self.request_headers()?)
            .body(content.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::server_error(status.as_u16(), "Failed to write file contents"));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .map(|value| value.to_str().map(str::to_string))
            .transpose()
            .map_err(|err| UploadError::invalid_header("ETag", err))?;

        Ok(etag)
    }
}

pub struct ReadmeEditor {
    client: ReadmeClient,
}

impl ReadmeEditor {
    pub fn new(client: ReadmeClient) -> Self {
        Self { client }
    }

    pub async fn open(&self, readme: &SpaceReadme) -> Result<String> {
        self.client.read(&dav_path(&readme.web_dav_url)).await
    }

    /// Store `content` and refresh the cached etag. The readme is left
    /// untouched when the write fails.
    pub async fn save(&self, readme: &mut SpaceReadme, content: &str) -> Result<()> {
        match self.client.write(&dav_path(&readme.web_dav_url), content).await {
            Ok(etag) => {
                readme.etag = etag;
                tracing::info!(path = %readme.web_dav_url, "Space description was edited successfully");
                Ok(())
            }
            Err(err) => {
                tracing::error!(path = %readme.web_dav_url, error = %err, "Failed to edit space description");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const README_URL: &str = "https://cloud.example.com/remote.php/dav/spaces/1234/.space/readme.md";

    fn editor(server: &MockServer) -> ReadmeEditor {
        let headers = HashMap::from([("Authorization".to_string(), "Bearer token".to_string())]);
        let client = ReadmeClient::new(Client::new(), &server.uri(), headers).unwrap();
        ReadmeEditor::new(client)
    }

    #[test]
    fn test_dav_path() {
        assert_eq!(dav_path(README_URL), "spaces/1234/.space/readme.md");
        assert_eq!(dav_path("spaces/1/readme.md"), "spaces/1/readme.md");
    }

    #[tokio::test]
    async fn test_open_reads_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spaces/1234/.space/readme.md"))
            .and(header("Authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Team space"))
            .expect(1)
            .mount(&server)
            .await;

        let readme = SpaceReadme {
            web_dav_url: README_URL.to_string(),
            etag: None,
        };
        let content = editor(&server).open(&readme).await.unwrap();
        assert_eq!(content, "# Team space");
    }

    #[tokio::test]
    async fn test_save_updates_etag() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/spaces/1234/.space/readme.md"))
            .and(body_string("updated"))
            .respond_with(ResponseTemplate::new(204).insert_header("ETag", "\"v2\""))
            .expect(1)
            .mount(&server)
            .await;

        let mut readme = SpaceReadme {
            web_dav_url: README_URL.to_string(),
            etag: Some("\"v1\"".to_string()),
        };
        editor(&server).save(&mut readme, "updated").await.unwrap();
        assert_eq!(readme.etag.as_deref(), Some("\"v2\""));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_etag() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let mut readme = SpaceReadme {
            web_dav_url: README_URL.to_string(),
            etag: Some("\"v1\"".to_string()),
        };
        let result = editor(&server).save(&mut readme, "updated").await;

        assert!(matches!(result, Err(UploadError::Server { status_code: 403, .. })));
        assert_eq!(readme.etag.as_deref(), Some("\"v1\""));
    }
}
