//! Implements the `Library` trait with the SharePoint REST API.
//!
//! Requests carry a bearer access token and ask for `odata=nometadata` JSON. Server-relative
//! paths are never spliced into the request path: they are passed as OData parameter aliases,
//! e.g. `GetFolderByServerRelativeUrl(@f)/Files?@f='/sites/Finance/Shared Documents/OPEX'`.

use crate::api::{Library, RemoteFile};
use crate::{utils, Result};
use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDateTime};
use reqwest::header::ACCEPT;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, trace};
use url::Url;

const ODATA_JSON: &str = "application/json;odata=nometadata";

pub(crate) struct SharePoint {
    client: reqwest::Client,
    site: Url,
    token: String,
}

impl SharePoint {
    /// `site_url` is the site root, e.g. `https://contoso.sharepoint.com/sites/Finance`.
    pub(crate) fn new(site_url: &str, token: &str) -> Result<Self> {
        let mut site = Url::parse(site_url)
            .with_context(|| format!("Invalid SharePoint site URL '{site_url}'"))?;
        if !site.path().ends_with('/') {
            let path = format!("{}/", site.path());
            site.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            site,
            token: token.to_string(),
        })
    }

    /// The URL of `_api/web/<call>` with each alias bound to a quoted OData string literal.
    fn endpoint(&self, call: &str, aliases: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .site
            .join(&format!("_api/web/{call}"))
            .with_context(|| format!("Unable to build the SharePoint URL for {call}"))?;
        if !aliases.is_empty() {
            let query: Vec<String> = aliases
                .iter()
                .map(|(name, value)| format!("{name}={}", odata_string(value)))
                .collect();
            url.set_query(Some(&query.join("&")));
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        trace!("GET {url}");
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .header(ACCEPT, ODATA_JSON)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;
        check(response)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse the SharePoint response from {url}"))
    }

    async fn post(&self, url: Url) -> Result<()> {
        trace!("POST {url}");
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .header(ACCEPT, ODATA_JSON)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Library for SharePoint {
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        let url = self.endpoint("GetFolderByServerRelativeUrl(@f)/Files", &[("@f", folder)])?;
        let list: ODataList<FileItem> = self.get_json(url).await?;
        let mut files: Vec<RemoteFile> = list
            .value
            .into_iter()
            .map(|item| RemoteFile {
                created: item.time_created.as_deref().and_then(parse_time),
                name: item.name,
                path: item.server_relative_url,
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} file(s) in {folder}", files.len());
        Ok(files)
    }

    async fn folders(&self, folder: &str) -> Result<Vec<String>> {
        let url = self.endpoint("GetFolderByServerRelativeUrl(@f)/Folders", &[("@f", folder)])?;
        let list: ODataList<FolderItem> = self.get_json(url).await?;
        Ok(list.value.into_iter().map(|f| f.name).collect())
    }

    async fn create_folder(&self, parent: &str, name: &str) -> Result<()> {
        let url = self.endpoint(
            "GetFolderByServerRelativeUrl(@f)/Folders/add(url=@n)",
            &[("@f", parent), ("@n", name)],
        )?;
        self.post(url).await
    }

    async fn download(&self, file: &RemoteFile, dest: &Path) -> Result<u64> {
        let url = self.endpoint("GetFileByServerRelativeUrl(@f)/$value", &[("@f", &file.path)])?;
        trace!("GET {url}");
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;
        let bytes = check(response)
            .await?
            .bytes()
            .await
            .with_context(|| format!("Failed to read the content of {}", file.path))?;
        utils::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        // flags=1 overwrites an existing file at the destination
        let url = self.endpoint(
            "GetFileByServerRelativeUrl(@f)/moveto(newurl=@t,flags=1)",
            &[("@f", from), ("@t", to)],
        )?;
        self.post(url).await
    }
}

#[derive(Debug, Deserialize)]
struct ODataList<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileItem {
    name: String,
    server_relative_url: String,
    #[serde(default)]
    time_created: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FolderItem {
    name: String,
}

/// Fails with the status and body of an unsuccessful response.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read response body".to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => bail!(
            "SharePoint refused {url} with status {status}, check the access token: {body}"
        ),
        _ => bail!("SharePoint request {url} failed with status {status}: {body}"),
    }
}

/// A percent-encoded OData string literal: single quotes doubled, the whole value quoted.
fn odata_string(value: &str) -> String {
    let literal = format!("'{}'", value.replace('\'', "''"));
    url::form_urlencoded::byte_serialize(literal.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn parse_time(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.naive_utc())
}
