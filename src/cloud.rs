//! Fetching sequencing files from a Google Cloud Storage bucket.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use camino::Utf8Path;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::DownloadSettings;
use crate::domain::FileExtension;
use crate::error::PushError;

const GCS_API: &str = "https://storage.googleapis.com/storage/v1";
/// Overrides the token minted from the service-account key.
const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const READ_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";
const PATTERN_LIST: &str = "filenames.txt";

pub trait CloudFetcher: Send + Sync {
    /// Copies the files for `sample_names` into the local download dir.
    /// Files already present locally are left alone.
    fn fetch(
        &self,
        settings: &DownloadSettings,
        ext: &FileExtension,
        sample_names: &[String],
    ) -> Result<(), PushError>;
}

/// `gs://bucket/blob/*{name}_*{ext}` for each sample.
pub fn object_patterns(
    bucket: &str,
    blob: &str,
    ext: &FileExtension,
    sample_names: &[String],
) -> Vec<String> {
    let blob = blob.trim_matches('/');
    sample_names
        .iter()
        .map(|name| format!("gs://{bucket}/{blob}/*{name}_*{}", ext.as_str()))
        .collect()
}

/// Whether an object's base name belongs to one of the samples.
fn wanted_object(base_name: &str, ext: &FileExtension, sample_names: &[String]) -> bool {
    base_name.ends_with(ext.as_str())
        && sample_names
            .iter()
            .any(|name| base_name.contains(&format!("{name}_")))
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

#[derive(Clone)]
pub struct SystemCloudFetcher {
    gsutil: Option<PathBuf>,
    client: Client,
}

impl SystemCloudFetcher {
    pub fn new() -> Result<Self, PushError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ncbi-batch-push/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PushError::CloudDownload(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| PushError::CloudDownload(err.to_string()))?;
        Ok(Self {
            gsutil: find_in_path("gsutil"),
            client,
        })
    }

    fn gsutil_copy(
        &self,
        settings: &DownloadSettings,
        ext: &FileExtension,
        sample_names: &[String],
    ) -> Result<(), PushError> {
        let gsutil = self
            .gsutil
            .as_ref()
            .ok_or_else(|| PushError::MissingTool("gsutil".to_string()))?;
        let dir = &settings.local_download_dir;
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| PushError::Filesystem(err.to_string()))?;

        let list_path = dir.join(PATTERN_LIST);
        let mut patterns =
            object_patterns(&settings.bucket_name, &settings.blob_name, ext, sample_names).join("\n");
        patterns.push('\n');
        fs::write(list_path.as_std_path(), patterns)
            .map_err(|err| PushError::Filesystem(format!("write {list_path}: {err}")))?;

        let mut args = Vec::new();
        if let Some(key) = &settings.credentials_path {
            args.push("-o".to_string());
            args.push(format!("Credentials:gs_service_key_file={key}"));
        }
        args.extend(["-m", "cp", "-n", "-I"].map(str::to_string));
        args.push(dir.to_string());

        let stdin = File::open(list_path.as_std_path())
            .map_err(|err| PushError::Filesystem(format!("open {list_path}: {err}")))?;
        info!("gsutil: copying {} patterns into {dir}", sample_names.len());
        run_cmd(gsutil, &args, Stdio::from(stdin))
    }

    fn api_copy(
        &self,
        settings: &DownloadSettings,
        ext: &FileExtension,
        sample_names: &[String],
    ) -> Result<(), PushError> {
        let dir = &settings.local_download_dir;
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| PushError::Filesystem(err.to_string()))?;

        let token = access_token(
            std::env::var(TOKEN_ENV).ok(),
            settings.credentials_path.as_deref(),
        )?;
        let token = token.as_deref();

        let prefix = format!("{}/", settings.blob_name.trim_matches('/'));
        let mut copied = 0usize;
        for object in self.list_objects(&settings.bucket_name, &prefix, token)? {
            let base_name = object.rsplit('/').next().unwrap_or(&object);
            if !wanted_object(base_name, ext, sample_names) {
                continue;
            }
            let target = dir.join(base_name);
            if target.as_std_path().exists() {
                debug!("{target} already present");
                continue;
            }
            self.download_object(&settings.bucket_name, &object, &target, token)?;
            copied += 1;
        }
        info!("downloaded {copied} objects into {dir}");
        Ok(())
    }

    fn get(&self, url: Url, token: Option<&str>) -> RequestBuilder {
        let request = self.client.get(url);
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<Vec<String>, PushError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = bucket_url(bucket, &[])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", prefix);
                query.append_pair("fields", "items(name),nextPageToken");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let response = self
                .get(url, token)
                .send()
                .map_err(|err| PushError::CloudDownload(err.to_string()))?;
            let response = check_status(response)?;
            let page: ObjectList = response
                .json()
                .map_err(|err| PushError::CloudDownload(err.to_string()))?;
            names.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(names)
    }

    fn download_object(
        &self,
        bucket: &str,
        object: &str,
        target: &Utf8Path,
        token: Option<&str>,
    ) -> Result<(), PushError> {
        let mut url = bucket_url(bucket, &[object])?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .get(url, token)
            .send()
            .map_err(|err| PushError::CloudDownload(err.to_string()))?;
        let mut response = check_status(response)?;

        let tmp = target.with_extension("part");
        let mut file = File::create(tmp.as_std_path())
            .map_err(|err| PushError::Filesystem(format!("create {tmp}: {err}")))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| PushError::CloudDownload(format!("{object}: {err}")))?;
        fs::rename(tmp.as_std_path(), target.as_std_path())
            .map_err(|err| PushError::Filesystem(err.to_string()))?;
        debug!("gs://{bucket}/{object} -> {target}");
        Ok(())
    }
}

impl CloudFetcher for SystemCloudFetcher {
    fn fetch(
        &self,
        settings: &DownloadSettings,
        ext: &FileExtension,
        sample_names: &[String],
    ) -> Result<(), PushError> {
        if sample_names.is_empty() {
            return Ok(());
        }
        if settings.multiprocess {
            self.gsutil_copy(settings, ext, sample_names)
        } else {
            self.api_copy(settings, ext, sample_names)
        }
    }
}

/// Bearer token for storage API calls. A non-empty `override_token` wins;
/// otherwise one is minted from the service-account key, if configured.
/// Without either, requests go out anonymously.
fn access_token(
    override_token: Option<String>,
    key: Option<&Utf8Path>,
) -> Result<Option<String>, PushError> {
    if let Some(token) = override_token.filter(|token| !token.trim().is_empty()) {
        debug!("using access token from {TOKEN_ENV}");
        return Ok(Some(token.trim().to_string()));
    }
    let Some(key) = key else {
        return Ok(None);
    };
    if !key.as_std_path().is_file() {
        return Err(PushError::CredentialsRead(key.to_path_buf()));
    }
    let account = CustomServiceAccount::from_file(key.as_std_path())
        .map_err(|err| PushError::CloudDownload(format!("service account key {key}: {err}")))?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| PushError::CloudDownload(err.to_string()))?;
    let token = runtime
        .block_on(account.token(&[READ_SCOPE]))
        .map_err(|err| PushError::CloudDownload(format!("token for {key}: {err}")))?;
    debug!("minted storage token from {key}");
    Ok(Some(token.as_str().to_string()))
}

/// `{GCS_API}/b/{bucket}/o[/{object}]` with each segment percent-encoded.
fn bucket_url(bucket: &str, object: &[&str]) -> Result<Url, PushError> {
    let mut url = Url::parse(GCS_API).map_err(|err| PushError::CloudDownload(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| PushError::CloudDownload("invalid storage API url".to_string()))?
        .extend(["b", bucket, "o"])
        .extend(object);
    Ok(url)
}

fn check_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, PushError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "storage request failed".to_string());
    Err(PushError::CloudStatus { status, message })
}

fn run_cmd(program: &Path, args: &[String], stdin: Stdio) -> Result<(), PushError> {
    let output = Command::new(program)
        .args(args)
        .stdin(stdin)
        .output()
        .map_err(|err| PushError::CloudDownload(err.to_string()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed: {}", program.display())
    } else {
        stderr
    };
    Err(PushError::CloudDownload(message))
}

pub(crate) fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
