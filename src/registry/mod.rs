//! OCI distribution client for the promote stage
//!
//! Retagging is a pure registry operation: the promote stage copies the
//! verified manifest (and any blobs the destination is missing) to the
//! release and latest tags, then deletes the unverified tag. No image
//! contents ever touch the runner's disk.

mod auth;
mod mock;

pub use mock::MockRegistry;

use crate::config::{PipelineConfig, RegistryCredentials};
use async_trait::async_trait;
use crate::reference::{Digest, ImageReference, ReferenceError};
use auth::Challenge;
use bytes::Bytes;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication to {registry} failed: {message}")]
    Auth { registry: String, message: String },

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: StatusCode, url: String },

    #[error("Manifest not found for {0}")]
    ManifestMissing(String),

    #[error("Digest mismatch for {reference}: expected {expected}, got {actual}")]
    DigestMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to load CA bundle {path}: {message}")]
    CaCert { path: PathBuf, message: String },

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

/// A fetched manifest: media type, digest and raw bytes.
///
/// The bytes are kept verbatim because re-serializing would change the
/// digest.
#[derive(Debug, Clone)]
pub struct ManifestRef {
    pub media_type: String,
    pub digest: Digest,
    pub bytes: Bytes,
}

impl ManifestRef {
    /// Whether this is a manifest list / OCI index.
    pub fn is_index(&self) -> bool {
        self.media_type.contains("manifest.list") || self.media_type.contains("image.index")
    }
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct ImageManifest {
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct ManifestIndex {
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

/// The registry operations the promote stage depends on.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Copies `src` (manifest and blobs) to `dst`, returning the digest.
    async fn copy_image(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
    ) -> Result<Digest, RegistryError>;

    /// Deletes a tag; missing tags are tolerated.
    async fn delete_tag(
        &self,
        image: &ImageReference,
        allow_digest_fallback: bool,
    ) -> Result<(), RegistryError>;
}

pub struct RegistryClient {
    http: reqwest::Client,
    credentials: HashMap<String, RegistryCredentials>,
    // Bearer tokens cached per registry/repository scope.
    tokens: Mutex<HashMap<String, String>>,
}

impl RegistryClient {
    pub fn new(ca_cert: Option<&Path>) -> Result<Self, RegistryError> {
        let mut builder = reqwest::Client::builder();

        if let Some(path) = ca_cert {
            let pem = std::fs::read(path).map_err(|e| RegistryError::CaCert {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                RegistryError::CaCert {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(Self {
            http: builder.build()?,
            credentials: HashMap::new(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Client configured with the pipeline's registries and CA bundle.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, RegistryError> {
        let mut client = Self::new(config.ca_cert.as_deref())?;
        if let Some(credentials) = &config.internal_credentials {
            client.add_credentials(&config.internal_registry, credentials.clone());
        }
        if let Some(credentials) = &config.external_credentials {
            client.add_credentials(&config.external_registry, credentials.clone());
        }
        Ok(client)
    }

    pub fn add_credentials(&mut self, registry: &str, credentials: RegistryCredentials) {
        self.credentials.insert(registry.to_string(), credentials);
    }

    /// Resolves a tag to its content digest.
    pub async fn resolve_tag(&self, image: &ImageReference) -> Result<Digest, RegistryError> {
        let url = manifest_url(&image.registry, &image.repository, &image.tag);
        let response = self
            .send(&image.registry, &image.repository, || {
                self.http
                    .head(&url)
                    .header(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT))
            })
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::ManifestMissing(image.to_string()))
            }
            status => return Err(RegistryError::UnexpectedStatus { status, url }),
        }

        if let Some(digest) = header_digest(&response) {
            return Ok(digest?);
        }

        // Registries are required to send Docker-Content-Digest, but fall
        // back to hashing the manifest body if one does not.
        let manifest = self
            .get_manifest_ref(&image.registry, &image.repository, &image.tag)
            .await?;
        Ok(manifest.digest)
    }

    pub async fn get_manifest(&self, image: &ImageReference) -> Result<ManifestRef, RegistryError> {
        self.get_manifest_ref(&image.registry, &image.repository, &image.tag)
            .await
    }

    async fn get_manifest_ref(
        &self,
        registry: &str,
        repository: &str,
        reference: &str,
    ) -> Result<ManifestRef, RegistryError> {
        let url = manifest_url(registry, repository, reference);
        let response = self
            .send(registry, repository, || {
                self.http
                    .get(&url)
                    .header(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT))
            })
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::ManifestMissing(format!(
                    "{registry}/{repository}:{reference}"
                )))
            }
            status => return Err(RegistryError::UnexpectedStatus { status, url }),
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/vnd.docker.distribution.manifest.v2+json")
            .to_string();
        let header = header_digest(&response).transpose()?;
        let bytes = response.bytes().await?;
        let digest = match header {
            Some(digest) => digest,
            None => Digest::of_bytes(&bytes),
        };

        Ok(ManifestRef {
            media_type,
            digest,
            bytes,
        })
    }

    async fn put_manifest(
        &self,
        registry: &str,
        repository: &str,
        reference: &str,
        manifest: &ManifestRef,
    ) -> Result<(), RegistryError> {
        let url = manifest_url(registry, repository, reference);
        let media_type = manifest.media_type.clone();
        let body = manifest.bytes.clone();
        let response = self
            .send(registry, repository, || {
                self.http
                    .put(&url)
                    .header(CONTENT_TYPE, media_type.clone())
                    .body(body.clone())
            })
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::ACCEPTED => Ok(()),
            status => Err(RegistryError::UnexpectedStatus { status, url }),
        }
    }

    async fn blob_exists(
        &self,
        registry: &str,
        repository: &str,
        digest: &Digest,
    ) -> Result<bool, RegistryError> {
        let url = blob_url(registry, repository, digest);
        let response = self
            .send(registry, repository, || self.http.head(&url))
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RegistryError::UnexpectedStatus { status, url }),
        }
    }

    /// Cross-repository blob mount within one registry. Returns whether the
    /// registry completed the mount.
    async fn mount_blob(
        &self,
        registry: &str,
        repository: &str,
        digest: &Digest,
        from_repository: &str,
    ) -> Result<bool, RegistryError> {
        let url = format!(
            "{}/{}/blobs/uploads/?mount={}&from={}",
            base_url(registry),
            repository,
            digest,
            from_repository
        );
        let response = self
            .send(registry, repository, || self.http.post(&url))
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(true),
            // The registry opened an upload session instead of mounting.
            StatusCode::ACCEPTED => Ok(false),
            status => Err(RegistryError::UnexpectedStatus { status, url }),
        }
    }

    /// Opens a monolithic upload session, returning the PUT url with the
    /// `digest` parameter appended.
    async fn start_blob_upload(
        &self,
        registry: &str,
        repository: &str,
        digest: &Digest,
    ) -> Result<String, RegistryError> {
        let start_url = format!("{}/{}/blobs/uploads/", base_url(registry), repository);
        let response = self
            .send(registry, repository, || self.http.post(&start_url))
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(RegistryError::UnexpectedStatus {
                status: response.status(),
                url: start_url,
            });
        }

        let location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .map(|l| absolute_location(registry, l))
            .ok_or_else(|| RegistryError::UnexpectedStatus {
                status: response.status(),
                url: start_url.clone(),
            })?;

        let separator = if location.contains('?') { '&' } else { '?' };
        Ok(format!("{location}{separator}digest={digest}"))
    }

    /// Streams one blob from `src` to `dst` without buffering it, hashing
    /// the bytes in flight to verify the transfer end to end.
    async fn transfer_blob(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
        digest: &Digest,
    ) -> Result<(), RegistryError> {
        // The session POST negotiates auth for the destination scope, so
        // the one-shot streamed PUT below never needs the retry path.
        let put_url = self
            .start_blob_upload(&dst.registry, &dst.repository, digest)
            .await?;

        let get_url = blob_url(&src.registry, &src.repository, digest);
        let response = self
            .send(&src.registry, &src.repository, || self.http.get(&get_url))
            .await?;
        if response.status() != StatusCode::OK {
            return Err(RegistryError::UnexpectedStatus {
                status: response.status(),
                url: get_url,
            });
        }
        let length = response.content_length();

        let hasher = Arc::new(StdMutex::new(Sha256::new()));
        let tap = Arc::clone(&hasher);
        let stream = response
            .bytes_stream()
            .inspect_ok(move |chunk| tap.lock().expect("hasher poisoned").update(chunk));

        let mut request = self
            .http
            .put(&put_url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(stream));
        if let Some(length) = length {
            request = request.header(CONTENT_LENGTH, length);
        }
        let request = self.authorize(&dst.registry, &dst.repository, request).await;

        let response = request.send().await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => {}
            status => {
                return Err(RegistryError::UnexpectedStatus {
                    status,
                    url: put_url,
                })
            }
        }

        let hash = hasher.lock().expect("hasher poisoned").clone().finalize();
        let actual = format!("sha256:{}", hex::encode(hash));
        if actual != digest.as_str() {
            return Err(RegistryError::DigestMismatch {
                reference: get_url,
                expected: digest.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Copies an image (manifest plus any missing blobs) to another
    /// reference. Handles manifest lists by copying every child manifest
    /// before the index. Returns the copied digest.
    pub async fn copy_image(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
    ) -> Result<Digest, RegistryError> {
        info!(src = %src, dst = %dst, "Copying image");
        let manifest = self.get_manifest(src).await?;
        self.copy_manifest_tree(src, dst, &manifest).await?;
        self.put_manifest(&dst.registry, &dst.repository, &dst.tag, &manifest)
            .await?;
        info!(dst = %dst, digest = %manifest.digest, "Image copied");
        Ok(manifest.digest)
    }

    // Recursion depth is bounded by the manifest format itself (an index's
    // children are plain manifests), so one level of boxing suffices.
    async fn copy_manifest_tree(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
        manifest: &ManifestRef,
    ) -> Result<(), RegistryError> {
        if manifest.is_index() {
            let index: ManifestIndex = serde_json::from_slice(&manifest.bytes)?;
            for child in &index.manifests {
                let digest = Digest::parse(&child.digest)?;
                let child_manifest = self
                    .get_manifest_ref(&src.registry, &src.repository, digest.as_str())
                    .await?;
                self.copy_blobs(src, dst, &child_manifest).await?;
                self.put_manifest(&dst.registry, &dst.repository, digest.as_str(), &child_manifest)
                    .await?;
            }
            Ok(())
        } else {
            self.copy_blobs(src, dst, manifest).await
        }
    }

    async fn copy_blobs(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
        manifest: &ManifestRef,
    ) -> Result<(), RegistryError> {
        let parsed: ImageManifest = serde_json::from_slice(&manifest.bytes)?;
        let mut digests: Vec<Digest> = Vec::new();
        if let Some(config) = parsed.config {
            digests.push(Digest::parse(&config.digest)?);
        }
        for layer in parsed.layers {
            digests.push(Digest::parse(&layer.digest)?);
        }

        for digest in digests {
            if self
                .blob_exists(&dst.registry, &dst.repository, &digest)
                .await?
            {
                debug!(%digest, "Blob already present, skipping");
                continue;
            }

            if src.registry == dst.registry
                && self
                    .mount_blob(&dst.registry, &dst.repository, &digest, &src.repository)
                    .await
                    .unwrap_or(false)
            {
                debug!(%digest, "Blob mounted across repositories");
                continue;
            }

            debug!(%digest, "Streaming blob");
            self.transfer_blob(src, dst, &digest).await?;
        }
        Ok(())
    }

    /// Deletes a tag. Idempotent: a missing tag is success with a warning.
    ///
    /// Registries that only support deletion by digest answer 405; deleting
    /// by digest drops every tag pointing at that digest, so the fallback
    /// is taken only when the caller allows it.
    pub async fn delete_tag(
        &self,
        image: &ImageReference,
        allow_digest_fallback: bool,
    ) -> Result<(), RegistryError> {
        let url = manifest_url(&image.registry, &image.repository, &image.tag);
        let response = self
            .send(&image.registry, &image.repository, || {
                self.http.delete(&url)
            })
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK | StatusCode::NO_CONTENT => {
                info!(image = %image, "Tag deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                warn!(image = %image, "Tag already absent, nothing to delete");
                Ok(())
            }
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::BAD_REQUEST
                if allow_digest_fallback =>
            {
                let digest = self.resolve_tag(image).await?;
                debug!(image = %image, %digest, "Falling back to digest deletion");
                self.delete_digest(image, &digest).await
            }
            StatusCode::METHOD_NOT_ALLOWED => {
                warn!(
                    image = %image,
                    "Registry does not support tag deletion and digest deletion would drop promoted tags, skipping"
                );
                Ok(())
            }
            status => Err(RegistryError::UnexpectedStatus { status, url }),
        }
    }

    async fn delete_digest(
        &self,
        image: &ImageReference,
        digest: &Digest,
    ) -> Result<(), RegistryError> {
        let url = manifest_url(&image.registry, &image.repository, digest.as_str());
        let response = self
            .send(&image.registry, &image.repository, || {
                self.http.delete(&url)
            })
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK | StatusCode::NO_CONTENT => {
                info!(image = %image, %digest, "Manifest deleted by digest");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                warn!(image = %image, "Manifest already absent");
                Ok(())
            }
            status => Err(RegistryError::UnexpectedStatus { status, url }),
        }
    }

    /// Attaches the cached token for the scope or falls back to basic auth.
    async fn authorize(
        &self,
        registry: &str,
        repository: &str,
        request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        let scope_key = format!("{registry}/{repository}");
        if let Some(token) = self.tokens.lock().await.get(&scope_key) {
            request.bearer_auth(token)
        } else if let Some(credentials) = self.credentials.get(registry) {
            request.basic_auth(&credentials.username, Some(&credentials.password))
        } else {
            request
        }
    }

    /// Sends a request, answering an authentication challenge once.
    async fn send<F>(
        &self,
        registry: &str,
        repository: &str,
        build: F,
    ) -> Result<Response, RegistryError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let scope_key = format!("{registry}/{repository}");
        let credentials = self.credentials.get(registry);

        let request = self.authorize(registry, repository, build()).await;
        let response = request.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(auth::parse_challenge)
            .ok_or_else(|| RegistryError::Auth {
                registry: registry.to_string(),
                message: "401 without a parsable WWW-Authenticate challenge".to_string(),
            })?;

        let retry = match challenge {
            Challenge::Basic => {
                let credentials = credentials.ok_or_else(|| RegistryError::Auth {
                    registry: registry.to_string(),
                    message: "registry requires basic auth but no credentials are configured"
                        .to_string(),
                })?;
                build().basic_auth(&credentials.username, Some(&credentials.password))
            }
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let challenge = Challenge::Bearer {
                    realm,
                    service,
                    scope: scope
                        .or_else(|| Some(format!("repository:{repository}:pull,push"))),
                };
                let token = auth::fetch_token(&self.http, &challenge, credentials)
                    .await?
                    .ok_or_else(|| RegistryError::Auth {
                        registry: registry.to_string(),
                        message: "token endpoint returned no token".to_string(),
                    })?;
                self.tokens
                    .lock()
                    .await
                    .insert(scope_key.clone(), token.clone());
                build().bearer_auth(token)
            }
        };

        let response = retry.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.lock().await.remove(&scope_key);
            return Err(RegistryError::Auth {
                registry: registry.to_string(),
                message: "credentials rejected after answering the challenge".to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    async fn copy_image(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
    ) -> Result<Digest, RegistryError> {
        RegistryClient::copy_image(self, src, dst).await
    }

    async fn delete_tag(
        &self,
        image: &ImageReference,
        allow_digest_fallback: bool,
    ) -> Result<(), RegistryError> {
        RegistryClient::delete_tag(self, image, allow_digest_fallback).await
    }
}

fn base_url(registry: &str) -> String {
    // Plain HTTP only for loopback registries (local testing); everything
    // else is TLS.
    let scheme = if registry.starts_with("localhost") || registry.starts_with("127.") {
        "http"
    } else {
        "https"
    };
    format!("{scheme}://{registry}/v2")
}

fn manifest_url(registry: &str, repository: &str, reference: &str) -> String {
    format!("{}/{}/manifests/{}", base_url(registry), repository, reference)
}

fn blob_url(registry: &str, repository: &str, digest: &Digest) -> String {
    format!("{}/{}/blobs/{}", base_url(registry), repository, digest)
}

fn absolute_location(registry: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else {
        let base = base_url(registry);
        let origin = base.trim_end_matches("/v2");
        format!("{}{}", origin, location)
    }
}

fn header_digest(response: &Response) -> Option<Result<Digest, ReferenceError>> {
    response
        .headers()
        .get("Docker-Content-Digest")
        .and_then(|v| v.to_str().ok())
        .map(Digest::parse)
}
