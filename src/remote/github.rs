use super::{
    RemoteContent, RemoteError, RemoteObjectClient, LOOKUP_TIMEOUT_SECS, TREE_TIMEOUT_SECS,
    WRITE_TIMEOUT_SECS,
};
use crate::core::retry::classify;
use crate::models::TreeEntry;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// 错误详情中保留的响应体长度
const DETAIL_LIMIT: usize = 300;

#[derive(Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    /// 超过 1 MiB 的文件返回 `none`，内容为空
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct BlobResponse {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Deserialize)]
struct CommitResponse {
    tree: ShaRef,
}

/// GitHub REST API 实现
pub struct GitHubClient {
    client: Client,
    api_base: String,
    owner: String,
    repo: String,
    branch: String,
    name: String,
}

impl GitHubClient {
    pub fn new(
        api_base: &str,
        token: &str,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        let mut auth = HeaderValue::from_str(&format!("token {}", token.trim()))
            .map_err(|e| RemoteError::Decode(format!("无效的 token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("ghupload/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            name: format!("github://{}/{}@{}", owner, repo, branch),
        })
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            urlencoding::encode(&self.owner),
            urlencoding::encode(&self.repo),
            tail
        )
    }

    /// 逐段编码仓库路径，保留 `/`
    fn contents_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        self.repo_url(&format!("contents/{}", encoded.join("/")))
    }

    fn branch_segment(&self) -> String {
        self.branch
            .split('/')
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    async fn send(builder: RequestBuilder, timeout_secs: u64) -> Result<Response, RemoteError> {
        let resp = builder
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await?;
        Ok(resp)
    }

    /// 把非成功响应转换为分类后的错误
    async fn api_error(resp: Response) -> RemoteError {
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        let kind = classify(status, &body, &headers);
        RemoteError::Api {
            status,
            kind,
            detail: truncate(&body, DETAIL_LIMIT),
        }
    }

    async fn expect_json<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        // 读取响应体中断属于传输错误，只有 JSON 解析失败才算 Decode
        let body = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn get_contents(&self, path: &str) -> Result<Option<ContentsResponse>, RemoteError> {
        let req = self
            .client
            .get(self.contents_url(path))
            .query(&[("ref", self.branch.as_str())]);
        let resp = Self::send(req, LOOKUP_TIMEOUT_SECS).await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            _ => Self::expect_json(resp).await.map(Some),
        }
    }

    /// 通过 git blob 读取内容，不受 contents API 的 1 MiB 限制
    async fn get_blob(&self, sha: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.repo_url(&format!("git/blobs/{}", sha));
        let resp = Self::send(self.client.get(url), LOOKUP_TIMEOUT_SECS).await?;
        let blob: BlobResponse = Self::expect_json(resp).await?;
        decode_base64(&blob.content)
    }
}

/// contents 与 blob 接口返回的 base64 带换行
fn decode_base64(content: &str) -> Result<Vec<u8>, RemoteError> {
    let packed: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(packed.as_bytes())
        .map_err(|e| RemoteError::Decode(format!("base64 解码失败: {}", e)))
}

fn truncate(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl RemoteObjectClient for GitHubClient {
    async fn fetch_hash(&self, path: &str) -> Result<Option<String>, RemoteError> {
        Ok(self.get_contents(path).await?.map(|c| c.sha))
    }

    async fn fetch_content(&self, path: &str) -> Result<Option<RemoteContent>, RemoteError> {
        let Some(contents) = self.get_contents(path).await? else {
            return Ok(None);
        };
        let raw = match contents.encoding.as_deref() {
            Some("none") => self.get_blob(&contents.sha).await?,
            _ => decode_base64(&contents.content)?,
        };
        Ok(Some(RemoteContent {
            text: String::from_utf8_lossy(&raw).into_owned(),
            hash: contents.sha,
        }))
    }

    async fn write_content(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<(), RemoteError> {
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": self.branch,
        });
        if let Some(sha) = expected_hash {
            body["sha"] = json!(sha);
        }

        let req = self.client.put(self.contents_url(path)).json(&body);
        let resp = Self::send(req, WRITE_TIMEOUT_SECS).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(resp).await)
        }
    }

    async fn branch_head(&self) -> Result<String, RemoteError> {
        let url = self.repo_url(&format!("git/ref/heads/{}", self.branch_segment()));
        let resp = Self::send(self.client.get(url), LOOKUP_TIMEOUT_SECS).await?;
        let parsed: RefResponse = Self::expect_json(resp).await?;
        Ok(parsed.object.sha)
    }

    async fn commit_tree(&self, commit: &str) -> Result<String, RemoteError> {
        let url = self.repo_url(&format!("git/commits/{}", commit));
        let resp = Self::send(self.client.get(url), LOOKUP_TIMEOUT_SECS).await?;
        let parsed: CommitResponse = Self::expect_json(resp).await?;
        Ok(parsed.tree.sha)
    }

    async fn create_blob(&self, content: &[u8]) -> Result<String, RemoteError> {
        let body = json!({
            "content": STANDARD.encode(content),
            "encoding": "base64",
        });
        let req = self.client.post(self.repo_url("git/blobs")).json(&body);
        let resp = Self::send(req, WRITE_TIMEOUT_SECS).await?;
        let parsed: ShaRef = Self::expect_json(resp).await?;
        Ok(parsed.sha)
    }

    async fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String, RemoteError> {
        let tree: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "path": e.path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": e.blob,
                })
            })
            .collect();
        let body = json!({ "base_tree": base_tree, "tree": tree });

        let req = self.client.post(self.repo_url("git/trees")).json(&body);
        let resp = Self::send(req, TREE_TIMEOUT_SECS).await?;
        let parsed: ShaRef = Self::expect_json(resp).await?;
        Ok(parsed.sha)
    }

    async fn create_commit(&self, message: &str, tree: &str, parent: &str) -> Result<String, RemoteError> {
        let body = json!({
            "message": message,
            "tree": tree,
            "parents": [parent],
        });
        let req = self.client.post(self.repo_url("git/commits")).json(&body);
        let resp = Self::send(req, WRITE_TIMEOUT_SECS).await?;
        let parsed: ShaRef = Self::expect_json(resp).await?;
        Ok(parsed.sha)
    }

    async fn move_ref(&self, commit: &str) -> Result<(), RemoteError> {
        let url = self.repo_url(&format!("git/refs/heads/{}", self.branch_segment()));
        let body = json!({ "sha": commit, "force": false });
        let resp = Self::send(self.client.patch(url).json(&body), WRITE_TIMEOUT_SECS).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(resp).await)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
