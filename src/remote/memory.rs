//! 内存中的远程仓库实现，主要用于测试
//!
//! 对象 id 使用内容的 blake3 hash；分支只有一个，写入即前移。支持按操作注入失败。

use super::{RemoteContent, RemoteError, RemoteObjectClient};
use crate::core::retry::ErrorKind;
use crate::models::TreeEntry;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 远程操作类型（用于调用记录和失败注入）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    FetchHash,
    FetchContent,
    WriteContent,
    BranchHead,
    CommitTree,
    CreateBlob,
    CreateTree,
    CreateCommit,
    MoveRef,
}

impl RemoteOp {
    fn is_write(&self) -> bool {
        matches!(
            self,
            RemoteOp::WriteContent
                | RemoteOp::CreateBlob
                | RemoteOp::CreateTree
                | RemoteOp::CreateCommit
                | RemoteOp::MoveRef
        )
    }
}

#[derive(Debug, Clone)]
struct Commit {
    tree: String,
    parent: Option<String>,
    message: String,
}

type CallHook = Arc<dyn Fn(RemoteOp) + Send + Sync>;

struct State {
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, BTreeMap<String, String>>,
    commits: HashMap<String, Commit>,
    head: String,
    faults: HashMap<RemoteOp, VecDeque<ErrorKind>>,
    calls: Vec<RemoteOp>,
    seq: u64,
}

impl State {
    fn head_tree(&self) -> &BTreeMap<String, String> {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.commits
            .get(&self.head)
            .and_then(|c| self.trees.get(&c.tree))
            .unwrap_or(&EMPTY)
    }

    fn put_blob(&mut self, content: &[u8]) -> String {
        let id = blake3::hash(content).to_hex().to_string();
        self.blobs.insert(id.clone(), content.to_vec());
        id
    }

    fn put_tree(&mut self, tree: BTreeMap<String, String>) -> String {
        let mut hasher = blake3::Hasher::new();
        for (path, blob) in &tree {
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            hasher.update(blob.as_bytes());
            hasher.update(&[b'\n']);
        }
        let id = hasher.finalize().to_hex().to_string();
        self.trees.insert(id.clone(), tree);
        id
    }

    fn put_commit(&mut self, tree: String, parent: Option<String>, message: &str) -> String {
        self.seq += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(tree.as_bytes());
        hasher.update(parent.as_deref().unwrap_or("").as_bytes());
        hasher.update(message.as_bytes());
        hasher.update(&self.seq.to_le_bytes());
        let id = hasher.finalize().to_hex().to_string();
        self.commits.insert(
            id.clone(),
            Commit {
                tree,
                parent,
                message: message.to_string(),
            },
        );
        id
    }

    /// 在当前 head 之上提交一个文件
    fn commit_file(&mut self, path: &str, content: &[u8], message: &str) {
        let blob = self.put_blob(content);
        let mut tree = self.head_tree().clone();
        tree.insert(path.to_string(), blob);
        let tree_id = self.put_tree(tree);
        let parent = Some(self.head.clone());
        self.head = self.put_commit(tree_id, parent, message);
    }
}

/// 内存远程仓库
pub struct MemoryRemote {
    state: Mutex<State>,
    hook: Mutex<Option<CallHook>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let mut state = State {
            blobs: HashMap::new(),
            trees: HashMap::new(),
            commits: HashMap::new(),
            head: String::new(),
            faults: HashMap::new(),
            calls: Vec::new(),
            seq: 0,
        };
        let tree = state.put_tree(BTreeMap::new());
        state.head = state.put_commit(tree, None, "init");

        Self {
            state: Mutex::new(state),
            hook: Mutex::new(None),
        }
    }

    /// 预置一个文件（不计入调用记录）
    pub fn with_file(self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.put_file(path, content);
        self
    }

    /// 模拟其他客户端对分支的修改
    pub fn put_file(&self, path: &str, content: impl AsRef<[u8]>) {
        self.lock().commit_file(path, content.as_ref(), "external change");
    }

    /// 让接下来 `times` 次 `op` 调用以 `kind` 失败
    pub fn fail_next(&self, op: RemoteOp, kind: ErrorKind, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(op).or_default();
        queue.extend(std::iter::repeat(kind).take(times));
    }

    /// 每次调用成功后执行的回调
    pub fn on_success(&self, hook: impl Fn(RemoteOp) + Send + Sync + 'static) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        let blob = state.head_tree().get(path)?;
        state.blobs.get(blob).cloned()
    }

    pub fn file_text(&self, path: &str) -> Option<String> {
        self.file(path)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().head_tree().keys().cloned().collect()
    }

    pub fn head(&self) -> String {
        self.lock().head.clone()
    }

    pub fn head_message(&self) -> String {
        let state = self.lock();
        state
            .commits
            .get(&state.head)
            .map(|c| c.message.clone())
            .unwrap_or_default()
    }

    /// 从 head 回溯到初始提交的提交数（不含初始提交）
    pub fn commit_count(&self) -> usize {
        let state = self.lock();
        let mut count = 0;
        let mut cursor = state.commits.get(&state.head);
        while let Some(commit) = cursor {
            match &commit.parent {
                Some(parent) => {
                    count += 1;
                    cursor = state.commits.get(parent);
                }
                None => break,
            }
        }
        count
    }

    pub fn calls(&self) -> Vec<RemoteOp> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: RemoteOp) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// 所有写类调用次数
    pub fn write_calls(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_write()).count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 记录调用并取出注入的失败
    fn enter(&self, op: RemoteOp, state: &mut State) -> Result<(), RemoteError> {
        state.calls.push(op);
        let fault = state.faults.get_mut(&op).and_then(|q| q.pop_front());
        match fault {
            Some(kind) => Err(injected(kind)),
            None => Ok(()),
        }
    }

    fn finish<T>(&self, op: RemoteOp, result: Result<T, RemoteError>) -> Result<T, RemoteError> {
        if result.is_ok() {
            let hook = self
                .hook
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(hook) = hook {
                hook(op);
            }
        }
        result
    }

    fn run<T>(
        &self,
        op: RemoteOp,
        f: impl FnOnce(&mut State) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let result = {
            let mut state = self.lock();
            self.enter(op, &mut state)
                .and_then(|_| f(&mut *state))
        };
        self.finish(op, result)
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn injected(kind: ErrorKind) -> RemoteError {
    let status = match kind {
        ErrorKind::RateLimited => 429,
        ErrorKind::Conflict => 409,
        ErrorKind::ServerError => 502,
        ErrorKind::Network => return RemoteError::Network("connection reset (injected)".into()),
        ErrorKind::Client => 422,
    };
    RemoteError::Api {
        status,
        kind,
        detail: "injected failure".into(),
    }
}

fn client_error(status: u16, detail: &str) -> RemoteError {
    RemoteError::Api {
        status,
        kind: ErrorKind::Client,
        detail: detail.to_string(),
    }
}

#[async_trait]
impl RemoteObjectClient for MemoryRemote {
    async fn fetch_hash(&self, path: &str) -> Result<Option<String>, RemoteError> {
        self.run(RemoteOp::FetchHash, |state| {
            Ok(state.head_tree().get(path).cloned())
        })
    }

    async fn fetch_content(&self, path: &str) -> Result<Option<RemoteContent>, RemoteError> {
        self.run(RemoteOp::FetchContent, |state| {
            let Some(hash) = state.head_tree().get(path).cloned() else {
                return Ok(None);
            };
            let bytes = state.blobs.get(&hash).cloned().unwrap_or_default();
            Ok(Some(RemoteContent {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                hash,
            }))
        })
    }

    async fn write_content(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<(), RemoteError> {
        self.run(RemoteOp::WriteContent, |state| {
            let current = state.head_tree().get(path).map(String::as_str);
            if current != expected_hash {
                return Err(RemoteError::Api {
                    status: 409,
                    kind: ErrorKind::Conflict,
                    detail: format!("{} does not match", path),
                });
            }
            state.commit_file(path, content, message);
            Ok(())
        })
    }

    async fn branch_head(&self) -> Result<String, RemoteError> {
        self.run(RemoteOp::BranchHead, |state| Ok(state.head.clone()))
    }

    async fn commit_tree(&self, commit: &str) -> Result<String, RemoteError> {
        self.run(RemoteOp::CommitTree, |state| {
            state
                .commits
                .get(commit)
                .map(|c| c.tree.clone())
                .ok_or_else(|| client_error(404, "commit not found"))
        })
    }

    async fn create_blob(&self, content: &[u8]) -> Result<String, RemoteError> {
        self.run(RemoteOp::CreateBlob, |state| Ok(state.put_blob(content)))
    }

    async fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String, RemoteError> {
        self.run(RemoteOp::CreateTree, |state| {
            let mut tree = state
                .trees
                .get(base_tree)
                .cloned()
                .ok_or_else(|| client_error(422, "base_tree not found"))?;
            for entry in entries {
                if !state.blobs.contains_key(&entry.blob) {
                    return Err(client_error(422, "blob not found"));
                }
                tree.insert(entry.path.clone(), entry.blob.clone());
            }
            Ok(state.put_tree(tree))
        })
    }

    async fn create_commit(&self, message: &str, tree: &str, parent: &str) -> Result<String, RemoteError> {
        self.run(RemoteOp::CreateCommit, |state| {
            if !state.trees.contains_key(tree) || !state.commits.contains_key(parent) {
                return Err(client_error(422, "tree or parent not found"));
            }
            Ok(state.put_commit(tree.to_string(), Some(parent.to_string()), message))
        })
    }

    async fn move_ref(&self, commit: &str) -> Result<(), RemoteError> {
        self.run(RemoteOp::MoveRef, |state| {
            let parent = state
                .commits
                .get(commit)
                .ok_or_else(|| client_error(422, "Object does not exist"))?
                .parent
                .clone();
            if parent.as_deref() != Some(state.head.as_str()) {
                return Err(client_error(422, "Update is not a fast forward"));
            }
            state.head = commit.to_string();
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
