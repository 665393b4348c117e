//! LSP client pool — per-language language-server processes used for
//! code-navigation (`gotoDefinition`, `findReferences`, `hover`, `completion`,
//! `documentSymbol`) and for attaching diagnostics to file edits.
//!
//! Wire types are the real `lsp-types` crate rather than hand-rolled structs,
//! since this is genuine LSP, not a project-specific JSON-RPC dialect.
//! Framing is [`mcp::transport::StdioTransport`] generalized from
//! newline-delimited JSON to the LSP base protocol's `Content-Length` header
//! + body framing — the two protocols share a spawn-a-child/talk-over-stdio
//! transport shape but not a wire framing, so only the framing layer differs.

use lsp_types::{
    ClientCapabilities, CompletionParams, DocumentSymbolParams, GotoDefinitionParams, Hover,
    HoverParams, InitializeParams, InitializeResult, InitializedParams, PartialResultParams,
    Position, ReferenceContext, ReferenceParams, TextDocumentContentChangeEvent,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams, Url,
    VersionedTextDocumentIdentifier, WorkDoneProgressParams,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicI32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum LspError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server reported an error: {0}")]
    Server(String),
    #[error("no language server configured for language '{0}'")]
    NoServerForLanguage(String),
}

/// Errors from a navigation request are logged and flattened to an empty
/// result by [`LSPManager`] — code navigation must never crash the agent.
/// This type exists only to carry the error up to that boundary.
type LspResult<T> = Result<T, LspError>;

// ---------------------------------------------------------------------------
// Content-Length framed JSON-RPC transport
// ---------------------------------------------------------------------------

struct LspTransport {
    stdin: Arc<Mutex<tokio::process::ChildStdin>>,
    stdout: Arc<Mutex<BufReader<tokio::process::ChildStdout>>>,
    child: Arc<Mutex<Child>>,
    next_id: AtomicI64,
}

impl LspTransport {
    async fn spawn(command: &str, args: &[String]) -> LspResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| LspError::Transport(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::Transport("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::Transport("failed to capture stdout".into()))?;

        Ok(Self {
            stdin: Arc::new(Mutex::new(stdin)),
            stdout: Arc::new(Mutex::new(BufReader::new(stdout))),
            child: Arc::new(Mutex::new(child)),
            next_id: AtomicI64::new(1),
        })
    }

    async fn write_message(&self, body: &str) -> LspResult<()> {
        let mut stdin = self.stdin.lock().await;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        stdin
            .write_all(header.as_bytes())
            .await
            .map_err(|e| LspError::Transport(e.to_string()))?;
        stdin
            .write_all(body.as_bytes())
            .await
            .map_err(|e| LspError::Transport(e.to_string()))?;
        stdin.flush().await.map_err(|e| LspError::Transport(e.to_string()))
    }

    async fn read_message(&self) -> LspResult<serde_json::Value> {
        let mut stdout = self.stdout.lock().await;
        let mut content_length: Option<usize> = None;

        loop {
            let mut line = Vec::new();
            read_line(&mut *stdout, &mut line).await?;
            if line.is_empty() {
                // blank line terminates the header block
                break;
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = value.trim().parse().ok();
            }
        }

        let len = content_length
            .ok_or_else(|| LspError::Transport("missing Content-Length header".into()))?;
        let mut buf = vec![0u8; len];
        stdout
            .read_exact(&mut buf)
            .await
            .map_err(|e| LspError::Transport(e.to_string()))?;

        serde_json::from_slice(&buf).map_err(|e| LspError::Transport(e.to_string()))
    }

    /// Send a request and block on its matched response. LSP servers are
    /// expected to respond to each request before the next is sent on this
    /// simple client, which is sufficient for the synchronous navigation
    /// calls this crate makes.
    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> LspResult<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();
        self.write_message(&body).await?;

        loop {
            let msg = self.read_message().await?;
            if msg.get("id").and_then(|v| v.as_i64()) != Some(id) {
                // a notification or a response to an earlier, already-timed-out
                // request; ignore and keep reading
                continue;
            }
            if let Some(error) = msg.get("error") {
                return Err(LspError::Server(error.to_string()));
            }
            let result = msg.get("result").cloned().unwrap_or(serde_json::Value::Null);
            return serde_json::from_value(result).map_err(|e| LspError::Transport(e.to_string()));
        }
    }

    async fn notify<P: Serialize>(&self, method: &str, params: P) -> LspResult<()> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        })
        .to_string();
        self.write_message(&body).await
    }

    async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}

async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
) -> LspResult<()> {
    use tokio::io::AsyncBufReadExt;
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| LspError::Transport(e.to_string()))?;
    out.extend_from_slice(line.trim_end_matches(['\r', '\n']).as_bytes());
    Ok(())
}

// ---------------------------------------------------------------------------
// Declared server capabilities, checked before each navigation request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ServerCapabilities {
    definition: bool,
    references: bool,
    hover: bool,
    completion: bool,
    document_symbol: bool,
}

impl ServerCapabilities {
    fn from_initialize_result(result: &InitializeResult) -> Self {
        let caps = &result.capabilities;
        Self {
            definition: caps.definition_provider.is_some(),
            references: caps.references_provider.is_some(),
            hover: caps.hover_provider.is_some(),
            completion: caps.completion_provider.is_some(),
            document_symbol: caps.document_symbol_provider.is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// LSPClient — one per language server process
// ---------------------------------------------------------------------------

pub struct LspServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub needs_project_root_arg: bool,
}

pub struct LSPClient {
    transport: LspTransport,
    capabilities: ServerCapabilities,
    doc_versions: Mutex<HashMap<Url, i32>>,
    version_counter: AtomicI32,
}

impl LSPClient {
    pub async fn start(config: &LspServerConfig, project_root: &Path) -> LspResult<Self> {
        let mut args = config.args.clone();
        if config.needs_project_root_arg {
            args.push("-s".into());
            args.push(project_root.display().to_string());
        }

        let transport = LspTransport::spawn(&config.command, &args).await?;

        let root_uri = Url::from_file_path(project_root).ok();
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri,
            capabilities: minimal_client_capabilities(),
            ..Default::default()
        };

        let result: InitializeResult = transport.request("initialize", params).await?;
        transport
            .notify("initialized", InitializedParams {})
            .await?;

        Ok(Self {
            transport,
            capabilities: ServerCapabilities::from_initialize_result(&result),
            doc_versions: Mutex::new(HashMap::new()),
            version_counter: AtomicI32::new(1),
        })
    }

    pub async fn shutdown(&self) {
        let _: LspResult<serde_json::Value> = self.transport.request("shutdown", ()).await;
        let _ = self.transport.notify("exit", ()).await;
        self.transport.kill().await;
    }

    pub async fn open_document(&self, uri: Url, text: String, language_id: &str) -> LspResult<()> {
        let version = self.version_counter.fetch_add(1, Ordering::SeqCst);
        self.doc_versions.lock().await.insert(uri.clone(), version);
        self.transport
            .notify(
                "textDocument/didOpen",
                serde_json::json!({
                    "textDocument": TextDocumentItem {
                        uri,
                        language_id: language_id.to_string(),
                        version,
                        text,
                    }
                }),
            )
            .await
    }

    pub async fn close_document(&self, uri: Url) -> LspResult<()> {
        self.doc_versions.lock().await.remove(&uri);
        self.transport
            .notify(
                "textDocument/didClose",
                serde_json::json!({ "textDocument": TextDocumentIdentifier { uri } }),
            )
            .await
    }

    /// Bumps the document's version and sends a full-text change — used when
    /// a request needs the server to see post-edit content without a
    /// close/reopen cycle.
    #[allow(dead_code)]
    async fn update_document(&self, uri: Url, new_text: String) -> LspResult<()> {
        let version = self.version_counter.fetch_add(1, Ordering::SeqCst);
        self.doc_versions.lock().await.insert(uri.clone(), version);
        self.transport
            .notify(
                "textDocument/didChange",
                serde_json::json!({
                    "textDocument": VersionedTextDocumentIdentifier { uri, version },
                    "contentChanges": [TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text: new_text,
                    }],
                }),
            )
            .await
    }

    pub async fn goto_definition(&self, uri: Url, position: Position) -> Vec<lsp_types::Location> {
        if !self.capabilities.definition {
            return Vec::new();
        }
        let params = GotoDefinitionParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        self.transport
            .request::<_, Option<lsp_types::GotoDefinitionResponse>>("textDocument/definition", params)
            .await
            .ok()
            .flatten()
            .map(flatten_goto_definition)
            .unwrap_or_default()
    }

    pub async fn find_references(&self, uri: Url, position: Position) -> Vec<lsp_types::Location> {
        if !self.capabilities.references {
            return Vec::new();
        }
        let params = ReferenceParams {
            text_document_position: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration: true,
            },
        };
        self.transport
            .request::<_, Option<Vec<lsp_types::Location>>>("textDocument/references", params)
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub async fn hover(&self, uri: Url, position: Position) -> Option<Hover> {
        if !self.capabilities.hover {
            return None;
        }
        let params = HoverParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        self.transport
            .request::<_, Option<Hover>>("textDocument/hover", params)
            .await
            .ok()
            .flatten()
    }

    pub async fn completion(&self, uri: Url, position: Position) -> Vec<lsp_types::CompletionItem> {
        if !self.capabilities.completion {
            return Vec::new();
        }
        let params = CompletionParams {
            text_document_position: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: None,
        };
        self.transport
            .request::<_, Option<lsp_types::CompletionResponse>>("textDocument/completion", params)
            .await
            .ok()
            .flatten()
            .map(flatten_completion)
            .unwrap_or_default()
    }

    pub async fn document_symbol(&self, uri: Url) -> Vec<lsp_types::DocumentSymbol> {
        if !self.capabilities.document_symbol {
            return Vec::new();
        }
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        self.transport
            .request::<_, Option<lsp_types::DocumentSymbolResponse>>("textDocument/documentSymbol", params)
            .await
            .ok()
            .flatten()
            .map(flatten_document_symbol)
            .unwrap_or_default()
    }
}

fn minimal_client_capabilities() -> ClientCapabilities {
    ClientCapabilities::default()
}

fn flatten_goto_definition(resp: lsp_types::GotoDefinitionResponse) -> Vec<lsp_types::Location> {
    match resp {
        lsp_types::GotoDefinitionResponse::Scalar(loc) => vec![loc],
        lsp_types::GotoDefinitionResponse::Array(locs) => locs,
        lsp_types::GotoDefinitionResponse::Link(links) => links
            .into_iter()
            .map(|l| lsp_types::Location {
                uri: l.target_uri,
                range: l.target_range,
            })
            .collect(),
    }
}

fn flatten_completion(resp: lsp_types::CompletionResponse) -> Vec<lsp_types::CompletionItem> {
    match resp {
        lsp_types::CompletionResponse::Array(items) => items,
        lsp_types::CompletionResponse::List(list) => list.items,
    }
}

fn flatten_document_symbol(resp: lsp_types::DocumentSymbolResponse) -> Vec<lsp_types::DocumentSymbol> {
    match resp {
        lsp_types::DocumentSymbolResponse::Flat(symbols) => symbols
            .into_iter()
            .map(|s| lsp_types::DocumentSymbol {
                name: s.name,
                detail: s.container_name,
                kind: s.kind,
                tags: s.tags,
                deprecated: s.deprecated,
                range: s.location.range,
                selection_range: s.location.range,
                children: None,
            })
            .collect(),
        lsp_types::DocumentSymbolResponse::Nested(symbols) => symbols,
    }
}

// ---------------------------------------------------------------------------
// LSPManager — resolves language by extension, owns a lazy client-per-language map
// ---------------------------------------------------------------------------

pub struct LSPManager {
    project_root: std::path::PathBuf,
    registry: HashMap<String, LspServerConfig>,
    /// extension (without dot) -> language id
    extensions: HashMap<String, String>,
    clients: Mutex<HashMap<String, Arc<LSPClient>>>,
}

impl LSPManager {
    pub fn new(project_root: impl Into<std::path::PathBuf>) -> Self {
        let mut extensions = HashMap::new();
        extensions.insert("rs".into(), "rust".into());
        extensions.insert("ts".into(), "typescript".into());
        extensions.insert("tsx".into(), "typescriptreact".into());
        extensions.insert("js".into(), "javascript".into());
        extensions.insert("py".into(), "python".into());
        extensions.insert("go".into(), "go".into());

        Self {
            project_root: project_root.into(),
            registry: HashMap::new(),
            extensions,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_server(&mut self, language: impl Into<String>, config: LspServerConfig) {
        self.registry.insert(language.into(), config);
    }

    pub fn language_for_path(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?;
        self.extensions.get(ext).cloned()
    }

    async fn client_for_language(&self, language: &str) -> LspResult<Arc<LSPClient>> {
        {
            let clients = self.clients.lock().await;
            if let Some(client) = clients.get(language) {
                return Ok(client.clone());
            }
        }

        let config = self
            .registry
            .get(language)
            .ok_or_else(|| LspError::NoServerForLanguage(language.to_string()))?;

        let client = Arc::new(LSPClient::start(config, &self.project_root).await?);
        self.clients
            .lock()
            .await
            .insert(language.to_string(), client.clone());
        Ok(client)
    }

    /// Open `path`, run `f` against the live client, close the document, and
    /// flatten any error to an empty/None result — navigation must never
    /// surface an error to the agent loop, only logs.
    async fn with_document<T, F, Fut>(&self, path: &Path, text: &str, f: F) -> Option<T>
    where
        F: FnOnce(Arc<LSPClient>, Url) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let language = self.language_for_path(path)?;
        let client = match self.client_for_language(&language).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(%language, error = %e, "LSP client unavailable");
                return None;
            }
        };
        let uri = Url::from_file_path(path).ok()?;

        if let Err(e) = client.open_document(uri.clone(), text.to_string(), &language).await {
            tracing::warn!(error = %e, "failed to open document for LSP request");
            return None;
        }

        let result = f(client.clone(), uri.clone()).await;
        let _ = client.close_document(uri).await;
        Some(result)
    }

    pub async fn goto_definition(&self, path: &Path, text: &str, position: Position) -> Vec<lsp_types::Location> {
        self.with_document(path, text, |client, uri| async move {
            client.goto_definition(uri, position).await
        })
        .await
        .unwrap_or_default()
    }

    pub async fn find_references(&self, path: &Path, text: &str, position: Position) -> Vec<lsp_types::Location> {
        self.with_document(path, text, |client, uri| async move {
            client.find_references(uri, position).await
        })
        .await
        .unwrap_or_default()
    }

    pub async fn hover(&self, path: &Path, text: &str, position: Position) -> Option<Hover> {
        self.with_document(path, text, |client, uri| async move {
            client.hover(uri, position).await
        })
        .await
        .flatten()
    }

    pub async fn document_symbol(&self, path: &Path, text: &str) -> Vec<lsp_types::DocumentSymbol> {
        self.with_document(path, text, |client, uri| async move {
            client.document_symbol(uri).await
        })
        .await
        .unwrap_or_default()
    }

    pub async fn shutdown_all(&self) {
        let clients = self.clients.lock().await;
        for client in clients.values() {
            client.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_for_path_resolves_known_extensions() {
        let manager = LSPManager::new("/tmp/project");
        assert_eq!(
            manager.language_for_path(Path::new("src/main.rs")),
            Some("rust".to_string())
        );
        assert_eq!(manager.language_for_path(Path::new("README")), None);
    }

    #[tokio::test]
    async fn test_unregistered_language_returns_error_not_panic() {
        let manager = LSPManager::new("/tmp/project");
        let err = manager.client_for_language("rust").await.unwrap_err();
        assert!(matches!(err, LspError::NoServerForLanguage(_)));
    }
}
