pub mod ace;
pub mod askuser;
pub mod bash;
pub mod edit;
pub mod file;
pub mod ide;
pub mod list;
pub mod search;
pub mod skill;
pub mod todo;
pub mod useful_info;
pub mod websearch;

pub use ace::{CodebaseIndex, CodebaseSearchTool, FileOutlineTool, FindDefinitionTool, FindReferencesTool, SemanticSearchTool};
pub use askuser::AskUserTool;
pub use bash::BashTool;
pub use edit::{EditRangeTool, EditSearchTool, UndoTool};
pub use file::{ReadFileTool, WriteFileTool};
pub use ide::{IdeBridge, IdeDiagnosticsTool};
pub use list::ListFilesTool;
pub use search::SearchTool;
pub use skill::SkillExecuteTool;
pub use todo::{TodoAddTool, TodoDeleteTool, TodoGetTool, TodoStore, TodoUpdateTool};
pub use useful_info::{UsefulInfoAddTool, UsefulInfoDeleteTool, UsefulInfoListTool, UsefulInfoStore};
pub use websearch::{WebFetchTool, WebSearchProvider, WebSearchTool};

use crate::lsp::LSPManager;
use crate::skills::SkillSet;
use crate::sub_agent::UserQuestionCb;
use crate::types::AgentTool;
use std::sync::Arc;

/// External/optional collaborators the full tool family can be wired to.
/// Every field defaults to `None`; tools that depend on an absent
/// collaborator still register and still answer calls, just with a graceful
/// "not configured" result rather than failing the turn — the same posture
/// `crate::lsp::LSPManager` already takes toward unavailable language
/// servers.
#[derive(Default)]
pub struct ToolRegistryOptions {
    pub lsp: Option<Arc<LSPManager>>,
    pub codebase_index: Option<Arc<dyn CodebaseIndex>>,
    pub ide_bridge: Option<Arc<dyn IdeBridge>>,
    pub web_search: Option<Arc<dyn WebSearchProvider>>,
    pub todo_store: Option<Arc<TodoStore>>,
    pub useful_info_store: Option<Arc<UsefulInfoStore>>,
    pub skills: Option<Arc<SkillSet>>,
    pub ask_user: Option<UserQuestionCb>,
}

fn default_ask_user_cb() -> UserQuestionCb {
    Arc::new(|question, _options| {
        format!(
            "(unanswered: askuser-ask_question has no question UI configured for \"{}\")",
            question
        )
    })
}

/// Get the standard set of coding agent tools, with every collaborator left
/// at its graceful default (no LSP servers registered, no codebase index,
/// no web search, no skills, an askuser stub that reports itself
/// unconfigured). Use [`default_tools_with`] to wire in real backends.
pub fn default_tools() -> Vec<Box<dyn AgentTool>> {
    default_tools_with(ToolRegistryOptions::default())
}

/// Get the standard set of coding agent tools, wiring in whichever
/// collaborators `opts` provides.
pub fn default_tools_with(opts: ToolRegistryOptions) -> Vec<Box<dyn AgentTool>> {
    let lsp = opts.lsp.unwrap_or_else(|| Arc::new(LSPManager::new(".")));
    let todo_store = opts.todo_store.unwrap_or_default();
    let useful_info_store = opts.useful_info_store.unwrap_or_default();
    let skills = opts.skills.unwrap_or_else(|| Arc::new(SkillSet::empty()));
    let ask_user = opts.ask_user.unwrap_or_else(default_ask_user_cb);

    vec![
        Box::new(BashTool::default()),
        Box::new(ReadFileTool::default()),
        Box::new(WriteFileTool::new()),
        Box::new(EditSearchTool::new()),
        Box::new(EditRangeTool::new()),
        Box::new(UndoTool::new()),
        Box::new(ListFilesTool::default()),
        Box::new(SearchTool::default()),
        Box::new(FindDefinitionTool::new(lsp.clone())),
        Box::new(FindReferencesTool::new(lsp.clone())),
        Box::new(FileOutlineTool::new(lsp)),
        Box::new(SemanticSearchTool::new(opts.codebase_index.clone())),
        Box::new(CodebaseSearchTool::new(opts.codebase_index)),
        Box::new(IdeDiagnosticsTool::new(opts.ide_bridge)),
        Box::new(TodoGetTool::new(todo_store.clone())),
        Box::new(TodoAddTool::new(todo_store.clone())),
        Box::new(TodoUpdateTool::new(todo_store.clone())),
        Box::new(TodoDeleteTool::new(todo_store)),
        Box::new(UsefulInfoAddTool::new(useful_info_store.clone())),
        Box::new(UsefulInfoDeleteTool::new(useful_info_store.clone())),
        Box::new(UsefulInfoListTool::new(useful_info_store)),
        Box::new(WebSearchTool::new(opts.web_search)),
        Box::new(WebFetchTool::new()),
        Box::new(AskUserTool::new(ask_user)),
        Box::new(SkillExecuteTool::new(skills)),
    ]
}
