//! LLM agent proxy.
//!
//! The model is an external chat-completions service; this module sends the
//! user's request together with the file tool definitions, executes the tool
//! calls it asks for against the sandbox, and loops until the model answers
//! with plain text. Tool failures are reported back to the model as result
//! strings, never surfaced as request errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::files::validate_tool_path;
use crate::lifecycle::SandboxLifecycle;

const SYSTEM_PROMPT: &str = "You are an expert frontend engineer working inside a \
Vite + React + Tailwind sandbox. Build what the user asks for by creating and \
editing files under src/ with the provided tools. Keep components small, use \
functional React with hooks, and make the result visually polished. When the \
work is done, reply with a short summary of what you built.";

/// One message in the chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: String, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the API delivers them.
    pub arguments: String,
}

/// The file tools offered to the model on every request.
pub fn tool_definitions() -> Vec<serde_json::Value> {
    let location = json!({
        "type": "string",
        "description": "Relative path to the file (e.g., src/components/TodoItem.tsx)"
    });
    let content = json!({
        "type": "string",
        "description": "Content of the file"
    });
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "createFile",
                "description": "Create a new file at a specified location in the sandbox",
                "parameters": {
                    "type": "object",
                    "properties": { "location": location, "content": content },
                    "required": ["location", "content"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "updateFile",
                "description": "Update an existing file at a specified location in the sandbox",
                "parameters": {
                    "type": "object",
                    "properties": { "location": location, "content": content },
                    "required": ["location", "content"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "deleteFile",
                "description": "Delete a file at a specified location in the sandbox",
                "parameters": {
                    "type": "object",
                    "properties": { "location": location },
                    "required": ["location"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "readFile",
                "description": "Read the contents of a file at a specified location in the sandbox",
                "parameters": {
                    "type": "object",
                    "properties": { "location": location },
                    "required": ["location"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "listDirectory",
                "description": "List files and directories at a specified path in the sandbox",
                "parameters": {
                    "type": "object",
                    "properties": { "location": location },
                    "required": ["location"]
                }
            }
        }),
    ]
}

/// Opaque chat service: one request in, one assistant message out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<ChatMessage>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    tools: &'a [serde_json::Value],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        // A trailing slash keeps Url::join from replacing the last path
        // segment of bases like "https://api.openai.com/v1".
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: Url::parse(&normalized)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: 0.7,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<ChatMessage> {
        let response = self
            .client
            .post(self.base_url.join("chat/completions")?)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                tools,
                temperature: self.temperature,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::agent(format!(
                "chat endpoint returned {}",
                response.status()
            )));
        }
        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| Error::agent("chat response contained no choices"))
    }
}

#[derive(Deserialize)]
struct ToolArgs {
    location: String,
    #[serde(default)]
    content: Option<String>,
}

/// Runs the prompt-to-answer loop for one user message.
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    project_root: String,
    max_rounds: usize,
}

impl AgentRunner {
    pub fn new(llm: Arc<dyn LlmClient>, project_root: &str, max_rounds: usize) -> Self {
        Self {
            llm,
            project_root: project_root.to_string(),
            max_rounds,
        }
    }

    /// Sends the user's message and executes tool calls until the model
    /// answers with text. Every executed tool records activity so the
    /// sandbox stays alive through a long generation.
    pub async fn run(&self, lifecycle: &SandboxLifecycle, message: &str) -> Result<String> {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(message)];
        for round in 0..self.max_rounds {
            let reply = self.llm.chat(&messages, &tool_definitions()).await?;
            if reply.tool_calls.is_empty() {
                return Ok(reply.content.unwrap_or_default());
            }
            debug!(round, tool_calls = reply.tool_calls.len(), "executing tool calls");
            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in calls {
                lifecycle.record_activity(&format!("tool_{}", call.function.name));
                let result = self.execute_tool(lifecycle, &call).await;
                messages.push(ChatMessage::tool(call.id.clone(), result));
            }
        }
        Err(Error::agent("tool loop exceeded the maximum number of rounds"))
    }

    /// Tool failures become result strings the model can react to.
    async fn execute_tool(&self, lifecycle: &SandboxLifecycle, call: &ToolCall) -> String {
        match self.try_execute_tool(lifecycle, call).await {
            Ok(result) => result,
            Err(err) => {
                warn!(tool = %call.function.name, error = %err, "tool call failed");
                format!("Error: {err}")
            }
        }
    }

    async fn try_execute_tool(
        &self,
        lifecycle: &SandboxLifecycle,
        call: &ToolCall,
    ) -> Result<String> {
        let args: ToolArgs = serde_json::from_str(&call.function.arguments)
            .map_err(|err| Error::agent(format!("malformed tool arguments: {err}")))?;
        let location = args.location;
        // Path validation happens before any remote call, including the
        // implicit provisioning below.
        if matches!(
            call.function.name.as_str(),
            "createFile" | "updateFile" | "deleteFile" | "readFile"
        ) {
            validate_tool_path(&location, &self.project_root)?;
        }
        let handle = lifecycle.get_or_create().await?;
        let provisioner = lifecycle.provisioner();

        match call.function.name.as_str() {
            "createFile" => {
                let content = args
                    .content
                    .ok_or_else(|| Error::agent("createFile requires content"))?;
                if let Some((dir, _)) = location.rsplit_once('/') {
                    // Best effort: the directory may already exist.
                    let _ = provisioner.make_dir(&handle, dir).await;
                }
                provisioner.write_file(&handle, &location, &content).await?;
                Ok(format!("File created successfully at {location}"))
            }
            "updateFile" => {
                if !provisioner.exists(&handle, &location).await? {
                    return Ok(format!(
                        "File {location} does not exist. Use createFile to create it first."
                    ));
                }
                let content = args
                    .content
                    .ok_or_else(|| Error::agent("updateFile requires content"))?;
                provisioner.write_file(&handle, &location, &content).await?;
                Ok(format!("File updated successfully at {location}"))
            }
            "deleteFile" => {
                if !provisioner.exists(&handle, &location).await? {
                    return Ok(format!("File {location} does not exist."));
                }
                provisioner.delete_file(&handle, &location).await?;
                Ok(format!("File deleted successfully at {location}"))
            }
            "readFile" => {
                let content = provisioner.read_file(&handle, &location).await?;
                Ok(format!("File contents of {location}:\n\n{content}"))
            }
            "listDirectory" => {
                let entries = provisioner.list_dir(&handle, &location).await?;
                if entries.is_empty() {
                    return Ok(format!("Directory {location} is empty"));
                }
                let listing = entries
                    .iter()
                    .map(|entry| {
                        let kind = if entry.is_dir { "DIR" } else { "FILE" };
                        format!("{} ({kind})", entry.name)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(format!("Directory contents of {location}:\n{listing}"))
            }
            other => Err(Error::agent(format!("unknown tool: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use crate::provisioner::mock::MockProvisioner;

    /// Replays a fixed sequence of assistant replies and records every
    /// request transcript it was sent.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<ChatMessage>>,
        transcripts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<ChatMessage>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                transcripts: Mutex::new(Vec::new()),
            })
        }

        fn last_transcript(&self) -> Vec<ChatMessage> {
            self.transcripts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: &[serde_json::Value],
        ) -> Result<ChatMessage> {
            self.transcripts.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::agent("script exhausted"))
        }
    }

    fn assistant_with_tool_call(name: &str, arguments: serde_json::Value) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: vec![ToolCall {
                id: format!("call-{name}"),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }],
            tool_call_id: None,
        }
    }

    fn assistant_text(content: &str) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    fn setup() -> (SandboxLifecycle, Arc<MockProvisioner>) {
        let mock = Arc::new(MockProvisioner::new());
        let lifecycle = SandboxLifecycle::new(mock.clone(), LifecycleConfig::default());
        (lifecycle, mock)
    }

    #[tokio::test]
    async fn tool_loop_writes_files_then_returns_the_final_answer() {
        let (lifecycle, mock) = setup();
        let llm = ScriptedLlm::new(vec![
            assistant_with_tool_call(
                "createFile",
                serde_json::json!({"location": "src/App.tsx", "content": "export default App"}),
            ),
            assistant_text("Built a TODO app."),
        ]);
        let runner = AgentRunner::new(llm.clone(), "src", 8);

        let answer = runner.run(&lifecycle, "build a todo app").await.unwrap();
        assert_eq!(answer, "Built a TODO app.");
        assert_eq!(mock.file("src/App.tsx").as_deref(), Some("export default App"));

        // The tool result went back to the model on the second round.
        let transcript = llm.last_transcript();
        let tool_msg = transcript.iter().find(|m| m.role == "tool").unwrap();
        assert!(tool_msg.content.as_deref().unwrap().contains("created successfully"));
    }

    #[tokio::test]
    async fn out_of_root_paths_are_rejected_before_any_write() {
        let (lifecycle, mock) = setup();
        let llm = ScriptedLlm::new(vec![
            assistant_with_tool_call(
                "createFile",
                serde_json::json!({"location": "../etc/passwd", "content": "x"}),
            ),
            assistant_text("ok"),
        ]);
        let runner = AgentRunner::new(llm.clone(), "src", 8);

        runner.run(&lifecycle, "do something bad").await.unwrap();
        assert!(mock.files.lock().unwrap().is_empty());
        assert_eq!(mock.created(), 0, "rejection must precede any remote call");

        let transcript = llm.last_transcript();
        let tool_msg = transcript.iter().find(|m| m.role == "tool").unwrap();
        assert!(tool_msg.content.as_deref().unwrap().starts_with("Error: invalid path"));
    }

    #[tokio::test]
    async fn update_of_a_missing_file_tells_the_model_to_create_it() {
        let (lifecycle, _mock) = setup();
        let llm = ScriptedLlm::new(vec![
            assistant_with_tool_call(
                "updateFile",
                serde_json::json!({"location": "src/Nope.tsx", "content": "x"}),
            ),
            assistant_text("ok"),
        ]);
        let runner = AgentRunner::new(llm.clone(), "src", 8);

        runner.run(&lifecycle, "update it").await.unwrap();
        let transcript = llm.last_transcript();
        let tool_msg = transcript.iter().find(|m| m.role == "tool").unwrap();
        assert!(tool_msg
            .content
            .as_deref()
            .unwrap()
            .contains("does not exist. Use createFile"));
    }

    #[tokio::test]
    async fn read_and_list_tools_report_sandbox_contents() {
        let (lifecycle, mock) = setup();
        {
            let mut files = mock.files.lock().unwrap();
            files.insert("src/App.tsx".to_string(), "hello".to_string());
            files.insert("src/components/Todo.tsx".to_string(), "todo".to_string());
        }
        let llm = ScriptedLlm::new(vec![
            assistant_with_tool_call("readFile", serde_json::json!({"location": "src/App.tsx"})),
            assistant_with_tool_call("listDirectory", serde_json::json!({"location": "src"})),
            assistant_text("done"),
        ]);
        let runner = AgentRunner::new(llm.clone(), "src", 8);

        runner.run(&lifecycle, "inspect").await.unwrap();
        let transcript = llm.last_transcript();
        let tool_messages: Vec<_> = transcript.iter().filter(|m| m.role == "tool").collect();
        assert!(tool_messages[0].content.as_deref().unwrap().contains("hello"));
        let listing = tool_messages[1].content.as_deref().unwrap();
        assert!(listing.contains("App.tsx (FILE)"));
        assert!(listing.contains("components (DIR)"));
    }

    #[tokio::test]
    async fn runaway_tool_loops_are_capped() {
        let (lifecycle, _mock) = setup();
        let looping_call = assistant_with_tool_call(
            "listDirectory",
            serde_json::json!({"location": "src"}),
        );
        let llm = ScriptedLlm::new(vec![looping_call.clone(), looping_call.clone(), looping_call]);
        let runner = AgentRunner::new(llm, "src", 3);

        let result = runner.run(&lifecycle, "loop forever").await;
        assert!(matches!(result, Err(Error::Agent { .. })));
    }

    #[tokio::test]
    async fn tool_activity_keeps_the_sandbox_alive() {
        let (lifecycle, _mock) = setup();
        let llm = ScriptedLlm::new(vec![
            assistant_with_tool_call(
                "createFile",
                serde_json::json!({"location": "src/App.tsx", "content": "x"}),
            ),
            assistant_text("ok"),
        ]);
        let runner = AgentRunner::new(llm, "src", 8);

        let before = lifecycle.last_activity_ms();
        runner.run(&lifecycle, "build").await.unwrap();
        assert!(lifecycle.last_activity_ms() >= before);
    }
}
