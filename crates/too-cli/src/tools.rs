use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use too::agent::{ToolExecutor, ToolOutput};
use too::models::tool::Tool;

/// Files are read in full up to this size
const MAX_READ_BYTES: u64 = 256 * 1024;

/// The file tools offered to the model
pub fn catalog() -> Vec<Tool> {
    vec![
        Tool::new(
            "read_file",
            "Read a UTF-8 text file from the working directory",
            json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the working directory"}
                }
            }),
        ),
        Tool::new(
            "write_file",
            "Create or overwrite a text file in the working directory",
            json!({
                "type": "object",
                "required": ["path", "content"],
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the working directory"},
                    "content": {"type": "string", "description": "The full new contents of the file"}
                }
            }),
        ),
        Tool::new(
            "list_files",
            "List the entries of a directory in the working directory",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory to list, defaults to the working directory"}
                }
            }),
        ),
    ]
}

/// Executes the file tools, confined to one root directory
pub struct FileTools {
    root: PathBuf,
}

impl FileTools {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a model supplied path inside the root, refusing anything that escapes it
    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(format!("path '{}' is outside the working directory", path)),
            }
        }
        Ok(resolved)
    }

    fn string_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
        arguments
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing string argument '{}'", key))
    }

    async fn read_file(&self, arguments: &Map<String, Value>) -> Result<String, String> {
        let path = self.resolve(Self::string_arg(arguments, "path")?)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        if metadata.len() > MAX_READ_BYTES {
            return Err(format!(
                "{} is {} bytes, larger than the {} byte limit",
                path.display(),
                metadata.len(),
                MAX_READ_BYTES
            ));
        }
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))
    }

    async fn write_file(&self, arguments: &Map<String, Value>) -> Result<String, String> {
        let path = self.resolve(Self::string_arg(arguments, "path")?)?;
        let content = Self::string_arg(arguments, "content")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("{}: {}", parent.display(), e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
    }

    async fn list_files(&self, arguments: &Map<String, Value>) -> Result<String, String> {
        let path = match arguments.get("path").and_then(Value::as_str) {
            Some(path) => self.resolve(path)?,
            None => self.root.clone(),
        };
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|kind| kind.is_dir()) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names.join("\n"))
    }
}

#[async_trait]
impl ToolExecutor for FileTools {
    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> ToolOutput {
        tracing::debug!(tool = name, "executing tool");
        let result = match name {
            "read_file" => self.read_file(arguments).await,
            "write_file" => self.write_file(arguments).await,
            "list_files" => self.list_files(arguments).await,
            other => Err(format!("unknown tool '{}'", other)),
        };
        match result {
            Ok(output) => ToolOutput::success(output),
            Err(error) => ToolOutput::error(error),
        }
    }
}
