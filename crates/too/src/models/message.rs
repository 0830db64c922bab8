use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A message to or from an LLM
///
/// Images are references, either `data:<mime>;base64,<payload>` urls or plain urls. Each
/// provider maps them onto its own image shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::new(Role::System, content)
    }

    /// Attach an image reference to the message
    pub fn with_image<S: Into<String>>(mut self, image: S) -> Self {
        self.images.push(image.into());
        self
    }
}

/// An image reference split into the pieces the vendors need
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef<'a> {
    Inline { mime_type: &'a str, data: &'a str },
    Url(&'a str),
}

impl<'a> ImageRef<'a> {
    /// Parse `data:<mime>;base64,<payload>` into an inline image, anything else is a url
    pub fn parse(image: &'a str) -> Self {
        if let Some(rest) = image.strip_prefix("data:") {
            if let Some((mime_type, data)) = rest.split_once(";base64,") {
                return ImageRef::Inline { mime_type, data };
            }
        }
        ImageRef::Url(image)
    }
}

/// Split the system messages from the conversation turns
///
/// Vendors take the system prompt through a dedicated channel, so adapters pull it out
/// here. Several system messages are joined with a blank line.
pub fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns = messages.iter().filter(|m| m.role != Role::System).collect();

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, turns)
}
