//! Common types used throughout notemirror.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Longest directory or file name produced by [`sanitize_name`], in bytes.
pub const MAX_NAME_LEN: usize = 200;

/// The four kinds of node in a remote notebook hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Notebook,
    SectionGroup,
    Section,
    Page,
}

impl NodeKind {
    /// Name of the metadata file written inside the node's directory.
    pub fn metadata_file_name(&self) -> &'static str {
        match self {
            NodeKind::Notebook => "notebook.json",
            NodeKind::SectionGroup => "group.json",
            NodeKind::Section => "section.json",
            NodeKind::Page => "page.json",
        }
    }

    /// Every metadata file name, used when scanning a mirror.
    pub fn all() -> [NodeKind; 4] {
        [
            NodeKind::Notebook,
            NodeKind::SectionGroup,
            NodeKind::Section,
            NodeKind::Page,
        ]
    }

    /// Kind owning the given metadata file name, if any.
    pub fn from_metadata_file_name(name: &str) -> Option<NodeKind> {
        Self::all()
            .into_iter()
            .find(|kind| kind.metadata_file_name() == name)
    }

    /// Whether nodes of this kind own child nodes.
    pub fn is_container(&self) -> bool {
        !matches!(self, NodeKind::Page)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeKind::Notebook => "notebook",
            NodeKind::SectionGroup => "section group",
            NodeKind::Section => "section",
            NodeKind::Page => "page",
        };
        f.write_str(label)
    }
}

/// Bearer credential for the remote API.
///
/// Treated as an opaque string; zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a bearer token.
    ///
    /// # Errors
    /// - Returns error if the token is empty or only whitespace
    pub fn new(token: impl Into<String>) -> crate::Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Access token cannot be empty".to_string(),
            ));
        }
        Ok(Self(token.trim().to_string()))
    }

    /// Get the raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken([REDACTED; {} chars])", self.0.len())
    }
}

/// Turn a remote display name into a single filesystem-safe path component.
///
/// Separators, characters reserved on common filesystems and control
/// characters become `_`; surrounding whitespace and trailing dots are dropped.
/// The result is never empty, never `.` or `..`, and at most
/// [`MAX_NAME_LEN`] bytes long.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = false;

    for c in name.chars() {
        let mapped = match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c if c.is_whitespace() => ' ',
            c => c,
        };
        if mapped == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        out.push(mapped);
    }

    let trailing = |c: char| c == '.' || c == ' ';
    let mut out = out.trim_start().trim_end_matches(trailing).to_string();

    if out.len() > MAX_NAME_LEN {
        let mut cut = MAX_NAME_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out = out.trim_end_matches(trailing).to_string();
    }

    if out.is_empty() || out == "." || out == ".." {
        return "untitled".to_string();
    }
    out
}
