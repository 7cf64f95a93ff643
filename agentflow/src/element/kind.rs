//! Closed set of element types and their static schema

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Can be entered and exited; owns a variable scope
    State,
    /// Executes and yields a step value
    Action,
    /// Produces model output
    Output,
    /// Yields an error step value
    Error,
    /// Waits for a human
    UserInput,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::State => "state",
            Role::Action => "action",
            Role::Output => "output",
            Role::Error => "error",
            Role::UserInput => "user-input",
        };
        write!(f, "{s}")
    }
}

/// Constraint on the children an element may have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedChildren {
    /// No children and no text
    None,
    /// Anything goes
    Any,
    /// Text content only
    TextOnly,
    /// Only the listed tags
    Only(&'static [&'static str]),
}

const EXECUTABLE: &[&str] = &[
    "assign",
    "script",
    "log",
    "raise",
    "if",
    "llm",
    "user-input",
    "error",
];

const IF_CHILDREN: &[&str] = &[
    "assign",
    "script",
    "log",
    "raise",
    "if",
    "llm",
    "user-input",
    "error",
    "elseif",
    "else",
];

const WORKFLOW_CHILDREN: &[&str] = &["datamodel", "state", "parallel", "final"];

const PARALLEL_CHILDREN: &[&str] = &[
    "datamodel",
    "onentry",
    "onexit",
    "transition",
    "state",
    "parallel",
];

const FINAL_CHILDREN: &[&str] = &[
    "datamodel",
    "onentry",
    "onexit",
    "assign",
    "script",
    "log",
    "raise",
    "if",
    "llm",
    "error",
];

/// Every element type the compiler understands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementKind {
    /// Document root
    Workflow,
    /// Compound or atomic state
    State,
    /// State whose child regions are all active at once
    Parallel,
    /// Terminal state
    Final,
    /// Container of variable declarations
    DataModel,
    /// Variable declaration
    Data,
    /// Variable assignment
    Assign,
    /// Conditional block
    If,
    /// Branch marker inside `if`
    ElseIf,
    /// Trailing branch marker inside `if`
    Else,
    /// Guarded edge to another state
    Transition,
    /// Content run when the parent state is entered
    OnEntry,
    /// Content run when the parent state is exited
    OnExit,
    /// Expression evaluated for its value
    Script,
    /// Diagnostic output
    Log,
    /// Internal event
    Raise,
    /// Language model call
    Llm,
    /// Human-in-the-loop pause
    UserInput,
    /// Explicit failure
    Error,
    /// Unrecognized tag; never compiles
    Unknown(String),
}

impl ElementKind {
    /// Map a source tag to its kind
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "workflow" => Self::Workflow,
            "state" => Self::State,
            "parallel" => Self::Parallel,
            "final" => Self::Final,
            "datamodel" => Self::DataModel,
            "data" => Self::Data,
            "assign" => Self::Assign,
            "if" => Self::If,
            "elseif" => Self::ElseIf,
            "else" => Self::Else,
            "transition" => Self::Transition,
            "onentry" => Self::OnEntry,
            "onexit" => Self::OnExit,
            "script" => Self::Script,
            "log" => Self::Log,
            "raise" => Self::Raise,
            "llm" => Self::Llm,
            "user-input" => Self::UserInput,
            "error" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Source tag
    pub fn tag(&self) -> &str {
        match self {
            Self::Workflow => "workflow",
            Self::State => "state",
            Self::Parallel => "parallel",
            Self::Final => "final",
            Self::DataModel => "datamodel",
            Self::Data => "data",
            Self::Assign => "assign",
            Self::If => "if",
            Self::ElseIf => "elseif",
            Self::Else => "else",
            Self::Transition => "transition",
            Self::OnEntry => "onentry",
            Self::OnExit => "onexit",
            Self::Script => "script",
            Self::Log => "log",
            Self::Raise => "raise",
            Self::Llm => "llm",
            Self::UserInput => "user-input",
            Self::Error => "error",
            Self::Unknown(tag) => tag,
        }
    }

    /// Coarse role
    pub fn role(&self) -> Role {
        match self {
            Self::Workflow | Self::State | Self::Parallel | Self::Final => Role::State,
            Self::Llm => Role::Output,
            Self::Error => Role::Error,
            Self::UserInput => Role::UserInput,
            _ => Role::Action,
        }
    }

    /// True for elements that can be entered
    pub fn is_state_like(&self) -> bool {
        self.role() == Role::State
    }

    /// True for `if`/`elseif`/`else` markers that open a branch
    pub fn is_branch_marker(&self) -> bool {
        matches!(self, Self::ElseIf | Self::Else)
    }

    /// Child constraint for this kind
    pub fn allowed_children(&self) -> AllowedChildren {
        match self {
            Self::Workflow => AllowedChildren::Only(WORKFLOW_CHILDREN),
            Self::State => AllowedChildren::Any,
            Self::Parallel => AllowedChildren::Only(PARALLEL_CHILDREN),
            Self::Final => AllowedChildren::Only(FINAL_CHILDREN),
            Self::DataModel => AllowedChildren::Only(&["data"]),
            Self::OnEntry | Self::OnExit | Self::Transition => AllowedChildren::Only(EXECUTABLE),
            Self::If => AllowedChildren::Only(IF_CHILDREN),
            Self::Data | Self::Assign | Self::Script => AllowedChildren::TextOnly,
            Self::ElseIf
            | Self::Else
            | Self::Log
            | Self::Raise
            | Self::Llm
            | Self::UserInput
            | Self::Error => AllowedChildren::None,
            Self::Unknown(_) => AllowedChildren::Any,
        }
    }

    /// Attributes that must always be present
    pub fn required_attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Data => &["id"],
            Self::Assign | Self::UserInput => &["location"],
            Self::If | Self::ElseIf => &["cond"],
            Self::Raise => &["event"],
            Self::Llm => &["prompt"],
            Self::Error => &["message"],
            _ => &[],
        }
    }

    /// Attribute whose value can alternatively come from text content
    pub fn expression_source(&self) -> Option<&'static str> {
        match self {
            Self::Assign | Self::Script => Some("expr"),
            _ => None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip_for_known_kinds() {
        for tag in [
            "workflow", "state", "parallel", "final", "datamodel", "data", "assign", "if",
            "elseif", "else", "transition", "onentry", "onexit", "script", "log", "raise", "llm",
            "user-input", "error",
        ] {
            assert_eq!(ElementKind::from_tag(tag).tag(), tag);
        }
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let kind = ElementKind::from_tag("blink");
        assert_eq!(kind, ElementKind::Unknown("blink".to_string()));
        assert_eq!(kind.tag(), "blink");
    }

    #[test]
    fn test_roles() {
        assert_eq!(ElementKind::Final.role(), Role::State);
        assert_eq!(ElementKind::Llm.role(), Role::Output);
        assert_eq!(ElementKind::UserInput.role(), Role::UserInput);
        assert_eq!(ElementKind::Assign.role(), Role::Action);
    }

    #[test]
    fn test_branch_markers_only_allowed_in_if() {
        let AllowedChildren::Only(onentry) = ElementKind::OnEntry.allowed_children() else {
            panic!("onentry should use an allow-list");
        };
        assert!(!onentry.contains(&"elseif"));

        let AllowedChildren::Only(branch) = ElementKind::If.allowed_children() else {
            panic!("if should use an allow-list");
        };
        assert!(branch.contains(&"elseif"));
        assert!(branch.contains(&"else"));
    }
}
