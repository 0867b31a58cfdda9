//! Human-readable report of tagging decisions.
//!
//! One line per node, pre-order: a node, then its expressions depth-first,
//! then its child operators. Each line starts with an indicator:
//!
//! * `*` will run on the GPU
//! * `!` cannot run on the GPU, followed by the reasons
//! * `@` could run on the GPU but its parent expression or operator cannot
//! * `#` removed during conversion as a no-op

use std::fmt::{self, Write as _};
use std::str::FromStr;

use crate::error::OverrideError;
use crate::host::HostNode;
use crate::overrides::meta::Meta;
use crate::overrides::rule::{Convertible, RuleKind};

/// Verbosity of the tagging report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExplainMode {
    /// Every node.
    All,
    /// No report.
    #[default]
    None,
    /// Only nodes that stay on the host.
    NotOnGpu,
}

impl ExplainMode {
    /// Canonical setting value.
    pub fn as_str(self) -> &'static str {
        match self {
            ExplainMode::All => "ALL",
            ExplainMode::None => "NONE",
            ExplainMode::NotOnGpu => "NOT_ON_GPU",
        }
    }
}

impl FromStr for ExplainMode {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(ExplainMode::All),
            "NONE" => Ok(ExplainMode::None),
            "NOT_ON_GPU" => Ok(ExplainMode::NotOnGpu),
            _ => Err(OverrideError::InvalidExplainMode {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExplainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders the report for a tagged tree. Returns an empty string for
/// [`ExplainMode::None`].
pub fn explain<N: Convertible>(meta: &Meta<'_, N>, mode: ExplainMode) -> String {
    let mut out = String::new();
    if mode != ExplainMode::None {
        render(meta, 0, None, mode, &mut out);
    }
    out
}

fn render<N: Convertible>(
    meta: &Meta<'_, N>,
    depth: usize,
    parent_on_gpu: Option<bool>,
    mode: ExplainMode,
    out: &mut String,
) {
    let on_gpu = meta.can_this_be_replaced();
    let indicator = if !on_gpu {
        '!'
    } else if parent_on_gpu == Some(false) {
        '@'
    } else if meta.is_no_op() {
        '#'
    } else {
        '*'
    };
    if mode == ExplainMode::All || indicator == '!' {
        let label = if meta.rule().is_some() {
            meta.kind().label()
        } else {
            "NOT_FOUND"
        };
        let _ = write!(
            out,
            "{}{}{} <{}> ",
            "  ".repeat(depth),
            indicator,
            label,
            meta.short_name()
        );
        let describe = meta.wrapped().describe();
        if !describe.is_empty() {
            let _ = write!(out, "{describe} ");
        }
        match indicator {
            '!' => {
                let _ = write!(out, "cannot run on GPU because {}", meta.reasons().join("; "));
            }
            '@' => out.push_str("could run on GPU but is not because its parent cannot"),
            '#' => out.push_str("will be removed as a no-op"),
            _ => out.push_str("will run on GPU"),
        }
        out.push('\n');
    }
    for expr in meta.exprs() {
        render(expr, depth + 1, Some(on_gpu), mode, out);
    }
    // Operators run independently of their parents; transitions bridge them.
    let child_context = match meta.kind() {
        RuleKind::Expression | RuleKind::Partitioning => Some(on_gpu),
        RuleKind::Exec | RuleKind::Scan => None,
    };
    for child in meta.children() {
        render(child, depth + 1, child_context, mode, out);
    }
}
