//! Markdown documents generated for skills
//!
//! ```markdown
//! ---
//! name: release
//! description: Cut and publish a release
//! members:
//! - bump_version
//! - changelog
//! ---
//!
//! # release
//!
//! Cut and publish a release
//!
//! ## Members
//!
//! | Name | Kind | Description |
//! |---|---|---|
//! | `bump_version` | tool | Bump the crate version |
//! ```
//!
//! Members are listed by the name a client calls them by, so a tool grouped
//! under a router shows as `{router}__{tool}`.

use crate::model::SkillMember;
use serde::Serialize;

#[derive(Serialize)]
struct SkillFrontmatter<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    members: Vec<&'a str>,
}

/// Render the document served for `skill://{name}`
pub fn render_skill_document(
    name: &str,
    description: &str,
    members: &[SkillMember],
    instructions: Option<&str>,
) -> String {
    let frontmatter = SkillFrontmatter {
        name,
        description,
        members: members.iter().map(|m| m.call_name.as_str()).collect(),
    };
    let yaml = serde_yaml::to_string(&frontmatter).unwrap_or_default();

    let mut doc = format!("---\n{}---\n\n# {}\n\n{}\n", yaml, name, description);

    if !members.is_empty() {
        doc.push_str("\n## Members\n\n| Name | Kind | Description |\n|---|---|---|\n");
        for member in members {
            doc.push_str(&format!(
                "| `{}` | {} | {} |\n",
                member.call_name,
                member.kind,
                table_cell(&member.description)
            ));
        }
    }

    if let Some(instructions) = instructions.map(str::trim).filter(|s| !s.is_empty()) {
        doc.push_str("\n## Instructions\n\n");
        doc.push_str(instructions);
        doc.push('\n');
    }

    doc
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
