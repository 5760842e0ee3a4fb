//! `search_files`: literal text search over the project's files.

use super::traits::{Tool, ToolResult};
use super::{parse_args, ProjectScope, TOOL_SEARCH_FILES};
use crate::store::FileMap;
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Matched lines longer than this are cut for display.
const MAX_MATCH_TEXT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub file: String,
    pub line: usize,
    pub matched_text: String,
}

#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub matches: Vec<SearchMatch>,
    pub total_matches: usize,
    pub files_matched: usize,
    pub truncated: bool,
}

fn clip(line: &str) -> String {
    let trimmed = line.trim();
    match trimmed.char_indices().nth(MAX_MATCH_TEXT) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Search `files` line by line. Files with more matches rank first, ties by
/// path; lines keep their order within a file.
pub fn search(
    files: &FileMap,
    pattern: &Regex,
    file_glob: Option<&glob::Pattern>,
    max_results: usize,
) -> SearchOutcome {
    let mut per_file: Vec<(&String, Vec<SearchMatch>)> = files
        .iter()
        .filter(|(path, _)| {
            file_glob.is_none_or(|g| {
                g.matches(path) || g.matches(path.rsplit('/').next().unwrap_or(path))
            })
        })
        .filter_map(|(path, content)| {
            let hits: Vec<SearchMatch> = content
                .lines()
                .enumerate()
                .filter(|(_, line)| pattern.is_match(line))
                .map(|(idx, line)| SearchMatch {
                    file: path.clone(),
                    line: idx + 1,
                    matched_text: clip(line),
                })
                .collect();
            (!hits.is_empty()).then_some((path, hits))
        })
        .collect();

    per_file.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    let mut outcome = SearchOutcome {
        files_matched: per_file.len(),
        ..SearchOutcome::default()
    };
    for (_, hits) in per_file {
        outcome.total_matches += hits.len();
        for hit in hits {
            if outcome.matches.len() < max_results {
                outcome.matches.push(hit);
            } else {
                outcome.truncated = true;
            }
        }
    }
    outcome
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
}

pub struct SearchFilesTool {
    scope: Arc<ProjectScope>,
}

impl SearchFilesTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        TOOL_SEARCH_FILES
    }

    fn description(&self) -> &str {
        "Search the project's files for a literal text. Returns matching lines as \
         {file, line, matchedText}, files with the most matches first. \
         Optionally restrict to files matching a glob such as '*.tsx' or 'app/**'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to search for (not a regex)"
                },
                "glob": {
                    "type": "string",
                    "description": "Only search files whose path or name matches this glob"
                },
                "case_sensitive": {
                    "type": "boolean",
                    "description": "Match case exactly. Default: false."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: SearchArgs = match parse_args(TOOL_SEARCH_FILES, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };
        if args.query.is_empty() {
            return Ok(ToolResult::failure("query cannot be empty"));
        }
        let project = match self.scope.project().await? {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };

        let file_glob = match args.glob.as_deref().map(glob::Pattern::new).transpose() {
            Ok(g) => g,
            Err(e) => return Ok(ToolResult::failure(format!("Invalid glob: {e}"))),
        };
        let pattern = match RegexBuilder::new(&regex::escape(&args.query))
            .case_insensitive(!args.case_sensitive)
            .build()
        {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure(format!("Invalid query: {e}"))),
        };

        let max = self.scope.config().tools.search_max_results;
        let outcome = search(&project.files, &pattern, file_glob.as_ref(), max);

        let mut output = if outcome.matches.is_empty() {
            format!("No matches for '{}'", args.query)
        } else {
            let lines: Vec<String> = outcome
                .matches
                .iter()
                .map(|m| format!("{}:{}: {}", m.file, m.line, m.matched_text))
                .collect();
            format!(
                "{} match(es) in {} file(s)\n{}",
                outcome.total_matches,
                outcome.files_matched,
                lines.join("\n")
            )
        };
        if outcome.truncated {
            output.push_str(&format!("\n(showing first {max})"));
        }

        Ok(ToolResult::success(
            output,
            json!({
                "results": outcome.matches,
                "totalMatches": outcome.total_matches,
                "filesMatched": outcome.files_matched,
                "truncated": outcome.truncated,
            }),
        ))
    }
}
