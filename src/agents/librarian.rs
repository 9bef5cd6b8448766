//! Librarian: ranks workspace files around the target and summarizes the
//! context the Artisan needs.
//!
//! The ranking itself is local and deterministic (walkdir scan + import
//! reference matching + BFS distance); the model call only produces the
//! natural-language context summary. A deeper project analyzer can feed
//! richer graphs, but this built-in ranking is what the control plane
//! ships with.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use walkdir::WalkDir;

use crate::context::{AgentContext, DependencyGraph, LibrarianReport};
use crate::llm::{ChatMessage, CompletionClient, CompletionRequest};

use super::{Agent, AgentConfig, AgentError, AgentResult};

/// Scan cap: beyond this the workspace is summarized from the closest
/// files only.
const MAX_SCAN_FILES: usize = 400;
/// Ranked-list cap fed into the prompt and the report.
const MAX_RELEVANT_FILES: usize = 40;
/// Per-file read cap for reference extraction.
const MAX_READ_BYTES: u64 = 64 * 1024;

const SOURCE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rb", "rs", "go", "java",
];
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    "vendor",
    "__pycache__",
    ".ralph",
];

/// Literal header prepended when prior-attempt history is present.
pub const PRIOR_ATTEMPTS_HEADER: &str = "PRIOR ATTEMPTS:\n";

#[derive(Debug, Clone)]
struct LibrarianInput {
    objective: String,
    target_file: Option<PathBuf>,
    working_directory: PathBuf,
    escalation_context: Option<String>,
}

pub struct Librarian {
    config: AgentConfig,
    client: Arc<dyn CompletionClient>,
    input: Option<LibrarianInput>,
}

impl Librarian {
    pub fn new(config: AgentConfig, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            config,
            client,
            input: None,
        }
    }

    fn build_user_message(
        input: &LibrarianInput,
        ranked: &[String],
        graph: &DependencyGraph,
    ) -> String {
        let mut message = String::new();

        // Prior-attempt history goes first so later-tier models see what
        // already failed before anything else.
        if let Some(history) = &input.escalation_context {
            message.push_str(PRIOR_ATTEMPTS_HEADER);
            message.push_str(history);
            message.push_str("\n\n");
        }

        message.push_str(&format!("Objective: {}\n", input.objective));
        match &input.target_file {
            Some(path) => message.push_str(&format!("Target file: {}\n", path.display())),
            None => message.push_str("Target file: (entire working directory)\n"),
        }

        message.push_str("\nRanked relevant files:\n");
        for file in ranked {
            message.push_str(&format!("- {}\n", file));
        }

        if !graph.edges.is_empty() {
            message.push_str("\nDependency edges:\n");
            for (from, to) in graph.edges.iter().take(60) {
                message.push_str(&format!("{} -> {}\n", from, to));
            }
        }

        message.push_str(
            "\nSummarize what these files do and which of them matter for the objective. \
             Keep it under 300 words.",
        );
        message
    }
}

#[async_trait]
impl Agent for Librarian {
    fn name(&self) -> &'static str {
        "librarian"
    }

    fn config_mut(&mut self) -> &mut AgentConfig {
        &mut self.config
    }

    fn initialize(&mut self, context: &AgentContext) {
        self.input = Some(LibrarianInput {
            objective: context.objective.clone(),
            target_file: context.target_file.clone(),
            working_directory: context.working_directory.clone(),
            escalation_context: context.escalation_context.clone(),
        });
    }

    async fn execute(&mut self) -> Result<AgentResult, AgentError> {
        let input = self.input.clone().ok_or(AgentError::NotInitialized)?;

        let files = scan_source_files(&input.working_directory);
        let graph = build_dependency_graph(&input.working_directory, &files);
        let ranked = rank_files(&graph, input.target_file.as_deref());

        let request = CompletionRequest {
            provider: self.config.provider,
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(
                    "You are the Librarian of an autonomous code-fixing agent. You study a \
                     codebase and produce a concise context summary for the engineer role. \
                     Be factual; do not propose fixes.",
                ),
                ChatMessage::user(Self::build_user_message(&input, &ranked, &graph)),
            ],
            temperature: self.config.temperature,
            max_tokens: 1024,
        };

        let response = self.client.complete(request).await?;
        let tokens_used = response.input_tokens + response.output_tokens;

        if response.content.trim().is_empty() {
            return Ok(AgentResult::invalid_output(
                "librarian returned an empty summary",
                tokens_used,
                response.cost_usd,
            ));
        }

        let report = LibrarianReport {
            relevant_files: ranked,
            dependency_graph: graph,
            context_summary: response.content,
            tokens_used,
            cost_usd: response.cost_usd,
        };

        match serde_json::to_value(&report) {
            Ok(data) => Ok(AgentResult {
                success: true,
                data,
                tokens_used,
                cost_usd: report.cost_usd,
            }),
            Err(e) => Ok(AgentResult::invalid_output(
                format!("unserializable report: {}", e),
                tokens_used,
                report.cost_usd,
            )),
        }
    }
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^\s*(?:import\s+.*?from\s+['"]([^'"]+)['"]|import\s+['"]([^'"]+)['"]|(?:const|let|var)\s+.*?=\s*require\(['"]([^'"]+)['"]\)|from\s+([\w.]+)\s+import|import\s+([\w.]+)|require_relative\s+['"]([^'"]+)['"]|(?:use\s+crate::|mod\s+)(\w+))"#,
        )
        .expect("valid regex")
    })
}

/// Collect workspace-relative source files, skipping dependency and
/// output directories. Deterministic: sorted, capped at [`MAX_SCAN_FILES`].
pub fn scan_source_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|name| !SKIP_DIRS.contains(&name))
                .unwrap_or(true)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    files.sort();
    files.truncate(MAX_SCAN_FILES);
    files
}

/// Build a reference graph by matching import/require/use specifiers
/// against the scanned file set. Heuristic by design: unresolvable
/// specifiers are dropped silently.
pub fn build_dependency_graph(root: &Path, files: &[String]) -> DependencyGraph {
    // Map both full relative paths (without extension) and bare stems to
    // their files so "./util", "pkg.module" and "util" all resolve.
    let mut by_suffix: HashMap<String, String> = HashMap::new();
    for file in files {
        let no_ext = file
            .rsplit_once('.')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| file.clone());
        by_suffix.insert(no_ext.clone(), file.clone());
        if let Some(stem) = no_ext.rsplit('/').next() {
            by_suffix.entry(stem.to_string()).or_insert(file.clone());
        }
    }

    let mut edges: Vec<(String, String)> = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for file in files {
        let path = root.join(file);
        let content = match read_capped(&path) {
            Some(content) => content,
            None => continue,
        };

        for caps in import_re().captures_iter(&content) {
            let specifier = (1..=7).find_map(|i| caps.get(i)).map(|m| m.as_str());
            let Some(specifier) = specifier else { continue };

            if let Some(dest) = resolve_specifier(file, specifier, &by_suffix) {
                if dest != *file && seen.insert((file.clone(), dest.clone())) {
                    edges.push((file.clone(), dest));
                }
            }
        }
    }

    DependencyGraph {
        nodes: files.to_vec(),
        edges,
    }
}

fn read_capped(path: &Path) -> Option<String> {
    let metadata = std::fs::metadata(path).ok()?;
    if metadata.len() > MAX_READ_BYTES {
        return None;
    }
    std::fs::read_to_string(path).ok()
}

fn resolve_specifier(
    from: &str,
    specifier: &str,
    by_suffix: &HashMap<String, String>,
) -> Option<String> {
    let cleaned = specifier.trim().trim_end_matches(".js").trim_end_matches(".ts");

    // Relative import: resolve against the importing file's directory.
    if cleaned.starts_with('.') {
        let dir = Path::new(from).parent().unwrap_or_else(|| Path::new(""));
        let joined = normalize_path(&dir.join(cleaned));
        return by_suffix.get(&joined).cloned();
    }

    // Dotted module (python) or plain name: match on suffix/stem.
    let slashed = cleaned.replace('.', "/");
    by_suffix
        .get(&slashed)
        .or_else(|| by_suffix.get(cleaned))
        .or_else(|| slashed.rsplit('/').next().and_then(|stem| by_suffix.get(stem)))
        .cloned()
}

fn normalize_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for component in raw.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Rank files by BFS shortest-path distance from the target, ascending,
/// ties broken lexicographically. The target itself and every distance-1
/// neighbor are always present when they exist; files disconnected from
/// the target sort after all reachable ones.
pub fn rank_files(graph: &DependencyGraph, target: Option<&Path>) -> Vec<String> {
    let target_rel = target.map(|p| p.to_string_lossy().replace('\\', "/"));

    let Some(target_rel) = target_rel else {
        // No target: plain lexicographic order.
        let mut all = graph.nodes.clone();
        all.sort();
        all.truncate(MAX_RELEVANT_FILES);
        return all;
    };

    // Undirected adjacency: being imported is as relevant as importing.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in &graph.edges {
        adjacency.entry(from).or_default().push(to);
        adjacency.entry(to).or_default().push(from);
    }

    let mut distance: HashMap<&str, u32> = HashMap::new();
    // Match on exact relative path or path suffix (targets are often
    // given as bare filenames).
    let start = graph
        .nodes
        .iter()
        .find(|n| **n == target_rel || n.ends_with(&format!("/{}", target_rel)))
        .map(|s| s.as_str());

    if let Some(start) = start {
        let mut queue = VecDeque::new();
        distance.insert(start, 0);
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            let d = distance[current];
            if let Some(neighbors) = adjacency.get(current) {
                for neighbor in neighbors {
                    if !distance.contains_key(*neighbor) {
                        distance.insert(*neighbor, d + 1);
                        queue.push_back(*neighbor);
                    }
                }
            }
        }
    }

    let mut ranked: Vec<(u32, &String)> = graph
        .nodes
        .iter()
        .map(|n| (distance.get(n.as_str()).copied().unwrap_or(u32::MAX), n))
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    // The target and its direct neighbors are always kept, even past the
    // cap.
    let guaranteed = ranked.iter().take_while(|(d, _)| *d <= 1).count();
    ranked
        .into_iter()
        .take(MAX_RELEVANT_FILES.max(guaranteed))
        .map(|(_, n)| n.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_skips_dependency_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.js", "");
        write(dir.path(), "node_modules/lib/index.js", "");
        write(dir.path(), "notes.txt", "");

        let files = scan_source_files(dir.path());
        assert_eq!(files, vec!["app.js"]);
    }

    #[test]
    fn test_graph_edges_from_relative_imports() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.js", "import { add } from './util';\n");
        write(dir.path(), "util.js", "module.exports = {};\n");

        let files = scan_source_files(dir.path());
        let graph = build_dependency_graph(dir.path(), &files);
        assert!(graph
            .edges
            .contains(&("app.js".to_string(), "util.js".to_string())));
    }

    #[test]
    fn test_graph_edges_from_python_imports() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.py", "from helpers import load\n");
        write(dir.path(), "helpers.py", "def load(): pass\n");

        let files = scan_source_files(dir.path());
        let graph = build_dependency_graph(dir.path(), &files);
        assert!(graph
            .edges
            .contains(&("main.py".to_string(), "helpers.py".to_string())));
    }

    #[test]
    fn test_ranking_orders_by_distance_then_path() {
        let graph = DependencyGraph {
            nodes: vec![
                "a.py".into(),
                "b.py".into(),
                "c.py".into(),
                "far.py".into(),
                "island.py".into(),
            ],
            edges: vec![
                ("a.py".into(), "b.py".into()),
                ("a.py".into(), "c.py".into()),
                ("c.py".into(), "far.py".into()),
            ],
        };

        let ranked = rank_files(&graph, Some(Path::new("a.py")));
        assert_eq!(ranked[0], "a.py");
        // Distance-1 neighbors, lexicographic tie-break.
        assert_eq!(&ranked[1..3], &["b.py".to_string(), "c.py".to_string()]);
        assert_eq!(ranked[3], "far.py");
        // Disconnected file sorts last.
        assert_eq!(ranked[4], "island.py");
    }

    #[test]
    fn test_ranking_matches_bare_filename_target() {
        let graph = DependencyGraph {
            nodes: vec!["src/app.js".into(), "src/util.js".into()],
            edges: vec![("src/app.js".into(), "src/util.js".into())],
        };
        let ranked = rank_files(&graph, Some(Path::new("app.js")));
        assert_eq!(ranked[0], "src/app.js");
    }

    #[test]
    fn test_prior_attempts_header_comes_first() {
        let input = LibrarianInput {
            objective: "fix it".into(),
            target_file: Some(PathBuf::from("a.py")),
            working_directory: PathBuf::from("/tmp"),
            escalation_context: Some("iteration 1 failed".into()),
        };
        let message = Librarian::build_user_message(&input, &["a.py".into()], &DependencyGraph::default());
        assert!(message.starts_with("PRIOR ATTEMPTS:\niteration 1 failed"));
    }
}
