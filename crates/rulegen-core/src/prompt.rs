//! Prompt construction for one library.
//!
//! Every job gets a shared preamble (instructions, library details, coverage
//! list and the JSON output contract) and a payload. The payload is built from
//! the library's research when there is enough of it: hand-written notes in
//! `<research_dir>/<slug>.md` first, then a fetched result in
//! `<research_dir>/<slug>.json`. Otherwise it is a short "use your own
//! knowledge" directive. Only the payload is chunked.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::catalog::LibraryEntry;
use crate::job::Job;
use crate::research::ResearchCache;

/// Instructions used when the instructions file is missing or unreadable.
pub const DEFAULT_INSTRUCTIONS: &str =
    "Create rules with clear descriptions and appropriate glob patterns.";

/// Research notes shorter than this (after trimming) are ignored.
pub const MIN_RESEARCH_CHARS: usize = 100;

const COVERAGE: &[(&str, &[&str])] = &[
    ("Code Organization and Structure", &[
        "Directory structure best practices",
        "File naming conventions",
        "Module organization",
        "Component architecture",
        "Code splitting strategies",
    ]),
    ("Common Patterns and Anti-patterns", &[
        "Design patterns specific to {library}",
        "Recommended approaches for common tasks",
        "Anti-patterns and code smells to avoid",
        "State management best practices",
        "Error handling patterns",
    ]),
    ("Performance Considerations", &[
        "Optimization techniques",
        "Memory management",
        "Rendering optimization",
        "Bundle size optimization",
        "Lazy loading strategies",
    ]),
    ("Security Best Practices", &[
        "Common vulnerabilities and how to prevent them",
        "Input validation",
        "Authentication and authorization patterns",
        "Data protection strategies",
        "Secure API communication",
    ]),
    ("Testing Approaches", &[
        "Unit testing strategies",
        "Integration testing",
        "End-to-end testing",
        "Test organization",
        "Mocking and stubbing",
    ]),
    ("Common Pitfalls and Gotchas", &[
        "Frequent mistakes developers make",
        "Edge cases to be aware of",
        "Version-specific issues",
        "Compatibility concerns",
        "Debugging strategies",
    ]),
    ("Tooling and Environment", &[
        "Recommended development tools",
        "Build configuration",
        "Linting and formatting",
        "Deployment best practices",
        "CI/CD integration",
    ]),
];

/// Builds [`Job`]s from catalog entries.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    instructions: String,
    research_dir: Option<PathBuf>,
}

impl PromptBuilder {
    /// Builder with literal instructions and no research notes.
    #[must_use]
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            research_dir: None,
        }
    }

    /// Builder reading instructions from `instructions_path`.
    ///
    /// Falls back to [`DEFAULT_INSTRUCTIONS`] when the file cannot be read.
    #[must_use]
    pub fn from_file(instructions_path: &Path) -> Self {
        let instructions = match fs::read_to_string(instructions_path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("instructions file {} is empty", instructions_path.display());
                DEFAULT_INSTRUCTIONS.to_string()
            },
            Err(err) => {
                warn!(
                    "instructions file {} not usable ({err}), using defaults",
                    instructions_path.display()
                );
                DEFAULT_INSTRUCTIONS.to_string()
            },
        };
        Self::new(instructions)
    }

    /// Look for research notes in `dir`.
    #[must_use]
    pub fn with_research_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.research_dir = Some(dir.into());
        self
    }

    /// Instructions text in use.
    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Shared part of every chunk prompt for `entry`.
    #[must_use]
    pub fn preamble(&self, entry: &LibraryEntry) -> String {
        let library = entry.name.as_str();
        let mut out = String::with_capacity(4096);

        let _ = writeln!(
            out,
            "Create a comprehensive Cursor rule file (.mdc) for the {library} library following these guidelines:\n"
        );
        let _ = writeln!(out, "{}\n", self.instructions.trim_end());
        let _ = writeln!(out, "Library Information:");
        let _ = writeln!(out, "- Name: {library}");
        let _ = writeln!(out, "- Category: {}", entry.category);
        let _ = writeln!(out, "- Subcategory: {}\n", entry.subcategory);
        let _ = writeln!(
            out,
            "Your task is to create an EXTREMELY DETAILED and COMPREHENSIVE guide that covers:\n"
        );
        for (number, (section, topics)) in COVERAGE.iter().enumerate() {
            let _ = writeln!(out, "{}. {section}:", number + 1);
            for topic in *topics {
                let _ = writeln!(out, "   - {}", topic.replace("{library}", library));
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "Format your response as a valid JSON object with exactly these keys:"
        );
        let _ = writeln!(
            out,
            "  - name: a short descriptive name for the rule (e.g., \"{library} Best Practices\")"
        );
        let _ = writeln!(
            out,
            "  - glob_pattern: the most appropriate glob pattern for this library based on the file types it typically works with"
        );
        let _ = writeln!(
            out,
            "  - description: a clear 1-2 sentence description of what the rule covers"
        );
        let _ = writeln!(
            out,
            "  - content: the formatted rule content with comprehensive best practices in markdown format"
        );
        out
    }

    /// Research material for `entry`, if present and substantial.
    #[must_use]
    pub fn research_notes(&self, entry: &LibraryEntry) -> Option<String> {
        let dir = self.research_dir.as_ref()?;
        written_notes(dir, entry).or_else(|| {
            let material = ResearchCache::new(dir).load(entry)?.material();
            if material.is_none() {
                debug!(library = %entry.id(), "fetched research too thin, ignoring");
            }
            material
        })
    }

    /// Splittable payload for `entry`.
    #[must_use]
    pub fn payload(&self, entry: &LibraryEntry) -> String {
        let library = entry.name.as_str();
        self.research_notes(entry).map_or_else(
            || {
                format!(
                    "I need you to research and generate comprehensive best practices for {library} from your knowledge.\n\n\
                     Please be extremely thorough and detailed, covering all aspects of {library} development.\n\
                     Your guidance should be useful for both beginners and experienced developers."
                )
            },
            |notes| {
                format!(
                    "Based on the following research notes about {library} best practices, synthesize, enhance, \
                     and expand upon this information. Add any important best practices that are missing.\n\n{}",
                    notes.trim()
                )
            },
        )
    }

    /// Pending job for `entry`.
    #[must_use]
    pub fn build_job(&self, entry: &LibraryEntry) -> Job {
        Job::new(entry.id(), self.preamble(entry), self.payload(entry))
    }
}

fn written_notes(dir: &Path, entry: &LibraryEntry) -> Option<String> {
    let path = dir.join(format!("{}.md", entry.slug()));
    match fs::read_to_string(&path) {
        Ok(notes) if notes.trim().chars().count() >= MIN_RESEARCH_CHARS => Some(notes),
        Ok(_) => {
            debug!(library = %entry.id(), "research notes too short, ignoring");
            None
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!("could not read research notes {}: {err}", path.display());
            None
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry() -> LibraryEntry {
        LibraryEntry::new("frontend_frameworks", "react", "Next.js")
    }

    #[test]
    fn test_preamble_contains_contract_and_sections() {
        let builder = PromptBuilder::new("Be concise.");
        let preamble = builder.preamble(&entry());

        assert!(preamble.contains("Be concise."));
        assert!(preamble.contains("- Category: frontend_frameworks"));
        assert!(preamble.contains("1. Code Organization and Structure:"));
        assert!(preamble.contains("7. Tooling and Environment:"));
        assert!(preamble.contains("Design patterns specific to Next.js"));
        for key in ["name:", "glob_pattern:", "description:", "content:"] {
            assert!(preamble.contains(key), "missing {key}");
        }
    }

    #[test]
    fn test_missing_instructions_fall_back() {
        let dir = TempDir::new().unwrap();
        let builder = PromptBuilder::from_file(&dir.path().join("absent.txt"));
        assert_eq!(builder.instructions(), DEFAULT_INSTRUCTIONS);
    }

    #[test]
    fn test_instructions_are_read_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instructions.txt");
        fs::write(&path, "Use frontmatter.").unwrap();
        assert_eq!(PromptBuilder::from_file(&path).instructions(), "Use frontmatter.");
    }

    #[test]
    fn test_payload_without_research_uses_knowledge_directive() {
        let builder = PromptBuilder::new("x");
        let payload = builder.payload(&entry());
        assert!(payload.contains("from your knowledge"));
        assert!(payload.contains("Next.js"));
    }

    #[test]
    fn test_payload_uses_substantial_research_notes() {
        let dir = TempDir::new().unwrap();
        let notes = "Prefer server components. ".repeat(10);
        fs::write(dir.path().join("next-js.md"), &notes).unwrap();

        let builder = PromptBuilder::new("x").with_research_dir(dir.path());
        let payload = builder.payload(&entry());
        assert!(payload.contains("research notes"));
        assert!(payload.contains("Prefer server components."));
    }

    #[test]
    fn test_short_research_notes_are_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("next-js.md"), "too short").unwrap();

        let builder = PromptBuilder::new("x").with_research_dir(dir.path());
        assert!(builder.research_notes(&entry()).is_none());
        assert!(builder.payload(&entry()).contains("from your knowledge"));
    }

    #[test]
    fn test_payload_uses_fetched_research() {
        let dir = TempDir::new().unwrap();
        let fetched = serde_json::json!({
            "answer": "Use the app router. ".repeat(8),
            "citations": [{ "url": "https://nextjs.org", "text": "Colocate data fetching." }]
        });
        fs::write(dir.path().join("next-js.json"), fetched.to_string()).unwrap();

        let builder = PromptBuilder::new("x").with_research_dir(dir.path());
        let payload = builder.payload(&entry());
        assert!(payload.contains("Search results:\nUse the app router."));
        assert!(payload.contains("Additional information from citations:\nColocate data fetching."));
        assert!(!payload.contains("from your knowledge"));
    }

    #[test]
    fn test_written_notes_win_over_fetched_research() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("next-js.md"), "Prefer server components. ".repeat(10)).unwrap();
        let fetched = serde_json::json!({ "answer": "Use the app router. ".repeat(8) });
        fs::write(dir.path().join("next-js.json"), fetched.to_string()).unwrap();

        let builder = PromptBuilder::new("x").with_research_dir(dir.path());
        let payload = builder.payload(&entry());
        assert!(payload.contains("Prefer server components."));
        assert!(!payload.contains("app router"));
    }

    #[test]
    fn test_thin_fetched_research_is_ignored() {
        let dir = TempDir::new().unwrap();
        let fetched = serde_json::json!({ "answer": "Use hooks.", "citations": [] });
        fs::write(dir.path().join("next-js.json"), fetched.to_string()).unwrap();

        let builder = PromptBuilder::new("x").with_research_dir(dir.path());
        assert!(builder.payload(&entry()).contains("from your knowledge"));
    }

    #[test]
    fn test_build_job_is_pending_with_catalog_id() {
        let job = PromptBuilder::new("x").build_job(&entry());
        assert_eq!(job.id.as_str(), "frontend_frameworks/react/Next.js");
        assert_eq!(job.status, crate::job::JobStatus::Pending);
        assert!(job.preamble.contains("Library Information"));
    }
}
