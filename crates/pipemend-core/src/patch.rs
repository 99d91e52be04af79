//! Mechanical text patches applied to a pipeline definition.
//!
//! Each function returns `None` when the input already has the change or
//! offers nowhere to apply it; callers treat that as "no patch".

use crate::error::{PipemendError, Result};
use crate::pipeline::PipelineDefinition;
use regex::Regex;
use std::sync::OnceLock;

const WRAPPER_STEP_NAME: &str = "- name: Make gradlew executable";
const WRAPPER_STEP_RUN: &str = "  run: chmod +x gradlew";
const TEST_FLAGS: &str = "--continue --no-daemon";

pub fn has_wrapper_permission_step(content: &str) -> bool {
    content.contains("chmod +x gradlew") || content.contains("chmod +x ./gradlew")
}

/// Insert a `chmod +x gradlew` step before the first step whose header or
/// body invokes `./gradlew`, at that step's indentation.
pub fn insert_wrapper_permission(content: &str) -> Option<String> {
    if has_wrapper_permission_step(content) {
        return None;
    }
    let lines: Vec<&str> = content.split('\n').collect();
    let target = (0..lines.len())
        .filter(|&i| is_list_item(lines[i]))
        .find(|&i| lines[i..item_end(&lines, i)].iter().any(|l| l.contains("./gradlew")))?;

    let pad = " ".repeat(leading_spaces(lines[target]));
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 2);
    for (i, line) in lines.iter().enumerate() {
        if i == target {
            out.push(format!("{pad}{WRAPPER_STEP_NAME}"));
            out.push(format!("{pad}{WRAPPER_STEP_RUN}"));
        }
        out.push((*line).to_string());
    }
    Some(out.join("\n"))
}

/// Append `--continue --no-daemon` to Gradle wrapper test invocations.
pub fn add_test_flags(content: &str) -> Option<String> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut out: Vec<String> = lines.iter().map(|l| (*l).to_string()).collect();
    let mut changed = false;

    for i in 0..lines.len().saturating_sub(1) {
        let header = lines[i].trim_start();
        if !(header.starts_with("- name:") && header.to_lowercase().contains("test")) {
            continue;
        }
        let run = lines[i + 1];
        if run.contains("run:")
            && run.contains("./gradlew")
            && run.contains("test")
            && !run.contains("--continue")
        {
            out[i + 1] = format!("{} {TEST_FLAGS}", run.trim_end());
            changed = true;
        }
    }

    changed.then(|| out.join("\n"))
}

/// Rewrite `java-version` pins of 8, 11 or 21 to 17.
///
/// Scalar values, flow lists and block lists (the matrix form) are all
/// rewritten; a list that ends up with duplicates keeps one `'17'`.
pub fn pin_java_version(content: &str) -> Option<String> {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    let (scalar, flow) = PATTERNS
        .get_or_init(|| {
            let scalar = Regex::new(r#"^(\s*java-version:\s*)['"]?(?:8|11|21)['"]?\s*$"#).ok()?;
            let flow = Regex::new(r"^(\s*java-version:\s*)\[([^\]]*)\]\s*$").ok()?;
            Some((scalar, flow))
        })
        .as_ref()?;

    let lines: Vec<&str> = content.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut changed = false;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if scalar.is_match(line) {
            out.push(scalar.replace(line, "${1}'17'").into_owned());
            changed = true;
            continue;
        }
        if let Some(caps) = flow.captures(line) {
            let versions: Vec<&str> = caps[2].split(',').map(str::trim).collect();
            if let Some(pinned) = pin_versions(&versions) {
                let quoted: Vec<String> = pinned.iter().map(|v| format!("'{v}'")).collect();
                out.push(format!("{}[{}]", &caps[1], quoted.join(", ")));
                changed = true;
                continue;
            }
        }
        if line.trim() == "java-version:" {
            let key_indent = leading_spaces(line);
            let start = i;
            while i < lines.len()
                && is_list_item(lines[i])
                && leading_spaces(lines[i]) >= key_indent
            {
                i += 1;
            }
            out.push(line.to_string());
            let items = &lines[start..i];
            let versions: Vec<&str> = items
                .iter()
                .map(|l| l.trim_start().trim_start_matches('-').trim())
                .collect();
            match pin_versions(&versions) {
                Some(pinned) => {
                    let pad = " ".repeat(leading_spaces(items[0]));
                    out.extend(pinned.iter().map(|v| format!("{pad}- '{v}'")));
                    changed = true;
                }
                None => out.extend(items.iter().map(|l| (*l).to_string())),
            }
            continue;
        }
        out.push(line.to_string());
    }

    changed.then(|| out.join("\n"))
}

/// Map incompatible versions to 17, dropping duplicates. `None` when no
/// entry needed rewriting.
fn pin_versions(raw: &[&str]) -> Option<Vec<String>> {
    let mut changed = false;
    let mut pinned: Vec<String> = Vec::with_capacity(raw.len());
    for v in raw {
        let bare = v.trim_matches(&['\'', '"'][..]);
        if bare.is_empty() {
            continue;
        }
        let version = if matches!(bare, "8" | "11" | "21") {
            changed = true;
            "17"
        } else {
            bare
        };
        if !pinned.iter().any(|p| p == version) {
            pinned.push(version.to_string());
        }
    }
    changed.then_some(pinned)
}

/// Pull a complete pipeline out of a model response.
///
/// The text between the first pair of code fences is used when present;
/// it must parse as a structurally valid definition.
pub fn extract_pipeline(response: &str) -> Result<String> {
    let body = ollama_client::extract_code_block(response);
    if body.is_empty() {
        return Err(PipemendError::InvalidPipeline(
            "model returned an empty response".to_string(),
        ));
    }
    let parsed = PipelineDefinition::parse(&body)?;
    if parsed.jobs.is_empty() {
        return Err(PipemendError::InvalidPipeline("no jobs defined".to_string()));
    }
    Ok(format!("{body}\n"))
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_list_item(line: &str) -> bool {
    let t = line.trim_start();
    t == "-" || t.starts_with("- ")
}

/// One past the last line of the list item starting at `start`: the next
/// non-blank line indented at or left of the item's dash ends it.
fn item_end(lines: &[&str], start: usize) -> usize {
    let indent = leading_spaces(lines[start]);
    lines
        .iter()
        .enumerate()
        .skip(start + 1)
        .find(|(_, l)| !l.trim().is_empty() && leading_spaces(l) <= indent)
        .map_or(lines.len(), |(i, _)| i)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GRADLE: &str = "\
name: CI
on: [push]
jobs:
  ci:
    runs-on: ubuntu-latest
    steps:
      - name: Checkout code
        uses: actions/checkout@v4
      - name: Set up JDK
        uses: actions/setup-java@v4
        with:
          java-version: '11'
          distribution: temurin
      - name: Run tests
        run: ./gradlew test
      - name: Build with Gradle
        run: ./gradlew build
";

    #[test]
    fn wrapper_step_inserted_before_first_invocation() {
        let patched = insert_wrapper_permission(GRADLE).unwrap();
        let lines: Vec<&str> = patched.lines().collect();
        let chmod = lines
            .iter()
            .position(|l| l.contains("chmod +x gradlew"))
            .unwrap();
        let first_invocation = lines.iter().position(|l| l.contains("./gradlew")).unwrap();
        assert!(chmod < first_invocation);
        assert_eq!(lines[chmod - 1], "      - name: Make gradlew executable");
        assert_eq!(lines[chmod], "        run: chmod +x gradlew");
        assert!(PipelineDefinition::parse(&patched).is_ok());
        assert!(patched.ends_with('\n'));
    }

    #[test]
    fn wrapper_step_targets_the_invoking_step() {
        let content = "steps:\n  - name: Checkout\n    uses: actions/checkout@v4\n  - name: Test\n    run: ./gradlew test\n";
        let patched = insert_wrapper_permission(content).unwrap();
        let checkout = patched.find("Checkout").unwrap();
        let chmod = patched.find("chmod +x gradlew").unwrap();
        assert!(checkout < chmod);
    }

    #[test]
    fn unnamed_invocation_is_a_step() {
        let content = "\
jobs:
  ci:
    steps:
      - uses: actions/checkout@v4
      - run: ./gradlew assemble
      - name: Run tests
        run: ./gradlew test
";
        let patched = insert_wrapper_permission(content).unwrap();
        let chmod = patched.find("chmod +x gradlew").unwrap();
        assert!(chmod < patched.find("./gradlew").unwrap());
        assert!(patched.contains(
            "      - uses: actions/checkout@v4\n      - name: Make gradlew executable\n        run: chmod +x gradlew\n      - run: ./gradlew assemble"
        ));

        let unnamed = "steps:\n- uses: actions/checkout@v4\n- run: ./gradlew build\n";
        let patched = insert_wrapper_permission(unnamed).unwrap();
        assert_eq!(
            patched,
            "steps:\n- uses: actions/checkout@v4\n- name: Make gradlew executable\n  run: chmod +x gradlew\n- run: ./gradlew build\n"
        );
    }

    #[test]
    fn invocation_deep_in_block_scalar_is_found() {
        let content = "\
on: [push]
jobs:
  ci:
    runs-on: ubuntu-latest
    steps:
      - name: Checkout
        uses: actions/checkout@v4
      - name: Build
        run: |
          echo one
          echo two
          echo three
          echo four
          echo five
          ./gradlew build
";
        let patched = insert_wrapper_permission(content).unwrap();
        let lines: Vec<&str> = patched.lines().collect();
        let chmod = lines.iter().position(|l| l.contains("chmod +x gradlew")).unwrap();
        assert_eq!(lines[chmod - 1], "      - name: Make gradlew executable");
        assert_eq!(lines[chmod + 1], "      - name: Build");
        assert!(PipelineDefinition::parse(&patched).is_ok());
    }

    #[test]
    fn wrapper_patch_is_idempotent() {
        let once = insert_wrapper_permission(GRADLE).unwrap();
        assert!(insert_wrapper_permission(&once).is_none());
        assert_eq!(once.matches("chmod +x gradlew").count(), 1);
    }

    #[test]
    fn wrapper_patch_needs_an_invocation() {
        let content = "jobs:\n  ci:\n    steps:\n      - name: Test\n        run: mvn test\n";
        assert!(insert_wrapper_permission(content).is_none());
    }

    #[test]
    fn test_flags_appended_once() {
        let patched = add_test_flags(GRADLE).unwrap();
        assert!(patched.contains("run: ./gradlew test --continue --no-daemon"));
        assert!(patched.contains("run: ./gradlew build\n"));
        assert!(add_test_flags(&patched).is_none());
    }

    #[test]
    fn java_version_pinned() {
        let patched = pin_java_version(GRADLE).unwrap();
        assert!(patched.contains("java-version: '17'"));
        assert!(!patched.contains("'11'"));
        assert!(pin_java_version(&patched).is_none());

        let unquoted = pin_java_version("        java-version: 21\n").unwrap();
        assert_eq!(unquoted, "        java-version: '17'\n");
    }

    #[test]
    fn java_version_lists_pinned() {
        let flow = pin_java_version("      java-version: ['11', \"17\", 22]\n").unwrap();
        assert_eq!(flow, "      java-version: ['17', '22']\n");

        let block = "        java-version:\n        - '11'\n        - '17'\n        fail-fast: false\n";
        assert_eq!(
            pin_java_version(block).unwrap(),
            "        java-version:\n        - '17'\n        fail-fast: false\n"
        );
        assert!(pin_java_version("java-version:\n- '17'\n").is_none());
    }

    #[test]
    fn rendered_java_matrix_is_pinned() {
        use crate::renderer::{PipelineRenderer, TemplateRenderer};
        use crate::state::RepositoryMetadata;
        use crate::types::Language;

        let meta = RepositoryMetadata {
            language: Language::Java,
            language_version: Some("17".to_string()),
            build_tool: Some("gradle".to_string()),
            has_tests: true,
            ..RepositoryMetadata::generic("octo/demo")
        };
        let text = TemplateRenderer.render(&meta, "main").unwrap();
        let patched = pin_java_version(&text).unwrap();

        let def = PipelineDefinition::parse(&patched).unwrap();
        let strategy = def.jobs["ci"].strategy.as_ref().unwrap();
        let matrix = strategy["matrix"]["java-version"].as_sequence().unwrap();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].as_str(), Some("17"));
        assert!(pin_java_version(&patched).is_none());
    }

    #[test]
    fn extract_pipeline_from_fenced_reply() {
        let reply = "Here you go:\n```yaml\non: push\njobs:\n  ci:\n    runs-on: ubuntu-latest\n    steps:\n      - run: make\n```\nDone.";
        let body = extract_pipeline(reply).unwrap();
        assert!(body.starts_with("on: push"));
        assert!(!body.contains("```"));
    }

    #[test]
    fn extract_pipeline_rejects_prose() {
        assert!(extract_pipeline("I cannot help with that.").is_err());
        assert!(extract_pipeline("").is_err());
        assert!(extract_pipeline("```yaml\non: push\njobs: {}\n```").is_err());
    }
}
