//! Conversion prompts and reply parsing

use std::collections::BTreeMap;

use serde::Deserialize;

use super::assemble::target_extension;
use crate::core::query::SYSTEM_PROMPT;
use crate::llm::Prompt;

/// Converted output of a dependency, already finished
#[derive(Debug, Clone)]
pub struct ConvertedDependency<'a> {
    pub source_path: &'a str,
    pub output: &'a str,
}

/// Pre-conversion source of a cycle peer
#[derive(Debug, Clone)]
pub struct PeerSource<'a> {
    pub path: &'a str,
    pub source: &'a str,
}

/// Everything one unit's prompt is built from
#[derive(Debug, Clone)]
pub struct UnitPrompt<'a> {
    pub source_language: &'a str,
    pub source_framework: Option<&'a str>,
    pub target_language: &'a str,
    pub target_framework: Option<&'a str>,
    pub source_path: &'a str,
    pub source: &'a str,
    pub dependencies: Vec<ConvertedDependency<'a>>,
    pub cycle_peers: Vec<PeerSource<'a>>,
    /// Upper bound on the characters spent on dependency and peer context
    pub context_budget: usize,
}

fn is_set(framework: Option<&str>) -> Option<&str> {
    framework.filter(|f| !f.is_empty() && *f != "none")
}

impl UnitPrompt<'_> {
    /// Target file name suggested to the model
    fn target_file_name(&self) -> String {
        let file_name = self.source_path.rsplit('/').next().unwrap_or(self.source_path);
        let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
        format!("{}.{}", stem, target_extension(self.target_language))
    }

    fn conversion_type(&self) -> String {
        if self.source_language.eq_ignore_ascii_case(self.target_language) {
            match (is_set(self.source_framework), is_set(self.target_framework)) {
                (Some(from), Some(to)) if from != to => {
                    format!("Convert from {} to {} framework", from, to)
                }
                (None, Some(to)) => format!("Modernize and refactor onto the {} framework", to),
                _ => "Modernize and refactor".to_string(),
            }
        } else {
            format!("Convert from {} to {}", self.source_language, self.target_language)
        }
    }

    /// Dependency outputs then peer sources, while they fit the budget
    fn context_section(&self) -> String {
        let mut out = String::new();
        let mut omitted = Vec::new();

        if !self.dependencies.is_empty() {
            out.push_str(&format!(
                "\nAlready converted dependencies ({}), use their names and signatures:\n",
                self.target_language
            ));
            for dep in &self.dependencies {
                let block = format!("\n--- {} ---\n{}\n", dep.source_path, dep.output);
                if out.len() + block.len() > self.context_budget {
                    omitted.push(dep.source_path);
                    continue;
                }
                out.push_str(&block);
            }
        }

        if !self.cycle_peers.is_empty() {
            out.push_str(&format!(
                "\nThis file is part of a dependency cycle. The other files of the cycle are \
                 converted independently; their original {} source follows:\n",
                self.source_language
            ));
            for peer in &self.cycle_peers {
                let block = format!("\n--- {} ---\n{}\n", peer.path, peer.source);
                if out.len() + block.len() > self.context_budget {
                    omitted.push(peer.path);
                    continue;
                }
                out.push_str(&block);
            }
        }

        if !omitted.is_empty() {
            out.push_str(&format!("\nAlso depends on (not shown): {}\n", omitted.join(", ")));
        }
        out
    }

    pub fn build(&self) -> Prompt {
        let mut framework_info = String::new();
        if let Some(framework) = is_set(self.source_framework) {
            framework_info.push_str(&format!("\nSource Framework: {}", framework));
        }
        if let Some(framework) = is_set(self.target_framework) {
            framework_info.push_str(&format!("\nTarget Framework: {}", framework));
        }
        let target_file = self.target_file_name();

        let user = format!(
            r#"{conversion} this {source_language} file.{framework_info}

Original file: {source_path}
Target file: {target_file}
{context}
IMPORTANT: You must respond with ONLY valid JSON. No additional text, no explanations outside the JSON.

Required JSON format:
{{
    "filename": "{target_file}",
    "content": "// Your {target_language} code here",
    "dependencies": {{
        "package_name": "version"
    }},
    "notes": "Brief conversion notes"
}}

Source code:
```{source_language}
{source}
```

Conversion rules:
1. Write ONLY valid {target_language} code in the "content" field
2. Use proper {target_language} syntax and best practices
3. Include necessary imports and dependencies
4. Maintain the original functionality
5. Refer to already converted dependencies by their converted names
6. Ensure the JSON is properly formatted with escaped quotes and newlines

Respond with ONLY the JSON object, no other text."#,
            conversion = self.conversion_type(),
            source_language = self.source_language,
            framework_info = framework_info,
            source_path = self.source_path,
            target_file = target_file,
            context = self.context_section(),
            target_language = self.target_language,
            source = self.source,
        );

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

/// Startup file request for a finished job whose outputs lack one
#[derive(Debug, Clone)]
pub struct EntryPointPrompt<'a> {
    pub target_language: &'a str,
    pub target_framework: Option<&'a str>,
    pub path: &'a str,
    /// Output paths of the converted units
    pub files: &'a [&'a str],
}

impl EntryPointPrompt<'_> {
    pub fn build(&self) -> Prompt {
        let file_name = self.path.rsplit('/').next().unwrap_or(self.path);
        let framework_info = is_set(self.target_framework)
            .map(|f| format!(" using the {} framework", f))
            .unwrap_or_default();
        let files: String = self.files.iter().map(|f| format!("- {}\n", f)).collect();

        let user = format!(
            r#"Create a startup file for a {target_language} application{framework_info}.

Entry point: {path}
Filename: {file_name}

The application consists of these converted files:
{files}
IMPORTANT: You must respond with ONLY valid JSON. No additional text, no explanations outside the JSON.

Required JSON format:
{{
    "filename": "{file_name}",
    "content": "// Your {target_language} code here",
    "dependencies": {{
        "package_name": "version"
    }},
    "notes": "Startup file for a {target_language} application{framework_info}"
}}

Guidelines:
1. Create a simple, runnable startup file
2. Wire up the converted files where an entry point would
3. Include framework initialization and configuration when a framework is used
4. The "content" field holds ONLY {target_language} code, not JSON or markdown

Respond with ONLY the JSON object, no other text."#,
            target_language = self.target_language,
            framework_info = framework_info,
            path = self.path,
            file_name = file_name,
            files = files,
        );

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

/// Parsed model reply for one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedUnit {
    pub content: String,
    pub dependencies: BTreeMap<String, String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    content: String,
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    notes: Option<String>,
}

/// Parse a reply: the JSON object first, then a fenced code block, then the
/// raw text
pub fn parse_reply(text: &str) -> Result<ConvertedUnit, String> {
    if let Some(unit) = parse_json_reply(text) {
        return Ok(unit);
    }
    if let Some(code) = fenced_block(text) {
        return Ok(ConvertedUnit {
            content: code.to_string(),
            dependencies: BTreeMap::new(),
            notes: Some("extracted from a fenced code block".to_string()),
        });
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("completion returned no content".to_string());
    }
    Ok(ConvertedUnit {
        content: format!("{}\n", trimmed),
        dependencies: BTreeMap::new(),
        notes: Some("reply was not JSON; raw text kept".to_string()),
    })
}

fn parse_json_reply(text: &str) -> Option<ConvertedUnit> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let reply: Reply = serde_json::from_str(&text[start..=end]).ok()?;
    if reply.content.trim().is_empty() {
        return None;
    }
    let dependencies = reply
        .dependencies
        .into_iter()
        .map(|(name, version)| {
            let version = match version {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, version)
        })
        .collect();
    Some(ConvertedUnit {
        content: reply.content,
        dependencies,
        notes: reply.notes.filter(|n| !n.is_empty()),
    })
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    let code = &body[..close];
    if code.trim().is_empty() {
        None
    } else {
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit<'a>() -> UnitPrompt<'a> {
        UnitPrompt {
            source_language: "python",
            source_framework: Some("none"),
            target_language: "go",
            target_framework: None,
            source_path: "pkg/a.py",
            source: "def f():\n    return g()\n",
            dependencies: vec![ConvertedDependency {
                source_path: "b.py",
                output: "func G() int { return 1 }",
            }],
            cycle_peers: vec![],
            context_budget: 10_000,
        }
    }

    #[test]
    fn test_prompt_contents() {
        let prompt = unit().build();
        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert!(prompt.user.starts_with("Convert from python to go this python file."));
        assert!(prompt.user.contains("Target file: a.go"));
        assert!(prompt.user.contains("--- b.py ---\nfunc G() int { return 1 }"));
        assert!(prompt.user.contains("```python\ndef f():"));
        assert!(!prompt.user.contains("Source Framework"));
        assert!(!prompt.user.contains("dependency cycle"));
    }

    #[test]
    fn test_cycle_peers_and_budget() {
        let long_source = "x = 1\n".repeat(100);
        let mut request = unit();
        request.dependencies.clear();
        request.cycle_peers = vec![
            PeerSource {
                path: "b.py",
                source: "import a\n",
            },
            PeerSource {
                path: "c.py",
                source: &long_source,
            },
        ];
        request.context_budget = 300;
        let prompt = request.build();
        assert!(prompt.user.contains("dependency cycle"));
        assert!(prompt.user.contains("--- b.py ---\nimport a"));
        assert!(prompt.user.contains("Also depends on (not shown): c.py"));
    }

    #[test]
    fn test_same_language_modernizes() {
        let mut request = unit();
        request.target_language = "python";
        request.target_framework = Some("fastapi");
        let prompt = request.build();
        assert!(prompt.user.starts_with("Modernize and refactor onto the fastapi framework"));
        assert!(prompt.user.contains("Target Framework: fastapi"));
    }

    #[test]
    fn test_entry_point_prompt() {
        let files = ["src/main/java/com/example/Users.java"];
        let prompt = EntryPointPrompt {
            target_language: "java",
            target_framework: Some("spring_boot"),
            path: "src/main/java/Main.java",
            files: &files,
        }
        .build();
        assert!(prompt
            .user
            .starts_with("Create a startup file for a java application using the spring_boot framework."));
        assert!(prompt.user.contains("Entry point: src/main/java/Main.java\nFilename: Main.java"));
        assert!(prompt.user.contains("- src/main/java/com/example/Users.java\n"));
        assert!(!prompt.user.contains("Original file:"));
    }

    #[test]
    fn test_parse_json_reply() {
        let reply = r#"Here you go:
{"filename": "a.go", "content": "package a\n", "dependencies": {"github.com/x/y": "v1.0.0", "n": 2}, "notes": "ok"}"#;
        let unit = parse_reply(reply).unwrap();
        assert_eq!(unit.content, "package a\n");
        assert_eq!(unit.dependencies["github.com/x/y"], "v1.0.0");
        assert_eq!(unit.dependencies["n"], "2");
        assert_eq!(unit.notes.as_deref(), Some("ok"));
    }

    #[test]
    fn test_parse_fallbacks() {
        let fenced = parse_reply("Sure!\n```go\npackage a\n```\n").unwrap();
        assert_eq!(fenced.content, "package a\n");

        let raw = parse_reply("package a").unwrap();
        assert_eq!(raw.content, "package a\n");

        assert!(parse_reply("   ").is_err());
    }
}
