//! Output tree assembly: file names, dependency manifests and the zip archive

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Write};

use serde::Serialize;
use zip::write::FileOptions;
use zip::CompressionMethod;

use crate::core::error::{CodeShiftError, Result};
use crate::storage::models::{GeneratedFile, JobRecord, JobState, UnitRecord, UnitStatus};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const NOTES_FILE: &str = "CONVERSION_NOTES.md";

/// File extension for a target language, without the dot
pub fn target_extension(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "python" => "py",
        "java" => "java",
        "javascript" => "js",
        "typescript" => "ts",
        "go" => "go",
        "rust" => "rs",
        "cpp" => "cpp",
        "c" => "c",
        _ => "txt",
    }
}

/// Directory a target framework keeps its sources under, `None` for the
/// plain layout
pub fn framework_root(language: &str, framework: Option<&str>) -> Option<&'static str> {
    let framework = framework?;
    let root = match (language.to_ascii_lowercase().as_str(), framework) {
        ("java", "spring" | "spring_boot" | "jakarta_ee") => "src/main/java/com/example",
        ("python", "django") => "django_app",
        ("python", "flask") => "flask_app",
        ("python", "fastapi") => "fastapi_app",
        ("javascript" | "typescript", "react" | "vue") => "src/components",
        ("javascript" | "typescript", "angular") => "src/app",
        ("php", "laravel") | ("ruby", "rails") => "app",
        _ => "src",
    };
    Some(root)
}

/// Source path with the target extension, moved under the framework's
/// source root. Paths already handed out get a numeric suffix on the stem.
pub fn output_path(
    source_path: &str,
    target_language: &str,
    target_framework: Option<&str>,
    taken: &mut HashSet<String>,
) -> String {
    let extension = target_extension(target_language);
    let (source_dir, file_name) = match source_path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, source_path),
    };
    let dir = match (framework_root(target_language, target_framework), source_dir) {
        (Some(root), Some(dir)) => Some(format!("{}/{}", root, dir)),
        (Some(root), None) => Some(root.to_string()),
        (None, dir) => dir.map(str::to_string),
    };
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
    let join = |name: String| match &dir {
        Some(dir) => format!("{}/{}", dir, name),
        None => name,
    };

    let mut candidate = join(format!("{}.{}", stem, extension));
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = join(format!("{}_{}.{}", stem, n, extension));
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

/// File names that already start an application in `language`
fn entry_point_names(language: &str) -> &'static [&'static str] {
    match language.to_ascii_lowercase().as_str() {
        "python" => &["main.py", "manage.py", "start.py"],
        "java" => &["main.java"],
        "javascript" => &["index.js"],
        "typescript" => &["index.ts"],
        "go" => &["main.go"],
        "rust" => &["main.rs"],
        _ => &[],
    }
}

/// Where a startup file goes when none of `outputs` is one. `None` when an
/// output already starts the application or the language has no convention.
pub fn missing_entry_point(language: &str, framework: Option<&str>, outputs: &[&str]) -> Option<String> {
    let names = entry_point_names(language);
    let first = names.first()?;
    let present = outputs.iter().any(|path| {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
        names.contains(&file_name.as_str())
    });
    if present {
        return None;
    }
    let path = match (language.to_ascii_lowercase().as_str(), framework) {
        ("java", Some("spring" | "spring_boot")) => "src/main/java/Main.java".to_string(),
        ("java", _) => "Main.java".to_string(),
        _ => first.to_string(),
    };
    Some(path)
}

/// Name of the dependency manifest for a target language
pub fn dependency_file(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "python" => "requirements.txt",
        "java" => "pom.xml",
        "javascript" | "typescript" => "package.json",
        "go" => "go.mod",
        "rust" => "Cargo.toml",
        _ => "dependencies.txt",
    }
}

/// Baseline dependencies of a target language and framework
pub fn default_dependencies(language: &str, framework: Option<&str>) -> BTreeMap<String, String> {
    let pairs: &[(&str, &str)] = match (language.to_ascii_lowercase().as_str(), framework) {
        ("java", Some("spring" | "spring_boot")) => &[
            ("spring-boot-starter-web", "3.2.0"),
            ("spring-boot-starter-data-jpa", "3.2.0"),
            ("spring-boot-starter-test", "3.2.0"),
            ("junit-jupiter", "5.9.2"),
            ("slf4j-api", "2.0.7"),
        ],
        ("python", _) => &[("requests", "2.31.0"), ("pydantic", "2.5.0")],
        ("java", _) => &[("junit-jupiter", "5.9.2"), ("slf4j-api", "2.0.7")],
        ("javascript", _) => &[("axios", "1.6.0"), ("lodash", "4.17.21")],
        ("typescript", _) => &[("@types/node", "20.8.0"), ("typescript", "5.2.0")],
        ("go", _) => &[("github.com/gorilla/mux", "v1.8.0")],
        ("rust", _) => &[("serde", "1.0"), ("tokio", "1.0")],
        _ => &[],
    };
    pairs
        .iter()
        .map(|(name, version)| (name.to_string(), version.to_string()))
        .collect()
}

/// Render the dependency manifest for `language`
pub fn render_dependency_file(
    language: &str,
    project_name: &str,
    dependencies: &BTreeMap<String, String>,
) -> String {
    let package = package_name(project_name);
    match dependency_file(language) {
        "requirements.txt" => dependencies
            .iter()
            .map(|(name, version)| format!("{}=={}\n", name, version))
            .collect(),
        "package.json" => {
            let manifest = serde_json::json!({
                "name": package,
                "version": "1.0.0",
                "private": true,
                "dependencies": dependencies,
            });
            let mut out = serde_json::to_string_pretty(&manifest).unwrap_or_default();
            out.push('\n');
            out
        }
        "go.mod" => {
            let mut out = format!("module {}\n\ngo 1.21\n", package);
            if !dependencies.is_empty() {
                out.push_str("\nrequire (\n");
                for (name, version) in dependencies {
                    out.push_str(&format!("\t{} {}\n", name, version));
                }
                out.push_str(")\n");
            }
            out
        }
        "Cargo.toml" => {
            let mut out = format!(
                "[package]\nname = \"{}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[dependencies]\n",
                package
            );
            for (name, version) in dependencies {
                out.push_str(&format!("{} = \"{}\"\n", name, version));
            }
            out
        }
        "pom.xml" => render_pom(&package, dependencies),
        _ => dependencies
            .iter()
            .map(|(name, version)| format!("{} {}\n", name, version))
            .collect(),
    }
}

fn render_pom(package: &str, dependencies: &BTreeMap<String, String>) -> String {
    let mut out = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
    <modelVersion>4.0.0</modelVersion>
    <groupId>com.example</groupId>
    <artifactId>{}</artifactId>
    <version>1.0.0</version>
    <dependencies>
"#,
        package
    );
    for (name, version) in dependencies {
        let (group, artifact) = match name.split_once(':') {
            Some((group, artifact)) => (group.to_string(), artifact.to_string()),
            None => (maven_group(name).to_string(), name.clone()),
        };
        out.push_str(&format!(
            "        <dependency>\n            <groupId>{}</groupId>\n            <artifactId>{}</artifactId>\n            <version>{}</version>\n        </dependency>\n",
            group, artifact, version
        ));
    }
    out.push_str("    </dependencies>\n</project>\n");
    out
}

fn maven_group(artifact: &str) -> &'static str {
    if artifact.starts_with("spring-boot") {
        "org.springframework.boot"
    } else if artifact.starts_with("junit") {
        "org.junit.jupiter"
    } else if artifact.starts_with("slf4j") {
        "org.slf4j"
    } else if artifact.starts_with("logback") {
        "ch.qos.logback"
    } else {
        "com.example"
    }
}

/// Lowercase, dash-separated package name
fn package_name(project_name: &str) -> String {
    let name: String = project_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let name = name.trim_matches('-');
    if name.is_empty() {
        "converted-project".to_string()
    } else {
        name.to_string()
    }
}

/// Per-unit line of the manifest
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub source_path: String,
    pub output_path: Option<String>,
    pub status: UnitStatus,
    pub reason: Option<String>,
    pub cycle_note: Option<String>,
    pub notes: Option<String>,
}

/// Description of a job's output tree
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub job_id: String,
    pub project_id: i64,
    pub target_language: String,
    pub target_framework: Option<String>,
    pub state: JobState,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dependency_file: String,
    pub dependencies: BTreeMap<String, String>,
    /// Generated startup file, when no converted unit provides one
    pub entry_point: Option<String>,
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(job: &JobRecord, units: &[UnitRecord]) -> Self {
        let count = |status: UnitStatus| units.iter().filter(|u| u.status == status).count();
        Self {
            job_id: job.id.clone(),
            project_id: job.project_id,
            target_language: job.target_language.clone(),
            target_framework: job.target_framework.clone(),
            state: job.state,
            converted: count(UnitStatus::Converted),
            skipped: count(UnitStatus::Skipped),
            failed: count(UnitStatus::Failed),
            dependency_file: dependency_file(&job.target_language).to_string(),
            dependencies: job.dependencies.clone(),
            entry_point: job.entry_point.as_ref().map(|f| f.path.clone()),
            files: units
                .iter()
                .map(|u| ManifestEntry {
                    source_path: u.source_path.clone(),
                    output_path: u.output_path.clone(),
                    status: u.status,
                    reason: u.reason.clone(),
                    cycle_note: u.cycle_note.clone(),
                    notes: u.notes.clone(),
                })
                .collect(),
        }
    }

    fn render_notes(&self) -> String {
        let mut out = format!(
            "# Code Conversion Notes\n\n**Target Language:** {}\n",
            self.target_language
        );
        if let Some(framework) = &self.target_framework {
            out.push_str(&format!("**Target Framework:** {}\n", framework));
        }
        out.push_str(&format!(
            "\n## Summary\n\n{} converted, {} skipped, {} failed.\n",
            self.converted, self.skipped, self.failed
        ));
        if let Some(entry_point) = &self.entry_point {
            out.push_str(&format!("\nEntry point `{}` was generated.\n", entry_point));
        }
        for entry in &self.files {
            let detail = [entry.reason.as_deref(), entry.cycle_note.as_deref(), entry.notes.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("; ");
            out.push_str(&format!("\n- `{}`: {}", entry.source_path, entry.status));
            if !detail.is_empty() {
                out.push_str(&format!(" ({})", detail));
            }
        }
        out.push('\n');
        out
    }
}

/// Zip archive of converted files, the generated entry point, dependency
/// manifest, notes and `manifest.json`
pub fn write_archive(
    manifest: &Manifest,
    units: &[UnitRecord],
    entry_point: Option<&GeneratedFile>,
    project_name: &str,
) -> Result<Vec<u8>> {
    let zip_err = |e: zip::result::ZipError| CodeShiftError::Internal(format!("zip: {}", e));
    let io_err = |e: std::io::Error| CodeShiftError::Internal(format!("zip: {}", e));

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for unit in units.iter().filter(|u| u.status == UnitStatus::Converted) {
        let (Some(path), Some(output)) = (&unit.output_path, &unit.output) else {
            continue;
        };
        writer.start_file(path.as_str(), options).map_err(zip_err)?;
        writer.write_all(output.as_bytes()).map_err(io_err)?;
    }
    if let Some(file) = entry_point {
        writer.start_file(file.path.as_str(), options).map_err(zip_err)?;
        writer.write_all(file.content.as_bytes()).map_err(io_err)?;
    }

    let dependencies = render_dependency_file(&manifest.target_language, project_name, &manifest.dependencies);
    writer
        .start_file(manifest.dependency_file.as_str(), options)
        .map_err(zip_err)?;
    writer.write_all(dependencies.as_bytes()).map_err(io_err)?;

    writer.start_file(NOTES_FILE, options).map_err(zip_err)?;
    writer.write_all(manifest.render_notes().as_bytes()).map_err(io_err)?;

    let encoded = serde_json::to_vec_pretty(manifest)
        .map_err(|e| CodeShiftError::Internal(format!("manifest: {}", e)))?;
    writer.start_file(MANIFEST_FILE, options).map_err(zip_err)?;
    writer.write_all(&encoded).map_err(io_err)?;

    let cursor = writer.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Read;

    #[test]
    fn test_output_paths_avoid_collisions() {
        let mut taken = HashSet::new();
        assert_eq!(output_path("pkg/a.py", "go", None, &mut taken), "pkg/a.go");
        assert_eq!(output_path("pkg/a.pyi", "go", None, &mut taken), "pkg/a_2.go");
        assert_eq!(output_path("Makefile", "rust", None, &mut taken), "Makefile.rs");
        assert_eq!(output_path("x.py", "cobol", None, &mut taken), "x.txt");
    }

    #[test]
    fn test_framework_layouts() {
        let mut taken = HashSet::new();
        assert_eq!(
            output_path("service/users.py", "java", Some("spring_boot"), &mut taken),
            "src/main/java/com/example/service/users.java"
        );
        assert_eq!(
            output_path("views.py", "python", Some("django"), &mut taken),
            "django_app/views.py"
        );
        assert_eq!(
            output_path("app.py", "typescript", Some("angular"), &mut taken),
            "src/app/app.ts"
        );
        assert_eq!(output_path("server.py", "go", Some("gin"), &mut taken), "src/server.go");
        assert_eq!(framework_root("java", None), None);
    }

    #[test]
    fn test_missing_entry_points() {
        assert_eq!(missing_entry_point("go", None, &["a.go", "pkg/b.go"]), Some("main.go".to_string()));
        assert_eq!(missing_entry_point("go", None, &["cmd/main.go"]), None);
        assert_eq!(missing_entry_point("python", Some("django"), &["django_app/manage.py"]), None);
        assert_eq!(
            missing_entry_point("java", Some("spring_boot"), &["src/main/java/com/example/Users.java"]),
            Some("src/main/java/Main.java".to_string())
        );
        assert_eq!(
            missing_entry_point("java", None, &["src/Users.java"]),
            Some("Main.java".to_string())
        );
        assert_eq!(missing_entry_point("java", None, &["src/Main.java"]), None);
        assert_eq!(missing_entry_point("cobol", None, &[]), None);
    }

    #[test]
    fn test_dependency_files() {
        assert_eq!(dependency_file("typescript"), "package.json");
        assert_eq!(dependency_file("cobol"), "dependencies.txt");

        let deps = default_dependencies("python", None);
        assert_eq!(
            render_dependency_file("python", "demo", &deps),
            "pydantic==2.5.0\nrequests==2.31.0\n"
        );

        let go = render_dependency_file("go", "My Project", &default_dependencies("go", None));
        assert!(go.starts_with("module my-project\n"));
        assert!(go.contains("\tgithub.com/gorilla/mux v1.8.0\n"));

        let spring = default_dependencies("java", Some("spring_boot"));
        let pom = render_dependency_file("java", "demo", &spring);
        assert!(pom.contains("<groupId>org.springframework.boot</groupId>"));
        assert!(pom.contains("<artifactId>spring-boot-starter-web</artifactId>"));
    }

    #[test]
    fn test_archive_contents() {
        let job = JobRecord {
            id: "job-1".to_string(),
            project_id: 1,
            target_language: "go".to_string(),
            target_framework: None,
            state: JobState::Completed,
            error: None,
            dependencies: default_dependencies("go", None),
            superseded: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            entry_point: Some(GeneratedFile {
                path: "main.go".to_string(),
                content: "package main\n\nfunc main() {}\n".to_string(),
            }),
        };
        let unit = |position: u32, path: &str, status: UnitStatus, output: Option<&str>| UnitRecord {
            job_id: "job-1".to_string(),
            position,
            node_id: position as i64,
            source_path: path.to_string(),
            status,
            reason: None,
            cycle_note: None,
            output_path: output.map(|_| path.replace(".py", ".go")),
            output: output.map(str::to_string),
            notes: None,
        };
        let units = vec![
            unit(0, "a.py", UnitStatus::Converted, Some("package a\n")),
            unit(1, "empty.py", UnitStatus::Skipped, None),
        ];
        let manifest = Manifest::new(&job, &units);
        assert_eq!(manifest.converted, 1);
        assert_eq!(manifest.skipped, 1);
        assert_eq!(manifest.entry_point.as_deref(), Some("main.go"));

        let bytes = write_archive(&manifest, &units, job.entry_point.as_ref(), "demo").unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"a.go".to_string()));
        assert!(names.contains(&"go.mod".to_string()));
        assert!(names.contains(&MANIFEST_FILE.to_string()));
        assert!(names.contains(&NOTES_FILE.to_string()));
        assert!(!names.iter().any(|n| n.starts_with("empty")));

        let mut content = String::new();
        archive.by_name("a.go").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "package a\n");

        let mut main = String::new();
        archive.by_name("main.go").unwrap().read_to_string(&mut main).unwrap();
        assert!(main.contains("func main()"));
    }
}
