// src/sandbox/languages.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{CodeboxError, Result};

/// How to run one language: the container image, the file the submission is
/// written to, and the command run from the directory holding that file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanguageSpec {
    pub image: String,
    pub file_name: String,
    pub command: Vec<String>,
    /// Command for the local backend. Falls back to `command` when absent.
    #[serde(default)]
    pub local_command: Option<Vec<String>>,
}

impl LanguageSpec {
    fn new(image: &str, file_name: &str, command: &[&str]) -> Self {
        Self {
            image: image.to_string(),
            file_name: file_name.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
            local_command: None,
        }
    }

    fn with_local(mut self, command: &[&str]) -> Self {
        self.local_command = Some(command.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn local_command(&self) -> &[String] {
        self.local_command.as_deref().unwrap_or(&self.command)
    }
}

#[derive(Deserialize)]
struct LanguagesFile {
    #[serde(default)]
    languages: BTreeMap<String, LanguageSpec>,
}

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: BTreeMap<String, LanguageSpec>,
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        let mut languages = BTreeMap::new();
        languages.insert(
            "python".to_string(),
            LanguageSpec::new("python:3.11-slim", "code.py", &["python", "-u", "code.py"])
                .with_local(&["python3", "-u", "code.py"]),
        );
        languages.insert(
            "javascript".to_string(),
            LanguageSpec::new("node:18-alpine", "code.js", &["node", "code.js"]),
        );
        languages.insert(
            "typescript".to_string(),
            LanguageSpec::new("node:18-alpine", "code.ts", &["npx", "--yes", "ts-node", "code.ts"]),
        );
        languages.insert(
            "java".to_string(),
            LanguageSpec::new("openjdk:17-slim", "Main.java", &["java", "Main.java"]),
        );
        languages.insert(
            "go".to_string(),
            LanguageSpec::new("golang:1.21-alpine", "main.go", &["go", "run", "main.go"]),
        );
        languages.insert(
            "rust".to_string(),
            LanguageSpec::new("rust:1.75-slim", "main.rs", &["sh", "-c", "rustc -o main main.rs && ./main"]),
        );
        languages.insert(
            "ruby".to_string(),
            LanguageSpec::new("ruby:3.2-slim", "code.rb", &["ruby", "code.rb"]),
        );
        languages.insert(
            "php".to_string(),
            LanguageSpec::new("php:8.2-cli", "code.php", &["php", "code.php"]),
        );
        languages.insert(
            "shell".to_string(),
            LanguageSpec::new("alpine:3.19", "code.sh", &["sh", "code.sh"]),
        );
        Self { languages }
    }

    /// Built-in table, with entries from a TOML file layered on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut registry = Self::builtin();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)?;
            registry.merge_toml(&raw)?;
            log::info!("Loaded language overrides from {}", path.display());
        }
        Ok(registry)
    }

    pub fn merge_toml(&mut self, raw: &str) -> Result<()> {
        let file: LanguagesFile = toml::from_str(raw)?;
        for (name, spec) in file.languages {
            if spec.command.is_empty() || spec.file_name.trim().is_empty() {
                return Err(CodeboxError::Config(format!(
                    "language '{}' needs a file_name and a non-empty command",
                    name
                )));
            }
            self.languages.insert(name.to_lowercase(), spec);
        }
        Ok(())
    }

    pub fn get(&self, language: &str) -> Result<&LanguageSpec> {
        self.languages
            .get(&language.trim().to_lowercase())
            .ok_or_else(|| CodeboxError::UnsupportedLanguage(language.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.languages.keys().cloned().collect()
    }

    pub fn entries(&self) -> &BTreeMap<String, LanguageSpec> {
        &self.languages
    }
}
