mod heading;

use anyhow::{anyhow, Result};
use heading::Heading;
use inflector::Inflector;
use lazy_static::lazy_static;
use map_macro::map;
use regex::Regex;
use std::{collections::HashMap, fs, path::Path};
use yaml_front_matter::YamlFrontMatter;

lazy_static! {
    static ref HTML_COMMENT_RE: Regex = Regex::new(r"<!--[\s\S]*?-->").unwrap();
}

/// Sections are split at the next blank line once they grow past this, so
/// each one stays small enough to embed as a single input.
const MAX_SECTION_LEN: usize = 800;

#[derive(Debug, serde::Deserialize, Default)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl FrontMatter {
    fn ensure_title(&self, path: &Path) -> Result<String> {
        self.title.as_ref().map_or_else(
            || {
                Ok(path
                    .file_stem()
                    .ok_or_else(|| anyhow!("Failed to get file stem"))?
                    .to_str()
                    .ok_or_else(|| anyhow!("Failed to convert path to string"))?
                    .to_title_case())
            },
            |title| Ok(title.clone()),
        )
    }
}

fn parse_meta(content: &str) -> Result<(FrontMatter, String), Box<dyn std::error::Error>> {
    let document = YamlFrontMatter::parse::<FrontMatter>(content)?;

    Ok((document.metadata, document.content.trim().to_owned()))
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Section {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
}

impl Section {
    const fn with_title(title: Option<String>) -> Self {
        Self {
            title,
            content: String::new(),
        }
    }

    fn append(&mut self, line: &str) {
        if !self.content.is_empty() {
            self.content.push('\n');
        }

        self.content.push_str(line.trim_end());
    }
}

struct Sectionizer {
    current: usize,
    in_code_block: bool,
    sections: Vec<Section>,
    breadcrumbs: HashMap<usize, String>,
}

impl Sectionizer {
    fn with_title(title: Option<String>) -> Self {
        Self {
            current: 0,
            in_code_block: false,
            sections: vec![Section::with_title(None)],
            breadcrumbs: title.map_or_else(HashMap::new, |title| {
                map! {
                    1 => title
                }
            }),
        }
    }

    fn toggle_code_block(&mut self) {
        self.in_code_block = !self.in_code_block;
    }

    /// Chains the titles of enclosing headings into a breadcrumb, so a
    /// subsection embeds with its context ("Guide: Install: Linux").
    fn open(&mut self, heading: &Heading) {
        self.breadcrumbs
            .insert(heading.depth, heading.content.clone());

        let mut title = heading.content.clone();
        for depth in (1..heading.depth).rev() {
            if let Some(parent) = self.breadcrumbs.get(&depth) {
                title = format!("{parent}: {title}");
            }
        }

        self.push_section(Section::with_title(Some(title)));
    }

    fn push_section(&mut self, section: Section) {
        self.sections.push(section);
        self.current += 1;
    }

    fn push_line(&mut self, line: &str) {
        let content = &self.sections[self.current].content;

        if !self.in_code_block && content.ends_with('\n') && content.len() > MAX_SECTION_LEN {
            self.push_section(Section::with_title(
                self.sections[self.current].title.clone(),
            ));

            return self.push_line(line);
        }

        self.sections[self.current].append(line);
    }

    fn into_sections(self) -> Vec<Section> {
        self.sections
            .into_iter()
            .map(|section| Section {
                title: section.title,
                content: section.content.trim().to_owned(),
            })
            .filter(|section| !section.content.is_empty())
            .collect()
    }
}

pub fn extract_sections(content: &str, metadata: &mut FrontMatter) -> Vec<Section> {
    let mut state = Sectionizer::with_title(metadata.title.clone());

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            state.toggle_code_block();
        }

        if !state.in_code_block {
            if let Some(heading) = Heading::try_parse(line) {
                if heading.depth == 1 && metadata.title.is_none() {
                    metadata.title = Some(heading.content.clone());
                }

                state.open(&heading);
                continue;
            }
        }

        state.push_line(line);
    }

    state.into_sections()
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Document {
    pub path: String,
    pub title: String,
    pub description: Option<String>,
    pub sections: Vec<Section>,
}

/// Parses a file into a document of embeddable sections.
///
/// Markdown headings bound sections and YAML front matter supplies the title
/// and description; plain-text files become untitled sections split at blank
/// lines. The document path is the file's path relative to `base`, without
/// its extension.
///
/// # Errors
/// - If the file cannot be read as UTF-8 text.
/// - If the front matter cannot be parsed.
/// - If the file path cannot be converted to a string or stripped of `base`.
pub fn into_document(path: &Path, base: &Path) -> Result<Document> {
    let content = fs::read_to_string(path)?;

    let (mut metadata, content) = if content.trim_start().starts_with("---") {
        parse_meta(&content).map_err(|err| {
            anyhow!("Failed to parse front matter for file {}: {err}", path.display())
        })?
    } else {
        (FrontMatter::default(), content)
    };

    let content = HTML_COMMENT_RE.replace_all(&content, "");
    let sections = extract_sections(&content, &mut metadata);

    Ok(Document {
        sections,
        title: metadata.ensure_title(path)?,
        description: metadata.description,
        path: format!(
            "/{}",
            path.strip_prefix(base)?
                .with_extension("")
                .to_str()
                .ok_or_else(|| anyhow!("Failed to convert path to string"))?
        ),
    })
}
