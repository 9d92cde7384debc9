//! Report assembly: drop generated paragraphs into a text template
//!
//! Each paragraph task owns one `{{token}}` in the template, where the token
//! is its alias from `doc_placeholders.yaml` or its own id. Substitution is
//! literal; tokens that belong to no paragraph task are left untouched.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use crate::domain::{PlaceholderMapping, TaskConfig};

/// A filled-in report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledReport {
    pub text: String,
    /// Paragraph ids whose token was blanked because no text was generated
    pub unfilled: Vec<String>,
    /// Paragraph ids whose token does not occur in the template
    pub unused: Vec<String>,
}

impl AssembledReport {
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        debug!(?path, "AssembledReport::write: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, &self.text).context(format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), bytes = self.text.len(), "Wrote report");
        Ok(())
    }
}

/// Fill `template` with the run's paragraphs
///
/// The template is scanned once, left to right. Inserted paragraph text is
/// never scanned again, so a paragraph that mentions another's token keeps it.
pub fn assemble(template: &str, tasks: &TaskConfig, placeholders: &PlaceholderMapping) -> AssembledReport {
    debug!(
        template_len = template.len(),
        paragraphs = tasks.paragraphs.len(),
        generated = placeholders.len(),
        "assemble: called"
    );
    let slots: HashMap<&str, &str> = tasks
        .paragraphs
        .iter()
        .map(|task| {
            let id = task.placeholder_name.as_str();
            (tasks.token_for(id), id)
        })
        .collect();

    let mut text = String::with_capacity(template.len());
    let mut seen = HashSet::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            break;
        };
        let name = &after_open[..close];
        match slots.get(name) {
            Some(id) => {
                text.push_str(&rest[..open]);
                text.push_str(placeholders.get(id).unwrap_or_default());
                seen.insert(*id);
                rest = &after_open[close + 2..];
            }
            None => {
                // Not a paragraph token; step past one brace so "{{{X}}" still finds X
                text.push_str(&rest[..open + 1]);
                rest = &rest[open + 1..];
            }
        }
    }
    text.push_str(rest);

    let mut unfilled = Vec::new();
    let mut unused = Vec::new();
    for task in &tasks.paragraphs {
        let id = task.placeholder_name.as_str();
        if !seen.contains(id) {
            warn!(paragraph = %id, token = %tasks.token_for(id), "Template has no slot for paragraph");
            unused.push(id.to_string());
        } else if placeholders.get(id).is_none() {
            unfilled.push(id.to_string());
        }
    }

    AssembledReport { text, unfilled, unused }
}

/// Read a template file and fill it
pub fn assemble_file(
    template_path: impl AsRef<Path>,
    tasks: &TaskConfig,
    placeholders: &PlaceholderMapping,
) -> Result<AssembledReport> {
    let template_path = template_path.as_ref();
    let template = std::fs::read_to_string(template_path)
        .context(format!("Failed to read report template {}", template_path.display()))?;
    Ok(assemble(&template, tasks, placeholders))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParagraphTask;
    use std::path::PathBuf;

    fn tasks() -> TaskConfig {
        let paragraph = |name: &str| ParagraphTask {
            placeholder_name: name.to_string(),
            input_keys: vec![],
            prompt_template: PathBuf::from("p.hbs"),
            provider_name: "openai".to_string(),
        };
        let mut tasks = TaskConfig {
            paragraphs: vec![paragraph("IntroParagraph"), paragraph("DoseParagraph"), paragraph("Appendix")],
            ..Default::default()
        };
        tasks.placeholders.insert("IntroParagraph".to_string(), "INTRO".to_string());
        tasks
    }

    #[test]
    fn test_assemble_fills_aliases_and_ids() {
        let mut generated = PlaceholderMapping::new();
        generated.insert("IntroParagraph", "Cmax was 12.3.");
        generated.insert("DoseParagraph", "Dose was 100 mg.");

        let report = assemble(
            "# Report\n\n{{INTRO}}\n\n{{DoseParagraph}}\n\n{{Unrelated}}\n",
            &tasks(),
            &generated,
        );
        assert_eq!(
            report.text,
            "# Report\n\nCmax was 12.3.\n\nDose was 100 mg.\n\n{{Unrelated}}\n"
        );
        assert!(report.unfilled.is_empty());
        assert_eq!(report.unused, vec!["Appendix"]);
    }

    #[test]
    fn test_failed_paragraph_blanks_its_slot() {
        let mut generated = PlaceholderMapping::new();
        generated.insert("IntroParagraph", "Intro.");

        let report = assemble("{{INTRO}}|{{DoseParagraph}}|{{Appendix}}", &tasks(), &generated);
        assert_eq!(report.text, "Intro.||");
        assert_eq!(report.unfilled, vec!["DoseParagraph", "Appendix"]);
    }

    #[test]
    fn test_inserted_text_is_not_rescanned() {
        let mut generated = PlaceholderMapping::new();
        generated.insert("IntroParagraph", "see {{DoseParagraph}} below");
        generated.insert("DoseParagraph", "Dose was 100 mg.");
        generated.insert("Appendix", "{{INTRO}}");

        let report = assemble("{{INTRO}}|{{DoseParagraph}}|{{Appendix}}", &tasks(), &generated);
        assert_eq!(report.text, "see {{DoseParagraph}} below|Dose was 100 mg.|{{INTRO}}");
        assert!(report.unfilled.is_empty());
        assert!(report.unused.is_empty());
    }

    #[test]
    fn test_repeated_and_unterminated_tokens() {
        let mut generated = PlaceholderMapping::new();
        generated.insert("IntroParagraph", "Intro.");

        let report = assemble("{{{INTRO}} {{INTRO}} {{INTRO", &tasks(), &generated);
        assert_eq!(report.text, "{Intro. Intro. {{INTRO");
        assert_eq!(report.unused, vec!["DoseParagraph", "Appendix"]);
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.md");
        let report = assemble("{{INTRO}}", &tasks(), &PlaceholderMapping::new());
        report.write(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
